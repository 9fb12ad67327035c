use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Cue {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub cue_type: CueType,
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub style: CueStyle,
    #[serde(default)]
    pub timing: CueTiming,
    #[serde(default)]
    pub notes: String,
}

impl Cue {
    pub fn new(cue_type: CueType) -> Self {
        Self {
            id: Uuid::new_v4(),
            cue_type,
            title: "New Cue".to_string(),
            content: "Enter content here".to_string(),
            style: CueStyle::default(),
            timing: CueTiming::default(),
            notes: String::new(),
        }
    }

    /// Deep copy with a fresh id and a " (Copy)" title suffix.
    pub fn duplicate(&self) -> Self {
        Self {
            id: Uuid::new_v4(),
            title: format!("{} (Copy)", self.title),
            ..self.clone()
        }
    }

    pub fn matches(&self, query: &str) -> bool {
        let query = query.to_lowercase();
        self.title.to_lowercase().contains(&query) || self.content.to_lowercase().contains(&query)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum CueType {
    #[default]
    Text,
    Song,
    Bible,
    Media,
    Video,
    Image,
    Audio,
    Web,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct CueStyle {
    pub background_color: String,
    pub text_color: String,
    pub font_size: String,
    pub text_align: TextAlign,
    pub font_family: String,
}

impl Default for CueStyle {
    fn default() -> Self {
        Self {
            background_color: "#ffffff".to_string(),
            text_color: "#000000".to_string(),
            font_size: "24px".to_string(),
            text_align: TextAlign::Center,
            font_family: "Arial".to_string(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum TextAlign {
    Left,
    #[default]
    Center,
    Right,
    Justify,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct CueTiming {
    pub duration: f64, // seconds
    pub auto_continue: bool,
    pub transition: Transition,
}

impl Default for CueTiming {
    fn default() -> Self {
        Self {
            duration: 30.0,
            auto_continue: false,
            transition: Transition::default(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct Transition {
    #[serde(rename = "type")]
    pub kind: TransitionKind,
    pub duration: f64,
}

impl Default for Transition {
    fn default() -> Self {
        Self {
            kind: TransitionKind::Fade,
            duration: 0.5,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum TransitionKind {
    None,
    #[default]
    Fade,
    Slide,
    Zoom,
}

/// Partial edit from the cue editor. Present fields overwrite, absent ones are kept.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CueUpdate {
    #[serde(rename = "type")]
    pub cue_type: Option<CueType>,
    pub title: Option<String>,
    pub content: Option<String>,
    pub style: Option<CueStyle>,
    pub timing: Option<CueTiming>,
    pub notes: Option<String>,
}

impl CueUpdate {
    pub fn apply(self, cue: &mut Cue) {
        if let Some(cue_type) = self.cue_type {
            cue.cue_type = cue_type;
        }
        if let Some(title) = self.title {
            cue.title = title;
        }
        if let Some(content) = self.content {
            cue.content = content;
        }
        if let Some(style) = self.style {
            cue.style = style;
        }
        if let Some(timing) = self.timing {
            cue.timing = timing;
        }
        if let Some(notes) = self.notes {
            cue.notes = notes;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_cue_defaults() {
        let cue = Cue::new(CueType::Song);
        assert_eq!(cue.cue_type, CueType::Song);
        assert_eq!(cue.title, "New Cue");
        assert_eq!(cue.style.font_size, "24px");
        assert_eq!(cue.style.text_align, TextAlign::Center);
        assert_eq!(cue.timing.duration, 30.0);
        assert!(!cue.timing.auto_continue);
        assert_eq!(cue.timing.transition.kind, TransitionKind::Fade);
    }

    #[test]
    fn duplicate_gets_new_id_and_suffix() {
        let mut cue = Cue::new(CueType::Bible);
        cue.title = "John 3:16".to_string();
        cue.notes = "read slowly".to_string();

        let copy = cue.duplicate();
        assert_ne!(copy.id, cue.id);
        assert_eq!(copy.title, "John 3:16 (Copy)");
        assert_eq!(copy.notes, cue.notes);
        assert_eq!(copy.cue_type, CueType::Bible);
    }

    #[test]
    fn update_only_touches_present_fields() {
        let mut cue = Cue::new(CueType::Text);
        let id = cue.id;
        let update = CueUpdate {
            title: Some("Welcome".to_string()),
            ..Default::default()
        };
        update.apply(&mut cue);

        assert_eq!(cue.id, id);
        assert_eq!(cue.title, "Welcome");
        assert_eq!(cue.content, "Enter content here");
    }

    #[test]
    fn deserializes_wire_format() {
        let json = r#"{
            "id": "7f2c1d9e-4a57-4c1b-9a43-0c1d2e3f4a5b",
            "type": "song",
            "title": "Amazing Grace",
            "content": "Amazing grace, how sweet the sound",
            "timing": { "duration": 12.5, "autoContinue": true, "transition": { "type": "zoom", "duration": 1.0 } }
        }"#;
        let cue: Cue = serde_json::from_str(json).unwrap();
        assert_eq!(cue.cue_type, CueType::Song);
        assert_eq!(cue.timing.duration, 12.5);
        assert!(cue.timing.auto_continue);
        assert_eq!(cue.timing.transition.kind, TransitionKind::Zoom);
        assert_eq!(cue.style, CueStyle::default());
        assert!(cue.notes.is_empty());
    }

    #[test]
    fn search_is_case_insensitive_over_title_and_content() {
        let mut cue = Cue::new(CueType::Text);
        cue.title = "Announcements".to_string();
        cue.content = "Potluck on Sunday".to_string();
        assert!(cue.matches("announce"));
        assert!(cue.matches("POTLUCK"));
        assert!(!cue.matches("sermon"));
    }
}
