use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    executor::ExecutorEvent,
    model::cue::Cue,
    theme::{BrandTheme, ThemeMode},
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "param")]
pub enum UiEvent {
    // Cue Status Events
    CueStarted {
        cue_id: Uuid,
    },
    CuePaused {
        cue_id: Uuid,
        position: f64,
    },
    CueCompleted {
        cue_id: Uuid,
    },
    TimerReset {
        cue_id: Uuid,
    },

    // Playback Events
    PlaybackCursorMoved {
        cue_id: Uuid,
        index: usize,
    },
    PlayStateChanged {
        is_playing: bool,
    },

    // Show Model Events
    ShowModelLoaded,
    CueUpdated {
        cue: Cue,
    },
    CueAdded {
        cue: Cue,
        at_index: usize,
    },
    CueRemoved {
        cue_id: Uuid,
    },
    CueMoved {
        cue_id: Uuid,
        to_index: usize,
    },

    // Application Events
    ThemeChanged {
        mode: ThemeMode,
    },
    OutputThemeChanged {
        theme: BrandTheme,
    },
    SettingsChanged,
    SessionChanged {
        authenticated: bool,
    },
    TemplateSynced {
        request_id: Uuid,
        path: String,
    },
    SyncCompleted {
        processed: usize,
        dropped: usize,
        remaining: usize,
    },
    MembershipChanged {
        relation: String,
        row_id: String,
        col_id: String,
        member: bool,
    },
}

impl UiEvent {
    /// Executor events that the UI cares about. Progress ticks travel through
    /// `ShowState` instead.
    pub fn from_executor(value: &ExecutorEvent) -> Option<Self> {
        match value {
            ExecutorEvent::Started { cue_id } => Some(UiEvent::CueStarted { cue_id: *cue_id }),
            ExecutorEvent::Paused { cue_id, position, .. } => Some(UiEvent::CuePaused {
                cue_id: *cue_id,
                position: *position,
            }),
            ExecutorEvent::Completed { cue_id } => Some(UiEvent::CueCompleted { cue_id: *cue_id }),
            ExecutorEvent::Reset { cue_id } => Some(UiEvent::TimerReset { cue_id: *cue_id }),
            ExecutorEvent::Progress { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_with_type_tag() {
        let cue_id = Uuid::nil();
        let json = serde_json::to_value(UiEvent::CueRemoved { cue_id }).unwrap();
        assert_eq!(json["type"], "CueRemoved");
        assert_eq!(json["param"]["cue_id"], cue_id.to_string());

        let json = serde_json::to_value(UiEvent::ShowModelLoaded).unwrap();
        assert_eq!(json["type"], "ShowModelLoaded");
    }

    #[test]
    fn progress_is_not_forwarded() {
        let cue_id = Uuid::new_v4();
        let progress = ExecutorEvent::Progress {
            cue_id,
            position: 1.0,
            duration: 10.0,
            progress: 10.0,
        };
        assert_eq!(UiEvent::from_executor(&progress), None);
        assert_eq!(
            UiEvent::from_executor(&ExecutorEvent::Completed { cue_id }),
            Some(UiEvent::CueCompleted { cue_id })
        );
    }
}
