use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::template::Template;

/// Timestamps closer than this are treated as the same version.
pub const CONFLICT_TOLERANCE_MS: i64 = 1000;

pub trait Versioned {
    fn updated_at(&self) -> DateTime<Utc>;
}

pub trait Mergeable {
    fn merge(local: &Self, backend: &Self) -> Self;
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum Side {
    Local,
    Backend,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum Strategy {
    #[default]
    Newer,
    Local,
    Backend,
    Merge,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Conflict<T> {
    pub local: T,
    pub backend: T,
    pub local_time: DateTime<Utc>,
    pub backend_time: DateTime<Utc>,
    pub newer: Side,
}

pub fn detect_conflict<T: Versioned + Clone>(local: &T, backend: &T) -> Option<Conflict<T>> {
    let local_time = local.updated_at();
    let backend_time = backend.updated_at();

    if (local_time - backend_time).num_milliseconds().abs() < CONFLICT_TOLERANCE_MS {
        return None;
    }

    Some(Conflict {
        local: local.clone(),
        backend: backend.clone(),
        local_time,
        backend_time,
        newer: if local_time > backend_time { Side::Local } else { Side::Backend },
    })
}

pub fn resolve_conflict<T: Mergeable>(conflict: Conflict<T>, strategy: Strategy) -> T {
    match strategy {
        Strategy::Newer => match conflict.newer {
            Side::Local => conflict.local,
            Side::Backend => conflict.backend,
        },
        Strategy::Local => conflict.local,
        Strategy::Backend => conflict.backend,
        Strategy::Merge => T::merge(&conflict.local, &conflict.backend),
    }
}

impl Versioned for Template {
    fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }
}

impl Mergeable for Template {
    fn merge(local: &Self, backend: &Self) -> Self {
        let mut tags = local.tags.clone();
        for tag in &backend.tags {
            if !tags.contains(tag) {
                tags.push(tag.clone());
            }
        }

        Template {
            name: if local.name.is_empty() { backend.name.clone() } else { local.name.clone() },
            description: if local.description.is_empty() {
                backend.description.clone()
            } else {
                local.description.clone()
            },
            tags,
            merged_at: Some(Utc::now()),
            merge_strategy: Some("auto".to_string()),
            ..backend.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    fn template_at(name: &str, updated_at: DateTime<Utc>) -> Template {
        let mut template = Template::new(name, "worship");
        template.updated_at = updated_at;
        template
    }

    #[test]
    fn close_timestamps_are_not_a_conflict() {
        let now = Utc::now();
        let local = template_at("Lyrics", now);
        let backend = template_at("Lyrics", now + Duration::milliseconds(999));
        assert!(detect_conflict(&local, &backend).is_none());
        assert!(detect_conflict(&backend, &local).is_none());
    }

    #[test]
    fn newer_strategy_picks_later_side() {
        let now = Utc::now();
        let local = template_at("Local", now + Duration::seconds(5));
        let backend = template_at("Backend", now);

        let conflict = detect_conflict(&local, &backend).unwrap();
        assert_eq!(conflict.newer, Side::Local);
        assert_eq!(resolve_conflict(conflict, Strategy::Newer).name, "Local");

        let conflict = detect_conflict(&backend, &local).unwrap();
        assert_eq!(conflict.newer, Side::Backend);
        assert_eq!(resolve_conflict(conflict, Strategy::Newer).name, "Local");
    }

    #[test]
    fn explicit_sides_ignore_timestamps() {
        let now = Utc::now();
        let local = template_at("Local", now);
        let backend = template_at("Backend", now + Duration::seconds(2));

        let conflict = detect_conflict(&local, &backend).unwrap();
        assert_eq!(resolve_conflict(conflict.clone(), Strategy::Local).name, "Local");
        assert_eq!(resolve_conflict(conflict, Strategy::Backend).name, "Backend");
    }

    #[test]
    fn merge_unions_tags_and_prefers_local_text() {
        let now = Utc::now();
        let mut local = template_at("Easter Service", now);
        local.tags = vec!["easter".to_string(), "choir".to_string()];
        let mut backend = template_at("Easter", now + Duration::seconds(10));
        backend.description = "Sunrise service layout".to_string();
        backend.tags = vec!["choir".to_string(), "spring".to_string()];
        backend.category = "seasonal".to_string();

        let merged = resolve_conflict(detect_conflict(&local, &backend).unwrap(), Strategy::Merge);
        assert_eq!(merged.name, "Easter Service");
        assert_eq!(merged.description, "Sunrise service layout");
        assert_eq!(merged.category, "seasonal");
        assert_eq!(merged.tags, vec!["easter", "choir", "spring"]);
        assert_eq!(merged.merge_strategy.as_deref(), Some("auto"));
        assert!(merged.merged_at.is_some());
    }
}
