use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;
use tokio::sync::{RwLock, broadcast};

use crate::{
    event::UiEvent,
    model::settings::Settings,
    storage::{LocalStore, keys},
};

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("invalid settings: {0}")]
    Invalid(String),
    #[error("settings file is not valid JSON: {0}")]
    Parse(String),
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

struct SettingsState {
    settings: Settings,
    dirty: bool,
}

/// In-memory preference bag. Edits stay unsaved until `save`.
#[derive(Clone)]
pub struct SettingsManager {
    store: LocalStore,
    state: Arc<RwLock<SettingsState>>,
    event_tx: broadcast::Sender<UiEvent>,
}

impl SettingsManager {
    pub fn new(store: LocalStore, event_tx: broadcast::Sender<UiEvent>) -> Self {
        Self {
            store,
            state: Arc::new(RwLock::new(SettingsState {
                settings: Settings::default(),
                dirty: false,
            })),
            event_tx,
        }
    }

    pub async fn load(&self) {
        let settings = self.store.get::<Settings>(keys::SETTINGS).await.unwrap_or_default();
        *self.state.write().await = SettingsState { settings, dirty: false };
    }

    pub async fn get(&self) -> Settings {
        self.state.read().await.settings.clone()
    }

    pub async fn has_unsaved_changes(&self) -> bool {
        self.state.read().await.dirty
    }

    /// Deep-merges `patch` into the current settings. Nested objects merge per
    /// key; a result that no longer fits `Settings` changes nothing.
    pub async fn update(&self, patch: Value) -> Result<Settings, SettingsError> {
        let mut state = self.state.write().await;
        let mut merged = serde_json::to_value(&state.settings).map_err(|e| SettingsError::Invalid(e.to_string()))?;
        merge_json(&mut merged, patch);
        let settings: Settings = serde_json::from_value(merged).map_err(|e| SettingsError::Invalid(e.to_string()))?;

        state.settings = settings.clone();
        state.dirty = true;
        drop(state);

        self.notify();
        Ok(settings)
    }

    pub async fn save(&self) -> Result<(), SettingsError> {
        let mut state = self.state.write().await;
        self.store.set(keys::SETTINGS, &state.settings).await?;
        state.dirty = false;
        log::info!("Settings saved.");
        Ok(())
    }

    pub async fn reset(&self) -> Settings {
        let settings = Settings::default();
        *self.state.write().await = SettingsState {
            settings: settings.clone(),
            dirty: true,
        };
        self.notify();
        settings
    }

    /// Applies an exported document on top of the defaults.
    pub async fn import(&self, json: &str) -> Result<Settings, SettingsError> {
        let imported: Value = serde_json::from_str(json).map_err(|e| SettingsError::Parse(e.to_string()))?;
        if !imported.is_object() {
            return Err(SettingsError::Invalid("expected a JSON object".to_string()));
        }

        let mut merged =
            serde_json::to_value(Settings::default()).map_err(|e| SettingsError::Invalid(e.to_string()))?;
        merge_json(&mut merged, imported);
        let settings: Settings = serde_json::from_value(merged).map_err(|e| SettingsError::Invalid(e.to_string()))?;

        *self.state.write().await = SettingsState {
            settings: settings.clone(),
            dirty: true,
        };
        self.notify();
        Ok(settings)
    }

    pub async fn export(&self) -> Result<String, SettingsError> {
        let settings = self.get().await;
        serde_json::to_string_pretty(&settings).map_err(|e| SettingsError::Invalid(e.to_string()))
    }

    fn notify(&self) {
        if self.event_tx.send(UiEvent::SettingsChanged).is_err() {
            log::trace!("No UI clients are listening to settings events.");
        }
    }
}

fn merge_json(target: &mut Value, patch: Value) {
    match (target, patch) {
        (Value::Object(target), Value::Object(patch)) => {
            for (key, value) in patch {
                match target.get_mut(&key) {
                    Some(existing) => merge_json(existing, value),
                    None => {
                        target.insert(key, value);
                    }
                }
            }
        }
        (target, patch) => *target = patch,
    }
}
