use std::{path::Path, sync::Arc};

use tokio::sync::{RwLock, RwLockReadGuard, broadcast};
use uuid::Uuid;

use crate::{
    event::UiEvent,
    model::{
        ShowModel,
        cue::{Cue, CueType, CueUpdate},
        cue_list::{CueList, CueListError},
    },
};

/// Single writer of the show model. Every edit is broadcast as a `UiEvent`
/// once the write lock is released.
#[derive(Clone)]
pub struct ShowModelManager {
    state: Arc<RwLock<ShowModel>>,
    event_tx: broadcast::Sender<UiEvent>,
}

/// Read-only view of the show model.
#[derive(Clone)]
pub struct ShowModelHandle {
    state: Arc<RwLock<ShowModel>>,
}

impl ShowModelManager {
    pub fn new(event_tx: broadcast::Sender<UiEvent>) -> (Self, ShowModelHandle) {
        let state = Arc::new(RwLock::new(ShowModel::default()));
        (
            Self {
                state: state.clone(),
                event_tx,
            },
            ShowModelHandle { state },
        )
    }

    pub async fn read(&self) -> RwLockReadGuard<'_, ShowModel> {
        self.state.read().await
    }

    pub async fn write_with<F, R>(&self, updater: F) -> R
    where
        F: FnOnce(&mut ShowModel) -> R,
    {
        let mut guard = self.state.write().await;
        updater(&mut guard)
    }

    pub async fn add_cue(&self, cue_type: CueType, expected_revision: Option<u64>) -> Result<Cue, CueListError> {
        self.edit(|list| {
            let cue = list.add_cue(cue_type, expected_revision)?.clone();
            let at_index = list.len() - 1;
            Ok((cue.clone(), Some(UiEvent::CueAdded { cue, at_index })))
        })
        .await
    }

    pub async fn delete_cue(&self, index: usize, expected_revision: Option<u64>) -> Result<Cue, CueListError> {
        self.edit(|list| {
            let removed = list.delete_cue(index, expected_revision)?;
            let event = UiEvent::CueRemoved { cue_id: removed.id };
            Ok((removed, Some(event)))
        })
        .await
    }

    pub async fn duplicate_cue(&self, index: usize, expected_revision: Option<u64>) -> Result<Cue, CueListError> {
        self.edit(|list| {
            let cue = list.duplicate_cue(index, expected_revision)?.clone();
            Ok((
                cue.clone(),
                Some(UiEvent::CueAdded {
                    cue,
                    at_index: index + 1,
                }),
            ))
        })
        .await
    }

    pub async fn move_cue(&self, from: usize, to: usize, expected_revision: Option<u64>) -> Result<(), CueListError> {
        self.edit(|list| {
            list.move_cue(from, to, expected_revision)?;
            let cue_id = list.cues()[to].id;
            Ok(((), Some(UiEvent::CueMoved { cue_id, to_index: to })))
        })
        .await
    }

    pub async fn update_cue(&self, cue_id: &Uuid, update: CueUpdate) -> Result<Cue, CueListError> {
        self.edit(|list| {
            let cue = list.update_cue(cue_id, update)?.clone();
            Ok((cue.clone(), Some(UiEvent::CueUpdated { cue })))
        })
        .await
    }

    pub async fn set_active(&self, cue_id: &Uuid) -> Result<usize, CueListError> {
        self.edit(|list| Ok((list.set_active(cue_id)?, None))).await
    }

    /// Returns true when the cursor moved.
    pub async fn next_cue(&self) -> bool {
        self.edit(|list| Ok((list.next_cue(), None))).await.unwrap_or(false)
    }

    /// Returns true when the cursor moved.
    pub async fn previous_cue(&self) -> bool {
        self.edit(|list| Ok((list.previous_cue(), None))).await.unwrap_or(false)
    }

    pub async fn set_playing(&self, playing: bool) {
        let changed = self
            .write_with(|model| {
                let changed = model.cue_list.is_playing() != playing;
                model.cue_list.set_playing(playing);
                changed
            })
            .await;
        if changed {
            self.emit(UiEvent::PlayStateChanged { is_playing: playing });
        }
    }

    pub async fn load_from_file(&self, path: &Path) -> Result<(), anyhow::Error> {
        let content = tokio::fs::read_to_string(path).await?;

        let mut new_model: ShowModel = tokio::task::spawn_blocking(move || serde_json::from_str(&content)).await??;
        new_model.cue_list.clamp_cursor();
        new_model.cue_list.set_playing(false);

        self.write_with(|state| {
            *state = new_model;
        })
        .await;

        log::info!("Show loaded from: {}", path.display());
        self.emit(UiEvent::ShowModelLoaded);
        Ok(())
    }

    pub async fn save_to_file(&self, path: &Path) -> Result<(), anyhow::Error> {
        let model_clone = self.read().await.clone();

        let content = tokio::task::spawn_blocking(move || serde_json::to_string_pretty(&model_clone)).await??;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, content).await?;
        log::info!("Show saved to: {}", path.display());
        Ok(())
    }

    /// Applies `f` under the write lock, then emits its event plus a cursor
    /// event if the active cue changed.
    async fn edit<F, R>(&self, f: F) -> Result<R, CueListError>
    where
        F: FnOnce(&mut CueList) -> Result<(R, Option<UiEvent>), CueListError>,
    {
        let (result, events) = {
            let mut model = self.state.write().await;
            let list = &mut model.cue_list;
            let before = list.active_cue().map(|c| c.id);

            let (result, event) = f(&mut *list)?;

            let mut events: Vec<UiEvent> = event.into_iter().collect();
            if let (Some(index), Some(cue)) = (list.active_index(), list.active_cue()) {
                if before != Some(cue.id) {
                    events.push(UiEvent::PlaybackCursorMoved { cue_id: cue.id, index });
                }
            }
            (result, events)
        };

        for event in events {
            self.emit(event);
        }
        Ok(result)
    }

    fn emit(&self, event: UiEvent) {
        if self.event_tx.send(event).is_err() {
            log::trace!("No UI clients are listening to model events.");
        }
    }
}

impl ShowModelHandle {
    pub async fn read(&self) -> RwLockReadGuard<'_, ShowModel> {
        self.state.read().await
    }

    pub async fn get_cue_by_id(&self, cue_id: &Uuid) -> Option<Cue> {
        self.read().await.cue_list.get(cue_id).cloned()
    }

    pub async fn active_cue(&self) -> Option<(usize, Cue)> {
        let model = self.read().await;
        let index = model.cue_list.active_index()?;
        model.cue_list.active_cue().map(|cue| (index, cue.clone()))
    }

    pub async fn search(&self, query: &str) -> Vec<Cue> {
        self.read().await.cue_list.search(query).into_iter().cloned().collect()
    }
}
