use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc, watch};
use uuid::Uuid;

use crate::{
    event::UiEvent,
    executor::{ExecutorCommand, ExecutorEvent},
    manager::ShowModelManager,
    timer::TimerSnapshot,
};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all_fields = "camelCase")]
pub enum ControllerCommand {
    Go { cue_id: Uuid },
    Next,
    Previous,
    Play,
    Pause,
    TogglePlay,
    Stop,
    /// Rewinds the active cue, keeping playback running if it was.
    ResetTimer,
    /// Shifts the active cue's elapsed time; negative values rewind.
    AddTime { seconds: f64 },
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ShowState {
    pub active_cue_id: Option<Uuid>,
    pub active_index: Option<usize>,
    pub is_playing: bool,
    pub timer: TimerSnapshot,
}

pub struct CueController {
    model_manager: ShowModelManager,
    executor_tx: mpsc::Sender<ExecutorCommand>,
    command_rx: mpsc::Receiver<ControllerCommand>,
    executor_event_rx: mpsc::Receiver<ExecutorEvent>,
    model_event_rx: broadcast::Receiver<UiEvent>,
    event_tx: broadcast::Sender<UiEvent>,
    state_tx: watch::Sender<ShowState>,
    state: ShowState,
}

impl CueController {
    pub fn new(
        model_manager: ShowModelManager,
        executor_tx: mpsc::Sender<ExecutorCommand>,
        command_rx: mpsc::Receiver<ControllerCommand>,
        executor_event_rx: mpsc::Receiver<ExecutorEvent>,
        event_tx: broadcast::Sender<UiEvent>,
        state_tx: watch::Sender<ShowState>,
    ) -> Self {
        Self {
            model_manager,
            executor_tx,
            command_rx,
            executor_event_rx,
            model_event_rx: event_tx.subscribe(),
            event_tx,
            state_tx,
            state: ShowState::default(),
        }
    }

    pub async fn run(mut self) {
        log::info!("CueController run loop started.");
        if let Err(e) = self.sync_cursor().await {
            log::error!("Error loading initial cue: {:?}", e);
        }
        self.publish();

        loop {
            tokio::select! {
                Some(command) = self.command_rx.recv() => {
                    log::debug!("CueController received command: {:?}", command);
                    if let Err(e) = self.handle_command(command).await {
                        log::error!("Error handling controller command: {:?}", e);
                    }
                    self.publish();
                },
                Some(event) = self.executor_event_rx.recv() => {
                    if let Err(e) = self.handle_executor_event(event).await {
                        log::error!("Error handling executor event: {:?}", e);
                    }
                    self.publish();
                },
                received = self.model_event_rx.recv() => {
                    let result = match received {
                        Ok(event) => self.handle_model_event(event).await,
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            log::warn!("CueController missed {} model events, resyncing.", skipped);
                            self.resync().await
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    };
                    if let Err(e) = result {
                        log::error!("Error handling model event: {:?}", e);
                    }
                    self.publish();
                },
                else => break,
            }
        }
        log::info!("CueController run loop finished.");
    }

    async fn handle_command(&mut self, command: ControllerCommand) -> Result<(), anyhow::Error> {
        match command {
            ControllerCommand::Go { cue_id } => self.handle_go(cue_id).await,
            ControllerCommand::Next => {
                if !self.model_manager.next_cue().await {
                    log::warn!("NEXT: Reached end of cue list.");
                }
                self.sync_cursor().await
            }
            ControllerCommand::Previous => {
                if !self.model_manager.previous_cue().await {
                    log::warn!("PREVIOUS: Already at the first cue.");
                }
                self.sync_cursor().await
            }
            ControllerCommand::Play => self.handle_play().await,
            ControllerCommand::Pause => self.handle_pause().await,
            ControllerCommand::TogglePlay => {
                if self.state.is_playing {
                    self.handle_pause().await
                } else {
                    self.handle_play().await
                }
            }
            ControllerCommand::Stop => {
                self.model_manager.set_playing(false).await;
                self.state.is_playing = false;
                self.executor_tx.send(ExecutorCommand::Reset).await?;
                Ok(())
            }
            ControllerCommand::ResetTimer => {
                self.executor_tx.send(ExecutorCommand::Reset).await?;
                if self.state.is_playing {
                    self.executor_tx.send(ExecutorCommand::Start).await?;
                }
                Ok(())
            }
            ControllerCommand::AddTime { seconds } => {
                self.executor_tx.send(ExecutorCommand::AddTime(seconds)).await?;
                Ok(())
            }
        }
    }

    async fn handle_go(&mut self, cue_id: Uuid) -> Result<(), anyhow::Error> {
        match self.model_manager.set_active(&cue_id).await {
            Ok(_) => {
                // Going to the loaded cue restarts it.
                if self.state.active_cue_id == Some(cue_id) {
                    self.executor_tx.send(ExecutorCommand::Reset).await?;
                    if self.state.is_playing {
                        self.executor_tx.send(ExecutorCommand::Start).await?;
                    }
                }
                self.sync_cursor().await
            }
            Err(e) => {
                log::warn!("GO: {}", e);
                Ok(())
            }
        }
    }

    async fn handle_play(&mut self) -> Result<(), anyhow::Error> {
        if self.state.active_cue_id.is_none() {
            self.model_manager.next_cue().await;
            self.sync_cursor().await?;
        }
        if self.state.active_cue_id.is_none() {
            log::warn!("PLAY: Cue list is empty.");
            return Ok(());
        }

        self.model_manager.set_playing(true).await;
        self.state.is_playing = true;
        self.executor_tx.send(ExecutorCommand::Start).await?;
        Ok(())
    }

    async fn handle_pause(&mut self) -> Result<(), anyhow::Error> {
        self.model_manager.set_playing(false).await;
        self.state.is_playing = false;
        self.executor_tx.send(ExecutorCommand::Pause).await?;
        Ok(())
    }

    /// Loads the model's active cue into the executor if it is not the one
    /// already loaded.
    async fn sync_cursor(&mut self) -> Result<(), anyhow::Error> {
        let (active, is_playing) = {
            let model = self.model_manager.read().await;
            let active = model
                .cue_list
                .active_index()
                .zip(model.cue_list.active_cue().cloned());
            (active, model.cue_list.is_playing())
        };

        self.state.is_playing = is_playing;
        let Some((index, cue)) = active else {
            if self.state.active_cue_id.take().is_some() {
                self.executor_tx.send(ExecutorCommand::Reset).await?;
            }
            self.state.active_index = None;
            self.state.timer = TimerSnapshot::default();
            return Ok(());
        };

        self.state.active_index = Some(index);
        if self.state.active_cue_id == Some(cue.id) {
            return Ok(());
        }

        log::info!("Cursor at cue {} '{}'", index, cue.title);
        self.state.active_cue_id = Some(cue.id);
        self.executor_tx
            .send(ExecutorCommand::Load {
                cue_id: cue.id,
                duration: cue.timing.duration,
            })
            .await?;
        if is_playing {
            self.executor_tx.send(ExecutorCommand::Start).await?;
        }
        Ok(())
    }

    /// Rebuilds executor state from the model after missed model events.
    async fn resync(&mut self) -> Result<(), anyhow::Error> {
        let loaded = self.state.active_cue_id;
        self.sync_cursor().await?;
        let Some(cue_id) = loaded.filter(|id| self.is_loaded(id)) else {
            return Ok(());
        };
        let duration = self
            .model_manager
            .read()
            .await
            .cue_list
            .get(&cue_id)
            .map(|cue| cue.timing.duration);
        if let Some(duration) = duration {
            self.executor_tx.send(ExecutorCommand::SetDuration(duration)).await?;
        }
        Ok(())
    }

    async fn handle_executor_event(&mut self, event: ExecutorEvent) -> Result<(), anyhow::Error> {
        if let Some(ui_event) = UiEvent::from_executor(&event) {
            self.emit(ui_event);
        }

        match event {
            ExecutorEvent::Started { cue_id } => {
                if self.is_loaded(&cue_id) {
                    self.state.timer.is_running = true;
                }
            }
            ExecutorEvent::Progress {
                cue_id,
                position,
                duration,
                progress,
            } => {
                if self.is_loaded(&cue_id) {
                    self.state.timer.current_time = position;
                    self.state.timer.duration = duration;
                    self.state.timer.progress = progress;
                }
            }
            ExecutorEvent::Paused {
                cue_id,
                position,
                duration,
            } => {
                if self.is_loaded(&cue_id) {
                    self.state.timer.current_time = position;
                    self.state.timer.duration = duration;
                    self.state.timer.is_running = false;
                }
            }
            ExecutorEvent::Reset { cue_id } => {
                if self.is_loaded(&cue_id) {
                    self.state.timer.current_time = 0.0;
                    self.state.timer.progress = 0.0;
                    self.state.timer.is_running = false;
                }
            }
            ExecutorEvent::Completed { cue_id } => {
                if !self.is_loaded(&cue_id) {
                    return Ok(());
                }
                self.state.timer.is_running = false;
                self.handle_completed(cue_id).await?;
            }
        }
        Ok(())
    }

    async fn handle_completed(&mut self, cue_id: Uuid) -> Result<(), anyhow::Error> {
        let auto_continue = self
            .model_manager
            .read()
            .await
            .cue_list
            .get(&cue_id)
            .is_some_and(|cue| cue.timing.auto_continue);

        if auto_continue && self.state.is_playing && self.model_manager.next_cue().await {
            log::info!("Auto-continue from cue '{}'", cue_id);
            return self.sync_cursor().await;
        }

        self.model_manager.set_playing(false).await;
        self.state.is_playing = false;
        Ok(())
    }

    async fn handle_model_event(&mut self, event: UiEvent) -> Result<(), anyhow::Error> {
        match event {
            UiEvent::PlaybackCursorMoved { .. } | UiEvent::CueRemoved { .. } | UiEvent::ShowModelLoaded => {
                self.sync_cursor().await
            }
            UiEvent::CueMoved { .. } => {
                let model = self.model_manager.read().await;
                self.state.active_index = model.cue_list.active_index();
                Ok(())
            }
            UiEvent::CueUpdated { cue } if self.is_loaded(&cue.id) => {
                self.executor_tx
                    .send(ExecutorCommand::SetDuration(cue.timing.duration))
                    .await?;
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn is_loaded(&self, cue_id: &Uuid) -> bool {
        self.state.active_cue_id.as_ref() == Some(cue_id)
    }

    fn publish(&self) {
        if self.state_tx.send(self.state.clone()).is_err() {
            log::trace!("No UI clients are listening to state updates.");
        }
    }

    fn emit(&self, event: UiEvent) {
        if self.event_tx.send(event).is_err() {
            log::trace!("No UI clients are listening to cue events.");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::{
        manager::ShowModelHandle,
        model::cue::{CueType, CueUpdate},
    };

    use tokio::sync::{
        broadcast,
        mpsc::{self, Receiver, Sender},
        watch,
    };

    struct Harness {
        manager: ShowModelManager,
        handle: ShowModelHandle,
        ctrl_tx: Sender<ControllerCommand>,
        exec_rx: Receiver<ExecutorCommand>,
        exec_event_tx: Sender<ExecutorEvent>,
        state_rx: watch::Receiver<ShowState>,
    }

    async fn setup_controller(cue_count: usize) -> Harness {
        setup_controller_with_capacity(cue_count, 64).await
    }

    async fn setup_controller_with_capacity(cue_count: usize, event_capacity: usize) -> Harness {
        let (ctrl_tx, ctrl_rx) = mpsc::channel::<ControllerCommand>(32);
        let (exec_tx, exec_rx) = mpsc::channel::<ExecutorCommand>(32);
        let (exec_event_tx, exec_event_rx) = mpsc::channel::<ExecutorEvent>(32);
        let (event_tx, _) = broadcast::channel::<UiEvent>(event_capacity);
        let (state_tx, state_rx) = watch::channel::<ShowState>(ShowState::default());

        let (manager, handle) = ShowModelManager::new(event_tx.clone());
        manager.write_with(|model| model.name = "TestShowModel".to_string()).await;
        for _ in 0..cue_count {
            manager.add_cue(CueType::Text, None).await.unwrap();
        }
        let first_id = handle.read().await.cue_list.cues().first().map(|cue| cue.id);
        if let Some(first_id) = first_id {
            manager.set_active(&first_id).await.unwrap();
        }

        let controller = CueController::new(manager.clone(), exec_tx, ctrl_rx, exec_event_rx, event_tx, state_tx);
        tokio::spawn(controller.run());

        Harness {
            manager,
            handle,
            ctrl_tx,
            exec_rx,
            exec_event_tx,
            state_rx,
        }
    }

    async fn cue_id_at(handle: &ShowModelHandle, index: usize) -> Uuid {
        handle.read().await.cue_list.cues()[index].id
    }

    #[tokio::test]
    async fn initial_cue_is_loaded() {
        let mut h = setup_controller(2).await;
        let first = cue_id_at(&h.handle, 0).await;

        if let Some(ExecutorCommand::Load { cue_id, duration }) = h.exec_rx.recv().await {
            assert_eq!(cue_id, first);
            assert_eq!(duration, 30.0);
        } else {
            unreachable!();
        }
    }

    #[tokio::test]
    async fn missed_removal_is_recovered_by_resync() {
        let mut h = setup_controller_with_capacity(3, 4).await;
        let first = cue_id_at(&h.handle, 0).await;
        let second = cue_id_at(&h.handle, 1).await;
        let third = cue_id_at(&h.handle, 2).await;
        assert!(matches!(h.exec_rx.recv().await, Some(ExecutorCommand::Load { cue_id, .. }) if cue_id == first));

        // The removal is pushed out of the event buffer before the controller runs.
        h.manager.delete_cue(0, None).await.unwrap();
        for i in 0..8 {
            let update = CueUpdate {
                title: Some(format!("Verse {}", i)),
                ..Default::default()
            };
            h.manager.update_cue(&third, update).await.unwrap();
        }

        if let Some(ExecutorCommand::Load { cue_id, .. }) = h.exec_rx.recv().await {
            assert_eq!(cue_id, second);
        } else {
            unreachable!();
        }
        h.state_rx
            .wait_for(|state| state.active_cue_id == Some(second) && state.active_index == Some(0))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn go_command() {
        let mut h = setup_controller(3).await;
        let target = cue_id_at(&h.handle, 2).await;
        h.exec_rx.recv().await.unwrap();

        h.ctrl_tx.send(ControllerCommand::Go { cue_id: target }).await.unwrap();

        if let Some(ExecutorCommand::Load { cue_id, .. }) = h.exec_rx.recv().await {
            assert_eq!(cue_id, target);
        } else {
            unreachable!();
        }
        h.state_rx
            .wait_for(|state| state.active_cue_id == Some(target))
            .await
            .unwrap();
        assert_eq!(h.state_rx.borrow().active_index, Some(2));
    }

    #[tokio::test]
    async fn unknown_cue_is_ignored() {
        let mut h = setup_controller(1).await;
        h.exec_rx.recv().await.unwrap();

        h.ctrl_tx
            .send(ControllerCommand::Go { cue_id: Uuid::new_v4() })
            .await
            .unwrap();
        h.ctrl_tx.send(ControllerCommand::Pause).await.unwrap();

        assert_eq!(h.exec_rx.recv().await, Some(ExecutorCommand::Pause));
    }

    #[tokio::test]
    async fn play_pause_toggle() {
        let mut h = setup_controller(1).await;
        h.exec_rx.recv().await.unwrap();

        h.ctrl_tx.send(ControllerCommand::TogglePlay).await.unwrap();
        assert_eq!(h.exec_rx.recv().await, Some(ExecutorCommand::Start));
        h.state_rx.wait_for(|state| state.is_playing).await.unwrap();
        assert!(h.handle.read().await.cue_list.is_playing());

        h.ctrl_tx.send(ControllerCommand::TogglePlay).await.unwrap();
        assert_eq!(h.exec_rx.recv().await, Some(ExecutorCommand::Pause));
        h.state_rx.wait_for(|state| !state.is_playing).await.unwrap();
    }

    #[tokio::test]
    async fn next_while_playing_starts_next_cue() {
        let mut h = setup_controller(2).await;
        let second = cue_id_at(&h.handle, 1).await;
        h.exec_rx.recv().await.unwrap();

        h.ctrl_tx.send(ControllerCommand::Play).await.unwrap();
        assert_eq!(h.exec_rx.recv().await, Some(ExecutorCommand::Start));

        h.ctrl_tx.send(ControllerCommand::Next).await.unwrap();
        if let Some(ExecutorCommand::Load { cue_id, .. }) = h.exec_rx.recv().await {
            assert_eq!(cue_id, second);
        } else {
            unreachable!();
        }
        assert_eq!(h.exec_rx.recv().await, Some(ExecutorCommand::Start));

        // Already at the end.
        h.ctrl_tx.send(ControllerCommand::Next).await.unwrap();
        h.ctrl_tx.send(ControllerCommand::Stop).await.unwrap();
        assert_eq!(h.exec_rx.recv().await, Some(ExecutorCommand::Reset));
    }

    #[tokio::test]
    async fn progress_event() {
        let mut h = setup_controller(1).await;
        let cue_id = cue_id_at(&h.handle, 0).await;
        h.exec_rx.recv().await.unwrap();

        h.exec_event_tx
            .send(ExecutorEvent::Progress {
                cue_id,
                position: 12.0,
                duration: 30.0,
                progress: 40.0,
            })
            .await
            .unwrap();

        let state = h
            .state_rx
            .wait_for(|state| state.timer.current_time == 12.0)
            .await
            .unwrap()
            .clone();
        assert_eq!(state.timer.duration, 30.0);
        assert_eq!(state.timer.progress, 40.0);
    }

    #[tokio::test]
    async fn completed_with_auto_continue_advances() {
        let mut h = setup_controller(2).await;
        let first = cue_id_at(&h.handle, 0).await;
        let second = cue_id_at(&h.handle, 1).await;
        let mut timing = h.handle.read().await.cue_list.cues()[0].timing.clone();
        timing.auto_continue = true;
        h.manager
            .update_cue(
                &first,
                CueUpdate {
                    timing: Some(timing),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        h.ctrl_tx.send(ControllerCommand::Play).await.unwrap();
        loop {
            if h.exec_rx.recv().await == Some(ExecutorCommand::Start) {
                break;
            }
        }

        h.exec_event_tx.send(ExecutorEvent::Completed { cue_id: first }).await.unwrap();

        // The duration edit may be forwarded after playback started.
        let loaded = loop {
            match h.exec_rx.recv().await {
                Some(ExecutorCommand::SetDuration(_)) => continue,
                Some(ExecutorCommand::Load { cue_id, .. }) => break cue_id,
                other => panic!("Unexpected executor command: {:?}", other),
            }
        };
        assert_eq!(loaded, second);
        assert_eq!(h.exec_rx.recv().await, Some(ExecutorCommand::Start));
    }

    #[tokio::test]
    async fn completed_without_auto_continue_stops() {
        let mut h = setup_controller(2).await;
        let first = cue_id_at(&h.handle, 0).await;
        h.exec_rx.recv().await.unwrap();

        h.ctrl_tx.send(ControllerCommand::Play).await.unwrap();
        assert_eq!(h.exec_rx.recv().await, Some(ExecutorCommand::Start));
        h.state_rx.wait_for(|state| state.is_playing).await.unwrap();

        h.exec_event_tx.send(ExecutorEvent::Completed { cue_id: first }).await.unwrap();

        h.state_rx.wait_for(|state| !state.is_playing).await.unwrap();
        assert_eq!(h.handle.read().await.cue_list.active_index(), Some(0));
        assert!(!h.handle.read().await.cue_list.is_playing());
    }

    #[tokio::test]
    async fn deleting_active_cue_loads_neighbour() {
        let mut h = setup_controller(2).await;
        let second = cue_id_at(&h.handle, 1).await;
        h.exec_rx.recv().await.unwrap();

        h.manager.delete_cue(0, None).await.unwrap();

        if let Some(ExecutorCommand::Load { cue_id, .. }) = h.exec_rx.recv().await {
            assert_eq!(cue_id, second);
        } else {
            unreachable!();
        }
    }

    #[test]
    fn command_json_shape() {
        let cue_id = Uuid::nil();
        let command: ControllerCommand =
            serde_json::from_str(&format!(r#"{{"type":"Go","cueId":"{}"}}"#, cue_id)).unwrap();
        assert_eq!(command, ControllerCommand::Go { cue_id });

        let command: ControllerCommand = serde_json::from_str(r#"{"type":"TogglePlay"}"#).unwrap();
        assert_eq!(command, ControllerCommand::TogglePlay);

        let command: ControllerCommand = serde_json::from_str(r#"{"type":"AddTime","seconds":-5}"#).unwrap();
        assert_eq!(command, ControllerCommand::AddTime { seconds: -5.0 });
    }
}
