use std::time::Duration;

use tokio::{
    sync::mpsc,
    time::{Instant, MissedTickBehavior},
};
use uuid::Uuid;

use crate::timer::Timer;

pub const TICK_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, PartialEq)]
pub enum ExecutorCommand {
    /// Replaces the running cue with a stopped timer for `cue_id`.
    Load { cue_id: Uuid, duration: f64 },
    Start,
    Pause,
    Reset,
    SetDuration(f64),
    AddTime(f64),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExecutorEvent {
    Started {
        cue_id: Uuid,
    },
    Progress {
        cue_id: Uuid,
        position: f64,
        duration: f64,
        progress: f64,
    },
    Paused {
        cue_id: Uuid,
        position: f64,
        duration: f64,
    },
    Completed {
        cue_id: Uuid,
    },
    Reset {
        cue_id: Uuid,
    },
}

/// Runs the timer of the loaded cue and reports on it.
pub struct Executor {
    command_rx: mpsc::Receiver<ExecutorCommand>,
    event_tx: mpsc::Sender<ExecutorEvent>,
    loaded: Option<(Uuid, Timer)>,
}

impl Executor {
    pub fn new(command_rx: mpsc::Receiver<ExecutorCommand>, event_tx: mpsc::Sender<ExecutorEvent>) -> Self {
        Self {
            command_rx,
            event_tx,
            loaded: None,
        }
    }

    pub async fn run(mut self) {
        log::info!("Executor run loop started.");
        let mut ticker = tokio::time::interval(TICK_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            let running = self.is_running();
            tokio::select! {
                Some(command) = self.command_rx.recv() => {
                    log::debug!("Executor received command: {:?}", command);
                    let starts = matches!(command, ExecutorCommand::Start);
                    if let Err(e) = self.process_command(command).await {
                        log::error!("Error processing executor command: {:?}", e);
                    }
                    if starts {
                        ticker.reset();
                    }
                },
                _ = ticker.tick(), if running => {
                    if let Err(e) = self.handle_tick().await {
                        log::error!("Error sampling cue timer: {:?}", e);
                    }
                },
                else => break,
            }
        }
        log::info!("Executor run loop finished.");
    }

    fn is_running(&self) -> bool {
        self.loaded.as_ref().is_some_and(|(_, timer)| timer.is_running())
    }

    async fn process_command(&mut self, command: ExecutorCommand) -> Result<(), anyhow::Error> {
        let now = Instant::now();

        if let ExecutorCommand::Load { cue_id, duration } = command {
            log::info!("Loading cue '{}' ({}s)", cue_id, duration);
            self.loaded = Some((cue_id, Timer::new(duration)));
            return self.send_progress(now).await;
        }

        let Some((cue_id, timer)) = self.loaded.as_mut() else {
            log::warn!("No cue loaded, ignoring {:?}", command);
            return Ok(());
        };
        let cue_id = *cue_id;

        let event = match command {
            ExecutorCommand::Load { .. } => None,
            ExecutorCommand::Start => {
                if timer.is_complete(now) {
                    timer.reset();
                }
                timer.start(now).then_some(ExecutorEvent::Started { cue_id })
            }
            ExecutorCommand::Pause => timer.pause(now).then(|| ExecutorEvent::Paused {
                cue_id,
                position: timer.current_time(now),
                duration: timer.duration(),
            }),
            ExecutorCommand::Reset => {
                timer.reset();
                Some(ExecutorEvent::Reset { cue_id })
            }
            ExecutorCommand::SetDuration(duration) => {
                if !timer.set_duration(duration, now) {
                    log::warn!("Ignoring invalid duration {} for cue '{}'", duration, cue_id);
                }
                None
            }
            ExecutorCommand::AddTime(seconds) => {
                timer.add_time(seconds, now);
                None
            }
        };

        if let Some(event) = event {
            self.event_tx.send(event).await?;
        }
        self.send_progress(now).await
    }

    async fn handle_tick(&mut self) -> Result<(), anyhow::Error> {
        let now = Instant::now();
        let completed = match self.loaded.as_mut() {
            Some((cue_id, timer)) => timer.tick(now).then_some(*cue_id),
            None => None,
        };

        self.send_progress(now).await?;
        if let Some(cue_id) = completed {
            log::info!("Cue '{}' completed.", cue_id);
            self.event_tx.send(ExecutorEvent::Completed { cue_id }).await?;
        }
        Ok(())
    }

    async fn send_progress(&self, now: Instant) -> Result<(), anyhow::Error> {
        if let Some((cue_id, timer)) = &self.loaded {
            self.event_tx
                .send(ExecutorEvent::Progress {
                    cue_id: *cue_id,
                    position: timer.current_time(now),
                    duration: timer.duration(),
                    progress: timer.progress(now),
                })
                .await?;
        }
        Ok(())
    }
}
