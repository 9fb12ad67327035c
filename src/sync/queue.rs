use std::{
    collections::{HashMap, HashSet},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::{
    sync::{Mutex, broadcast},
    task::JoinHandle,
};
use uuid::Uuid;

use crate::{
    event::UiEvent,
    storage::{LocalStore, keys},
    sync::client::{ApiClient, ApiRequest, Attempt},
};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct QueuedRequest {
    pub id: Uuid,
    #[serde(flatten)]
    pub request: ApiRequest,
    pub timestamp: DateTime<Utc>,
    pub retry_count: u32,
    #[serde(default)]
    pub next_attempt_at: Option<DateTime<Utc>>,
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub processed: usize,
    pub dropped: usize,
    pub remaining: usize,
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub is_syncing: bool,
    pub queue_length: usize,
    pub background_active: bool,
}

/// Offline-first queue of writes to the template backend.
///
/// The queue is written to the local store on every mutation. Each pass makes
/// at most one attempt per due request; failed requests back off and are
/// dropped once their retry budget is spent.
#[derive(Clone)]
pub struct SyncQueue {
    client: ApiClient,
    store: LocalStore,
    requests: Arc<Mutex<Vec<QueuedRequest>>>,
    syncing: Arc<AtomicBool>,
    background: Arc<std::sync::Mutex<Option<JoinHandle<()>>>>,
    event_tx: broadcast::Sender<UiEvent>,
}

struct SyncingGuard(Arc<AtomicBool>);

impl Drop for SyncingGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl SyncQueue {
    pub fn new(client: ApiClient, store: LocalStore, event_tx: broadcast::Sender<UiEvent>) -> Self {
        Self {
            client,
            store,
            requests: Arc::new(Mutex::new(Vec::new())),
            syncing: Arc::new(AtomicBool::new(false)),
            background: Arc::new(std::sync::Mutex::new(None)),
            event_tx,
        }
    }

    /// Restores requests queued by a previous run.
    pub async fn load(&self) {
        let restored: Vec<QueuedRequest> = self.store.get(keys::SYNC_QUEUE).await.unwrap_or_default();
        if !restored.is_empty() {
            log::info!("Restored {} queued sync requests", restored.len());
        }
        *self.requests.lock().await = restored;
    }

    pub async fn queue_request(&self, request: ApiRequest) -> Result<Uuid, anyhow::Error> {
        let queued = QueuedRequest {
            id: Uuid::new_v4(),
            request,
            timestamp: Utc::now(),
            retry_count: 0,
            next_attempt_at: None,
        };
        let id = queued.id;
        log::debug!("Queued {:?} {}", queued.request.method, queued.request.path);

        let mut requests = self.requests.lock().await;
        requests.push(queued);
        self.store.set(keys::SYNC_QUEUE, &*requests).await?;
        Ok(id)
    }

    pub async fn pending(&self) -> Vec<QueuedRequest> {
        self.requests.lock().await.clone()
    }

    pub async fn clear(&self) -> Result<(), anyhow::Error> {
        let mut requests = self.requests.lock().await;
        requests.clear();
        self.store.remove(keys::SYNC_QUEUE).await
    }

    pub async fn status(&self) -> SyncStatus {
        let background_active = self
            .background
            .lock()
            .map(|handle| handle.as_ref().is_some_and(|h| !h.is_finished()))
            .unwrap_or(false);
        SyncStatus {
            is_syncing: self.syncing.load(Ordering::SeqCst),
            queue_length: self.requests.lock().await.len(),
            background_active,
        }
    }

    /// Returns `None` when a pass is already running or there is nothing to send.
    pub async fn sync_queued_requests(&self) -> Result<Option<SyncReport>, anyhow::Error> {
        self.sync_queued_requests_at(Utc::now()).await
    }

    pub async fn sync_queued_requests_at(&self, now: DateTime<Utc>) -> Result<Option<SyncReport>, anyhow::Error> {
        if self.syncing.swap(true, Ordering::SeqCst) {
            log::debug!("Sync already in progress.");
            return Ok(None);
        }
        let _guard = SyncingGuard(self.syncing.clone());

        let pending = self.requests.lock().await.clone();
        if pending.is_empty() {
            return Ok(None);
        }

        let max_retries = self.client.retry_config().max_retries;
        let mut finished: HashSet<Uuid> = HashSet::new();
        let mut rescheduled: HashMap<Uuid, QueuedRequest> = HashMap::new();
        let mut processed = 0;
        let mut dropped = 0;

        for mut queued in pending {
            if queued.next_attempt_at.is_some_and(|at| at > now) {
                continue;
            }

            match self.client.send_once(&queued.request).await {
                Attempt::Success(_) => {
                    processed += 1;
                    finished.insert(queued.id);
                    self.emit(UiEvent::TemplateSynced {
                        request_id: queued.id,
                        path: queued.request.path.clone(),
                    });
                }
                Attempt::Rejected(e) => {
                    log::warn!(
                        "Dropping queued {:?} {}: {}",
                        queued.request.method,
                        queued.request.path,
                        e
                    );
                    dropped += 1;
                    finished.insert(queued.id);
                }
                Attempt::Retryable(message) => {
                    queued.retry_count += 1;
                    if queued.retry_count >= max_retries {
                        log::warn!(
                            "Dropping queued {:?} {} after {} failed attempts: {}",
                            queued.request.method,
                            queued.request.path,
                            queued.retry_count,
                            message
                        );
                        dropped += 1;
                        finished.insert(queued.id);
                    } else {
                        let delay = self.client.retry_config().delay(queued.retry_count);
                        let delay = chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::zero());
                        queued.next_attempt_at = Some(now + delay);
                        rescheduled.insert(queued.id, queued);
                    }
                }
            }
        }

        // Requests queued while this pass was running are kept as they are.
        let remaining = {
            let mut requests = self.requests.lock().await;
            requests.retain(|r| !finished.contains(&r.id));
            for request in requests.iter_mut() {
                if let Some(updated) = rescheduled.remove(&request.id) {
                    *request = updated;
                }
            }
            self.store.set(keys::SYNC_QUEUE, &*requests).await?;
            requests.len()
        };

        let report = SyncReport {
            processed,
            dropped,
            remaining,
        };
        self.emit(UiEvent::SyncCompleted {
            processed: report.processed,
            dropped: report.dropped,
            remaining: report.remaining,
        });
        Ok(Some(report))
    }

    pub fn start_background_sync(&self, interval: Duration) {
        if interval.is_zero() {
            log::error!("Background sync needs a non-zero interval; not started.");
            return;
        }
        let Ok(mut background) = self.background.lock() else {
            return;
        };
        if background.as_ref().is_some_and(|h| !h.is_finished()) {
            return;
        }

        let queue = self.clone();
        *background = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(e) = queue.sync_queued_requests().await {
                    log::error!("Background sync failed: {:?}", e);
                }
            }
        }));
        log::info!("Background sync started ({:?} interval).", interval);
    }

    pub fn stop_background_sync(&self) {
        if let Ok(mut background) = self.background.lock() {
            if let Some(handle) = background.take() {
                handle.abort();
                log::info!("Background sync stopped.");
            }
        }
    }

    fn emit(&self, event: UiEvent) {
        if self.event_tx.send(event).is_err() {
            log::trace!("No UI clients are listening to sync events.");
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration as ChronoDuration;
    use serde_json::json;

    use super::*;
    use crate::sync::client::testing::{ScriptedTransport, client_with};

    async fn queue_with(transport: Arc<ScriptedTransport>) -> (SyncQueue, LocalStore, broadcast::Receiver<UiEvent>) {
        let client = client_with(transport, Some("tok")).await;
        let store = LocalStore::in_memory();
        let (event_tx, event_rx) = broadcast::channel(32);
        (SyncQueue::new(client, store.clone(), event_tx), store, event_rx)
    }

    #[tokio::test]
    async fn queued_requests_are_persisted() {
        let (queue, store, _) = queue_with(ScriptedTransport::new()).await;
        queue
            .queue_request(ApiRequest::post("/custom-templates", json!({ "name": "Lyrics" })))
            .await
            .unwrap();

        let stored: Vec<QueuedRequest> = store.get(keys::SYNC_QUEUE).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].retry_count, 0);
        assert_eq!(stored[0].request.path, "/custom-templates");

        let restored = SyncQueue::new(queue.client.clone(), store, broadcast::channel(1).0);
        restored.load().await;
        assert_eq!(restored.pending().await, stored);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_queueing_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("local_storage.json");
        let client = client_with(ScriptedTransport::new(), Some("tok")).await;
        let store = LocalStore::open(&path).await.unwrap();
        let queue = SyncQueue::new(client.clone(), store, broadcast::channel(64).0);

        let pushes: Vec<_> = (0..30)
            .map(|i| {
                let queue = queue.clone();
                tokio::spawn(async move {
                    queue
                        .queue_request(ApiRequest::delete(format!("/custom-templates/{}", i)))
                        .await
                })
            })
            .collect();
        for push in pushes {
            push.await.unwrap().unwrap();
        }

        let restored = SyncQueue::new(client, LocalStore::open(&path).await.unwrap(), broadcast::channel(1).0);
        restored.load().await;
        assert_eq!(restored.pending().await.len(), 30);
    }

    #[tokio::test]
    async fn success_removes_after_one_attempt() {
        let transport = ScriptedTransport::new();
        transport.push(201, json!({ "id": "srv-1" }));
        let (queue, store, mut event_rx) = queue_with(transport.clone()).await;
        let id = queue
            .queue_request(ApiRequest::post("/custom-templates", json!({})))
            .await
            .unwrap();

        let report = queue.sync_queued_requests().await.unwrap().unwrap();
        assert_eq!(
            report,
            SyncReport {
                processed: 1,
                dropped: 0,
                remaining: 0
            }
        );
        assert_eq!(transport.request_count(), 1);
        assert!(queue.pending().await.is_empty());
        assert_eq!(store.get::<Vec<QueuedRequest>>(keys::SYNC_QUEUE).await, Some(vec![]));
        assert_eq!(
            event_rx.recv().await.unwrap(),
            UiEvent::TemplateSynced {
                request_id: id,
                path: "/custom-templates".to_string()
            }
        );
    }

    #[tokio::test]
    async fn three_server_errors_drop_the_request() {
        let transport = ScriptedTransport::new();
        transport.push(500, json!({})).push(500, json!({})).push(500, json!({}));
        let (queue, _, _) = queue_with(transport.clone()).await;
        queue
            .queue_request(ApiRequest::put("/custom-templates/1", json!({})))
            .await
            .unwrap();

        let start = Utc::now();
        let first = queue.sync_queued_requests_at(start).await.unwrap().unwrap();
        assert_eq!(first.remaining, 1);
        assert_eq!(queue.pending().await[0].retry_count, 1);

        let second = queue
            .sync_queued_requests_at(start + ChronoDuration::minutes(1))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(second.remaining, 1);
        assert_eq!(queue.pending().await[0].retry_count, 2);

        let third = queue
            .sync_queued_requests_at(start + ChronoDuration::minutes(2))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            third,
            SyncReport {
                processed: 0,
                dropped: 1,
                remaining: 0
            }
        );
        assert_eq!(transport.request_count(), 3);
    }

    #[tokio::test]
    async fn backoff_defers_the_next_attempt() {
        let transport = ScriptedTransport::new();
        transport.push(502, json!({})).push(200, json!({}));
        let (queue, _, _) = queue_with(transport.clone()).await;
        queue.queue_request(ApiRequest::delete("/custom-templates/9")).await.unwrap();

        let start = Utc::now();
        queue.sync_queued_requests_at(start).await.unwrap();
        let not_due = queue.sync_queued_requests_at(start).await.unwrap().unwrap();
        assert_eq!(not_due.processed, 0);
        assert_eq!(transport.request_count(), 1);

        let due = queue
            .sync_queued_requests_at(start + ChronoDuration::seconds(30))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(due.processed, 1);
        assert_eq!(transport.request_count(), 2);
    }

    #[tokio::test]
    async fn rejected_requests_are_dropped_immediately() {
        let transport = ScriptedTransport::new();
        transport.push(404, json!({ "error": "Template not found" })).push(200, json!({}));
        let (queue, _, _) = queue_with(transport.clone()).await;
        queue.queue_request(ApiRequest::delete("/custom-templates/gone")).await.unwrap();
        queue
            .queue_request(ApiRequest::post("/teams/t1/templates", json!({ "templateId": "x" })))
            .await
            .unwrap();

        let report = queue.sync_queued_requests().await.unwrap().unwrap();
        assert_eq!(
            report,
            SyncReport {
                processed: 1,
                dropped: 1,
                remaining: 0
            }
        );
    }

    #[tokio::test]
    async fn empty_queue_is_a_no_op() {
        let transport = ScriptedTransport::new();
        let (queue, _, _) = queue_with(transport.clone()).await;
        assert_eq!(queue.sync_queued_requests().await.unwrap(), None);
        assert_eq!(transport.request_count(), 0);

        let status = queue.status().await;
        assert!(!status.is_syncing);
        assert_eq!(status.queue_length, 0);
        assert!(!status.background_active);
    }

    #[tokio::test(start_paused = true)]
    async fn background_sync_drains_the_queue() {
        let transport = ScriptedTransport::new();
        transport.push(200, json!({}));
        let (queue, _, mut event_rx) = queue_with(transport.clone()).await;
        queue.queue_request(ApiRequest::post("/custom-templates", json!({}))).await.unwrap();

        queue.start_background_sync(Duration::from_secs(30));
        assert!(queue.status().await.background_active);

        loop {
            if let UiEvent::SyncCompleted { processed, .. } = event_rx.recv().await.unwrap() {
                assert_eq!(processed, 1);
                break;
            }
        }
        queue.stop_background_sync();
        assert!(queue.pending().await.is_empty());
    }

    #[tokio::test]
    async fn zero_interval_does_not_start_background_sync() {
        let (queue, _, _) = queue_with(ScriptedTransport::new()).await;
        queue.start_background_sync(Duration::ZERO);
        assert!(!queue.status().await.background_active);
    }
}
