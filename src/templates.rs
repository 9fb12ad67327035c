use std::collections::BTreeMap;

use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use uuid::Uuid;

use crate::{
    model::template::{Template, TemplateFilters},
    storage::{LocalStore, keys},
    sync::{
        client::{ApiClient, ApiRequest, SyncError},
        conflict::{Strategy, detect_conflict, resolve_conflict},
        queue::SyncQueue,
    },
};

#[derive(Serialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PullReport {
    pub added: usize,
    pub unchanged: usize,
    pub conflicts: usize,
    pub local_only: usize,
}

/// Saved, team and marketplace templates. Writes go through the sync queue
/// so they survive being offline; reads hit the backend directly.
#[derive(Clone)]
pub struct TemplateLibrary {
    client: ApiClient,
    store: LocalStore,
    queue: SyncQueue,
}

impl TemplateLibrary {
    pub fn new(client: ApiClient, store: LocalStore, queue: SyncQueue) -> Self {
        Self { client, store, queue }
    }

    pub async fn saved(&self) -> Vec<Template> {
        self.store.get(keys::SAVED_TEMPLATES).await.unwrap_or_default()
    }

    /// Upserts the template locally and queues it for the backend.
    pub async fn save_template(&self, mut template: Template) -> Result<Template, anyhow::Error> {
        template.updated_at = Utc::now();
        template.synced = false;

        self.store
            .update(keys::SAVED_TEMPLATES, |saved: &mut Vec<Template>| {
                match saved.iter_mut().find(|t| t.id == template.id) {
                    Some(existing) => *existing = template.clone(),
                    None => saved.push(template.clone()),
                }
            })
            .await?;

        self.queue
            .queue_request(ApiRequest::post("/custom-templates", serde_json::to_value(&template)?))
            .await?;
        Ok(template)
    }

    /// Returns false when no saved template has this id.
    pub async fn delete_saved(&self, id: Uuid) -> Result<bool, anyhow::Error> {
        let removed = self
            .store
            .update(keys::SAVED_TEMPLATES, |saved: &mut Vec<Template>| {
                let before = saved.len();
                saved.retain(|t| t.id != id);
                saved.len() != before
            })
            .await?;
        if !removed {
            return Ok(false);
        }

        self.queue
            .queue_request(ApiRequest::delete(format!("/custom-templates/{}", id)))
            .await?;
        Ok(true)
    }

    pub async fn marketplace(&self, filters: &TemplateFilters) -> Result<Vec<Template>, SyncError> {
        self.client
            .get_json(&format!("/templates{}", query_string(filters)))
            .await
    }

    pub async fn marketplace_template(&self, id: Uuid) -> Result<Template, SyncError> {
        self.client.get_json(&format!("/templates/{}", id)).await
    }

    /// Falls back to the last cached list when the backend is unreachable.
    pub async fn team_templates(&self, team_id: &str) -> Result<Vec<Template>, SyncError> {
        match self
            .client
            .get_json::<Vec<Template>>(&format!("/teams/{}/templates", team_id))
            .await
        {
            Ok(templates) => {
                let cached = self
                    .store
                    .update(keys::TEAM_TEMPLATES, |cache: &mut BTreeMap<String, Vec<Template>>| {
                        cache.insert(team_id.to_string(), templates.clone());
                    })
                    .await;
                if let Err(e) = cached {
                    log::warn!("Failed to cache team templates: {:?}", e);
                }
                Ok(templates)
            }
            Err(e @ SyncError::Exhausted { .. }) => match self
                .store
                .get::<BTreeMap<String, Vec<Template>>>(keys::TEAM_TEMPLATES)
                .await
                .and_then(|mut cache| cache.remove(team_id))
            {
                Some(cached) => {
                    log::warn!("Serving cached templates for team '{}': {}", team_id, e);
                    Ok(cached)
                }
                None => Err(e),
            },
            Err(e) => Err(e),
        }
    }

    pub async fn share_with_team(&self, team_id: &str, template_id: Uuid) -> Result<Uuid, anyhow::Error> {
        self.queue
            .queue_request(ApiRequest::post(
                format!("/teams/{}/templates", team_id),
                json!({ "templateId": template_id }),
            ))
            .await
    }

    /// Reconciles local saved templates with the backend copy.
    ///
    /// Templates that resolve to a local version are queued for upload.
    pub async fn pull_saved(&self, strategy: Strategy) -> Result<PullReport, anyhow::Error> {
        let backend: Vec<Template> = self.client.get_json("/custom-templates").await?;
        let (report, uploads) = self
            .store
            .update(keys::SAVED_TEMPLATES, |saved: &mut Vec<Template>| {
                reconcile(saved, backend, strategy)
            })
            .await?;

        for template in uploads {
            self.queue
                .queue_request(ApiRequest::post("/custom-templates", serde_json::to_value(&template)?))
                .await?;
        }

        log::info!(
            "Pulled saved templates: {} added, {} unchanged, {} conflicts, {} local only",
            report.added,
            report.unchanged,
            report.conflicts,
            report.local_only
        );
        Ok(report)
    }
}

/// Replaces `local` with the merged list. Returns the templates that
/// resolved to a version the backend does not have yet.
fn reconcile(local: &mut Vec<Template>, backend: Vec<Template>, strategy: Strategy) -> (PullReport, Vec<Template>) {
    let mut report = PullReport::default();
    let mut merged: Vec<Template> = Vec::with_capacity(backend.len());
    let mut uploads: Vec<Template> = Vec::new();

    for mut remote in backend {
        remote.synced = true;
        let Some(mine) = local.iter().find(|t| t.id == remote.id) else {
            report.added += 1;
            merged.push(remote);
            continue;
        };

        match detect_conflict(mine, &remote) {
            None => {
                report.unchanged += 1;
                merged.push(remote);
            }
            Some(conflict) => {
                report.conflicts += 1;
                let mut resolved = resolve_conflict(conflict, strategy);
                resolved.synced = resolved == remote;
                if !resolved.synced {
                    uploads.push(resolved.clone());
                }
                merged.push(resolved);
            }
        }
    }

    for mine in local.drain(..) {
        if !merged.iter().any(|t| t.id == mine.id) {
            report.local_only += 1;
            merged.push(mine);
        }
    }

    *local = merged;
    (report, uploads)
}

fn query_string(filters: &TemplateFilters) -> String {
    let pairs: Vec<(&str, &str)> = [("category", &filters.category), ("search", &filters.search)]
        .into_iter()
        .filter_map(|(key, value)| value.as_deref().map(|v| (key, v)))
        .collect();
    if pairs.is_empty() {
        return String::new();
    }

    reqwest::Url::parse_with_params("http://localhost/", &pairs)
        .ok()
        .and_then(|url| url.query().map(|q| format!("?{}", q)))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Duration;
    use tokio::sync::broadcast;

    use super::*;
    use crate::sync::client::{
        Method,
        testing::{ScriptedTransport, client_with},
    };

    async fn library(transport: Arc<ScriptedTransport>) -> (TemplateLibrary, SyncQueue) {
        let client = client_with(transport, Some("tok")).await;
        let store = LocalStore::in_memory();
        let queue = SyncQueue::new(client.clone(), store.clone(), broadcast::channel(16).0);
        (TemplateLibrary::new(client, store, queue.clone()), queue)
    }

    #[tokio::test]
    async fn save_upserts_and_queues() {
        let (library, queue) = library(ScriptedTransport::new()).await;
        let mut template = Template::new("Lyrics", "worship");
        template.synced = true;

        let saved = library.save_template(template.clone()).await.unwrap();
        assert!(!saved.synced);
        template.name = "Lyrics (large)".to_string();
        library.save_template(template.clone()).await.unwrap();

        let stored = library.saved().await;
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].name, "Lyrics (large)");

        let pending = queue.pending().await;
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].request.method, Method::Post);
        assert_eq!(pending[0].request.path, "/custom-templates");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_saves_keep_every_template() {
        let (library, queue) = library(ScriptedTransport::new()).await;

        let saves: Vec<_> = (0..50)
            .map(|i| {
                let library = library.clone();
                tokio::spawn(async move { library.save_template(Template::new(format!("Slide {}", i), "general")).await })
            })
            .collect();
        for save in saves {
            save.await.unwrap().unwrap();
        }

        assert_eq!(library.saved().await.len(), 50);
        assert_eq!(queue.pending().await.len(), 50);
    }

    #[tokio::test]
    async fn delete_unknown_is_not_queued() {
        let (library, queue) = library(ScriptedTransport::new()).await;
        assert!(!library.delete_saved(Uuid::new_v4()).await.unwrap());
        assert!(queue.pending().await.is_empty());

        let template = library.save_template(Template::new("Announcements", "general")).await.unwrap();
        assert!(library.delete_saved(template.id).await.unwrap());
        assert!(library.saved().await.is_empty());
        assert_eq!(
            queue.pending().await[1].request.path,
            format!("/custom-templates/{}", template.id)
        );
    }

    #[tokio::test]
    async fn marketplace_encodes_filters() {
        let transport = ScriptedTransport::new();
        transport.push(200, json!([]));
        let (library, _) = library(transport.clone()).await;

        let filters = TemplateFilters {
            category: Some("worship".to_string()),
            search: Some("easter sunday".to_string()),
        };
        assert!(library.marketplace(&filters).await.unwrap().is_empty());
        assert_eq!(
            transport.requests()[0].url,
            "http://backend.test/api/templates?category=worship&search=easter+sunday"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn team_templates_fall_back_to_cache() {
        let transport = ScriptedTransport::new();
        let template = Template::new("Team Layout", "team");
        transport.push(200, json!([template]));
        let (library, _) = library(transport.clone()).await;

        assert_eq!(library.team_templates("t1").await.unwrap(), vec![template.clone()]);

        transport.push_network_error().push_network_error().push_network_error();
        assert_eq!(library.team_templates("t1").await.unwrap(), vec![template]);

        transport.push_network_error().push_network_error().push_network_error();
        assert!(library.team_templates("t2").await.is_err());
    }

    #[tokio::test]
    async fn pull_resolves_conflicts() {
        let transport = ScriptedTransport::new();
        let now = Utc::now();

        let mut same_local = Template::new("Same", "a");
        same_local.updated_at = now;
        let same_remote = same_local.clone();

        let mut edited_local = Template::new("Edited locally", "a");
        edited_local.updated_at = now + Duration::seconds(30);
        let mut edited_remote = edited_local.clone();
        edited_remote.name = "Old name".to_string();
        edited_remote.updated_at = now;

        let remote_only = Template::new("From another machine", "b");

        transport.push(200, json!([same_remote, edited_remote, remote_only]));
        let (library, queue) = library(transport).await;

        let local_only = Template::new("Draft", "c");
        library
            .store
            .set(keys::SAVED_TEMPLATES, &vec![same_local, edited_local.clone(), local_only])
            .await
            .unwrap();

        let report = library.pull_saved(Strategy::Newer).await.unwrap();
        assert_eq!(
            report,
            PullReport {
                added: 1,
                unchanged: 1,
                conflicts: 1,
                local_only: 1
            }
        );

        let saved = library.saved().await;
        assert_eq!(saved.len(), 4);
        let edited = saved.iter().find(|t| t.id == edited_local.id).unwrap();
        assert_eq!(edited.name, "Edited locally");
        assert!(!edited.synced);
        assert!(saved.iter().find(|t| t.id == remote_only.id).unwrap().synced);

        let pending = queue.pending().await;
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].request.body.as_ref().unwrap()["name"], "Edited locally");
    }
}
