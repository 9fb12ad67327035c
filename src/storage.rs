use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use serde::{Serialize, de::DeserializeOwned};
use serde_json::{Map, Value};
use tokio::sync::{Mutex, RwLock};

pub mod keys {
    pub const TOKEN: &str = "token";
    pub const REFRESH_TOKEN: &str = "refreshToken";
    pub const USER: &str = "user";
    pub const THEME: &str = "theme";
    pub const SETTINGS: &str = "propresenter_settings";
    pub const SAVED_TEMPLATES: &str = "savedTemplates";
    pub const TEAM_TEMPLATES: &str = "teamTemplates";
    pub const SYNC_QUEUE: &str = "templateSyncQueue";
    pub const BRAND_THEME: &str = "brandTheme";
    pub const OUTPUT_THEME: &str = "outputTheme";
    /// Token key read by older template tooling; mirrors `TOKEN`.
    pub const AUTH_TOKEN: &str = "authToken";
    pub const USER_ID: &str = "userId";
}

/// String-keyed JSON store, written back to disk after every mutation.
#[derive(Clone)]
pub struct LocalStore {
    entries: Arc<RwLock<Map<String, Value>>>,
    // Held from mutation through the file write, so writes land in mutation order.
    write_lock: Arc<Mutex<()>>,
    path: Option<PathBuf>,
}

impl LocalStore {
    pub fn in_memory() -> Self {
        Self {
            entries: Arc::new(RwLock::new(Map::new())),
            write_lock: Arc::new(Mutex::new(())),
            path: None,
        }
    }

    pub async fn open(path: &Path) -> Result<Self, anyhow::Error> {
        let entries = match tokio::fs::read_to_string(path).await {
            Ok(content) => {
                tokio::task::spawn_blocking(move || serde_json::from_str::<Map<String, Value>>(&content)).await??
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Map::new(),
            Err(e) => return Err(e.into()),
        };

        log::info!("Local store opened at {} ({} keys)", path.display(), entries.len());
        Ok(Self {
            entries: Arc::new(RwLock::new(entries)),
            write_lock: Arc::new(Mutex::new(())),
            path: Some(path.to_path_buf()),
        })
    }

    pub async fn get_raw(&self, key: &str) -> Option<Value> {
        self.entries.read().await.get(key).cloned()
    }

    /// A stored value that no longer matches `T` is reported and treated as absent.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = self.get_raw(key).await?;
        match serde_json::from_value(value) {
            Ok(v) => Some(v),
            Err(e) => {
                log::warn!("Ignoring unreadable value for '{}': {}", key, e);
                None
            }
        }
    }

    pub async fn contains(&self, key: &str) -> bool {
        self.entries.read().await.contains_key(key)
    }

    pub async fn set<T: Serialize>(&self, key: &str, value: &T) -> Result<(), anyhow::Error> {
        let value = serde_json::to_value(value)?;
        let _write = self.write_lock.lock().await;
        self.insert_and_persist(key, value).await
    }

    /// Read-modify-write of one key with no other mutation in between.
    /// A missing or unreadable value starts from `T::default()`.
    pub async fn update<T, R, F>(&self, key: &str, updater: F) -> Result<R, anyhow::Error>
    where
        T: Serialize + DeserializeOwned + Default,
        F: FnOnce(&mut T) -> R,
    {
        let _write = self.write_lock.lock().await;
        let mut value: T = self.get(key).await.unwrap_or_default();
        let result = updater(&mut value);
        self.insert_and_persist(key, serde_json::to_value(&value)?).await?;
        Ok(result)
    }

    pub async fn remove(&self, key: &str) -> Result<(), anyhow::Error> {
        let _write = self.write_lock.lock().await;
        let snapshot = {
            let mut entries = self.entries.write().await;
            if entries.remove(key).is_none() {
                return Ok(());
            }
            entries.clone()
        };
        self.persist(snapshot).await
    }

    async fn insert_and_persist(&self, key: &str, value: Value) -> Result<(), anyhow::Error> {
        let snapshot = {
            let mut entries = self.entries.write().await;
            entries.insert(key.to_string(), value);
            entries.clone()
        };
        self.persist(snapshot).await
    }

    /// Callers hold `write_lock`. The file is replaced by rename so a reader
    /// never sees a partial write.
    async fn persist(&self, snapshot: Map<String, Value>) -> Result<(), anyhow::Error> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let content = tokio::task::spawn_blocking(move || serde_json::to_string_pretty(&snapshot)).await??;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let staging = path.with_extension("json.tmp");
        tokio::fs::write(&staging, content).await?;
        tokio::fs::rename(&staging, path).await?;
        log::trace!("Local store written to {}", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn values_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("local_storage.json");

        let store = LocalStore::open(&path).await.unwrap();
        store.set(keys::THEME, &"light").await.unwrap();
        store.set(keys::USER_ID, &42u32).await.unwrap();

        let reopened = LocalStore::open(&path).await.unwrap();
        assert_eq!(reopened.get::<String>(keys::THEME).await, Some("light".to_string()));
        assert_eq!(reopened.get::<u32>(keys::USER_ID).await, Some(42));
    }

    #[tokio::test]
    async fn remove_is_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("local_storage.json");

        let store = LocalStore::open(&path).await.unwrap();
        store.set(keys::TOKEN, &"abc").await.unwrap();
        store.remove(keys::TOKEN).await.unwrap();
        assert!(!store.contains(keys::TOKEN).await);

        let reopened = LocalStore::open(&path).await.unwrap();
        assert!(!reopened.contains(keys::TOKEN).await);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_writes_all_reach_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("local_storage.json");
        let store = LocalStore::open(&path).await.unwrap();

        let writes: Vec<_> = (0..40)
            .map(|i| {
                let store = store.clone();
                tokio::spawn(async move { store.set(&format!("key{}", i), &"x".repeat(i * 7)).await })
            })
            .collect();
        for write in writes {
            write.await.unwrap().unwrap();
        }

        let reopened = LocalStore::open(&path).await.unwrap();
        for i in 0..40 {
            assert_eq!(reopened.get::<String>(&format!("key{}", i)).await, Some("x".repeat(i * 7)));
        }
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_updates_are_not_lost() {
        let store = LocalStore::in_memory();
        let updates: Vec<_> = (0..50u32)
            .map(|i| {
                let store = store.clone();
                tokio::spawn(async move { store.update(keys::USER_ID, |ids: &mut Vec<u32>| ids.push(i)).await })
            })
            .collect();
        for update in updates {
            update.await.unwrap().unwrap();
        }

        let mut ids = store.get::<Vec<u32>>(keys::USER_ID).await.unwrap();
        ids.sort();
        assert_eq!(ids, (0..50).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn mismatched_type_reads_as_absent() {
        let store = LocalStore::in_memory();
        store.set(keys::SYNC_QUEUE, &"not a list").await.unwrap();
        assert_eq!(store.get::<Vec<u32>>(keys::SYNC_QUEUE).await, None);
        assert!(store.get_raw(keys::SYNC_QUEUE).await.is_some());
    }
}
