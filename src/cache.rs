//! Action Cache — persistent per-user map of message id to last outcome.
//!
//! Exactly one record per id is authoritative at any time; the most
//! recent `record` call wins. The backing store holds one JSON blob per
//! resolved user identity. A corrupt blob yields an empty cache, never
//! an error: losing the cache only costs reclassification work.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::CacheError;
use crate::markers::RecordedAction;

/// Records older than this are dropped on load.
const RETENTION_DAYS: i64 = 7;

/// Last known outcome for one message id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionRecord {
    pub action: RecordedAction,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub confidence: f32,
    #[serde(default)]
    pub keyword: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

impl ActionRecord {
    /// New record stamped with the current time.
    pub fn new(action: RecordedAction) -> Self {
        Self {
            action,
            category: None,
            confidence: 0.0,
            keyword: None,
            recorded_at: Utc::now(),
        }
    }

    pub fn with_category(mut self, category: Option<String>) -> Self {
        self.category = category;
        self
    }

    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = confidence;
        self
    }

    pub fn with_keyword(mut self, keyword: Option<String>) -> Self {
        self.keyword = keyword;
        self
    }
}

/// Backing store: one opaque JSON blob per user identity.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Load the blob for a user. `None` when nothing was ever saved.
    async fn load(&self, user_id: &str) -> Result<Option<String>, CacheError>;

    async fn save(&self, user_id: &str, blob: &str) -> Result<(), CacheError>;
}

/// Filesystem store: `<dir>/<user>.json`.
pub struct FsCacheStore {
    dir: PathBuf,
}

impl FsCacheStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, user_id: &str) -> PathBuf {
        // User ids come from the host session; keep filenames tame.
        let sanitized: String = user_id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect();
        self.dir.join(format!("{sanitized}.json"))
    }
}

#[async_trait]
impl CacheStore for FsCacheStore {
    async fn load(&self, user_id: &str) -> Result<Option<String>, CacheError> {
        match tokio::fs::read_to_string(self.path_for(user_id)).await {
            Ok(blob) => Ok(Some(blob)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, user_id: &str, blob: &str) -> Result<(), CacheError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        tokio::fs::write(self.path_for(user_id), blob).await?;
        Ok(())
    }
}

/// In-memory cache for one user, write-through to its store.
pub struct ActionCache {
    store: Arc<dyn CacheStore>,
    user_id: String,
    entries: Mutex<HashMap<String, ActionRecord>>,
}

impl ActionCache {
    /// Load the cache for a user.
    ///
    /// A missing or corrupt blob yields an empty cache. Stale records
    /// are pruned here rather than on every lookup.
    pub async fn load(store: Arc<dyn CacheStore>, user_id: &str) -> Self {
        let entries = match store.load(user_id).await {
            Ok(Some(blob)) => match serde_json::from_str::<HashMap<String, ActionRecord>>(&blob) {
                Ok(map) => map,
                Err(e) => {
                    warn!(user_id, error = %e, "Corrupt action cache, starting empty");
                    HashMap::new()
                }
            },
            Ok(None) => HashMap::new(),
            Err(e) => {
                warn!(user_id, error = %e, "Failed to read action cache, starting empty");
                HashMap::new()
            }
        };

        let cutoff = Utc::now() - Duration::days(RETENTION_DAYS);
        let before = entries.len();
        let entries: HashMap<String, ActionRecord> = entries
            .into_iter()
            .filter(|(_, record)| record.recorded_at > cutoff)
            .collect();
        if entries.len() < before {
            debug!(
                user_id,
                pruned = before - entries.len(),
                "Pruned stale action records"
            );
        }

        Self {
            store,
            user_id: user_id.to_string(),
            entries: Mutex::new(entries),
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub async fn get(&self, id: &str) -> Option<ActionRecord> {
        self.entries.lock().await.get(id).cloned()
    }

    /// Record the outcome for a message. Last write wins; persistence is
    /// asynchronous and best-effort.
    pub async fn record(&self, id: &str, record: ActionRecord) {
        let blob = {
            let mut entries = self.entries.lock().await;
            entries.insert(id.to_string(), record);
            serde_json::to_string(&*entries)
        };
        self.persist(blob);
    }

    /// Drop every record, locally and in the store.
    pub async fn clear(&self) {
        let blob = {
            let mut entries = self.entries.lock().await;
            entries.clear();
            serde_json::to_string(&*entries)
        };
        self.persist(blob);
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    fn persist(&self, blob: serde_json::Result<String>) {
        let blob = match blob {
            Ok(blob) => blob,
            Err(e) => {
                warn!(user_id = %self.user_id, error = %e, "Failed to serialize action cache");
                return;
            }
        };
        let store = Arc::clone(&self.store);
        let user_id = self.user_id.clone();
        tokio::spawn(async move {
            if let Err(e) = store.save(&user_id, &blob).await {
                warn!(user_id, error = %e, "Failed to persist action cache");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn flush() {
        // Give the spawned persist task a chance to run.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    }

    #[tokio::test]
    async fn record_then_get() {
        let dir = tempfile::tempdir().unwrap();
        let store: Arc<dyn CacheStore> = Arc::new(FsCacheStore::new(dir.path()));
        let cache = ActionCache::load(Arc::clone(&store), "user-1").await;

        cache
            .record(
                "m-1",
                ActionRecord::new(RecordedAction::Hidden)
                    .with_category(Some("spam".into()))
                    .with_confidence(0.92),
            )
            .await;

        let record = cache.get("m-1").await.unwrap();
        assert_eq!(record.action, RecordedAction::Hidden);
        assert_eq!(record.category.as_deref(), Some("spam"));
        assert!(cache.get("m-2").await.is_none());
    }

    #[tokio::test]
    async fn last_write_wins() {
        let dir = tempfile::tempdir().unwrap();
        let store: Arc<dyn CacheStore> = Arc::new(FsCacheStore::new(dir.path()));
        let cache = ActionCache::load(Arc::clone(&store), "user-1").await;

        cache
            .record("m-1", ActionRecord::new(RecordedAction::Flagged))
            .await;
        cache
            .record("m-1", ActionRecord::new(RecordedAction::Hidden))
            .await;

        assert_eq!(cache.len().await, 1);
        assert_eq!(cache.get("m-1").await.unwrap().action, RecordedAction::Hidden);
    }

    #[tokio::test]
    async fn survives_reload() {
        let dir = tempfile::tempdir().unwrap();
        let store: Arc<dyn CacheStore> = Arc::new(FsCacheStore::new(dir.path()));
        {
            let cache = ActionCache::load(Arc::clone(&store), "user-1").await;
            cache
                .record("m-1", ActionRecord::new(RecordedAction::Completed))
                .await;
            flush().await;
        }

        let cache = ActionCache::load(Arc::clone(&store), "user-1").await;
        assert_eq!(
            cache.get("m-1").await.unwrap().action,
            RecordedAction::Completed
        );
    }

    #[tokio::test]
    async fn corrupt_blob_yields_empty_cache() {
        let dir = tempfile::tempdir().unwrap();
        let store: Arc<dyn CacheStore> = Arc::new(FsCacheStore::new(dir.path()));
        store.save("user-1", "{not valid json!!").await.unwrap();

        let cache = ActionCache::load(Arc::clone(&store), "user-1").await;
        assert_eq!(cache.len().await, 0);
    }

    #[tokio::test]
    async fn stale_records_pruned_on_load() {
        let dir = tempfile::tempdir().unwrap();
        let store: Arc<dyn CacheStore> = Arc::new(FsCacheStore::new(dir.path()));

        let mut map = HashMap::new();
        let mut old = ActionRecord::new(RecordedAction::Hidden);
        old.recorded_at = Utc::now() - Duration::days(RETENTION_DAYS + 1);
        map.insert("m-old".to_string(), old);
        map.insert("m-new".to_string(), ActionRecord::new(RecordedAction::Clean));
        store
            .save("user-1", &serde_json::to_string(&map).unwrap())
            .await
            .unwrap();

        let cache = ActionCache::load(Arc::clone(&store), "user-1").await;
        assert!(cache.get("m-old").await.is_none());
        assert!(cache.get("m-new").await.is_some());
    }

    #[tokio::test]
    async fn caches_are_isolated_per_user() {
        let dir = tempfile::tempdir().unwrap();
        let store: Arc<dyn CacheStore> = Arc::new(FsCacheStore::new(dir.path()));

        let a = ActionCache::load(Arc::clone(&store), "user-a").await;
        a.record("m-1", ActionRecord::new(RecordedAction::Hidden))
            .await;
        flush().await;

        let b = ActionCache::load(Arc::clone(&store), "user-b").await;
        assert!(b.get("m-1").await.is_none());
    }

    #[tokio::test]
    async fn clear_empties_store_blob() {
        let dir = tempfile::tempdir().unwrap();
        let store: Arc<dyn CacheStore> = Arc::new(FsCacheStore::new(dir.path()));
        let cache = ActionCache::load(Arc::clone(&store), "user-1").await;
        cache
            .record("m-1", ActionRecord::new(RecordedAction::Hidden))
            .await;
        cache.clear().await;
        flush().await;

        let cache = ActionCache::load(Arc::clone(&store), "user-1").await;
        assert_eq!(cache.len().await, 0);
    }
}
