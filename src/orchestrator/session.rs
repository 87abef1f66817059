//! Session context — the one owner of shared mutable state.
//!
//! Config snapshot, action cache, timestamp gate, cumulative totals,
//! the full-scan-complete flag, and the post-banner replay window all
//! live here, with defined reset semantics for rescan, full reset, and
//! user-identity change. Nothing in the engine reads this state through
//! globals.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;
use tracing::{info, warn};

use crate::cache::{ActionCache, CacheStore};
use crate::config::{EngineSettings, ModerationConfig};
use crate::gate::TimestampGate;
use crate::orchestrator::state::ScanStats;
use crate::remote::{ConfigStore, CounterTotals, WatermarkStore};

/// Everything scoped to one resolved user identity. Replaced wholesale
/// on user switch.
struct UserScope {
    user_id: String,
    config: Arc<ModerationConfig>,
    cache: Arc<ActionCache>,
    gate: Arc<TimestampGate>,
}

/// Shared state owned by the orchestrator.
pub struct SessionContext {
    settings: EngineSettings,
    config_store: Arc<dyn ConfigStore>,
    cache_store: Arc<dyn CacheStore>,
    watermark_store: Arc<dyn WatermarkStore>,
    scope: RwLock<UserScope>,
    totals: Mutex<CounterTotals>,
    full_scan_done: AtomicBool,
    replay_deadline: Mutex<Option<Instant>>,
}

impl SessionContext {
    pub async fn new(
        user_id: &str,
        settings: EngineSettings,
        config_store: Arc<dyn ConfigStore>,
        cache_store: Arc<dyn CacheStore>,
        watermark_store: Arc<dyn WatermarkStore>,
    ) -> Self {
        let scope = Self::build_scope(user_id, &cache_store, &watermark_store).await;
        let session = Self {
            settings,
            config_store,
            cache_store,
            watermark_store,
            scope: RwLock::new(scope),
            totals: Mutex::new(CounterTotals::default()),
            full_scan_done: AtomicBool::new(false),
            replay_deadline: Mutex::new(None),
        };
        session.refresh_config().await;
        session
    }

    async fn build_scope(
        user_id: &str,
        cache_store: &Arc<dyn CacheStore>,
        watermark_store: &Arc<dyn WatermarkStore>,
    ) -> UserScope {
        UserScope {
            user_id: user_id.to_string(),
            config: Arc::new(ModerationConfig::default()),
            cache: Arc::new(ActionCache::load(Arc::clone(cache_store), user_id).await),
            gate: Arc::new(TimestampGate::new(Arc::clone(watermark_store), user_id)),
        }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub async fn user_id(&self) -> String {
        self.scope.read().await.user_id.clone()
    }

    pub async fn config(&self) -> Arc<ModerationConfig> {
        Arc::clone(&self.scope.read().await.config)
    }

    pub async fn cache(&self) -> Arc<ActionCache> {
        Arc::clone(&self.scope.read().await.cache)
    }

    pub async fn gate(&self) -> Arc<TimestampGate> {
        Arc::clone(&self.scope.read().await.gate)
    }

    /// Re-fetch the config snapshot for the current user.
    ///
    /// On failure the last good snapshot stays in place; the built-in
    /// default serves until the first successful fetch.
    pub async fn refresh_config(&self) {
        let user_id = self.user_id().await;
        match self.config_store.fetch(&user_id).await {
            Ok(config) => {
                let mut scope = self.scope.write().await;
                // The user may have switched while the fetch was out.
                if scope.user_id == user_id {
                    scope.config = Arc::new(config);
                }
            }
            Err(e) => {
                warn!(user_id, error = %e, "Config refresh failed, keeping last snapshot");
            }
        }
    }

    /// Replace the whole user scope: fresh config, fresh cache, fresh
    /// gate. Totals and scan progress restart from zero.
    pub async fn switch_user(&self, user_id: &str) {
        info!(user_id, "Switching user identity");
        let scope =
            Self::build_scope(user_id, &self.cache_store, &self.watermark_store).await;
        *self.scope.write().await = scope;
        self.full_scan_done.store(false, Ordering::Release);
        *self.totals.lock().await = CounterTotals::default();
        *self.replay_deadline.lock().await = None;
        self.refresh_config().await;
    }

    pub fn full_scan_done(&self) -> bool {
        self.full_scan_done.load(Ordering::Acquire)
    }

    pub fn set_full_scan_done(&self, done: bool) {
        self.full_scan_done.store(done, Ordering::Release);
    }

    /// Fold a scan's counters into the session totals and return the
    /// updated snapshot for publication.
    pub async fn add_totals(&self, stats: &ScanStats) -> CounterTotals {
        let mut totals = self.totals.lock().await;
        totals.total_processed += u64::from(stats.scanned);
        totals.flagged_total += u64::from(stats.flagged);
        totals.auto_hidden_total += u64::from(stats.hidden);
        totals.completed_total += u64::from(stats.completed);
        *totals
    }

    /// Open the post-banner replay window.
    pub async fn open_replay_window(&self) {
        *self.replay_deadline.lock().await = Some(Instant::now() + self.settings.replay_window);
    }

    /// Whether uncached old rows may still be replayed.
    pub async fn replay_window_active(&self) -> bool {
        match *self.replay_deadline.lock().await {
            Some(deadline) => Instant::now() < deadline,
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use async_trait::async_trait;

    use crate::cache::ActionRecord;
    use crate::error::{CacheError, RemoteError};
    use crate::markers::RecordedAction;

    struct MemoryCacheStore {
        blobs: Mutex<std::collections::HashMap<String, String>>,
    }

    #[async_trait]
    impl CacheStore for MemoryCacheStore {
        async fn load(&self, user_id: &str) -> Result<Option<String>, CacheError> {
            Ok(self.blobs.lock().await.get(user_id).cloned())
        }

        async fn save(&self, user_id: &str, blob: &str) -> Result<(), CacheError> {
            self.blobs
                .lock()
                .await
                .insert(user_id.to_string(), blob.to_string());
            Ok(())
        }
    }

    struct StaticConfigStore {
        fail: bool,
    }

    #[async_trait]
    impl ConfigStore for StaticConfigStore {
        async fn fetch(&self, user_id: &str) -> Result<ModerationConfig, RemoteError> {
            if self.fail {
                return Err(RemoteError::Exhausted {
                    endpoint: "/api/config".into(),
                    attempts: 3,
                });
            }
            Ok(ModerationConfig {
                user_id: user_id.to_string(),
                auto_hide_enabled: true,
                ..Default::default()
            })
        }
    }

    struct NullWatermarkStore;

    #[async_trait]
    impl WatermarkStore for NullWatermarkStore {
        async fn fetch(&self, _user_id: &str) -> Result<u64, RemoteError> {
            Ok(0)
        }

        async fn store(&self, _user_id: &str, _timestamp: u64) -> Result<(), RemoteError> {
            Ok(())
        }
    }

    fn stores() -> (Arc<dyn CacheStore>, Arc<dyn WatermarkStore>) {
        (
            Arc::new(MemoryCacheStore {
                blobs: Mutex::new(std::collections::HashMap::new()),
            }),
            Arc::new(NullWatermarkStore),
        )
    }

    #[tokio::test]
    async fn config_loaded_on_construction() {
        let (cache_store, watermark_store) = stores();
        let session = SessionContext::new(
            "user-1",
            EngineSettings::default(),
            Arc::new(StaticConfigStore { fail: false }),
            cache_store,
            watermark_store,
        )
        .await;

        let config = session.config().await;
        assert_eq!(config.user_id, "user-1");
        assert!(config.auto_hide_enabled);
    }

    #[tokio::test]
    async fn failed_refresh_keeps_default_snapshot() {
        let (cache_store, watermark_store) = stores();
        let session = SessionContext::new(
            "user-1",
            EngineSettings::default(),
            Arc::new(StaticConfigStore { fail: true }),
            cache_store,
            watermark_store,
        )
        .await;

        let config = session.config().await;
        assert!(!config.auto_hide_enabled);
        assert!(config.keywords.is_empty());
    }

    #[tokio::test]
    async fn switch_user_replaces_cache_and_progress() {
        let (cache_store, watermark_store) = stores();
        let session = SessionContext::new(
            "user-1",
            EngineSettings::default(),
            Arc::new(StaticConfigStore { fail: false }),
            cache_store,
            watermark_store,
        )
        .await;

        session
            .cache()
            .await
            .record("m-1", ActionRecord::new(RecordedAction::Hidden))
            .await;
        session.set_full_scan_done(true);

        session.switch_user("user-2").await;

        assert_eq!(session.user_id().await, "user-2");
        assert!(session.cache().await.get("m-1").await.is_none());
        assert!(!session.full_scan_done());
        assert_eq!(session.config().await.user_id, "user-2");
    }

    #[tokio::test]
    async fn totals_accumulate_across_scans() {
        let (cache_store, watermark_store) = stores();
        let session = SessionContext::new(
            "user-1",
            EngineSettings::default(),
            Arc::new(StaticConfigStore { fail: false }),
            cache_store,
            watermark_store,
        )
        .await;

        let stats = ScanStats {
            scanned: 3,
            flagged: 2,
            hidden: 1,
            completed: 0,
            skipped: 4,
        };
        session.add_totals(&stats).await;
        let totals = session.add_totals(&stats).await;

        assert_eq!(totals.total_processed, 6);
        assert_eq!(totals.flagged_total, 4);
        assert_eq!(totals.auto_hidden_total, 2);
        assert_eq!(totals.completed_total, 0);
    }

    #[tokio::test]
    async fn replay_window_opens_and_expires() {
        let (cache_store, watermark_store) = stores();
        let mut settings = EngineSettings::default();
        settings.replay_window = std::time::Duration::from_millis(40);
        let session = SessionContext::new(
            "user-1",
            settings,
            Arc::new(StaticConfigStore { fail: false }),
            cache_store,
            watermark_store,
        )
        .await;

        assert!(!session.replay_window_active().await);
        session.open_replay_window().await;
        assert!(session.replay_window_active().await);

        tokio::time::sleep(std::time::Duration::from_millis(60)).await;
        assert!(!session.replay_window_active().await);
    }
}
