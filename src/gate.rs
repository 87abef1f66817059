//! Timestamp Gate — the session high-water mark.
//!
//! Messages at or below the watermark are treated as already evaluated.
//! The value is seeded from the remote store exactly once per session,
//! only ever raised locally, and persisted back asynchronously without
//! blocking the scan. `reset` clears the loaded flag so the next scan
//! re-fetches instead of trusting memory.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::remote::WatermarkStore;

/// Watermarks above this are taken to be milliseconds.
const MILLIS_CUTOFF: u64 = 9_999_999_999;

/// Normalize an apparently-milliseconds watermark to seconds.
pub(crate) fn normalize_seconds(raw: u64) -> u64 {
    if raw > MILLIS_CUTOFF { raw / 1000 } else { raw }
}

/// Session-scoped monotonic watermark, bound to one user identity.
pub struct TimestampGate {
    store: Arc<dyn WatermarkStore>,
    user_id: String,
    watermark: AtomicU64,
    loaded: AtomicBool,
    fetch_lock: Mutex<()>,
}

impl TimestampGate {
    pub fn new(store: Arc<dyn WatermarkStore>, user_id: &str) -> Self {
        Self {
            store,
            user_id: user_id.to_string(),
            watermark: AtomicU64::new(0),
            loaded: AtomicBool::new(false),
            fetch_lock: Mutex::new(()),
        }
    }

    /// Current local watermark in seconds.
    pub fn current(&self) -> u64 {
        self.watermark.load(Ordering::Acquire)
    }

    /// Seed the watermark from the remote store.
    ///
    /// The remote is queried at most once per session, even when the
    /// fetch fails: the HTTP layer already retried, and reprocessing
    /// from a low watermark is recoverable via the Action Cache.
    pub async fn ensure_loaded(&self) -> u64 {
        if self.loaded.load(Ordering::Acquire) {
            return self.current();
        }

        let _guard = self.fetch_lock.lock().await;
        if self.loaded.load(Ordering::Acquire) {
            return self.current();
        }

        match self.store.fetch(&self.user_id).await {
            Ok(raw) => {
                let seconds = normalize_seconds(raw);
                self.watermark.fetch_max(seconds, Ordering::AcqRel);
                debug!(user_id = %self.user_id, watermark = seconds, "Watermark seeded");
            }
            Err(e) => {
                warn!(
                    user_id = %self.user_id,
                    error = %e,
                    "Failed to fetch watermark, continuing with local value"
                );
            }
        }
        self.loaded.store(true, Ordering::Release);
        self.current()
    }

    /// Raise the watermark if `candidate` exceeds it.
    ///
    /// Persists the new value asynchronously, best-effort; the server
    /// side is monotonic too, so a lost write is only a lost shortcut.
    pub fn advance(&self, candidate: u64) -> bool {
        let previous = self.watermark.fetch_max(candidate, Ordering::AcqRel);
        if candidate <= previous {
            return false;
        }

        let store = Arc::clone(&self.store);
        let user_id = self.user_id.clone();
        tokio::spawn(async move {
            if let Err(e) = store.store(&user_id, candidate).await {
                warn!(user_id, candidate, error = %e, "Failed to persist watermark");
            }
        });
        true
    }

    /// Forget the local watermark; the next `ensure_loaded` re-fetches.
    pub fn reset(&self) {
        self.watermark.store(0, Ordering::Release);
        self.loaded.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::AtomicU32;

    use async_trait::async_trait;

    use crate::error::RemoteError;

    struct MockStore {
        value: AtomicU64,
        fetches: AtomicU32,
        stored: AtomicU64,
    }

    impl MockStore {
        fn with_value(value: u64) -> Arc<Self> {
            Arc::new(Self {
                value: AtomicU64::new(value),
                fetches: AtomicU32::new(0),
                stored: AtomicU64::new(0),
            })
        }
    }

    #[async_trait]
    impl WatermarkStore for MockStore {
        async fn fetch(&self, _user_id: &str) -> Result<u64, RemoteError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            Ok(self.value.load(Ordering::SeqCst))
        }

        async fn store(&self, _user_id: &str, timestamp: u64) -> Result<(), RemoteError> {
            self.stored.store(timestamp, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn millisecond_values_normalized() {
        assert_eq!(normalize_seconds(1_700_000_000_123), 1_700_000_000);
        assert_eq!(normalize_seconds(1_700_000_000), 1_700_000_000);
        assert_eq!(normalize_seconds(0), 0);
    }

    #[tokio::test]
    async fn fetches_exactly_once_per_session() {
        let store = MockStore::with_value(1_000);
        let gate = TimestampGate::new(store.clone(), "user-1");

        assert_eq!(gate.ensure_loaded().await, 1_000);
        assert_eq!(gate.ensure_loaded().await, 1_000);
        assert_eq!(store.fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn remote_millis_normalized_on_load() {
        let store = MockStore::with_value(1_700_000_000_500);
        let gate = TimestampGate::new(store.clone(), "user-1");
        assert_eq!(gate.ensure_loaded().await, 1_700_000_000);
    }

    #[tokio::test]
    async fn advance_is_strictly_monotonic() {
        let store = MockStore::with_value(0);
        let gate = TimestampGate::new(store.clone(), "user-1");
        gate.ensure_loaded().await;

        assert!(gate.advance(50));
        assert!(!gate.advance(50));
        assert!(!gate.advance(10));
        assert_eq!(gate.current(), 50);

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(store.stored.load(Ordering::SeqCst), 50);
    }

    #[tokio::test]
    async fn reset_forces_refetch() {
        let store = MockStore::with_value(200);
        let gate = TimestampGate::new(store.clone(), "user-1");
        gate.ensure_loaded().await;
        gate.advance(900);

        gate.reset();
        assert_eq!(gate.current(), 0);
        assert_eq!(gate.ensure_loaded().await, 200);
        assert_eq!(store.fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn fetch_failure_does_not_retry_within_session() {
        struct FailingStore {
            fetches: AtomicU32,
        }

        #[async_trait]
        impl WatermarkStore for FailingStore {
            async fn fetch(&self, _user_id: &str) -> Result<u64, RemoteError> {
                self.fetches.fetch_add(1, Ordering::SeqCst);
                Err(RemoteError::Exhausted {
                    endpoint: "/api/last-checked".into(),
                    attempts: 3,
                })
            }

            async fn store(&self, _user_id: &str, _timestamp: u64) -> Result<(), RemoteError> {
                Ok(())
            }
        }

        let store = Arc::new(FailingStore {
            fetches: AtomicU32::new(0),
        });
        let gate = TimestampGate::new(store.clone(), "user-1");

        assert_eq!(gate.ensure_loaded().await, 0);
        assert_eq!(gate.ensure_loaded().await, 0);
        assert_eq!(store.fetches.load(Ordering::SeqCst), 1);
    }
}
