//! Scan modes, per-pass counters, and the single-flight latch.

use tokio::sync::Mutex;

/// How much of the list a scan covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanMode {
    /// Origin-reset sweep over the whole list.
    Full,
    /// Rendered rows only, one genuinely new row per pass.
    Visible,
}

impl ScanMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Visible => "visible",
        }
    }
}

/// Per-pass counters, reset at the start of each scan invocation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanStats {
    /// Rows genuinely processed (classified this scan).
    pub scanned: u32,
    pub flagged: u32,
    pub hidden: u32,
    pub completed: u32,
    /// Rows restored from cache or skipped.
    pub skipped: u32,
}

#[derive(Debug, Default)]
struct LatchState {
    /// Mode of the scan currently in flight.
    current: Option<ScanMode>,
    /// Depth-1 queue of coalesced requests.
    pending: Option<ScanMode>,
}

/// Single-flight scan latch.
///
/// Only one scan runs at a time. Requests arriving while one is in
/// flight collapse into a single pending slot; `full` supersedes
/// `visible` there, never the reverse. A request arriving during a full
/// scan re-queues as full: the running sweep cannot have covered
/// mutations that happened after it started.
pub struct ScanLatch {
    inner: Mutex<LatchState>,
}

impl ScanLatch {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(LatchState::default()),
        }
    }

    /// Claim the latch for `mode`. Returns false when a scan is already
    /// in flight; the request is then coalesced into the pending slot.
    pub async fn try_begin(&self, mode: ScanMode) -> bool {
        let mut state = self.inner.lock().await;
        match state.current {
            Some(current) => {
                let supersede = mode == ScanMode::Full
                    || current == ScanMode::Full
                    || state.pending == Some(ScanMode::Full);
                state.pending = Some(if supersede {
                    ScanMode::Full
                } else {
                    ScanMode::Visible
                });
                false
            }
            None => {
                state.current = Some(mode);
                true
            }
        }
    }

    /// Finish the in-flight scan. When a pending mode exists the latch
    /// stays held and that mode is returned for immediate execution.
    pub async fn finish(&self) -> Option<ScanMode> {
        let mut state = self.inner.lock().await;
        match state.pending.take() {
            Some(next) => {
                state.current = Some(next);
                Some(next)
            }
            None => {
                state.current = None;
                None
            }
        }
    }

    pub async fn in_flight(&self) -> bool {
        self.inner.lock().await.current.is_some()
    }
}

impl Default for ScanLatch {
    fn default() -> Self {
        Self::new()
    }
}
