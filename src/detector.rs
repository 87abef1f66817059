//! Change Detector.
//!
//! Two triggers funnel into one idempotent `maybe_scan` entry point:
//! host mutation events (fed through an mpsc channel by the surface
//! adapter) and a timer poll that catches anything mutation observation
//! misses. Mutation bursts are debounced on the trailing edge so a
//! storm of list updates produces a single scan request; mode selection
//! stays with the orchestrator either way.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::config::EngineSettings;

/// Anything that can be asked to scan when the list may have changed.
#[async_trait]
pub trait ScanTrigger: Send + Sync {
    async fn maybe_scan(&self);
}

/// Spawn the detector loop.
///
/// Returns the task handle and a shutdown flag; set the flag to stop.
pub fn spawn_change_detector(
    trigger: Arc<dyn ScanTrigger>,
    mut mutations: mpsc::Receiver<()>,
    settings: &EngineSettings,
) -> (JoinHandle<()>, Arc<AtomicBool>) {
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_flag = Arc::clone(&shutdown);
    let debounce = settings.debounce;
    let poll_interval = settings.poll_interval;

    let handle = tokio::spawn(async move {
        info!(
            poll_secs = poll_interval.as_secs(),
            debounce_ms = debounce.as_millis() as u64,
            "Change detector started"
        );

        let mut poll = tokio::time::interval(poll_interval);
        poll.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut mutations_open = true;

        loop {
            if shutdown.load(Ordering::Relaxed) {
                info!("Change detector shutting down");
                return;
            }

            tokio::select! {
                _ = poll.tick() => {
                    if shutdown.load(Ordering::Relaxed) {
                        return;
                    }
                    debug!("Poll tick");
                    trigger.maybe_scan().await;
                }
                received = mutations.recv(), if mutations_open => {
                    match received {
                        Some(()) => {
                            // Trailing-edge debounce: swallow the burst,
                            // scan once it goes quiet.
                            loop {
                                match tokio::time::timeout(debounce, mutations.recv()).await {
                                    Ok(Some(())) => continue,
                                    Ok(None) => {
                                        mutations_open = false;
                                        break;
                                    }
                                    Err(_) => break,
                                }
                            }
                            debug!("Mutation burst settled");
                            trigger.maybe_scan().await;
                        }
                        None => {
                            // Sender gone; keep the timer poll running.
                            mutations_open = false;
                        }
                    }
                }
            }
        }
    });

    (handle, shutdown_flag)
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    struct CountingTrigger {
        count: AtomicU32,
    }

    #[async_trait]
    impl ScanTrigger for CountingTrigger {
        async fn maybe_scan(&self) {
            self.count.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn settings(poll: Duration, debounce: Duration) -> EngineSettings {
        EngineSettings {
            poll_interval: poll,
            debounce,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn mutation_burst_collapses_to_one_scan() {
        let trigger = Arc::new(CountingTrigger {
            count: AtomicU32::new(0),
        });
        let (tx, rx) = mpsc::channel(16);
        let (_handle, shutdown) = spawn_change_detector(
            Arc::clone(&trigger) as Arc<dyn ScanTrigger>,
            rx,
            &settings(Duration::from_secs(60), Duration::from_millis(30)),
        );

        // Let the interval's immediate first tick drain.
        tokio::time::sleep(Duration::from_millis(50)).await;
        let baseline = trigger.count.load(Ordering::SeqCst);

        for _ in 0..5 {
            tx.send(()).await.unwrap();
        }
        tokio::time::sleep(Duration::from_millis(150)).await;

        assert_eq!(trigger.count.load(Ordering::SeqCst), baseline + 1);
        shutdown.store(true, Ordering::Relaxed);
    }

    #[tokio::test]
    async fn poll_ticks_keep_scanning_without_mutations() {
        let trigger = Arc::new(CountingTrigger {
            count: AtomicU32::new(0),
        });
        let (_tx, rx) = mpsc::channel::<()>(16);
        let (_handle, shutdown) = spawn_change_detector(
            Arc::clone(&trigger) as Arc<dyn ScanTrigger>,
            rx,
            &settings(Duration::from_millis(40), Duration::from_millis(10)),
        );

        tokio::time::sleep(Duration::from_millis(190)).await;
        assert!(trigger.count.load(Ordering::SeqCst) >= 4);
        shutdown.store(true, Ordering::Relaxed);
    }

    #[tokio::test]
    async fn closed_mutation_channel_leaves_polling_alive() {
        let trigger = Arc::new(CountingTrigger {
            count: AtomicU32::new(0),
        });
        let (tx, rx) = mpsc::channel::<()>(16);
        let (_handle, shutdown) = spawn_change_detector(
            Arc::clone(&trigger) as Arc<dyn ScanTrigger>,
            rx,
            &settings(Duration::from_millis(40), Duration::from_millis(10)),
        );

        drop(tx);
        tokio::time::sleep(Duration::from_millis(130)).await;
        assert!(trigger.count.load(Ordering::SeqCst) >= 3);
        shutdown.store(true, Ordering::Relaxed);
    }
}
