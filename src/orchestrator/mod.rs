//! Scan Orchestrator.
//!
//! Drives bounded full and visible scan passes over the host list,
//! owns per-row processing, and coordinates the cache, gate, decision
//! engine, and executor. One scan runs at a time; requests arriving
//! mid-scan coalesce through the [`state::ScanLatch`].
//!
//! The host recycles DOM nodes, so every per-node read is preceded by
//! guid reconciliation: a node whose presented id changed since the
//! last observation has all engine-owned state cleared before anything
//! else happens to it.

pub mod session;
pub mod state;

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::cache::{ActionRecord, CacheStore};
use crate::config::EngineSettings;
use crate::decision::{Decision, DecisionEngine, DecisionSource};
use crate::detector::ScanTrigger;
use crate::executor::{ActionExecutor, poll_until};
use crate::markers::{ActionTag, RecordedAction, TerminalMarker};
use crate::remote::{
    Classifier, ConfigStore, CounterSink, LogEvent, ModerationLog, WatermarkStore,
};
use crate::surface::{InboxSurface, RowNode, RowSnapshot};
use self::session::SessionContext;
use self::state::{ScanLatch, ScanMode, ScanStats};

/// External collaborators the orchestrator is wired with.
pub struct OrchestratorDeps {
    pub surface: Arc<dyn InboxSurface>,
    pub config_store: Arc<dyn ConfigStore>,
    pub cache_store: Arc<dyn CacheStore>,
    pub watermark_store: Arc<dyn WatermarkStore>,
    pub classifier: Arc<dyn Classifier>,
    pub log_sink: Arc<dyn ModerationLog>,
    pub counter_sink: Arc<dyn CounterSink>,
}

/// State carried through one scan invocation.
struct PassContext {
    stats: ScanStats,
    /// Message ids already examined this scan.
    seen: HashSet<String>,
    /// Remaining allowance for reclassifying uncached old rows.
    replay_left: u32,
    /// Highest timestamp among genuinely processed rows.
    max_processed_ts: u64,
}

/// How a row left [`ScanOrchestrator::examine_row`].
enum Examined {
    /// Marked, restored, or skipped; nothing further to do.
    Settled,
    /// Newer than the scan horizon; left untouched for a later scan.
    Deferred,
    /// Went through full classification.
    Classified,
}

/// The scan state machine.
pub struct ScanOrchestrator {
    surface: Arc<dyn InboxSurface>,
    session: SessionContext,
    engine: DecisionEngine,
    executor: ActionExecutor,
    log_sink: Arc<dyn ModerationLog>,
    counter_sink: Arc<dyn CounterSink>,
    settings: EngineSettings,
    latch: ScanLatch,
    last_stats: Mutex<ScanStats>,
}

impl ScanOrchestrator {
    pub async fn new(user_id: &str, settings: EngineSettings, deps: OrchestratorDeps) -> Arc<Self> {
        let session = SessionContext::new(
            user_id,
            settings.clone(),
            deps.config_store,
            deps.cache_store,
            deps.watermark_store,
        )
        .await;

        Arc::new(Self {
            engine: DecisionEngine::new(deps.classifier, settings.min_text_chars),
            executor: ActionExecutor::new(&settings),
            surface: deps.surface,
            session,
            log_sink: deps.log_sink,
            counter_sink: deps.counter_sink,
            settings,
            latch: ScanLatch::new(),
            last_stats: Mutex::new(ScanStats::default()),
        })
    }

    pub fn session(&self) -> &SessionContext {
        &self.session
    }

    /// Counters from the most recently completed scan.
    pub async fn last_stats(&self) -> ScanStats {
        *self.last_stats.lock().await
    }

    /// Idempotent entry point shared by the mutation and poll triggers.
    ///
    /// Mode selection is the single source of truth: full until the
    /// session has completed one full sweep, visible afterwards.
    pub async fn maybe_scan(&self) {
        let mode = if self.session.full_scan_done() {
            ScanMode::Visible
        } else {
            ScanMode::Full
        };
        self.request_scan(mode).await;
    }

    /// Run a scan, or coalesce the request if one is in flight.
    pub async fn request_scan(&self, mode: ScanMode) {
        if !self.latch.try_begin(mode).await {
            debug!(mode = mode.as_str(), "Scan in flight, request coalesced");
            return;
        }

        let mut mode = mode;
        loop {
            self.run_scan(mode).await;
            match self.latch.finish().await {
                Some(next) => mode = next,
                None => break,
            }
        }
    }

    /// Manual rescan: forget the gate and sweep the list again.
    pub async fn trigger_rescan(&self) {
        info!("Manual rescan requested");
        self.session.gate().await.reset();
        self.session.set_full_scan_done(false);
        self.request_scan(ScanMode::Full).await;
    }

    /// Full reset: gate, cache, and every DOM-side marker.
    pub async fn full_reset(&self) {
        info!("Full reset requested");
        self.session.gate().await.reset();
        self.session.cache().await.clear().await;
        self.sweep_row_state().await;
        self.session.set_full_scan_done(false);
        self.request_scan(ScanMode::Full).await;
    }

    /// Replace the user identity: new config, cache, and gate, and a
    /// clean slate on the DOM side.
    pub async fn switch_user(&self, user_id: &str) {
        self.sweep_row_state().await;
        self.session.switch_user(user_id).await;
    }

    /// Spawn the periodic config refresh loop. The loop ends when the
    /// orchestrator is dropped.
    pub fn spawn_config_refresh(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let weak = Arc::downgrade(self);
        let interval = self.settings.config_refresh_interval;
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(interval);
            // Skip the immediate tick; the snapshot was loaded at
            // construction.
            tick.tick().await;
            loop {
                tick.tick().await;
                match weak.upgrade() {
                    Some(orchestrator) => orchestrator.session.refresh_config().await,
                    None => return,
                }
            }
        })
    }

    /// Clear engine-owned markers and decorations from every rendered
    /// row.
    async fn sweep_row_state(&self) {
        let rows = match self.surface.rows().await {
            Ok(rows) => rows,
            Err(e) => {
                warn!(error = %e, "Cannot sweep row state");
                return;
            }
        };
        let clears = rows.iter().map(|node| node.clear_row_state());
        for result in futures::future::join_all(clears).await {
            if let Err(e) = result {
                debug!(error = %e, "Failed to clear row state");
            }
        }
    }

    // ── Scan driver ─────────────────────────────────────────────────

    async fn run_scan(&self, mode: ScanMode) {
        let scan_id = Uuid::new_v4();
        info!(%scan_id, mode = mode.as_str(), "Scan starting");

        self.session.gate().await.ensure_loaded().await;

        let mut ctx = PassContext {
            stats: ScanStats::default(),
            seen: HashSet::new(),
            replay_left: self.settings.replay_budget,
            max_processed_ts: 0,
        };

        match mode {
            ScanMode::Full => self.full_scan(&mut ctx).await,
            ScanMode::Visible => self.visible_scan(&mut ctx).await,
        }

        if ctx.max_processed_ts > 0 && self.session.gate().await.advance(ctx.max_processed_ts) {
            debug!(watermark = ctx.max_processed_ts, "Gate advanced");
        }

        if ctx.stats.scanned > 0 {
            let totals = self.session.add_totals(&ctx.stats).await;
            let sink = Arc::clone(&self.counter_sink);
            tokio::spawn(async move {
                if let Err(e) = sink.publish(totals).await {
                    debug!(error = %e, "Counter publish dropped");
                }
            });
        }

        *self.last_stats.lock().await = ctx.stats;
        info!(
            %scan_id,
            mode = mode.as_str(),
            scanned = ctx.stats.scanned,
            flagged = ctx.stats.flagged,
            hidden = ctx.stats.hidden,
            completed = ctx.stats.completed,
            skipped = ctx.stats.skipped,
            "Scan complete"
        );
    }

    /// Full sweep: origin reset, then advance until the list stops
    /// changing twice in a row or the pass cap is hit.
    async fn full_scan(&self, ctx: &mut PassContext) {
        if let Err(e) = self.surface.scroll_to_origin().await {
            warn!(error = %e, "Failed to scroll to origin");
            return;
        }
        tokio::time::sleep(self.settings.settle_wait).await;

        let mut stalls = 0u32;
        for _pass in 0..self.settings.full_pass_cap {
            self.handle_banner().await;

            let counts_before = ctx.stats;
            let entries = self.collect_rows().await;
            for (node, snap) in &entries {
                // Earlier rows in this pass may have mutated the list;
                // a node that no longer presents its collected message
                // is left for the next pass.
                if !self.presents(node, &snap.id).await {
                    continue;
                }
                if self.is_marked(node).await {
                    continue;
                }
                if ctx.seen.contains(&snap.id) {
                    self.handle_duplicate(node, snap, ctx).await;
                    continue;
                }
                self.examine_row(node, snap, ctx, None).await;
            }

            let before = self.surface.list_signature().await.unwrap_or(0);
            if let Err(e) = self.surface.advance().await {
                warn!(error = %e, "Advance failed, ending full scan");
                break;
            }
            tokio::time::sleep(self.settings.settle_wait).await;
            let after = self.surface.list_signature().await.unwrap_or(0);

            // Hide/complete actions shift rows under their nodes and
            // defer neighbours to the next pass, so a pass that did
            // anything still counts as progress.
            if after == before && ctx.stats == counts_before {
                stalls += 1;
                if stalls >= 2 {
                    break;
                }
            } else {
                stalls = 0;
            }
        }

        self.session.set_full_scan_done(true);
    }

    /// Visible sweep: rendered rows only. Each pass handles old rows in
    /// place but classifies at most one row, then re-reads the DOM,
    /// since hiding or completing mutates the rendered list. Rows newer
    /// than the horizon observed at scan start wait for the next scan.
    async fn visible_scan(&self, ctx: &mut PassContext) {
        let mut horizon: Option<u64> = None;

        for _pass in 0..self.settings.visible_pass_cap {
            self.handle_banner().await;

            let entries = self.collect_rows().await;
            if horizon.is_none() {
                horizon = entries.iter().filter_map(|(_, s)| s.timestamp).max();
            }

            let mut classified = false;
            for (node, snap) in &entries {
                if !self.presents(node, &snap.id).await {
                    continue;
                }
                if self.is_marked(node).await {
                    continue;
                }
                if ctx.seen.contains(&snap.id) {
                    self.handle_duplicate(node, snap, ctx).await;
                    continue;
                }
                if let Examined::Classified = self.examine_row(node, snap, ctx, horizon).await {
                    classified = true;
                    break;
                }
            }

            if !classified {
                break;
            }
            tokio::time::sleep(self.settings.settle_wait).await;
        }
    }

    // ── Per-row processing ──────────────────────────────────────────

    /// Read the rendered rows, reconciling recycled nodes first and
    /// keeping only content-bearing comment/reply/mention rows.
    async fn collect_rows(&self) -> Vec<(Arc<dyn RowNode>, RowSnapshot)> {
        let rows = match self.surface.rows().await {
            Ok(rows) => rows,
            Err(e) => {
                warn!(error = %e, "Failed to read rows");
                return Vec::new();
            }
        };

        let mut entries = Vec::with_capacity(rows.len());
        for node in rows {
            let Ok(snap) = node.snapshot().await else {
                continue;
            };

            match node.presented_id().await {
                Ok(Some(prev)) if prev != snap.id => {
                    debug!(
                        node = node.node_key(),
                        was = %prev,
                        now = %snap.id,
                        "Node recycled, clearing stale state"
                    );
                    if let Err(e) = node.clear_row_state().await {
                        debug!(error = %e, "Failed to clear recycled node");
                        continue;
                    }
                }
                _ => {}
            }
            let _ = node.set_presented_id(&snap.id).await;

            if snap.kind.qualifies() {
                entries.push((node, snap));
            }
        }
        entries
    }

    async fn is_marked(&self, node: &Arc<dyn RowNode>) -> bool {
        matches!(node.marker().await, Ok(Some(_)))
    }

    /// Whether the node still presents the message it was collected
    /// with.
    async fn presents(&self, node: &Arc<dyn RowNode>, id: &str) -> bool {
        node.snapshot().await.map(|s| s.id == id).unwrap_or(false)
    }

    async fn mark(&self, node: &Arc<dyn RowNode>, marker: TerminalMarker) {
        if let Err(e) = node.set_marker(&marker.encode()).await {
            debug!(error = %e, marker = %marker.encode(), "Failed to set marker");
        }
    }

    /// Triage one unmarked, unseen row.
    async fn examine_row(
        &self,
        node: &Arc<dyn RowNode>,
        snap: &RowSnapshot,
        ctx: &mut PassContext,
        horizon: Option<u64>,
    ) -> Examined {
        let Some(ts) = snap.timestamp else {
            ctx.seen.insert(snap.id.clone());
            self.mark(node, TerminalMarker::SkippedNoTs).await;
            ctx.stats.skipped += 1;
            return Examined::Settled;
        };

        if let Some(record) = self.session.cache().await.get(&snap.id).await {
            ctx.seen.insert(snap.id.clone());
            self.restore(node, &record, ctx).await;
            return Examined::Settled;
        }

        let gate_value = self.session.gate().await.current();
        if ts <= gate_value {
            if self.session.replay_window_active().await && ctx.replay_left > 0 {
                ctx.replay_left -= 1;
                debug!(id = %snap.id, replay_left = ctx.replay_left, "Replaying uncached old row");
                ctx.seen.insert(snap.id.clone());
                self.classify_and_apply(node, snap, ctx).await;
                return Examined::Classified;
            }
            ctx.seen.insert(snap.id.clone());
            self.mark(node, TerminalMarker::SkippedOld).await;
            ctx.stats.skipped += 1;
            return Examined::Settled;
        }

        if let Some(h) = horizon {
            if ts > h {
                // Arrived after this scan started; a later scan owns it.
                return Examined::Deferred;
            }
        }

        ctx.seen.insert(snap.id.clone());
        self.classify_and_apply(node, snap, ctx).await;
        Examined::Classified
    }

    /// A message id met twice in the same pass: restore from cache when
    /// possible, otherwise tag the duplicate node.
    async fn handle_duplicate(
        &self,
        node: &Arc<dyn RowNode>,
        snap: &RowSnapshot,
        ctx: &mut PassContext,
    ) {
        if let Some(record) = self.session.cache().await.get(&snap.id).await {
            self.restore(node, &record, ctx).await;
        } else {
            self.mark(node, TerminalMarker::SkippedDup).await;
            ctx.stats.skipped += 1;
        }
    }

    /// Re-apply a cached outcome without reclassifying.
    async fn restore(&self, node: &Arc<dyn RowNode>, record: &ActionRecord, ctx: &mut PassContext) {
        if matches!(
            record.action,
            RecordedAction::Flagged | RecordedAction::Hidden | RecordedAction::Completed
        ) {
            let label = record
                .category
                .clone()
                .or_else(|| record.keyword.clone())
                .unwrap_or_else(|| "flagged".to_string());
            if let Err(e) = node.apply_badge(&label).await {
                debug!(error = %e, "Badge restore failed");
            }
        }
        self.mark(node, TerminalMarker::Restored(record.action)).await;
        ctx.stats.skipped += 1;
    }

    /// Classify a genuinely new row and apply whatever it calls for.
    async fn classify_and_apply(
        &self,
        node: &Arc<dyn RowNode>,
        snap: &RowSnapshot,
        ctx: &mut PassContext,
    ) {
        let config = self.session.config().await;
        let decision = self.engine.decide(snap, &config).await;

        ctx.stats.scanned += 1;
        if let Some(ts) = snap.timestamp {
            ctx.max_processed_ts = ctx.max_processed_ts.max(ts);
        }

        let cache = self.session.cache().await;
        match decision {
            Decision::Sent => {
                self.mark(node, TerminalMarker::Sent).await;
                cache
                    .record(&snap.id, ActionRecord::new(RecordedAction::Sent))
                    .await;
            }
            Decision::Empty => {
                // Recorded clean, marked empty.
                self.mark(node, TerminalMarker::Empty).await;
                cache
                    .record(&snap.id, ActionRecord::new(RecordedAction::Clean))
                    .await;
            }
            Decision::Clean => {
                self.mark(node, TerminalMarker::DoneClean).await;
                cache
                    .record(&snap.id, ActionRecord::new(RecordedAction::Clean))
                    .await;
            }
            Decision::Actionable {
                source,
                badge,
                hide,
                complete,
                category,
                confidence,
                keyword,
            } => {
                if let Some(label) = &badge {
                    if let Err(e) = node.apply_badge(label).await {
                        debug!(error = %e, "Badge failed");
                    }
                }

                let mut hidden = false;
                let mut completed = false;
                let mut hide_failed = false;
                if config.dry_run_mode {
                    debug!(id = %snap.id, hide, complete, "Dry run, suppressing actions");
                } else {
                    if hide {
                        hidden = self.executor.hide_with_retry(node, &snap.platform).await;
                        hide_failed = !hidden;
                    }
                    if !hide_failed && complete {
                        if hide {
                            // Let the list settle between sequential
                            // actions on the same row.
                            tokio::time::sleep(self.settings.settle_wait).await;
                        }
                        completed = self.executor.complete(node).await;
                    }
                }

                // UI actions mutate the rendered list; never stamp this
                // row's outcome onto a node that now presents another
                // message.
                let intact = self.presents(node, &snap.id).await;

                if hide_failed {
                    warn!(id = %snap.id, "Hide failed after retries");
                    if intact {
                        self.mark(node, TerminalMarker::Error).await;
                    }
                    return;
                }

                let tag = match source {
                    DecisionSource::Keyword => {
                        if hidden {
                            ActionTag::Hidden
                        } else if completed {
                            ActionTag::Completed
                        } else {
                            ActionTag::Flagged
                        }
                    }
                    DecisionSource::Ai => {
                        if hidden {
                            ActionTag::Hidden
                        } else {
                            ActionTag::Flagged
                        }
                    }
                };
                let marker = match source {
                    DecisionSource::Keyword => TerminalMarker::DoneKeyword(tag),
                    DecisionSource::Ai => TerminalMarker::DoneAi(tag),
                };
                if intact {
                    self.mark(node, marker).await;
                } else {
                    // The message is gone from this node (it was hidden
                    // or the list shifted); the cache record below is
                    // the durable outcome. Clear anything we decorated.
                    let _ = node.clear_row_state().await;
                }

                ctx.stats.flagged += 1;
                if hidden {
                    ctx.stats.hidden += 1;
                }
                if completed {
                    ctx.stats.completed += 1;
                }

                cache
                    .record(
                        &snap.id,
                        ActionRecord::new(tag.recorded())
                            .with_category(category.clone())
                            .with_confidence(confidence)
                            .with_keyword(keyword),
                    )
                    .await;

                let event = LogEvent {
                    message_id: snap.id.clone(),
                    message_text: Some(snap.text.clone()),
                    platform: snap.platform.clone(),
                    action_taken: tag.recorded().as_str().to_string(),
                    source: source.as_str().to_string(),
                    category,
                    confidence: Some(confidence),
                };
                let sink = Arc::clone(&self.log_sink);
                tokio::spawn(async move {
                    if let Err(e) = sink.log_event(event).await {
                        debug!(error = %e, "Log event dropped");
                    }
                });
            }
        }
    }

    // ── Banner ──────────────────────────────────────────────────────

    /// Click through a "new messages" banner and continue the scan in
    /// place. Never aborts or restarts the scan.
    async fn handle_banner(&self) {
        let banner = match self.surface.new_messages_banner().await {
            Ok(Some(banner)) => banner,
            _ => return,
        };

        info!("New messages banner visible, clicking");
        let before = self.surface.list_signature().await.unwrap_or(0);
        if let Err(e) = banner.click().await {
            warn!(error = %e, "Banner click failed");
            return;
        }

        // Bounded wait for the list to restructure.
        let surface = Arc::clone(&self.surface);
        poll_until(self.settings.banner_wait, move || {
            let surface = Arc::clone(&surface);
            async move {
                surface
                    .list_signature()
                    .await
                    .map(|sig| sig != before)
                    .unwrap_or(false)
            }
        })
        .await;

        // Bounded wait for top-of-list timestamps to populate.
        let surface = Arc::clone(&self.surface);
        poll_until(self.settings.banner_wait, move || {
            let surface = Arc::clone(&surface);
            async move {
                let Ok(rows) = surface.rows().await else {
                    return false;
                };
                for node in rows.iter().take(3) {
                    if let Ok(snap) = node.snapshot().await {
                        if snap.kind.qualifies() {
                            return snap.timestamp.is_some();
                        }
                    }
                }
                false
            }
        })
        .await;

        self.session.refresh_config().await;
        self.session.open_replay_window().await;
    }
}

#[async_trait::async_trait]
impl ScanTrigger for ScanOrchestrator {
    async fn maybe_scan(&self) {
        ScanOrchestrator::maybe_scan(self).await;
    }
}
