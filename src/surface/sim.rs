//! In-memory simulated inbox.
//!
//! Behaves like the host's virtualized list: a fixed window of node
//! slots renders a moving view over the message list, so the same slot
//! presents different messages as the view scrolls or rows disappear.
//! Engine-owned state (markers, presented ids, badges) sticks to the
//! *slot*, exactly like attributes on a recycled DOM node, which makes
//! stale-state leaks reproducible in tests.
//!
//! Used by the integration suite and by the binary's harness mode; the
//! production host adapter lives outside this crate.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::SurfaceError;
use crate::surface::{Control, ControlDesc, InboxSurface, RowKind, RowNode, RowSnapshot};

/// One scripted message in the simulated list.
#[derive(Debug, Clone)]
pub struct SimMessage {
    pub id: String,
    pub text: String,
    pub platform: String,
    pub timestamp: Option<u64>,
    pub outbound: bool,
    pub kind: RowKind,
    /// The actions menu fails to render this many times before opening.
    pub hide_failures: u32,
    /// Platform shows a confirmation dialog before hiding.
    pub has_confirmation: bool,
    /// Row exposes a mark-complete toggle.
    pub completable: bool,
    /// Toggle starts in the active/pressed state.
    pub completed: bool,
}

impl SimMessage {
    pub fn new(id: &str, text: &str, platform: &str, timestamp: u64) -> Self {
        Self {
            id: id.to_string(),
            text: text.to_string(),
            platform: platform.to_string(),
            timestamp: Some(timestamp),
            outbound: false,
            kind: RowKind::Comment,
            hide_failures: 0,
            has_confirmation: false,
            completable: true,
            completed: false,
        }
    }

    pub fn outbound(mut self) -> Self {
        self.outbound = true;
        self
    }

    pub fn kind(mut self, kind: RowKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn without_timestamp(mut self) -> Self {
        self.timestamp = None;
        self
    }

    pub fn failing_menu(mut self, times: u32) -> Self {
        self.hide_failures = times;
        self
    }

    pub fn with_confirmation(mut self) -> Self {
        self.has_confirmation = true;
        self
    }

    pub fn already_completed(mut self) -> Self {
        self.completed = true;
        self
    }
}

/// Live per-message state.
#[derive(Debug, Clone)]
struct MessageState {
    msg: SimMessage,
    hidden: bool,
    menu_open: bool,
    confirm_open: bool,
}

/// Engine-owned state on a node slot. Survives recycling on purpose.
#[derive(Debug, Clone, Default)]
pub struct SlotState {
    pub marker: Option<String>,
    pub presented_id: Option<String>,
    pub badge: Option<String>,
}

#[derive(Debug, Default)]
struct SimCounters {
    menu_clicks: u32,
    hide_item_clicks: u32,
    complete_clicks: u32,
    origin_scrolls: u32,
}

struct SimState {
    messages: Vec<MessageState>,
    pending_banner: Vec<SimMessage>,
    slots: Vec<SlotState>,
    offset: usize,
    window: usize,
    counters: SimCounters,
}

impl SimState {
    /// Indices of non-hidden messages, in list order.
    fn visible(&self) -> Vec<usize> {
        self.messages
            .iter()
            .enumerate()
            .filter(|(_, m)| !m.hidden)
            .map(|(i, _)| i)
            .collect()
    }

    /// Message index rendered by a slot, if the slot is populated.
    fn message_at_slot(&self, slot: usize) -> Option<usize> {
        self.visible().get(self.offset + slot).copied().filter(|_| slot < self.window)
    }

    fn rendered_len(&self) -> usize {
        let visible = self.visible().len();
        visible.saturating_sub(self.offset).min(self.window)
    }

    fn find_message(&mut self, id: &str) -> Option<&mut MessageState> {
        self.messages.iter_mut().find(|m| m.msg.id == id)
    }

    fn signature(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.offset.hash(&mut hasher);
        for slot in 0..self.rendered_len() {
            if let Some(idx) = self.message_at_slot(slot) {
                self.messages[idx].msg.id.hash(&mut hasher);
            }
        }
        hasher.finish()
    }
}

/// Handle to the simulated inbox. Cheap to clone.
#[derive(Clone)]
pub struct SimInbox {
    state: Arc<Mutex<SimState>>,
}

impl SimInbox {
    /// New empty inbox rendering `window` rows at a time.
    pub fn new(window: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(SimState {
                messages: Vec::new(),
                pending_banner: Vec::new(),
                slots: vec![SlotState::default(); window],
                offset: 0,
                window,
                counters: SimCounters::default(),
            })),
        }
    }

    /// Append a message to the end of the list.
    pub async fn push_message(&self, msg: SimMessage) {
        self.state.lock().await.messages.push(MessageState {
            msg,
            hidden: false,
            menu_open: false,
            confirm_open: false,
        });
    }

    /// Stage messages behind a "new messages" banner; they join the top
    /// of the list when the banner is clicked.
    pub async fn stage_banner(&self, msgs: Vec<SimMessage>) {
        self.state.lock().await.pending_banner.extend(msgs);
    }

    /// Remove a message outright, shifting the list under the nodes.
    pub async fn remove_message(&self, id: &str) {
        self.state.lock().await.messages.retain(|m| m.msg.id != id);
    }

    pub async fn hidden_ids(&self) -> Vec<String> {
        self.state
            .lock()
            .await
            .messages
            .iter()
            .filter(|m| m.hidden)
            .map(|m| m.msg.id.clone())
            .collect()
    }

    pub async fn completed_ids(&self) -> Vec<String> {
        self.state
            .lock()
            .await
            .messages
            .iter()
            .filter(|m| m.msg.completed)
            .map(|m| m.msg.id.clone())
            .collect()
    }

    pub async fn slot_states(&self) -> Vec<SlotState> {
        self.state.lock().await.slots.clone()
    }

    /// How many times a hide menu item was actually clicked.
    pub async fn hide_item_clicks(&self) -> u32 {
        self.state.lock().await.counters.hide_item_clicks
    }

    pub async fn menu_clicks(&self) -> u32 {
        self.state.lock().await.counters.menu_clicks
    }

    pub async fn complete_clicks(&self) -> u32 {
        self.state.lock().await.counters.complete_clicks
    }

    /// How many times the list was scrolled back to its origin. Each
    /// full scan does this exactly once.
    pub async fn origin_scrolls(&self) -> u32 {
        self.state.lock().await.counters.origin_scrolls
    }
}

// ── Controls ────────────────────────────────────────────────────────

enum ControlTarget {
    MoreActions { id: String },
    HideItem { id: String },
    MenuNoise,
    Confirm { id: String },
    CompleteToggle { id: String },
    Banner,
}

struct SimControl {
    state: Arc<Mutex<SimState>>,
    target: ControlTarget,
    desc: ControlDesc,
}

#[async_trait]
impl Control for SimControl {
    fn describe(&self) -> ControlDesc {
        self.desc.clone()
    }

    async fn click(&self) -> Result<(), SurfaceError> {
        let mut state = self.state.lock().await;
        match &self.target {
            ControlTarget::MoreActions { id } => {
                state.counters.menu_clicks += 1;
                let Some(message) = state.find_message(id) else {
                    return Err(SurfaceError::Detached);
                };
                if message.msg.hide_failures > 0 {
                    // Menu silently fails to render this time.
                    message.msg.hide_failures -= 1;
                } else {
                    message.menu_open = true;
                }
                Ok(())
            }
            ControlTarget::HideItem { id } => {
                state.counters.hide_item_clicks += 1;
                let Some(message) = state.find_message(id) else {
                    return Err(SurfaceError::Detached);
                };
                message.menu_open = false;
                if message.msg.has_confirmation {
                    message.confirm_open = true;
                } else {
                    message.hidden = true;
                }
                Ok(())
            }
            ControlTarget::MenuNoise => Ok(()),
            ControlTarget::Confirm { id } => {
                let Some(message) = state.find_message(id) else {
                    return Err(SurfaceError::Detached);
                };
                message.confirm_open = false;
                message.hidden = true;
                Ok(())
            }
            ControlTarget::CompleteToggle { id } => {
                state.counters.complete_clicks += 1;
                let Some(message) = state.find_message(id) else {
                    return Err(SurfaceError::Detached);
                };
                // Clicking a pressed toggle un-marks it, like the host.
                message.msg.completed = !message.msg.completed;
                Ok(())
            }
            ControlTarget::Banner => {
                let pending: Vec<SimMessage> = state.pending_banner.drain(..).collect();
                for msg in pending.into_iter().rev() {
                    state.messages.insert(
                        0,
                        MessageState {
                            msg,
                            hidden: false,
                            menu_open: false,
                            confirm_open: false,
                        },
                    );
                }
                state.offset = 0;
                Ok(())
            }
        }
    }
}

// ── Row nodes ───────────────────────────────────────────────────────

struct SimRowNode {
    state: Arc<Mutex<SimState>>,
    slot: usize,
}

impl SimRowNode {
    async fn current_message_id(&self) -> Result<String, SurfaceError> {
        let state = self.state.lock().await;
        state
            .message_at_slot(self.slot)
            .map(|idx| state.messages[idx].msg.id.clone())
            .ok_or(SurfaceError::Detached)
    }

    fn control(
        &self,
        state: &Arc<Mutex<SimState>>,
        target: ControlTarget,
        desc: ControlDesc,
    ) -> Arc<dyn Control> {
        Arc::new(SimControl {
            state: Arc::clone(state),
            target,
            desc,
        })
    }
}

#[async_trait]
impl RowNode for SimRowNode {
    fn node_key(&self) -> u64 {
        self.slot as u64
    }

    async fn snapshot(&self) -> Result<RowSnapshot, SurfaceError> {
        let state = self.state.lock().await;
        let idx = state
            .message_at_slot(self.slot)
            .ok_or(SurfaceError::Detached)?;
        let msg = &state.messages[idx].msg;
        Ok(RowSnapshot {
            id: msg.id.clone(),
            text: msg.text.clone(),
            platform: msg.platform.clone(),
            timestamp: msg.timestamp,
            outbound: msg.outbound,
            kind: msg.kind,
        })
    }

    async fn marker(&self) -> Result<Option<String>, SurfaceError> {
        Ok(self.state.lock().await.slots[self.slot].marker.clone())
    }

    async fn set_marker(&self, marker: &str) -> Result<(), SurfaceError> {
        self.state.lock().await.slots[self.slot].marker = Some(marker.to_string());
        Ok(())
    }

    async fn presented_id(&self) -> Result<Option<String>, SurfaceError> {
        Ok(self.state.lock().await.slots[self.slot].presented_id.clone())
    }

    async fn set_presented_id(&self, id: &str) -> Result<(), SurfaceError> {
        self.state.lock().await.slots[self.slot].presented_id = Some(id.to_string());
        Ok(())
    }

    async fn clear_row_state(&self) -> Result<(), SurfaceError> {
        self.state.lock().await.slots[self.slot] = SlotState::default();
        Ok(())
    }

    async fn apply_badge(&self, label: &str) -> Result<(), SurfaceError> {
        self.state.lock().await.slots[self.slot].badge = Some(label.to_string());
        Ok(())
    }

    async fn scroll_into_view(&self) -> Result<(), SurfaceError> {
        Ok(())
    }

    async fn controls(&self) -> Result<Vec<Arc<dyn Control>>, SurfaceError> {
        let id = self.current_message_id().await?;
        Ok(vec![
            self.control(
                &self.state,
                ControlTarget::MenuNoise,
                ControlDesc {
                    text: "Reply".into(),
                    ..Default::default()
                },
            ),
            self.control(
                &self.state,
                ControlTarget::MoreActions { id },
                ControlDesc {
                    aria_label: Some("More actions".into()),
                    text: "⋯".into(),
                    ..Default::default()
                },
            ),
        ])
    }

    async fn menu_items(&self) -> Result<Vec<Arc<dyn Control>>, SurfaceError> {
        let id = self.current_message_id().await?;
        let (open, platform) = {
            let mut state = self.state.lock().await;
            let Some(message) = state.find_message(&id) else {
                return Err(SurfaceError::Detached);
            };
            (message.menu_open, message.msg.platform.clone())
        };
        if !open {
            return Ok(Vec::new());
        }

        let hide_label = match platform.as_str() {
            "twitter" => "Hide reply",
            _ => "Hide comment",
        };
        Ok(vec![
            self.control(
                &self.state,
                ControlTarget::MenuNoise,
                ControlDesc {
                    text: "Report".into(),
                    ..Default::default()
                },
            ),
            self.control(
                &self.state,
                ControlTarget::HideItem { id },
                ControlDesc {
                    text: hide_label.into(),
                    ..Default::default()
                },
            ),
            self.control(
                &self.state,
                ControlTarget::MenuNoise,
                ControlDesc {
                    text: "Copy link".into(),
                    ..Default::default()
                },
            ),
        ])
    }

    async fn confirmation(&self) -> Result<Option<Arc<dyn Control>>, SurfaceError> {
        let id = self.current_message_id().await?;
        let open = {
            let mut state = self.state.lock().await;
            match state.find_message(&id) {
                Some(message) => message.confirm_open,
                None => return Err(SurfaceError::Detached),
            }
        };
        if !open {
            return Ok(None);
        }
        Ok(Some(self.control(
            &self.state,
            ControlTarget::Confirm { id },
            ControlDesc {
                text: "Hide".into(),
                ..Default::default()
            },
        )))
    }

    async fn complete_control(&self) -> Result<Option<Arc<dyn Control>>, SurfaceError> {
        let id = self.current_message_id().await?;
        let (completable, completed) = {
            let mut state = self.state.lock().await;
            match state.find_message(&id) {
                Some(message) => (message.msg.completable, message.msg.completed),
                None => return Err(SurfaceError::Detached),
            }
        };
        if !completable {
            return Ok(None);
        }
        Ok(Some(self.control(
            &self.state,
            ControlTarget::CompleteToggle { id },
            ControlDesc {
                automation_id: Some("thread-complete-toggle".into()),
                text: "Mark as complete".into(),
                pressed: completed,
                ..Default::default()
            },
        )))
    }
}

// ── Surface ─────────────────────────────────────────────────────────

#[async_trait]
impl InboxSurface for SimInbox {
    async fn rows(&self) -> Result<Vec<Arc<dyn RowNode>>, SurfaceError> {
        let rendered = self.state.lock().await.rendered_len();
        Ok((0..rendered)
            .map(|slot| {
                Arc::new(SimRowNode {
                    state: Arc::clone(&self.state),
                    slot,
                }) as Arc<dyn RowNode>
            })
            .collect())
    }

    async fn scroll_to_origin(&self) -> Result<(), SurfaceError> {
        let mut state = self.state.lock().await;
        state.counters.origin_scrolls += 1;
        state.offset = 0;
        Ok(())
    }

    async fn advance(&self) -> Result<(), SurfaceError> {
        let mut state = self.state.lock().await;
        let visible = state.visible().len();
        let max_offset = visible.saturating_sub(state.window);
        state.offset = (state.offset + state.window).min(max_offset);
        Ok(())
    }

    async fn list_signature(&self) -> Result<u64, SurfaceError> {
        Ok(self.state.lock().await.signature())
    }

    async fn new_messages_banner(&self) -> Result<Option<Arc<dyn Control>>, SurfaceError> {
        let state = self.state.lock().await;
        if state.pending_banner.is_empty() {
            return Ok(None);
        }
        Ok(Some(Arc::new(SimControl {
            state: Arc::clone(&self.state),
            target: ControlTarget::Banner,
            desc: ControlDesc {
                text: "New messages".into(),
                ..Default::default()
            },
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn window_limits_rendered_rows() {
        let inbox = SimInbox::new(2);
        for i in 0..5u64 {
            inbox
                .push_message(SimMessage::new(&format!("m-{i}"), "text", "facebook", 100 + i))
                .await;
        }

        let rows = inbox.rows().await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].snapshot().await.unwrap().id, "m-0");
    }

    #[tokio::test]
    async fn advance_pages_through_the_list() {
        let inbox = SimInbox::new(2);
        for i in 0..5u64 {
            inbox
                .push_message(SimMessage::new(&format!("m-{i}"), "text", "facebook", 100 + i))
                .await;
        }

        inbox.advance().await.unwrap();
        let rows = inbox.rows().await.unwrap();
        assert_eq!(rows[0].snapshot().await.unwrap().id, "m-2");

        // Advancing past the end clamps and stops changing the signature.
        inbox.advance().await.unwrap();
        let sig = inbox.list_signature().await.unwrap();
        inbox.advance().await.unwrap();
        assert_eq!(inbox.list_signature().await.unwrap(), sig);
    }

    #[tokio::test]
    async fn slot_state_survives_recycling() {
        let inbox = SimInbox::new(1);
        inbox
            .push_message(SimMessage::new("m-0", "first", "facebook", 100))
            .await;
        inbox
            .push_message(SimMessage::new("m-1", "second", "facebook", 101))
            .await;

        let rows = inbox.rows().await.unwrap();
        rows[0].set_marker("done-clean").await.unwrap();
        rows[0].set_presented_id("m-0").await.unwrap();

        // The underlying message disappears; the slot now presents m-1
        // but still carries m-0's marker.
        inbox.remove_message("m-0").await;
        let rows = inbox.rows().await.unwrap();
        assert_eq!(rows[0].snapshot().await.unwrap().id, "m-1");
        assert_eq!(rows[0].marker().await.unwrap().as_deref(), Some("done-clean"));
        assert_eq!(rows[0].presented_id().await.unwrap().as_deref(), Some("m-0"));
    }

    #[tokio::test]
    async fn hide_flow_with_menu() {
        let inbox = SimInbox::new(3);
        inbox
            .push_message(SimMessage::new("m-0", "text", "facebook", 100))
            .await;

        let rows = inbox.rows().await.unwrap();
        assert!(rows[0].menu_items().await.unwrap().is_empty());

        let controls = rows[0].controls().await.unwrap();
        let more = &controls[1];
        more.click().await.unwrap();

        let items = rows[0].menu_items().await.unwrap();
        let hide = items
            .iter()
            .find(|c| c.describe().text.to_lowercase().contains("hide"))
            .unwrap();
        hide.click().await.unwrap();

        assert_eq!(inbox.hidden_ids().await, vec!["m-0".to_string()]);
        assert_eq!(inbox.hide_item_clicks().await, 1);
    }

    #[tokio::test]
    async fn failing_menu_needs_repeat_clicks() {
        let inbox = SimInbox::new(1);
        inbox
            .push_message(SimMessage::new("m-0", "text", "facebook", 100).failing_menu(2))
            .await;

        let rows = inbox.rows().await.unwrap();
        let controls = rows[0].controls().await.unwrap();
        let more = &controls[1];

        more.click().await.unwrap();
        assert!(rows[0].menu_items().await.unwrap().is_empty());
        more.click().await.unwrap();
        assert!(rows[0].menu_items().await.unwrap().is_empty());
        more.click().await.unwrap();
        assert!(!rows[0].menu_items().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn banner_prepends_staged_messages() {
        let inbox = SimInbox::new(4);
        inbox
            .push_message(SimMessage::new("m-0", "old", "facebook", 100))
            .await;
        assert!(inbox.new_messages_banner().await.unwrap().is_none());

        inbox
            .stage_banner(vec![
                SimMessage::new("m-1", "new", "facebook", 200),
                SimMessage::new("m-2", "newer", "facebook", 201),
            ])
            .await;

        let sig_before = inbox.list_signature().await.unwrap();
        let banner = inbox.new_messages_banner().await.unwrap().unwrap();
        banner.click().await.unwrap();

        assert_ne!(inbox.list_signature().await.unwrap(), sig_before);
        assert!(inbox.new_messages_banner().await.unwrap().is_none());

        let rows = inbox.rows().await.unwrap();
        let ids: Vec<String> = vec![
            rows[0].snapshot().await.unwrap().id,
            rows[1].snapshot().await.unwrap().id,
            rows[2].snapshot().await.unwrap().id,
        ];
        assert_eq!(ids, vec!["m-1", "m-2", "m-0"]);
    }

    #[tokio::test]
    async fn complete_toggle_reports_pressed_state() {
        let inbox = SimInbox::new(1);
        inbox
            .push_message(SimMessage::new("m-0", "text", "facebook", 100).already_completed())
            .await;

        let rows = inbox.rows().await.unwrap();
        let toggle = rows[0].complete_control().await.unwrap().unwrap();
        assert!(toggle.describe().pressed);

        // Clicking a pressed toggle would un-mark it.
        toggle.click().await.unwrap();
        assert!(inbox.completed_ids().await.is_empty());
    }
}
