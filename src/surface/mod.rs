//! Host-inbox surface seam.
//!
//! The engine never touches the host page directly. A surface adapter
//! implements these traits over the real DOM (or the in-memory simulator
//! in [`sim`]); the core consumes them. Read access covers per-row
//! attributes; write access is limited to clicking interactive controls,
//! tagging rows with markers, and appending a badge decoration.
//!
//! The host virtualizes its list: a [`RowNode`] is a recycled slot that
//! may present different messages over time. `node_key` identifies the
//! slot, `snapshot().id` identifies the message it currently presents.

pub mod labels;
pub mod sim;

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::SurfaceError;

/// Content type of a rendered row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RowKind {
    Comment,
    Reply,
    Mention,
    /// Anything else the host renders between messages (ads, separators,
    /// system notices).
    Other,
}

impl RowKind {
    /// Only content-bearing comment/reply/mention rows are moderated.
    pub fn qualifies(&self) -> bool {
        !matches!(self, RowKind::Other)
    }
}

/// Read-only attributes of one rendered message row.
#[derive(Debug, Clone)]
pub struct RowSnapshot {
    /// Stable message identifier assigned by the host.
    pub id: String,
    /// Message text payload.
    pub text: String,
    /// Source platform tag ("facebook", "instagram", ...).
    pub platform: String,
    /// Message timestamp in seconds. `None` when the host has not yet
    /// populated it for this row.
    pub timestamp: Option<u64>,
    /// True for messages the owning user sent (outbound).
    pub outbound: bool,
    pub kind: RowKind,
}

/// Observable attributes of an interactive control.
#[derive(Debug, Clone, Default)]
pub struct ControlDesc {
    /// Host automation attribute (data-testid or similar), when present.
    pub automation_id: Option<String>,
    pub aria_label: Option<String>,
    /// Visible label text.
    pub text: String,
    pub disabled: bool,
    /// Toggle controls report their active/pressed state here.
    pub pressed: bool,
}

/// A clickable control inside the host UI.
#[async_trait]
pub trait Control: Send + Sync {
    fn describe(&self) -> ControlDesc;

    async fn click(&self) -> Result<(), SurfaceError>;
}

/// One slot in the host's virtualized message list.
#[async_trait]
pub trait RowNode: Send + Sync {
    /// Identity of the underlying DOM node, stable across recycling.
    fn node_key(&self) -> u64;

    /// Read the attributes of the message this node currently presents.
    async fn snapshot(&self) -> Result<RowSnapshot, SurfaceError>;

    /// Raw terminal-marker tag on this node, if any.
    async fn marker(&self) -> Result<Option<String>, SurfaceError>;

    async fn set_marker(&self, marker: &str) -> Result<(), SurfaceError>;

    /// The message id this node presented when the engine last looked at
    /// it. Used to detect recycling.
    async fn presented_id(&self) -> Result<Option<String>, SurfaceError>;

    async fn set_presented_id(&self, id: &str) -> Result<(), SurfaceError>;

    /// Remove every engine-owned tag and decoration from this node
    /// (marker, presented id, badge).
    async fn clear_row_state(&self) -> Result<(), SurfaceError>;

    /// Append a badge decoration to the row.
    async fn apply_badge(&self, label: &str) -> Result<(), SurfaceError>;

    async fn scroll_into_view(&self) -> Result<(), SurfaceError>;

    /// Row-scoped interactive controls, in DOM order.
    async fn controls(&self) -> Result<Vec<Arc<dyn Control>>, SurfaceError>;

    /// Items of the currently open actions menu. Empty until the menu
    /// has rendered.
    async fn menu_items(&self) -> Result<Vec<Arc<dyn Control>>, SurfaceError>;

    /// Platform confirmation dialog control, when one is showing.
    async fn confirmation(&self) -> Result<Option<Arc<dyn Control>>, SurfaceError>;

    /// The row's mark-complete toggle, when present.
    async fn complete_control(&self) -> Result<Option<Arc<dyn Control>>, SurfaceError>;
}

/// The host's message list as a whole.
#[async_trait]
pub trait InboxSurface: Send + Sync {
    /// Currently rendered row nodes, in DOM order.
    async fn rows(&self) -> Result<Vec<Arc<dyn RowNode>>, SurfaceError>;

    /// Scroll the list back to its origin.
    async fn scroll_to_origin(&self) -> Result<(), SurfaceError>;

    /// Scroll the list forward one step.
    async fn advance(&self) -> Result<(), SurfaceError>;

    /// Structural signature of the rendered list. Changes whenever the
    /// set or order of rendered rows changes.
    async fn list_signature(&self) -> Result<u64, SurfaceError>;

    /// The "new messages" banner control, when visible.
    async fn new_messages_banner(&self) -> Result<Option<Arc<dyn Control>>, SurfaceError>;
}
