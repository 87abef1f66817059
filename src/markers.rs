//! Row outcome vocabulary.
//!
//! [`RecordedAction`] is the closed set of outcomes the Action Cache
//! persists. [`TerminalMarker`] is the per-node tag the orchestrator
//! writes onto rows; a row carrying any terminal marker is never
//! reprocessed while that marker persists.

use serde::{Deserialize, Serialize};

/// Outcome of moderating one message, as persisted in the Action Cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordedAction {
    Clean,
    Sent,
    Flagged,
    Hidden,
    Completed,
    Empty,
}

impl RecordedAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Clean => "clean",
            Self::Sent => "sent",
            Self::Flagged => "flagged",
            Self::Hidden => "hidden",
            Self::Completed => "completed",
            Self::Empty => "empty",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "clean" => Some(Self::Clean),
            "sent" => Some(Self::Sent),
            "flagged" => Some(Self::Flagged),
            "hidden" => Some(Self::Hidden),
            "completed" => Some(Self::Completed),
            "empty" => Some(Self::Empty),
            _ => None,
        }
    }
}

/// Moderation action recorded by a `done-*` marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionTag {
    Hidden,
    Completed,
    Flagged,
}

impl ActionTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hidden => "hidden",
            Self::Completed => "completed",
            Self::Flagged => "flagged",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "hidden" => Some(Self::Hidden),
            "completed" => Some(Self::Completed),
            "flagged" => Some(Self::Flagged),
            _ => None,
        }
    }

    /// The cache record an action maps to.
    pub fn recorded(&self) -> RecordedAction {
        match self {
            Self::Hidden => RecordedAction::Hidden,
            Self::Completed => RecordedAction::Completed,
            Self::Flagged => RecordedAction::Flagged,
        }
    }
}

/// Per-row terminal state, written as an idempotent tag on the node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalMarker {
    /// Outbound message from the owning user; never classified.
    Sent,
    /// No usable text payload.
    Empty,
    /// Keyword rule produced this action.
    DoneKeyword(ActionTag),
    /// AI classification produced this action.
    DoneAi(ActionTag),
    /// Classified and found clean.
    DoneClean,
    /// UI automation exhausted its retries.
    Error,
    /// At/below the gate with no cached outcome and no replay budget.
    SkippedOld,
    /// Same message id already handled earlier in the pass.
    SkippedDup,
    /// The host never populated a timestamp for this row.
    SkippedNoTs,
    /// Cached outcome re-applied without reclassification.
    Restored(RecordedAction),
}

impl TerminalMarker {
    pub fn encode(&self) -> String {
        match self {
            Self::Sent => "sent".into(),
            Self::Empty => "empty".into(),
            Self::DoneKeyword(a) => format!("done-kw-{}", a.as_str()),
            Self::DoneAi(a) => format!("done-ai-{}", a.as_str()),
            Self::DoneClean => "done-clean".into(),
            Self::Error => "error".into(),
            Self::SkippedOld => "skipped-old".into(),
            Self::SkippedDup => "skipped-dup".into(),
            Self::SkippedNoTs => "skipped-no-ts".into(),
            Self::Restored(a) => format!("restored-{}", a.as_str()),
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "sent" => return Some(Self::Sent),
            "empty" => return Some(Self::Empty),
            "done-clean" => return Some(Self::DoneClean),
            "error" => return Some(Self::Error),
            "skipped-old" => return Some(Self::SkippedOld),
            "skipped-dup" => return Some(Self::SkippedDup),
            "skipped-no-ts" => return Some(Self::SkippedNoTs),
            _ => {}
        }
        if let Some(rest) = s.strip_prefix("done-kw-") {
            return ActionTag::parse(rest).map(Self::DoneKeyword);
        }
        if let Some(rest) = s.strip_prefix("done-ai-") {
            return ActionTag::parse(rest).map(Self::DoneAi);
        }
        if let Some(rest) = s.strip_prefix("restored-") {
            return RecordedAction::parse(rest).map(Self::Restored);
        }
        None
    }
}
