//! Moderation Decision Engine.
//!
//! Classifies one message against the current config snapshot. Keyword
//! rules run first, in their configured order, first literal
//! case-insensitive substring match wins; only when none match is the
//! remote classifier consulted. Classifier failures degrade to `clean`
//! rather than blocking or retrying inside the pass.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::config::ModerationConfig;
use crate::remote::{Classifier, ClassifyRequest};
use crate::surface::RowSnapshot;

/// Where a decision came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecisionSource {
    Keyword,
    Ai,
}

impl DecisionSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Keyword => "keyword",
            Self::Ai => "ai",
        }
    }
}

/// Outcome of deciding one message.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// Outbound message from the owning user; nothing to moderate.
    Sent,
    /// No usable text payload.
    Empty,
    /// Nothing matched, or the classifier declined to flag it.
    Clean,
    /// A rule or the classifier asked for action.
    Actionable {
        source: DecisionSource,
        /// Badge decoration to apply, when requested.
        badge: Option<String>,
        hide: bool,
        complete: bool,
        category: Option<String>,
        confidence: f32,
        keyword: Option<String>,
    },
}

/// Keyword-first, AI-fallback classifier for single messages.
pub struct DecisionEngine {
    classifier: Arc<dyn Classifier>,
    min_text_chars: usize,
}

impl DecisionEngine {
    pub fn new(classifier: Arc<dyn Classifier>, min_text_chars: usize) -> Self {
        Self {
            classifier,
            min_text_chars,
        }
    }

    /// Decide one message. Never fails: every error path collapses into
    /// a conservative decision.
    pub async fn decide(&self, row: &RowSnapshot, config: &ModerationConfig) -> Decision {
        if row.outbound {
            return Decision::Sent;
        }

        let visible_chars = row.text.chars().filter(|c| !c.is_whitespace()).count();
        if visible_chars < self.min_text_chars {
            return Decision::Empty;
        }

        if let Some(decision) = match_keywords(row, config) {
            return decision;
        }

        self.classify_remote(row, config).await
    }

    async fn classify_remote(&self, row: &RowSnapshot, config: &ModerationConfig) -> Decision {
        let request = ClassifyRequest {
            text: row.text.clone(),
            message_id: row.id.clone(),
            platform: row.platform.clone(),
        };

        let response = match self.classifier.classify(&request).await {
            Ok(response) => response,
            Err(e) => {
                warn!(id = %row.id, error = %e, "Classifier unavailable, treating as clean");
                return Decision::Clean;
            }
        };

        if !response.flagged {
            return Decision::Clean;
        }

        let threshold = config.threshold_for(response.highest_category.as_deref());
        if response.confidence < threshold {
            debug!(
                id = %row.id,
                confidence = response.confidence,
                threshold,
                "Flagged below threshold, treating as clean"
            );
            return Decision::Clean;
        }

        let hide = config.auto_hide_enabled && response.action.as_deref() == Some("hide");
        let complete = config.auto_complete_enabled && response.should_complete;
        let badge = response
            .highest_category
            .clone()
            .unwrap_or_else(|| "flagged".to_string());

        Decision::Actionable {
            source: DecisionSource::Ai,
            badge: Some(badge),
            hide,
            complete,
            category: response.highest_category,
            confidence: response.confidence,
            keyword: None,
        }
    }
}

/// First-match-wins keyword pass.
///
/// Rules run in their configured order, not sorted by specificity or
/// confidence. A match short-circuits the classifier entirely.
fn match_keywords(row: &RowSnapshot, config: &ModerationConfig) -> Option<Decision> {
    let text = row.text.to_lowercase();

    for rule in &config.keywords {
        if !rule.active || rule.keyword.is_empty() {
            continue;
        }
        if !text.contains(&rule.keyword.to_lowercase()) {
            continue;
        }

        let hide = rule.auto_hide || (rule.badge && config.auto_hide_enabled);
        let complete = rule.complete || (rule.badge && config.auto_complete_enabled);

        debug!(
            id = %row.id,
            keyword = %rule.keyword,
            hide,
            complete,
            "Keyword rule matched"
        );

        return Some(Decision::Actionable {
            source: DecisionSource::Keyword,
            badge: rule.badge.then(|| rule.keyword.clone()),
            hide,
            complete,
            category: None,
            confidence: 1.0,
            keyword: Some(rule.keyword.clone()),
        });
    }

    None
}
