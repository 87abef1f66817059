//! Control and menu-label matching.
//!
//! Host UI labels vary by platform and drift over time, so nothing here
//! assumes a single fixed selector. Hide menu items go through an ordered
//! three-tier matcher (known per-platform labels, then a "hide" prefix,
//! then a "hide" substring that excludes "unhide"); the row-level "more
//! actions" control is found by explicit attributes first and a generic
//! button-text heuristic second.

use regex::Regex;

use crate::surface::ControlDesc;

/// Known hide-menu labels per platform, already normalized.
const HIDE_LABELS: &[(&str, &[&str])] = &[
    ("facebook", &["hide comment", "hide reply"]),
    ("instagram", &["hide comment"]),
    ("twitter", &["hide reply"]),
    ("tiktok", &["hide", "hide comment"]),
    ("youtube", &["hide comment"]),
];

/// Labels matched on any platform.
const HIDE_LABELS_ANY: &[&str] = &["hide comment", "hide reply", "hide message"];

/// Normalized labels accepted for the mark-complete control.
const COMPLETE_LABELS: &[&str] = &["mark as complete", "mark complete", "complete", "done"];

/// Which tier matched a hide label. Ordered: earlier tiers win.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LabelTier {
    Exact,
    Prefix,
    Substring,
}

/// Lowercase and collapse internal whitespace.
pub fn normalize_label(raw: &str) -> String {
    raw.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Match a menu-item label against the hide vocabulary.
///
/// Tiers are tried in order; the first hit wins.
pub fn match_hide_label(platform: &str, label: &str) -> Option<LabelTier> {
    let normalized = normalize_label(label);
    if normalized.is_empty() {
        return None;
    }

    let platform = platform.to_lowercase();
    let platform_labels = HIDE_LABELS
        .iter()
        .find(|(p, _)| *p == platform)
        .map(|(_, labels)| *labels)
        .unwrap_or(&[]);

    if platform_labels.contains(&normalized.as_str())
        || HIDE_LABELS_ANY.contains(&normalized.as_str())
    {
        return Some(LabelTier::Exact);
    }
    if normalized.starts_with("hide") {
        return Some(LabelTier::Prefix);
    }
    if normalized.contains("hide") && !normalized.contains("unhide") {
        return Some(LabelTier::Substring);
    }
    None
}

/// Heuristic matcher for row-level controls.
pub struct ControlMatcher {
    more_pattern: Regex,
}

impl ControlMatcher {
    pub fn new() -> Self {
        Self {
            more_pattern: Regex::new(r"(?i)\b(more|options)\b").unwrap(),
        }
    }

    /// Locate the row's "more actions" overflow control.
    ///
    /// Tier 1: explicit automation attribute or aria-label. Tier 2:
    /// generic button-text heuristic.
    pub fn is_more_actions(&self, desc: &ControlDesc) -> bool {
        if let Some(id) = desc.automation_id.as_deref() {
            let id = id.to_lowercase();
            if id.contains("more-actions") || id.contains("overflow") {
                return true;
            }
        }
        if let Some(aria) = desc.aria_label.as_deref() {
            let normalized = normalize_label(aria);
            if normalized == "more actions" || normalized == "more options" {
                return true;
            }
            if self.more_pattern.is_match(&normalized) {
                return true;
            }
        }
        self.more_pattern.is_match(&desc.text)
    }

    /// Recognize a mark-complete toggle.
    pub fn is_complete_control(&self, desc: &ControlDesc) -> bool {
        if let Some(id) = desc.automation_id.as_deref() {
            if id.to_lowercase().contains("complete") {
                return true;
            }
        }
        let label = desc
            .aria_label
            .as_deref()
            .filter(|l| !l.trim().is_empty())
            .unwrap_or(&desc.text);
        COMPLETE_LABELS.contains(&normalize_label(label).as_str())
    }
}

impl Default for ControlMatcher {
    fn default() -> Self {
        Self::new()
    }
}
