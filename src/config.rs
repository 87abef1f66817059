//! Configuration types.
//!
//! Two layers:
//! - [`ModerationConfig`]: the per-user snapshot served by the dashboard
//!   (keyword rules, thresholds, feature flags). Loaded at session start,
//!   refreshed periodically, read-only to the core.
//! - [`EngineSettings`]: local tuning knobs (pass caps, retry budgets,
//!   backoff, intervals), defaulted and overridable via `WARDEN_*` env vars.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// A single keyword rule with its action-set.
///
/// Rules are evaluated in their configured order; the first literal
/// case-insensitive substring match wins.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeywordRule {
    /// Literal substring to match (case-insensitive).
    pub keyword: String,
    /// Show a badge decoration on matching rows.
    #[serde(default)]
    pub badge: bool,
    /// Hide matching rows regardless of the global auto-hide flag.
    #[serde(default)]
    pub auto_hide: bool,
    /// Mark matching rows complete regardless of the global flag.
    #[serde(default)]
    pub complete: bool,
    /// Inactive rules are skipped without being removed from the list.
    #[serde(default = "default_true")]
    pub active: bool,
}

fn default_true() -> bool {
    true
}

/// Per-category confidence threshold override.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryThreshold {
    pub category: String,
    pub threshold: f32,
}

/// Per-user moderation config snapshot from the dashboard.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModerationConfig {
    #[serde(default)]
    pub keywords: Vec<KeywordRule>,
    #[serde(default)]
    pub categories: Vec<CategoryThreshold>,
    /// Global confidence threshold for AI classifications.
    #[serde(default = "default_threshold")]
    pub threshold: f32,
    #[serde(default)]
    pub auto_hide_enabled: bool,
    #[serde(default)]
    pub auto_complete_enabled: bool,
    /// Classify and record, but never click hide/complete controls.
    #[serde(default)]
    pub dry_run_mode: bool,
    #[serde(default)]
    pub ai_model: String,
    #[serde(default)]
    pub user_id: String,
}

fn default_threshold() -> f32 {
    0.8
}

impl Default for ModerationConfig {
    fn default() -> Self {
        Self {
            keywords: Vec::new(),
            categories: Vec::new(),
            threshold: default_threshold(),
            auto_hide_enabled: false,
            auto_complete_enabled: false,
            dry_run_mode: false,
            ai_model: String::new(),
            user_id: String::new(),
        }
    }
}

impl ModerationConfig {
    /// Effective confidence threshold for a category.
    ///
    /// Falls back to the global threshold when the category has no
    /// override (or the response carried no category at all).
    pub fn threshold_for(&self, category: Option<&str>) -> f32 {
        category
            .and_then(|c| {
                self.categories
                    .iter()
                    .find(|t| t.category.eq_ignore_ascii_case(c))
                    .map(|t| t.threshold)
            })
            .unwrap_or(self.threshold)
    }
}

/// Local engine tuning. Bounds and budgets for the scan state machine;
/// all overridable through `WARDEN_*` environment variables.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Full-scan pass cap.
    pub full_pass_cap: u32,
    /// Visible-scan pass cap.
    pub visible_pass_cap: u32,
    /// Allowance for reclassifying uncached rows below the gate,
    /// per scan invocation.
    pub replay_budget: u32,
    /// How long after a banner click the replay budget may be spent.
    pub replay_window: Duration,
    /// Hide attempts before a row is marked `error`.
    pub hide_attempts: u32,
    /// Base delay for hide retries (jittered, doubled per attempt).
    pub hide_backoff_base: Duration,
    /// Relative jitter applied to every backoff delay (0.0..1.0).
    pub backoff_jitter: f64,
    /// Bounded wait for a menu or dialog to render.
    pub menu_wait: Duration,
    /// Bounded wait for a post-hide confirmation dialog; absence after
    /// this long means the platform does not confirm.
    pub confirm_wait: Duration,
    /// Settle wait after a scroll.
    pub settle_wait: Duration,
    /// Bounded wait for the list to restructure after a banner click.
    pub banner_wait: Duration,
    /// Trailing-edge debounce for mutation bursts.
    pub debounce: Duration,
    /// Poll-tick interval for the change detector.
    pub poll_interval: Duration,
    /// Config snapshot refresh interval.
    pub config_refresh_interval: Duration,
    /// Rows with fewer non-whitespace characters are treated as empty.
    pub min_text_chars: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            full_pass_cap: 80,
            visible_pass_cap: 40,
            replay_budget: 8,
            replay_window: Duration::from_secs(30),
            hide_attempts: 3,
            hide_backoff_base: Duration::from_millis(400),
            backoff_jitter: 0.5,
            menu_wait: Duration::from_millis(1500),
            confirm_wait: Duration::from_millis(500),
            settle_wait: Duration::from_millis(250),
            banner_wait: Duration::from_secs(5),
            debounce: Duration::from_millis(400),
            poll_interval: Duration::from_secs(20),
            config_refresh_interval: Duration::from_secs(300),
            min_text_chars: 2,
        }
    }
}

impl EngineSettings {
    /// Build settings from the environment, falling back to defaults for
    /// anything unset or unparseable.
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            full_pass_cap: env_u32("WARDEN_FULL_PASS_CAP", d.full_pass_cap),
            visible_pass_cap: env_u32("WARDEN_VISIBLE_PASS_CAP", d.visible_pass_cap),
            replay_budget: env_u32("WARDEN_REPLAY_BUDGET", d.replay_budget),
            replay_window: env_secs("WARDEN_REPLAY_WINDOW_SECS", d.replay_window),
            hide_attempts: env_u32("WARDEN_HIDE_ATTEMPTS", d.hide_attempts),
            hide_backoff_base: env_millis("WARDEN_HIDE_BACKOFF_MS", d.hide_backoff_base),
            backoff_jitter: d.backoff_jitter,
            menu_wait: env_millis("WARDEN_MENU_WAIT_MS", d.menu_wait),
            confirm_wait: env_millis("WARDEN_CONFIRM_WAIT_MS", d.confirm_wait),
            settle_wait: env_millis("WARDEN_SETTLE_WAIT_MS", d.settle_wait),
            banner_wait: env_secs("WARDEN_BANNER_WAIT_SECS", d.banner_wait),
            debounce: env_millis("WARDEN_DEBOUNCE_MS", d.debounce),
            poll_interval: env_secs("WARDEN_POLL_INTERVAL_SECS", d.poll_interval),
            config_refresh_interval: env_secs(
                "WARDEN_CONFIG_REFRESH_SECS",
                d.config_refresh_interval,
            ),
            min_text_chars: d.min_text_chars,
        }
    }
}

fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn env_secs(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .map(Duration::from_secs)
        .unwrap_or(default)
}

fn env_millis(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .map(Duration::from_millis)
        .unwrap_or(default)
}
