//! Remote collaborator seams.
//!
//! The dashboard exposes five endpoints: config snapshots, the AI
//! classifier, the moderation log, the counter sink, and the watermark
//! store. Each is a trait here so the core can be driven by mocks in
//! tests; [`http::HttpRemote`] implements all of them against the real
//! API.

pub mod http;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::ModerationConfig;
use crate::error::RemoteError;

/// Request to the AI classifier.
#[derive(Debug, Clone, Serialize)]
pub struct ClassifyRequest {
    pub text: String,
    pub message_id: String,
    pub platform: String,
}

/// Classifier verdict for one message.
#[derive(Debug, Clone, Deserialize)]
pub struct ClassifyResponse {
    pub flagged: bool,
    #[serde(default)]
    pub highest_category: Option<String>,
    #[serde(default)]
    pub confidence: f32,
    /// Recommended action ("hide", "flag", ...).
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub should_complete: bool,
}

/// Fire-and-forget moderation log event.
#[derive(Debug, Clone, Serialize)]
pub struct LogEvent {
    pub message_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_text: Option<String>,
    pub platform: String,
    pub action_taken: String,
    /// "keyword" or "ai".
    pub source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
}

/// Cumulative session totals published to the dashboard.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct CounterTotals {
    pub total_processed: u64,
    pub flagged_total: u64,
    pub auto_hidden_total: u64,
    pub completed_total: u64,
}

/// Per-user moderation config endpoint.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    async fn fetch(&self, user_id: &str) -> Result<ModerationConfig, RemoteError>;
}

/// Remote AI classifier endpoint.
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(&self, request: &ClassifyRequest) -> Result<ClassifyResponse, RemoteError>;
}

/// Moderation log sink.
#[async_trait]
pub trait ModerationLog: Send + Sync {
    async fn log_event(&self, event: LogEvent) -> Result<(), RemoteError>;
}

/// Counter totals sink.
#[async_trait]
pub trait CounterSink: Send + Sync {
    async fn publish(&self, totals: CounterTotals) -> Result<(), RemoteError>;
}

/// Server-side high-water-mark store. The server only ever raises the
/// stored value.
#[async_trait]
pub trait WatermarkStore: Send + Sync {
    /// Fetch the stored watermark in seconds.
    async fn fetch(&self, user_id: &str) -> Result<u64, RemoteError>;

    async fn store(&self, user_id: &str, timestamp: u64) -> Result<(), RemoteError>;
}
