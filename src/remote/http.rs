//! reqwest-backed implementation of the dashboard API.
//!
//! One client covers all five collaborators. GETs and POSTs are retried
//! on network errors and 5xx with exponential backoff plus jitter; 4xx
//! returns immediately (retrying a rejected payload cannot help).

use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::ModerationConfig;
use crate::error::RemoteError;
use crate::remote::{
    Classifier, ClassifyRequest, ClassifyResponse, ConfigStore, CounterSink, CounterTotals,
    LogEvent, ModerationLog, WatermarkStore,
};

/// Default attempt budget per request.
const DEFAULT_ATTEMPTS: u32 = 3;

/// Base delay between attempts.
const DEFAULT_BACKOFF: Duration = Duration::from_millis(500);

/// HTTP backend for every remote collaborator.
pub struct HttpRemote {
    client: reqwest::Client,
    base_url: String,
    token: Option<SecretString>,
    attempts: u32,
    backoff_base: Duration,
    jitter: f64,
}

impl HttpRemote {
    pub fn new(base_url: impl Into<String>, token: Option<SecretString>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
            attempts: DEFAULT_ATTEMPTS,
            backoff_base: DEFAULT_BACKOFF,
            jitter: 0.5,
        }
    }

    /// Override the retry budget and backoff base.
    pub fn with_retry(mut self, attempts: u32, backoff_base: Duration) -> Self {
        self.attempts = attempts.max(1);
        self.backoff_base = backoff_base;
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => req.bearer_auth(token.expose_secret()),
            None => req,
        }
    }

    /// Delay before the next attempt: exponential with relative jitter.
    fn backoff_delay(&self, attempt: u32) -> Duration {
        let base = self.backoff_base.as_millis() as u64;
        let exp = base.saturating_mul(1 << attempt.min(4));
        let jittered = {
            let mut rng = rand::thread_rng();
            exp as f64 * (1.0 + rng.gen_range(0.0..self.jitter))
        };
        Duration::from_millis(jittered as u64)
    }

    /// Send a request, retrying on network errors and 5xx.
    ///
    /// `build` is called once per attempt; request builders are not
    /// reusable after `send`.
    async fn send_with_retry<B>(
        &self,
        endpoint: &str,
        build: B,
    ) -> Result<reqwest::Response, RemoteError>
    where
        B: Fn() -> reqwest::RequestBuilder + Send,
    {
        for attempt in 0..self.attempts {
            let last = attempt + 1 == self.attempts;
            match self.authorize(build()).send().await {
                Ok(resp) if resp.status().is_success() => return Ok(resp),
                Ok(resp) if resp.status().is_server_error() && !last => {
                    let delay = self.backoff_delay(attempt);
                    warn!(
                        endpoint,
                        status = resp.status().as_u16(),
                        attempt = attempt + 1,
                        attempts = self.attempts,
                        "Server error, retrying in {delay:?}"
                    );
                    tokio::time::sleep(delay).await;
                }
                Ok(resp) => {
                    return Err(RemoteError::Status {
                        endpoint: endpoint.to_string(),
                        status: resp.status().as_u16(),
                    });
                }
                Err(e) if !last => {
                    let delay = self.backoff_delay(attempt);
                    warn!(
                        endpoint,
                        error = %e,
                        attempt = attempt + 1,
                        attempts = self.attempts,
                        "Request failed, retrying in {delay:?}"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    return Err(RemoteError::Transport {
                        endpoint: endpoint.to_string(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        Err(RemoteError::Exhausted {
            endpoint: endpoint.to_string(),
            attempts: self.attempts,
        })
    }

    async fn parse_json<T: for<'de> Deserialize<'de>>(
        endpoint: &str,
        resp: reqwest::Response,
    ) -> Result<T, RemoteError> {
        resp.json::<T>().await.map_err(|e| RemoteError::Protocol {
            endpoint: endpoint.to_string(),
            reason: e.to_string(),
        })
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct WatermarkPayload {
    #[serde(default)]
    user_id: Option<String>,
    last_checked_timestamp: u64,
}

#[async_trait]
impl ConfigStore for HttpRemote {
    async fn fetch(&self, user_id: &str) -> Result<ModerationConfig, RemoteError> {
        let endpoint = "/api/config";
        let resp = self
            .send_with_retry(endpoint, || {
                self.client
                    .get(self.url(endpoint))
                    .query(&[("user_id", user_id)])
            })
            .await?;
        Self::parse_json(endpoint, resp).await
    }
}

#[async_trait]
impl Classifier for HttpRemote {
    async fn classify(&self, request: &ClassifyRequest) -> Result<ClassifyResponse, RemoteError> {
        let endpoint = "/api/classify";
        let resp = self
            .send_with_retry(endpoint, || {
                self.client.post(self.url(endpoint)).json(request)
            })
            .await?;
        Self::parse_json(endpoint, resp).await
    }
}

#[async_trait]
impl ModerationLog for HttpRemote {
    async fn log_event(&self, event: LogEvent) -> Result<(), RemoteError> {
        let endpoint = "/api/log";
        self.send_with_retry(endpoint, || {
            self.client.post(self.url(endpoint)).json(&event)
        })
        .await?;
        Ok(())
    }
}

#[async_trait]
impl CounterSink for HttpRemote {
    async fn publish(&self, totals: CounterTotals) -> Result<(), RemoteError> {
        let endpoint = "/api/counters";
        self.send_with_retry(endpoint, || {
            self.client.post(self.url(endpoint)).json(&totals)
        })
        .await?;
        Ok(())
    }
}

#[async_trait]
impl WatermarkStore for HttpRemote {
    async fn fetch(&self, user_id: &str) -> Result<u64, RemoteError> {
        let endpoint = "/api/last-checked";
        let resp = self
            .send_with_retry(endpoint, || {
                self.client
                    .get(self.url(endpoint))
                    .query(&[("user_id", user_id)])
            })
            .await?;
        let payload: WatermarkPayload = Self::parse_json(endpoint, resp).await?;
        Ok(payload.last_checked_timestamp)
    }

    async fn store(&self, user_id: &str, timestamp: u64) -> Result<(), RemoteError> {
        let endpoint = "/api/last-checked";
        self.send_with_retry(endpoint, || {
            self.client
                .post(self.url(endpoint))
                .json(&WatermarkPayload {
                    user_id: Some(user_id.to_string()),
                    last_checked_timestamp: timestamp,
                })
        })
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_trailing_slash_trimmed() {
        let remote = HttpRemote::new("https://api.example.com/", None);
        assert_eq!(remote.url("/api/config"), "https://api.example.com/api/config");
    }

    #[test]
    fn backoff_grows_with_attempts() {
        let remote =
            HttpRemote::new("https://api.example.com", None).with_retry(3, Duration::from_millis(100));
        let first = remote.backoff_delay(0);
        let third = remote.backoff_delay(2);
        // Jitter is additive only, so the exponential floor holds.
        assert!(first >= Duration::from_millis(100));
        assert!(third >= Duration::from_millis(400));
        assert!(third <= Duration::from_millis(600));
    }

    #[test]
    fn classify_request_wire_shape() {
        let req = ClassifyRequest {
            text: "spam text".into(),
            message_id: "m-1".into(),
            platform: "facebook".into(),
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["text"], "spam text");
        assert_eq!(json["message_id"], "m-1");
        assert_eq!(json["platform"], "facebook");
    }

    #[test]
    fn classify_response_defaults() {
        let resp: ClassifyResponse = serde_json::from_str(r#"{"flagged": false}"#).unwrap();
        assert!(!resp.flagged);
        assert!(resp.highest_category.is_none());
        assert_eq!(resp.confidence, 0.0);
        assert!(!resp.should_complete);
    }

    #[test]
    fn log_event_omits_empty_optionals() {
        let event = LogEvent {
            message_id: "m-2".into(),
            message_text: None,
            platform: "instagram".into(),
            action_taken: "hidden".into(),
            source: "keyword".into(),
            category: None,
            confidence: None,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert!(json.get("message_text").is_none());
        assert!(json.get("category").is_none());
        assert_eq!(json["source"], "keyword");
    }
}
