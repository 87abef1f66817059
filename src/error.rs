//! Error types for inbox-warden.

use std::time::Duration;

/// Top-level error type for the engine.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Remote error: {0}")]
    Remote(#[from] RemoteError),

    #[error("Surface error: {0}")]
    Surface(#[from] SurfaceError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Local persistence errors. Corrupt blobs are absorbed by the cache
/// loader and never reach callers as errors.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Errors talking to the remote dashboard API (config, classifier, log,
/// counter, watermark endpoints).
#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    #[error("Request to {endpoint} failed: {reason}")]
    Transport { endpoint: String, reason: String },

    #[error("{endpoint} returned HTTP {status}")]
    Status { endpoint: String, status: u16 },

    #[error("Invalid response from {endpoint}: {reason}")]
    Protocol { endpoint: String, reason: String },

    #[error("{endpoint} still failing after {attempts} attempts")]
    Exhausted { endpoint: String, attempts: u32 },
}

/// Host-UI automation errors. These are transient by nature — the host
/// page re-renders continuously — and are retried or absorbed into a
/// terminal `error` marker, never propagated out of a scan.
#[derive(Debug, thiserror::Error)]
pub enum SurfaceError {
    #[error("Control not found: {what}")]
    ControlNotFound { what: String },

    #[error("Timed out after {timeout:?} waiting for {what}")]
    Timeout { what: String, timeout: Duration },

    #[error("Row node is no longer attached to the list")]
    Detached,

    #[error("Surface failure: {0}")]
    Other(String),
}

/// Result type alias for the engine.
pub type Result<T> = std::result::Result<T, Error>;
