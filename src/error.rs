//! Collector error types.
//!
//! One error enum for the whole pipeline. Polling-path kinds (fetch, parse,
//! downstream) are logged inside the poller task and never propagate; the
//! registry and scheduler kinds surface to the HTTP caller.

use thiserror::Error;

/// Errors produced by the telemetry pipeline and its lifecycle operations.
#[derive(Debug, Error)]
pub enum CollectorError {
    /// Network or HTTP failure while fetching an MTConnect document.
    #[error("fetch failed for {url}: {message}")]
    Fetch { url: String, message: String },

    /// Malformed XML in a probe or current document.
    #[error("parse error: {0}")]
    Parse(String),

    /// Missing snapshot, session, or probe device.
    #[error("{0}")]
    NotFound(String),

    /// Duplicate session or duplicate polling start.
    #[error("{0}")]
    Conflict(String),

    /// Bad interval or malformed request input.
    #[error("{0}")]
    Validation(String),

    /// Downstream publish failure.
    #[error("downstream publish failed: {0}")]
    Downstream(String),
}

impl CollectorError {
    /// Build a fetch error naming the offending URL.
    pub fn fetch(url: impl Into<String>, message: impl ToString) -> Self {
        Self::Fetch {
            url: url.into(),
            message: message.to_string(),
        }
    }
}
