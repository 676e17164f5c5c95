//! Session pool records and the HTTP request shapes that manage them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Body of `POST /api/v1/connect`.
#[derive(Debug, Clone, Deserialize)]
pub struct ConnectionRequest {
    #[serde(rename = "EndpointURL")]
    pub endpoint_url: String,
    #[serde(rename = "Model")]
    pub model: String,
    #[serde(rename = "Manufacturer", default)]
    pub manufacturer: String,
}

/// Body of requests addressing an existing session.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionRequest {
    #[serde(rename = "SessionID")]
    pub session_id: String,
}

/// Validated connection parameters. Manufacturer is the one resolved from the
/// probe, not the one declared in the request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionConfig {
    #[serde(rename = "EndpointURL")]
    pub endpoint_url: String,
    #[serde(rename = "Model")]
    pub model: String,
    #[serde(rename = "Manufacturer", skip_serializing_if = "String::is_empty")]
    pub manufacturer: String,
}

/// An active session in the pool.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionInfo {
    #[serde(rename = "SessionID")]
    pub session_id: String,

    /// Machine id resolved from the probe device name. Internal — consumers
    /// address machines through the snapshot API, not the session API.
    #[serde(skip)]
    pub machine_id: String,

    #[serde(rename = "Config")]
    pub config: ConnectionConfig,

    #[serde(rename = "CreatedAt")]
    pub created_at: DateTime<Utc>,

    #[serde(rename = "LastUsed")]
    pub last_used: DateTime<Utc>,

    #[serde(rename = "UseCount")]
    pub use_count: i64,

    #[serde(rename = "IsHealthy")]
    pub is_healthy: bool,
}
