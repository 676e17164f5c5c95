//! HTTP API layer.
//!
//! Session management CRUD, polling lifecycle, and the per-machine snapshot
//! endpoint. Every error body is `{Status: "error", Message: ...}`.

mod handlers;
mod routes;

pub use routes::create_app;

use std::sync::Arc;

use crate::polling::PollingScheduler;
use crate::sessions::SessionRegistry;
use crate::store::SnapshotStore;

/// Shared state injected into every handler.
#[derive(Clone)]
pub struct ApiContext {
    pub sessions: Arc<SessionRegistry>,
    pub scheduler: Arc<PollingScheduler>,
    pub store: Arc<SnapshotStore>,
}
