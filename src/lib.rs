//! mtlink: MTConnect machine telemetry collector
//!
//! Continuously polls MTConnect agents, joins `/current` stream values
//! against `/probe`-derived metadata, and produces one flat per-machine
//! snapshot, served over HTTP and published downstream as JSON keyed by
//! machine id.
//!
//! ## Architecture
//!
//! - **mtconnect**: fetch primitive plus probe/current document parsers
//! - **metadata**: the three index tables built from probe passes
//! - **mapper**: pure join of streams and indexes into snapshots
//! - **polling**: per-session poller tasks with clean start/stop
//! - **sessions**: the session pool driving metadata loads and pollers
//! - **api**: axum surface for session CRUD, polling control, snapshots

pub mod api;
pub mod config;
pub mod error;
pub mod mapper;
pub mod metadata;
pub mod mtconnect;
pub mod polling;
pub mod sessions;
pub mod sink;
pub mod store;
pub mod types;

// Re-export commonly used types
pub use config::AppConfig;
pub use error::CollectorError;
pub use types::{ConnectionInfo, ConnectionRequest, MachineSnapshot, Reported};
