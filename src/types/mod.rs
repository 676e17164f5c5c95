//! Core data types: machine snapshots, session records, reported values.

mod connection;
mod reported;
mod snapshot;

pub use connection::{ConnectionConfig, ConnectionInfo, ConnectionRequest, SessionRequest};
pub use reported::Reported;
pub use snapshot::{AxisReading, CurrentProgram, MachineSnapshot, UNAVAILABLE};
