//! In-memory snapshot store.
//!
//! Latest snapshot per machine id. Writers are the poller tasks (one set per
//! tick); readers are the snapshot API handlers. Each set replaces the whole
//! record atomically with respect to any get.

use std::collections::HashMap;
use std::sync::RwLock;
use tracing::warn;

use crate::types::MachineSnapshot;

/// Concurrent map from machine id to the latest snapshot.
#[derive(Debug, Default)]
pub struct SnapshotStore {
    data: RwLock<HashMap<String, MachineSnapshot>>,
}

impl SnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the stored snapshot for a machine.
    pub fn set(&self, machine_id: &str, snapshot: MachineSnapshot) {
        let mut data = self.data.write().unwrap_or_else(|e| {
            warn!("Snapshot store lock poisoned on write, recovering");
            e.into_inner()
        });
        data.insert(machine_id.to_string(), snapshot);
    }

    /// Defensive read of the latest snapshot for a machine.
    pub fn get(&self, machine_id: &str) -> Option<MachineSnapshot> {
        let data = self.data.read().unwrap_or_else(|e| {
            warn!("Snapshot store lock poisoned on read, recovering");
            e.into_inner()
        });
        data.get(machine_id).cloned()
    }
}
