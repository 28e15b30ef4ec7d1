// Transport Snapshot
// Immutable view of one transport handed to presentation layers

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use thiserror::Error;

use super::model::{DeviceEntry, DeviceId, DeviceState, TransportKind, TransportState};

/// Errors from snapshot export/import
#[derive(Debug, Clone, Error)]
pub enum SnapshotError {
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Summary suitable for a status badge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionStatus {
    Connected,
    Connecting,
    Disconnected,
    Error,
}

/// Ordered list of entries plus the transport state, at one revision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransportSnapshot {
    kind: TransportKind,
    state: TransportState,
    devices: Vec<DeviceEntry>,
    revision: u64,
    taken_at: DateTime<Utc>,
}

impl TransportSnapshot {
    pub(crate) fn new(
        kind: TransportKind,
        state: TransportState,
        mut devices: Vec<DeviceEntry>,
        revision: u64,
    ) -> Self {
        devices.sort_by(|a, b| {
            (display_rank(a.state()), Reverse(a.signal()), a.id())
                .cmp(&(display_rank(b.state()), Reverse(b.signal()), b.id()))
        });
        Self {
            kind,
            state,
            devices,
            revision,
            taken_at: Utc::now(),
        }
    }

    /// Empty snapshot for a transport that has not published yet
    pub fn empty(kind: TransportKind, state: TransportState) -> Self {
        Self::new(kind, state, Vec::new(), 0)
    }

    pub fn kind(&self) -> TransportKind {
        self.kind
    }

    pub fn state(&self) -> TransportState {
        self.state
    }

    pub fn devices(&self) -> &[DeviceEntry] {
        &self.devices
    }

    /// Monotonic mutation counter of the owning registry
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn taken_at(&self) -> DateTime<Utc> {
        self.taken_at
    }

    pub fn device(&self, id: &DeviceId) -> Option<&DeviceEntry> {
        self.devices.iter().find(|d| d.id() == id)
    }

    pub fn device_state(&self, id: &DeviceId) -> Option<DeviceState> {
        self.device(id).map(|d| d.state())
    }

    pub fn contains(&self, id: &DeviceId) -> bool {
        self.device(id).is_some()
    }

    pub fn in_state(&self, state: DeviceState) -> impl Iterator<Item = &DeviceEntry> {
        self.devices.iter().filter(move |d| d.state() == state)
    }

    pub fn count_in(&self, state: DeviceState) -> usize {
        self.in_state(state).count()
    }

    pub fn connected(&self) -> impl Iterator<Item = &DeviceEntry> {
        self.in_state(DeviceState::Connected)
    }

    pub fn known(&self) -> impl Iterator<Item = &DeviceEntry> {
        self.devices.iter().filter(|d| d.is_known())
    }

    /// Badge summary: any connected device wins, then any handshake in flight,
    /// then any failed device
    pub fn status(&self) -> ConnectionStatus {
        let states: Vec<DeviceState> = self.devices.iter().map(|d| d.state()).collect();
        if states.contains(&DeviceState::Connected) {
            ConnectionStatus::Connected
        } else if states.iter().any(|s| s.is_handshaking()) {
            ConnectionStatus::Connecting
        } else if states.contains(&DeviceState::Error) {
            ConnectionStatus::Error
        } else {
            ConnectionStatus::Disconnected
        }
    }

    /// Export snapshot for hand-off across a process boundary
    pub fn export(&self) -> Result<Vec<u8>, SnapshotError> {
        postcard::to_allocvec(self).map_err(|e| SnapshotError::Serialization(e.to_string()))
    }

    /// Import a snapshot produced by `export`
    pub fn import(bytes: &[u8]) -> Result<Self, SnapshotError> {
        postcard::from_bytes(bytes).map_err(|e| SnapshotError::Serialization(e.to_string()))
    }
}

// Engaged devices first, then known, then everything else
fn display_rank(state: DeviceState) -> u8 {
    match state {
        DeviceState::Connected => 0,
        DeviceState::Connecting | DeviceState::AwaitingCredential | DeviceState::Disconnecting => 1,
        DeviceState::Known => 2,
        DeviceState::Error => 3,
        DeviceState::Discovered => 4,
    }
}
