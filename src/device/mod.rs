// Device module - WHAT IS TRACKED
// Data model shared by the registry, the coordinators and presentation layers

mod model;
mod outcome;
mod snapshot;

pub use model::{
    // Identity
    DeviceId, TransportKind,
    // Access
    AccessMode, Credential,
    // Lifecycle
    DeviceState, TransportState,
    // Entries
    DeviceEntry, Observation,
};

pub use outcome::{CommandOutcome, FailureClass, FailureReason, Reached, Rejection};

pub use snapshot::{ConnectionStatus, SnapshotError, TransportSnapshot};
