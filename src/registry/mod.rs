// Registry module - THE TABLE
// Canonical per-transport device table and its snapshot fan-out

mod publisher;
mod table;

pub use publisher::{SnapshotFeed, SnapshotPublisher, SnapshotStream, SNAPSHOT_BUFFER};
pub use table::{DeviceRegistry, MergeSummary, RegistryChange, TransitionError};
