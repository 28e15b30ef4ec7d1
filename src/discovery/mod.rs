// Discovery module - WHO IS OUT THERE
// Drives scan cycles and merges adapter results into the registry

mod coordinator;

pub use coordinator::{DiscoveryCoordinator, ScanEnd};
