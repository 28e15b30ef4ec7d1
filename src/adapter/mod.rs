// Adapter module - THE DRIVERS (abstract)
// Contract between the session core and per-transport driver layers

mod mock;
mod simulated;
mod sink;
mod traits;

pub use traits::{AdapterError, TransportAdapter};

pub use sink::{ConnectSink, DisconnectSink, ScanSink};

pub use mock::{AdapterCall, ConnectBehavior, DisconnectBehavior, MockAdapter};

pub use simulated::{SimulatedAdapter, SimulatedDevice};
