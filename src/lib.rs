// devsession - Device Session Manager
// Discovery, connection and status for network, radio, stream and sink peripherals

pub mod adapter;
pub mod connection;
pub mod device;
pub mod discovery;
pub mod registry;
pub mod session;

pub use adapter::{AdapterError, TransportAdapter};
pub use device::{
    CommandOutcome, Credential, DeviceEntry, DeviceId, DeviceState, FailureReason, Observation,
    Reached, Rejection, TransportKind, TransportSnapshot, TransportState,
};
pub use session::{SessionConfig, SessionError, SessionManager, TransportConfig};
