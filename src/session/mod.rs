// Session module - THE FRONT DESK
// Per-transport workers and the facade callers talk to

mod config;
mod context;
mod manager;
mod worker;

use thiserror::Error;

use crate::device::TransportKind;

pub use config::{SessionConfig, TransportConfig};
pub use manager::{SessionManager, SessionManagerBuilder};
pub use crate::registry::{SnapshotFeed, SnapshotStream};

pub(crate) use context::{Timer, WorkerContext, WorkerEvent};

/// Errors raised while building a session manager
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("Adapter registered twice for {0}")]
    DuplicateTransport(TransportKind),

    #[error("No transport adapters registered")]
    MissingAdapter,
}
