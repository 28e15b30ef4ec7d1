// Adapter Traits
// Contract implemented by each transport's driver layer

use async_trait::async_trait;
use thiserror::Error;

use super::sink::{ConnectSink, DisconnectSink, ScanSink};
use crate::device::{Credential, DeviceId, FailureReason, TransportKind};

// ============================================================================
// ADAPTER ERRORS
// ============================================================================

/// Errors an adapter may return when asked to start an operation
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdapterError {
    #[error("Adapter unreachable: {0}")]
    Unreachable(String),

    #[error("Adapter busy")]
    Busy,

    #[error("Operation unsupported: {0}")]
    Unsupported(String),
}

impl AdapterError {
    /// Failure reason recorded when a kick-off call fails
    pub fn reason(&self) -> FailureReason {
        match self {
            Self::Busy => FailureReason::AlreadyInProgress,
            Self::Unreachable(_) | Self::Unsupported(_) => FailureReason::AdapterUnreachable,
        }
    }
}

// ============================================================================
// TRANSPORT ADAPTER TRAIT
// ============================================================================

/// Driver for one transport (Wi-Fi radio, Bluetooth stack, capture pipeline, audio sink).
///
/// `begin_*` calls only kick an operation off and should return promptly;
/// outcomes are reported later through the supplied sink, from any task.
/// Adapters may report late, twice, or not at all: the session discards
/// anything that no longer matches the device's current attempt.
#[async_trait]
pub trait TransportAdapter: Send + Sync {
    /// Transport this adapter drives
    fn kind(&self) -> TransportKind;

    /// Power the underlying hardware on or off
    async fn set_powered(&self, _on: bool) -> Result<(), AdapterError> {
        Ok(())
    }

    /// Start a discovery pass. Report batches with `sink.report`, then `sink.complete`.
    async fn begin_scan(&self, sink: ScanSink) -> Result<(), AdapterError>;

    /// Abort the running discovery pass, if any
    async fn cancel_scan(&self);

    /// Start connecting (or pairing) to a device
    async fn begin_connect(
        &self,
        id: &DeviceId,
        credential: Option<&Credential>,
        sink: ConnectSink,
    ) -> Result<(), AdapterError>;

    /// Abort an in-flight connect for a device
    async fn cancel_connect(&self, id: &DeviceId);

    /// Start an orderly disconnect; signal `sink.done` once released
    async fn begin_disconnect(&self, id: &DeviceId, sink: DisconnectSink) -> Result<(), AdapterError>;
}
