// Outcomes and Failure Taxonomy
// What commands report back, and why devices fail

use serde::{Deserialize, Serialize};
use std::fmt;

use super::model::{DeviceId, DeviceState, TransportKind, TransportState};

// ============================================================================
// FAILURE REASON
// ============================================================================

/// Failure reasons surfaced outward and recorded on device entries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureReason {
    Timeout,
    CredentialRequired,
    CredentialRejected,
    AdapterUnreachable,
    Cancelled,
    AlreadyInProgress,
}

/// How a failure should be handled by the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureClass {
    /// Safe to retry
    Transient,
    /// Needs user input (credential entry)
    UserActionable,
    /// Caller issued a command that can never succeed as sent
    Programming,
}

impl FailureReason {
    pub fn class(&self) -> FailureClass {
        match self {
            Self::Timeout | Self::AdapterUnreachable | Self::Cancelled => FailureClass::Transient,
            Self::CredentialRequired | Self::CredentialRejected => FailureClass::UserActionable,
            Self::AlreadyInProgress => FailureClass::Programming,
        }
    }

    /// Failures that park a device in `AwaitingCredential` rather than `Error`
    pub fn needs_credential(&self) -> bool {
        matches!(self, Self::CredentialRequired | Self::CredentialRejected)
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self.class(), FailureClass::Transient)
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Timeout => "timed out",
            Self::CredentialRequired => "credential required",
            Self::CredentialRejected => "credential rejected",
            Self::AdapterUnreachable => "adapter unreachable",
            Self::Cancelled => "cancelled",
            Self::AlreadyInProgress => "already in progress",
        };
        f.write_str(label)
    }
}

// ============================================================================
// REJECTION
// ============================================================================

/// Why a command was refused before it touched any device state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    TransportDisabled,
    UnknownTransport(TransportKind),
    UnknownDevice(DeviceId),
    InvalidState(DeviceState),
    AlreadyInProgress,
    /// The adapter refused to start the operation
    Adapter(FailureReason),
    /// The transport worker has shut down
    WorkerStopped,
}

impl Rejection {
    pub fn class(&self) -> FailureClass {
        match self {
            Self::Adapter(reason) => reason.class(),
            _ => FailureClass::Programming,
        }
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TransportDisabled => write!(f, "transport is disabled"),
            Self::UnknownTransport(kind) => write!(f, "no {} transport registered", kind),
            Self::UnknownDevice(id) => write!(f, "unknown device {}", id),
            Self::InvalidState(state) => write!(f, "not allowed while {}", state),
            Self::AlreadyInProgress => write!(f, "another operation is already in progress"),
            Self::Adapter(reason) => write!(f, "adapter: {}", reason),
            Self::WorkerStopped => write!(f, "transport worker stopped"),
        }
    }
}

// ============================================================================
// COMMAND OUTCOME
// ============================================================================

/// State observed when a command was acknowledged
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reached {
    Transport(TransportState),
    Device(DeviceState),
    /// Connect is waiting for another device on an exclusive transport to settle
    Queued,
    /// Bookkeeping command with no state of its own
    Done,
}

/// Acknowledgement returned by every session command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    Accepted(Reached),
    NoOp(Reached),
    Rejected(Rejection),
}

impl CommandOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted(_))
    }

    pub fn is_noop(&self) -> bool {
        matches!(self, Self::NoOp(_))
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self, Self::Rejected(_))
    }

    /// The state reached, if the command was not rejected
    pub fn reached(&self) -> Option<Reached> {
        match self {
            Self::Accepted(r) | Self::NoOp(r) => Some(*r),
            Self::Rejected(_) => None,
        }
    }

    pub fn device_state(&self) -> Option<DeviceState> {
        match self.reached() {
            Some(Reached::Device(state)) => Some(state),
            _ => None,
        }
    }

    pub fn rejection(&self) -> Option<&Rejection> {
        match self {
            Self::Rejected(r) => Some(r),
            _ => None,
        }
    }
}
