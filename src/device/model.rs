// Device Model
// Transport kinds, device identity, lifecycle states and registry entries

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::outcome::FailureReason;

// ============================================================================
// TRANSPORT KIND
// ============================================================================

/// Class of peripheral connectivity managed by one independent worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TransportKind {
    /// Wireless network (Wi-Fi access points)
    Network,
    /// Bluetooth radio accessories
    Radio,
    /// Camera capture pipeline
    Stream,
    /// Audio output sink
    Sink,
}

impl TransportKind {
    pub const ALL: [TransportKind; 4] = [Self::Network, Self::Radio, Self::Stream, Self::Sink];

    /// Exclusive transports hold at most one engaged device at a time
    pub fn is_exclusive(&self) -> bool {
        matches!(self, Self::Network | Self::Sink)
    }

    /// Whether discovered devices carry a signal/quality metric
    pub fn reports_signal(&self) -> bool {
        matches!(self, Self::Network | Self::Radio)
    }

    /// Whether devices may require credentials to connect
    pub fn supports_credentials(&self) -> bool {
        matches!(self, Self::Network | Self::Radio)
    }

    /// A successful connect pairs the device, so it is remembered as known
    pub fn pairs_on_connect(&self) -> bool {
        matches!(self, Self::Radio)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::Radio => "radio",
            Self::Stream => "stream",
            Self::Sink => "sink",
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TransportKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "network" | "wifi" => Ok(Self::Network),
            "radio" | "bluetooth" => Ok(Self::Radio),
            "stream" | "camera" => Ok(Self::Stream),
            "sink" | "audio" => Ok(Self::Sink),
            other => Err(format!("unknown transport: {}", other)),
        }
    }
}

// ============================================================================
// DEVICE ID
// ============================================================================

/// Stable identifier, unique within a transport (BSSID, MAC, source or sink handle)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeviceId(String);

impl DeviceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for DeviceId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

// ============================================================================
// ACCESS MODE
// ============================================================================

/// Access requirement for connecting to a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AccessMode {
    Open,
    Credentialed,
    /// Not applicable (stream sources, audio sinks)
    #[default]
    None,
}

impl AccessMode {
    pub fn requires_credential(&self) -> bool {
        matches!(self, Self::Credentialed)
    }
}

// ============================================================================
// CREDENTIAL
// ============================================================================

/// Secret supplied for a single connect attempt. Never persisted or logged.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}

impl From<&str> for Credential {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

// ============================================================================
// DEVICE STATE
// ============================================================================

/// Lifecycle state of a single device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceState {
    /// Seen by discovery, not paired
    Discovered,
    /// Quiescent state of a known/paired entry
    Known,
    Connecting,
    AwaitingCredential,
    Connected,
    Disconnecting,
    /// Last attempt failed; see `last_error`
    Error,
}

impl DeviceState {
    /// States from which a fresh connect attempt may begin
    pub const CONNECTABLE: [DeviceState; 3] = [Self::Discovered, Self::Known, Self::Error];

    /// Quiescent state for an entry depending on whether it is known
    pub fn quiescent(known: bool) -> Self {
        if known {
            Self::Known
        } else {
            Self::Discovered
        }
    }

    /// Check if transition to another state is valid
    pub fn can_transition_to(&self, target: &DeviceState) -> bool {
        use DeviceState::*;
        match (self, target) {
            (Discovered | Known | Error, Connecting) => true,
            (Connected, Connecting) => true, // Reconnect
            (Connecting, AwaitingCredential | Connected | Error) => true,
            (Connecting, Discovered | Known) => true, // Cancelled or torn down
            (AwaitingCredential, Connecting | Discovered | Known) => true,
            (Connected, Disconnecting) => true,
            (Connected, Discovered | Known) => true, // Hard teardown
            (Disconnecting, Discovered | Known) => true,
            (Error, Discovered | Known) => true,
            (Discovered, Known) | (Known, Discovered) => true,
            _ => false,
        }
    }

    /// Whether the device is part of an in-flight or established session.
    /// Engaged entries are never pruned by discovery.
    pub fn is_engaged(&self) -> bool {
        matches!(
            self,
            Self::Connecting | Self::AwaitingCredential | Self::Connected | Self::Disconnecting
        )
    }

    /// A handshake is running or paused for user input
    pub fn is_handshaking(&self) -> bool {
        matches!(self, Self::Connecting | Self::AwaitingCredential)
    }

    pub fn is_quiescent(&self) -> bool {
        matches!(self, Self::Discovered | Self::Known)
    }
}

impl fmt::Display for DeviceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Discovered => "discovered",
            Self::Known => "known",
            Self::Connecting => "connecting",
            Self::AwaitingCredential => "awaiting-credential",
            Self::Connected => "connected",
            Self::Disconnecting => "disconnecting",
            Self::Error => "error",
        };
        f.write_str(label)
    }
}

// ============================================================================
// TRANSPORT STATE
// ============================================================================

/// State of a transport, independent of its devices
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TransportState {
    #[default]
    Disabled,
    Idle,
    Scanning,
}

impl TransportState {
    /// Check if transition to another state is valid
    pub fn can_transition_to(&self, target: &TransportState) -> bool {
        matches!(
            (self, target),
            (Self::Disabled, Self::Idle)
                | (Self::Idle, Self::Disabled)
                | (Self::Idle, Self::Scanning)
                | (Self::Scanning, Self::Idle)
                | (Self::Scanning, Self::Disabled)
        )
    }

    pub fn is_enabled(&self) -> bool {
        !matches!(self, Self::Disabled)
    }

    pub fn is_scanning(&self) -> bool {
        matches!(self, Self::Scanning)
    }
}

impl fmt::Display for TransportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Disabled => "disabled",
            Self::Idle => "idle",
            Self::Scanning => "scanning",
        };
        f.write_str(label)
    }
}

// ============================================================================
// OBSERVATION
// ============================================================================

/// A device as reported by an adapter during discovery.
/// Carries no lifecycle state; discovery never decides state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Observation {
    pub id: DeviceId,
    pub display_name: Option<String>,
    pub signal: Option<u8>,
    pub access: AccessMode,
}

impl Observation {
    pub fn new(id: impl Into<DeviceId>) -> Self {
        Self {
            id: id.into(),
            display_name: None,
            signal: None,
            access: AccessMode::None,
        }
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.display_name = Some(name.to_string());
        self
    }

    /// Signal or quality metric, clamped to 0-100
    pub fn with_signal(mut self, signal: u8) -> Self {
        self.signal = Some(signal.min(100));
        self
    }

    pub fn with_access(mut self, access: AccessMode) -> Self {
        self.access = access;
        self
    }

    pub fn credentialed(self) -> Self {
        self.with_access(AccessMode::Credentialed)
    }

    pub fn open(self) -> Self {
        self.with_access(AccessMode::Open)
    }

    /// Drop fields the transport does not carry: no signal on stream and sink,
    /// no access mode where credentials are meaningless
    pub fn conform_to(mut self, kind: TransportKind) -> Self {
        if !kind.reports_signal() {
            self.signal = None;
        }
        if !kind.supports_credentials() {
            self.access = AccessMode::None;
        }
        self
    }
}

// ============================================================================
// DEVICE ENTRY
// ============================================================================

/// One known, discovered or paired peripheral within a transport
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceEntry {
    id: DeviceId,
    display_name: Option<String>,
    signal: Option<u8>,
    access: AccessMode,
    state: DeviceState,
    last_error: Option<FailureReason>,
    retry_count: u32,
    known: bool,
    last_seen: Option<DateTime<Utc>>,
}

impl DeviceEntry {
    /// Ephemeral entry created from a discovery observation
    pub fn discovered(observation: Observation) -> Self {
        Self::from_observation(observation, false)
    }

    /// Known/paired entry that survives discovery cycles
    pub fn known(observation: Observation) -> Self {
        Self::from_observation(observation, true)
    }

    fn from_observation(observation: Observation, known: bool) -> Self {
        Self {
            id: observation.id,
            display_name: observation.display_name,
            signal: observation.signal,
            access: observation.access,
            state: DeviceState::quiescent(known),
            last_error: None,
            retry_count: 0,
            known,
            last_seen: if known { None } else { Some(Utc::now()) },
        }
    }

    pub fn id(&self) -> &DeviceId {
        &self.id
    }

    pub fn display_name(&self) -> Option<&str> {
        self.display_name.as_deref()
    }

    /// Human label, falling back to the identifier for anonymous peripherals
    pub fn label(&self) -> &str {
        self.display_name.as_deref().unwrap_or(self.id.as_str())
    }

    pub fn signal(&self) -> Option<u8> {
        self.signal
    }

    pub fn access(&self) -> AccessMode {
        self.access
    }

    pub fn state(&self) -> DeviceState {
        self.state
    }

    pub fn last_error(&self) -> Option<FailureReason> {
        self.last_error
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn is_known(&self) -> bool {
        self.known
    }

    pub fn last_seen(&self) -> Option<DateTime<Utc>> {
        self.last_seen
    }

    /// The state this entry settles into when idle
    pub fn quiescent_state(&self) -> DeviceState {
        DeviceState::quiescent(self.known)
    }

    /// Refresh descriptive fields from a newer observation. Never touches state.
    pub(crate) fn refresh(&mut self, observation: &Observation) -> bool {
        let before = (self.display_name.clone(), self.signal, self.access);
        if observation.display_name.is_some() {
            self.display_name = observation.display_name.clone();
        }
        if observation.signal.is_some() {
            self.signal = observation.signal;
        }
        if observation.access != AccessMode::None {
            self.access = observation.access;
        }
        self.last_seen = Some(Utc::now());
        before != (self.display_name.clone(), self.signal, self.access)
    }

    /// Apply a state change and its bookkeeping:
    /// entering `Error` records the reason and bumps the retry counter,
    /// entering `Connected` clears both, other states clear the error
    /// unless a reason accompanies the change.
    pub(crate) fn apply(&mut self, to: DeviceState, error: Option<FailureReason>) {
        self.state = to;
        match to {
            DeviceState::Error => {
                self.last_error = error;
                self.retry_count = self.retry_count.saturating_add(1);
            }
            DeviceState::Connected => {
                self.last_error = None;
                self.retry_count = 0;
            }
            _ => self.last_error = error,
        }
    }

    pub(crate) fn set_known(&mut self, known: bool) {
        self.known = known;
        if self.state.is_quiescent() {
            self.state = DeviceState::quiescent(known);
        }
    }

    pub(crate) fn reset_retries(&mut self) {
        self.retry_count = 0;
    }
}
