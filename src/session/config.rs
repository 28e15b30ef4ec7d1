// Session Configuration
// Timeouts and queue sizes, with per-transport overrides

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use super::SessionError;
use crate::device::TransportKind;
use crate::registry::SNAPSHOT_BUFFER;

// ============================================================================
// TRANSPORT CONFIG
// ============================================================================

/// Settings for a single transport worker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Whether the transport starts enabled (radio powered, pipeline ready)
    pub initially_enabled: bool,
    /// How long a scan may run before it is closed and pruned
    pub scan_timeout: Duration,
    /// How long a connect attempt may stay in `Connecting`
    pub connect_timeout: Duration,
    /// How long to wait for an adapter to confirm a disconnect
    pub disconnect_timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            initially_enabled: true,
            scan_timeout: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(10),
            disconnect_timeout: Duration::from_secs(5),
        }
    }
}

impl TransportConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_initially_enabled(mut self, enabled: bool) -> Self {
        self.initially_enabled = enabled;
        self
    }

    pub fn with_scan_timeout(mut self, timeout: Duration) -> Self {
        self.scan_timeout = timeout;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_disconnect_timeout(mut self, timeout: Duration) -> Self {
        self.disconnect_timeout = timeout;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), SessionError> {
        if self.scan_timeout.is_zero() {
            return Err(SessionError::InvalidConfig("scan_timeout cannot be 0".to_string()));
        }
        if self.connect_timeout.is_zero() {
            return Err(SessionError::InvalidConfig("connect_timeout cannot be 0".to_string()));
        }
        if self.disconnect_timeout.is_zero() {
            return Err(SessionError::InvalidConfig(
                "disconnect_timeout cannot be 0".to_string(),
            ));
        }
        Ok(())
    }
}

// ============================================================================
// SESSION CONFIG
// ============================================================================

/// Configuration for a session manager
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Settings used by every transport without an override
    pub defaults: TransportConfig,
    /// Per-transport overrides
    pub overrides: BTreeMap<TransportKind, TransportConfig>,
    /// Commands queued per transport before callers wait
    pub command_queue_depth: usize,
    /// Snapshots buffered per subscriber
    pub snapshot_buffer: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            defaults: TransportConfig::default(),
            overrides: BTreeMap::new(),
            command_queue_depth: 64,
            snapshot_buffer: SNAPSHOT_BUFFER,
        }
    }
}

impl SessionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_defaults(mut self, defaults: TransportConfig) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn with_transport(mut self, kind: TransportKind, config: TransportConfig) -> Self {
        self.overrides.insert(kind, config);
        self
    }

    pub fn with_scan_timeout(mut self, timeout: Duration) -> Self {
        self.defaults.scan_timeout = timeout;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.defaults.connect_timeout = timeout;
        self
    }

    pub fn with_command_queue_depth(mut self, depth: usize) -> Self {
        self.command_queue_depth = depth;
        self
    }

    pub fn with_snapshot_buffer(mut self, buffer: usize) -> Self {
        self.snapshot_buffer = buffer;
        self
    }

    /// Effective settings for one transport
    pub fn transport(&self, kind: TransportKind) -> &TransportConfig {
        self.overrides.get(&kind).unwrap_or(&self.defaults)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), SessionError> {
        if self.command_queue_depth == 0 {
            return Err(SessionError::InvalidConfig(
                "command_queue_depth cannot be 0".to_string(),
            ));
        }
        if self.snapshot_buffer == 0 {
            return Err(SessionError::InvalidConfig("snapshot_buffer cannot be 0".to_string()));
        }
        self.defaults.validate()?;
        for config in self.overrides.values() {
            config.validate()?;
        }
        Ok(())
    }
}
