// Device Registry
// Authoritative table of device entries for one transport.
//
// Every mutation bumps the revision and publishes a full snapshot.
// State changes go through a compare-and-swap so that a late or racing
// callback can never overwrite a newer transition.

use std::collections::{HashMap, HashSet};
use thiserror::Error;
use tracing::trace;

use super::publisher::{SnapshotFeed, SnapshotPublisher, SnapshotStream};
use crate::device::{
    DeviceEntry, DeviceId, DeviceState, FailureReason, Observation, TransportKind,
    TransportSnapshot, TransportState,
};

// ============================================================================
// ERRORS
// ============================================================================

/// Why a registry transition was not applied
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("Unknown device: {0}")]
    UnknownDevice(DeviceId),

    #[error("State mismatch: device is {current}")]
    StateMismatch { current: DeviceState },

    #[error("Illegal transition {from} -> {to}")]
    IllegalTransition { from: DeviceState, to: DeviceState },

    #[error("Transition would leave {other} engaged alongside {id}")]
    ExclusivityViolation { id: DeviceId, other: DeviceId },

    #[error("Illegal transport transition {from} -> {to}")]
    IllegalTransportTransition { from: TransportState, to: TransportState },
}

// ============================================================================
// CHANGES
// ============================================================================

/// Mutation applied to the registry, traced alongside each published snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryChange {
    Merged { added: usize, updated: usize },
    StateChanged { id: DeviceId, from: DeviceState, to: DeviceState },
    Removed(Vec<DeviceId>),
    Registered(DeviceId),
    RetriesReset(DeviceId),
    TransportChanged { from: TransportState, to: TransportState },
}

/// Result of merging a batch of observations
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeSummary {
    pub added: usize,
    pub updated: usize,
}

// ============================================================================
// DEVICE REGISTRY
// ============================================================================

pub struct DeviceRegistry {
    kind: TransportKind,
    transport_state: TransportState,
    entries: HashMap<DeviceId, DeviceEntry>,
    revision: u64,
    publisher: SnapshotPublisher,
}

impl DeviceRegistry {
    pub fn new(kind: TransportKind, initial: TransportState, publisher: SnapshotPublisher) -> Self {
        let registry = Self {
            kind,
            transport_state: initial,
            entries: HashMap::new(),
            revision: 0,
            publisher,
        };
        registry.publisher.publish(registry.snapshot());
        registry
    }

    pub fn kind(&self) -> TransportKind {
        self.kind
    }

    pub fn transport_state(&self) -> TransportState {
        self.transport_state
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, id: &DeviceId) -> Option<&DeviceEntry> {
        self.entries.get(id)
    }

    pub fn contains(&self, id: &DeviceId) -> bool {
        self.entries.contains_key(id)
    }

    pub fn state_of(&self, id: &DeviceId) -> Option<DeviceState> {
        self.entries.get(id).map(|e| e.state())
    }

    /// Ids of every entry currently in one of `states`
    pub fn ids_in(&self, states: &[DeviceState]) -> Vec<DeviceId> {
        let mut ids: Vec<DeviceId> = self
            .entries
            .values()
            .filter(|e| states.contains(&e.state()))
            .map(|e| e.id().clone())
            .collect();
        ids.sort();
        ids
    }

    /// Immutable copy of the table
    pub fn snapshot(&self) -> TransportSnapshot {
        TransportSnapshot::new(
            self.kind,
            self.transport_state,
            self.entries.values().cloned().collect(),
            self.revision,
        )
    }

    pub fn subscribe(&self) -> SnapshotStream {
        self.publisher.subscribe()
    }

    pub fn feed(&self) -> SnapshotFeed {
        self.publisher.feed()
    }

    fn publish(&mut self, change: RegistryChange) {
        self.revision += 1;
        trace!(transport = %self.kind, revision = self.revision, ?change, "registry mutated");
        self.publisher.publish(self.snapshot());
    }

    // ------------------------------------------------------------------------
    // Transport state
    // ------------------------------------------------------------------------

    /// Move the transport between Disabled, Idle and Scanning.
    /// Setting the current state again is a silent no-op.
    pub fn set_transport_state(&mut self, to: TransportState) -> Result<TransportState, TransitionError> {
        let from = self.transport_state;
        if from == to {
            return Ok(from);
        }
        if !from.can_transition_to(&to) {
            return Err(TransitionError::IllegalTransportTransition { from, to });
        }
        self.transport_state = to;
        self.publish(RegistryChange::TransportChanged { from, to });
        Ok(from)
    }

    // ------------------------------------------------------------------------
    // Discovery merges
    // ------------------------------------------------------------------------

    /// Merge freshly observed devices. New ids become `Discovered` entries;
    /// existing entries only get descriptive fields refreshed, never state.
    pub fn upsert(&mut self, observations: Vec<Observation>) -> MergeSummary {
        let mut summary = MergeSummary::default();
        for observation in observations {
            let observation = observation.conform_to(self.kind);
            match self.entries.get_mut(&observation.id) {
                Some(entry) => {
                    if entry.refresh(&observation) {
                        summary.updated += 1;
                    }
                }
                None => {
                    let entry = DeviceEntry::discovered(observation);
                    self.entries.insert(entry.id().clone(), entry);
                    summary.added += 1;
                }
            }
        }
        if summary.added > 0 || summary.updated > 0 {
            self.publish(RegistryChange::Merged {
                added: summary.added,
                updated: summary.updated,
            });
        }
        summary
    }

    /// Drop ephemeral entries that were not observed, unless engaged or protected
    pub fn prune(&mut self, observed: &HashSet<DeviceId>, protected: Option<&DeviceId>) -> Vec<DeviceId> {
        self.remove_where(|entry| !observed.contains(entry.id()), protected)
    }

    /// Drop every ephemeral entry that is not engaged
    pub fn prune_ephemeral(&mut self, protected: Option<&DeviceId>) -> Vec<DeviceId> {
        self.remove_where(|_| true, protected)
    }

    /// Merge a complete scan pass and prune everything it did not contain
    pub fn reconcile(&mut self, observations: Vec<Observation>) -> (MergeSummary, Vec<DeviceId>) {
        let observed: HashSet<DeviceId> = observations.iter().map(|o| o.id.clone()).collect();
        let summary = self.upsert(observations);
        let removed = self.prune(&observed, None);
        (summary, removed)
    }

    fn remove_where<F>(&mut self, predicate: F, protected: Option<&DeviceId>) -> Vec<DeviceId>
    where
        F: Fn(&DeviceEntry) -> bool,
    {
        let mut removed: Vec<DeviceId> = self
            .entries
            .values()
            .filter(|e| !e.is_known() && !e.state().is_engaged())
            .filter(|e| Some(e.id()) != protected)
            .filter(|e| predicate(e))
            .map(|e| e.id().clone())
            .collect();
        if removed.is_empty() {
            return removed;
        }
        removed.sort();
        for id in &removed {
            self.entries.remove(id);
        }
        self.publish(RegistryChange::Removed(removed.clone()));
        removed
    }

    // ------------------------------------------------------------------------
    // Device transitions
    // ------------------------------------------------------------------------

    /// Compare-and-swap state change. Applies only when the current state is in
    /// `from`; returns the previous state on success.
    pub fn transition(
        &mut self,
        id: &DeviceId,
        from: &[DeviceState],
        to: DeviceState,
        error: Option<FailureReason>,
    ) -> Result<DeviceState, TransitionError> {
        let current = self
            .entries
            .get(id)
            .map(|e| e.state())
            .ok_or_else(|| TransitionError::UnknownDevice(id.clone()))?;

        if !from.contains(&current) {
            return Err(TransitionError::StateMismatch { current });
        }
        if !current.can_transition_to(&to) {
            return Err(TransitionError::IllegalTransition { from: current, to });
        }
        self.check_exclusivity(id, to)?;

        if let Some(entry) = self.entries.get_mut(id) {
            entry.apply(to, error);
        }
        self.publish(RegistryChange::StateChanged {
            id: id.clone(),
            from: current,
            to,
        });
        Ok(current)
    }

    /// Exclusive transports: one device in Connecting/Connected.
    /// Other transports: one device in Connecting.
    fn check_exclusivity(&self, id: &DeviceId, to: DeviceState) -> Result<(), TransitionError> {
        let guarded: &[DeviceState] = if self.kind.is_exclusive() {
            &[DeviceState::Connecting, DeviceState::Connected]
        } else {
            &[DeviceState::Connecting]
        };
        if !guarded.contains(&to) {
            return Ok(());
        }
        match self
            .entries
            .values()
            .find(|e| e.id() != id && guarded.contains(&e.state()))
        {
            Some(other) => Err(TransitionError::ExclusivityViolation {
                id: id.clone(),
                other: other.id().clone(),
            }),
            None => Ok(()),
        }
    }

    /// Hard teardown: every engaged device drops straight to its quiescent state.
    /// In-flight handshakes are marked `Cancelled`.
    pub fn teardown(&mut self) -> Vec<(DeviceId, DeviceState)> {
        let engaged = self.ids_in(&[
            DeviceState::Connecting,
            DeviceState::AwaitingCredential,
            DeviceState::Connected,
            DeviceState::Disconnecting,
        ]);
        let mut torn = Vec::with_capacity(engaged.len());
        for id in engaged {
            let Some(entry) = self.entries.get(&id) else { continue };
            let from = entry.state();
            let to = entry.quiescent_state();
            let error = from.is_handshaking().then_some(FailureReason::Cancelled);
            if self.transition(&id, &[from], to, error).is_ok() {
                torn.push((id, from));
            }
        }
        torn
    }

    // ------------------------------------------------------------------------
    // Known entries
    // ------------------------------------------------------------------------

    /// Register (or promote) a known/paired entry. Returns true if it was new.
    pub fn register_known(&mut self, observation: Observation) -> bool {
        let observation = observation.conform_to(self.kind);
        let id = observation.id.clone();
        let added = match self.entries.get_mut(&id) {
            Some(entry) => {
                entry.refresh(&observation);
                entry.set_known(true);
                false
            }
            None => {
                self.entries.insert(id.clone(), DeviceEntry::known(observation));
                true
            }
        };
        self.publish(RegistryChange::Registered(id));
        added
    }

    /// Mark an existing entry as known, e.g. once a radio accessory is paired.
    /// Returns true if the entry was ephemeral before.
    pub fn mark_known(&mut self, id: &DeviceId) -> bool {
        let Some(entry) = self.entries.get_mut(id) else {
            return false;
        };
        if entry.is_known() {
            return false;
        }
        entry.set_known(true);
        self.publish(RegistryChange::Registered(id.clone()));
        true
    }

    /// Remove a known entry. Engaged devices must be disconnected first.
    pub fn forget(&mut self, id: &DeviceId) -> Result<DeviceEntry, TransitionError> {
        let current = self
            .state_of(id)
            .ok_or_else(|| TransitionError::UnknownDevice(id.clone()))?;
        if current.is_engaged() {
            return Err(TransitionError::StateMismatch { current });
        }
        let entry = self
            .entries
            .remove(id)
            .ok_or_else(|| TransitionError::UnknownDevice(id.clone()))?;
        self.publish(RegistryChange::Removed(vec![id.clone()]));
        Ok(entry)
    }

    /// User-initiated retry reset
    pub fn reset_retries(&mut self, id: &DeviceId) -> Result<(), TransitionError> {
        let entry = self
            .entries
            .get_mut(id)
            .ok_or_else(|| TransitionError::UnknownDevice(id.clone()))?;
        if entry.retry_count() == 0 {
            return Ok(());
        }
        entry.reset_retries();
        self.publish(RegistryChange::RetriesReset(id.clone()));
        Ok(())
    }
}
