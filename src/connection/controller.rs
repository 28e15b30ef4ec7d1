// Connection Controller
// Connect, credential and disconnect sequencing for the devices of one transport.
//
// Every connect and disconnect attempt gets a fresh token. Adapter callbacks
// and timer expiries carry the token they were issued with; anything whose
// token is no longer current is dropped before the registry is consulted,
// and the registry's compare-and-swap rejects whatever slips through.

use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::device::{
    CommandOutcome, Credential, DeviceId, DeviceState, FailureReason, Reached, Rejection,
    TransportKind,
};
use crate::registry::{DeviceRegistry, TransitionError};
use crate::session::{Timer, WorkerContext, WorkerEvent};

use DeviceState::*;

// ============================================================================
// BOOKKEEPING
// ============================================================================

/// A connect attempt that has not settled
struct Attempt {
    token: u64,
    /// Armed while the adapter is working; disarmed while waiting for a credential
    timer: Option<Timer>,
}

/// An orderly disconnect waiting for the adapter
struct Release {
    token: u64,
    _timer: Timer,
}

/// Connect waiting for another device to release an exclusive transport
struct QueuedConnect {
    id: DeviceId,
    credential: Option<Credential>,
}

impl From<TransitionError> for Rejection {
    fn from(e: TransitionError) -> Self {
        match e {
            TransitionError::UnknownDevice(id) => Rejection::UnknownDevice(id),
            TransitionError::StateMismatch { current } => Rejection::InvalidState(current),
            TransitionError::IllegalTransition { from, .. } => Rejection::InvalidState(from),
            TransitionError::ExclusivityViolation { .. } => Rejection::AlreadyInProgress,
            TransitionError::IllegalTransportTransition { .. } => Rejection::TransportDisabled,
        }
    }
}

// ============================================================================
// CONNECTION CONTROLLER
// ============================================================================

pub struct ConnectionController {
    kind: TransportKind,
    connect_timeout: Duration,
    disconnect_timeout: Duration,
    next_token: u64,
    attempts: HashMap<DeviceId, Attempt>,
    releases: HashMap<DeviceId, Release>,
    queued: Option<QueuedConnect>,
}

impl ConnectionController {
    pub fn new(kind: TransportKind, connect_timeout: Duration, disconnect_timeout: Duration) -> Self {
        Self {
            kind,
            connect_timeout,
            disconnect_timeout,
            next_token: 0,
            attempts: HashMap::new(),
            releases: HashMap::new(),
            queued: None,
        }
    }

    /// Device waiting behind an exclusive teardown, if any
    pub fn queued_target(&self) -> Option<&DeviceId> {
        self.queued.as_ref().map(|q| &q.id)
    }

    fn issue_token(&mut self) -> u64 {
        self.next_token += 1;
        self.next_token
    }

    /// Another device is mid-handshake
    fn other_handshake(&self, id: &DeviceId, registry: &DeviceRegistry) -> bool {
        registry
            .ids_in(&[Connecting, AwaitingCredential])
            .iter()
            .any(|other| other != id)
    }

    fn is_current_attempt(&self, id: &DeviceId, token: u64) -> bool {
        self.attempts.get(id).is_some_and(|a| a.token == token)
    }

    // ------------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------------

    /// Connect (or pair) a device. Same-id repeats are no-ops; on an exclusive
    /// transport any other engaged device is released first.
    pub(crate) async fn connect(
        &mut self,
        id: DeviceId,
        credential: Option<Credential>,
        registry: &mut DeviceRegistry,
        ctx: &WorkerContext,
    ) -> CommandOutcome {
        let Some(state) = registry.state_of(&id) else {
            return CommandOutcome::Rejected(Rejection::UnknownDevice(id));
        };
        match state {
            Connecting | Connected => return CommandOutcome::NoOp(Reached::Device(state)),
            AwaitingCredential => {
                return match credential {
                    Some(credential) => self.supply_credential(id, credential, registry, ctx).await,
                    None => CommandOutcome::NoOp(Reached::Device(state)),
                };
            }
            Disconnecting => return CommandOutcome::Rejected(Rejection::InvalidState(state)),
            Discovered | Known | Error => {}
        }

        if let Some(queued) = &self.queued {
            return if queued.id == id {
                CommandOutcome::NoOp(Reached::Queued)
            } else {
                CommandOutcome::Rejected(Rejection::AlreadyInProgress)
            };
        }

        if self.kind.is_exclusive() {
            if self.clear_way(&id, registry, ctx).await {
                info!(transport = %self.kind, device = %id, "connect queued behind release");
                self.queued = Some(QueuedConnect { id, credential });
                return CommandOutcome::Accepted(Reached::Queued);
            }
        } else if self.other_handshake(&id, registry) {
            return CommandOutcome::Rejected(Rejection::AlreadyInProgress);
        }

        self.start_attempt(id, credential, &[Discovered, Known, Error], registry, ctx)
            .await
    }

    /// Restart the session of a connected device (e.g. stream parameters changed)
    pub(crate) async fn reconnect(
        &mut self,
        id: DeviceId,
        registry: &mut DeviceRegistry,
        ctx: &WorkerContext,
    ) -> CommandOutcome {
        match registry.state_of(&id) {
            None => CommandOutcome::Rejected(Rejection::UnknownDevice(id)),
            Some(Connected) => {
                if self.queued.is_some() || self.other_handshake(&id, registry) {
                    return CommandOutcome::Rejected(Rejection::AlreadyInProgress);
                }
                info!(transport = %self.kind, device = %id, "reconnecting");
                self.start_attempt(id, None, &[Connected], registry, ctx).await
            }
            Some(_) => self.connect(id, None, registry, ctx).await,
        }
    }

    /// Resume a parked handshake with the credential the user entered
    pub(crate) async fn supply_credential(
        &mut self,
        id: DeviceId,
        credential: Credential,
        registry: &mut DeviceRegistry,
        ctx: &WorkerContext,
    ) -> CommandOutcome {
        let Some(state) = registry.state_of(&id) else {
            return CommandOutcome::Rejected(Rejection::UnknownDevice(id));
        };
        if state != AwaitingCredential {
            return CommandOutcome::Rejected(Rejection::InvalidState(state));
        }
        if credential.is_empty() {
            return CommandOutcome::NoOp(Reached::Device(state));
        }
        if let Err(e) = registry.transition(&id, &[AwaitingCredential], Connecting, None) {
            return CommandOutcome::Rejected(e.into());
        }
        self.launch(id, Some(credential), registry, ctx).await
    }

    /// Give up on a parked handshake
    pub(crate) fn cancel_credential(&mut self, id: DeviceId, registry: &mut DeviceRegistry) -> CommandOutcome {
        let Some(entry) = registry.get(&id) else {
            return CommandOutcome::Rejected(Rejection::UnknownDevice(id));
        };
        let (state, quiescent) = (entry.state(), entry.quiescent_state());
        if state != AwaitingCredential {
            return CommandOutcome::NoOp(Reached::Device(state));
        }
        self.attempts.remove(&id);
        match registry.transition(&id, &[AwaitingCredential], quiescent, None) {
            Ok(_) => {
                info!(transport = %self.kind, device = %id, "credential prompt cancelled");
                CommandOutcome::Accepted(Reached::Device(quiescent))
            }
            Err(e) => CommandOutcome::Rejected(e.into()),
        }
    }

    /// Disconnect a device. Anything not connected or connecting is a no-op.
    pub(crate) async fn disconnect(
        &mut self,
        id: DeviceId,
        registry: &mut DeviceRegistry,
        ctx: &WorkerContext,
    ) -> CommandOutcome {
        let Some(state) = registry.state_of(&id) else {
            return CommandOutcome::Rejected(Rejection::UnknownDevice(id));
        };
        if self.queued.as_ref().is_some_and(|q| q.id == id) {
            self.queued = None;
            info!(transport = %self.kind, device = %id, "queued connect dropped");
            return CommandOutcome::Accepted(Reached::Device(state));
        }
        match state {
            Connected => {
                let reached = self.begin_release(&id, registry, ctx).await;
                CommandOutcome::Accepted(Reached::Device(reached))
            }
            Connecting => {
                let reached = self
                    .abandon(&id, FailureReason::Cancelled, registry, ctx)
                    .await;
                CommandOutcome::Accepted(Reached::Device(reached))
            }
            _ => CommandOutcome::NoOp(Reached::Device(state)),
        }
    }

    /// Clear a failed device back to its quiescent state
    pub(crate) fn dismiss_error(&mut self, id: DeviceId, registry: &mut DeviceRegistry) -> CommandOutcome {
        let Some(entry) = registry.get(&id) else {
            return CommandOutcome::Rejected(Rejection::UnknownDevice(id));
        };
        let (state, quiescent) = (entry.state(), entry.quiescent_state());
        if state != Error {
            return CommandOutcome::NoOp(Reached::Device(state));
        }
        match registry.transition(&id, &[Error], quiescent, None) {
            Ok(_) => CommandOutcome::Accepted(Reached::Device(quiescent)),
            Err(e) => CommandOutcome::Rejected(e.into()),
        }
    }

    // ------------------------------------------------------------------------
    // Adapter callbacks and timers
    // ------------------------------------------------------------------------

    pub(crate) fn on_connect_succeeded(&mut self, id: DeviceId, token: u64, registry: &mut DeviceRegistry) {
        if !self.is_current_attempt(&id, token) {
            debug!(transport = %self.kind, device = %id, token, "stale connect success dropped");
            return;
        }
        self.attempts.remove(&id);
        match registry.transition(&id, &[Connecting], Connected, None) {
            Ok(_) => {
                info!(transport = %self.kind, device = %id, "connected");
                if self.kind.pairs_on_connect() && registry.mark_known(&id) {
                    info!(transport = %self.kind, device = %id, "paired");
                }
            }
            Err(e) => debug!(transport = %self.kind, device = %id, error = %e, "connect success discarded"),
        }
    }

    pub(crate) fn on_connect_failed(
        &mut self,
        id: DeviceId,
        token: u64,
        reason: FailureReason,
        registry: &mut DeviceRegistry,
    ) {
        if !self.is_current_attempt(&id, token) {
            debug!(transport = %self.kind, device = %id, token, %reason, "stale connect failure dropped");
            return;
        }
        if reason.needs_credential() {
            // Park the attempt; the timeout does not run while the user types
            if let Some(attempt) = self.attempts.get_mut(&id) {
                attempt.timer = None;
            }
            match registry.transition(&id, &[Connecting], AwaitingCredential, Some(reason)) {
                Ok(_) => info!(transport = %self.kind, device = %id, %reason, "awaiting credential"),
                Err(e) => debug!(transport = %self.kind, device = %id, error = %e, "credential prompt discarded"),
            }
            return;
        }
        self.attempts.remove(&id);
        match registry.transition(&id, &[Connecting], Error, Some(reason)) {
            Ok(_) => warn!(transport = %self.kind, device = %id, %reason, "connect failed"),
            Err(e) => debug!(transport = %self.kind, device = %id, error = %e, "connect failure discarded"),
        }
    }

    pub(crate) async fn on_connect_timeout(
        &mut self,
        id: DeviceId,
        token: u64,
        registry: &mut DeviceRegistry,
        ctx: &WorkerContext,
    ) {
        if !self.is_current_attempt(&id, token) {
            return;
        }
        self.attempts.remove(&id);
        ctx.adapter().cancel_connect(&id).await;
        match registry.transition(&id, &[Connecting], Error, Some(FailureReason::Timeout)) {
            Ok(_) => warn!(transport = %self.kind, device = %id, "connect timed out"),
            Err(e) => debug!(transport = %self.kind, device = %id, error = %e, "connect timeout discarded"),
        }
    }

    pub(crate) async fn on_disconnect_settled(
        &mut self,
        id: DeviceId,
        token: u64,
        timed_out: bool,
        registry: &mut DeviceRegistry,
        ctx: &WorkerContext,
    ) {
        if !self.releases.get(&id).is_some_and(|r| r.token == token) {
            debug!(transport = %self.kind, device = %id, token, "stale disconnect signal dropped");
            return;
        }
        self.releases.remove(&id);
        if timed_out {
            warn!(transport = %self.kind, device = %id, "adapter never confirmed disconnect, forcing");
        }
        self.settle_release(&id, registry);
        self.resume_queued(registry, ctx).await;
    }

    // ------------------------------------------------------------------------
    // Teardown
    // ------------------------------------------------------------------------

    /// Hard teardown on transport disable: cancel everything outstanding and
    /// drop every engaged device to its quiescent state without the
    /// `Disconnecting` step.
    pub(crate) async fn teardown(&mut self, registry: &mut DeviceRegistry, ctx: &WorkerContext) -> usize {
        let running: Vec<DeviceId> = self
            .attempts
            .iter()
            .filter(|(_, a)| a.timer.is_some())
            .map(|(id, _)| id.clone())
            .collect();
        for id in &running {
            ctx.adapter().cancel_connect(id).await;
        }
        self.attempts.clear();
        self.releases.clear();
        self.queued = None;

        let torn = registry.teardown();
        if !torn.is_empty() {
            info!(transport = %self.kind, devices = torn.len(), "hard teardown");
        }
        torn.len()
    }

    // ------------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------------

    /// Enter `Connecting` from one of `from`, then either park for a credential
    /// or hand off to the adapter
    async fn start_attempt(
        &mut self,
        id: DeviceId,
        credential: Option<Credential>,
        from: &[DeviceState],
        registry: &mut DeviceRegistry,
        ctx: &WorkerContext,
    ) -> CommandOutcome {
        if let Err(e) = registry.transition(&id, from, Connecting, None) {
            return CommandOutcome::Rejected(e.into());
        }

        let needs_credential = self.kind.supports_credentials()
            && registry
                .get(&id)
                .is_some_and(|e| e.access().requires_credential());
        if needs_credential && credential.is_none() {
            let token = self.issue_token();
            self.attempts.insert(id.clone(), Attempt { token, timer: None });
            let reached = match registry.transition(
                &id,
                &[Connecting],
                AwaitingCredential,
                Some(FailureReason::CredentialRequired),
            ) {
                Ok(_) => AwaitingCredential,
                Err(_) => registry.state_of(&id).unwrap_or(Discovered),
            };
            info!(transport = %self.kind, device = %id, "credential required");
            return CommandOutcome::Accepted(Reached::Device(reached));
        }

        self.launch(id, credential, registry, ctx).await
    }

    /// Device is `Connecting`: arm the timeout and call the adapter
    async fn launch(
        &mut self,
        id: DeviceId,
        credential: Option<Credential>,
        registry: &mut DeviceRegistry,
        ctx: &WorkerContext,
    ) -> CommandOutcome {
        let token = self.issue_token();
        let timer = ctx.arm(
            self.connect_timeout,
            WorkerEvent::ConnectTimeout {
                id: id.clone(),
                token,
            },
        );
        let sink = ctx.connect_sink(&id, token);

        match ctx.adapter().begin_connect(&id, credential.as_ref(), sink).await {
            Ok(()) => {
                debug!(transport = %self.kind, device = %id, token, "connect attempt started");
                self.attempts.insert(id, Attempt { token, timer: Some(timer) });
                CommandOutcome::Accepted(Reached::Device(Connecting))
            }
            Err(e) => {
                drop(timer);
                self.attempts.remove(&id);
                warn!(transport = %self.kind, device = %id, error = %e, "adapter refused connect");
                let reached = match registry.transition(&id, &[Connecting], Error, Some(e.reason())) {
                    Ok(_) => Error,
                    Err(_) => registry.state_of(&id).unwrap_or(Discovered),
                };
                CommandOutcome::Accepted(Reached::Device(reached))
            }
        }
    }

    /// Release every other engaged device on an exclusive transport.
    /// Returns true if some device is still disconnecting afterwards.
    async fn clear_way(&mut self, target: &DeviceId, registry: &mut DeviceRegistry, ctx: &WorkerContext) -> bool {
        let others: Vec<(DeviceId, DeviceState)> = registry
            .ids_in(&[Connecting, AwaitingCredential, Connected, Disconnecting])
            .into_iter()
            .filter(|other| other != target)
            .filter_map(|other| registry.state_of(&other).map(|s| (other, s)))
            .collect();

        for (other, state) in others {
            match state {
                Connecting | AwaitingCredential => {
                    self.abandon(&other, FailureReason::Cancelled, registry, ctx).await;
                }
                Connected => {
                    self.begin_release(&other, registry, ctx).await;
                }
                _ => {}
            }
        }

        registry
            .ids_in(&[Disconnecting])
            .iter()
            .any(|other| other != target)
    }

    /// Drop an unsettled handshake straight back to quiescent
    async fn abandon(
        &mut self,
        id: &DeviceId,
        reason: FailureReason,
        registry: &mut DeviceRegistry,
        ctx: &WorkerContext,
    ) -> DeviceState {
        let running = self
            .attempts
            .remove(id)
            .is_some_and(|a| a.timer.is_some());
        if running {
            ctx.adapter().cancel_connect(id).await;
        }
        let quiescent = registry
            .get(id)
            .map(|e| e.quiescent_state())
            .unwrap_or(Discovered);
        match registry.transition(id, &[Connecting, AwaitingCredential], quiescent, Some(reason)) {
            Ok(_) => {
                info!(transport = %self.kind, device = %id, %reason, "connect abandoned");
                quiescent
            }
            Err(_) => registry.state_of(id).unwrap_or(quiescent),
        }
    }

    /// `Connected -> Disconnecting` and ask the adapter to let go
    async fn begin_release(&mut self, id: &DeviceId, registry: &mut DeviceRegistry, ctx: &WorkerContext) -> DeviceState {
        if let Err(e) = registry.transition(id, &[Connected], Disconnecting, None) {
            debug!(transport = %self.kind, device = %id, error = %e, "release skipped");
            return registry.state_of(id).unwrap_or(Discovered);
        }
        let token = self.issue_token();
        let sink = ctx.disconnect_sink(id, token);
        match ctx.adapter().begin_disconnect(id, sink).await {
            Ok(()) => {
                let timer = ctx.arm(
                    self.disconnect_timeout,
                    WorkerEvent::DisconnectTimeout {
                        id: id.clone(),
                        token,
                    },
                );
                self.releases.insert(id.clone(), Release { token, _timer: timer });
                info!(transport = %self.kind, device = %id, "disconnecting");
                Disconnecting
            }
            Err(e) => {
                warn!(transport = %self.kind, device = %id, error = %e, "adapter refused disconnect, forcing");
                self.settle_release(id, registry)
            }
        }
    }

    fn settle_release(&mut self, id: &DeviceId, registry: &mut DeviceRegistry) -> DeviceState {
        let quiescent = registry
            .get(id)
            .map(|e| e.quiescent_state())
            .unwrap_or(Discovered);
        match registry.transition(id, &[Disconnecting], quiescent, None) {
            Ok(_) => {
                info!(transport = %self.kind, device = %id, "disconnected");
                quiescent
            }
            Err(e) => {
                debug!(transport = %self.kind, device = %id, error = %e, "release settle discarded");
                registry.state_of(id).unwrap_or(quiescent)
            }
        }
    }

    /// Start the queued connect once nothing else is disconnecting
    async fn resume_queued(&mut self, registry: &mut DeviceRegistry, ctx: &WorkerContext) {
        let Some(queued) = self.queued.take() else {
            return;
        };
        if registry.ids_in(&[Disconnecting]).iter().any(|other| other != &queued.id) {
            self.queued = Some(queued);
            return;
        }
        let outcome = self
            .start_attempt(queued.id.clone(), queued.credential, &[Discovered, Known, Error], registry, ctx)
            .await;
        if let CommandOutcome::Rejected(reason) = outcome {
            warn!(transport = %self.kind, device = %queued.id, %reason, "queued connect dropped");
        }
    }
}
