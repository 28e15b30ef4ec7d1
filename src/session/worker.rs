// Transport Worker
// Single owner of one transport's registry. Caller commands and adapter
// callbacks are funnelled into one task and applied one at a time.

use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::config::TransportConfig;
use super::context::{WorkerContext, WorkerEvent};
use crate::adapter::TransportAdapter;
use crate::connection::ConnectionController;
use crate::device::{
    CommandOutcome, Credential, DeviceId, DeviceState, Observation, Reached, Rejection, TransportKind, TransportState,
};
use crate::discovery::{DiscoveryCoordinator, ScanEnd};
use crate::registry::{DeviceRegistry, SnapshotFeed, SnapshotPublisher};

// ============================================================================
// COMMANDS
// ============================================================================

/// Operation requested by a caller
#[derive(Debug)]
pub(crate) enum Op {
    SetEnabled(bool),
    Scan,
    StopScan,
    Connect { id: DeviceId, credential: Option<Credential> },
    Reconnect(DeviceId),
    SupplyCredential { id: DeviceId, credential: Credential },
    CancelCredential(DeviceId),
    Disconnect(DeviceId),
    DismissError(DeviceId),
    RegisterKnown(Observation),
    Forget(DeviceId),
    ResetRetries(DeviceId),
}

impl Op {
    /// Device commands are refused while the transport is disabled
    fn needs_enabled(&self) -> bool {
        matches!(
            self,
            Op::Connect { .. }
                | Op::Reconnect(_)
                | Op::SupplyCredential { .. }
                | Op::CancelCredential(_)
                | Op::Disconnect(_)
                | Op::DismissError(_)
        )
    }
}

/// An operation plus the channel its outcome goes back on
pub(crate) struct Command {
    pub(crate) op: Op,
    pub(crate) reply: oneshot::Sender<CommandOutcome>,
}

/// Caller side of a running worker
pub(crate) struct WorkerHandle {
    pub(crate) commands: mpsc::Sender<Command>,
    pub(crate) feed: SnapshotFeed,
    pub(crate) task: JoinHandle<()>,
}

// ============================================================================
// TRANSPORT WORKER
// ============================================================================

pub(crate) struct TransportWorker {
    kind: TransportKind,
    power_on_start: bool,
    registry: DeviceRegistry,
    discovery: DiscoveryCoordinator,
    connection: ConnectionController,
    ctx: WorkerContext,
    commands: mpsc::Receiver<Command>,
    events: mpsc::UnboundedReceiver<WorkerEvent>,
}

impl TransportWorker {
    /// Build the worker for one transport and spawn it on the runtime
    pub(crate) fn spawn(
        adapter: Arc<dyn TransportAdapter>,
        config: &TransportConfig,
        queue_depth: usize,
        snapshot_buffer: usize,
    ) -> WorkerHandle {
        let kind = adapter.kind();
        let initial = if config.initially_enabled {
            TransportState::Idle
        } else {
            TransportState::Disabled
        };

        let publisher = SnapshotPublisher::new(kind, initial, snapshot_buffer);
        let registry = DeviceRegistry::new(kind, initial, publisher);
        let feed = registry.feed();

        let (command_tx, command_rx) = mpsc::channel(queue_depth);
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let worker = Self {
            kind,
            power_on_start: config.initially_enabled,
            registry,
            discovery: DiscoveryCoordinator::new(config.scan_timeout),
            connection: ConnectionController::new(kind, config.connect_timeout, config.disconnect_timeout),
            ctx: WorkerContext::new(kind, adapter, event_tx),
            commands: command_rx,
            events: event_rx,
        };

        WorkerHandle {
            commands: command_tx,
            feed,
            task: tokio::spawn(worker.run()),
        }
    }

    async fn run(mut self) {
        info!(transport = %self.kind, state = %self.registry.transport_state(), "worker started");

        if self.power_on_start {
            if let Err(e) = self.ctx.adapter().set_powered(true).await {
                warn!(transport = %self.kind, error = %e, "power on failed, starting disabled");
                let _ = self.registry.set_transport_state(TransportState::Disabled);
            }
        }

        loop {
            tokio::select! {
                // Adapter callbacks first: they settle state the next command may depend on
                biased;

                Some(event) = self.events.recv() => self.handle_event(event).await,

                command = self.commands.recv() => match command {
                    Some(Command { op, reply }) => {
                        let outcome = self.handle(op).await;
                        if reply.send(outcome).is_err() {
                            debug!(transport = %self.kind, "caller dropped before reply");
                        }
                    }
                    None => break,
                },
            }
        }

        self.discovery.halt(&self.ctx).await;
        self.connection.teardown(&mut self.registry, &self.ctx).await;
        info!(transport = %self.kind, "worker stopped");
    }

    // ------------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------------

    async fn handle(&mut self, op: Op) -> CommandOutcome {
        if op.needs_enabled() && !self.registry.transport_state().is_enabled() {
            debug!(transport = %self.kind, ?op, "device command on disabled transport");
            return CommandOutcome::Rejected(Rejection::TransportDisabled);
        }

        let (registry, ctx) = (&mut self.registry, &self.ctx);
        match op {
            Op::SetEnabled(true) => self.enable().await,
            Op::SetEnabled(false) => self.disable().await,
            Op::Scan => self.discovery.start_scan(registry, ctx).await,
            Op::StopScan => self.discovery.stop_scan(registry, ctx).await,
            Op::Connect { id, credential } => self.connection.connect(id, credential, registry, ctx).await,
            Op::Reconnect(id) => self.connection.reconnect(id, registry, ctx).await,
            Op::SupplyCredential { id, credential } => {
                self.connection.supply_credential(id, credential, registry, ctx).await
            }
            Op::CancelCredential(id) => self.connection.cancel_credential(id, registry),
            Op::Disconnect(id) => self.connection.disconnect(id, registry, ctx).await,
            Op::DismissError(id) => self.connection.dismiss_error(id, registry),
            Op::RegisterKnown(observation) => {
                let id = observation.id.clone();
                let added = registry.register_known(observation);
                let state = registry.state_of(&id).unwrap_or(DeviceState::Known);
                debug!(transport = %self.kind, device = %id, added, "known device registered");
                CommandOutcome::Accepted(Reached::Device(state))
            }
            Op::Forget(id) => match registry.forget(&id) {
                Ok(_) => {
                    info!(transport = %self.kind, device = %id, "device forgotten");
                    CommandOutcome::Accepted(Reached::Done)
                }
                Err(e) => CommandOutcome::Rejected(e.into()),
            },
            Op::ResetRetries(id) => match registry.reset_retries(&id) {
                Ok(()) => CommandOutcome::Accepted(Reached::Done),
                Err(e) => CommandOutcome::Rejected(e.into()),
            },
        }
    }

    async fn enable(&mut self) -> CommandOutcome {
        let state = self.registry.transport_state();
        if state.is_enabled() {
            return CommandOutcome::NoOp(Reached::Transport(state));
        }
        if let Err(e) = self.ctx.adapter().set_powered(true).await {
            warn!(transport = %self.kind, error = %e, "power on failed");
            return CommandOutcome::Rejected(Rejection::Adapter(e.reason()));
        }
        match self.registry.set_transport_state(TransportState::Idle) {
            Ok(_) => {
                info!(transport = %self.kind, "transport enabled");
                CommandOutcome::Accepted(Reached::Transport(TransportState::Idle))
            }
            Err(e) => CommandOutcome::Rejected(e.into()),
        }
    }

    /// Stop scanning, hard-teardown every engaged device, drop ephemeral entries
    async fn disable(&mut self) -> CommandOutcome {
        let state = self.registry.transport_state();
        if !state.is_enabled() {
            return CommandOutcome::NoOp(Reached::Transport(state));
        }

        self.discovery.halt(&self.ctx).await;
        let torn = self.connection.teardown(&mut self.registry, &self.ctx).await;
        if let Err(e) = self.registry.set_transport_state(TransportState::Disabled) {
            return CommandOutcome::Rejected(e.into());
        }
        let pruned = self.registry.prune_ephemeral(None);

        if let Err(e) = self.ctx.adapter().set_powered(false).await {
            warn!(transport = %self.kind, error = %e, "power off failed");
        }
        info!(
            transport = %self.kind,
            was = %state,
            torn_down = torn,
            pruned = pruned.len(),
            "transport disabled"
        );
        CommandOutcome::Accepted(Reached::Transport(TransportState::Disabled))
    }

    // ------------------------------------------------------------------------
    // Adapter callbacks and timers
    // ------------------------------------------------------------------------

    async fn handle_event(&mut self, event: WorkerEvent) {
        let registry = &mut self.registry;
        let ctx = &self.ctx;
        match event {
            WorkerEvent::ScanResults { cycle, batch } => self.discovery.on_results(cycle, batch, registry),
            WorkerEvent::ScanComplete { cycle } => {
                let protected = self.connection.queued_target();
                self.discovery
                    .finish(cycle, ScanEnd::Completed, registry, ctx, protected)
                    .await
            }
            WorkerEvent::ScanTimeout { cycle } => {
                let protected = self.connection.queued_target();
                self.discovery
                    .finish(cycle, ScanEnd::TimedOut, registry, ctx, protected)
                    .await
            }
            WorkerEvent::ConnectSucceeded { id, token } => self.connection.on_connect_succeeded(id, token, registry),
            WorkerEvent::ConnectFailed { id, token, reason } => {
                self.connection.on_connect_failed(id, token, reason, registry)
            }
            WorkerEvent::ConnectTimeout { id, token } => {
                self.connection.on_connect_timeout(id, token, registry, ctx).await
            }
            WorkerEvent::DisconnectDone { id, token } => {
                self.connection
                    .on_disconnect_settled(id, token, false, registry, ctx)
                    .await
            }
            WorkerEvent::DisconnectTimeout { id, token } => {
                self.connection
                    .on_disconnect_settled(id, token, true, registry, ctx)
                    .await
            }
        }
    }
}
