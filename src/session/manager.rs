// Session Manager
// Facade over the per-transport workers: commands in, snapshots out

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::config::SessionConfig;
use super::worker::{Command, Op, TransportWorker, WorkerHandle};
use super::SessionError;
use crate::adapter::TransportAdapter;
use crate::device::{
    CommandOutcome, Credential, DeviceId, Observation, Rejection, TransportKind, TransportSnapshot,
};
use crate::registry::{SnapshotFeed, SnapshotStream};

// ============================================================================
// BUILDER
// ============================================================================

/// Collects one adapter per transport, then spawns the workers
pub struct SessionManagerBuilder {
    config: SessionConfig,
    adapters: Vec<Arc<dyn TransportAdapter>>,
}

impl SessionManagerBuilder {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            adapters: Vec::new(),
        }
    }

    /// Register the adapter driving the transport it reports via `kind()`
    pub fn with_adapter(mut self, adapter: Arc<dyn TransportAdapter>) -> Self {
        self.adapters.push(adapter);
        self
    }

    /// Validate and spawn one worker per adapter. Must run inside a tokio runtime.
    pub fn build(self) -> Result<SessionManager, SessionError> {
        self.config.validate()?;
        if self.adapters.is_empty() {
            return Err(SessionError::MissingAdapter);
        }

        let mut seen = Vec::with_capacity(self.adapters.len());
        for adapter in &self.adapters {
            let kind = adapter.kind();
            if seen.contains(&kind) {
                return Err(SessionError::DuplicateTransport(kind));
            }
            seen.push(kind);
        }

        let mut transports = HashMap::with_capacity(self.adapters.len());
        for adapter in self.adapters {
            let kind = adapter.kind();
            let handle = TransportWorker::spawn(
                adapter,
                self.config.transport(kind),
                self.config.command_queue_depth,
                self.config.snapshot_buffer,
            );
            transports.insert(kind, TransportHandle::from(handle));
        }

        info!(transports = transports.len(), "session manager started");
        Ok(SessionManager { transports })
    }
}

// ============================================================================
// SESSION MANAGER
// ============================================================================

struct TransportHandle {
    commands: mpsc::Sender<Command>,
    feed: SnapshotFeed,
    task: JoinHandle<()>,
}

impl From<WorkerHandle> for TransportHandle {
    fn from(handle: WorkerHandle) -> Self {
        Self {
            commands: handle.commands,
            feed: handle.feed,
            task: handle.task,
        }
    }
}

/// Command and query API for every configured transport.
///
/// Commands return once the owning worker has applied them; the outcome names
/// the state actually reached, which may differ from the one requested when a
/// racing callback won. Later changes arrive on the `subscribe` stream.
pub struct SessionManager {
    transports: HashMap<TransportKind, TransportHandle>,
}

impl SessionManager {
    pub fn builder(config: SessionConfig) -> SessionManagerBuilder {
        SessionManagerBuilder::new(config)
    }

    /// Configured transports, in declaration order
    pub fn transports(&self) -> Vec<TransportKind> {
        TransportKind::ALL
            .into_iter()
            .filter(|kind| self.transports.contains_key(kind))
            .collect()
    }

    // ------------------------------------------------------------------------
    // Transport commands
    // ------------------------------------------------------------------------

    /// Toggle `Disabled <-> Idle`. Disabling tears down every session on the transport.
    pub async fn set_enabled(&self, kind: TransportKind, enabled: bool) -> CommandOutcome {
        self.send(kind, Op::SetEnabled(enabled)).await
    }

    pub async fn scan(&self, kind: TransportKind) -> CommandOutcome {
        self.send(kind, Op::Scan).await
    }

    pub async fn stop_scan(&self, kind: TransportKind) -> CommandOutcome {
        self.send(kind, Op::StopScan).await
    }

    // ------------------------------------------------------------------------
    // Device commands
    // ------------------------------------------------------------------------

    pub async fn connect(
        &self,
        kind: TransportKind,
        id: impl Into<DeviceId>,
        credential: Option<Credential>,
    ) -> CommandOutcome {
        let id = id.into();
        self.send(kind, Op::Connect { id, credential }).await
    }

    /// Restart the session of a connected device
    pub async fn reconnect(&self, kind: TransportKind, id: impl Into<DeviceId>) -> CommandOutcome {
        self.send(kind, Op::Reconnect(id.into())).await
    }

    pub async fn supply_credential(
        &self,
        kind: TransportKind,
        id: impl Into<DeviceId>,
        credential: impl Into<Credential>,
    ) -> CommandOutcome {
        let id = id.into();
        let credential = credential.into();
        self.send(kind, Op::SupplyCredential { id, credential }).await
    }

    pub async fn cancel_credential(&self, kind: TransportKind, id: impl Into<DeviceId>) -> CommandOutcome {
        self.send(kind, Op::CancelCredential(id.into())).await
    }

    pub async fn disconnect(&self, kind: TransportKind, id: impl Into<DeviceId>) -> CommandOutcome {
        self.send(kind, Op::Disconnect(id.into())).await
    }

    pub async fn dismiss_error(&self, kind: TransportKind, id: impl Into<DeviceId>) -> CommandOutcome {
        self.send(kind, Op::DismissError(id.into())).await
    }

    pub async fn reset_retries(&self, kind: TransportKind, id: impl Into<DeviceId>) -> CommandOutcome {
        self.send(kind, Op::ResetRetries(id.into())).await
    }

    /// Add or promote a known (paired) entry; it survives pruning and disable
    pub async fn register_known(&self, kind: TransportKind, observation: Observation) -> CommandOutcome {
        self.send(kind, Op::RegisterKnown(observation)).await
    }

    pub async fn forget(&self, kind: TransportKind, id: impl Into<DeviceId>) -> CommandOutcome {
        self.send(kind, Op::Forget(id.into())).await
    }

    // ------------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------------

    /// Stream of full snapshots, one per registry mutation from now on
    pub fn subscribe(&self, kind: TransportKind) -> Option<SnapshotStream> {
        self.transports.get(&kind).map(|t| t.feed.subscribe())
    }

    /// Latest published snapshot
    pub fn current_snapshot(&self, kind: TransportKind) -> Option<TransportSnapshot> {
        self.transports.get(&kind).map(|t| t.feed.current())
    }

    /// Close every command queue and wait for the workers to tear down
    pub async fn shutdown(self) {
        let mut tasks = Vec::with_capacity(self.transports.len());
        for (kind, handle) in self.transports {
            drop(handle.commands);
            tasks.push((kind, handle.task));
        }
        for (kind, task) in tasks {
            if let Err(e) = task.await {
                warn!(transport = %kind, error = %e, "worker ended abnormally");
            }
        }
        info!("session manager stopped");
    }

    async fn send(&self, kind: TransportKind, op: Op) -> CommandOutcome {
        let Some(transport) = self.transports.get(&kind) else {
            return CommandOutcome::Rejected(Rejection::UnknownTransport(kind));
        };
        let (reply, response) = oneshot::channel();
        if transport.commands.send(Command { op, reply }).await.is_err() {
            debug!(transport = %kind, "command queue closed");
            return CommandOutcome::Rejected(Rejection::WorkerStopped);
        }
        response
            .await
            .unwrap_or(CommandOutcome::Rejected(Rejection::WorkerStopped))
    }
}
