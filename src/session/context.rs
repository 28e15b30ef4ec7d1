// Worker Context
// Events funnelled into a transport worker, cancellable timers, and the
// handles coordinators use to reach the adapter

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::adapter::{ConnectSink, DisconnectSink, ScanSink, TransportAdapter};
use crate::device::{DeviceId, FailureReason, Observation, TransportKind};

/// Asynchronous inputs to a worker other than caller commands:
/// adapter callbacks and timer expiries
#[derive(Debug)]
pub(crate) enum WorkerEvent {
    ScanResults { cycle: u64, batch: Vec<Observation> },
    ScanComplete { cycle: u64 },
    ScanTimeout { cycle: u64 },
    ConnectSucceeded { id: DeviceId, token: u64 },
    ConnectFailed { id: DeviceId, token: u64, reason: FailureReason },
    ConnectTimeout { id: DeviceId, token: u64 },
    DisconnectDone { id: DeviceId, token: u64 },
    DisconnectTimeout { id: DeviceId, token: u64 },
}

/// One-shot timer that posts an event to the worker. Dropping it disarms it.
pub(crate) struct Timer {
    handle: JoinHandle<()>,
}

impl Drop for Timer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// What a coordinator needs from the worker that owns it
pub(crate) struct WorkerContext {
    kind: TransportKind,
    adapter: Arc<dyn TransportAdapter>,
    inbox: mpsc::UnboundedSender<WorkerEvent>,
}

impl WorkerContext {
    pub(crate) fn new(
        kind: TransportKind,
        adapter: Arc<dyn TransportAdapter>,
        inbox: mpsc::UnboundedSender<WorkerEvent>,
    ) -> Self {
        Self { kind, adapter, inbox }
    }

    pub(crate) fn kind(&self) -> TransportKind {
        self.kind
    }

    pub(crate) fn adapter(&self) -> &dyn TransportAdapter {
        self.adapter.as_ref()
    }

    pub(crate) fn arm(&self, after: Duration, event: WorkerEvent) -> Timer {
        let inbox = self.inbox.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(after).await;
            let _ = inbox.send(event);
        });
        Timer { handle }
    }

    pub(crate) fn scan_sink(&self, cycle: u64) -> ScanSink {
        ScanSink::new(cycle, self.inbox.clone())
    }

    pub(crate) fn connect_sink(&self, id: &DeviceId, token: u64) -> ConnectSink {
        ConnectSink::new(id.clone(), token, self.inbox.clone())
    }

    pub(crate) fn disconnect_sink(&self, id: &DeviceId, token: u64) -> DisconnectSink {
        DisconnectSink::new(id.clone(), token, self.inbox.clone())
    }
}
