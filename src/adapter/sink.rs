// Adapter Callback Sinks
// Handles adapters use to report results back into the transport worker

use tokio::sync::mpsc;

use crate::device::{DeviceId, FailureReason, Observation};
use crate::session::WorkerEvent;

/// Receives discovery results for one scan cycle
#[derive(Clone, Debug)]
pub struct ScanSink {
    cycle: u64,
    inbox: mpsc::UnboundedSender<WorkerEvent>,
}

impl ScanSink {
    pub(crate) fn new(cycle: u64, inbox: mpsc::UnboundedSender<WorkerEvent>) -> Self {
        Self { cycle, inbox }
    }

    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    /// Report a batch of observed devices. Returns false once the worker is gone.
    pub fn report(&self, batch: Vec<Observation>) -> bool {
        self.inbox
            .send(WorkerEvent::ScanResults {
                cycle: self.cycle,
                batch,
            })
            .is_ok()
    }

    /// Signal that the pass finished
    pub fn complete(&self) -> bool {
        self.inbox
            .send(WorkerEvent::ScanComplete { cycle: self.cycle })
            .is_ok()
    }
}

/// Receives the outcome of one connect attempt
#[derive(Clone, Debug)]
pub struct ConnectSink {
    id: DeviceId,
    token: u64,
    inbox: mpsc::UnboundedSender<WorkerEvent>,
}

impl ConnectSink {
    pub(crate) fn new(id: DeviceId, token: u64, inbox: mpsc::UnboundedSender<WorkerEvent>) -> Self {
        Self { id, token, inbox }
    }

    pub fn device(&self) -> &DeviceId {
        &self.id
    }

    pub fn succeeded(&self) -> bool {
        self.inbox
            .send(WorkerEvent::ConnectSucceeded {
                id: self.id.clone(),
                token: self.token,
            })
            .is_ok()
    }

    pub fn failed(&self, reason: FailureReason) -> bool {
        self.inbox
            .send(WorkerEvent::ConnectFailed {
                id: self.id.clone(),
                token: self.token,
                reason,
            })
            .is_ok()
    }
}

/// Receives completion of one orderly disconnect
#[derive(Clone, Debug)]
pub struct DisconnectSink {
    id: DeviceId,
    token: u64,
    inbox: mpsc::UnboundedSender<WorkerEvent>,
}

impl DisconnectSink {
    pub(crate) fn new(id: DeviceId, token: u64, inbox: mpsc::UnboundedSender<WorkerEvent>) -> Self {
        Self { id, token, inbox }
    }

    pub fn device(&self) -> &DeviceId {
        &self.id
    }

    pub fn done(&self) -> bool {
        self.inbox
            .send(WorkerEvent::DisconnectDone {
                id: self.id.clone(),
                token: self.token,
            })
            .is_ok()
    }
}
