// Mock Adapter
// Scripted adapter for tests: canned scan cycles, per-device connect behaviour,
// a call log, and manual triggers for late callbacks

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;

use super::sink::{ConnectSink, DisconnectSink, ScanSink};
use super::traits::{AdapterError, TransportAdapter};
use crate::device::{Credential, DeviceId, FailureReason, Observation, TransportKind};

// ============================================================================
// SCRIPT TYPES
// ============================================================================

/// How the mock answers a connect request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectBehavior {
    Succeed,
    Fail(FailureReason),
    /// Never answer (timeout path)
    Hang,
    /// Succeed only with this secret
    RequireCredential(String),
    /// Refuse to start the attempt at all
    RefuseToStart,
}

/// How the mock answers a disconnect request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectBehavior {
    Complete,
    Hang,
}

/// Every call the session made into the adapter, in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdapterCall {
    SetPowered(bool),
    BeginScan,
    CancelScan,
    BeginConnect { id: DeviceId, with_credential: bool },
    CancelConnect(DeviceId),
    BeginDisconnect(DeviceId),
}

// ============================================================================
// MOCK ADAPTER
// ============================================================================

pub struct MockAdapter {
    kind: TransportKind,
    latency: Duration,
    completes_scans: bool,
    scan_cycles: Mutex<VecDeque<Vec<Vec<Observation>>>>,
    connect_default: ConnectBehavior,
    connect_overrides: HashMap<DeviceId, ConnectBehavior>,
    disconnect: DisconnectBehavior,
    calls: Mutex<Vec<AdapterCall>>,
    scan_task: Mutex<Option<JoinHandle<()>>>,
    connect_tasks: Mutex<HashMap<DeviceId, JoinHandle<()>>>,
    connect_sinks: Mutex<HashMap<DeviceId, ConnectSink>>,
    disconnect_sinks: Mutex<HashMap<DeviceId, DisconnectSink>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MockAdapter {
    /// Create a mock that connects successfully and completes scans with no results
    pub fn new(kind: TransportKind) -> Self {
        Self {
            kind,
            latency: Duration::from_millis(100),
            completes_scans: true,
            scan_cycles: Mutex::new(VecDeque::new()),
            connect_default: ConnectBehavior::Succeed,
            connect_overrides: HashMap::new(),
            disconnect: DisconnectBehavior::Complete,
            calls: Mutex::new(Vec::new()),
            scan_task: Mutex::new(None),
            connect_tasks: Mutex::new(HashMap::new()),
            connect_sinks: Mutex::new(HashMap::new()),
            disconnect_sinks: Mutex::new(HashMap::new()),
        }
    }

    /// Delay before each scripted callback
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Queue one scan cycle made of incremental batches.
    /// The last queued cycle repeats for every later scan.
    pub fn with_scan_cycle(self, batches: Vec<Vec<Observation>>) -> Self {
        lock(&self.scan_cycles).push_back(batches);
        self
    }

    /// Whether scans signal completion (otherwise they run into the scan timeout)
    pub fn with_scan_completion(mut self, completes: bool) -> Self {
        self.completes_scans = completes;
        self
    }

    pub fn with_default_connect(mut self, behavior: ConnectBehavior) -> Self {
        self.connect_default = behavior;
        self
    }

    pub fn with_connect(mut self, id: &str, behavior: ConnectBehavior) -> Self {
        self.connect_overrides.insert(DeviceId::from(id), behavior);
        self
    }

    pub fn with_disconnect(mut self, behavior: DisconnectBehavior) -> Self {
        self.disconnect = behavior;
        self
    }

    // ------------------------------------------------------------------------
    // Inspection
    // ------------------------------------------------------------------------

    pub fn calls(&self) -> Vec<AdapterCall> {
        lock(&self.calls).clone()
    }

    pub fn connect_attempts(&self, id: &str) -> usize {
        let id = DeviceId::from(id);
        lock(&self.calls)
            .iter()
            .filter(|c| matches!(c, AdapterCall::BeginConnect { id: called, .. } if *called == id))
            .count()
    }

    pub fn was_called(&self, call: &AdapterCall) -> bool {
        lock(&self.calls).contains(call)
    }

    // ------------------------------------------------------------------------
    // Manual triggers (late or out-of-band callbacks)
    // ------------------------------------------------------------------------

    /// Fire success on the most recent connect sink for a device
    pub fn resolve_connect(&self, id: &str) -> bool {
        lock(&self.connect_sinks)
            .get(&DeviceId::from(id))
            .map(|sink| sink.succeeded())
            .unwrap_or(false)
    }

    /// Fire failure on the most recent connect sink for a device
    pub fn fail_connect(&self, id: &str, reason: FailureReason) -> bool {
        lock(&self.connect_sinks)
            .get(&DeviceId::from(id))
            .map(|sink| sink.failed(reason))
            .unwrap_or(false)
    }

    /// Complete a held disconnect
    pub fn finish_disconnect(&self, id: &str) -> bool {
        lock(&self.disconnect_sinks)
            .get(&DeviceId::from(id))
            .map(|sink| sink.done())
            .unwrap_or(false)
    }

    fn record(&self, call: AdapterCall) {
        lock(&self.calls).push(call);
    }

    fn behavior_for(&self, id: &DeviceId) -> ConnectBehavior {
        self.connect_overrides
            .get(id)
            .cloned()
            .unwrap_or_else(|| self.connect_default.clone())
    }

    fn next_scan_cycle(&self) -> Vec<Vec<Observation>> {
        let mut cycles = lock(&self.scan_cycles);
        if cycles.len() > 1 {
            cycles.pop_front().unwrap_or_default()
        } else {
            cycles.front().cloned().unwrap_or_default()
        }
    }
}

#[async_trait]
impl TransportAdapter for MockAdapter {
    fn kind(&self) -> TransportKind {
        self.kind
    }

    async fn set_powered(&self, on: bool) -> Result<(), AdapterError> {
        self.record(AdapterCall::SetPowered(on));
        Ok(())
    }

    async fn begin_scan(&self, sink: ScanSink) -> Result<(), AdapterError> {
        self.record(AdapterCall::BeginScan);
        let batches = self.next_scan_cycle();
        let latency = self.latency;
        let completes = self.completes_scans;

        let task = tokio::spawn(async move {
            for batch in batches {
                tokio::time::sleep(latency).await;
                sink.report(batch);
            }
            if completes {
                tokio::time::sleep(latency).await;
                sink.complete();
            }
        });
        if let Some(previous) = lock(&self.scan_task).replace(task) {
            previous.abort();
        }
        Ok(())
    }

    async fn cancel_scan(&self) {
        self.record(AdapterCall::CancelScan);
        if let Some(task) = lock(&self.scan_task).take() {
            task.abort();
        }
    }

    async fn begin_connect(
        &self,
        id: &DeviceId,
        credential: Option<&Credential>,
        sink: ConnectSink,
    ) -> Result<(), AdapterError> {
        self.record(AdapterCall::BeginConnect {
            id: id.clone(),
            with_credential: credential.is_some(),
        });

        let behavior = self.behavior_for(id);
        if behavior == ConnectBehavior::RefuseToStart {
            return Err(AdapterError::Unreachable("mock refused".to_string()));
        }
        lock(&self.connect_sinks).insert(id.clone(), sink.clone());

        let verdict: Option<Result<(), FailureReason>> = match behavior {
            ConnectBehavior::Succeed => Some(Ok(())),
            ConnectBehavior::Fail(reason) => Some(Err(reason)),
            ConnectBehavior::Hang | ConnectBehavior::RefuseToStart => None,
            ConnectBehavior::RequireCredential(secret) => Some(match credential {
                None => Err(FailureReason::CredentialRequired),
                Some(c) if c.expose() == secret => Ok(()),
                Some(_) => Err(FailureReason::CredentialRejected),
            }),
        };

        if let Some(verdict) = verdict {
            let latency = self.latency;
            let task = tokio::spawn(async move {
                tokio::time::sleep(latency).await;
                match verdict {
                    Ok(()) => sink.succeeded(),
                    Err(reason) => sink.failed(reason),
                };
            });
            if let Some(previous) = lock(&self.connect_tasks).insert(id.clone(), task) {
                previous.abort();
            }
        }
        Ok(())
    }

    async fn cancel_connect(&self, id: &DeviceId) {
        self.record(AdapterCall::CancelConnect(id.clone()));
        if let Some(task) = lock(&self.connect_tasks).remove(id) {
            task.abort();
        }
    }

    async fn begin_disconnect(&self, id: &DeviceId, sink: DisconnectSink) -> Result<(), AdapterError> {
        self.record(AdapterCall::BeginDisconnect(id.clone()));
        match self.disconnect {
            DisconnectBehavior::Complete => {
                let latency = self.latency;
                tokio::spawn(async move {
                    tokio::time::sleep(latency).await;
                    sink.done();
                });
            }
            DisconnectBehavior::Hang => {
                lock(&self.disconnect_sinks).insert(id.clone(), sink);
            }
        }
        Ok(())
    }
}
