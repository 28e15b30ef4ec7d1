// Simulated Adapter
// Stand-in hardware for the demo binary: fixed peripherals, artificial latency,
// jittered signal readings

use async_trait::async_trait;
use rand::Rng;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;

use super::sink::{ConnectSink, DisconnectSink, ScanSink};
use super::traits::{AdapterError, TransportAdapter};
use crate::device::{Credential, DeviceId, FailureReason, Observation, TransportKind};

/// A peripheral the simulation knows about
#[derive(Debug, Clone)]
pub struct SimulatedDevice {
    pub observation: Observation,
    /// Secret accepted for credentialed devices
    pub secret: Option<String>,
    /// Whether the device should be registered as known/paired up front
    pub paired: bool,
    /// Whether the device answers connects at all
    pub reachable: bool,
}

impl SimulatedDevice {
    pub fn new(observation: Observation) -> Self {
        Self {
            observation,
            secret: None,
            paired: false,
            reachable: true,
        }
    }

    pub fn with_secret(mut self, secret: &str) -> Self {
        self.secret = Some(secret.to_string());
        self
    }

    pub fn paired(mut self) -> Self {
        self.paired = true;
        self
    }

    pub fn unreachable(mut self) -> Self {
        self.reachable = false;
        self
    }
}

pub struct SimulatedAdapter {
    kind: TransportKind,
    devices: Vec<SimulatedDevice>,
    scan_latency: Duration,
    connect_latency: Duration,
    scan_task: Mutex<Option<JoinHandle<()>>>,
    connect_tasks: Mutex<HashMap<DeviceId, JoinHandle<()>>>,
}

impl SimulatedAdapter {
    pub fn new(kind: TransportKind, devices: Vec<SimulatedDevice>) -> Self {
        Self {
            kind,
            devices,
            scan_latency: Duration::from_secs(2),
            connect_latency: Duration::from_secs(1),
            scan_task: Mutex::new(None),
            connect_tasks: Mutex::new(HashMap::new()),
        }
    }

    /// Peripherals shown by the dashboard for each transport
    pub fn dashboard(kind: TransportKind) -> Self {
        let devices = match kind {
            TransportKind::Network => vec![
                SimulatedDevice::new(
                    Observation::new("AA:BB:CC:DD:EE:FF").with_name("HomeNetwork").with_signal(78).credentialed(),
                )
                .with_secret("home-secret"),
                SimulatedDevice::new(
                    Observation::new("11:22:33:44:55:66").with_name("Neighbor_5G").with_signal(65).credentialed(),
                )
                .with_secret("not-yours"),
                SimulatedDevice::new(
                    Observation::new("77:88:99:AA:BB:CC").with_name("CoffeeShop").with_signal(52).open(),
                ),
                SimulatedDevice::new(
                    Observation::new("DD:EE:FF:00:11:22").with_name("Neighbor_2G").with_signal(35).credentialed(),
                )
                .unreachable(),
            ],
            TransportKind::Radio => vec![
                SimulatedDevice::new(
                    Observation::new("AA:BB:CC:DD:EE:01").with_name("JBL Flip 6").with_signal(84).open(),
                )
                .paired(),
                SimulatedDevice::new(
                    Observation::new("AA:BB:CC:DD:EE:02").with_name("Logitech K380").with_signal(70).open(),
                )
                .paired(),
                SimulatedDevice::new(
                    Observation::new("11:22:33:44:55:01").with_name("Sony WH-1000XM4").with_signal(88).open(),
                ),
                SimulatedDevice::new(Observation::new("11:22:33:44:55:02").with_signal(40).open()),
                SimulatedDevice::new(
                    Observation::new("11:22:33:44:55:03").with_name("Magic Keyboard").with_signal(82).credentialed(),
                )
                .with_secret("0000"),
            ],
            TransportKind::Stream => vec![SimulatedDevice::new(
                Observation::new("camera-0").with_name("Camera 720p"),
            )
            .paired()],
            TransportKind::Sink => vec![
                SimulatedDevice::new(Observation::new("hdmi").with_name("HDMI")).paired(),
                SimulatedDevice::new(Observation::new("jack").with_name("3.5mm Jack")).paired(),
                SimulatedDevice::new(Observation::new("bt").with_name("JBL Flip 6")).paired(),
            ],
        };
        Self::new(kind, devices)
    }

    /// Devices that should be registered as known before the first scan
    pub fn paired_devices(&self) -> Vec<Observation> {
        self.devices
            .iter()
            .filter(|d| d.paired)
            .map(|d| d.observation.clone())
            .collect()
    }

    fn find(&self, id: &DeviceId) -> Option<&SimulatedDevice> {
        self.devices.iter().find(|d| &d.observation.id == id)
    }

    fn jittered(&self) -> Vec<Observation> {
        let mut rng = rand::thread_rng();
        self.devices
            .iter()
            .map(|d| {
                let mut observation = d.observation.clone();
                if let Some(signal) = observation.signal {
                    let jitter: i16 = rng.gen_range(-5..=5);
                    observation.signal = Some((signal as i16 + jitter).clamp(0, 100) as u8);
                }
                observation
            })
            .collect()
    }
}

#[async_trait]
impl TransportAdapter for SimulatedAdapter {
    fn kind(&self) -> TransportKind {
        self.kind
    }

    async fn set_powered(&self, on: bool) -> Result<(), AdapterError> {
        debug!(transport = %self.kind, on, "simulated power switch");
        Ok(())
    }

    async fn begin_scan(&self, sink: ScanSink) -> Result<(), AdapterError> {
        let observations = self.jittered();
        let latency = self.scan_latency;
        // Results trickle in as two batches, like a radio sweeping channels
        let task = tokio::spawn(async move {
            let split = observations.len() / 2;
            let (first, second) = observations.split_at(split);
            tokio::time::sleep(latency / 2).await;
            sink.report(first.to_vec());
            tokio::time::sleep(latency / 2).await;
            sink.report(second.to_vec());
            sink.complete();
        });
        let previous = self
            .scan_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(task);
        if let Some(previous) = previous {
            previous.abort();
        }
        Ok(())
    }

    async fn cancel_scan(&self) {
        let task = self.scan_task.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(task) = task {
            task.abort();
        }
    }

    async fn begin_connect(
        &self,
        id: &DeviceId,
        credential: Option<&Credential>,
        sink: ConnectSink,
    ) -> Result<(), AdapterError> {
        let device = self
            .find(id)
            .ok_or_else(|| AdapterError::Unreachable(format!("{} not in range", id)))?;

        let verdict = if !device.reachable {
            // Let the session's connect timeout take over
            None
        } else {
            Some(match (&device.secret, credential) {
                (None, _) => Ok(()),
                (Some(_), None) => Err(FailureReason::CredentialRequired),
                (Some(secret), Some(given)) if given.expose() == secret.as_str() => Ok(()),
                (Some(_), Some(_)) => Err(FailureReason::CredentialRejected),
            })
        };

        let Some(verdict) = verdict else {
            return Ok(());
        };
        let latency = self.connect_latency;
        let task = tokio::spawn(async move {
            tokio::time::sleep(latency).await;
            match verdict {
                Ok(()) => sink.succeeded(),
                Err(reason) => sink.failed(reason),
            };
        });
        let previous = self
            .connect_tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.clone(), task);
        if let Some(previous) = previous {
            previous.abort();
        }
        Ok(())
    }

    async fn cancel_connect(&self, id: &DeviceId) {
        let task = self
            .connect_tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id);
        if let Some(task) = task {
            task.abort();
        }
    }

    async fn begin_disconnect(&self, _id: &DeviceId, sink: DisconnectSink) -> Result<(), AdapterError> {
        let latency = self.connect_latency / 2;
        tokio::spawn(async move {
            tokio::time::sleep(latency).await;
            sink.done();
        });
        Ok(())
    }
}
