// Snapshot Publisher
// Fans every registry mutation out to snapshot subscribers

use tokio::sync::{broadcast, watch};
use tracing::warn;

use crate::device::{TransportKind, TransportSnapshot, TransportState};

/// Default number of snapshots buffered per subscriber
pub const SNAPSHOT_BUFFER: usize = 256;

/// Sending half owned by the registry
pub struct SnapshotPublisher {
    kind: TransportKind,
    current: watch::Sender<TransportSnapshot>,
    stream: broadcast::Sender<TransportSnapshot>,
}

impl SnapshotPublisher {
    pub fn new(kind: TransportKind, initial: TransportState, buffer: usize) -> Self {
        let (current, _) = watch::channel(TransportSnapshot::empty(kind, initial));
        let (stream, _) = broadcast::channel(buffer.max(1));
        Self {
            kind,
            current,
            stream,
        }
    }

    /// Publish a snapshot to the current-value slot and to every stream
    pub fn publish(&self, snapshot: TransportSnapshot) {
        self.current.send_replace(snapshot.clone());
        // No subscribers is fine; the current slot still holds the value
        let _ = self.stream.send(snapshot);
    }

    /// Last published snapshot
    pub fn current(&self) -> TransportSnapshot {
        self.current.borrow().clone()
    }

    pub fn subscribe(&self) -> SnapshotStream {
        SnapshotStream::new(self.kind, self.stream.subscribe())
    }

    /// Read-side handle that outlives borrows of the publisher
    pub fn feed(&self) -> SnapshotFeed {
        SnapshotFeed {
            kind: self.kind,
            current: self.current.subscribe(),
            stream: self.stream.clone(),
        }
    }
}

/// Read side of a publisher: synchronous current value plus new subscriptions
#[derive(Clone)]
pub struct SnapshotFeed {
    kind: TransportKind,
    current: watch::Receiver<TransportSnapshot>,
    stream: broadcast::Sender<TransportSnapshot>,
}

impl SnapshotFeed {
    pub fn current(&self) -> TransportSnapshot {
        self.current.borrow().clone()
    }

    pub fn subscribe(&self) -> SnapshotStream {
        SnapshotStream::new(self.kind, self.stream.subscribe())
    }
}

/// Stream of full snapshots, one per registry mutation
pub struct SnapshotStream {
    kind: TransportKind,
    rx: broadcast::Receiver<TransportSnapshot>,
}

impl SnapshotStream {
    fn new(kind: TransportKind, rx: broadcast::Receiver<TransportSnapshot>) -> Self {
        Self { kind, rx }
    }

    pub fn kind(&self) -> TransportKind {
        self.kind
    }

    /// Wait for the next snapshot. Returns `None` once the transport worker is gone.
    /// A subscriber that falls behind skips to the oldest buffered snapshot.
    pub async fn next(&mut self) -> Option<TransportSnapshot> {
        loop {
            match self.rx.recv().await {
                Ok(snapshot) => return Some(snapshot),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(transport = %self.kind, skipped, "snapshot subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking variant of `next`
    pub fn try_next(&mut self) -> Option<TransportSnapshot> {
        loop {
            match self.rx.try_recv() {
                Ok(snapshot) => return Some(snapshot),
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    warn!(transport = %self.kind, skipped, "snapshot subscriber lagged");
                }
                Err(_) => return None,
            }
        }
    }

    /// Drain everything buffered so far
    pub fn drain(&mut self) -> Vec<TransportSnapshot> {
        std::iter::from_fn(|| self.try_next()).collect()
    }
}
