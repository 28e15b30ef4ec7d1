// Discovery Coordinator
// Scan lifecycle for one transport: Idle -> Scanning -> Idle
//
// Each scan is a numbered cycle. Results and completions from any cycle other
// than the running one are dropped, so a cancelled adapter that keeps
// reporting cannot touch the registry.

use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

use crate::device::{CommandOutcome, DeviceId, Observation, Reached, Rejection, TransportState};
use crate::registry::DeviceRegistry;
use crate::session::{Timer, WorkerContext, WorkerEvent};

/// How a scan cycle ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanEnd {
    /// Adapter signalled completion
    Completed,
    /// Scan timeout fired first
    TimedOut,
}

pub struct DiscoveryCoordinator {
    scan_timeout: Duration,
    cycle: u64,
    observed: HashSet<DeviceId>,
    timer: Option<Timer>,
}

impl DiscoveryCoordinator {
    pub fn new(scan_timeout: Duration) -> Self {
        Self {
            scan_timeout,
            cycle: 0,
            observed: HashSet::new(),
            timer: None,
        }
    }

    /// Begin a scan. Idempotent: disabled or already scanning yields `NoOp`.
    pub(crate) async fn start_scan(
        &mut self,
        registry: &mut DeviceRegistry,
        ctx: &WorkerContext,
    ) -> CommandOutcome {
        let state = registry.transport_state();
        if state != TransportState::Idle {
            debug!(transport = %ctx.kind(), %state, "scan request ignored");
            return CommandOutcome::NoOp(Reached::Transport(state));
        }

        self.cycle += 1;
        self.observed.clear();
        enter(registry, TransportState::Scanning);

        if let Err(e) = ctx.adapter().begin_scan(ctx.scan_sink(self.cycle)).await {
            warn!(transport = %ctx.kind(), cycle = self.cycle, error = %e, "adapter refused scan");
            enter(registry, TransportState::Idle);
            return CommandOutcome::Rejected(Rejection::Adapter(e.reason()));
        }

        self.timer = Some(ctx.arm(
            self.scan_timeout,
            WorkerEvent::ScanTimeout { cycle: self.cycle },
        ));
        info!(transport = %ctx.kind(), cycle = self.cycle, "scan started");
        CommandOutcome::Accepted(Reached::Transport(TransportState::Scanning))
    }

    /// Merge an incremental batch from the running cycle
    pub(crate) fn on_results(
        &mut self,
        cycle: u64,
        batch: Vec<Observation>,
        registry: &mut DeviceRegistry,
    ) {
        if !self.is_running(cycle, registry) {
            trace!(transport = %registry.kind(), cycle, "stale scan batch dropped");
            return;
        }
        self.observed.extend(batch.iter().map(|o| o.id.clone()));
        let summary = registry.upsert(batch);
        debug!(
            transport = %registry.kind(),
            cycle,
            added = summary.added,
            updated = summary.updated,
            "scan batch merged"
        );
    }

    /// Close the running cycle and prune ephemeral entries it did not observe.
    /// `protected` survives pruning even if unobserved (a queued connect target).
    pub(crate) async fn finish(
        &mut self,
        cycle: u64,
        end: ScanEnd,
        registry: &mut DeviceRegistry,
        ctx: &WorkerContext,
        protected: Option<&DeviceId>,
    ) {
        if !self.is_running(cycle, registry) {
            trace!(transport = %ctx.kind(), cycle, ?end, "stale scan end dropped");
            return;
        }
        self.timer = None;
        if end == ScanEnd::TimedOut {
            ctx.adapter().cancel_scan().await;
        }
        enter(registry, TransportState::Idle);
        let removed = registry.prune(&self.observed, protected);
        info!(
            transport = %ctx.kind(),
            cycle,
            ?end,
            observed = self.observed.len(),
            pruned = removed.len(),
            "scan finished"
        );
    }

    /// Stop the running scan immediately, keeping partial results
    pub(crate) async fn stop_scan(
        &mut self,
        registry: &mut DeviceRegistry,
        ctx: &WorkerContext,
    ) -> CommandOutcome {
        let state = registry.transport_state();
        if state != TransportState::Scanning {
            return CommandOutcome::NoOp(Reached::Transport(state));
        }
        self.halt(ctx).await;
        enter(registry, TransportState::Idle);
        info!(transport = %ctx.kind(), cycle = self.cycle, "scan stopped");
        CommandOutcome::Accepted(Reached::Transport(TransportState::Idle))
    }

    /// Cancel timer and adapter scan without touching transport state
    pub(crate) async fn halt(&mut self, ctx: &WorkerContext) {
        if self.timer.take().is_some() {
            ctx.adapter().cancel_scan().await;
        }
    }

    fn is_running(&self, cycle: u64, registry: &DeviceRegistry) -> bool {
        cycle == self.cycle && registry.transport_state().is_scanning()
    }
}

fn enter(registry: &mut DeviceRegistry, state: TransportState) {
    if let Err(e) = registry.set_transport_state(state) {
        warn!(transport = %registry.kind(), error = %e, "transport transition refused");
    }
}
