// devsession - demo CLI
//
// Drives simulated peripherals through the session manager and prints the
// snapshots a dashboard would render.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use devsession::adapter::SimulatedAdapter;
use devsession::registry::SnapshotStream;
use devsession::{
    CommandOutcome, DeviceId, DeviceState, SessionConfig, SessionManager, TransportKind, TransportSnapshot,
};

#[derive(Parser)]
#[command(name = "devsession")]
#[command(about = "Device session manager over simulated peripherals", long_about = None)]
#[command(version)]
struct Cli {
    /// Log filter (RUST_LOG syntax), overridden by RUST_LOG when set
    #[arg(long, default_value = "info", global = true)]
    log: String,

    /// Scan timeout in seconds
    #[arg(long, default_value = "5", global = true)]
    scan_timeout_secs: u64,

    /// Connect timeout in seconds
    #[arg(long, default_value = "10", global = true)]
    connect_timeout_secs: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Walk every transport through scan, pair, connect and disable
    Demo,
    /// Run one scan cycle and print what was found
    Scan {
        /// network | radio | stream | sink (wifi, bluetooth, camera, audio also accepted)
        transport: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log)),
        )
        .init();

    let config = SessionConfig::new()
        .with_scan_timeout(Duration::from_secs(cli.scan_timeout_secs))
        .with_connect_timeout(Duration::from_secs(cli.connect_timeout_secs));

    match cli.command {
        Commands::Demo => cmd_demo(config).await,
        Commands::Scan { transport } => {
            let kind: TransportKind = transport.parse().map_err(anyhow::Error::msg)?;
            cmd_scan(config, kind).await
        }
    }
}

// ============================================================================
// COMMANDS
// ============================================================================

async fn cmd_scan(config: SessionConfig, kind: TransportKind) -> Result<()> {
    let session = start(config, &[kind]).await?;
    let mut stream = session.subscribe(kind).context("transport not configured")?;

    report("scan", session.scan(kind).await);
    wait_until(&mut stream, Duration::from_secs(30), |s| !s.state().is_scanning()).await;
    if let Some(snapshot) = session.current_snapshot(kind) {
        print_snapshot(&snapshot);
    }

    session.shutdown().await;
    Ok(())
}

async fn cmd_demo(config: SessionConfig) -> Result<()> {
    let session = start(config, &TransportKind::ALL).await?;

    // Wi-Fi: scan, join a secured network, then hop to an open one
    let net = TransportKind::Network;
    let mut stream = session.subscribe(net).context("network not configured")?;
    report("scan", session.scan(net).await);
    wait_until(&mut stream, Duration::from_secs(30), |s| !s.state().is_scanning()).await;

    let home = "AA:BB:CC:DD:EE:FF";
    report("connect HomeNetwork", session.connect(net, home, None).await);
    report(
        "password for HomeNetwork",
        session.supply_credential(net, home, "home-secret").await,
    );
    wait_for_state(&mut stream, home, DeviceState::Connected).await;

    let coffee = "77:88:99:AA:BB:CC";
    report("connect CoffeeShop", session.connect(net, coffee, None).await);
    wait_for_state(&mut stream, coffee, DeviceState::Connected).await;
    show(&session, net);

    // Bluetooth: paired accessories connect side by side
    let radio = TransportKind::Radio;
    let mut stream = session.subscribe(radio).context("radio not configured")?;
    for id in ["AA:BB:CC:DD:EE:01", "AA:BB:CC:DD:EE:02"] {
        report("connect accessory", session.connect(radio, id, None).await);
        wait_for_state(&mut stream, id, DeviceState::Connected).await;
    }
    show(&session, radio);

    // Camera: start the stream, then restart it as if parameters changed
    let cam = TransportKind::Stream;
    let mut stream = session.subscribe(cam).context("stream not configured")?;
    report("start camera", session.connect(cam, "camera-0", None).await);
    wait_for_state(&mut stream, "camera-0", DeviceState::Connected).await;
    report("restart camera", session.reconnect(cam, "camera-0").await);
    wait_for_state(&mut stream, "camera-0", DeviceState::Connected).await;
    show(&session, cam);

    // Audio: one output at a time
    let sink = TransportKind::Sink;
    let mut stream = session.subscribe(sink).context("sink not configured")?;
    report("select HDMI", session.connect(sink, "hdmi", None).await);
    wait_for_state(&mut stream, "hdmi", DeviceState::Connected).await;
    report("select jack", session.connect(sink, "jack", None).await);
    wait_for_state(&mut stream, "jack", DeviceState::Connected).await;
    show(&session, sink);

    // Radio off: everything drops, paired entries stay listed
    report("bluetooth off", session.set_enabled(radio, false).await);
    show(&session, radio);

    session.shutdown().await;
    Ok(())
}

// ============================================================================
// HELPERS
// ============================================================================

/// One simulated adapter per transport, paired devices registered as known
async fn start(config: SessionConfig, kinds: &[TransportKind]) -> Result<SessionManager> {
    let mut builder = SessionManager::builder(config);
    let mut paired = Vec::new();
    for &kind in kinds {
        let adapter = SimulatedAdapter::dashboard(kind);
        paired.push((kind, adapter.paired_devices()));
        builder = builder.with_adapter(Arc::new(adapter));
    }
    let session = builder.build()?;

    for (kind, devices) in paired {
        for observation in devices {
            let outcome = session.register_known(kind, observation).await;
            if outcome.is_rejected() {
                bail!("could not register known device on {}: {:?}", kind, outcome);
            }
        }
    }
    Ok(session)
}

async fn wait_for_state(stream: &mut SnapshotStream, id: &str, state: DeviceState) {
    let id = DeviceId::from(id);
    let reached = wait_until(stream, Duration::from_secs(30), |s| {
        matches!(s.device_state(&id), Some(current) if current == state || current == DeviceState::Error)
    })
    .await;
    if let Some(snapshot) = reached {
        if snapshot.device_state(&id) == Some(DeviceState::Error) {
            println!("  {} failed: {:?}", id, snapshot.device(&id).and_then(|d| d.last_error()));
        }
    }
}

async fn wait_until<F>(stream: &mut SnapshotStream, limit: Duration, done: F) -> Option<TransportSnapshot>
where
    F: Fn(&TransportSnapshot) -> bool,
{
    let waiting = async {
        while let Some(snapshot) = stream.next().await {
            if done(&snapshot) {
                return Some(snapshot);
            }
        }
        None
    };
    tokio::time::timeout(limit, waiting).await.ok().flatten()
}

fn report(action: &str, outcome: CommandOutcome) {
    println!("> {:<28} {:?}", action, outcome);
}

fn show(session: &SessionManager, kind: TransportKind) {
    if let Some(snapshot) = session.current_snapshot(kind) {
        print_snapshot(&snapshot);
    }
}

fn print_snapshot(snapshot: &TransportSnapshot) {
    println!(
        "\n[{}] {} · {:?} · rev {}",
        snapshot.kind(),
        snapshot.state(),
        snapshot.status(),
        snapshot.revision()
    );
    for device in snapshot.devices() {
        let signal = device
            .signal()
            .map(|s| format!("{:>3}%", s))
            .unwrap_or_else(|| "   -".to_string());
        let error = device
            .last_error()
            .map(|e| format!(" ({})", e))
            .unwrap_or_default();
        println!(
            "  {:<20} {} {:<20} retries={}{}",
            device.label(),
            signal,
            device.state().to_string(),
            device.retry_count(),
            error
        );
    }
    println!();
}
