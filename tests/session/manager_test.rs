// Session Manager Tests
// Construction, enable/disable cascade, transport independence and fan-out

use std::sync::Arc;
use std::time::Duration;

use devsession::adapter::{AdapterCall, ConnectBehavior, MockAdapter};
use devsession::device::{
    CommandOutcome, DeviceId, DeviceState, Observation, Reached, Rejection, TransportKind,
    TransportState,
};
use devsession::session::{SessionConfig, SessionError, SessionManager, TransportConfig};

// ============================================================================
// HELPERS
// ============================================================================

fn mocks() -> Vec<Arc<MockAdapter>> {
    TransportKind::ALL
        .into_iter()
        .map(|kind| {
            Arc::new(MockAdapter::new(kind).with_scan_cycle(vec![vec![
                Observation::new(format!("{}-a", kind)),
                Observation::new(format!("{}-b", kind)),
            ]]))
        })
        .collect()
}

fn session_with(config: SessionConfig, adapters: &[Arc<MockAdapter>]) -> SessionManager {
    let mut builder = SessionManager::builder(config);
    for adapter in adapters {
        builder = builder.with_adapter(adapter.clone());
    }
    builder.build().unwrap()
}

fn state(session: &SessionManager, kind: TransportKind, id: &str) -> Option<DeviceState> {
    session
        .current_snapshot(kind)
        .unwrap()
        .device_state(&DeviceId::from(id))
}

async fn settle(ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms)).await;
}

// ============================================================================
// CONSTRUCTION
// ============================================================================

#[tokio::test]
async fn test_build_requires_an_adapter() {
    let result = SessionManager::builder(SessionConfig::default()).build();
    assert!(matches!(result, Err(SessionError::MissingAdapter)));
}

#[tokio::test]
async fn test_build_rejects_duplicate_transport() {
    let result = SessionManager::builder(SessionConfig::default())
        .with_adapter(Arc::new(MockAdapter::new(TransportKind::Radio)))
        .with_adapter(Arc::new(MockAdapter::new(TransportKind::Radio)))
        .build();
    assert!(matches!(
        result,
        Err(SessionError::DuplicateTransport(TransportKind::Radio))
    ));
}

#[tokio::test]
async fn test_build_rejects_invalid_config() {
    let config = SessionConfig::default().with_connect_timeout(Duration::ZERO);
    let result = SessionManager::builder(config)
        .with_adapter(Arc::new(MockAdapter::new(TransportKind::Network)))
        .build();
    assert!(matches!(result, Err(SessionError::InvalidConfig(_))));
}

#[tokio::test]
async fn test_transports_listed_in_order() {
    let adapters = vec![
        Arc::new(MockAdapter::new(TransportKind::Sink)),
        Arc::new(MockAdapter::new(TransportKind::Network)),
    ];
    let session = session_with(SessionConfig::default(), &adapters);

    assert_eq!(
        session.transports(),
        vec![TransportKind::Network, TransportKind::Sink]
    );
}

#[tokio::test]
async fn test_unknown_transport_rejected() {
    let adapters = vec![Arc::new(MockAdapter::new(TransportKind::Network))];
    let session = session_with(SessionConfig::default(), &adapters);

    let outcome = session.scan(TransportKind::Stream).await;

    assert_eq!(
        outcome,
        CommandOutcome::Rejected(Rejection::UnknownTransport(TransportKind::Stream))
    );
    assert!(session.current_snapshot(TransportKind::Stream).is_none());
    assert!(session.subscribe(TransportKind::Stream).is_none());
}

#[test]
fn test_config_defaults() {
    let config = SessionConfig::default();
    assert_eq!(config.defaults.scan_timeout, Duration::from_secs(5));
    assert_eq!(config.defaults.connect_timeout, Duration::from_secs(10));
    assert!(config.defaults.initially_enabled);
    assert_eq!(config.command_queue_depth, 64);
    assert!(config.validate().is_ok());
}

#[test]
fn test_config_overrides_per_transport() {
    let radio = TransportConfig::new().with_connect_timeout(Duration::from_secs(30));
    let config = SessionConfig::default().with_transport(TransportKind::Radio, radio.clone());

    assert_eq!(config.transport(TransportKind::Radio), &radio);
    assert_eq!(config.transport(TransportKind::Network), &config.defaults);
}

#[test]
fn test_config_rejects_zero_capacity() {
    assert!(SessionConfig::default().with_command_queue_depth(0).validate().is_err());
    assert!(SessionConfig::default().with_snapshot_buffer(0).validate().is_err());
    let bad = TransportConfig::new().with_disconnect_timeout(Duration::ZERO);
    assert!(SessionConfig::default()
        .with_transport(TransportKind::Sink, bad)
        .validate()
        .is_err());
}

// ============================================================================
// ENABLE / DISABLE
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_initially_disabled_transport() {
    let adapter = Arc::new(MockAdapter::new(TransportKind::Radio));
    let config = SessionConfig::default().with_transport(
        TransportKind::Radio,
        TransportConfig::new().with_initially_enabled(false),
    );
    let session = session_with(config, &[adapter.clone()]);
    let radio = TransportKind::Radio;

    assert_eq!(
        session.current_snapshot(radio).unwrap().state(),
        TransportState::Disabled
    );

    // Known-entry bookkeeping works while powered down
    assert!(session.register_known(radio, Observation::new("jbl")).await.is_accepted());
    assert_eq!(
        session.connect(radio, "jbl", None).await,
        CommandOutcome::Rejected(Rejection::TransportDisabled)
    );

    let outcome = session.set_enabled(radio, true).await;
    assert_eq!(outcome, CommandOutcome::Accepted(Reached::Transport(TransportState::Idle)));
    assert!(adapter.was_called(&AdapterCall::SetPowered(true)));
    assert!(session.connect(radio, "jbl", None).await.is_accepted());
}

#[tokio::test(start_paused = true)]
async fn test_enable_twice_is_noop() {
    let adapters = vec![Arc::new(MockAdapter::new(TransportKind::Sink))];
    let session = session_with(SessionConfig::default(), &adapters);

    let outcome = session.set_enabled(TransportKind::Sink, true).await;

    assert_eq!(outcome, CommandOutcome::NoOp(Reached::Transport(TransportState::Idle)));
}

#[tokio::test(start_paused = true)]
async fn test_disable_tears_down_every_transport() {
    let adapters = mocks();
    let session = session_with(SessionConfig::default(), &adapters);

    for kind in TransportKind::ALL {
        session.scan(kind).await;
    }
    settle(500).await;
    for kind in TransportKind::ALL {
        session.connect(kind, format!("{}-a", kind), None).await;
    }
    settle(150).await;

    for kind in TransportKind::ALL {
        assert_eq!(
            session.set_enabled(kind, false).await,
            CommandOutcome::Accepted(Reached::Transport(TransportState::Disabled))
        );
        let snapshot = session.current_snapshot(kind).unwrap();
        assert_eq!(snapshot.state(), TransportState::Disabled);
        assert_eq!(snapshot.count_in(DeviceState::Connecting), 0);
        assert_eq!(snapshot.count_in(DeviceState::Connected), 0);
    }
    for adapter in &adapters {
        assert!(adapter.was_called(&AdapterCall::SetPowered(false)));
    }
}

#[tokio::test(start_paused = true)]
async fn test_disable_keeps_known_drops_ephemeral() {
    let adapter = Arc::new(
        MockAdapter::new(TransportKind::Radio)
            .with_scan_cycle(vec![vec![Observation::new("sony"), Observation::new("anon")]]),
    );
    let session = session_with(SessionConfig::default(), &[adapter.clone()]);
    let radio = TransportKind::Radio;
    session.register_known(radio, Observation::new("jbl")).await;
    session.scan(radio).await;
    settle(500).await;
    session.connect(radio, "jbl", None).await;
    settle(150).await;
    session.connect(radio, "sony", None).await;
    settle(150).await;

    session.set_enabled(radio, false).await;

    // sony was paired by its connect; anon was only ever seen
    let snapshot = session.current_snapshot(radio).unwrap();
    assert_eq!(snapshot.devices().len(), 2);
    assert_eq!(state(&session, radio, "jbl"), Some(DeviceState::Known));
    assert_eq!(state(&session, radio, "sony"), Some(DeviceState::Known));
    assert_eq!(state(&session, radio, "anon"), None);
    assert!(adapter.calls().iter().all(|c| !matches!(c, AdapterCall::BeginDisconnect(_))));
}

#[tokio::test(start_paused = true)]
async fn test_disable_while_scanning_stops_scan() {
    let adapter = Arc::new(
        MockAdapter::new(TransportKind::Network)
            .with_scan_cycle(vec![vec![Observation::new("net-1")]])
            .with_scan_completion(false),
    );
    let session = session_with(SessionConfig::default(), &[adapter.clone()]);
    let net = TransportKind::Network;

    session.scan(net).await;
    settle(150).await;
    session.set_enabled(net, false).await;

    assert!(adapter.was_called(&AdapterCall::CancelScan));
    let snapshot = session.current_snapshot(net).unwrap();
    assert_eq!(snapshot.state(), TransportState::Disabled);
    assert!(snapshot.devices().is_empty());

    // The old scan timeout must not flip the transport back to Idle
    settle(10_000).await;
    assert_eq!(
        session.current_snapshot(net).unwrap().state(),
        TransportState::Disabled
    );
}

#[tokio::test(start_paused = true)]
async fn test_late_success_after_disable_discarded() {
    let adapter = Arc::new(
        MockAdapter::new(TransportKind::Sink).with_connect("hdmi", ConnectBehavior::Hang),
    );
    let session = session_with(SessionConfig::default(), &[adapter.clone()]);
    let sink = TransportKind::Sink;
    session.register_known(sink, Observation::new("hdmi")).await;
    session.connect(sink, "hdmi", None).await;

    session.set_enabled(sink, false).await;
    assert!(adapter.was_called(&AdapterCall::CancelConnect(DeviceId::from("hdmi"))));

    adapter.resolve_connect("hdmi");
    session.set_enabled(sink, true).await;
    settle(20_000).await;

    assert_eq!(state(&session, sink, "hdmi"), Some(DeviceState::Known));
}

#[tokio::test(start_paused = true)]
async fn test_disable_twice_is_noop() {
    let adapters = vec![Arc::new(MockAdapter::new(TransportKind::Stream))];
    let session = session_with(SessionConfig::default(), &adapters);

    session.set_enabled(TransportKind::Stream, false).await;
    let outcome = session.set_enabled(TransportKind::Stream, false).await;

    assert_eq!(outcome, CommandOutcome::NoOp(Reached::Transport(TransportState::Disabled)));
}

// ============================================================================
// KNOWN ENTRIES
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_forget_known_device() {
    let adapters = vec![Arc::new(MockAdapter::new(TransportKind::Radio))];
    let session = session_with(SessionConfig::default(), &adapters);
    let radio = TransportKind::Radio;
    session.register_known(radio, Observation::new("jbl")).await;
    session.connect(radio, "jbl", None).await;
    settle(150).await;

    let busy = session.forget(radio, "jbl").await;
    assert_eq!(
        busy,
        CommandOutcome::Rejected(Rejection::InvalidState(DeviceState::Connected))
    );

    session.disconnect(radio, "jbl").await;
    settle(150).await;
    assert_eq!(session.forget(radio, "jbl").await, CommandOutcome::Accepted(Reached::Done));
    assert_eq!(state(&session, radio, "jbl"), None);
}

// ============================================================================
// INDEPENDENCE AND FAN-OUT
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_transports_are_independent() {
    let net = Arc::new(
        MockAdapter::new(TransportKind::Network)
            .with_scan_cycle(vec![vec![Observation::new("net-2")]])
            .with_connect("net-2", ConnectBehavior::Hang),
    );
    let radio = Arc::new(MockAdapter::new(TransportKind::Radio));
    let session = session_with(SessionConfig::default(), &[net.clone(), radio.clone()]);

    session.scan(TransportKind::Network).await;
    settle(500).await;
    session.connect(TransportKind::Network, "net-2", None).await;
    session.register_known(TransportKind::Radio, Observation::new("jbl")).await;
    session.connect(TransportKind::Radio, "jbl", None).await;
    settle(150).await;

    assert_eq!(state(&session, TransportKind::Radio, "jbl"), Some(DeviceState::Connected));
    assert_eq!(
        state(&session, TransportKind::Network, "net-2"),
        Some(DeviceState::Connecting)
    );

    session.set_enabled(TransportKind::Network, false).await;
    assert_eq!(state(&session, TransportKind::Radio, "jbl"), Some(DeviceState::Connected));
}

#[tokio::test(start_paused = true)]
async fn test_every_subscriber_sees_every_snapshot() {
    let adapters = vec![Arc::new(MockAdapter::new(TransportKind::Stream))];
    let session = session_with(SessionConfig::default(), &adapters);
    let cam = TransportKind::Stream;
    let mut first = session.subscribe(cam).unwrap();
    let mut second = session.subscribe(cam).unwrap();

    session.register_known(cam, Observation::new("camera-0")).await;
    session.connect(cam, "camera-0", None).await;
    settle(150).await;

    let a = first.drain();
    let b = second.drain();
    assert_eq!(a.len(), 3);
    assert_eq!(a, b);
    assert!(a.windows(2).all(|w| w[0].revision() < w[1].revision()));
    assert_eq!(
        a.last().unwrap().device_state(&DeviceId::from("camera-0")),
        Some(DeviceState::Connected)
    );
}

#[tokio::test(start_paused = true)]
async fn test_stream_ends_after_shutdown() {
    let adapters = vec![Arc::new(MockAdapter::new(TransportKind::Sink))];
    let session = session_with(SessionConfig::default(), &adapters);
    let mut stream = session.subscribe(TransportKind::Sink).unwrap();

    session.shutdown().await;

    assert!(stream.next().await.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_tears_down_sessions() {
    let adapter = Arc::new(MockAdapter::new(TransportKind::Sink));
    let session = session_with(SessionConfig::default(), &[adapter.clone()]);
    session.register_known(TransportKind::Sink, Observation::new("hdmi")).await;
    session.connect(TransportKind::Sink, "hdmi", None).await;
    let mut stream = session.subscribe(TransportKind::Sink).unwrap();

    session.shutdown().await;

    assert!(adapter.was_called(&AdapterCall::CancelConnect(DeviceId::from("hdmi"))));
    let last = stream.drain().pop().unwrap();
    assert_eq!(
        last.device_state(&DeviceId::from("hdmi")),
        Some(DeviceState::Known)
    );
}
