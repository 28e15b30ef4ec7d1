// Exclusive Transport Tests
// Switching networks and audio outputs: release first, then connect

use std::sync::Arc;
use std::time::Duration;

use devsession::adapter::{AdapterCall, ConnectBehavior, DisconnectBehavior, MockAdapter};
use devsession::device::{
    CommandOutcome, DeviceId, DeviceState, FailureReason, Observation, Reached, Rejection,
    TransportKind, TransportSnapshot,
};
use devsession::session::{SessionConfig, SessionManager};

const NET: TransportKind = TransportKind::Network;
const SINK: TransportKind = TransportKind::Sink;

// ============================================================================
// HELPERS
// ============================================================================

fn session(adapter: &Arc<MockAdapter>) -> SessionManager {
    SessionManager::builder(SessionConfig::default())
        .with_adapter(adapter.clone())
        .build()
        .unwrap()
}

fn networks(ids: &[&str]) -> MockAdapter {
    let batch = ids.iter().map(|id| Observation::new(*id).open()).collect();
    MockAdapter::new(NET).with_scan_cycle(vec![batch])
}

fn state(session: &SessionManager, kind: TransportKind, id: &str) -> DeviceState {
    session
        .current_snapshot(kind)
        .unwrap()
        .device_state(&DeviceId::from(id))
        .unwrap()
}

async fn settle(ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms)).await;
}

/// Scan, then connect `id` and wait for it
async fn connected(session: &SessionManager, id: &str) {
    session.scan(NET).await;
    settle(500).await;
    session.connect(NET, id, None).await;
    settle(150).await;
    assert_eq!(state(session, NET, id), DeviceState::Connected);
}

fn engaged_count(snapshot: &TransportSnapshot) -> usize {
    snapshot
        .devices()
        .iter()
        .filter(|d| matches!(d.state(), DeviceState::Connecting | DeviceState::Connected))
        .count()
}

/// Index of the first snapshot where `id` is in `state`
fn first_index(history: &[TransportSnapshot], id: &str, state: DeviceState) -> Option<usize> {
    let id = DeviceId::from(id);
    history.iter().position(|s| s.device_state(&id) == Some(state))
}

// ============================================================================
// SWITCHING
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_switch_network_releases_first() {
    let adapter = Arc::new(networks(&["home", "cafe"]));
    let session = session(&adapter);
    connected(&session, "home").await;
    let mut stream = session.subscribe(NET).unwrap();

    let outcome = session.connect(NET, "cafe", None).await;
    assert_eq!(outcome, CommandOutcome::Accepted(Reached::Queued));
    assert_eq!(state(&session, NET, "home"), DeviceState::Disconnecting);
    assert_eq!(state(&session, NET, "cafe"), DeviceState::Discovered);

    settle(300).await;
    assert_eq!(state(&session, NET, "home"), DeviceState::Discovered);
    assert_eq!(state(&session, NET, "cafe"), DeviceState::Connected);

    let history = stream.drain();
    assert!(history.iter().all(|s| engaged_count(s) <= 1));

    let home_released = first_index(&history, "home", DeviceState::Discovered).unwrap();
    let cafe_connecting = first_index(&history, "cafe", DeviceState::Connecting).unwrap();
    assert!(home_released < cafe_connecting);
}

#[tokio::test(start_paused = true)]
async fn test_switch_cancels_in_flight_handshake() {
    let adapter = Arc::new(networks(&["home", "cafe"]).with_connect("home", ConnectBehavior::Hang));
    let session = session(&adapter);
    session.scan(NET).await;
    settle(500).await;
    session.connect(NET, "home", None).await;

    let outcome = session.connect(NET, "cafe", None).await;

    assert_eq!(outcome, CommandOutcome::Accepted(Reached::Device(DeviceState::Connecting)));
    assert!(adapter.was_called(&AdapterCall::CancelConnect(DeviceId::from("home"))));
    let snapshot = session.current_snapshot(NET).unwrap();
    let home = snapshot.device(&DeviceId::from("home")).unwrap();
    assert_eq!(home.state(), DeviceState::Discovered);
    assert_eq!(home.last_error(), Some(FailureReason::Cancelled));

    // Late answer for the abandoned network changes nothing
    adapter.resolve_connect("home");
    settle(150).await;
    assert_eq!(state(&session, NET, "home"), DeviceState::Discovered);
    assert_eq!(state(&session, NET, "cafe"), DeviceState::Connected);
}

#[tokio::test(start_paused = true)]
async fn test_switch_away_from_credential_prompt() {
    let adapter = Arc::new(
        MockAdapter::new(NET).with_scan_cycle(vec![vec![
            Observation::new("secured").credentialed(),
            Observation::new("cafe").open(),
        ]]),
    );
    let session = session(&adapter);
    session.scan(NET).await;
    settle(500).await;
    session.connect(NET, "secured", None).await;
    assert_eq!(state(&session, NET, "secured"), DeviceState::AwaitingCredential);

    session.connect(NET, "cafe", None).await;
    settle(150).await;

    assert_eq!(state(&session, NET, "secured"), DeviceState::Discovered);
    assert_eq!(state(&session, NET, "cafe"), DeviceState::Connected);
}

#[tokio::test(start_paused = true)]
async fn test_sink_switch_between_known_outputs() {
    let adapter = Arc::new(MockAdapter::new(SINK));
    let session = session(&adapter);
    for id in ["hdmi", "jack"] {
        session.register_known(SINK, Observation::new(id)).await;
    }
    session.connect(SINK, "hdmi", None).await;
    settle(150).await;

    session.connect(SINK, "jack", None).await;
    settle(300).await;

    assert_eq!(state(&session, SINK, "hdmi"), DeviceState::Known);
    assert_eq!(state(&session, SINK, "jack"), DeviceState::Connected);
}

// ============================================================================
// QUEUED CONNECT
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_second_queued_connect_rejected() {
    let adapter = Arc::new(networks(&["home", "cafe", "library"]).with_disconnect(DisconnectBehavior::Hang));
    let session = session(&adapter);
    connected(&session, "home").await;

    assert_eq!(
        session.connect(NET, "cafe", None).await,
        CommandOutcome::Accepted(Reached::Queued)
    );
    assert_eq!(
        session.connect(NET, "cafe", None).await,
        CommandOutcome::NoOp(Reached::Queued)
    );
    assert_eq!(
        session.connect(NET, "library", None).await,
        CommandOutcome::Rejected(Rejection::AlreadyInProgress)
    );
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_drops_queued_connect() {
    let adapter = Arc::new(networks(&["home", "cafe"]).with_disconnect(DisconnectBehavior::Hang));
    let session = session(&adapter);
    connected(&session, "home").await;
    session.connect(NET, "cafe", None).await;

    let outcome = session.disconnect(NET, "cafe").await;
    assert_eq!(outcome, CommandOutcome::Accepted(Reached::Device(DeviceState::Discovered)));

    adapter.finish_disconnect("home");
    settle(150).await;

    assert_eq!(state(&session, NET, "home"), DeviceState::Discovered);
    assert_eq!(state(&session, NET, "cafe"), DeviceState::Discovered);
    assert_eq!(adapter.connect_attempts("cafe"), 0);
}

#[tokio::test(start_paused = true)]
async fn test_queued_connect_waits_for_confirmation() {
    let adapter = Arc::new(networks(&["home", "cafe"]).with_disconnect(DisconnectBehavior::Hang));
    let session = session(&adapter);
    connected(&session, "home").await;

    session.connect(NET, "cafe", None).await;
    settle(2_000).await;
    assert_eq!(state(&session, NET, "home"), DeviceState::Disconnecting);
    assert_eq!(adapter.connect_attempts("cafe"), 0);

    assert!(adapter.finish_disconnect("home"));
    settle(150).await;
    assert_eq!(state(&session, NET, "cafe"), DeviceState::Connected);
}

#[tokio::test(start_paused = true)]
async fn test_queued_connect_proceeds_after_forced_release() {
    let adapter = Arc::new(networks(&["home", "cafe"]).with_disconnect(DisconnectBehavior::Hang));
    let session = session(&adapter);
    connected(&session, "home").await;

    session.connect(NET, "cafe", None).await;
    settle(5_200).await;

    assert_eq!(state(&session, NET, "home"), DeviceState::Discovered);
    assert_eq!(state(&session, NET, "cafe"), DeviceState::Connected);
}

#[tokio::test(start_paused = true)]
async fn test_queued_target_survives_scan_pruning() {
    let adapter = Arc::new(
        networks(&["home", "cafe"])
            .with_scan_cycle(vec![vec![Observation::new("home").open()]])
            .with_disconnect(DisconnectBehavior::Hang),
    );
    let session = session(&adapter);
    connected(&session, "home").await;
    session.connect(NET, "cafe", None).await;

    session.scan(NET).await;
    settle(500).await;
    assert_eq!(state(&session, NET, "cafe"), DeviceState::Discovered);

    adapter.finish_disconnect("home");
    settle(150).await;
    assert_eq!(state(&session, NET, "cafe"), DeviceState::Connected);
}

#[tokio::test(start_paused = true)]
async fn test_queued_credentialed_target_prompts_after_release() {
    let adapter = Arc::new(
        MockAdapter::new(NET).with_scan_cycle(vec![vec![
            Observation::new("home").open(),
            Observation::new("secured").credentialed(),
        ]]),
    );
    let session = session(&adapter);
    connected(&session, "home").await;

    assert_eq!(
        session.connect(NET, "secured", None).await,
        CommandOutcome::Accepted(Reached::Queued)
    );
    settle(150).await;

    assert_eq!(state(&session, NET, "home"), DeviceState::Discovered);
    assert_eq!(state(&session, NET, "secured"), DeviceState::AwaitingCredential);
}

#[tokio::test(start_paused = true)]
async fn test_never_two_connected_under_churn() {
    let adapter = Arc::new(networks(&["a", "b", "c"]));
    let session = session(&adapter);
    session.scan(NET).await;
    settle(500).await;
    let mut stream = session.subscribe(NET).unwrap();

    for id in ["a", "b", "c", "a"] {
        session.connect(NET, id, None).await;
        settle(50).await;
    }
    settle(1_000).await;

    let history = stream.drain();
    assert!(!history.is_empty());
    assert!(history.iter().all(|s| engaged_count(s) <= 1));
}
