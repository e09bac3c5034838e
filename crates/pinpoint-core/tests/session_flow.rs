//! End-to-end searches driven through `SessionController` against simulated
//! peripherals.

use std::time::Duration;

use pinpoint_core::transport::TransportEvent;
use pinpoint_core::{
    Command, Config, DeviceId, ErrorKind, MockPeripheral, MockTransport, PinpointError,
    SessionController, SessionSnapshot, SessionState,
};
use tokio::sync::watch;
use uuid::Uuid;

const WAIT: Duration = Duration::from_secs(5);

fn service() -> Uuid {
    Config::default().bluetooth.service_uuid
}

fn spawn(transport: MockTransport) -> SessionController {
    SessionController::spawn(transport, Config::default().bluetooth.cycle_settings())
}

async fn wait_until(
    mut watch: watch::Receiver<SessionSnapshot>,
    predicate: impl Fn(&SessionState) -> bool,
) -> SessionSnapshot {
    tokio::time::timeout(WAIT, watch.wait_for(|snapshot| predicate(&snapshot.state)))
        .await
        .expect("timed out waiting for state")
        .expect("session driver stopped")
        .clone()
}

async fn wait_terminal(controller: &SessionController) -> SessionSnapshot {
    wait_until(controller.watch(), SessionState::is_terminal).await
}

#[tokio::test]
async fn finds_target_among_look_alikes() {
    let transport = MockTransport::demo(service());
    let log = transport.log();
    let controller = spawn(transport);

    let state = tokio_test::assert_ok!(controller.start("ASDF1234").await);
    assert_eq!(state, SessionState::Searching);

    let snapshot = wait_terminal(&controller).await;
    assert_eq!(
        snapshot.state,
        SessionState::Connected {
            device: "00:11:22:33:44:03".into()
        }
    );
    assert_eq!(snapshot.blacklisted, 2);

    // Each wrong device is tried exactly once; the match is never disconnected.
    assert_eq!(log.connects_to(&"00:11:22:33:44:01".into()), 1);
    assert_eq!(log.connects_to(&"00:11:22:33:44:02".into()), 1);
    assert_eq!(log.disconnects_from(&"00:11:22:33:44:03".into()), 0);
    assert!(log
        .commands()
        .contains(&Command::RejectDevice("00:11:22:33:44:01".into())));
}

#[tokio::test]
async fn every_transition_is_pushed() {
    let controller = spawn(MockTransport::demo(service()));
    let mut changes = controller.subscribe();

    controller.start("ASDF1234").await.unwrap();

    let mut names = Vec::new();
    loop {
        let change = tokio::time::timeout(WAIT, changes.recv())
            .await
            .unwrap()
            .unwrap();
        names.push(change.state.name());
        if change.state.is_terminal() {
            break;
        }
    }

    assert_eq!(
        names,
        vec![
            "searching",
            "connecting",
            "verifying",
            "searching",
            "connecting",
            "verifying",
            "searching",
            "connecting",
            "verifying",
            "connected",
        ]
    );
}

#[tokio::test]
async fn read_failure_fails_without_blacklisting() {
    let transport = MockTransport::new(vec![
        MockPeripheral::new("D2", service(), "ASDF1234").with_read_error("attribute not readable")
    ]);
    let log = transport.log();
    let controller = spawn(transport);

    controller.start("ASDF1234").await.unwrap();
    let snapshot = wait_terminal(&controller).await;

    let failure = snapshot.state.failure().unwrap();
    assert_eq!(failure.kind, ErrorKind::ReadError);
    assert_eq!(failure.message, "attribute not readable");
    assert_eq!(snapshot.blacklisted, 0);
    assert_eq!(log.disconnects_from(&"D2".into()), 0);
}

#[tokio::test]
async fn stop_after_read_failure_releases_link() {
    let transport = MockTransport::new(vec![
        MockPeripheral::new("D2", service(), "ASDF1234").with_read_error("attribute not readable")
    ]);
    let log = transport.log();
    let controller = spawn(transport);

    controller.start("ASDF1234").await.unwrap();
    wait_terminal(&controller).await;

    assert_eq!(controller.stop().await.unwrap(), SessionState::Idle);
    assert_eq!(log.disconnects_from(&"D2".into()), 1);
}

#[tokio::test]
async fn connect_failure_is_terminal() {
    let transport = MockTransport::new(vec![
        MockPeripheral::new("D1", service(), "ASDF1234")
            .with_connect_error("le-connection-abort-by-local"),
        MockPeripheral::new("D2", service(), "ASDF1234"),
    ]);
    let log = transport.log();
    let controller = spawn(transport);

    controller.start("ASDF1234").await.unwrap();
    let snapshot = wait_terminal(&controller).await;

    assert_eq!(
        snapshot.state.failure().map(|f| f.kind),
        Some(ErrorKind::ConnectionError)
    );
    assert_eq!(log.connects_to(&"D2".into()), 0);
}

#[tokio::test]
async fn disconnect_failure_after_mismatch_is_terminal() {
    let transport = MockTransport::new(vec![
        MockPeripheral::new("D1", service(), "WRONG001").with_disconnect_error("in progress"),
        MockPeripheral::new("D2", service(), "ASDF1234"),
    ]);
    let controller = spawn(transport);

    controller.start("ASDF1234").await.unwrap();
    let snapshot = wait_terminal(&controller).await;

    assert_eq!(
        snapshot.state.failure().map(|f| f.kind),
        Some(ErrorKind::DisconnectError)
    );
    assert_eq!(snapshot.blacklisted, 1);
}

#[tokio::test]
async fn scan_error_is_terminal() {
    let transport = MockTransport::demo(service()).with_scan_error("adapter powered off");
    let controller = spawn(transport);

    controller.start("ASDF1234").await.unwrap();
    let snapshot = wait_terminal(&controller).await;

    assert_eq!(
        snapshot.state.status_text(),
        "Scan Error: adapter powered off"
    );
}

#[tokio::test]
async fn empty_serial_is_rejected_without_scanning() {
    let transport = MockTransport::demo(service());
    let log = transport.log();
    let controller = spawn(transport);

    let err = tokio_test::assert_err!(controller.start("").await);
    assert!(matches!(err, PinpointError::InvalidInput(_)));
    assert_eq!(controller.current_state(), SessionState::Idle);
    assert!(log.commands().is_empty());
}

#[tokio::test]
async fn stop_mid_connect_ignores_late_completion() {
    let transport = MockTransport::new(vec![
        MockPeripheral::new("D1", service(), "ASDF1234").with_pending_connect()
    ]);
    let log = transport.log();
    let controller = spawn(transport);
    let mut changes = controller.subscribe();

    controller.start("ASDF1234").await.unwrap();
    wait_until(controller.watch(), |state| {
        matches!(state, SessionState::Connecting { .. })
    })
    .await;

    assert_eq!(controller.stop().await.unwrap(), SessionState::Idle);
    while changes.try_recv().is_ok() {}

    // The stack finally answers the abandoned connect.
    let late = log.last_sink_for("connect").unwrap();
    assert!(late.emit(TransportEvent::ConnectFinished(Ok(()))));
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(controller.current_state(), SessionState::Idle);
    assert!(changes.try_recv().is_err());
    assert!(!log
        .commands()
        .iter()
        .any(|c| matches!(c, Command::ReadIdentity { .. })));
    assert_eq!(log.disconnects_from(&DeviceId::from("D1")), 1);
}

#[tokio::test]
async fn stop_is_safe_from_every_state() {
    let controller = spawn(MockTransport::demo(service()));

    assert_eq!(controller.stop().await.unwrap(), SessionState::Idle);

    controller.start("ASDF1234").await.unwrap();
    wait_terminal(&controller).await;
    assert_eq!(controller.stop().await.unwrap(), SessionState::Idle);
    assert_eq!(controller.stop().await.unwrap(), SessionState::Idle);
    assert_eq!(controller.snapshot().blacklisted, 0);
    assert!(!controller.snapshot().has_target);
}

#[tokio::test]
async fn restart_searches_again_with_fresh_blacklist() {
    let controller = spawn(MockTransport::demo(service()));

    controller.start("WRONG002").await.unwrap();
    let first = wait_terminal(&controller).await;
    assert_eq!(first.state.device(), Some(&DeviceId::from("00:11:22:33:44:02")));
    assert_eq!(first.blacklisted, 1);

    controller.start("WRONG001").await.unwrap();
    let second = wait_terminal(&controller).await;
    assert_eq!(second.state.device(), Some(&DeviceId::from("00:11:22:33:44:01")));
    assert_eq!(second.blacklisted, 0);
}

#[tokio::test]
async fn requests_fail_after_shutdown() {
    let controller = spawn(MockTransport::demo(service()));
    controller.shutdown().await;

    // The driver drains the shutdown request before the channel closes.
    let err = tokio::time::timeout(WAIT, async {
        loop {
            match controller.start("ASDF1234").await {
                Err(err) => break err,
                Ok(_) => tokio::task::yield_now().await,
            }
        }
    })
    .await
    .unwrap();
    assert!(matches!(err, PinpointError::SessionClosed));
}
