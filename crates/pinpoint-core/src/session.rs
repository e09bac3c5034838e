//! Session ownership: target, blacklist, operation tokens, status.
//!
//! Two layers:
//!
//! - [`Session`] is the synchronous core. It owns the active [`Cycle`], the
//!   current [`OperationToken`] and the status channels, and turns requests
//!   and transport completions into tagged [`Dispatch`]es. It performs no
//!   I/O and is what the unit tests drive.
//! - [`SessionController`] is the async handle. It spawns a single driver
//!   task that owns a `Session` and a [`Transport`]; start/stop requests and
//!   transport completions are both consumed by that one task, so every
//!   state transition is applied from a single place.
//!
//! Stale completions are recognised by token: the token moves forward on
//! every phase change, on `start` and on `stop`, and any envelope carrying
//! an older token is dropped.

use serde::Serialize;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tracing::{debug, info, warn};

use crate::cycle::{Cycle, CycleSettings};
use crate::error::{PinpointError, Result};
use crate::transport::{Command, Envelope, EventSink, OperationToken, Transport};
use crate::types::{SessionState, StateChange, TargetIdentity};

/// Capacity of the state-change broadcast channel.
const CHANGE_CHANNEL_CAPACITY: usize = 64;

/// Capacity of the request queue into the driver task.
const REQUEST_CHANNEL_CAPACITY: usize = 16;

/// A command together with the token its completions must carry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dispatch {
    /// Token to stamp on the command's sink.
    pub token: OperationToken,
    /// The command.
    pub command: Command,
}

/// Status snapshot for the UI collaborator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SessionSnapshot {
    /// Current state.
    pub state: SessionState,
    /// Devices rejected in this session.
    pub blacklisted: usize,
    /// Whether a target serial number is set.
    pub has_target: bool,
}

/// Synchronous session core.
#[derive(Debug)]
pub struct Session {
    settings: CycleSettings,
    cycle: Option<Cycle>,
    token: OperationToken,
    snapshot: watch::Sender<SessionSnapshot>,
    changes: broadcast::Sender<StateChange>,
}

impl Session {
    /// An idle session that will search with `settings`.
    #[must_use]
    pub fn new(settings: CycleSettings) -> Self {
        let (snapshot, _) = watch::channel(SessionSnapshot::default());
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            settings,
            cycle: None,
            token: OperationToken::default(),
            snapshot,
            changes,
        }
    }

    /// Begin searching for `serial`, replacing any session in progress.
    ///
    /// # Errors
    ///
    /// Returns [`PinpointError::InvalidInput`] if `serial` is empty; the
    /// session is left exactly as it was.
    pub fn start(&mut self, serial: &str) -> Result<Vec<Dispatch>> {
        let target = TargetIdentity::new(serial)?;

        let mut dispatches = if self.cycle.is_some() {
            self.stop()
        } else {
            Vec::new()
        };

        let (cycle, commands) = Cycle::begin(target, self.settings.clone());
        self.token = self.token.next();
        self.cycle = Some(cycle);
        self.publish();

        dispatches.extend(self.tag(commands));
        Ok(dispatches)
    }

    /// End the session from any state and return to `Idle`.
    ///
    /// The returned dispatches release whatever the cycle held; their
    /// completions, like every other late completion, are ignored.
    pub fn stop(&mut self) -> Vec<Dispatch> {
        self.token = self.token.next();
        let Some(cycle) = self.cycle.take() else {
            debug!("Stop requested with no active session");
            return Vec::new();
        };

        info!(state = cycle.state().name(), "Stopping session");
        let teardown = cycle.teardown();
        self.publish();
        self.tag(teardown)
    }

    /// Apply one transport completion.
    pub fn apply(&mut self, envelope: Envelope) -> Vec<Dispatch> {
        if envelope.token != self.token {
            debug!(
                token = %envelope.token,
                current = %self.token,
                event = ?envelope.event,
                "Dropping stale transport event"
            );
            return Vec::new();
        }

        let Some(cycle) = self.cycle.take() else {
            debug!(event = ?envelope.event, "Dropping transport event with no active session");
            return Vec::new();
        };

        let before_phase = cycle.phase().clone();
        let before_state = cycle.state();
        let before_blacklisted = cycle.blacklist().len();
        let (cycle, commands) = cycle.step(envelope.event);

        if cycle.phase() != &before_phase {
            self.token = self.token.next();
        }
        let state_changed = cycle.state() != before_state;
        let blacklist_grew = cycle.blacklist().len() != before_blacklisted;
        self.cycle = Some(cycle);
        if state_changed {
            self.publish();
        } else if blacklist_grew {
            self.refresh_snapshot();
        }

        self.tag(commands)
    }

    /// Current state.
    #[must_use]
    pub fn current_state(&self) -> SessionState {
        self.cycle.as_ref().map_or(SessionState::Idle, Cycle::state)
    }

    /// Number of devices rejected in the current session.
    #[must_use]
    pub fn blacklisted(&self) -> usize {
        self.cycle.as_ref().map_or(0, |c| c.blacklist().len())
    }

    /// Serial number of the current session.
    #[must_use]
    pub fn target(&self) -> Option<&TargetIdentity> {
        self.cycle.as_ref().map(Cycle::target)
    }

    /// The active cycle, if any.
    #[must_use]
    pub const fn cycle(&self) -> Option<&Cycle> {
        self.cycle.as_ref()
    }

    /// Token completions must currently carry to be applied.
    #[must_use]
    pub const fn token(&self) -> OperationToken {
        self.token
    }

    /// Latest-snapshot channel.
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot.subscribe()
    }

    /// Subscribe to every state transition.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<StateChange> {
        self.changes.subscribe()
    }

    fn tag(&self, commands: Vec<Command>) -> Vec<Dispatch> {
        commands
            .into_iter()
            .map(|command| Dispatch {
                token: self.token,
                command,
            })
            .collect()
    }

    fn current_snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            state: self.current_state(),
            blacklisted: self.blacklisted(),
            has_target: self.cycle.is_some(),
        }
    }

    /// Announce a state transition and update the snapshot.
    fn publish(&self) {
        let snapshot = self.current_snapshot();
        info!(
            state = snapshot.state.name(),
            status = %snapshot.state.status_text(),
            "Session state changed"
        );

        // No subscribers is fine: nobody is watching yet.
        let _ = self.changes.send(StateChange::now(snapshot.state.clone()));
        self.snapshot.send_replace(snapshot);
    }

    /// Update the snapshot without announcing a transition.
    fn refresh_snapshot(&self) {
        self.snapshot.send_replace(self.current_snapshot());
    }
}

// =============================================================================
// ASYNC CONTROLLER
// =============================================================================

enum Request {
    Start {
        serial: String,
        reply: oneshot::Sender<Result<SessionState>>,
    },
    Stop {
        reply: oneshot::Sender<SessionState>,
    },
    Shutdown,
}

/// Cloneable handle on a session driven by a background task.
#[derive(Debug, Clone)]
pub struct SessionController {
    requests: mpsc::Sender<Request>,
    snapshot: watch::Receiver<SessionSnapshot>,
    changes: broadcast::Sender<StateChange>,
}

impl std::fmt::Debug for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Start { serial, .. } => f.debug_struct("Start").field("serial", serial).finish(),
            Self::Stop { .. } => f.write_str("Stop"),
            Self::Shutdown => f.write_str("Shutdown"),
        }
    }
}

impl SessionController {
    /// Spawn the driver task on the current Tokio runtime.
    ///
    /// The task owns `transport` and lives until [`shutdown`](Self::shutdown)
    /// is called or every handle is dropped.
    pub fn spawn<T: Transport>(transport: T, settings: CycleSettings) -> Self {
        let session = Session::new(settings);
        let snapshot = session.watch();
        let changes = session.changes.clone();

        let (requests_tx, requests_rx) = mpsc::channel(REQUEST_CHANNEL_CAPACITY);
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let driver = Driver {
            session,
            transport,
            events_tx,
        };
        tokio::spawn(driver.run(requests_rx, events_rx));

        Self {
            requests: requests_tx,
            snapshot,
            changes,
        }
    }

    /// Start searching for `serial`.
    ///
    /// Returns the state right after the request was applied (normally
    /// `Searching`).
    ///
    /// # Errors
    ///
    /// - [`PinpointError::InvalidInput`] if `serial` is empty
    /// - [`PinpointError::SessionClosed`] if the driver has shut down
    pub async fn start(&self, serial: impl Into<String>) -> Result<SessionState> {
        let (reply, response) = oneshot::channel();
        self.send(Request::Start {
            serial: serial.into(),
            reply,
        })
        .await?;
        response.await.map_err(|_| PinpointError::SessionClosed)?
    }

    /// Stop the session. Safe from any state.
    ///
    /// # Errors
    ///
    /// Returns [`PinpointError::SessionClosed`] if the driver has shut down.
    pub async fn stop(&self) -> Result<SessionState> {
        let (reply, response) = oneshot::channel();
        self.send(Request::Stop { reply }).await?;
        response.await.map_err(|_| PinpointError::SessionClosed)
    }

    /// Stop the session and end the driver task.
    pub async fn shutdown(&self) {
        if self.requests.send(Request::Shutdown).await.is_err() {
            debug!("Session driver already stopped");
        }
    }

    /// Current state.
    #[must_use]
    pub fn current_state(&self) -> SessionState {
        self.snapshot.borrow().state.clone()
    }

    /// Current status snapshot.
    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Receiver that always holds the latest snapshot.
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot.clone()
    }

    /// Subscribe to every state transition from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<StateChange> {
        self.changes.subscribe()
    }

    async fn send(&self, request: Request) -> Result<()> {
        self.requests
            .send(request)
            .await
            .map_err(|_| PinpointError::SessionClosed)
    }
}

struct Driver<T> {
    session: Session,
    transport: T,
    events_tx: mpsc::UnboundedSender<Envelope>,
}

impl<T: Transport> Driver<T> {
    async fn run(
        mut self,
        mut requests: mpsc::Receiver<Request>,
        mut events: mpsc::UnboundedReceiver<Envelope>,
    ) {
        debug!("Session driver started");
        loop {
            tokio::select! {
                biased;

                request = requests.recv() => match request {
                    Some(Request::Start { serial, reply }) => {
                        let outcome = self.session.start(&serial).map(|dispatches| {
                            self.dispatch(dispatches);
                            self.session.current_state()
                        });
                        if let Err(err) = &outcome {
                            warn!(error = %err, "Rejected session start");
                        }
                        let _ = reply.send(outcome);
                    }
                    Some(Request::Stop { reply }) => {
                        let dispatches = self.session.stop();
                        self.dispatch(dispatches);
                        let _ = reply.send(self.session.current_state());
                    }
                    Some(Request::Shutdown) | None => {
                        let dispatches = self.session.stop();
                        self.dispatch(dispatches);
                        break;
                    }
                },

                Some(envelope) = events.recv() => {
                    let dispatches = self.session.apply(envelope);
                    self.dispatch(dispatches);
                }
            }
        }
        debug!("Session driver stopped");
    }

    fn dispatch(&mut self, dispatches: Vec<Dispatch>) {
        for Dispatch { token, command } in dispatches {
            debug!(command = command.name(), token = %token, "Dispatching transport command");
            let sink = EventSink::new(token, self.events_tx.clone());
            self.transport.execute(command, sink);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{ConnectionPreferences, TransportEvent};
    use crate::types::{DeviceId, DiscoveredDevice, ErrorKind, Failure};
    use uuid::Uuid;

    const SERVICE: Uuid = Uuid::from_u128(0xD12F_953F_18ED_45F8_BC0B_6B78_DB90_B491);
    const SERIAL_CHAR: Uuid = Uuid::from_u128(0xED8C_753F_C961_4861_A399_3B15_68C1_D23E);

    fn session() -> Session {
        Session::new(CycleSettings::new(SERVICE, SERIAL_CHAR))
    }

    fn envelope(token: OperationToken, event: TransportEvent) -> Envelope {
        Envelope { token, event }
    }

    fn discovered(id: &str) -> TransportEvent {
        TransportEvent::Discovered(DiscoveredDevice::new(id))
    }

    fn commands(dispatches: &[Dispatch]) -> Vec<Command> {
        dispatches.iter().map(|d| d.command.clone()).collect()
    }

    #[test]
    fn test_start_empty_rejected_and_state_unchanged() {
        let mut session = session();
        let err = session.start("").unwrap_err();

        assert!(matches!(err, PinpointError::InvalidInput(_)));
        assert_eq!(session.current_state(), SessionState::Idle);
        assert!(session.target().is_none());
    }

    #[test]
    fn test_start_empty_keeps_running_session() {
        let mut session = session();
        session.start("ASDF1234").unwrap();
        let token = session.token();

        assert!(session.start("").is_err());
        assert_eq!(session.current_state(), SessionState::Searching);
        assert_eq!(session.token(), token);
        assert_eq!(session.target().unwrap().as_str(), "ASDF1234");
    }

    #[test]
    fn test_start_begins_scan() {
        let mut session = session();
        let dispatches = session.start("ASDF1234").unwrap();

        assert_eq!(
            commands(&dispatches),
            vec![Command::StartScan { service: SERVICE }]
        );
        assert_eq!(dispatches[0].token, session.token());
        assert_eq!(session.current_state(), SessionState::Searching);
    }

    #[test]
    fn test_discoveries_after_connect_commit_are_stale() {
        let mut session = session();
        let scan = session.start("ASDF1234").unwrap()[0].token;

        let dispatches = session.apply(envelope(scan, discovered("D1")));
        assert_eq!(
            commands(&dispatches),
            vec![Command::Connect {
                device: "D1".into(),
                preferences: ConnectionPreferences::default(),
            }]
        );
        assert_ne!(dispatches[0].token, scan);

        // The same scan keeps reporting devices; none may start a second connect.
        assert!(session.apply(envelope(scan, discovered("D2"))).is_empty());
        assert!(session.apply(envelope(scan, discovered("D3"))).is_empty());
        assert_eq!(
            session.current_state(),
            SessionState::Connecting {
                device: "D1".into()
            }
        );
    }

    #[test]
    fn test_rejection_keeps_scan_token_valid() {
        let mut session = session();
        let scan = session.start("ASDF1234").unwrap()[0].token;

        let connect = session.apply(envelope(scan, discovered("D1")))[0].token;
        let read =
            session.apply(envelope(connect, TransportEvent::ConnectFinished(Ok(()))))[0].token;
        let disconnect =
            session.apply(envelope(read, TransportEvent::IdentityRead(Ok("WRONG001".into()))))[0]
                .token;
        let rescan = session.apply(envelope(
            disconnect,
            TransportEvent::DisconnectFinished(Ok(())),
        ))[0]
            .token;
        assert_eq!(session.blacklisted(), 1);

        let dispatches = session.apply(envelope(rescan, discovered("D1")));
        assert_eq!(commands(&dispatches), vec![Command::RejectDevice("D1".into())]);
        assert_eq!(dispatches[0].token, rescan);

        // Still the same scan: the next device is connected to.
        let dispatches = session.apply(envelope(rescan, discovered("D2")));
        assert!(matches!(
            dispatches[0].command,
            Command::Connect { ref device, .. } if device == &DeviceId::from("D2")
        ));
    }

    #[test]
    fn test_stop_from_connecting_ignores_late_completion() {
        let mut session = session();
        let scan = session.start("ASDF1234").unwrap()[0].token;
        let connect = session.apply(envelope(scan, discovered("D1")))[0].token;

        let teardown = session.stop();
        assert_eq!(commands(&teardown), vec![Command::Disconnect("D1".into())]);
        assert_eq!(session.current_state(), SessionState::Idle);

        assert!(session
            .apply(envelope(connect, TransportEvent::ConnectFinished(Ok(()))))
            .is_empty());
        assert_eq!(session.current_state(), SessionState::Idle);
    }

    #[test]
    fn test_stop_is_idempotent() {
        let mut session = session();
        assert!(session.stop().is_empty());

        session.start("ASDF1234").unwrap();
        assert_eq!(commands(&session.stop()), vec![Command::StopScan]);
        assert!(session.stop().is_empty());
        assert_eq!(session.current_state(), SessionState::Idle);
        assert_eq!(session.blacklisted(), 0);
    }

    #[test]
    fn test_restart_clears_blacklist() {
        let mut session = session();
        let scan = session.start("ASDF1234").unwrap()[0].token;
        let connect = session.apply(envelope(scan, discovered("D1")))[0].token;
        let read =
            session.apply(envelope(connect, TransportEvent::ConnectFinished(Ok(()))))[0].token;
        session.apply(envelope(read, TransportEvent::IdentityRead(Ok("WRONG".into()))));
        assert_eq!(session.blacklisted(), 1);

        let dispatches = session.start("OTHER").unwrap();
        assert_eq!(
            commands(&dispatches),
            vec![
                Command::Disconnect("D1".into()),
                Command::StartScan { service: SERVICE }
            ]
        );
        assert_eq!(session.blacklisted(), 0);

        let scan = dispatches[1].token;
        let dispatches = session.apply(envelope(scan, discovered("D1")));
        assert!(matches!(dispatches[0].command, Command::Connect { .. }));
    }

    #[test]
    fn test_read_failure_reported_without_blacklisting() {
        let mut session = session();
        let scan = session.start("ASDF1234").unwrap()[0].token;
        let connect = session.apply(envelope(scan, discovered("D2")))[0].token;
        let read =
            session.apply(envelope(connect, TransportEvent::ConnectFinished(Ok(()))))[0].token;

        assert!(session
            .apply(envelope(read, TransportEvent::IdentityRead(Err("gatt error".into()))))
            .is_empty());
        assert_eq!(session.blacklisted(), 0);
        assert_eq!(
            session.current_state(),
            SessionState::Failed {
                failure: Failure::new(ErrorKind::ReadError, "gatt error")
            }
        );
    }

    #[test]
    fn test_stop_after_read_failure_releases_device() {
        let mut session = session();
        let scan = session.start("ASDF1234").unwrap()[0].token;
        let connect = session.apply(envelope(scan, discovered("D2")))[0].token;
        let read =
            session.apply(envelope(connect, TransportEvent::ConnectFinished(Ok(()))))[0].token;
        session.apply(envelope(read, TransportEvent::IdentityRead(Err("gatt error".into()))));

        assert_eq!(commands(&session.stop()), vec![Command::Disconnect("D2".into())]);
        assert_eq!(session.current_state(), SessionState::Idle);
    }

    #[test]
    fn test_restart_after_read_failure_releases_device_first() {
        let mut session = session();
        let scan = session.start("ASDF1234").unwrap()[0].token;
        let connect = session.apply(envelope(scan, discovered("D2")))[0].token;
        let read =
            session.apply(envelope(connect, TransportEvent::ConnectFinished(Ok(()))))[0].token;
        session.apply(envelope(read, TransportEvent::IdentityRead(Err("gatt error".into()))));

        assert_eq!(
            commands(&session.start("ASDF1234").unwrap()),
            vec![
                Command::Disconnect("D2".into()),
                Command::StartScan { service: SERVICE }
            ]
        );
    }

    #[test]
    fn test_mismatch_publishes_blacklist_before_disconnect_completes() {
        let mut session = session();
        let watch = session.watch();
        let scan = session.start("ASDF1234").unwrap()[0].token;
        let connect = session.apply(envelope(scan, discovered("D1")))[0].token;
        let read =
            session.apply(envelope(connect, TransportEvent::ConnectFinished(Ok(()))))[0].token;
        session.apply(envelope(read, TransportEvent::IdentityRead(Ok("WRONG".into()))));

        let snapshot = watch.borrow().clone();
        assert_eq!(
            snapshot.state,
            SessionState::Verifying {
                device: "D1".into()
            }
        );
        assert_eq!(snapshot.blacklisted, 1);
    }

    #[test]
    fn test_blacklist_growth_is_not_announced_as_transition() {
        let mut session = session();
        let mut changes = session.subscribe();
        let scan = session.start("ASDF1234").unwrap()[0].token;
        let connect = session.apply(envelope(scan, discovered("D1")))[0].token;
        let read =
            session.apply(envelope(connect, TransportEvent::ConnectFinished(Ok(()))))[0].token;
        session.apply(envelope(read, TransportEvent::IdentityRead(Ok("WRONG".into()))));

        let names: Vec<&str> = std::iter::from_fn(|| changes.try_recv().ok())
            .map(|change| change.state.name())
            .collect();
        assert_eq!(names, vec!["searching", "connecting", "verifying"]);
    }

    #[test]
    fn test_every_transition_is_broadcast() {
        let mut session = session();
        let mut changes = session.subscribe();

        let scan = session.start("ASDF1234").unwrap()[0].token;
        let connect = session.apply(envelope(scan, discovered("D1")))[0].token;
        let read =
            session.apply(envelope(connect, TransportEvent::ConnectFinished(Ok(()))))[0].token;
        session.apply(envelope(read, TransportEvent::IdentityRead(Ok("ASDF1234".into()))));

        let names: Vec<&str> = std::iter::from_fn(|| changes.try_recv().ok())
            .map(|change| change.state.name())
            .collect();
        assert_eq!(names, vec!["searching", "connecting", "verifying", "connected"]);
    }

    #[test]
    fn test_snapshot_tracks_blacklist() {
        let mut session = session();
        let watch = session.watch();
        let scan = session.start("ASDF1234").unwrap()[0].token;
        let connect = session.apply(envelope(scan, discovered("D1")))[0].token;
        let read =
            session.apply(envelope(connect, TransportEvent::ConnectFinished(Ok(()))))[0].token;
        let disconnect =
            session.apply(envelope(read, TransportEvent::IdentityRead(Ok("WRONG".into()))))[0]
                .token;
        session.apply(envelope(disconnect, TransportEvent::DisconnectFinished(Ok(()))));

        let snapshot = watch.borrow().clone();
        assert_eq!(snapshot.state, SessionState::Searching);
        assert_eq!(snapshot.blacklisted, 1);
        assert!(snapshot.has_target);
    }
}
