//! Simulated peripherals for tests and hardware-less development.
//!
//! [`MockTransport`] answers every command synchronously from a fixed list
//! of [`MockPeripheral`]s. A peripheral can be told to leave its connect
//! unanswered, which lets tests deliver the completion later (or never)
//! through the sink kept in the [`CommandLog`].

use std::sync::{Arc, Mutex, MutexGuard};

use tracing::debug;
use uuid::Uuid;

use crate::transport::{Command, EventSink, Transport, TransportEvent};
use crate::types::{DeviceId, DiscoveredDevice};

/// One simulated peripheral.
#[derive(Debug, Clone)]
pub struct MockPeripheral {
    /// What a scan reports for this peripheral.
    pub advertisement: DiscoveredDevice,
    /// Result of reading the identity characteristic.
    pub serial: Result<String, String>,
    /// Result of connecting; `None` leaves the connect unanswered.
    pub connect: Option<Result<(), String>>,
    /// Result of disconnecting.
    pub disconnect: Result<(), String>,
}

impl MockPeripheral {
    /// A well-behaved peripheral advertising `service` with serial `serial`.
    pub fn new(id: &str, service: Uuid, serial: &str) -> Self {
        Self {
            advertisement: DiscoveredDevice::new(id)
                .with_name(format!("Mock {id}"))
                .with_rssi(-50)
                .with_services(vec![service]),
            serial: Ok(serial.to_string()),
            connect: Some(Ok(())),
            disconnect: Ok(()),
        }
    }

    /// Fail the identity read with `message`.
    #[must_use]
    pub fn with_read_error(mut self, message: &str) -> Self {
        self.serial = Err(message.to_string());
        self
    }

    /// Fail the connect with `message`.
    #[must_use]
    pub fn with_connect_error(mut self, message: &str) -> Self {
        self.connect = Some(Err(message.to_string()));
        self
    }

    /// Never answer a connect.
    #[must_use]
    pub fn with_pending_connect(mut self) -> Self {
        self.connect = None;
        self
    }

    /// Fail the disconnect with `message`.
    #[must_use]
    pub fn with_disconnect_error(mut self, message: &str) -> Self {
        self.disconnect = Err(message.to_string());
        self
    }
}

/// Shared record of every command a [`MockTransport`] received.
#[derive(Debug, Clone, Default)]
pub struct CommandLog {
    entries: Arc<Mutex<Vec<(Command, EventSink)>>>,
}

impl CommandLog {
    fn lock(&self) -> MutexGuard<'_, Vec<(Command, EventSink)>> {
        // A poisoned log only means a test already panicked.
        self.entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn push(&self, command: Command, sink: EventSink) {
        self.lock().push((command, sink));
    }

    /// Commands received so far, in order.
    #[must_use]
    pub fn commands(&self) -> Vec<Command> {
        self.lock().iter().map(|(command, _)| command.clone()).collect()
    }

    /// How many connects were issued for `device`.
    #[must_use]
    pub fn connects_to(&self, device: &DeviceId) -> usize {
        self.lock()
            .iter()
            .filter(|(command, _)| {
                matches!(command, Command::Connect { device: d, .. } if d == device)
            })
            .count()
    }

    /// How many disconnects were issued for `device`.
    #[must_use]
    pub fn disconnects_from(&self, device: &DeviceId) -> usize {
        self.lock()
            .iter()
            .filter(|(command, _)| matches!(command, Command::Disconnect(d) if d == device))
            .count()
    }

    /// The sink handed over with the most recent command named `name`.
    #[must_use]
    pub fn last_sink_for(&self, name: &str) -> Option<EventSink> {
        self.lock()
            .iter()
            .rev()
            .find(|(command, _)| command.name() == name)
            .map(|(_, sink)| sink.clone())
    }
}

/// Transport backed by [`MockPeripheral`]s.
///
/// A scan reports every matching peripheral at once, before any later
/// command can arrive, so `RejectDevice` has nothing left to suppress and
/// is only recorded in the log.
#[derive(Debug)]
pub struct MockTransport {
    peripherals: Vec<MockPeripheral>,
    scan_error: Option<String>,
    log: CommandLog,
}

impl MockTransport {
    /// A transport that will discover `peripherals`, in order, on every scan.
    #[must_use]
    pub fn new(peripherals: Vec<MockPeripheral>) -> Self {
        Self {
            peripherals,
            scan_error: None,
            log: CommandLog::default(),
        }
    }

    /// A small neighbourhood of look-alike peripherals for local development.
    ///
    /// Two devices report the wrong serial before one reporting `ASDF1234`.
    #[must_use]
    pub fn demo(service: Uuid) -> Self {
        Self::new(vec![
            MockPeripheral::new("00:11:22:33:44:01", service, "WRONG001"),
            MockPeripheral::new("00:11:22:33:44:02", service, "WRONG002"),
            MockPeripheral::new("00:11:22:33:44:03", service, "ASDF1234"),
        ])
    }

    /// Make every scan stop immediately with `message`.
    #[must_use]
    pub fn with_scan_error(mut self, message: &str) -> Self {
        self.scan_error = Some(message.to_string());
        self
    }

    /// Handle on the command record.
    #[must_use]
    pub fn log(&self) -> CommandLog {
        self.log.clone()
    }

    fn peripheral(&self, device: &DeviceId) -> Option<&MockPeripheral> {
        self.peripherals
            .iter()
            .find(|p| &p.advertisement.id == device)
    }
}

impl Transport for MockTransport {
    fn execute(&mut self, command: Command, sink: EventSink) {
        debug!(command = command.name(), token = %sink.token(), "Mock transport command");
        self.log.push(command.clone(), sink.clone());

        match command {
            Command::StartScan { service } => {
                if let Some(message) = &self.scan_error {
                    sink.emit(TransportEvent::ScanStopped(Some(message.clone())));
                    return;
                }
                for peripheral in &self.peripherals {
                    let advert = &peripheral.advertisement;
                    if advert.services.contains(&service) {
                        sink.emit(TransportEvent::Discovered(advert.clone()));
                    }
                }
            }
            Command::StopScan | Command::RejectDevice(_) => {}
            Command::Connect { device, .. } => {
                let outcome = match self.peripheral(&device) {
                    Some(p) => p.connect.clone(),
                    None => Some(Err(format!("unknown device {device}"))),
                };
                if let Some(outcome) = outcome {
                    sink.emit(TransportEvent::ConnectFinished(outcome));
                }
            }
            Command::ReadIdentity { device, .. } => {
                let outcome = self
                    .peripheral(&device)
                    .map_or_else(|| Err(format!("unknown device {device}")), |p| p.serial.clone());
                sink.emit(TransportEvent::IdentityRead(outcome));
            }
            Command::Disconnect(device) => {
                let outcome = self
                    .peripheral(&device)
                    .map_or(Ok(()), |p| p.disconnect.clone());
                sink.emit(TransportEvent::DisconnectFinished(outcome));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{ConnectionPreferences, Envelope, OperationToken};
    use tokio::sync::mpsc;

    const SERVICE: Uuid = Uuid::from_u128(1);

    fn sink() -> (EventSink, mpsc::UnboundedReceiver<Envelope>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (EventSink::new(OperationToken::default(), tx), rx)
    }

    #[test]
    fn test_scan_skips_foreign_service() {
        let mut transport = MockTransport::new(vec![
            MockPeripheral::new("D1", Uuid::from_u128(2), "A"),
            MockPeripheral::new("D2", SERVICE, "B"),
        ]);
        let (sink, mut rx) = sink();

        transport.execute(Command::StartScan { service: SERVICE }, sink);

        let envelope = rx.try_recv().unwrap();
        assert!(
            matches!(
                envelope.event,
                TransportEvent::Discovered(ref d) if d.id == DeviceId::from("D2")
            )
        );
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_rejected_device_is_offered_again_on_rescan() {
        let mut transport = MockTransport::new(vec![MockPeripheral::new("D1", SERVICE, "A")]);
        let log = transport.log();
        let (sink, mut rx) = sink();

        transport.execute(Command::StartScan { service: SERVICE }, sink.clone());
        transport.execute(Command::RejectDevice("D1".into()), sink.clone());
        transport.execute(Command::StartScan { service: SERVICE }, sink);

        // Rejection emits nothing; the second scan reports D1 again.
        assert_eq!(std::iter::from_fn(|| rx.try_recv().ok()).count(), 2);
        assert!(log.commands().contains(&Command::RejectDevice("D1".into())));
    }

    #[test]
    fn test_pending_connect_is_unanswered_but_logged() {
        let mut transport = MockTransport::new(vec![
            MockPeripheral::new("D1", SERVICE, "A").with_pending_connect(),
        ]);
        let log = transport.log();
        let (sink, mut rx) = sink();

        transport.execute(
            Command::Connect {
                device: "D1".into(),
                preferences: ConnectionPreferences::default(),
            },
            sink,
        );

        assert!(rx.try_recv().is_err());
        assert_eq!(log.connects_to(&"D1".into()), 1);
        assert!(log.last_sink_for("connect").is_some());
    }
}
