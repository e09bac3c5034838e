//! BlueZ transport (Linux) built on `bluer`.
//!
//! Every command is carried out on its own Tokio task; `execute` returns
//! immediately. A connect aborts the running scan, which is how the
//! scan-versus-connect exclusion of the BLE stack is honoured here.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bluer::{
    Adapter, AdapterEvent, Address, DeviceEvent, DeviceProperty, DiscoveryFilter,
    DiscoveryTransport,
};
use futures::{pin_mut, StreamExt};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::BluetoothConfig;
use crate::transport::{
    Command, ConnectionPreferences, EventSink, Transport, TransportError, TransportEvent,
};
use crate::types::{DeviceId, DiscoveredDevice};

type Rejected = Arc<Mutex<HashSet<Address>>>;

/// [`Transport`] talking to the local BlueZ daemon.
pub struct BluezTransport {
    adapter: Adapter,
    timeout: Option<Duration>,
    rejected: Rejected,
    scan: Option<JoinHandle<()>>,
    watchers: HashMap<DeviceId, JoinHandle<()>>,
}

impl std::fmt::Debug for BluezTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BluezTransport")
            .field("adapter", &self.adapter.name())
            .field("timeout", &self.timeout)
            .field("scanning", &self.scan.is_some())
            .finish_non_exhaustive()
    }
}

impl BluezTransport {
    /// Open a BlueZ session and power on the configured adapter.
    ///
    /// # Errors
    ///
    /// - [`TransportError::AdapterNotFound`] if the adapter does not exist
    /// - [`TransportError::Unavailable`] if BlueZ cannot be reached or the
    ///   adapter cannot be powered on
    pub async fn new(config: &BluetoothConfig) -> Result<Self, TransportError> {
        let session = bluer::Session::new()
            .await
            .map_err(|e| TransportError::Unavailable(e.to_string()))?;

        let adapter = match &config.adapter {
            Some(name) => session.adapter(name),
            None => session.default_adapter().await,
        }
        .map_err(|e| match e.kind {
            bluer::ErrorKind::NotFound => TransportError::AdapterNotFound,
            _ => TransportError::Unavailable(e.to_string()),
        })?;

        adapter
            .set_powered(true)
            .await
            .map_err(|e| TransportError::Unavailable(format!("cannot power on adapter: {e}")))?;

        info!(adapter = adapter.name(), "Bluetooth adapter ready");

        Ok(Self {
            adapter,
            timeout: config.operation_timeout(),
            rejected: Arc::default(),
            scan: None,
            watchers: HashMap::new(),
        })
    }

    fn stop_scan(&mut self) {
        if let Some(scan) = self.scan.take() {
            debug!("Stopping scan");
            scan.abort();
        }
    }

    fn stop_watcher(&mut self, device: &DeviceId) {
        if let Some(watcher) = self.watchers.remove(device) {
            watcher.abort();
        }
    }
}

impl Transport for BluezTransport {
    fn execute(&mut self, command: Command, sink: EventSink) {
        match command {
            Command::StartScan { service } => {
                self.stop_scan();
                lock(&self.rejected).clear();
                let adapter = self.adapter.clone();
                let rejected = Arc::clone(&self.rejected);
                self.scan = Some(tokio::spawn(scan(adapter, service, rejected, sink)));
            }

            Command::StopScan => self.stop_scan(),

            Command::RejectDevice(device) => match parse_address(&device) {
                Ok(address) => {
                    lock(&self.rejected).insert(address);
                }
                Err(err) => warn!(device = %device, error = %err, "Cannot reject device"),
            },

            Command::Connect {
                device,
                preferences,
            } => {
                self.stop_scan();
                let adapter = self.adapter.clone();
                let timeout = self.timeout;
                let watcher = connect(adapter, device.clone(), preferences, timeout, sink);
                self.stop_watcher(&device);
                self.watchers.insert(device, tokio::spawn(watcher));
            }

            Command::ReadIdentity {
                device,
                characteristic,
            } => {
                let adapter = self.adapter.clone();
                let timeout = self.timeout;
                tokio::spawn(async move {
                    let outcome = read_identity(&adapter, &device, characteristic, timeout).await;
                    sink.emit(TransportEvent::IdentityRead(outcome));
                });
            }

            Command::Disconnect(device) => {
                self.stop_watcher(&device);
                let adapter = self.adapter.clone();
                let timeout = self.timeout;
                tokio::spawn(async move {
                    let outcome = disconnect(&adapter, &device, timeout).await;
                    sink.emit(TransportEvent::DisconnectFinished(outcome));
                });
            }
        }
    }
}

impl Drop for BluezTransport {
    fn drop(&mut self) {
        self.stop_scan();
        for (_, watcher) in self.watchers.drain() {
            watcher.abort();
        }
    }
}

fn lock(rejected: &Rejected) -> std::sync::MutexGuard<'_, HashSet<Address>> {
    rejected
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}

fn parse_address(device: &DeviceId) -> Result<Address, String> {
    device
        .as_str()
        .parse()
        .map_err(|_| format!("invalid Bluetooth address: {device}"))
}

/// Run `operation`, failing with a message if it errors or outlives `timeout`.
async fn guarded<T, F>(timeout: Option<Duration>, operation: F) -> Result<T, String>
where
    F: Future<Output = bluer::Result<T>>,
{
    let outcome = match timeout {
        Some(limit) => tokio::time::timeout(limit, operation)
            .await
            .map_err(|_| format!("timed out after {}s", limit.as_secs()))?,
        None => operation.await,
    };
    outcome.map_err(|e| e.to_string())
}

async fn scan(adapter: Adapter, service: Uuid, rejected: Rejected, sink: EventSink) {
    let mut filter = DiscoveryFilter::default();
    filter.uuids = HashSet::from([service]);
    filter.transport = DiscoveryTransport::Le;
    filter.duplicate_data = false;

    if let Err(err) = adapter.set_discovery_filter(filter).await {
        sink.emit(TransportEvent::ScanStopped(Some(err.to_string())));
        return;
    }

    let events = match adapter.discover_devices().await {
        Ok(events) => events,
        Err(err) => {
            sink.emit(TransportEvent::ScanStopped(Some(err.to_string())));
            return;
        }
    };
    pin_mut!(events);
    debug!(service = %service, "Scan started");

    let mut seen = HashSet::new();
    while let Some(event) = events.next().await {
        let AdapterEvent::DeviceAdded(address) = event else {
            continue;
        };
        let is_rejected = lock(&rejected).contains(&address);
        if is_rejected || !seen.insert(address) {
            continue;
        }

        match describe(&adapter, address).await {
            Ok(device) if device.services.is_empty() || device.services.contains(&service) => {
                if !sink.emit(TransportEvent::Discovered(device)) {
                    return;
                }
            }
            Ok(device) => debug!(device = %device.id, "Skipping device without required service"),
            Err(err) => debug!(address = %address, error = %err, "Cannot read advertisement"),
        }
    }

    sink.emit(TransportEvent::ScanStopped(None));
}

async fn describe(adapter: &Adapter, address: Address) -> bluer::Result<DiscoveredDevice> {
    let device = adapter.device(address)?;
    let mut discovered = DiscoveredDevice::new(DeviceId::new(address.to_string()));
    discovered.name = device.name().await?;
    discovered.rssi = device.rssi().await?;
    discovered.services = device
        .uuids()
        .await?
        .map(|uuids| uuids.into_iter().collect())
        .unwrap_or_default();
    Ok(discovered)
}

/// Connect, report the outcome, then optionally watch for the peripheral
/// dropping the link.
async fn connect(
    adapter: Adapter,
    device: DeviceId,
    preferences: ConnectionPreferences,
    timeout: Option<Duration>,
    sink: EventSink,
) {
    let peripheral = match parse_address(&device)
        .and_then(|address| adapter.device(address).map_err(|e| e.to_string()))
    {
        Ok(peripheral) => peripheral,
        Err(err) => {
            sink.emit(TransportEvent::ConnectFinished(Err(err)));
            return;
        }
    };

    let outcome = guarded(timeout, peripheral.connect()).await;
    let connected = outcome.is_ok();
    if connected && preferences.notify_on_connection {
        info!(device = %device, "Peripheral connected");
    }
    sink.emit(TransportEvent::ConnectFinished(outcome));

    if !connected || !preferences.notify_on_disconnection {
        return;
    }

    let Ok(events) = peripheral.events().await else {
        return;
    };
    pin_mut!(events);
    while let Some(event) = events.next().await {
        if let DeviceEvent::PropertyChanged(DeviceProperty::Connected(false)) = event {
            warn!(device = %device, "Peripheral disconnected");
            return;
        }
    }
}

async fn read_identity(
    adapter: &Adapter,
    device: &DeviceId,
    characteristic: Uuid,
    timeout: Option<Duration>,
) -> Result<String, String> {
    let address = parse_address(device)?;
    let peripheral = adapter.device(address).map_err(|e| e.to_string())?;

    let lookup = async {
        for service in peripheral.services().await? {
            for candidate in service.characteristics().await? {
                if candidate.uuid().await? == characteristic {
                    return Ok(Some(candidate.read().await?));
                }
            }
        }
        Ok::<_, bluer::Error>(None)
    };

    let value = guarded(timeout, lookup)
        .await?
        .ok_or_else(|| format!("identity characteristic {characteristic} not found"))?;

    String::from_utf8(value).map_err(|_| "serial number is not valid UTF-8".to_string())
}

async fn disconnect(
    adapter: &Adapter,
    device: &DeviceId,
    timeout: Option<Duration>,
) -> Result<(), String> {
    let address = parse_address(device)?;
    let peripheral = adapter.device(address).map_err(|e| e.to_string())?;
    guarded(timeout, peripheral.disconnect()).await
}
