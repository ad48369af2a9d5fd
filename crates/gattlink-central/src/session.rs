//! Central GATT session
//!
//! A [`CentralSession`] drives one outbound link through
//! `Idle -> Connecting -> NegotiatingMtu -> DiscoveringServices -> Ready` and
//! back to `Idle`, scanning independently of the link. Caller operations and
//! adapter completions may arrive on any thread; each piece of mutable state
//! sits behind its own lock and every observable value is published through a
//! [`Published`] cell.

use std::sync::{Arc, Weak};

use gattlink_core::protocol::{
    CCCD_UUID, CHARACTERISTIC_UUID, DEFAULT_ATT_MTU, ENABLE_NOTIFICATION_VALUE, SERVICE_UUID,
};
use gattlink_core::{
    ConnectionState, GattCharacteristic, GattError, GattService, GattStatus, Message, PeerAddress,
    PermissionGate, Published, ReceivedData, Result, ScannedDevice,
};
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::adapter::{
    CentralAdapter, CentralEvent, LinkState, ScanFilter, ScanRecord, ScanSettings, TransportHandle,
};
use crate::config::CentralConfig;
use crate::registry;

// ----------------------------------------------------------------------------
// Session State
// ----------------------------------------------------------------------------

/// Fine-grained progress of the outbound link
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LinkPhase {
    #[default]
    Idle,
    Connecting,
    NegotiatingMtu,
    DiscoveringServices,
    Ready,
}

#[derive(Debug, Clone)]
struct Link {
    handle: TransportHandle,
    peer: PeerAddress,
}

#[derive(Default)]
struct ScanState {
    active: bool,
    /// Bumped on every start so a late timer cannot stop a newer scan
    generation: u64,
    timer: Option<JoinHandle<()>>,
}

struct Inner {
    adapter: Arc<dyn CentralAdapter>,
    permissions: Arc<dyn PermissionGate>,
    config: CentralConfig,
    runtime: Handle,

    link: Mutex<Option<Link>>,
    scan: Mutex<ScanState>,
    services: Mutex<Vec<GattService>>,

    connection_state: Published<ConnectionState>,
    phase: Published<LinkPhase>,
    devices: Published<Vec<ScannedDevice>>,
    messages: Published<Vec<Message>>,
    scanning: Published<bool>,
    mtu: Published<u16>,
    received_tx: broadcast::Sender<ReceivedData>,
}

// ----------------------------------------------------------------------------
// Central Session
// ----------------------------------------------------------------------------

/// GATT client session; clones share the same session
#[derive(Clone)]
pub struct CentralSession {
    inner: Arc<Inner>,
}

impl CentralSession {
    /// Create a session bound to the current Tokio runtime
    pub fn new(
        adapter: Arc<dyn CentralAdapter>,
        permissions: Arc<dyn PermissionGate>,
        config: CentralConfig,
    ) -> Result<Self> {
        let runtime = Handle::try_current().map_err(|_| GattError::RuntimeUnavailable)?;
        let (received_tx, _) = broadcast::channel(config.notification_buffer.max(1));

        Ok(Self {
            inner: Arc::new(Inner {
                adapter,
                permissions,
                config,
                runtime,
                link: Mutex::new(None),
                scan: Mutex::new(ScanState::default()),
                services: Mutex::new(Vec::new()),
                connection_state: Published::default(),
                phase: Published::default(),
                devices: Published::default(),
                messages: Published::default(),
                scanning: Published::new(false),
                mtu: Published::new(DEFAULT_ATT_MTU),
                received_tx,
            }),
        })
    }

    pub fn config(&self) -> &CentralConfig {
        &self.inner.config
    }

    // ------------------------------------------------------------------------
    // Scanning
    // ------------------------------------------------------------------------

    /// Start a scan that stops itself after the configured window
    pub fn start_scan(&self) {
        if let Err(e) = self.inner.permissions.check() {
            self.fail(e);
            return;
        }

        let generation = {
            let mut scan = self.inner.scan.lock();
            if scan.active {
                debug!("Scan already running");
                return;
            }
            scan.active = true;
            scan.generation = scan.generation.wrapping_add(1);
            self.inner.scanning.set(true);
            scan.generation
        };

        self.inner.devices.set(Vec::new());
        let settings = ScanSettings {
            mode: self.inner.config.scan_mode,
        };
        self.inner
            .adapter
            .start_scan(&[ScanFilter::default()], &settings);
        info!(period = ?self.inner.config.scan_period, "Started BLE scan");

        let timer = self.spawn_scan_timer(generation);
        let mut scan = self.inner.scan.lock();
        if scan.active && scan.generation == generation {
            scan.timer = Some(timer);
        } else {
            timer.abort();
        }
    }

    /// Stop the running scan; does nothing when no scan is running
    pub fn stop_scan(&self) {
        if self.end_scan(None) {
            self.inner.adapter.stop_scan();
            info!("Stopped BLE scan");
        }
    }

    fn spawn_scan_timer(&self, generation: u64) -> JoinHandle<()> {
        let period = self.inner.config.scan_period;
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        self.inner.runtime.spawn(async move {
            tokio::time::sleep(period).await;
            if let Some(inner) = weak.upgrade() {
                let session = CentralSession { inner };
                if session.end_scan(Some(generation)) {
                    session.inner.adapter.stop_scan();
                    info!("Scan window elapsed");
                }
            }
        })
    }

    /// Clear the scanning flag and cancel the timer. Returns `false` when no
    /// scan (or not the expected one) was running.
    fn end_scan(&self, generation: Option<u64>) -> bool {
        let timer = {
            let mut scan = self.inner.scan.lock();
            if !scan.active || generation.is_some_and(|g| g != scan.generation) {
                return false;
            }
            scan.active = false;
            self.inner.scanning.set(false);
            scan.timer.take()
        };
        if let Some(timer) = timer {
            timer.abort();
        }
        true
    }

    fn on_scan_result(&self, record: ScanRecord) {
        let Some(device) = registry::device_from_record(record) else {
            return;
        };
        debug!(address = %device.address, name = %device.name, rssi = device.rssi, "Scan result");
        self.inner
            .devices
            .update(|devices| registry::upsert(devices, device));
    }

    fn on_scan_failed(&self, code: i32) {
        self.end_scan(None);
        self.fail(GattError::ScanFailed { code });
    }

    // ------------------------------------------------------------------------
    // Link Lifecycle
    // ------------------------------------------------------------------------

    /// Open a link to `peer`, releasing any previous one first
    pub fn connect(&self, peer: &PeerAddress) {
        if let Err(e) = self.inner.permissions.check() {
            self.fail(e);
            return;
        }

        // Held across the adapter call so an early completion for the new
        // handle cannot be mistaken for a stale one.
        let mut link = self.inner.link.lock();
        if let Some(previous) = link.take() {
            info!(handle = %previous.handle, peer = %previous.peer, "Releasing previous link");
            self.inner.adapter.disconnect(previous.handle);
            self.inner.adapter.close(previous.handle);
        }
        self.reset_link_state();
        self.inner.connection_state.set(ConnectionState::Connecting);
        self.inner.phase.set(LinkPhase::Connecting);

        match self.inner.adapter.connect(peer) {
            Ok(handle) => {
                info!(%peer, %handle, "Connecting to GATT server");
                *link = Some(Link {
                    handle,
                    peer: peer.clone(),
                });
            }
            Err(e) => {
                drop(link);
                self.inner.phase.set(LinkPhase::Idle);
                self.fail(e);
            }
        }
    }

    /// Ask the adapter to drop the link; cleanup happens on the disconnected
    /// callback
    pub fn disconnect(&self) {
        let handle = self.inner.link.lock().as_ref().map(|l| l.handle);
        match handle {
            Some(handle) => {
                info!(%handle, "Disconnecting");
                self.inner.adapter.disconnect(handle);
            }
            None => debug!("No link to disconnect"),
        }
    }

    /// Stop scanning and drop the link
    pub fn shutdown(&self) {
        self.stop_scan();
        self.disconnect();
    }

    fn current_peer(&self, handle: TransportHandle) -> Option<PeerAddress> {
        self.inner
            .link
            .lock()
            .as_ref()
            .filter(|link| link.handle == handle)
            .map(|link| link.peer.clone())
    }

    fn reset_link_state(&self) {
        self.inner.services.lock().clear();
        self.inner.phase.set(LinkPhase::Idle);
        self.inner.mtu.set(DEFAULT_ATT_MTU);
    }

    fn on_connection_changed(&self, handle: TransportHandle, status: GattStatus, state: LinkState) {
        let mut link = self.inner.link.lock();
        let peer = match link.as_ref() {
            Some(current) if current.handle == handle => current.peer.clone(),
            _ => {
                debug!(%handle, ?state, "Ignoring connection change for stale link");
                return;
            }
        };

        if !status.is_success() {
            link.take();
            drop(link);
            error!(%peer, %handle, %status, "GATT link failed");
            self.inner.adapter.disconnect(handle);
            self.inner.adapter.close(handle);
            self.reset_link_state();
            self.fail(GattError::Transport { status });
            return;
        }

        match state {
            LinkState::Connected => {
                drop(link);
                info!(%peer, %handle, "Connected to GATT server");
                self.inner
                    .connection_state
                    .set(ConnectionState::Connected { peer_address: peer });
                self.inner.phase.set(LinkPhase::NegotiatingMtu);

                let mtu = self.inner.config.requested_mtu;
                if !self.inner.adapter.request_mtu(handle, mtu) {
                    warn!(%handle, mtu, "MTU request refused, discovering at current MTU");
                    self.begin_discovery(handle);
                }
            }
            LinkState::Disconnected => {
                link.take();
                drop(link);
                info!(%peer, %handle, "Disconnected from GATT server");
                self.inner.adapter.close(handle);
                self.reset_link_state();
                self.inner
                    .connection_state
                    .set(ConnectionState::Disconnected);
            }
        }
    }

    fn on_mtu_changed(&self, handle: TransportHandle, mtu: u16, status: GattStatus) {
        if !status.is_success() {
            warn!(%handle, %status, "MTU negotiation failed");
            return;
        }

        debug!(%handle, mtu, "MTU negotiated");
        self.inner.mtu.set(mtu);
        self.begin_discovery(handle);
    }

    fn begin_discovery(&self, handle: TransportHandle) {
        self.inner.phase.set(LinkPhase::DiscoveringServices);
        if !self.inner.adapter.discover_services(handle) {
            warn!(%handle, "Service discovery refused");
        }
    }

    fn on_services_discovered(
        &self,
        handle: TransportHandle,
        status: GattStatus,
        services: Vec<GattService>,
    ) {
        if !status.is_success() {
            warn!(%handle, %status, "Service discovery failed");
            return;
        }

        info!(%handle, count = services.len(), "Services discovered");
        for service in &services {
            for characteristic in service.characteristics.iter().filter(|c| c.is_notifiable()) {
                self.enable_notification(handle, service.uuid, characteristic);
            }
        }
        *self.inner.services.lock() = services;
        self.inner.phase.set(LinkPhase::Ready);
    }

    fn enable_notification(
        &self,
        handle: TransportHandle,
        service: Uuid,
        characteristic: &GattCharacteristic,
    ) {
        let adapter = &self.inner.adapter;
        if !adapter.set_characteristic_notification(handle, service, characteristic.uuid, true) {
            warn!(characteristic = %characteristic.uuid, "Local notification routing refused");
        }

        if characteristic.descriptor(&CCCD_UUID).is_none() {
            debug!(characteristic = %characteristic.uuid, "No CCCD, skipping subscription write");
            return;
        }
        if !adapter.write_descriptor(
            handle,
            service,
            characteristic.uuid,
            CCCD_UUID,
            &ENABLE_NOTIFICATION_VALUE,
        ) {
            warn!(characteristic = %characteristic.uuid, "CCCD write refused");
        }
    }

    // ------------------------------------------------------------------------
    // Data Exchange
    // ------------------------------------------------------------------------

    /// Write `value` in one piece to a discovered characteristic
    ///
    /// Returns `false` without side effects when there is no link or the
    /// characteristic was not discovered.
    pub fn send_data(&self, service: Uuid, characteristic: Uuid, value: &[u8]) -> bool {
        if let Err(e) = self.inner.permissions.check() {
            self.fail(e);
            return false;
        }

        let Some(handle) = self.inner.link.lock().as_ref().map(|l| l.handle) else {
            debug!("Not connected, dropping write");
            return false;
        };

        let writable = self
            .inner
            .services
            .lock()
            .iter()
            .find(|s| s.uuid == service)
            .and_then(|s| s.characteristic(&characteristic))
            .map(GattCharacteristic::is_writable);
        match writable {
            Some(true) => {}
            Some(false) => {
                debug!(%characteristic, "Characteristic is not writable, dropping write");
                return false;
            }
            None => {
                debug!(%service, %characteristic, "Characteristic not discovered, dropping write");
                return false;
            }
        }

        debug!(%handle, %characteristic, value = %hex::encode(value), "Writing characteristic");
        self.inner
            .adapter
            .write_characteristic(handle, service, characteristic, value)
    }

    /// Send `text` on the message characteristic and log it as sent
    pub fn send_message(&self, text: &str) -> bool {
        let written = self.send_data(SERVICE_UUID, CHARACTERISTIC_UUID, text.as_bytes());
        self.inner
            .messages
            .update(|messages| messages.push(Message::sent(text)));
        written
    }

    fn on_characteristic_changed(&self, handle: TransportHandle, characteristic: Uuid, value: Vec<u8>) {
        debug!(%handle, %characteristic, value = %hex::encode(&value), "Notification received");
        let message = Message::received_from_bytes(&value);
        self.inner
            .messages
            .update(|messages| messages.push(message));

        // No receivers is fine: the stream is lossy.
        let _ = self.inner.received_tx.send(ReceivedData {
            characteristic,
            data: value,
        });
    }

    // ------------------------------------------------------------------------
    // Event Dispatch
    // ------------------------------------------------------------------------

    /// Apply one adapter completion
    ///
    /// Events tagged with a handle other than the current link's are dropped.
    pub fn handle_event(&self, event: CentralEvent) {
        if let Some(handle) = event.handle() {
            if self.current_peer(handle).is_none() {
                debug!(%handle, "Ignoring event for stale link");
                return;
            }
        }

        match event {
            CentralEvent::ScanResult(record) => self.on_scan_result(record),
            CentralEvent::ScanFailed { code } => self.on_scan_failed(code),
            CentralEvent::ConnectionChanged {
                handle,
                status,
                state,
            } => self.on_connection_changed(handle, status, state),
            CentralEvent::MtuChanged {
                handle,
                mtu,
                status,
            } => self.on_mtu_changed(handle, mtu, status),
            CentralEvent::ServicesDiscovered {
                handle,
                status,
                services,
            } => self.on_services_discovered(handle, status, services),
            CentralEvent::CharacteristicChanged {
                handle,
                characteristic,
                value,
            } => self.on_characteristic_changed(handle, characteristic, value),
        }
    }

    /// Feed events from `events` into the session until the sender side closes
    pub async fn run(&self, mut events: mpsc::UnboundedReceiver<CentralEvent>) {
        while let Some(event) = events.recv().await {
            self.handle_event(event);
        }
        debug!("Central event stream closed");
    }

    fn fail(&self, error: GattError) {
        error!(%error, "Central session error");
        self.inner
            .connection_state
            .set(ConnectionState::error(error.to_string()));
    }

    // ------------------------------------------------------------------------
    // Observers
    // ------------------------------------------------------------------------

    pub fn connection_state(&self) -> ConnectionState {
        self.inner.connection_state.get()
    }

    pub fn subscribe_connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.connection_state.subscribe()
    }

    pub fn phase(&self) -> LinkPhase {
        self.inner.phase.get()
    }

    pub fn subscribe_phase(&self) -> watch::Receiver<LinkPhase> {
        self.inner.phase.subscribe()
    }

    /// Named devices seen by the current scan, strongest signal first
    pub fn devices(&self) -> Vec<ScannedDevice> {
        self.inner.devices.get()
    }

    pub fn subscribe_devices(&self) -> watch::Receiver<Vec<ScannedDevice>> {
        self.inner.devices.subscribe()
    }

    pub fn messages(&self) -> Vec<Message> {
        self.inner.messages.get()
    }

    pub fn subscribe_messages(&self) -> watch::Receiver<Vec<Message>> {
        self.inner.messages.subscribe()
    }

    pub fn is_scanning(&self) -> bool {
        self.inner.scanning.get()
    }

    pub fn subscribe_scanning(&self) -> watch::Receiver<bool> {
        self.inner.scanning.subscribe()
    }

    /// Negotiated MTU of the current link
    pub fn mtu(&self) -> u16 {
        self.inner.mtu.get()
    }

    /// Services cached from the last successful discovery
    pub fn services(&self) -> Vec<GattService> {
        self.inner.services.lock().clone()
    }

    pub fn transport_handle(&self) -> Option<TransportHandle> {
        self.inner.link.lock().as_ref().map(|l| l.handle)
    }

    /// Inbound notifications; values sent while nobody listens are lost
    pub fn subscribe_received(&self) -> broadcast::Receiver<ReceivedData> {
        self.inner.received_tx.subscribe()
    }
}
