//! Peripheral GATT session
//!
//! Serves the message service: advertises until a central connects, logs
//! writes to the message characteristic, tracks CCCD subscriptions and pushes
//! outbound messages as MTU-sized notification chunks.

use std::sync::Arc;

use gattlink_core::chunker;
use gattlink_core::protocol::{
    message_service, CCCD_UUID, CHARACTERISTIC_UUID, DISABLE_NOTIFICATION_VALUE,
    ENABLE_NOTIFICATION_VALUE, SERVICE_UUID,
};
use gattlink_core::{
    ConnectionState, GattError, GattStatus, LinkState, Message, PeerAddress, PermissionGate,
    Published, Result,
};
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::adapter::{
    AdvertiseData, AdvertiseSettings, PeripheralAdapter, PeripheralEvent, RequestId, ServerHandle,
};
use crate::config::PeripheralConfig;
use crate::delivery::DeliveryReport;
use crate::subscribers::SubscriberSet;

/// ATT error for writes to attributes this server does not serve
const GATT_REQUEST_NOT_SUPPORTED: i32 = 6;

struct Inner {
    adapter: Arc<dyn PeripheralAdapter>,
    permissions: Arc<dyn PermissionGate>,
    config: PeripheralConfig,

    server: Mutex<Option<ServerHandle>>,
    /// Set while an advertising request is outstanding or running
    advertiser: Mutex<bool>,
    subscribers: SubscriberSet,

    connection_state: Published<ConnectionState>,
    messages: Published<Vec<Message>>,
    advertising: Published<bool>,
    mtu: Published<u16>,
}

// ----------------------------------------------------------------------------
// Peripheral Session
// ----------------------------------------------------------------------------

/// GATT server session; clones share the same session
#[derive(Clone)]
pub struct PeripheralSession {
    inner: Arc<Inner>,
}

impl PeripheralSession {
    pub fn new(
        adapter: Arc<dyn PeripheralAdapter>,
        permissions: Arc<dyn PermissionGate>,
        config: PeripheralConfig,
    ) -> Self {
        let mtu = Published::new(config.default_mtu);
        Self {
            inner: Arc::new(Inner {
                adapter,
                permissions,
                config,
                server: Mutex::new(None),
                advertiser: Mutex::new(false),
                subscribers: SubscriberSet::new(),
                connection_state: Published::default(),
                messages: Published::default(),
                advertising: Published::new(false),
                mtu,
            }),
        }
    }

    pub fn config(&self) -> &PeripheralConfig {
        &self.inner.config
    }

    // ------------------------------------------------------------------------
    // Advertising
    // ------------------------------------------------------------------------

    /// Open the GATT server if needed and request advertising
    ///
    /// The advertising flag flips only when the adapter reports the outcome.
    pub fn start_advertising(&self) {
        if let Err(e) = self.inner.permissions.check() {
            self.fail(e);
            return;
        }

        {
            let mut advertiser = self.inner.advertiser.lock();
            if *advertiser || self.inner.advertising.get() {
                debug!("Advertising already requested");
                return;
            }
            *advertiser = true;
        }

        if let Err(e) = self.ensure_server() {
            *self.inner.advertiser.lock() = false;
            self.fail(e);
            return;
        }

        let config = &self.inner.config;
        let settings = AdvertiseSettings {
            mode: config.advertise_mode,
            connectable: config.connectable,
        };
        let data = AdvertiseData {
            local_name: config
                .include_device_name
                .then(|| config.device_name.clone()),
            service_uuids: vec![SERVICE_UUID],
        };
        self.inner.adapter.start_advertising(&settings, &data);
        info!(name = %config.device_name, "Requested BLE advertising");
    }

    /// Stop advertising; safe to call at any time
    pub fn stop_advertising(&self) {
        let was_requested = std::mem::replace(&mut *self.inner.advertiser.lock(), false);
        if was_requested {
            self.inner.adapter.stop_advertising();
            info!("Stopped BLE advertising");
        }
        self.inner.advertising.set(false);
    }

    fn ensure_server(&self) -> Result<ServerHandle> {
        let mut server = self.inner.server.lock();
        if let Some(handle) = *server {
            return Ok(handle);
        }
        let handle = self.inner.adapter.open_server(&message_service())?;
        info!(%handle, service = %SERVICE_UUID, "GATT server opened");
        *server = Some(handle);
        Ok(handle)
    }

    fn on_advertise_started(&self) {
        if !*self.inner.advertiser.lock() {
            debug!("Ignoring advertise start after stop");
            return;
        }
        info!("Advertising started");
        self.inner.advertising.set(true);
    }

    fn on_advertise_failed(&self, code: i32) {
        warn!(code, "Advertising failed to start");
        *self.inner.advertiser.lock() = false;
        self.inner.advertising.set(false);
    }

    /// Close the GATT server and stop advertising
    pub fn stop(&self) {
        if let Some(handle) = self.inner.server.lock().take() {
            self.inner.adapter.close_server(handle);
            info!(%handle, "GATT server closed");
        }
        self.stop_advertising();
        self.inner.subscribers.clear();
    }

    // ------------------------------------------------------------------------
    // Inbound Traffic
    // ------------------------------------------------------------------------

    fn on_connection_changed(&self, peer: PeerAddress, status: GattStatus, state: LinkState) {
        if !status.is_success() {
            warn!(%peer, %status, ?state, "Connection change reported with error status");
        }

        match state {
            LinkState::Connected => {
                info!(%peer, "Central connected");
                self.stop_advertising();
                self.inner
                    .connection_state
                    .set(ConnectionState::Connected { peer_address: peer });
            }
            LinkState::Disconnected => {
                info!(%peer, "Central disconnected");
                self.inner
                    .connection_state
                    .set(ConnectionState::Disconnected);
                self.inner.subscribers.remove(&peer);
                self.inner.mtu.set(self.inner.config.default_mtu);
            }
        }
    }

    fn on_mtu_changed(&self, peer: PeerAddress, mtu: u16) {
        debug!(%peer, mtu, "MTU changed");
        self.inner.mtu.set(mtu);
    }

    fn on_write_request(
        &self,
        peer: PeerAddress,
        request_id: RequestId,
        characteristic: Uuid,
        response_needed: bool,
        value: Vec<u8>,
    ) {
        if characteristic != CHARACTERISTIC_UUID {
            warn!(%peer, %characteristic, "Write to unknown characteristic");
            if response_needed {
                self.respond(&peer, request_id, GattStatus::Failure(GATT_REQUEST_NOT_SUPPORTED));
            }
            return;
        }

        debug!(%peer, value = %hex::encode(&value), "Write request");
        let message = Message::received_from_bytes(&value);
        self.inner
            .messages
            .update(|messages| messages.push(message));

        // Always acknowledged, even for write-without-response.
        self.respond(&peer, request_id, GattStatus::Success);
    }

    fn on_descriptor_write_request(
        &self,
        peer: PeerAddress,
        request_id: RequestId,
        descriptor: Uuid,
        response_needed: bool,
        value: Vec<u8>,
    ) {
        if descriptor != CCCD_UUID {
            warn!(%peer, %descriptor, "Write to unknown descriptor");
            if response_needed {
                self.respond(&peer, request_id, GattStatus::Failure(GATT_REQUEST_NOT_SUPPORTED));
            }
            return;
        }

        if value == ENABLE_NOTIFICATION_VALUE {
            if self.inner.subscribers.insert(peer.clone()) {
                info!(%peer, "Notifications enabled");
            }
        } else if value == DISABLE_NOTIFICATION_VALUE {
            if self.inner.subscribers.remove(&peer) {
                info!(%peer, "Notifications disabled");
            }
        } else {
            debug!(%peer, value = %hex::encode(&value), "Ignoring unrecognised CCCD value");
        }

        if response_needed {
            self.respond(&peer, request_id, GattStatus::Success);
        }
    }

    fn respond(&self, peer: &PeerAddress, request_id: RequestId, status: GattStatus) {
        let Some(server) = *self.inner.server.lock() else {
            debug!(%peer, "No GATT server, dropping response");
            return;
        };
        self.inner
            .adapter
            .send_response(server, peer, request_id, status, &[]);
    }

    // ------------------------------------------------------------------------
    // Outbound Messages
    // ------------------------------------------------------------------------

    /// Log `text` as sent and push it to every subscriber
    pub fn send_message(&self, text: &str) -> DeliveryReport {
        self.inner
            .messages
            .update(|messages| messages.push(Message::sent(text)));
        self.send_large_data(text.as_bytes())
    }

    /// Push `value` to every subscriber in chunks of `mtu - 3` bytes
    ///
    /// Each chunk goes to the subscribers present when it is sent. A failed
    /// chunk does not stop the ones after it.
    pub fn send_large_data(&self, value: &[u8]) -> DeliveryReport {
        let chunk_size = chunker::chunk_size_for_mtu(self.inner.mtu.get());
        if self.inner.subscribers.is_empty() {
            debug!(bytes = value.len(), "No subscribers, nothing sent");
            return DeliveryReport::unsubscribed(chunker::chunk_count(value.len(), chunk_size));
        }

        let chunks = match chunker::split(value, chunk_size) {
            Ok(chunks) => chunks,
            Err(e) => {
                error!(%e, "Cannot chunk payload");
                return DeliveryReport::rejected();
            }
        };
        let server = *self.inner.server.lock();

        let mut report = DeliveryReport::default();
        for chunk in chunks {
            report.chunks += 1;
            let delivered = match server {
                Some(server) => self.notify_subscribers(server, chunk, &mut report),
                None => false,
            };
            if !delivered {
                report.failed_chunks += 1;
            }
        }

        debug!(
            bytes = value.len(),
            chunk_size,
            chunks = report.chunks,
            failed = report.failed_chunks,
            "Notification push finished"
        );
        report
    }

    fn notify_subscribers(
        &self,
        server: ServerHandle,
        chunk: &[u8],
        report: &mut DeliveryReport,
    ) -> bool {
        let subscribers = self.inner.subscribers.snapshot();
        if subscribers.is_empty() {
            return false;
        }

        debug!(value = %hex::encode(chunk), subscribers = subscribers.len(), "Notifying chunk");
        let mut delivered = true;
        for peer in &subscribers {
            report.notifications += 1;
            let notified = self
                .inner
                .adapter
                .notify(server, peer, CHARACTERISTIC_UUID, chunk);
            if !notified {
                warn!(%peer, "Notification refused");
            }
            delivered &= notified;
        }
        delivered
    }

    // ------------------------------------------------------------------------
    // Event Dispatch
    // ------------------------------------------------------------------------

    /// Apply one adapter event
    pub fn handle_event(&self, event: PeripheralEvent) {
        match event {
            PeripheralEvent::ConnectionChanged {
                peer,
                status,
                state,
            } => self.on_connection_changed(peer, status, state),
            PeripheralEvent::MtuChanged { peer, mtu } => self.on_mtu_changed(peer, mtu),
            PeripheralEvent::WriteRequest {
                peer,
                request_id,
                characteristic,
                response_needed,
                value,
                ..
            } => self.on_write_request(peer, request_id, characteristic, response_needed, value),
            PeripheralEvent::DescriptorWriteRequest {
                peer,
                request_id,
                descriptor,
                response_needed,
                value,
                ..
            } => self.on_descriptor_write_request(peer, request_id, descriptor, response_needed, value),
            PeripheralEvent::AdvertiseStarted => self.on_advertise_started(),
            PeripheralEvent::AdvertiseFailed { code } => self.on_advertise_failed(code),
        }
    }

    /// Feed events from `events` into the session until the sender side closes
    pub async fn run(&self, mut events: mpsc::UnboundedReceiver<PeripheralEvent>) {
        while let Some(event) = events.recv().await {
            self.handle_event(event);
        }
        debug!("Peripheral event stream closed");
    }

    fn fail(&self, error: GattError) {
        error!(%error, "Peripheral session error");
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

    pub fn messages(&self) -> Vec<Message> {
        self.inner.messages.get()
    }

    pub fn subscribe_messages(&self) -> watch::Receiver<Vec<Message>> {
        self.inner.messages.subscribe()
    }

    pub fn is_advertising(&self) -> bool {
        self.inner.advertising.get()
    }

    pub fn subscribe_advertising(&self) -> watch::Receiver<bool> {
        self.inner.advertising.subscribe()
    }

    pub fn mtu(&self) -> u16 {
        self.inner.mtu.get()
    }

    pub fn is_subscribed(&self, peer: &PeerAddress) -> bool {
        self.inner.subscribers.contains(peer)
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.len()
    }

    pub fn server_handle(&self) -> Option<ServerHandle> {
        *self.inner.server.lock()
    }
}
