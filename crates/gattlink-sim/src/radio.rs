//! Virtual BLE radio
//!
//! [`VirtualRadio`] plays both sides of the air: it implements
//! [`CentralAdapter`] for one central and [`PeripheralAdapter`] for one
//! peripheral and turns each side's requests into the other side's events.
//! Everything happens synchronously under one lock; events are queued on
//! unbounded channels that the sessions' `run` pumps drain.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use gattlink_central::{
    CentralAdapter, CentralEvent, LinkState, ScanFilter, ScanRecord, ScanSettings, TransportHandle,
};
use gattlink_core::protocol::DEFAULT_ATT_MTU;
use gattlink_core::{GattError, GattService, GattStatus, PeerAddress, Result};
use gattlink_peripheral::{
    AdvertiseData, AdvertiseSettings, PeripheralAdapter, PeripheralEvent, RequestId, ServerHandle,
};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};
use uuid::Uuid;

/// Status a real stack reports when a connection attempt times out
const GATT_CONNECTION_FAILED: i32 = 133;

// AD structure types
const AD_FLAGS: u8 = 0x01;
const AD_COMPLETE_128_BIT_UUIDS: u8 = 0x07;
const AD_COMPLETE_LOCAL_NAME: u8 = 0x09;
const FLAGS_LE_GENERAL_DISCOVERABLE: u8 = 0x06;

// ----------------------------------------------------------------------------
// Configuration
// ----------------------------------------------------------------------------

/// Fixed properties of the simulated air
#[derive(Debug, Clone)]
pub struct RadioConfig {
    /// Address the peripheral sees for the central
    pub central_address: PeerAddress,
    /// Address the central sees for the peripheral
    pub peripheral_address: PeerAddress,
    /// Signal strength reported for the peripheral's advertisements
    pub peripheral_rssi: i16,
    /// Largest MTU the peripheral accepts
    pub max_mtu: u16,
}

impl Default for RadioConfig {
    fn default() -> Self {
        Self {
            central_address: PeerAddress::from("00:11:22:33:44:55"),
            peripheral_address: PeerAddress::from("AA:BB:CC:DD:EE:FF"),
            peripheral_rssi: -45,
            max_mtu: 517,
        }
    }
}

impl RadioConfig {
    pub fn with_max_mtu(mut self, mtu: u16) -> Self {
        self.max_mtu = mtu;
        self
    }

    pub fn with_peripheral_rssi(mut self, rssi: i16) -> Self {
        self.peripheral_rssi = rssi;
        self
    }
}

/// Failures the radio injects until cleared
#[derive(Debug, Clone, Default)]
pub struct RadioFaults {
    /// `connect` returns an error without producing a handle
    pub refuse_connect: bool,
    /// Connection attempts complete with this failure status
    pub connect_status: Option<i32>,
    /// Every notify is refused
    pub fail_notify: bool,
    /// Scans fail to start with this code
    pub scan_failure: Option<i32>,
    /// Advertising fails to start with this code
    pub advertise_failure: Option<i32>,
}

/// One adapter call, as seen by the radio
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RadioCall {
    StartScan,
    StopScan,
    Connect(PeerAddress),
    Disconnect(TransportHandle),
    Close(TransportHandle),
    RequestMtu(TransportHandle, u16),
    DiscoverServices(TransportHandle),
    SetNotification(TransportHandle, Uuid, bool),
    WriteCharacteristic(TransportHandle, Uuid, Vec<u8>),
    WriteDescriptor(TransportHandle, Uuid, Vec<u8>),
    OpenServer(Uuid),
    CloseServer(ServerHandle),
    StartAdvertising(AdvertiseData),
    StopAdvertising,
    Notify(PeerAddress, Vec<u8>),
    SendResponse(PeerAddress, RequestId, GattStatus),
}

/// Receiving ends of the radio's event queues
pub struct RadioEvents {
    pub central: mpsc::UnboundedReceiver<CentralEvent>,
    pub peripheral: mpsc::UnboundedReceiver<PeripheralEvent>,
}

// ----------------------------------------------------------------------------
// Radio State
// ----------------------------------------------------------------------------

struct LinkEntry {
    connected: bool,
    /// Characteristics the central routes notifications for
    notifications: HashSet<Uuid>,
}

#[derive(Default)]
struct RadioState {
    scanning: bool,
    advertising: Option<AdvertiseData>,
    connectable: bool,
    server: Option<(ServerHandle, GattService)>,
    links: HashMap<TransportHandle, LinkEntry>,
    bystanders: Vec<ScanRecord>,
    next_link: u64,
    next_server: u64,
    next_request: u32,
}

impl RadioState {
    fn connected_link(&self, handle: TransportHandle) -> Option<&LinkEntry> {
        self.links.get(&handle).filter(|link| link.connected)
    }

    fn serves(&self, service: Uuid, characteristic: Uuid) -> bool {
        self.server.as_ref().is_some_and(|(_, s)| {
            s.uuid == service && s.characteristic(&characteristic).is_some()
        })
    }

    fn request_id(&mut self) -> RequestId {
        self.next_request += 1;
        RequestId(self.next_request)
    }
}

// ----------------------------------------------------------------------------
// Virtual Radio
// ----------------------------------------------------------------------------

/// In-process air between one central and one peripheral
pub struct VirtualRadio {
    config: RadioConfig,
    state: Mutex<RadioState>,
    faults: Mutex<RadioFaults>,
    calls: Mutex<Vec<RadioCall>>,
    central_tx: mpsc::UnboundedSender<CentralEvent>,
    peripheral_tx: mpsc::UnboundedSender<PeripheralEvent>,
}

impl VirtualRadio {
    pub fn new(config: RadioConfig) -> (Arc<Self>, RadioEvents) {
        let (central_tx, central) = mpsc::unbounded_channel();
        let (peripheral_tx, peripheral) = mpsc::unbounded_channel();
        let radio = Arc::new(Self {
            config,
            state: Mutex::new(RadioState::default()),
            faults: Mutex::new(RadioFaults::default()),
            calls: Mutex::new(Vec::new()),
            central_tx,
            peripheral_tx,
        });
        (radio, RadioEvents { central, peripheral })
    }

    pub fn config(&self) -> &RadioConfig {
        &self.config
    }

    /// Change the injected faults
    pub fn update_faults<F>(&self, f: F)
    where
        F: FnOnce(&mut RadioFaults),
    {
        f(&mut self.faults.lock());
    }

    /// Every adapter call so far, in order
    pub fn calls(&self) -> Vec<RadioCall> {
        self.calls.lock().clone()
    }

    pub fn count<F>(&self, f: F) -> usize
    where
        F: Fn(&RadioCall) -> bool,
    {
        self.calls.lock().iter().filter(|call| f(call)).count()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    /// Add another advertiser to the air; seen immediately if a scan is running
    pub fn add_bystander(&self, record: ScanRecord) {
        let mut state = self.state.lock();
        if state.scanning {
            self.to_central(CentralEvent::ScanResult(record.clone()));
        }
        state.bystanders.push(record);
    }

    pub fn is_advertising(&self) -> bool {
        self.state.lock().advertising.is_some()
    }

    pub fn is_scanning(&self) -> bool {
        self.state.lock().scanning
    }

    /// Whether any link is currently up
    pub fn is_linked(&self) -> bool {
        self.state.lock().links.values().any(|link| link.connected)
    }

    fn record(&self, call: RadioCall) {
        trace!(?call, "Adapter call");
        self.calls.lock().push(call);
    }

    fn to_central(&self, event: CentralEvent) {
        if self.central_tx.send(event).is_err() {
            debug!("Central side is gone, dropping event");
        }
    }

    fn to_peripheral(&self, event: PeripheralEvent) {
        if self.peripheral_tx.send(event).is_err() {
            debug!("Peripheral side is gone, dropping event");
        }
    }

    fn peripheral_sighting(&self, data: &AdvertiseData) -> ScanRecord {
        ScanRecord {
            address: self.config.peripheral_address.clone(),
            name: data.local_name.clone(),
            rssi: self.config.peripheral_rssi,
            advertisement: encode_advertisement(data),
        }
    }

    fn peripheral_link_event(&self, state: LinkState) {
        self.to_peripheral(PeripheralEvent::ConnectionChanged {
            peer: self.config.central_address.clone(),
            status: GattStatus::Success,
            state,
        });
    }
}

/// Render advertising data as AD structures: flags, 128-bit service UUIDs,
/// then the local name
///
/// A structure whose length does not fit the one-byte length field is left
/// out.
pub fn encode_advertisement(data: &AdvertiseData) -> Vec<u8> {
    let mut out = vec![0x02, AD_FLAGS, FLAGS_LE_GENERAL_DISCOVERABLE];

    if !data.service_uuids.is_empty() {
        match u8::try_from(1 + 16 * data.service_uuids.len()) {
            Ok(length) => {
                out.push(length);
                out.push(AD_COMPLETE_128_BIT_UUIDS);
                for uuid in &data.service_uuids {
                    // 128-bit UUIDs go on the air little-endian
                    out.extend(uuid.as_bytes().iter().rev());
                }
            }
            Err(_) => {
                warn!(count = data.service_uuids.len(), "Too many service UUIDs to advertise");
            }
        }
    }

    if let Some(name) = &data.local_name {
        match u8::try_from(1 + name.len()) {
            Ok(length) => {
                out.push(length);
                out.push(AD_COMPLETE_LOCAL_NAME);
                out.extend_from_slice(name.as_bytes());
            }
            Err(_) => warn!(bytes = name.len(), "Local name too long to advertise"),
        }
    }
    out
}

// ----------------------------------------------------------------------------
// Central Side
// ----------------------------------------------------------------------------

impl CentralAdapter for VirtualRadio {
    fn start_scan(&self, _filters: &[ScanFilter], _settings: &ScanSettings) {
        self.record(RadioCall::StartScan);
        if let Some(code) = self.faults.lock().scan_failure {
            self.to_central(CentralEvent::ScanFailed { code });
            return;
        }

        let mut state = self.state.lock();
        state.scanning = true;
        for record in &state.bystanders {
            self.to_central(CentralEvent::ScanResult(record.clone()));
        }
        if let Some(data) = &state.advertising {
            self.to_central(CentralEvent::ScanResult(self.peripheral_sighting(data)));
        }
    }

    fn stop_scan(&self) {
        self.record(RadioCall::StopScan);
        self.state.lock().scanning = false;
    }

    fn connect(&self, peer: &PeerAddress) -> Result<TransportHandle> {
        self.record(RadioCall::Connect(peer.clone()));
        let faults = self.faults.lock().clone();
        if faults.refuse_connect {
            return Err(GattError::AdapterUnavailable(
                "virtual radio refused the connection".to_string(),
            ));
        }

        let mut state = self.state.lock();
        state.next_link += 1;
        let handle = TransportHandle::new(state.next_link);

        let reachable = *peer == self.config.peripheral_address
            && state.advertising.is_some()
            && state.connectable;
        let failure = match faults.connect_status {
            Some(code) => Some(code),
            None if !reachable => Some(GATT_CONNECTION_FAILED),
            None => None,
        };

        state.links.insert(
            handle,
            LinkEntry {
                connected: failure.is_none(),
                notifications: HashSet::new(),
            },
        );

        match failure {
            Some(code) => {
                debug!(%peer, %handle, code, "Connection attempt fails");
                self.to_central(CentralEvent::ConnectionChanged {
                    handle,
                    status: GattStatus::Failure(code),
                    state: LinkState::Disconnected,
                });
            }
            None => {
                debug!(%peer, %handle, "Link up");
                self.to_central(CentralEvent::ConnectionChanged {
                    handle,
                    status: GattStatus::Success,
                    state: LinkState::Connected,
                });
                self.peripheral_link_event(LinkState::Connected);
            }
        }
        Ok(handle)
    }

    fn disconnect(&self, handle: TransportHandle) {
        self.record(RadioCall::Disconnect(handle));
        let mut state = self.state.lock();
        let Some(link) = state.links.get_mut(&handle) else {
            return;
        };
        if std::mem::replace(&mut link.connected, false) {
            debug!(%handle, "Link down");
            self.to_central(CentralEvent::ConnectionChanged {
                handle,
                status: GattStatus::Success,
                state: LinkState::Disconnected,
            });
            self.peripheral_link_event(LinkState::Disconnected);
        }
    }

    fn close(&self, handle: TransportHandle) {
        self.record(RadioCall::Close(handle));
        let removed = self.state.lock().links.remove(&handle);
        if removed.is_some_and(|link| link.connected) {
            // closing a live link drops it without a central-side callback
            self.peripheral_link_event(LinkState::Disconnected);
        }
    }

    fn request_mtu(&self, handle: TransportHandle, mtu: u16) -> bool {
        self.record(RadioCall::RequestMtu(handle, mtu));
        if self.state.lock().connected_link(handle).is_none() {
            return false;
        }

        let negotiated = mtu.min(self.config.max_mtu).max(DEFAULT_ATT_MTU);
        self.to_peripheral(PeripheralEvent::MtuChanged {
            peer: self.config.central_address.clone(),
            mtu: negotiated,
        });
        self.to_central(CentralEvent::MtuChanged {
            handle,
            mtu: negotiated,
            status: GattStatus::Success,
        });
        true
    }

    fn discover_services(&self, handle: TransportHandle) -> bool {
        self.record(RadioCall::DiscoverServices(handle));
        let state = self.state.lock();
        if state.connected_link(handle).is_none() {
            return false;
        }

        let services = state
            .server
            .iter()
            .map(|(_, service)| service.clone())
            .collect();
        self.to_central(CentralEvent::ServicesDiscovered {
            handle,
            status: GattStatus::Success,
            services,
        });
        true
    }

    fn set_characteristic_notification(
        &self,
        handle: TransportHandle,
        _service: Uuid,
        characteristic: Uuid,
        enable: bool,
    ) -> bool {
        self.record(RadioCall::SetNotification(handle, characteristic, enable));
        let mut state = self.state.lock();
        let Some(link) = state.links.get_mut(&handle) else {
            return false;
        };
        if enable {
            link.notifications.insert(characteristic);
        } else {
            link.notifications.remove(&characteristic);
        }
        true
    }

    fn write_characteristic(
        &self,
        handle: TransportHandle,
        service: Uuid,
        characteristic: Uuid,
        value: &[u8],
    ) -> bool {
        self.record(RadioCall::WriteCharacteristic(
            handle,
            characteristic,
            value.to_vec(),
        ));
        let mut state = self.state.lock();
        if state.connected_link(handle).is_none() || !state.serves(service, characteristic) {
            return false;
        }

        let request_id = state.request_id();
        self.to_peripheral(PeripheralEvent::WriteRequest {
            peer: self.config.central_address.clone(),
            request_id,
            characteristic,
            response_needed: true,
            offset: 0,
            value: value.to_vec(),
        });
        true
    }

    fn write_descriptor(
        &self,
        handle: TransportHandle,
        service: Uuid,
        characteristic: Uuid,
        descriptor: Uuid,
        value: &[u8],
    ) -> bool {
        self.record(RadioCall::WriteDescriptor(handle, descriptor, value.to_vec()));
        let mut state = self.state.lock();
        if state.connected_link(handle).is_none() || !state.serves(service, characteristic) {
            return false;
        }

        let request_id = state.request_id();
        self.to_peripheral(PeripheralEvent::DescriptorWriteRequest {
            peer: self.config.central_address.clone(),
            request_id,
            characteristic,
            descriptor,
            response_needed: true,
            value: value.to_vec(),
        });
        true
    }
}

// ----------------------------------------------------------------------------
// Peripheral Side
// ----------------------------------------------------------------------------

impl PeripheralAdapter for VirtualRadio {
    fn open_server(&self, service: &GattService) -> Result<ServerHandle> {
        self.record(RadioCall::OpenServer(service.uuid));
        let mut state = self.state.lock();
        state.next_server += 1;
        let handle = ServerHandle::new(state.next_server);
        state.server = Some((handle, service.clone()));
        Ok(handle)
    }

    fn close_server(&self, server: ServerHandle) {
        self.record(RadioCall::CloseServer(server));
        let mut state = self.state.lock();
        if state.server.as_ref().is_some_and(|(h, _)| *h == server) {
            state.server = None;
        }
    }

    fn start_advertising(&self, settings: &AdvertiseSettings, data: &AdvertiseData) {
        self.record(RadioCall::StartAdvertising(data.clone()));
        if let Some(code) = self.faults.lock().advertise_failure {
            self.to_peripheral(PeripheralEvent::AdvertiseFailed { code });
            return;
        }

        let mut state = self.state.lock();
        state.advertising = Some(data.clone());
        state.connectable = settings.connectable;
        self.to_peripheral(PeripheralEvent::AdvertiseStarted);
        if state.scanning {
            self.to_central(CentralEvent::ScanResult(self.peripheral_sighting(data)));
        }
    }

    fn stop_advertising(&self) {
        self.record(RadioCall::StopAdvertising);
        self.state.lock().advertising = None;
    }

    fn notify(
        &self,
        server: ServerHandle,
        peer: &PeerAddress,
        characteristic: Uuid,
        value: &[u8],
    ) -> bool {
        self.record(RadioCall::Notify(peer.clone(), value.to_vec()));
        if self.faults.lock().fail_notify {
            return false;
        }

        let state = self.state.lock();
        let server_open = state.server.as_ref().is_some_and(|(h, _)| *h == server);
        if !server_open || *peer != self.config.central_address {
            return false;
        }

        let Some((handle, link)) = state.links.iter().find(|(_, link)| link.connected) else {
            return false;
        };
        // Queued either way; only delivered if the client routes it.
        if link.notifications.contains(&characteristic) {
            self.to_central(CentralEvent::CharacteristicChanged {
                handle: *handle,
                characteristic,
                value: value.to_vec(),
            });
        }
        true
    }

    fn send_response(
        &self,
        _server: ServerHandle,
        peer: &PeerAddress,
        request_id: RequestId,
        status: GattStatus,
        _value: &[u8],
    ) {
        self.record(RadioCall::SendResponse(peer.clone(), request_id, status));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gattlink_core::protocol::{DEVICE_NAME, SERVICE_UUID};

    #[test]
    fn test_advertisement_layout() {
        let data = AdvertiseData {
            local_name: Some(DEVICE_NAME.to_string()),
            service_uuids: vec![SERVICE_UUID],
        };
        let encoded = encode_advertisement(&data);

        assert_eq!(&encoded[..3], &[0x02, 0x01, 0x06]);
        assert_eq!(encoded[3], 17);
        assert_eq!(encoded[4], AD_COMPLETE_128_BIT_UUIDS);
        // 0x1234 short UUID sits at bytes 12..14 of the LE form
        assert_eq!(&encoded[5 + 12..5 + 14], &[0x34, 0x12]);
        assert_eq!(encoded[21], 1 + DEVICE_NAME.len() as u8);
        assert_eq!(&encoded[23..], DEVICE_NAME.as_bytes());
    }

    #[test]
    fn test_oversized_structures_are_left_out() {
        let data = AdvertiseData {
            local_name: Some("x".repeat(300)),
            service_uuids: vec![SERVICE_UUID; 16],
        };

        // only the flags structure fits
        assert_eq!(encode_advertisement(&data), vec![0x02, 0x01, 0x06]);

        let name_only = AdvertiseData {
            local_name: Some("x".repeat(254)),
            service_uuids: Vec::new(),
        };
        let encoded = encode_advertisement(&name_only);
        assert_eq!(encoded[3], 255);
        assert_eq!(encoded.len(), 3 + 2 + 254);
    }

    #[tokio::test]
    async fn test_unreachable_peer_fails_with_status() {
        let (radio, mut events) = VirtualRadio::new(RadioConfig::default());

        let handle = radio.connect(&PeerAddress::from("12:34")).unwrap();

        assert_eq!(
            events.central.recv().await,
            Some(CentralEvent::ConnectionChanged {
                handle,
                status: GattStatus::Failure(GATT_CONNECTION_FAILED),
                state: LinkState::Disconnected,
            })
        );
        assert!(!radio.is_linked());
        assert!(events.peripheral.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_mtu_is_capped_by_peripheral() {
        let (radio, mut events) = VirtualRadio::new(RadioConfig::default().with_max_mtu(185));
        radio.start_advertising(
            &AdvertiseSettings {
                mode: gattlink_peripheral::AdvertiseMode::LowLatency,
                connectable: true,
            },
            &AdvertiseData::default(),
        );
        let handle = radio.connect(&radio.config().peripheral_address.clone()).unwrap();
        let _ = events.central.recv().await;

        assert!(radio.request_mtu(handle, 512));
        assert_eq!(
            events.central.recv().await,
            Some(CentralEvent::MtuChanged {
                handle,
                mtu: 185,
                status: GattStatus::Success,
            })
        );
    }
}
