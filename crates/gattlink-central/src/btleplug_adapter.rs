//! [`CentralAdapter`] over the host Bluetooth stack via `btleplug`
//!
//! btleplug is async while the adapter contract is fire-and-forget, so each
//! request is spawned on the Tokio runtime and its outcome is sent back as a
//! [`CentralEvent`] on the channel returned by [`BtleplugAdapter::new`].
//!
//! Differences from a platform GATT client:
//! - there is no MTU request; the default ATT MTU is reported as negotiated
//! - notification routing is implicit; CCCD writes map onto
//!   subscribe/unsubscribe

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use btleplug::api::{
    Central, CentralEvent as RadioEvent, Characteristic, Manager as _, Peripheral as _,
    ScanFilter as RadioScanFilter, Service, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use futures::stream::StreamExt;
use gattlink_core::protocol::{
    CCCD_UUID, DEFAULT_ATT_MTU, DISABLE_NOTIFICATION_VALUE, ENABLE_NOTIFICATION_VALUE,
};
use gattlink_core::{
    AttPermissions, CharProperties, GattCharacteristic, GattDescriptor, GattError, GattService,
    GattStatus, PeerAddress, Result,
};
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::adapter::{
    CentralAdapter, CentralEvent, LinkState, ScanFilter, ScanRecord, ScanSettings, TransportHandle,
};

/// Status reported when btleplug fails a link operation
const GATT_ERROR: i32 = 133;

/// Scan failure code for an internal adapter error
const SCAN_FAILED_INTERNAL_ERROR: i32 = 3;

/// AD type for manufacturer specific data
const AD_TYPE_MANUFACTURER_DATA: u8 = 0xFF;

// ----------------------------------------------------------------------------
// Shared State
// ----------------------------------------------------------------------------

struct Link<P = Peripheral> {
    peripheral: P,
    notifications: Option<JoinHandle<()>>,
}

struct Registry<P = Peripheral> {
    /// Peripherals seen during the current scan, by address
    peripherals: HashMap<PeerAddress, P>,
    links: HashMap<TransportHandle, Link<P>>,
}

impl<P> Default for Registry<P> {
    fn default() -> Self {
        Self {
            peripherals: HashMap::new(),
            links: HashMap::new(),
        }
    }
}

impl<P: Clone> Registry<P> {
    /// Drop sightings from earlier scans; open links keep their peripheral
    fn begin_scan(&mut self) {
        self.peripherals.clear();
    }

    fn peripheral(&self, handle: TransportHandle) -> Option<P> {
        self.links.get(&handle).map(|link| link.peripheral.clone())
    }
}

impl Registry {

    fn handles_for(&self, id: &PeripheralId) -> Vec<TransportHandle> {
        self.links
            .iter()
            .filter(|(_, link)| link.peripheral.id() == *id)
            .map(|(handle, _)| *handle)
            .collect()
    }
}

// ----------------------------------------------------------------------------
// Adapter
// ----------------------------------------------------------------------------

/// Central adapter backed by the first adapter btleplug reports
pub struct BtleplugAdapter {
    adapter: Adapter,
    runtime: Handle,
    events: mpsc::UnboundedSender<CentralEvent>,
    registry: Arc<Mutex<Registry>>,
    scanning: Arc<AtomicBool>,
    next_handle: AtomicU64,
    radio_task: JoinHandle<()>,
}

impl BtleplugAdapter {
    /// Open the first available adapter and start listening to its events
    pub async fn new() -> Result<(Self, mpsc::UnboundedReceiver<CentralEvent>)> {
        let manager = Manager::new().await.map_err(|e| {
            GattError::AdapterUnavailable(format!("Failed to create BLE manager: {}", e))
        })?;

        let adapter = manager
            .adapters()
            .await
            .map_err(|e| GattError::AdapterUnavailable(format!("Failed to get BLE adapters: {}", e)))?
            .into_iter()
            .next()
            .ok_or_else(|| GattError::AdapterUnavailable("No BLE adapters available".to_string()))?;

        let radio_events = adapter.events().await.map_err(|e| {
            GattError::AdapterUnavailable(format!("Failed to subscribe to adapter events: {}", e))
        })?;

        let runtime = Handle::try_current().map_err(|_| GattError::RuntimeUnavailable)?;
        let (events, events_rx) = mpsc::unbounded_channel();
        let registry = Arc::new(Mutex::new(Registry::default()));
        let scanning = Arc::new(AtomicBool::new(false));

        let radio_task = runtime.spawn(forward_radio_events(
            adapter.clone(),
            radio_events,
            events.clone(),
            registry.clone(),
            scanning.clone(),
        ));

        info!("BLE adapter initialized");
        Ok((
            Self {
                adapter,
                runtime,
                events,
                registry,
                scanning,
                next_handle: AtomicU64::new(1),
                radio_task,
            },
            events_rx,
        ))
    }

    fn emit(&self, event: CentralEvent) {
        emit(&self.events, event);
    }

    fn peripheral(&self, handle: TransportHandle) -> Option<Peripheral> {
        let peripheral = self.registry.lock().peripheral(handle);
        if peripheral.is_none() {
            warn!(%handle, "No btleplug peripheral for link");
        }
        peripheral
    }
}

impl Drop for BtleplugAdapter {
    fn drop(&mut self) {
        self.radio_task.abort();
        for (_, link) in self.registry.lock().links.drain() {
            if let Some(task) = link.notifications {
                task.abort();
            }
        }
    }
}

fn emit(events: &mpsc::UnboundedSender<CentralEvent>, event: CentralEvent) {
    if events.send(event).is_err() {
        debug!("Central event receiver dropped");
    }
}

/// Pump adapter-wide radio events into scan results and disconnect callbacks
async fn forward_radio_events(
    adapter: Adapter,
    mut radio_events: std::pin::Pin<Box<dyn futures::Stream<Item = RadioEvent> + Send>>,
    events: mpsc::UnboundedSender<CentralEvent>,
    registry: Arc<Mutex<Registry>>,
    scanning: Arc<AtomicBool>,
) {
    while let Some(event) = radio_events.next().await {
        match event {
            RadioEvent::DeviceDiscovered(id) | RadioEvent::DeviceUpdated(id) => {
                if !scanning.load(Ordering::SeqCst) {
                    continue;
                }
                let Ok(peripheral) = adapter.peripheral(&id).await else {
                    continue;
                };
                let Ok(Some(properties)) = peripheral.properties().await else {
                    continue;
                };

                let address = PeerAddress::new(properties.address.to_string());
                registry
                    .lock()
                    .peripherals
                    .insert(address.clone(), peripheral);

                emit(
                    &events,
                    CentralEvent::ScanResult(ScanRecord {
                        address,
                        name: properties.local_name,
                        rssi: properties.rssi.unwrap_or(i16::MIN),
                        advertisement: encode_manufacturer_data(&properties.manufacturer_data),
                    }),
                );
            }
            RadioEvent::DeviceDisconnected(id) => {
                let handles = registry.lock().handles_for(&id);
                for handle in handles {
                    emit(
                        &events,
                        CentralEvent::ConnectionChanged {
                            handle,
                            status: GattStatus::Success,
                            state: LinkState::Disconnected,
                        },
                    );
                }
            }
            _ => {}
        }
    }
    debug!("Adapter event stream ended");
}

/// Render manufacturer data as advertising-data structures, lowest company id
/// first
fn encode_manufacturer_data(data: &HashMap<u16, Vec<u8>>) -> Vec<u8> {
    let mut companies: Vec<_> = data.iter().collect();
    companies.sort_by_key(|(company, _)| **company);

    let mut out = Vec::new();
    for (company, payload) in companies {
        // length covers the type byte, the company id and the payload
        let Ok(length) = u8::try_from(payload.len() + 3) else {
            continue;
        };
        out.push(length);
        out.push(AD_TYPE_MANUFACTURER_DATA);
        out.extend_from_slice(&company.to_le_bytes());
        out.extend_from_slice(payload);
    }
    out
}

fn convert_service(service: &Service) -> GattService {
    let characteristics = service
        .characteristics
        .iter()
        .map(|c| {
            let mut characteristic = GattCharacteristic::new(
                c.uuid,
                CharProperties::from_bits(c.properties.bits()),
                AttPermissions::empty(),
            );
            for descriptor in &c.descriptors {
                characteristic = characteristic.with_descriptor(GattDescriptor {
                    uuid: descriptor.uuid,
                    permissions: AttPermissions::empty(),
                });
            }
            characteristic
        })
        .collect();

    GattService {
        uuid: service.uuid,
        primary: service.primary,
        characteristics,
    }
}

fn find_characteristic(
    peripheral: &Peripheral,
    service: Uuid,
    characteristic: Uuid,
) -> Option<Characteristic> {
    peripheral
        .characteristics()
        .into_iter()
        .find(|c| c.service_uuid == service && c.uuid == characteristic)
}

impl CentralAdapter for BtleplugAdapter {
    fn start_scan(&self, filters: &[ScanFilter], settings: &ScanSettings) {
        let filter = RadioScanFilter {
            services: filters.iter().filter_map(|f| f.service_uuid).collect(),
        };
        debug!(mode = ?settings.mode, "btleplug ignores scan mode");

        self.registry.lock().begin_scan();
        self.scanning.store(true, Ordering::SeqCst);
        let adapter = self.adapter.clone();
        let events = self.events.clone();
        let scanning = self.scanning.clone();
        self.runtime.spawn(async move {
            if let Err(e) = adapter.start_scan(filter).await {
                error!("Failed to start BLE scan: {}", e);
                scanning.store(false, Ordering::SeqCst);
                emit(
                    &events,
                    CentralEvent::ScanFailed {
                        code: SCAN_FAILED_INTERNAL_ERROR,
                    },
                );
            }
        });
    }

    fn stop_scan(&self) {
        self.scanning.store(false, Ordering::SeqCst);
        let adapter = self.adapter.clone();
        self.runtime.spawn(async move {
            if let Err(e) = adapter.stop_scan().await {
                warn!("Failed to stop BLE scan: {}", e);
            }
        });
    }

    fn connect(&self, peer: &PeerAddress) -> Result<TransportHandle> {
        let peripheral = self
            .registry
            .lock()
            .peripherals
            .get(peer)
            .cloned()
            .ok_or_else(|| GattError::AdapterUnavailable(format!("Unknown peer {}", peer)))?;

        let handle = TransportHandle::new(self.next_handle.fetch_add(1, Ordering::SeqCst));
        self.registry.lock().links.insert(
            handle,
            Link {
                peripheral: peripheral.clone(),
                notifications: None,
            },
        );

        let events = self.events.clone();
        let peer = peer.clone();
        self.runtime.spawn(async move {
            let status = match peripheral.connect().await {
                Ok(()) => {
                    info!(%peer, %handle, "Connected to peer");
                    GattStatus::Success
                }
                Err(e) => {
                    error!(%peer, %handle, "Failed to connect: {}", e);
                    GattStatus::Failure(GATT_ERROR)
                }
            };
            let state = if status.is_success() {
                LinkState::Connected
            } else {
                LinkState::Disconnected
            };
            emit(
                &events,
                CentralEvent::ConnectionChanged {
                    handle,
                    status,
                    state,
                },
            );
        });

        Ok(handle)
    }

    fn disconnect(&self, handle: TransportHandle) {
        let Some(peripheral) = self.peripheral(handle) else {
            return;
        };
        let events = self.events.clone();
        self.runtime.spawn(async move {
            if let Err(e) = peripheral.disconnect().await {
                warn!(%handle, "Failed to disconnect: {}", e);
            }
            emit(
                &events,
                CentralEvent::ConnectionChanged {
                    handle,
                    status: GattStatus::Success,
                    state: LinkState::Disconnected,
                },
            );
        });
    }

    fn close(&self, handle: TransportHandle) {
        if let Some(link) = self.registry.lock().links.remove(&handle) {
            if let Some(task) = link.notifications {
                task.abort();
            }
            debug!(%handle, "Link closed");
        }
    }

    fn request_mtu(&self, handle: TransportHandle, mtu: u16) -> bool {
        debug!(%handle, mtu, "MTU is negotiated by the host stack");
        self.emit(CentralEvent::MtuChanged {
            handle,
            mtu: DEFAULT_ATT_MTU,
            status: GattStatus::Success,
        });
        true
    }

    fn discover_services(&self, handle: TransportHandle) -> bool {
        let Some(peripheral) = self.peripheral(handle) else {
            return false;
        };
        let events = self.events.clone();
        let registry = self.registry.clone();
        self.runtime.spawn(async move {
            if let Err(e) = peripheral.discover_services().await {
                error!(%handle, "Failed to discover services: {}", e);
                emit(
                    &events,
                    CentralEvent::ServicesDiscovered {
                        handle,
                        status: GattStatus::Failure(GATT_ERROR),
                        services: Vec::new(),
                    },
                );
                return;
            }

            // Forward notifications for the lifetime of the link
            match peripheral.notifications().await {
                Ok(mut notifications) => {
                    let forward_events = events.clone();
                    let task = tokio::spawn(async move {
                        while let Some(notification) = notifications.next().await {
                            emit(
                                &forward_events,
                                CentralEvent::CharacteristicChanged {
                                    handle,
                                    characteristic: notification.uuid,
                                    value: notification.value,
                                },
                            );
                        }
                        debug!(%handle, "Notification stream ended");
                    });
                    match registry.lock().links.get_mut(&handle) {
                        Some(link) => {
                            if let Some(previous) = link.notifications.replace(task) {
                                previous.abort();
                            }
                        }
                        None => task.abort(),
                    }
                }
                Err(e) => warn!(%handle, "Failed to get notifications stream: {}", e),
            }

            let services = peripheral.services().iter().map(convert_service).collect();
            emit(
                &events,
                CentralEvent::ServicesDiscovered {
                    handle,
                    status: GattStatus::Success,
                    services,
                },
            );
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
        // Routing is implicit; the CCCD write does the subscription.
        debug!(%handle, %characteristic, enable, "Notification routing");
        self.peripheral(handle).is_some()
    }

    fn write_characteristic(
        &self,
        handle: TransportHandle,
        service: Uuid,
        characteristic: Uuid,
        value: &[u8],
    ) -> bool {
        let Some(peripheral) = self.peripheral(handle) else {
            return false;
        };
        let Some(target) = find_characteristic(&peripheral, service, characteristic) else {
            warn!(%handle, %characteristic, "Characteristic not found");
            return false;
        };

        let value = value.to_vec();
        self.runtime.spawn(async move {
            if let Err(e) = peripheral
                .write(&target, &value, WriteType::WithResponse)
                .await
            {
                error!(%handle, "Failed to write to characteristic: {}", e);
            }
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
        let Some(peripheral) = self.peripheral(handle) else {
            return false;
        };
        let Some(target) = find_characteristic(&peripheral, service, characteristic) else {
            warn!(%handle, %characteristic, "Characteristic not found");
            return false;
        };

        if descriptor == CCCD_UUID && value == ENABLE_NOTIFICATION_VALUE {
            self.runtime.spawn(async move {
                if let Err(e) = peripheral.subscribe(&target).await {
                    error!(%handle, "Failed to subscribe to notifications: {}", e);
                }
            });
            return true;
        }
        if descriptor == CCCD_UUID && value == DISABLE_NOTIFICATION_VALUE {
            self.runtime.spawn(async move {
                if let Err(e) = peripheral.unsubscribe(&target).await {
                    warn!(%handle, "Failed to unsubscribe: {}", e);
                }
            });
            return true;
        }

        let Some(target) = target.descriptors.iter().find(|d| d.uuid == descriptor).cloned()
        else {
            warn!(%handle, %descriptor, "Descriptor not found");
            return false;
        };
        let value = value.to_vec();
        self.runtime.spawn(async move {
            if let Err(e) = peripheral.write_descriptor(&target, &value).await {
                error!(%handle, "Failed to write descriptor: {}", e);
            }
        });
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manufacturer_data_encoding() {
        let mut data = HashMap::new();
        data.insert(0x0059u16, vec![0xAA, 0xBB]);
        data.insert(0x004Cu16, vec![0x01]);

        assert_eq!(
            encode_manufacturer_data(&data),
            vec![0x04, 0xFF, 0x4C, 0x00, 0x01, 0x05, 0xFF, 0x59, 0x00, 0xAA, 0xBB]
        );
        assert!(encode_manufacturer_data(&HashMap::new()).is_empty());
    }

    #[test]
    fn test_scan_start_forgets_previous_sightings() {
        let mut registry: Registry<&str> = Registry::default();
        let stale = PeerAddress::from("AA:BB:CC:DD:EE:FF");
        let handle = TransportHandle::new(1);
        registry.peripherals.insert(stale.clone(), "seen last scan");
        registry.links.insert(
            handle,
            Link {
                peripheral: "linked",
                notifications: None,
            },
        );

        registry.begin_scan();

        assert!(!registry.peripherals.contains_key(&stale));
        assert_eq!(registry.peripheral(handle), Some("linked"));
    }
}
