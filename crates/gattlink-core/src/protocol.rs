//! BLE protocol constants for the gattlink message service

use std::time::Duration;

use uuid::Uuid;

use crate::gatt::{AttPermissions, CharProperties, GattCharacteristic, GattDescriptor, GattService};

// ----------------------------------------------------------------------------
// Service, Characteristic and Descriptor UUIDs
// ----------------------------------------------------------------------------

/// Message service UUID
pub const SERVICE_UUID: Uuid = Uuid::from_u128(0x00001234_0000_1000_8000_00805F9B34FB);

/// Message characteristic (write + notify)
pub const CHARACTERISTIC_UUID: Uuid = Uuid::from_u128(0x00005678_0000_1000_8000_00805F9B34FB);

/// Client Characteristic Configuration Descriptor
pub const CCCD_UUID: Uuid = Uuid::from_u128(0x00002902_0000_1000_8000_00805F9B34FB);

/// CCCD value that turns notifications on
pub const ENABLE_NOTIFICATION_VALUE: [u8; 2] = [0x01, 0x00];

/// CCCD value that turns notifications off
pub const DISABLE_NOTIFICATION_VALUE: [u8; 2] = [0x00, 0x00];

// ----------------------------------------------------------------------------
// Sizing and Timing
// ----------------------------------------------------------------------------

/// Minimum ATT MTU every BLE link starts with
pub const DEFAULT_ATT_MTU: u16 = 23;

/// Bytes of every notification/write reserved for the ATT header
pub const ATT_HEADER_SIZE: usize = 3;

/// MTU the central asks for once the link is up
pub const REQUESTED_MTU: u16 = 512;

/// How long a scan runs before it is stopped automatically
pub const SCAN_PERIOD: Duration = Duration::from_secs(10);

/// Name the peripheral advertises
pub const DEVICE_NAME: &str = "BLE Server";

/// Build the service the peripheral exposes: one write+notify characteristic
/// carrying a CCCD
pub fn message_service() -> GattService {
    let cccd = GattDescriptor {
        uuid: CCCD_UUID,
        permissions: AttPermissions::READ | AttPermissions::WRITE,
    };
    let characteristic = GattCharacteristic::new(
        CHARACTERISTIC_UUID,
        CharProperties::WRITE | CharProperties::NOTIFY,
        AttPermissions::READ | AttPermissions::WRITE,
    )
    .with_descriptor(cccd);

    GattService::primary(SERVICE_UUID).with_characteristic(characteristic)
}
