//! Central-side capability adapter contract
//!
//! [`CentralAdapter`] is the only way a [`CentralSession`](crate::CentralSession)
//! touches the radio. Every method returns immediately; the outcome of
//! asynchronous work comes back later as a [`CentralEvent`] fed into
//! [`CentralSession::handle_event`](crate::CentralSession::handle_event).
//!
//! Adapters must never call back into the session from inside one of these
//! methods. Events are delivered from another task or thread, typically over
//! the channel drained by [`CentralSession::run`](crate::CentralSession::run).

use std::fmt;

pub use gattlink_core::LinkState;
use gattlink_core::{GattService, GattStatus, PeerAddress, Result};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ----------------------------------------------------------------------------
// Handles and Settings
// ----------------------------------------------------------------------------

/// Opaque id of one GATT client link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransportHandle(u64);

impl TransportHandle {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for TransportHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "link#{}", self.0)
    }
}

/// Scan filter; an all-`None` filter matches every advertiser
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanFilter {
    pub service_uuid: Option<Uuid>,
    pub device_name: Option<String>,
}

/// Duty cycle requested from the scanner
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScanMode {
    LowPower,
    Balanced,
    #[default]
    LowLatency,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanSettings {
    pub mode: ScanMode,
}

// ----------------------------------------------------------------------------
// Events
// ----------------------------------------------------------------------------

/// One advertisement sighting
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanRecord {
    pub address: PeerAddress,
    /// Advertised local name, if any
    pub name: Option<String>,
    pub rssi: i16,
    /// Raw advertisement payload
    pub advertisement: Vec<u8>,
}

/// Completions reported by a [`CentralAdapter`]
///
/// Every link-scoped event names the [`TransportHandle`] it belongs to so the
/// session can drop callbacks from a link it has already replaced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CentralEvent {
    ScanResult(ScanRecord),
    ScanFailed {
        code: i32,
    },
    ConnectionChanged {
        handle: TransportHandle,
        status: GattStatus,
        state: LinkState,
    },
    MtuChanged {
        handle: TransportHandle,
        mtu: u16,
        status: GattStatus,
    },
    ServicesDiscovered {
        handle: TransportHandle,
        status: GattStatus,
        services: Vec<GattService>,
    },
    CharacteristicChanged {
        handle: TransportHandle,
        characteristic: Uuid,
        value: Vec<u8>,
    },
}

impl CentralEvent {
    /// Link the event belongs to, `None` for scan events
    pub fn handle(&self) -> Option<TransportHandle> {
        match self {
            Self::ScanResult(_) | Self::ScanFailed { .. } => None,
            Self::ConnectionChanged { handle, .. }
            | Self::MtuChanged { handle, .. }
            | Self::ServicesDiscovered { handle, .. }
            | Self::CharacteristicChanged { handle, .. } => Some(*handle),
        }
    }
}

// ----------------------------------------------------------------------------
// Adapter Trait
// ----------------------------------------------------------------------------

/// Primitive radio operations a central needs
///
/// Methods returning `bool` report whether the request was accepted for
/// processing, not whether it eventually succeeded.
pub trait CentralAdapter: Send + Sync {
    /// Begin scanning; failures arrive as [`CentralEvent::ScanFailed`]
    fn start_scan(&self, filters: &[ScanFilter], settings: &ScanSettings);

    fn stop_scan(&self);

    /// Open a link to `peer`; the outcome arrives as
    /// [`CentralEvent::ConnectionChanged`]
    fn connect(&self, peer: &PeerAddress) -> Result<TransportHandle>;

    fn disconnect(&self, handle: TransportHandle);

    /// Release every resource held for `handle`
    fn close(&self, handle: TransportHandle);

    fn request_mtu(&self, handle: TransportHandle, mtu: u16) -> bool;

    fn discover_services(&self, handle: TransportHandle) -> bool;

    /// Route notifications for a characteristic to this client
    fn set_characteristic_notification(
        &self,
        handle: TransportHandle,
        service: Uuid,
        characteristic: Uuid,
        enable: bool,
    ) -> bool;

    fn write_characteristic(
        &self,
        handle: TransportHandle,
        service: Uuid,
        characteristic: Uuid,
        value: &[u8],
    ) -> bool;

    fn write_descriptor(
        &self,
        handle: TransportHandle,
        service: Uuid,
        characteristic: Uuid,
        descriptor: Uuid,
        value: &[u8],
    ) -> bool;
}
