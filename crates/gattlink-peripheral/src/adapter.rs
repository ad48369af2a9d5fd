//! Peripheral-side capability adapter contract
//!
//! The session owns at most one open GATT server and one advertising request
//! at a time. Inbound traffic (connections, writes, MTU exchanges) and the
//! advertiser's start result come back as [`PeripheralEvent`]s. As on the
//! central side, adapters never call into the session from inside a method.

use std::fmt;

use gattlink_core::{GattService, GattStatus, LinkState, PeerAddress, Result};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ----------------------------------------------------------------------------
// Handles and Settings
// ----------------------------------------------------------------------------

/// Opaque id of an open GATT server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ServerHandle(u64);

impl ServerHandle {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ServerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "server#{}", self.0)
    }
}

/// Id the adapter assigns to an inbound request, echoed in the response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(pub u32);

/// Advertising interval trade-off
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum AdvertiseMode {
    LowPower,
    Balanced,
    #[default]
    LowLatency,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdvertiseSettings {
    pub mode: AdvertiseMode,
    pub connectable: bool,
}

/// What goes into the advertisement payload
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AdvertiseData {
    /// Local name to include, `None` to leave it out
    pub local_name: Option<String>,
    pub service_uuids: Vec<Uuid>,
}

// ----------------------------------------------------------------------------
// Events
// ----------------------------------------------------------------------------

/// Inbound traffic and advertiser results reported by a [`PeripheralAdapter`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeripheralEvent {
    ConnectionChanged {
        peer: PeerAddress,
        status: GattStatus,
        state: LinkState,
    },
    MtuChanged {
        peer: PeerAddress,
        mtu: u16,
    },
    WriteRequest {
        peer: PeerAddress,
        request_id: RequestId,
        characteristic: Uuid,
        response_needed: bool,
        offset: u16,
        value: Vec<u8>,
    },
    DescriptorWriteRequest {
        peer: PeerAddress,
        request_id: RequestId,
        characteristic: Uuid,
        descriptor: Uuid,
        response_needed: bool,
        value: Vec<u8>,
    },
    AdvertiseStarted,
    AdvertiseFailed {
        code: i32,
    },
}

// ----------------------------------------------------------------------------
// Adapter Trait
// ----------------------------------------------------------------------------

/// Primitive radio operations a peripheral needs
pub trait PeripheralAdapter: Send + Sync {
    /// Open a local GATT server exposing `service`
    fn open_server(&self, service: &GattService) -> Result<ServerHandle>;

    fn close_server(&self, server: ServerHandle);

    /// Request advertising; the result arrives as
    /// [`PeripheralEvent::AdvertiseStarted`] or [`PeripheralEvent::AdvertiseFailed`]
    fn start_advertising(&self, settings: &AdvertiseSettings, data: &AdvertiseData);

    fn stop_advertising(&self);

    /// Push one notification to `peer`; `false` when it could not be queued
    fn notify(
        &self,
        server: ServerHandle,
        peer: &PeerAddress,
        characteristic: Uuid,
        value: &[u8],
    ) -> bool;

    fn send_response(
        &self,
        server: ServerHandle,
        peer: &PeerAddress,
        request_id: RequestId,
        status: GattStatus,
        value: &[u8],
    );
}
