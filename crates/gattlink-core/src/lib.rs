//! Shared building blocks for the gattlink BLE messaging sessions
//!
//! This crate holds everything the central and peripheral sessions have in
//! common:
//!
//! - [`types`] - connection state, scanned devices, messages
//! - [`gatt`] - service/characteristic/descriptor descriptions and status codes
//! - [`protocol`] - the message service UUIDs, CCCD values and sizing constants
//! - [`chunker`] - splitting payloads into MTU-sized chunks
//! - [`permissions`] - the permission precondition checked before radio work
//! - [`published`] - latest-value-wins state cells observers subscribe to
//! - [`error`] - error types

pub mod chunker;
pub mod error;
pub mod gatt;
pub mod permissions;
pub mod protocol;
pub mod published;
pub mod types;

pub use error::{ChunkError, GattError, Result};
pub use gatt::{
    AttPermissions, CharProperties, GattCharacteristic, GattDescriptor, GattService, GattStatus,
};
pub use permissions::{AlwaysGranted, PermissionGate, StaticPermissions};
pub use published::Published;
pub use types::{
    current_timestamp, ConnectionState, LinkState, Message, MessageDirection, PeerAddress,
    ReceivedData, ScannedDevice, Timestamp,
};
