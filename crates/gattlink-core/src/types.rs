//! Core data model shared by both sessions

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ----------------------------------------------------------------------------
// Timestamps
// ----------------------------------------------------------------------------

/// Milliseconds since the Unix epoch
pub type Timestamp = u64;

/// Current wall-clock time as a [`Timestamp`]
pub fn current_timestamp() -> Timestamp {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as Timestamp
}

// ----------------------------------------------------------------------------
// Peer Address
// ----------------------------------------------------------------------------

/// Platform address of a remote BLE device (a MAC address on most platforms)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerAddress(String);

impl PeerAddress {
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerAddress {
    fn from(address: &str) -> Self {
        Self::new(address)
    }
}

impl From<String> for PeerAddress {
    fn from(address: String) -> Self {
        Self(address)
    }
}

// ----------------------------------------------------------------------------
// Connection State
// ----------------------------------------------------------------------------

/// Published connection state of a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected { peer_address: PeerAddress },
    Error { message: String },
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected { .. })
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self::Disconnected
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Connected { peer_address } => write!(f, "Connected({})", peer_address),
            Self::Error { message } => write!(f, "Error({})", message),
        }
    }
}

/// Link state reported by an adapter's connection-state callback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LinkState {
    Connected,
    Disconnected,
}

// ----------------------------------------------------------------------------
// Scanned Devices
// ----------------------------------------------------------------------------

/// A named device seen during a scan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScannedDevice {
    /// Unique key of the device
    pub address: PeerAddress,
    /// Advertised local name, never empty
    pub name: String,
    /// Received signal strength in dBm
    pub rssi: i16,
    /// Raw advertisement payload as reported by the adapter
    pub advertisement: Vec<u8>,
    /// When this sighting was recorded
    pub discovered_at: Timestamp,
}

// ----------------------------------------------------------------------------
// Messages
// ----------------------------------------------------------------------------

/// Which side produced a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageDirection {
    Sent,
    Received,
}

/// A text message in a session's log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub content: String,
    pub direction: MessageDirection,
    pub timestamp: Timestamp,
}

impl Message {
    pub fn new(content: impl Into<String>, direction: MessageDirection) -> Self {
        Self {
            id: Uuid::new_v4(),
            content: content.into(),
            direction,
            timestamp: current_timestamp(),
        }
    }

    pub fn sent(content: impl Into<String>) -> Self {
        Self::new(content, MessageDirection::Sent)
    }

    /// Decode raw bytes from the air as a received message
    pub fn received_from_bytes(value: &[u8]) -> Self {
        Self::new(String::from_utf8_lossy(value), MessageDirection::Received)
    }
}

/// A notification value delivered to the central
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceivedData {
    pub characteristic: Uuid,
    pub data: Vec<u8>,
}
