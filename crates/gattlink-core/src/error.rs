//! Error types shared by the central and peripheral sessions

use thiserror::Error;

use crate::gatt::GattStatus;

// ----------------------------------------------------------------------------
// Error Types
// ----------------------------------------------------------------------------

/// Errors produced while driving a GATT session
///
/// Sessions never hand these to their callers directly. They are rendered into
/// [`ConnectionState::Error`](crate::ConnectionState::Error) so observers see a
/// single, published failure channel.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GattError {
    #[error("Missing permissions")]
    PermissionDenied,

    #[error("Connection error: {status}")]
    Transport { status: GattStatus },

    #[error("Scan failed with error: {code}")]
    ScanFailed { code: i32 },

    #[error("Bluetooth adapter unavailable: {0}")]
    AdapterUnavailable(String),

    #[error("No Tokio runtime available to drive the session")]
    RuntimeUnavailable,
}

/// Errors produced by the message chunker
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkError {
    #[error("Invalid chunk size: {0} (must be at least 1)")]
    InvalidChunkSize(usize),
}

/// Result alias for session-level operations
pub type Result<T> = std::result::Result<T, GattError>;
