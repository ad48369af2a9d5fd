//! Central session configuration

use std::time::Duration;

use gattlink_core::protocol::{REQUESTED_MTU, SCAN_PERIOD};

use crate::adapter::ScanMode;

// ----------------------------------------------------------------------------
// Configuration
// ----------------------------------------------------------------------------

/// Configuration for a central session
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct CentralConfig {
    /// How long a scan runs before it stops on its own
    pub scan_period: Duration,
    /// MTU requested once the link is up
    pub requested_mtu: u16,
    /// Scanner duty cycle
    pub scan_mode: ScanMode,
    /// Notifications buffered per receiver before the slowest one lags
    pub notification_buffer: usize,
}

impl Default for CentralConfig {
    fn default() -> Self {
        Self {
            scan_period: SCAN_PERIOD,
            requested_mtu: REQUESTED_MTU,
            scan_mode: ScanMode::LowLatency,
            notification_buffer: 64,
        }
    }
}

impl CentralConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the scan window
    pub fn with_scan_period(mut self, period: Duration) -> Self {
        self.scan_period = period;
        self
    }

    /// Set the MTU requested after connecting
    pub fn with_requested_mtu(mut self, mtu: u16) -> Self {
        self.requested_mtu = mtu;
        self
    }

    pub fn with_scan_mode(mut self, mode: ScanMode) -> Self {
        self.scan_mode = mode;
        self
    }

    /// Set the inbound notification buffer, at least 1
    pub fn with_notification_buffer(mut self, capacity: usize) -> Self {
        self.notification_buffer = capacity.max(1);
        self
    }
}
