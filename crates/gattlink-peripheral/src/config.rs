//! Peripheral session configuration

use gattlink_core::protocol::{DEFAULT_ATT_MTU, DEVICE_NAME};

use crate::adapter::AdvertiseMode;

// ----------------------------------------------------------------------------
// Configuration
// ----------------------------------------------------------------------------

/// Configuration for a peripheral session
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct PeripheralConfig {
    /// MTU assumed until a central negotiates a larger one
    pub default_mtu: u16,
    /// Local name put in the advertisement
    pub device_name: String,
    pub advertise_mode: AdvertiseMode,
    /// Whether the advertisement carries the local name
    pub include_device_name: bool,
    /// Whether centrals may connect
    pub connectable: bool,
}

impl Default for PeripheralConfig {
    fn default() -> Self {
        Self {
            default_mtu: DEFAULT_ATT_MTU,
            device_name: DEVICE_NAME.to_string(),
            advertise_mode: AdvertiseMode::LowLatency,
            include_device_name: true,
            connectable: true,
        }
    }
}

impl PeripheralConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the MTU assumed before negotiation
    pub fn with_default_mtu(mut self, mtu: u16) -> Self {
        self.default_mtu = mtu;
        self
    }

    /// Set the advertised local name
    pub fn with_device_name(mut self, name: impl Into<String>) -> Self {
        self.device_name = name.into();
        self
    }

    pub fn with_advertise_mode(mut self, mode: AdvertiseMode) -> Self {
        self.advertise_mode = mode;
        self
    }

    pub fn with_include_device_name(mut self, include: bool) -> Self {
        self.include_device_name = include;
        self
    }

    pub fn with_connectable(mut self, connectable: bool) -> Self {
        self.connectable = connectable;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PeripheralConfig::default();
        assert_eq!(config.default_mtu, 23);
        assert_eq!(config.device_name, "BLE Server");
        assert!(config.include_device_name);
        assert!(config.connectable);
    }
}
