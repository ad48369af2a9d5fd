//! GATT attribute descriptions
//!
//! The peripheral builds its service definition from these types and the
//! central caches what the adapter reports after service discovery. Both sides
//! only ever look attributes up by UUID.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ----------------------------------------------------------------------------
// Status
// ----------------------------------------------------------------------------

/// Outcome code attached to adapter callbacks and GATT responses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GattStatus {
    Success,
    /// Platform-specific failure code
    Failure(i32),
}

impl GattStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    /// Numeric form, `0` for success
    pub fn code(&self) -> i32 {
        match self {
            Self::Success => 0,
            Self::Failure(code) => *code,
        }
    }
}

impl fmt::Display for GattStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

// ----------------------------------------------------------------------------
// Property and Permission Sets
// ----------------------------------------------------------------------------

/// Characteristic property bits
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CharProperties(u8);

impl CharProperties {
    pub const READ: Self = Self(0x02);
    pub const WRITE_WITHOUT_RESPONSE: Self = Self(0x04);
    pub const WRITE: Self = Self(0x08);
    pub const NOTIFY: Self = Self(0x10);

    pub const fn empty() -> Self {
        Self(0)
    }

    /// Build from raw ATT property bits
    pub const fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    pub const fn bits(&self) -> u8 {
        self.0
    }

    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    pub const fn contains(&self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for CharProperties {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

/// Attribute access permission bits
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AttPermissions(u8);

impl AttPermissions {
    pub const READ: Self = Self(0x01);
    pub const WRITE: Self = Self(0x10);

    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    pub const fn contains(&self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for AttPermissions {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

// ----------------------------------------------------------------------------
// Attribute Tree
// ----------------------------------------------------------------------------

/// A descriptor attached to a characteristic
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GattDescriptor {
    pub uuid: Uuid,
    pub permissions: AttPermissions,
}

/// A characteristic and its descriptors
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GattCharacteristic {
    pub uuid: Uuid,
    pub properties: CharProperties,
    pub permissions: AttPermissions,
    pub descriptors: Vec<GattDescriptor>,
}

impl GattCharacteristic {
    pub fn new(uuid: Uuid, properties: CharProperties, permissions: AttPermissions) -> Self {
        Self {
            uuid,
            properties,
            permissions,
            descriptors: Vec::new(),
        }
    }

    pub fn with_descriptor(mut self, descriptor: GattDescriptor) -> Self {
        self.descriptors.push(descriptor);
        self
    }

    /// Accepts writes with or without response
    pub fn is_writable(&self) -> bool {
        self.properties.contains(CharProperties::WRITE)
            || self.properties.contains(CharProperties::WRITE_WITHOUT_RESPONSE)
    }

    pub fn is_notifiable(&self) -> bool {
        self.properties.contains(CharProperties::NOTIFY)
    }

    pub fn descriptor(&self, uuid: &Uuid) -> Option<&GattDescriptor> {
        self.descriptors.iter().find(|d| d.uuid == *uuid)
    }
}

/// A primary or secondary service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GattService {
    pub uuid: Uuid,
    pub primary: bool,
    pub characteristics: Vec<GattCharacteristic>,
}

impl GattService {
    pub fn primary(uuid: Uuid) -> Self {
        Self {
            uuid,
            primary: true,
            characteristics: Vec::new(),
        }
    }

    pub fn with_characteristic(mut self, characteristic: GattCharacteristic) -> Self {
        self.characteristics.push(characteristic);
        self
    }

    pub fn characteristic(&self, uuid: &Uuid) -> Option<&GattCharacteristic> {
        self.characteristics.iter().find(|c| c.uuid == *uuid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_property_union_and_contains() {
        let props = CharProperties::WRITE | CharProperties::NOTIFY;
        assert!(props.contains(CharProperties::WRITE));
        assert!(props.contains(CharProperties::NOTIFY));
        assert!(!props.contains(CharProperties::READ));
        assert_eq!(props.bits(), 0x18);
    }

    #[test]
    fn test_lookup_by_uuid() {
        let char_uuid = Uuid::from_u128(0x5678);
        let desc_uuid = Uuid::from_u128(0x2902);
        let service = GattService::primary(Uuid::from_u128(0x1234)).with_characteristic(
            GattCharacteristic::new(char_uuid, CharProperties::NOTIFY, AttPermissions::READ)
                .with_descriptor(GattDescriptor {
                    uuid: desc_uuid,
                    permissions: AttPermissions::WRITE,
                }),
        );

        let characteristic = service.characteristic(&char_uuid).unwrap();
        assert!(characteristic.is_notifiable());
        assert!(characteristic.descriptor(&desc_uuid).is_some());
        assert!(service.characteristic(&desc_uuid).is_none());
    }

    #[test]
    fn test_writable_properties() {
        let uuid = Uuid::from_u128(0x5678);
        let writable = |props: CharProperties| {
            GattCharacteristic::new(uuid, props, AttPermissions::WRITE).is_writable()
        };

        assert!(writable(CharProperties::WRITE));
        assert!(writable(CharProperties::WRITE_WITHOUT_RESPONSE | CharProperties::NOTIFY));
        assert!(!writable(CharProperties::READ | CharProperties::NOTIFY));
    }

    #[test]
    fn test_status_display() {
        assert_eq!(GattStatus::Success.to_string(), "0");
        assert_eq!(GattStatus::Failure(8).to_string(), "8");
        assert!(!GattStatus::Failure(8).is_success());
    }
}
