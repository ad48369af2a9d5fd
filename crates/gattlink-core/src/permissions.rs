//! Runtime permission precondition
//!
//! Every session operation that is about to touch the radio asks the gate
//! first, so a missing permission always surfaces the same way.

use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, warn};

use crate::error::{GattError, Result};

/// Answers whether the platform permissions needed for BLE are held
pub trait PermissionGate: Send + Sync {
    fn has_required_permissions(&self) -> bool;

    /// Typed precondition check
    fn check(&self) -> Result<()> {
        if self.has_required_permissions() {
            Ok(())
        } else {
            warn!("Required BLE permissions are not held");
            Err(GattError::PermissionDenied)
        }
    }
}

/// Gate for hosts where permissions are granted out of band
#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysGranted;

impl PermissionGate for AlwaysGranted {
    fn has_required_permissions(&self) -> bool {
        true
    }
}

/// Gate whose answer can be flipped at runtime, e.g. after a settings dialog
#[derive(Debug)]
pub struct StaticPermissions {
    granted: AtomicBool,
}

impl StaticPermissions {
    pub fn new(granted: bool) -> Self {
        Self {
            granted: AtomicBool::new(granted),
        }
    }

    pub fn set_granted(&self, granted: bool) {
        debug!(granted, "Permission state changed");
        self.granted.store(granted, Ordering::SeqCst);
    }
}

impl PermissionGate for StaticPermissions {
    fn has_required_permissions(&self) -> bool {
        self.granted.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_permissions_toggle() {
        let gate = StaticPermissions::new(false);
        assert_eq!(gate.check(), Err(GattError::PermissionDenied));

        gate.set_granted(true);
        assert_eq!(gate.check(), Ok(()));
        assert!(AlwaysGranted.check().is_ok());
    }
}
