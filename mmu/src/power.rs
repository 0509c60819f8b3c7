//! Scoped runtime power references
//!
//! [`PowerGuard`] brackets a hardware operation that may run while the device
//! is otherwise powered down. The reference is released when the guard is
//! dropped, so no early return or `?` can skip the release.

use crate::platform::{DeviceId, PowerManager};

/// RAII wrapper for a device power reference
pub struct PowerGuard<'a> {
    power: &'a dyn PowerManager,
    device: DeviceId,
}

impl<'a> PowerGuard<'a> {
    /// Synchronously acquire power for `device`.
    ///
    /// A failed acquire still leaves a reference to balance, so the failure is
    /// logged and the guard is returned anyway.
    pub fn acquire(power: &'a dyn PowerManager, device: DeviceId) -> Self {
        if let Err(e) = power.acquire(device) {
            log::warn!("[GPU-MMU] power acquire failed for {}: {}", device, e);
        }
        Self { power, device }
    }

    pub fn device(&self) -> DeviceId {
        self.device
    }
}

impl Drop for PowerGuard<'_> {
    fn drop(&mut self) {
        self.power.release(self.device);
    }
}
