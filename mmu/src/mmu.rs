//! The MMU contract consumed by the display/GPU drivers
//!
//! Drivers hold a `Box<dyn Mmu>` (or a concrete adapter) per device and never
//! see the translation backend behind it.

use alloc::{boxed::Box, sync::Arc};

use crate::{
    error::MmuResult,
    fault::{FaultHandler, FaultNotifier},
    platform::DeviceId,
    sg::{IommuProt, ScatterGatherList},
};

/// Device address-space contract.
///
/// No internal locking: callers serialize structural changes (map/unmap,
/// attach/detach) per address space.
pub trait Mmu: Send + Sync {
    /// Device whose address space this is.
    fn device(&self) -> DeviceId;

    /// Attach the address space to the device. `names` identify the
    /// requesting ports and are informational only.
    fn attach(&self, names: &[&str]) -> MmuResult<()>;

    /// Detach the address space. Failures are logged, never returned.
    fn detach(&self, names: &[&str]);

    /// Map `length` bytes of `sgl` at `iova`.
    fn map(
        &self,
        iova: u64,
        sgl: &ScatterGatherList,
        length: usize,
        prot: IommuProt,
    ) -> MmuResult<()>;

    /// Remove translations over `[iova, iova + length)`.
    fn unmap(&self, iova: u64, sgl: &ScatterGatherList, length: usize) -> MmuResult<()>;

    /// Release the backend and the adapter. Every attach must have been
    /// matched by a detach.
    fn destroy(self: Box<Self>);

    /// Install (or clear) the driver's fault policy.
    fn set_fault_handler(&self, handler: Option<Arc<dyn FaultHandler>>);
}

/// State common to every adapter: the device and its fault notifier.
pub struct MmuBase {
    device: DeviceId,
    notifier: Arc<FaultNotifier>,
}

impl MmuBase {
    pub fn new(device: DeviceId, notifier: Arc<FaultNotifier>) -> Self {
        Self { device, notifier }
    }

    pub fn device(&self) -> DeviceId {
        self.device
    }

    pub fn notifier(&self) -> &Arc<FaultNotifier> {
        &self.notifier
    }

    pub fn set_fault_handler(&self, handler: Option<Arc<dyn FaultHandler>>) {
        self.notifier.set_handler(handler);
    }
}
