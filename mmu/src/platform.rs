//! Boundaries to the services the adapter consumes
//!
//! - [`IommuPlatform`]: translation-table hardware (domains, attach/detach,
//!   scatter-gather map, unmap, fault callback registration).
//! - [`PowerManager`]: reference-counted runtime power, synchronous.
//! - [`Clock`]: monotonic milliseconds for the fault rate limiters.
//! - [`StateAllocator`]: the kernel heap the adapter's own state comes from.
//! - [`FaultTelemetry`]: optional fire-and-forget fault event sink.
//!
//! The platform service is assumed safe for concurrent calls across different
//! domains. Calls against the same domain are serialized by the caller.

use alloc::sync::Arc;
use core::fmt;

use crate::{
    fault::{FaultDisposition, FaultEvent},
    sg::{FaultFlags, IommuProt, ScatterGatherList},
};

/// Identifier of the device whose address space is being managed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceId(pub u32);

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "dev{}", self.0)
    }
}

/// Errno-style failure code returned by a platform service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlatformError(i32);

impl PlatformError {
    /// Wrap a negative errno. Positive values are negated.
    pub const fn new(code: i32) -> Self {
        if code > 0 {
            Self(-code)
        } else {
            Self(code)
        }
    }

    /// The negative errno value.
    pub const fn code(&self) -> i32 {
        self.0
    }
}

impl fmt::Display for PlatformError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "errno {}", self.0)
    }
}

/// Callback registered with the platform for one domain's translation faults.
///
/// Invoked from interrupt-derived context: implementations must not block,
/// allocate, or call back into map/unmap/attach/detach.
pub trait DomainFaultHandler: Send + Sync {
    fn on_fault(&self, device: DeviceId, iova: u64, flags: FaultFlags) -> FaultDisposition;
}

/// Platform IOMMU service.
pub trait IommuPlatform: Send + Sync {
    /// Opaque translation-table context. Deliberately not `Clone`.
    type Domain: Send + Sync;

    fn domain_alloc(&self) -> Result<Self::Domain, PlatformError>;

    fn domain_free(&self, domain: Self::Domain);

    fn attach_device(&self, domain: &Self::Domain, device: DeviceId) -> Result<(), PlatformError>;

    fn detach_device(&self, domain: &Self::Domain, device: DeviceId) -> Result<(), PlatformError>;

    /// Install translations for `sgl` starting at `iova`.
    ///
    /// Returns the number of bytes actually mapped.
    fn map_sg(
        &self,
        domain: &Self::Domain,
        iova: u64,
        sgl: &ScatterGatherList,
        prot: IommuProt,
    ) -> Result<usize, PlatformError>;

    /// Remove translations over `[iova, iova + length)`, returning the number
    /// of bytes unmapped.
    fn unmap(&self, domain: &Self::Domain, iova: u64, length: usize) -> usize;

    /// Replace the fault callback of `domain`.
    fn set_fault_handler(&self, domain: &Self::Domain, handler: Arc<dyn DomainFaultHandler>);
}

/// Runtime power management. Calls may block waiting for rails/clocks.
pub trait PowerManager: Send + Sync {
    /// Take a power reference. The reference is held even when this fails,
    /// so every call is paired with [`PowerManager::release`].
    fn acquire(&self, device: DeviceId) -> Result<(), PlatformError>;

    fn release(&self, device: DeviceId);
}

/// Monotonic time source.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> u64;
}

/// Heap the adapter's own state is accounted against.
pub trait StateAllocator: Send + Sync {
    /// Reserve `bytes` for adapter state. `false` means exhaustion.
    fn try_reserve(&self, bytes: usize) -> bool;

    fn release(&self, bytes: usize);
}

/// Global allocator backed state. The global allocator aborts on exhaustion,
/// so reservation never reports failure here.
#[derive(Debug, Default, Clone, Copy)]
pub struct GlobalHeap;

impl StateAllocator for GlobalHeap {
    fn try_reserve(&self, _bytes: usize) -> bool {
        true
    }

    fn release(&self, _bytes: usize) {}
}

/// Fire-and-forget sink for structured fault events.
pub trait FaultTelemetry: Send + Sync {
    fn report(&self, event: &FaultEvent);
}

/// Everything an adapter needs from the rest of the kernel.
pub struct PlatformServices<P: IommuPlatform> {
    pub iommu: Arc<P>,
    pub power: Arc<dyn PowerManager>,
    pub clock: Arc<dyn Clock>,
    pub heap: Arc<dyn StateAllocator>,
    pub telemetry: Option<Arc<dyn FaultTelemetry>>,
}

impl<P: IommuPlatform> PlatformServices<P> {
    pub fn new(iommu: Arc<P>, power: Arc<dyn PowerManager>, clock: Arc<dyn Clock>) -> Self {
        Self {
            iommu,
            power,
            clock,
            heap: Arc::new(GlobalHeap),
            telemetry: None,
        }
    }

    pub fn with_heap(mut self, heap: Arc<dyn StateAllocator>) -> Self {
        self.heap = heap;
        self
    }

    pub fn with_telemetry(mut self, telemetry: Arc<dyn FaultTelemetry>) -> Self {
        self.telemetry = Some(telemetry);
        self
    }
}

impl<P: IommuPlatform> Clone for PlatformServices<P> {
    fn clone(&self) -> Self {
        Self {
            iommu: self.iommu.clone(),
            power: self.power.clone(),
            clock: self.clock.clone(),
            heap: self.heap.clone(),
            telemetry: self.telemetry.clone(),
        }
    }
}
