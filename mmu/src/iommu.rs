//! IOMMU-backed MMU adapter
//!
//! [`IommuMmu`] implements [`Mmu`] on top of a platform IOMMU service. It owns
//! exactly one translation domain, registers a [`FaultNotifier`] for it at
//! construction, and frees it exactly once when the adapter goes away.
//!
//! Power handling: attach, detach and unmap are bracketed by a
//! [`PowerGuard`]. Map is not. Map is only issued while the device is
//! attached, which already holds the device active; the asymmetry is kept
//! until that invariant is confirmed for every caller.
//!
//! Error policy: attach and map return platform failures unchanged. Detach
//! and unmap sit on teardown paths where the caller cannot act on a failure;
//! those are logged and discarded.

use alloc::{boxed::Box, sync::Arc};
use core::{
    mem::{self, ManuallyDrop},
    sync::atomic::{AtomicUsize, Ordering},
};

use crate::{
    config::MmuConfig,
    error::{MmuError, MmuResult},
    fault::{FaultHandler, FaultNotifier, FaultStats},
    mmu::{Mmu, MmuBase},
    platform::{DeviceId, IommuPlatform, PlatformError, PlatformServices},
    power::PowerGuard,
    sg::{IommuProt, ScatterGatherList},
};

/// MMU adapter over one platform IOMMU domain
pub struct IommuMmu<P: IommuPlatform> {
    base: MmuBase,
    services: PlatformServices<P>,
    /// Taken exactly once, in `Drop`.
    domain: ManuallyDrop<P::Domain>,
    /// Outstanding attaches, for teardown diagnostics only.
    attached: AtomicUsize,
    destroyed: bool,
}

impl<P: IommuPlatform> IommuMmu<P> {
    /// Bytes of adapter state accounted against the state allocator.
    pub fn state_size() -> usize {
        mem::size_of::<Self>()
    }

    /// Build an adapter that takes ownership of `domain`.
    ///
    /// On allocation failure the domain is handed back to the platform before
    /// returning, and no fault callback is registered.
    pub fn new(
        device: DeviceId,
        domain: P::Domain,
        services: PlatformServices<P>,
        config: &MmuConfig,
    ) -> MmuResult<Self> {
        let requested = Self::state_size();
        if !services.heap.try_reserve(requested) {
            log::error!(
                "[GPU-MMU] {}: cannot allocate adapter state ({} bytes)",
                device,
                requested
            );
            services.iommu.domain_free(domain);
            return Err(MmuError::OutOfMemory { requested });
        }

        let notifier = Arc::new(FaultNotifier::new(
            device,
            config,
            services.clock.clone(),
            services.telemetry.clone(),
        ));
        services.iommu.set_fault_handler(&domain, notifier.clone());

        log::debug!("[GPU-MMU] {}: adapter created", device);

        Ok(Self {
            base: MmuBase::new(device, notifier),
            services,
            domain: ManuallyDrop::new(domain),
            attached: AtomicUsize::new(0),
            destroyed: false,
        })
    }

    /// Allocate a fresh domain from the platform and build an adapter on it.
    pub fn create(
        device: DeviceId,
        services: PlatformServices<P>,
        config: &MmuConfig,
    ) -> MmuResult<Self> {
        let domain = services.iommu.domain_alloc()?;
        Self::new(device, domain, services, config)
    }

    pub fn device(&self) -> DeviceId {
        self.base.device()
    }

    /// The owned translation domain.
    pub fn domain(&self) -> &P::Domain {
        &self.domain
    }

    pub fn attach(&self, names: &[&str]) -> MmuResult<()> {
        let device = self.device();
        log::debug!("[GPU-MMU] {}: attach {:?}", device, names);

        let result = {
            let _power = PowerGuard::acquire(self.services.power.as_ref(), device);
            self.services.iommu.attach_device(&self.domain, device)
        };

        result?;
        self.attached.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    pub fn detach(&self, names: &[&str]) {
        let device = self.device();
        log::debug!("[GPU-MMU] {}: detach {:?}", device, names);

        let result = {
            let _power = PowerGuard::acquire(self.services.power.as_ref(), device);
            self.services.iommu.detach_device(&self.domain, device)
        };

        if self
            .attached
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1))
            .is_err()
        {
            log::warn!("[GPU-MMU] {}: detach without matching attach", device);
        }
        discard_teardown_error("detach", device, result);
    }

    pub fn map(
        &self,
        iova: u64,
        sgl: &ScatterGatherList,
        length: usize,
        prot: IommuProt,
    ) -> MmuResult<()> {
        let device = self.device();
        log::debug!(
            "[GPU-MMU] {}: map iova={:#x} len={} nents={} prot={:?}",
            device,
            iova,
            length,
            sgl.entry_count(),
            prot
        );

        // No power guard here; see the module docs.
        let mapped = match self.services.iommu.map_sg(&self.domain, iova, sgl, prot) {
            Ok(mapped) => mapped,
            Err(e) => {
                log::error!(
                    "[GPU-MMU] WARNING: {}: map of {} bytes at iova {:#x} failed: {}",
                    device,
                    length,
                    iova,
                    e
                );
                return Err(e.into());
            }
        };

        if mapped == 0 {
            log::error!(
                "[GPU-MMU] WARNING: {}: nothing mapped at iova {:#x} ({} bytes requested)",
                device,
                iova,
                length
            );
        }

        if mapped != length {
            return Err(MmuError::InvalidMapping {
                iova,
                requested: length,
                mapped,
            });
        }
        Ok(())
    }

    /// Always succeeds once the platform call returns.
    pub fn unmap(&self, iova: u64, _sgl: &ScatterGatherList, length: usize) -> MmuResult<()> {
        let device = self.device();
        log::debug!("[GPU-MMU] {}: unmap iova={:#x} len={}", device, iova, length);

        let unmapped = {
            let _power = PowerGuard::acquire(self.services.power.as_ref(), device);
            self.services.iommu.unmap(&self.domain, iova, length)
        };

        if unmapped != length {
            log::warn!(
                "[GPU-MMU] {}: unmap at iova {:#x} removed {} of {} bytes",
                device,
                iova,
                unmapped,
                length
            );
        }
        Ok(())
    }

    /// Free the domain and the adapter state.
    pub fn destroy(mut self) {
        let outstanding = self.attached.load(Ordering::Relaxed);
        if outstanding != 0 {
            log::warn!(
                "[GPU-MMU] {}: destroyed with {} attach(es) outstanding",
                self.device(),
                outstanding
            );
        }
        self.destroyed = true;
    }

    pub fn set_fault_handler(&self, handler: Option<Arc<dyn FaultHandler>>) {
        self.base.set_fault_handler(handler);
    }

    pub fn fault_stats(&self) -> FaultStats {
        self.base.notifier().stats()
    }
}

impl<P: IommuPlatform> Drop for IommuMmu<P> {
    fn drop(&mut self) {
        if !self.destroyed {
            log::warn!("[GPU-MMU] {}: adapter dropped without destroy", self.device());
        }

        // SAFETY: `drop` runs at most once and nothing reads `self.domain`
        // after this point.
        let domain = unsafe { ManuallyDrop::take(&mut self.domain) };
        self.services.iommu.domain_free(domain);
        self.services.heap.release(Self::state_size());

        log::debug!("[GPU-MMU] {}: domain released", self.device());
    }
}

impl<P: IommuPlatform> Mmu for IommuMmu<P> {
    fn device(&self) -> DeviceId {
        IommuMmu::device(self)
    }

    fn attach(&self, names: &[&str]) -> MmuResult<()> {
        IommuMmu::attach(self, names)
    }

    fn detach(&self, names: &[&str]) {
        IommuMmu::detach(self, names)
    }

    fn map(
        &self,
        iova: u64,
        sgl: &ScatterGatherList,
        length: usize,
        prot: IommuProt,
    ) -> MmuResult<()> {
        IommuMmu::map(self, iova, sgl, length, prot)
    }

    fn unmap(&self, iova: u64, sgl: &ScatterGatherList, length: usize) -> MmuResult<()> {
        IommuMmu::unmap(self, iova, sgl, length)
    }

    fn destroy(self: Box<Self>) {
        IommuMmu::destroy(*self)
    }

    fn set_fault_handler(&self, handler: Option<Arc<dyn FaultHandler>>) {
        IommuMmu::set_fault_handler(self, handler)
    }
}

/// Drop a teardown-path failure after logging it.
fn discard_teardown_error(op: &'static str, device: DeviceId, result: Result<(), PlatformError>) {
    if let Err(e) = result {
        log::warn!("[GPU-MMU] {}: {} failed (ignored): {}", device, op, e);
    }
}
