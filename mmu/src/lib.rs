//! VeridianOS GPU/Display MMU
//!
//! Adapts a platform IOMMU service to the small MMU contract the display and
//! GPU drivers program against: attach, detach, map, unmap, destroy and fault
//! handler installation. One adapter owns exactly one translation domain for
//! its lifetime.
//!
//! Collaborators (the IOMMU hardware service, runtime power management, a
//! monotonic clock, the kernel heap and optional telemetry sinks) are reached
//! through the traits in [`platform`], so the adapter can be driven by real
//! hardware glue or by the mocks used in the unit tests.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod config;
pub mod error;
pub mod fault;
pub mod iommu;
pub mod mmu;
pub mod platform;
pub mod power;
pub mod ratelimit;
pub mod sg;

#[cfg(all(test, not(target_os = "none")))]
mod testing;

pub use config::MmuConfig;
pub use error::{MmuError, MmuResult};
pub use fault::{FaultDisposition, FaultHandler, FaultRecord, FaultStats};
pub use iommu::IommuMmu;
pub use mmu::Mmu;
pub use platform::{DeviceId, IommuPlatform, PlatformError, PlatformServices};
pub use sg::{FaultFlags, IommuProt, ScatterGatherList, PAGE_SIZE};
