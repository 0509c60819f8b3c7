//! Error types for the GPU/display MMU adapter
//!
//! Attach and map surface platform failures verbatim; detach and unmap never
//! return them (see [`crate::iommu`]). Translation faults are not errors at
//! all, they travel through [`crate::fault`].

use core::fmt;

use crate::platform::PlatformError;

/// errno value reported for allocation failure.
pub const ENOMEM: i32 = 12;
/// errno value reported for a short or failed mapping.
pub const EINVAL: i32 = 22;

/// Main MMU adapter error type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MmuError {
    /// The adapter could not allocate its own state.
    OutOfMemory { requested: usize },

    /// Propagated unchanged from the platform IOMMU service.
    Platform(PlatformError),

    /// The platform mapped a different number of bytes than requested.
    /// A `mapped` of zero is a caller invariant violation upstream.
    InvalidMapping {
        iova: u64,
        requested: usize,
        mapped: usize,
    },
}

/// Result type alias for MMU operations
pub type MmuResult<T> = Result<T, MmuError>;

impl MmuError {
    /// Negative errno equivalent, for callers that still speak errno.
    pub fn errno(&self) -> i32 {
        match self {
            Self::OutOfMemory { .. } => -ENOMEM,
            Self::Platform(e) => e.code(),
            Self::InvalidMapping { .. } => -EINVAL,
        }
    }
}

impl fmt::Display for MmuError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfMemory { requested } => {
                write!(f, "Out of memory: adapter state of {} bytes", requested)
            }
            Self::Platform(e) => write!(f, "Platform IOMMU error: {}", e),
            Self::InvalidMapping {
                iova,
                requested,
                mapped,
            } => {
                write!(
                    f,
                    "Invalid mapping at iova 0x{:x}: requested {} bytes, mapped {}",
                    iova, requested, mapped
                )
            }
        }
    }
}

impl From<PlatformError> for MmuError {
    fn from(err: PlatformError) -> Self {
        Self::Platform(err)
    }
}
