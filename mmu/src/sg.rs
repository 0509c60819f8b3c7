//! Scatter-gather descriptors and translation flags
//!
//! A mapping request describes its backing memory as a list of discontiguous
//! physical segments. The adapter never walks the list itself; it is handed to
//! the platform service whole.

use alloc::vec::Vec;

use bitflags::bitflags;

/// Size of a translation granule.
pub const PAGE_SIZE: usize = 4096;

bitflags! {
    /// Protection bits for an IOVA mapping.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct IommuProt: u32 {
        /// Device may read.
        const READ = 1 << 0;
        /// Device may write.
        const WRITE = 1 << 1;
        /// Cache-coherent with the CPU.
        const CACHE = 1 << 2;
        /// Device may not execute from the range.
        const NOEXEC = 1 << 3;
        /// Device memory (MMIO) rather than normal memory.
        const MMIO = 1 << 4;
        /// Privileged accesses only.
        const PRIV = 1 << 5;
    }
}

bitflags! {
    /// Flags delivered with a translation fault.
    ///
    /// An empty set is a read fault.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct FaultFlags: u32 {
        /// The faulting access was a write.
        const WRITE = 1 << 0;
    }
}

impl FaultFlags {
    /// Whether the faulting access was a write.
    pub fn is_write(&self) -> bool {
        self.contains(Self::WRITE)
    }
}

/// A single entry in a scatter-gather list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScatterGatherEntry {
    /// Physical address of the buffer segment.
    pub phys_addr: u64,
    /// Length of the buffer segment in bytes.
    pub length: u32,
}

/// Scatter-gather list describing the pages behind one logical buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScatterGatherList {
    /// Entries in the scatter-gather list.
    pub entries: Vec<ScatterGatherEntry>,
    /// Total byte length across all entries.
    pub total_length: u64,
}

impl ScatterGatherList {
    /// Create an empty scatter-gather list.
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            total_length: 0,
        }
    }

    /// Build a list with one page-sized entry per physical page address.
    pub fn from_pages(pages: &[u64]) -> Self {
        let mut sgl = Self::new();
        for &page in pages {
            sgl.add_entry(page, PAGE_SIZE as u32);
        }
        sgl
    }

    /// Add a physical buffer segment to the scatter-gather list.
    pub fn add_entry(&mut self, phys_addr: u64, length: u32) {
        self.entries.push(ScatterGatherEntry { phys_addr, length });
        self.total_length += length as u64;
    }

    /// Number of entries in the list.
    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for ScatterGatherList {
    fn default() -> Self {
        Self::new()
    }
}
