//! Boot-protocol-wide constants shared by the ELF loader, page-table builder, and handover
//! protocol.

use crate::mem::addr::VirtAddr;

/// Virtual addresses at or above this line are considered higher-half (spec GLOSSARY).
pub const HIGHER_HALF_BASE: u64 = 0xFFFF_8000_0000_0000;

/// Base of the direct-mapped physical memory window. Carried over from the teacher's
/// `PhysicalMemoryMapping::DEFAULT_OFFSET` (`x86/paging/page_table/mapper.rs`), which used the
/// same window for the identical purpose.
pub const DIRECT_MAP_BASE: u64 = 0xFFFF_CF80_0000_0000;

/// How much of physical memory the identity map and direct map both cover.
pub const LOW_MEMORY_WINDOW_BYTES: u64 = 4 * 1024 * 1024 * 1024;

pub fn is_higher_half(addr: VirtAddr) -> bool {
    addr.as_u64() >= HIGHER_HALF_BASE
}

pub fn direct_map(phys: u64) -> VirtAddr {
    VirtAddr::new(DIRECT_MAP_BASE + phys)
}
