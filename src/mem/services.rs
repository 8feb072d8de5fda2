//! The memory-allocation capability supplied by firmware glue code.
//!
//! The teacher calls directly into a buddy allocator (`LockedBuddyAllocator`) bound at a
//! fixed address in `fzboot/main/src/main.rs`. Here allocation is a capability trait instead,
//! so the pipeline can be driven by a BIOS-backed, UEFI-backed, or (in tests) an in-memory
//! mock implementation without touching the orchestration code in `loader`.

use crate::error::ResourceError;
use crate::mem::addr::PhyAddr;
use pod_enum::pod_enum;

/// Whether an allocation failure should halt the loader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Criticality {
    /// Failure is unrecoverable for boot; callers should propagate a `ResourceError`.
    Critical,
    /// Failure is acceptable; the caller decides what to do with `None`.
    BestEffort,
}

/// Tags a physical region with its role, written into `MEMORY_MAP` records handed to the
/// kernel. Modeled after the teacher's `E820MemType` (`mem/e820.rs`), extended with the
/// loader-private types the boot protocol reserves above the firmware-native range.
#[pod_enum]
#[repr(u32)]
pub enum BootMemoryType {
    Usable = 0,
    Reserved = 1,
    AcpiReclaimable = 2,
    AcpiNvs = 3,
    BadMemory = 4,
    KernelBinary = 16,
    Modules = 17,
    KernelStack = 18,
    LoaderReclaimable = 19,
    LoaderPermanent = 20,
}

/// The firmware-facing allocator and memory-map snapshot interface.
///
/// `copy_map` mirrors the source's `ms->copy_map(buf, cap, stride, &key, convert_fn)`: passing
/// a zero-capacity destination only returns the current entry count, letting the handover
/// builder (`protocol::finalize_memory_map`) probe the map's size before committing to a
/// reservation.
pub trait MemoryServices {
    /// Allocate `count` pages tagged with `mem_type`. Returns `None` on failure for
    /// `Criticality::BestEffort`; a `Critical` failure is the caller's responsibility to turn
    /// into a `ResourceError`.
    fn allocate_pages(
        &mut self,
        criticality: Criticality,
        count: usize,
        mem_type: BootMemoryType,
    ) -> Option<PhyAddr>;

    /// Allocate `count` pages at a caller-chosen fixed physical address (used when an ELF
    /// image demands a fixed load address rather than "anywhere").
    fn allocate_pages_at(
        &mut self,
        addr: PhyAddr,
        count: usize,
        mem_type: BootMemoryType,
    ) -> bool;

    fn free_pages(&mut self, addr: PhyAddr, count: usize);

    /// Current number of entries in the firmware's memory map, without copying anything.
    fn map_entry_count(&self) -> usize;

    /// Copy up to `capacity` entries of the current memory map into `dest`, returning the
    /// handover key that is valid only as long as no further allocation has occurred since.
    fn copy_map(&self, dest: &mut [crate::mem::memmap::MemoryMapEntry]) -> (usize, u64);

    /// Exit firmware boot services, presenting the key obtained from the most recent
    /// `copy_map` call. Returns whether the firmware accepted the handover.
    fn handover(&mut self, key: u64) -> bool;
}

/// Allocate a critical region, converting allocator failure into the loader's own error type.
pub fn allocate_critical(
    services: &mut dyn MemoryServices,
    count: usize,
    mem_type: BootMemoryType,
) -> Result<PhyAddr, ResourceError> {
    services
        .allocate_pages(Criticality::Critical, count, mem_type)
        .ok_or(ResourceError::AllocationFailed)
}
