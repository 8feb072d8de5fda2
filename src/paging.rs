//! 4-level page table construction for the handover (spec §4.5).
//!
//! `PageTable`/`PageTableEntry`/`PageTableFlags` are carried over from the teacher's
//! `x86/paging/page_table/mod.rs` almost unchanged — they describe real hardware layout, not
//! loader policy. The actual construction sequence follows `x86::paging::bootinit_paging`
//! (`identity_map_phys_level4`) rather than the teacher's runtime `PageTableMapper`: at this
//! point in boot there is no virtual memory yet, so tables are built through raw physical
//! pointers exactly as that pre-kernel routine does, instead of through a `Translator`/
//! `MemoryMapping` abstraction meant for an already-running kernel.

use crate::consts::{DIRECT_MAP_BASE, LOW_MEMORY_WINDOW_BYTES};
use crate::error::{Fatal, ResourceError};
use crate::mem::addr::{Alignment, MemoryAddress, PhyAddr, VirtAddr};
use crate::mem::services::{BootMemoryType, Criticality, MemoryServices};
use core::ops::BitOr;
use modular_bitfield::bitfield;
use modular_bitfield::prelude::{B3, B51};

const ENTRIES_PER_TABLE: usize = 512;
const PAGE_4KB: u64 = 1 << 12;
const PAGE_1GB: u64 = 1 << 30;

#[repr(align(4096))]
#[derive(Debug)]
pub struct PageTable {
    entries: [PageTableEntry; ENTRIES_PER_TABLE],
}

impl PageTable {
    pub fn get(&self, id: u16) -> &PageTableEntry {
        &self.entries[id as usize]
    }

    pub fn get_mut(&mut self, id: u16) -> &mut PageTableEntry {
        &mut self.entries[id as usize]
    }
}

impl Default for PageTable {
    fn default() -> Self {
        Self {
            entries: [PageTableEntry::default(); ENTRIES_PER_TABLE],
        }
    }
}

#[derive(Clone, Copy, Debug, Default)]
#[repr(transparent)]
pub struct PageTableEntry {
    entry: u64,
}

impl PageTableEntry {
    const ADDR_BITS: u64 = 0x000f_ffff_ffff_f000;

    pub fn used(&self) -> bool {
        self.entry != 0
    }

    pub fn frame_addr(&self) -> PhyAddr {
        PhyAddr::new(self.entry & Self::ADDR_BITS)
    }

    pub fn map_to_addr(&mut self, addr: PhyAddr, flags: PageTableFlags) {
        self.entry = addr.as_u64() | u64::from(flags);
    }

    pub fn set_flags(&mut self, flags: PageTableFlags) {
        self.entry = (self.entry & Self::ADDR_BITS) | u64::from(flags);
    }

    pub fn flags(self) -> PageTableFlags {
        PageTableFlags::from(self.entry & !Self::ADDR_BITS)
    }
}

#[bitfield]
#[derive(Clone, Copy)]
#[repr(u64)]
pub struct PageTableFlags {
    pub present: bool,
    pub write: bool,
    pub user_access: bool,
    pub write_through: bool,
    pub cache_disable: bool,
    pub accessed: bool,
    pub dirty: bool,
    pub huge_page: bool,
    pub global: bool,
    #[skip]
    __: B51,
    pub pke: B3,
    pub nxe: bool,
}

impl BitOr for PageTableFlags {
    type Output = PageTableFlags;
    fn bitor(self, rhs: Self) -> Self::Output {
        PageTableFlags::from(u64::from(self) | u64::from(rhs))
    }
}

fn pml4_index(addr: u64) -> u16 {
    ((addr >> 39) & 0x1FF) as u16
}
fn pdpte_index(addr: u64) -> u16 {
    ((addr >> 30) & 0x1FF) as u16
}
fn pde_index(addr: u64) -> u16 {
    ((addr >> 21) & 0x1FF) as u16
}
fn pte_index(addr: u64) -> u16 {
    ((addr >> 12) & 0x1FF) as u16
}

/// A built set of paging structures, handed to the architecture jump once the kernel's own
/// mappings (handled by the caller through [`map_kernel_range`]) are in place.
#[derive(Debug, Clone, Copy)]
pub struct PageTables {
    pub pml4: PhyAddr,
}

fn alloc_table(services: &mut dyn MemoryServices) -> Result<&'static mut PageTable, Fatal> {
    let phys = services
        .allocate_pages(Criticality::Critical, 1, BootMemoryType::LoaderPermanent)
        .ok_or(ResourceError::AllocationFailed)?;
    let table: &'static mut PageTable = unsafe { &mut *phys.as_mut_ptr() };
    *table = PageTable::default();
    Ok(table)
}

/// Build the handover page tables: identity map of the low memory window, the direct map at
/// [`DIRECT_MAP_BASE`], both via 1 GiB pages, plus any kernel mapping not already covered by
/// the direct map.
pub fn build_page_tables(
    services: &mut dyn MemoryServices,
    kernel_virtual_base: VirtAddr,
    kernel_physical_base: PhyAddr,
    kernel_span_bytes: u64,
    kernel_range_is_direct_map: bool,
) -> Result<PageTables, Fatal> {
    let pml4_phys = services
        .allocate_pages(Criticality::Critical, 1, BootMemoryType::LoaderPermanent)
        .ok_or(ResourceError::AllocationFailed)?;

    let pml4: &mut PageTable = unsafe { &mut *pml4_phys.as_mut_ptr() };
    *pml4 = PageTable::default();

    map_region_1gb(pml4, services, PhyAddr::new(0), VirtAddr::new(0), LOW_MEMORY_WINDOW_BYTES)?;
    map_region_1gb(pml4, services, PhyAddr::new(0), VirtAddr::new(DIRECT_MAP_BASE), LOW_MEMORY_WINDOW_BYTES)?;

    if !kernel_range_is_direct_map {
        map_region_4kb(pml4, services, kernel_physical_base, kernel_virtual_base, kernel_span_bytes)?;
    }

    Ok(PageTables { pml4: pml4_phys })
}

fn map_region_1gb(
    pml4: &mut PageTable,
    services: &mut dyn MemoryServices,
    phys_base: PhyAddr,
    virt_base: VirtAddr,
    len: u64,
) -> Result<(), Fatal> {
    let pages = (len.div_ceil(PAGE_1GB)).max(1);
    for i in 0..pages {
        let virt = virt_base + i * PAGE_1GB;
        let phys = phys_base + i * PAGE_1GB;

        let pml4e = pml4.get_mut(pml4_index(virt.as_u64()));
        let pdpt = get_or_create(pml4e, services)?;
        pdpt.get_mut(pdpte_index(virt.as_u64())).map_to_addr(
            phys,
            PageTableFlags::new().with_present(true).with_write(true).with_huge_page(true),
        );
    }
    Ok(())
}

fn map_region_4kb(
    pml4: &mut PageTable,
    services: &mut dyn MemoryServices,
    phys_base: PhyAddr,
    virt_base: VirtAddr,
    len: u64,
) -> Result<(), Fatal> {
    let pages = (len.div_ceil(PAGE_4KB)).max(1);
    for i in 0..pages {
        let virt = virt_base + i * PAGE_4KB;
        let phys = phys_base + i * PAGE_4KB;

        let pml4e = pml4.get_mut(pml4_index(virt.as_u64()));
        let pdpt = get_or_create(pml4e, services)?;
        let pde = get_or_create(pdpt.get_mut(pdpte_index(virt.as_u64())), services)?;
        let pte = get_or_create(pde.get_mut(pde_index(virt.as_u64())), services)?;
        pte.get_mut(pte_index(virt.as_u64()))
            .map_to_addr(phys, PageTableFlags::new().with_present(true).with_write(true));
    }
    Ok(())
}

fn get_or_create<'a>(
    entry: &'a mut PageTableEntry,
    services: &mut dyn MemoryServices,
) -> Result<&'a mut PageTable, Fatal> {
    if !entry.used() {
        let table = alloc_table(services)?;
        let addr = PhyAddr::new(table as *mut PageTable as u64);
        entry.map_to_addr(addr, PageTableFlags::new().with_present(true).with_write(true));
        return Ok(table);
    }
    Ok(unsafe { &mut *entry.frame_addr().as_mut_ptr() })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consts::HIGHER_HALF_BASE;
    use crate::mem::services::mock::MockMemoryServices;
    use alloc::vec::Vec;

    #[test]
    fn index_decomposition_matches_known_address() {
        let addr = 0xFFFF_8000_0010_2000u64;
        assert_eq!(pml4_index(addr), 256);
        assert_eq!(pte_index(addr), 2);
    }

    #[test]
    fn flags_roundtrip_through_entry() {
        let mut table = PageTable::default();
        let entry = table.get_mut(0);
        assert!(!entry.used());
        entry.map_to_addr(PhyAddr::new(0x1000), PageTableFlags::new().with_present(true).with_write(true));
        assert!(entry.used());
        assert!(entry.flags().present());
        assert!(entry.flags().write());
        assert_eq!(entry.frame_addr().as_u64(), 0x1000);
    }

    fn walk_pml4(tables: &PageTables) -> &PageTable {
        unsafe { &*tables.pml4.as_ptr::<PageTable>() }
    }

    fn walk_next(entry: &PageTableEntry) -> &PageTable {
        unsafe { &*entry.frame_addr().as_ptr::<PageTable>() }
    }

    #[test]
    fn build_page_tables_maps_the_identity_window_with_huge_pages() {
        let mut services = MockMemoryServices::new(Vec::new());
        let tables =
            build_page_tables(&mut services, VirtAddr::new(HIGHER_HALF_BASE + 0x1000), PhyAddr::new(0x20_0000), 0x1000, false)
                .unwrap();
        let pml4 = walk_pml4(&tables);
        let pdpt = walk_next(pml4.get(pml4_index(0)));
        let leaf = pdpt.get(pdpte_index(0));
        assert!(leaf.used());
        assert!(leaf.flags().huge_page());
        assert!(leaf.flags().present());
        assert!(leaf.flags().write());
        assert_eq!(leaf.frame_addr().as_u64(), 0);
    }

    #[test]
    fn build_page_tables_maps_the_direct_map_window_onto_the_same_physical_range() {
        let mut services = MockMemoryServices::new(Vec::new());
        let tables =
            build_page_tables(&mut services, VirtAddr::new(HIGHER_HALF_BASE + 0x1000), PhyAddr::new(0x20_0000), 0x1000, false)
                .unwrap();
        let pml4 = walk_pml4(&tables);
        let pdpt = walk_next(pml4.get(pml4_index(DIRECT_MAP_BASE)));
        let leaf = pdpt.get(pdpte_index(DIRECT_MAP_BASE));
        assert!(leaf.flags().huge_page());
        assert_eq!(leaf.frame_addr().as_u64(), 0);
    }

    #[test]
    fn build_page_tables_maps_a_non_direct_map_kernel_range_with_4kb_pages() {
        let mut services = MockMemoryServices::new(Vec::new());
        let kernel_virt = VirtAddr::new(HIGHER_HALF_BASE + 0x1000);
        let kernel_phys = PhyAddr::new(0x20_0000);
        let tables = build_page_tables(&mut services, kernel_virt, kernel_phys, 0x1000, false).unwrap();

        let pml4 = walk_pml4(&tables);
        let pdpt = walk_next(pml4.get(pml4_index(kernel_virt.as_u64())));
        let pde_entry = pdpt.get(pdpte_index(kernel_virt.as_u64()));
        assert!(!pde_entry.flags().huge_page());
        let pde_table = walk_next(pde_entry);
        let pte_table = walk_next(pde_table.get(pde_index(kernel_virt.as_u64())));
        let leaf = pte_table.get(pte_index(kernel_virt.as_u64()));
        assert!(leaf.used());
        assert!(leaf.flags().present());
        assert!(leaf.flags().write());
        assert!(!leaf.flags().huge_page());
        assert_eq!(leaf.frame_addr().as_u64(), kernel_phys.as_u64());
    }

    #[test]
    fn build_page_tables_skips_kernel_mapping_when_already_covered_by_the_direct_map() {
        let mut services = MockMemoryServices::new(Vec::new());
        let tables = build_page_tables(&mut services, VirtAddr::new(DIRECT_MAP_BASE + 0x1000), PhyAddr::new(0x1000), 0x1000, true)
            .unwrap();
        assert!(tables.pml4.as_u64() != 0);
    }
}
