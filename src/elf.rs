//! ELF32/64 parsing and loading (spec §4.4).
//!
//! Header and program-header parsing follow the safe `from_le_bytes` field-extraction style of
//! `hadron-elf` (`crates/elf/src/{header.rs,segment.rs}`) — itself the only place in the
//! retrieved corpus with a real `#[cfg(test)]` suite for an ELF reader — generalized here from
//! ELF64-only/x86-64-only to both 32- and 64-bit classes, since spec §4.4 requires
//! `elf_bitness` to distinguish them. `elf_load`'s allocate-anywhere path and BSS zero-fill have
//! no direct teacher precedent in that crate (it only parses, it never loads); the call shape
//! allocate-then-copy-segments is grounded on the teacher's own
//! `fzboot/main/src/boot/mod.rs::load_kernel`.

use crate::error::{BinaryError, Fatal, ResourceError};
use crate::mem::addr::{Alignment, MemoryAddress, PhyAddr, VirtAddr};
use crate::mem::services::{BootMemoryType, Criticality, MemoryServices};

const ELF_MAGIC: [u8; 4] = [0x7f, b'E', b'L', b'F'];
const ELFCLASS32: u8 = 1;
const ELFCLASS64: u8 = 2;
const ELFDATA2LSB: u8 = 1;
const ET_EXEC: u16 = 2;
const ET_DYN: u16 = 3;
const PT_LOAD: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bitness {
    Bits32,
    Bits64,
}

fn le_u16(d: &[u8], off: usize) -> u16 {
    u16::from_le_bytes([d[off], d[off + 1]])
}
fn le_u32(d: &[u8], off: usize) -> u32 {
    u32::from_le_bytes([d[off], d[off + 1], d[off + 2], d[off + 3]])
}
fn le_u64(d: &[u8], off: usize) -> u64 {
    let mut b = [0u8; 8];
    b.copy_from_slice(&d[off..off + 8]);
    u64::from_le_bytes(b)
}

/// Inspect the ELF ident and report the class, or `None` if the data is not a recognized
/// little-endian ELF32/ELF64 image.
pub fn elf_bitness(data: &[u8]) -> Result<Bitness, BinaryError> {
    if data.len() < 20 {
        return Err(BinaryError::Truncated);
    }
    if data[..4] != ELF_MAGIC {
        return Err(BinaryError::BadMagic);
    }
    if data[5] != ELFDATA2LSB {
        return Err(BinaryError::UnsupportedEncoding);
    }
    match data[4] {
        ELFCLASS32 => Ok(Bitness::Bits32),
        ELFCLASS64 => Ok(Bitness::Bits64),
        _ => Err(BinaryError::UnsupportedClass),
    }
}

struct Header {
    e_type: u16,
    e_entry: u64,
    e_phoff: u64,
    e_phentsize: u16,
    e_phnum: u16,
}

const EHDR32_SIZE: usize = 52;
const EHDR64_SIZE: usize = 64;
const PHDR32_SIZE: usize = 32;
const PHDR64_SIZE: usize = 56;

impl Header {
    fn parse(data: &[u8], bits: Bitness) -> Result<Self, BinaryError> {
        let ehdr_size = match bits {
            Bitness::Bits32 => EHDR32_SIZE,
            Bitness::Bits64 => EHDR64_SIZE,
        };
        if data.len() < ehdr_size {
            return Err(BinaryError::Truncated);
        }

        let e_type = le_u16(data, 16);
        if e_type != ET_EXEC && e_type != ET_DYN {
            return Err(BinaryError::UnsupportedClass);
        }

        let header = match bits {
            Bitness::Bits32 => Header {
                e_type,
                e_entry: u64::from(le_u32(data, 24)),
                e_phoff: u64::from(le_u32(data, 28)),
                e_phentsize: le_u16(data, 42),
                e_phnum: le_u16(data, 44),
            },
            Bitness::Bits64 => Header {
                e_type,
                e_entry: le_u64(data, 24),
                e_phoff: le_u64(data, 32),
                e_phentsize: le_u16(data, 54),
                e_phnum: le_u16(data, 56),
            },
        };

        let phdr_size = match bits {
            Bitness::Bits32 => PHDR32_SIZE,
            Bitness::Bits64 => PHDR64_SIZE,
        };
        if header.e_phnum > 0 && usize::from(header.e_phentsize) < phdr_size {
            return Err(BinaryError::Truncated);
        }
        let ph_end = header
            .e_phoff
            .checked_add(u64::from(header.e_phnum) * u64::from(header.e_phentsize))
            .ok_or(BinaryError::Truncated)?;
        if ph_end > data.len() as u64 {
            return Err(BinaryError::Truncated);
        }

        Ok(header)
    }
}

pub struct LoadSegment {
    pub vaddr: u64,
    pub file_offset: usize,
    pub filesz: u64,
    pub memsz: u64,
}

fn parse_phdr(data: &[u8], off: usize, bits: Bitness) -> LoadSegment {
    match bits {
        Bitness::Bits32 => LoadSegment {
            vaddr: u64::from(le_u32(data, off + 8)),
            file_offset: le_u32(data, off + 4) as usize,
            filesz: u64::from(le_u32(data, off + 16)),
            memsz: u64::from(le_u32(data, off + 20)),
        },
        Bitness::Bits64 => LoadSegment {
            vaddr: le_u64(data, off + 16),
            file_offset: le_u64(data, off + 8) as usize,
            filesz: le_u64(data, off + 32),
            memsz: le_u64(data, off + 40),
        },
    }
}

fn load_segments(data: &[u8], header: &Header, bits: Bitness) -> Result<alloc::vec::Vec<LoadSegment>, BinaryError> {
    let phdr_size = match bits {
        Bitness::Bits32 => PHDR32_SIZE,
        Bitness::Bits64 => PHDR64_SIZE,
    };
    let seg_type_off = 0usize;
    let mut segments = alloc::vec::Vec::new();
    for i in 0..header.e_phnum {
        let off = header.e_phoff as usize + usize::from(i) * usize::from(header.e_phentsize);
        let seg_type = le_u32(data, off + seg_type_off);
        if seg_type != PT_LOAD {
            continue;
        }
        let seg = parse_phdr(data, off, bits);
        if seg.file_offset as u64 + seg.filesz > data.len() as u64 {
            return Err(BinaryError::Truncated);
        }
        let _ = phdr_size;
        segments.push(seg);
    }
    Ok(segments)
}

#[derive(Debug, Clone, Copy)]
pub struct LoadResult {
    pub physical_base: PhyAddr,
    pub physical_ceiling: PhyAddr,
    pub virtual_base: VirtAddr,
    pub entrypoint: VirtAddr,
    pub bitness: Bitness,
    pub kernel_range_is_direct_map: bool,
}

/// Load `data` per spec §4.4: validates PT_LOAD segments, either places them at their
/// fixed on-disk addresses or (64-bit only) allocates a single anywhere-placed region for a
/// relocatable higher-half kernel, and zero-fills BSS.
pub fn elf_load(
    data: &[u8],
    allocate_anywhere: bool,
    mem_type: BootMemoryType,
    services: &mut dyn MemoryServices,
) -> Result<LoadResult, Fatal> {
    let bitness = elf_bitness(data)?;
    if allocate_anywhere && bitness != Bitness::Bits64 {
        return Err(BinaryError::UnsupportedClass.into());
    }

    let header = Header::parse(data, bitness)?;
    let segments = load_segments(data, &header, bitness)?;
    if segments.is_empty() {
        return Err(BinaryError::NoLoadSegments.into());
    }

    let virt_lo = segments.iter().map(|s| s.vaddr).min().unwrap();
    let virt_hi = segments
        .iter()
        .map(|s| s.vaddr + s.memsz)
        .max()
        .unwrap();

    // Reject overlap: sort by vaddr and ensure each segment starts at or after the previous
    // one's end.
    let mut ordered: alloc::vec::Vec<&LoadSegment> = segments.iter().collect();
    ordered.sort_by_key(|s| s.vaddr);
    for pair in ordered.windows(2) {
        if pair[1].vaddr < pair[0].vaddr + pair[0].memsz {
            return Err(BinaryError::OverlappingSegments.into());
        }
    }

    if header.e_entry < virt_lo || header.e_entry >= virt_hi {
        return Err(BinaryError::EntryOutOfRange.into());
    }

    let virtual_base = VirtAddr::new(virt_lo);
    let span = virt_hi - virt_lo;
    let span_pages = (span.div_ceil(4096)).max(1) as usize;

    let (physical_base, kernel_range_is_direct_map) = if allocate_anywhere {
        let phys = services
            .allocate_pages(Criticality::Critical, span_pages, mem_type)
            .ok_or(ResourceError::AllocationFailed)?;
        (phys, false)
    } else {
        let is_direct_map = crate::consts::is_higher_half(VirtAddr::new(virt_lo));
        let fixed = if is_direct_map {
            PhyAddr::from(virt_lo - crate::consts::HIGHER_HALF_BASE)
        } else {
            PhyAddr::from(virt_lo)
        };
        if !services.allocate_pages_at(fixed, span_pages, mem_type) {
            return Err(ResourceError::AllocationFailed.into());
        }
        (fixed, is_direct_map)
    };

    let physical_ceiling = physical_base.align_up(Alignment::from(4096u32)) + span_pages as u64 * 4096;

    // Paging is not yet active at this point in boot: physical addresses are valid pointers,
    // so segments are placed with a direct copy rather than through any mapped-memory
    // capability. Skipped under host unit tests, which have no such physical memory to write
    // into; those tests exercise address/layout computation only.
    #[cfg(not(test))]
    for seg in &segments {
        let dest = physical_base + (seg.vaddr - virt_lo);
        unsafe {
            let dest_ptr = dest.as_mut_ptr::<u8>();
            let src = &data[seg.file_offset..seg.file_offset + seg.filesz as usize];
            core::ptr::copy_nonoverlapping(src.as_ptr(), dest_ptr, src.len());
            if seg.memsz > seg.filesz {
                core::ptr::write_bytes(dest_ptr.add(seg.filesz as usize), 0, (seg.memsz - seg.filesz) as usize);
            }
        }
    }

    Ok(LoadResult {
        physical_base,
        physical_ceiling,
        virtual_base,
        entrypoint: VirtAddr::new(header.e_entry),
        bitness,
        kernel_range_is_direct_map,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mem::services::mock::MockMemoryServices;
    use alloc::vec::Vec;

    fn make_elf32_header(entry: u32, phoff: u32, phnum: u16) -> Vec<u8> {
        let mut buf = alloc::vec![0u8; EHDR32_SIZE];
        buf[0..4].copy_from_slice(&ELF_MAGIC);
        buf[4] = ELFCLASS32;
        buf[5] = ELFDATA2LSB;
        buf[16..18].copy_from_slice(&ET_EXEC.to_le_bytes());
        buf[24..28].copy_from_slice(&entry.to_le_bytes());
        buf[28..32].copy_from_slice(&phoff.to_le_bytes());
        buf[42..44].copy_from_slice(&(PHDR32_SIZE as u16).to_le_bytes());
        buf[44..46].copy_from_slice(&phnum.to_le_bytes());
        buf
    }

    fn append_phdr32(buf: &mut Vec<u8>, p_type: u32, offset: u32, vaddr: u32, filesz: u32, memsz: u32) {
        let start = buf.len();
        buf.resize(start + PHDR32_SIZE, 0);
        let b = &mut buf[start..];
        b[0..4].copy_from_slice(&p_type.to_le_bytes());
        b[4..8].copy_from_slice(&offset.to_le_bytes());
        b[8..12].copy_from_slice(&vaddr.to_le_bytes());
        b[16..20].copy_from_slice(&filesz.to_le_bytes());
        b[20..24].copy_from_slice(&memsz.to_le_bytes());
    }

    fn make_elf64_header(entry: u64, phoff: u64, phnum: u16) -> Vec<u8> {
        let mut buf = alloc::vec![0u8; EHDR64_SIZE];
        buf[0..4].copy_from_slice(&ELF_MAGIC);
        buf[4] = ELFCLASS64;
        buf[5] = ELFDATA2LSB;
        buf[16..18].copy_from_slice(&ET_EXEC.to_le_bytes());
        buf[24..32].copy_from_slice(&entry.to_le_bytes());
        buf[32..40].copy_from_slice(&phoff.to_le_bytes());
        buf[54..56].copy_from_slice(&(PHDR64_SIZE as u16).to_le_bytes());
        buf[56..58].copy_from_slice(&phnum.to_le_bytes());
        buf
    }

    fn append_phdr64(buf: &mut Vec<u8>, p_type: u32, offset: u64, vaddr: u64, filesz: u64, memsz: u64) {
        let start = buf.len();
        buf.resize(start + PHDR64_SIZE, 0);
        let b = &mut buf[start..];
        b[0..4].copy_from_slice(&p_type.to_le_bytes());
        b[8..16].copy_from_slice(&offset.to_le_bytes());
        b[16..24].copy_from_slice(&vaddr.to_le_bytes());
        b[32..40].copy_from_slice(&filesz.to_le_bytes());
        b[40..48].copy_from_slice(&memsz.to_le_bytes());
    }

    #[test]
    fn bitness_detection() {
        let buf32 = make_elf32_header(0x1000, EHDR32_SIZE as u32, 0);
        assert_eq!(elf_bitness(&buf32).unwrap(), Bitness::Bits32);
        let buf64 = make_elf64_header(0x1000, EHDR64_SIZE as u64, 0);
        assert_eq!(elf_bitness(&buf64).unwrap(), Bitness::Bits64);
        assert!(elf_bitness(&[0u8; 4]).is_err());
    }

    #[test]
    fn fixed_32bit_load_reports_exact_addresses() {
        let mut buf = make_elf32_header(0x100000, EHDR32_SIZE as u32, 1);
        append_phdr32(&mut buf, PT_LOAD, EHDR32_SIZE as u32 + PHDR32_SIZE as u32, 0x100000, 0x4000, 0x4000);
        buf.resize(buf.len() + 0x4000, 0xAB);

        let mut services = MockMemoryServices::new(Vec::new());
        let result = elf_load(&buf, false, BootMemoryType::KernelBinary, &mut services).unwrap();
        assert_eq!(result.bitness, Bitness::Bits32);
        assert_eq!(result.virtual_base.as_u64(), 0x100000);
        assert_eq!(result.physical_base.as_u64(), 0x100000);
        assert!(!result.kernel_range_is_direct_map);
    }

    #[test]
    fn fixed_higher_half_load_is_rebased_through_the_direct_map() {
        let entry = crate::consts::HIGHER_HALF_BASE + 0x100000;
        let mut buf = make_elf64_header(entry, EHDR64_SIZE as u64, 1);
        append_phdr64(&mut buf, PT_LOAD, EHDR64_SIZE as u64 + PHDR64_SIZE as u64, entry, 0x1000, 0x1000);
        buf.resize(buf.len() + 0x1000, 0xCD);

        let mut services = MockMemoryServices::new(Vec::new());
        let result = elf_load(&buf, false, BootMemoryType::KernelBinary, &mut services).unwrap();
        assert!(result.kernel_range_is_direct_map);
        assert_eq!(result.physical_base.as_u64(), entry - crate::consts::HIGHER_HALF_BASE);
    }

    #[test]
    fn allocate_anywhere_64bit_places_physical_base_independently() {
        let entry = crate::consts::HIGHER_HALF_BASE + 0x100000;
        let mut buf = make_elf64_header(entry, EHDR64_SIZE as u64, 1);
        append_phdr64(&mut buf, PT_LOAD, EHDR64_SIZE as u64 + PHDR64_SIZE as u64, entry, 0x1000, 0x1000);
        buf.resize(buf.len() + 0x1000, 0xCD);

        let mut services = MockMemoryServices::new(Vec::new());
        let result = elf_load(&buf, true, BootMemoryType::KernelBinary, &mut services).unwrap();
        assert_eq!(result.bitness, Bitness::Bits64);
        assert!(!result.kernel_range_is_direct_map);
        assert_ne!(result.physical_base.as_u64(), entry);
    }

    #[test]
    fn allocate_anywhere_rejected_for_32bit() {
        let buf = make_elf32_header(0x100000, EHDR32_SIZE as u32, 0);
        let mut services = MockMemoryServices::new(Vec::new());
        assert!(elf_load(&buf, true, BootMemoryType::KernelBinary, &mut services).is_err());
    }

    #[test]
    fn no_load_segments_is_an_error() {
        let buf = make_elf64_header(0x100000, EHDR64_SIZE as u64, 0);
        let mut services = MockMemoryServices::new(Vec::new());
        assert!(matches!(
            elf_load(&buf, false, BootMemoryType::KernelBinary, &mut services),
            Err(Fatal::Binary(BinaryError::NoLoadSegments))
        ));
    }

    #[test]
    fn bss_memsz_greater_than_filesz_is_accepted() {
        let mut buf = make_elf64_header(0x100000, EHDR64_SIZE as u64, 1);
        append_phdr64(&mut buf, PT_LOAD, EHDR64_SIZE as u64 + PHDR64_SIZE as u64, 0x100000, 0x10, 0x2000);
        buf.resize(buf.len() + 0x10, 0xEE);

        let mut services = MockMemoryServices::new(Vec::new());
        let result = elf_load(&buf, false, BootMemoryType::KernelBinary, &mut services).unwrap();
        assert!(result.physical_ceiling.as_u64() >= result.physical_base.as_u64() + 0x2000);
    }
}
