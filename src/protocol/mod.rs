//! The handover protocol: attribute array layout, the reserve/commit memory-map snapshot
//! loop, and the state-typed handle that forbids allocating after the snapshot (spec §4.7, §6).
//!
//! Record layout follows the teacher's `boot::multiboot::mb_information::MultibootInformation`
//! in spirit — a single `#[repr(C)] #[derive(Pod, Zeroable)]` struct per record kind, built and
//! copied into a firmware-allocated buffer — generalized from one fixed multiboot struct to a
//! tagged, variable-count attribute array as spec §6 requires.

pub mod records;

use crate::consts::{direct_map, HIGHER_HALF_BASE};
use crate::error::{Fatal, ProtocolError, ResourceError};
use crate::mem::addr::{MemoryAddress, PhyAddr, VirtAddr};
use crate::mem::memmap::MemoryMapEntry;
use crate::mem::services::{BootMemoryType, Criticality, MemoryServices};
use crate::video::FramebufferDescriptor;
use alloc::boxed::Box;
use alloc::vec;
use alloc::vec::Vec;
use records::*;

/// A bound on the reserve/commit retry loop (spec §4.7 step 2): firmware memory maps only ever
/// grow by a bounded number of entries per allocation, so a fixed retry count is enough to
/// reach a stable reservation; anything beyond it is treated as a pathological firmware.
pub const MAX_MAP_RETRIES: u32 = 8;

pub const ULTRA_MAGIC: u64 = 0xc7b1_dd30_df4c_8605;

pub struct ModuleInput<'a> {
    pub physical_base: PhyAddr,
    pub size: u64,
    pub name: Option<&'a str>,
}

pub struct HandoverInputs<'a> {
    pub kernel_entrypoint: VirtAddr,
    pub modules: &'a [ModuleInput<'a>],
    pub cmdline: Option<&'a str>,
    pub framebuffer: Option<FramebufferDescriptor>,
}

impl<'a> HandoverInputs<'a> {
    fn higher_half(&self) -> bool {
        self.kernel_entrypoint.as_u64() >= HIGHER_HALF_BASE
    }
}

fn align_up8(n: usize) -> usize {
    (n + 7) & !7
}

struct Layout {
    total_static: usize,
    cmdline_record_len: usize,
}

fn plan_layout(inputs: &HandoverInputs) -> Layout {
    let mut total = core::mem::size_of::<ArrayHeader>();
    total += core::mem::size_of::<PlatformInfoRecord>();
    total += core::mem::size_of::<KernelInfoRecord>();
    total += inputs.modules.len() * core::mem::size_of::<ModuleInfoRecord>();

    let cmdline_record_len = inputs
        .cmdline
        .map(|s| align_up8(core::mem::size_of::<AttributeHeader>() + s.len() + 1))
        .unwrap_or(0);
    total += cmdline_record_len;

    if inputs.framebuffer.is_some() {
        total += core::mem::size_of::<FramebufferInfoRecord>();
    }
    total += core::mem::size_of::<MemoryMapHeaderRecord>();

    Layout {
        total_static: total,
        cmdline_record_len,
    }
}

fn write_fixed_name(buf: &mut [u8; 32], name: Option<&str>) {
    if let Some(name) = name {
        let bytes = name.as_bytes();
        let n = bytes.len().min(31);
        buf[..n].copy_from_slice(&bytes[..n]);
    }
}

fn build_attribute_bytes(inputs: &HandoverInputs, layout: &Layout, attribute_count: u32) -> Vec<u8> {
    let mut out = Vec::with_capacity(layout.total_static);

    let header = ArrayHeader {
        pad: 0,
        attribute_count,
    };
    out.extend_from_slice(bytemuck::bytes_of(&header));

    let mut loader_name = [0u8; 32];
    write_fixed_name(&mut loader_name, Some("HyperLoader v0.1"));
    let platform = PlatformInfoRecord {
        header: AttributeHeader {
            type_: TYPE_PLATFORM_INFO,
            size_in_bytes: core::mem::size_of::<PlatformInfoRecord>() as u32,
        },
        loader_name,
    };
    out.extend_from_slice(bytemuck::bytes_of(&platform));

    let kernel = KernelInfoRecord {
        header: AttributeHeader {
            type_: TYPE_KERNEL_INFO,
            size_in_bytes: core::mem::size_of::<KernelInfoRecord>() as u32,
        },
        entrypoint: inputs.kernel_entrypoint.as_u64(),
        higher_half: u32::from(inputs.higher_half()),
        _pad: 0,
    };
    out.extend_from_slice(bytemuck::bytes_of(&kernel));

    for module in inputs.modules {
        let mut name = [0u8; 32];
        write_fixed_name(&mut name, module.name);
        let record = ModuleInfoRecord {
            header: AttributeHeader {
                type_: TYPE_MODULE_INFO,
                size_in_bytes: core::mem::size_of::<ModuleInfoRecord>() as u32,
            },
            physical_base: module.physical_base.as_u64(),
            size: module.size,
            name,
        };
        out.extend_from_slice(bytemuck::bytes_of(&record));
    }

    if let Some(cmdline) = inputs.cmdline {
        let record_header = AttributeHeader {
            type_: TYPE_COMMAND_LINE,
            size_in_bytes: layout.cmdline_record_len as u32,
        };
        out.extend_from_slice(bytemuck::bytes_of(&record_header));
        out.extend_from_slice(cmdline.as_bytes());
        out.push(0);
        while out.len() % 8 != 0 {
            out.push(0);
        }
    }

    if let Some(fb) = &inputs.framebuffer {
        let fb_phys = if inputs.higher_half() {
            direct_map(fb.address.as_u64()).as_u64()
        } else {
            fb.address.as_u64()
        };
        let record = FramebufferInfoRecord {
            header: AttributeHeader {
                type_: TYPE_FRAMEBUFFER_INFO,
                size_in_bytes: core::mem::size_of::<FramebufferInfoRecord>() as u32,
            },
            address: fb_phys,
            width: fb.width,
            height: fb.height,
            bpp: u32::from(fb.bpp),
            pitch: fb.pitch,
        };
        out.extend_from_slice(bytemuck::bytes_of(&record));
    }

    out
}

/// Append the `MEMORY_MAP` record and its entries to an already-built attribute buffer.
/// `size_in_bytes`/`entry_count` are derived from `final_count`, the number of entries actually
/// appended, not from the (generally larger) reservation `map_dest.len()` — spec §8 requires the
/// array's declared size to match its real contents byte for byte.
fn append_memory_map(buf: &mut Vec<u8>, map_dest: &[MemoryMapEntry], final_count: usize, entry_stride: usize) {
    let memmap_header = MemoryMapHeaderRecord {
        header: AttributeHeader {
            type_: TYPE_MEMORY_MAP,
            size_in_bytes: (core::mem::size_of::<MemoryMapHeaderRecord>() + final_count * entry_stride) as u32,
        },
        entry_count: final_count as u32,
        entry_stride: entry_stride as u32,
    };
    buf.extend_from_slice(bytemuck::bytes_of(&memmap_header));
    for entry in map_dest.iter().take(final_count) {
        buf.extend_from_slice(bytemuck::bytes_of(entry));
    }
}

/// Opaque firmware state produced by the memory-map snapshot. The only operation it exposes is
/// [`HandoverKey::handover`]; there is no way to reach an allocator call through it, which is
/// exactly the invariant spec §4.7 requires between the snapshot and the jump.
pub struct HandoverKey {
    raw_key: u64,
    services: Box<dyn MemoryServices>,
}

impl HandoverKey {
    pub fn handover(mut self) -> Result<(), ProtocolError> {
        if self.services.handover(self.raw_key) {
            Ok(())
        } else {
            Err(ProtocolError::HandoverRejected)
        }
    }
}

pub struct FinalizedHandover {
    pub physical_array: PhyAddr,
    pub kernel_visible_array: VirtAddr,
    pub key: HandoverKey,
}

/// Build the attribute array and take the final, stable memory-map snapshot.
///
/// Consumes `services` by value: once this returns, the only thing that can be done with the
/// firmware allocator is surfaced through [`HandoverKey::handover`], which takes no further
/// allocation arguments. Nothing in `loader` can accidentally allocate between this call and
/// the architecture jump.
pub fn finalize_memory_map(
    mut services: Box<dyn MemoryServices>,
    inputs: &HandoverInputs,
) -> Result<FinalizedHandover, Fatal> {
    let layout = plan_layout(inputs);
    let entry_stride = core::mem::size_of::<MemoryMapEntry>();

    let mut reserved_entries = services.map_entry_count() + 1;
    let (array_phys, pages) = 'outer: {
        for attempt in 1..=MAX_MAP_RETRIES {
            let total_bytes = layout.total_static + reserved_entries * entry_stride;
            let pages = (total_bytes as u64).div_ceil(4096).max(1) as usize;
            let phys = services
                .allocate_pages(Criticality::Critical, pages, BootMemoryType::LoaderPermanent)
                .ok_or(ResourceError::AllocationFailed)?;

            let current_count = services.map_entry_count();
            if current_count <= reserved_entries {
                break 'outer (phys, pages);
            }
            services.free_pages(phys, pages);
            reserved_entries = current_count + 1;
            let _ = attempt;
        }
        return Err(ProtocolError::MapUnstable.into());
    };

    let attribute_count = 3
        + inputs.modules.len() as u32
        + u32::from(inputs.cmdline.is_some())
        + u32::from(inputs.framebuffer.is_some());
    let mut buf = build_attribute_bytes(inputs, &layout, attribute_count);

    let mut map_dest = vec![MemoryMapEntry::new(PhyAddr::new(0), 0, BootMemoryType::Usable); reserved_entries];
    let (final_count, raw_key) = services.copy_map(&mut map_dest);
    if final_count > reserved_entries {
        return Err(ProtocolError::MapUnstable.into());
    }

    append_memory_map(&mut buf, &map_dest, final_count, entry_stride);

    #[cfg(not(test))]
    unsafe {
        let dest = array_phys.as_mut_ptr::<u8>();
        core::ptr::write_bytes(dest, 0, pages * 4096);
        core::ptr::copy_nonoverlapping(buf.as_ptr(), dest, buf.len());
    }
    #[cfg(test)]
    let _ = (&buf, pages);

    let kernel_visible_array = if inputs.higher_half() {
        direct_map(array_phys.as_u64())
    } else {
        VirtAddr::new(array_phys.as_u64())
    };

    Ok(FinalizedHandover {
        physical_array: array_phys,
        kernel_visible_array,
        key: HandoverKey { raw_key, services },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mem::services::mock::MockMemoryServices;

    fn inputs() -> HandoverInputs<'static> {
        HandoverInputs {
            kernel_entrypoint: VirtAddr::new(0x10_0000),
            modules: &[],
            cmdline: None,
            framebuffer: None,
        }
    }

    #[test]
    fn stable_map_commits_on_first_attempt() {
        let services: Box<dyn MemoryServices> = Box::new(MockMemoryServices::new(Vec::new()));
        let result = finalize_memory_map(services, &inputs()).unwrap();
        assert!(result.physical_array.as_u64() > 0);
    }

    #[test]
    fn growing_map_retries_until_stable() {
        let mut mock = MockMemoryServices::new(Vec::new());
        mock.grow_map_on_allocate = true;
        let services: Box<dyn MemoryServices> = Box::new(mock);
        let result = finalize_memory_map(services, &inputs());
        assert!(result.is_ok());
    }

    #[test]
    fn handover_key_exposes_only_handover() {
        let services: Box<dyn MemoryServices> = Box::new(MockMemoryServices::new(Vec::new()));
        let result = finalize_memory_map(services, &inputs()).unwrap();
        assert!(result.key.handover().is_ok());
    }

    #[test]
    fn higher_half_kernel_rebases_array_pointer() {
        let mut input = inputs();
        input.kernel_entrypoint = VirtAddr::new(HIGHER_HALF_BASE + 0x1000);
        let services: Box<dyn MemoryServices> = Box::new(MockMemoryServices::new(Vec::new()));
        let result = finalize_memory_map(services, &input).unwrap();
        assert!(result.kernel_visible_array.as_u64() >= crate::consts::DIRECT_MAP_BASE);
    }

    /// Walks an attribute array record by record (spec §8: "the attribute array's total size
    /// equals the sum of its record `size_in_bytes` fields plus the 8-byte header") and returns
    /// the offset just past the last record read, so a caller can assert it lines up with the
    /// buffer's actual length.
    fn sum_declared_record_sizes(buf: &[u8], attribute_count: u32) -> usize {
        let mut offset = core::mem::size_of::<ArrayHeader>();
        for _ in 0..attribute_count {
            let header_bytes: [u8; 8] = buf[offset..offset + 8].try_into().unwrap();
            let header: AttributeHeader = bytemuck::pod_read_unaligned(&header_bytes);
            offset += header.size_in_bytes as usize;
        }
        offset
    }

    #[test]
    fn memory_map_record_size_matches_only_the_entries_actually_appended() {
        let map = alloc::vec![
            MemoryMapEntry::new(PhyAddr::new(0), 0x1000, BootMemoryType::Usable),
            MemoryMapEntry::new(PhyAddr::new(0x1000), 0x2000, BootMemoryType::Reserved),
        ];
        let entry_stride = core::mem::size_of::<MemoryMapEntry>();
        let input = inputs();
        let layout = plan_layout(&input);
        // platform + kernel + memory-map; this input has no modules/cmdline/framebuffer.
        let attribute_count = 3;
        let mut buf = build_attribute_bytes(&input, &layout, attribute_count);

        // Reserve headroom for one more entry than will actually be copied, mirroring the
        // retry loop's `current_count + 1` reservation, and confirm the declared size tracks
        // `final_count` (2), not the reservation (3).
        let mut map_dest = map.clone();
        map_dest.push(MemoryMapEntry::new(PhyAddr::new(0), 0, BootMemoryType::Usable));
        let final_count = map.len();
        append_memory_map(&mut buf, &map_dest, final_count, entry_stride);

        let memmap_record_offset = sum_declared_record_sizes(&buf, attribute_count - 1);
        let header_bytes: [u8; 8] = buf[memmap_record_offset..memmap_record_offset + 8].try_into().unwrap();
        let header: AttributeHeader = bytemuck::pod_read_unaligned(&header_bytes);
        assert_eq!(header.type_, TYPE_MEMORY_MAP);
        assert_eq!(
            header.size_in_bytes as usize,
            core::mem::size_of::<MemoryMapHeaderRecord>() + final_count * entry_stride
        );

        let total = sum_declared_record_sizes(&buf, attribute_count);
        assert_eq!(total, buf.len());
    }
}
