//! Memory-map entry record shared between the firmware snapshot and the protocol's
//! `MEMORY_MAP` attribute.
//!
//! Grounded on the teacher's `mem/e820.rs` `AddressRangeDescriptor` (a flat, `repr(C)`,
//! firmware-defined record later coerced to a boot-protocol type), but laid out exactly as
//! spec §6 fixes it: 24 bytes, little-endian, `{u64 phys, u64 size, u32 type, u32 pad}`.

use crate::mem::addr::PhyAddr;
use crate::mem::services::BootMemoryType;
use bytemuck::{Pod, Zeroable};

#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct MemoryMapEntry {
    pub physical_address: u64,
    pub size_in_bytes: u64,
    pub mem_type: u32,
    _pad: u32,
}

impl MemoryMapEntry {
    pub fn new(addr: PhyAddr, size_in_bytes: u64, mem_type: BootMemoryType) -> Self {
        Self {
            physical_address: addr.as_u64(),
            size_in_bytes,
            mem_type: u32::from(mem_type),
            _pad: 0,
        }
    }

    pub fn mem_type(&self) -> BootMemoryType {
        BootMemoryType::from(self.mem_type)
    }
}

/// Coerce a firmware-native memory map entry into the boot protocol's type space.
///
/// Firmware types up to and including `AcpiNvs` pass through unchanged; the loader's own
/// reserved types (`KernelBinary`..`LoaderPermanent`) also pass through since the loader is
/// the one producing them. Anything else firmware reports (OEM-specific, unknown future
/// types) is coerced to `Reserved` so the kernel never has to special-case values it does
/// not recognize.
pub fn coerce_firmware_type(raw: u32) -> BootMemoryType {
    match raw {
        0..=4 | 16..=20 => BootMemoryType::from(raw),
        _ => BootMemoryType::Reserved,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_known_type() {
        let entry = MemoryMapEntry::new(PhyAddr::from(0x1000u64), 0x2000, BootMemoryType::KernelBinary);
        assert_eq!(entry.mem_type(), BootMemoryType::KernelBinary);
        assert_eq!(entry.physical_address, 0x1000);
        assert_eq!(entry.size_in_bytes, 0x2000);
    }

    #[test]
    fn unknown_firmware_type_coerces_to_reserved() {
        assert_eq!(coerce_firmware_type(0xFFFF), BootMemoryType::Reserved);
        assert_eq!(coerce_firmware_type(2), BootMemoryType::AcpiReclaimable);
    }
}
