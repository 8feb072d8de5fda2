//! Attribute array record layout (spec §6). Each record is a plain `#[repr(C)]`,
//! `Pod`/`Zeroable` struct led by an [`AttributeHeader`], following the same shape as the
//! teacher's `MultibootInformation` fields but split one-struct-per-record-kind so the array
//! can hold a variable number of tagged records instead of one fixed layout.

use bytemuck::{Pod, Zeroable};

pub const TYPE_PLATFORM_INFO: u32 = 1;
pub const TYPE_KERNEL_INFO: u32 = 2;
pub const TYPE_MODULE_INFO: u32 = 3;
pub const TYPE_COMMAND_LINE: u32 = 4;
pub const TYPE_FRAMEBUFFER_INFO: u32 = 5;
pub const TYPE_MEMORY_MAP: u32 = 6;

#[derive(Debug, Clone, Copy, Pod, Zeroable)]
#[repr(C)]
pub struct ArrayHeader {
    pub pad: u32,
    pub attribute_count: u32,
}

#[derive(Debug, Clone, Copy, Pod, Zeroable)]
#[repr(C)]
pub struct AttributeHeader {
    pub type_: u32,
    pub size_in_bytes: u32,
}

#[derive(Debug, Clone, Copy, Pod, Zeroable)]
#[repr(C)]
pub struct PlatformInfoRecord {
    pub header: AttributeHeader,
    pub loader_name: [u8; 32],
}

#[derive(Debug, Clone, Copy, Pod, Zeroable)]
#[repr(C)]
pub struct KernelInfoRecord {
    pub header: AttributeHeader,
    pub entrypoint: u64,
    pub higher_half: u32,
    pub _pad: u32,
}

#[derive(Debug, Clone, Copy, Pod, Zeroable)]
#[repr(C)]
pub struct ModuleInfoRecord {
    pub header: AttributeHeader,
    pub physical_base: u64,
    pub size: u64,
    pub name: [u8; 32],
}

#[derive(Debug, Clone, Copy, Pod, Zeroable)]
#[repr(C)]
pub struct FramebufferInfoRecord {
    pub header: AttributeHeader,
    pub address: u64,
    pub width: u32,
    pub height: u32,
    pub bpp: u32,
    pub pitch: u32,
}

#[derive(Debug, Clone, Copy, Pod, Zeroable)]
#[repr(C)]
pub struct MemoryMapHeaderRecord {
    pub header: AttributeHeader,
    pub entry_count: u32,
    pub entry_stride: u32,
}
