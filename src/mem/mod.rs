//! Memory model: typed addresses, the allocator capability, and memory-map records.

pub mod addr;
pub mod memmap;
pub mod services;

pub use addr::{Alignment, MemoryAddress, MemoryError, PhyAddr, PhyAddr32, VirtAddr};
