//! Architecture-specific jump into the kernel (spec §4.9, §4.7 step 7).
//!
//! Explicitly out of scope as hand-verifiable logic: the real transfer of control is a single
//! `asm!` sequence that never returns. The teacher shows the same split elsewhere — real-mode
//! `pswitch::gdt::load_gdt` wraps a bare `lgdt` in an `asm!` block, and
//! `x86::usermode::usermode_exec` builds a fake interrupt frame and drops into `iret` — both
//! leave the marshalling (segment selectors, stack frame contents) in ordinary Rust and keep
//! only the irreducible instruction sequence behind `asm!`. `ArchJump` does the same split at
//! trait granularity so `loader::run`'s ordering and parameter marshalling is fully exercised
//! on the host against a mock, while the real sequences are gated per target and never enter a
//! test build.

pub mod mock;

use crate::mem::addr::{MemoryAddress, PhyAddr, VirtAddr};

/// Parameters carried across the jump (spec §4.7 step 7).
#[derive(Debug, Clone, Copy)]
pub struct JumpParams {
    pub entrypoint: VirtAddr,
    pub stack_top: VirtAddr,
    pub attribute_array: VirtAddr,
    pub magic: u64,
}

/// The final, architecture-specific transfer of control. Neither method returns.
pub trait ArchJump {
    /// Far-jump to `entrypoint` with `stack_top` loaded and `(attribute_array, magic)` placed
    /// in calling-convention positions.
    fn jump32(&self, params: JumpParams) -> !;

    /// Load `page_table`, switch to long mode if not already there, then jump to `entrypoint`
    /// with `stack_top`, `attribute_array`, and `magic`.
    fn jump64(&self, params: JumpParams, page_table: PhyAddr) -> !;
}

#[cfg(all(target_arch = "x86_64", not(test)))]
pub struct NativeArchJump;

#[cfg(all(target_arch = "x86_64", not(test)))]
impl ArchJump for NativeArchJump {
    fn jump32(&self, params: JumpParams) -> ! {
        unsafe {
            core::arch::asm!(
                "mov esp, {stack:e}",
                "push {magic:e}",
                "push {array:e}",
                "jmp {entry:e}",
                stack = in(reg) params.stack_top.as_u64() as u32,
                magic = in(reg) params.magic as u32,
                array = in(reg) params.attribute_array.as_u64() as u32,
                entry = in(reg) params.entrypoint.as_u64() as u32,
                options(noreturn),
            )
        }
    }

    fn jump64(&self, params: JumpParams, page_table: PhyAddr) -> ! {
        unsafe {
            core::arch::asm!(
                "mov cr3, {pt}",
                "mov rsp, {stack}",
                "mov rsi, {array}",
                "mov rdx, {magic}",
                "jmp {entry}",
                pt = in(reg) page_table.as_u64(),
                stack = in(reg) params.stack_top.as_u64(),
                array = in(reg) params.attribute_array.as_u64(),
                magic = in(reg) params.magic,
                entry = in(reg) params.entrypoint.as_u64(),
                options(noreturn),
            )
        }
    }
}
