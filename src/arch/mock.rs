//! Host-side `ArchJump` double. Since the trait's methods never return, the mock records the
//! parameters it was called with into a cell and then panics; tests drive the call through
//! `std::panic::catch_unwind` and inspect the cell afterward, rather than trying to observe a
//! return value that the real contract never produces.
#![cfg(test)]

use super::{ArchJump, JumpParams};
use crate::mem::addr::PhyAddr;
use core::cell::RefCell;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RecordedJump {
    Jump32(JumpParams),
    Jump64(JumpParams, PhyAddr),
}

impl PartialEq for JumpParams {
    fn eq(&self, other: &Self) -> bool {
        self.entrypoint == other.entrypoint
            && self.stack_top == other.stack_top
            && self.attribute_array == other.attribute_array
            && self.magic == other.magic
    }
}

#[derive(Default)]
pub struct MockArchJump {
    pub recorded: RefCell<Option<RecordedJump>>,
}

impl ArchJump for MockArchJump {
    fn jump32(&self, params: JumpParams) -> ! {
        *self.recorded.borrow_mut() = Some(RecordedJump::Jump32(params));
        panic!("mock jump32 reached (expected: test caught this via catch_unwind)");
    }

    fn jump64(&self, params: JumpParams, page_table: PhyAddr) -> ! {
        *self.recorded.borrow_mut() = Some(RecordedJump::Jump64(params, page_table));
        panic!("mock jump64 reached (expected: test caught this via catch_unwind)");
    }
}
