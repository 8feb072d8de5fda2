//! Typed physical and virtual addresses.
//!
//! Kept close to the teacher's `mem` module: distinct newtypes instead of bare integers so a
//! physical address can never silently be added to a virtual one. Canonicalization
//! (`VirtAddr::new` sign-extends bit 47) and the 52-bit physical mask (`PhyAddr::new`) are
//! carried verbatim since they encode real x86-64 addressing invariants, not loader policy.

use alloc::format;
use bytemuck::{Pod, Zeroable};
use core::fmt::{Display, Formatter};
use core::ops::{Add, AddAssign, BitAnd, Rem, Shr, Sub};
use core::ptr::NonNull;

#[derive(Clone, Copy, Debug)]
pub struct Alignment(u64);

impl Alignment {
    pub const ALIGN_4KB: Self = Self(1 << 12);
    pub const ALIGN_2MB: Self = Self(1 << 21);
    pub const ALIGN_1GB: Self = Self(1 << 30);
}

impl From<u32> for Alignment {
    fn from(value: u32) -> Self {
        Self(u64::from(value))
    }
}

impl From<u64> for Alignment {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl TryFrom<Alignment> for u32 {
    type Error = MemoryError;

    fn try_from(value: Alignment) -> Result<Self, Self::Error> {
        u32::try_from(value.0).map_err(|_| MemoryError::InvalidAlignment)
    }
}

impl TryFrom<Alignment> for u64 {
    type Error = MemoryError;

    fn try_from(value: Alignment) -> Result<Self, Self::Error> {
        Ok(value.0)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, PartialOrd)]
pub struct VirtAddr(u64);

impl VirtAddr {
    pub const fn new(addr: u64) -> Self {
        let sign_extend = (addr & (1 << 47)) >> 47;
        Self(addr | sign_extend * (0xFFFF << 48))
    }

    pub const fn as_u64(self) -> u64 {
        self.0
    }

    pub const fn to_mut_ptr<T>(self) -> *mut T {
        self.0 as *mut T
    }

    pub fn is_aligned_with(&self, align: Alignment) -> bool {
        self.0 % align.0 == 0
    }

    pub fn align_down(self, align: Alignment) -> Self {
        Self::new(self.0 & !(align.0 - 1))
    }

    pub fn align_up(self, align: Alignment) -> Self {
        Self::new((self.0 + align.0 - 1) & !(align.0 - 1))
    }
}

impl Add<u64> for VirtAddr {
    type Output = Self;
    fn add(self, rhs: u64) -> Self::Output {
        VirtAddr::new(self.0 + rhs)
    }
}

impl Sub<VirtAddr> for VirtAddr {
    type Output = u64;
    fn sub(self, rhs: VirtAddr) -> Self::Output {
        self.0 - rhs.0
    }
}

impl From<u64> for VirtAddr {
    fn from(value: u64) -> Self {
        VirtAddr::new(value)
    }
}

impl From<VirtAddr> for u64 {
    fn from(value: VirtAddr) -> Self {
        value.0
    }
}

impl Display for VirtAddr {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        f.pad(&format!("{:#018x}", self.0))
    }
}

#[derive(Clone, Copy, Debug, Default, Ord, PartialOrd, Eq, PartialEq, Pod, Zeroable)]
#[repr(transparent)]
pub struct PhyAddr(u64);

impl PhyAddr {
    pub const MAX_32: Self = Self(0xFFFF_FFFF);

    pub const fn new(addr: u64) -> Self {
        Self(addr % (1 << 52))
    }

    pub const fn as_u64(self) -> u64 {
        self.0
    }

    pub fn align_down(self, align: Alignment) -> Self {
        Self::new(self.0 & !(align.0 - 1))
    }

    pub fn align_up(self, align: Alignment) -> Self {
        Self::new((self.0 + align.0 - 1) & !(align.0 - 1))
    }
}

impl Display for PhyAddr {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        f.pad(&format!("{:#018x}", self.0))
    }
}

impl MemoryAddress for PhyAddr {
    const WIDTH: u64 = 8;
    const NULL_PTR: Self = Self(0);
    type AsPrimitive = u64;

    fn as_ptr<T>(&self) -> *const T {
        self.0 as *const T
    }

    fn as_mut_ptr<T>(&self) -> *mut T {
        self.0 as *mut T
    }

    fn is_null(&self) -> bool {
        self.0 == 0
    }
}

impl From<u64> for PhyAddr {
    fn from(value: u64) -> Self {
        Self::new(value)
    }
}

impl From<PhyAddr32> for PhyAddr {
    fn from(value: PhyAddr32) -> Self {
        Self::new(value.0.into())
    }
}

impl Add<u64> for PhyAddr {
    type Output = PhyAddr;
    fn add(self, rhs: u64) -> Self::Output {
        Self::new(self.0 + rhs)
    }
}

impl Add<PhyAddr> for PhyAddr {
    type Output = PhyAddr;
    fn add(self, rhs: PhyAddr) -> Self::Output {
        Self::new(self.0 + rhs.0)
    }
}

impl Sub<PhyAddr> for PhyAddr {
    type Output = u64;
    fn sub(self, rhs: PhyAddr) -> Self::Output {
        self.0 - rhs.0
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, PartialOrd, Pod, Zeroable)]
#[repr(transparent)]
pub struct PhyAddr32(u32);

impl PhyAddr32 {
    pub const fn new(addr: u32) -> Self {
        Self(addr)
    }
}

impl From<u32> for PhyAddr32 {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl From<PhyAddr32> for u32 {
    fn from(value: PhyAddr32) -> Self {
        value.0
    }
}

impl From<PhyAddr32> for u64 {
    fn from(value: PhyAddr32) -> Self {
        u64::from(value.0)
    }
}

impl AddAssign<u32> for PhyAddr32 {
    fn add_assign(&mut self, rhs: u32) {
        self.0 += rhs;
    }
}

impl BitAnd<u32> for PhyAddr32 {
    type Output = u32;
    fn bitand(self, rhs: u32) -> Self::Output {
        self.0 & rhs
    }
}

impl Shr<u32> for PhyAddr32 {
    type Output = u32;
    fn shr(self, rhs: u32) -> Self::Output {
        self.0 >> rhs
    }
}

impl Display for PhyAddr32 {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        f.pad(&format!("{:#010x}", self.0))
    }
}

impl MemoryAddress for PhyAddr32 {
    const WIDTH: u64 = 4;
    const NULL_PTR: Self = Self(0);
    type AsPrimitive = u32;

    fn as_ptr<T>(&self) -> *const T {
        self.0 as *const T
    }

    fn as_mut_ptr<T>(&self) -> *mut T {
        self.0 as *mut T
    }

    fn is_null(&self) -> bool {
        self.0 == 0
    }
}

impl MemoryAddress for VirtAddr {
    const WIDTH: u64 = 8;
    const NULL_PTR: Self = Self(0);
    type AsPrimitive = u64;

    fn as_ptr<T>(&self) -> *const T {
        self.0 as *const T
    }

    fn as_mut_ptr<T>(&self) -> *mut T {
        self.0 as *mut T
    }

    fn is_null(&self) -> bool {
        self.0 == 0
    }
}

pub trait MemoryAddress: Display + Sized + Clone + Copy + PartialEq + PartialOrd {
    const WIDTH: u64;
    const NULL_PTR: Self;

    type AsPrimitive: Into<Self> + From<Self> + TryFrom<Alignment, Error = MemoryError> + Rem<Output = Self::AsPrimitive>;

    fn as_ptr<T>(&self) -> *const T;
    fn as_mut_ptr<T>(&self) -> *mut T;

    fn as_nonnull_ptr<T>(&self) -> Result<NonNull<T>, MemoryError> {
        NonNull::new(self.as_mut_ptr()).ok_or(MemoryError::NullPointer)
    }

    fn is_null(&self) -> bool;

    fn is_aligned_with(&self, align: Alignment) -> Result<bool, MemoryError> {
        Ok(Into::<Self>::into(Self::AsPrimitive::from(*self) % Self::AsPrimitive::try_from(align)?).is_null())
    }
}

#[derive(Clone, Copy, Debug)]
pub enum MemoryError {
    InvalidAlignment,
    NullPointer,
}
