//! Access to the inspected process's address space.
//!
//! The readers never own target memory. They go through [`ExternalMemory`],
//! which a debugger backs with a live process, a core file, or (in tests) a
//! handful of byte regions.

use crate::layout::Layout;
use std::collections::BTreeMap;
use std::fmt;
use std::ops::Add;
use thiserror::Error;

/// An address in the target's address space.
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Address(pub u64);

impl Address {
    /// Signed byte distance from `base` to `self`.
    pub fn offset_from(self, base: Address) -> i64 {
        self.0.wrapping_sub(base.0) as i64
    }

    pub fn offset(self, bytes: i64) -> Address {
        Address(self.0.wrapping_add(bytes as u64))
    }
}

impl Add<u64> for Address {
    type Output = Address;

    fn add(self, rhs: u64) -> Address {
        Address(self.0.wrapping_add(rhs))
    }
}

impl Add<usize> for Address {
    type Output = Address;

    fn add(self, rhs: usize) -> Address {
        self + rhs as u64
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MemoryError {
    #[error("cannot read {len} bytes at {addr}: not mapped")]
    Unmapped { addr: Address, len: usize },
}

pub trait ExternalMemory {
    /// Fills `buf` with the bytes at `addr`. All or nothing.
    fn read_into(&self, addr: Address, buf: &mut [u8]) -> Result<(), MemoryError>;

    fn read_byte(&self, addr: Address) -> Result<u8, MemoryError> {
        let mut buf = [0u8; 1];
        self.read_into(addr, &mut buf)?;
        Ok(buf[0])
    }

    /// Reads a target `int`, sign-extended.
    fn read_c_int(&self, addr: Address, layout: &Layout) -> Result<i64, MemoryError> {
        let mut buf = [0u8; 8];
        let buf = &mut buf[..layout.c_int_size()];
        self.read_into(addr, buf)?;
        Ok(layout.endian().read_int(buf))
    }

    fn read_address(&self, addr: Address, layout: &Layout) -> Result<Address, MemoryError> {
        let mut buf = [0u8; 8];
        let buf = &mut buf[..layout.pointer_size()];
        self.read_into(addr, buf)?;
        Ok(Address(layout.endian().read_uint(buf)))
    }
}

impl<M: ExternalMemory + ?Sized> ExternalMemory for &M {
    fn read_into(&self, addr: Address, buf: &mut [u8]) -> Result<(), MemoryError> {
        (**self).read_into(addr, buf)
    }
}

/// Target memory as a set of disjoint byte regions, e.g. the loaded segments
/// of a core file.
#[derive(Debug, Clone, Default)]
pub struct RegionMemory {
    regions: BTreeMap<u64, Vec<u8>>,
}

impl RegionMemory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_region(mut self, base: Address, bytes: Vec<u8>) -> Self {
        self.map(base, bytes);
        self
    }

    /// Maps `bytes` at `base`, replacing any region starting at the same address.
    pub fn map(&mut self, base: Address, bytes: Vec<u8>) {
        self.regions.insert(base.0, bytes);
    }

    pub fn region_count(&self) -> usize {
        self.regions.len()
    }
}

impl ExternalMemory for RegionMemory {
    fn read_into(&self, addr: Address, buf: &mut [u8]) -> Result<(), MemoryError> {
        let len = buf.len();
        let unmapped = || MemoryError::Unmapped { addr, len };
        let (base, bytes) = self.regions.range(..=addr.0).next_back().ok_or_else(unmapped)?;
        let start = (addr.0 - base) as usize;
        let end = start.checked_add(len).ok_or_else(unmapped)?;
        let src = bytes.get(start..end).ok_or_else(unmapped)?;
        buf.copy_from_slice(src);
        Ok(())
    }
}

/// Target memory paired with the layout it is read with.
pub struct Target<'a, M: ?Sized> {
    memory: &'a M,
    layout: &'a Layout,
}

impl<'a, M: ?Sized> Clone for Target<'a, M> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<'a, M: ?Sized> Copy for Target<'a, M> {}

impl<'a, M: ?Sized> fmt::Debug for Target<'a, M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Target")
            .field("endian", &self.layout.endian())
            .field("pointer_size", &self.layout.pointer_size())
            .finish()
    }
}

impl<'a, M: ExternalMemory + ?Sized> Target<'a, M> {
    pub fn new(memory: &'a M, layout: &'a Layout) -> Self {
        Self { memory, layout }
    }

    pub fn memory(&self) -> &'a M {
        self.memory
    }

    pub fn layout(&self) -> &'a Layout {
        self.layout
    }

    pub fn read_byte(&self, addr: Address) -> Result<u8, MemoryError> {
        self.memory.read_byte(addr)
    }

    pub fn read_c_int(&self, addr: Address) -> Result<i64, MemoryError> {
        self.memory.read_c_int(addr, self.layout)
    }

    pub fn read_address(&self, addr: Address) -> Result<Address, MemoryError> {
        self.memory.read_address(addr, self.layout)
    }
}
