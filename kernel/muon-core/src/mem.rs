//! Working-address to pointer conversion.
//!
//! The memory manager reads and writes bitmaps, translation tables, and
//! region tables through raw pointers. On the target machine the addresses
//! it uses are directly dereferenceable: physical addresses because the low
//! region is identity-mapped (and paging may not be on yet), self-map and
//! region addresses because the MMU translates them. [`DirectMap`] captures
//! that as a base offset of zero.
//!
//! Host tests cannot dereference machine addresses, so they back the
//! address space with an allocated arena and use the arena base as the
//! offset. Every core type carries the `DirectMap` it was constructed with,
//! which keeps the test seam out of the hot paths.

use crate::addr::{PhysAddr, VirtAddr};

/// Converts machine addresses into dereferenceable pointers by adding a
/// fixed base offset.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DirectMap {
    base: usize,
}

impl DirectMap {
    /// The identity conversion used on the target machine.
    pub const IDENTITY: Self = Self { base: 0 };

    /// Creates a conversion rooted at `base` (host tests: the arena base).
    #[inline]
    pub const fn at_base(base: usize) -> Self {
        Self { base }
    }

    /// Returns a pointer for the given physical address.
    #[inline]
    pub fn phys_ptr<T>(self, addr: PhysAddr) -> *mut T {
        (self.base + addr.as_u32() as usize) as *mut T
    }

    /// Returns a pointer for the given linear address.
    #[inline]
    pub fn virt_ptr<T>(self, addr: VirtAddr) -> *mut T {
        (self.base + addr.as_u32() as usize) as *mut T
    }
}
