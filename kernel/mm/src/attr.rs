//! Page-table entry encoding.
//!
//! A directory or table entry is a 32-bit word: bits 12..31 hold the
//! frame-aligned physical address, the low bits hold the flags. Only the
//! present, read/write, and user bits are modeled; the machine's remaining
//! flag bits stay zero.

use core::fmt;

use muon_core::addr::PhysAddr;
use muon_core::frame::PhysFrame;

/// Mask selecting the frame-address bits (12..31) of an entry.
pub const FRAME_MASK: u32 = 0xFFFF_F000;

bitflags::bitflags! {
    /// Flag bits of a directory or table entry.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct EntryFlags: u32 {
        /// Entry is present / valid.
        const PRESENT  = 1 << 0;
        /// Page is writable.
        const WRITABLE = 1 << 1;
        /// Page is accessible from user mode.
        const USER     = 1 << 2;
    }
}

bitflags::bitflags! {
    /// Page-fault error code pushed by the CPU.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PageFaultCode: u32 {
        /// 1 = protection violation, 0 = not-present page.
        const PRESENT = 1 << 0;
        /// 1 = write access caused the fault.
        const WRITE   = 1 << 1;
        /// 1 = fault occurred in user mode.
        const USER    = 1 << 2;
    }
}

/// Page attributes as a value: valid, read/write, user.
///
/// Produces the 3-bit value that is OR-ed with a frame-aligned address to
/// form an entry. The four constants cover every combination the kernel
/// writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageAttrs {
    valid: bool,
    rw: bool,
    user: bool,
}

impl PageAttrs {
    /// Present, writable, user-accessible (`111`).
    pub const DEFAULT_USER_PAGE: Self = Self::new(true, true, true);
    /// Present, writable, supervisor-only (`011`).
    pub const DEFAULT_SUPERVISOR_PAGE: Self = Self::new(true, true, false);
    /// Not present, writable, user-accessible (`110`).
    pub const NOT_PRESENT_USER_PAGE: Self = Self::new(false, true, true);
    /// Not present, writable, supervisor-only (`010`).
    pub const NOT_PRESENT_SUPERVISOR_PAGE: Self = Self::new(false, true, false);

    /// Creates attributes from the three bits.
    pub const fn new(valid: bool, rw: bool, user: bool) -> Self {
        Self { valid, rw, user }
    }

    /// Returns these attributes with the read/write bit cleared.
    ///
    /// Used for the self-map entry, which is supervisor-only and not
    /// writable.
    pub const fn read_only(self) -> Self {
        Self {
            valid: self.valid,
            rw: false,
            user: self.user,
        }
    }

    /// Returns `true` if the present bit is set.
    pub const fn is_valid(self) -> bool {
        self.valid
    }

    /// Returns the 3-bit entry value.
    pub const fn bits(self) -> u32 {
        (self.valid as u32) | ((self.rw as u32) << 1) | ((self.user as u32) << 2)
    }

    /// Returns the equivalent [`EntryFlags`].
    pub const fn flags(self) -> EntryFlags {
        EntryFlags::from_bits_truncate(self.bits())
    }
}

/// A single directory or table entry (32 bits).
#[derive(Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct PageEntry(u32);

impl PageEntry {
    /// An all-zero entry.
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Creates an entry mapping `frame` with the given attributes.
    pub const fn new(frame: PhysFrame, attrs: PageAttrs) -> Self {
        Self((frame.start_address().as_u32() & FRAME_MASK) | attrs.bits())
    }

    /// Creates an entry with no frame, carrying only attribute bits.
    ///
    /// Used to initialize fresh tables: all entries not-present but with
    /// the read/write bit already in the shape later installs expect.
    pub const fn unmapped(attrs: PageAttrs) -> Self {
        debug_assert!(!attrs.is_valid(), "unmapped entry must not be present");
        Self(attrs.bits())
    }

    /// Returns `true` if the present bit is set.
    pub const fn is_present(self) -> bool {
        self.0 & 1 != 0
    }

    /// Returns the physical address stored in this entry.
    pub const fn address(self) -> PhysAddr {
        PhysAddr::new(self.0 & FRAME_MASK)
    }

    /// Returns the frame stored in this entry.
    pub const fn frame(self) -> PhysFrame {
        PhysFrame::containing_address(self.address())
    }

    /// Returns the flag bits of this entry.
    pub const fn flags(self) -> EntryFlags {
        EntryFlags::from_bits_truncate(self.0 & !FRAME_MASK)
    }

    /// Returns the raw 32-bit word.
    pub const fn raw(self) -> u32 {
        self.0
    }
}

impl fmt::Debug for PageEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PageEntry({:#010x})", self.0)
    }
}
