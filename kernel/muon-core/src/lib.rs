//! Core types for the muon teaching kernel.
//!
//! muon targets a 32-bit x86-like machine with 4 KiB pages and two-level
//! paging. This crate holds the pieces everything else builds on: typed
//! addresses, typed frame/page numbers, the direct-map address seam, the
//! CPU hook layer, and a spin lock. It contains no policy; the memory
//! manager proper lives in `muon-mm`.

#![cfg_attr(not(test), no_std)]

pub mod addr;
pub mod frame;
pub mod machine;
pub mod mem;
pub mod sync;

pub use addr::{PhysAddr, VirtAddr};
pub use frame::{Page, PhysFrame, PAGE_SHIFT, PAGE_SIZE};
pub use mem::DirectMap;
