//! CPU hook layer.
//!
//! The memory manager needs three machine primitives: writing the
//! translation-base register (CR3 on x86, also the TLB flush mechanism),
//! setting the paging-enable bit (CR0.PG), and reading the faulting linear
//! address (CR2). Their implementations live in the kernel binary next to
//! the boot code; this module only dispatches through registered function
//! pointers.
//!
//! Before registration every hook is a no-op (the fault-address hook reads
//! zero). That default is what host tests run under, and it is also safe
//! during early boot where paging is off and nothing has faulted yet.

use core::sync::atomic::{AtomicPtr, Ordering};

use crate::addr::PhysAddr;

fn nop_translation_base(_root: PhysAddr) {}

fn nop_paging_enable() {}

fn zero_fault_address() -> u32 {
    0
}

static TRANSLATION_BASE_FN: AtomicPtr<()> =
    AtomicPtr::new(nop_translation_base as fn(PhysAddr) as *mut ());

static PAGING_ENABLE_FN: AtomicPtr<()> = AtomicPtr::new(nop_paging_enable as fn() as *mut ());

static FAULT_ADDRESS_FN: AtomicPtr<()> = AtomicPtr::new(zero_fault_address as fn() -> u32 as *mut ());

/// Registers the translation-base write primitive (`mov cr3, …`).
pub fn register_translation_base(f: fn(PhysAddr)) {
    TRANSLATION_BASE_FN.store(f as *mut (), Ordering::Release);
}

/// Registers the paging-enable primitive (set the PG bit in CR0).
pub fn register_paging_enable(f: fn()) {
    PAGING_ENABLE_FN.store(f as *mut (), Ordering::Release);
}

/// Registers the fault-address read primitive (`mov …, cr2`).
pub fn register_fault_address(f: fn() -> u32) {
    FAULT_ADDRESS_FN.store(f as *mut (), Ordering::Release);
}

/// Writes the translation-base register.
///
/// Loading a directory and flushing the TLB are both this operation; the
/// hardware drops cached translations whenever the register is rewritten.
#[inline]
pub fn set_translation_base(root: PhysAddr) {
    let ptr = TRANSLATION_BASE_FN.load(Ordering::Acquire);
    // SAFETY: Only valid `fn(PhysAddr)` pointers are ever stored, either the
    // initial no-op or one passed to `register_translation_base`.
    let f: fn(PhysAddr) = unsafe { core::mem::transmute(ptr) };
    f(root);
}

/// Sets the paging-enable bit.
#[inline]
pub fn enable_paging() {
    let ptr = PAGING_ENABLE_FN.load(Ordering::Acquire);
    // SAFETY: Only valid `fn()` pointers are ever stored.
    let f: fn() = unsafe { core::mem::transmute(ptr) };
    f();
}

/// Reads the linear address that caused the most recent page fault.
#[inline]
pub fn fault_address() -> u32 {
    let ptr = FAULT_ADDRESS_FN.load(Ordering::Acquire);
    // SAFETY: Only valid `fn() -> u32` pointers are ever stored.
    let f: fn() -> u32 = unsafe { core::mem::transmute(ptr) };
    f()
}
