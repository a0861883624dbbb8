//! Process-wide memory state and the exception entry point.
//!
//! The rest of the kernel reaches the memory core through one singleton:
//! the frame-pool registry plus the paging state, behind a spin lock. The
//! interrupt-dispatch code binds [`page_fault_isr`] to exception vector 14;
//! everything else it needs (the faulting address) comes through the
//! machine hook layer.

use muon_core::addr::VirtAddr;
use muon_core::frame::PhysFrame;
use muon_core::machine;
use muon_core::sync::SpinLock;

use crate::attr::PageFaultCode;
use crate::page_table::Paging;
use crate::registry::PoolRegistry;

/// The memory subsystems owned by the singleton.
pub struct Memory {
    pub pools: PoolRegistry,
    pub paging: Paging,
}

static MEMORY: SpinLock<Option<Memory>> = SpinLock::new(None);

/// Installs the process-wide memory state. Called once at boot, after the
/// frame pools and paging have been constructed.
///
/// # Panics
///
/// Panics on double initialization.
pub fn init(memory: Memory) {
    let mut slot = MEMORY.lock();
    assert!(slot.is_none(), "memory: already initialized");
    *slot = Some(memory);
}

/// Runs `f` with exclusive access to the memory state.
///
/// # Panics
///
/// Panics when [`init`] has not run.
pub fn with<R>(f: impl FnOnce(&mut Memory) -> R) -> R {
    let mut slot = MEMORY.lock();
    f(slot.as_mut().expect("memory: not initialized"))
}

/// Releases the frame run starting at `first`, whichever pool owns it.
///
/// The system-wide release path: at release time only the frame number is
/// known, not the pool it came from.
pub fn release_frames(first: PhysFrame) {
    with(|memory| memory.pools.release_frames(first));
}

/// Page-fault handler. Bind to exception vector 14.
///
/// Reads the faulting linear address from the CPU and hands it to the
/// current page table's resolver. Must run to completion: the faulting
/// instruction restarts as soon as this returns.
pub fn page_fault_isr(code: PageFaultCode) {
    let addr = VirtAddr::new(machine::fault_address());
    with(|memory| memory.paging.handle_fault(&mut memory.pools, addr, code));
}
