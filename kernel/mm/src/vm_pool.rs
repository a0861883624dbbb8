//! Per-address-space virtual region pools.
//!
//! A [`VmPool`] owns a range of virtual pages inside a heap arena and
//! tracks which sub-ranges have been handed out. Nothing is eagerly
//! backed: an allocation only records a `(start_page, end_page)` pair, and
//! physical frames arrive one page at a time through the fault resolver on
//! first touch.
//!
//! The bookkeeping table lives *inside the pool's own first page*. On the
//! target machine the very write that initializes it page-faults, the
//! resolver sees the first-page special case in [`VmPoolRecord::is_legitimate`],
//! and the table page gets backed like any other — which is why a pool
//! registers itself with its page table before touching the table.

use muon_core::addr::VirtAddr;
use muon_core::frame::{Page, PAGE_SIZE};
use muon_core::mem::DirectMap;

use crate::page_table::{PageTableId, Paging};
use crate::registry::{PoolHandle, PoolRegistry};

/// Slots in the region table: one page of `(start_page, end_page)` pairs.
pub const SLOT_COUNT: usize = PAGE_SIZE as usize / (2 * core::mem::size_of::<u32>());

/// Probes attempted before an allocation reports the arena as crowded.
const PROBE_LIMIT: u32 = 5;

/// Initial probe seed; an odd prime so the squaring walk does not collapse.
const INITIAL_SEED: u32 = 2_147_483_647;

/// `start_page` value marking a region-table slot as free.
const FREE_SLOT: u32 = 0;

/// The registered view of a [`VmPool`]: everything the fault resolver needs
/// to judge and back an address, small enough to copy into the page table's
/// registration list.
///
/// The authoritative allocation state is the in-memory region table, so a
/// record never goes stale.
#[derive(Clone, Copy, Debug)]
pub struct VmPoolRecord {
    base_page: Page,
    num_pages: u32,
    frame_pool: PoolHandle,
    mem: DirectMap,
}

impl VmPoolRecord {
    pub(crate) fn new(base: VirtAddr, size: u32, frame_pool: PoolHandle, mem: DirectMap) -> Self {
        assert!(
            base.is_aligned(PAGE_SIZE) && base.as_u32() != 0,
            "vm pool: base {base:#x} must be a nonzero page boundary"
        );
        let num_pages = size >> muon_core::frame::PAGE_SHIFT;
        assert!(num_pages > 1, "vm pool: {size:#x} bytes leave no room behind the region table");
        Self {
            base_page: Page::containing_address(base),
            num_pages,
            frame_pool,
            mem,
        }
    }

    /// First page of the owned range (it stores the region table).
    pub fn base_page(self) -> Page {
        self.base_page
    }

    /// Number of pages in the owned range.
    pub fn num_pages(self) -> u32 {
        self.num_pages
    }

    /// The physical pool that backs faults in this range.
    pub fn frame_pool(self) -> PoolHandle {
        self.frame_pool
    }

    /// Returns `true` when `addr` lies in a handed-out region.
    ///
    /// The first page is always legitimate: it holds the region table, and
    /// must be backable before the table can be read at all.
    pub fn is_legitimate(self, addr: VirtAddr) -> bool {
        let page = Page::containing_address(addr).number();
        let base = self.base_page.number();
        if page == base {
            return true;
        }
        if page < base || page >= base + self.num_pages {
            return false;
        }
        self.overlaps(page, 1)
    }

    /// Returns the occupied region in `index`, if any.
    pub fn slot(self, index: usize) -> Option<(Page, Page)> {
        debug_assert!(index < SLOT_COUNT);
        let table = self.table_ptr();
        // SAFETY: The region table occupies the pool's first page; `index`
        // stays within it.
        let start = unsafe { table.add(2 * index).read() };
        if start == FREE_SLOT {
            return None;
        }
        let end = unsafe { table.add(2 * index + 1).read() };
        Some((Page::new(start), Page::new(end)))
    }

    /// Returns `true` when `[start_page, start_page + npages)` overlaps any
    /// occupied region.
    fn overlaps(self, start_page: u32, npages: u32) -> bool {
        let end = start_page + npages;
        for index in 0..SLOT_COUNT {
            if let Some((s, e)) = self.slot(index) {
                if s.number().max(start_page) < e.number().min(end) {
                    return true;
                }
            }
        }
        false
    }

    fn table_ptr(self) -> *mut u32 {
        self.mem.virt_ptr(self.base_page.start_address())
    }
}

/// A virtual region pool.
pub struct VmPool {
    record: VmPoolRecord,
    seed: u32,
}

impl VmPool {
    /// Creates a pool over `[base, base + size)`, registers it with the
    /// page table behind `table`, and initializes the region table in the
    /// first page (slot 0 covers that page itself).
    ///
    /// Faults in this range will draw frames from `frame_pool`.
    pub fn new(
        base: VirtAddr,
        size: u32,
        frame_pool: PoolHandle,
        paging: &mut Paging,
        table: PageTableId,
        is_heap: bool,
    ) -> Self {
        let record = VmPoolRecord::new(base, size, frame_pool, paging.mem());

        // Register before the first table write: on the target machine that
        // write faults, and the resolver must already know the range.
        paging.register_pool(table, record, is_heap);

        let table_ptr = record.table_ptr();
        // SAFETY: The pool owns its first page; the table fills exactly one
        // page.
        unsafe {
            core::ptr::write_bytes(table_ptr, 0, 2 * SLOT_COUNT);
            table_ptr.write(record.base_page.number());
            table_ptr.add(1).write(record.base_page.number() + 1);
        }

        log::info!(
            "vm pool: constructed over {base:#x}, {} pages",
            record.num_pages
        );
        Self {
            record,
            seed: INITIAL_SEED,
        }
    }

    /// Allocates `size` bytes (rounded up to whole pages).
    ///
    /// The start is picked by a squaring pseudo-random probe rather than a
    /// bump cursor: the arena is sparse and demand-paged, so scattering
    /// allocations keeps the overlap check cheap and avoids growing one
    /// dense clump. Returns `None` after [`PROBE_LIMIT`] collisions — the
    /// arena is crowded, and the caller decides how bad that is.
    pub fn allocate(&mut self, size: u32) -> Option<VirtAddr> {
        let npages = size.div_ceil(PAGE_SIZE);
        if npages == 0 || npages >= self.record.num_pages {
            return None;
        }

        let span = self.record.num_pages - npages;
        for attempt in 0..PROBE_LIMIT {
            self.seed = self.seed.wrapping_mul(self.seed).wrapping_add(self.seed >> 1);
            let candidate = self.record.base_page.number() + self.seed % span;
            if !self.record.overlaps(candidate, npages) {
                self.assign(candidate, npages);
                log::trace!(
                    "vm pool: allocated pages {candidate}..{}",
                    candidate + npages
                );
                return Some(Page::new(candidate).start_address());
            }
            log::warn!("vm pool: probe {attempt} hit an occupied range, retrying");
        }
        None
    }

    /// Releases the region previously returned from
    /// [`allocate`](Self::allocate) at `addr`, freeing every backed page
    /// through the page table.
    ///
    /// # Panics
    ///
    /// Panics when no region starts at `addr` (foreign release).
    pub fn release(&mut self, addr: VirtAddr, paging: &mut Paging, pools: &mut PoolRegistry) {
        let page = Page::containing_address(addr);
        for index in 0..SLOT_COUNT {
            let Some((start, end)) = self.record.slot(index) else {
                continue;
            };
            if start != page {
                continue;
            }
            for freed in Page::range(start, end) {
                paging.free_page(pools, freed);
            }
            let table = self.record.table_ptr();
            // SAFETY: As in `slot`; both words of the slot are cleared.
            unsafe {
                table.add(2 * index).write(FREE_SLOT);
                table.add(2 * index + 1).write(FREE_SLOT);
            }
            log::debug!("vm pool: released pages {}..{}", start.number(), end.number());
            return;
        }
        panic!("vm pool: release of {addr:#x}, which was never allocated");
    }

    /// Returns `true` when `addr` lies in a handed-out region.
    pub fn is_legitimate(&self, addr: VirtAddr) -> bool {
        self.record.is_legitimate(addr)
    }

    /// The registered view of this pool.
    pub fn record(&self) -> VmPoolRecord {
        self.record
    }

    /// Records `[start_page, start_page + npages)` in the first free slot.
    fn assign(&mut self, start_page: u32, npages: u32) {
        let table = self.record.table_ptr();
        for index in 0..SLOT_COUNT {
            // SAFETY: As in `VmPoolRecord::slot`.
            let occupied = unsafe { table.add(2 * index).read() } != FREE_SLOT;
            if !occupied {
                unsafe {
                    table.add(2 * index).write(start_page);
                    table.add(2 * index + 1).write(start_page + npages);
                }
                return;
            }
        }
        panic!("vm pool: region table is full");
    }
}
