//! Two-level page tables and the page-fault resolver.
//!
//! [`Paging`] owns the process-wide paging state: which frame pools feed
//! the translation structures, how much of the low address space is
//! direct-mapped, whether paging is on, and every [`PageTable`] in the
//! system (an arena addressed by [`PageTableId`], which keeps ownership
//! acyclic the same way [`PoolHandle`] does for frame pools).
//!
//! # Self-map discipline
//!
//! Directory entry 1023 of every table points back at the directory frame
//! itself. Once paging is on, physical addresses of translation structures
//! stop being usable, but the self-map keeps them reachable at fixed
//! linear addresses: the directory at [`PD_SELF_ADDR`], and the page table
//! covering linear address `l` at [`pt_self_addr`]`(l)`. Entry edits work
//! identically before and after paging is enabled; only the base pointer
//! differs, and [`Paging::dir_ptr`] / [`Paging::table_ptr`] pick it.
//!
//! The one exception is a directory that is not yet loaded: it is touched
//! at its physical address, which works because directory frames come from
//! the kernel pool inside the direct-mapped region.

use arrayvec::ArrayVec;
use muon_core::addr::VirtAddr;
use muon_core::frame::{Page, PhysFrame, PAGE_SIZE};
use muon_core::machine;
use muon_core::mem::DirectMap;

use crate::attr::{PageAttrs, PageEntry, PageFaultCode};
use crate::registry::{PoolHandle, PoolRegistry};
use crate::vm_pool::VmPoolRecord;
use crate::ENTRIES_PER_TABLE;

/// Linear span covered by one directory entry (4 MiB).
pub const PD_SPAN: u32 = 1 << 22;

/// Directory index of the self-map entry.
pub const PD_SELF_INDEX: usize = 1023;

/// Linear address of the current page directory once paging is enabled.
pub const PD_SELF_ADDR: VirtAddr = VirtAddr::new(0xFFFF_F000);

/// Linear address of the page table covering `addr`, via the self-map.
pub const fn pt_self_addr(addr: VirtAddr) -> VirtAddr {
    VirtAddr::new(0xFFC0_0000 | ((addr.as_u32() >> 22) << 12))
}

/// Maximum page tables alive at once.
pub const MAX_TABLES: usize = 4;

/// Maximum region pools registered per address space.
pub const MAX_VM_POOLS: usize = 8;

/// Identifies a [`PageTable`] owned by [`Paging`].
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct PageTableId(usize);

/// One address space: a page directory plus the region pools registered
/// against it.
pub struct PageTable {
    directory: PhysFrame,
    vm_pools: ArrayVec<VmPoolRecord, MAX_VM_POOLS>,
    heap_pool: Option<usize>,
}

impl PageTable {
    /// The frame holding this address space's page directory.
    pub fn directory(&self) -> PhysFrame {
        self.directory
    }

    /// The registered region pools.
    pub fn vm_pools(&self) -> &[VmPoolRecord] {
        &self.vm_pools
    }

    /// The pool registered as the heap arena, if any.
    pub fn heap_pool(&self) -> Option<&VmPoolRecord> {
        self.heap_pool.map(|index| &self.vm_pools[index])
    }
}

/// Process-wide paging state.
pub struct Paging {
    /// Pool feeding page directories.
    kernel_pool: PoolHandle,
    /// Pool feeding page-table pages and fault backings without a region
    /// pool preference.
    process_pool: PoolHandle,
    /// Bytes of linear space mapped 1:1 and shared by every address space.
    shared_size: u32,
    enabled: bool,
    tables: ArrayVec<Option<PageTable>, MAX_TABLES>,
    current: Option<PageTableId>,
    mem: DirectMap,
}

impl Paging {
    /// Stores the paging globals. Nothing is mapped yet; call
    /// [`create_table`](Self::create_table) next.
    pub fn new(
        kernel_pool: PoolHandle,
        process_pool: PoolHandle,
        shared_size: u32,
        mem: DirectMap,
    ) -> Self {
        debug_assert!(shared_size % PAGE_SIZE == 0, "shared size must be whole pages");
        log::info!("paging: initialized, {shared_size:#x} bytes shared");
        Self {
            kernel_pool,
            process_pool,
            shared_size,
            enabled: false,
            tables: ArrayVec::new_const(),
            current: None,
            mem,
        }
    }

    /// Constructs a new address space.
    ///
    /// The directory comes from the kernel pool. All entries start
    /// not-present except the self-map; the shared region is then either
    /// direct-mapped (paging still off) or copied from the currently
    /// loaded directory so its page tables are shared.
    pub fn create_table(&mut self, pools: &mut PoolRegistry) -> PageTableId {
        let directory = Self::take_frame(pools, self.kernel_pool, "page directory");

        // A fresh directory is never the loaded one, so it is addressed
        // physically; kernel-pool frames sit inside the shared region.
        let dir: *mut PageEntry = self.mem.phys_ptr(directory.start_address());
        // SAFETY: The frame was just allocated for this directory and holds
        // exactly ENTRIES_PER_TABLE entries.
        unsafe {
            for index in 0..ENTRIES_PER_TABLE {
                dir.add(index)
                    .write(PageEntry::unmapped(PageAttrs::NOT_PRESENT_SUPERVISOR_PAGE));
            }
            // Self-map: supervisor-only and not writable.
            dir.add(PD_SELF_INDEX).write(PageEntry::new(
                directory,
                PageAttrs::DEFAULT_SUPERVISOR_PAGE.read_only(),
            ));
        }

        if self.enabled {
            self.copy_shared(directory);
        } else {
            self.direct_map(pools, directory, VirtAddr::zero(), self.shared_size);
        }

        let id = self.store_table(PageTable {
            directory,
            vm_pools: ArrayVec::new_const(),
            heap_pool: None,
        });
        log::info!("page table: constructed directory at frame {directory}");
        id
    }

    /// Makes `id` the current address space and points the CPU at its
    /// directory.
    pub fn load(&mut self, id: PageTableId) {
        let table = self.tables[id.0]
            .as_ref()
            .expect("paging: load of a destroyed page table");
        machine::set_translation_base(table.directory.start_address());
        self.current = Some(id);
        log::info!("page table: loaded directory frame {}", table.directory);
    }

    /// Turns paging on. Idempotent after the first call.
    pub fn enable_paging(&mut self) {
        if self.enabled {
            return;
        }
        self.enabled = true;
        machine::enable_paging();
        log::info!("paging: enabled");
    }

    /// Resolves a page fault at `addr`.
    ///
    /// A fault is legitimate when a region pool registered with the current
    /// address space claims the address; the backing frame then comes from
    /// that pool's preferred physical pool. Everything else is a kernel
    /// bug and fatal.
    pub fn handle_fault(&mut self, pools: &mut PoolRegistry, addr: VirtAddr, code: PageFaultCode) {
        log::debug!("page fault at {addr:#x} ({code:?})");

        let current = self.current.expect("page fault with no page table loaded");
        let table = self.tables[current.0].as_ref().expect("current table destroyed");
        let directory = table.directory;
        let record = table
            .vm_pools
            .iter()
            .copied()
            .find(|record| record.is_legitimate(addr))
            .unwrap_or_else(|| panic!("page fault at {addr:#x}: outside every registered region"));

        let frame = pools
            .get_frames(record.frame_pool(), 1)
            .unwrap_or_else(|| panic!("page fault at {addr:#x}: backing frame pool exhausted"));

        self.install_mapping(pools, directory, addr, frame, PageAttrs::DEFAULT_SUPERVISOR_PAGE);
        log::trace!("page fault: backed {addr:#x} with frame {frame}");
    }

    /// Unmaps `page` from the current address space and returns its frame
    /// to the owning pool. Silent no-op when nothing is mapped there; a
    /// release must be safe to repeat.
    pub fn free_page(&mut self, pools: &mut PoolRegistry, page: Page) {
        let table = self.current_table().expect("paging: free_page with no page table loaded");
        let directory = table.directory;
        let addr = page.start_address();

        let dir = self.dir_ptr(directory);
        // SAFETY: Directory access follows the addressing discipline of
        // `dir_ptr`; indices are below ENTRIES_PER_TABLE.
        let pde = unsafe { dir.add(addr.pd_index()).read() };
        if !pde.is_present() {
            return;
        }

        let entries = self.table_ptr(directory, addr, pde.frame());
        // SAFETY: As above, via `table_ptr`.
        let entry = unsafe { entries.add(addr.pt_index()).read() };
        if !entry.is_present() {
            return;
        }

        // SAFETY: Slot checked present; clearing it is the unmap.
        unsafe {
            entries
                .add(addr.pt_index())
                .write(PageEntry::unmapped(PageAttrs::NOT_PRESENT_SUPERVISOR_PAGE));
        }
        pools.release_frames(entry.frame());

        // Rewriting the translation base is the TLB flush: the stale
        // translation must be gone before the address is reused.
        machine::set_translation_base(directory.start_address());
        log::trace!("page table: freed page {addr:#x}");
    }

    /// Walks the current address space and translates `addr`.
    pub fn translate(&self, addr: VirtAddr) -> Option<muon_core::addr::PhysAddr> {
        let table = self.current_table()?;
        let directory = table.directory;

        let dir = self.dir_ptr(directory);
        // SAFETY: Read-only walk under the addressing discipline.
        let pde = unsafe { dir.add(addr.pd_index()).read() };
        if !pde.is_present() {
            return None;
        }
        let entries = self.table_ptr(directory, addr, pde.frame());
        // SAFETY: As above.
        let entry = unsafe { entries.add(addr.pt_index()).read() };
        entry
            .is_present()
            .then(|| entry.address() + addr.page_offset())
    }

    /// Registers a region pool against the address space `id`; the fault
    /// resolver consults the registered records in order. With `is_heap`
    /// the pool is remembered as the heap arena so the kernel allocator
    /// can find it.
    pub fn register_pool(&mut self, id: PageTableId, record: VmPoolRecord, is_heap: bool) {
        let table = self.tables[id.0]
            .as_mut()
            .expect("paging: register_pool on a destroyed page table");
        assert!(
            table.vm_pools.try_push(record).is_ok(),
            "page table: more than {MAX_VM_POOLS} registered region pools"
        );
        if is_heap {
            table.heap_pool = Some(table.vm_pools.len() - 1);
        }
        log::info!(
            "page table: registered region pool at {:#x}, {} pages",
            record.base_page().start_address(),
            record.num_pages()
        );
    }

    /// Destroys the address space `id`, releasing every frame backing its
    /// regions, every non-shared page-table page, and the directory.
    ///
    /// Shared-region page tables stay: other address spaces reference the
    /// same frames.
    ///
    /// # Panics
    ///
    /// Panics when `id` was already destroyed, or when paging is enabled
    /// and `id` is not the loaded table (a live table's structures are only
    /// reachable through its own self-map).
    pub fn destroy(&mut self, pools: &mut PoolRegistry, id: PageTableId) {
        let directory = self.tables[id.0]
            .as_ref()
            .expect("paging: destroy of an unknown page table")
            .directory;
        assert!(
            !self.enabled || self.is_current(directory),
            "paging: a table must be loaded to be destroyed once paging is on"
        );

        let shared_entries = self.shared_size.div_ceil(PD_SPAN) as usize;
        let dir = self.dir_ptr(directory);
        for index in shared_entries..PD_SELF_INDEX {
            // SAFETY: Directory walk under the addressing discipline.
            let pde = unsafe { dir.add(index).read() };
            if !pde.is_present() {
                continue;
            }
            let addr = VirtAddr::new((index as u32) << 22);
            let entries = self.table_ptr(directory, addr, pde.frame());
            for entry_index in 0..ENTRIES_PER_TABLE {
                // SAFETY: As above.
                let entry = unsafe { entries.add(entry_index).read() };
                if entry.is_present() {
                    pools.release_frames(entry.frame());
                }
            }
            pools.release_frames(pde.frame());
        }

        self.tables[id.0] = None;
        if self.current == Some(id) {
            self.current = None;
        }
        pools.release_frames(directory);
        log::info!("page table: destroyed directory frame {directory}");
    }

    /// Whether paging has been enabled.
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// The currently loaded address space, if any.
    pub fn current(&self) -> Option<PageTableId> {
        self.current
    }

    /// The address space behind `id`, unless destroyed.
    pub fn table(&self, id: PageTableId) -> Option<&PageTable> {
        self.tables[id.0].as_ref()
    }

    /// Bytes of linear space shared across address spaces.
    pub fn shared_size(&self) -> u32 {
        self.shared_size
    }

    /// The address conversion this paging system was built with.
    pub fn mem(&self) -> DirectMap {
        self.mem
    }

    // -- internals ----------------------------------------------------------

    fn current_table(&self) -> Option<&PageTable> {
        self.current.and_then(|id| self.tables[id.0].as_ref())
    }

    fn is_current(&self, directory: PhysFrame) -> bool {
        self.current_table()
            .is_some_and(|table| table.directory == directory)
    }

    /// Pointer to the entries of `directory`, honoring the addressing
    /// discipline.
    fn dir_ptr(&self, directory: PhysFrame) -> *mut PageEntry {
        if self.enabled && self.is_current(directory) {
            self.mem.virt_ptr(PD_SELF_ADDR)
        } else {
            self.mem.phys_ptr(directory.start_address())
        }
    }

    /// Pointer to the entries of the page table covering `addr`, whose
    /// frame is `table_frame`, honoring the addressing discipline.
    fn table_ptr(&self, directory: PhysFrame, addr: VirtAddr, table_frame: PhysFrame) -> *mut PageEntry {
        if self.enabled && self.is_current(directory) {
            self.mem.virt_ptr(pt_self_addr(addr))
        } else {
            self.mem.phys_ptr(table_frame.start_address())
        }
    }

    /// Returns the page-table frame for `addr`, installing a fresh table
    /// from the process pool when the directory entry is not present.
    fn ensure_table(&mut self, pools: &mut PoolRegistry, directory: PhysFrame, addr: VirtAddr) -> PhysFrame {
        let dir = self.dir_ptr(directory);
        let index = addr.pd_index();
        // SAFETY: Directory walk under the addressing discipline.
        let pde = unsafe { dir.add(index).read() };
        if pde.is_present() {
            return pde.frame();
        }

        let table_frame = Self::take_frame(pools, self.process_pool, "page-table page");
        // The directory entry must be installed before the new table is
        // touched: with paging on, the table is only reachable through the
        // self-map address that this entry creates.
        // SAFETY: `index` is in range; the frame was just allocated.
        unsafe {
            dir.add(index)
                .write(PageEntry::new(table_frame, PageAttrs::DEFAULT_SUPERVISOR_PAGE));
        }
        let entries = self.table_ptr(directory, addr, table_frame);
        // SAFETY: The fresh table holds exactly ENTRIES_PER_TABLE entries.
        unsafe {
            for entry_index in 0..ENTRIES_PER_TABLE {
                entries
                    .add(entry_index)
                    .write(PageEntry::unmapped(PageAttrs::NOT_PRESENT_SUPERVISOR_PAGE));
            }
        }
        table_frame
    }

    /// Installs a mapping for `addr`. A present slot is a double map and
    /// fatal.
    fn install_mapping(
        &mut self,
        pools: &mut PoolRegistry,
        directory: PhysFrame,
        addr: VirtAddr,
        frame: PhysFrame,
        attrs: PageAttrs,
    ) {
        let table_frame = self.ensure_table(pools, directory, addr);
        let entries = self.table_ptr(directory, addr, table_frame);
        let index = addr.pt_index();
        // SAFETY: Table walk under the addressing discipline.
        let entry = unsafe { entries.add(index).read() };
        assert!(!entry.is_present(), "page table: double map at {addr:#x}");
        // SAFETY: Slot checked empty.
        unsafe {
            entries.add(index).write(PageEntry::new(frame, attrs));
        }
    }

    /// Identity-maps `[from, from + size)`, supervisor read/write. Only
    /// meaningful before paging is enabled.
    fn direct_map(&mut self, pools: &mut PoolRegistry, directory: PhysFrame, from: VirtAddr, size: u32) {
        let start = Page::containing_address(from);
        let end = Page::containing_address(from + size);
        for page in Page::range(start, end) {
            let frame = PhysFrame::new(page.number());
            self.install_mapping(
                pools,
                directory,
                page.start_address(),
                frame,
                PageAttrs::DEFAULT_SUPERVISOR_PAGE,
            );
        }
    }

    /// Copies the shared-region directory entries of the loaded table into
    /// `new_directory`, sharing their page tables.
    fn copy_shared(&self, new_directory: PhysFrame) {
        let current = self
            .current_table()
            .expect("paging: constructing a table with paging on requires a loaded table")
            .directory;
        let entries = self.shared_size.div_ceil(PD_SPAN) as usize;
        let src: *const PageEntry = self.dir_ptr(current);
        let dst: *mut PageEntry = self.mem.phys_ptr(new_directory.start_address());
        // SAFETY: Source is read through the discipline; the destination
        // directory was just allocated and is addressed physically.
        unsafe { copy_directory_prefix(src, dst, entries) };
    }

    fn store_table(&mut self, table: PageTable) -> PageTableId {
        if let Some(index) = self.tables.iter().position(Option::is_none) {
            self.tables[index] = Some(table);
            return PageTableId(index);
        }
        let index = self.tables.len();
        assert!(
            self.tables.try_push(Some(table)).is_ok(),
            "paging: more than {MAX_TABLES} page tables"
        );
        PageTableId(index)
    }

    fn take_frame(pools: &mut PoolRegistry, handle: PoolHandle, what: &str) -> PhysFrame {
        pools
            .get_frames(handle, 1)
            .unwrap_or_else(|| panic!("paging: out of frames for {what}"))
    }
}

/// Copies the first `entries` directory entries from `src` to `dst`.
///
/// # Safety
///
/// Both pointers must cover at least `entries` entries and not alias.
unsafe fn copy_directory_prefix(src: *const PageEntry, dst: *mut PageEntry, entries: usize) {
    for index in 0..entries {
        // SAFETY: In range per the contract.
        unsafe { dst.add(index).write(src.add(index).read()) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm_pool::VmPool;
    use muon_core::addr::PhysAddr;

    struct Env {
        _backing: Vec<u64>,
        registry: PoolRegistry,
        paging: Paging,
        table: PageTableId,
        kernel: PoolHandle,
        process: PoolHandle,
    }

    const SHARED: u32 = 0x20_0000;
    const VM_BASE: u32 = 0x40_0000;
    const VM_SIZE: u32 = 0x10_0000;

    fn env() -> Env {
        let mut backing = vec![0u64; 6 * 1024 * 1024 / 8];
        let map = DirectMap::at_base(backing.as_mut_ptr() as usize);

        let mut registry = PoolRegistry::new();
        let kernel = unsafe { registry.create_pool(PhysFrame::new(8), 16, None, map) };
        let process = unsafe { registry.create_pool(PhysFrame::new(256), 256, None, map) };

        let mut paging = Paging::new(kernel, process, SHARED, map);
        let table = paging.create_table(&mut registry);
        paging.load(table);

        Env {
            _backing: backing,
            registry,
            paging,
            table,
            kernel,
            process,
        }
    }

    fn heap(env: &mut Env) -> VmPool {
        VmPool::new(
            VirtAddr::new(VM_BASE),
            VM_SIZE,
            env.process,
            &mut env.paging,
            env.table,
            true,
        )
    }

    // -- self-map arithmetic ------------------------------------------------

    #[test]
    fn self_map_addresses() {
        assert_eq!(PD_SELF_ADDR.pd_index(), PD_SELF_INDEX);
        assert_eq!(PD_SELF_ADDR.pt_index(), PD_SELF_INDEX);
        assert_eq!(pt_self_addr(VirtAddr::zero()).as_u32(), 0xFFC0_0000);
        assert_eq!(pt_self_addr(VirtAddr::new(0x0040_1000)).as_u32(), 0xFFC0_1000);
        assert_eq!(pt_self_addr(VirtAddr::new(0x4000_0000)).as_u32(), 0xFFD0_0000);
        // The table covering a self-map address is the directory itself.
        assert_eq!(pt_self_addr(PD_SELF_ADDR).as_u32(), 0xFFFF_F000);
    }

    #[test]
    fn self_map_resolves_to_the_directory() {
        let env = env();
        let directory = env.paging.table(env.table).unwrap().directory();
        // Walking the self-map address lands on the directory frame, even
        // before paging is enabled.
        assert_eq!(
            env.paging.translate(PD_SELF_ADDR),
            Some(directory.start_address())
        );
    }

    // -- construction -------------------------------------------------------

    #[test]
    fn shared_region_is_direct_mapped() {
        let env = env();
        assert_eq!(
            env.paging.translate(VirtAddr::new(0x1000)),
            Some(PhysAddr::new(0x1000))
        );
        assert_eq!(
            env.paging.translate(VirtAddr::new(SHARED - 1)),
            Some(PhysAddr::new(SHARED - 1))
        );
        // Nothing above the shared region is mapped yet.
        assert_eq!(env.paging.translate(VirtAddr::new(SHARED)), None);
        assert_eq!(env.paging.translate(VirtAddr::new(VM_BASE)), None);
    }

    #[test]
    fn construction_draws_from_the_configured_pools() {
        let mut backing = vec![0u64; 6 * 1024 * 1024 / 8];
        let map = DirectMap::at_base(backing.as_mut_ptr() as usize);
        let mut registry = PoolRegistry::new();
        let kernel = unsafe { registry.create_pool(PhysFrame::new(8), 16, None, map) };
        let process = unsafe { registry.create_pool(PhysFrame::new(256), 256, None, map) };

        let kernel_before = registry.pool(kernel).free_frames();
        let process_before = registry.pool(process).free_frames();

        let mut paging = Paging::new(kernel, process, SHARED, map);
        let _table = paging.create_table(&mut registry);

        // One kernel frame for the directory, one process frame for the
        // single shared-region page table.
        assert_eq!(registry.pool(kernel).free_frames(), kernel_before - 1);
        assert_eq!(registry.pool(process).free_frames(), process_before - 1);
    }

    #[test]
    fn enable_paging_is_idempotent() {
        let mut env = env();
        assert!(!env.paging.enabled());
        env.paging.enable_paging();
        assert!(env.paging.enabled());
        env.paging.enable_paging();
        assert!(env.paging.enabled());
    }

    #[test]
    fn copy_directory_prefix_copies_exactly_the_prefix() {
        let src = [PageEntry::new(PhysFrame::new(7), PageAttrs::DEFAULT_SUPERVISOR_PAGE); 4];
        let mut dst = [PageEntry::empty(); 4];
        unsafe { copy_directory_prefix(src.as_ptr(), dst.as_mut_ptr(), 2) };
        assert_eq!(dst[0], src[0]);
        assert_eq!(dst[1], src[1]);
        assert_eq!(dst[2], PageEntry::empty());
    }

    // -- fault resolution ---------------------------------------------------

    #[test]
    fn fault_backs_a_page_exactly_once() {
        let mut env = env();
        let mut pool = heap(&mut env);

        let addr = pool.allocate(2 * 4096).unwrap();
        let before = env.registry.pool(env.process).free_frames();
        assert_eq!(env.paging.translate(addr), None);

        env.paging
            .handle_fault(&mut env.registry, addr, PageFaultCode::empty());

        // One backing frame, plus the page-table page for the region.
        assert_eq!(env.registry.pool(env.process).free_frames(), before - 2);
        let backed = env.paging.translate(addr).expect("fault installed a mapping");
        assert!(env.registry.find(PhysFrame::containing_address(backed)) == Some(env.process));

        // A second page of the same region faults independently and shares
        // the page table.
        env.paging
            .handle_fault(&mut env.registry, addr + 4096, PageFaultCode::empty());
        assert_eq!(env.registry.pool(env.process).free_frames(), before - 3);
        assert!(env.paging.translate(addr + 4096).is_some());

        // The first page is still mapped to its original frame.
        assert_eq!(env.paging.translate(addr), Some(backed));
    }

    #[test]
    fn fault_offset_survives_into_the_translation() {
        let mut env = env();
        let mut pool = heap(&mut env);
        let addr = pool.allocate(4096).unwrap();

        env.paging
            .handle_fault(&mut env.registry, addr + 0x123, PageFaultCode::empty());
        let phys = env.paging.translate(addr + 0x123).unwrap();
        assert_eq!(phys.as_u32() & 0xFFF, 0x123);
    }

    #[test]
    #[should_panic(expected = "outside every registered region")]
    fn fault_outside_all_regions_is_fatal() {
        let mut env = env();
        let _pool = heap(&mut env);
        env.paging.handle_fault(
            &mut env.registry,
            VirtAddr::new(0x3000_0000),
            PageFaultCode::empty(),
        );
    }

    #[test]
    #[should_panic(expected = "double map")]
    fn refaulting_a_mapped_page_is_fatal() {
        let mut env = env();
        let mut pool = heap(&mut env);
        let addr = pool.allocate(4096).unwrap();
        env.paging
            .handle_fault(&mut env.registry, addr, PageFaultCode::empty());
        env.paging
            .handle_fault(&mut env.registry, addr, PageFaultCode::empty());
    }

    #[test]
    #[should_panic(expected = "backing frame pool exhausted")]
    fn fault_with_an_exhausted_pool_is_fatal() {
        let mut env = env();
        let mut pool = heap(&mut env);
        let addr = pool.allocate(4096).unwrap();
        // Drain the process pool completely.
        while env.registry.get_frames(env.process, 1).is_some() {}
        env.paging
            .handle_fault(&mut env.registry, addr, PageFaultCode::empty());
    }

    // -- free_page ----------------------------------------------------------

    #[test]
    fn free_page_unmaps_and_returns_the_frame() {
        let mut env = env();
        let mut pool = heap(&mut env);
        let addr = pool.allocate(4096).unwrap();

        env.paging
            .handle_fault(&mut env.registry, addr, PageFaultCode::empty());
        let after_fault = env.registry.pool(env.process).free_frames();

        env.paging
            .free_page(&mut env.registry, Page::containing_address(addr));
        assert_eq!(env.paging.translate(addr), None);
        // The backing frame came back; the page-table page stays.
        assert_eq!(env.registry.pool(env.process).free_frames(), after_fault + 1);

        // Releasing again is a no-op.
        env.paging
            .free_page(&mut env.registry, Page::containing_address(addr));
        assert_eq!(env.registry.pool(env.process).free_frames(), after_fault + 1);
    }

    #[test]
    fn freed_page_can_be_backed_again() {
        let mut env = env();
        let mut pool = heap(&mut env);
        let addr = pool.allocate(4096).unwrap();

        env.paging
            .handle_fault(&mut env.registry, addr, PageFaultCode::empty());
        env.paging
            .free_page(&mut env.registry, Page::containing_address(addr));

        // A fresh fault must install a fresh frame -- no stale translation.
        env.paging
            .handle_fault(&mut env.registry, addr, PageFaultCode::empty());
        assert!(env.paging.translate(addr).is_some());
    }

    // -- teardown -----------------------------------------------------------

    #[test]
    fn destroy_returns_every_frame() {
        let mut env = env();
        let kernel_before = env.registry.pool(env.kernel).free_frames();
        let process_before = env.registry.pool(env.process).free_frames();

        let table = env.paging.create_table(&mut env.registry);
        env.paging.load(table);
        let mut pool = VmPool::new(
            VirtAddr::new(VM_BASE),
            VM_SIZE,
            env.process,
            &mut env.paging,
            table,
            false,
        );

        // Back the region table page and two allocation pages.
        env.paging.handle_fault(
            &mut env.registry,
            VirtAddr::new(VM_BASE),
            PageFaultCode::empty(),
        );
        let addr = pool.allocate(2 * 4096).unwrap();
        env.paging
            .handle_fault(&mut env.registry, addr, PageFaultCode::empty());
        env.paging
            .handle_fault(&mut env.registry, addr + 4096, PageFaultCode::empty());

        env.paging.destroy(&mut env.registry, table);

        // Directory, region page table, and all three backings returned.
        // The one frame still out is this table's shared-region page table:
        // shared page tables are never reclaimed, because address spaces
        // constructed after paging is on reference the same frames.
        assert_eq!(env.registry.pool(env.kernel).free_frames(), kernel_before);
        assert_eq!(
            env.registry.pool(env.process).free_frames(),
            process_before - 1
        );
        assert!(env.paging.table(table).is_none());
        assert_eq!(env.paging.current(), None);
    }

    #[test]
    #[should_panic(expected = "destroy of an unknown page table")]
    fn double_destroy_is_fatal() {
        let mut env = env();
        let table = env.paging.create_table(&mut env.registry);
        env.paging.destroy(&mut env.registry, table);
        env.paging.destroy(&mut env.registry, table);
    }

    #[test]
    fn heap_pool_is_remembered() {
        let mut env = env();
        let _pool = heap(&mut env);
        let record = env
            .paging
            .table(env.table)
            .unwrap()
            .heap_pool()
            .expect("heap pool registered");
        assert_eq!(record.base_page().start_address().as_u32(), VM_BASE);
    }
}
