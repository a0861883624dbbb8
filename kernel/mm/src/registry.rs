//! Frame-pool registry.
//!
//! A released run is identified only by its first frame, so something must
//! map a bare frame number back to the pool that owns it. The registry
//! owns every [`FramePool`] in the system and answers that point-containment
//! query with a linear scan; pool count is tiny (typically two), so nothing
//! fancier is warranted.
//!
//! Pools are addressed by [`PoolHandle`], an index into the registry. The
//! handle form keeps ownership acyclic: page tables and region pools record
//! which pool they draw from without holding a reference into it.

use arrayvec::ArrayVec;
use muon_core::frame::PhysFrame;
use muon_core::mem::DirectMap;

use crate::frame_pool::FramePool;

/// Maximum number of frame pools in the system.
pub const MAX_POOLS: usize = 8;

/// Identifies a [`FramePool`] owned by the registry.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct PoolHandle(usize);

impl PoolHandle {
    #[cfg(test)]
    pub(crate) const fn dangling() -> Self {
        Self(usize::MAX)
    }
}

/// Owner of all frame pools, indexed by frame-number range.
///
/// Ranges are pairwise disjoint; [`insert`](Self::insert) enforces it.
#[derive(Debug, Default)]
pub struct PoolRegistry {
    pools: ArrayVec<FramePool, MAX_POOLS>,
}

impl PoolRegistry {
    /// Creates an empty registry.
    pub const fn new() -> Self {
        Self {
            pools: ArrayVec::new_const(),
        }
    }

    /// Creates a pool and links it into the registry.
    ///
    /// See [`FramePool::new`] for the parameters and panics.
    ///
    /// # Safety
    ///
    /// Same contract as [`FramePool::new`].
    pub unsafe fn create_pool(
        &mut self,
        base: PhysFrame,
        n_frames: u32,
        info: Option<(PhysFrame, u32)>,
        mem: DirectMap,
    ) -> PoolHandle {
        // SAFETY: Forwarded caller contract.
        let pool = unsafe { FramePool::new(base, n_frames, info, mem) };
        self.insert(pool)
    }

    /// Links an existing pool into the registry.
    ///
    /// # Panics
    ///
    /// Panics when the registry is full or the pool's range overlaps a
    /// registered pool.
    pub fn insert(&mut self, pool: FramePool) -> PoolHandle {
        for existing in &self.pools {
            let disjoint = pool.base().number() + pool.n_frames() <= existing.base().number()
                || existing.base().number() + existing.n_frames() <= pool.base().number();
            assert!(
                disjoint,
                "pool registry: range {}..{} overlaps registered pool {}..{}",
                pool.base(),
                pool.base().number() + pool.n_frames(),
                existing.base(),
                existing.base().number() + existing.n_frames()
            );
        }
        let handle = PoolHandle(self.pools.len());
        assert!(
            self.pools.try_push(pool).is_ok(),
            "pool registry: more than {MAX_POOLS} pools"
        );
        handle
    }

    /// Returns the pool owning `frame`, if any.
    pub fn find(&self, frame: PhysFrame) -> Option<PoolHandle> {
        self.pools
            .iter()
            .position(|pool| pool.contains(frame))
            .map(PoolHandle)
    }

    /// Returns the pool behind `handle`.
    pub fn pool(&self, handle: PoolHandle) -> &FramePool {
        &self.pools[handle.0]
    }

    /// Returns the pool behind `handle`, mutably.
    pub fn pool_mut(&mut self, handle: PoolHandle) -> &mut FramePool {
        &mut self.pools[handle.0]
    }

    /// Allocates `n` contiguous frames from the pool behind `handle`.
    pub fn get_frames(&mut self, handle: PoolHandle, n: u32) -> Option<PhysFrame> {
        self.pool_mut(handle).get_frames(n)
    }

    /// Releases the run starting at `first`, whichever pool owns it.
    ///
    /// This is the system-wide release path: callers know a frame number,
    /// not a pool.
    ///
    /// # Panics
    ///
    /// Panics when no pool contains `first` (foreign frame), or when the
    /// owning pool rejects the release (not a `HEAD` frame).
    pub fn release_frames(&mut self, first: PhysFrame) {
        let handle = self
            .find(first)
            .unwrap_or_else(|| panic!("pool registry: release of foreign frame {first}"));
        self.pool_mut(handle).release_frames(first);
    }
}
