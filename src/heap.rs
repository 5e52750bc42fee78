//! The per-thread tier: size-class pool managers and the thread heap.
//!
//! See [`ThreadHeap`] for the allocate / deferred-free / reclaim contract.

mod block;

use core::ptr::NonNull;

use array_macro::array;

pub use self::block::{BlockHeader, BlockState, ManagedList};
use crate::{
    base::BaseAlloc,
    config::{HIGH_EMPTY_POOLS, MAX_SMALL_ALLOC, TARGET_EMPTY_POOLS},
    pool::{PoolList, SubPool},
    size_class::{class_to_size, size_to_class, CLASS_COUNT},
    stat::{HeapStat, ManagerStat},
    supplier::ChunkSupplier,
};

/// The capability a manager draws fresh pools from and retires empty pools
/// to. Managers deliberately know nothing about the chunk layer behind it.
pub trait PoolSource<B: BaseAlloc> {
    /// Produces a fresh, empty, detached pool of `block_size` blocks, or
    /// `None` when no memory can be obtained.
    fn grow(&self, block_size: usize) -> Option<NonNull<SubPool<B>>>;

    /// Takes back a detached pool and destroys it.
    fn retire(&self, pool: NonNull<SubPool<B>>);
}

/// Per-thread cache of pools for one size class.
///
/// Pools migrate between the `empty`, `partial` and `full` lists as their
/// used count changes; refill is lazy (only when nothing is allocatable) and
/// trim is eager (on every release that grows `empty` past the high
/// watermark), with hysteresis between the two thresholds.
///
/// Single-threaded by contract: a manager belongs to one [`ThreadHeap`] and
/// has no internal synchronization.
pub struct SizeClassPoolManager<B: BaseAlloc> {
    block_size: usize,
    empty: PoolList<B>,
    partial: PoolList<B>,
    full: PoolList<B>,
}

impl<B: BaseAlloc> SizeClassPoolManager<B> {
    pub const fn new(block_size: usize) -> Self {
        SizeClassPoolManager {
            block_size,
            empty: PoolList::new(),
            partial: PoolList::new(),
            full: PoolList::new(),
        }
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// `(empty, partial, full)` list lengths, for diagnostic sampling.
    pub fn pool_counts(&self) -> (usize, usize, usize) {
        (self.empty.len(), self.partial.len(), self.full.len())
    }

    /// Hands out one block, growing the pool set through `source` when both
    /// `partial` and `empty` are exhausted.
    pub fn allocate_block(&self, source: &impl PoolSource<B>) -> Option<NonNull<u8>> {
        if self.partial.is_empty() && self.empty.is_empty() {
            self.refill_empty(source);
        }

        // SAFETY: Pools in our lists are valid until retired.
        let pool = match unsafe { self.partial.pop_front() } {
            Some(pool) => pool,
            None => unsafe { self.empty.pop_front() }?,
        };
        let pool_ref = unsafe { pool.as_ref() };

        let block = pool_ref.allocate();
        let list = match &block {
            // A pool just popped from `empty`/`partial` should always have a
            // free slot; reinsert by current state if it somehow does not.
            None if pool_ref.is_empty() => &self.empty,
            Some(_) | None if pool_ref.is_full() => &self.full,
            Some(_) | None => &self.partial,
        };
        // SAFETY: `pool` was just detached from one of our lists.
        unsafe { list.push_front(pool) };
        block
    }

    /// Takes back a block previously handed out by one of this manager's
    /// pools. Returns `false` without side effects if the block's owner is
    /// not of this manager's size class.
    pub fn release_block(&self, block: NonNull<u8>, source: &impl PoolSource<B>) -> bool {
        // SAFETY: The caller hands us an allocator-issued block pointer.
        let Some(pool) = (unsafe { SubPool::from_ptr(block) }) else {
            return false;
        };
        let pool_ref = unsafe { pool.as_ref() };
        if pool_ref.block_size() != self.block_size {
            return false;
        }

        // The pre-release state pins down the list the pool lives in:
        // `empty` cannot host a live block.
        let was_full = pool_ref.is_full();
        // SAFETY: the block is live and belongs to `pool`.
        unsafe { pool_ref.release(block) };

        // SAFETY: membership matches the state observed above.
        unsafe {
            if was_full {
                debug_assert!(self.full.contains(pool_ref));
                self.full.remove(pool);
            } else {
                debug_assert!(self.partial.contains(pool_ref));
                self.partial.remove(pool);
            }
            if pool_ref.is_empty() {
                self.empty.push_front(pool);
                self.trim_empty(source);
            } else {
                self.partial.push_front(pool);
            }
        }
        true
    }

    /// Whether `block`'s masked owner is a pool of this size class.
    pub fn owns_pointer(&self, block: NonNull<u8>) -> bool {
        // SAFETY: The caller hands us an allocator-issued block pointer.
        match unsafe { SubPool::<B>::from_ptr(block) } {
            Some(pool) => unsafe { pool.as_ref() }.block_size() == self.block_size,
            None => false,
        }
    }

    fn refill_empty(&self, source: &impl PoolSource<B>) {
        while self.empty.len() < TARGET_EMPTY_POOLS {
            let Some(pool) = source.grow(self.block_size) else {
                // Partial refill; the next allocation that finds both lists
                // dry retries.
                break;
            };
            let pool_ref = unsafe { pool.as_ref() };
            debug_assert!(pool_ref.is_empty());
            debug_assert_eq!(pool_ref.block_size(), self.block_size);
            // SAFETY: a grown pool is fresh and detached.
            unsafe { self.empty.push_front(pool) };
        }
    }

    fn trim_empty(&self, source: &impl PoolSource<B>) {
        while self.empty.len() > HIGH_EMPTY_POOLS {
            // SAFETY: pools in `empty` are valid and, once popped, detached.
            let Some(pool) = (unsafe { self.empty.pop_front() }) else {
                break;
            };
            log::debug!(
                "trimming an empty pool of block size {}",
                self.block_size
            );
            source.retire(pool);
        }
    }

    /// Detaches every pool and hands it to `source`, leaving the manager
    /// empty. Pools still holding live blocks are retired all the same; any
    /// outstanding pointer into them is the caller's leak.
    pub(crate) fn retire_all(&self, source: &impl PoolSource<B>) {
        for list in [&self.empty, &self.partial, &self.full] {
            // SAFETY: pools in our lists are valid and popped before retire.
            while let Some(pool) = unsafe { list.pop_front() } {
                source.retire(pool);
            }
        }
    }

    fn stat(&self) -> ManagerStat {
        let (empty, partial, full) = self.pool_counts();
        ManagerStat {
            block_size: self.block_size,
            empty_pools: empty,
            partial_pools: partial,
            full_pools: full,
        }
    }
}

/// [`PoolSource`] backed by a chunk supplier: growth carves a pool into a
/// fresh chunk, retirement tears the pool down and recycles its chunk.
pub struct SupplierSource<'s, B: BaseAlloc>(pub &'s ChunkSupplier<B>);

impl<'s, B: BaseAlloc> PoolSource<B> for SupplierSource<'s, B> {
    fn grow(&self, block_size: usize) -> Option<NonNull<SubPool<B>>> {
        let chunk = self.0.acquire()?;
        // SAFETY: the chunk comes straight from the supplier.
        Some(unsafe { SubPool::init(chunk, block_size) })
    }

    fn retire(&self, pool: NonNull<SubPool<B>>) {
        // SAFETY: retired pools are detached with no references left.
        self.0.release(unsafe { SubPool::into_chunk(pool) });
    }
}

/// A thread's allocator front end: one pool manager per size class plus the
/// managed list of every block the thread has handed out.
///
/// `allocate` and `garbage_collect` must stay on the owning thread;
/// [`deallocate`] is callable from anywhere. Dropping the heap returns every
/// pool to the supplier.
pub struct ThreadHeap<'s, B: BaseAlloc> {
    supplier: &'s ChunkSupplier<B>,
    managers: [SizeClassPoolManager<B>; CLASS_COUNT],
    managed: ManagedList,
}

impl<'s, B: BaseAlloc> ThreadHeap<'s, B> {
    pub fn new(supplier: &'s ChunkSupplier<B>) -> Self {
        ThreadHeap {
            supplier,
            managers: array![i => SizeClassPoolManager::new(class_to_size(i)); CLASS_COUNT],
            managed: ManagedList::new(),
        }
    }

    fn source(&self) -> SupplierSource<'s, B> {
        SupplierSource(self.supplier)
    }

    /// Allocates `nbytes`. Small requests come from the size-class pools and
    /// are tracked for reclamation; requests above [`MAX_SMALL_ALLOC`] get a
    /// whole untracked chunk, whose pointer must go back through a
    /// chunk-release path, never [`deallocate`].
    pub fn allocate(&self, nbytes: usize) -> Option<NonNull<u8>> {
        if nbytes > MAX_SMALL_ALLOC {
            return self.allocate_huge();
        }
        let class = size_to_class(nbytes);
        let block = self.managers[class].allocate_block(&self.source())?;
        // SAFETY: `block` is a fresh allocation of at least 32 bytes.
        unsafe { self.managed.attach_used(BlockHeader::of(block)) };
        Some(block)
    }

    #[cold]
    fn allocate_huge(&self) -> Option<NonNull<u8>> {
        Some(self.supplier.acquire()?.into_raw())
    }

    /// Walks the managed list from the head, returning every block stamped
    /// free to its pool. Processes at most `max_scan` free blocks; used
    /// blocks are skipped without counting. Returns the number reclaimed.
    pub fn garbage_collect(&self, max_scan: usize) -> usize {
        self.managed.reset_cursor();

        let source = self.source();
        let mut reclaimed = 0;
        while reclaimed < max_scan {
            // SAFETY: blocks stay valid while on the managed list.
            let Some(block) = (unsafe { self.managed.reclaim_next() }) else {
                break;
            };
            let ptr = block.cast::<u8>();
            // SAFETY: a reclaimed block was handed out by one of our pools,
            // so the mask leads to a live pool header.
            let pool = unsafe { SubPool::<B>::from_ptr(ptr).unwrap_unchecked() };
            let class = size_to_class(unsafe { pool.as_ref() }.block_size());
            let released = self.managers[class].release_block(ptr, &source);
            debug_assert!(released, "reclaimed block belongs to no manager");
            reclaimed += 1;
        }
        reclaimed
    }

    pub fn stat(&self) -> HeapStat {
        HeapStat {
            classes: array![i => self.managers[i].stat(); CLASS_COUNT],
        }
    }
}

impl<'s, B: BaseAlloc> Drop for ThreadHeap<'s, B> {
    fn drop(&mut self) {
        let source = SupplierSource(self.supplier);
        for manager in &self.managers {
            manager.retire_all(&source);
        }
    }
}

/// Stamps a block free, deferring its return to the owning thread's next
/// [`ThreadHeap::garbage_collect`] pass. Callable from any thread; performs
/// no list surgery and no other bookkeeping.
///
/// # Safety
///
/// `block` must have been returned by a small-object allocation and not yet
/// reclaimed; the caller must not touch it afterwards. A second call within
/// the same block-life is a no-op.
#[inline]
pub unsafe fn deallocate(block: NonNull<u8>) {
    unsafe { BlockHeader::mark_free(BlockHeader::of(block)) }
}
