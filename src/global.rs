use core::ptr::NonNull;

use crate::{
    base::{Chunk, MmapAlloc},
    heap::{self, ThreadHeap},
    stat::HeapStat,
    supplier::{chunk_layout, ChunkSupplier},
};

static SUPPLIER: ChunkSupplier<MmapAlloc> = ChunkSupplier::new(MmapAlloc::new());

thread_local! {
    static HEAP: ThreadHeap<'static, MmapAlloc> = ThreadHeap::new(&SUPPLIER);
}

/// The process-global allocator façade, backed by one shared chunk supplier
/// and a lazily created heap per thread.
///
/// A thread's first allocation creates its heap; when the thread exits, the
/// heap's pools drain back into the shared supplier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Reap;

impl Reap {
    /// Allocates `nbytes` on the current thread's heap. `None` means the OS
    /// refused memory. Requests above
    /// [`MAX_SMALL_ALLOC`](crate::config::MAX_SMALL_ALLOC) receive a whole
    /// untracked chunk; see [`Reap::release_chunk`].
    pub fn allocate(&self, nbytes: usize) -> Option<NonNull<u8>> {
        HEAP.with(|heap| heap.allocate(nbytes))
    }

    /// Stamps a small-object block free from any thread. The memory is
    /// recycled by the owning thread's next [`garbage_collect`][Self::garbage_collect].
    ///
    /// # Safety
    ///
    /// `block` must come from [`Reap::allocate`] with a small size and must
    /// not be used (or freed through a reclaim cycle twice) afterwards.
    pub unsafe fn deallocate(&self, block: NonNull<u8>) {
        unsafe { heap::deallocate(block) }
    }

    /// Reclaims up to `max_scan` freed blocks on the current thread,
    /// returning how many were recycled.
    pub fn garbage_collect(&self, max_scan: usize) -> usize {
        HEAP.with(|heap| heap.garbage_collect(max_scan))
    }

    /// Unbounded [`garbage_collect`][Self::garbage_collect].
    pub fn collect(&self) -> usize {
        self.garbage_collect(usize::MAX)
    }

    /// Returns a chunk obtained from an over-[`MAX_SMALL_ALLOC`] allocation.
    ///
    /// # Safety
    ///
    /// `chunk` must be a pointer returned by a large [`Reap::allocate`], not
    /// yet released, and unused afterwards.
    ///
    /// [`MAX_SMALL_ALLOC`]: crate::config::MAX_SMALL_ALLOC
    pub unsafe fn release_chunk(&self, chunk: NonNull<u8>) {
        // SAFETY: large allocations hand out exactly one chunk, whose
        // mapping is reconstructible from `(pointer, chunk_layout())`.
        SUPPLIER.release(unsafe { Chunk::new(chunk, chunk_layout(), ()) });
    }

    /// Snapshot of the current thread's pool counts.
    pub fn stat(&self) -> HeapStat {
        HEAP.with(|heap| heap.stat())
    }

    /// Snapshot of the shared supplier's cached chunk count.
    pub fn cached_chunks(&self) -> usize {
        SUPPLIER.cached()
    }
}
