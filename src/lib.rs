//! A small-object allocator with deferred, cooperative reclamation.
//!
//! Three tiers:
//! - a process-wide [`ChunkSupplier`](supplier::ChunkSupplier) recycling
//!   2 MiB aligned chunks over the OS mapper,
//! - per-thread, per-size-class [pool managers](heap::SizeClassPoolManager)
//!   migrating pools between empty/partial/full lists under watermarks,
//! - [pools](pool::SubPool) carving each chunk into equal blocks tracked by
//!   a bitmap.
//!
//! Freeing is split in two: [`Reap::deallocate`] may run on any thread and
//! only stamps the block's header, while the owning thread recycles stamped
//! blocks in its next [`Reap::garbage_collect`] pass. The chunk alignment
//! makes the owner pool of any block recoverable by pointer masking, so a
//! block needs no metadata beyond its 16-byte header.
//!
//! # Usage
//!
//! ```
//! use reap::Reap;
//!
//! let block = Reap.allocate(64).unwrap();
//! unsafe { Reap.deallocate(block) };
//! assert_eq!(Reap.collect(), 1);
//! ```

pub mod base;
pub mod config;
mod global;
pub mod heap;
pub mod pool;
pub mod size_class;
pub mod stat;
pub mod supplier;

pub use self::{
    base::{BaseAlloc, Chunk, MapError, MmapAlloc},
    global::Reap,
};

#[cfg(test)]
mod tests {
    use crate::{
        heap::{self, ThreadHeap},
        supplier::ChunkSupplier,
        MmapAlloc,
    };

    #[test]
    fn basic() {
        let supplier = ChunkSupplier::new(MmapAlloc);
        let heap = ThreadHeap::new(&supplier);

        let block = heap.allocate(64).unwrap();
        unsafe {
            // The payload area past the header is ours to scribble on.
            block.as_ptr().add(16).write_bytes(0x5A, 48);
            heap::deallocate(block);
        }
        assert_eq!(heap.garbage_collect(usize::MAX), 1);
    }

    #[test]
    fn many_classes() {
        let supplier = ChunkSupplier::new(MmapAlloc);
        let heap = ThreadHeap::new(&supplier);

        let blocks: Vec<_> = (0..12)
            .map(|i| heap.allocate(32 << i).unwrap())
            .collect();
        for &block in &blocks {
            unsafe { heap::deallocate(block) };
        }
        assert_eq!(heap.garbage_collect(usize::MAX), blocks.len());
    }
}
