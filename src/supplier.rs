//! The process-wide chunk layer: a bounded LIFO cache between the pools and
//! the OS mapper, amortizing map/unmap calls with watermark hysteresis.

use core::alloc::Layout;

use parking_lot::Mutex;

use crate::{
    base::{BaseAlloc, Chunk},
    config::{CHUNK_SIZE, MAX_CACHED_CHUNKS, TARGET_CACHED_CHUNKS},
};

/// The layout of every chunk: one 2 MiB block aligned to its own size.
pub const fn chunk_layout() -> Layout {
    match Layout::from_size_align(CHUNK_SIZE, CHUNK_SIZE) {
        Ok(layout) => layout,
        Err(_) => panic!("invalid chunk layout"),
    }
}

/// Supplies and recycles aligned chunks.
///
/// Acquisitions pop the most recently released chunk first; an acquire on an
/// empty cache refills from the OS up to [`TARGET_CACHED_CHUNKS`], and a
/// release onto a cache already holding [`MAX_CACHED_CHUNKS`] unmaps instead
/// of caching.
pub struct ChunkSupplier<B: BaseAlloc> {
    base: B,
    cache: Mutex<Vec<Chunk<B>>>,
}

impl<B: BaseAlloc> ChunkSupplier<B> {
    pub const fn new(base: B) -> Self {
        ChunkSupplier {
            base,
            cache: Mutex::new(Vec::new()),
        }
    }

    pub fn base(&self) -> &B {
        &self.base
    }

    /// Pops a cached chunk, refilling the cache from the OS first if it is
    /// empty. Returns `None` only if the OS refuses to produce even one
    /// chunk while the cache is empty.
    pub fn acquire(&self) -> Option<Chunk<B>> {
        let mut cache = self.cache.lock();
        if cache.is_empty() {
            self.refill(&mut cache);
        }
        cache.pop()
    }

    fn refill(&self, cache: &mut Vec<Chunk<B>>) {
        while cache.len() < TARGET_CACHED_CHUNKS {
            match self.base.allocate(chunk_layout()) {
                Ok(chunk) => cache.push(chunk),
                Err(err) => {
                    // Partial refill is fine as long as one chunk came out.
                    log::warn!(
                        "chunk refill stopped at {} of {TARGET_CACHED_CHUNKS}: {err}",
                        cache.len()
                    );
                    break;
                }
            }
        }
    }

    /// Recycles a chunk, unmapping it if the cache is at its high watermark.
    pub fn release(&self, chunk: Chunk<B>) {
        debug_assert_eq!(chunk.layout(), chunk_layout());
        let mut cache = self.cache.lock();
        if cache.len() < MAX_CACHED_CHUNKS {
            cache.push(chunk);
        } else {
            drop(cache);
            // Unmap outside the lock.
            drop(chunk);
        }
    }

    /// Snapshot of the cached chunk count, for diagnostics only.
    pub fn cached(&self) -> usize {
        self.cache.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::MmapAlloc;

    #[test]
    fn acquire_refills_then_pops() {
        let supplier = ChunkSupplier::new(MmapAlloc);
        assert_eq!(supplier.cached(), 0);

        let chunk = supplier.acquire().unwrap();
        assert_eq!(supplier.cached(), TARGET_CACHED_CHUNKS - 1);
        assert_eq!(chunk.pointer().addr().get() & (CHUNK_SIZE - 1), 0);
        supplier.release(chunk);
        assert_eq!(supplier.cached(), TARGET_CACHED_CHUNKS);
    }

    #[test]
    fn release_acquire_is_lifo() {
        let supplier = ChunkSupplier::new(MmapAlloc);
        let a = supplier.acquire().unwrap();
        let b = supplier.acquire().unwrap();
        let c = supplier.acquire().unwrap();
        let (pa, pb, pc) = (a.pointer(), b.pointer(), c.pointer());

        supplier.release(a);
        supplier.release(b);
        supplier.release(c);

        assert_eq!(supplier.acquire().unwrap().pointer(), pc);
        assert_eq!(supplier.acquire().unwrap().pointer(), pb);
        assert_eq!(supplier.acquire().unwrap().pointer(), pa);
    }

    #[test]
    fn release_caps_at_high_watermark() {
        let supplier = ChunkSupplier::new(MmapAlloc);
        let chunks: Vec<_> = (0..MAX_CACHED_CHUNKS + 3)
            .map(|_| supplier.acquire().unwrap())
            .collect();
        for chunk in chunks {
            supplier.release(chunk);
        }
        assert_eq!(supplier.cached(), MAX_CACHED_CHUNKS);
    }

    #[test]
    fn concurrent_acquire_release() {
        use std::sync::Arc;

        let supplier = Arc::new(ChunkSupplier::new(MmapAlloc));
        let threads: Vec<_> = (0..4)
            .map(|_| {
                let supplier = Arc::clone(&supplier);
                std::thread::spawn(move || {
                    for _ in 0..64 {
                        let chunk = supplier.acquire().unwrap();
                        supplier.release(chunk);
                    }
                })
            })
            .collect();
        for thread in threads {
            thread.join().unwrap();
        }
        assert!(supplier.cached() <= MAX_CACHED_CHUNKS);
    }
}
