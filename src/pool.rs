//! Fixed-size block pools carved from single chunks.
//!
//! A pool's header lives at offset 0 of its chunk, and chunks are aligned to
//! their own size, so masking the low bits of any block pointer recovers the
//! header. Nothing about a pool may ever be stored anywhere else.

mod bitmap;
mod list;

use core::{
    mem::{self, ManuallyDrop},
    ptr::{self, NonNull},
    sync::atomic::{AtomicUsize, Ordering::Relaxed},
};

use parking_lot::Mutex;

use self::bitmap::Bitmap;
pub(crate) use self::list::{PoolLink, PoolList};
use crate::{
    base::{BaseAlloc, Chunk},
    config::{ALIGNMENT, CACHE_LINE, CHUNK_SIZE, MIN_ALLOC, POOL_MAGIC},
};

/// Bitmap scan state, mutated only under the pool lock.
struct PoolInner {
    /// Index the next free-slot search starts from; never greater than the
    /// lowest free index.
    hint: usize,
    bitmap: Bitmap,
}

/// One chunk carved into equal-sized blocks.
///
/// # Invariant
///
/// The header resides at the front of its chunk, which is aligned to
/// [`CHUNK_SIZE`]; every block pointer can therefore obtain its pool with
/// pointer masking. Blocks live at `chunk + data_offset + i * block_size`.
#[repr(C)]
pub struct SubPool<B: BaseAlloc> {
    magic: u32,
    /// Keeps the lock off the cache line holding the magic word, which
    /// pointer-inference reads without taking the lock.
    _pad: [u8; CACHE_LINE - mem::size_of::<u32>()],

    block_size: usize,
    data_offset: usize,
    total_blocks: usize,
    used_blocks: AtomicUsize,

    link: PoolLink<B>,
    chunk: ManuallyDrop<Chunk<B>>,
    inner: Mutex<PoolInner>,
}

impl<B: BaseAlloc> SubPool<B> {
    /// First block offset: the header rounded up to a cache line. The bitmap
    /// inside the header is provisioned for the smallest block size, so this
    /// is independent of `block_size` and never shifts after construction.
    const DATA_OFFSET: usize = (mem::size_of::<Self>() + CACHE_LINE - 1) & !(CACHE_LINE - 1);

    /// Constructs a pool in place at the front of `chunk`.
    ///
    /// # Safety
    ///
    /// `chunk` must be a fresh chunk of [`chunk_layout`](crate::supplier::chunk_layout),
    /// with no outstanding pointers into it.
    pub(crate) unsafe fn init(chunk: Chunk<B>, block_size: usize) -> NonNull<Self> {
        debug_assert!((MIN_ALLOC..=CHUNK_SIZE / 2).contains(&block_size));
        debug_assert_eq!(block_size % ALIGNMENT, 0);

        let ptr = chunk.pointer();
        debug_assert_eq!(ptr.addr().get() & (CHUNK_SIZE - 1), 0);
        debug_assert_eq!(chunk.layout().size(), CHUNK_SIZE);

        let total_blocks = (CHUNK_SIZE - Self::DATA_OFFSET) / block_size;
        let pool = ptr.cast::<Self>();
        unsafe {
            pool.as_ptr().write(SubPool {
                magic: POOL_MAGIC,
                _pad: [0; CACHE_LINE - mem::size_of::<u32>()],
                block_size,
                data_offset: Self::DATA_OFFSET,
                total_blocks,
                used_blocks: AtomicUsize::new(0),
                link: PoolLink::new(),
                chunk: ManuallyDrop::new(chunk),
                inner: Mutex::new(PoolInner {
                    hint: 0,
                    bitmap: Bitmap::new(total_blocks),
                }),
            });
        }
        pool
    }

    /// Tears the pool down and yields its backing chunk.
    ///
    /// # Safety
    ///
    /// `pool` must be detached from any list, and no references to it or its
    /// blocks may exist after the call.
    pub(crate) unsafe fn into_chunk(pool: NonNull<Self>) -> Chunk<B> {
        unsafe {
            // A stale magic word would let a dangling masked pointer look
            // like a live pool.
            ptr::addr_of_mut!((*pool.as_ptr()).magic).write(0);
            ManuallyDrop::take(&mut (*pool.as_ptr()).chunk)
        }
    }

    /// Recovers the owning pool of a block pointer by masking off the low
    /// [`CHUNK_SIZE`](crate::config::CHUNK_SIZE) bits.
    ///
    /// # Safety
    ///
    /// `block` must point into a live pool's data region.
    pub(crate) unsafe fn from_ptr(block: NonNull<u8>) -> Option<NonNull<Self>> {
        let pool = NonNull::new(block.as_ptr().map_addr(|addr| addr & !(CHUNK_SIZE - 1)))?;
        let pool = pool.cast::<Self>();
        debug_assert_eq!(
            unsafe { ptr::addr_of!((*pool.as_ptr()).magic).read() },
            POOL_MAGIC,
            "masked pointer does not lead to a live pool"
        );
        Some(pool)
    }

    /// Hands out the first free block, or `None` when the pool is full.
    pub(crate) fn allocate(&self) -> Option<NonNull<u8>> {
        let mut inner = self.inner.lock();
        let index = inner.bitmap.find_free(inner.hint)?;
        inner.bitmap.set(index);
        inner.hint = index + 1;
        self.used_blocks.fetch_add(1, Relaxed);

        let offset = self.data_offset + index * self.block_size;
        // SAFETY: `index < total_blocks`, so the offset is within the chunk.
        Some(unsafe { self.chunk.pointer().add(offset) })
    }

    /// Returns a block to the pool.
    ///
    /// # Safety
    ///
    /// `block` must be a block start previously handed out by this pool and
    /// not yet released in this block-life.
    pub(crate) unsafe fn release(&self, block: NonNull<u8>) {
        let offset = block.addr().get() - self.chunk.pointer().addr().get() - self.data_offset;
        debug_assert_eq!(offset % self.block_size, 0);
        let index = offset / self.block_size;
        debug_assert!(index < self.total_blocks);

        let mut inner = self.inner.lock();
        inner.bitmap.clear(index);
        inner.hint = inner.hint.min(index);
        self.used_blocks.fetch_sub(1, Relaxed);
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.used_blocks.load(Relaxed) == 0
    }

    pub(crate) fn is_full(&self) -> bool {
        self.used_blocks.load(Relaxed) == self.total_blocks
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn used_blocks(&self) -> usize {
        self.used_blocks.load(Relaxed)
    }

    pub fn total_blocks(&self) -> usize {
        self.total_blocks
    }
}
