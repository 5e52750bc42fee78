//! Compile-time tuning knobs. Everything here is a constant; there is no
//! runtime configuration surface.

/// Log2 of [`CHUNK_SIZE`].
pub const CHUNK_SHIFT: usize = 21;

/// The granule obtained from and returned to the OS. Every chunk is aligned
/// to its own size, so masking the low [`CHUNK_SHIFT`] bits of any block
/// pointer recovers the owning pool header.
pub const CHUNK_SIZE: usize = 1 << CHUNK_SHIFT;

/// Smallest block size handed out; also the smallest size-class entry.
pub const MIN_ALLOC: usize = 32;

/// Every size class is a multiple of this.
pub const ALIGNMENT: usize = 16;

/// Largest request served from the size-class pools. Anything bigger is
/// handed a whole chunk directly.
pub const MAX_SMALL_ALLOC: usize = 1 << 20;

/// Empty-pool count a manager refills up to when it runs dry.
pub const TARGET_EMPTY_POOLS: usize = 2;

/// Empty-pool count beyond which a manager returns pools to the supplier.
/// Strictly above [`TARGET_EMPTY_POOLS`] so alternating alloc/free traffic
/// does not oscillate between refill and trim.
pub const HIGH_EMPTY_POOLS: usize = 4;

/// Chunk count the supplier refills its cache up to on an empty acquire.
pub const TARGET_CACHED_CHUNKS: usize = 8;

/// Chunk count beyond which released chunks go back to the OS.
pub const MAX_CACHED_CHUNKS: usize = 16;

/// Stamped at offset 0 of every live pool header.
pub const POOL_MAGIC: u32 = 0xDEAD_BEEF;

/// Assumed cache-line size, used to pad the pool header so the lock does not
/// share a line with the magic word read by pointer-inference checks.
pub const CACHE_LINE: usize = 64;
