use core::{alloc::Layout, ptr::NonNull};
use std::io;

use thiserror::Error;

use super::{BaseAlloc, Chunk};

/// Mappings are page-aligned without any extra effort; alignments up to this
/// need no trimming.
const PAGE_SIZE: usize = 4096;

#[derive(Debug, Error)]
#[error("mmap failed: {0}")]
pub struct MapError(#[source] pub io::Error);

/// A base allocator backed by the `mmap` function series.
///
/// Requests whose alignment exceeds the page size are over-mapped by the
/// alignment and the slack is unmapped, so the live mapping is exactly
/// `(pointer, layout.size())` and can be unmapped from those two alone.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct MmapAlloc;

impl MmapAlloc {
    pub const fn new() -> Self {
        MmapAlloc
    }
}

fn map(len: usize) -> Result<NonNull<u8>, MapError> {
    // SAFETY: FFI with valid arguments; a fresh anonymous mapping aliases
    // nothing.
    let ptr = unsafe {
        libc::mmap(
            core::ptr::null_mut(),
            len,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
            -1,
            0,
        )
    };
    if ptr == libc::MAP_FAILED {
        return Err(MapError(io::Error::last_os_error()));
    }
    Ok(NonNull::new(ptr.cast()).expect("mmap returned a null mapping"))
}

/// # Safety
///
/// `[addr, addr + len)` must be an owned, currently mapped range.
unsafe fn unmap(addr: *mut u8, len: usize) {
    if unsafe { libc::munmap(addr.cast(), len) } != 0 {
        // The pointer came from a prior map; failure here means the address
        // space bookkeeping is corrupt and no further progress is sound.
        log::error!(
            "munmap({addr:p}, {len:#x}) failed: {}",
            io::Error::last_os_error()
        );
        std::process::abort();
    }
}

unsafe impl BaseAlloc for MmapAlloc {
    type Handle = ();
    type Error = MapError;

    fn allocate(&self, layout: Layout) -> Result<Chunk<Self>, MapError> {
        let (size, align) = (layout.size(), layout.align());
        if align <= PAGE_SIZE {
            let ptr = map(size)?;
            // SAFETY: freshly mapped from self.
            return Ok(unsafe { Chunk::new(ptr, layout, ()) });
        }

        let base = map(size + align)?;
        let addr = base.as_ptr().map_addr(|a| (a + align - 1) & !(align - 1));
        let head = addr.addr() - base.addr().get();
        let tail = align - head;
        // SAFETY: both slack ranges lie within the fresh over-mapping and
        // are disjoint from `[addr, addr + size)`.
        unsafe {
            if head > 0 {
                unmap(base.as_ptr(), head);
            }
            if tail > 0 {
                unmap(addr.add(size), tail);
            }
        }
        // SAFETY: the trimmed mapping is owned, sized `size` and aligned.
        Ok(unsafe { Chunk::new(NonNull::new_unchecked(addr), layout, ()) })
    }

    unsafe fn deallocate(chunk: &mut Chunk<Self>) {
        // SAFETY: the chunk is an exact live mapping per `allocate` above.
        unsafe { unmap(chunk.pointer().as_ptr(), chunk.layout().size()) }
    }
}
