use core::{
    cell::Cell,
    ptr::{self, NonNull},
    sync::atomic::{
        AtomicU64,
        Ordering::{Acquire, Release},
    },
};

const STATE_FREE: u64 = 0;
const STATE_USED: u64 = 1;

/// Allocation state of a block within one block-life.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockState {
    Free,
    Used,
}

/// The first 16 bytes of every handed-out block.
///
/// `next` threads the block through its owner's managed list and is touched
/// only by the owning thread. `state` is the deferred-free flag: any thread
/// may release-store `Free` into it, and the owner's reclaim pass
/// acquire-loads it, ordering the freeing thread's last writes before the
/// block's reuse.
#[repr(C)]
pub struct BlockHeader {
    next: Cell<Option<NonNull<BlockHeader>>>,
    state: AtomicU64,
}

const _: () = assert!(core::mem::size_of::<BlockHeader>() == 16);

impl BlockHeader {
    /// Reinterprets the front of a block as its header.
    ///
    /// # Safety
    ///
    /// `block` must be the start of a block handed out by this allocator.
    #[inline]
    pub unsafe fn of(block: NonNull<u8>) -> NonNull<BlockHeader> {
        block.cast()
    }

    pub fn state(&self) -> BlockState {
        match self.state.load(Acquire) {
            STATE_FREE => BlockState::Free,
            _ => BlockState::Used,
        }
    }

    /// Stamps the block free. Safe to call from any thread; storing into an
    /// already-free header is a no-op by construction.
    ///
    /// # Safety
    ///
    /// `this` must point to the header of a block in its current life; the
    /// caller must not touch the block afterwards.
    #[inline]
    pub unsafe fn mark_free(this: NonNull<BlockHeader>) {
        // No reference to the whole header is formed here: the header's
        // `next` field belongs to the owning thread, and only the atomic
        // field is shared.
        let state = unsafe { &*ptr::addr_of!((*this.as_ptr()).state) };
        state.store(STATE_FREE, Release);
    }

    fn mark_used(&self) {
        self.state.store(STATE_USED, Release);
    }

    fn next(&self) -> Option<NonNull<BlockHeader>> {
        self.next.get()
    }

    fn set_next(&self, next: Option<NonNull<BlockHeader>>) {
        self.next.set(next);
    }
}

/// Every block a thread has handed out and not yet reclaimed, singly linked
/// through the block headers. Owned and traversed by one thread only; the
/// two-pointer cursor makes unlinking the current node O(1).
pub struct ManagedList {
    head: Cell<Option<NonNull<BlockHeader>>>,
    tail: Cell<Option<NonNull<BlockHeader>>>,
    cursor_prev: Cell<Option<NonNull<BlockHeader>>>,
    cursor_cur: Cell<Option<NonNull<BlockHeader>>>,
}

impl ManagedList {
    pub const fn new() -> Self {
        ManagedList {
            head: Cell::new(None),
            tail: Cell::new(None),
            cursor_prev: Cell::new(None),
            cursor_cur: Cell::new(None),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.head.get().is_none()
    }

    pub fn head(&self) -> Option<NonNull<BlockHeader>> {
        self.head.get()
    }

    pub fn tail(&self) -> Option<NonNull<BlockHeader>> {
        self.tail.get()
    }

    /// Stamps the block used and links it at the tail.
    ///
    /// # Safety
    ///
    /// `block` must head a freshly allocated block not present in any list.
    pub unsafe fn attach_used(&self, block: NonNull<BlockHeader>) {
        let header = unsafe { block.as_ref() };
        header.set_next(None);
        header.mark_used();

        match self.tail.get() {
            Some(tail) => unsafe { tail.as_ref() }.set_next(Some(block)),
            None => self.head.set(Some(block)),
        }
        self.tail.set(Some(block));
    }

    /// Points the cursor back at the head for a fresh reclaim round.
    pub fn reset_cursor(&self) {
        self.cursor_prev.set(None);
        self.cursor_cur.set(self.head.get());
    }

    /// Advances the cursor past used blocks and splices out the first free
    /// one, returning it with its `next` cleared. `None` when the rest of
    /// the list holds no free block.
    ///
    /// # Safety
    ///
    /// Every block in this list must still be valid, and the cursor must
    /// have been reset since the list was last mutated elsewhere.
    pub unsafe fn reclaim_next(&self) -> Option<NonNull<BlockHeader>> {
        loop {
            let cur = self.cursor_cur.get()?;
            let header = unsafe { cur.as_ref() };
            let next = header.next();

            if header.state() == BlockState::Used {
                self.cursor_prev.set(Some(cur));
                self.cursor_cur.set(next);
                continue;
            }

            match self.cursor_prev.get() {
                Some(prev) => unsafe { prev.as_ref() }.set_next(next),
                None => self.head.set(next),
            }
            if next.is_none() {
                self.tail.set(self.cursor_prev.get());
            }
            self.cursor_cur.set(next);
            header.set_next(None);
            return Some(cur);
        }
    }
}
