use crate::config::{CHUNK_SIZE, MIN_ALLOC};

/// Upper bound on blocks per pool, reached only at the minimum block size.
/// The bitmap is provisioned for this worst case so the pool header layout
/// does not depend on the block size it is constructed with.
pub(crate) const MAX_BLOCKS: usize = CHUNK_SIZE / MIN_ALLOC;

const BITS: usize = usize::BITS as usize;
const WORDS: usize = MAX_BLOCKS / BITS;

/// Fixed-capacity block occupancy map. Mutation happens under the owning
/// pool's lock; no internal synchronization.
pub(crate) struct Bitmap {
    words: [usize; WORDS],
}

impl Bitmap {
    /// Creates a map with `capacity` usable bits. Bits at `capacity` and
    /// beyond are permanently set so a search can never yield a slot past
    /// the pool's data region.
    pub(crate) fn new(capacity: usize) -> Self {
        debug_assert!(capacity <= MAX_BLOCKS);
        let mut words = [0usize; WORDS];
        let (word, bit) = (capacity / BITS, capacity % BITS);
        if bit != 0 {
            words[word] = !0 << bit;
        }
        for w in &mut words[word + usize::from(bit != 0)..] {
            *w = !0;
        }
        Bitmap { words }
    }

    pub(crate) fn is_set(&self, index: usize) -> bool {
        self.words[index / BITS] & (1 << (index % BITS)) != 0
    }

    pub(crate) fn set(&mut self, index: usize) {
        debug_assert!(!self.is_set(index));
        self.words[index / BITS] |= 1 << (index % BITS);
    }

    pub(crate) fn clear(&mut self, index: usize) {
        debug_assert!(self.is_set(index));
        self.words[index / BITS] &= !(1 << (index % BITS));
    }

    /// Finds the first zero bit at or after `hint`, wrapping around to the
    /// front after the last word. Returns `None` when every usable bit is
    /// set.
    pub(crate) fn find_free(&self, hint: usize) -> Option<usize> {
        let hint = if hint >= MAX_BLOCKS { 0 } else { hint };
        let start = hint / BITS;
        // The start word is visited twice: first with the bits below the
        // hint masked off, then unmasked after the wrap.
        for i in 0..=WORDS {
            let w = (start + i) % WORDS;
            let mut value = self.words[w];
            if i == 0 {
                value |= (1 << (hint % BITS)) - 1;
            }
            if value != !0 {
                return Some(w * BITS + value.trailing_ones() as usize);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_map_starts_at_zero() {
        let map = Bitmap::new(100);
        assert_eq!(map.find_free(0), Some(0));
        assert!(!map.is_set(0));
    }

    #[test]
    fn set_clear_round_trip() {
        let mut map = Bitmap::new(256);
        map.set(7);
        assert!(map.is_set(7));
        assert_eq!(map.find_free(7), Some(8));
        map.clear(7);
        assert_eq!(map.find_free(7), Some(7));
    }

    #[test]
    fn search_respects_hint() {
        let mut map = Bitmap::new(256);
        map.set(0);
        map.set(1);
        assert_eq!(map.find_free(0), Some(2));
        assert_eq!(map.find_free(100), Some(100));
    }

    #[test]
    fn search_wraps_past_capacity() {
        let capacity = 70;
        let mut map = Bitmap::new(capacity);
        for index in 1..capacity {
            map.set(index);
        }
        // Only bit 0 is free and the hint points past it.
        assert_eq!(map.find_free(capacity), Some(0));
        assert_eq!(map.find_free(37), Some(0));
    }

    #[test]
    fn out_of_range_bits_never_surface() {
        let capacity = 3;
        let mut map = Bitmap::new(capacity);
        for index in 0..capacity {
            assert_eq!(map.find_free(0), Some(index));
            map.set(index);
        }
        assert_eq!(map.find_free(0), None);
        assert_eq!(map.find_free(capacity + 10), None);
    }

    #[test]
    fn full_word_boundary_capacity() {
        let mut map = Bitmap::new(BITS * 2);
        for index in 0..BITS * 2 {
            map.set(index);
        }
        assert_eq!(map.find_free(0), None);
        map.clear(BITS * 2 - 1);
        assert_eq!(map.find_free(BITS), Some(BITS * 2 - 1));
    }
}
