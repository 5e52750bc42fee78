//! The size-class table and its lookups.
//!
//! Requests are rounded up to regular block sizes so pools can carve chunks
//! into equal blocks. The table starts at [`MIN_ALLOC`], runs in 16-byte
//! steps up to 128, then in doubling groups of four up to
//! [`MAX_SMALL_ALLOC`]; every entry is a multiple of [`ALIGNMENT`].

use crate::config::{ALIGNMENT, MAX_SMALL_ALLOC, MIN_ALLOC};

/// Total number of size classes.
pub const CLASS_COUNT: usize = 7 + 4 * 13;

const fn build_classes() -> [usize; CLASS_COUNT] {
    let mut table = [0usize; CLASS_COUNT];
    let mut i = 0;

    let mut size = MIN_ALLOC;
    while size <= 128 {
        table[i] = size;
        i += 1;
        size += ALIGNMENT;
    }

    let mut step = 2 * ALIGNMENT;
    while i < CLASS_COUNT {
        let mut k = 0;
        while k < 4 {
            table[i] = table[i - 1] + step;
            i += 1;
            k += 1;
        }
        step *= 2;
    }

    table
}

const SIZE_CLASSES: [usize; CLASS_COUNT] = build_classes();

/// Direct lookup for requests up to 1024 bytes, indexed by
/// `(nbytes + 15) / 16`. Larger requests scan the tail of the table.
const SMALL_LOOKUP_LEN: usize = 1024 / ALIGNMENT + 1;

const fn build_lookup() -> [u8; SMALL_LOOKUP_LEN] {
    let mut lookup = [0u8; SMALL_LOOKUP_LEN];
    let mut i = 0;
    while i < SMALL_LOOKUP_LEN {
        let size = i * ALIGNMENT;
        let mut class = 0;
        while SIZE_CLASSES[class] < size {
            class += 1;
        }
        lookup[i] = class as u8;
        i += 1;
    }
    lookup
}

const SMALL_LOOKUP: [u8; SMALL_LOOKUP_LEN] = build_lookup();

/// First class whose block size exceeds the direct-lookup range.
const FIRST_LARGE_CLASS: usize = SMALL_LOOKUP[SMALL_LOOKUP_LEN - 1] as usize + 1;

/// Maps a request byte count to its size-class index.
///
/// Inverse of [`class_to_size`]: the returned class's block size is the
/// smallest entry `>= nbytes`. A zero-byte request maps to class 0.
#[inline]
pub fn size_to_class(nbytes: usize) -> usize {
    debug_assert!(nbytes <= MAX_SMALL_ALLOC);
    if nbytes <= 1024 {
        return SMALL_LOOKUP[(nbytes + ALIGNMENT - 1) / ALIGNMENT] as usize;
    }
    let mut class = FIRST_LARGE_CLASS;
    while class < CLASS_COUNT - 1 && SIZE_CLASSES[class] < nbytes {
        class += 1;
    }
    class
}

/// Block size of a size class. Inverse of [`size_to_class`].
#[inline]
pub const fn class_to_size(class: usize) -> usize {
    SIZE_CLASSES[class]
}

/// Rounds a request up to the block size it will actually occupy.
#[inline]
pub fn normalize(nbytes: usize) -> usize {
    class_to_size(size_to_class(nbytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_shape() {
        assert_eq!(SIZE_CLASSES[0], MIN_ALLOC);
        assert_eq!(SIZE_CLASSES[CLASS_COUNT - 1], MAX_SMALL_ALLOC);
        for (i, &size) in SIZE_CLASSES.iter().enumerate() {
            assert_eq!(size % ALIGNMENT, 0, "class {i} size {size} misaligned");
            if i > 0 {
                assert!(size > SIZE_CLASSES[i - 1], "table must increase at {i}");
            }
        }
    }

    #[test]
    fn round_trip_all_classes() {
        for class in 0..CLASS_COUNT {
            assert_eq!(size_to_class(class_to_size(class)), class);
        }
    }

    #[test]
    fn rounds_up_between_classes() {
        for class in 0..CLASS_COUNT - 1 {
            let (a, b) = (class_to_size(class), class_to_size(class + 1));
            assert_eq!(size_to_class(a + 1), class + 1);
            assert_eq!(size_to_class(b - 1), class + 1);
            assert_eq!(normalize(a + (b - a) / 2), b);
        }
    }

    #[test]
    fn boundaries() {
        assert_eq!(size_to_class(0), 0);
        assert_eq!(size_to_class(1), 0);
        assert_eq!(normalize(0), MIN_ALLOC);
        assert_eq!(normalize(MIN_ALLOC), MIN_ALLOC);
        assert_eq!(size_to_class(MAX_SMALL_ALLOC), CLASS_COUNT - 1);
        assert_eq!(normalize(MAX_SMALL_ALLOC), MAX_SMALL_ALLOC);
    }

    #[test]
    fn covers_every_small_size() {
        let mut nbytes = 0;
        while nbytes <= MAX_SMALL_ALLOC {
            let size = normalize(nbytes);
            assert!(size >= nbytes);
            assert!(size >= MIN_ALLOC);
            nbytes = nbytes * 2 + 1;
        }
    }
}
