//! Mip level and array layer bitmasks.
//!
//! Bit `i` selects level (or layer) `i`. The all-ones value is the `ALL`
//! sentinel and is resolved against the real count of a texture before use.

use std::{fmt, ops::Range};

/// Largest number of mip levels or array layers a mask can address.
pub const MAX_MASK_BITS: u32 = u32::BITS;

/// Iterator over the set bits of a mask, lowest bit first.
#[derive(Clone, Debug)]
pub struct SetBits {
    remaining: u32,
}

impl Iterator for SetBits {
    type Item = u32;

    fn next(&mut self) -> Option<u32> {
        if self.remaining == 0 {
            return None;
        }
        let index = self.remaining.trailing_zeros();
        // Clear the lowest set bit.
        self.remaining &= self.remaining - 1;
        Some(index)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let count = self.remaining.count_ones() as usize;
        (count, Some(count))
    }
}

impl ExactSizeIterator for SetBits {}

/// Mask with the lowest `count` bits set.
pub fn mask_for_count(count: u32) -> u32 {
    if count >= MAX_MASK_BITS {
        !0
    } else {
        (1 << count) - 1
    }
}

/// Iterates the indices of all bits set in `mask` that are below `count`.
pub fn iter_set_bits(mask: u32, count: u32) -> SetBits {
    SetBits {
        remaining: mask & mask_for_count(count),
    }
}

macro_rules! define_mask {
    ($(#[$meta:meta])* $name:ident, $what:literal) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Eq, Hash, PartialEq)]
        #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
        pub struct $name(u32);

        impl $name {
            /// Every
            #[doc = $what]
            /// the resource has.
            pub const ALL: Self = Self(!0);

            pub const fn from_bits(bits: u32) -> Self {
                Self(bits)
            }

            pub fn single(index: u32) -> Self {
                assert!(index < MAX_MASK_BITS, "{} {} is not addressable", $what, index);
                Self(1 << index)
            }

            pub fn from_range(range: Range<u32>) -> Self {
                assert!(range.end <= MAX_MASK_BITS, "{} range {:?} is not addressable", $what, range);
                Self(mask_for_count(range.end) & !mask_for_count(range.start))
            }

            pub const fn bits(self) -> u32 {
                self.0
            }

            pub const fn is_all(self) -> bool {
                self.0 == !0
            }

            /// Returns true if exactly one bit is set.
            pub const fn is_single(self) -> bool {
                self.0.is_power_of_two()
            }

            /// Lowest selected index, if any.
            pub fn first(self) -> Option<u32> {
                match self.0 {
                    0 => None,
                    bits => Some(bits.trailing_zeros()),
                }
            }

            /// Returns the selected indices that exist in a resource with `count` of them.
            pub fn resolve(self, count: u32) -> u32 {
                self.0 & mask_for_count(count)
            }

            /// Returns true if an index at or beyond `count` is selected.
            pub fn exceeds(self, count: u32) -> bool {
                !self.is_all() && self.0 & !mask_for_count(count) != 0
            }

            /// Smallest contiguous range holding every selected index below `count`.
            pub fn span(self, count: u32) -> Range<u32> {
                match self.resolve(count) {
                    0 => 0..0,
                    bits => bits.trailing_zeros()..MAX_MASK_BITS - bits.leading_zeros(),
                }
            }

            pub fn iter(self, count: u32) -> SetBits {
                iter_set_bits(self.0, count)
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::ALL
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                if self.is_all() {
                    write!(f, "{}(ALL)", stringify!($name))
                } else {
                    write!(f, "{}({:#b})", stringify!($name), self.0)
                }
            }
        }
    };
}

define_mask!(
    /// Selection of mip levels of a texture.
    MipMask,
    "mip level"
);
define_mask!(
    /// Selection of array layers of a texture.
    LayerMask,
    "array layer"
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_bits_lowest_first() {
        let bits = iter_set_bits(0b1010_0110, 32).collect::<Vec<_>>();
        assert_eq!(bits, [1, 2, 5, 7]);
    }

    #[test]
    fn set_bits_clipped_to_count() {
        assert_eq!(iter_set_bits(!0, 4).collect::<Vec<_>>(), [0, 1, 2, 3]);
        assert_eq!(iter_set_bits(0b1_0001, 4).len(), 1);
        assert_eq!(iter_set_bits(!0, 32).len(), 32);
        assert_eq!(iter_set_bits(0, 32).next(), None);
    }

    #[test]
    fn all_resolves_to_count() {
        assert_eq!(MipMask::ALL.resolve(4), 0b1111);
        assert_eq!(LayerMask::ALL.iter(1).collect::<Vec<_>>(), [0]);
        assert!(!MipMask::ALL.exceeds(1));
    }

    #[test]
    fn range_and_single() {
        assert_eq!(MipMask::from_range(1..3).bits(), 0b110);
        assert_eq!(MipMask::from_range(0..32), MipMask::ALL);
        assert!(MipMask::single(3).is_single());
        assert_eq!(LayerMask::single(5).first(), Some(5));
        assert!(MipMask::single(4).exceeds(4));
        assert!(!MipMask::single(3).exceeds(4));
    }

    #[test]
    fn span_covers_selection() {
        assert_eq!(MipMask::ALL.span(4), 0..4);
        assert_eq!(MipMask::from_bits(0b0110).span(4), 1..3);
        assert_eq!(LayerMask::from_bits(0b1001).span(8), 0..4);
        assert_eq!(LayerMask::from_bits(0b1000).span(2), 0..0);
    }
}
