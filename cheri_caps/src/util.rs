use core::ops::{BitOr, Shl, Shr};

/// All-ones mask covering the low `width` bits. Widths of 64 or more saturate.
pub const fn mask64(width: u32) -> u64 {
    if width >= 64 {
        u64::MAX
    } else {
        (1u64 << width) - 1
    }
}

/// [mask64] for values that need the extra top bit (e.g. 65-bit tops).
pub const fn mask128(width: u32) -> u128 {
    if width >= 128 {
        u128::MAX
    } else {
        (1u128 << width) - 1
    }
}

/// Number of bits needed to hold `x`, i.e. one more than the index of the highest set bit.
///
/// ```
/// # use cheri_caps::util::bit_length;
/// assert_eq!(bit_length(0), 0);
/// assert_eq!(bit_length(1), 1);
/// assert_eq!(bit_length(0x40), 7);
/// assert_eq!(bit_length(1 << 64), 65);
/// ```
pub const fn bit_length(x: u128) -> u32 {
    u128::BITS - x.leading_zeros()
}

pub fn align_to<T: Shl<usize, Output=T> + Shr<usize, Output=T>>(num: T, position: usize) -> T {
    (num >> position) << position
}

/// Generate a number aligned to *exactly* `position`, i.e. the first bit set is bit `#position`
pub fn align_to_exact<T: Shl<usize, Output=T> + Shr<usize, Output=T> + BitOr<Output=T> + From<bool>>(num: T, position: usize) -> T {
    let one: T = true.into();
    align_to(num, position) | (one << position)
}
