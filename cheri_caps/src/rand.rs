//! Random capabilities and set-bounds requests, for property tests and for generating test vectors
//! for other implementations.

use core::ops::{BitOr, Shl, Shr};

use rand::{
    distributions::{uniform::SampleUniform, Distribution, Standard},
    Rng,
};

use crate::{
    capability::Capability,
    format::CapFormat,
    perms::ArchPerms,
    util::{align_to_exact, mask64},
};

#[derive(Debug, Clone, Copy)]
pub enum ChooseRand<T>
where
    T: core::fmt::Debug
        + SampleUniform
        + Shl<usize, Output = T>
        + Shr<usize, Output = T>
        + BitOr<Output = T>
        + From<bool>
        + core::cmp::PartialOrd,
    Standard: Distribution<T>,
{
    Any,
    AnyNBits(usize),
    /// A random value whose lowest set bit is bit `.0`
    AnyAligned(usize),
    Specific(T),
    /// Uniform distribution sampling over inclusive range (.0)..=(.1)
    Between(T, T),
}
impl<T> ChooseRand<T>
where
    T: core::fmt::Debug
        + SampleUniform
        + Shl<usize, Output = T>
        + Shr<usize, Output = T>
        + BitOr<Output = T>
        + From<bool>
        + core::cmp::PartialOrd,
    Standard: Distribution<T>,
{
    pub fn sample<R: Rng>(self, rng: &mut R) -> T {
        match self {
            ChooseRand::Any => rng.gen(),
            ChooseRand::AnyNBits(n) => {
                let zero: T = false.into();
                let one: T = true.into();
                rng.gen_range(zero..(one << n))
            }
            ChooseRand::AnyAligned(to) => align_to_exact(rng.gen(), to),
            ChooseRand::Specific(t) => t,
            ChooseRand::Between(a, b) => {
                if a > b {
                    panic!("Cannot ChooseRand::Between({:?}, {:?}) where a > b", a, b);
                } else if a == b {
                    a
                } else {
                    rng.gen_range(a..=b)
                }
            }
        }
    }
}

/// One set-bounds request against a maximal capability, and the result it should produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetBoundsCase {
    /// Requested base
    pub base: u64,
    /// Requested length
    pub length: u128,
    /// Cursor of the capability before and after, somewhere in the requested region
    pub cursor: u64,
    pub new_base: u64,
    pub new_top: u128,
    pub exact: bool,
    /// Memory-form pesbt of the result
    pub pesbt: u64,
}

impl SetBoundsCase {
    /// Compute the expected result of narrowing a maximal capability with its cursor at `cursor`
    /// to `[base, base + length)`.
    pub fn new<F: CapFormat>(base: u64, length: u128, cursor: u64) -> Self {
        let parent = Capability::<F>::make_max_perms_cap(0, cursor, F::MAX_TOP);
        let (cap, exact) = parent.set_bounds(base, base as u128 + length);
        Self {
            base,
            length,
            cursor: cap.cursor(),
            new_base: cap.base(),
            new_top: cap.top_full(),
            exact,
            pesbt: cap.compress_mem(),
        }
    }

    /// A random case. The length is at most `2^len_pow2`, with `len_pow2` picked at random if not given.
    /// The base is moved down if needed so the region fits in the address space.
    pub fn rand<F: CapFormat, R: Rng>(rng: &mut R, base: ChooseRand<u64>, len_pow2: Option<u32>) -> Self {
        let len_pow2 = match len_pow2 {
            Some(len_pow2) => len_pow2.min(F::ADDR_WIDTH),
            None => rng.gen_range(0..=F::ADDR_WIDTH),
        };
        let length = ChooseRand::<u128>::Between(0, 1 << len_pow2).sample(rng);

        let base = base.sample(rng) & F::MAX_ADDR;
        let base = if base as u128 + length > F::MAX_TOP {
            (F::MAX_TOP - length) as u64
        } else {
            base
        };

        let cursor = if length == 0 {
            base
        } else {
            ChooseRand::Between(base, (base as u128 + length - 1) as u64).sample(rng)
        };

        Self::new::<F>(base, length, cursor)
    }
}

/// A random register-form pesbt word with the reserved bits clear.
pub fn rand_pesbt<F: CapFormat, R: Rng>(rng: &mut R) -> u64 {
    let mut pesbt = rng.gen::<u64>() & mask64(F::CAP_BITS / 2);
    pesbt = F::RESERVED.insert(pesbt, 0);
    if let Some(reserved2) = F::RESERVED2 {
        pesbt = reserved2.insert(pesbt, 0);
    }
    pesbt
}

/// A random tagged capability with random permissions, narrowed from a maximal capability.
pub fn rand_cap<F: CapFormat, R: Rng>(rng: &mut R) -> Capability<F> {
    let case = SetBoundsCase::rand::<F, R>(rng, ChooseRand::Any, None);
    let mut cap = Capability::<F>::decompress_mem(case.pesbt, case.cursor, true);
    let perms = ArchPerms::from_bits_truncate(rng.gen()) & ArchPerms::ALL_NO_LVB;
    cap.set_perms(perms, rng.gen());
    cap
}
