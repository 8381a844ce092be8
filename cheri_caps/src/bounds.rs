//! Floating-point style bounds encoding.
//!
//! The pesbt word only keeps `MANTISSA_WIDTH` bits of the base and `MANTISSA_WIDTH - 2` bits of the top,
//! scaled by an exponent. The remaining high bits are inferred from the cursor, assuming base and top
//! are within one representable region of it. When EF is clear the exponent itself is stored in the
//! low bits of T and B, at the cost of `EXP_LOW_WIDTH` bits of precision each.
//!
//! Everything here works on the *memory* form of the pesbt word (see [CapFormat::NULL_XOR_MASK]).

use crate::{
    format::CapFormat,
    util::{bit_length, mask128, mask64},
};

/// Bounds decoded from a pesbt word relative to a cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bounds {
    pub base: u64,
    /// Exclusive, up to `ADDR_WIDTH + 1` bits
    pub top: u128,
    pub exponent: u32,
    /// Always true for the RISC-V formats, which have no malformed exponent encodings.
    pub valid: bool,
}

/// Output of [compute_ebt].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodedBounds {
    /// The EF, T and B fields (and L8 where the format has it), in memory form. All other bits are zero.
    pub ebt: u64,
    /// AND with an address to align it to the granularity the bounds were encoded at.
    pub alignment_mask: u64,
    /// True if the requested base and top were stored without rounding.
    pub exact: bool,
    pub exponent: u32,
}

/// Find the exponent and the implied MSB of the length.
///
/// An exponent field larger than the format's maximum clamps the exponent to zero.
pub fn decode_exponent<F: CapFormat>(mem_pesbt: u64) -> (u32, u64) {
    if F::EF.extract(mem_pesbt) == 1 {
        let l_msb = match F::L8 {
            Some(l8) => l8.extract(mem_pesbt),
            None => 0,
        };
        (0, l_msb)
    } else {
        let mut enc = (F::EXP_HIGH.extract(mem_pesbt) << F::EXP_LOW_WIDTH) | F::EXP_LOW.extract(mem_pesbt);
        if let Some(l8) = F::L8 {
            enc |= l8.extract(mem_pesbt) << (2 * F::EXP_LOW_WIDTH);
        }
        (F::MAX_EXPONENT.saturating_sub(enc as u32), 1)
    }
}

/// Reconstruct base and top from a memory-form pesbt word and the address it is attached to.
pub fn decompress_bounds<F: CapFormat>(mem_pesbt: u64, cursor: u64) -> Bounds {
    let mw = F::MANTISSA_WIDTH;
    let (e, l_msb) = decode_exponent::<F>(mem_pesbt);

    let (b, t_low) = if F::EF.extract(mem_pesbt) == 1 {
        (F::BOTTOM.extract(mem_pesbt), F::TOP.extract(mem_pesbt))
    } else {
        (
            F::BOTTOM_IE.extract(mem_pesbt) << F::EXP_LOW_WIDTH,
            F::TOP_IE.extract(mem_pesbt) << F::EXP_LOW_WIDTH,
        )
    };

    // T only stores MW - 2 bits, the top two come from B plus the implied length MSB
    let l_carry = (t_low < (b & mask64(mw - 2))) as u64;
    let t_hi = ((b >> (mw - 2)) + l_carry + l_msb) & 0b11;
    let t = (t_hi << (mw - 2)) | t_low;

    // Work out which representable region base and top are in relative to the cursor,
    // using the top three mantissa bits.
    let cursor = cursor as u128;
    let a3 = (cursor >> (e + mw - 3)) & 0b111;
    let b3 = (b >> (mw - 3)) as u128;
    let t3 = (t >> (mw - 3)) as u128;
    let r3 = b3.wrapping_sub(1) & 0b111;
    let a_hi = (a3 < r3) as i128;
    let b_hi = (b3 < r3) as i128;
    let t_hi = (t3 < r3) as i128;
    let correction_base = b_hi - a_hi;
    let correction_top = t_hi - a_hi;

    let a_top_shift = e + mw;
    let a_top = cursor >> a_top_shift;

    let base = ((a_top.wrapping_add_signed(correction_base) << a_top_shift) | ((b as u128) << e))
        & mask128(F::ADDR_WIDTH);
    let mut top = ((a_top.wrapping_add_signed(correction_top) << a_top_shift) | ((t as u128) << e))
        & mask128(F::LEN_WIDTH);

    // If base and top ended up more than an address space apart, the representable region wrapped
    // around the end of the address space and the top MSB is wrong.
    let base_msb = (base >> (F::ADDR_WIDTH - 1)) & 1;
    let top_msbs = (top >> (F::ADDR_WIDTH - 1)) & 0b11;
    if e < F::MAX_EXPONENT - 1 && (top_msbs.wrapping_sub(base_msb) & 0b11) > 1 {
        top ^= 1 << F::ADDR_WIDTH;
    }

    Bounds {
        base: base as u64,
        top,
        exponent: e,
        valid: true,
    }
}

/// Encode the smallest representable region containing `[req_base, req_top)`.
///
/// The base is rounded down and the top rounded up to the chosen exponent's granularity.
pub fn compute_ebt<F: CapFormat>(req_base: u64, req_top: u128) -> EncodedBounds {
    debug_assert!(req_base <= F::MAX_ADDR, "base {req_base:#x} wider than the address");
    debug_assert!(req_top <= F::MAX_TOP, "top {req_top:#x} past the end of the address space");
    debug_assert!(req_top >= req_base as u128, "top {req_top:#x} below base {req_base:#x}");

    let mw = F::MANTISSA_WIDTH;
    let elw = F::EXP_LOW_WIDTH;
    let req_length = req_top - req_base as u128;

    let mut e = bit_length(req_length >> (mw - 1)).min(F::MAX_EXPONENT);
    // Without L8, EF=1 can only reach lengths below 2^(MW-2).
    let needs_ie = e != 0 || (F::L8.is_none() && (req_length >> (mw - 2)) & 1 == 1);

    if !needs_ie {
        let mut ebt = F::EF.insert(0, 1);
        ebt = F::BOTTOM.insert(ebt, req_base);
        ebt = F::TOP.insert(ebt, req_top as u64);
        if let Some(l8) = F::L8 {
            ebt = l8.insert(ebt, (req_length >> (mw - 2)) as u64);
        }
        return EncodedBounds {
            ebt,
            alignment_mask: F::MAX_ADDR,
            exact: true,
            exponent: 0,
        };
    }

    let ie_width = mw - elw;
    let ie_mask = mask64(ie_width);

    let mut shift = e + elw;
    let mut lost_base = req_base & mask64(shift) != 0;
    let mut lost_top = req_top & mask128(shift) != 0;
    let mut bot_ie = (req_base >> shift) & ie_mask;
    let mut top_ie = (req_top >> shift) as u64 & ie_mask;
    if lost_top {
        top_ie = (top_ie + 1) & ie_mask;
    }

    // Rounding may have pushed the length into the next power of two
    let len_ie = top_ie.wrapping_sub(bot_ie) & ie_mask;
    if (len_ie >> (ie_width - 1)) & 1 == 1 {
        lost_base |= bot_ie & 1 == 1;
        lost_top |= top_ie & 1 == 1;
        e += 1;
        shift = e + elw;
        bot_ie = (req_base >> shift) & ie_mask;
        top_ie = (req_top >> shift) as u64 & ie_mask;
        if lost_top {
            top_ie = (top_ie + 1) & ie_mask;
        }
    }
    debug_assert!(e <= F::MAX_EXPONENT, "exponent {e} overflowed for [{req_base:#x}, {req_top:#x})");

    let enc = (F::MAX_EXPONENT - e) as u64;
    let mut ebt = F::BOTTOM_IE.insert(0, bot_ie);
    ebt = F::TOP_IE.insert(ebt, top_ie);
    ebt = F::EXP_LOW.insert(ebt, enc);
    ebt = F::EXP_HIGH.insert(ebt, enc >> elw);
    if let Some(l8) = F::L8 {
        ebt = l8.insert(ebt, enc >> (2 * elw));
    }

    EncodedBounds {
        ebt,
        alignment_mask: (F::MAX_ADDR << shift) & F::MAX_ADDR,
        exact: !(lost_base || lost_top),
        exponent: e,
    }
}

/// The mask a base must be aligned with for a region of `req_length` bytes to be exactly representable.
pub fn representable_alignment_mask<F: CapFormat>(req_length: u64) -> u64 {
    compute_ebt::<F>(0, (req_length & F::MAX_ADDR) as u128).alignment_mask
}

/// Round `req_length` up to the nearest exactly representable length.
pub fn representable_length<F: CapFormat>(req_length: u64) -> u64 {
    let req_length = req_length & F::MAX_ADDR;
    let mask = representable_alignment_mask::<F>(req_length);
    req_length.wrapping_add(!mask & F::MAX_ADDR) & mask
}

#[cfg(test)]
mod test;
