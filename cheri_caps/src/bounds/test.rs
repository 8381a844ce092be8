use assert_hex::assert_eq_hex;
use rand::{rngs::StdRng, Rng, SeedableRng};

use crate::format::{CapFormat, Cc128r, Cc64r};

use super::{compute_ebt, decode_exponent, decompress_bounds, representable_alignment_mask, representable_length};

/// Encode `[base, top)`, decode it again relative to the base and check the rounding rules.
fn check_encode_decode<F: CapFormat>(base: u64, top: u128) {
    let enc = compute_ebt::<F>(base, top);
    let dec = decompress_bounds::<F>(enc.ebt, base);

    let granule = ((!enc.alignment_mask & F::MAX_ADDR) as u128) + 1;
    let expected_top = top.div_ceil(granule) * granule;
    assert_eq_hex!(dec.base, base & enc.alignment_mask, "{} [{:#x}, {:#x}) base", F::NAME, base, top);
    assert_eq_hex!(dec.top, expected_top, "{} [{:#x}, {:#x}) top", F::NAME, base, top);
    assert_eq!(enc.exact, dec.base == base && dec.top == top, "{} [{:#x}, {:#x}) exactness", F::NAME, base, top);
    assert_eq!(enc.exponent, dec.exponent);

    // Any address inside the bounds sees the same bounds
    if top > base as u128 {
        let last = (top - 1) as u64;
        let mid = base + ((top - base as u128) / 2) as u64;
        for cursor in [last, mid] {
            let again = decompress_bounds::<F>(enc.ebt, cursor);
            assert_eq_hex!((again.base, again.top), (dec.base, dec.top), "{} cursor {:#x}", F::NAME, cursor);
        }
    }
}

#[test]
fn null_decodes_to_whole_address_space() {
    for cursor in [0, 0x1234, 0xffff_ffff] {
        let b = decompress_bounds::<Cc64r>(0, cursor);
        assert_eq_hex!((b.base, b.top), (0, 1 << 32));
        assert_eq!(b.exponent, Cc64r::MAX_EXPONENT);
        assert!(b.valid);
    }
    for cursor in [0, 0x1234, u64::MAX] {
        let b = decompress_bounds::<Cc128r>(0, cursor);
        assert_eq_hex!((b.base, b.top), (0, 1 << 64));
        assert_eq!(b.exponent, Cc128r::MAX_EXPONENT);
    }
}

#[test]
fn max_bounds_encode_to_zero() {
    let enc = compute_ebt::<Cc128r>(0, 1 << 64);
    assert_eq_hex!(enc.ebt, 0);
    assert!(enc.exact);
    let enc = compute_ebt::<Cc64r>(0, 1 << 32);
    assert_eq_hex!(enc.ebt, 0);
    assert!(enc.exact);
}

#[test]
fn exact_large_region() {
    let enc = compute_ebt::<Cc128r>(0x1_6060_0000, 0x1_6060_0000 + 0x30_0000);
    assert!(enc.exact);
    assert_eq!(enc.exponent, 9);
    let dec = decompress_bounds::<Cc128r>(enc.ebt, 0x1_6060_0000);
    assert_eq_hex!(dec.base, 0x1_6060_0000);
    assert_eq_hex!(dec.top - dec.base as u128, 0x30_0000);
}

#[test]
fn rounding_bumps_exponent() {
    // Rounding the top up overflows the mantissa, so the exponent has to grow by one
    let base = 0xffff_ffff_ff00_0000u64;
    let enc = compute_ebt::<Cc128r>(base, base as u128 + 0xff_ffff);
    assert!(!enc.exact);
    assert_eq!(enc.exponent, 12);
    let dec = decompress_bounds::<Cc128r>(enc.ebt, base);
    assert_eq_hex!(dec.base, base);
    assert_eq_hex!(dec.top, 1 << 64);
}

#[test]
fn unaligned_base_rounds_down() {
    let enc = compute_ebt::<Cc128r>(7, 7 + 0x1000_0000);
    assert!(!enc.exact);
    let dec = decompress_bounds::<Cc128r>(enc.ebt, 7);
    assert_eq_hex!(dec.base, 0);
    assert_eq_hex!(dec.top, 0x1008_0000);
}

#[test]
fn small_regions_use_ef() {
    let enc = compute_ebt::<Cc128r>(0, 0x20);
    assert_eq_hex!(enc.ebt, 0x408_0000);
    assert_eq!(Cc128r::EF.extract(enc.ebt), 1);

    // 64r can reach one more length bit with EF=1 thanks to L8
    let enc = compute_ebt::<Cc64r>(0x1230, 0x1230 + 0x1ff);
    assert_eq!(Cc64r::EF.extract(enc.ebt), 1);
    assert!(enc.exact);
    let enc = compute_ebt::<Cc128r>(0x1230, 0x1230 + 0x1fff);
    assert_eq!(Cc128r::EF.extract(enc.ebt), 0);
}

#[test]
fn internal_exponent_layout() {
    // E=7, enc=45 split as E_HI=5 E_LO=5
    let enc = compute_ebt::<Cc128r>(0x8000, 0xa6400);
    assert!(enc.exact);
    assert_eq_hex!(enc.ebt, 0x133_4105);
    let dec = decompress_bounds::<Cc128r>(enc.ebt, 0x41df);
    assert_eq_hex!((dec.base, dec.top), (0x8000, 0xa6400));

    // E=7, enc=17 split as L8=1 E_HI=0 E_LO=1
    let enc = compute_ebt::<Cc64r>(0, 0x8000);
    assert_eq_hex!(enc.ebt, 0x4_0001);
    let dec = decompress_bounds::<Cc64r>(enc.ebt, 0x1000);
    assert_eq_hex!((dec.base, dec.top), (0, 0x8000));
}

#[test]
fn oversized_exponent_field_clamps() {
    // EF=0 with every exponent bit set
    let pesbt = Cc128r::EXP_HIGH.mask() | Cc128r::EXP_LOW.mask();
    assert_eq!(decode_exponent::<Cc128r>(pesbt), (0, 1));
    let pesbt = Cc64r::EXP_HIGH.mask() | Cc64r::EXP_LOW.mask() | Cc64r::L8.map_or(0, |f| f.mask());
    assert_eq!(decode_exponent::<Cc64r>(pesbt), (0, 1));
    assert!(decompress_bounds::<Cc64r>(pesbt, 0x4000).valid);
}

#[test]
fn alignment_and_length_queries() {
    assert_eq_hex!(representable_length::<Cc64r>(0x1001), 0x1040);
    assert_eq_hex!(representable_alignment_mask::<Cc64r>(0x1001), 0xffff_ffc0);
    assert_eq_hex!(representable_length::<Cc64r>(0x1ff), 0x1ff);
    assert_eq_hex!(representable_alignment_mask::<Cc64r>(0x1ff), 0xffff_ffff);
    assert_eq_hex!(representable_length::<Cc128r>(0x30_0000), 0x30_0000);
    assert_eq_hex!(representable_alignment_mask::<Cc128r>(0x30_0000), !0xfff);
    // Rounds up past the end of the address space and wraps
    assert_eq_hex!(representable_length::<Cc128r>(u64::MAX), 0);
}

#[test]
fn encode_decode_edges() {
    check_encode_decode::<Cc128r>(0, 0);
    check_encode_decode::<Cc128r>(u64::MAX, 1 << 64);
    check_encode_decode::<Cc128r>(0, 1 << 64);
    check_encode_decode::<Cc128r>(1, 1 << 64);
    check_encode_decode::<Cc128r>(0x1000, 0x1000 + (1 << 12));
    check_encode_decode::<Cc128r>(0x1000, 0x1000 + (1 << 13) - 1);
    check_encode_decode::<Cc64r>(0, 0);
    check_encode_decode::<Cc64r>(0xffff_ffff, 1 << 32);
    check_encode_decode::<Cc64r>(1, 1 << 32);
    check_encode_decode::<Cc64r>(0x100, 0x100 + (1 << 9));
    check_encode_decode::<Cc64r>(0x8000_0000, 0x1_0000_0000);
}

fn random_region<F: CapFormat, R: Rng>(rng: &mut R) -> (u64, u128) {
    let len_pow2 = rng.gen_range(0..=F::ADDR_WIDTH);
    let length = rng.gen_range(0..=(1u128 << len_pow2));
    let base = rng.gen::<u64>() & F::MAX_ADDR;
    let base = if base as u128 + length > F::MAX_TOP {
        (F::MAX_TOP - length) as u64
    } else {
        base
    };
    (base, base as u128 + length)
}

#[test]
fn encode_decode_random() {
    let mut rng = StdRng::seed_from_u64(0xc4e2_1d0b);
    for _ in 0..20_000 {
        let (base, top) = random_region::<Cc64r, _>(&mut rng);
        check_encode_decode::<Cc64r>(base, top);
        let (base, top) = random_region::<Cc128r, _>(&mut rng);
        check_encode_decode::<Cc128r>(base, top);
    }
}
