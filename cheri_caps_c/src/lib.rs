#![cfg_attr(not(feature = "std"), no_std)]

use cheri_caps::{
    bounds::{representable_alignment_mask, representable_length},
    capability::{CapEncodeErr, Capability},
    format::{CapFormat, Cc128r, Cc64r},
    perms::ArchPerms,
};
use paste::paste;

/// Little-endian representation of a 128-bit number
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct CCapU128([u8; 16]);

impl From<u128> for CCapU128 {
    fn from(value: u128) -> Self {
        Self(value.to_le_bytes())
    }
}
impl From<CCapU128> for u128 {
    fn from(value: CCapU128) -> Self {
        u128::from_le_bytes(value.0)
    }
}

/// A capability as held in a register: the raw pesbt, the cursor and the tag.
/// `level_bits` selects the permission tables used when decoding the AP field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct CCap {
    pub pesbt: u64,
    pub cursor: u64,
    pub tag: bool,
    pub level_bits: bool,
}

impl<F: CapFormat> From<Capability<F>> for CCap {
    fn from(value: Capability<F>) -> Self {
        Self {
            pesbt: value.compress_raw(),
            cursor: value.cursor(),
            tag: value.tag(),
            level_bits: value.level_bits(),
        }
    }
}

impl CCap {
    fn decompress<F: CapFormat>(&self) -> Capability<F> {
        Capability::decompress_raw_lvb(self.pesbt, self.cursor, self.tag, self.level_bits)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(non_camel_case_types)]
#[repr(i32)]
pub enum CCapResult {
    Success = 0,
    Encode_UnrepresentableBounds = 1,
    Encode_InvalidBounds = 2,
    NullRequiredArgs = 100,
}

/// Convert a CCapResult enum to a null-terminated static immutable C string.
/// Invokes undefined behaviour if passed an value not in the enumeration.
#[no_mangle]
pub unsafe extern "C" fn ccap_result_str(res: CCapResult) -> *const core::ffi::c_char {
    let s: &'static core::ffi::CStr = match res {
        CCapResult::Success => c"CCapResult::Success",
        CCapResult::Encode_UnrepresentableBounds => c"CCapResult::Encode_UnrepresentableBounds",
        CCapResult::Encode_InvalidBounds => c"CCapResult::Encode_InvalidBounds",
        CCapResult::NullRequiredArgs => c"CCapResult::NullRequiredArgs",
    };
    s.as_ptr()
}

impl From<CapEncodeErr> for CCapResult {
    fn from(value: CapEncodeErr) -> Self {
        match value {
            CapEncodeErr::UnrepresentableBounds { .. } => CCapResult::Encode_UnrepresentableBounds,
            CapEncodeErr::InvalidBounds { .. } => CCapResult::Encode_InvalidBounds,
        }
    }
}

/// Define the API in a rust macro so we can reproduce it for both capability formats
macro_rules! ccap_api {
    ($prefix:ident, $format:ty) => {
        paste! {

/// The raw pesbt of the null capability.
#[no_mangle]
pub extern "C" fn [< $prefix _null_pesbt >]() -> u64 {
    <$format>::NULL_PESBT
}

/// Initialize `cap` to the null capability with its cursor at `addr`.
///
/// cap is non-optional, and the function returns `NullRequiredArgs` if null.
#[no_mangle]
pub unsafe extern "C" fn [< $prefix _null_derived >](cap: *mut CCap, addr: u64) -> CCapResult {
    if cap.is_null() {
        return CCapResult::NullRequiredArgs;
    }
    *cap = Capability::<$format>::null_derived(addr).into();
    CCapResult::Success
}

/// Initialize `cap` from an in-memory pesbt and cursor.
///
/// cap is non-optional, and the function returns `NullRequiredArgs` if null.
#[no_mangle]
pub unsafe extern "C" fn [< $prefix _decompress_mem >](cap: *mut CCap, pesbt: u64, cursor: u64, tag: bool) -> CCapResult {
    if cap.is_null() {
        return CCapResult::NullRequiredArgs;
    }
    *cap = Capability::<$format>::decompress_mem(pesbt, cursor, tag).into();
    CCapResult::Success
}

/// Read off the in-memory pesbt of a capability.
///
/// cap and pesbt are non-optional, and the function returns `NullRequiredArgs` if either are null.
#[no_mangle]
pub unsafe extern "C" fn [< $prefix _compress_mem >](cap: *const CCap, pesbt: *mut u64) -> CCapResult {
    if cap.is_null() || pesbt.is_null() {
        return CCapResult::NullRequiredArgs;
    }
    *pesbt = (*cap).decompress::<$format>().compress_mem();
    CCapResult::Success
}

/// Initialize a tagged capability with every permission over exactly [base, top), with the cursor at `cursor`.
///
/// cap is non-optional, and the function returns `NullRequiredArgs` if null.
///
/// Returns `Encode_UnrepresentableBounds` if the bounds would need rounding,
/// and `Encode_InvalidBounds` if top < base or top is past the end of the address space.
#[no_mangle]
pub unsafe extern "C" fn [< $prefix _make_max_perms_cap >](cap: *mut CCap, base: u64, cursor: u64, top: CCapU128) -> CCapResult {
    if cap.is_null() {
        return CCapResult::NullRequiredArgs;
    }
    match Capability::<$format>::new_exact(base, top.into(), ArchPerms::ALL_NO_LVB, false) {
        Ok(mut rust_cap) => {
            rust_cap.set_cursor(cursor);
            *cap = rust_cap.into();
            CCapResult::Success
        }
        Err(err) => err.into(),
    }
}

/// Given a pointer to a capability, read off its base and top.
/// base and top are optional arguments, and are ignored if null.
/// cap is non-optional, and the function returns `NullRequiredArgs` if null.
#[no_mangle]
pub unsafe extern "C" fn [< $prefix _read_bounds >](cap: *const CCap, base: *mut u64, top: *mut CCapU128) -> CCapResult {
    if cap.is_null() {
        return CCapResult::NullRequiredArgs;
    }
    let rust_cap = (*cap).decompress::<$format>();
    if !base.is_null() {
        *base = rust_cap.base();
    }
    if !top.is_null() {
        *top = rust_cap.top_full().into();
    }
    CCapResult::Success
}

/// Given a pointer to a capability, read off its architectural permission bits and M bit.
/// arch_perms and m are optional arguments, and are ignored if null.
/// cap is non-optional, and the function returns `NullRequiredArgs` if null.
#[no_mangle]
pub unsafe extern "C" fn [< $prefix _read_perms >](cap: *const CCap, arch_perms: *mut u8, m: *mut bool) -> CCapResult {
    if cap.is_null() {
        return CCapResult::NullRequiredArgs;
    }
    let rust_cap = (*cap).decompress::<$format>();
    if !arch_perms.is_null() {
        *arch_perms = rust_cap.arch_perms().bits();
    }
    if !m.is_null() {
        *m = rust_cap.m();
    }
    CCapResult::Success
}

/// Narrow `cap` to the smallest representable region containing [req_base, req_top), keeping the cursor.
/// The tag is cleared if `cap` was sealed or the result would grow the bounds.
/// It is also cleared if the cursor falls outside the representable region of the new bounds.
///
/// cap is non-optional, and the function returns `NullRequiredArgs` if null.
/// exact is optional; if given, it is set if the bounds didn't need rounding.
#[no_mangle]
pub unsafe extern "C" fn [< $prefix _setbounds >](cap: *mut CCap, req_base: u64, req_top: CCapU128, exact: *mut bool) -> CCapResult {
    if cap.is_null() {
        return CCapResult::NullRequiredArgs;
    }
    let (rust_cap, was_exact) = (*cap).decompress::<$format>().set_bounds(req_base, req_top.into());
    *cap = rust_cap.into();
    if !exact.is_null() {
        *exact = was_exact;
    }
    CCapResult::Success
}

/// Move the cursor, clearing the tag if the bounds can't be represented relative to the new address.
///
/// cap is non-optional, and the function returns `NullRequiredArgs` if null.
#[no_mangle]
pub unsafe extern "C" fn [< $prefix _set_cursor >](cap: *mut CCap, addr: u64) -> CCapResult {
    if cap.is_null() {
        return CCapResult::NullRequiredArgs;
    }
    let mut rust_cap = (*cap).decompress::<$format>();
    rust_cap.set_cursor(addr);
    *cap = rust_cap.into();
    CCapResult::Success
}

/// Check whether the bounds of `cap` decode the same relative to `addr`.
///
/// cap and representable are non-optional, and the function returns `NullRequiredArgs` if either are null.
#[no_mangle]
pub unsafe extern "C" fn [< $prefix _is_representable_with_addr >](cap: *const CCap, addr: u64, representable: *mut bool) -> CCapResult {
    if cap.is_null() || representable.is_null() {
        return CCapResult::NullRequiredArgs;
    }
    *representable = (*cap).decompress::<$format>().is_representable_with_addr(addr);
    CCapResult::Success
}

/// Round a length up to the nearest exactly representable length.
#[no_mangle]
pub extern "C" fn [< $prefix _representable_length >](len: u64) -> u64 {
    representable_length::<$format>(len)
}

/// The mask a base must be aligned with for a region of `len` bytes to be exactly representable.
#[no_mangle]
pub extern "C" fn [< $prefix _representable_alignment_mask >](len: u64) -> u64 {
    representable_alignment_mask::<$format>(len)
}

        }
    };
}

ccap_api!(cc64r, Cc64r);
ccap_api!(cc128r, Cc128r);

#[cfg(feature = "std")]
mod rand_api {
    use cheri_caps::{
        format::{Cc128r, Cc64r},
        rand::rand_cap,
    };
    use paste::paste;
    use rand::SeedableRng;

    use crate::{CCap, CCapResult, CCapU128};

    fn rng_from_seed(seed_in: &CCapU128) -> rand::rngs::StdRng {
        // Seed = concat (seed_in) ([0; 16])
        let mut seed = [0; 32];
        seed.split_at_mut(16).0.copy_from_slice(&seed_in.0);

        rand::rngs::StdRng::from_seed(seed)
    }

    macro_rules! ccap_rand_api {
        ($prefix:ident, $format:ty) => {
            paste! {
/// Randomly generates a tagged capability with random bounds and permissions based on the seed.
///
/// cap and seed are non-optional, and the function returns `NullRequiredArgs` if they're null.
#[no_mangle]
pub unsafe extern "C" fn [< $prefix _rand_cap >](cap: *mut CCap, seed: *const CCapU128) -> CCapResult {
    if cap.is_null() || seed.is_null() {
        return CCapResult::NullRequiredArgs;
    }
    *cap = rand_cap::<$format, _>(&mut rng_from_seed(&*seed)).into();
    CCapResult::Success
}
            }
        };
    }

    ccap_rand_api!(cc64r, Cc64r);
    ccap_rand_api!(cc128r, Cc128r);
}
#[cfg(feature = "std")]
pub use rand_api::*;
