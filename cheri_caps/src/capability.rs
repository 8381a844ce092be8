use core::marker::PhantomData;

#[cfg(feature = "std")]
use thiserror::Error;

use crate::{
    bounds::{compute_ebt, decompress_bounds, Bounds},
    format::CapFormat,
    perms::{fix_up_m_ap, m_ap_compress, m_ap_decompress, ArchPerms, CapPerms, PermRuleConfig},
    util::{mask128, mask64},
};

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
#[cfg_attr(feature = "std", derive(Error))]
pub enum CapEncodeErr {
    #[cfg_attr(feature = "std", error("Bounds [{base:#x}, {top:#x}) are not exactly representable"))]
    UnrepresentableBounds { base: u64, top: u128 },
    #[cfg_attr(feature = "std", error("Bounds [{base:#x}, {top:#x}) are out of order or outside the address space"))]
    InvalidBounds { base: u64, top: u128 },
}

/// A decompressed capability.
///
/// The raw pesbt word is kept alongside the decoded fields and is the source of truth for everything
/// that isn't decoded (SDP, reserved bits, sealing), so [Capability::compress_raw] is lossless.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capability<F: CapFormat> {
    base: u64,
    top: u128,
    cursor: u64,
    pesbt: u64,
    exponent: u32,
    arch_perms: ArchPerms,
    m: bool,
    level_bits: bool,
    tag: bool,
    bounds_valid: bool,
    format: PhantomData<F>,
}

impl<F: CapFormat> Capability<F> {
    /// Decompress a register-form pesbt word.
    pub fn decompress_raw(pesbt: u64, cursor: u64, tag: bool) -> Self {
        Self::decompress_raw_lvb(pesbt, cursor, tag, false)
    }

    pub fn decompress_raw_lvb(pesbt: u64, cursor: u64, tag: bool, level_bits: bool) -> Self {
        let pesbt = pesbt & mask64(F::CAP_BITS / 2);
        let cursor = cursor & F::MAX_ADDR;
        let Bounds { base, top, exponent, valid } = decompress_bounds::<F>(pesbt ^ F::NULL_XOR_MASK, cursor);
        let (arch_perms, m) = m_ap_decompress::<F>(F::AP.extract(pesbt), level_bits);
        Self {
            base,
            top,
            cursor,
            pesbt,
            exponent,
            arch_perms,
            m,
            level_bits,
            tag,
            bounds_valid: valid,
            format: PhantomData,
        }
    }

    /// Decompress an in-memory pesbt word.
    pub fn decompress_mem(pesbt: u64, cursor: u64, tag: bool) -> Self {
        Self::decompress_raw(pesbt ^ F::NULL_XOR_MASK, cursor, tag)
    }

    pub fn decompress_mem_lvb(pesbt: u64, cursor: u64, tag: bool, level_bits: bool) -> Self {
        Self::decompress_raw_lvb(pesbt ^ F::NULL_XOR_MASK, cursor, tag, level_bits)
    }

    pub const fn compress_raw(&self) -> u64 {
        self.pesbt
    }

    pub const fn compress_mem(&self) -> u64 {
        self.pesbt ^ F::NULL_XOR_MASK
    }

    /// The null capability: untagged, no permissions, covering the whole address space.
    pub fn null() -> Self {
        Self::null_derived(0)
    }

    /// Convert an integer to a capability: the null capability with its cursor moved to `addr`.
    pub fn null_derived(addr: u64) -> Self {
        let mut cap = Self::decompress_raw(F::NULL_PESBT, 0, false);
        cap.cursor = addr & F::MAX_ADDR;
        cap
    }

    /// A tagged, unsealed capability with every permission, covering `[base, top)`.
    pub fn make_max_perms_cap(base: u64, cursor: u64, top: u128) -> Self {
        Self::make_max_perms_cap_m_lvb(base, cursor, top, false, false)
    }

    /// [Capability::make_max_perms_cap] with a specific M bit and level-bits configuration.
    /// Hybrid-capable harts use M=1 (integer pointer mode) for their root capabilities.
    pub fn make_max_perms_cap_m_lvb(base: u64, cursor: u64, top: u128, m: bool, level_bits: bool) -> Self {
        let enc = compute_ebt::<F>(base, top);
        debug_assert!(enc.exact, "max perms cap [{base:#x}, {top:#x}) must be exactly representable");
        let ap = m_ap_compress::<F>(ArchPerms::all_for(level_bits), m, level_bits);
        let pesbt = F::AP.insert(enc.ebt, ap) ^ F::NULL_XOR_MASK;
        Self::decompress_raw_lvb(pesbt, cursor, true, level_bits)
    }

    /// A tagged, unsealed capability over exactly `[base, top)`, with the cursor at the base.
    pub fn new_exact(base: u64, top: u128, perms: ArchPerms, m: bool) -> Result<Self, CapEncodeErr> {
        if base > F::MAX_ADDR || top > F::MAX_TOP || top < base as u128 {
            return Err(CapEncodeErr::InvalidBounds { base, top });
        }
        let enc = compute_ebt::<F>(base, top);
        if !enc.exact {
            return Err(CapEncodeErr::UnrepresentableBounds { base, top });
        }
        let ap = m_ap_compress::<F>(perms, m, false);
        let pesbt = F::AP.insert(enc.ebt, ap) ^ F::NULL_XOR_MASK;
        Ok(Self::decompress_raw(pesbt, base, true))
    }

    pub const fn base(&self) -> u64 {
        self.base
    }

    /// The top, saturated to the largest address.
    pub fn top(&self) -> u64 {
        self.top.min(F::MAX_ADDR as u128) as u64
    }

    /// The top with the extra bit needed to express the end of the address space.
    pub const fn top_full(&self) -> u128 {
        self.top
    }

    pub fn length_full(&self) -> u128 {
        self.top.wrapping_sub(self.base as u128) & mask128(F::LEN_WIDTH)
    }

    /// The length, saturated to the largest address.
    pub fn length(&self) -> u64 {
        debug_assert!(!self.tag || self.top >= self.base as u128, "Tagged capabilities must be in bounds!");
        self.length_full().min(F::MAX_ADDR as u128) as u64
    }

    pub const fn cursor(&self) -> u64 {
        self.cursor
    }

    /// `cursor - base`, wrapping at the address width.
    pub const fn offset(&self) -> u64 {
        self.cursor.wrapping_sub(self.base) & F::MAX_ADDR
    }

    pub const fn tag(&self) -> bool {
        self.tag
    }

    pub const fn bounds_valid(&self) -> bool {
        self.bounds_valid
    }

    pub const fn exponent(&self) -> u32 {
        self.exponent
    }

    pub const fn arch_perms(&self) -> ArchPerms {
        self.arch_perms
    }

    pub const fn m(&self) -> bool {
        self.m
    }

    pub const fn level_bits(&self) -> bool {
        self.level_bits
    }

    pub fn perms(&self) -> CapPerms {
        self.arch_perms.to_cap_perms()
    }

    pub fn has_perms(&self, perms: CapPerms) -> bool {
        self.perms().contains(perms)
    }

    /// The software-defined permission bits
    pub const fn sdp(&self) -> u64 {
        F::SDP.extract(self.pesbt)
    }

    pub const fn reserved(&self) -> u64 {
        F::RESERVED.extract(self.pesbt)
    }

    pub const fn reserved2(&self) -> u64 {
        match F::RESERVED2 {
            Some(field) => field.extract(self.pesbt),
            None => 0,
        }
    }

    pub const fn has_reserved_bits_set(&self) -> bool {
        self.reserved() != 0 || self.reserved2() != 0
    }

    pub const fn is_sealed(&self) -> bool {
        F::SEALED.extract(self.pesbt) == 1
    }

    pub const fn is_unsealed(&self) -> bool {
        !self.is_sealed()
    }

    /// These formats have a single sealed bit, so every sealed capability is a sealed entry.
    pub const fn is_sealed_entry(&self) -> bool {
        self.is_sealed()
    }

    pub const fn otype(&self) -> u64 {
        if self.is_sealed() {
            F::OTYPE_SENTRY
        } else {
            F::OTYPE_UNSEALED
        }
    }

    /// Capability pointer mode is the absence of M.
    pub const fn capmode(&self) -> bool {
        !self.m
    }

    /// Can `size` bytes at `addr` be accessed through this capability's bounds?
    pub fn is_in_bounds(&self, addr: u64, size: u64) -> bool {
        if addr < self.base {
            return false;
        }
        let end = addr as u128 + size as u128;
        if end > F::MAX_ADDR as u128 {
            // Only the last byte of the address space may wrap, and only for a full-length cap
            if self.top >= end {
                return true;
            }
            if self.tag {
                log::warn!("Found capability access that wraps around: {addr:#x} + {size:#x}. Authorizing cap: {self}");
            }
            return false;
        }
        end <= self.top
    }

    pub fn addr_in_bounds(&self, addr: u64) -> bool {
        addr >= self.base && (addr as u128) < self.top
    }

    pub fn cursor_in_bounds(&self) -> bool {
        self.addr_in_bounds(self.cursor)
    }

    /// Do the stored bounds decode to the same thing relative to `addr`?
    pub fn is_representable_with_addr(&self, addr: u64) -> bool {
        let bounds = decompress_bounds::<F>(self.compress_mem(), addr & F::MAX_ADDR);
        bounds.base == self.base && bounds.top == self.top
    }

    /// Are the decoded bounds consistent with the pesbt word and the current cursor?
    pub fn is_representable(&self) -> bool {
        self.is_representable_with_addr(self.cursor)
    }

    /// Move the cursor, invalidating the capability if the bounds can't follow it.
    pub fn set_cursor(&mut self, addr: u64) {
        let addr = addr & F::MAX_ADDR;
        if self.is_representable_with_addr(addr) {
            self.cursor = addr;
        } else {
            self.mark_unrepresentable(addr);
        }
    }

    pub fn increment_offset(&mut self, delta: u64) {
        self.set_cursor(self.cursor.wrapping_add(delta));
    }

    /// Clear the tag and move the cursor to `addr`, re-decoding the bounds relative to the new address.
    pub fn mark_unrepresentable(&mut self, addr: u64) {
        log::trace!("{} capability became unrepresentable at {addr:#x}: {self}", F::NAME);
        *self = Self::decompress_raw_lvb(self.pesbt, addr, false, self.level_bits);
    }

    pub fn clear_tag(&mut self) {
        self.tag = false;
    }

    /// The otype is ignored: these formats can only express "sealed".
    pub fn set_sealed(&mut self, _otype: u64) {
        self.pesbt = F::SEALED.insert(self.pesbt, 1);
    }

    pub fn set_unsealed(&mut self) {
        self.pesbt = F::SEALED.insert(self.pesbt, 0);
    }

    pub fn make_sealed_entry(&mut self) {
        debug_assert!(self.is_unsealed(), "Should only be used with unsealed capabilities");
        self.set_sealed(F::OTYPE_SENTRY);
    }

    pub fn unseal_entry(&mut self) {
        debug_assert!(self.is_sealed_entry(), "Should only be used with sentry capabilities");
        self.set_unsealed();
    }

    /// Replace the permissions. Combinations the format can't express become whatever their
    /// encoding decodes to, so the decoded view always matches the pesbt word.
    pub fn set_perms(&mut self, perms: ArchPerms, m: bool) {
        let ap = m_ap_compress::<F>(perms, m, self.level_bits);
        self.pesbt = F::AP.insert(self.pesbt, ap);
        (self.arch_perms, self.m) = m_ap_decompress::<F>(ap, self.level_bits);
    }

    pub fn set_sdp(&mut self, sdp: u64) {
        self.pesbt = F::SDP.insert(self.pesbt, sdp);
    }

    pub fn set_capmode(&mut self, enable: bool) {
        if enable == self.capmode() {
            return;
        }
        self.set_perms(self.arch_perms, !enable);
    }

    /// Normalise the permissions to a set the permission-narrowing instruction could produce.
    /// Returns true if anything changed.
    pub fn fix_up_m_ap(&mut self, config: PermRuleConfig) -> bool {
        let mut perms = self.arch_perms;
        let mut m = self.m;
        let updated = fix_up_m_ap(&mut perms, &mut m, F::ADDR_WIDTH, config);
        if updated {
            self.set_perms(perms, m);
        }
        updated
    }

    /// Narrow the bounds to the smallest representable region containing `[req_base, req_top)`.
    /// The cursor is kept.
    ///
    /// The result is untagged if the input was sealed or the rounded bounds escape the input bounds.
    /// If the cursor is outside the representable region of the new bounds, the result is untagged
    /// and its bounds are those the new pesbt decodes to at the cursor.
    /// Returns the new capability and whether the requested bounds were stored exactly.
    pub fn set_bounds(&self, req_base: u64, req_top: u128) -> (Self, bool) {
        let req_base = req_base & F::MAX_ADDR;
        let req_top = req_top.clamp(req_base as u128, F::MAX_TOP);
        let enc = compute_ebt::<F>(req_base, req_top);

        let mem = (self.compress_mem() & !F::EBT_MASK) | enc.ebt;
        let bounds = decompress_bounds::<F>(mem, req_base);
        debug_assert_eq!(bounds.base, req_base & enc.alignment_mask);
        debug_assert!(bounds.top >= req_top, "top rounded down: {:#x} < {req_top:#x}", bounds.top);

        let monotonic = bounds.base >= self.base && bounds.top <= self.top;
        let mut new = Self {
            base: bounds.base,
            top: bounds.top,
            pesbt: mem ^ F::NULL_XOR_MASK,
            exponent: bounds.exponent,
            bounds_valid: bounds.valid,
            ..*self
        };
        if !monotonic || self.is_sealed() {
            new.tag = false;
        }
        if !new.is_representable() {
            new.mark_unrepresentable(self.cursor);
        }
        (new, enc.exact)
    }

    /// [Capability::set_bounds] starting at the cursor.
    pub fn set_bounds_len(&self, req_len: u128) -> (Self, bool) {
        self.set_bounds(self.cursor, self.cursor as u128 + req_len)
    }
}

impl<F: CapFormat> Default for Capability<F> {
    fn default() -> Self {
        Self::null()
    }
}

impl<F: CapFormat> core::fmt::Display for Capability<F> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "v:{} s:{} m:{} p:{:02x} b:{:#x} l:{:#x} o:{:#x} t:{}",
            self.tag as u8,
            self.is_sealed() as u8,
            self.m as u8,
            self.arch_perms.bits(),
            self.base,
            self.length_full().min(F::MAX_ADDR as u128),
            self.offset(),
            self.otype()
        )
    }
}
