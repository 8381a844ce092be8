//! Architectural permissions and the compact "M+AP" field they are stored in.
//!
//! The 128-bit format stores the permission bits directly. The 64-bit format only has five bits
//! of AP field, so it stores an index into one of four quadrant tables instead. Level bits (LVB)
//! select a second set of tables that can also express the load-mutable/elevate-level/store-level
//! permissions.

use arrayvec::ArrayVec;
use bitflags::bitflags;
use bitutils::bits;

use crate::format::{ApEncoding, CapFormat};

bitflags! {
    /// The compact architectural permission bits, after decoding the AP field.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ArchPerms: u8 {
        /// Capability: load and store tagged capabilities
        const C   = 1 << 0;
        const W   = 1 << 1;
        const R   = 1 << 2;
        const X   = 1 << 3;
        /// Access system registers
        const ASR = 1 << 4;
        /// Load mutable
        const LM  = 1 << 5;
        /// Elevate level
        const EL  = 1 << 6;
        /// Store level
        const SL  = 1 << 7;
    }
}

bitflags! {
    /// The architecture-neutral permission set that instruction checks are written against.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct CapPerms: u32 {
        const GLOBAL          = 1 << 0;
        const EXECUTE         = 1 << 1;
        const LOAD            = 1 << 2;
        const STORE           = 1 << 3;
        const LOAD_CAP        = 1 << 4;
        const STORE_CAP       = 1 << 5;
        const STORE_LOCAL     = 1 << 6;
        const SEAL            = 1 << 7;
        const CINVOKE         = 1 << 8;
        const UNSEAL          = 1 << 9;
        const ACCESS_SYS_REGS = 1 << 10;
        const SETCID          = 1 << 11;
    }
}

impl ArchPerms {
    /// Everything a capability can hold without level bits.
    pub const ALL_NO_LVB: Self = Self::C.union(Self::W).union(Self::R).union(Self::X).union(Self::ASR);
    /// Everything a capability can hold with level bits.
    pub const ALL_LVB: Self = Self::all();

    pub const fn all_for(level_bits: bool) -> Self {
        if level_bits {
            Self::ALL_LVB
        } else {
            Self::ALL_NO_LVB
        }
    }

    /// Expand to the permissions the architecture checks against.
    pub fn to_cap_perms(self) -> CapPerms {
        let mut perms = CapPerms::empty();
        let c = self.contains(Self::C);
        if self.contains(Self::R) {
            perms |= CapPerms::LOAD | CapPerms::GLOBAL;
            if c {
                perms |= CapPerms::LOAD_CAP;
            }
        }
        if self.contains(Self::W) {
            perms |= CapPerms::STORE | CapPerms::GLOBAL | CapPerms::STORE_LOCAL;
            if c {
                perms |= CapPerms::STORE_CAP | CapPerms::SEAL | CapPerms::UNSEAL | CapPerms::SETCID;
            }
        }
        if self.contains(Self::X) {
            perms |= CapPerms::EXECUTE | CapPerms::CINVOKE;
        }
        if self.contains(Self::ASR) {
            perms |= CapPerms::ACCESS_SYS_REGS;
        }
        perms
    }
}

impl core::fmt::Display for ArchPerms {
    /// Space-separated permission names, e.g. `C W R X Asr`.
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        const NAMES: [(ArchPerms, &str); 8] = [
            (ArchPerms::C, "C"),
            (ArchPerms::W, "W"),
            (ArchPerms::R, "R"),
            (ArchPerms::X, "X"),
            (ArchPerms::ASR, "Asr"),
            (ArchPerms::LM, "LM"),
            (ArchPerms::EL, "EL"),
            (ArchPerms::SL, "SL"),
        ];
        let mut first = true;
        for (bit, name) in NAMES {
            if self.contains(bit) {
                if !first {
                    f.write_str(" ")?;
                }
                f.write_str(name)?;
                first = false;
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ApEntry {
    perms: ArchPerms,
    m: bool,
}

type QuadrantTable = [Option<ApEntry>; 8];

const fn entry(perms: ArchPerms) -> Option<ApEntry> {
    Some(ApEntry { perms, m: false })
}

/// An executable entry in quadrant 1, where the low index bit is the M bit.
const fn exec_entry(perms: ArchPerms, index: usize) -> Option<ApEntry> {
    Some(ApEntry { perms, m: index & 1 == 1 })
}

const R: ArchPerms = ArchPerms::R;
const W: ArchPerms = ArchPerms::W;
const RW: ArchPerms = R.union(W);
const RC: ArchPerms = R.union(ArchPerms::C);
const RWC: ArchPerms = RW.union(ArchPerms::C);
const XRW: ArchPerms = RW.union(ArchPerms::X);
const XRC: ArchPerms = RC.union(ArchPerms::X);
const XRWC: ArchPerms = RWC.union(ArchPerms::X);
const XRWC_ASR: ArchPerms = XRWC.union(ArchPerms::ASR);
const LM_EL: ArchPerms = ArchPerms::LM.union(ArchPerms::EL);
const LM_EL_SL: ArchPerms = LM_EL.union(ArchPerms::SL);

const Q0_DATA: QuadrantTable = [
    entry(ArchPerms::empty()),
    entry(R),
    None,
    None,
    entry(W),
    entry(RW),
    None,
    None,
];

const QUADRANTS_NO_LVB: [QuadrantTable; 4] = [
    Q0_DATA,
    [
        exec_entry(XRWC_ASR, 0),
        exec_entry(XRWC_ASR, 1),
        exec_entry(XRC, 2),
        exec_entry(XRC, 3),
        exec_entry(XRWC, 4),
        exec_entry(XRWC, 5),
        exec_entry(XRW, 6),
        exec_entry(XRW, 7),
    ],
    [None, None, None, entry(RC), None, None, None, None],
    [None, None, None, None, None, None, None, entry(RWC)],
];

const QUADRANTS_LVB: [QuadrantTable; 4] = [
    Q0_DATA,
    [
        exec_entry(XRWC_ASR.union(LM_EL_SL), 0),
        exec_entry(XRWC_ASR.union(LM_EL_SL), 1),
        exec_entry(XRC.union(LM_EL), 2),
        exec_entry(XRC.union(LM_EL), 3),
        exec_entry(XRWC.union(LM_EL_SL), 4),
        exec_entry(XRWC.union(LM_EL_SL), 5),
        exec_entry(XRW, 6),
        exec_entry(XRW, 7),
    ],
    [
        entry(RC),
        entry(RC.union(ArchPerms::LM)),
        None,
        entry(RC.union(LM_EL)),
        None,
        None,
        None,
        None,
    ],
    [
        None,
        None,
        None,
        entry(RWC),
        None,
        entry(RWC.union(ArchPerms::LM)),
        entry(RWC.union(LM_EL)),
        entry(RWC.union(LM_EL_SL)),
    ],
];

const fn quadrants(level_bits: bool) -> &'static [QuadrantTable; 4] {
    if level_bits {
        &QUADRANTS_LVB
    } else {
        &QUADRANTS_NO_LVB
    }
}

/// Build a quadrant-encoded AP code.
pub const fn quadrant_code(quadrant: u8, index: u8) -> u8 {
    ((quadrant & 0b11) << 3) | (index & 0b111)
}

/// Decode a 5-bit quadrant AP code into permissions and the M bit.
///
/// Every code decodes to something. Unused quadrant 0 codes grant nothing, unused quadrant 2
/// and 3 codes grant every permission the level-bits configuration can express.
pub fn decode_quadrant(code: u8, level_bits: bool) -> (ArchPerms, bool) {
    let quadrant = bits!(code, 3:4) as usize;
    let index = bits!(code, 0:2) as usize;
    match quadrants(level_bits)[quadrant][index] {
        Some(ApEntry { perms, m }) => (perms, m),
        None if quadrant == 0 => (ArchPerms::empty(), false),
        None => (ArchPerms::all_for(level_bits), false),
    }
}

/// Encode permissions and the M bit into a 5-bit quadrant AP code.
///
/// Combinations with no table entry encode to 0 (no permissions). M only distinguishes
/// executable entries and is ignored otherwise.
pub fn encode_quadrant(perms: ArchPerms, m: bool, level_bits: bool) -> u8 {
    let ignore_m = !perms.contains(ArchPerms::X);
    for (quadrant, table) in quadrants(level_bits).iter().enumerate() {
        for (index, e) in table.iter().enumerate() {
            if let Some(e) = e {
                if e.perms == perms && (ignore_m || e.m == m) {
                    return quadrant_code(quadrant as u8, index as u8);
                }
            }
        }
    }
    0
}

/// All quadrant codes that have a table entry, in ascending order.
pub fn valid_quadrant_codes(level_bits: bool) -> ArrayVec<u8, 32> {
    let mut codes = ArrayVec::new();
    for (quadrant, table) in quadrants(level_bits).iter().enumerate() {
        for (index, e) in table.iter().enumerate() {
            if e.is_some() {
                codes.push(quadrant_code(quadrant as u8, index as u8));
            }
        }
    }
    codes
}

const IDENTITY_PERMS_MASK: u64 = 0x1f;
const IDENTITY_M_BIT: u32 = 5;

/// Encode the M+AP field for format `F`, returning the raw field value.
pub fn m_ap_compress<F: CapFormat>(perms: ArchPerms, m: bool, level_bits: bool) -> u64 {
    match F::AP_ENCODING {
        ApEncoding::Identity => (perms.bits() as u64 & IDENTITY_PERMS_MASK) | ((m as u64) << IDENTITY_M_BIT),
        ApEncoding::Quadrant => encode_quadrant(perms, m, level_bits) as u64,
    }
}

/// Decode the M+AP field for format `F`.
pub fn m_ap_decompress<F: CapFormat>(field: u64, level_bits: bool) -> (ArchPerms, bool) {
    match F::AP_ENCODING {
        ApEncoding::Identity => (
            ArchPerms::from_bits_truncate((field & IDENTITY_PERMS_MASK) as u8),
            (field >> IDENTITY_M_BIT) & 1 == 1,
        ),
        ApEncoding::Quadrant => decode_quadrant(field as u8, level_bits),
    }
}

/// Selects which optional permission rules apply when normalising a permission set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PermRuleConfig {
    /// Follow the v0.9.0 RISC-V CHERI permission rules, which involve LM.
    pub cheri_v090: bool,
}

/// Force an arbitrary `(m, perms)` pair into one the permission-narrowing instruction could have
/// produced, by applying the architecture's ordered implication rules. Some rules only exist for
/// 32-bit addresses.
///
/// Returns true if anything was cleared.
pub fn fix_up_m_ap(perms: &mut ArchPerms, m: &mut bool, addr_width: u32, config: PermRuleConfig) -> bool {
    let mut updated = false;
    let rv32 = addr_width == 32;
    let v090 = config.cheri_v090;

    // Clear `bit` if it is set but `cond` doesn't hold for the current set.
    let mut rule = |bit: ArchPerms, cond: fn(ArchPerms) -> bool| {
        if perms.contains(bit) && !cond(*perms) {
            perms.remove(bit);
            updated = true;
        }
    };

    // 1
    if rv32 {
        if v090 {
            rule(ArchPerms::ASR, |p| p.contains(XRWC.union(ArchPerms::LM)));
        } else {
            rule(ArchPerms::ASR, |p| p.contains(XRWC));
        }
    }
    // 2
    rule(ArchPerms::C, |p| p.intersects(RW));
    if rv32 {
        // 3, 4
        rule(ArchPerms::C, |p| p.contains(R));
        rule(ArchPerms::X, |p| p.contains(R));
        // 5
        if v090 {
            rule(ArchPerms::W, |p| !p.contains(ArchPerms::C) || p.contains(ArchPerms::LM));
        }
        // 6
        rule(ArchPerms::X, |p| p.intersects(W.union(ArchPerms::C)));
    }
    // 7, 8, 11 and 12 concern EL and SL, which have no rules yet.
    // 9
    if v090 {
        rule(ArchPerms::LM, |p| p.contains(RC));
    }
    // 10
    if rv32 && v090 {
        rule(ArchPerms::LM, |p| p.intersects(W.union(ArchPerms::EL)));
    }
    // 13
    if rv32 && v090 {
        rule(ArchPerms::X, |p| {
            let levels = p & ArchPerms::C.union(LM_EL_SL);
            levels.is_empty() || levels == ArchPerms::C.union(LM_EL_SL)
        });
    }
    // 14
    rule(ArchPerms::ASR, |p| p.contains(ArchPerms::X));

    // 15
    if *m && !perms.contains(ArchPerms::X) {
        *m = false;
        updated = true;
    }
    updated
}
