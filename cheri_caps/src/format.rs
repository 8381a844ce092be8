//! Per-format constants and pesbt field layouts.
//!
//! Both supported formats are the RISC-V "r" (CHERI v0.9 style) compressed capabilities. The capability
//! in memory is a pesbt word followed by the cursor; field positions below are bit numbers within the
//! pesbt word, i.e. in-memory bit number minus the address width.

use core::fmt::Debug;

use bitutils::bf;

use crate::util::mask64;

/// An inclusive `hi:lo` bit range within a pesbt word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Field {
    pub hi: u32,
    pub lo: u32,
}
impl Field {
    pub const fn new(hi: u32, lo: u32) -> Self {
        assert!(hi >= lo && hi < 64, "Field bounds out of order or outside a 64-bit word");
        Self { hi, lo }
    }

    pub const fn width(self) -> u32 {
        self.hi - self.lo + 1
    }

    /// Mask of the bits this field occupies, in place.
    pub const fn mask(self) -> u64 {
        mask64(self.width()) << self.lo
    }

    pub const fn extract(self, pesbt: u64) -> u64 {
        (pesbt >> self.lo) & mask64(self.width())
    }

    /// Replace the field's bits in `pesbt` with `value`, truncating `value` to the field width.
    pub const fn insert(self, pesbt: u64, value: u64) -> u64 {
        (pesbt & !self.mask()) | ((value << self.lo) & self.mask())
    }
}

/// How the M+AP field stores permissions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApEncoding {
    /// One bit per permission, M in the top bit.
    Identity,
    /// An index into per-quadrant tables.
    Quadrant,
}

pub trait CapFormat: Debug + Clone + Copy + PartialEq + Eq + Default + 'static {
    const NAME: &'static str;

    /// Width of the in-memory capability, excluding the tag.
    const CAP_BITS: u32;
    const ADDR_WIDTH: u32;
    /// Tops and lengths need one more bit than addresses.
    const LEN_WIDTH: u32 = Self::ADDR_WIDTH + 1;
    const MANTISSA_WIDTH: u32;
    const MAX_EXPONENT: u32;
    /// Width of each of the two exponent fragments stolen from T and B when EF is clear.
    const EXP_LOW_WIDTH: u32;
    /// XORed with the in-memory pesbt to get the register (raw) form.
    const NULL_XOR_MASK: u64;
    const MAX_REPRESENTABLE_OTYPE: u64;
    const AP_ENCODING: ApEncoding;

    const SDP: Field;
    const AP: Field;
    const RESERVED: Field;
    const RESERVED2: Option<Field>;
    const SEALED: Field;
    const EF: Field;
    /// Implied top-MSB for EF=1, and the exponent MSB for EF=0
    const L8: Option<Field>;
    const TOP: Field;
    const BOTTOM: Field;
    const TOP_IE: Field;
    const EXP_HIGH: Field;
    const BOTTOM_IE: Field;
    const EXP_LOW: Field;

    /// Names of the reserved otypes, indexed by how far below [CapFormat::MAX_REPRESENTABLE_OTYPE] they sit.
    const RESERVED_OTYPE_NAMES: [&'static str; 4];

    const MAX_ADDR: u64 = mask64(Self::ADDR_WIDTH);
    const MAX_TOP: u128 = 1u128 << Self::ADDR_WIDTH;
    /// The raw pesbt of the null capability.
    const NULL_PESBT: u64 = Self::NULL_XOR_MASK;

    const OTYPE_UNSEALED: u64 = Self::MAX_REPRESENTABLE_OTYPE;
    const OTYPE_SENTRY: u64 = Self::MAX_REPRESENTABLE_OTYPE - 1;
    const MIN_RESERVED_OTYPE: u64 = Self::MAX_REPRESENTABLE_OTYPE - 3;

    /// Every pesbt bit written by the bounds encoder.
    const EBT_MASK: u64 = Self::EF.mask()
        | Self::TOP.mask()
        | Self::BOTTOM.mask()
        | match Self::L8 {
            Some(f) => f.mask(),
            None => 0,
        };

    fn reserved_otype_name(otype: u64) -> Option<&'static str> {
        if otype > Self::MAX_REPRESENTABLE_OTYPE || otype < Self::MIN_RESERVED_OTYPE {
            return None;
        }
        Some(Self::RESERVED_OTYPE_NAMES[(Self::MAX_REPRESENTABLE_OTYPE - otype) as usize])
    }
}

/// 64-bit capabilities for RV32: 32-bit addresses, 10-bit mantissa.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct Cc64r;

impl CapFormat for Cc64r {
    const NAME: &'static str = "64r";
    const CAP_BITS: u32 = 64;
    const ADDR_WIDTH: u32 = 32;
    const MANTISSA_WIDTH: u32 = 10;
    const MAX_EXPONENT: u32 = 24;
    const EXP_LOW_WIDTH: u32 = 2;
    const NULL_XOR_MASK: u64 = 0x800;
    const MAX_REPRESENTABLE_OTYPE: u64 = 16;
    const AP_ENCODING: ApEncoding = ApEncoding::Quadrant;

    const SDP: Field = Field::new(31, 30);
    const AP: Field = Field::new(29, 25);
    const RESERVED: Field = Field::new(24, 21);
    const RESERVED2: Option<Field> = None;
    const SEALED: Field = Field::new(20, 20);
    const EF: Field = Field::new(19, 19);
    const L8: Option<Field> = Some(Field::new(18, 18));
    const TOP: Field = Field::new(17, 10);
    const BOTTOM: Field = Field::new(9, 0);
    const TOP_IE: Field = Field::new(17, 12);
    const EXP_HIGH: Field = Field::new(11, 10);
    const BOTTOM_IE: Field = Field::new(9, 2);
    const EXP_LOW: Field = Field::new(1, 0);

    const RESERVED_OTYPE_NAMES: [&'static str; 4] = ["UNSEALED", "SENTRY", "RESERVED2", "RESERVED3"];
}

/// 128-bit capabilities for RV64: 64-bit addresses, 14-bit mantissa.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct Cc128r;

impl CapFormat for Cc128r {
    const NAME: &'static str = "128r";
    const CAP_BITS: u32 = 128;
    const ADDR_WIDTH: u32 = 64;
    const MANTISSA_WIDTH: u32 = 14;
    const MAX_EXPONENT: u32 = 52;
    const EXP_LOW_WIDTH: u32 = 3;
    const NULL_XOR_MASK: u64 = 0;
    const MAX_REPRESENTABLE_OTYPE: u64 = 16;
    const AP_ENCODING: ApEncoding = ApEncoding::Identity;

    const SDP: Field = Field::new(56, 53);
    const AP: Field = Field::new(52, 47);
    const RESERVED: Field = Field::new(46, 28);
    const RESERVED2: Option<Field> = Some(Field::new(63, 57));
    const SEALED: Field = Field::new(27, 27);
    const EF: Field = Field::new(26, 26);
    const L8: Option<Field> = None;
    const TOP: Field = Field::new(25, 14);
    const BOTTOM: Field = Field::new(13, 0);
    const TOP_IE: Field = Field::new(25, 17);
    const EXP_HIGH: Field = Field::new(16, 14);
    const BOTTOM_IE: Field = Field::new(13, 3);
    const EXP_LOW: Field = Field::new(2, 0);

    const RESERVED_OTYPE_NAMES: [&'static str; 4] = ["UNSEALED", "SENTRY", "INDIRECT_PAIR", "INDIRECT_SENTRY"];
}

// Debug views of the pesbt word, for tools and for cross-checking the Field tables.
// Only the EF=1 interpretation of the bounds fields is shown.
bf!(pub Cc64rBits[u64] {
    pub b: 0:9,
    pub t: 10:17,
    pub l8: 18:18,
    pub ef: 19:19,
    pub sealed: 20:20,
    pub reserved: 21:24,
    pub ap: 25:29,
    pub sdp: 30:31
});

bf!(pub Cc128rBits[u64] {
    pub b: 0:13,
    pub t: 14:25,
    pub ef: 26:26,
    pub sealed: 27:27,
    pub reserved: 28:46,
    pub ap: 47:52,
    pub sdp: 53:56,
    pub reserved2: 57:63
});
