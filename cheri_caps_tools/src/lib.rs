//! Shared pieces of the command line tools: format selection, the decompression report, and the
//! CSV records for set-bounds test vectors consumed by other implementations (e.g. RTL test benches).

use std::io::Write;

use cheri_caps::{
    format::{CapFormat, Cc128r, Cc128rBits, Cc64r, Cc64rBits},
    rand::{ChooseRand, SetBoundsCase},
    Capability,
};
use rand::Rng;
use serde::{Deserialize, Deserializer, Serialize};
use serde_with::{formats::Lowercase, DeserializeAs, SerializeAs};

#[derive(clap::ValueEnum, Clone, Copy, Default, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CapVariant {
    #[value(name = "64r")]
    #[serde(rename = "64r")]
    Cc64r,
    #[default]
    #[value(name = "128r")]
    #[serde(rename = "128r")]
    Cc128r,
}

impl CapVariant {
    pub const fn addr_width(self) -> u32 {
        match self {
            CapVariant::Cc64r => Cc64r::ADDR_WIDTH,
            CapVariant::Cc128r => Cc128r::ADDR_WIDTH,
        }
    }
}

/// Parse a hexadecimal number with an optional `0x` prefix.
pub fn parse_hex_u64(s: &str) -> Result<u64, std::num::ParseIntError> {
    let digits = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s);
    u64::from_str_radix(digits, 16)
}

/// Print a value that may need more than 64 bits, flagging it if it does.
fn write_wide<W: Write>(w: &mut W, label: &str, value: u128) -> std::io::Result<()> {
    writeln!(
        w,
        "{label}0x{:x}{:016x} {}",
        (value >> 64) as u64,
        value as u64,
        if value > u64::MAX as u128 {
            " (greater than UINT64_MAX)"
        } else {
            ""
        }
    )
}

/// Print every decoded field of a capability, one per line.
pub fn dump_cap_fields<F: CapFormat, W: Write>(cap: &Capability<F>, w: &mut W) -> std::io::Result<()> {
    writeln!(w, "SDP:         {:#x}", cap.sdp())?;
    writeln!(w, "M:           {:#x}", cap.m() as u8)?;
    writeln!(w, "AP:          {:#x} ({})", cap.arch_perms().bits(), cap.arch_perms())?;

    writeln!(w, "Base:        0x{:016x}", cap.base())?;
    writeln!(w, "Offset:      0x{:016x}", cap.offset())?;
    writeln!(w, "Cursor:      0x{:016x}", cap.cursor())?;
    write_wide(w, "Length:     ", cap.length_full())?;
    write_wide(w, "Top:        ", cap.top_full())?;
    writeln!(w, "Sealed:      {}", cap.is_sealed() as u8)?;
    match F::reserved_otype_name(cap.otype()) {
        Some(name) => writeln!(w, "OType:       {:#x} ({name})", cap.otype())?,
        None => writeln!(w, "OType:       {:#x}", cap.otype())?,
    }
    writeln!(w, "Reserved:    {:#x}", cap.reserved())?;
    if F::RESERVED2.is_some() {
        writeln!(w, "Reserved2:   {:#x}", cap.reserved2())?;
    }
    writeln!(w, "Valid decompress: {}", if cap.bounds_valid() { "yes" } else { "no" })
}

/// Decompress an in-memory pesbt, report its fields and re-compress it.
///
/// The header and the re-compressed value go to `out`, the fields to `fields`.
/// Returns true if re-compression gave back the original word.
pub fn decompress_report<F: CapFormat, O: Write, E: Write>(
    pesbt: u64,
    cursor: u64,
    out: &mut O,
    fields: &mut E,
) -> std::io::Result<bool> {
    writeln!(out, "Decompressing pesbt = {pesbt:016x}, cursor = {cursor:016x}")?;
    let cap = Capability::<F>::decompress_mem(pesbt, cursor, false);
    dump_cap_fields(&cap, fields)?;
    let rt_pesbt = cap.compress_mem();
    let lossless = rt_pesbt == pesbt;
    writeln!(
        out,
        "Re-compressed pesbt = {rt_pesbt:016x}{}",
        if lossless { "" } else { " - WAS DESTRUCTIVE" }
    )?;
    Ok(lossless)
}

/// [decompress_report] for a format chosen at runtime.
pub fn decompress_report_variant<O: Write, E: Write>(
    variant: CapVariant,
    pesbt: u64,
    cursor: u64,
    out: &mut O,
    fields: &mut E,
) -> std::io::Result<bool> {
    match variant {
        CapVariant::Cc64r => decompress_report::<Cc64r, _, _>(pesbt, cursor, out, fields),
        CapVariant::Cc128r => decompress_report::<Cc128r, _, _>(pesbt, cursor, out, fields),
    }
}

/// Print the bit fields of an in-memory pesbt exactly as stored, before the null XOR mask is applied.
/// The bounds fields are split as if EF were set.
pub fn dump_raw_fields<W: Write>(variant: CapVariant, pesbt: u64, w: &mut W) -> std::io::Result<()> {
    match variant {
        CapVariant::Cc64r => {
            let bits = Cc64rBits::new(pesbt);
            writeln!(
                w,
                "sdp={:#x} ap={:#x} reserved={:#x} sealed={} ef={} l8={} t={:#x} b={:#x}",
                bits.sdp(),
                bits.ap(),
                bits.reserved(),
                bits.sealed(),
                bits.ef(),
                bits.l8(),
                bits.t(),
                bits.b()
            )
        }
        CapVariant::Cc128r => {
            let bits = Cc128rBits::new(pesbt);
            writeln!(
                w,
                "reserved2={:#x} sdp={:#x} ap={:#x} reserved={:#x} sealed={} ef={} t={:#x} b={:#x}",
                bits.reserved2(),
                bits.sdp(),
                bits.ap(),
                bits.reserved(),
                bits.sealed(),
                bits.ef(),
                bits.t(),
                bits.b()
            )
        }
    }
}

pub fn gen_set_bounds_case<R: Rng>(rng: &mut R, cap: CapVariant, len_pow2: Option<u32>) -> SetBoundsCase {
    match cap {
        CapVariant::Cc64r => SetBoundsCase::rand::<Cc64r, R>(rng, ChooseRand::Any, len_pow2),
        CapVariant::Cc128r => SetBoundsCase::rand::<Cc128r, R>(rng, ChooseRand::Any, len_pow2),
    }
}

/// What [write_set_bounds_csv] produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GenSummary {
    pub format: CapVariant,
    pub n_total: usize,
    pub n_inexact: usize,
}

impl std::fmt::Display for GenSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Generated {} {:?} set-bounds cases, {} of them inexact",
            self.n_total, self.format, self.n_inexact
        )
    }
}

/// Write `n_cases_per_len` random set-bounds records for each length power of two up to
/// `2^max_len_pow2`, as `:`-delimited CSV with a header. Only CSV is written to `out`.
pub fn write_set_bounds_csv<R: Rng, W: Write>(
    rng: &mut R,
    format: CapVariant,
    max_len_pow2: u32,
    n_cases_per_len: usize,
    out: W,
) -> Result<GenSummary, csv::Error> {
    let mut wtr = csv::WriterBuilder::new().delimiter(b':').from_writer(out);

    let mut summary = GenSummary {
        format,
        n_total: 0,
        n_inexact: 0,
    };
    for len_pow2 in 0..=max_len_pow2.min(format.addr_width()) {
        for _ in 0..n_cases_per_len {
            let case = gen_set_bounds_case(rng, format, Some(len_pow2));
            if !case.exact {
                summary.n_inexact += 1;
            }
            wtr.serialize(SetBoundsTestCaseSerDe::new(format, case))?;
            summary.n_total += 1;
        }
    }
    wtr.flush()?;
    Ok(summary)
}

fn serialize_hex_u64<S>(v: &u64, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serde_with::hex::Hex::<Lowercase>::serialize_as(&u64::to_be_bytes(*v), serializer)
}

fn deserialize_hex_u64<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let bytes: [u8; 8] = serde_with::hex::Hex::<Lowercase>::deserialize_as(deserializer)?;
    Ok(u64::from_be_bytes(bytes))
}

fn serialize_hex_u128<S>(v: &u128, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serde_with::hex::Hex::<Lowercase>::serialize_as(&u128::to_be_bytes(*v), serializer)
}

fn deserialize_hex_u128<'de, D>(deserializer: D) -> Result<u128, D::Error>
where
    D: Deserializer<'de>,
{
    let bytes: [u8; 16] = serde_with::hex::Hex::<Lowercase>::deserialize_as(deserializer)?;
    Ok(u128::from_be_bytes(bytes))
}

/// One CSV record: a set-bounds request on a maximal capability and its expected result.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct SetBoundsTestCaseSerDe {
    pub format: CapVariant,

    #[serde(serialize_with = "serialize_hex_u64", deserialize_with = "deserialize_hex_u64")]
    pub base: u64,
    #[serde(serialize_with = "serialize_hex_u128", deserialize_with = "deserialize_hex_u128")]
    pub length: u128,
    #[serde(serialize_with = "serialize_hex_u64", deserialize_with = "deserialize_hex_u64")]
    pub cursor: u64,

    #[serde(serialize_with = "serialize_hex_u64", deserialize_with = "deserialize_hex_u64")]
    pub new_base: u64,
    #[serde(serialize_with = "serialize_hex_u128", deserialize_with = "deserialize_hex_u128")]
    pub new_top: u128,
    pub exact: bool,
    /// In-memory pesbt of the result
    #[serde(serialize_with = "serialize_hex_u64", deserialize_with = "deserialize_hex_u64")]
    pub pesbt: u64,
}

impl SetBoundsTestCaseSerDe {
    pub fn new(format: CapVariant, case: SetBoundsCase) -> Self {
        Self {
            format,
            base: case.base,
            length: case.length,
            cursor: case.cursor,
            new_base: case.new_base,
            new_top: case.new_top,
            exact: case.exact,
            pesbt: case.pesbt,
        }
    }

    /// Recompute the expected result from the request, to check a record read back from a file.
    pub fn recompute(&self) -> Self {
        let case = match self.format {
            CapVariant::Cc64r => SetBoundsCase::new::<Cc64r>(self.base, self.length, self.cursor),
            CapVariant::Cc128r => SetBoundsCase::new::<Cc128r>(self.base, self.length, self.cursor),
        };
        Self::new(self.format, case)
    }
}

#[cfg(test)]
mod test {
    use std::error::Error;

    use csv::{ReaderBuilder, WriterBuilder};
    use rand::{rngs::StdRng, SeedableRng};

    use crate::{gen_set_bounds_case, parse_hex_u64, write_set_bounds_csv, CapVariant, SetBoundsTestCaseSerDe};

    #[test]
    fn ser_deser() -> Result<(), Box<dyn Error>> {
        let test_case = SetBoundsTestCaseSerDe {
            format: CapVariant::Cc128r,
            base: 7,
            length: 0x1000_0000,
            cursor: 7,
            new_base: 0,
            new_top: 1 << 64,
            exact: false,
            pesbt: 0x1334105,
        };

        let mut v = Vec::new();

        {
            let mut wtr = WriterBuilder::new().delimiter(b':').from_writer(&mut v);
            wtr.serialize(&test_case)?;
            wtr.flush()?;
        }

        let text = std::str::from_utf8(&v)?;
        assert!(text.starts_with("format:base:length:cursor:new_base:new_top:exact:pesbt\n"));
        assert!(text.contains("128r:0000000000000007:"));
        assert!(text.contains(":00000000000000010000000000000000:false:0000000001334105"));

        {
            let mut rdr = ReaderBuilder::new().delimiter(b':').from_reader(v.as_slice());
            for result in rdr.deserialize() {
                let record: SetBoundsTestCaseSerDe = result?;
                assert_eq!(record, test_case);
            }
        }

        Ok(())
    }

    #[test]
    fn generated_cases_recompute() {
        let mut rng = StdRng::seed_from_u64(42);
        for cap in [CapVariant::Cc64r, CapVariant::Cc128r] {
            for _ in 0..200 {
                let record = SetBoundsTestCaseSerDe::new(cap, gen_set_bounds_case(&mut rng, cap, None));
                assert_eq!(record.recompute(), record);
                assert!(record.new_top <= 1u128 << cap.addr_width());
            }
        }
    }

    #[test]
    fn csv_output_is_only_records() -> Result<(), Box<dyn Error>> {
        let mut rng = StdRng::seed_from_u64(5);
        let mut v = Vec::new();
        let summary = write_set_bounds_csv(&mut rng, CapVariant::Cc64r, 40, 3, &mut v)?;
        // Lengths stop at the address width
        assert_eq!(summary.n_total, 33 * 3);

        let mut rdr = ReaderBuilder::new().delimiter(b':').from_reader(v.as_slice());
        let mut n_read = 0;
        let mut n_inexact = 0;
        for result in rdr.deserialize() {
            let record: SetBoundsTestCaseSerDe = result?;
            assert_eq!(record.format, CapVariant::Cc64r);
            assert_eq!(record.recompute(), record);
            if !record.exact {
                n_inexact += 1;
            }
            n_read += 1;
        }
        assert_eq!((n_read, n_inexact), (summary.n_total, summary.n_inexact));
        assert!(!std::str::from_utf8(&v)?.contains("Generated"));
        assert_eq!(
            summary.to_string(),
            format!("Generated 99 Cc64r set-bounds cases, {} of them inexact", summary.n_inexact)
        );
        Ok(())
    }

    #[test]
    fn hex_args() {
        assert_eq!(parse_hex_u64("0x1e3f00004080000"), Ok(0x1e3f00004080000));
        assert_eq!(parse_hex_u64("D0040001"), Ok(0xd0040001));
        assert!(parse_hex_u64("0xg").is_err());
        assert!(parse_hex_u64("").is_err());
    }
}
