use std::error::Error;

use cheri_caps_tools::{decompress_report_variant, dump_raw_fields, parse_hex_u64, CapVariant};
use clap::Parser;

/// Decompress an in-memory capability, print its fields and check that it re-compresses to the same bits.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    #[arg(long, default_value = "128r")]
    format: CapVariant,

    /// Also print the undecoded bit fields
    #[arg(long, default_value_t = false)]
    raw_fields: bool,

    /// The pesbt half of the capability, in hex
    #[arg(value_parser = parse_hex_u64)]
    pesbt: u64,

    /// The address half of the capability, in hex
    #[arg(value_parser = parse_hex_u64)]
    cursor: u64,
}

fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();

    let mut stdout = std::io::stdout().lock();
    let mut stderr = std::io::stderr().lock();
    if args.raw_fields {
        dump_raw_fields(args.format, args.pesbt, &mut stderr)?;
    }
    decompress_report_variant(args.format, args.pesbt, args.cursor, &mut stdout, &mut stderr)?;

    Ok(())
}
