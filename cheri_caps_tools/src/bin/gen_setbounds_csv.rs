use std::error::Error;

use clap::Parser;

use cheri_caps_tools::{write_set_bounds_csv, CapVariant};
use rand::{rngs::StdRng, thread_rng, SeedableRng};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// The filename to output generated tests into
    #[arg(short)]
    out_file: Option<String>,

    #[arg(long)]
    seed: Option<u64>,

    /// Number of test cases to generate for each length power of two.
    #[arg(short, long, default_value_t = 10)]
    n_cases_per_len: usize,

    #[arg(long, default_value = "128r")]
    format: CapVariant,

    /// Only generate lengths up to 2^N instead of covering every power of two up to the address width.
    #[arg(long)]
    max_len_pow2: Option<u32>,
}

fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();

    let mut rng = match args.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_rng(thread_rng())?,
    };

    let max_len_pow2 = args.max_len_pow2.unwrap_or(args.format.addr_width());

    let io_wtr: Box<dyn std::io::Write> = match args.out_file {
        Some(real_file) => Box::new(std::fs::File::create(real_file)?),
        None => Box::new(std::io::stdout()),
    };
    let summary = write_set_bounds_csv(&mut rng, args.format, max_len_pow2, args.n_cases_per_len, io_wtr)?;

    // stdout may be carrying the CSV
    eprintln!("{summary}");

    Ok(())
}
