//! Migrate legacy pickled CMaps to JSON
//!
//! Usage:
//!   cargo run --release --bin convert_cmaps_to_json -- old/H.pickle.gz cmap/H.json.gz
//!   cargo run --release --bin convert_cmaps_to_json -- old/ cmap/

use clap::Parser;
use cmap_oxide::legacy::{convert_directory, convert_pickle_to_json};
use std::path::PathBuf;

/// Re-encode `*.pickle.gz` CMaps as reproducible gzip-compressed JSON.
#[derive(Debug, Parser)]
#[command(name = "convert_cmaps_to_json", about, version)]
struct Cli {
    /// A `.pickle.gz` file, or a directory of them
    #[arg(value_name = "INPUT")]
    input: PathBuf,

    /// Output `.json.gz` file, or an existing directory when INPUT is a directory
    #[arg(value_name = "OUTPUT")]
    output: PathBuf,
}

fn run(cli: &Cli) -> cmap_oxide::Result<()> {
    if cli.input.is_dir() {
        let written = convert_directory(&cli.input, &cli.output)?;
        println!("Converted {} files", written.len());
    } else {
        convert_pickle_to_json(&cli.input, &cli.output)?;
    }
    Ok(())
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    if let Err(e) = run(&cli) {
        eprintln!("convert_cmaps_to_json: {}", e);
        std::process::exit(1);
    }
}
