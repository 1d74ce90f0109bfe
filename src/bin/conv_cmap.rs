//! Convert Adobe cid2code tables to JSON CMaps
//!
//! Writes `<cmap>.json.gz` for every CMap in the tables and
//! `to-unicode-<REGNAME>.json.gz` into OUTDIR.
//!
//! Usage:
//!   cargo run --release --bin conv_cmap -- \
//!       -c B5=cp950 -c UniCNS-UCS2=utf-16be \
//!       cmap/ Adobe-CNS1 cmaprsrc/cid2code_Adobe_CNS1.txt

use clap::Parser;
use cmap_oxide::cmap::convert_tables;
use cmap_oxide::config::ConvertConfig;
use std::path::PathBuf;

/// Convert CID-to-code tables into reproducible gzip-compressed JSON CMaps.
#[derive(Debug, Parser)]
#[command(name = "conv_cmap", about, version)]
struct Cli {
    /// Codec for decoding one encoding column, as ENC=CODEC (repeatable)
    #[arg(short = 'c', long = "codec", value_name = "ENC=CODEC")]
    codecs: Vec<String>,

    /// gzip compression level (0-9)
    #[arg(long, default_value_t = cmap_oxide::config::DEFAULT_COMPRESSION_LEVEL)]
    level: u32,

    /// Output directory (must exist)
    #[arg(value_name = "OUTDIR")]
    outdir: PathBuf,

    /// Character collection name, e.g. Adobe-Japan1
    #[arg(value_name = "REGNAME")]
    regname: String,

    /// cid2code tables
    #[arg(value_name = "CID2CODE", required = true)]
    tables: Vec<PathBuf>,
}

fn build_config(cli: &Cli) -> cmap_oxide::Result<ConvertConfig> {
    let mut config = ConvertConfig::new().with_compression_level(cli.level);
    for option in &cli.codecs {
        let (enc, codec) = ConvertConfig::parse_codec_option(option)?;
        config = config.with_codec(enc, codec);
    }
    Ok(config)
}

fn run(cli: &Cli) -> cmap_oxide::Result<()> {
    let config = build_config(cli)?;
    let written = convert_tables(&cli.tables, &cli.regname, &cli.outdir, &config)?;
    for path in &written {
        println!("{}", path.display());
    }
    Ok(())
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    if let Err(e) = run(&cli) {
        eprintln!("conv_cmap: {}", e);
        std::process::exit(1);
    }
}
