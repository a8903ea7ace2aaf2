use anyhow::Result;
use clap::Parser;
use log::info;
use std::fs;
use std::path::PathBuf;

use dcm2mids::convert::{self, ConvertOptions};
use dcm2mids::index::StudyIndex;

#[derive(Parser)]
#[command(name = "dcm2mids")]
#[command(about = "Convert a folder of DICOM images into a BIDS/MIDS dataset")]
#[command(version)]
struct Cli {
    /// Input path: DICOM directory or ZIP archive
    #[arg(short, long)]
    input: PathBuf,

    /// Output dataset root
    #[arg(short, long)]
    output: PathBuf,

    /// Body part contained in the dataset
    #[arg(short = 'b', long = "body-part")]
    body_part: String,

    /// Use the BIDS standard. Only applicable for body parts considered
    /// in BIDS; everything else keeps the MIDS layout.
    #[arg(long)]
    bids: bool,

    /// Process subjects in parallel
    #[arg(long)]
    parallel: bool,

    /// Maximum recursion depth for directory discovery
    #[arg(long, default_value = "10")]
    max_depth: usize,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let filter = if cli.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(filter)).init();

    info!("indexing {:?}", cli.input);
    let index = StudyIndex::scan(&cli.input, cli.max_depth)?;
    info!("indexed {} records", index.len());

    fs::create_dir_all(&cli.output)?;
    let opts = ConvertOptions {
        output: cli.output.clone(),
        body_part: cli.body_part.clone(),
        bids: cli.bids,
        parallel: cli.parallel,
        progress: !cli.verbose,
    };
    let summary = convert::create_mids_directory(&index, &opts)?;

    println!("\nConversion summary:");
    println!("   Participants: {}", summary.participants);
    println!("   Sessions: {}", summary.sessions);
    println!("   Converted scans: {}", summary.scans);
    if summary.skipped > 0 {
        println!("   Skipped records: {}", summary.skipped);
    }
    println!("   Dataset written to {:?}", cli.output);

    Ok(())
}
