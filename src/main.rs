use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use env_logger::Env;
use kingst_fwextract::{write_artifacts, Extractor, ExtractorConfig, LocatorStrategy, NamingScheme};
use log::info;
use std::fs::File;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// KingstVIS executable
    #[arg(short, long)]
    input: PathBuf,

    /// Directory to write the firmware files into
    #[arg(short, long)]
    output: PathBuf,

    /// Use the fw<ID>.hex / <MODEL>.bitstream file names
    #[arg(long)]
    legacy_names: bool,

    #[arg(long, value_enum, default_value_t = Strategy::Auto)]
    strategy: Strategy,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Strategy {
    Auto,
    Symbols,
    Anchors,
}

impl From<Strategy> for LocatorStrategy {
    fn from(strategy: Strategy) -> Self {
        match strategy {
            Strategy::Auto => LocatorStrategy::Auto,
            Strategy::Symbols => LocatorStrategy::Symbols,
            Strategy::Anchors => LocatorStrategy::Anchors,
        }
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let naming = if args.legacy_names {
        NamingScheme::Legacy
    } else {
        NamingScheme::Canonical
    };
    let config = ExtractorConfig::default()
        .with_strategy(args.strategy.into())
        .with_naming(naming);

    let file = File::open(&args.input)
        .with_context(|| format!("Failed to open {}", args.input.display()))?;
    let extractor = Extractor::with_config(file, config)?;

    info!("Scanning {} for firmware...", args.input.display());
    let report = extractor.extract()?;

    let written = write_artifacts(&args.output, &report.artifacts)?;
    for (path, artifact) in written.iter().zip(&report.artifacts) {
        info!(
            "Dump firmware: {} <- {}, size: {:#X}",
            path.display(),
            artifact.source,
            artifact.bytes.len()
        );
    }

    info!("Done: {} file(s) written to {}", written.len(), args.output.display());

    Ok(())
}
