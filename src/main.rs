//! layerweave - G-code post-processor
//!
//! Usage:
//!   layerweave <input.gcode> --mode brick --layer-height 0.2
//!   layerweave <input.gcode> -o <output.gcode> --config weave.toml
//!
//! Without `-o` the input file is rewritten in place, which is how slicers
//! run post-processing scripts.

use anyhow::{Context, Result};
use clap::Parser;
use layerweave::{init_logging, process_file, DeformConfig, DeformationMode};
use std::path::PathBuf;
use std::str::FromStr;

/// Brick-layer and non-planar deformation for sliced G-code
#[derive(Parser, Debug)]
#[command(name = "layerweave")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Input G-code file
    #[arg(value_name = "INPUT")]
    input: PathBuf,

    /// Output G-code file (defaults to rewriting the input)
    #[arg(short, long, value_name = "OUTPUT")]
    output: Option<PathBuf>,

    /// Deformation settings file (.json or .toml)
    #[arg(short, long, value_name = "CONFIG")]
    config: Option<PathBuf>,

    /// Deformation mode: brick, non-planar or disabled
    #[arg(long, value_parser = DeformationMode::from_str)]
    mode: Option<DeformationMode>,

    /// Nominal layer height in mm
    #[arg(long)]
    layer_height: Option<f64>,

    /// Extrusion multiplier applied to deformed moves
    #[arg(long)]
    extrusion_multiplier: Option<f64>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl Cli {
    /// Settings file (or defaults) with command line overrides applied
    fn deform_config(&self) -> Result<DeformConfig> {
        let mut config = match &self.config {
            Some(path) => DeformConfig::load_from_file(path)
                .with_context(|| format!("failed to load settings from {}", path.display()))?,
            None => DeformConfig::default(),
        };
        if let Some(mode) = self.mode {
            config.mode = mode;
        }
        if let Some(layer_height) = self.layer_height {
            config.layer_height = layer_height;
        }
        if let Some(multiplier) = self.extrusion_multiplier {
            config.extrusion_multiplier = multiplier;
        }
        Ok(config)
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose)?;

    let config = cli.deform_config()?;
    tracing::debug!(?config, "effective configuration");

    let report = process_file(&cli.input, cli.output.as_deref(), config)?;
    for stage in &report.stages {
        tracing::info!("{}", stage);
    }
    tracing::info!(
        layers = report.layers,
        segments = report.segments,
        bridges = report.serialize.bridges,
        "done"
    );
    Ok(())
}
