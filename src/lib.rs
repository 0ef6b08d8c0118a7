//! # layerweave
//!
//! A G-code post-processor for FDM printers. It reads a sliced program,
//! groups its extrusion into layers and segments, and rewrites the Z and E
//! words of selected segments:
//!
//! - **Brick layers**: every other layer is raised by half a layer height so
//!   wall loops interlock like bricks
//! - **Non-planar waves**: a sinusoidal Z offset, ramped in from the first
//!   layer, with optional alternation between neighbouring wall loops
//! - **Wall reordering**: print wall loops inner-first or outer-first
//!
//! Every line the deformation does not touch is emitted byte-for-byte.
//!
//! ## Architecture
//!
//! 1. **layerweave-core** - Error type, planar geometry, constants
//! 2. **layerweave-settings** - `DeformConfig`, validation, settings files
//! 3. **layerweave-gcode** - Tokenizer, layer segmenter, classifier, serializer
//! 4. **layerweave-deform** - Planner, rescaler, reorderer, stage pipeline
//! 5. **layerweave** - File boundary helpers and the command line tool

use anyhow::Context;
use std::io::Write;
use std::path::Path;

pub use layerweave_core::{Bounds2, Error, Point2, Result, WaveDirection};
pub use layerweave_deform::{
    DeformEngine, DeformationPlanner, EngineOutput, EngineReport, ExtrusionRescaler, Stage,
    StageHandle, StagePipeline, StageReport, WallReorderer,
};
pub use layerweave_gcode::{
    serialize, segment_layers, Program, Record, RecordKind, SegmentRole, Tokenizer,
};
pub use layerweave_settings::{
    DeformConfig, DeformationMode, Normalization, SettingsError, Tolerances, WallOrder,
    WaveSettings,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build date (set at compile time)
pub const BUILD_DATE: &str = env!("BUILD_DATE");

/// Initialize logging for the command line tool
///
/// `verbosity` 0 logs at info, 1 at debug, 2 and above at trace.
/// `RUST_LOG` takes precedence when set. Logs go to stderr so that
/// output written to stdout stays clean.
pub fn init_logging(verbosity: u8) -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    let level = match verbosity {
        0 => tracing::Level::INFO,
        1 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };
    let env_filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env()
        .context("invalid RUST_LOG directive")?;

    let fmt_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_level(true)
        .with_line_number(verbosity > 1);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()
        .context("failed to install tracing subscriber")?;

    Ok(())
}

/// Process G-code text with a configuration
pub fn process_str(text: &str, config: DeformConfig) -> Result<EngineOutput> {
    DeformEngine::new(config)?.process(text)
}

/// Process a G-code file
///
/// With `output` set to `None` the input is rewritten in place. The result
/// is written to a temporary file next to the destination and renamed into
/// place only after the whole run succeeded, so a failure never leaves a
/// partial file behind.
pub fn process_file(
    input: &Path,
    output: Option<&Path>,
    config: DeformConfig,
) -> anyhow::Result<EngineReport> {
    let text = std::fs::read_to_string(input)
        .with_context(|| format!("failed to read {}", input.display()))?;

    let processed =
        process_str(&text, config).with_context(|| format!("failed to process {}", input.display()))?;

    let destination = output.unwrap_or(input);
    let directory = match destination.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let mut temp = tempfile::NamedTempFile::new_in(directory)
        .with_context(|| format!("failed to create temporary file in {}", directory.display()))?;
    temp.write_all(processed.text.as_bytes())
        .with_context(|| format!("failed to write {}", destination.display()))?;
    temp.persist(destination)
        .with_context(|| format!("failed to replace {}", destination.display()))?;

    tracing::info!(
        input = %input.display(),
        output = %destination.display(),
        layers = processed.report.layers,
        "wrote deformed program"
    );
    Ok(processed.report)
}
