//! Deformation engine: text in, text out
//!
//! Tokenize, segment into layers, run the stage pipeline, serialize. Any
//! error aborts the whole run and no output is produced.

use layerweave_core::Result;
use layerweave_gcode::{segment_layers, serialize, Program, SerializeStats, SlicerHeader, Tokenizer};
use layerweave_settings::DeformConfig;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;

use crate::pipeline::{StagePipeline, StageReport};

/// Summary of one engine run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineReport {
    pub layers: usize,
    pub segments: usize,
    /// Layer height used for brick shifts
    pub layer_height: f64,
    pub stages: Vec<StageReport>,
    pub serialize: SerializeStats,
}

/// Output text plus report
#[derive(Debug, Clone)]
pub struct EngineOutput {
    pub text: String,
    pub report: EngineReport,
}

/// Main entry point for processing G-code
pub struct DeformEngine {
    config: DeformConfig,
    pipeline: StagePipeline,
}

impl DeformEngine {
    /// Create an engine with the standard pipeline; fails on invalid configuration
    pub fn new(config: DeformConfig) -> Result<Self> {
        Self::with_pipeline(config, StagePipeline::standard())
    }

    /// Create an engine with a custom pipeline
    pub fn with_pipeline(config: DeformConfig, pipeline: StagePipeline) -> Result<Self> {
        config.validate()?;
        Ok(Self { config, pipeline })
    }

    pub fn config(&self) -> &DeformConfig {
        &self.config
    }

    pub fn pipeline(&self) -> &StagePipeline {
        &self.pipeline
    }

    /// Process a complete G-code program
    pub fn process(&self, text: &str) -> Result<EngineOutput> {
        let stream = Tokenizer::tokenize(text)?;
        let config = self.resolve_config(&stream.header);
        let mut program = segment_layers(stream, config.tolerances.layer_z)?;

        let stages = self.process_program(&mut program, &config)?;
        let serialized = serialize(&program, config.tolerances.position);

        let report = EngineReport {
            layers: program.layer_count(),
            segments: program.segment_count(),
            layer_height: config.layer_height,
            stages,
            serialize: serialized.stats,
        };
        tracing::info!(
            layers = report.layers,
            segments = report.segments,
            rewritten = report.serialize.rewritten,
            bridges = report.serialize.bridges,
            "processed program"
        );

        Ok(EngineOutput {
            text: serialized.text,
            report,
        })
    }

    /// Run the stage pipeline on an already segmented program
    pub fn process_program(
        &self,
        program: &mut Program,
        config: &DeformConfig,
    ) -> Result<Vec<StageReport>> {
        self.pipeline.run(program, config)
    }

    /// Apply header facts to the configuration
    fn resolve_config(&self, header: &SlicerHeader) -> Cow<'_, DeformConfig> {
        if let Some(height) = header.layer_height {
            if (height - self.config.layer_height).abs() > 1e-6 {
                tracing::warn!(
                    header = height,
                    configured = self.config.layer_height,
                    used = self.config.effective_layer_height(Some(height)),
                    "slicer layer height differs from configuration"
                );
            }
        }

        let layer_height = self.config.effective_layer_height(header.layer_height);
        if layer_height == self.config.layer_height {
            Cow::Borrowed(&self.config)
        } else {
            Cow::Owned(DeformConfig {
                layer_height,
                ..self.config.clone()
            })
        }
    }
}
