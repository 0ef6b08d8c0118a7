//! Stage pipeline
//!
//! The engine runs a [`Program`] through an ordered list of stages. Each
//! stage mutates the program in place and reports how much it changed.

use layerweave_core::Result;
use layerweave_gcode::{classify_program, ChainClassifier, Program, RoleClassifier};
use layerweave_settings::{DeformConfig, DeformationMode};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::planner::DeformationPlanner;
use crate::reorder::WallReorderer;
use crate::rescaler::ExtrusionRescaler;

/// Outcome of one stage run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageReport {
    /// Name of the stage
    pub stage: String,
    /// Number of items (segments or moves) the stage changed
    pub changed: usize,
}

impl StageReport {
    pub fn new(stage: impl Into<String>, changed: usize) -> Self {
        Self {
            stage: stage.into(),
            changed,
        }
    }
}

impl fmt::Display for StageReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.stage, self.changed)
    }
}

/// Trait for program transformation stages
///
/// Stages run in registration order. A stage that returns an error stops
/// the pipeline; nothing is serialized for that run.
pub trait Stage: Send + Sync {
    /// Get the name/identifier of this stage
    fn name(&self) -> &str;

    /// Get a description of what this stage does
    fn description(&self) -> &str;

    /// Transform the program
    fn run(&self, program: &mut Program, config: &DeformConfig) -> Result<StageReport>;

    /// Check if this stage should run for a configuration
    fn is_enabled(&self, _config: &DeformConfig) -> bool {
        true
    }
}

/// Arc-wrapped stage for thread-safe sharing
pub type StageHandle = Arc<dyn Stage>;

/// Groups extrusion runs into segments and assigns roles
#[derive(Default)]
pub struct ClassifyStage {
    classifier: Option<Box<dyn RoleClassifier>>,
}

impl ClassifyStage {
    /// Classify with markers first and geometry as fallback
    pub fn new() -> Self {
        Self::default()
    }

    /// Classify with a custom classifier
    pub fn with_classifier(classifier: Box<dyn RoleClassifier>) -> Self {
        Self {
            classifier: Some(classifier),
        }
    }
}

impl Stage for ClassifyStage {
    fn name(&self) -> &str {
        "classify"
    }

    fn description(&self) -> &str {
        "Group extrusion runs into segments and label them"
    }

    fn run(&self, program: &mut Program, config: &DeformConfig) -> Result<StageReport> {
        let tolerance = config.tolerances.closed_loop;
        let count = match &self.classifier {
            Some(classifier) => classify_program(program, classifier.as_ref(), tolerance),
            None => classify_program(program, &ChainClassifier::standard(tolerance), tolerance),
        };
        Ok(StageReport::new(self.name(), count))
    }
}

/// Reorders wall loops by enclosed area
#[derive(Debug, Default, Clone, Copy)]
pub struct ReorderStage;

impl Stage for ReorderStage {
    fn name(&self) -> &str {
        "reorder"
    }

    fn description(&self) -> &str {
        "Print wall loops inner-first or outer-first"
    }

    fn run(&self, program: &mut Program, config: &DeformConfig) -> Result<StageReport> {
        let moved = WallReorderer::new(config.wall_order).reorder(program);
        Ok(StageReport::new(self.name(), moved))
    }

    fn is_enabled(&self, config: &DeformConfig) -> bool {
        config.wall_reorder
    }
}

/// Computes Z plans for included segments
#[derive(Debug, Default, Clone, Copy)]
pub struct PlanStage;

impl Stage for PlanStage {
    fn name(&self) -> &str {
        "plan"
    }

    fn description(&self) -> &str {
        "Compute brick or non-planar Z offsets"
    }

    fn run(&self, program: &mut Program, config: &DeformConfig) -> Result<StageReport> {
        let stats = DeformationPlanner::new(config).plan(program);
        Ok(StageReport::new(self.name(), stats.planned_segments))
    }

    fn is_enabled(&self, config: &DeformConfig) -> bool {
        config.mode != DeformationMode::Disabled
    }
}

/// Scales E deltas of deformed moves
#[derive(Debug, Default, Clone, Copy)]
pub struct RescaleStage;

impl Stage for RescaleStage {
    fn name(&self) -> &str {
        "rescale"
    }

    fn description(&self) -> &str {
        "Scale extrusion by deformed length and multiplier"
    }

    fn run(&self, program: &mut Program, config: &DeformConfig) -> Result<StageReport> {
        let rescaler =
            ExtrusionRescaler::new(config.extrusion_multiplier, config.tolerances.position);
        let stats = rescaler.rescale(program);
        Ok(StageReport::new(self.name(), stats.rescaled_moves))
    }

    fn is_enabled(&self, config: &DeformConfig) -> bool {
        config.mode != DeformationMode::Disabled
    }
}

/// Ordered list of stages
///
/// # Example
/// ```ignore
/// let mut pipeline = StagePipeline::new();
/// pipeline.register(Arc::new(ClassifyStage::new()));
/// pipeline.register(Arc::new(PlanStage));
///
/// let reports = pipeline.run(&mut program, &config)?;
/// ```
#[derive(Clone, Default)]
pub struct StagePipeline {
    stages: Vec<StageHandle>,
}

impl StagePipeline {
    /// Create a new empty pipeline
    pub fn new() -> Self {
        Self::default()
    }

    /// Classify, plan, rescale, reorder walls
    ///
    /// Planning sees the loops in source order, so loop parity and the
    /// layer-to-layer step cap do not depend on the reorder setting.
    pub fn standard() -> Self {
        let mut pipeline = Self::new();
        pipeline.register_all(vec![
            Arc::new(ClassifyStage::new()),
            Arc::new(PlanStage),
            Arc::new(RescaleStage),
            Arc::new(ReorderStage),
        ]);
        pipeline
    }

    /// Register a stage; stages run in registration order
    pub fn register(&mut self, stage: StageHandle) -> &mut Self {
        self.stages.push(stage);
        self
    }

    /// Register multiple stages at once
    pub fn register_all(&mut self, stages: Vec<StageHandle>) -> &mut Self {
        self.stages.extend(stages);
        self
    }

    /// Replace the stage with the same name, or append it
    pub fn replace(&mut self, stage: StageHandle) -> &mut Self {
        match self.stages.iter().position(|s| s.name() == stage.name()) {
            Some(index) => self.stages[index] = stage,
            None => self.stages.push(stage),
        }
        self
    }

    /// Get the number of registered stages
    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    /// Get a reference to a stage by name
    pub fn get_stage_by_name(&self, name: &str) -> Option<&StageHandle> {
        self.stages.iter().find(|s| s.name() == name)
    }

    /// List all registered stages with their enabled state for a configuration
    pub fn list_stages(&self, config: &DeformConfig) -> Vec<(&str, &str, bool)> {
        self.stages
            .iter()
            .map(|s| (s.name(), s.description(), s.is_enabled(config)))
            .collect()
    }

    /// Run every enabled stage in order
    pub fn run(&self, program: &mut Program, config: &DeformConfig) -> Result<Vec<StageReport>> {
        let mut reports = Vec::with_capacity(self.stages.len());
        for stage in &self.stages {
            if !stage.is_enabled(config) {
                tracing::debug!(stage = stage.name(), "stage disabled");
                continue;
            }
            match stage.run(program, config) {
                Ok(report) => {
                    tracing::debug!(stage = stage.name(), changed = report.changed, "stage finished");
                    reports.push(report);
                }
                Err(e) => {
                    tracing::warn!("Stage '{}' failed: {}", stage.name(), e);
                    return Err(e);
                }
            }
        }
        Ok(reports)
    }
}
