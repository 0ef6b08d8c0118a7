//! # layerweave deformation
//!
//! Turns a segmented G-code [`Program`](layerweave_gcode::Program) into a
//! deformed one.
//!
//! ## Stages
//!
//! - **Classify**: group extrusion runs into segments and label them
//! - **Reorder**: optionally print wall loops inner-first or outer-first
//! - **Plan**: brick half-layer shifts or a sinusoidal non-planar offset
//! - **Rescale**: keep deposited volume per millimetre after the Z change
//!
//! [`DeformEngine`] wires the stages between the tokenizer and the serializer.

pub mod engine;
pub mod pipeline;
pub mod planner;
pub mod reorder;
pub mod rescaler;

pub use engine::{DeformEngine, EngineOutput, EngineReport};
pub use pipeline::{
    ClassifyStage, PlanStage, RescaleStage, ReorderStage, Stage, StageHandle, StagePipeline,
    StageReport,
};
pub use planner::{amplitude_ramp, length_ratio, DeformationPlanner, PlanStats};
pub use reorder::WallReorderer;
pub use rescaler::{ExtrusionRescaler, RescaleStats};
