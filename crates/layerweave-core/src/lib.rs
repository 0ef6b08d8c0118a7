//! # layerweave Core
//!
//! Error types, planar geometry, and constants shared by the
//! layerweave toolpath and deformation crates.

pub mod constants;
pub mod error;
pub mod geometry;

pub use error::{Error, Result};
pub use geometry::{Bounds2, Point2, WaveDirection};
