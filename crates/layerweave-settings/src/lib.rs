//! layerweave Settings Crate
//!
//! Deformation configuration: documented defaults, validation, and
//! JSON/TOML settings files.

pub mod config;
pub mod error;

pub use config::{
    DeformConfig, DeformationMode, Normalization, Tolerances, WallOrder, WaveSettings,
};
pub use error::{SettingsError, SettingsResult};
