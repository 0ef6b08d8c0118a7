//! Deformation configuration
//!
//! Every tunable of the engine lives in [`DeformConfig`]; there is no ambient
//! global state. Defaults are 0.2 mm layers, a 0.4 mm wall wave and a
//! 0.6 mm infill wave, both at frequency 1.1.
//!
//! Configuration files may be JSON or TOML. Missing keys take their
//! default value.

use layerweave_core::constants::DEFAULT_LAYER_HEIGHT;
use layerweave_core::{Error, Result, WaveDirection};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use crate::error::{SettingsError, SettingsResult};

/// Which deformation the engine applies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeformationMode {
    /// Pass every record through unchanged
    Disabled,
    /// Shift odd layers up by half a layer height
    Brick,
    /// Sinusoidal Z offset within each layer
    NonPlanar,
}

impl Default for DeformationMode {
    fn default() -> Self {
        Self::Disabled
    }
}

impl fmt::Display for DeformationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disabled => write!(f, "disabled"),
            Self::Brick => write!(f, "brick"),
            Self::NonPlanar => write!(f, "non_planar"),
        }
    }
}

impl FromStr for DeformationMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "disabled" | "off" | "none" => Ok(Self::Disabled),
            "brick" | "bricklayers" => Ok(Self::Brick),
            "non_planar" | "nonplanar" => Ok(Self::NonPlanar),
            _ => Err(format!("Unknown deformation mode: {}", s)),
        }
    }
}

/// How a projected position is normalized before the wave is evaluated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Normalization {
    /// Use the projection in millimetres; frequency is cycles per mm
    None,
    /// Normalize to the extent of the segment along the direction
    Segment,
    /// Normalize to the extent of all extrusion in the layer
    Layer,
}

impl Default for Normalization {
    fn default() -> Self {
        Self::Layer
    }
}

/// Order in which wall loops are printed after reordering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WallOrder {
    /// Innermost loop first
    InnerFirst,
    /// Outermost loop first
    OuterFirst,
}

impl Default for WallOrder {
    fn default() -> Self {
        Self::InnerFirst
    }
}

/// Sinusoid parameters for one segment category
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WaveSettings {
    /// Peak Z offset (mm)
    pub amplitude: f64,
    /// Cycles per unit of normalized position
    pub frequency: f64,
    /// Direction the wave travels along
    pub direction: WaveDirection,
}

impl WaveSettings {
    pub fn new(amplitude: f64, frequency: f64, direction: WaveDirection) -> Self {
        Self {
            amplitude,
            frequency,
            direction,
        }
    }

    fn validate(&self, prefix: &str) -> Result<()> {
        if !self.amplitude.is_finite() || self.amplitude < 0.0 {
            return Err(Error::invalid_config(
                format!("{}.amplitude", prefix),
                format!("must be finite and >= 0, got {}", self.amplitude),
            ));
        }
        if !self.frequency.is_finite() || self.frequency < 0.0 {
            return Err(Error::invalid_config(
                format!("{}.frequency", prefix),
                format!("must be finite and >= 0, got {}", self.frequency),
            ));
        }
        Ok(())
    }
}

impl Default for WaveSettings {
    fn default() -> Self {
        Self::new(0.6, 1.1, WaveDirection::X)
    }
}

/// Distances used by geometric decisions
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Tolerances {
    /// Maximum start/end distance for a run to count as a closed loop (mm)
    pub closed_loop: f64,
    /// Minimum Z rise that starts a new inferred layer (mm)
    pub layer_z: f64,
    /// Position difference above which the serializer bridges a gap (mm)
    pub position: f64,
}

impl Default for Tolerances {
    fn default() -> Self {
        Self {
            closed_loop: 0.05,
            layer_z: 0.001,
            position: 0.0001,
        }
    }
}

/// Complete engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeformConfig {
    /// Deformation applied to the toolpath
    pub mode: DeformationMode,
    /// Nominal layer height (mm)
    pub layer_height: f64,
    /// Prefer `; layer_height = ...` from the slicer header when present
    pub use_header_layer_height: bool,
    /// Multiplier applied to the extrusion of every deformed move
    pub extrusion_multiplier: f64,
    /// Brick mode: shift the last layer too when its index is odd
    pub shift_last_layer: bool,
    /// Extra extrusion factor for a shifted last layer
    pub last_layer_extrusion_factor: f64,
    /// Base phase of every wave (radians)
    pub phase: f64,
    /// Normalization of the projected position
    pub normalization: Normalization,
    /// Largest amplitude change allowed between adjacent layers (mm)
    pub max_step_size: f64,
    /// Longest move left whole in non-planar mode; longer moves are subdivided (mm)
    pub segment_length: f64,
    /// Flip the phase by π on odd wall loops
    pub alternate_loops: bool,
    /// Deform infill segments
    pub include_infill: bool,
    /// Deform wall (inner perimeter) segments
    pub include_perimeters: bool,
    /// Deform external perimeter segments
    pub include_external_perimeters: bool,
    /// Reorder wall loops within each layer
    pub wall_reorder: bool,
    /// Order used when `wall_reorder` is set
    pub wall_order: WallOrder,
    /// Wave for external perimeters and walls
    pub wall: WaveSettings,
    /// Wave for infill
    pub infill: WaveSettings,
    /// Geometric tolerances
    pub tolerances: Tolerances,
}

impl Default for DeformConfig {
    fn default() -> Self {
        Self {
            mode: DeformationMode::Disabled,
            layer_height: DEFAULT_LAYER_HEIGHT,
            use_header_layer_height: false,
            extrusion_multiplier: 1.0,
            shift_last_layer: false,
            last_layer_extrusion_factor: 0.5,
            phase: 0.0,
            normalization: Normalization::Layer,
            max_step_size: 0.1,
            segment_length: 1.0,
            alternate_loops: false,
            include_infill: true,
            include_perimeters: true,
            include_external_perimeters: false,
            wall_reorder: false,
            wall_order: WallOrder::InnerFirst,
            wall: WaveSettings::new(0.4, 1.1, WaveDirection::X),
            infill: WaveSettings::default(),
            tolerances: Tolerances::default(),
        }
    }
}

impl DeformConfig {
    /// Create new config with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Default configuration for bricklaying
    pub fn brick(layer_height: f64) -> Self {
        Self {
            mode: DeformationMode::Brick,
            layer_height,
            ..Self::default()
        }
    }

    /// Default configuration for non-planar deformation
    pub fn non_planar() -> Self {
        Self {
            mode: DeformationMode::NonPlanar,
            ..Self::default()
        }
    }

    /// True when the engine will change anything besides pass-through
    pub fn is_active(&self) -> bool {
        self.mode != DeformationMode::Disabled || self.wall_reorder
    }

    /// Half-layer Z shift used by brick mode
    pub fn brick_shift(&self) -> f64 {
        self.layer_height * 0.5
    }

    /// Layer height to use given an optional value from the slicer header
    pub fn effective_layer_height(&self, header: Option<f64>) -> f64 {
        match header {
            Some(h) if self.use_header_layer_height && h.is_finite() && h > 0.0 => h,
            _ => self.layer_height,
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        positive("layer_height", self.layer_height)?;
        positive("extrusion_multiplier", self.extrusion_multiplier)?;
        positive("last_layer_extrusion_factor", self.last_layer_extrusion_factor)?;
        positive("max_step_size", self.max_step_size)?;
        positive("segment_length", self.segment_length)?;
        if !self.phase.is_finite() {
            return Err(Error::invalid_config("phase", "must be finite"));
        }
        self.wall.validate("wall")?;
        self.infill.validate("infill")?;
        positive("tolerances.closed_loop", self.tolerances.closed_loop)?;
        positive("tolerances.layer_z", self.tolerances.layer_z)?;
        positive("tolerances.position", self.tolerances.position)?;
        Ok(())
    }

    /// Load config from file (JSON or TOML)
    pub fn load_from_file(path: &Path) -> SettingsResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            SettingsError::LoadError(format!("{}: {}", path.display(), e))
        })?;

        let config: Self = if has_extension(path, "json") {
            serde_json::from_str(&content)?
        } else if has_extension(path, "toml") {
            toml::from_str(&content)?
        } else {
            return Err(SettingsError::UnsupportedFormat(format!(
                "{} (config file must be .json or .toml)",
                path.display()
            )));
        };

        config.validate()?;
        tracing::debug!("Loaded deformation config from {}", path.display());
        Ok(config)
    }

    /// Save config to file (JSON or TOML)
    pub fn save_to_file(&self, path: &Path) -> SettingsResult<()> {
        self.validate()?;

        let content = if has_extension(path, "json") {
            serde_json::to_string_pretty(self)?
        } else if has_extension(path, "toml") {
            toml::to_string_pretty(self)?
        } else {
            return Err(SettingsError::UnsupportedFormat(format!(
                "{} (config file must be .json or .toml)",
                path.display()
            )));
        };

        std::fs::write(path, content)
            .map_err(|e| SettingsError::SaveError(format!("{}: {}", path.display(), e)))?;
        Ok(())
    }
}

fn has_extension(path: &Path, ext: &str) -> bool {
    path.extension().is_some_and(|e| e.eq_ignore_ascii_case(ext))
}

fn positive(field: &str, value: f64) -> Result<()> {
    if !value.is_finite() || value <= 0.0 {
        return Err(Error::invalid_config(
            field,
            format!("must be finite and > 0, got {}", value),
        ));
    }
    Ok(())
}
