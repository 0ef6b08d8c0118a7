//! Shared constants

/// Decimal places used when a Z word is rewritten
pub const Z_DECIMALS: usize = 3;

/// Decimal places used when an E word is rewritten
pub const E_DECIMALS: usize = 5;

/// Decimal places used for X/Y words of inserted bridge moves
pub const XY_DECIMALS: usize = 3;

/// Default nominal layer height (mm)
pub const DEFAULT_LAYER_HEIGHT: f64 = 0.2;

/// Length below which a move is treated as having no planar extent (mm)
pub const MIN_MOVE_LENGTH: f64 = 1e-9;
