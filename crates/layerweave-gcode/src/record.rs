//! Record types: one parsed line of the input stream

use layerweave_core::constants::{E_DECIMALS, MIN_MOVE_LENGTH, Z_DECIMALS};
use layerweave_core::Point2;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::tokenizer::LineEnding;

/// Absolute machine position, including the extruder axis
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub e: f64,
}

impl Position {
    pub fn new(x: f64, y: f64, z: f64, e: f64) -> Self {
        Self { x, y, z, e }
    }

    pub fn planar(&self) -> Point2 {
        Point2::new(self.x, self.y)
    }

    /// Apply explicitly given axis words, keeping the others
    pub fn with_words(&self, words: &AxisWords) -> Self {
        Self {
            x: words.x.unwrap_or(self.x),
            y: words.y.unwrap_or(self.y),
            z: words.z.unwrap_or(self.z),
            e: words.e.unwrap_or(self.e),
        }
    }
}

/// Axis and feed words present on a line; absent words are `None`
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct AxisWords {
    pub x: Option<f64>,
    pub y: Option<f64>,
    pub z: Option<f64>,
    pub e: Option<f64>,
    pub f: Option<f64>,
}

impl AxisWords {
    /// True if any of X, Y or Z is present
    pub fn has_positional(&self) -> bool {
        self.x.is_some() || self.y.is_some() || self.z.is_some()
    }

    pub fn is_empty(&self) -> bool {
        !self.has_positional() && self.e.is_none() && self.f.is_none()
    }
}

/// Motion command of a move line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Motion {
    /// G0
    Rapid,
    /// G1
    Linear,
    /// G2
    ArcClockwise,
    /// G3
    ArcCounterClockwise,
}

impl Motion {
    pub fn is_arc(&self) -> bool {
        matches!(self, Self::ArcClockwise | Self::ArcCounterClockwise)
    }
}

/// Slicer feature type announced by a `;TYPE:` or `; FEATURE:` comment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeatureType {
    ExternalPerimeter,
    Perimeter,
    Infill,
    /// Any other feature (skirt, support, custom, ...), name kept verbatim
    Other(String),
}

impl FeatureType {
    /// Map a slicer feature name to a type
    pub fn from_name(name: &str) -> Self {
        let name = name.trim();
        match name {
            "External perimeter" | "Outer wall" | "WALL-OUTER" => Self::ExternalPerimeter,
            "Perimeter" | "Inner wall" | "WALL-INNER" => Self::Perimeter,
            _ if name.to_lowercase().contains("infill") || name == "FILL" || name == "SKIN" => {
                Self::Infill
            }
            _ => Self::Other(name.to_string()),
        }
    }
}

impl fmt::Display for FeatureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ExternalPerimeter => write!(f, "External perimeter"),
            Self::Perimeter => write!(f, "Perimeter"),
            Self::Infill => write!(f, "Infill"),
            Self::Other(name) => write!(f, "{}", name),
        }
    }
}

/// A parsed G0/G1/G2/G3 line
///
/// `from` and `to` are fully resolved absolute positions: words missing on
/// the line carry over from the previous position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Move {
    pub motion: Motion,
    pub words: AxisWords,
    pub from: Position,
    pub to: Position,
    /// Feature type active when the line was read
    pub feature: Option<FeatureType>,
}

impl Move {
    /// Extruder advance of this move (negative for a retraction)
    pub fn extrusion(&self) -> f64 {
        self.to.e - self.from.e
    }

    pub fn planar_length(&self) -> f64 {
        self.from.planar().distance(&self.to.planar())
    }

    pub fn length(&self) -> f64 {
        let dz = self.to.z - self.from.z;
        self.planar_length().hypot(dz)
    }

    /// A straight move that lays down material while travelling in XY
    pub fn is_extrusion(&self) -> bool {
        !self.motion.is_arc() && self.extrusion() > 1e-9 && self.planar_length() > MIN_MOVE_LENGTH
    }

    pub fn is_travel(&self) -> bool {
        self.extrusion() <= 1e-9 && self.planar_length() > MIN_MOVE_LENGTH
    }
}

/// Layer-change marker details
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerMarker {
    /// Layer number announced by `;LAYER:<n>`, if any
    pub number: Option<usize>,
}

/// Command kind of a record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RecordKind {
    Move(Move),
    LayerChange(LayerMarker),
    TypeMarker(FeatureType),
    /// G92: redefine the current position
    SetPosition(AxisWords),
    /// Comments, blank lines and every command the engine does not interpret
    Other,
}

/// One line of the original stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// 1-based line number
    pub line_number: usize,
    /// Line text without its terminator
    pub raw: String,
    pub kind: RecordKind,
    /// Terminator that followed the line in the input
    #[serde(default)]
    pub line_ending: LineEnding,
}

impl Record {
    pub fn new(line_number: usize, raw: impl Into<String>, kind: RecordKind) -> Self {
        Self {
            line_number,
            raw: raw.into(),
            kind,
            line_ending: LineEnding::Lf,
        }
    }

    pub fn with_line_ending(mut self, line_ending: LineEnding) -> Self {
        self.line_ending = line_ending;
        self
    }

    pub fn as_move(&self) -> Option<&Move> {
        match &self.kind {
            RecordKind::Move(mv) => Some(mv),
            _ => None,
        }
    }

    pub fn is_extrusion(&self) -> bool {
        self.as_move().is_some_and(Move::is_extrusion)
    }

    pub fn is_layer_change(&self) -> bool {
        matches!(self.kind, RecordKind::LayerChange(_))
    }
}

/// Format a word value with fixed decimals, never emitting `-0`
pub fn format_word(letter: char, value: f64, decimals: usize) -> String {
    let formatted = format!("{:.*}", decimals, value);
    let is_zero = formatted
        .trim_start_matches('-')
        .chars()
        .all(|c| c == '0' || c == '.');
    if is_zero {
        format!("{}{:.*}", letter, decimals, 0.0)
    } else {
        format!("{}{}", letter, formatted)
    }
}

/// Rewrite the Z and/or E word of a move line, keeping every other word and the comment
///
/// A missing Z word is inserted after the last X/Y word; a missing E word is
/// appended after the other words.
pub fn rewrite_move_line(raw: &str, z: Option<f64>, e: Option<f64>) -> String {
    let (code, comment) = match raw.find(';') {
        Some(pos) => (&raw[..pos], Some(&raw[pos..])),
        None => (raw, None),
    };

    let mut words: Vec<String> = Vec::new();
    let mut z_written = false;
    let mut e_written = false;
    let mut last_xy = 0;

    for (i, token) in code.split_whitespace().enumerate() {
        let letter = token.chars().next().map(|c| c.to_ascii_uppercase());
        match (i, letter) {
            (0, _) => words.push(token.to_string()),
            (_, Some('Z')) if z.is_some() => {
                words.push(format_word('Z', z.unwrap_or_default(), Z_DECIMALS));
                z_written = true;
            }
            (_, Some('E')) if e.is_some() => {
                words.push(format_word('E', e.unwrap_or_default(), E_DECIMALS));
                e_written = true;
            }
            (_, Some('X')) | (_, Some('Y')) => {
                words.push(token.to_string());
                last_xy = words.len();
            }
            _ => words.push(token.to_string()),
        }
    }

    if let Some(z) = z.filter(|_| !z_written) {
        let at = if last_xy > 0 { last_xy } else { words.len().min(1) };
        words.insert(at, format_word('Z', z, Z_DECIMALS));
    }
    if let Some(e) = e.filter(|_| !e_written) {
        words.push(format_word('E', e, E_DECIMALS));
    }

    let mut line = words.join(" ");
    if let Some(comment) = comment {
        line.push(' ');
        line.push_str(comment);
    }
    line
}
