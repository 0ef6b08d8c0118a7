//! Layered program model
//!
//! A [`Program`] is the token stream split into a preamble and layers. After
//! classification each layer holds an ordered list of [`Block`]s: either a
//! pass-through record or a [`Segment`] of consecutive extrusion moves.

use layerweave_core::constants::{E_DECIMALS, XY_DECIMALS, Z_DECIMALS};
use layerweave_core::{Bounds2, Point2};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::record::{format_word, AxisWords, Motion, Move, Position, Record, RecordKind};
use crate::tokenizer::{LineEnding, SlicerHeader};

/// Role of an extrusion segment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SegmentRole {
    /// Outermost visible wall
    ExternalPerimeter,
    /// Inner perimeter loop
    Wall,
    Infill,
    /// Skirt, support and any other feature; never deformed
    Other,
}

impl fmt::Display for SegmentRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ExternalPerimeter => write!(f, "external-perimeter"),
            Self::Wall => write!(f, "wall"),
            Self::Infill => write!(f, "infill"),
            Self::Other => write!(f, "other"),
        }
    }
}

/// Planned deformation of one move
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MovePlan {
    /// Target Z of the move end point
    pub z: f64,
    /// Offset added to the original Z
    pub offset: f64,
    /// Deformed 3D length divided by original 3D length
    pub length_ratio: f64,
}

impl MovePlan {
    /// A plan that leaves the move where it is
    pub fn identity(z: f64) -> Self {
        Self {
            z,
            offset: 0.0,
            length_ratio: 1.0,
        }
    }

    pub fn is_deformed(&self, epsilon: f64) -> bool {
        self.offset.abs() > epsilon || (self.length_ratio - 1.0).abs() > epsilon
    }
}

/// Planned deformation of a whole segment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentPlan {
    /// Z of the segment start point
    pub start_z: f64,
    /// One entry per segment move
    pub moves: Vec<MovePlan>,
    /// Additional extrusion factor for deformed moves (1.0 when unused)
    pub extrusion_factor: f64,
}

impl SegmentPlan {
    pub fn is_deformed(&self, epsilon: f64) -> bool {
        self.moves.iter().any(|m| m.is_deformed(epsilon))
    }
}

/// One extrusion move owned by a segment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentMove {
    pub line_number: usize,
    /// Original line text
    pub raw: String,
    pub mv: Move,
    /// Rescaled absolute E, when it differs from the source
    pub e_out: Option<f64>,
    #[serde(default)]
    pub line_ending: LineEnding,
}

impl SegmentMove {
    /// Build from a move record; `None` for any other record kind
    pub fn from_record(record: Record) -> Option<Self> {
        match record.kind {
            RecordKind::Move(mv) => Some(Self {
                line_number: record.line_number,
                raw: record.raw,
                mv,
                e_out: None,
                line_ending: record.line_ending,
            }),
            _ => None,
        }
    }

    /// Split into equal pieces no longer than `max_length`
    ///
    /// Positions and E are interpolated linearly. Every piece but the last
    /// gets a new `G1` line and the feed rate of the source line moves to the
    /// first piece; the last piece keeps the source line. Arcs and moves
    /// already short enough come back unchanged.
    pub fn subdivide(&self, max_length: f64) -> Vec<SegmentMove> {
        let length = self.mv.planar_length();
        if self.mv.motion.is_arc() || max_length <= 0.0 || length <= max_length {
            return vec![self.clone()];
        }
        let pieces = (length / max_length).ceil() as usize;
        let (from, to) = (self.mv.from, self.mv.to);
        let has_z = (to.z - from.z).abs() > 1e-12;

        let mut out = Vec::with_capacity(pieces);
        let mut previous = from;
        for k in 1..pieces {
            let t = k as f64 / pieces as f64;
            let point = Position::new(
                from.x + (to.x - from.x) * t,
                from.y + (to.y - from.y) * t,
                from.z + (to.z - from.z) * t,
                from.e + (to.e - from.e) * t,
            );
            let feed = if k == 1 { self.mv.words.f } else { None };

            let mut raw = format!(
                "G1 {} {}",
                format_word('X', point.x, XY_DECIMALS),
                format_word('Y', point.y, XY_DECIMALS)
            );
            if has_z {
                raw.push(' ');
                raw.push_str(&format_word('Z', point.z, Z_DECIMALS));
            }
            raw.push(' ');
            raw.push_str(&format_word('E', point.e, E_DECIMALS));
            if let Some(f) = feed {
                raw.push_str(&format!(" F{}", f));
            }

            out.push(SegmentMove {
                line_number: self.line_number,
                raw,
                mv: Move {
                    motion: Motion::Linear,
                    words: AxisWords {
                        x: Some(point.x),
                        y: Some(point.y),
                        z: has_z.then_some(point.z),
                        e: Some(point.e),
                        f: feed,
                    },
                    from: previous,
                    to: point,
                    feature: self.mv.feature.clone(),
                },
                e_out: None,
                line_ending: self.line_ending,
            });
            previous = point;
        }

        let mut last = self.clone();
        last.mv.from = previous;
        out.push(last);
        out
    }
}

/// A maximal run of consecutive extrusion moves of one role
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub role: SegmentRole,
    pub moves: Vec<SegmentMove>,
    /// Start point equals end point within tolerance (whole continuation chain)
    pub closed: bool,
    /// Starts where the previous segment ended with no move in between
    pub continues_previous: bool,
    pub plan: Option<SegmentPlan>,
}

impl Segment {
    /// Create an unclassified segment; `moves` must not be empty
    pub fn new(moves: Vec<SegmentMove>) -> Self {
        Self {
            role: SegmentRole::Infill,
            moves,
            closed: false,
            continues_previous: false,
            plan: None,
        }
    }

    /// Position before the first move
    pub fn start(&self) -> Position {
        self.moves.first().map(|m| m.mv.from).unwrap_or_default()
    }

    /// Position after the last move
    pub fn end(&self) -> Position {
        self.moves.last().map(|m| m.mv.to).unwrap_or_default()
    }

    /// Start point followed by every move end point
    pub fn points(&self) -> impl Iterator<Item = Point2> + '_ {
        let start = self.moves.first().map(|m| m.mv.from.planar());
        start
            .into_iter()
            .chain(self.moves.iter().map(|m| m.mv.to.planar()))
    }

    pub fn bounds(&self) -> Bounds2 {
        let mut bounds = Bounds2::empty();
        for p in self.points() {
            bounds.include(p);
        }
        bounds
    }

    /// Planar length of all moves (mm)
    pub fn length(&self) -> f64 {
        self.moves.iter().map(|m| m.mv.planar_length()).sum()
    }

    /// Total filament extruded by the segment in the source
    pub fn extrusion(&self) -> f64 {
        self.moves.iter().map(|m| m.mv.extrusion()).sum()
    }

    /// Whether the rescaler changed any E value
    pub fn has_rescaled_extrusion(&self) -> bool {
        self.moves.iter().any(|m| m.e_out.is_some())
    }

    pub fn first_line(&self) -> usize {
        self.moves.first().map(|m| m.line_number).unwrap_or_default()
    }

    /// Number of distinct source lines; subdivided pieces share one
    pub fn source_lines(&self) -> usize {
        let splits = self
            .moves
            .windows(2)
            .filter(|w| w[0].line_number != w[1].line_number)
            .count();
        if self.moves.is_empty() {
            0
        } else {
            splits + 1
        }
    }

    /// Subdivide every move longer than `max_length`, returning how many
    /// moves were added
    pub fn subdivide(&mut self, max_length: f64) -> usize {
        let before = self.moves.len();
        self.moves = self
            .moves
            .iter()
            .flat_map(|m| m.subdivide(max_length))
            .collect();
        self.moves.len() - before
    }
}

/// An element of a layer in output order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Block {
    Record(Record),
    Segment(Segment),
}

/// One printed layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Layer {
    /// 0-based layer index
    pub index: usize,
    /// Z of the first extrusion in the layer
    pub z: f64,
    pub blocks: Vec<Block>,
}

impl Layer {
    pub fn new(index: usize, z: f64, records: Vec<Record>) -> Self {
        Self {
            index,
            z,
            blocks: records.into_iter().map(Block::Record).collect(),
        }
    }

    pub fn segments(&self) -> impl Iterator<Item = &Segment> {
        self.blocks.iter().filter_map(|b| match b {
            Block::Segment(s) => Some(s),
            Block::Record(_) => None,
        })
    }

    pub fn segments_mut(&mut self) -> impl Iterator<Item = &mut Segment> {
        self.blocks.iter_mut().filter_map(|b| match b {
            Block::Segment(s) => Some(s),
            Block::Record(_) => None,
        })
    }

    /// Number of source lines held by the layer
    pub fn line_count(&self) -> usize {
        self.blocks
            .iter()
            .map(|b| match b {
                Block::Record(_) => 1,
                Block::Segment(s) => s.source_lines(),
            })
            .sum()
    }

    /// Bounds of every extrusion point in the layer
    pub fn extrusion_bounds(&self) -> Bounds2 {
        let mut bounds = Bounds2::empty();
        for p in self.segments().flat_map(Segment::points) {
            bounds.include(p);
        }
        bounds
    }
}

/// A tokenized program split into layers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Program {
    /// Records before the first layer boundary
    pub preamble: Vec<Record>,
    pub layers: Vec<Layer>,
    pub header: SlicerHeader,
    pub line_ending: LineEnding,
    pub trailing_newline: bool,
}

impl Program {
    pub fn layer_count(&self) -> usize {
        self.layers.len()
    }

    pub fn segment_count(&self) -> usize {
        self.layers.iter().map(|l| l.segments().count()).sum()
    }

    /// Total number of source lines
    pub fn line_count(&self) -> usize {
        self.preamble.len() + self.layers.iter().map(Layer::line_count).sum::<usize>()
    }
}
