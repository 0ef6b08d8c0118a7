//! Program serialization
//!
//! Records are written back byte-identical unless a numeric field changed.
//! The serializer tracks where the machine really is, so when planned Z
//! values or reordering leave it somewhere other than the source expected,
//! a bridging move is inserted first. The extruder axis is handled the same
//! way: before a segment or a source move with an E word, a `G92 E` resets the
//! extruder if it is not where that line expects it. Rescaled E values and
//! reordered segments therefore never produce a backwards extrusion.
//!
//! Every source line keeps the terminator it had in the input; inserted lines
//! use the dominant terminator of the program.

use layerweave_core::constants::{E_DECIMALS, MIN_MOVE_LENGTH, XY_DECIMALS, Z_DECIMALS};
use serde::{Deserialize, Serialize};

use crate::program::{Block, Program, Segment};
use crate::record::{format_word, rewrite_move_line, Move, Position, Record, RecordKind};
use crate::tokenizer::LineEnding;

/// Counters describing what the serializer had to change
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerializeStats {
    /// Source lines written verbatim
    pub verbatim: usize,
    /// Move lines whose Z or E word was rewritten
    pub rewritten: usize,
    /// Bridging travel moves inserted
    pub bridges: usize,
    /// `G92 E` resynchronisations inserted
    pub resyncs: usize,
}

/// Serialized text plus statistics
#[derive(Debug, Clone, Default)]
pub struct Serialized {
    pub text: String,
    pub stats: SerializeStats,
}

/// Writes a [`Program`] back to G-code text
#[derive(Debug, Clone)]
pub struct Serializer {
    tolerance: f64,
    position: Position,
    lines: Vec<(String, LineEnding)>,
    line_ending: LineEnding,
    stats: SerializeStats,
}

impl Serializer {
    /// `tolerance` is the largest position difference (mm) treated as equal
    pub fn new(tolerance: f64) -> Self {
        Self {
            tolerance,
            position: Position::default(),
            lines: Vec::new(),
            line_ending: LineEnding::Lf,
            stats: SerializeStats::default(),
        }
    }

    /// Serialize a whole program
    pub fn serialize(mut self, program: &Program) -> Serialized {
        self.lines.reserve(program.line_count());
        self.line_ending = program.line_ending;

        for record in &program.preamble {
            self.write_record(record);
        }
        for layer in &program.layers {
            for block in &layer.blocks {
                match block {
                    Block::Record(record) => self.write_record(record),
                    Block::Segment(segment) => self.write_segment(segment),
                }
            }
        }

        let last = self.lines.len().saturating_sub(1);
        let mut text = String::with_capacity(self.lines.iter().map(|(l, _)| l.len() + 2).sum());
        for (i, (line, ending)) in self.lines.iter().enumerate() {
            text.push_str(line);
            if i < last || program.trailing_newline {
                text.push_str(ending.as_str());
            }
        }

        tracing::debug!(
            verbatim = self.stats.verbatim,
            rewritten = self.stats.rewritten,
            bridges = self.stats.bridges,
            resyncs = self.stats.resyncs,
            "serialized program"
        );

        Serialized {
            text,
            stats: self.stats,
        }
    }

    fn write_record(&mut self, record: &Record) {
        match &record.kind {
            RecordKind::Move(mv) => self.write_move(record, mv),
            RecordKind::SetPosition(words) => {
                self.position = self.position.with_words(words);
                self.push_verbatim(&record.raw, record.line_ending);
            }
            _ => self.push_verbatim(&record.raw, record.line_ending),
        }
    }

    /// Pass-through move, corrected for any drift of the tracked position
    fn write_move(&mut self, record: &Record, mv: &Move) {
        if mv.words.e.is_some() {
            self.sync_extruder(mv.from.e);
        }

        let stationary = !mv.motion.is_arc() && mv.planar_length() <= MIN_MOVE_LENGTH;
        if stationary {
            // Retractions, Z hops and feed changes: XYZ corrections wait for the next planar move.
            self.position = self.position.with_words(&mv.words);
            self.push_verbatim(&record.raw, record.line_ending);
            return;
        }

        let arc = mv.motion.is_arc();
        let x = (arc || mv.words.x.is_none()).then_some(mv.from.x);
        let y = (arc || mv.words.y.is_none()).then_some(mv.from.y);
        self.bridge_to(x, y, None);

        let z_drift = mv.words.z.is_none() && (mv.from.z - self.position.z).abs() > self.tolerance;
        if z_drift && !arc && mv.is_travel() {
            self.lines.push((
                rewrite_move_line(&record.raw, Some(mv.to.z), None),
                record.line_ending,
            ));
            self.stats.rewritten += 1;
        } else {
            if z_drift {
                self.bridge_to(None, None, Some(mv.from.z));
            }
            self.push_verbatim(&record.raw, record.line_ending);
        }
        self.position = mv.to;
    }

    fn write_segment(&mut self, segment: &Segment) {
        let start = segment.start();
        let start_z = segment.plan.as_ref().map_or(start.z, |p| p.start_z);
        self.bridge_to(Some(start.x), Some(start.y), Some(start_z));
        self.sync_extruder(start.e);

        for (i, step) in segment.moves.iter().enumerate() {
            let mv = &step.mv;
            let z = segment
                .plan
                .as_ref()
                .and_then(|p| p.moves.get(i))
                .map_or(mv.to.z, |p| p.z);
            let e = step.e_out.unwrap_or(mv.to.e);

            let rewrite_z = if mv.words.z.is_some() {
                (z - mv.to.z).abs() > self.tolerance
            } else {
                (z - self.position.z).abs() > self.tolerance
            };
            let rewrite_e = step.e_out.is_some();

            if rewrite_z || rewrite_e {
                let line = rewrite_move_line(
                    &step.raw,
                    rewrite_z.then_some(z),
                    rewrite_e.then_some(e),
                );
                self.lines.push((line, step.line_ending));
                self.stats.rewritten += 1;
            } else {
                self.push_verbatim(&step.raw, step.line_ending);
            }

            let machine_z = if rewrite_z {
                z
            } else if mv.words.z.is_some() {
                mv.to.z
            } else {
                self.position.z
            };
            self.position = Position::new(mv.to.x, mv.to.y, machine_z, e);
        }

        self.sync_extruder(segment.end().e);
    }

    /// Reset the extruder with `G92 E` when it is not at `expected`
    fn sync_extruder(&mut self, expected: f64) {
        if (self.position.e - expected).abs() <= 1e-9 {
            return;
        }
        self.lines.push((
            format!("G92 {}", format_word('E', expected, E_DECIMALS)),
            self.line_ending,
        ));
        self.position.e = expected;
        self.stats.resyncs += 1;
    }

    /// Emit a travel to the given axes if any differs from the tracked position
    fn bridge_to(&mut self, x: Option<f64>, y: Option<f64>, z: Option<f64>) {
        let tolerance = self.tolerance;
        let differs = |target: Option<f64>, current: f64| {
            target.filter(|t| (t - current).abs() > tolerance)
        };
        let x = differs(x, self.position.x);
        let y = differs(y, self.position.y);
        let z = differs(z, self.position.z);
        if x.is_none() && y.is_none() && z.is_none() {
            return;
        }

        let mut line = String::from("G1");
        let axes = [
            ('X', x, XY_DECIMALS),
            ('Y', y, XY_DECIMALS),
            ('Z', z, Z_DECIMALS),
        ];
        for (letter, value, decimals) in axes {
            if let Some(value) = value {
                line.push(' ');
                line.push_str(&format_word(letter, value, decimals));
                match letter {
                    'X' => self.position.x = value,
                    'Y' => self.position.y = value,
                    _ => self.position.z = value,
                }
            }
        }
        self.lines.push((line, self.line_ending));
        self.stats.bridges += 1;
    }

    fn push_verbatim(&mut self, raw: &str, line_ending: LineEnding) {
        self.lines.push((raw.to_string(), line_ending));
        self.stats.verbatim += 1;
    }
}

/// Serialize a program with the given position tolerance
pub fn serialize(program: &Program, tolerance: f64) -> Serialized {
    Serializer::new(tolerance).serialize(program)
}
