//! G-code tokenizer with modal state tracking
//!
//! Turns text into [`Record`]s. Every line becomes exactly one record, so the
//! original text can always be reproduced from the record stream.

use layerweave_core::{Error, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

use crate::record::{
    AxisWords, FeatureType, LayerMarker, Motion, Move, Position, Record, RecordKind,
};

/// Line terminator of one line, or the dominant one of a stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LineEnding {
    #[default]
    Lf,
    CrLf,
}

impl LineEnding {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Lf => "\n",
            Self::CrLf => "\r\n",
        }
    }
}

/// Facts announced by slicer comments in the file header
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SlicerHeader {
    /// Value of `; layer_height = <h>`
    pub layer_height: Option<f64>,
    /// Value of `; total layer number: <n>`
    pub total_layers: Option<usize>,
    /// Text following `; generated by`
    pub generator: Option<String>,
}

/// Modal state relevant to positioning
///
/// Only absolute positioning and absolute extrusion are supported; the
/// relative modes are remembered so the first move that depends on them
/// can be rejected with the line that enabled them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModalState {
    /// G91 active
    pub relative_positioning: bool,
    /// M83 active
    pub relative_extrusion: bool,
}

/// Everything the tokenizer produced for one input text
#[derive(Debug, Clone, Default)]
pub struct TokenStream {
    pub records: Vec<Record>,
    pub header: SlicerHeader,
    pub line_ending: LineEnding,
    /// Whether the input ended with a line terminator
    pub trailing_newline: bool,
}

/// Stateful line tokenizer
#[derive(Debug, Clone, Default)]
pub struct Tokenizer {
    state: ModalState,
    position: Position,
    feature: Option<FeatureType>,
    header: SlicerHeader,
}

impl Tokenizer {
    /// Create a tokenizer starting at the machine origin in absolute mode
    pub fn new() -> Self {
        Self::default()
    }

    /// Tokenize a whole program
    ///
    /// Each record remembers its own terminator. The stream-level
    /// `line_ending` is the one most lines use; it applies to lines the
    /// serializer inserts and to a final line that had no terminator.
    pub fn tokenize(text: &str) -> Result<TokenStream> {
        let trailing_newline = text.ends_with('\n');
        let body = text.strip_suffix('\n').unwrap_or(text);
        let lines: Vec<&str> = if text.is_empty() {
            Vec::new()
        } else {
            body.split('\n').collect()
        };
        let terminated = if trailing_newline {
            lines.len()
        } else {
            lines.len().saturating_sub(1)
        };
        let crlf_lines = lines[..terminated]
            .iter()
            .filter(|line| line.ends_with('\r'))
            .count();
        let line_ending = if crlf_lines * 2 > terminated {
            LineEnding::CrLf
        } else {
            LineEnding::Lf
        };

        let mut tokenizer = Self::new();
        let mut records = Vec::with_capacity(lines.len());
        for (index, line) in lines.into_iter().enumerate() {
            let (line, ending) = match line.strip_suffix('\r') {
                Some(stripped) if index < terminated => (stripped, LineEnding::CrLf),
                _ if index < terminated => (line, LineEnding::Lf),
                _ => (line, line_ending),
            };
            let record = tokenizer.tokenize_line(index + 1, line)?;
            records.push(record.with_line_ending(ending));
        }

        tracing::debug!(
            records = records.len(),
            crlf_lines,
            "tokenized input"
        );

        Ok(TokenStream {
            records,
            header: tokenizer.header,
            line_ending,
            trailing_newline,
        })
    }

    /// Tokenize a single line (without its terminator)
    pub fn tokenize_line(&mut self, line_number: usize, raw: &str) -> Result<Record> {
        let trimmed = raw.trim();

        if trimmed.starts_with(';') {
            let kind = self.parse_comment(trimmed);
            return Ok(Record::new(line_number, raw, kind));
        }

        let code = match trimmed.find(';') {
            Some(pos) => &trimmed[..pos],
            None => trimmed,
        };
        let mut tokens = code.split_whitespace();
        let Some(command) = tokens.next() else {
            return Ok(Record::new(line_number, raw, RecordKind::Other));
        };

        let kind = match parse_command_word(command) {
            Some(('G', n @ 0..=3)) => {
                let words = parse_words(line_number, raw, tokens)?;
                RecordKind::Move(self.apply_move(line_number, n, words)?)
            }
            Some(('G', 92)) => {
                let words = parse_words(line_number, raw, tokens)?;
                self.position = self.position.with_words(&words);
                RecordKind::SetPosition(words)
            }
            Some(('G', 90)) => {
                self.state.relative_positioning = false;
                RecordKind::Other
            }
            Some(('G', 91)) => {
                self.state.relative_positioning = true;
                RecordKind::Other
            }
            Some(('M', 82)) => {
                self.state.relative_extrusion = false;
                RecordKind::Other
            }
            Some(('M', 83)) => {
                self.state.relative_extrusion = true;
                RecordKind::Other
            }
            _ => RecordKind::Other,
        };

        Ok(Record::new(line_number, raw, kind))
    }

    /// Current modal state
    pub fn state(&self) -> ModalState {
        self.state
    }

    /// Position after the last tokenized line
    pub fn position(&self) -> Position {
        self.position
    }

    fn apply_move(&mut self, line_number: usize, code: u32, words: AxisWords) -> Result<Move> {
        if self.state.relative_positioning && words.has_positional() {
            return Err(Error::ModeUnsupported {
                line_number,
                mode: "G91".to_string(),
            });
        }
        if self.state.relative_extrusion && words.e.is_some() {
            return Err(Error::ModeUnsupported {
                line_number,
                mode: "M83".to_string(),
            });
        }

        let motion = match code {
            0 => Motion::Rapid,
            1 => Motion::Linear,
            2 => Motion::ArcClockwise,
            _ => Motion::ArcCounterClockwise,
        };
        let from = self.position;
        let to = from.with_words(&words);
        self.position = to;

        Ok(Move {
            motion,
            words,
            from,
            to,
            feature: self.feature.clone(),
        })
    }

    fn parse_comment(&mut self, comment: &str) -> RecordKind {
        if let Some(marker) = parse_layer_marker(comment) {
            return RecordKind::LayerChange(marker);
        }
        if let Some(feature) = parse_type_marker(comment) {
            self.feature = Some(feature.clone());
            return RecordKind::TypeMarker(feature);
        }
        self.capture_header(comment);
        RecordKind::Other
    }

    fn capture_header(&mut self, comment: &str) {
        static LAYER_HEIGHT: OnceLock<Regex> = OnceLock::new();
        static TOTAL_LAYERS: OnceLock<Regex> = OnceLock::new();
        static GENERATOR: OnceLock<Regex> = OnceLock::new();

        let layer_height = LAYER_HEIGHT.get_or_init(|| {
            Regex::new(r"^;\s*layer_height\s*=\s*([0-9]*\.?[0-9]+)\s*$")
                .expect("invalid regex pattern")
        });
        let total_layers = TOTAL_LAYERS.get_or_init(|| {
            Regex::new(r"(?i)^;\s*total layer number:\s*(\d+)").expect("invalid regex pattern")
        });
        let generator = GENERATOR.get_or_init(|| {
            Regex::new(r"(?i)^;\s*generated by\s+(.+)$").expect("invalid regex pattern")
        });

        if self.header.layer_height.is_none() {
            if let Some(caps) = layer_height.captures(comment) {
                self.header.layer_height = caps[1].parse().ok().filter(|h: &f64| *h > 0.0);
            }
        }
        if self.header.total_layers.is_none() {
            if let Some(caps) = total_layers.captures(comment) {
                self.header.total_layers = caps[1].parse().ok();
            }
        }
        if self.header.generator.is_none() {
            if let Some(caps) = generator.captures(comment) {
                self.header.generator = Some(caps[1].trim().to_string());
            }
        }
    }
}

/// Split a command word like `G1` or `G01` into letter and number
fn parse_command_word(word: &str) -> Option<(char, u32)> {
    let mut chars = word.chars();
    let letter = chars.next()?.to_ascii_uppercase();
    let number = chars.as_str().parse::<u32>().ok()?;
    Some((letter, number))
}

/// Parse the X/Y/Z/E/F words of a line; other words are ignored
fn parse_words<'a>(
    line_number: usize,
    raw: &str,
    tokens: impl Iterator<Item = &'a str>,
) -> Result<AxisWords> {
    let mut words = AxisWords::default();
    for token in tokens {
        let mut chars = token.chars();
        let Some(letter) = chars.next().map(|c| c.to_ascii_uppercase()) else {
            continue;
        };
        let slot = match letter {
            'X' => &mut words.x,
            'Y' => &mut words.y,
            'Z' => &mut words.z,
            'E' => &mut words.e,
            'F' => &mut words.f,
            _ => continue,
        };
        let text = chars.as_str();
        let value = text
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .ok_or_else(|| {
                Error::malformed(
                    line_number,
                    raw,
                    format!("invalid {} value '{}'", letter, text),
                )
            })?;
        *slot = Some(value);
    }
    Ok(words)
}

fn parse_layer_marker(comment: &str) -> Option<LayerMarker> {
    static LAYER_NUMBER: OnceLock<Regex> = OnceLock::new();
    let layer_number = LAYER_NUMBER
        .get_or_init(|| Regex::new(r"^;\s*LAYER:\s*(-?\d+)\s*$").expect("invalid regex pattern"));

    if comment.starts_with(";LAYER_CHANGE") || comment.starts_with("; CHANGE_LAYER") {
        return Some(LayerMarker { number: None });
    }
    layer_number.captures(comment).map(|caps| LayerMarker {
        number: caps[1].parse().ok(),
    })
}

fn parse_type_marker(comment: &str) -> Option<FeatureType> {
    [";TYPE:", "; FEATURE:"]
        .iter()
        .find_map(|prefix| comment.strip_prefix(prefix))
        .map(FeatureType::from_name)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(text: &str) -> Vec<RecordKind> {
        Tokenizer::tokenize(text)
            .unwrap()
            .records
            .into_iter()
            .map(|r| r.kind)
            .collect()
    }

    #[test]
    fn test_every_line_becomes_a_record() {
        let stream = Tokenizer::tokenize("G28\n\n; hello\nM104 S200\n").unwrap();
        assert_eq!(stream.records.len(), 4);
        assert_eq!(stream.records[1].raw, "");
        assert_eq!(stream.records[3].line_number, 4);
        assert!(stream.trailing_newline);
        assert_eq!(stream.line_ending, LineEnding::Lf);
    }

    #[test]
    fn test_crlf_and_missing_final_newline() {
        let stream = Tokenizer::tokenize("G28\r\nG1 X1 Y1").unwrap();
        assert_eq!(stream.line_ending, LineEnding::CrLf);
        assert!(!stream.trailing_newline);
        assert_eq!(stream.records[0].raw, "G28");
        assert_eq!(stream.records[1].raw, "G1 X1 Y1");
        assert_eq!(stream.records[1].line_ending, LineEnding::CrLf);
    }

    #[test]
    fn test_mixed_line_endings_kept_per_record() {
        let stream = Tokenizer::tokenize("G28\r\nG90\nM82\nG1 X1 Y1\r\n").unwrap();
        let endings: Vec<LineEnding> = stream.records.iter().map(|r| r.line_ending).collect();
        assert_eq!(
            endings,
            vec![
                LineEnding::CrLf,
                LineEnding::Lf,
                LineEnding::Lf,
                LineEnding::CrLf
            ]
        );
        assert_eq!(stream.line_ending, LineEnding::Lf);
        assert!(stream.records.iter().all(|r| !r.raw.ends_with('\r')));
    }

    #[test]
    fn test_move_positions_carry_over() {
        let stream = Tokenizer::tokenize("G1 Z0.2\nG1 X10 Y5 E1.5\nG1 X12").unwrap();
        let mv = stream.records[2].as_move().unwrap();
        assert_eq!(mv.from, Position::new(10.0, 5.0, 0.2, 1.5));
        assert_eq!(mv.to, Position::new(12.0, 5.0, 0.2, 1.5));
        assert_eq!(mv.words.x, Some(12.0));
        assert_eq!(mv.words.y, None);
    }

    #[test]
    fn test_leading_zero_command_words() {
        let stream = Tokenizer::tokenize("G01 X1 Y2 E0.1").unwrap();
        assert_eq!(stream.records[0].as_move().unwrap().motion, Motion::Linear);
    }

    #[test]
    fn test_markers() {
        let kinds = kinds(";LAYER_CHANGE\n;LAYER:3\n;TYPE:External perimeter\n; FEATURE: Inner wall\n");
        assert_eq!(kinds[0], RecordKind::LayerChange(LayerMarker { number: None }));
        assert_eq!(kinds[1], RecordKind::LayerChange(LayerMarker { number: Some(3) }));
        assert_eq!(kinds[2], RecordKind::TypeMarker(FeatureType::ExternalPerimeter));
        assert_eq!(kinds[3], RecordKind::TypeMarker(FeatureType::Perimeter));
    }

    #[test]
    fn test_moves_remember_active_feature() {
        let stream = Tokenizer::tokenize(";TYPE:Perimeter\nG1 X1 Y1 E1").unwrap();
        assert_eq!(
            stream.records[1].as_move().unwrap().feature,
            Some(FeatureType::Perimeter)
        );
    }

    #[test]
    fn test_header_capture() {
        let stream = Tokenizer::tokenize(
            "; generated by PrusaSlicer 2.7.1\n; layer_height = 0.15\n; total layer number: 42\n",
        )
        .unwrap();
        assert_eq!(stream.header.layer_height, Some(0.15));
        assert_eq!(stream.header.total_layers, Some(42));
        assert_eq!(stream.header.generator.as_deref(), Some("PrusaSlicer 2.7.1"));
    }

    #[test]
    fn test_first_layer_height_comment_is_not_layer_height() {
        let stream = Tokenizer::tokenize("; first_layer_height = 0.3\n").unwrap();
        assert_eq!(stream.header.layer_height, None);
    }

    #[test]
    fn test_malformed_numeric_word() {
        let err = Tokenizer::tokenize("G28\nG1 Xabc Y2").unwrap_err();
        match err {
            Error::MalformedRecord {
                line_number, line, ..
            } => {
                assert_eq!(line_number, 2);
                assert_eq!(line, "G1 Xabc Y2");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_non_finite_values_rejected() {
        assert!(Tokenizer::tokenize("G1 Xnan Y1").is_err());
        assert!(Tokenizer::tokenize("G1 Einf").is_err());
    }

    #[test]
    fn test_unknown_words_pass_through() {
        let stream = Tokenizer::tokenize("M900 K0.05 ; linear advance\nT0\nG29 P1").unwrap();
        assert!(stream.records.iter().all(|r| r.kind == RecordKind::Other));
    }

    #[test]
    fn test_relative_positioning_rejected_on_move() {
        let err = Tokenizer::tokenize("G91\nG1 Z1").unwrap_err();
        assert!(matches!(
            err,
            Error::ModeUnsupported { line_number: 2, ref mode } if mode == "G91"
        ));
    }

    #[test]
    fn test_relative_extrusion_rejected_on_extruding_move() {
        let err = Tokenizer::tokenize("M83\nG1 X5 Y5\nG1 X6 E0.1").unwrap_err();
        assert!(matches!(
            err,
            Error::ModeUnsupported { line_number: 3, ref mode } if mode == "M83"
        ));
    }

    #[test]
    fn test_relative_mode_cleared() {
        let stream = Tokenizer::tokenize("G91\nG90\nM83\nM82\nG1 X1 Y1 E1").unwrap();
        assert_eq!(stream.records.len(), 5);
    }

    #[test]
    fn test_set_position() {
        let stream = Tokenizer::tokenize("G1 X1 Y1 E5\nG92 E0\nG1 X2 E0.5").unwrap();
        assert!(matches!(stream.records[1].kind, RecordKind::SetPosition(_)));
        let mv = stream.records[2].as_move().unwrap();
        assert_eq!(mv.from.e, 0.0);
        assert!((mv.extrusion() - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_empty_input() {
        let stream = Tokenizer::tokenize("").unwrap();
        assert!(stream.records.is_empty());
        assert!(!stream.trailing_newline);
    }
}
