//! # layerweave G-code
//!
//! Parsing and re-serialization of slicer G-code.
//! Includes the tokenizer, layer segmenter, path classifiers and serializer.

pub mod classify;
pub mod layers;
pub mod program;
pub mod record;
pub mod serializer;
pub mod tokenizer;

pub use classify::{
    classify_layer, classify_program, continuation_chains, ChainClassifier, GeometricClassifier,
    MarkerClassifier, RoleClassifier,
};
pub use layers::segment_layers;
pub use program::{Block, Layer, MovePlan, Program, Segment, SegmentMove, SegmentPlan, SegmentRole};
pub use record::{
    format_word, rewrite_move_line, AxisWords, FeatureType, LayerMarker, Motion, Move, Position,
    Record, RecordKind,
};
pub use serializer::{serialize, SerializeStats, Serialized, Serializer};
pub use tokenizer::{LineEnding, ModalState, SlicerHeader, TokenStream, Tokenizer};
