//! Layer segmentation
//!
//! Layer boundaries come from slicer markers when the file has any.
//! Otherwise a layer starts at the last Z-changing travel before the first
//! extrusion that sits higher than the current layer.

use layerweave_core::{Error, Result};

use crate::program::{Layer, Program};
use crate::record::Record;
use crate::tokenizer::TokenStream;

/// Split a token stream into a preamble and layers
///
/// `layer_epsilon` is the Z rise (mm) an extrusion must exceed to open a new
/// layer when no markers are present.
pub fn segment_layers(stream: TokenStream, layer_epsilon: f64) -> Result<Program> {
    let TokenStream {
        records,
        header,
        line_ending,
        trailing_newline,
    } = stream;

    let use_markers = records.iter().any(Record::is_layer_change);
    let boundaries = if use_markers {
        marker_boundaries(&records)
    } else {
        geometric_boundaries(&records, layer_epsilon)
    };

    if boundaries.is_empty() {
        return Err(Error::NoLayersFound);
    }

    let mut records = records;
    let mut layers = Vec::with_capacity(boundaries.len());
    // Split from the back so each tail can be moved out without copying.
    for (index, start) in boundaries.iter().enumerate().rev() {
        let tail = records.split_off(*start);
        layers.push((index, tail));
    }
    layers.reverse();
    let preamble = records;

    let mut last_z = preamble
        .iter()
        .rev()
        .find_map(|r| r.as_move().map(|m| m.to.z))
        .unwrap_or_default();
    let layers: Vec<Layer> = layers
        .into_iter()
        .map(|(index, records)| {
            let z = records
                .iter()
                .find_map(|r| r.as_move().filter(|m| m.is_extrusion()).map(|m| m.from.z))
                .unwrap_or(last_z);
            if let Some(mv) = records.iter().rev().find_map(Record::as_move) {
                last_z = mv.to.z;
            }
            Layer::new(index, z, records)
        })
        .collect();

    tracing::debug!(
        layers = layers.len(),
        preamble = preamble.len(),
        markers = use_markers,
        "segmented layers"
    );
    if let Some(expected) = header.total_layers {
        if expected != layers.len() {
            tracing::warn!(
                expected,
                found = layers.len(),
                "layer count differs from slicer header"
            );
        }
    }

    Ok(Program {
        preamble,
        layers,
        header,
        line_ending,
        trailing_newline,
    })
}

/// Marker positions, merging markers with no extrusion between them
fn marker_boundaries(records: &[Record]) -> Vec<usize> {
    let mut boundaries = Vec::new();
    let mut extruded_since_boundary = true;
    for (i, record) in records.iter().enumerate() {
        if record.is_layer_change() {
            if extruded_since_boundary {
                boundaries.push(i);
                extruded_since_boundary = false;
            }
        } else if record.is_extrusion() {
            extruded_since_boundary = true;
        }
    }
    boundaries
}

fn geometric_boundaries(records: &[Record], layer_epsilon: f64) -> Vec<usize> {
    let mut boundaries = Vec::new();
    let mut layer_z: Option<f64> = None;
    let mut pending: Option<usize> = None;

    for (i, record) in records.iter().enumerate() {
        let Some(mv) = record.as_move() else {
            continue;
        };
        if mv.is_extrusion() {
            let z = mv.from.z;
            let rises = layer_z.map_or(true, |current| z > current + layer_epsilon);
            if rises {
                boundaries.push(pending.unwrap_or(i));
                layer_z = Some(z);
            }
            pending = None;
        } else if (mv.to.z - mv.from.z).abs() > layer_epsilon {
            pending = Some(i);
        }
    }
    boundaries
}
