//! End-to-end engine behaviour on synthetic prints

mod common;

use approx::assert_relative_eq;
use common::{classified, cylinder};
use layerweave_core::{Error, WaveDirection};
use layerweave_deform::{DeformEngine, DeformationPlanner};
use layerweave_gcode::{SegmentRole, Tokenizer};
use layerweave_settings::{DeformConfig, Normalization, WaveSettings};
use std::collections::HashMap;
use std::f64::consts::{PI, TAU};

fn run(config: DeformConfig, text: &str) -> String {
    DeformEngine::new(config).unwrap().process(text).unwrap().text
}

/// (layer index, role) of every source extrusion move paired with its Z in the output
///
/// Output extrusion moves correspond one-to-one with source extrusion moves
/// as long as nothing is reordered or subdivided.
fn extrusion_heights(source: &str, output: &str) -> Vec<(usize, SegmentRole, f64)> {
    let program = classified(source);
    let labels = program.layers.iter().flat_map(|layer| {
        layer
            .segments()
            .flat_map(move |segment| segment.moves.iter().map(move |_| (layer.index, segment.role)))
    });
    let heights: Vec<f64> = Tokenizer::tokenize(output)
        .unwrap()
        .records
        .iter()
        .filter_map(|r| r.as_move().filter(|m| m.is_extrusion()).map(|m| m.to.z))
        .collect();
    assert_eq!(heights.len(), program.layers.iter().flat_map(|l| l.segments()).map(|s| s.moves.len()).sum::<usize>());
    labels
        .zip(heights)
        .map(|((layer, role), z)| (layer, role, z))
        .collect()
}

#[test]
fn test_disabled_mode_is_byte_identical() {
    for markers in [true, false] {
        let text = cylinder(4, 0.2, 3, markers);
        assert_eq!(run(DeformConfig::default(), &text), text);
    }
}

#[test]
fn test_disabled_mode_keeps_crlf() {
    let text = cylinder(2, 0.2, 1, true).replace('\n', "\r\n");
    assert_eq!(run(DeformConfig::default(), &text), text);
}

#[test]
fn test_brick_cylinder_raises_odd_layer_walls() {
    let text = cylinder(3, 0.2, 2, true);
    let output = run(DeformConfig::brick(0.2), &text);

    for (layer, role, z) in extrusion_heights(&text, &output) {
        let base = 0.2 * (layer + 1) as f64;
        let expected = match (layer, role) {
            (1, SegmentRole::Wall | SegmentRole::Infill) => base + 0.1,
            _ => base,
        };
        assert_relative_eq!(z, expected, epsilon = 1e-9);
    }
}

#[test]
fn test_brick_geometric_classification_without_markers() {
    let text = cylinder(3, 0.2, 2, false);
    let config = DeformConfig {
        include_infill: false,
        ..DeformConfig::brick(0.2)
    };
    let output = run(config, &text);

    for (layer, role, z) in extrusion_heights(&text, &output) {
        let base = 0.2 * (layer + 1) as f64;
        let expected = if layer == 1 && role == SegmentRole::Wall {
            base + 0.1
        } else {
            base
        };
        assert_relative_eq!(z, expected, epsilon = 1e-9);
    }
}

#[test]
fn test_brick_multiplier_resyncs_extruder() {
    let text = cylinder(3, 0.2, 2, true);
    let config = DeformConfig {
        extrusion_multiplier: 1.1,
        ..DeformConfig::brick(0.2)
    };
    let output = DeformEngine::new(config).unwrap().process(&text).unwrap();

    assert!(output.report.serialize.resyncs > 0);
    // Every line after the final resync is untouched source text.
    let tail: Vec<&str> = text.lines().rev().take(3).collect();
    let out_tail: Vec<&str> = output.text.lines().rev().take(3).collect();
    assert_eq!(tail, out_tail);
}

#[test]
fn test_non_planar_infill_gating() {
    let text = cylinder(6, 0.2, 2, true);
    let config = DeformConfig {
        include_infill: false,
        max_step_size: 0.5,
        ..DeformConfig::non_planar()
    };
    let output = run(config, &text);

    // Source Z of every extrusion line outside the wall loops
    let program = classified(&text);
    let flat: HashMap<&str, f64> = program
        .layers
        .iter()
        .flat_map(|l| l.segments())
        .filter(|s| s.role != SegmentRole::Wall)
        .flat_map(|s| s.moves.iter().map(|m| (m.raw.as_str(), m.mv.to.z)))
        .collect();

    let mut seen = 0;
    let mut walls_moved = false;
    for record in Tokenizer::tokenize(&output).unwrap().records {
        let Some(mv) = record.as_move().filter(|m| m.is_extrusion()) else {
            continue;
        };
        match flat.get(record.raw.as_str()) {
            Some(z) => {
                assert_relative_eq!(mv.to.z, *z, epsilon = 1e-9);
                seen += 1;
            }
            None => walls_moved |= mv.words.z.is_some(),
        }
    }
    assert_eq!(seen, flat.len());
    assert!(walls_moved);
}

#[test]
fn test_non_planar_infill_wave_is_periodic_along_x() {
    let period = 1.0 / 1.1;
    let points = [
        (1.0, 0.0),
        (1.0, 10.0),
        (1.0 + period, 10.0),
        (1.0 + 2.0 * period, 0.0),
        (2.5, 5.0),
    ];
    let mut text = String::from(";LAYER_CHANGE\nG1 Z0.2\nG1 X5 Y5 E1\n;LAYER_CHANGE\nG1 Z0.4\n;TYPE:Solid infill\nG1 X0 Y0\n");
    let mut e = 1.0;
    for (x, y) in points {
        e += 0.1;
        text.push_str(&format!("G1 X{x:.9} Y{y:.9} E{e:.5}\n"));
    }

    let config = DeformConfig {
        normalization: Normalization::None,
        max_step_size: 1.0,
        infill: WaveSettings::new(0.6, 1.1, WaveDirection::X),
        ..DeformConfig::non_planar()
    };
    let mut program = classified(&text);
    DeformationPlanner::new(&config).plan(&mut program);

    let segment = program.layers[1].segments().next().unwrap();
    assert_eq!(segment.role, SegmentRole::Infill);
    let plan = segment.plan.as_ref().unwrap();
    // offsets at the source points; subdivided pieces lie in between
    let offsets: Vec<f64> = points
        .iter()
        .map(|&(x, y)| {
            let i = segment
                .moves
                .iter()
                .position(|m| (m.mv.to.x - x).abs() < 1e-9 && (m.mv.to.y - y).abs() < 1e-9)
                .unwrap();
            plan.moves[i].offset
        })
        .collect();

    assert_relative_eq!(offsets[0], 0.6 * (TAU * 1.1).sin(), epsilon = 1e-9);
    assert_relative_eq!(offsets[0], offsets[1], epsilon = 1e-9);
    assert_relative_eq!(offsets[0], offsets[2], epsilon = 1e-6);
    assert_relative_eq!(offsets[0], offsets[3], epsilon = 1e-6);
    assert!((offsets[0] - offsets[4]).abs() > 0.1);
}

#[test]
fn test_alternate_loops_interlock_concentric_walls() {
    let text = cylinder(2, 0.2, 3, true);
    let config = DeformConfig {
        normalization: Normalization::None,
        max_step_size: 1.0,
        alternate_loops: true,
        wall: WaveSettings::new(0.4, 1.1, WaveDirection::X),
        ..DeformConfig::non_planar()
    };
    let mut program = classified(&text);
    DeformationPlanner::new(&config).plan(&mut program);

    let walls: Vec<_> = program.layers[1]
        .segments()
        .filter(|s| s.role == SegmentRole::Wall)
        .collect();
    assert_eq!(walls.len(), 2);
    for (loop_index, wall) in walls.iter().enumerate() {
        let plan = wall.plan.as_ref().unwrap();
        let shift = if loop_index % 2 == 1 { PI } else { 0.0 };
        for (m, p) in wall.moves.iter().zip(&plan.moves) {
            let expected = 0.4 * (TAU * 1.1 * m.mv.to.x + shift).sin();
            assert_relative_eq!(p.offset, expected, epsilon = 1e-9);
        }
    }
}

#[test]
fn test_malformed_line_aborts_with_line_number() {
    let text = cylinder(2, 0.2, 1, true);
    let broken_line = text.lines().position(|l| l.starts_with("G1 X") && l.contains('E')).unwrap();
    let broken: Vec<String> = text
        .lines()
        .enumerate()
        .map(|(i, l)| if i == broken_line { "G1 Xfoo Y50 E0.1".to_string() } else { l.to_string() })
        .collect();

    let engine = DeformEngine::new(DeformConfig::brick(0.2)).unwrap();
    match engine.process(&broken.join("\n")) {
        Err(Error::MalformedRecord { line_number, .. }) => assert_eq!(line_number, broken_line + 1),
        other => panic!("expected malformed record, got {:?}", other.map(|o| o.report)),
    }
}

#[test]
fn test_relative_positioning_rejected() {
    let text = cylinder(2, 0.2, 1, true).replace("G90\n", "G91\n");
    let engine = DeformEngine::new(DeformConfig::brick(0.2)).unwrap();
    assert!(matches!(
        engine.process(&text),
        Err(Error::ModeUnsupported { .. })
    ));
}

#[test]
fn test_wall_reorder_keeps_every_line() {
    let text = cylinder(3, 0.2, 3, true);
    let config = DeformConfig {
        wall_reorder: true,
        ..DeformConfig::default()
    };
    let output = DeformEngine::new(config).unwrap().process(&text).unwrap();

    let source: std::collections::HashSet<&str> = text.lines().collect();
    let lines: Vec<&str> = output.text.lines().collect();
    let inserted = lines.iter().filter(|l| !source.contains(*l)).count();
    let stats = output.report.serialize;
    assert_eq!(inserted, stats.bridges + stats.resyncs);
    assert_eq!(lines.len(), text.lines().count() + inserted);

    let mut expected: Vec<&str> = text.lines().collect();
    let mut kept: Vec<&str> = lines.into_iter().filter(|l| source.contains(*l)).collect();
    expected.sort_unstable();
    kept.sort_unstable();
    assert_eq!(expected, kept);
    assert!(output
        .report
        .stages
        .iter()
        .any(|s| s.stage == "reorder" && s.changed > 0));
}

/// Extruder advance of every output move that travels in XY
fn planar_extrusions(output: &str) -> Vec<f64> {
    Tokenizer::tokenize(output)
        .unwrap()
        .records
        .iter()
        .filter_map(|r| r.as_move())
        .filter(|m| m.planar_length() > 1e-9)
        .map(|m| m.extrusion())
        .collect()
}

#[test]
fn test_reordered_walls_extrude_the_source_filament() {
    let text = cylinder(3, 0.2, 3, true);
    let config = DeformConfig {
        wall_reorder: true,
        ..DeformConfig::default()
    };
    let output = run(config, &text);

    let source: f64 = planar_extrusions(&text).iter().sum();
    let deltas = planar_extrusions(&output);
    assert!(deltas.iter().all(|d| *d >= -1e-9));
    assert_relative_eq!(deltas.iter().sum::<f64>(), source, epsilon = 1e-6);
}

#[test]
fn test_reordered_deformed_walls_never_extrude_backwards() {
    let text = cylinder(4, 0.2, 3, true);
    for mode in [DeformConfig::brick(0.2), DeformConfig::non_planar()] {
        let config = DeformConfig {
            wall_reorder: true,
            extrusion_multiplier: 1.05,
            max_step_size: 0.5,
            ..mode
        };
        let output = run(config, &text);
        assert!(planar_extrusions(&output).iter().all(|d| *d >= -1e-9));
    }
}
