//! Synthetic slicer output shared by the integration tests

#![allow(dead_code)]

use layerweave_gcode::{classify_program, segment_layers, ChainClassifier, Program, Tokenizer};

/// Build a cylinder: `loops` concentric perimeters plus a few infill lines per layer
pub fn cylinder(layers: usize, layer_height: f64, loops: usize, markers: bool) -> String {
    const SIDES: usize = 24;
    let (cx, cy) = (50.0_f64, 50.0_f64);
    let mut e = 0.0_f64;
    let mut out = String::from("; generated by test fixture\nG90\nM82\nG28\nG92 E0\n");

    for layer in 0..layers {
        let z = layer_height * (layer + 1) as f64;
        if markers {
            out.push_str(";LAYER_CHANGE\n");
        }
        out.push_str(&format!("G1 Z{z:.3} F720\n"));

        for k in 0..loops {
            let r = 10.0 - 0.45 * k as f64;
            if markers {
                out.push_str(if k == 0 {
                    ";TYPE:External perimeter\n"
                } else {
                    ";TYPE:Perimeter\n"
                });
            }
            out.push_str(&format!("G1 X{:.3} Y{:.3} F9000\n", cx + r, cy));
            for step in 1..=SIDES {
                let angle = std::f64::consts::TAU * step as f64 / SIDES as f64;
                let (x, y) = if step == SIDES {
                    (cx + r, cy)
                } else {
                    (cx + r * angle.cos(), cy + r * angle.sin())
                };
                e += 0.05;
                out.push_str(&format!("G1 X{x:.3} Y{y:.3} E{e:.5}\n"));
            }
        }

        if markers {
            out.push_str(";TYPE:Solid infill\n");
        }
        for line in 0..3 {
            let y = cy - 4.0 + 4.0 * line as f64;
            out.push_str(&format!("G1 X{:.3} Y{y:.3} F9000\n", cx - 5.0));
            e += 0.3;
            out.push_str(&format!("G1 X{:.3} Y{y:.3} E{e:.5}\n", cx + 5.0));
        }
        out.push_str("M106 S255\n");
    }
    out.push_str("M104 S0 ; turn off hotend\nM84\n");
    out
}

/// Tokenize, segment and classify with default tolerances
pub fn classified(text: &str) -> Program {
    let mut program = segment_layers(Tokenizer::tokenize(text).unwrap(), 0.001).unwrap();
    classify_program(&mut program, &ChainClassifier::standard(0.05), 0.05);
    program
}
