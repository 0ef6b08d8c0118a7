//! Pipeline Benchmarks
//!
//! Throughput of the deformation engine on a synthetic print.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use layerweave_deform::DeformEngine;
use layerweave_gcode::Tokenizer;
use layerweave_settings::DeformConfig;

/// 100 layers of three 64-sided loops plus a few infill lines
fn tower() -> String {
    let mut e = 0.0_f64;
    let mut out = String::from("G90\nM82\nG92 E0\n");
    for layer in 0..100 {
        out.push_str(&format!(";LAYER_CHANGE\nG1 Z{:.3}\n", 0.2 * (layer + 1) as f64));
        for k in 0..3 {
            let r = 20.0 - 0.45 * k as f64;
            out.push_str(if k == 0 { ";TYPE:External perimeter\n" } else { ";TYPE:Perimeter\n" });
            out.push_str(&format!("G1 X{:.3} Y100 F9000\n", 100.0 + r));
            for step in 1..=64 {
                let angle = std::f64::consts::TAU * step as f64 / 64.0;
                e += 0.04;
                out.push_str(&format!(
                    "G1 X{:.3} Y{:.3} E{e:.5}\n",
                    100.0 + r * angle.cos(),
                    100.0 + r * angle.sin()
                ));
            }
        }
        out.push_str(";TYPE:Solid infill\n");
        for line in 0..10 {
            let y = 90.0 + 2.0 * line as f64;
            e += 0.5;
            out.push_str(&format!("G1 X90 Y{y:.1}\nG1 X110 Y{y:.1} E{e:.5}\n"));
        }
    }
    out
}

fn benchmark_tokenize(c: &mut Criterion) {
    let text = tower();
    c.bench_function("tokenize_100_layers", |b| {
        b.iter(|| Tokenizer::tokenize(black_box(&text)).unwrap())
    });
}

fn benchmark_brick(c: &mut Criterion) {
    let text = tower();
    let engine = DeformEngine::new(DeformConfig::brick(0.2)).unwrap();
    c.bench_function("brick_100_layers", |b| {
        b.iter(|| engine.process(black_box(&text)).unwrap())
    });
}

fn benchmark_non_planar(c: &mut Criterion) {
    let text = tower();
    let engine = DeformEngine::new(DeformConfig::non_planar()).unwrap();
    c.bench_function("non_planar_100_layers", |b| {
        b.iter(|| engine.process(black_box(&text)).unwrap())
    });
}

criterion_group!(benches, benchmark_tokenize, benchmark_brick, benchmark_non_planar);
criterion_main!(benches);
