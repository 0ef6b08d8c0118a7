//! Extrusion rescaling
//!
//! A deformed move travels a different 3D distance than the slicer planned
//! for, so its filament advance is scaled by the length ratio (and the user
//! multiplier) to keep deposited volume per millimetre constant. E values are
//! absolute, so each rescaled delta is accumulated from the segment's start.

use layerweave_gcode::{Program, Segment};
use serde::{Deserialize, Serialize};

/// Counters reported by the rescaler
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RescaleStats {
    /// Moves whose E delta was scaled
    pub rescaled_moves: usize,
    /// Source filament in rescaled segments
    pub source_extrusion: f64,
    /// Filament after rescaling in the same segments
    pub output_extrusion: f64,
}

/// Rescales E values of planned segments
#[derive(Debug, Clone, Copy)]
pub struct ExtrusionRescaler {
    multiplier: f64,
    epsilon: f64,
}

impl ExtrusionRescaler {
    /// `epsilon` decides when an offset or length ratio counts as a deformation
    pub fn new(multiplier: f64, epsilon: f64) -> Self {
        Self {
            multiplier,
            epsilon,
        }
    }

    pub fn rescale(&self, program: &mut Program) -> RescaleStats {
        let mut stats = RescaleStats::default();
        for layer in &mut program.layers {
            for segment in layer.segments_mut() {
                self.rescale_segment(segment, &mut stats);
            }
        }
        tracing::info!(
            moves = stats.rescaled_moves,
            source = stats.source_extrusion,
            output = stats.output_extrusion,
            "rescaled extrusion"
        );
        stats
    }

    /// Rescale one segment; segments without a plan keep their source E values
    pub fn rescale_segment(&self, segment: &mut Segment, stats: &mut RescaleStats) {
        let Some(plan) = segment.plan.as_ref() else {
            for step in &mut segment.moves {
                step.e_out = None;
            }
            return;
        };

        let mut e = segment.start().e;
        let mut touched = false;
        for (step, move_plan) in segment.moves.iter_mut().zip(&plan.moves) {
            let delta = step.mv.extrusion();
            let scaled = if move_plan.is_deformed(self.epsilon) {
                stats.rescaled_moves += 1;
                touched = true;
                delta * move_plan.length_ratio * self.multiplier * plan.extrusion_factor
            } else {
                delta
            };
            e += scaled;
            step.e_out = ((e - step.mv.to.e).abs() > 1e-12).then_some(e);
        }

        if touched {
            stats.source_extrusion += segment.extrusion();
            stats.output_extrusion += e - segment.start().e;
        }
        tracing::trace!(line = segment.first_line(), touched, "rescaled segment");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use layerweave_gcode::{
        AxisWords, LineEnding, Motion, Move, MovePlan, Position, SegmentMove, SegmentPlan,
    };

    fn segment(es: &[f64]) -> Segment {
        let moves = es
            .windows(2)
            .enumerate()
            .map(|(i, w)| SegmentMove {
                line_number: i + 1,
                raw: format!("G1 X{} Y0 E{}", i + 1, w[1]),
                mv: Move {
                    motion: Motion::Linear,
                    words: AxisWords::default(),
                    from: Position::new(i as f64, 0.0, 0.4, w[0]),
                    to: Position::new((i + 1) as f64, 0.0, 0.4, w[1]),
                    feature: None,
                },
                e_out: None,
                line_ending: LineEnding::Lf,
            })
            .collect();
        Segment::new(moves)
    }

    fn plan(moves: Vec<MovePlan>, extrusion_factor: f64) -> SegmentPlan {
        SegmentPlan {
            start_z: 0.5,
            moves,
            extrusion_factor,
        }
    }

    #[test]
    fn test_brick_shift_applies_multiplier() {
        let mut seg = segment(&[1.0, 1.5, 2.0]);
        seg.plan = Some(plan(
            vec![
                MovePlan {
                    z: 0.5,
                    offset: 0.1,
                    length_ratio: 1.0,
                };
                2
            ],
            1.0,
        ));
        let mut stats = RescaleStats::default();
        ExtrusionRescaler::new(1.2, 1e-9).rescale_segment(&mut seg, &mut stats);

        assert_relative_eq!(seg.moves[0].e_out.unwrap(), 1.6, epsilon = 1e-12);
        assert_relative_eq!(seg.moves[1].e_out.unwrap(), 2.2, epsilon = 1e-12);
        assert_eq!(stats.rescaled_moves, 2);
        assert_relative_eq!(stats.output_extrusion, 1.2, epsilon = 1e-12);
    }

    #[test]
    fn test_untouched_moves_keep_delta() {
        let mut seg = segment(&[0.0, 1.0, 2.0]);
        seg.plan = Some(plan(
            vec![
                MovePlan {
                    z: 0.6,
                    offset: 0.2,
                    length_ratio: 1.5,
                },
                MovePlan::identity(0.4),
            ],
            1.0,
        ));
        let mut stats = RescaleStats::default();
        ExtrusionRescaler::new(1.0, 1e-9).rescale_segment(&mut seg, &mut stats);

        // first delta scaled to 1.5, second delta stays 1.0 on top of it
        assert_relative_eq!(seg.moves[0].e_out.unwrap(), 1.5, epsilon = 1e-12);
        assert_relative_eq!(seg.moves[1].e_out.unwrap(), 2.5, epsilon = 1e-12);
        assert_eq!(stats.rescaled_moves, 1);
    }

    #[test]
    fn test_identity_plan_leaves_e_alone() {
        let mut seg = segment(&[0.0, 1.0]);
        seg.plan = Some(plan(vec![MovePlan::identity(0.4)], 1.0));
        let mut stats = RescaleStats::default();
        ExtrusionRescaler::new(1.0, 1e-9).rescale_segment(&mut seg, &mut stats);
        assert!(seg.moves[0].e_out.is_none());
        assert_eq!(stats.rescaled_moves, 0);
    }

    #[test]
    fn test_last_layer_factor() {
        let mut seg = segment(&[0.0, 2.0]);
        seg.plan = Some(plan(
            vec![MovePlan {
                z: 0.5,
                offset: 0.1,
                length_ratio: 1.0,
            }],
            0.5,
        ));
        let mut stats = RescaleStats::default();
        ExtrusionRescaler::new(1.0, 1e-9).rescale_segment(&mut seg, &mut stats);
        assert_relative_eq!(seg.moves[0].e_out.unwrap(), 1.0, epsilon = 1e-12);
    }
}
