//! Deformation planning
//!
//! Computes a [`SegmentPlan`] for every segment the configuration includes:
//! a constant half-layer shift in brick mode, or a sinusoidal Z offset in
//! non-planar mode. Layers are independent once the amplitude ramp is known,
//! so they are planned in parallel.
//!
//! Non-planar planning subdivides long moves first, so the wave is sampled at
//! least every `segment_length` mm. A sequential pass then limits every
//! offset to `max_step_size` from the offset the layer below has at the same
//! XY position. The amplitude ramp alone cannot guarantee that, because the
//! normalization extent may change from layer to layer.

use layerweave_core::constants::MIN_MOVE_LENGTH;
use layerweave_core::{Point2, WaveDirection};
use layerweave_gcode::{Layer, Move, MovePlan, Program, Segment, SegmentPlan, SegmentRole};
use layerweave_settings::{DeformConfig, DeformationMode, Normalization, WaveSettings};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::f64::consts::{PI, TAU};

/// Counters reported by the planner
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanStats {
    /// Segments that received a plan
    pub planned_segments: usize,
    /// Layers with at least one planned segment
    pub deformed_layers: usize,
    /// Moves added by subdividing long moves
    pub subdivided_moves: usize,
    /// Offsets pulled back to the layer-to-layer step limit
    pub clamped_offsets: usize,
}

impl PlanStats {
    fn merge(self, other: Self) -> Self {
        Self {
            planned_segments: self.planned_segments + other.planned_segments,
            deformed_layers: self.deformed_layers + other.deformed_layers,
            subdivided_moves: self.subdivided_moves + other.subdivided_moves,
            clamped_offsets: self.clamped_offsets + other.clamped_offsets,
        }
    }
}

/// Per-layer amplitudes approaching `target` by at most `max_step` per layer
///
/// Layer 0 is never deformed, so the ramp starts from zero.
pub fn amplitude_ramp(layer_count: usize, target: f64, max_step: f64) -> Vec<f64> {
    (0..layer_count)
        .scan(0.0_f64, |previous, index| {
            let amplitude = if index == 0 {
                0.0
            } else {
                target.clamp(*previous - max_step, *previous + max_step)
            };
            *previous = amplitude;
            Some(amplitude)
        })
        .collect()
}

/// 3D length after deformation divided by the original 3D length
pub fn length_ratio(mv: &Move, z_from: f64, z_to: f64) -> f64 {
    let planar = mv.planar_length();
    let original = planar.hypot(mv.to.z - mv.from.z);
    if original <= MIN_MOVE_LENGTH {
        return 1.0;
    }
    planar.hypot(z_to - z_from) / original
}

/// Plans deformation for a program according to a configuration
pub struct DeformationPlanner<'a> {
    config: &'a DeformConfig,
}

impl<'a> DeformationPlanner<'a> {
    pub fn new(config: &'a DeformConfig) -> Self {
        Self { config }
    }

    /// Whether segments with this role may be deformed
    pub fn includes(&self, role: SegmentRole) -> bool {
        match role {
            SegmentRole::ExternalPerimeter => self.config.include_external_perimeters,
            SegmentRole::Wall => self.config.include_perimeters,
            SegmentRole::Infill => self.config.include_infill,
            SegmentRole::Other => false,
        }
    }

    /// Attach plans to every included segment, replacing earlier plans
    pub fn plan(&self, program: &mut Program) -> PlanStats {
        let stats = match self.config.mode {
            DeformationMode::Disabled => {
                for layer in &mut program.layers {
                    for segment in layer.segments_mut() {
                        segment.plan = None;
                    }
                }
                PlanStats::default()
            }
            DeformationMode::Brick => {
                let last = program.layers.len().saturating_sub(1);
                program
                    .layers
                    .par_iter_mut()
                    .map(|layer| self.plan_brick_layer(layer, last))
                    .reduce(PlanStats::default, PlanStats::merge)
            }
            DeformationMode::NonPlanar => {
                let count = program.layers.len();
                let step = self.config.max_step_size;
                let wall = amplitude_ramp(count, self.config.wall.amplitude, step);
                let infill = amplitude_ramp(count, self.config.infill.amplitude, step);
                let mut stats = program
                    .layers
                    .par_iter_mut()
                    .zip(wall.par_iter().zip(infill.par_iter()))
                    .map(|(layer, (wall, infill))| self.plan_wave_layer(layer, *wall, *infill))
                    .reduce(PlanStats::default, PlanStats::merge);

                // Each layer is limited against the already limited layer below.
                let cell = self.config.tolerances.closed_loop;
                for index in 1..count {
                    let (below, rest) = program.layers.split_at_mut(index);
                    let field = OffsetField::from_layer(&below[index - 1], cell);
                    stats.clamped_offsets += field.limit_layer(&mut rest[0], step);
                }
                stats
            }
        };

        tracing::info!(
            mode = %self.config.mode,
            segments = stats.planned_segments,
            layers = stats.deformed_layers,
            subdivided = stats.subdivided_moves,
            clamped = stats.clamped_offsets,
            "planned deformation"
        );
        stats
    }

    fn plan_brick_layer(&self, layer: &mut Layer, last: usize) -> PlanStats {
        let index = layer.index;
        let shifted = index % 2 == 1 && (index != last || self.config.shift_last_layer);
        let shift = self.config.brick_shift();

        let mut planned = 0;
        for segment in layer.segments_mut() {
            segment.plan = None;
            if !shifted || !self.includes(segment.role) {
                continue;
            }
            let extrusion_factor = if index == last {
                self.config.last_layer_extrusion_factor
            } else {
                1.0
            };
            let moves = segment
                .moves
                .iter()
                .map(|m| MovePlan {
                    z: m.mv.to.z + shift,
                    offset: shift,
                    length_ratio: 1.0,
                })
                .collect();
            segment.plan = Some(SegmentPlan {
                start_z: segment.start().z + shift,
                moves,
                extrusion_factor,
            });
            planned += 1;
        }

        tracing::debug!(layer = index, shifted, segments = planned, "brick layer");
        PlanStats {
            planned_segments: planned,
            deformed_layers: usize::from(planned > 0),
            ..PlanStats::default()
        }
    }

    fn plan_wave_layer(&self, layer: &mut Layer, wall_amplitude: f64, infill_amplitude: f64) -> PlanStats {
        let index = layer.index;
        let wall_extent = projection_extent(layer.segments(), self.config.wall.direction);
        let infill_extent = projection_extent(layer.segments(), self.config.infill.direction);

        let mut planned = 0;
        let mut subdivided = 0;
        let mut loop_index: Option<usize> = None;
        for segment in layer.segments_mut() {
            segment.plan = None;
            if segment.role == SegmentRole::Wall && !segment.continues_previous {
                loop_index = Some(loop_index.map_or(0, |i| i + 1));
            }
            if index == 0 || !self.includes(segment.role) {
                continue;
            }

            let (wave, amplitude, layer_extent) = match segment.role {
                SegmentRole::Infill => (&self.config.infill, infill_amplitude, infill_extent),
                _ => (&self.config.wall, wall_amplitude, wall_extent),
            };
            if amplitude.abs() <= MIN_MOVE_LENGTH {
                continue;
            }

            let odd_loop = segment.role == SegmentRole::Wall && loop_index.is_some_and(|i| i % 2 == 1);
            let phase = if self.config.alternate_loops && odd_loop {
                self.config.phase + PI
            } else {
                self.config.phase
            };
            let extent = match self.config.normalization {
                Normalization::None => None,
                Normalization::Layer => Some(layer_extent),
                Normalization::Segment => Some(projection_extent(
                    std::iter::once(&*segment),
                    wave.direction,
                )),
            };
            let wave = Wave {
                settings: wave,
                amplitude,
                phase,
                extent,
            };

            subdivided += segment.subdivide(self.config.segment_length);
            segment.plan = Some(plan_wave_segment(segment, &wave));
            planned += 1;
        }

        tracing::debug!(
            layer = index,
            wall_amplitude,
            infill_amplitude,
            segments = planned,
            subdivided,
            "non-planar layer"
        );
        PlanStats {
            planned_segments: planned,
            deformed_layers: usize::from(planned > 0),
            subdivided_moves: subdivided,
            clamped_offsets: 0,
        }
    }
}

/// Sinusoid evaluated for one segment
struct Wave<'a> {
    settings: &'a WaveSettings,
    amplitude: f64,
    phase: f64,
    /// Projection range used for normalisation; `None` keeps millimetres
    extent: Option<(f64, f64)>,
}

impl Wave<'_> {
    fn offset(&self, point: Point2) -> f64 {
        let projected = self.settings.direction.project(&point);
        let p = match self.extent {
            None => projected,
            Some((min, max)) if max - min > MIN_MOVE_LENGTH => (projected - min) / (max - min),
            Some(_) => 0.0,
        };
        self.amplitude * (TAU * self.settings.frequency * p + self.phase).sin()
    }
}

fn plan_wave_segment(segment: &Segment, wave: &Wave<'_>) -> SegmentPlan {
    let start_offset = wave.offset(segment.start().planar());
    let offsets: Vec<f64> = segment
        .moves
        .iter()
        .map(|m| wave.offset(m.mv.to.planar()))
        .collect();
    plan_from_offsets(segment, start_offset, &offsets, 1.0)
}

/// Build a plan from the offset of the start point and of every move end
fn plan_from_offsets(
    segment: &Segment,
    start_offset: f64,
    offsets: &[f64],
    extrusion_factor: f64,
) -> SegmentPlan {
    let start_z = segment.start().z + start_offset;
    let mut previous_z = start_z;
    let moves = segment
        .moves
        .iter()
        .zip(offsets)
        .map(|(m, &offset)| {
            let z = m.mv.to.z + offset;
            let length_ratio = length_ratio(&m.mv, previous_z, z);
            previous_z = z;
            MovePlan {
                z,
                offset,
                length_ratio,
            }
        })
        .collect();

    SegmentPlan {
        start_z,
        moves,
        extrusion_factor,
    }
}

/// Offsets of one layer indexed by XY position
///
/// Points of unplanned segments count with offset zero.
struct OffsetField {
    cell: f64,
    cells: HashMap<(i64, i64), Vec<(Point2, f64)>>,
}

impl OffsetField {
    fn from_layer(layer: &Layer, cell: f64) -> Self {
        let mut field = Self {
            cell,
            cells: HashMap::new(),
        };
        for segment in layer.segments() {
            let start = segment.start();
            let start_offset = segment.plan.as_ref().map_or(0.0, |p| p.start_z - start.z);
            field.insert(start.planar(), start_offset);
            for (i, m) in segment.moves.iter().enumerate() {
                let offset = segment
                    .plan
                    .as_ref()
                    .and_then(|p| p.moves.get(i))
                    .map_or(0.0, |p| p.offset);
                field.insert(m.mv.to.planar(), offset);
            }
        }
        field
    }

    fn key(&self, p: Point2) -> (i64, i64) {
        ((p.x / self.cell).floor() as i64, (p.y / self.cell).floor() as i64)
    }

    fn insert(&mut self, p: Point2, offset: f64) {
        let key = self.key(p);
        self.cells.entry(key).or_default().push((p, offset));
    }

    /// Offset of the nearest point no further than one cell from `p`
    fn offset_at(&self, p: Point2) -> Option<f64> {
        let (cx, cy) = self.key(p);
        let mut best: Option<(f64, f64)> = None;
        for dx in -1..=1 {
            for dy in -1..=1 {
                let Some(points) = self.cells.get(&(cx + dx, cy + dy)) else {
                    continue;
                };
                for (q, offset) in points {
                    let d = q.distance(&p);
                    if d <= self.cell && best.is_none_or(|(bd, _)| d < bd) {
                        best = Some((d, *offset));
                    }
                }
            }
        }
        best.map(|(_, offset)| offset)
    }

    fn limit(&self, p: Point2, offset: f64, max_step: f64) -> f64 {
        match self.offset_at(p) {
            Some(below) => offset.clamp(below - max_step, below + max_step),
            None => offset,
        }
    }

    /// Clamp the planned offsets of `layer`; returns how many changed
    fn limit_layer(&self, layer: &mut Layer, max_step: f64) -> usize {
        let mut clamped = 0;
        for segment in layer.segments_mut() {
            let Some(plan) = &segment.plan else {
                continue;
            };
            let start = segment.start();
            let raw_start = plan.start_z - start.z;
            let start_offset = self.limit(start.planar(), raw_start, max_step);
            let offsets: Vec<f64> = segment
                .moves
                .iter()
                .zip(&plan.moves)
                .map(|(m, p)| self.limit(m.mv.to.planar(), p.offset, max_step))
                .collect();

            let changed = usize::from(start_offset != raw_start)
                + offsets
                    .iter()
                    .zip(&plan.moves)
                    .filter(|(o, p)| **o != p.offset)
                    .count();
            if changed == 0 {
                continue;
            }
            let rebuilt = plan_from_offsets(segment, start_offset, &offsets, plan.extrusion_factor);
            segment.plan = Some(rebuilt);
            clamped += changed;
        }
        clamped
    }
}

/// Range of point projections onto a direction
fn projection_extent<'s>(
    segments: impl Iterator<Item = &'s Segment>,
    direction: WaveDirection,
) -> (f64, f64) {
    let (min, max) = segments
        .flat_map(Segment::points)
        .map(|p| direction.project(&p))
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
            (lo.min(v), hi.max(v))
        });
    if min.is_finite() && max.is_finite() {
        (min, max)
    } else {
        (0.0, 0.0)
    }
}
