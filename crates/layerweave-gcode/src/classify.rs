//! Path classification
//!
//! Groups each layer's consecutive extrusion moves into [`Segment`]s and
//! assigns every segment a [`SegmentRole`]. Classifiers are pluggable: each
//! one may answer for a segment or defer, and a [`ChainClassifier`] asks
//! them in order.

use layerweave_core::Bounds2;

use crate::program::{Block, Layer, Program, Segment, SegmentMove, SegmentRole};
use crate::record::{FeatureType, RecordKind};

/// Assigns roles to the segments of one layer
pub trait RoleClassifier: Send + Sync {
    /// Short identifier used in logs
    fn name(&self) -> &str;

    /// One answer per segment, `None` meaning "no opinion"
    fn classify(&self, segments: &[Segment]) -> Vec<Option<SegmentRole>>;
}

/// Uses the slicer feature type carried by each segment's moves
#[derive(Debug, Clone, Copy, Default)]
pub struct MarkerClassifier;

impl RoleClassifier for MarkerClassifier {
    fn name(&self) -> &str {
        "marker"
    }

    fn classify(&self, segments: &[Segment]) -> Vec<Option<SegmentRole>> {
        segments
            .iter()
            .map(|seg| {
                let feature = seg.moves.first()?.mv.feature.as_ref()?;
                Some(match feature {
                    FeatureType::ExternalPerimeter => SegmentRole::ExternalPerimeter,
                    FeatureType::Perimeter => SegmentRole::Wall,
                    FeatureType::Infill => SegmentRole::Infill,
                    FeatureType::Other(_) => SegmentRole::Other,
                })
            })
            .collect()
    }
}

/// Derives roles from loop geometry
///
/// Closed loops whose bounds are not inside any other closed loop are
/// external perimeters, the remaining closed loops are walls and open paths
/// are infill. Continuation chains are judged as one path.
#[derive(Debug, Clone, Copy)]
pub struct GeometricClassifier {
    pub tolerance: f64,
}

impl GeometricClassifier {
    pub fn new(tolerance: f64) -> Self {
        Self { tolerance }
    }
}

impl RoleClassifier for GeometricClassifier {
    fn name(&self) -> &str {
        "geometric"
    }

    fn classify(&self, segments: &[Segment]) -> Vec<Option<SegmentRole>> {
        let chains = continuation_chains(segments);
        let chain_bounds: Vec<Bounds2> = chains
            .iter()
            .map(|range| {
                let mut bounds = Bounds2::empty();
                for p in segments[range.clone()].iter().flat_map(Segment::points) {
                    bounds.include(p);
                }
                bounds
            })
            .collect();
        let closed: Vec<bool> = chains.iter().map(|r| segments[r.start].closed).collect();

        let mut roles = vec![None; segments.len()];
        for (i, range) in chains.iter().enumerate() {
            let role = if !closed[i] {
                SegmentRole::Infill
            } else {
                let enclosed = chain_bounds.iter().enumerate().any(|(j, other)| {
                    j != i && closed[j] && other.strictly_contains(&chain_bounds[i], self.tolerance)
                });
                if enclosed {
                    SegmentRole::Wall
                } else {
                    SegmentRole::ExternalPerimeter
                }
            };
            for slot in &mut roles[range.clone()] {
                *slot = Some(role);
            }
        }
        roles
    }
}

/// Asks classifiers in order; the first answer wins, infill otherwise
pub struct ChainClassifier {
    classifiers: Vec<Box<dyn RoleClassifier>>,
}

impl ChainClassifier {
    pub fn new() -> Self {
        Self {
            classifiers: Vec::new(),
        }
    }

    /// Markers first, geometry as fallback
    pub fn standard(tolerance: f64) -> Self {
        Self::new()
            .with(MarkerClassifier)
            .with(GeometricClassifier::new(tolerance))
    }

    pub fn with(mut self, classifier: impl RoleClassifier + 'static) -> Self {
        self.classifiers.push(Box::new(classifier));
        self
    }

    pub fn push(&mut self, classifier: Box<dyn RoleClassifier>) {
        self.classifiers.push(classifier);
    }

    pub fn len(&self) -> usize {
        self.classifiers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classifiers.is_empty()
    }
}

impl Default for ChainClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl RoleClassifier for ChainClassifier {
    fn name(&self) -> &str {
        "chain"
    }

    fn classify(&self, segments: &[Segment]) -> Vec<Option<SegmentRole>> {
        let mut roles: Vec<Option<SegmentRole>> = vec![None; segments.len()];
        for classifier in &self.classifiers {
            if roles.iter().all(Option::is_some) {
                break;
            }
            let answers = classifier.classify(segments);
            for (role, answer) in roles.iter_mut().zip(answers) {
                if role.is_none() {
                    *role = answer;
                }
            }
        }
        roles
            .into_iter()
            .map(|r| Some(r.unwrap_or(SegmentRole::Infill)))
            .collect()
    }
}

/// Index ranges of continuation chains: a segment plus every following
/// segment that continues it
pub fn continuation_chains(segments: &[Segment]) -> Vec<std::ops::Range<usize>> {
    let mut chains: Vec<std::ops::Range<usize>> = Vec::new();
    for (i, seg) in segments.iter().enumerate() {
        match chains.last_mut() {
            Some(last) if seg.continues_previous && last.end == i => last.end = i + 1,
            _ => chains.push(i..i + 1),
        }
    }
    chains
}

/// Group a layer's extrusion runs into segments and classify them
///
/// Returns the number of segments built. Any record that is not an
/// extrusion move ends a run.
pub fn classify_layer(layer: &mut Layer, classifier: &dyn RoleClassifier, tolerance: f64) -> usize {
    let blocks = std::mem::take(&mut layer.blocks);
    let mut rebuilt: Vec<Block> = Vec::with_capacity(blocks.len());
    let mut segments: Vec<Segment> = Vec::new();
    let mut segment_slots: Vec<usize> = Vec::new();
    let mut run: Vec<SegmentMove> = Vec::new();
    let mut moved_since_segment = true;

    let mut close_run = |run: &mut Vec<SegmentMove>,
                         rebuilt: &mut Vec<Block>,
                         segments: &mut Vec<Segment>,
                         moved_since_segment: bool| {
        if run.is_empty() {
            return;
        }
        let mut seg = Segment::new(std::mem::take(run));
        if let Some(prev) = segments.last() {
            seg.continues_previous = !moved_since_segment
                && prev.end().planar().distance(&seg.start().planar()) <= tolerance;
        }
        segment_slots.push(rebuilt.len());
        // Placeholder replaced once roles are known.
        rebuilt.push(Block::Segment(Segment::new(Vec::new())));
        segments.push(seg);
    };

    for block in blocks {
        let record = match block {
            Block::Record(record) => record,
            Block::Segment(seg) => {
                close_run(&mut run, &mut rebuilt, &mut segments, moved_since_segment);
                moved_since_segment = true;
                rebuilt.push(Block::Segment(seg));
                continue;
            }
        };

        if record.is_extrusion() {
            if let Some(mv) = SegmentMove::from_record(record) {
                run.push(mv);
            }
            continue;
        }

        let had_run = !run.is_empty();
        close_run(&mut run, &mut rebuilt, &mut segments, moved_since_segment);
        if had_run {
            moved_since_segment = false;
        }
        if matches!(record.kind, RecordKind::Move(_) | RecordKind::SetPosition(_)) {
            moved_since_segment = true;
        }
        rebuilt.push(Block::Record(record));
    }
    close_run(&mut run, &mut rebuilt, &mut segments, moved_since_segment);

    mark_closed_chains(&mut segments, tolerance);

    let roles = classifier.classify(&segments);
    let count = segments.len();
    for ((mut seg, role), slot) in segments.into_iter().zip(roles).zip(segment_slots) {
        seg.role = role.unwrap_or(SegmentRole::Infill);
        rebuilt[slot] = Block::Segment(seg);
    }
    layer.blocks = rebuilt;
    count
}

/// Classify every layer of a program
pub fn classify_program(program: &mut Program, classifier: &dyn RoleClassifier, tolerance: f64) -> usize {
    let count = program
        .layers
        .iter_mut()
        .map(|layer| classify_layer(layer, classifier, tolerance))
        .sum();
    tracing::debug!(segments = count, classifier = classifier.name(), "classified segments");
    count
}

fn mark_closed_chains(segments: &mut [Segment], tolerance: f64) {
    for range in continuation_chains(segments) {
        let chain = &segments[range.clone()];
        let start = chain[0].start().planar();
        let end = chain[chain.len() - 1].end().planar();
        let moves: usize = chain.iter().map(|s| s.moves.len()).sum();
        let closed = moves >= 3 && start.distance(&end) <= tolerance;
        for seg in &mut segments[range] {
            seg.closed = closed;
        }
    }
}
