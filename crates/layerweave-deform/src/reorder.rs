//! Wall reordering
//!
//! Reorders the wall loops of each layer by enclosed area, innermost first
//! or outermost first. Only wall segments move, and only into positions that
//! already held a wall in the same layer; everything else keeps its place.
//! A loop split across several segments moves as one unit.

use layerweave_core::Bounds2;
use layerweave_gcode::{continuation_chains, Block, Layer, Program, Segment, SegmentRole};
use layerweave_settings::WallOrder;

/// Reorders wall segments within layers
#[derive(Debug, Clone, Copy)]
pub struct WallReorderer {
    order: WallOrder,
}

impl WallReorderer {
    pub fn new(order: WallOrder) -> Self {
        Self { order }
    }

    /// Reorder every layer, returning the number of wall segments that changed position
    pub fn reorder(&self, program: &mut Program) -> usize {
        let moved = program
            .layers
            .iter_mut()
            .map(|layer| self.reorder_layer(layer))
            .sum();
        tracing::info!(order = ?self.order, moved, "reordered walls");
        moved
    }

    pub fn reorder_layer(&self, layer: &mut Layer) -> usize {
        let blocks = std::mem::take(&mut layer.blocks);
        let mut slots: Vec<usize> = Vec::new();
        let mut walls: Vec<Segment> = Vec::new();
        let mut rebuilt: Vec<Option<Block>> = Vec::with_capacity(blocks.len());

        for block in blocks {
            match block {
                Block::Segment(segment) if segment.role == SegmentRole::Wall => {
                    slots.push(rebuilt.len());
                    rebuilt.push(None);
                    walls.push(segment);
                }
                other => rebuilt.push(Some(other)),
            }
        }

        let mut groups: Vec<(f64, Vec<(usize, Segment)>)> = Vec::new();
        let chains = continuation_chains(&walls);
        let mut walls = walls.into_iter().enumerate();
        for chain in chains {
            let members: Vec<(usize, Segment)> = walls.by_ref().take(chain.len()).collect();
            let mut bounds = Bounds2::empty();
            for p in members.iter().flat_map(|(_, s)| s.points()) {
                bounds.include(p);
            }
            groups.push((bounds.area(), members));
        }

        match self.order {
            WallOrder::InnerFirst => groups.sort_by(|a, b| a.0.total_cmp(&b.0)),
            WallOrder::OuterFirst => groups.sort_by(|a, b| b.0.total_cmp(&a.0)),
        }

        let mut moved = 0;
        let ordered = groups.into_iter().flat_map(|(_, members)| members);
        for (position, (slot, (original, segment))) in slots.iter().zip(ordered).enumerate() {
            if position != original {
                moved += 1;
            }
            rebuilt[*slot] = Some(Block::Segment(segment));
        }
        layer.blocks = rebuilt.into_iter().flatten().collect();

        if moved > 0 {
            tracing::debug!(layer = layer.index, moved, "reordered wall loops");
        }
        moved
    }
}
