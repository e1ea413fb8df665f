//! Spatial matcher.
//!
//! Finds the segments each ping of a trip falls within and keeps only the
//! first and last ping per segment. Interior pings carry no extra
//! information once entry and exit are known.

use std::collections::BTreeMap;

use geo::Point;
use rstar::RTree;

use crate::models::entities::{Segment, TripInstance, VehiclePosition};
use crate::spatial::index::SegmentLineNode;

/// Entry and exit pings of one trip within one segment.
///
/// `enter` and `exit` are positions in the trip's trace; they are equal when
/// only one ping fell inside the segment.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BoundaryPings {
    /// Position of the segment in [`SegmentMatcher::segments`]
    pub segment: usize,
    pub enter: usize,
    pub exit: usize,
    /// Pings inside the segment, boundaries included
    pub ping_count: usize,
}

/// Read-only segment index for one shape, shared by every trip on it.
pub struct SegmentMatcher {
    segments: Vec<Segment>,
    tree: RTree<SegmentLineNode>,
    max_buffer: f64,
}

impl SegmentMatcher {
    pub fn new(segments: Vec<Segment>) -> Self {
        let nodes: Vec<SegmentLineNode> = segments
            .iter()
            .enumerate()
            .flat_map(|(i, segment)| {
                segment
                    .geometry
                    .lines()
                    .map(move |line| SegmentLineNode::new(line, i))
            })
            .collect();

        let max_buffer = segments.iter().map(|s| s.buffer_m).fold(0.0, f64::max);

        Self {
            segments,
            tree: RTree::bulk_load(nodes),
            max_buffer,
        }
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Segments whose buffer contains `point`, ascending by position.
    pub fn segments_containing(&self, point: &Point<f64>) -> Vec<usize> {
        let mut candidates: Vec<usize> = self
            .tree
            .locate_within_distance([point.x(), point.y()], self.max_buffer * self.max_buffer)
            .map(|node| node.segment)
            .collect();

        candidates.sort_unstable();
        candidates.dedup();
        candidates.retain(|&i| self.segments[i].contains(point));
        candidates
    }

    /// Reduce a trip's pings to boundary pings per segment.
    ///
    /// Segments no ping fell within are absent from the result.
    pub fn match_trip(&self, trip: &TripInstance) -> Vec<BoundaryPings> {
        let positions = trip.positions();
        let mut matched: BTreeMap<usize, BoundaryPings> = BTreeMap::new();

        for (position, vp) in positions.iter().enumerate() {
            for segment in self.segments_containing(&vp.location) {
                matched
                    .entry(segment)
                    .and_modify(|b| {
                        if ping_order(vp) < ping_order(&positions[b.enter]) {
                            b.enter = position;
                        }
                        if ping_order(vp) > ping_order(&positions[b.exit]) {
                            b.exit = position;
                        }
                        b.ping_count += 1;
                    })
                    .or_insert(BoundaryPings {
                        segment,
                        enter: position,
                        exit: position,
                        ping_count: 1,
                    });
            }
        }

        matched.into_values().collect()
    }
}

/// Earliest timestamp enters, latest exits; ties go by vp_idx.
fn ping_order(vp: &VehiclePosition) -> (chrono::NaiveDateTime, u64) {
    (vp.timestamp, vp.vp_idx)
}
