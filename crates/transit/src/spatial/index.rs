//! R-tree nodes for spatial indexing.
//!
//! Two indices are built during a run:
//! 1. **Segment lines**: one node per straight piece of every segment of a
//!    shape, used to find which segments a ping falls within. The R-tree
//!    gives candidates by squared distance; exact containment is then the
//!    buffer test on the segment itself.
//! 2. **Trace points**: one node per ping of a single trip, built when the
//!    trip's stops are anchored and dropped right after.

use geo::{Line, Point};
use rstar::{PointDistance, RTreeObject, AABB};

use crate::models::types::PrimaryDirection;
use crate::spatial::queries::distance_to_line_2;

// ============================================================================
// Segment Line Node
// ============================================================================

#[derive(Clone, Debug)]
pub struct SegmentLineNode {
    /// Position of the owning segment in the shape's segment list
    pub segment: usize,
    pub line: Line,
    aabb: AABB<[f64; 2]>,
}

impl SegmentLineNode {
    pub fn new(line: Line, segment: usize) -> Self {
        let start = [line.start.x, line.start.y];
        let end = [line.end.x, line.end.y];

        Self {
            segment,
            line,
            aabb: AABB::from_corners(start, end),
        }
    }
}

impl RTreeObject for SegmentLineNode {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        self.aabb
    }
}

impl PointDistance for SegmentLineNode {
    fn distance_2(&self, point: &[f64; 2]) -> f64 {
        distance_to_line_2(*point, &self.line)
    }
}

// ============================================================================
// Trace Point Node
// ============================================================================

#[derive(Clone, Debug)]
pub struct TracePointNode {
    /// Position of the ping within the trip's trace
    pub position: usize,
    pub direction: Option<PrimaryDirection>,
    point: [f64; 2],
}

impl TracePointNode {
    pub fn new(location: Point, position: usize, direction: Option<PrimaryDirection>) -> Self {
        Self {
            position,
            direction,
            point: [location.x(), location.y()],
        }
    }
}

impl RTreeObject for TracePointNode {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_point(self.point)
    }
}

impl PointDistance for TracePointNode {
    fn distance_2(&self, point: &[f64; 2]) -> f64 {
        let dx = self.point[0] - point[0];
        let dy = self.point[1] - point[1];
        dx * dx + dy * dy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::Coord;
    use rstar::RTree;

    #[test]
    fn test_segment_line_query_uses_squared_radius() {
        let tree = RTree::bulk_load(vec![
            SegmentLineNode::new(Line::new(Coord { x: 0.0, y: 0.0 }, Coord { x: 100.0, y: 0.0 }), 0),
            SegmentLineNode::new(Line::new(Coord { x: 0.0, y: 500.0 }, Coord { x: 100.0, y: 500.0 }), 1),
        ]);

        let hits: Vec<usize> = tree
            .locate_within_distance([50.0, 40.0], 50.0 * 50.0)
            .map(|node| node.segment)
            .collect();
        assert_eq!(hits, vec![0]);
    }

    #[test]
    fn test_trace_nearest() {
        let tree = RTree::bulk_load(vec![
            TracePointNode::new(Point::new(0.0, 0.0), 0, None),
            TracePointNode::new(Point::new(10.0, 0.0), 1, None),
            TracePointNode::new(Point::new(20.0, 0.0), 2, None),
        ]);

        let nearest = tree.nearest_neighbor(&[12.0, 1.0]).unwrap();
        assert_eq!(nearest.position, 1);
    }
}
