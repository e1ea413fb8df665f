//! Planar distance helpers (see [`crate::spatial::projection`]).

use geo::{EuclideanDistance, Line, Point};

/// Straight-line distance between two planar points
pub fn planar_distance(p1: Point, p2: Point) -> f64 {
    p1.euclidean_distance(&p2)
}

/// Squared distance from a planar point to a line segment
pub fn distance_to_line_2(point: [f64; 2], line: &Line) -> f64 {
    let a = [line.start.x, line.start.y];
    let b = [line.end.x, line.end.y];

    let ab = [b[0] - a[0], b[1] - a[1]];
    let ap = [point[0] - a[0], point[1] - a[1]];

    let ab_ab = ab[0] * ab[0] + ab[1] * ab[1];

    if ab_ab == 0.0 {
        // Segment is actually a point
        return ap[0] * ap[0] + ap[1] * ap[1];
    }

    let t = ((ab[0] * ap[0] + ab[1] * ap[1]) / ab_ab).clamp(0.0, 1.0);

    let dx = point[0] - (a[0] + t * ab[0]);
    let dy = point[1] - (a[1] + t * ab[1]);
    dx * dx + dy * dy
}
