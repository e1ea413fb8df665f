//! Linear referencing.
//!
//! Turns a point into its distance along a reference line. Never fails: a
//! point far from the line still gets the distance of its nearest
//! projection, so callers must check proximity separately.

use geo::{EuclideanLength, LineLocatePoint, LineString, Point};

use crate::models::entities::{Shape, Stop};

/// Cumulative distance along `line` to the point on it closest to `point`.
pub fn project_point(point: &Point<f64>, line: &LineString<f64>) -> f64 {
    let length = line.euclidean_length();
    match line.line_locate_point(point) {
        Some(fraction) if fraction.is_finite() => fraction * length,
        _ => 0.0,
    }
}

/// Stop position along the full shape of a trip.
pub fn stop_meters(stop: &Stop, shape: &Shape) -> f64 {
    project_point(&stop.location, shape.geometry())
}
