//! Segment builder.
//!
//! Cuts a shape into consecutive pieces of the target length. Pieces cover
//! the whole shape without gaps; only the last may be shorter.

use geo::{Coord, EuclideanLength, LineString};
use log::debug;

use crate::config::PipelineConfig;
use crate::identifiers::segment_fingerprint;
use crate::models::entities::{Segment, Shape};

fn push_distinct(coords: &mut Vec<Coord<f64>>, c: Coord<f64>) {
    if coords.last() != Some(&c) {
        coords.push(c);
    }
}

/// Split a line at every multiple of `target` meters along it.
///
/// Returns `ceil(length / target)` pieces, at least one.
pub fn split_line(line: &LineString<f64>, target: f64) -> Vec<LineString<f64>> {
    let total = line.euclidean_length();
    let count = ((total / target).ceil() as usize).max(1);

    let mut pieces = Vec::with_capacity(count);
    let mut current: Vec<Coord<f64>> = line.0.first().copied().into_iter().collect();
    let mut walked = 0.0;

    for piece in line.lines() {
        let dx = piece.end.x - piece.start.x;
        let dy = piece.end.y - piece.start.y;
        let len = dx.hypot(dy);

        while pieces.len() + 1 < count {
            let next_cut = target * (pieces.len() + 1) as f64;
            if next_cut > walked + len {
                break;
            }
            let t = (next_cut - walked) / len;
            let cut = Coord {
                x: piece.start.x + t * dx,
                y: piece.start.y + t * dy,
            };
            push_distinct(&mut current, cut);
            pieces.push(LineString::new(std::mem::replace(&mut current, vec![cut])));
        }

        push_distinct(&mut current, piece.end);
        walked += len;
    }

    pieces.push(LineString::new(current));
    pieces
}

/// Cut a shape into segments with sequence numbers and fingerprints.
pub fn cut_shape(shape: &Shape, config: &PipelineConfig) -> Vec<Segment> {
    let target = config.segment_length_m;
    let route_key = shape.route_key();

    let segments: Vec<Segment> = split_line(shape.geometry(), target)
        .into_iter()
        .enumerate()
        .map(|(i, geometry)| {
            let segment_sequence = i as u32;
            let length_m = geometry.euclidean_length();
            Segment {
                segment_id: segment_fingerprint(
                    shape.operator_id.as_str(),
                    &route_key,
                    segment_sequence,
                ),
                operator_id: shape.operator_id.clone(),
                route_id: shape.route_id.clone(),
                direction_id: shape.direction_id,
                shape_id: shape.shape_id.clone(),
                segment_sequence,
                geometry,
                length_m,
                start_meters: target * i as f64,
                buffer_m: config.buffer_m,
            }
        })
        .collect();

    debug!(
        "Shape {} ({:.0} m) cut into {} segments",
        shape.shape_id,
        shape.length(),
        segments.len()
    );

    segments
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identifiers::*;
    use crate::models::entities::fixtures::straight_shape;
    use crate::models::types::DirectionId;
    use approx::assert_relative_eq;

    fn config(segment_length_m: f64) -> PipelineConfig {
        PipelineConfig {
            segment_length_m,
            ..Default::default()
        }
    }

    #[test]
    fn test_exact_multiple() {
        let segments = cut_shape(&straight_shape(2000.0), &config(1000.0));

        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].segment_sequence, 0);
        assert_eq!(segments[1].segment_sequence, 1);
        assert_relative_eq!(segments[0].length_m, 1000.0);
        assert_relative_eq!(segments[1].length_m, 1000.0);
        assert_relative_eq!(segments[1].start_meters, 1000.0);
        assert_eq!(
            segments[1].geometry,
            LineString::from(vec![(1000.0, 0.0), (2000.0, 0.0)])
        );
    }

    #[test]
    fn test_short_shape_is_one_segment() {
        let segments = cut_shape(&straight_shape(420.0), &config(1000.0));
        assert_eq!(segments.len(), 1);
        assert_relative_eq!(segments[0].length_m, 420.0);
    }

    #[test]
    fn test_coverage_of_bent_shape() {
        // 700 m east, 900 m north, 650 m west: 2250 m
        let shape = Shape::new(
            OperatorIdentifier::new("op"),
            RouteIdentifier::new("r1"),
            DirectionId::Inbound,
            ShapeIdentifier::new("bent"),
            vec![
                Coord { x: 0.0, y: 0.0 },
                Coord { x: 700.0, y: 0.0 },
                Coord { x: 700.0, y: 900.0 },
                Coord { x: 50.0, y: 900.0 },
            ],
        )
        .unwrap();

        let segments = cut_shape(&shape, &config(1000.0));
        assert_eq!(segments.len(), (shape.length() / 1000.0).ceil() as usize);

        let covered: f64 = segments.iter().map(|s| s.length_m).sum();
        assert_relative_eq!(covered, shape.length(), epsilon = 1e-6);

        for s in &segments[..segments.len() - 1] {
            assert_relative_eq!(s.length_m, 1000.0, epsilon = 1e-6);
        }
        assert_relative_eq!(segments[2].length_m, 250.0, epsilon = 1e-6);

        // Consecutive pieces share their cut point
        for pair in segments.windows(2) {
            assert_eq!(pair[0].geometry.0.last(), pair[1].geometry.0.first());
        }

        // First cut turns the corner
        let first = &segments[0].geometry.0;
        assert_eq!(first.len(), 3);
        assert_eq!(first[1], Coord { x: 700.0, y: 0.0 });
        assert_relative_eq!(first[2].x, 700.0);
        assert_relative_eq!(first[2].y, 300.0, epsilon = 1e-9);
    }

    #[test]
    fn test_ids_are_stable_and_distinct() {
        let shape = straight_shape(3500.0);
        let first = cut_shape(&shape, &config(1000.0));
        let second = cut_shape(&shape, &config(1000.0));

        let ids: Vec<SegmentId> = first.iter().map(|s| s.segment_id).collect();
        let again: Vec<SegmentId> = second.iter().map(|s| s.segment_id).collect();
        assert_eq!(ids, again);

        let mut unique = ids.clone();
        unique.sort();
        unique.dedup();
        assert_eq!(unique.len(), 4);
        assert_eq!(ids[2], segment_fingerprint("op", "r1:s1", 2));
    }
}
