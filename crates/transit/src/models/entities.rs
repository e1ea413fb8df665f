//! Shapes, segments, trips and stops.
//!
//! All geometry is in planar meters (see [`crate::spatial::projection`]).

use chrono::NaiveDateTime;
use geo::{Coord, EuclideanDistance, EuclideanLength, LineString, Point};

use crate::identifiers::*;
use crate::models::types::*;

// ============================================================================
// Keys
// ============================================================================

/// Grouping key for route-direction aggregation.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct RouteDirectionKey {
    pub operator_id: OperatorIdentifier,
    pub route_id: RouteIdentifier,
    pub direction_id: DirectionId,
}

/// Shape ids are only unique within one operator's feed.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct ShapeKey {
    pub operator_id: OperatorIdentifier,
    pub shape_id: ShapeIdentifier,
}

impl ShapeKey {
    pub fn new(operator_id: &str, shape_id: &str) -> Self {
        Self {
            operator_id: OperatorIdentifier::new(operator_id),
            shape_id: ShapeIdentifier::new(shape_id),
        }
    }
}

/// Reference to one segment of one shape. Orders by operator, shape, then
/// sequence.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct SegmentRef {
    pub operator_id: OperatorIdentifier,
    pub shape_id: ShapeIdentifier,
    pub segment_sequence: u32,
    pub segment_id: SegmentId,
}

// ============================================================================
// Shape
// ============================================================================

/// One version of a route path. Immutable once built.
#[derive(Clone, Debug)]
pub struct Shape {
    pub operator_id: OperatorIdentifier,
    pub route_id: RouteIdentifier,
    pub direction_id: DirectionId,
    pub shape_id: ShapeIdentifier,
    geometry: LineString<f64>,
    length_m: f64,
}

impl Shape {
    /// Consecutive duplicate coordinates are dropped. Fails if fewer than two
    /// distinct coordinates remain.
    pub fn new(
        operator_id: OperatorIdentifier,
        route_id: RouteIdentifier,
        direction_id: DirectionId,
        shape_id: ShapeIdentifier,
        coords: Vec<Coord<f64>>,
    ) -> Result<Self> {
        let mut deduped: Vec<Coord<f64>> = Vec::with_capacity(coords.len());
        for c in coords {
            if !c.x.is_finite() || !c.y.is_finite() {
                return Err(SpeedsError::InvalidData(format!(
                    "shape {} has a non-finite coordinate",
                    shape_id
                )));
            }
            if deduped.last() != Some(&c) {
                deduped.push(c);
            }
        }
        if deduped.len() < 2 {
            return Err(SpeedsError::InvalidData(format!(
                "shape {} needs at least 2 distinct coordinates",
                shape_id
            )));
        }

        let geometry = LineString::new(deduped);
        let length_m = geometry.euclidean_length();

        Ok(Self {
            operator_id,
            route_id,
            direction_id,
            shape_id,
            geometry,
            length_m,
        })
    }

    pub fn geometry(&self) -> &LineString<f64> {
        &self.geometry
    }

    pub fn length(&self) -> f64 {
        self.length_m
    }

    pub fn key(&self) -> ShapeKey {
        ShapeKey {
            operator_id: self.operator_id.clone(),
            shape_id: self.shape_id.clone(),
        }
    }

    /// Route component of segment fingerprints, qualified by shape so that
    /// two versions of one route never share segment ids.
    pub fn route_key(&self) -> String {
        format!("{}:{}", self.route_id, self.shape_id)
    }
}

// ============================================================================
// Segment
// ============================================================================

/// Fixed-length piece of a shape; the unit of speed measurement.
#[derive(Clone, Debug)]
pub struct Segment {
    pub segment_id: SegmentId,
    pub operator_id: OperatorIdentifier,
    pub route_id: RouteIdentifier,
    pub direction_id: DirectionId,
    pub shape_id: ShapeIdentifier,
    pub segment_sequence: u32,
    pub geometry: LineString<f64>,
    /// Length of `geometry`
    pub length_m: f64,
    /// Distance along the shape where this segment starts
    pub start_meters: f64,
    /// Lateral tolerance for containment tests
    pub buffer_m: f64,
}

impl Segment {
    pub fn segment_ref(&self) -> SegmentRef {
        SegmentRef {
            operator_id: self.operator_id.clone(),
            shape_id: self.shape_id.clone(),
            segment_sequence: self.segment_sequence,
            segment_id: self.segment_id,
        }
    }

    /// Whether a point falls inside the buffered segment.
    pub fn contains(&self, point: &Point<f64>) -> bool {
        point.euclidean_distance(&self.geometry) <= self.buffer_m
    }
}

// ============================================================================
// Vehicle positions and trips
// ============================================================================

/// One GPS sample of a trip.
#[derive(Clone, Debug, PartialEq)]
pub struct VehiclePosition {
    pub vp_idx: u64,
    pub timestamp: NaiveDateTime,
    pub location: Point<f64>,
    /// Filled in by [`TripInstance::new`]
    pub primary_direction: Option<PrimaryDirection>,
}

impl VehiclePosition {
    pub fn new(vp_idx: u64, timestamp: NaiveDateTime, location: Point<f64>) -> Self {
        Self {
            vp_idx,
            timestamp,
            location,
            primary_direction: None,
        }
    }
}

/// Descriptive fields of a realized trip.
#[derive(Clone, Debug)]
pub struct TripInfo {
    pub trip_id: TripIdentifier,
    pub operator_id: OperatorIdentifier,
    pub route_id: RouteIdentifier,
    pub direction_id: DirectionId,
    pub shape_id: ShapeIdentifier,
    /// Scheduled first departure, if known
    pub first_departure: Option<NaiveDateTime>,
}

/// A realized trip on one service date with its ordered vp trace.
#[derive(Clone, Debug)]
pub struct TripInstance {
    pub info: TripInfo,
    positions: Vec<VehiclePosition>,
}

impl TripInstance {
    /// Validates the trace ordering and assigns each ping a primary direction.
    pub fn new(info: TripInfo, mut positions: Vec<VehiclePosition>) -> Result<Self> {
        for pair in positions.windows(2) {
            if pair[1].vp_idx <= pair[0].vp_idx {
                return Err(SpeedsError::InvalidTrip {
                    trip_id: info.trip_id.clone(),
                    reason: format!(
                        "vp_idx not strictly increasing: {} then {}",
                        pair[0].vp_idx, pair[1].vp_idx
                    ),
                });
            }
            if pair[1].timestamp < pair[0].timestamp {
                return Err(SpeedsError::InvalidTrip {
                    trip_id: info.trip_id.clone(),
                    reason: format!(
                        "timestamps out of order: {} then {}",
                        pair[0].timestamp, pair[1].timestamp
                    ),
                });
            }
        }

        let directions: Vec<Option<PrimaryDirection>> = (0..positions.len())
            .map(|i| {
                let (from, to) = if i == 0 {
                    (0, 1.min(positions.len() - 1))
                } else {
                    (i - 1, i)
                };
                let a = positions[from].location;
                let b = positions[to].location;
                PrimaryDirection::from_displacement(b.x() - a.x(), b.y() - a.y())
            })
            .collect();
        for (vp, direction) in positions.iter_mut().zip(directions) {
            vp.primary_direction = direction;
        }

        Ok(Self { info, positions })
    }

    pub fn trip_id(&self) -> &TripIdentifier {
        &self.info.trip_id
    }

    pub fn positions(&self) -> &[VehiclePosition] {
        &self.positions
    }

    /// `(min_vp_idx, max_vp_idx)` of the trace
    pub fn vp_bounds(&self) -> Option<(u64, u64)> {
        Some((self.positions.first()?.vp_idx, self.positions.last()?.vp_idx))
    }

    pub fn position_by_idx(&self, vp_idx: u64) -> Option<&VehiclePosition> {
        self.positions
            .binary_search_by_key(&vp_idx, |vp| vp.vp_idx)
            .ok()
            .map(|i| &self.positions[i])
    }

    /// Scheduled first departure, falling back to the earliest ping.
    pub fn departure(&self) -> Option<NaiveDateTime> {
        self.info
            .first_departure
            .or_else(|| self.positions.first().map(|vp| vp.timestamp))
    }

    /// The shape this trip ran on, within its operator.
    pub fn shape_key(&self) -> ShapeKey {
        ShapeKey {
            operator_id: self.info.operator_id.clone(),
            shape_id: self.info.shape_id.clone(),
        }
    }

    pub fn route_direction(&self) -> RouteDirectionKey {
        RouteDirectionKey {
            operator_id: self.info.operator_id.clone(),
            route_id: self.info.route_id.clone(),
            direction_id: self.info.direction_id,
        }
    }
}

// ============================================================================
// Stops
// ============================================================================

#[derive(Clone, Debug)]
pub struct Stop {
    pub stop_id: StopIdentifier,
    pub location: Point<f64>,
    pub primary_direction: Option<PrimaryDirection>,
}

/// A stop served by a trip.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TripStop {
    pub trip_id: TripIdentifier,
    pub stop_id: StopIdentifier,
    pub stop_sequence: u32,
}
