//! Speed derivation and stability recovery.
//!
//! Per (trip, segment):
//! 1. measure the linear-referenced distance and elapsed time between the
//!    boundary pings; zero elapsed time drops the pair
//! 2. accept the measurement when it spans at least the stability threshold
//!    of the segment's length
//! 3. otherwise re-measure against a neighboring ping of the full trace using
//!    straight-line distance, or drop the pair when no neighbor works
//!
//! Both outcomes share [`SegmentTripRecord`]; [`SpeedEstimate`] says which
//! path produced it.

use chrono::NaiveDateTime;
use log::debug;

use crate::config::PipelineConfig;
use crate::identifiers::TripIdentifier;
use crate::linear_ref::project_point;
use crate::matching::BoundaryPings;
use crate::models::entities::{RouteDirectionKey, Segment, SegmentRef, TripInstance, VehiclePosition};
use crate::models::time_of_day::TripTimeBucket;
use crate::pipeline::RunStats;
use crate::spatial::queries::planar_distance;

/// How a record's distance was measured.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[cfg_attr(feature = "serde", serde(tag = "estimate", rename_all = "snake_case"))]
pub enum SpeedEstimate {
    /// Linear-referenced distance between the segment's boundary pings
    Primary {
        prior_shape_meters: f64,
        shape_meters: f64,
    },
    /// Straight-line distance to a neighboring ping, after the primary
    /// measurement fell below the stability threshold
    Recovered { unstable_pct_segment: f64 },
}

/// Speed of one trip across one segment.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct SegmentTripRecord {
    pub trip_id: TripIdentifier,
    pub route: RouteDirectionKey,
    pub segment: SegmentRef,
    pub bucket: TripTimeBucket,
    pub prior_vp_idx: u64,
    pub vp_idx: u64,
    pub prior_timestamp: NaiveDateTime,
    pub timestamp: NaiveDateTime,
    pub meters_elapsed: f64,
    pub sec_elapsed: f64,
    /// `meters_elapsed` over the segment's length
    pub pct_segment: f64,
    /// In the configured unit
    pub speed: f64,
    pub estimate: SpeedEstimate,
}

impl SegmentTripRecord {
    pub fn is_recovered(&self) -> bool {
        matches!(self.estimate, SpeedEstimate::Recovered { .. })
    }
}

/// Whether a measurement spans enough of its segment to be trusted.
pub fn is_stable(pct_segment: f64, threshold: f64) -> bool {
    pct_segment >= threshold
}

/// Absolute seconds between two timestamps.
pub fn elapsed_seconds(a: NaiveDateTime, b: NaiveDateTime) -> f64 {
    ((b - a).num_milliseconds() as f64 / 1000.0).abs()
}

/// Neighbor of `vp_idx` used to re-measure an unstable record.
///
/// Prefers the previous index and falls back to the next one at the start
/// of a trace. Never leaves `[min_vp_idx, max_vp_idx]` and never returns
/// `vp_idx` itself.
pub fn recovery_neighbor(vp_idx: u64, (min_vp_idx, max_vp_idx): (u64, u64)) -> Option<u64> {
    match vp_idx.checked_sub(1) {
        Some(prior) if prior >= min_vp_idx && prior <= max_vp_idx => Some(prior),
        _ => vp_idx
            .checked_add(1)
            .filter(|&next| next >= min_vp_idx && next <= max_vp_idx),
    }
}

struct Measurement<'a> {
    prior: &'a VehiclePosition,
    current: &'a VehiclePosition,
    meters_elapsed: f64,
    estimate: SpeedEstimate,
}

fn build_record(
    trip: &TripInstance,
    segment: &Segment,
    bucket: TripTimeBucket,
    measurement: Measurement<'_>,
    config: &PipelineConfig,
) -> Option<SegmentTripRecord> {
    let sec_elapsed = elapsed_seconds(measurement.prior.timestamp, measurement.current.timestamp);
    if sec_elapsed == 0.0 {
        return None;
    }

    let meters_elapsed = measurement.meters_elapsed;
    Some(SegmentTripRecord {
        trip_id: trip.trip_id().clone(),
        route: trip.route_direction(),
        segment: segment.segment_ref(),
        bucket,
        prior_vp_idx: measurement.prior.vp_idx,
        vp_idx: measurement.current.vp_idx,
        prior_timestamp: measurement.prior.timestamp,
        timestamp: measurement.current.timestamp,
        meters_elapsed,
        sec_elapsed,
        pct_segment: meters_elapsed / segment.length_m,
        speed: config.convert_speed(meters_elapsed / sec_elapsed),
        estimate: measurement.estimate,
    })
}

/// Steps 1 and 2: measure between the boundary pings.
fn primary_record(
    trip: &TripInstance,
    segment: &Segment,
    boundary: &BoundaryPings,
    bucket: TripTimeBucket,
    config: &PipelineConfig,
) -> Option<SegmentTripRecord> {
    let positions = trip.positions();
    let prior = positions.get(boundary.enter)?;
    let current = positions.get(boundary.exit)?;

    let prior_shape_meters = project_point(&prior.location, &segment.geometry);
    let shape_meters = project_point(&current.location, &segment.geometry);

    build_record(
        trip,
        segment,
        bucket,
        Measurement {
            prior,
            current,
            meters_elapsed: (shape_meters - prior_shape_meters).abs(),
            estimate: SpeedEstimate::Primary {
                prior_shape_meters,
                shape_meters,
            },
        },
        config,
    )
}

/// Step 3: re-measure an unstable record against the exit ping's neighbor.
fn recover(
    trip: &TripInstance,
    segment: &Segment,
    unstable: &SegmentTripRecord,
    config: &PipelineConfig,
) -> Option<SegmentTripRecord> {
    let bounds = trip.vp_bounds()?;
    let current = trip.position_by_idx(unstable.vp_idx)?;
    let neighbor = trip.position_by_idx(recovery_neighbor(unstable.vp_idx, bounds)?)?;

    build_record(
        trip,
        segment,
        unstable.bucket,
        Measurement {
            prior: neighbor,
            current,
            meters_elapsed: planar_distance(neighbor.location, current.location),
            estimate: SpeedEstimate::Recovered {
                unstable_pct_segment: unstable.pct_segment,
            },
        },
        config,
    )
}

/// Derive one record per matched segment of a trip.
///
/// Pairs that yield no usable measurement are absent from the result and
/// counted in `stats`.
pub fn derive_speeds(
    trip: &TripInstance,
    segments: &[Segment],
    boundaries: &[BoundaryPings],
    bucket: TripTimeBucket,
    config: &PipelineConfig,
    stats: &mut RunStats,
) -> Vec<SegmentTripRecord> {
    let mut records = Vec::with_capacity(boundaries.len());

    for boundary in boundaries {
        let Some(segment) = segments.get(boundary.segment) else {
            continue;
        };

        let Some(record) = primary_record(trip, segment, boundary, bucket, config) else {
            stats.records_dropped_degenerate += 1;
            continue;
        };

        if is_stable(record.pct_segment, config.stability_threshold) {
            stats.records_stable += 1;
            records.push(record);
            continue;
        }

        match recover(trip, segment, &record, config) {
            Some(recovered) => {
                stats.records_recovered += 1;
                records.push(recovered);
            }
            None => {
                debug!(
                    "Trip {} segment {}: unstable ({:.3} of segment) and unrecoverable",
                    trip.trip_id(),
                    segment.segment_id,
                    record.pct_segment
                );
                stats.records_dropped_unrecoverable += 1;
            }
        }
    }

    records
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matching::SegmentMatcher;
    use crate::models::entities::fixtures::*;
    use crate::models::time_of_day::TripTimeBucket;
    use crate::segments::cut_shape;
    use approx::assert_relative_eq;

    fn run(pings: &[(f64, f64, i64)]) -> (Vec<SegmentTripRecord>, RunStats) {
        let config = PipelineConfig::default();
        let matcher = SegmentMatcher::new(cut_shape(&straight_shape(2000.0), &config));
        let trip = trip("t1", pings);
        let bucket = TripTimeBucket::new(at_seconds(0), &config.peak_windows);

        let mut stats = RunStats::default();
        let boundaries = matcher.match_trip(&trip);
        let records = derive_speeds(
            &trip,
            matcher.segments(),
            &boundaries,
            bucket,
            &config,
            &mut stats,
        );
        (records, stats)
    }

    #[test]
    fn test_two_stable_segments() {
        let (records, stats) = run(&[(0.0, 0.0, 0), (1000.0, 0.0, 100), (2000.0, 0.0, 220)]);

        assert_eq!(records.len(), 2);
        assert_eq!(stats.records_stable, 2);

        assert_eq!(records[0].segment.segment_sequence, 0);
        assert_relative_eq!(records[0].meters_elapsed, 1000.0);
        assert_relative_eq!(records[0].sec_elapsed, 100.0);
        assert_relative_eq!(records[0].pct_segment, 1.0);
        assert_relative_eq!(records[0].speed, 10.0 * 2.237);

        assert_eq!(records[1].segment.segment_sequence, 1);
        assert_relative_eq!(records[1].sec_elapsed, 120.0);
        assert_relative_eq!(records[1].speed, 1000.0 / 120.0 * 2.237);

        for record in &records {
            assert!(!record.is_recovered());
            assert!(record.speed >= 0.0 && record.speed.is_finite());
        }
    }

    #[test]
    fn test_unstable_record_recovers_from_adjacent_ping() {
        // The bus re-enters segment 0 after a GPS excursion: its only two
        // pings inside the segment are 5 m apart.
        let (records, stats) = run(&[
            (500.0, 0.0, 0),
            (502.0, 200.0, 20),
            (505.0, 0.0, 40),
        ]);

        assert_eq!(stats.records_recovered, 1);
        assert_eq!(records.len(), 1);

        let record = &records[0];
        assert!(record.is_recovered());
        assert_eq!((record.prior_vp_idx, record.vp_idx), (1, 2));
        match record.estimate {
            SpeedEstimate::Recovered {
                unstable_pct_segment,
            } => assert_relative_eq!(unstable_pct_segment, 0.005, epsilon = 1e-9),
            SpeedEstimate::Primary { .. } => panic!("expected a recovered estimate"),
        }
        assert_relative_eq!(record.meters_elapsed, (9.0f64 + 40_000.0).sqrt());
        assert_relative_eq!(record.sec_elapsed, 20.0);
    }

    #[test]
    fn test_two_ping_trip_recovery_stays_in_bounds() {
        let (records, _) = run(&[(500.0, 0.0, 0), (505.0, 0.0, 30)]);

        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert!(record.is_recovered());
        assert_ne!(record.prior_vp_idx, record.vp_idx);
        assert!(record.prior_vp_idx <= 1 && record.vp_idx <= 1);
    }

    #[test]
    fn test_single_ping_segment_is_dropped() {
        let (records, stats) = run(&[(500.0, 0.0, 0), (1500.0, 300.0, 60)]);
        assert!(records.is_empty());
        assert_eq!(stats.records_dropped_degenerate, 1);
    }

    #[test]
    fn test_zero_elapsed_recovery_is_dropped() {
        let (records, stats) = run(&[(500.0, 0.0, 0), (501.0, 0.0, 10), (502.0, 0.0, 10)]);
        assert!(records.is_empty());
        assert_eq!(stats.records_dropped_unrecoverable, 1);
    }

    #[test]
    fn test_recovery_neighbor_bounds() {
        assert_eq!(recovery_neighbor(5, (0, 9)), Some(4));
        assert_eq!(recovery_neighbor(0, (0, 9)), Some(1));
        assert_eq!(recovery_neighbor(3, (3, 9)), Some(4));
        assert_eq!(recovery_neighbor(3, (3, 3)), None);
        assert_eq!(recovery_neighbor(1, (0, 1)), Some(0));
        assert_eq!(recovery_neighbor(0, (0, 1)), Some(1));
        assert_eq!(recovery_neighbor(u64::MAX, (u64::MAX, u64::MAX)), None);
    }

    #[test]
    fn test_stability_boundary() {
        assert!(is_stable(0.3, 0.3));
        assert!(!is_stable(0.2999, 0.3));
    }
}
