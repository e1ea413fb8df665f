//! Staged batch run over one analysis date.
//!
//! 1. validate configuration and required tables
//! 2. cut every shape into segments and index them
//! 3. per trip, in parallel: match, derive speeds, anchor stops
//! 4. merge per-trip outputs and aggregate
//!
//! Per-trip work shares nothing mutable; a trip that cannot be processed is
//! logged and skipped without affecting the others.

use std::collections::HashMap;

use log::{debug, info, warn};

use crate::aggregate::{trip_averages, GroupSpeeds, SpeedGroups, TripAverage};
use crate::anchors::{anchor_stop, StopAnchorRecord, TraceIndex};
use crate::config::PipelineConfig;
use crate::matching::SegmentMatcher;
use crate::models::entities::{RouteDirectionKey, Segment, SegmentRef, ShapeKey, TripInstance};
use crate::models::time_of_day::TripTimeBucket;
use crate::models::traits::InputTables;
use crate::models::types::{Result, SpeedsError};
use crate::segments::cut_shape;
use crate::speeds::{derive_speeds, SegmentTripRecord};

/// Counters for one run. `merge` is associative and commutative.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RunStats {
    pub shapes: usize,
    pub segments: usize,
    pub trips_processed: usize,
    pub trips_skipped: usize,
    pub records_stable: usize,
    pub records_recovered: usize,
    pub records_dropped_degenerate: usize,
    pub records_dropped_unrecoverable: usize,
    /// Kept in the per-trip table but left out of aggregation
    pub records_not_aggregated: usize,
    pub anchors: usize,
    pub anchors_missing: usize,
}

impl RunStats {
    pub fn merge(mut self, other: RunStats) -> Self {
        self.shapes += other.shapes;
        self.segments += other.segments;
        self.trips_processed += other.trips_processed;
        self.trips_skipped += other.trips_skipped;
        self.records_stable += other.records_stable;
        self.records_recovered += other.records_recovered;
        self.records_dropped_degenerate += other.records_dropped_degenerate;
        self.records_dropped_unrecoverable += other.records_dropped_unrecoverable;
        self.records_not_aggregated += other.records_not_aggregated;
        self.anchors += other.anchors;
        self.anchors_missing += other.anchors_missing;
        self
    }

    pub fn log_summary(&self) {
        info!("=== Run Statistics ===");
        info!("Shapes: {} ({} segments)", self.shapes, self.segments);
        info!("Trips processed: {}", self.trips_processed);
        info!("Stable records: {}", self.records_stable);
        info!("Recovered records: {}", self.records_recovered);
        info!("Stop anchors: {}", self.anchors);
        if self.trips_skipped > 0 {
            warn!("Trips skipped: {}", self.trips_skipped);
        }
        if self.records_dropped_degenerate > 0 {
            info!(
                "Dropped (zero elapsed time): {}",
                self.records_dropped_degenerate
            );
        }
        if self.records_dropped_unrecoverable > 0 {
            info!(
                "Dropped (unstable, no usable neighbor): {}",
                self.records_dropped_unrecoverable
            );
        }
        if self.records_not_aggregated > 0 {
            info!(
                "Excluded from aggregation (speed or distance filter): {}",
                self.records_not_aggregated
            );
        }
        if self.anchors_missing > 0 {
            info!("Stops without an anchor: {}", self.anchors_missing);
        }
    }
}

/// Every output table of a run, sorted deterministically.
#[derive(Clone, Debug)]
pub struct DayOutputs {
    pub segments: Vec<Segment>,
    pub segment_trip_speeds: Vec<SegmentTripRecord>,
    pub segment_speeds: Vec<GroupSpeeds<SegmentRef>>,
    pub route_direction_speeds: Vec<GroupSpeeds<RouteDirectionKey>>,
    pub trip_speeds: Vec<TripAverage>,
    pub stop_anchors: Vec<StopAnchorRecord>,
    pub stats: RunStats,
}

/// Output of one trip, combined across trips with [`TripOutcome::merge`].
#[derive(Default)]
struct TripOutcome {
    records: Vec<SegmentTripRecord>,
    anchors: Vec<StopAnchorRecord>,
    by_segment: SpeedGroups<SegmentRef>,
    by_route_direction: SpeedGroups<RouteDirectionKey>,
    stats: RunStats,
}

impl TripOutcome {
    fn merge(mut self, other: TripOutcome) -> Self {
        self.records.extend(other.records);
        self.anchors.extend(other.anchors);
        self.by_segment = self.by_segment.merge(other.by_segment);
        self.by_route_direction = self.by_route_direction.merge(other.by_route_direction);
        self.stats = self.stats.merge(other.stats);
        self
    }

    fn skipped() -> Self {
        Self {
            stats: RunStats {
                trips_skipped: 1,
                ..Default::default()
            },
            ..Default::default()
        }
    }
}

fn process_trip(
    trip: &TripInstance,
    matchers: &HashMap<ShapeKey, SegmentMatcher>,
    inputs: &impl InputTables,
    config: &PipelineConfig,
) -> TripOutcome {
    let shape_key = trip.shape_key();
    let Some(matcher) = matchers.get(&shape_key) else {
        warn!(
            "Trip {} references unknown shape {} of {}, skipping",
            trip.trip_id(),
            shape_key.shape_id,
            shape_key.operator_id
        );
        return TripOutcome::skipped();
    };
    let Some(departure) = trip.departure() else {
        debug!("Trip {} has no departure and no pings, skipping", trip.trip_id());
        return TripOutcome::skipped();
    };

    let mut outcome = TripOutcome::default();
    outcome.stats.trips_processed = 1;

    // Speeds
    let bucket = TripTimeBucket::new(departure, &config.peak_windows);
    let boundaries = matcher.match_trip(trip);
    let records = derive_speeds(
        trip,
        matcher.segments(),
        &boundaries,
        bucket,
        config,
        &mut outcome.stats,
    );

    let route = trip.route_direction();
    for record in &records {
        let kept = outcome
            .by_segment
            .add(record.segment.clone(), record, config);
        outcome.by_route_direction.add(route.clone(), record, config);
        if !kept {
            outcome.stats.records_not_aggregated += 1;
        }
    }
    outcome.records = records;

    // Stop anchors
    let trip_stops = inputs.trip_stops(trip.trip_id());
    if !trip_stops.is_empty() && !trip.positions().is_empty() {
        let index = TraceIndex::new(trip);
        let shape = inputs.get_shape(&shape_key);

        for trip_stop in trip_stops {
            let anchor = inputs
                .get_stop(&trip_stop.stop_id)
                .and_then(|stop| anchor_stop(&index, stop, trip_stop, shape, config.nearest_k));
            match anchor {
                Some(anchor) => outcome.anchors.push(anchor),
                None => {
                    debug!(
                        "Trip {} stop {}: no anchor",
                        trip.trip_id(),
                        trip_stop.stop_id
                    );
                    outcome.stats.anchors_missing += 1;
                }
            }
        }
        outcome.stats.anchors = outcome.anchors.len();
    }

    outcome
}

fn process_trips(
    trips: &[TripInstance],
    matchers: &HashMap<ShapeKey, SegmentMatcher>,
    inputs: &impl InputTables,
    config: &PipelineConfig,
) -> TripOutcome {
    #[cfg(feature = "parallel")]
    {
        use rayon::prelude::*;
        trips
            .par_iter()
            .map(|trip| process_trip(trip, matchers, inputs, config))
            .reduce(TripOutcome::default, TripOutcome::merge)
    }

    #[cfg(not(feature = "parallel"))]
    {
        trips
            .iter()
            .map(|trip| process_trip(trip, matchers, inputs, config))
            .fold(TripOutcome::default(), TripOutcome::merge)
    }
}

/// Run every stage over one analysis date's tables.
///
/// Fails only on invalid configuration or an empty shapes/trips table.
pub fn run_day(inputs: &impl InputTables, config: &PipelineConfig) -> Result<DayOutputs> {
    config.validate()?;
    if inputs.shapes().is_empty() {
        return Err(SpeedsError::MissingInput("shapes"));
    }
    if inputs.trips().is_empty() {
        return Err(SpeedsError::MissingInput("trips"));
    }

    // Stage: segments
    let mut matchers: HashMap<ShapeKey, SegmentMatcher> = HashMap::new();
    let mut segments = Vec::new();
    for shape in inputs.shapes() {
        let key = shape.key();
        if matchers.contains_key(&key) {
            continue;
        }
        let cut = cut_shape(shape, config);
        segments.extend(cut.iter().cloned());
        matchers.insert(key, SegmentMatcher::new(cut));
    }
    info!(
        "Cut {} shapes into {} segments",
        matchers.len(),
        segments.len()
    );

    // Stage: per-trip
    let trips = inputs.trips();
    info!("Processing {} trips...", trips.len());
    let outcome = process_trips(trips, &matchers, inputs, config);

    // Stage: aggregate
    let mut stats = outcome.stats;
    stats.shapes = matchers.len();
    stats.segments = segments.len();

    let mut segment_trip_speeds = outcome.records;
    segment_trip_speeds.sort_by(|a, b| {
        (&a.trip_id, &a.segment).cmp(&(&b.trip_id, &b.segment))
    });

    let mut stop_anchors = outcome.anchors;
    stop_anchors.sort_by(|a, b| {
        (&a.trip_id, a.stop_sequence, &a.stop_id).cmp(&(&b.trip_id, b.stop_sequence, &b.stop_id))
    });

    let segment_speeds = outcome.by_segment.summarize(config);
    let route_direction_speeds = outcome.by_route_direction.summarize(config);
    let trip_speeds = trip_averages(&segment_trip_speeds, config);
    info!(
        "Aggregated {} segment rows, {} route-direction rows",
        segment_speeds.len(),
        route_direction_speeds.len()
    );

    Ok(DayOutputs {
        segments,
        segment_trip_speeds,
        segment_speeds,
        route_direction_speeds,
        trip_speeds,
        stop_anchors,
        stats,
    })
}
