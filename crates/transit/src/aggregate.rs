//! Aggregator.
//!
//! Rolls per-(trip, segment) records up to per-group statistics for each of
//! peak, offpeak and all_day. Averages are distance/time weighted:
//! `sum(meters) / sum(seconds)`, never the mean of per-record speeds, so
//! short noisy segments don't dominate.
//!
//! Accumulation is a commutative, associative merge; per-trip partial
//! groups can be combined in any order and give the same result.

use std::collections::{BTreeMap, BTreeSet};

use crate::config::{PipelineConfig, PERCENTILES};
use crate::identifiers::{ShapeIdentifier, TripIdentifier};
use crate::models::entities::RouteDirectionKey;
use crate::models::types::{TimeOfDay, TimePeriod};
use crate::speeds::SegmentTripRecord;

/// Round for presentation.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Linear-interpolated quantile of ascending `sorted` values.
pub fn quantile(sorted: &[f64], q: f64) -> Option<f64> {
    let last = sorted.len().checked_sub(1)?;
    let h = last as f64 * q.clamp(0.0, 1.0);
    let lo = h.floor() as usize;
    let hi = h.ceil() as usize;
    Some(sorted[lo] + (h - lo as f64) * (sorted[hi] - sorted[lo]))
}

/// Whether a record enters aggregation. Excluded records stay in the
/// per-trip table.
pub fn is_aggregatable(record: &SegmentTripRecord, config: &PipelineConfig) -> bool {
    record.speed.is_finite()
        && record.speed <= config.max_speed
        && record.meters_elapsed > 0.0
        && record.sec_elapsed > 0.0
}

/// Full-precision running sums for one group and period.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SpeedAccumulator {
    meters: f64,
    seconds: f64,
    speeds: Vec<f64>,
    trips: BTreeSet<TripIdentifier>,
}

impl SpeedAccumulator {
    pub fn add(&mut self, record: &SegmentTripRecord) {
        self.meters += record.meters_elapsed;
        self.seconds += record.sec_elapsed;
        self.speeds.push(record.speed);
        self.trips.insert(record.trip_id.clone());
    }

    pub fn merge(&mut self, other: SpeedAccumulator) {
        self.meters += other.meters;
        self.seconds += other.seconds;
        self.speeds.extend(other.speeds);
        self.trips.extend(other.trips);
    }

    pub fn n_trips(&self) -> usize {
        self.trips.len()
    }

    /// Weighted speed in the configured unit
    pub fn weighted_speed(&self, config: &PipelineConfig) -> Option<f64> {
        (self.seconds > 0.0).then(|| config.convert_speed(self.meters / self.seconds))
    }
}

/// Aggregated speeds of one group in one period.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct GroupSpeeds<K> {
    pub key: K,
    pub period: TimePeriod,
    pub n_trips: usize,
    pub n_records: usize,
    pub meters_elapsed: f64,
    pub sec_elapsed: f64,
    /// Weighted average, rounded
    pub avg_speed: f64,
    pub p20_speed: f64,
    pub p50_speed: f64,
    pub p80_speed: f64,
}

/// Accumulators keyed by group and period.
#[derive(Clone, Debug)]
pub struct SpeedGroups<K: Ord> {
    groups: BTreeMap<(K, TimePeriod), SpeedAccumulator>,
}

impl<K: Ord> Default for SpeedGroups<K> {
    fn default() -> Self {
        Self {
            groups: BTreeMap::new(),
        }
    }
}

impl<K: Ord + Clone> SpeedGroups<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a record to its period and to all_day. Returns false when the
    /// record is filtered out.
    pub fn add(&mut self, key: K, record: &SegmentTripRecord, config: &PipelineConfig) -> bool {
        if !is_aggregatable(record, config) {
            return false;
        }
        for period in [record.bucket.period, TimePeriod::AllDay] {
            self.groups
                .entry((key.clone(), period))
                .or_default()
                .add(record);
        }
        true
    }

    pub fn merge(mut self, other: SpeedGroups<K>) -> Self {
        for (key, acc) in other.groups {
            self.groups.entry(key).or_default().merge(acc);
        }
        self
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn get(&self, key: &K, period: TimePeriod) -> Option<&SpeedAccumulator> {
        self.groups.get(&(key.clone(), period))
    }

    /// One row per group and period, ordered by key then period.
    pub fn summarize(&self, config: &PipelineConfig) -> Vec<GroupSpeeds<K>> {
        self.groups
            .iter()
            .filter_map(|((key, period), acc)| {
                let avg_speed = acc.weighted_speed(config)?;

                let mut sorted = acc.speeds.clone();
                sorted.sort_by(f64::total_cmp);
                let [p20, p50, p80] = PERCENTILES.map(|q| quantile(&sorted, q).unwrap_or(f64::NAN));

                Some(GroupSpeeds {
                    key: key.clone(),
                    period: *period,
                    n_trips: acc.n_trips(),
                    n_records: acc.speeds.len(),
                    meters_elapsed: acc.meters,
                    sec_elapsed: acc.seconds,
                    avg_speed: round2(avg_speed),
                    p20_speed: round2(p20),
                    p50_speed: round2(p50),
                    p80_speed: round2(p80),
                })
            })
            .collect()
    }
}

/// Weighted speed of a single trip across all its aggregatable records.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct TripAverage {
    pub trip_id: TripIdentifier,
    pub route: RouteDirectionKey,
    pub shape_id: ShapeIdentifier,
    pub time_of_day: TimeOfDay,
    /// Peak or offpeak; a single trip has no all_day row
    pub period: TimePeriod,
    pub n_segments: usize,
    pub meters_elapsed: f64,
    pub sec_elapsed: f64,
    pub avg_speed: f64,
}

/// Per-trip weighted averages, ordered by trip.
pub fn trip_averages(records: &[SegmentTripRecord], config: &PipelineConfig) -> Vec<TripAverage> {
    let mut by_trip: BTreeMap<&TripIdentifier, (&SegmentTripRecord, SpeedAccumulator)> =
        BTreeMap::new();

    for record in records.iter().filter(|r| is_aggregatable(r, config)) {
        by_trip
            .entry(&record.trip_id)
            .or_insert_with(|| (record, SpeedAccumulator::default()))
            .1
            .add(record);
    }

    by_trip
        .into_values()
        .filter_map(|(first, acc)| {
            Some(TripAverage {
                trip_id: first.trip_id.clone(),
                route: first.route.clone(),
                shape_id: first.segment.shape_id.clone(),
                time_of_day: first.bucket.time_of_day,
                period: first.bucket.period,
                n_segments: acc.speeds.len(),
                meters_elapsed: acc.meters,
                sec_elapsed: acc.seconds,
                avg_speed: round2(acc.weighted_speed(config)?),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identifiers::*;
    use crate::models::entities::fixtures::at_seconds;
    use crate::models::entities::SegmentRef;
    use crate::models::time_of_day::TripTimeBucket;
    use crate::models::types::DirectionId;
    use crate::speeds::SpeedEstimate;
    use approx::assert_relative_eq;

    fn record(trip: &str, sequence: u32, meters: f64, seconds: f64, period: TimePeriod) -> SegmentTripRecord {
        let config = PipelineConfig::default();
        SegmentTripRecord {
            trip_id: TripIdentifier::new(trip),
            route: RouteDirectionKey {
                operator_id: OperatorIdentifier::new("op"),
                route_id: RouteIdentifier::new("r1"),
                direction_id: DirectionId::Outbound,
            },
            segment: SegmentRef {
                operator_id: OperatorIdentifier::new("op"),
                shape_id: ShapeIdentifier::new("s1"),
                segment_sequence: sequence,
                segment_id: segment_fingerprint("op", "r1:s1", sequence),
            },
            bucket: TripTimeBucket {
                time_of_day: TimeOfDay::Midday,
                period,
            },
            prior_vp_idx: 0,
            vp_idx: 1,
            prior_timestamp: at_seconds(0),
            timestamp: at_seconds(seconds as i64),
            meters_elapsed: meters,
            sec_elapsed: seconds,
            pct_segment: meters / 1000.0,
            speed: config.convert_speed(meters / seconds),
            estimate: SpeedEstimate::Primary {
                prior_shape_meters: 0.0,
                shape_meters: meters,
            },
        }
    }

    #[test]
    fn test_weighted_average_is_not_mean_of_speeds() {
        let config = PipelineConfig::default();
        let records = vec![
            record("a", 0, 1000.0, 100.0, TimePeriod::Peak),
            record("b", 0, 300.0, 10.0, TimePeriod::Peak),
        ];

        let mut groups = SpeedGroups::new();
        for r in &records {
            assert!(groups.add(r.segment.clone(), r, &config));
        }
        let rows = groups.summarize(&config);

        let weighted = 1300.0 / 110.0 * 2.237;
        let mean = (10.0 * 2.237 + 30.0 * 2.237) / 2.0;

        let peak = rows.iter().find(|r| r.period == TimePeriod::Peak).unwrap();
        assert_relative_eq!(peak.avg_speed, round2(weighted));
        assert!((peak.avg_speed - mean).abs() > 1.0);
        assert_eq!(peak.n_trips, 2);
        assert_eq!(peak.n_records, 2);
    }

    #[test]
    fn test_all_day_is_union_of_periods() {
        let config = PipelineConfig::default();
        let mut groups = SpeedGroups::new();
        for r in [
            record("a", 0, 1000.0, 100.0, TimePeriod::Peak),
            record("b", 0, 1000.0, 200.0, TimePeriod::Offpeak),
        ] {
            groups.add(r.segment.clone(), &r, &config);
        }

        let rows = groups.summarize(&config);
        let periods: Vec<TimePeriod> = rows.iter().map(|r| r.period).collect();
        assert_eq!(
            periods,
            vec![TimePeriod::Peak, TimePeriod::Offpeak, TimePeriod::AllDay]
        );

        let all_day = &rows[2];
        assert_eq!(all_day.n_trips, 2);
        assert_relative_eq!(all_day.meters_elapsed, 2000.0);
        assert_relative_eq!(all_day.sec_elapsed, 300.0);

        let key = record("a", 0, 1.0, 1.0, TimePeriod::Peak).segment;
        let offpeak = groups.get(&key, TimePeriod::Offpeak).unwrap();
        assert_eq!(offpeak.n_trips(), 1);
        assert_relative_eq!(offpeak.weighted_speed(&config).unwrap(), 5.0 * 2.237);
        assert!(groups.get(&key, TimePeriod::AllDay).is_some());
    }

    #[test]
    fn test_merge_is_order_independent() {
        let config = PipelineConfig::default();
        let records = vec![
            record("a", 0, 900.0, 90.0, TimePeriod::Peak),
            record("b", 0, 1000.0, 80.0, TimePeriod::Offpeak),
            record("c", 1, 700.0, 60.0, TimePeriod::Peak),
        ];

        let partial = |rs: &[SegmentTripRecord]| {
            let mut g = SpeedGroups::new();
            for r in rs {
                g.add(r.segment.clone(), r, &config);
            }
            g
        };

        let forward = partial(&records[..1]).merge(partial(&records[1..]));
        let backward = partial(&records[1..]).merge(partial(&records[..1]));
        assert_eq!(forward.summarize(&config), backward.summarize(&config));
        assert_eq!(forward.summarize(&config), partial(&records).summarize(&config));
    }

    #[test]
    fn test_filtered_records_are_not_aggregated() {
        let config = PipelineConfig::default();
        let mut groups = SpeedGroups::new();

        // 50 m/s is ~112 mph
        let too_fast = record("a", 0, 1000.0, 20.0, TimePeriod::Peak);
        let mut standing = record("b", 0, 1.0, 20.0, TimePeriod::Peak);
        standing.meters_elapsed = 0.0;

        assert!(!groups.add(too_fast.segment.clone(), &too_fast, &config));
        assert!(!groups.add(standing.segment.clone(), &standing, &config));
        assert!(groups.is_empty());
        assert!(groups.get(&too_fast.segment, TimePeriod::AllDay).is_none());
    }

    #[test]
    fn test_percentiles() {
        let sorted = [10.0, 20.0, 30.0, 40.0, 50.0];
        assert_relative_eq!(quantile(&sorted, 0.2).unwrap(), 18.0);
        assert_relative_eq!(quantile(&sorted, 0.5).unwrap(), 30.0);
        assert_relative_eq!(quantile(&sorted, 0.8).unwrap(), 42.0);
        assert_eq!(quantile(&[7.0], 0.8), Some(7.0));
        assert_eq!(quantile(&[], 0.5), None);
    }

    #[test]
    fn test_rounding() {
        assert_eq!(round2(22.3749), 22.37);
        assert_eq!(round2(18.6417), 18.64);
    }

    #[test]
    fn test_trip_averages() {
        let config = PipelineConfig::default();
        let records = vec![
            record("a", 0, 1000.0, 100.0, TimePeriod::Peak),
            record("a", 1, 500.0, 100.0, TimePeriod::Peak),
            record("b", 0, 1000.0, 50.0, TimePeriod::Offpeak),
        ];

        let averages = trip_averages(&records, &config);
        assert_eq!(averages.len(), 2);
        assert_eq!(averages[0].trip_id.as_str(), "a");
        assert_eq!(averages[0].n_segments, 2);
        assert_relative_eq!(averages[0].avg_speed, round2(7.5 * 2.237));
        assert_eq!(averages[1].period, TimePeriod::Offpeak);
    }
}
