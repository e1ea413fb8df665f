//! Stop-anchor matcher.
//!
//! Finds the ping of a trip nearest each stop it serves and the bracketing
//! "trio" of pings around it. Interpolating an arrival time from the trio is
//! left to consumers.

use std::ops::Range;

use chrono::NaiveDateTime;
use geo::Point;
use rstar::RTree;

use crate::identifiers::{StopIdentifier, TripIdentifier};
use crate::linear_ref::stop_meters;
use crate::models::entities::{Shape, Stop, TripInstance, TripStop};
use crate::models::types::PrimaryDirection;
use crate::spatial::index::TracePointNode;

/// Spatial index over one trip's trace.
///
/// Built when the trip's stops are anchored and dropped afterwards; it
/// borrows the trip and is never shared.
pub struct TraceIndex<'a> {
    trip: &'a TripInstance,
    tree: RTree<TracePointNode>,
}

impl<'a> TraceIndex<'a> {
    pub fn new(trip: &'a TripInstance) -> Self {
        let nodes = trip
            .positions()
            .iter()
            .enumerate()
            .map(|(position, vp)| TracePointNode::new(vp.location, position, vp.primary_direction))
            .collect();

        Self {
            trip,
            tree: RTree::bulk_load(nodes),
        }
    }

    pub fn trip(&self) -> &'a TripInstance {
        self.trip
    }

    /// Trace position of the ping closest to `point`.
    ///
    /// With a stop direction, pings heading the opposite way are skipped;
    /// pings with no direction are always candidates.
    pub fn nearest(&self, point: &Point<f64>, direction: Option<PrimaryDirection>) -> Option<usize> {
        let excluded = direction.map(PrimaryDirection::opposite);
        self.tree
            .nearest_neighbor_iter(&[point.x(), point.y()])
            .find(|node| excluded.is_none() || node.direction != excluded)
            .map(|node| node.position)
    }

    /// Up to `k` distinct trace positions ordered by distance to `point`,
    /// under the same direction filter as [`TraceIndex::nearest`].
    pub fn nearest_k(
        &self,
        point: &Point<f64>,
        direction: Option<PrimaryDirection>,
        k: usize,
    ) -> Vec<usize> {
        let excluded = direction.map(PrimaryDirection::opposite);
        self.tree
            .nearest_neighbor_iter(&[point.x(), point.y()])
            .filter(|node| excluded.is_none() || node.direction != excluded)
            .take(k)
            .map(|node| node.position)
            .collect()
    }
}

/// Trace positions bracketing `nearest` in a trace of `len` pings.
pub fn trio_bounds(len: usize, nearest: usize) -> Range<usize> {
    if len <= 2 {
        0..len
    } else if nearest == 0 {
        0..3
    } else if nearest >= len - 1 {
        len - 3..len
    } else {
        nearest - 1..nearest + 2
    }
}

/// One ping of a trio.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct TrioEntry {
    pub vp_idx: u64,
    pub timestamp: NaiveDateTime,
    #[cfg_attr(feature = "serde", serde(skip))]
    pub location: Point<f64>,
}

#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct StopAnchorRecord {
    pub trip_id: TripIdentifier,
    pub stop_id: StopIdentifier,
    pub stop_sequence: u32,
    /// Position of the nearest ping in the trip's trace
    pub nearest_position: usize,
    pub nearest_vp_idx: u64,
    /// 1 to 3 pings, in trace order
    pub trio: Vec<TrioEntry>,
    /// vp_idx of the k nearest pings, closest first
    pub nearest_k_vp_idx: Vec<u64>,
    /// Stop projected onto the trip's full shape
    pub stop_meters: Option<f64>,
}

/// Anchor one stop served by the trip. `None` when no ping qualifies.
pub fn anchor_stop(
    index: &TraceIndex<'_>,
    stop: &Stop,
    trip_stop: &TripStop,
    shape: Option<&Shape>,
    nearest_k: usize,
) -> Option<StopAnchorRecord> {
    let positions = index.trip().positions();
    let nearest = index.nearest(&stop.location, stop.primary_direction)?;

    let trio = positions[trio_bounds(positions.len(), nearest)]
        .iter()
        .map(|vp| TrioEntry {
            vp_idx: vp.vp_idx,
            timestamp: vp.timestamp,
            location: vp.location,
        })
        .collect();

    let nearest_k_vp_idx = index
        .nearest_k(&stop.location, stop.primary_direction, nearest_k)
        .into_iter()
        .map(|position| positions[position].vp_idx)
        .collect();

    Some(StopAnchorRecord {
        trip_id: trip_stop.trip_id.clone(),
        stop_id: stop.stop_id.clone(),
        stop_sequence: trip_stop.stop_sequence,
        nearest_position: nearest,
        nearest_vp_idx: positions[nearest].vp_idx,
        trio,
        nearest_k_vp_idx,
        stop_meters: shape.map(|shape| stop_meters(stop, shape)),
    })
}
