use anyhow::{Context, Result};
use geojson::{Feature, FeatureCollection, GeoJson, Geometry, Value};
use serde::Serialize;
use std::path::Path;

use transit_speeds::aggregate::{GroupSpeeds, TripAverage};
use transit_speeds::prelude::*;

use crate::input::TIMESTAMP_FORMAT;

// ============================================================================
// Flat rows
// ============================================================================

#[derive(Debug, Serialize)]
pub struct SegmentTripRow {
    pub trip_id: String,
    pub operator_id: String,
    pub route_id: String,
    pub direction_id: String,
    pub shape_id: String,
    pub segment_sequence: u32,
    pub segment_id: String,
    pub time_of_day: String,
    pub period: String,
    pub prior_vp_idx: u64,
    pub vp_idx: u64,
    pub prior_timestamp: String,
    pub timestamp: String,
    pub prior_shape_meters: Option<f64>,
    pub shape_meters: Option<f64>,
    pub meters_elapsed: f64,
    pub sec_elapsed: f64,
    pub pct_segment: f64,
    pub speed: f64,
    pub flag_recalculated: u8,
}

impl From<&SegmentTripRecord> for SegmentTripRow {
    fn from(r: &SegmentTripRecord) -> Self {
        let (prior_shape_meters, shape_meters) = match r.estimate {
            SpeedEstimate::Primary {
                prior_shape_meters,
                shape_meters,
            } => (Some(prior_shape_meters), Some(shape_meters)),
            SpeedEstimate::Recovered { .. } => (None, None),
        };

        Self {
            trip_id: r.trip_id.to_string(),
            operator_id: r.route.operator_id.to_string(),
            route_id: r.route.route_id.to_string(),
            direction_id: r.route.direction_id.to_string(),
            shape_id: r.segment.shape_id.to_string(),
            segment_sequence: r.segment.segment_sequence,
            segment_id: r.segment.segment_id.to_string(),
            time_of_day: r.bucket.time_of_day.to_string(),
            period: r.bucket.period.to_string(),
            prior_vp_idx: r.prior_vp_idx,
            vp_idx: r.vp_idx,
            prior_timestamp: r.prior_timestamp.format(TIMESTAMP_FORMAT).to_string(),
            timestamp: r.timestamp.format(TIMESTAMP_FORMAT).to_string(),
            prior_shape_meters,
            shape_meters,
            meters_elapsed: r.meters_elapsed,
            sec_elapsed: r.sec_elapsed,
            pct_segment: r.pct_segment,
            speed: r.speed,
            flag_recalculated: u8::from(r.is_recovered()),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SegmentSpeedRow {
    pub operator_id: String,
    pub shape_id: String,
    pub segment_sequence: u32,
    pub segment_id: String,
    pub period: String,
    pub n_trips: usize,
    pub avg_speed: f64,
    pub p20_speed: f64,
    pub p50_speed: f64,
    pub p80_speed: f64,
}

impl From<&GroupSpeeds<SegmentRef>> for SegmentSpeedRow {
    fn from(g: &GroupSpeeds<SegmentRef>) -> Self {
        Self {
            operator_id: g.key.operator_id.to_string(),
            shape_id: g.key.shape_id.to_string(),
            segment_sequence: g.key.segment_sequence,
            segment_id: g.key.segment_id.to_string(),
            period: g.period.to_string(),
            n_trips: g.n_trips,
            avg_speed: g.avg_speed,
            p20_speed: g.p20_speed,
            p50_speed: g.p50_speed,
            p80_speed: g.p80_speed,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct RouteDirectionSpeedRow {
    pub operator_id: String,
    pub route_id: String,
    pub direction_id: String,
    pub period: String,
    pub n_trips: usize,
    pub meters_elapsed: f64,
    pub sec_elapsed: f64,
    pub avg_speed: f64,
}

impl From<&GroupSpeeds<RouteDirectionKey>> for RouteDirectionSpeedRow {
    fn from(g: &GroupSpeeds<RouteDirectionKey>) -> Self {
        Self {
            operator_id: g.key.operator_id.to_string(),
            route_id: g.key.route_id.to_string(),
            direction_id: g.key.direction_id.to_string(),
            period: g.period.to_string(),
            n_trips: g.n_trips,
            meters_elapsed: g.meters_elapsed,
            sec_elapsed: g.sec_elapsed,
            avg_speed: g.avg_speed,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct TripSpeedRow {
    pub trip_id: String,
    pub operator_id: String,
    pub route_id: String,
    pub direction_id: String,
    pub shape_id: String,
    pub time_of_day: String,
    pub period: String,
    pub n_segments: usize,
    pub avg_speed: f64,
}

impl From<&TripAverage> for TripSpeedRow {
    fn from(t: &TripAverage) -> Self {
        Self {
            trip_id: t.trip_id.to_string(),
            operator_id: t.route.operator_id.to_string(),
            route_id: t.route.route_id.to_string(),
            direction_id: t.route.direction_id.to_string(),
            shape_id: t.shape_id.to_string(),
            time_of_day: t.time_of_day.to_string(),
            period: t.period.to_string(),
            n_segments: t.n_segments,
            avg_speed: t.avg_speed,
        }
    }
}

/// One row per trio entry, so interpolation consumers can pivot freely.
#[derive(Debug, Serialize)]
pub struct StopAnchorRow {
    pub trip_id: String,
    pub stop_id: String,
    pub stop_sequence: u32,
    pub nearest_vp_idx: u64,
    pub trio_position: usize,
    pub vp_idx: u64,
    pub location_timestamp: String,
    pub lon: f64,
    pub lat: f64,
    pub stop_meters: Option<f64>,
    pub nearest_k_vp_idx: String,
}

pub fn stop_anchor_rows(anchor: &StopAnchorRecord, plane: &LocalTangentPlane) -> Vec<StopAnchorRow> {
    let nearest_k = anchor
        .nearest_k_vp_idx
        .iter()
        .map(u64::to_string)
        .collect::<Vec<_>>()
        .join(";");

    anchor
        .trio
        .iter()
        .enumerate()
        .map(|(i, entry)| {
            let (lon, lat) = plane.unproject(entry.location.x(), entry.location.y());
            StopAnchorRow {
                trip_id: anchor.trip_id.to_string(),
                stop_id: anchor.stop_id.to_string(),
                stop_sequence: anchor.stop_sequence,
                nearest_vp_idx: anchor.nearest_vp_idx,
                trio_position: i,
                vp_idx: entry.vp_idx,
                location_timestamp: entry.timestamp.format(TIMESTAMP_FORMAT).to_string(),
                lon,
                lat,
                stop_meters: anchor.stop_meters,
                nearest_k_vp_idx: nearest_k.clone(),
            }
        })
        .collect()
}

/// Write rows as a CSV table
pub fn write_csv<T: Serialize>(rows: impl IntoIterator<Item = T>, output_path: &Path) -> Result<usize> {
    let mut writer = csv::Writer::from_path(output_path)
        .with_context(|| format!("Failed to create {}", output_path.display()))?;

    let mut count = 0;
    for row in rows {
        writer
            .serialize(row)
            .with_context(|| format!("Failed to write row to {}", output_path.display()))?;
        count += 1;
    }
    writer
        .flush()
        .with_context(|| format!("Failed to flush {}", output_path.display()))?;

    log::info!("  Wrote {} rows to {}", count, output_path.display());
    Ok(count)
}

// ============================================================================
// Segment GeoJSON
// ============================================================================

/// Create a GeoJSON Feature from a segment, unprojected back to WGS84
fn segment_to_feature(segment: &Segment, plane: &LocalTangentPlane) -> Feature {
    let coords: Vec<Vec<f64>> = plane
        .unproject_line(&segment.geometry)
        .coords()
        .map(|c| vec![c.x, c.y])
        .collect();

    let mut properties = serde_json::Map::new();
    properties.insert("segment_id".to_string(), serde_json::json!(segment.segment_id.to_string()));
    properties.insert("operator_id".to_string(), serde_json::json!(segment.operator_id.as_str()));
    properties.insert("route_id".to_string(), serde_json::json!(segment.route_id.as_str()));
    properties.insert(
        "direction_id".to_string(),
        serde_json::json!(segment.direction_id.to_string()),
    );
    properties.insert("shape_id".to_string(), serde_json::json!(segment.shape_id.as_str()));
    properties.insert(
        "segment_sequence".to_string(),
        serde_json::json!(segment.segment_sequence),
    );
    properties.insert("start_meters".to_string(), serde_json::json!(segment.start_meters));
    properties.insert("length_m".to_string(), serde_json::json!(segment.length_m));

    Feature {
        bbox: None,
        geometry: Some(Geometry::new(Value::LineString(coords))),
        id: None,
        properties: Some(properties),
        foreign_members: None,
    }
}

pub fn segments_to_geojson(segments: &[Segment], plane: &LocalTangentPlane) -> GeoJson {
    GeoJson::from(FeatureCollection {
        bbox: None,
        features: segments
            .iter()
            .map(|s| segment_to_feature(s, plane))
            .collect(),
        foreign_members: None,
    })
}

/// Write the segment table to a GeoJSON file
pub fn write_segments_geojson(
    segments: &[Segment],
    plane: &LocalTangentPlane,
    output_path: &Path,
) -> Result<()> {
    let geojson = segments_to_geojson(segments, plane);
    let json_string = serde_json::to_string(&geojson).context("Failed to serialize GeoJSON")?;

    std::fs::write(output_path, json_string)
        .with_context(|| format!("Failed to write GeoJSON to {}", output_path.display()))?;

    log::info!(
        "  Wrote {} segments to {}",
        segments.len(),
        output_path.display()
    );
    Ok(())
}
