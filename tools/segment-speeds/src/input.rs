use anyhow::{bail, Context, Result};
use chrono::NaiveDateTime;
use geo::Coord;
use hashbrown::HashMap;
use indicatif::{ProgressBar, ProgressStyle};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::io::Read;
use std::str::FromStr;
use strum::IntoEnumIterator;

use transit_speeds::prelude::*;

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Deserialize)]
pub struct ShapeRecord {
    pub operator_id: String,
    pub route_id: String,
    pub direction_id: u8,
    pub shape_id: String,
    pub shape_pt_sequence: u32,
    pub shape_pt_lon: f64,
    pub shape_pt_lat: f64,
}

#[derive(Debug, Deserialize)]
pub struct TripRecord {
    pub trip_id: String,
    pub operator_id: String,
    pub route_id: String,
    pub direction_id: u8,
    pub shape_id: String,
    pub first_departure: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PositionRecord {
    pub trip_id: String,
    pub location_timestamp: String,
    pub lon: f64,
    pub lat: f64,
    pub vp_idx: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct StopRecord {
    pub stop_id: String,
    pub stop_lon: f64,
    pub stop_lat: f64,
    pub stop_primary_direction: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct StopTimeRecord {
    pub trip_id: String,
    pub stop_id: String,
    pub stop_sequence: u32,
}

/// Raw rows of every input table, still in WGS84.
#[derive(Debug, Default)]
pub struct RawTables {
    pub shapes: Vec<ShapeRecord>,
    pub trips: Vec<TripRecord>,
    pub positions: Vec<PositionRecord>,
    pub stops: Vec<StopRecord>,
    pub stop_times: Vec<StopTimeRecord>,
}

/// Counts of rows dropped while assembling, for logging.
#[derive(Debug, Default)]
pub struct AssemblyStats {
    pub invalid_shapes: usize,
    pub invalid_trips: usize,
    pub orphan_positions: usize,
}

impl AssemblyStats {
    pub fn log_summary(&self) {
        if self.invalid_shapes > 0 {
            log::warn!("  Shapes skipped (invalid geometry): {}", self.invalid_shapes);
        }
        if self.invalid_trips > 0 {
            log::warn!("  Trips skipped (invalid trace): {}", self.invalid_trips);
        }
        if self.orphan_positions > 0 {
            log::warn!(
                "  Vehicle positions without a known trip: {}",
                self.orphan_positions
            );
        }
    }
}

/// Deserialize every row of a CSV table.
pub fn read_records<T: DeserializeOwned, R: Read>(reader: R) -> Result<Vec<T>> {
    let mut records = Vec::new();
    for (i, rec) in csv::Reader::from_reader(reader).deserialize().enumerate() {
        let rec: T = rec.with_context(|| format!("Bad row {}", i + 1))?;
        records.push(rec);
    }
    Ok(records)
}

/// Like [`read_records`], with a spinner for large tables.
pub fn read_records_with_progress<T: DeserializeOwned, R: Read>(
    reader: R,
    label: &str,
) -> Result<Vec<T>> {
    let pb = ProgressBar::new_spinner();
    pb.set_style(ProgressStyle::default_spinner().template("{spinner:.green} {msg}")?);
    pb.set_message(format!("Reading {}...", label));

    let mut records = Vec::new();
    for (i, rec) in csv::Reader::from_reader(reader).deserialize().enumerate() {
        let rec: T = rec.with_context(|| format!("Bad {} row {}", label, i + 1))?;
        records.push(rec);
        if records.len() % 100_000 == 0 {
            pb.set_message(format!("Read {} {}...", records.len(), label));
        }
    }

    pb.finish_with_message(format!("Read {} {}", records.len(), label));
    Ok(records)
}

pub fn parse_timestamp(value: &str) -> Result<NaiveDateTime> {
    NaiveDateTime::parse_from_str(value.trim(), TIMESTAMP_FORMAT)
        .with_context(|| format!("Bad timestamp {:?}, expected {}", value, TIMESTAMP_FORMAT))
}

fn parse_direction_id(value: u8) -> Result<DirectionId> {
    match DirectionId::from_gtfs(value) {
        Some(direction) => Ok(direction),
        None => bail!("Bad direction_id {}, expected 0 or 1", value),
    }
}

fn parse_primary_direction(value: Option<&str>) -> Option<PrimaryDirection> {
    let value = value.map(str::trim).filter(|v| !v.is_empty())?;
    match PrimaryDirection::from_str(value) {
        Ok(direction) => Some(direction),
        Err(_) => {
            let expected: Vec<String> = PrimaryDirection::iter().map(|d| d.to_string()).collect();
            log::warn!(
                "Unknown stop direction {:?} ignored (expected one of {})",
                value,
                expected.join(", ")
            );
            None
        }
    }
}

/// Plane centered on the mean shape coordinate.
pub fn plane_for(shapes: &[ShapeRecord]) -> Result<LocalTangentPlane> {
    match LocalTangentPlane::centered_on(shapes.iter().map(|r| (r.shape_pt_lon, r.shape_pt_lat))) {
        Some(plane) => Ok(plane),
        None => bail!("shapes table has no rows"),
    }
}

fn assemble_shapes(
    records: Vec<ShapeRecord>,
    plane: &LocalTangentPlane,
    stats: &mut AssemblyStats,
) -> Result<Vec<Shape>> {
    // Shape ids are only unique within an operator
    let mut by_shape: HashMap<(String, String), Vec<ShapeRecord>> = HashMap::new();
    for rec in records {
        by_shape
            .entry((rec.operator_id.clone(), rec.shape_id.clone()))
            .or_default()
            .push(rec);
    }

    let mut keys: Vec<(String, String)> = by_shape.keys().cloned().collect();
    keys.sort();

    let mut shapes = Vec::with_capacity(keys.len());
    for key in keys {
        let Some(mut points) = by_shape.remove(&key) else {
            continue;
        };
        points.sort_by_key(|p| p.shape_pt_sequence);

        let first = &points[0];
        let coords: Vec<Coord<f64>> = points
            .iter()
            .map(|p| {
                let (x, y) = plane.project(p.shape_pt_lon, p.shape_pt_lat);
                Coord { x, y }
            })
            .collect();

        let (operator_id, shape_id) = &key;
        match Shape::new(
            OperatorIdentifier::new(operator_id),
            RouteIdentifier::new(&first.route_id),
            parse_direction_id(first.direction_id)
                .with_context(|| format!("Shape {} of {}", shape_id, operator_id))?,
            ShapeIdentifier::new(shape_id),
            coords,
        ) {
            Ok(shape) => shapes.push(shape),
            Err(e) => {
                log::warn!("  {}", e);
                stats.invalid_shapes += 1;
            }
        }
    }

    Ok(shapes)
}

/// Order a trip's pings and give them a dense index when the table has none.
fn trip_positions(
    mut records: Vec<PositionRecord>,
    plane: &LocalTangentPlane,
) -> Result<Vec<VehiclePosition>> {
    let mut parsed = Vec::with_capacity(records.len());
    for rec in records.drain(..) {
        parsed.push((parse_timestamp(&rec.location_timestamp)?, rec));
    }

    // A partially filled vp_idx column is ignored in favor of a dense index
    let supplied = parsed.iter().all(|(_, rec)| rec.vp_idx.is_some());
    if supplied {
        parsed.sort_by_key(|(_, rec)| rec.vp_idx);
    } else {
        parsed.sort_by_key(|(timestamp, _)| *timestamp);
    }

    Ok(parsed
        .into_iter()
        .enumerate()
        .map(|(i, (timestamp, rec))| {
            let vp_idx = match rec.vp_idx {
                Some(vp_idx) if supplied => vp_idx,
                _ => i as u64,
            };
            VehiclePosition::new(
                vp_idx,
                timestamp,
                plane.project_point(rec.lon, rec.lat),
            )
        })
        .collect())
}

/// Project and assemble raw rows into in-memory input tables.
pub fn assemble(
    raw: RawTables,
    plane: &LocalTangentPlane,
) -> Result<(StaticInputs, AssemblyStats)> {
    let mut stats = AssemblyStats::default();

    let shapes = assemble_shapes(raw.shapes, plane, &mut stats)?;

    let mut positions_by_trip: HashMap<String, Vec<PositionRecord>> = HashMap::new();
    for rec in raw.positions {
        positions_by_trip.entry(rec.trip_id.clone()).or_default().push(rec);
    }

    let mut trips = Vec::with_capacity(raw.trips.len());
    for rec in raw.trips {
        let records = positions_by_trip.remove(&rec.trip_id).unwrap_or_default();
        let info = TripInfo {
            trip_id: TripIdentifier::new(&rec.trip_id),
            operator_id: OperatorIdentifier::new(&rec.operator_id),
            route_id: RouteIdentifier::new(&rec.route_id),
            direction_id: parse_direction_id(rec.direction_id)
                .with_context(|| format!("Trip {}", rec.trip_id))?,
            shape_id: ShapeIdentifier::new(&rec.shape_id),
            first_departure: rec
                .first_departure
                .as_deref()
                .filter(|v| !v.trim().is_empty())
                .map(parse_timestamp)
                .transpose()
                .with_context(|| format!("Trip {}", rec.trip_id))?,
        };
        let positions = trip_positions(records, plane)
            .with_context(|| format!("Trip {}", rec.trip_id))?;

        match TripInstance::new(info, positions) {
            Ok(trip) => trips.push(trip),
            Err(e) => {
                log::warn!("  {}", e);
                stats.invalid_trips += 1;
            }
        }
    }
    stats.orphan_positions = positions_by_trip.values().map(Vec::len).sum();

    let stops = raw
        .stops
        .into_iter()
        .map(|rec| Stop {
            stop_id: StopIdentifier::new(&rec.stop_id),
            location: plane.project_point(rec.stop_lon, rec.stop_lat),
            primary_direction: parse_primary_direction(rec.stop_primary_direction.as_deref()),
        })
        .collect();

    let trip_stops = raw
        .stop_times
        .into_iter()
        .map(|rec| TripStop {
            trip_id: TripIdentifier::new(&rec.trip_id),
            stop_id: StopIdentifier::new(&rec.stop_id),
            stop_sequence: rec.stop_sequence,
        })
        .collect();

    Ok((
        StaticInputs::from_data(shapes, trips, stops, trip_stops),
        stats,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHAPES: &str = "\
operator_id,route_id,direction_id,shape_id,shape_pt_sequence,shape_pt_lon,shape_pt_lat
op,1,0,s1,2,-122.26,37.80
op,1,0,s1,1,-122.27,37.80
op,1,0,bad,1,-122.27,37.80
";

    const TRIPS: &str = "\
trip_id,operator_id,route_id,direction_id,shape_id,first_departure
t1,op,1,0,s1,2024-03-13 07:45:00
t2,op,1,0,s1,
";

    const POSITIONS: &str = "\
trip_id,location_timestamp,lon,lat
t1,2024-03-13 07:50:30,-122.265,37.80
t1,2024-03-13 07:50:00,-122.27,37.80
t2,2024-03-13 09:00:00,-122.27,37.80
ghost,2024-03-13 09:00:00,-122.27,37.80
";

    const STOPS: &str = "\
stop_id,stop_lon,stop_lat,stop_primary_direction
a,-122.268,37.80,Eastbound
b,-122.262,37.80,
c,-122.262,37.80,Sideways
";

    fn raw() -> RawTables {
        RawTables {
            shapes: read_records(SHAPES.as_bytes()).unwrap(),
            trips: read_records(TRIPS.as_bytes()).unwrap(),
            positions: read_records(POSITIONS.as_bytes()).unwrap(),
            stops: read_records(STOPS.as_bytes()).unwrap(),
            stop_times: vec![],
        }
    }

    #[test]
    fn test_read_records() {
        let shapes: Vec<ShapeRecord> = read_records(SHAPES.as_bytes()).unwrap();
        assert_eq!(shapes.len(), 3);
        assert_eq!(shapes[0].shape_pt_sequence, 2);

        let trips: Vec<TripRecord> = read_records(TRIPS.as_bytes()).unwrap();
        assert_eq!(trips[1].first_departure, None);
    }

    #[test]
    fn test_bad_row_is_an_error() {
        let bad = "trip_id,stop_id,stop_sequence\nt1,a,first\n";
        assert!(read_records::<StopTimeRecord, _>(bad.as_bytes()).is_err());
    }

    #[test]
    fn test_assemble() {
        let raw = raw();
        let plane = plane_for(&raw.shapes).unwrap();
        let (inputs, stats) = assemble(raw, &plane).unwrap();

        // "bad" has a single point
        assert_eq!(inputs.shapes().len(), 1);
        assert_eq!(stats.invalid_shapes, 1);
        assert_eq!(stats.orphan_positions, 1);

        let shape = inputs.get_shape(&ShapeKey::new("op", "s1")).unwrap();
        assert!((shape.length() - 880.0).abs() < 10.0);

        let t1 = &inputs.trips()[0];
        let indices: Vec<u64> = t1.positions().iter().map(|vp| vp.vp_idx).collect();
        assert_eq!(indices, vec![0, 1]);
        assert!(t1.positions()[0].timestamp < t1.positions()[1].timestamp);
        assert_eq!(
            t1.info.first_departure,
            Some(parse_timestamp("2024-03-13 07:45:00").unwrap())
        );

        let directions: Vec<Option<PrimaryDirection>> =
            inputs.stops().iter().map(|s| s.primary_direction).collect();
        assert_eq!(
            directions,
            vec![Some(PrimaryDirection::Eastbound), None, None]
        );
    }

    #[test]
    fn test_partial_vp_idx_gets_dense_index() {
        let positions = "\
trip_id,location_timestamp,lon,lat,vp_idx
t1,2024-03-13 07:50:00,-122.27,37.80,
t1,2024-03-13 07:50:30,-122.265,37.80,0
t1,2024-03-13 07:51:00,-122.26,37.80,
";
        let mut raw = raw();
        raw.positions = read_records(positions.as_bytes()).unwrap();
        let plane = plane_for(&raw.shapes).unwrap();
        let (inputs, stats) = assemble(raw, &plane).unwrap();

        assert_eq!(stats.invalid_trips, 0);
        let t1 = inputs
            .trips()
            .iter()
            .find(|t| t.trip_id() == &TripIdentifier::new("t1"))
            .unwrap();
        let indices: Vec<u64> = t1.positions().iter().map(|vp| vp.vp_idx).collect();
        assert_eq!(indices, vec![0, 1, 2]);
    }

    #[test]
    fn test_supplied_vp_idx_is_kept() {
        let positions = "\
trip_id,location_timestamp,lon,lat,vp_idx
t1,2024-03-13 07:50:30,-122.265,37.80,8
t1,2024-03-13 07:50:00,-122.27,37.80,7
";
        let mut raw = raw();
        raw.positions = read_records(positions.as_bytes()).unwrap();
        let plane = plane_for(&raw.shapes).unwrap();
        let (inputs, _) = assemble(raw, &plane).unwrap();

        let indices: Vec<u64> = inputs.trips()[0].positions().iter().map(|vp| vp.vp_idx).collect();
        assert_eq!(indices, vec![7, 8]);
    }

    #[test]
    fn test_shapes_keyed_by_operator() {
        let shapes = "\
operator_id,route_id,direction_id,shape_id,shape_pt_sequence,shape_pt_lon,shape_pt_lat
a,1,0,1,1,-122.27,37.80
b,7,1,1,1,-122.27,37.81
a,1,0,1,2,-122.26,37.80
b,7,1,1,2,-122.27,37.82
";
        let mut raw = raw();
        raw.shapes = read_records(shapes.as_bytes()).unwrap();
        raw.trips.clear();
        let plane = plane_for(&raw.shapes).unwrap();
        let (inputs, stats) = assemble(raw, &plane).unwrap();

        assert_eq!(inputs.shapes().len(), 2);
        assert_eq!(stats.invalid_shapes, 0);

        let a = inputs.get_shape(&ShapeKey::new("a", "1")).unwrap();
        let b = inputs.get_shape(&ShapeKey::new("b", "1")).unwrap();
        assert_eq!(a.geometry().0.len(), 2);
        assert_eq!(b.geometry().0.len(), 2);
        assert_eq!(b.route_id, RouteIdentifier::new("7"));
        assert_eq!(b.direction_id, DirectionId::Inbound);
        // a runs east, b runs north
        assert!(a.length() > 800.0);
        assert!((b.length() - 1112.0).abs() < 10.0);
    }

    #[test]
    fn test_parse_timestamp() {
        assert!(parse_timestamp("2024-03-13 07:45:00").is_ok());
        assert!(parse_timestamp("07:45").is_err());
    }
}
