//! In-memory input tables.
//!
//! Stores one analysis date's shapes, trips and stops with lookup maps for
//! the per-trip stages.

use std::collections::HashMap;

use log::warn;

use crate::identifiers::*;
use crate::models::{entities::*, traits::*};

/// In-memory [`InputTables`] with lookup maps
#[derive(Clone, Debug, Default)]
pub struct StaticInputs {
    // Core data
    shapes: Vec<Shape>,
    trips: Vec<TripInstance>,
    stops: Vec<Stop>,

    // Lookup maps
    shape_map: HashMap<ShapeKey, usize>,
    stop_map: HashMap<StopIdentifier, usize>,
    trip_stop_map: HashMap<TripIdentifier, Vec<TripStop>>,
}

impl StaticInputs {
    /// Create a new empty set of tables
    pub fn new() -> Self {
        Self::default()
    }

    /// Build tables from raw data. The first shape with a given operator and
    /// id, or stop with a given id, wins; later duplicates are logged and
    /// ignored.
    pub fn from_data(
        shapes: Vec<Shape>,
        trips: Vec<TripInstance>,
        stops: Vec<Stop>,
        trip_stops: Vec<TripStop>,
    ) -> Self {
        let mut shape_map = HashMap::with_capacity(shapes.len());
        for (i, shape) in shapes.iter().enumerate() {
            let key = shape.key();
            if shape_map.contains_key(&key) {
                warn!(
                    "Duplicate shape {} of {} ignored",
                    shape.shape_id, shape.operator_id
                );
                continue;
            }
            shape_map.insert(key, i);
        }

        let mut stop_map = HashMap::with_capacity(stops.len());
        for (i, stop) in stops.iter().enumerate() {
            if stop_map.contains_key(&stop.stop_id) {
                warn!("Duplicate stop {} ignored", stop.stop_id);
                continue;
            }
            stop_map.insert(stop.stop_id.clone(), i);
        }

        let mut trip_stop_map: HashMap<TripIdentifier, Vec<TripStop>> = HashMap::new();
        for trip_stop in trip_stops {
            trip_stop_map
                .entry(trip_stop.trip_id.clone())
                .or_default()
                .push(trip_stop);
        }
        for served in trip_stop_map.values_mut() {
            served.sort_by_key(|ts| ts.stop_sequence);
        }

        Self {
            shapes,
            trips,
            stops,
            shape_map,
            stop_map,
            trip_stop_map,
        }
    }
}

impl InputTables for StaticInputs {
    fn shapes(&self) -> &[Shape] {
        &self.shapes
    }

    fn trips(&self) -> &[TripInstance] {
        &self.trips
    }

    fn stops(&self) -> &[Stop] {
        &self.stops
    }

    fn get_shape(&self, key: &ShapeKey) -> Option<&Shape> {
        self.shape_map.get(key).map(|&i| &self.shapes[i])
    }

    fn get_stop(&self, id: &StopIdentifier) -> Option<&Stop> {
        self.stop_map.get(id).map(|&i| &self.stops[i])
    }

    fn trip_stops(&self, trip_id: &TripIdentifier) -> &[TripStop] {
        self.trip_stop_map
            .get(trip_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::entities::fixtures::*;
    use geo::Point;

    #[test]
    fn test_empty_inputs() {
        let inputs = StaticInputs::new();
        assert_eq!(inputs.shapes().len(), 0);
        assert_eq!(inputs.trips().len(), 0);
        assert!(inputs.trip_stops(&TripIdentifier::new("t1")).is_empty());
    }

    #[test]
    fn test_input_lookups() {
        let stop = Stop {
            stop_id: StopIdentifier::new("a"),
            location: Point::new(10.0, 0.0),
            primary_direction: None,
        };
        let trip_stops = vec![
            TripStop {
                trip_id: TripIdentifier::new("t1"),
                stop_id: StopIdentifier::new("b"),
                stop_sequence: 2,
            },
            TripStop {
                trip_id: TripIdentifier::new("t1"),
                stop_id: StopIdentifier::new("a"),
                stop_sequence: 1,
            },
        ];

        let inputs = StaticInputs::from_data(
            vec![straight_shape(100.0), straight_shape(500.0)],
            vec![trip("t1", &[(0.0, 0.0, 0)])],
            vec![stop],
            trip_stops,
        );

        let shape = inputs.get_shape(&ShapeKey::new("op", "s1")).unwrap();
        assert_eq!(shape.length(), 100.0);
        assert!(inputs.get_shape(&ShapeKey::new("other", "s1")).is_none());
        assert!(inputs.get_stop(&StopIdentifier::new("a")).is_some());
        assert!(inputs.get_stop(&StopIdentifier::new("z")).is_none());

        let served: Vec<u32> = inputs
            .trip_stops(&TripIdentifier::new("t1"))
            .iter()
            .map(|ts| ts.stop_sequence)
            .collect();
        assert_eq!(served, vec![1, 2]);
    }
}
