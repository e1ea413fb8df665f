//! Core traits for pipeline inputs.
//!
//! The pipeline reads one analysis date's tables through [`InputTables`].
//! Implementations can be in-memory, database-backed, or remote, as long as
//! every table is fully materialized before the run starts.

use crate::identifiers::*;
use crate::models::entities::*;

/// Provider of all tables consumed by a pipeline run
pub trait InputTables: Send + Sync {
    // ---- Collections ----
    fn shapes(&self) -> &[Shape];
    fn trips(&self) -> &[TripInstance];
    fn stops(&self) -> &[Stop];

    // ---- Lookups ----
    fn get_shape(&self, key: &ShapeKey) -> Option<&Shape>;
    fn get_stop(&self, id: &StopIdentifier) -> Option<&Stop>;

    /// Stops served by a trip, ordered by stop sequence.
    /// Empty when no stop times were supplied.
    fn trip_stops(&self, trip_id: &TripIdentifier) -> &[TripStop];
}
