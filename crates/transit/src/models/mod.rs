//! Pipeline data models, types, and traits.

pub mod entities;
pub mod time_of_day;
pub mod traits;
pub mod types;

// Re-exports for convenience
pub use entities::{
    RouteDirectionKey, Segment, SegmentRef, Shape, ShapeKey, Stop, TripInfo, TripInstance, TripStop,
    VehiclePosition,
};
pub use time_of_day::{peak_period, PeakWindow, TripTimeBucket};
pub use traits::InputTables;
pub use types::{DirectionId, PrimaryDirection, Result, SpeedsError, TimeOfDay, TimePeriod};
