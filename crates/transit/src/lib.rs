//! # transit-speeds
//!
//! Segment speeds and stop anchors from recorded vehicle positions.
//!
//! ## Features
//!
//! - **Segments**: route shapes cut into fixed-length pieces with
//!   deterministic fingerprint ids
//! - **Spatial matching**: R-tree based ping-to-segment matching
//! - **Stability recovery**: short, unreliable measurements re-derived from
//!   neighboring pings instead of being reported as-is
//! - **Stop anchors**: nearest ping and bracketing trio per (trip, stop)
//! - **Weighted aggregation**: distance/time weighted speeds per segment and
//!   route-direction for peak, offpeak and all_day
//! - **Parallel**: per-trip stages run on rayon (`parallel` feature, default)
//!
//! All geometry is in planar meters; see [`spatial::projection`] for
//! converting WGS84 input.
//!
//! ## Example
//!
//! ```
//! use transit_speeds::prelude::*;
//! use chrono::NaiveDate;
//! use geo::{Coord, Point};
//!
//! let shape = Shape::new(
//!     OperatorIdentifier::new("op"),
//!     RouteIdentifier::new("1"),
//!     DirectionId::Outbound,
//!     ShapeIdentifier::new("1_out"),
//!     vec![Coord { x: 0.0, y: 0.0 }, Coord { x: 2000.0, y: 0.0 }],
//! )
//! .unwrap();
//!
//! let start = NaiveDate::from_ymd_opt(2024, 3, 13)
//!     .unwrap()
//!     .and_hms_opt(12, 0, 0)
//!     .unwrap();
//! let positions = [(0.0, 0), (1000.0, 100), (2000.0, 220)]
//!     .iter()
//!     .enumerate()
//!     .map(|(i, &(x, s))| {
//!         VehiclePosition::new(i as u64, start + chrono::Duration::seconds(s), Point::new(x, 0.0))
//!     })
//!     .collect();
//!
//! let trip = TripInstance::new(
//!     TripInfo {
//!         trip_id: TripIdentifier::new("t1"),
//!         operator_id: OperatorIdentifier::new("op"),
//!         route_id: RouteIdentifier::new("1"),
//!         direction_id: DirectionId::Outbound,
//!         shape_id: ShapeIdentifier::new("1_out"),
//!         first_departure: None,
//!     },
//!     positions,
//! )
//! .unwrap();
//!
//! let inputs = StaticInputs::from_data(vec![shape], vec![trip], vec![], vec![]);
//! let outputs = run_day(&inputs, &PipelineConfig::default()).unwrap();
//!
//! assert_eq!(outputs.segments.len(), 2);
//! assert_eq!(outputs.segment_trip_speeds.len(), 2);
//! // Midday departure: offpeak and all_day rows for each segment
//! assert_eq!(outputs.segment_speeds.len(), 4);
//! ```

pub mod aggregate;
pub mod anchors;
pub mod config;
pub mod identifiers;
pub mod linear_ref;
pub mod matching;
pub mod models;
pub mod pipeline;
pub mod provider;
pub mod segments;
pub mod spatial;
pub mod speeds;

// Re-exports for convenience
pub mod prelude {
    pub use crate::aggregate::{GroupSpeeds, TripAverage};
    pub use crate::anchors::{StopAnchorRecord, TrioEntry};
    pub use crate::config::{PeakWindow, PipelineConfig};
    pub use crate::identifiers::*;
    pub use crate::models::{entities::*, traits::*, types::*};
    pub use crate::pipeline::{run_day, DayOutputs, RunStats};
    pub use crate::provider::StaticInputs;
    pub use crate::spatial::LocalTangentPlane;
    pub use crate::speeds::{SegmentTripRecord, SpeedEstimate};
}

pub use prelude::*;
