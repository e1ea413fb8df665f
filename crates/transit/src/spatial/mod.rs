//! Spatial indexing, projection and distance utilities.

pub mod index;
pub mod projection;
pub mod queries;

pub use projection::LocalTangentPlane;
pub use queries::planar_distance;
