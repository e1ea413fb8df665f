//! WGS84 <-> local planar meters.
//!
//! Equirectangular approximation about an origin. Accurate to well under a
//! meter over the extent of one operator's service area, which is far below
//! GPS noise.

use geo::{Coord, LineString, Point};

/// Local tangent plane centered on `(lon0, lat0)`
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LocalTangentPlane {
    origin_lon_rad: f64,
    origin_lat_rad: f64,
    cos_lat0: f64,
}

impl LocalTangentPlane {
    pub const EARTH_RADIUS: f64 = 6_371_007.2;

    pub fn new(lon0: f64, lat0: f64) -> Self {
        let origin_lon_rad = lon0.to_radians();
        let origin_lat_rad = lat0.to_radians();
        Self {
            origin_lon_rad,
            origin_lat_rad,
            cos_lat0: origin_lat_rad.cos(),
        }
    }

    /// Plane centered on the mean of the given `(lon, lat)` coordinates.
    pub fn centered_on(coords: impl IntoIterator<Item = (f64, f64)>) -> Option<Self> {
        let (mut sum_lon, mut sum_lat, mut n) = (0.0, 0.0, 0usize);
        for (lon, lat) in coords {
            sum_lon += lon;
            sum_lat += lat;
            n += 1;
        }
        (n > 0).then(|| Self::new(sum_lon / n as f64, sum_lat / n as f64))
    }

    /// Project (lon, lat) to (x, y) meters
    pub fn project(&self, lon: f64, lat: f64) -> (f64, f64) {
        let dlon = lon.to_radians() - self.origin_lon_rad;
        let dlat = lat.to_radians() - self.origin_lat_rad;
        (
            Self::EARTH_RADIUS * self.cos_lat0 * dlon,
            Self::EARTH_RADIUS * dlat,
        )
    }

    /// Unproject (x, y) meters to (lon, lat)
    pub fn unproject(&self, x: f64, y: f64) -> (f64, f64) {
        let lon_rad = self.origin_lon_rad + x / (Self::EARTH_RADIUS * self.cos_lat0);
        let lat_rad = self.origin_lat_rad + y / Self::EARTH_RADIUS;
        (lon_rad.to_degrees(), lat_rad.to_degrees())
    }

    pub fn project_point(&self, lon: f64, lat: f64) -> Point<f64> {
        let (x, y) = self.project(lon, lat);
        Point::new(x, y)
    }

    pub fn unproject_line(&self, line: &LineString<f64>) -> LineString<f64> {
        line.coords()
            .map(|c| {
                let (x, y) = self.unproject(c.x, c.y);
                Coord { x, y }
            })
            .collect()
    }
}
