//! Run configuration.
//!
//! Supplied once at the start of a run and never mutated. The defaults are
//! empirically tuned for typical GPS noise; treat them as starting points.

pub use crate::models::time_of_day::PeakWindow;
use crate::models::types::{Result, SpeedsError};

/// Meters per second to miles per hour
pub const MPH_PER_MPS: f64 = 2.237;

/// Percentiles reported per aggregation group
pub const PERCENTILES: [f64; 3] = [0.2, 0.5, 0.8];

#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct PipelineConfig {
    /// Target segment length in meters
    pub segment_length_m: f64,
    /// Lateral match tolerance in meters
    pub buffer_m: f64,
    /// Minimum fraction of a segment traversed for a trusted estimate
    pub stability_threshold: f64,
    /// Multiplier from meters per second to the reported speed unit
    pub speed_conversion: f64,
    /// Label for the reported speed unit
    pub speed_unit: String,
    /// Records faster than this (in the reported unit) are not aggregated
    pub max_speed: f64,
    /// Hour ranges counted as peak; everything else is offpeak
    pub peak_windows: Vec<PeakWindow>,
    /// Pings returned by k-nearest stop queries
    pub nearest_k: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            segment_length_m: 1000.0,
            buffer_m: 50.0,
            stability_threshold: 0.3,
            speed_conversion: MPH_PER_MPS,
            speed_unit: "mph".to_string(),
            max_speed: 70.0,
            peak_windows: vec![PeakWindow::new(7, 10), PeakWindow::new(15, 20)],
            nearest_k: 10,
        }
    }
}

fn positive_finite(name: &str, value: f64) -> Result<()> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(SpeedsError::InvalidConfig(format!(
            "{} must be positive and finite, got {}",
            name, value
        )))
    }
}

impl PipelineConfig {
    /// Reject values that would make every downstream number meaningless.
    pub fn validate(&self) -> Result<()> {
        positive_finite("segment_length_m", self.segment_length_m)?;
        positive_finite("buffer_m", self.buffer_m)?;
        positive_finite("speed_conversion", self.speed_conversion)?;
        positive_finite("max_speed", self.max_speed)?;

        if !(self.stability_threshold > 0.0 && self.stability_threshold <= 1.0) {
            return Err(SpeedsError::InvalidConfig(format!(
                "stability_threshold must be in (0, 1], got {}",
                self.stability_threshold
            )));
        }

        if self.nearest_k == 0 {
            return Err(SpeedsError::InvalidConfig(
                "nearest_k must be at least 1".to_string(),
            ));
        }

        for window in &self.peak_windows {
            if window.start_hour >= window.end_hour || window.end_hour > 24 {
                return Err(SpeedsError::InvalidConfig(format!(
                    "peak window [{}, {}) is not a valid hour range",
                    window.start_hour, window.end_hour
                )));
            }
        }

        for (i, a) in self.peak_windows.iter().enumerate() {
            if let Some(b) = self.peak_windows[i + 1..].iter().find(|b| a.overlaps(b)) {
                return Err(SpeedsError::InvalidConfig(format!(
                    "peak windows [{}, {}) and [{}, {}) overlap",
                    a.start_hour, a.end_hour, b.start_hour, b.end_hour
                )));
            }
        }

        Ok(())
    }

    /// Convert meters per second into the configured unit.
    pub fn convert_speed(&self, meters_per_second: f64) -> f64 {
        meters_per_second * self.speed_conversion
    }
}
