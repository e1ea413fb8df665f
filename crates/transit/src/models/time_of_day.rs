//! Time-of-day bucketing for trips.
//!
//! Trips are labeled from their first departure. The named buckets are
//! fixed; which hours count as peak comes from configuration.

use chrono::{NaiveDateTime, Timelike};

use crate::models::types::{TimeOfDay, TimePeriod};

/// Half-open range of clock hours, `[start_hour, end_hour)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PeakWindow {
    pub start_hour: u32,
    pub end_hour: u32,
}

impl PeakWindow {
    pub const fn new(start_hour: u32, end_hour: u32) -> Self {
        Self {
            start_hour,
            end_hour,
        }
    }

    pub fn contains_hour(&self, hour: u32) -> bool {
        hour >= self.start_hour && hour < self.end_hour
    }

    pub fn overlaps(&self, other: &PeakWindow) -> bool {
        self.start_hour < other.end_hour && other.start_hour < self.end_hour
    }
}

impl TimeOfDay {
    pub fn from_hour(hour: u32) -> Self {
        match hour {
            0..=3 => Self::Owl,
            4..=6 => Self::EarlyAm,
            7..=9 => Self::AmPeak,
            10..=14 => Self::Midday,
            15..=19 => Self::PmPeak,
            _ => Self::Evening,
        }
    }

    pub fn from_departure(departure: NaiveDateTime) -> Self {
        Self::from_hour(departure.hour())
    }
}

/// Peak or offpeak for a departure. Never returns `AllDay`.
pub fn peak_period(departure: NaiveDateTime, windows: &[PeakWindow]) -> TimePeriod {
    let hour = departure.hour();
    if windows.iter().any(|w| w.contains_hour(hour)) {
        TimePeriod::Peak
    } else {
        TimePeriod::Offpeak
    }
}

/// Time-of-day label and aggregation period of one trip.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct TripTimeBucket {
    pub time_of_day: TimeOfDay,
    pub period: TimePeriod,
}

impl TripTimeBucket {
    pub fn new(departure: NaiveDateTime, windows: &[PeakWindow]) -> Self {
        Self {
            time_of_day: TimeOfDay::from_departure(departure),
            period: peak_period(departure, windows),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(hour: u32, minute: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 13)
            .unwrap()
            .and_hms_opt(hour, minute, 0)
            .unwrap()
    }

    #[test]
    fn test_time_of_day_buckets() {
        assert_eq!(TimeOfDay::from_hour(0), TimeOfDay::Owl);
        assert_eq!(TimeOfDay::from_hour(4), TimeOfDay::EarlyAm);
        assert_eq!(TimeOfDay::from_hour(9), TimeOfDay::AmPeak);
        assert_eq!(TimeOfDay::from_hour(10), TimeOfDay::Midday);
        assert_eq!(TimeOfDay::from_hour(19), TimeOfDay::PmPeak);
        assert_eq!(TimeOfDay::from_hour(23), TimeOfDay::Evening);
    }

    #[test]
    fn test_peak_period() {
        let windows = [PeakWindow::new(7, 10), PeakWindow::new(15, 20)];

        assert_eq!(peak_period(at(7, 0), &windows), TimePeriod::Peak);
        assert_eq!(peak_period(at(9, 59), &windows), TimePeriod::Peak);
        assert_eq!(peak_period(at(10, 0), &windows), TimePeriod::Offpeak);
        assert_eq!(peak_period(at(17, 30), &windows), TimePeriod::Peak);
        assert_eq!(peak_period(at(2, 0), &windows), TimePeriod::Offpeak);

        // No windows configured: everything is offpeak
        assert_eq!(peak_period(at(8, 0), &[]), TimePeriod::Offpeak);
    }

    #[test]
    fn test_window_overlap() {
        let morning = PeakWindow::new(7, 10);
        assert!(morning.overlaps(&PeakWindow::new(9, 11)));
        assert!(!morning.overlaps(&PeakWindow::new(10, 12)));
    }
}
