//! Core data types and enums for segment speed derivation.

use crate::identifiers::*;

// ============================================================================
// Enums
// ============================================================================

/// Trip direction (0 = outbound, 1 = inbound per GTFS)
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, strum::Display)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[repr(u8)]
pub enum DirectionId {
    #[strum(serialize = "0")]
    Outbound = 0,
    #[strum(serialize = "1")]
    Inbound = 1,
}

impl DirectionId {
    pub fn from_gtfs(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Outbound),
            1 => Some(Self::Inbound),
            _ => None,
        }
    }
}

/// Cardinal heading of a stop or a vehicle position.
///
/// Stops get this label upstream; vehicle positions derive it from their
/// displacement since the previous ping.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, strum::Display, strum::EnumString, strum::EnumIter,
)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum PrimaryDirection {
    Northbound,
    Southbound,
    Eastbound,
    Westbound,
}

impl PrimaryDirection {
    pub fn opposite(self) -> Self {
        match self {
            Self::Northbound => Self::Southbound,
            Self::Southbound => Self::Northbound,
            Self::Eastbound => Self::Westbound,
            Self::Westbound => Self::Eastbound,
        }
    }

    /// Heading along the dominant axis of a planar displacement.
    ///
    /// `None` for a zero displacement. Ties between axes go to north/south.
    pub fn from_displacement(dx: f64, dy: f64) -> Option<Self> {
        if dx == 0.0 && dy == 0.0 {
            return None;
        }
        if dx.abs() > dy.abs() {
            Some(if dx > 0.0 { Self::Eastbound } else { Self::Westbound })
        } else {
            Some(if dy > 0.0 { Self::Northbound } else { Self::Southbound })
        }
    }
}

/// Named time-of-day bucket of a trip's first departure.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, strum::Display, strum::EnumIter,
)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum TimeOfDay {
    #[strum(serialize = "Owl")]
    Owl,
    #[strum(serialize = "Early AM")]
    EarlyAm,
    #[strum(serialize = "AM Peak")]
    AmPeak,
    #[strum(serialize = "Midday")]
    Midday,
    #[strum(serialize = "PM Peak")]
    PmPeak,
    #[strum(serialize = "Evening")]
    Evening,
}

/// Aggregation period. `AllDay` is the union of the other two, never a
/// separate sample.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, strum::Display, strum::EnumIter,
)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[strum(serialize_all = "snake_case")]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum TimePeriod {
    Peak,
    Offpeak,
    AllDay,
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum SpeedsError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Required input table is empty: {0}")]
    MissingInput(&'static str),

    #[error("Invalid trip {trip_id}: {reason}")]
    InvalidTrip {
        trip_id: TripIdentifier,
        reason: String,
    },

    #[error("Invalid data: {0}")]
    InvalidData(String),
}

pub type Result<T> = std::result::Result<T, SpeedsError>;
