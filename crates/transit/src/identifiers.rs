//! Type-safe, efficient identifiers for transit entities.
//!
//! String identifiers use Arc<str> for cheap cloning across per-trip work
//! units. Segments are identified by a content fingerprint instead, see
//! [`SegmentId`].

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use twox_hash::XxHash64;

macro_rules! impl_identifier {
    ($name:ident) => {
        #[derive(Clone, Debug)]
        pub struct $name(Arc<str>);

        impl $name {
            pub fn new(s: impl AsRef<str>) -> Self {
                Self(s.as_ref().into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl PartialEq for $name {
            fn eq(&self, other: &Self) -> bool {
                Arc::ptr_eq(&self.0, &other.0) || self.0 == other.0
            }
        }

        impl Eq for $name {}

        impl PartialOrd for $name {
            fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
                Some(self.cmp(other))
            }
        }

        impl Ord for $name {
            fn cmp(&self, other: &Self) -> Ordering {
                self.0.cmp(&other.0)
            }
        }

        impl Hash for $name {
            fn hash<H: Hasher>(&self, state: &mut H) {
                self.0.hash(state);
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self::new(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self::new(s)
            }
        }

        #[cfg(feature = "serde")]
        impl serde::Serialize for $name {
            fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.0)
            }
        }
    };
}

impl_identifier!(OperatorIdentifier);
impl_identifier!(RouteIdentifier);
impl_identifier!(ShapeIdentifier);
impl_identifier!(TripIdentifier);
impl_identifier!(StopIdentifier);

/// Deterministic segment fingerprint.
///
/// Computed from (operator, route, sequence) so that segments can be cut
/// independently per operator without a shared counter. The id space is
/// 64 bits; two distinct inputs colliding is possible but improbable
/// (roughly n^2 / 2^65 for n segments) and is not checked.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SegmentId(u64);

impl SegmentId {
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SegmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

#[cfg(feature = "serde")]
impl serde::Serialize for SegmentId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Fingerprint a segment from its owning operator, route key and sequence.
///
/// Fields are joined with the ASCII unit separator so that ("1", "23") and
/// ("12", "3") hash differently.
pub fn segment_fingerprint(operator: &str, route: &str, segment_sequence: u32) -> SegmentId {
    let mut hasher = XxHash64::with_seed(0);
    hasher.write(operator.as_bytes());
    hasher.write(&[0x1f]);
    hasher.write(route.as_bytes());
    hasher.write(&[0x1f]);
    hasher.write(segment_sequence.to_string().as_bytes());
    SegmentId(hasher.finish())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identifier_equality() {
        let id1 = TripIdentifier::new("trip_123");
        let id2 = TripIdentifier::new("trip_123");
        let id3 = id1.clone();

        assert_eq!(id1, id2);
        assert_eq!(id1, id3);
        assert!(Arc::ptr_eq(&id1.0, &id3.0)); // Clone shares Arc
    }

    #[test]
    fn test_identifier_ordering() {
        let mut ids = vec![
            RouteIdentifier::new("b"),
            RouteIdentifier::new("a"),
            RouteIdentifier::new("c"),
        ];
        ids.sort();
        let names: Vec<&str> = ids.iter().map(|id| id.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_identifier_display() {
        let id = RouteIdentifier::new("route_1");
        assert_eq!(format!("{}", id), "route_1");
    }

    #[test]
    fn test_fingerprint_is_deterministic() {
        let a = segment_fingerprint("op", "route_1", 3);
        let b = segment_fingerprint("op", "route_1", 3);
        assert_eq!(a, b);
        assert_ne!(a, segment_fingerprint("op", "route_1", 4));
        assert_ne!(a, segment_fingerprint("other", "route_1", 3));
    }

    #[test]
    fn test_fingerprint_field_boundaries() {
        assert_ne!(
            segment_fingerprint("1", "23", 0),
            segment_fingerprint("12", "3", 0)
        );
    }

    #[test]
    fn test_segment_id_display() {
        assert_eq!(SegmentId::from_raw(255).to_string(), "00000000000000ff");
    }
}
