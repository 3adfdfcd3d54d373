//! Core types
//!
//! Identifiers, instants and coordinates shared by every component.

use chrono::{DateTime, DurationRound, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{Error, Result};

/// UTC instant with millisecond precision
pub type Timestamp = DateTime<Utc>;

/// Mean Earth radius used by the haversine formula
pub const EARTH_RADIUS_KM: f64 = 6371.0088;

/// Truncate an instant to millisecond precision
pub fn truncate_ms(ts: Timestamp) -> Timestamp {
    ts.duration_trunc(TimeDelta::milliseconds(1)).unwrap_or(ts)
}

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident, $resource:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Entity name used in not-found errors
            pub const RESOURCE: &'static str = $resource;

            /// Generate a fresh random identifier
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Parse from a hyphenated string, yielding a validation error on failure
            pub fn parse(field: &str, value: &str) -> Result<Self> {
                Uuid::parse_str(value.trim())
                    .map(Self)
                    .map_err(|_| Error::invalid_field(field, format!("'{value}' is not a valid UUID")))
            }

            /// Underlying UUID
            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl FromStr for $name {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self> {
                Self::parse(stringify!($name), s)
            }
        }

        impl From<Uuid> for $name {
            fn from(id: Uuid) -> Self {
                Self(id)
            }
        }
    };
}

define_id!(
    /// Distress event identifier
    DistressId,
    "Distress"
);
define_id!(
    /// Vehicle identifier
    VehicleId,
    "Vehicle"
);
define_id!(
    /// Health facility identifier
    FacilityId,
    "Facility"
);
define_id!(
    /// User identifier (subjects, reporters, crew, message recipients)
    UserId,
    "User"
);
define_id!(
    /// Escalation contact identifier
    ContactId,
    "Contact"
);
define_id!(
    /// Escalation tier identifier
    TierId,
    "EscalationTier"
);
define_id!(
    /// Escalation path identifier
    PathId,
    "EscalationPath"
);
define_id!(
    /// Escalation run identifier
    RunId,
    "EscalationRun"
);
define_id!(
    /// Scheduled message identifier
    MessageId,
    "ScheduledMessage"
);
define_id!(
    /// Tracking update identifier
    UpdateId,
    "TrackingUpdate"
);

/// Geographic coordinate in decimal degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    /// Latitude in decimal degrees
    pub latitude: f64,
    /// Longitude in decimal degrees
    pub longitude: f64,
}

impl Coordinates {
    /// Create validated coordinates
    pub fn new(latitude: f64, longitude: f64) -> Result<Self> {
        let coords = Self {
            latitude,
            longitude,
        };
        coords.validate()?;
        Ok(coords)
    }

    /// Reject non-finite or out-of-range values
    pub fn validate(&self) -> Result<()> {
        if !self.latitude.is_finite() || !(-90.0..=90.0).contains(&self.latitude) {
            return Err(Error::invalid_field(
                "latitude",
                format!("latitude {} outside [-90, 90]", self.latitude),
            ));
        }
        if !self.longitude.is_finite() || !(-180.0..=180.0).contains(&self.longitude) {
            return Err(Error::invalid_field(
                "longitude",
                format!("longitude {} outside [-180, 180]", self.longitude),
            ));
        }
        Ok(())
    }

    /// Great-circle distance in kilometres (haversine)
    pub fn distance_km(&self, other: &Coordinates) -> f64 {
        let lat1 = self.latitude.to_radians();
        let lat2 = other.latitude.to_radians();
        let dlat = (other.latitude - self.latitude).to_radians();
        let dlon = (other.longitude - self.longitude).to_radians();

        let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
        let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
        EARTH_RADIUS_KM * c
    }

    /// Check whether `other` lies within `radius_km` of this point
    pub fn within(&self, other: &Coordinates, radius_km: f64) -> bool {
        self.distance_km(other) <= radius_km
    }
}

impl fmt::Display for Coordinates {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.5}, {:.5})", self.latitude, self.longitude)
    }
}
