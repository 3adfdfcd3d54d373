//! Reference entities: facilities, subjects, contacts and tracking updates

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::types::{Coordinates, ContactId, DistressId, FacilityId, Timestamp, UpdateId, UserId, VehicleId};

/// A health facility that can receive patients and alerts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Facility {
    /// Unique identifier
    pub id: FacilityId,
    /// Display name
    pub name: String,
    /// Location
    pub coordinates: Coordinates,
    /// Administrative district
    pub district: Option<String>,
}

impl Facility {
    /// Create a facility
    pub fn new(name: impl Into<String>, coordinates: Coordinates, district: Option<String>) -> Self {
        Self {
            id: FacilityId::new(),
            name: name.into(),
            coordinates,
            district,
        }
    }
}

/// A person who may be the subject of a distress report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subject {
    /// User id
    pub id: UserId,
    /// Facility registered as the subject's primary care site
    pub primary_facility: Option<FacilityId>,
    /// Home district
    pub district: Option<String>,
}

/// A person reachable by phone or email
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contact {
    /// Unique identifier
    pub id: ContactId,
    /// Display name
    pub name: String,
    /// Phone number
    pub phone: Option<String>,
    /// Email address
    pub email: Option<String>,
    /// Receives emergency broadcasts
    pub emergency: bool,
    /// Eligible for escalation tiers
    pub escalation: bool,
    /// Facility the contact belongs to
    pub facility_id: Option<FacilityId>,
}

impl Contact {
    /// Create a contact with no flags set
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: ContactId::new(),
            name: name.into(),
            phone: None,
            email: None,
            emergency: false,
            escalation: false,
            facility_id: None,
        }
    }

    /// Contact has at least one reachable address
    pub fn is_reachable(&self) -> bool {
        self.phone.as_deref().is_some_and(|p| !p.is_empty())
            || self.email.as_deref().is_some_and(|e| !e.is_empty())
    }
}

/// Kind of tracking update
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackingUpdateKind {
    /// Vehicle left for the scene
    EnRoute,
    /// Vehicle delayed
    Delayed,
    /// Vehicle on scene
    Arrived,
    /// Free-form status change
    StatusChange,
    /// Operator note
    Note,
}

impl TrackingUpdateKind {
    /// Wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackingUpdateKind::EnRoute => "en_route",
            TrackingUpdateKind::Delayed => "delayed",
            TrackingUpdateKind::Arrived => "arrived",
            TrackingUpdateKind::StatusChange => "status_change",
            TrackingUpdateKind::Note => "note",
        }
    }
}

impl fmt::Display for TrackingUpdateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TrackingUpdateKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "en_route" | "enroute" => Ok(TrackingUpdateKind::EnRoute),
            "delayed" => Ok(TrackingUpdateKind::Delayed),
            "arrived" => Ok(TrackingUpdateKind::Arrived),
            "status_change" => Ok(TrackingUpdateKind::StatusChange),
            "note" => Ok(TrackingUpdateKind::Note),
            other => Err(Error::invalid_field(
                "kind",
                format!("unknown tracking update kind '{other}'"),
            )),
        }
    }
}

/// Opaque progress record attached to a distress event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackingUpdate {
    /// Unique identifier
    pub id: UpdateId,
    /// Distress event
    pub distress_id: DistressId,
    /// Assigned vehicle at the time of the update
    pub vehicle_id: Option<VehicleId>,
    /// Update kind
    pub kind: TrackingUpdateKind,
    /// Free text
    pub description: String,
    /// Vehicle's last known location, if any
    pub location: Option<Coordinates>,
    /// Creation instant
    pub created: Timestamp,
}
