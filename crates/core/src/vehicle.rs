//! Response vehicles
//!
//! Vehicle status follows `Available -> Dispatched -> EnRoute -> Arrived ->
//! Returning -> Available`. `Maintenance` is reachable from any state and
//! returns to `Available` only. A vehicle carries a current distress id exactly
//! while it is engaged (Dispatched, EnRoute, Arrived, Returning).

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::types::{Coordinates, DistressId, FacilityId, Timestamp, UserId, VehicleId};

/// Vehicle equipment class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VehicleKind {
    /// Basic life support
    Basic,
    /// Advanced life support
    Advanced,
    /// Obstetric-equipped ambulance
    Obstetric,
}

impl VehicleKind {
    /// Patient capacity
    pub fn capacity(&self) -> u32 {
        match self {
            VehicleKind::Basic => 1,
            VehicleKind::Advanced => 2,
            VehicleKind::Obstetric => 2,
        }
    }

    /// Ranking bonus; obstetric units are preferred for maternal distress
    pub fn score_bonus(&self) -> f64 {
        match self {
            VehicleKind::Obstetric => 50.0,
            VehicleKind::Advanced => 30.0,
            VehicleKind::Basic => 10.0,
        }
    }
}

impl FromStr for VehicleKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "basic" => Ok(VehicleKind::Basic),
            "advanced" => Ok(VehicleKind::Advanced),
            "obstetric" => Ok(VehicleKind::Obstetric),
            other => Err(Error::invalid_field(
                "kind",
                format!("unknown vehicle kind '{other}'"),
            )),
        }
    }
}

/// Vehicle operational status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VehicleStatus {
    /// Ready for dispatch
    Available,
    /// Reserved for a distress event
    Dispatched,
    /// Travelling to the scene
    EnRoute,
    /// On scene
    Arrived,
    /// Returning to base
    Returning,
    /// Out of service
    Maintenance,
}

impl VehicleStatus {
    /// Engaged states carry a current distress id
    pub fn is_engaged(&self) -> bool {
        matches!(
            self,
            VehicleStatus::Dispatched
                | VehicleStatus::EnRoute
                | VehicleStatus::Arrived
                | VehicleStatus::Returning
        )
    }

    /// Check if transition to new status is valid
    pub fn can_transition_to(&self, new_status: VehicleStatus) -> bool {
        match (self, new_status) {
            (_, VehicleStatus::Maintenance) => *self != VehicleStatus::Maintenance,
            (VehicleStatus::Available, VehicleStatus::Dispatched) => true,
            (VehicleStatus::Dispatched, VehicleStatus::EnRoute) => true,
            (VehicleStatus::EnRoute, VehicleStatus::Arrived) => true,
            (VehicleStatus::Arrived, VehicleStatus::Returning) => true,
            (VehicleStatus::Returning, VehicleStatus::Available) => true,
            (VehicleStatus::Maintenance, VehicleStatus::Available) => true,
            _ => false,
        }
    }

    /// Wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            VehicleStatus::Available => "available",
            VehicleStatus::Dispatched => "dispatched",
            VehicleStatus::EnRoute => "en_route",
            VehicleStatus::Arrived => "arrived",
            VehicleStatus::Returning => "returning",
            VehicleStatus::Maintenance => "maintenance",
        }
    }
}

impl fmt::Display for VehicleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VehicleStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "available" => Ok(VehicleStatus::Available),
            "dispatched" => Ok(VehicleStatus::Dispatched),
            "en_route" | "enroute" => Ok(VehicleStatus::EnRoute),
            "arrived" => Ok(VehicleStatus::Arrived),
            "returning" => Ok(VehicleStatus::Returning),
            "maintenance" => Ok(VehicleStatus::Maintenance),
            other => Err(Error::invalid_field(
                "status",
                format!("unknown vehicle status '{other}'"),
            )),
        }
    }
}

/// A response vehicle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vehicle {
    /// Unique identifier
    pub id: VehicleId,
    /// Radio call sign
    pub call_sign: String,
    /// Equipment class
    pub kind: VehicleKind,
    /// Patient capacity, derived from kind
    pub capacity: u32,
    /// Operational status
    pub status: VehicleStatus,
    /// Distress event the vehicle is engaged on
    pub current_distress_id: Option<DistressId>,
    /// Home base
    pub home_facility: FacilityId,
    /// Last reported position
    pub last_known_location: Option<Coordinates>,
    /// Crew members
    pub crew: BTreeSet<UserId>,
    /// Last update instant
    pub last_updated: Timestamp,
    /// Optimistic concurrency version, bumped by every persisted write
    #[serde(default)]
    pub version: u64,
}

impl Vehicle {
    /// Create an available vehicle
    pub fn new(call_sign: impl Into<String>, kind: VehicleKind, home_facility: FacilityId, now: Timestamp) -> Self {
        Self {
            id: VehicleId::new(),
            call_sign: call_sign.into(),
            kind,
            capacity: kind.capacity(),
            status: VehicleStatus::Available,
            current_distress_id: None,
            home_facility,
            last_known_location: None,
            crew: BTreeSet::new(),
            last_updated: now,
            version: 0,
        }
    }

    /// Set the last known location
    pub fn with_location(mut self, location: Coordinates) -> Self {
        self.last_known_location = Some(location);
        self
    }

    /// Reserve the vehicle for a distress event
    pub fn reserve(&mut self, distress_id: DistressId, now: Timestamp) -> Result<()> {
        if self.status != VehicleStatus::Available {
            return Err(Error::validation("vehicle not available"));
        }
        self.status = VehicleStatus::Dispatched;
        self.current_distress_id = Some(distress_id);
        self.last_updated = now;
        Ok(())
    }

    /// Release an engagement back to `Available`
    pub fn release(&mut self, now: Timestamp) {
        self.status = VehicleStatus::Available;
        self.current_distress_id = None;
        self.last_updated = now;
    }

    /// Apply a status transition, maintaining the engagement invariant
    pub fn transition(&mut self, new_status: VehicleStatus, now: Timestamp) -> Result<()> {
        if !self.status.can_transition_to(new_status) {
            return Err(Error::validation(format!(
                "invalid vehicle transition from {} to {}",
                self.status, new_status
            )));
        }
        if new_status.is_engaged() && self.current_distress_id.is_none() {
            return Err(Error::validation(format!(
                "vehicle {} has no current distress; {} requires an engagement",
                self.id, new_status
            )));
        }

        self.status = new_status;
        if !new_status.is_engaged() {
            self.current_distress_id = None;
        }
        self.last_updated = now;
        Ok(())
    }

    /// Engagement invariant: distress id set iff status is engaged
    pub fn engagement_invariant_holds(&self) -> bool {
        self.status.is_engaged() == self.current_distress_id.is_some()
    }
}
