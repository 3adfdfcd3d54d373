//! Distress event lifecycle
//!
//! A distress event is the unit of work: one report of a maternal emergency.
//! Status transitions form a DAG, `Reported -> {Dispatched, Cancelled}`,
//! `Dispatched -> {Resolved, Cancelled}`, with `Resolved` and `Cancelled`
//! terminal.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::types::{Coordinates, DistressId, FacilityId, Timestamp, UserId, VehicleId};

/// Nature of the reported emergency
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistressNature {
    /// Active labour
    Labor,
    /// Haemorrhage
    Bleeding,
    /// Road or domestic accident
    Accident,
    /// Anything else
    Other,
}

impl DistressNature {
    /// Priority assigned at creation
    pub fn initial_priority(&self) -> u8 {
        match self {
            DistressNature::Accident => 5,
            DistressNature::Bleeding => 4,
            DistressNature::Labor => 3,
            DistressNature::Other => 2,
        }
    }

    /// Wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            DistressNature::Labor => "labor",
            DistressNature::Bleeding => "bleeding",
            DistressNature::Accident => "accident",
            DistressNature::Other => "other",
        }
    }
}

impl FromStr for DistressNature {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "labor" | "labour" => Ok(DistressNature::Labor),
            "bleeding" => Ok(DistressNature::Bleeding),
            "accident" => Ok(DistressNature::Accident),
            "other" => Ok(DistressNature::Other),
            other => Err(Error::invalid_field(
                "nature",
                format!("unknown distress nature '{other}'"),
            )),
        }
    }
}

/// Distress lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistressStatus {
    /// Reported, no vehicle committed
    Reported,
    /// Vehicle reserved and engaged
    Dispatched,
    /// Handled at a facility
    Resolved,
    /// Withdrawn
    Cancelled,
}

impl DistressStatus {
    /// Check if state is terminal (resolved or cancelled)
    pub fn is_terminal(&self) -> bool {
        matches!(self, DistressStatus::Resolved | DistressStatus::Cancelled)
    }

    /// Check if state is active (reported or dispatched)
    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }

    /// Check if transition to new state is valid
    pub fn can_transition_to(&self, new_status: DistressStatus) -> bool {
        match (self, new_status) {
            (DistressStatus::Reported, DistressStatus::Dispatched) => true,
            (DistressStatus::Reported, DistressStatus::Cancelled) => true,
            (DistressStatus::Dispatched, DistressStatus::Resolved) => true,
            (DistressStatus::Dispatched, DistressStatus::Cancelled) => true,
            (DistressStatus::Resolved, _) => false,
            (DistressStatus::Cancelled, _) => false,
            _ => false,
        }
    }

    /// Wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            DistressStatus::Reported => "reported",
            DistressStatus::Dispatched => "dispatched",
            DistressStatus::Resolved => "resolved",
            DistressStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for DistressStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DistressStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "reported" => Ok(DistressStatus::Reported),
            "dispatched" => Ok(DistressStatus::Dispatched),
            "resolved" => Ok(DistressStatus::Resolved),
            "cancelled" | "canceled" => Ok(DistressStatus::Cancelled),
            other => Err(Error::invalid_field(
                "status",
                format!("unknown distress status '{other}'"),
            )),
        }
    }
}

/// Lowest allowed priority
pub const MIN_PRIORITY: u8 = 1;
/// Highest allowed priority
pub const MAX_PRIORITY: u8 = 5;

/// A reported maternal emergency
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistressEvent {
    /// Unique identifier
    pub id: DistressId,
    /// Person in distress
    pub subject_id: UserId,
    /// Person who raised the report
    pub reporter_id: UserId,
    /// Where help is needed
    pub coordinates: Coordinates,
    /// Nature of the emergency
    pub nature: DistressNature,
    /// Lifecycle status
    pub status: DistressStatus,
    /// Free-text description
    pub description: String,
    /// Priority in [1..5], only ever increases
    pub priority: u8,
    /// Vehicle committed by dispatch
    pub assigned_vehicle: Option<VehicleId>,
    /// Receiving facility
    pub assigned_facility: Option<FacilityId>,
    /// Estimated arrival of the assigned vehicle
    pub eta: Option<Timestamp>,
    /// Set when the ETA is a fallback default rather than a routed estimate
    #[serde(default)]
    pub eta_provisional: bool,
    /// First recorded arrival of the assigned vehicle
    pub arrived_at: Option<Timestamp>,
    /// When the event entered a terminal state
    pub resolved_at: Option<Timestamp>,
    /// Creation instant
    pub created: Timestamp,
    /// Last update instant
    pub updated: Timestamp,
    /// Optimistic concurrency version, bumped by every persisted write
    #[serde(default)]
    pub version: u64,
}

impl DistressEvent {
    /// Create a new event in `Reported` with priority derived from nature
    pub fn new(
        subject_id: UserId,
        reporter_id: UserId,
        coordinates: Coordinates,
        nature: DistressNature,
        description: String,
        now: Timestamp,
    ) -> Self {
        Self {
            id: DistressId::new(),
            subject_id,
            reporter_id,
            coordinates,
            nature,
            status: DistressStatus::Reported,
            description,
            priority: nature.initial_priority(),
            assigned_vehicle: None,
            assigned_facility: None,
            eta: None,
            eta_provisional: false,
            arrived_at: None,
            resolved_at: None,
            created: now,
            updated: now,
            version: 0,
        }
    }

    /// Transition to a new status, enforcing the lifecycle DAG
    pub fn transition(&mut self, new_status: DistressStatus, now: Timestamp) -> Result<()> {
        if !self.status.can_transition_to(new_status) {
            return Err(Error::validation(format!(
                "invalid transition from {} to {}",
                self.status, new_status
            )));
        }
        if new_status == DistressStatus::Resolved && self.assigned_facility.is_none() {
            return Err(Error::validation(
                "cannot resolve a distress event without an assigned facility",
            ));
        }
        if new_status == DistressStatus::Dispatched
            && (self.assigned_vehicle.is_none() || self.eta.is_none())
        {
            return Err(Error::validation(
                "dispatched requires an assigned vehicle and an eta",
            ));
        }

        self.status = new_status;
        self.updated = now;
        if new_status.is_terminal() {
            self.resolved_at = Some(now);
        }
        Ok(())
    }

    /// Raise the priority; lowering or leaving [1..5] is rejected
    pub fn raise_priority(&mut self, priority: u8, now: Timestamp) -> Result<()> {
        if !(MIN_PRIORITY..=MAX_PRIORITY).contains(&priority) {
            return Err(Error::invalid_field(
                "priority",
                format!("priority {priority} outside [{MIN_PRIORITY}, {MAX_PRIORITY}]"),
            ));
        }
        if priority < self.priority {
            return Err(Error::invalid_field(
                "priority",
                format!("priority may only increase (current {})", self.priority),
            ));
        }
        self.priority = priority;
        self.updated = now;
        Ok(())
    }

    /// Commit a vehicle and its ETA, moving to `Dispatched`
    pub fn mark_dispatched(
        &mut self,
        vehicle_id: VehicleId,
        eta: Timestamp,
        provisional: bool,
        now: Timestamp,
    ) -> Result<()> {
        if self.status != DistressStatus::Reported {
            return Err(Error::validation(format!(
                "distress {} is {}, expected reported",
                self.id, self.status
            )));
        }
        self.assigned_vehicle = Some(vehicle_id);
        self.eta = Some(eta);
        self.eta_provisional = provisional;
        self.transition(DistressStatus::Dispatched, now)
    }

    /// Dispatched-state invariant: vehicle and ETA are both set
    pub fn dispatch_invariant_holds(&self) -> bool {
        self.status != DistressStatus::Dispatched
            || (self.assigned_vehicle.is_some() && self.eta.is_some())
    }
}
