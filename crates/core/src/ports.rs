//! Ports to external collaborators
//!
//! Repositories, the route provider and the responder locator are consumed
//! through these object-safe traits and held as `Arc<dyn Trait>` by services.
//! Writes that carry a `version` are compare-and-set: a stale version yields
//! [`Error::Conflict`](crate::Error::Conflict).

use async_trait::async_trait;
use chrono::TimeDelta;

use crate::directory::{Contact, Facility, Subject, TrackingUpdate};
use crate::distress::{DistressEvent, DistressStatus};
use crate::error::Result;
use crate::escalation::{EscalationPath, EscalationRun, EscalationTier};
use crate::message::ScheduledMessage;
use crate::preferences::NotificationPreferences;
use crate::types::{
    ContactId, Coordinates, DistressId, FacilityId, MessageId, PathId, RunId, TierId, Timestamp,
    UserId, VehicleId,
};
use crate::vehicle::Vehicle;

/// Result of a route query
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Route {
    /// Travel distance
    pub distance_km: f64,
    /// Travel time
    pub duration: TimeDelta,
}

impl Route {
    /// Travel time in fractional minutes
    pub fn minutes(&self) -> f64 {
        self.duration.num_milliseconds() as f64 / 60_000.0
    }
}

/// Distance and travel time between two points
#[async_trait]
pub trait RouteProvider: Send + Sync {
    /// Route from `from` to `to`
    async fn route(&self, from: Coordinates, to: Coordinates) -> Result<Route>;
}

/// Discovers responders near a location
#[async_trait]
pub trait ResponderLocator: Send + Sync {
    /// Responders within `radius_km` of `center`
    async fn nearby_responders(&self, center: Coordinates, radius_km: f64) -> Result<Vec<UserId>>;
}

/// Locator that never finds anyone
#[derive(Debug, Clone, Copy, Default)]
pub struct NoResponders;

#[async_trait]
impl ResponderLocator for NoResponders {
    async fn nearby_responders(&self, _center: Coordinates, _radius_km: f64) -> Result<Vec<UserId>> {
        Ok(Vec::new())
    }
}

/// Distress event storage
#[async_trait]
pub trait DistressRepository: Send + Sync {
    /// Store a new event; returns the stored record with its first version
    async fn insert_distress(&self, event: &DistressEvent) -> Result<DistressEvent>;

    /// Fetch by id
    async fn get_distress(&self, id: DistressId) -> Result<Option<DistressEvent>>;

    /// Compare-and-set on `version`; returns the stored record
    async fn update_distress(&self, event: &DistressEvent) -> Result<DistressEvent>;

    /// Events in `Reported` or `Dispatched`
    async fn list_active_distress(&self) -> Result<Vec<DistressEvent>>;

    /// Events in the given status
    async fn list_distress_by_status(&self, status: DistressStatus) -> Result<Vec<DistressEvent>>;

    /// Events for one subject, any status
    async fn list_distress_by_subject(&self, subject: UserId) -> Result<Vec<DistressEvent>>;
}

/// Vehicle storage
#[async_trait]
pub trait VehicleRepository: Send + Sync {
    /// Store a new vehicle
    async fn insert_vehicle(&self, vehicle: &Vehicle) -> Result<Vehicle>;

    /// Fetch by id
    async fn get_vehicle(&self, id: VehicleId) -> Result<Option<Vehicle>>;

    /// Compare-and-set on `version`; returns the stored record
    async fn update_vehicle(&self, vehicle: &Vehicle) -> Result<Vehicle>;

    /// Every available vehicle
    async fn list_available_vehicles(&self) -> Result<Vec<Vehicle>>;

    /// Available vehicles with a known location within `radius_km` of `center`
    async fn available_vehicles_within(&self, center: Coordinates, radius_km: f64) -> Result<Vec<Vehicle>>;
}

/// Facility lookup
#[async_trait]
pub trait FacilityIndex: Send + Sync {
    /// Fetch by id
    async fn get_facility(&self, id: FacilityId) -> Result<Option<Facility>>;

    /// Facilities within `radius_km`, nearest first
    async fn facilities_within(&self, center: Coordinates, radius_km: f64) -> Result<Vec<Facility>>;

    /// Nearest facility, if any exist
    async fn nearest_facility(&self, center: Coordinates) -> Result<Option<Facility>>;
}

/// Subject lookup
#[async_trait]
pub trait SubjectDirectory: Send + Sync {
    /// Fetch by user id
    async fn get_subject(&self, id: UserId) -> Result<Option<Subject>>;
}

/// Contact lookup
#[async_trait]
pub trait ContactDirectory: Send + Sync {
    /// Fetch by id
    async fn get_contact(&self, id: ContactId) -> Result<Option<Contact>>;

    /// Contacts flagged for emergency broadcasts
    async fn emergency_contacts(&self) -> Result<Vec<Contact>>;
}

/// Tracking update storage
#[async_trait]
pub trait TrackingRepository: Send + Sync {
    /// Append an update
    async fn insert_update(&self, update: &TrackingUpdate) -> Result<()>;

    /// Updates for a distress event in creation order
    async fn list_updates(&self, distress_id: DistressId) -> Result<Vec<TrackingUpdate>>;
}

/// Escalation tiers, paths and runs
#[async_trait]
pub trait EscalationRepository: Send + Sync {
    /// Store a new tier; returns the stored record with its first version
    async fn insert_tier(&self, tier: &EscalationTier) -> Result<EscalationTier>;

    /// Fetch a tier
    async fn get_tier(&self, id: TierId) -> Result<Option<EscalationTier>>;

    /// Compare-and-set on `version`; returns the stored record
    async fn update_tier(&self, tier: &EscalationTier) -> Result<EscalationTier>;

    /// Remove a tier; returns false when absent
    async fn delete_tier(&self, id: TierId) -> Result<bool>;

    /// Every tier
    async fn list_tiers(&self) -> Result<Vec<EscalationTier>>;

    /// Store a new path; returns the stored record with its first version
    async fn insert_path(&self, path: &EscalationPath) -> Result<EscalationPath>;

    /// Fetch a path
    async fn get_path(&self, id: PathId) -> Result<Option<EscalationPath>>;

    /// Compare-and-set on `version`; returns the stored record
    async fn update_path(&self, path: &EscalationPath) -> Result<EscalationPath>;

    /// Every path
    async fn list_paths(&self) -> Result<Vec<EscalationPath>>;

    /// Store a new run; Conflict when the event already has an active run
    async fn insert_run(&self, run: &EscalationRun) -> Result<EscalationRun>;

    /// Fetch a run
    async fn get_run(&self, id: RunId) -> Result<Option<EscalationRun>>;

    /// Compare-and-set on `version`; returns the stored record
    async fn update_run(&self, run: &EscalationRun) -> Result<EscalationRun>;

    /// Active run for a distress event
    async fn active_run_for(&self, distress_id: DistressId) -> Result<Option<EscalationRun>>;

    /// Every active run
    async fn list_active_runs(&self) -> Result<Vec<EscalationRun>>;
}

/// Terminal outcome of a claimed message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion {
    /// Delivered
    Sent,
    /// Transport error or suppression, with reason
    Failed(String),
}

/// Scheduled message storage
#[async_trait]
pub trait MessageRepository: Send + Sync {
    /// Store a new pending message
    async fn insert_message(&self, message: &ScheduledMessage) -> Result<()>;

    /// Fetch by id
    async fn get_message(&self, id: MessageId) -> Result<Option<ScheduledMessage>>;

    /// `Pending -> Cancelled`; false when the message is not pending.
    /// NotFound when the id is unknown.
    async fn cancel_pending(&self, id: MessageId, now: Timestamp) -> Result<bool>;

    /// Atomically claim up to `limit` due pending messages for `worker_id`
    async fn claim_due(&self, worker_id: &str, now: Timestamp, limit: usize) -> Result<Vec<ScheduledMessage>>;

    /// Compare-and-set `Processing -> terminal` for the claiming worker;
    /// false when the message is no longer held by `worker_id`
    async fn complete(&self, id: MessageId, worker_id: &str, completion: Completion, now: Timestamp) -> Result<bool>;

    /// Messages addressed to a user
    async fn list_messages_for_user(&self, user_id: UserId) -> Result<Vec<ScheduledMessage>>;
}

/// Notification preference storage
#[async_trait]
pub trait PreferenceRepository: Send + Sync {
    /// Fetch a user's preferences
    async fn get_preferences(&self, user_id: UserId) -> Result<Option<NotificationPreferences>>;

    /// Insert or replace
    async fn put_preferences(&self, prefs: &NotificationPreferences) -> Result<()>;
}
