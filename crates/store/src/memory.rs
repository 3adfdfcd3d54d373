//! In-process store implementing every repository port
//!
//! Each table sits behind its own `parking_lot::RwLock`. Versioned writes are
//! compare-and-set under the write lock, which serialises writes per id.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::debug;

use crate::error::stale;

use lifeline_core::message::MessageStatus;
use lifeline_core::{
    Completion, Contact, ContactDirectory, ContactId, Coordinates, DistressEvent, DistressId,
    DistressRepository, DistressStatus, Error, EscalationPath, EscalationRepository, EscalationRun,
    EscalationTier, Facility, FacilityId, FacilityIndex, MessageId, MessageRepository,
    NotificationPreferences, PathId, PreferenceRepository, Result, RunId, ScheduledMessage,
    Subject, SubjectDirectory, TierId, Timestamp, TrackingRepository, TrackingUpdate, UserId,
    Vehicle, VehicleId, VehicleRepository, VehicleStatus,
};

/// In-memory implementation of every repository port
#[derive(Debug, Default)]
pub struct MemoryStore {
    distress: RwLock<HashMap<DistressId, DistressEvent>>,
    vehicles: RwLock<HashMap<VehicleId, Vehicle>>,
    facilities: RwLock<HashMap<FacilityId, Facility>>,
    subjects: RwLock<HashMap<UserId, Subject>>,
    contacts: RwLock<HashMap<ContactId, Contact>>,
    updates: RwLock<Vec<TrackingUpdate>>,
    tiers: RwLock<HashMap<TierId, EscalationTier>>,
    paths: RwLock<HashMap<PathId, EscalationPath>>,
    runs: RwLock<HashMap<RunId, EscalationRun>>,
    messages: RwLock<HashMap<MessageId, ScheduledMessage>>,
    preferences: RwLock<HashMap<UserId, NotificationPreferences>>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a facility
    pub fn insert_facility(&self, facility: Facility) {
        self.facilities.write().insert(facility.id, facility);
    }

    /// Register a subject
    pub fn insert_subject(&self, subject: Subject) {
        self.subjects.write().insert(subject.id, subject);
    }

    /// Register a contact
    pub fn insert_contact(&self, contact: Contact) {
        self.contacts.write().insert(contact.id, contact);
    }

    /// Number of stored scheduled messages in a status
    pub fn count_messages(&self, status: MessageStatus) -> usize {
        self.messages
            .read()
            .values()
            .filter(|m| m.status == status)
            .count()
    }
}

fn sorted_by_created(mut events: Vec<DistressEvent>) -> Vec<DistressEvent> {
    events.sort_by(|a, b| a.created.cmp(&b.created).then(a.id.cmp(&b.id)));
    events
}

#[async_trait]
impl DistressRepository for MemoryStore {
    async fn insert_distress(&self, event: &DistressEvent) -> Result<DistressEvent> {
        let mut table = self.distress.write();
        if table.contains_key(&event.id) {
            return Err(Error::conflict(format!("distress {} already exists", event.id)));
        }
        let mut stored = event.clone();
        stored.version = 1;
        table.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn get_distress(&self, id: DistressId) -> Result<Option<DistressEvent>> {
        Ok(self.distress.read().get(&id).cloned())
    }

    async fn update_distress(&self, event: &DistressEvent) -> Result<DistressEvent> {
        let mut table = self.distress.write();
        let current = table
            .get(&event.id)
            .ok_or_else(|| Error::not_found(DistressId::RESOURCE, event.id))?;
        if current.version != event.version {
            return Err(stale("distress", event.id, event.version, current.version));
        }
        let mut stored = event.clone();
        stored.version += 1;
        table.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn list_active_distress(&self) -> Result<Vec<DistressEvent>> {
        let events = self
            .distress
            .read()
            .values()
            .filter(|e| e.status.is_active())
            .cloned()
            .collect();
        Ok(sorted_by_created(events))
    }

    async fn list_distress_by_status(&self, status: DistressStatus) -> Result<Vec<DistressEvent>> {
        let events = self
            .distress
            .read()
            .values()
            .filter(|e| e.status == status)
            .cloned()
            .collect();
        Ok(sorted_by_created(events))
    }

    async fn list_distress_by_subject(&self, subject: UserId) -> Result<Vec<DistressEvent>> {
        let events = self
            .distress
            .read()
            .values()
            .filter(|e| e.subject_id == subject)
            .cloned()
            .collect();
        Ok(sorted_by_created(events))
    }
}

#[async_trait]
impl VehicleRepository for MemoryStore {
    async fn insert_vehicle(&self, vehicle: &Vehicle) -> Result<Vehicle> {
        let mut table = self.vehicles.write();
        if table.contains_key(&vehicle.id) {
            return Err(Error::conflict(format!("vehicle {} already exists", vehicle.id)));
        }
        let mut stored = vehicle.clone();
        stored.version = 1;
        table.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn get_vehicle(&self, id: VehicleId) -> Result<Option<Vehicle>> {
        Ok(self.vehicles.read().get(&id).cloned())
    }

    async fn update_vehicle(&self, vehicle: &Vehicle) -> Result<Vehicle> {
        let mut table = self.vehicles.write();
        let current = table
            .get(&vehicle.id)
            .ok_or_else(|| Error::not_found(VehicleId::RESOURCE, vehicle.id))?;
        if current.version != vehicle.version {
            return Err(stale("vehicle", vehicle.id, vehicle.version, current.version));
        }
        let mut stored = vehicle.clone();
        stored.version += 1;
        table.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn list_available_vehicles(&self) -> Result<Vec<Vehicle>> {
        let mut vehicles: Vec<Vehicle> = self
            .vehicles
            .read()
            .values()
            .filter(|v| v.status == VehicleStatus::Available)
            .cloned()
            .collect();
        vehicles.sort_by_key(|v| v.id);
        Ok(vehicles)
    }

    async fn available_vehicles_within(&self, center: Coordinates, radius_km: f64) -> Result<Vec<Vehicle>> {
        let mut vehicles: Vec<Vehicle> = self
            .vehicles
            .read()
            .values()
            .filter(|v| v.status == VehicleStatus::Available)
            .filter(|v| {
                v.last_known_location
                    .is_some_and(|loc| loc.within(&center, radius_km))
            })
            .cloned()
            .collect();
        vehicles.sort_by_key(|v| v.id);
        Ok(vehicles)
    }
}

#[async_trait]
impl FacilityIndex for MemoryStore {
    async fn get_facility(&self, id: FacilityId) -> Result<Option<Facility>> {
        Ok(self.facilities.read().get(&id).cloned())
    }

    async fn facilities_within(&self, center: Coordinates, radius_km: f64) -> Result<Vec<Facility>> {
        let mut found: Vec<(f64, Facility)> = self
            .facilities
            .read()
            .values()
            .map(|f| (f.coordinates.distance_km(&center), f.clone()))
            .filter(|(d, _)| *d <= radius_km)
            .collect();
        found.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.id.cmp(&b.1.id)));
        Ok(found.into_iter().map(|(_, f)| f).collect())
    }

    async fn nearest_facility(&self, center: Coordinates) -> Result<Option<Facility>> {
        Ok(self
            .facilities
            .read()
            .values()
            .min_by(|a, b| {
                a.coordinates
                    .distance_km(&center)
                    .total_cmp(&b.coordinates.distance_km(&center))
                    .then(a.id.cmp(&b.id))
            })
            .cloned())
    }
}

#[async_trait]
impl SubjectDirectory for MemoryStore {
    async fn get_subject(&self, id: UserId) -> Result<Option<Subject>> {
        Ok(self.subjects.read().get(&id).cloned())
    }
}

#[async_trait]
impl ContactDirectory for MemoryStore {
    async fn get_contact(&self, id: ContactId) -> Result<Option<Contact>> {
        Ok(self.contacts.read().get(&id).cloned())
    }

    async fn emergency_contacts(&self) -> Result<Vec<Contact>> {
        let mut contacts: Vec<Contact> = self
            .contacts
            .read()
            .values()
            .filter(|c| c.emergency)
            .cloned()
            .collect();
        contacts.sort_by_key(|c| c.id);
        Ok(contacts)
    }
}

#[async_trait]
impl TrackingRepository for MemoryStore {
    async fn insert_update(&self, update: &TrackingUpdate) -> Result<()> {
        self.updates.write().push(update.clone());
        Ok(())
    }

    async fn list_updates(&self, distress_id: DistressId) -> Result<Vec<TrackingUpdate>> {
        Ok(self
            .updates
            .read()
            .iter()
            .filter(|u| u.distress_id == distress_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl EscalationRepository for MemoryStore {
    async fn insert_tier(&self, tier: &EscalationTier) -> Result<EscalationTier> {
        let mut table = self.tiers.write();
        if table.contains_key(&tier.id) {
            return Err(Error::conflict(format!("tier {} already exists", tier.id)));
        }
        let mut stored = tier.clone();
        stored.version = 1;
        table.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn get_tier(&self, id: TierId) -> Result<Option<EscalationTier>> {
        Ok(self.tiers.read().get(&id).cloned())
    }

    async fn update_tier(&self, tier: &EscalationTier) -> Result<EscalationTier> {
        let mut table = self.tiers.write();
        let current = table
            .get(&tier.id)
            .ok_or_else(|| Error::not_found(TierId::RESOURCE, tier.id))?;
        if current.version != tier.version {
            return Err(stale("tier", tier.id, tier.version, current.version));
        }
        let mut stored = tier.clone();
        stored.version += 1;
        table.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn delete_tier(&self, id: TierId) -> Result<bool> {
        Ok(self.tiers.write().remove(&id).is_some())
    }

    async fn list_tiers(&self) -> Result<Vec<EscalationTier>> {
        let mut tiers: Vec<EscalationTier> = self.tiers.read().values().cloned().collect();
        tiers.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        Ok(tiers)
    }

    async fn insert_path(&self, path: &EscalationPath) -> Result<EscalationPath> {
        let mut table = self.paths.write();
        if table.contains_key(&path.id) {
            return Err(Error::conflict(format!("path {} already exists", path.id)));
        }
        let mut stored = path.clone();
        stored.version = 1;
        table.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn get_path(&self, id: PathId) -> Result<Option<EscalationPath>> {
        Ok(self.paths.read().get(&id).cloned())
    }

    async fn update_path(&self, path: &EscalationPath) -> Result<EscalationPath> {
        let mut table = self.paths.write();
        let current = table
            .get(&path.id)
            .ok_or_else(|| Error::not_found(PathId::RESOURCE, path.id))?;
        if current.version != path.version {
            return Err(stale("path", path.id, path.version, current.version));
        }
        let mut stored = path.clone();
        stored.version += 1;
        table.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn list_paths(&self) -> Result<Vec<EscalationPath>> {
        let mut paths: Vec<EscalationPath> = self.paths.read().values().cloned().collect();
        paths.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        Ok(paths)
    }

    async fn insert_run(&self, run: &EscalationRun) -> Result<EscalationRun> {
        let mut table = self.runs.write();
        if table
            .values()
            .any(|r| r.distress_id == run.distress_id && r.is_active())
        {
            return Err(Error::conflict(format!(
                "distress {} already has an active escalation run",
                run.distress_id
            )));
        }
        let mut stored = run.clone();
        stored.version = 1;
        table.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn get_run(&self, id: RunId) -> Result<Option<EscalationRun>> {
        Ok(self.runs.read().get(&id).cloned())
    }

    async fn update_run(&self, run: &EscalationRun) -> Result<EscalationRun> {
        let mut table = self.runs.write();
        let current = table
            .get(&run.id)
            .ok_or_else(|| Error::not_found(RunId::RESOURCE, run.id))?;
        if current.version != run.version {
            return Err(stale("escalation run", run.id, run.version, current.version));
        }
        let mut stored = run.clone();
        stored.version += 1;
        table.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn active_run_for(&self, distress_id: DistressId) -> Result<Option<EscalationRun>> {
        Ok(self
            .runs
            .read()
            .values()
            .find(|r| r.distress_id == distress_id && r.is_active())
            .cloned())
    }

    async fn list_active_runs(&self) -> Result<Vec<EscalationRun>> {
        let mut runs: Vec<EscalationRun> = self
            .runs
            .read()
            .values()
            .filter(|r| r.is_active())
            .cloned()
            .collect();
        runs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(runs)
    }
}

#[async_trait]
impl MessageRepository for MemoryStore {
    async fn insert_message(&self, message: &ScheduledMessage) -> Result<()> {
        let mut table = self.messages.write();
        if table.contains_key(&message.id) {
            return Err(Error::conflict(format!("message {} already exists", message.id)));
        }
        table.insert(message.id, message.clone());
        Ok(())
    }

    async fn get_message(&self, id: MessageId) -> Result<Option<ScheduledMessage>> {
        Ok(self.messages.read().get(&id).cloned())
    }

    async fn cancel_pending(&self, id: MessageId, now: Timestamp) -> Result<bool> {
        let mut table = self.messages.write();
        let message = table
            .get_mut(&id)
            .ok_or_else(|| Error::not_found(MessageId::RESOURCE, id))?;
        if message.status != MessageStatus::Pending {
            return Ok(false);
        }
        message.updated = message.next_stamp(now);
        message.status = MessageStatus::Cancelled;
        Ok(true)
    }

    async fn claim_due(&self, worker_id: &str, now: Timestamp, limit: usize) -> Result<Vec<ScheduledMessage>> {
        let mut table = self.messages.write();
        let mut due: Vec<&mut ScheduledMessage> = table
            .values_mut()
            .filter(|m| m.status == MessageStatus::Pending && m.scheduled_for <= now)
            .collect();
        due.sort_by(|a, b| a.scheduled_for.cmp(&b.scheduled_for).then(a.id.cmp(&b.id)));

        let mut claimed = Vec::with_capacity(limit.min(due.len()));
        for message in due.into_iter().take(limit) {
            message.updated = message.next_stamp(now);
            message.status = MessageStatus::Processing;
            message.claimed_by = Some(worker_id.to_string());
            claimed.push(message.clone());
        }
        debug!(worker_id = %worker_id, claimed = claimed.len(), "Claimed due messages");
        Ok(claimed)
    }

    async fn complete(&self, id: MessageId, worker_id: &str, completion: Completion, now: Timestamp) -> Result<bool> {
        let mut table = self.messages.write();
        let message = table
            .get_mut(&id)
            .ok_or_else(|| Error::not_found(MessageId::RESOURCE, id))?;
        if message.status != MessageStatus::Processing
            || message.claimed_by.as_deref() != Some(worker_id)
        {
            return Ok(false);
        }
        message.updated = message.next_stamp(now);
        match completion {
            Completion::Sent => {
                message.status = MessageStatus::Sent;
                message.sent_at = Some(now);
            }
            Completion::Failed(reason) => {
                message.status = MessageStatus::Failed;
                message.last_error = Some(reason);
            }
        }
        Ok(true)
    }

    async fn list_messages_for_user(&self, user_id: UserId) -> Result<Vec<ScheduledMessage>> {
        let mut messages: Vec<ScheduledMessage> = self
            .messages
            .read()
            .values()
            .filter(|m| m.recipient_user_id == Some(user_id))
            .cloned()
            .collect();
        messages.sort_by(|a, b| a.scheduled_for.cmp(&b.scheduled_for).then(a.id.cmp(&b.id)));
        Ok(messages)
    }
}

#[async_trait]
impl PreferenceRepository for MemoryStore {
    async fn get_preferences(&self, user_id: UserId) -> Result<Option<NotificationPreferences>> {
        Ok(self.preferences.read().get(&user_id).cloned())
    }

    async fn put_preferences(&self, prefs: &NotificationPreferences) -> Result<()> {
        self.preferences.write().insert(prefs.user_id, prefs.clone());
        Ok(())
    }
}
