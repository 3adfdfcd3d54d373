//! Distress coordinator
//!
//! Owns the distress event lifecycle: report, lookups, public status changes,
//! facility assignment and priority. `Dispatched` is only entered through the
//! dispatch engine.

use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

use lifeline_core::{
    ensure_active, CancellationToken, Clock, Coordinates, DistressEvent, DistressId,
    DistressNature, DistressRepository, DistressStatus, Error, FacilityId, FacilityIndex,
    ResponderLocator, Result, SubjectDirectory, UserId,
};

use crate::fanout::AlertFanout;

/// Input to [`DistressCoordinator::report`]
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ReportDistress {
    /// Person in distress
    pub subject_id: UserId,
    /// Person raising the report
    pub reporter_id: UserId,
    /// Location
    pub coordinates: Coordinates,
    /// Nature of the emergency
    pub nature: DistressNature,
    /// Free text
    #[serde(default)]
    pub description: String,
}

/// State machine for distress events
pub struct DistressCoordinator {
    distress: Arc<dyn DistressRepository>,
    subjects: Arc<dyn SubjectDirectory>,
    facilities: Arc<dyn FacilityIndex>,
    locator: Arc<dyn ResponderLocator>,
    fanout: Arc<AlertFanout>,
    clock: Arc<dyn Clock>,
}

impl DistressCoordinator {
    /// Create a coordinator
    pub fn new(
        distress: Arc<dyn DistressRepository>,
        subjects: Arc<dyn SubjectDirectory>,
        facilities: Arc<dyn FacilityIndex>,
        locator: Arc<dyn ResponderLocator>,
        fanout: Arc<AlertFanout>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            distress,
            subjects,
            facilities,
            locator,
            fanout,
            clock,
        }
    }

    /// Record a new distress event, assign a facility and alert the area
    pub async fn report(&self, cancel: &CancellationToken, input: ReportDistress) -> Result<DistressEvent> {
        ensure_active(cancel)?;
        input.coordinates.validate()?;

        let subject = self
            .subjects
            .get_subject(input.subject_id)
            .await?
            .ok_or_else(|| Error::not_found("Subject", input.subject_id))?;

        let now = self.clock.now();
        let mut event = DistressEvent::new(
            subject.id,
            input.reporter_id,
            input.coordinates,
            input.nature,
            input.description.trim().to_string(),
            now,
        );

        event.assigned_facility = match subject.primary_facility {
            Some(primary) => Some(primary),
            None => match self.facilities.nearest_facility(input.coordinates).await {
                Ok(nearest) => nearest.map(|f| f.id),
                Err(e) => {
                    warn!(subject_id = %subject.id, error = %e, "Nearest facility lookup failed");
                    None
                }
            },
        };

        ensure_active(cancel)?;
        let stored = self.distress.insert_distress(&event).await?;
        info!(
            distress_id = %stored.id,
            nature = stored.nature.as_str(),
            priority = stored.priority,
            facility_id = ?stored.assigned_facility,
            "Distress reported"
        );

        self.initial_fanout(&stored).await;
        Ok(stored)
    }

    async fn initial_fanout(&self, event: &DistressEvent) {
        let radius = self.fanout.nearby_radius_km();
        if let Err(e) = self.fanout.alert_nearby_facilities(event, radius).await {
            warn!(distress_id = %event.id, error = %e, "Facility fanout failed");
        }
        if let Err(e) = self.fanout.alert_emergency_contacts(event).await {
            warn!(distress_id = %event.id, error = %e, "Emergency contact fanout failed");
        }
        match self.locator.nearby_responders(event.coordinates, radius).await {
            Ok(responders) => {
                debug!(distress_id = %event.id, responders = responders.len(), "Nearby responders located")
            }
            Err(e) => warn!(distress_id = %event.id, error = %e, "Responder lookup failed"),
        }
    }

    /// Fetch an event
    pub async fn get(&self, cancel: &CancellationToken, id: DistressId) -> Result<DistressEvent> {
        ensure_active(cancel)?;
        self.distress
            .get_distress(id)
            .await?
            .ok_or_else(|| Error::not_found(DistressId::RESOURCE, id))
    }

    /// Events in `Reported` or `Dispatched`
    pub async fn list_active(&self, cancel: &CancellationToken) -> Result<Vec<DistressEvent>> {
        ensure_active(cancel)?;
        self.distress.list_active_distress().await
    }

    /// Every event for a subject
    pub async fn list_by_subject(&self, cancel: &CancellationToken, subject: UserId) -> Result<Vec<DistressEvent>> {
        ensure_active(cancel)?;
        self.distress.list_distress_by_subject(subject).await
    }

    /// Active events within `radius_km` of `center`
    pub async fn list_within_radius(
        &self,
        cancel: &CancellationToken,
        center: Coordinates,
        radius_km: f64,
    ) -> Result<Vec<DistressEvent>> {
        center.validate()?;
        if !(radius_km > 0.0) {
            return Err(Error::invalid_field("radius_km", "radius must be positive"));
        }
        let active = self.list_active(cancel).await?;
        Ok(active
            .into_iter()
            .filter(|e| e.coordinates.within(&center, radius_km))
            .collect())
    }

    /// Public status change; `Dispatched` is reserved for the dispatch engine
    pub async fn set_status(
        &self,
        cancel: &CancellationToken,
        id: DistressId,
        status: DistressStatus,
    ) -> Result<DistressEvent> {
        if status == DistressStatus::Dispatched {
            return Err(Error::invalid_field(
                "status",
                "dispatched is reserved for the dispatch engine",
            ));
        }
        let mut event = self.get(cancel, id).await?;
        let previous = event.status;
        event
            .transition(status, self.clock.now())
            .map_err(|e| e.context(format!("distress {id}")))?;

        ensure_active(cancel)?;
        let stored = self.distress.update_distress(&event).await?;
        info!(
            distress_id = %id,
            from = previous.as_str(),
            to = stored.status.as_str(),
            "Distress status changed"
        );
        Ok(stored)
    }

    /// Assign the receiving facility
    pub async fn attach_facility(
        &self,
        cancel: &CancellationToken,
        id: DistressId,
        facility_id: FacilityId,
    ) -> Result<DistressEvent> {
        let mut event = self.get(cancel, id).await?;
        if event.status.is_terminal() {
            return Err(Error::validation(format!(
                "distress {id} is {} and cannot change facility",
                event.status
            )));
        }
        if self.facilities.get_facility(facility_id).await?.is_none() {
            return Err(Error::not_found(FacilityId::RESOURCE, facility_id));
        }

        event.assigned_facility = Some(facility_id);
        event.updated = self.clock.now();
        ensure_active(cancel)?;
        let stored = self.distress.update_distress(&event).await?;
        info!(distress_id = %id, facility_id = %facility_id, "Facility assigned");
        Ok(stored)
    }

    /// Raise the priority
    pub async fn set_priority(&self, cancel: &CancellationToken, id: DistressId, priority: u8) -> Result<DistressEvent> {
        let mut event = self.get(cancel, id).await?;
        if event.status.is_terminal() {
            return Err(Error::validation(format!(
                "distress {id} is {} and cannot change priority",
                event.status
            )));
        }
        event.raise_priority(priority, self.clock.now())?;
        ensure_active(cancel)?;
        let stored = self.distress.update_distress(&event).await?;
        info!(distress_id = %id, priority, "Priority raised");
        Ok(stored)
    }
}
