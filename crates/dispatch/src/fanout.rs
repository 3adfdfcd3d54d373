//! Alert fanout to facilities and contacts
//!
//! Every notifier call is best-effort. A fanout reports an error only when
//! there were recipients to reach and none of them was reached.

use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, warn};

use lifeline_core::config::AlertsConfig;
use lifeline_core::{
    AlertLevel, ContactDirectory, DistressEvent, Error, FacilityId, FacilityIndex, Notification,
    Notifier, Result,
};

/// Deliver a notification, logging and swallowing failures; returns recipients reached
pub async fn deliver_best_effort(notifier: &dyn Notifier, notification: &Notification) -> usize {
    match notifier.deliver(notification).await {
        Ok(delivery) => delivery.reached,
        Err(e) => {
            warn!(
                kind = notification.name(),
                distress_id = %notification.distress_id(),
                error = %e,
                "Notification failed"
            );
            0
        }
    }
}

fn describe(event: &DistressEvent) -> String {
    format!(
        "{} emergency reported at {} (priority {})",
        event.nature.as_str(),
        event.coordinates,
        event.priority
    )
}

/// Level-mapped notifications to facilities and contacts
pub struct AlertFanout {
    facilities: Arc<dyn FacilityIndex>,
    contacts: Arc<dyn ContactDirectory>,
    notifier: Arc<dyn Notifier>,
    nearby_radius_km: f64,
}

impl AlertFanout {
    /// Create a fanout
    pub fn new(
        facilities: Arc<dyn FacilityIndex>,
        contacts: Arc<dyn ContactDirectory>,
        notifier: Arc<dyn Notifier>,
        config: &AlertsConfig,
    ) -> Self {
        Self {
            facilities,
            contacts,
            notifier,
            nearby_radius_km: config.nearby_radius_km,
        }
    }

    /// Underlying notifier
    pub fn notifier(&self) -> &Arc<dyn Notifier> {
        &self.notifier
    }

    /// Default radius for nearby alerts
    pub fn nearby_radius_km(&self) -> f64 {
        self.nearby_radius_km
    }

    async fn send(&self, notification: Notification) -> Result<usize> {
        let targets = notification.target_count();
        if targets == 0 {
            debug!(
                kind = notification.name(),
                distress_id = %notification.distress_id(),
                "No recipients for notification"
            );
            return Ok(0);
        }
        match self.notifier.deliver(&notification).await {
            Ok(delivery) if delivery.reached > 0 => Ok(delivery.reached),
            Ok(_) => {
                warn!(
                    kind = notification.name(),
                    distress_id = %notification.distress_id(),
                    targets,
                    "Notification reached nobody"
                );
                Err(Error::internal(format!(
                    "{} notification reached none of {targets} recipients",
                    notification.name()
                )))
            }
            Err(e) => {
                warn!(
                    kind = notification.name(),
                    distress_id = %notification.distress_id(),
                    error = %e,
                    "Notification failed"
                );
                Err(Error::internal(format!("{} notification failed: {e}", notification.name())))
            }
        }
    }

    /// Broadcast once to every facility within `radius_km`
    pub async fn alert_nearby_facilities(&self, event: &DistressEvent, radius_km: f64) -> Result<usize> {
        let facilities: Vec<FacilityId> = self
            .facilities
            .facilities_within(event.coordinates, radius_km)
            .await?
            .into_iter()
            .map(|f| f.id)
            .collect();
        self.send(Notification::RegionalBroadcast {
            distress_id: event.id,
            level: AlertLevel::for_nature(event.nature),
            facilities,
            message: describe(event),
        })
        .await
    }

    /// Broadcast to every emergency contact
    pub async fn alert_emergency_contacts(&self, event: &DistressEvent) -> Result<usize> {
        let contacts = self
            .contacts
            .emergency_contacts()
            .await?
            .into_iter()
            .map(|c| c.id)
            .collect();
        self.send(Notification::ContactBroadcast {
            distress_id: event.id,
            level: AlertLevel::for_nature(event.nature),
            contacts,
            message: describe(event),
        })
        .await
    }

    /// Alert a single facility
    pub async fn alert_facility(&self, event: &DistressEvent, facility_id: FacilityId) -> Result<usize> {
        if self.facilities.get_facility(facility_id).await?.is_none() {
            return Err(Error::not_found(FacilityId::RESOURCE, facility_id));
        }
        self.send(Notification::FacilityAlert {
            distress_id: event.id,
            level: AlertLevel::for_nature(event.nature),
            facility_id,
            message: describe(event),
        })
        .await
    }

    /// Info-level update to the assigned facility and facilities nearby
    pub async fn send_status_alert(&self, event: &DistressEvent, message: &str) -> Result<usize> {
        let mut facilities = BTreeSet::new();
        if let Some(assigned) = event.assigned_facility {
            facilities.insert(assigned);
        }
        for facility in self
            .facilities
            .facilities_within(event.coordinates, self.nearby_radius_km)
            .await?
        {
            facilities.insert(facility.id);
        }
        self.send(Notification::StatusUpdate {
            distress_id: event.id,
            facilities: facilities.into_iter().collect(),
            message: format!("{} is {}: {message}", event.id, event.status),
        })
        .await
    }
}
