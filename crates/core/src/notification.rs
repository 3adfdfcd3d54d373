//! Outbound notifications and the notifier port
//!
//! Every alert the coordination core raises is a [`Notification`] handed to a
//! [`Notifier`]. Delivery is best-effort; callers log failures and carry on.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{info, warn};

use crate::distress::DistressNature;
use crate::error::Result;
use crate::escalation::EscalationLevel;
use crate::types::{ContactId, DistressId, FacilityId, TierId, Timestamp, VehicleId};

/// Severity attached to alerts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertLevel {
    /// Informational status update
    Info,
    /// Needs attention
    Warning,
    /// Emergency response required
    Emergency,
    /// Life-threatening
    Critical,
}

impl AlertLevel {
    /// Level derived from the nature of a distress event
    pub fn for_nature(nature: DistressNature) -> Self {
        match nature {
            DistressNature::Bleeding => AlertLevel::Critical,
            DistressNature::Labor | DistressNature::Accident => AlertLevel::Emergency,
            DistressNature::Other => AlertLevel::Warning,
        }
    }
}

impl fmt::Display for AlertLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AlertLevel::Info => "info",
            AlertLevel::Warning => "warning",
            AlertLevel::Emergency => "emergency",
            AlertLevel::Critical => "critical",
        };
        f.write_str(s)
    }
}

/// A notification emitted by the core
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    /// One broadcast to every facility near a distress event
    RegionalBroadcast {
        /// Distress event
        distress_id: DistressId,
        /// Severity
        level: AlertLevel,
        /// Target facilities
        facilities: Vec<FacilityId>,
        /// Rendered text
        message: String,
    },
    /// One broadcast to emergency contacts
    ContactBroadcast {
        /// Distress event
        distress_id: DistressId,
        /// Severity
        level: AlertLevel,
        /// Target contacts
        contacts: Vec<ContactId>,
        /// Rendered text
        message: String,
    },
    /// Alert to a single facility
    FacilityAlert {
        /// Distress event
        distress_id: DistressId,
        /// Severity
        level: AlertLevel,
        /// Target facility
        facility_id: FacilityId,
        /// Rendered text
        message: String,
    },
    /// A vehicle was committed to a distress event
    Dispatched {
        /// Distress event
        distress_id: DistressId,
        /// Committed vehicle
        vehicle_id: VehicleId,
        /// Vehicle call sign
        call_sign: String,
        /// Initial estimate
        eta: Timestamp,
        /// Estimate is a fallback default
        provisional: bool,
    },
    /// The ETA moved later by a meaningful amount
    Delay {
        /// Distress event
        distress_id: DistressId,
        /// Assigned vehicle
        vehicle_id: Option<VehicleId>,
        /// Estimate before the change
        previous_eta: Option<Timestamp>,
        /// Estimate after the change
        new_eta: Timestamp,
        /// Whole minutes of delay
        delay_minutes: i64,
    },
    /// The assigned vehicle reached the scene
    Arrival {
        /// Distress event
        distress_id: DistressId,
        /// Arrived vehicle
        vehicle_id: VehicleId,
        /// Arrival instant
        arrived_at: Timestamp,
    },
    /// Info-level progress update to facilities
    StatusUpdate {
        /// Distress event
        distress_id: DistressId,
        /// Target facilities
        facilities: Vec<FacilityId>,
        /// Rendered text
        message: String,
    },
    /// A tier is being asked to respond
    Escalation {
        /// Distress event
        distress_id: DistressId,
        /// Name of the path being walked
        path_name: String,
        /// Tier being notified
        tier_id: TierId,
        /// Tier name
        tier_name: String,
        /// Tier level
        level: EscalationLevel,
        /// Tier contacts, de-duplicated
        contacts: Vec<ContactId>,
    },
    /// A tier has not responded yet
    Reminder {
        /// Distress event
        distress_id: DistressId,
        /// Name of the path being walked
        path_name: String,
        /// Tier being reminded
        tier_id: TierId,
        /// Tier name
        tier_name: String,
        /// 1-based reminder number
        attempt: u32,
        /// Tier contacts, de-duplicated
        contacts: Vec<ContactId>,
    },
}

impl Notification {
    /// Short name used in logs
    pub fn name(&self) -> &'static str {
        match self {
            Notification::RegionalBroadcast { .. } => "regional_broadcast",
            Notification::ContactBroadcast { .. } => "contact_broadcast",
            Notification::FacilityAlert { .. } => "facility_alert",
            Notification::Dispatched { .. } => "dispatched",
            Notification::Delay { .. } => "delay",
            Notification::Arrival { .. } => "arrival",
            Notification::StatusUpdate { .. } => "status_update",
            Notification::Escalation { .. } => "escalation",
            Notification::Reminder { .. } => "reminder",
        }
    }

    /// Distress event the notification concerns
    pub fn distress_id(&self) -> DistressId {
        match self {
            Notification::RegionalBroadcast { distress_id, .. }
            | Notification::ContactBroadcast { distress_id, .. }
            | Notification::FacilityAlert { distress_id, .. }
            | Notification::Dispatched { distress_id, .. }
            | Notification::Delay { distress_id, .. }
            | Notification::Arrival { distress_id, .. }
            | Notification::StatusUpdate { distress_id, .. }
            | Notification::Escalation { distress_id, .. }
            | Notification::Reminder { distress_id, .. } => *distress_id,
        }
    }

    /// Number of addressed recipients
    pub fn target_count(&self) -> usize {
        match self {
            Notification::RegionalBroadcast { facilities, .. }
            | Notification::StatusUpdate { facilities, .. } => facilities.len(),
            Notification::ContactBroadcast { contacts, .. }
            | Notification::Escalation { contacts, .. }
            | Notification::Reminder { contacts, .. } => contacts.len(),
            Notification::FacilityAlert { .. }
            | Notification::Dispatched { .. }
            | Notification::Delay { .. }
            | Notification::Arrival { .. } => 1,
        }
    }
}

/// Outcome of a delivery attempt
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delivery {
    /// Recipients actually reached
    pub reached: usize,
}

/// Port to whatever fans notifications out to people
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver a notification
    async fn deliver(&self, notification: &Notification) -> Result<Delivery>;
}

/// Notifier that writes every notification to the log
#[derive(Debug, Clone, Default)]
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn deliver(&self, notification: &Notification) -> Result<Delivery> {
        let reached = notification.target_count();
        if reached == 0 {
            warn!(
                kind = notification.name(),
                distress_id = %notification.distress_id(),
                "Notification has no recipients"
            );
        } else {
            info!(
                kind = notification.name(),
                distress_id = %notification.distress_id(),
                recipients = reached,
                "Notification delivered"
            );
        }
        Ok(Delivery { reached })
    }
}
