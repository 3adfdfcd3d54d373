//! Core types for the Lifeline maternal-emergency coordination system.
//!
//! This crate holds the data model (distress events, vehicles, escalation
//! tiers, scheduled messages), the shared error type, configuration, logging,
//! and the async ports through which services reach storage, routing,
//! notifications and transports.

#![warn(missing_docs)]

pub mod cancel;
pub mod clock;
pub mod config;
pub mod directory;
pub mod distress;
pub mod error;
pub mod escalation;
pub mod logging;
pub mod message;
pub mod notification;
pub mod ports;
pub mod preferences;
pub mod transport;
pub mod types;
pub mod vehicle;

pub use cancel::{ensure_active, with_deadline, CancellationToken};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::LifelineConfig;
pub use directory::{Contact, Facility, Subject, TrackingUpdate, TrackingUpdateKind};
pub use distress::{DistressEvent, DistressNature, DistressStatus};
pub use error::{Error, ErrorKind, Result};
pub use escalation::{EscalationLevel, EscalationPath, EscalationRun, EscalationTier};
pub use message::{MessageKind, MessageStatus, Recipient, ScheduledMessage};
pub use notification::{AlertLevel, Delivery, Notification, Notifier, TracingNotifier};
pub use ports::{
    Completion, ContactDirectory, DistressRepository, EscalationRepository, FacilityIndex,
    MessageRepository, NoResponders, PreferenceRepository, ResponderLocator, Route, RouteProvider,
    SubjectDirectory, TrackingRepository, VehicleRepository,
};
pub use preferences::{Channel, NotificationCategory, NotificationPreferences};
pub use transport::{DriverError, OutboundMessage, TransportDriver};
pub use types::{
    ContactId, Coordinates, DistressId, FacilityId, MessageId, PathId, RunId, TierId, Timestamp,
    UpdateId, UserId, VehicleId,
};
pub use vehicle::{Vehicle, VehicleKind, VehicleStatus};
