//! Scheduled SMS and push delivery for Lifeline.
//!
//! [`NotificationScheduler`] persists future-dated messages and runs the
//! claim-and-deliver worker. [`PreferenceService`] stores per-user channel
//! flags and quiet hours, which gate every delivery to a known user.

pub mod drivers;
pub mod preferences;
pub mod scheduler;

pub use drivers::{validate_payload, DriverRegistry, LoggingPushDriver, LoggingSmsDriver, MAX_SMS_CHARS};
pub use lifeline_core::DriverError;
pub use preferences::{allows_delivery, in_quiet_window, is_enabled, PreferenceService, PreferencesPatch};
pub use scheduler::{BatchReport, NotificationScheduler, ScheduleRequest, SchedulerMetrics};
