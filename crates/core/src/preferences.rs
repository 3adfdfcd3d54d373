//! Per-user notification preferences

use chrono::NaiveTime;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::types::{Timestamp, UserId};

/// Delivery channel a user can enable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    /// Text message
    Sms,
    /// Mobile push
    Push,
    /// Email
    Email,
}

impl FromStr for Channel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sms" => Ok(Channel::Sms),
            "push" => Ok(Channel::Push),
            "email" => Ok(Channel::Email),
            other => Err(Error::invalid_field(
                "preferred_channel",
                format!("unknown channel '{other}'"),
            )),
        }
    }
}

/// Notification category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationCategory {
    /// Life-threatening; bypasses quiet hours and category flags
    Emergency,
    /// General health alerts
    #[default]
    HealthAlert,
    /// Antenatal/postnatal visit reminders
    VisitReminder,
    /// Immunisation reminders
    VaccineReminder,
}

impl NotificationCategory {
    /// Storage and wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationCategory::Emergency => "emergency",
            NotificationCategory::HealthAlert => "health_alert",
            NotificationCategory::VisitReminder => "visit_reminder",
            NotificationCategory::VaccineReminder => "vaccine_reminder",
        }
    }
}

impl FromStr for NotificationCategory {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "emergency" => Ok(NotificationCategory::Emergency),
            "health_alert" | "health_alerts" => Ok(NotificationCategory::HealthAlert),
            "visit_reminder" | "visit_reminders" => Ok(NotificationCategory::VisitReminder),
            "vaccine_reminder" | "vaccine_reminders" => Ok(NotificationCategory::VaccineReminder),
            other => Err(Error::invalid_field(
                "category",
                format!("unknown notification category '{other}'"),
            )),
        }
    }
}

/// Parse an `HH:MM` wall-clock time
pub fn parse_hhmm(field: &str, value: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(value.trim(), "%H:%M")
        .map_err(|_| Error::invalid_field(field, format!("'{value}' is not a valid HH:MM time")))
}

mod hhmm {
    use super::*;

    pub fn serialize<S: Serializer>(time: &NaiveTime, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&time.format("%H:%M").to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<NaiveTime, D::Error> {
        let raw = String::deserialize(deserializer)?;
        NaiveTime::parse_from_str(&raw, "%H:%M").map_err(serde::de::Error::custom)
    }
}

/// Largest accepted UTC offset, in minutes
pub const MAX_UTC_OFFSET_MINUTES: i32 = 14 * 60;

/// Per-user notification preferences
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationPreferences {
    /// Owner
    pub user_id: UserId,
    /// SMS channel enabled
    pub sms: bool,
    /// Push channel enabled
    pub push: bool,
    /// Email channel enabled
    pub email: bool,
    /// Quiet hours enabled
    pub quiet_hours_enabled: bool,
    /// Quiet hours start, local time
    #[serde(with = "hhmm")]
    pub quiet_start: NaiveTime,
    /// Quiet hours end, local time
    #[serde(with = "hhmm")]
    pub quiet_end: NaiveTime,
    /// Offset of the user's local time from UTC
    pub utc_offset_minutes: i32,
    /// Preferred channel
    pub preferred_channel: Channel,
    /// Health alerts enabled
    pub health_alerts: bool,
    /// Visit reminders enabled
    pub visit_reminders: bool,
    /// Vaccine reminders enabled
    pub vaccine_reminders: bool,
    /// Last update instant
    pub updated: Timestamp,
}

impl NotificationPreferences {
    /// Defaults applied on first access
    pub fn defaults(user_id: UserId, now: Timestamp) -> Self {
        Self {
            user_id,
            sms: true,
            push: true,
            email: false,
            quiet_hours_enabled: false,
            quiet_start: NaiveTime::from_hms_opt(22, 0, 0).unwrap_or(NaiveTime::MIN),
            quiet_end: NaiveTime::from_hms_opt(7, 0, 0).unwrap_or(NaiveTime::MIN),
            utc_offset_minutes: 0,
            preferred_channel: Channel::Sms,
            health_alerts: true,
            visit_reminders: true,
            vaccine_reminders: true,
            updated: now,
        }
    }

    /// Channel flag
    pub fn channel_enabled(&self, channel: Channel) -> bool {
        match channel {
            Channel::Sms => self.sms,
            Channel::Push => self.push,
            Channel::Email => self.email,
        }
    }

    /// Category flag; emergency is always on
    pub fn category_enabled(&self, category: NotificationCategory) -> bool {
        match category {
            NotificationCategory::Emergency => true,
            NotificationCategory::HealthAlert => self.health_alerts,
            NotificationCategory::VisitReminder => self.visit_reminders,
            NotificationCategory::VaccineReminder => self.vaccine_reminders,
        }
    }
}
