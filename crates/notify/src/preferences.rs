//! Preference service and delivery gating
//!
//! Quiet hours are evaluated in the user's local time, `now + utc_offset`.
//! A window whose start equals its end is empty; a window whose start is
//! after its end wraps past midnight.

use chrono::{NaiveTime, TimeDelta};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info};

use lifeline_core::preferences::{parse_hhmm, MAX_UTC_OFFSET_MINUTES};
use lifeline_core::{
    ensure_active, CancellationToken, Channel, Clock, Error, MessageKind, NotificationCategory,
    NotificationPreferences, PreferenceRepository, Result, Timestamp, UserId,
};

/// Partial preference update; absent fields are left unchanged
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct PreferencesPatch {
    /// SMS delivery allowed
    pub sms: Option<bool>,
    /// Push delivery allowed
    pub push: Option<bool>,
    /// Email delivery allowed
    pub email: Option<bool>,
    /// Hold non-emergency messages during quiet hours
    pub quiet_hours_enabled: Option<bool>,
    /// Quiet hours start, `HH:MM` local time
    pub quiet_start: Option<String>,
    /// Quiet hours end, `HH:MM` local time
    pub quiet_end: Option<String>,
    /// Offset of the user's local time from UTC
    pub utc_offset_minutes: Option<i32>,
    /// Channel tried first
    pub preferred_channel: Option<Channel>,
    /// Health alert category enabled
    pub health_alerts: Option<bool>,
    /// Visit reminder category enabled
    pub visit_reminders: Option<bool>,
    /// Vaccine reminder category enabled
    pub vaccine_reminders: Option<bool>,
}

impl PreferencesPatch {
    /// Apply onto `prefs`, validating times and offset first
    pub fn apply(&self, prefs: &mut NotificationPreferences) -> Result<()> {
        let quiet_start = self
            .quiet_start
            .as_deref()
            .map(|v| parse_hhmm("quiet_start", v))
            .transpose()?;
        let quiet_end = self
            .quiet_end
            .as_deref()
            .map(|v| parse_hhmm("quiet_end", v))
            .transpose()?;
        if let Some(offset) = self.utc_offset_minutes {
            if offset.abs() > MAX_UTC_OFFSET_MINUTES {
                return Err(Error::invalid_field(
                    "utc_offset_minutes",
                    format!("offset must be within ±{MAX_UTC_OFFSET_MINUTES} minutes"),
                ));
            }
            prefs.utc_offset_minutes = offset;
        }

        macro_rules! set {
            ($($field:ident),*) => {
                $(if let Some(v) = self.$field { prefs.$field = v; })*
            };
        }
        set!(
            sms,
            push,
            email,
            quiet_hours_enabled,
            preferred_channel,
            health_alerts,
            visit_reminders,
            vaccine_reminders
        );
        if let Some(t) = quiet_start {
            prefs.quiet_start = t;
        }
        if let Some(t) = quiet_end {
            prefs.quiet_end = t;
        }
        Ok(())
    }
}

/// Whether `t` falls in the `[start, end)` window, wrapping past midnight
pub fn in_quiet_window(start: NaiveTime, end: NaiveTime, t: NaiveTime) -> bool {
    if start == end {
        false
    } else if start < end {
        start <= t && t < end
    } else {
        t >= start || t < end
    }
}

/// Local wall-clock time for the user
pub fn local_time(prefs: &NotificationPreferences, now: Timestamp) -> NaiveTime {
    (now + TimeDelta::minutes(i64::from(prefs.utc_offset_minutes))).time()
}

/// Quiet hours currently in force
pub fn quiet_hours_active(prefs: &NotificationPreferences, now: Timestamp) -> bool {
    prefs.quiet_hours_enabled && in_quiet_window(prefs.quiet_start, prefs.quiet_end, local_time(prefs, now))
}

/// Whether a category may reach the user at `now`
pub fn is_enabled(prefs: &NotificationPreferences, category: NotificationCategory, now: Timestamp) -> bool {
    if !(prefs.sms || prefs.push || prefs.email) {
        return false;
    }
    if category == NotificationCategory::Emergency {
        return true;
    }
    if quiet_hours_active(prefs, now) {
        return false;
    }
    prefs.category_enabled(category)
}

/// Channel flag for a transport
pub fn channel_for(kind: MessageKind) -> Channel {
    match kind {
        MessageKind::Sms => Channel::Sms,
        MessageKind::Push => Channel::Push,
    }
}

/// Full gate used by the scheduler: the transport's channel must be on and
/// the category enabled at `now`
pub fn allows_delivery(
    prefs: &NotificationPreferences,
    kind: MessageKind,
    category: NotificationCategory,
    now: Timestamp,
) -> bool {
    prefs.channel_enabled(channel_for(kind)) && is_enabled(prefs, category, now)
}

/// Stored preferences with defaults on first access
pub struct PreferenceService {
    repo: Arc<dyn PreferenceRepository>,
    clock: Arc<dyn Clock>,
}

impl PreferenceService {
    /// Create a service
    pub fn new(repo: Arc<dyn PreferenceRepository>, clock: Arc<dyn Clock>) -> Self {
        Self { repo, clock }
    }

    /// Stored preferences or defaults, without persisting
    pub async fn effective(&self, user_id: UserId) -> Result<NotificationPreferences> {
        Ok(self
            .repo
            .get_preferences(user_id)
            .await?
            .unwrap_or_else(|| NotificationPreferences::defaults(user_id, self.clock.now())))
    }

    /// Preferences for a user, persisting defaults on first access
    pub async fn get(&self, cancel: &CancellationToken, user_id: UserId) -> Result<NotificationPreferences> {
        ensure_active(cancel)?;
        if let Some(prefs) = self.repo.get_preferences(user_id).await? {
            return Ok(prefs);
        }
        let prefs = NotificationPreferences::defaults(user_id, self.clock.now());
        ensure_active(cancel)?;
        self.repo.put_preferences(&prefs).await?;
        debug!(user_id = %user_id, "Default preferences created");
        Ok(prefs)
    }

    /// Apply a partial update
    pub async fn update(
        &self,
        cancel: &CancellationToken,
        user_id: UserId,
        patch: &PreferencesPatch,
    ) -> Result<NotificationPreferences> {
        let mut prefs = self.get(cancel, user_id).await?;
        patch.apply(&mut prefs)?;
        prefs.updated = self.clock.now();
        ensure_active(cancel)?;
        self.repo.put_preferences(&prefs).await?;
        info!(user_id = %user_id, "Preferences updated");
        Ok(prefs)
    }

    /// Whether a category may reach the user now
    pub async fn is_enabled(
        &self,
        cancel: &CancellationToken,
        user_id: UserId,
        category: NotificationCategory,
    ) -> Result<bool> {
        let prefs = self.get(cancel, user_id).await?;
        Ok(is_enabled(&prefs, category, self.clock.now()))
    }
}
