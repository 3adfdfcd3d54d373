//! Configuration management for Lifeline.
//!
//! Every tunable has a default. A TOML file may override any subset, and
//! `LIFELINE_*` environment variables override the file.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{Error, Result};

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LifelineConfig {
    /// Candidate search and dispatch
    #[serde(default)]
    pub dispatch: DispatchConfig,
    /// ETA refresh loop
    #[serde(default)]
    pub tracking: TrackingConfig,
    /// Escalation timing
    #[serde(default)]
    pub escalation: EscalationConfig,
    /// Notification scheduler worker
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    /// Alert fanout
    #[serde(default)]
    pub alerts: AlertsConfig,
    /// HTTP facade
    #[serde(default)]
    pub server: ServerConfig,
    /// Persistence
    #[serde(default)]
    pub storage: StorageConfig,
}

/// Candidate search and dispatch settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Radius for the first candidate query
    #[serde(default = "default_search_radius_km")]
    pub search_radius_km: f64,
    /// Soft deadline for route provider calls
    #[serde(default = "default_route_timeout_ms")]
    pub route_timeout_ms: u64,
    /// ETA used when the route provider fails
    #[serde(default = "default_eta_minutes")]
    pub default_eta_minutes: i64,
    /// Speed assumed by the straight-line route provider
    #[serde(default = "default_average_speed_kmh")]
    pub average_speed_kmh: f64,
}

/// Tracking loop settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackingConfig {
    /// ETA change that counts as meaningful
    #[serde(default = "default_eta_threshold_minutes")]
    pub eta_change_threshold_minutes: i64,
    /// Period of the dispatched-event sweep
    #[serde(default = "default_sweep_period_secs")]
    pub sweep_period_secs: u64,
    /// Age after which a dispatched event is refreshed by the sweep
    #[serde(default = "default_stale_after_secs")]
    pub stale_after_secs: u64,
}

/// Escalation settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscalationConfig {
    /// Reminders per tier before promotion
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Ticker period
    #[serde(default = "default_escalation_tick_secs")]
    pub tick_secs: u64,
}

/// Scheduler worker settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Worker tick
    #[serde(default = "default_scheduler_tick_secs")]
    pub tick_secs: u64,
    /// Messages claimed per tick
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Soft deadline for transport calls
    #[serde(default = "default_driver_timeout_secs")]
    pub driver_timeout_secs: u64,
}

/// Alert fanout settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertsConfig {
    /// Radius for facility broadcasts and status alerts
    #[serde(default = "default_alert_radius_km")]
    pub nearby_radius_km: f64,
}

/// HTTP facade settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address
    #[serde(default = "default_host")]
    pub host: String,
    /// Bind port
    #[serde(default = "default_port")]
    pub port: u16,
}

/// Persistence settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// SQLite file shared by every node
    #[serde(default = "default_database_path")]
    pub database_path: String,
}

fn default_search_radius_km() -> f64 {
    20.0
}

fn default_route_timeout_ms() -> u64 {
    3000
}

fn default_eta_minutes() -> i64 {
    60
}

fn default_average_speed_kmh() -> f64 {
    40.0
}

fn default_eta_threshold_minutes() -> i64 {
    5
}

fn default_sweep_period_secs() -> u64 {
    30
}

fn default_stale_after_secs() -> u64 {
    30
}

fn default_max_attempts() -> u32 {
    3
}

fn default_escalation_tick_secs() -> u64 {
    15
}

fn default_scheduler_tick_secs() -> u64 {
    60
}

fn default_batch_size() -> usize {
    50
}

fn default_driver_timeout_secs() -> u64 {
    10
}

fn default_alert_radius_km() -> f64 {
    5.0
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_database_path() -> String {
    "lifeline.db".to_string()
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            search_radius_km: default_search_radius_km(),
            route_timeout_ms: default_route_timeout_ms(),
            default_eta_minutes: default_eta_minutes(),
            average_speed_kmh: default_average_speed_kmh(),
        }
    }
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            eta_change_threshold_minutes: default_eta_threshold_minutes(),
            sweep_period_secs: default_sweep_period_secs(),
            stale_after_secs: default_stale_after_secs(),
        }
    }
}

impl Default for EscalationConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            tick_secs: default_escalation_tick_secs(),
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_secs: default_scheduler_tick_secs(),
            batch_size: default_batch_size(),
            driver_timeout_secs: default_driver_timeout_secs(),
        }
    }
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            nearby_radius_km: default_alert_radius_km(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
        }
    }
}

impl DispatchConfig {
    /// Route provider deadline
    pub fn route_timeout(&self) -> Duration {
        Duration::from_millis(self.route_timeout_ms)
    }
}

impl SchedulerConfig {
    /// Worker tick
    pub fn tick(&self) -> Duration {
        Duration::from_secs(self.tick_secs)
    }

    /// Transport deadline
    pub fn driver_timeout(&self) -> Duration {
        Duration::from_secs(self.driver_timeout_secs)
    }
}

impl TrackingConfig {
    /// Sweep period
    pub fn sweep_period(&self) -> Duration {
        Duration::from_secs(self.sweep_period_secs)
    }
}

impl EscalationConfig {
    /// Ticker period
    pub fn tick(&self) -> Duration {
        Duration::from_secs(self.tick_secs)
    }
}

/// Smallest sweep period accepted
pub const MIN_SWEEP_PERIOD_SECS: u64 = 10;
/// Largest scheduler batch accepted
pub const MAX_BATCH_SIZE: usize = 1000;

fn parse_var<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    target: &mut T,
) -> Result<()> {
    if let Some(raw) = lookup(key) {
        *target = raw
            .trim()
            .parse()
            .map_err(|_| Error::invalid_field(key, format!("cannot parse '{raw}'")))?;
    }
    Ok(())
}

impl LifelineConfig {
    /// Load from a TOML file
    #[cfg(feature = "toml")]
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::internal(format!("cannot read {}: {e}", path.display())))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| Error::validation(format!("invalid config {}: {e}", path.display())))?;
        Ok(config)
    }

    /// Defaults overlaid with `LIFELINE_*` environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env()?;
        Ok(config)
    }

    /// Overlay `LIFELINE_*` environment variables
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_vars(|key| std::env::var(key).ok())
    }

    /// Overlay variables from an arbitrary lookup
    pub fn apply_vars(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        parse_var(&lookup, "LIFELINE_SCHEDULER_TICK_SECS", &mut self.scheduler.tick_secs)?;
        parse_var(&lookup, "LIFELINE_SCHEDULER_BATCH_SIZE", &mut self.scheduler.batch_size)?;
        parse_var(&lookup, "LIFELINE_DRIVER_TIMEOUT_SECS", &mut self.scheduler.driver_timeout_secs)?;
        parse_var(&lookup, "LIFELINE_DISPATCH_RADIUS_KM", &mut self.dispatch.search_radius_km)?;
        parse_var(&lookup, "LIFELINE_ROUTE_TIMEOUT_MS", &mut self.dispatch.route_timeout_ms)?;
        parse_var(&lookup, "LIFELINE_DEFAULT_ETA_MINUTES", &mut self.dispatch.default_eta_minutes)?;
        parse_var(&lookup, "LIFELINE_ALERT_RADIUS_KM", &mut self.alerts.nearby_radius_km)?;
        parse_var(
            &lookup,
            "LIFELINE_ETA_THRESHOLD_MINUTES",
            &mut self.tracking.eta_change_threshold_minutes,
        )?;
        parse_var(&lookup, "LIFELINE_SWEEP_PERIOD_SECS", &mut self.tracking.sweep_period_secs)?;
        parse_var(&lookup, "LIFELINE_STALE_AFTER_SECS", &mut self.tracking.stale_after_secs)?;
        parse_var(&lookup, "LIFELINE_REMINDER_MAX_ATTEMPTS", &mut self.escalation.max_attempts)?;
        parse_var(&lookup, "LIFELINE_ESCALATION_TICK_SECS", &mut self.escalation.tick_secs)?;
        parse_var(&lookup, "LIFELINE_PORT", &mut self.server.port)?;
        if let Some(path) = lookup("LIFELINE_DB_PATH") {
            self.storage.database_path = path;
        }
        Ok(())
    }

    /// Enforce floors and ranges
    pub fn validate(&self) -> Result<()> {
        if self.scheduler.tick_secs < 1 {
            return Err(Error::invalid_field("scheduler.tick_secs", "must be at least 1 second"));
        }
        if !(1..=MAX_BATCH_SIZE).contains(&self.scheduler.batch_size) {
            return Err(Error::invalid_field(
                "scheduler.batch_size",
                format!("must be between 1 and {MAX_BATCH_SIZE}"),
            ));
        }
        if self.scheduler.driver_timeout_secs < 1 {
            return Err(Error::invalid_field(
                "scheduler.driver_timeout_secs",
                "must be at least 1 second",
            ));
        }
        if !(self.dispatch.search_radius_km > 0.0) {
            return Err(Error::invalid_field("dispatch.search_radius_km", "must be positive"));
        }
        if self.dispatch.route_timeout_ms < 100 {
            return Err(Error::invalid_field(
                "dispatch.route_timeout_ms",
                "must be at least 100 ms",
            ));
        }
        if self.dispatch.default_eta_minutes < 1 {
            return Err(Error::invalid_field(
                "dispatch.default_eta_minutes",
                "must be at least 1 minute",
            ));
        }
        if !(self.dispatch.average_speed_kmh > 0.0) {
            return Err(Error::invalid_field("dispatch.average_speed_kmh", "must be positive"));
        }
        if !(self.alerts.nearby_radius_km > 0.0) {
            return Err(Error::invalid_field("alerts.nearby_radius_km", "must be positive"));
        }
        if self.tracking.eta_change_threshold_minutes < 1 {
            return Err(Error::invalid_field(
                "tracking.eta_change_threshold_minutes",
                "must be at least 1 minute",
            ));
        }
        if self.tracking.sweep_period_secs < MIN_SWEEP_PERIOD_SECS {
            return Err(Error::invalid_field(
                "tracking.sweep_period_secs",
                format!("must be at least {MIN_SWEEP_PERIOD_SECS} seconds"),
            ));
        }
        if self.tracking.stale_after_secs < 1 {
            return Err(Error::invalid_field(
                "tracking.stale_after_secs",
                "must be at least 1 second",
            ));
        }
        if self.escalation.tick_secs < 1 {
            return Err(Error::invalid_field("escalation.tick_secs", "must be at least 1 second"));
        }
        Ok(())
    }
}
