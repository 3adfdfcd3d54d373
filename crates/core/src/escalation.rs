//! Escalation tiers, paths and runs

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::types::{ContactId, DistressId, FacilityId, PathId, RunId, TierId, Timestamp};

/// Escalation severity level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EscalationLevel {
    /// Level 1
    Low = 1,
    /// Level 2
    Medium = 2,
    /// Level 3
    High = 3,
    /// Level 4
    Critical = 4,
}

impl FromStr for EscalationLevel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" | "1" => Ok(EscalationLevel::Low),
            "medium" | "2" => Ok(EscalationLevel::Medium),
            "high" | "3" => Ok(EscalationLevel::High),
            "critical" | "4" => Ok(EscalationLevel::Critical),
            other => Err(Error::invalid_field(
                "level",
                format!("unknown escalation level '{other}'"),
            )),
        }
    }
}

/// Node in the escalation graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscalationTier {
    /// Unique identifier
    pub id: TierId,
    /// Display name
    pub name: String,
    /// Severity level
    pub level: EscalationLevel,
    /// Minutes the tier has to respond before promotion
    pub response_budget_minutes: u32,
    /// Ordered, de-duplicated contacts
    pub contacts: Vec<ContactId>,
    /// Default successor when no path is attached
    pub next_tier_id: Option<TierId>,
    /// Optimistic concurrency version, bumped by every persisted write
    #[serde(default)]
    pub version: u64,
}

impl EscalationTier {
    /// Create a tier, de-duplicating contacts while keeping first-seen order
    pub fn new(
        name: impl Into<String>,
        level: EscalationLevel,
        response_budget_minutes: u32,
        contacts: Vec<ContactId>,
        next_tier_id: Option<TierId>,
    ) -> Result<Self> {
        let tier = Self {
            id: TierId::new(),
            name: name.into(),
            level,
            response_budget_minutes,
            contacts: dedup_contacts(contacts),
            next_tier_id,
            version: 0,
        };
        tier.validate()?;
        Ok(tier)
    }

    /// Check local tier constraints (graph constraints are checked by the engine)
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::invalid_field("name", "tier name cannot be empty"));
        }
        if self.response_budget_minutes == 0 {
            return Err(Error::invalid_field(
                "response_budget_minutes",
                "response budget must be greater than zero",
            ));
        }
        if self.next_tier_id == Some(self.id) {
            return Err(Error::invalid_field(
                "next_tier_id",
                "a tier cannot escalate to itself",
            ));
        }
        Ok(())
    }
}

/// Remove duplicate contact ids, keeping first-seen order
pub fn dedup_contacts(contacts: Vec<ContactId>) -> Vec<ContactId> {
    let mut seen = HashSet::with_capacity(contacts.len());
    contacts.into_iter().filter(|c| seen.insert(*c)).collect()
}

/// Ordered sequence of tiers with scoping metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscalationPath {
    /// Unique identifier
    pub id: PathId,
    /// Display name, rendered in escalation notifications
    pub name: String,
    /// Tier order; overrides per-tier next links for runs on this path
    pub tier_ids: Vec<TierId>,
    /// Inactive paths cannot start runs
    pub active: bool,
    /// Facility scope
    pub facility_id: Option<FacilityId>,
    /// District scope
    pub district: Option<String>,
    /// Optimistic concurrency version, bumped by every persisted write
    #[serde(default)]
    pub version: u64,
}

impl EscalationPath {
    /// Tier at a run index
    pub fn tier_at(&self, index: usize) -> Option<TierId> {
        self.tier_ids.get(index).copied()
    }
}

/// Active walk through a path for one distress event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscalationRun {
    /// Unique identifier
    pub id: RunId,
    /// Distress event being escalated
    pub distress_id: DistressId,
    /// Path being walked
    pub path_id: PathId,
    /// Index into the path's tier list
    pub current_tier_index: usize,
    /// When the current tier was entered
    pub current_tier_entered_at: Timestamp,
    /// Reminders sent for the current tier
    pub reminder_attempts: u32,
    /// A responder acknowledged
    pub acknowledged: bool,
    /// Contact that acknowledged, if known
    pub acknowledged_by: Option<ContactId>,
    /// Acknowledgement instant
    pub acknowledged_at: Option<Timestamp>,
    /// The walk has ended
    pub done: bool,
    /// Creation instant
    pub created_at: Timestamp,
    /// Last update instant
    pub updated_at: Timestamp,
    /// Optimistic concurrency version, bumped by every persisted write
    #[serde(default)]
    pub version: u64,
}

impl EscalationRun {
    /// Start a run on the first tier of a path
    pub fn start(distress_id: DistressId, path_id: PathId, now: Timestamp) -> Self {
        Self {
            id: RunId::new(),
            distress_id,
            path_id,
            current_tier_index: 0,
            current_tier_entered_at: now,
            reminder_attempts: 0,
            acknowledged: false,
            acknowledged_by: None,
            acknowledged_at: None,
            done: false,
            created_at: now,
            updated_at: now,
            version: 0,
        }
    }

    /// Run is still walking
    pub fn is_active(&self) -> bool {
        !self.acknowledged && !self.done
    }

    /// Move to the next index; returns true when the new index is within `path_len`
    pub fn advance(&mut self, path_len: usize, now: Timestamp) -> bool {
        self.current_tier_index += 1;
        self.updated_at = now;
        if self.current_tier_index < path_len {
            self.reminder_attempts = 0;
            self.current_tier_entered_at = now;
            true
        } else {
            self.done = true;
            false
        }
    }

    /// Record a sent reminder
    pub fn record_reminder(&mut self, now: Timestamp) {
        self.reminder_attempts += 1;
        self.updated_at = now;
    }

    /// Terminate successfully
    pub fn acknowledge(&mut self, by: Option<ContactId>, now: Timestamp) {
        self.acknowledged = true;
        self.acknowledged_by = by;
        self.acknowledged_at = Some(now);
        self.updated_at = now;
    }

    /// Terminate without acknowledgement
    pub fn finish(&mut self, now: Timestamp) {
        self.done = true;
        self.updated_at = now;
    }
}
