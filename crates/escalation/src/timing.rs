//! Escalation timing protocol
//!
//! A tier gets its response budget. Within the budget, up to `max_attempts`
//! reminders go out at `budget / (max_attempts + 1)` spacing, never closer
//! than one minute. Once the budget is spent the run advances.

use chrono::TimeDelta;
use serde::Serialize;

use lifeline_core::{EscalationRun, EscalationTier, Timestamp};

/// Outcome of one timing check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    /// Run acknowledged or done
    Exit,
    /// Budget exhausted; promote to the next tier
    Advance,
    /// Send reminder number `attempt`
    Remind {
        /// 1-based reminder number
        attempt: u32,
    },
    /// Nothing due yet
    Wait,
}

/// Reminder spacing for a tier
pub fn reminder_interval(response_budget_minutes: u32, max_attempts: u32) -> TimeDelta {
    let budget_secs = i64::from(response_budget_minutes) * 60;
    let spacing = budget_secs / (i64::from(max_attempts) + 1);
    TimeDelta::seconds(spacing.max(60))
}

/// Decide what a run on `tier` should do at `now`
pub fn decide(run: &EscalationRun, tier: &EscalationTier, max_attempts: u32, now: Timestamp) -> Decision {
    if !run.is_active() {
        return Decision::Exit;
    }
    let elapsed = now - run.current_tier_entered_at;
    if elapsed >= TimeDelta::minutes(i64::from(tier.response_budget_minutes)) {
        return Decision::Advance;
    }
    if run.reminder_attempts < max_attempts {
        let interval = reminder_interval(tier.response_budget_minutes, max_attempts);
        let due = interval * (run.reminder_attempts as i32 + 1);
        if elapsed >= due {
            return Decision::Remind {
                attempt: run.reminder_attempts + 1,
            };
        }
    }
    Decision::Wait
}
