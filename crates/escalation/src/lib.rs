//! Tiered human escalation for Lifeline distress events.
//!
//! Tiers are groups of contacts with a response budget. A path orders tiers;
//! a run walks a path for one distress event, reminding the current tier and
//! promoting to the next when the budget runs out.

pub mod engine;
pub mod graph;
pub mod timing;

pub use engine::{EscalationEngine, NewPath, NewTier, ReminderReceipt, TickReport};
pub use timing::{decide, reminder_interval, Decision};
