//! Integration tests for the Lifeline coordination core
//!
//! Scenarios run every distress-side service over one in-memory store with
//! a manual clock, scripted routes and a recording notifier:
//! - reporting, ranking and dispatch, including the race for one vehicle
//! - ETA refresh, arrival and traffic delays
//! - escalation timelines under the ticker
//! - scheduled delivery with competing workers and quiet hours
//! - two nodes sharing one SQLite file

pub mod test_utils;

#[cfg(test)]
mod dispatch_scenarios;

#[cfg(test)]
mod tracking_scenarios;

#[cfg(test)]
mod escalation_scenarios;

#[cfg(test)]
mod scheduler_scenarios;

#[cfg(test)]
mod node_scenarios;

#[cfg(test)]
mod properties;
