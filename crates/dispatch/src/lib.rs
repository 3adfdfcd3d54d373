//! Distress handling, vehicle dispatch and tracking for Lifeline.
//!
//! - [`DistressCoordinator`]: report and lifecycle of distress events
//! - [`DispatchEngine`]: candidate ranking and leased vehicle reservation
//! - [`TrackingLoop`]: ETA refresh, arrival and tracking updates
//! - [`AlertFanout`]: level-mapped broadcasts to facilities and contacts

pub mod coordinator;
pub mod engine;
pub mod fanout;
pub mod lease;
pub mod route;
pub mod scoring;
pub mod tracking;

pub use coordinator::{DistressCoordinator, ReportDistress};
pub use engine::DispatchEngine;
pub use fanout::{deliver_best_effort, AlertFanout};
pub use lease::{LeaseGuard, LeaseTable};
pub use route::StraightLineRouteProvider;
pub use scoring::{rank, score, Candidate};
pub use tracking::{
    minutes_remaining, refresh_queue, EtaView, RefreshOutcome, RefreshQueue, RefreshReceiver,
    TrackingLoop,
};
