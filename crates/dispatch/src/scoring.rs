//! Candidate scoring and ranking

use serde::Serialize;
use std::cmp::Ordering;

use lifeline_core::Vehicle;

/// A vehicle considered for dispatch
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Candidate {
    /// Vehicle record
    #[serde(flatten)]
    pub vehicle: Vehicle,
    /// Suitability score, higher is better
    pub score: f64,
    /// Great-circle distance to the distress, when the location is known
    pub distance_km: Option<f64>,
    /// Routed travel time, when the provider answered
    pub eta_minutes: Option<f64>,
}

impl Candidate {
    /// Score a vehicle
    pub fn new(vehicle: Vehicle, distance_km: Option<f64>, eta_minutes: Option<f64>) -> Self {
        let score = score(&vehicle, distance_km, eta_minutes);
        Self {
            vehicle,
            score,
            distance_km,
            eta_minutes,
        }
    }
}

/// Sum of kind bonus, distance, ETA and capacity terms.
///
/// Missing distance or ETA omits the corresponding term.
pub fn score(vehicle: &Vehicle, distance_km: Option<f64>, eta_minutes: Option<f64>) -> f64 {
    let mut total = vehicle.kind.score_bonus();
    if let Some(d) = distance_km {
        total += 100.0 / (d.max(0.0) + 1.0);
    }
    if let Some(m) = eta_minutes {
        total += 200.0 / (m.max(0.0) + 1.0);
    }
    total + f64::from(vehicle.capacity) * 5.0
}

/// Ordering used for ranking: score descending, then distance ascending
/// (unknown last), then earlier `last_updated`, then id.
pub fn compare(a: &Candidate, b: &Candidate) -> Ordering {
    let distance = |c: &Candidate| c.distance_km.unwrap_or(f64::INFINITY);
    b.score
        .total_cmp(&a.score)
        .then_with(|| distance(a).total_cmp(&distance(b)))
        .then_with(|| a.vehicle.last_updated.cmp(&b.vehicle.last_updated))
        .then_with(|| a.vehicle.id.cmp(&b.vehicle.id))
}

/// Top `k` candidates in ranking order
pub fn rank(mut candidates: Vec<Candidate>, k: usize) -> Vec<Candidate> {
    candidates.sort_by(compare);
    candidates.truncate(k);
    candidates
}
