//! Straight-line route estimation

use async_trait::async_trait;
use chrono::TimeDelta;

use lifeline_core::{Coordinates, Error, Result, Route, RouteProvider};

/// Estimates travel time from great-circle distance at a fixed average speed
#[derive(Debug, Clone, Copy)]
pub struct StraightLineRouteProvider {
    speed_kmh: f64,
}

impl StraightLineRouteProvider {
    /// Provider assuming `speed_kmh`
    pub fn new(speed_kmh: f64) -> Result<Self> {
        if !(speed_kmh > 0.0) || !speed_kmh.is_finite() {
            return Err(Error::invalid_field("average_speed_kmh", "speed must be positive"));
        }
        Ok(Self { speed_kmh })
    }
}

impl Default for StraightLineRouteProvider {
    fn default() -> Self {
        Self { speed_kmh: 40.0 }
    }
}

#[async_trait]
impl RouteProvider for StraightLineRouteProvider {
    async fn route(&self, from: Coordinates, to: Coordinates) -> Result<Route> {
        let distance_km = from.distance_km(&to);
        let millis = (distance_km / self.speed_kmh * 3_600_000.0).round() as i64;
        Ok(Route {
            distance_km,
            duration: TimeDelta::milliseconds(millis),
        })
    }
}
