//! Dispatch engine
//!
//! Ranks available vehicles for a distress event and commits one of them.
//! A commit runs under a per-vehicle lease and writes the vehicle before the
//! distress event; a failed second write is compensated by releasing the
//! vehicle again. The lease only covers this process. Between nodes sharing a
//! store, the vehicle's version decides: the node whose reservation lands
//! second sees a Conflict and reports the vehicle as unavailable.

use chrono::TimeDelta;
use futures_util::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use lifeline_core::config::DispatchConfig;
use lifeline_core::types::truncate_ms;
use lifeline_core::{
    ensure_active, with_deadline, CancellationToken, Clock, Coordinates, DistressEvent,
    DistressId, DistressRepository, DistressStatus, Error, Notification, Notifier, Result,
    RouteProvider, Vehicle, VehicleId, VehicleRepository, VehicleStatus,
};

use crate::fanout::deliver_best_effort;
use crate::lease::LeaseTable;
use crate::scoring::{rank, Candidate};
use crate::tracking::RefreshQueue;

const LOCATION_RETRIES: usize = 3;

/// Candidate ranking and vehicle reservation
pub struct DispatchEngine {
    distress: Arc<dyn DistressRepository>,
    vehicles: Arc<dyn VehicleRepository>,
    routes: Arc<dyn RouteProvider>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    leases: LeaseTable,
    refresh: RefreshQueue,
    search_radius_km: f64,
    route_timeout: Duration,
    default_eta: TimeDelta,
}

impl DispatchEngine {
    /// Create an engine; location updates feed `refresh`
    pub fn new(
        distress: Arc<dyn DistressRepository>,
        vehicles: Arc<dyn VehicleRepository>,
        routes: Arc<dyn RouteProvider>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
        refresh: RefreshQueue,
        config: &DispatchConfig,
    ) -> Self {
        Self {
            distress,
            vehicles,
            routes,
            notifier,
            clock,
            leases: LeaseTable::new(),
            refresh,
            search_radius_km: config.search_radius_km,
            route_timeout: config.route_timeout(),
            default_eta: TimeDelta::minutes(config.default_eta_minutes),
        }
    }

    async fn load_distress(&self, id: DistressId) -> Result<DistressEvent> {
        self.distress
            .get_distress(id)
            .await?
            .ok_or_else(|| Error::not_found(DistressId::RESOURCE, id))
    }

    async fn load_vehicle(&self, id: VehicleId) -> Result<Vehicle> {
        self.vehicles
            .get_vehicle(id)
            .await?
            .ok_or_else(|| Error::not_found(VehicleId::RESOURCE, id))
    }

    /// Register a vehicle
    pub async fn register_vehicle(&self, cancel: &CancellationToken, vehicle: Vehicle) -> Result<Vehicle> {
        ensure_active(cancel)?;
        if let Some(location) = vehicle.last_known_location {
            location.validate()?;
        }
        if vehicle.call_sign.trim().is_empty() {
            return Err(Error::invalid_field("call_sign", "call sign cannot be empty"));
        }
        if !vehicle.engagement_invariant_holds() {
            return Err(Error::validation("vehicle engagement does not match its status"));
        }
        let stored = self.vehicles.insert_vehicle(&vehicle).await?;
        info!(vehicle_id = %stored.id, call_sign = %stored.call_sign, "Vehicle registered");
        Ok(stored)
    }

    /// Fetch a vehicle
    pub async fn get_vehicle(&self, cancel: &CancellationToken, id: VehicleId) -> Result<Vehicle> {
        ensure_active(cancel)?;
        self.load_vehicle(id).await
    }

    /// Up to `k` available vehicles ranked for the event
    pub async fn find_candidates(
        &self,
        cancel: &CancellationToken,
        distress_id: DistressId,
        k: usize,
    ) -> Result<Vec<Candidate>> {
        if k == 0 {
            return Err(Error::invalid_field("max_results", "max_results must be at least 1"));
        }
        ensure_active(cancel)?;
        let event = self.load_distress(distress_id).await?;
        let target = event.coordinates;

        let mut pool = self
            .vehicles
            .available_vehicles_within(target, self.search_radius_km)
            .await?;
        if pool.is_empty() {
            debug!(distress_id = %distress_id, radius_km = self.search_radius_km, "No vehicles in radius; widening search");
            pool = self.vehicles.list_available_vehicles().await?;
        }

        let etas = join_all(pool.iter().map(|v| self.eta_minutes(cancel, v.last_known_location, target))).await;

        let mut candidates = Vec::with_capacity(pool.len());
        for (vehicle, eta) in pool.into_iter().zip(etas) {
            let eta_minutes = match eta {
                Ok(m) => m,
                Err(Error::Cancelled) => return Err(Error::Cancelled),
                Err(e) => {
                    debug!(vehicle_id = %vehicle.id, error = %e, "Route unavailable; ETA term omitted");
                    None
                }
            };
            let distance_km = vehicle.last_known_location.map(|loc| loc.distance_km(&target));
            let candidate = Candidate::new(vehicle, distance_km, eta_minutes);
            debug!(
                vehicle_id = %candidate.vehicle.id,
                score = candidate.score,
                distance_km = ?candidate.distance_km,
                eta_minutes = ?candidate.eta_minutes,
                "Candidate scored"
            );
            candidates.push(candidate);
        }

        Ok(rank(candidates, k))
    }

    async fn eta_minutes(
        &self,
        cancel: &CancellationToken,
        from: Option<Coordinates>,
        to: Coordinates,
    ) -> Result<Option<f64>> {
        let Some(from) = from else {
            return Ok(None);
        };
        let route = with_deadline(cancel, self.route_timeout, "route", self.routes.route(from, to)).await?;
        Ok(Some(route.minutes()))
    }

    /// Reserve a vehicle for a distress event and commit the engagement
    pub async fn dispatch(
        &self,
        cancel: &CancellationToken,
        distress_id: DistressId,
        vehicle_id: VehicleId,
    ) -> Result<DistressEvent> {
        ensure_active(cancel)?;
        let lease = self
            .leases
            .acquire(vehicle_id)
            .ok_or_else(|| Error::validation("vehicle not available"))?;
        debug!(vehicle_id = %vehicle_id, token = %lease.token(), "Vehicle lease acquired");

        let mut event = self.load_distress(distress_id).await?;
        if event.status != DistressStatus::Reported {
            return Err(Error::validation(format!(
                "distress {distress_id} is {}, expected reported",
                event.status
            )));
        }
        let mut vehicle = self.load_vehicle(vehicle_id).await?;
        if vehicle.status != VehicleStatus::Available {
            return Err(Error::validation("vehicle not available"));
        }

        let (duration, provisional) = match vehicle.last_known_location {
            Some(from) => {
                match with_deadline(
                    cancel,
                    self.route_timeout,
                    "route",
                    self.routes.route(from, event.coordinates),
                )
                .await
                {
                    Ok(route) => (route.duration, false),
                    Err(Error::Cancelled) => return Err(Error::Cancelled),
                    Err(e) => {
                        warn!(distress_id = %distress_id, vehicle_id = %vehicle_id, error = %e, "Route failed; using default ETA");
                        (self.default_eta, true)
                    }
                }
            }
            None => (self.default_eta, true),
        };

        let now = self.clock.now();
        let eta = truncate_ms(now + duration);
        vehicle.reserve(distress_id, now)?;
        event.mark_dispatched(vehicle_id, eta, provisional, now)?;

        ensure_active(cancel)?;
        let reserved = match self.vehicles.update_vehicle(&vehicle).await {
            Ok(reserved) => reserved,
            Err(Error::Conflict(message)) => {
                debug!(distress_id = %distress_id, vehicle_id = %vehicle_id, %message, "Vehicle taken by another writer");
                return Err(Error::validation("vehicle not available"));
            }
            Err(e) => return Err(e),
        };

        let stored = match self.distress.update_distress(&event).await {
            Ok(stored) => stored,
            Err(e) => {
                warn!(distress_id = %distress_id, vehicle_id = %vehicle_id, error = %e, "Distress write failed; releasing vehicle");
                self.compensate(distress_id, vehicle_id).await?;
                return Err(e.context(format!("dispatch {distress_id}")));
            }
        };
        drop(lease);

        info!(
            distress_id = %distress_id,
            vehicle_id = %vehicle_id,
            eta = %eta,
            provisional,
            "Vehicle dispatched"
        );
        let notification = Notification::Dispatched {
            distress_id,
            vehicle_id,
            call_sign: reserved.call_sign.clone(),
            eta,
            provisional,
        };
        deliver_best_effort(self.notifier.as_ref(), &notification).await;
        Ok(stored)
    }

    async fn compensate(&self, distress_id: DistressId, vehicle_id: VehicleId) -> Result<()> {
        let rollback = async {
            let mut vehicle = self.load_vehicle(vehicle_id).await?;
            if vehicle.status == VehicleStatus::Dispatched
                && vehicle.current_distress_id == Some(distress_id)
            {
                vehicle.release(self.clock.now());
                self.vehicles.update_vehicle(&vehicle).await?;
            }
            Ok::<(), Error>(())
        };
        match rollback.await {
            Ok(()) => {
                info!(vehicle_id = %vehicle_id, "Vehicle released after failed dispatch");
                Ok(())
            }
            Err(e) => {
                error!(
                    distress_id = %distress_id,
                    vehicle_id = %vehicle_id,
                    error = %e,
                    "Dispatch compensation failed; manual reconciliation required"
                );
                Err(Error::reconcile(format!(
                    "vehicle {vehicle_id} left reserved for distress {distress_id}: {e}"
                )))
            }
        }
    }

    /// Apply a vehicle status transition
    pub async fn update_vehicle_status(
        &self,
        cancel: &CancellationToken,
        vehicle_id: VehicleId,
        status: VehicleStatus,
    ) -> Result<Vehicle> {
        if status == VehicleStatus::Dispatched {
            return Err(Error::invalid_field(
                "status",
                "vehicles are reserved through dispatch",
            ));
        }
        ensure_active(cancel)?;
        let mut vehicle = self.load_vehicle(vehicle_id).await?;
        let previous = vehicle.status;
        vehicle
            .transition(status, self.clock.now())
            .map_err(|e| e.context(format!("vehicle {vehicle_id}")))?;

        ensure_active(cancel)?;
        let stored = self.vehicles.update_vehicle(&vehicle).await?;
        info!(vehicle_id = %vehicle_id, from = %previous, to = %status, "Vehicle status updated");
        Ok(stored)
    }

    /// Record a new vehicle position, refreshing the ETA of its engagement
    pub async fn update_vehicle_location(
        &self,
        cancel: &CancellationToken,
        vehicle_id: VehicleId,
        location: Coordinates,
    ) -> Result<Vehicle> {
        location.validate()?;
        let mut attempt = 0;
        let stored = loop {
            ensure_active(cancel)?;
            let mut vehicle = self.load_vehicle(vehicle_id).await?;
            vehicle.last_known_location = Some(location);
            vehicle.last_updated = self.clock.now();
            match self.vehicles.update_vehicle(&vehicle).await {
                Ok(stored) => break stored,
                Err(Error::Conflict(message)) if attempt + 1 < LOCATION_RETRIES => {
                    attempt += 1;
                    debug!(vehicle_id = %vehicle_id, attempt, %message, "Location write raced; retrying");
                }
                Err(e) => return Err(e),
            }
        };
        debug!(vehicle_id = %vehicle_id, location = %location, "Vehicle location updated");

        if let Some(distress_id) = stored.current_distress_id {
            match self.distress.get_distress(distress_id).await? {
                Some(event) if event.status == DistressStatus::Dispatched => {
                    self.refresh.enqueue(distress_id);
                }
                _ => {}
            }
        }
        Ok(stored)
    }
}
