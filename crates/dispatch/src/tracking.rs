//! Tracking loop
//!
//! Keeps the ETA of every dispatched distress event current and emits delay
//! notifications only when the estimate moves later by more than the
//! configured threshold. Refreshes are driven by explicit reads, by vehicle
//! location updates through the [`RefreshQueue`], and by a periodic sweep.

use chrono::TimeDelta;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use lifeline_core::config::TrackingConfig;
use lifeline_core::types::truncate_ms;
use lifeline_core::{
    ensure_active, with_deadline, CancellationToken, Clock, DistressEvent, DistressId,
    DistressRepository, DistressStatus, Error, Notification, Result, RouteProvider, Timestamp,
    TrackingRepository, TrackingUpdate, TrackingUpdateKind, UpdateId, Vehicle, VehicleId,
    VehicleRepository, VehicleStatus,
};

use crate::fanout::{deliver_best_effort, AlertFanout};

/// Sender half of the refresh queue, held by the dispatch engine
#[derive(Debug, Clone)]
pub struct RefreshQueue {
    tx: mpsc::UnboundedSender<DistressId>,
}

impl RefreshQueue {
    /// Request a refresh for a distress event
    pub fn enqueue(&self, distress_id: DistressId) {
        if self.tx.send(distress_id).is_err() {
            debug!(distress_id = %distress_id, "Tracking loop not running; refresh dropped");
        }
    }
}

/// Receiver half, consumed by [`TrackingLoop::run`]
pub type RefreshReceiver = mpsc::UnboundedReceiver<DistressId>;

/// Create a refresh queue
pub fn refresh_queue() -> (RefreshQueue, RefreshReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (RefreshQueue { tx }, rx)
}

/// What a refresh did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// Nothing to refresh: not dispatched, no vehicle or no known location
    Skipped,
    /// New estimate within the threshold; nothing persisted
    Unchanged,
    /// New estimate persisted
    Updated {
        /// Estimate before the change
        previous: Option<Timestamp>,
        /// Estimate after the change
        eta: Timestamp,
        /// A delay notification was emitted
        delayed: bool,
    },
}

/// Answer to an ETA query
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EtaView {
    /// Estimated arrival instant
    pub eta: Timestamp,
    /// Whole minutes remaining, rounded up, never negative
    pub eta_minutes: i64,
    /// Assigned vehicle
    pub vehicle_id: VehicleId,
}

/// Whole minutes until `eta`, rounded up, floored at zero
pub fn minutes_remaining(now: Timestamp, eta: Timestamp) -> i64 {
    let ms = (eta - now).num_milliseconds();
    if ms <= 0 {
        0
    } else {
        (ms + 59_999) / 60_000
    }
}

/// ETA refresh loop and arrival/update recording
pub struct TrackingLoop {
    distress: Arc<dyn DistressRepository>,
    vehicles: Arc<dyn VehicleRepository>,
    updates: Arc<dyn TrackingRepository>,
    routes: Arc<dyn RouteProvider>,
    fanout: Arc<AlertFanout>,
    clock: Arc<dyn Clock>,
    threshold: TimeDelta,
    stale_after: TimeDelta,
    sweep_period: Duration,
    route_timeout: Duration,
    receiver: Mutex<Option<RefreshReceiver>>,
    last_refresh: Mutex<HashMap<DistressId, Timestamp>>,
}

impl TrackingLoop {
    /// Create a tracking loop fed by `receiver`
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        distress: Arc<dyn DistressRepository>,
        vehicles: Arc<dyn VehicleRepository>,
        updates: Arc<dyn TrackingRepository>,
        routes: Arc<dyn RouteProvider>,
        fanout: Arc<AlertFanout>,
        clock: Arc<dyn Clock>,
        config: &TrackingConfig,
        route_timeout: Duration,
        receiver: RefreshReceiver,
    ) -> Self {
        Self {
            distress,
            vehicles,
            updates,
            routes,
            fanout,
            clock,
            threshold: TimeDelta::minutes(config.eta_change_threshold_minutes),
            stale_after: TimeDelta::seconds(config.stale_after_secs as i64),
            sweep_period: config.sweep_period(),
            route_timeout,
            receiver: Mutex::new(Some(receiver)),
            last_refresh: Mutex::new(HashMap::new()),
        }
    }

    async fn load(&self, id: DistressId) -> Result<DistressEvent> {
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

    /// Recompute the ETA from the vehicle's last known location
    pub async fn refresh_eta(&self, cancel: &CancellationToken, id: DistressId) -> Result<RefreshOutcome> {
        ensure_active(cancel)?;
        let mut event = self.load(id).await?;
        if event.status != DistressStatus::Dispatched {
            return Ok(RefreshOutcome::Skipped);
        }
        let Some(vehicle_id) = event.assigned_vehicle else {
            return Ok(RefreshOutcome::Skipped);
        };
        let vehicle = self.load_vehicle(vehicle_id).await?;
        let Some(location) = vehicle.last_known_location else {
            return Ok(RefreshOutcome::Skipped);
        };

        let route = with_deadline(
            cancel,
            self.route_timeout,
            "route",
            self.routes.route(location, event.coordinates),
        )
        .await?;

        let now = self.clock.now();
        self.last_refresh.lock().insert(id, now);
        let new_eta = truncate_ms(now + route.duration);
        let previous = event.eta;

        if let Some(old) = previous {
            if (new_eta - old).abs() <= self.threshold {
                debug!(distress_id = %id, eta = %new_eta, "ETA within threshold");
                return Ok(RefreshOutcome::Unchanged);
            }
        }

        event.eta = Some(new_eta);
        event.eta_provisional = false;
        event.updated = now;
        ensure_active(cancel)?;
        let stored = self.distress.update_distress(&event).await?;
        info!(distress_id = %id, eta = %new_eta, previous = ?previous, "ETA refreshed");

        let delayed = match previous {
            Some(old) if new_eta - old > self.threshold => {
                self.emit_delay(&stored, Some(old), new_eta).await;
                true
            }
            _ => false,
        };
        Ok(RefreshOutcome::Updated {
            previous,
            eta: new_eta,
            delayed,
        })
    }

    async fn emit_delay(&self, event: &DistressEvent, previous: Option<Timestamp>, new_eta: Timestamp) {
        let delay_minutes = previous.map(|old| (new_eta - old).num_minutes()).unwrap_or(0);
        let notification = Notification::Delay {
            distress_id: event.id,
            vehicle_id: event.assigned_vehicle,
            previous_eta: previous,
            new_eta,
            delay_minutes,
        };
        deliver_best_effort(self.fanout.notifier().as_ref(), &notification).await;
    }

    /// Shift the ETA later by a reported traffic delay
    pub async fn refresh_on_traffic(
        &self,
        cancel: &CancellationToken,
        id: DistressId,
        delay_minutes: i64,
    ) -> Result<DistressEvent> {
        if delay_minutes < 0 {
            return Err(Error::invalid_field("delay_minutes", "delay cannot be negative"));
        }
        ensure_active(cancel)?;
        let mut event = self.load(id).await?;
        if event.status != DistressStatus::Dispatched {
            return Err(Error::validation(format!(
                "distress {id} is {}, expected dispatched",
                event.status
            )));
        }

        let now = self.clock.now();
        let previous = event.eta;
        let new_eta = previous.unwrap_or(now) + TimeDelta::minutes(delay_minutes);
        event.eta = Some(new_eta);
        event.updated = now;
        ensure_active(cancel)?;
        let stored = self.distress.update_distress(&event).await?;
        info!(distress_id = %id, delay_minutes, eta = %new_eta, "Traffic delay applied");

        if TimeDelta::minutes(delay_minutes) > self.threshold {
            let notification = Notification::Delay {
                distress_id: id,
                vehicle_id: stored.assigned_vehicle,
                previous_eta: previous,
                new_eta,
                delay_minutes,
            };
            deliver_best_effort(self.fanout.notifier().as_ref(), &notification).await;
        }
        Ok(stored)
    }

    /// Mark the assigned vehicle as arrived; repeated calls are no-ops
    pub async fn record_arrival(&self, cancel: &CancellationToken, id: DistressId) -> Result<DistressEvent> {
        ensure_active(cancel)?;
        let mut event = self.load(id).await?;
        if event.arrived_at.is_some() {
            debug!(distress_id = %id, "Arrival already recorded");
            return Ok(event);
        }
        if event.status != DistressStatus::Dispatched {
            return Err(Error::validation(format!(
                "distress {id} is {}, expected dispatched",
                event.status
            )));
        }
        let vehicle_id = event
            .assigned_vehicle
            .ok_or_else(|| Error::validation(format!("distress {id} has no assigned vehicle")))?;
        let mut vehicle = self.load_vehicle(vehicle_id).await?;
        if vehicle.current_distress_id != Some(id) {
            return Err(Error::validation(format!(
                "vehicle {vehicle_id} is not engaged on distress {id}"
            )));
        }

        let now = self.clock.now();
        let mut moved = false;
        if vehicle.status == VehicleStatus::Dispatched {
            vehicle.transition(VehicleStatus::EnRoute, now)?;
            moved = true;
        }
        if vehicle.status == VehicleStatus::EnRoute {
            vehicle.transition(VehicleStatus::Arrived, now)?;
            moved = true;
        }
        if vehicle.status != VehicleStatus::Arrived {
            return Err(Error::validation(format!(
                "vehicle {vehicle_id} is {} and cannot arrive",
                vehicle.status
            )));
        }

        ensure_active(cancel)?;
        if moved {
            vehicle = self.vehicles.update_vehicle(&vehicle).await?;
        }
        event.arrived_at = Some(now);
        event.updated = now;
        let stored = self.distress.update_distress(&event).await?;
        info!(distress_id = %id, vehicle_id = %vehicle_id, "Arrival recorded");

        let update = TrackingUpdate {
            id: UpdateId::new(),
            distress_id: id,
            vehicle_id: Some(vehicle_id),
            kind: TrackingUpdateKind::Arrived,
            description: format!("{} arrived on scene", vehicle.call_sign),
            location: vehicle.last_known_location,
            created: now,
        };
        if let Err(e) = self.updates.insert_update(&update).await {
            warn!(distress_id = %id, error = %e, "Arrival tracking update not stored");
        }
        let notification = Notification::Arrival {
            distress_id: id,
            vehicle_id,
            arrived_at: now,
        };
        deliver_best_effort(self.fanout.notifier().as_ref(), &notification).await;
        self.last_refresh.lock().remove(&id);
        Ok(stored)
    }

    /// Store a tracking update and alert facilities
    pub async fn record_update(
        &self,
        cancel: &CancellationToken,
        id: DistressId,
        kind: TrackingUpdateKind,
        description: &str,
    ) -> Result<TrackingUpdate> {
        let description = description.trim();
        if description.is_empty() {
            return Err(Error::invalid_field("description", "description cannot be empty"));
        }
        ensure_active(cancel)?;
        let event = self.load(id).await?;
        let location = match event.assigned_vehicle {
            Some(vehicle_id) => self
                .vehicles
                .get_vehicle(vehicle_id)
                .await?
                .and_then(|v| v.last_known_location),
            None => None,
        };

        let update = TrackingUpdate {
            id: UpdateId::new(),
            distress_id: id,
            vehicle_id: event.assigned_vehicle,
            kind,
            description: description.to_string(),
            location,
            created: self.clock.now(),
        };
        ensure_active(cancel)?;
        self.updates.insert_update(&update).await?;
        info!(distress_id = %id, kind = kind.as_str(), "Tracking update recorded");

        if let Err(e) = self.fanout.send_status_alert(&event, description).await {
            warn!(distress_id = %id, error = %e, "Status alert failed");
        }
        Ok(update)
    }

    /// Tracking updates for an event in creation order
    pub async fn list_updates(&self, cancel: &CancellationToken, id: DistressId) -> Result<Vec<TrackingUpdate>> {
        ensure_active(cancel)?;
        self.load(id).await?;
        self.updates.list_updates(id).await
    }

    /// Current ETA, refreshed first when possible
    pub async fn get_eta(&self, cancel: &CancellationToken, id: DistressId) -> Result<EtaView> {
        match self.refresh_eta(cancel, id).await {
            Ok(_) => {}
            Err(Error::Cancelled) => return Err(Error::Cancelled),
            Err(e) if matches!(&e, Error::NotFound { resource, .. } if *resource == DistressId::RESOURCE) => {
                return Err(e)
            }
            Err(e) => warn!(distress_id = %id, error = %e, "ETA refresh failed; serving stored estimate"),
        }
        let event = self.load(id).await?;
        match (event.eta, event.assigned_vehicle) {
            (Some(eta), Some(vehicle_id)) => Ok(EtaView {
                eta,
                eta_minutes: minutes_remaining(self.clock.now(), eta),
                vehicle_id,
            }),
            _ => Err(Error::validation(format!("distress {id} has no eta"))),
        }
    }

    /// Refresh every dispatched event not refreshed within the staleness window
    pub async fn sweep(&self, cancel: &CancellationToken) -> Result<usize> {
        let dispatched = self
            .distress
            .list_distress_by_status(DistressStatus::Dispatched)
            .await?;
        let now = self.clock.now();
        {
            let mut last = self.last_refresh.lock();
            last.retain(|id, _| dispatched.iter().any(|e| e.id == *id));
        }

        let mut refreshed = 0;
        for event in dispatched {
            ensure_active(cancel)?;
            let last = self
                .last_refresh
                .lock()
                .get(&event.id)
                .copied()
                .unwrap_or(event.updated);
            if now - last < self.stale_after {
                continue;
            }
            match self.refresh_eta(cancel, event.id).await {
                Ok(RefreshOutcome::Skipped) => {}
                Ok(_) => refreshed += 1,
                Err(Error::Cancelled) => return Err(Error::Cancelled),
                Err(e) => warn!(distress_id = %event.id, error = %e, "Sweep refresh failed"),
            }
        }
        debug!(refreshed, "Tracking sweep complete");
        Ok(refreshed)
    }

    /// Drain the refresh queue and sweep periodically until cancelled
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        let mut receiver = self
            .receiver
            .lock()
            .take()
            .ok_or_else(|| Error::validation("tracking loop already running"))?;
        let mut sweep = tokio::time::interval(self.sweep_period);
        sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(period_secs = self.sweep_period.as_secs(), "Tracking loop started");

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                Some(id) = receiver.recv() => {
                    match self.refresh_eta(&cancel, id).await {
                        Ok(_) | Err(Error::Cancelled) => {}
                        Err(e) => warn!(distress_id = %id, error = %e, "Queued refresh failed"),
                    }
                }
                _ = sweep.tick() => {
                    match self.sweep(&cancel).await {
                        Ok(_) | Err(Error::Cancelled) => {}
                        Err(e) => warn!(error = %e, "Tracking sweep failed"),
                    }
                }
            }
        }

        *self.receiver.lock() = Some(receiver);
        info!("Tracking loop stopped");
        Ok(())
    }
}
