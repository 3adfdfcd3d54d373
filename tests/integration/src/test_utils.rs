//! Shared fixtures for the Lifeline integration suite

use async_trait::async_trait;
use chrono::{TimeDelta, TimeZone, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Barrier;

use lifeline_core::types::EARTH_RADIUS_KM;
use lifeline_core::{
    CancellationToken, Clock, Contact, ContactId, Coordinates, Delivery, DistressEvent, DistressId,
    DistressRepository, DistressStatus, DriverError, Error, Facility, FacilityId, LifelineConfig,
    ManualClock, MessageId, MessageKind, NoResponders, Notification, Notifier, OutboundMessage, Result,
    Route, RouteProvider, Subject, Timestamp, TransportDriver, UserId, Vehicle, VehicleId, VehicleKind,
    VehicleRepository,
};
use lifeline_dispatch::{
    refresh_queue, AlertFanout, DispatchEngine, DistressCoordinator, ReportDistress, TrackingLoop,
};
use lifeline_escalation::EscalationEngine;
use lifeline_store::MemoryStore;

/// Kilometres per degree of latitude on the haversine sphere
pub fn km_per_degree() -> f64 {
    EARTH_RADIUS_KM.to_radians()
}

/// Install a test-writer subscriber once; later calls are no-ops
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new("warn"))
        .with_test_writer()
        .try_init();
}

/// 2026-03-01 09:54:00 UTC
pub fn start_time() -> Timestamp {
    Utc.with_ymd_and_hms(2026, 3, 1, 9, 54, 0).unwrap()
}

/// Freetown maternity scene
pub fn scene() -> Coordinates {
    Coordinates::new(8.4844, -13.2299).unwrap()
}

/// A point `km` due north of `base`
pub fn north_of(base: Coordinates, km: f64) -> Coordinates {
    Coordinates::new(base.latitude + km / km_per_degree(), base.longitude).unwrap()
}

// ---- notifier ----

/// Notifier that keeps every notification it is handed
#[derive(Default)]
pub struct RecordingNotifier {
    notes: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn all(&self) -> Vec<Notification> {
        self.notes.lock().clone()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.notes.lock().iter().map(Notification::name).collect()
    }

    pub fn count(&self, name: &str) -> usize {
        self.notes.lock().iter().filter(|n| n.name() == name).count()
    }

    pub fn clear(&self) {
        self.notes.lock().clear();
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn deliver(&self, notification: &Notification) -> Result<Delivery> {
        self.notes.lock().push(notification.clone());
        Ok(Delivery {
            reached: notification.target_count(),
        })
    }
}

// ---- routes ----

fn key(c: Coordinates) -> (u64, u64) {
    (c.latitude.to_bits(), c.longitude.to_bits())
}

/// Route provider answering scripted durations keyed by origin
#[derive(Default)]
pub struct ScriptedRouteProvider {
    durations: Mutex<HashMap<(u64, u64), TimeDelta>>,
    calls: AtomicUsize,
}

impl ScriptedRouteProvider {
    pub fn script(&self, from: Coordinates, duration: TimeDelta) {
        self.durations.lock().insert(key(from), duration);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RouteProvider for ScriptedRouteProvider {
    async fn route(&self, from: Coordinates, to: Coordinates) -> Result<Route> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let duration = self
            .durations
            .lock()
            .get(&key(from))
            .copied()
            .ok_or_else(|| Error::operation_failed("route", "no route scripted"))?;
        Ok(Route {
            distance_km: from.distance_km(&to),
            duration,
        })
    }
}

/// Route provider that holds every caller until `parties` callers are waiting
pub struct GatedRoutes {
    gate: Barrier,
    duration: TimeDelta,
}

impl GatedRoutes {
    pub fn new(parties: usize, duration: TimeDelta) -> Self {
        Self {
            gate: Barrier::new(parties),
            duration,
        }
    }
}

#[async_trait]
impl RouteProvider for GatedRoutes {
    async fn route(&self, from: Coordinates, to: Coordinates) -> Result<Route> {
        self.gate.wait().await;
        Ok(Route {
            distance_km: from.distance_km(&to),
            duration: self.duration,
        })
    }
}

// ---- transport ----

/// Driver that records every send
pub struct RecordingDriver {
    kind: MessageKind,
    sent: Mutex<Vec<MessageId>>,
}

impl RecordingDriver {
    pub fn new(kind: MessageKind) -> Self {
        Self {
            kind,
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn sent(&self) -> Vec<MessageId> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl TransportDriver for RecordingDriver {
    fn kind(&self) -> MessageKind {
        self.kind
    }

    async fn send(&self, message: &OutboundMessage) -> std::result::Result<(), DriverError> {
        self.sent.lock().push(message.message_id);
        tokio::task::yield_now().await;
        Ok(())
    }
}

// ---- databases ----

/// SQLite file removed with its WAL side files on drop
pub struct TempDb(pub PathBuf);

impl TempDb {
    pub fn new() -> Self {
        Self(std::env::temp_dir().join(format!("lifeline-{}.db", uuid::Uuid::new_v4())))
    }
}

impl Default for TempDb {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for TempDb {
    fn drop(&mut self) {
        for suffix in ["", "-wal", "-shm"] {
            let mut path = self.0.clone().into_os_string();
            path.push(suffix);
            let _ = std::fs::remove_file(path);
        }
    }
}

// ---- failure injection ----

/// Distress repository whose updates can be switched to fail
pub struct FlakyDistress {
    pub inner: Arc<MemoryStore>,
    pub fail_updates: AtomicBool,
}

#[async_trait]
impl DistressRepository for FlakyDistress {
    async fn insert_distress(&self, event: &DistressEvent) -> Result<DistressEvent> {
        self.inner.insert_distress(event).await
    }

    async fn get_distress(&self, id: DistressId) -> Result<Option<DistressEvent>> {
        self.inner.get_distress(id).await
    }

    async fn update_distress(&self, event: &DistressEvent) -> Result<DistressEvent> {
        if self.fail_updates.load(Ordering::SeqCst) {
            return Err(Error::internal("distress table unavailable"));
        }
        self.inner.update_distress(event).await
    }

    async fn list_active_distress(&self) -> Result<Vec<DistressEvent>> {
        self.inner.list_active_distress().await
    }

    async fn list_distress_by_status(&self, status: DistressStatus) -> Result<Vec<DistressEvent>> {
        self.inner.list_distress_by_status(status).await
    }

    async fn list_distress_by_subject(&self, subject: UserId) -> Result<Vec<DistressEvent>> {
        self.inner.list_distress_by_subject(subject).await
    }
}

/// Vehicle repository that fails every update after the first `allowed`
pub struct FlakyVehicles {
    pub inner: Arc<MemoryStore>,
    pub allowed: AtomicUsize,
}

#[async_trait]
impl VehicleRepository for FlakyVehicles {
    async fn insert_vehicle(&self, vehicle: &Vehicle) -> Result<Vehicle> {
        self.inner.insert_vehicle(vehicle).await
    }

    async fn get_vehicle(&self, id: VehicleId) -> Result<Option<Vehicle>> {
        self.inner.get_vehicle(id).await
    }

    async fn update_vehicle(&self, vehicle: &Vehicle) -> Result<Vehicle> {
        let left = self.allowed.load(Ordering::SeqCst);
        if left == 0 {
            return Err(Error::internal("vehicle table unavailable"));
        }
        self.allowed.store(left - 1, Ordering::SeqCst);
        self.inner.update_vehicle(vehicle).await
    }

    async fn list_available_vehicles(&self) -> Result<Vec<Vehicle>> {
        self.inner.list_available_vehicles().await
    }

    async fn available_vehicles_within(&self, center: Coordinates, radius_km: f64) -> Result<Vec<Vehicle>> {
        self.inner.available_vehicles_within(center, radius_km).await
    }
}

// ---- harness ----

/// Every distress-side service wired over one in-memory store and a manual clock
pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub clock: Arc<ManualClock>,
    pub notes: Arc<RecordingNotifier>,
    pub routes: Arc<ScriptedRouteProvider>,
    pub coordinator: DistressCoordinator,
    pub dispatch: DispatchEngine,
    pub tracking: TrackingLoop,
    pub escalation: EscalationEngine,
    pub cancel: CancellationToken,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(LifelineConfig::default())
    }

    pub fn with_config(config: LifelineConfig) -> Self {
        init_test_logging();
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(start_time()));
        let notes = Arc::new(RecordingNotifier::default());
        let routes = Arc::new(ScriptedRouteProvider::default());

        let fanout = Arc::new(AlertFanout::new(
            store.clone(),
            store.clone(),
            notes.clone(),
            &config.alerts,
        ));
        let coordinator = DistressCoordinator::new(
            store.clone(),
            store.clone(),
            store.clone(),
            Arc::new(NoResponders),
            fanout.clone(),
            clock.clone(),
        );
        let (queue, receiver) = refresh_queue();
        let dispatch = DispatchEngine::new(
            store.clone(),
            store.clone(),
            routes.clone(),
            notes.clone(),
            clock.clone(),
            queue,
            &config.dispatch,
        );
        let tracking = TrackingLoop::new(
            store.clone(),
            store.clone(),
            store.clone(),
            routes.clone(),
            fanout,
            clock.clone(),
            &config.tracking,
            config.dispatch.route_timeout(),
            receiver,
        );
        let escalation = EscalationEngine::new(
            store.clone(),
            store.clone(),
            store.clone(),
            notes.clone(),
            clock.clone(),
            config.escalation.clone(),
        );

        Self {
            store,
            clock,
            notes,
            routes,
            coordinator,
            dispatch,
            tracking,
            escalation,
            cancel: CancellationToken::new(),
        }
    }

    pub fn facility(&self, name: &str, at: Coordinates) -> FacilityId {
        let facility = Facility::new(name, at, Some("Western Area".into()));
        let id = facility.id;
        self.store.insert_facility(facility);
        id
    }

    pub fn subject(&self, primary: Option<FacilityId>) -> UserId {
        let id = UserId::new();
        self.store.insert_subject(Subject {
            id,
            primary_facility: primary,
            district: Some("Western Area".into()),
        });
        id
    }

    pub fn contacts(&self, n: usize) -> Vec<ContactId> {
        (0..n)
            .map(|i| {
                let mut contact = Contact::new(format!("Responder {i}"));
                contact.phone = Some(format!("+23276000{i:03}"));
                contact.escalation = true;
                let id = contact.id;
                self.store.insert_contact(contact);
                id
            })
            .collect()
    }

    pub async fn vehicle(&self, call_sign: &str, kind: VehicleKind, at: Option<Coordinates>) -> Vehicle {
        let mut vehicle = Vehicle::new(call_sign, kind, FacilityId::new(), self.clock.now());
        vehicle.last_known_location = at;
        self.dispatch.register_vehicle(&self.cancel, vehicle).await.unwrap()
    }

    pub async fn report(&self, subject: UserId) -> DistressEvent {
        self.coordinator
            .report(
                &self.cancel,
                ReportDistress {
                    subject_id: subject,
                    reporter_id: UserId::new(),
                    coordinates: scene(),
                    nature: lifeline_core::DistressNature::Labor,
                    description: "contractions".into(),
                },
            )
            .await
            .unwrap()
    }
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}
