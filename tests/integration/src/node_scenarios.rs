//! Two nodes over one SQLite file
//!
//! Each node owns its store connection and dispatch engine, so the in-process
//! vehicle lease never sees the other node. Exclusivity comes from the
//! versioned writes alone.

use chrono::TimeDelta;
use std::sync::Arc;

use lifeline_core::config::DispatchConfig;
use lifeline_core::{
    CancellationToken, Clock, DistressEvent, DistressNature, DistressRepository, DistressStatus,
    ErrorKind, FacilityId, ManualClock, UserId, Vehicle, VehicleKind, VehicleRepository,
    VehicleStatus,
};
use lifeline_dispatch::{refresh_queue, DispatchEngine};
use lifeline_store::SqliteStore;

use crate::test_utils::{
    init_test_logging, north_of, scene, start_time, GatedRoutes, RecordingNotifier, TempDb,
};

struct Node {
    store: Arc<SqliteStore>,
    dispatch: DispatchEngine,
}

fn node(
    db: &TempDb,
    routes: Arc<GatedRoutes>,
    notes: Arc<RecordingNotifier>,
    clock: Arc<ManualClock>,
) -> Node {
    let store = Arc::new(SqliteStore::open(&db.0).unwrap());
    let (queue, _rx) = refresh_queue();
    let dispatch = DispatchEngine::new(
        store.clone(),
        store.clone(),
        routes,
        notes,
        clock,
        queue,
        &DispatchConfig::default(),
    );
    Node { store, dispatch }
}

fn two_nodes(db: &TempDb) -> (Node, Node, Arc<RecordingNotifier>, Arc<ManualClock>) {
    init_test_logging();
    let routes = Arc::new(GatedRoutes::new(2, TimeDelta::minutes(6)));
    let notes = Arc::new(RecordingNotifier::default());
    let clock = Arc::new(ManualClock::new(start_time()));
    let a = node(db, routes.clone(), notes.clone(), clock.clone());
    let b = node(db, routes, notes.clone(), clock.clone());
    (a, b, notes, clock)
}

async fn report(store: &SqliteStore, clock: &ManualClock) -> DistressEvent {
    let event = DistressEvent::new(
        UserId::new(),
        UserId::new(),
        scene(),
        DistressNature::Labor,
        "contractions".into(),
        clock.now(),
    );
    store.insert_distress(&event).await.unwrap()
}

async fn vehicle(store: &SqliteStore, clock: &ManualClock, call_sign: &str) -> Vehicle {
    let vehicle = Vehicle::new(call_sign, VehicleKind::Obstetric, FacilityId::new(), clock.now())
        .with_location(north_of(scene(), 2.0));
    store.insert_vehicle(&vehicle).await.unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_one_vehicle_claimed_from_two_nodes() {
    let db = TempDb::new();
    let (a, b, notes, clock) = two_nodes(&db);
    let event = report(&a.store, &clock).await;
    let ambulance = vehicle(&a.store, &clock, "MAMA-1").await;
    let cancel = CancellationToken::new();

    let (first, second) = tokio::join!(
        a.dispatch.dispatch(&cancel, event.id, ambulance.id),
        b.dispatch.dispatch(&cancel, event.id, ambulance.id),
    );

    let (won, lost) = match (first, second) {
        (Ok(won), Err(lost)) | (Err(lost), Ok(won)) => (won, lost),
        other => panic!("expected exactly one winner, got {other:?}"),
    };
    assert!(lost.is(ErrorKind::Validation), "unexpected {lost}");
    assert!(lost.to_string().contains("vehicle not available"));
    assert_eq!(won.assigned_vehicle, Some(ambulance.id));

    let stored = b.store.get_vehicle(ambulance.id).await.unwrap().unwrap();
    assert_eq!(stored.status, VehicleStatus::Dispatched);
    assert_eq!(stored.current_distress_id, Some(event.id));
    assert_eq!(notes.count("dispatched"), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_one_event_dispatched_from_two_nodes() {
    let db = TempDb::new();
    let (a, b, notes, clock) = two_nodes(&db);
    let event = report(&a.store, &clock).await;
    let first_vehicle = vehicle(&a.store, &clock, "MAMA-1").await;
    let second_vehicle = vehicle(&b.store, &clock, "MAMA-2").await;
    let cancel = CancellationToken::new();

    let (first, second) = tokio::join!(
        a.dispatch.dispatch(&cancel, event.id, first_vehicle.id),
        b.dispatch.dispatch(&cancel, event.id, second_vehicle.id),
    );

    let (won, lost) = match (first, second) {
        (Ok(won), Err(lost)) | (Err(lost), Ok(won)) => (won, lost),
        other => panic!("expected exactly one winner, got {other:?}"),
    };
    assert!(lost.is(ErrorKind::Conflict), "unexpected {lost}");

    let stored = a.store.get_distress(event.id).await.unwrap().unwrap();
    assert_eq!(stored.status, DistressStatus::Dispatched);
    assert_eq!(stored.assigned_vehicle, won.assigned_vehicle);

    let loser = if won.assigned_vehicle == Some(first_vehicle.id) {
        second_vehicle.id
    } else {
        first_vehicle.id
    };
    let released = a.store.get_vehicle(loser).await.unwrap().unwrap();
    assert_eq!(released.status, VehicleStatus::Available);
    assert!(released.current_distress_id.is_none());
    assert_eq!(
        a.store.list_available_vehicles().await.unwrap().len(),
        1,
        "only the losing vehicle is free again"
    );
    assert_eq!(notes.count("dispatched"), 1);
}
