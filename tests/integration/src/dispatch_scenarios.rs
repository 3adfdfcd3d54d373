//! Dispatch scenarios
//!
//! Report, rank and commit a vehicle against a live store, including the
//! race for one vehicle and the compensation path when the second write of
//! a dispatch fails.

use chrono::TimeDelta;
use futures_util::future::join_all;
use std::sync::atomic::{AtomicBool, AtomicUsize};
use std::sync::Arc;

use lifeline_core::config::DispatchConfig;
use lifeline_core::{
    Clock, DistressRepository, DistressStatus, ErrorKind, Notification, VehicleKind, VehicleRepository,
    VehicleStatus,
};
use lifeline_dispatch::{refresh_queue, DispatchEngine};

use crate::test_utils::{north_of, scene, FlakyDistress, FlakyVehicles, Harness};

#[tokio::test]
async fn test_happy_path_dispatch() {
    let h = Harness::new();
    let clinic = h.facility("Princess Christian Maternity", north_of(scene(), 3.0));
    let mother = h.subject(Some(clinic));

    let event = h.report(mother).await;
    assert_eq!(event.status, DistressStatus::Reported);
    assert_eq!(event.priority, 3);
    assert_eq!(event.assigned_facility, Some(clinic));
    assert_eq!(h.coordinator.get(&h.cancel, event.id).await.unwrap(), event);

    let l1 = north_of(scene(), 2.0);
    let l2 = north_of(scene(), 1.0);
    h.routes.script(l1, TimeDelta::minutes(6));
    h.routes.script(l2, TimeDelta::minutes(4));
    let v1 = h.vehicle("MAMA-1", VehicleKind::Obstetric, Some(l1)).await;
    let v2 = h.vehicle("BASIC-2", VehicleKind::Basic, Some(l2)).await;

    let ranked = h.dispatch.find_candidates(&h.cancel, event.id, 5).await.unwrap();
    let order: Vec<_> = ranked.iter().map(|c| c.vehicle.id).collect();
    assert_eq!(order, vec![v1.id, v2.id]);
    assert!((ranked[0].score - 121.9).abs() < 0.5, "score {}", ranked[0].score);
    assert!((ranked[1].score - 105.0).abs() < 0.5, "score {}", ranked[1].score);

    let dispatched = h.dispatch.dispatch(&h.cancel, event.id, v1.id).await.unwrap();
    assert_eq!(dispatched.status, DistressStatus::Dispatched);
    assert_eq!(dispatched.assigned_vehicle, Some(v1.id));
    assert_eq!(dispatched.eta, Some(h.clock.now() + TimeDelta::minutes(6)));
    assert!(!dispatched.eta_provisional);

    let vehicle = h.dispatch.get_vehicle(&h.cancel, v1.id).await.unwrap();
    assert_eq!(vehicle.status, VehicleStatus::Dispatched);
    assert_eq!(vehicle.current_distress_id, Some(event.id));
    assert_eq!(h.notes.count("dispatched"), 1);
}

#[tokio::test]
async fn test_report_alerts_nearby_facilities_once() {
    let h = Harness::new();
    let near = h.facility("Ola During", north_of(scene(), 1.0));
    let also_near = h.facility("Cottage Hospital", north_of(scene(), 4.0));
    h.facility("Bo Government", north_of(scene(), 200.0));
    let mother = h.subject(None);

    let event = h.report(mother).await;
    assert_eq!(event.assigned_facility, Some(near));

    let broadcasts: Vec<_> = h
        .notes
        .all()
        .into_iter()
        .filter_map(|n| match n {
            Notification::RegionalBroadcast { facilities, .. } => Some(facilities),
            _ => None,
        })
        .collect();
    assert_eq!(broadcasts.len(), 1);
    assert_eq!(broadcasts[0].len(), 2);
    assert!(broadcasts[0].contains(&also_near));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_dispatch_single_winner() {
    let h = Arc::new(Harness::new());
    let mother = h.subject(None);
    let event = h.report(mother).await;
    let at = north_of(scene(), 2.0);
    h.routes.script(at, TimeDelta::minutes(6));
    let vehicle = h.vehicle("MAMA-1", VehicleKind::Obstetric, Some(at)).await;

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let h = h.clone();
            tokio::spawn(async move { h.dispatch.dispatch(&h.cancel, event.id, vehicle.id).await })
        })
        .collect();

    let mut wins = 0;
    for joined in join_all(tasks).await {
        match joined.unwrap() {
            Ok(stored) => {
                wins += 1;
                assert_eq!(stored.assigned_vehicle, Some(vehicle.id));
            }
            Err(e) => assert!(e.is(ErrorKind::Validation), "unexpected {e}"),
        }
    }
    assert_eq!(wins, 1);
    assert_eq!(h.notes.count("dispatched"), 1);
}

#[tokio::test]
async fn test_failed_distress_write_releases_vehicle() {
    let h = Harness::new();
    let mother = h.subject(None);
    let event = h.report(mother).await;
    let vehicle = h.vehicle("MAMA-1", VehicleKind::Advanced, None).await;

    let flaky = Arc::new(FlakyDistress {
        inner: h.store.clone(),
        fail_updates: AtomicBool::new(true),
    });
    let (queue, _rx) = refresh_queue();
    let engine = DispatchEngine::new(
        flaky,
        h.store.clone(),
        h.routes.clone(),
        h.notes.clone(),
        h.clock.clone(),
        queue,
        &DispatchConfig::default(),
    );

    let err = engine.dispatch(&h.cancel, event.id, vehicle.id).await.unwrap_err();
    assert!(err.is(ErrorKind::Internal));
    assert!(err.details().map_or(true, |d| !d.contains_key("reconcile")));

    let vehicle = h.store.get_vehicle(vehicle.id).await.unwrap().unwrap();
    assert_eq!(vehicle.status, VehicleStatus::Available);
    assert!(vehicle.current_distress_id.is_none());
    let stored = h.store.get_distress(event.id).await.unwrap().unwrap();
    assert_eq!(stored.status, DistressStatus::Reported);
    assert_eq!(h.notes.count("dispatched"), 0);
}

#[tokio::test]
async fn test_failed_rollback_is_flagged_for_reconciliation() {
    let h = Harness::new();
    let mother = h.subject(None);
    let event = h.report(mother).await;
    let vehicle = h.vehicle("MAMA-1", VehicleKind::Advanced, None).await;

    let (queue, _rx) = refresh_queue();
    let engine = DispatchEngine::new(
        Arc::new(FlakyDistress {
            inner: h.store.clone(),
            fail_updates: AtomicBool::new(true),
        }),
        Arc::new(FlakyVehicles {
            inner: h.store.clone(),
            allowed: AtomicUsize::new(1),
        }),
        h.routes.clone(),
        h.notes.clone(),
        h.clock.clone(),
        queue,
        &DispatchConfig::default(),
    );

    let err = engine.dispatch(&h.cancel, event.id, vehicle.id).await.unwrap_err();
    assert!(err.is(ErrorKind::Internal));
    let details = err.details().unwrap();
    assert_eq!(details.get("reconcile"), Some(&serde_json::Value::Bool(true)));

    let stuck = h.store.get_vehicle(vehicle.id).await.unwrap().unwrap();
    assert_eq!(stuck.status, VehicleStatus::Dispatched);
}

#[tokio::test]
async fn test_no_location_dispatch_is_provisional() {
    let h = Harness::new();
    let mother = h.subject(None);
    let event = h.report(mother).await;
    let vehicle = h.vehicle("BASIC-9", VehicleKind::Basic, None).await;

    let dispatched = h.dispatch.dispatch(&h.cancel, event.id, vehicle.id).await.unwrap();
    assert!(dispatched.eta_provisional);
    assert_eq!(dispatched.eta, Some(h.clock.now() + TimeDelta::minutes(60)));
    assert_eq!(h.routes.calls(), 0);
}

#[tokio::test]
async fn test_cancelling_event_leaves_vehicle_engaged() {
    let h = Harness::new();
    let mother = h.subject(None);
    let event = h.report(mother).await;
    let vehicle = h.vehicle("MAMA-1", VehicleKind::Obstetric, None).await;
    h.dispatch.dispatch(&h.cancel, event.id, vehicle.id).await.unwrap();

    let cancelled = h
        .coordinator
        .set_status(&h.cancel, event.id, DistressStatus::Cancelled)
        .await
        .unwrap();
    assert_eq!(cancelled.status, DistressStatus::Cancelled);
    assert!(cancelled.resolved_at.is_some());

    let engaged = h.dispatch.get_vehicle(&h.cancel, vehicle.id).await.unwrap();
    assert_eq!(engaged.status, VehicleStatus::Dispatched);

    let returning = h
        .dispatch
        .update_vehicle_status(&h.cancel, vehicle.id, VehicleStatus::Returning)
        .await;
    assert!(returning.is_err());
    let freed = h
        .dispatch
        .update_vehicle_status(&h.cancel, vehicle.id, VehicleStatus::Maintenance)
        .await
        .unwrap();
    assert!(freed.current_distress_id.is_none());
}
