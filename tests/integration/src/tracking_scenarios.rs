//! Tracking scenarios: ETA refresh threshold, arrival, traffic and sweep

use chrono::{TimeDelta, TimeZone, Utc};

use lifeline_core::{
    Clock, DistressEvent, DistressStatus, ErrorKind, Notification, TrackingUpdateKind, Vehicle,
    VehicleKind, VehicleStatus,
};
use lifeline_dispatch::RefreshOutcome;

use crate::test_utils::{north_of, scene, Harness};

async fn dispatched(h: &Harness, minutes: i64) -> (DistressEvent, Vehicle) {
    let mother = h.subject(None);
    let event = h.report(mother).await;
    let at = north_of(scene(), 5.0);
    h.routes.script(at, TimeDelta::minutes(minutes));
    let vehicle = h.vehicle("MAMA-1", VehicleKind::Obstetric, Some(at)).await;
    let event = h.dispatch.dispatch(&h.cancel, event.id, vehicle.id).await.unwrap();
    (event, vehicle)
}

fn delays(h: &Harness) -> Vec<i64> {
    h.notes
        .all()
        .into_iter()
        .filter_map(|n| match n {
            Notification::Delay { delay_minutes, .. } => Some(delay_minutes),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn test_eta_refresh_threshold() {
    let h = Harness::new();
    let (event, vehicle) = dispatched(&h, 6).await;
    let ten = Utc.with_ymd_and_hms(2026, 3, 1, 10, 0, 0).unwrap();
    assert_eq!(event.eta, Some(ten));

    // 10:04:30 stays within five minutes
    let closer = north_of(scene(), 4.0);
    h.routes.script(closer, TimeDelta::seconds(10 * 60 + 30));
    h.dispatch
        .update_vehicle_location(&h.cancel, vehicle.id, closer)
        .await
        .unwrap();
    let outcome = h.tracking.refresh_eta(&h.cancel, event.id).await.unwrap();
    assert_eq!(outcome, RefreshOutcome::Unchanged);
    let stored = h.coordinator.get(&h.cancel, event.id).await.unwrap();
    assert_eq!(stored.eta, Some(ten));
    assert_eq!(stored.version, event.version);
    assert!(delays(&h).is_empty());

    // 10:06:30 crosses it
    let stuck = north_of(scene(), 4.5);
    h.routes.script(stuck, TimeDelta::seconds(12 * 60 + 30));
    h.dispatch
        .update_vehicle_location(&h.cancel, vehicle.id, stuck)
        .await
        .unwrap();
    let outcome = h.tracking.refresh_eta(&h.cancel, event.id).await.unwrap();
    let later = ten + TimeDelta::seconds(6 * 60 + 30);
    assert_eq!(
        outcome,
        RefreshOutcome::Updated {
            previous: Some(ten),
            eta: later,
            delayed: true
        }
    );
    assert_eq!(h.coordinator.get(&h.cancel, event.id).await.unwrap().eta, Some(later));
    assert_eq!(delays(&h), vec![6]);
}

#[tokio::test]
async fn test_earlier_eta_is_stored_without_delay() {
    let h = Harness::new();
    let (event, vehicle) = dispatched(&h, 20).await;

    let close = north_of(scene(), 0.5);
    h.routes.script(close, TimeDelta::minutes(2));
    h.dispatch
        .update_vehicle_location(&h.cancel, vehicle.id, close)
        .await
        .unwrap();
    match h.tracking.refresh_eta(&h.cancel, event.id).await.unwrap() {
        RefreshOutcome::Updated { delayed, .. } => assert!(!delayed),
        other => panic!("unexpected {other:?}"),
    }
    assert!(delays(&h).is_empty());
}

#[tokio::test]
async fn test_arrival_is_idempotent() {
    let h = Harness::new();
    let (event, vehicle) = dispatched(&h, 6).await;

    h.clock.advance(TimeDelta::minutes(7));
    let first = h.tracking.record_arrival(&h.cancel, event.id).await.unwrap();
    let arrived_at = first.arrived_at.unwrap();
    assert_eq!(arrived_at, h.clock.now());
    assert_eq!(h.notes.count("arrival"), 1);

    let vehicle = h.dispatch.get_vehicle(&h.cancel, vehicle.id).await.unwrap();
    assert_eq!(vehicle.status, VehicleStatus::Arrived);
    assert_eq!(vehicle.current_distress_id, Some(event.id));

    h.clock.advance(TimeDelta::minutes(1));
    let second = h.tracking.record_arrival(&h.cancel, event.id).await.unwrap();
    assert_eq!(second.arrived_at, Some(arrived_at));
    assert_eq!(second.version, first.version);
    assert_eq!(h.notes.count("arrival"), 1);

    let updates = h.tracking.list_updates(&h.cancel, event.id).await.unwrap();
    assert!(updates.iter().any(|u| u.kind == TrackingUpdateKind::Arrived));
}

#[tokio::test]
async fn test_arrival_requires_dispatch() {
    let h = Harness::new();
    let mother = h.subject(None);
    let event = h.report(mother).await;
    let err = h.tracking.record_arrival(&h.cancel, event.id).await.unwrap_err();
    assert!(err.is(ErrorKind::Validation));
}

#[tokio::test]
async fn test_traffic_delay() {
    let h = Harness::new();
    let (event, _) = dispatched(&h, 6).await;
    let eta = event.eta.unwrap();

    let shifted = h.tracking.refresh_on_traffic(&h.cancel, event.id, 3).await.unwrap();
    assert_eq!(shifted.eta, Some(eta + TimeDelta::minutes(3)));
    assert!(delays(&h).is_empty());

    let shifted = h.tracking.refresh_on_traffic(&h.cancel, event.id, 12).await.unwrap();
    assert_eq!(shifted.eta, Some(eta + TimeDelta::minutes(15)));
    assert_eq!(delays(&h), vec![12]);

    let err = h.tracking.refresh_on_traffic(&h.cancel, event.id, -1).await.unwrap_err();
    assert!(err.is(ErrorKind::Validation));
}

#[tokio::test]
async fn test_get_eta_rounds_up() {
    let h = Harness::new();
    let (event, vehicle) = dispatched(&h, 6).await;

    h.clock.advance(TimeDelta::seconds(30));
    let view = h.tracking.get_eta(&h.cancel, event.id).await.unwrap();
    assert_eq!(view.vehicle_id, vehicle.id);
    // a 30 s slip stays inside the threshold
    assert_eq!(view.eta, event.eta.unwrap());
    assert_eq!(view.eta_minutes, 6);

    h.clock.advance(TimeDelta::minutes(10));
    h.routes.script(vehicle.last_known_location.unwrap(), TimeDelta::zero());
    let view = h.tracking.get_eta(&h.cancel, event.id).await.unwrap();
    assert_eq!(view.eta_minutes, 0);
}

#[tokio::test]
async fn test_get_eta_without_dispatch() {
    let h = Harness::new();
    let mother = h.subject(None);
    let event = h.report(mother).await;
    let err = h.tracking.get_eta(&h.cancel, event.id).await.unwrap_err();
    assert!(err.is(ErrorKind::Validation));

    let err = h
        .tracking
        .get_eta(&h.cancel, lifeline_core::DistressId::new())
        .await
        .unwrap_err();
    assert!(err.is(ErrorKind::NotFound));
}

#[tokio::test]
async fn test_sweep_refreshes_stale_events() {
    let h = Harness::new();
    let (event, _) = dispatched(&h, 6).await;

    assert_eq!(h.tracking.sweep(&h.cancel).await.unwrap(), 0);
    h.clock.advance(TimeDelta::seconds(31));
    assert_eq!(h.tracking.sweep(&h.cancel).await.unwrap(), 1);
    assert_eq!(h.tracking.sweep(&h.cancel).await.unwrap(), 0);

    h.coordinator
        .set_status(&h.cancel, event.id, DistressStatus::Cancelled)
        .await
        .unwrap();
    h.clock.advance(TimeDelta::seconds(31));
    assert_eq!(h.tracking.sweep(&h.cancel).await.unwrap(), 0);
}

#[tokio::test]
async fn test_record_update_validates_description() {
    let h = Harness::new();
    let (event, _) = dispatched(&h, 6).await;

    let update = h
        .tracking
        .record_update(&h.cancel, event.id, TrackingUpdateKind::Note, "crossing the river")
        .await
        .unwrap();
    assert_eq!(update.distress_id, event.id);

    let err = h
        .tracking
        .record_update(&h.cancel, event.id, TrackingUpdateKind::Note, "   ")
        .await
        .unwrap_err();
    assert!(err.is(ErrorKind::Validation));
    assert_eq!(h.tracking.list_updates(&h.cancel, event.id).await.unwrap().len(), 1);
}
