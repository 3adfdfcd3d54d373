//! Escalation scenarios driven by the ticker against a manual clock

use chrono::TimeDelta;

use lifeline_core::{
    ContactId, DistressStatus, EscalationLevel, EscalationPath, ErrorKind, Notification, TierId,
};
use lifeline_escalation::{Decision, NewPath, NewTier};

use crate::test_utils::{north_of, scene, Harness};

async fn tier(h: &Harness, name: &str, budget: u32, contacts: Vec<ContactId>) -> TierId {
    h.escalation
        .create_tier(
            &h.cancel,
            NewTier {
                name: name.into(),
                level: EscalationLevel::High,
                response_budget_minutes: budget,
                contacts,
                next_tier_id: None,
            },
        )
        .await
        .unwrap()
        .id
}

async fn two_tier_path(h: &Harness) -> (EscalationPath, TierId, TierId) {
    let t1 = tier(h, "Midwives on call", 5, h.contacts(3)).await;
    let t2 = tier(h, "District obstetrician", 10, h.contacts(2)).await;
    let path = h
        .escalation
        .create_path(
            &h.cancel,
            NewPath {
                name: "Western Area maternal".into(),
                tier_ids: vec![t1, t2],
                facility_id: None,
                district: Some("Western Area".into()),
            },
        )
        .await
        .unwrap();
    (path, t1, t2)
}

fn escalated_tiers(h: &Harness) -> Vec<(TierId, usize)> {
    h.notes
        .all()
        .into_iter()
        .filter_map(|n| match n {
            Notification::Escalation { tier_id, contacts, .. } => Some((tier_id, contacts.len())),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn test_escalation_timeline() {
    let h = Harness::new();
    let (path, t1, t2) = two_tier_path(&h).await;
    let mother = h.subject(None);
    let event = h.report(mother).await;
    h.notes.clear();

    let found = h
        .escalation
        .find_path(&h.cancel, event.assigned_facility, Some("Western Area"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(found.id, path.id);

    let (run, first) = h.escalation.start(&h.cancel, event.id, path.id).await.unwrap();
    assert_eq!(first.id, t1);
    assert_eq!(escalated_tiers(&h), vec![(t1, 3)]);

    h.clock.advance(TimeDelta::minutes(5));
    let report = h.escalation.tick(&h.cancel).await.unwrap();
    assert_eq!(report.advanced, 1);
    assert_eq!(escalated_tiers(&h), vec![(t1, 3), (t2, 2)]);
    let current = h.escalation.get_run(&h.cancel, run.id).await.unwrap();
    assert_eq!(current.current_tier_index, 1);
    assert_eq!(current.reminder_attempts, 0);

    h.clock.advance(TimeDelta::minutes(10));
    h.escalation.tick(&h.cancel).await.unwrap();
    let finished = h.escalation.get_run(&h.cancel, run.id).await.unwrap();
    assert!(finished.done);
    assert!(!finished.acknowledged);

    h.clock.advance(TimeDelta::minutes(30));
    let report = h.escalation.tick(&h.cancel).await.unwrap();
    assert_eq!(report.checked, 0);
    assert_eq!(escalated_tiers(&h).len(), 2);
    assert!(h.escalation.active_run(&h.cancel, event.id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_reminders_before_promotion() {
    let h = Harness::new();
    let (path, t1, _) = two_tier_path(&h).await;
    let mother = h.subject(None);
    let event = h.report(mother).await;
    let (run, _) = h.escalation.start(&h.cancel, event.id, path.id).await.unwrap();
    h.notes.clear();

    // 5 minute budget, 3 reminders at 75 s spacing
    h.clock.advance(TimeDelta::seconds(60));
    assert_eq!(h.escalation.check(&h.cancel, run.id).await.unwrap(), Decision::Wait);
    h.clock.advance(TimeDelta::seconds(15));
    assert_eq!(
        h.escalation.check(&h.cancel, run.id).await.unwrap(),
        Decision::Remind { attempt: 1 }
    );
    assert_eq!(h.notes.count("reminder"), 1);

    h.escalation
        .acknowledge(&h.cancel, run.id, t1, None)
        .await
        .unwrap();
    h.clock.advance(TimeDelta::minutes(10));
    assert_eq!(h.escalation.check(&h.cancel, run.id).await.unwrap(), Decision::Exit);
    assert_eq!(h.notes.count("escalation"), 0);
    assert_eq!(h.notes.count("reminder"), 1);
}

#[tokio::test]
async fn test_acknowledge_requires_current_tier() {
    let h = Harness::new();
    let (path, t1, t2) = two_tier_path(&h).await;
    let mother = h.subject(None);
    let event = h.report(mother).await;
    let (run, _) = h.escalation.start(&h.cancel, event.id, path.id).await.unwrap();

    let err = h
        .escalation
        .acknowledge(&h.cancel, run.id, t2, None)
        .await
        .unwrap_err();
    assert!(err.is(ErrorKind::Validation));

    let responder = h.contacts(1)[0];
    let acked = h
        .escalation
        .acknowledge(&h.cancel, run.id, t1, Some(responder))
        .await
        .unwrap();
    assert!(acked.acknowledged);
    assert_eq!(acked.acknowledged_by, Some(responder));

    // a second acknowledgement answers the stored run
    let again = h
        .escalation
        .acknowledge(&h.cancel, run.id, t1, None)
        .await
        .unwrap();
    assert_eq!(again.acknowledged_by, Some(responder));
}

#[tokio::test]
async fn test_resolved_distress_ends_escalation() {
    let h = Harness::new();
    let (path, _, _) = two_tier_path(&h).await;
    h.facility("Connaught", north_of(scene(), 2.0));
    let mother = h.subject(None);
    let event = h.report(mother).await;
    assert!(event.assigned_facility.is_some());
    let at = north_of(scene(), 1.0);
    h.routes.script(at, TimeDelta::minutes(3));
    let vehicle = h
        .vehicle("MAMA-1", lifeline_core::VehicleKind::Obstetric, Some(at))
        .await;

    let (run, _) = h.escalation.start(&h.cancel, event.id, path.id).await.unwrap();
    h.dispatch.dispatch(&h.cancel, event.id, vehicle.id).await.unwrap();
    h.coordinator
        .set_status(&h.cancel, event.id, DistressStatus::Resolved)
        .await
        .unwrap();
    h.notes.clear();

    h.clock.advance(TimeDelta::minutes(5));
    h.escalation.tick(&h.cancel).await.unwrap();
    let run = h.escalation.get_run(&h.cancel, run.id).await.unwrap();
    assert!(run.done);
    assert_eq!(run.current_tier_index, 0);
    assert!(h.notes.all().is_empty());

    let err = h.escalation.start(&h.cancel, event.id, path.id).await.unwrap_err();
    assert!(err.is(ErrorKind::Validation));
}

#[tokio::test]
async fn test_escalate_next_on_last_tier() {
    let h = Harness::new();
    let (path, t1, t2) = two_tier_path(&h).await;
    let mother = h.subject(None);
    let event = h.report(mother).await;
    h.escalation.start(&h.cancel, event.id, path.id).await.unwrap();

    let next = h.escalation.escalate_next(&h.cancel, event.id, t1).await.unwrap();
    assert_eq!(next.id, t2);

    let err = h.escalation.escalate_next(&h.cancel, event.id, t2).await.unwrap_err();
    assert!(err.is(ErrorKind::Validation));
    assert!(h.escalation.active_run(&h.cancel, event.id).await.unwrap().is_none());
}
