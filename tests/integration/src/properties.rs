//! Property tests over random operation sequences
//!
//! Each case builds a fresh harness and drives it on a current-thread
//! runtime, then checks the stored records rather than the return values.

use chrono::TimeDelta;
use proptest::prelude::*;
use std::sync::Arc;

use lifeline_core::{
    Completion, DistressRepository, DistressStatus, MessageKind, MessageRepository,
    MessageStatus, NotificationCategory, Recipient, ScheduledMessage, VehicleKind,
    VehicleRepository, VehicleStatus,
};
use lifeline_store::MemoryStore;

use crate::test_utils::{north_of, scene, start_time, Harness};

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

#[derive(Debug, Clone)]
enum FleetOp {
    Report,
    Dispatch { event: usize },
    Status { status: VehicleStatus },
    Close { event: usize, cancel: bool },
}

fn vehicle_status() -> impl Strategy<Value = VehicleStatus> {
    prop_oneof![
        Just(VehicleStatus::Available),
        Just(VehicleStatus::Dispatched),
        Just(VehicleStatus::EnRoute),
        Just(VehicleStatus::Arrived),
        Just(VehicleStatus::Returning),
        Just(VehicleStatus::Maintenance),
    ]
}

fn fleet_op() -> impl Strategy<Value = FleetOp> {
    prop_oneof![
        Just(FleetOp::Report),
        (0usize..4).prop_map(|event| FleetOp::Dispatch { event }),
        vehicle_status().prop_map(|status| FleetOp::Status { status }),
        (0usize..4, any::<bool>()).prop_map(|(event, cancel)| FleetOp::Close { event, cancel }),
    ]
}

#[derive(Debug, Clone)]
enum MessageOp {
    Claim { worker: usize },
    Complete { worker: usize, sent: bool },
    Cancel,
}

fn message_op() -> impl Strategy<Value = MessageOp> {
    prop_oneof![
        (0usize..2).prop_map(|worker| MessageOp::Claim { worker }),
        (0usize..2, any::<bool>()).prop_map(|(worker, sent)| MessageOp::Complete { worker, sent }),
        Just(MessageOp::Cancel),
    ]
}

const WORKERS: [&str; 2] = ["worker-a", "worker-b"];

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn prop_fleet_records_stay_consistent(ops in prop::collection::vec(fleet_op(), 1..24)) {
        runtime().block_on(async {
            let h = Harness::new();
            h.facility("Ola During", north_of(scene(), 1.0));
            let mother = h.subject(None);
            let vehicle = h.vehicle("MAMA-1", VehicleKind::Obstetric, None).await;
            let mut events = Vec::new();

            for op in ops {
                // outcomes are ignored; only the stored state is checked
                match op {
                    FleetOp::Report => events.push(h.report(mother).await.id),
                    FleetOp::Dispatch { event } => {
                        if let Some(id) = events.get(event) {
                            let _ = h.dispatch.dispatch(&h.cancel, *id, vehicle.id).await;
                        }
                    }
                    FleetOp::Status { status } => {
                        let _ = h.dispatch.update_vehicle_status(&h.cancel, vehicle.id, status).await;
                    }
                    FleetOp::Close { event, cancel } => {
                        if let Some(id) = events.get(event) {
                            let status = if cancel { DistressStatus::Cancelled } else { DistressStatus::Resolved };
                            let _ = h.coordinator.set_status(&h.cancel, *id, status).await;
                        }
                    }
                }

                let stored = h.store.get_vehicle(vehicle.id).await.unwrap().unwrap();
                assert_eq!(
                    stored.status.is_engaged(),
                    stored.current_distress_id.is_some(),
                    "vehicle {:?} with distress {:?}",
                    stored.status,
                    stored.current_distress_id
                );
                for id in &events {
                    let event = h.store.get_distress(*id).await.unwrap().unwrap();
                    if event.status == DistressStatus::Dispatched {
                        assert!(event.assigned_vehicle.is_some());
                        assert!(event.eta.is_some());
                    }
                }
            }
        });
    }

    #[test]
    fn prop_terminal_messages_are_absorbing(ops in prop::collection::vec(message_op(), 1..16)) {
        runtime().block_on(async {
            let store = Arc::new(MemoryStore::new());
            let now = start_time();
            let message = ScheduledMessage::new(
                Recipient::Address("+23276000009".into()),
                MessageKind::Sms,
                "",
                NotificationCategory::HealthAlert,
                r#"{"body":"hello"}"#.into(),
                now + TimeDelta::minutes(1),
                now,
            );
            store.insert_message(&message).await.unwrap();
            let due = now + TimeDelta::minutes(2);

            let mut terminal: Option<MessageStatus> = None;
            for op in ops {
                match op {
                    MessageOp::Claim { worker } => {
                        let _ = store.claim_due(WORKERS[worker], due, 10).await;
                    }
                    MessageOp::Complete { worker, sent } => {
                        let completion = if sent { Completion::Sent } else { Completion::Failed("boom".into()) };
                        let _ = store.complete(message.id, WORKERS[worker], completion, due).await;
                    }
                    MessageOp::Cancel => {
                        let _ = store.cancel_pending(message.id, due).await;
                    }
                }

                let status = store.get_message(message.id).await.unwrap().unwrap().status;
                match terminal {
                    Some(fixed) => assert_eq!(status, fixed),
                    None if status.is_terminal() => terminal = Some(status),
                    None => {}
                }
            }
        });
    }

    #[test]
    fn prop_delay_iff_slip_exceeds_threshold(initial in 1i64..60, revised_secs in 0i64..7200) {
        let delayed = runtime().block_on(async {
            let h = Harness::new();
            let mother = h.subject(None);
            let event = h.report(mother).await;
            let first = north_of(scene(), 3.0);
            let second = north_of(scene(), 2.0);
            h.routes.script(first, TimeDelta::minutes(initial));
            h.routes.script(second, TimeDelta::seconds(revised_secs));
            let vehicle = h.vehicle("MAMA-1", VehicleKind::Advanced, Some(first)).await;
            h.dispatch.dispatch(&h.cancel, event.id, vehicle.id).await.unwrap();
            h.notes.clear();

            h.dispatch
                .update_vehicle_location(&h.cancel, vehicle.id, second)
                .await
                .unwrap();
            h.tracking.refresh_eta(&h.cancel, event.id).await.unwrap();
            h.notes.count("delay")
        });
        let slip = revised_secs - initial * 60;
        prop_assert_eq!(delayed, usize::from(slip > 5 * 60));
    }
}

