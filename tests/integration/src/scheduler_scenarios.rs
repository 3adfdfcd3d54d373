//! Scheduler scenarios: competing workers, quiet hours and cancellation

use chrono::{TimeDelta, TimeZone, Utc};
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use lifeline_core::config::SchedulerConfig;
use lifeline_core::{
    CancellationToken, Clock, ErrorKind, ManualClock, MessageKind, MessageRepository, MessageStatus,
    PreferenceRepository, Recipient, UserId,
};
use lifeline_notify::{
    DriverRegistry, NotificationScheduler, PreferenceService, PreferencesPatch, ScheduleRequest,
    MAX_SMS_CHARS,
};
use lifeline_store::{MemoryStore, SqliteStore};

use crate::test_utils::{init_test_logging, start_time, RecordingDriver, TempDb};

fn worker(
    messages: Arc<dyn MessageRepository>,
    prefs: Arc<dyn PreferenceRepository>,
    clock: Arc<ManualClock>,
    driver: Arc<RecordingDriver>,
    worker_id: &str,
) -> NotificationScheduler {
    let mut drivers = DriverRegistry::new();
    drivers.register(driver);
    let config = SchedulerConfig {
        tick_secs: 1,
        batch_size: 10,
        ..SchedulerConfig::default()
    };
    let preferences = Arc::new(PreferenceService::new(prefs, clock.clone()));
    NotificationScheduler::new(messages, preferences, drivers, clock, &config).with_worker_id(worker_id)
}

fn sms(recipient: Recipient, body: &str, when: chrono::DateTime<Utc>) -> ScheduleRequest {
    ScheduleRequest {
        kind: MessageKind::Sms,
        recipient,
        payload: json!({ "body": body }),
        channel: "maternal".into(),
        when,
    }
}

async fn drain(scheduler: &NotificationScheduler, cancel: &CancellationToken) -> usize {
    let mut sent = 0;
    loop {
        let report = scheduler.process_batch(cancel).await.unwrap();
        if report.claimed == 0 {
            return sent;
        }
        assert_eq!(report.claimed, report.sent);
        sent += report.sent;
    }
}

async fn race_two_workers(a: Arc<dyn MessageRepository>, b: Arc<dyn MessageRepository>, prefs: Arc<dyn PreferenceRepository>) {
    let clock = Arc::new(ManualClock::new(start_time()));
    let driver = Arc::new(RecordingDriver::new(MessageKind::Sms));
    let cancel = CancellationToken::new();
    let first = worker(a.clone(), prefs.clone(), clock.clone(), driver.clone(), "worker-a");
    let second = worker(b, prefs, clock.clone(), driver.clone(), "worker-b");

    let mut ids = Vec::new();
    for i in 0..100 {
        let recipient = Recipient::Address(format!("+23276{i:06}"));
        let due = clock.now() + TimeDelta::seconds(30 + i);
        ids.push(first.schedule(&cancel, sms(recipient, "Clinic visit tomorrow", due)).await.unwrap().id);
    }
    clock.advance(TimeDelta::minutes(5));

    let (sent_a, sent_b) = tokio::join!(drain(&first, &cancel), drain(&second, &cancel));
    assert_eq!(sent_a + sent_b, 100);

    let delivered = driver.sent();
    assert_eq!(delivered.len(), 100);
    let unique: HashSet<_> = delivered.iter().copied().collect();
    assert_eq!(unique.len(), 100);

    for id in ids {
        let message = a.get_message(id).await.unwrap().unwrap();
        assert_eq!(message.status, MessageStatus::Sent);
        assert!(matches!(message.claimed_by.as_deref(), Some("worker-a") | Some("worker-b")));
        assert!(message.sent_at.is_some());
    }
    assert_eq!(first.metrics().sent + second.metrics().sent, 100);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_workers_share_memory_store() {
    init_test_logging();
    let store = Arc::new(MemoryStore::new());
    race_two_workers(store.clone(), store.clone(), store).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_workers_share_sqlite_file() {
    init_test_logging();
    let db = TempDb::new();
    let a = Arc::new(SqliteStore::open(&db.0).unwrap());
    let b = Arc::new(SqliteStore::open(&db.0).unwrap());
    race_two_workers(a.clone(), b, a).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_worker_loops_on_two_nodes_deliver_once() {
    init_test_logging();
    let db = TempDb::new();
    let a = Arc::new(SqliteStore::open(&db.0).unwrap());
    let b = Arc::new(SqliteStore::open(&db.0).unwrap());
    let clock = Arc::new(ManualClock::new(start_time()));
    let driver = Arc::new(RecordingDriver::new(MessageKind::Sms));
    let cancel = CancellationToken::new();
    let first = Arc::new(worker(a.clone(), a, clock.clone(), driver.clone(), "node-a"));
    let second = Arc::new(worker(b.clone(), b, clock.clone(), driver.clone(), "node-b"));

    for i in 0..30 {
        let recipient = Recipient::Address(format!("+23277{i:06}"));
        let due = clock.now() + TimeDelta::seconds(10);
        first.schedule(&cancel, sms(recipient, "Antenatal check", due)).await.unwrap();
    }
    clock.advance(TimeDelta::minutes(1));

    let loops: Vec<_> = [first.clone(), second.clone()]
        .into_iter()
        .map(|scheduler| {
            let cancel = cancel.clone();
            tokio::spawn(async move { scheduler.run_worker(cancel).await })
        })
        .collect();
    let drained = tokio::time::timeout(Duration::from_secs(10), async {
        while driver.sent().len() < 30 {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;
    cancel.cancel();
    for handle in loops {
        handle.await.unwrap().unwrap();
    }

    assert!(drained.is_ok(), "only {} of 30 delivered", driver.sent().len());
    let unique: HashSet<_> = driver.sent().into_iter().collect();
    assert_eq!(unique.len(), 30);
    assert_eq!(driver.sent().len(), 30);
    assert_eq!(first.metrics().claimed + second.metrics().claimed, 30);
}

#[tokio::test]
async fn test_quiet_hours_suppress_reminders_not_emergencies() {
    init_test_logging();
    let store = Arc::new(MemoryStore::new());
    let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2026, 3, 1, 22, 50, 0).unwrap()));
    let driver = Arc::new(RecordingDriver::new(MessageKind::Sms));
    let scheduler = worker(store.clone(), store.clone(), clock.clone(), driver.clone(), "worker-q");
    let cancel = CancellationToken::new();

    let mother = UserId::new();
    let prefs = PreferenceService::new(store.clone(), clock.clone());
    prefs
        .update(
            &cancel,
            mother,
            &PreferencesPatch {
                quiet_hours_enabled: Some(true),
                quiet_start: Some("22:00".into()),
                quiet_end: Some("07:00".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let at = Utc.with_ymd_and_hms(2026, 3, 1, 23, 30, 0).unwrap();
    let reminder = scheduler
        .schedule(
            &cancel,
            ScheduleRequest {
                kind: MessageKind::Sms,
                recipient: Recipient::User(mother),
                payload: json!({ "body": "Antenatal visit at 9", "category": "visit_reminder" }),
                channel: String::new(),
                when: at,
            },
        )
        .await
        .unwrap();
    let emergency = scheduler
        .schedule(
            &cancel,
            ScheduleRequest {
                kind: MessageKind::Sms,
                recipient: Recipient::User(mother),
                payload: json!({ "body": "Ambulance on the way", "category": "emergency" }),
                channel: String::new(),
                when: at,
            },
        )
        .await
        .unwrap();

    clock.set(at);
    let report = scheduler.process_batch(&cancel).await.unwrap();
    assert_eq!(report.claimed, 2);
    assert_eq!(report.sent, 1);
    assert_eq!(report.suppressed, 1);

    let blocked = scheduler.get(&cancel, reminder.id).await.unwrap();
    assert_eq!(blocked.status, MessageStatus::Failed);
    assert_eq!(blocked.last_error.as_deref(), Some("suppressed"));
    assert_eq!(driver.sent(), vec![emergency.id]);

    let listed = scheduler.list_for_user(&cancel, mother).await.unwrap();
    assert_eq!(listed.len(), 2);
}

#[tokio::test]
async fn test_cancel_rules() {
    init_test_logging();
    let store = Arc::new(MemoryStore::new());
    let clock = Arc::new(ManualClock::new(start_time()));
    let driver = Arc::new(RecordingDriver::new(MessageKind::Sms));
    let scheduler = worker(store.clone(), store.clone(), clock.clone(), driver.clone(), "worker-c");
    let cancel = CancellationToken::new();
    let when = clock.now() + TimeDelta::minutes(10);

    let withdrawn = scheduler
        .schedule(&cancel, sms(Recipient::Address("+23276000001".into()), "see you", when))
        .await
        .unwrap();
    let delivered = scheduler
        .schedule(&cancel, sms(Recipient::Address("+23276000002".into()), "see you", when))
        .await
        .unwrap();

    scheduler.cancel(&cancel, withdrawn.id).await.unwrap();
    assert_eq!(
        scheduler.get(&cancel, withdrawn.id).await.unwrap().status,
        MessageStatus::Cancelled
    );
    let err = scheduler.cancel(&cancel, withdrawn.id).await.unwrap_err();
    assert!(err.is(ErrorKind::Validation));

    clock.advance(TimeDelta::minutes(10));
    let report = scheduler.process_batch(&cancel).await.unwrap();
    assert_eq!(report.claimed, 1);
    assert_eq!(driver.sent(), vec![delivered.id]);

    let err = scheduler.cancel(&cancel, delivered.id).await.unwrap_err();
    assert!(err.is(ErrorKind::Validation));
    let err = scheduler
        .cancel(&cancel, lifeline_core::MessageId::new())
        .await
        .unwrap_err();
    assert!(err.is(ErrorKind::NotFound));
}

#[tokio::test]
async fn test_schedule_validation() {
    init_test_logging();
    let store = Arc::new(MemoryStore::new());
    let clock = Arc::new(ManualClock::new(start_time()));
    let driver = Arc::new(RecordingDriver::new(MessageKind::Sms));
    let scheduler = worker(store.clone(), store, clock.clone(), driver, "worker-v");
    let cancel = CancellationToken::new();
    let later = clock.now() + TimeDelta::minutes(1);
    let to = || Recipient::Address("+23276000003".into());

    let err = scheduler
        .schedule(&cancel, sms(to(), "late", clock.now()))
        .await
        .unwrap_err();
    assert!(err.is(ErrorKind::Validation));

    let long = "x".repeat(MAX_SMS_CHARS + 1);
    let err = scheduler.schedule(&cancel, sms(to(), &long, later)).await.unwrap_err();
    assert!(err.is(ErrorKind::Validation));

    let err = scheduler
        .schedule(
            &cancel,
            ScheduleRequest {
                kind: MessageKind::Push,
                recipient: to(),
                payload: json!({ "body": "no title" }),
                channel: String::new(),
                when: later,
            },
        )
        .await
        .unwrap_err();
    assert!(err.is(ErrorKind::Validation));

    let err = scheduler
        .schedule(&cancel, sms(Recipient::Address("  ".into()), "hi", later))
        .await
        .unwrap_err();
    assert!(err.is(ErrorKind::Validation));
}
