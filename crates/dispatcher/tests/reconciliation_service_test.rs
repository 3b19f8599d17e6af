use std::sync::Arc;
use std::time::Duration;

use chrono::Duration as ChronoDuration;

use bulksend_core::config::ReconciliationConfig;
use bulksend_core::models::SendStatus;
use bulksend_core::traits::{Clock, ManualClock, SendLogStore};
use bulksend_dispatcher::controller::DispatchActivity;
use bulksend_dispatcher::reconciliation_service::{
    ReconciliationScheduler, ReconciliationSweeper, SweepOutcome,
};
use bulksend_testing_utils::{MockSendLogStore, SendLogRecordBuilder, TestEnv};

const TWO_HOURS: Duration = Duration::from_secs(2 * 60 * 60);

fn sweeper(store: &MockSendLogStore, clock: &ManualClock) -> ReconciliationSweeper {
    ReconciliationSweeper::new(Arc::new(store.clone()), ReconciliationConfig::default())
        .with_clock(Arc::new(clock.clone()))
}

#[tokio::test]
async fn test_stale_sent_record_becomes_unknown() {
    let clock = ManualClock::default();
    let now = clock.now();
    let store = MockSendLogStore::with_records(vec![
        SendLogRecordBuilder::new()
            .with_id(1)
            .sent()
            .aged(now, ChronoDuration::hours(3))
            .build(),
        SendLogRecordBuilder::new()
            .with_id(2)
            .sent()
            .aged(now, ChronoDuration::minutes(30))
            .build(),
    ]);

    let report = sweeper(&store, &clock).run_reconciliation(TWO_HOURS).await;

    assert_eq!(report.outcome, SweepOutcome::Completed);
    assert_eq!(report.reconciled, 1);
    assert_eq!(report.failed, 0);
    assert_eq!(store.get(1).await.unwrap().unwrap().status, SendStatus::Unknown);
    assert_eq!(store.get(2).await.unwrap().unwrap().status, SendStatus::Sent);
}

#[tokio::test]
async fn test_stale_pending_record_is_resolved_and_terminal_records_untouched() {
    let clock = ManualClock::default();
    let now = clock.now();
    let store = MockSendLogStore::with_records(vec![
        SendLogRecordBuilder::new()
            .with_id(1)
            .aged(now, ChronoDuration::hours(5))
            .build(),
        SendLogRecordBuilder::new()
            .with_id(2)
            .failed()
            .aged(now, ChronoDuration::hours(5))
            .build(),
        SendLogRecordBuilder::new()
            .with_id(3)
            .delivered()
            .aged(now, ChronoDuration::hours(5))
            .build(),
    ]);

    let report = sweeper(&store, &clock).run_once().await;

    assert_eq!(report.reconciled, 1);
    assert_eq!(
        store.statuses(),
        vec![SendStatus::Unknown, SendStatus::Failed, SendStatus::Delivered]
    );

    // 再次对账没有可处理的记录
    let report = sweeper(&store, &clock).run_once().await;
    assert_eq!(report.scanned, 0);
    assert_eq!(report.reconciled, 0);
}

#[tokio::test]
async fn test_clock_drives_staleness() {
    let clock = ManualClock::default();
    let now = clock.now();
    let store = MockSendLogStore::with_records(vec![SendLogRecordBuilder::new()
        .with_id(1)
        .sent()
        .with_timestamp(now)
        .build()]);
    let sweeper = sweeper(&store, &clock);

    assert_eq!(sweeper.run_reconciliation(TWO_HOURS).await.reconciled, 0);

    clock.advance(ChronoDuration::hours(2) + ChronoDuration::seconds(1));
    assert_eq!(sweeper.run_reconciliation(TWO_HOURS).await.reconciled, 1);
}

#[tokio::test]
async fn test_pages_through_all_stale_records() {
    let clock = ManualClock::default();
    let now = clock.now();
    let records = (1..=7)
        .map(|id| {
            SendLogRecordBuilder::new()
                .with_id(id)
                .sent()
                .aged(now, ChronoDuration::hours(3) + ChronoDuration::minutes(id))
                .build()
        })
        .collect();
    let store = MockSendLogStore::with_records(records);

    let config = ReconciliationConfig {
        batch_limit: 3,
        ..Default::default()
    };
    let sweeper = ReconciliationSweeper::new(Arc::new(store.clone()), config)
        .with_clock(Arc::new(clock.clone()));

    let report = sweeper.run_once().await;
    assert_eq!(report.reconciled, 7);
    assert_eq!(report.scanned, 7);
    assert!(store
        .statuses()
        .iter()
        .all(|status| *status == SendStatus::Unknown));
}

#[tokio::test]
async fn test_defers_while_dispatch_is_active() {
    let clock = ManualClock::default();
    let now = clock.now();
    let store = MockSendLogStore::with_records(vec![SendLogRecordBuilder::new()
        .with_id(1)
        .sent()
        .aged(now, ChronoDuration::hours(3))
        .build()]);

    let activity = DispatchActivity::new();
    let sweeper = sweeper(&store, &clock).with_dispatch_activity(activity.clone());

    let guard = activity.try_begin().unwrap();
    let report = sweeper.run_once().await;
    assert_eq!(report.outcome, SweepOutcome::DispatchActive);
    assert_eq!(store.statuses(), vec![SendStatus::Sent]);

    drop(guard);
    let report = sweeper.run_once().await;
    assert_eq!(report.outcome, SweepOutcome::Completed);
    assert_eq!(store.statuses(), vec![SendStatus::Unknown]);
}

#[tokio::test]
async fn test_shutdown_interrupts_sweep() {
    let clock = ManualClock::default();
    let now = clock.now();
    let store = MockSendLogStore::with_records(vec![SendLogRecordBuilder::new()
        .with_id(1)
        .sent()
        .aged(now, ChronoDuration::hours(3))
        .build()]);
    let sweeper = sweeper(&store, &clock);

    sweeper.shutdown_token().cancel();
    let report = sweeper.run_once().await;

    assert_eq!(report.outcome, SweepOutcome::Interrupted);
    assert_eq!(report.reconciled, 0);
    assert_eq!(store.statuses(), vec![SendStatus::Sent]);
    assert!(!sweeper.is_running());
}

#[tokio::test]
async fn test_update_failures_are_logged_not_raised() {
    let clock = ManualClock::default();
    let now = clock.now();
    let store = MockSendLogStore::with_records(vec![SendLogRecordBuilder::new()
        .with_id(1)
        .sent()
        .aged(now, ChronoDuration::hours(3))
        .build()]);
    store.set_fail_writes(true);

    let report = sweeper(&store, &clock).run_once().await;
    assert_eq!(report.outcome, SweepOutcome::Completed);
    assert_eq!(report.reconciled, 0);
    assert_eq!(report.failed, 1);
}

#[tokio::test]
async fn test_failed_update_is_counted_once_across_pages() {
    let clock = ManualClock::default();
    let now = clock.now();
    let records = (1..=4)
        .map(|id| {
            SendLogRecordBuilder::new()
                .with_id(id)
                .sent()
                .aged(now, ChronoDuration::hours(5) - ChronoDuration::minutes(id))
                .build()
        })
        .collect();
    let store = MockSendLogStore::with_records(records);
    // 最早的记录每页都会重新出现
    store.fail_updates_for(1);

    let config = ReconciliationConfig {
        batch_limit: 2,
        ..Default::default()
    };
    let sweeper = ReconciliationSweeper::new(Arc::new(store.clone()), config)
        .with_clock(Arc::new(clock.clone()));

    let report = sweeper.run_once().await;
    assert_eq!(report.outcome, SweepOutcome::Completed);
    assert_eq!(report.reconciled, 3);
    assert_eq!(report.failed, 1);
    assert_eq!(report.scanned, 4);
    assert_eq!(
        store.statuses(),
        vec![
            SendStatus::Sent,
            SendStatus::Unknown,
            SendStatus::Unknown,
            SendStatus::Unknown
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_scheduler_runs_immediately_and_stops() {
    let clock = ManualClock::default();
    let now = clock.now();
    let store = MockSendLogStore::with_records(vec![SendLogRecordBuilder::new()
        .with_id(1)
        .sent()
        .aged(now, ChronoDuration::hours(3))
        .build()]);
    let sweeper = Arc::new(sweeper(&store, &clock));

    let mut scheduler = ReconciliationScheduler::new(sweeper);
    scheduler.start();
    assert!(scheduler.is_started());

    let reconciled = TestEnv::wait_for(
        || {
            let store = store.clone();
            async move { store.statuses() == vec![SendStatus::Unknown] }
        },
        Duration::from_secs(1),
    )
    .await;
    assert!(reconciled);

    tokio::time::timeout(Duration::from_secs(1), scheduler.stop())
        .await
        .expect("scheduler should stop promptly");
    assert!(!scheduler.is_started());
}

#[tokio::test]
async fn test_disabled_scheduler_does_not_start() {
    let store = MockSendLogStore::new();
    let config = ReconciliationConfig {
        enabled: false,
        ..Default::default()
    };
    let sweeper = Arc::new(ReconciliationSweeper::new(Arc::new(store), config));

    let mut scheduler = ReconciliationScheduler::new(sweeper);
    scheduler.start();
    assert!(!scheduler.is_started());
    scheduler.stop().await;
}
