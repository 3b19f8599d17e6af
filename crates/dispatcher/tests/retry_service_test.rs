use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bulksend_core::config::RetryConfig;
use bulksend_core::errors::{DispatchError, SendError, SendErrorKind};
use bulksend_dispatcher::retry_service::{OnRetry, RetryPolicy};

#[test]
fn test_compute_backoff_sequence() {
    let policy = RetryPolicy::default();

    let delays: Vec<u64> = (1..=5)
        .map(|n| policy.compute_backoff(n).as_millis() as u64)
        .collect();
    assert_eq!(delays, vec![1000, 2000, 4000, 8000, 16000]);

    assert_eq!(policy.compute_backoff(6), Duration::from_millis(30_000));
    assert_eq!(policy.compute_backoff(10), Duration::from_millis(30_000));
    assert_eq!(policy.compute_backoff(20), Duration::from_millis(30_000));
    assert_eq!(policy.compute_backoff(200), Duration::from_millis(30_000));
    assert_eq!(policy.compute_backoff(0), Duration::from_millis(1000));
}

#[test]
fn test_should_retry_table() {
    let policy = RetryPolicy::default();
    let transient = SendError::network("connection reset");
    let permanent = SendError::invalid_recipient("not a number");

    assert!(policy.should_retry(&transient, 1));
    assert!(policy.should_retry(&transient, 3));
    assert!(!policy.should_retry(&transient, 5));
    assert!(!policy.should_retry(&transient, 6));
    assert!(!policy.should_retry(&permanent, 1));
}

#[test]
fn test_attempt_timeouts_by_operation_class() {
    let config = RetryConfig::default();
    assert_eq!(RetryPolicy::new(config.clone()).attempt_timeout(), Duration::from_secs(10));
    assert_eq!(RetryPolicy::startup(config).attempt_timeout(), Duration::from_secs(60));
}

#[tokio::test(start_paused = true)]
async fn test_execute_with_retry_recovers_from_transient_errors() {
    let policy = RetryPolicy::default();
    let calls = AtomicU32::new(0);
    let seen = Mutex::new(Vec::new());

    let hook: OnRetry<'_, SendError> = &|attempt: u32, _err: &SendError, delay: Duration| {
        seen.lock().unwrap().push((attempt, delay.as_millis() as u64));
    };

    let started = tokio::time::Instant::now();
    let result = policy
        .execute_with_retry(
            || {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                async move {
                    if n < 3 {
                        Err(SendError::unavailable("no signal"))
                    } else {
                        Ok(n)
                    }
                }
            },
            "test_send",
            Some(hook),
        )
        .await;

    assert_eq!(result.unwrap(), 3);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(*seen.lock().unwrap(), vec![(1, 1000), (2, 2000)]);
    assert!(started.elapsed() >= Duration::from_millis(3000));
}

#[tokio::test(start_paused = true)]
async fn test_permanent_error_is_not_retried() {
    let policy = RetryPolicy::default();
    let calls = AtomicU32::new(0);

    let result: Result<(), SendError> = policy
        .execute_with_retry(
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(SendError::permission_denied("SEND_SMS revoked")) }
            },
            "test_send",
            None,
        )
        .await;

    let err = result.unwrap_err();
    assert_eq!(err.kind, SendErrorKind::PermissionDenied);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_exhaustion_surfaces_last_underlying_error() {
    let policy = RetryPolicy::default();
    let calls = AtomicU32::new(0);

    let result: Result<(), SendError> = policy
        .execute_with_retry(
            || {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                async move { Err(SendError::network(format!("attempt {}", n))) }
            },
            "test_send",
            None,
        )
        .await;

    let err = result.unwrap_err();
    assert_eq!(err.kind, SendErrorKind::Network);
    assert_eq!(err.message, "attempt 5");
    assert_eq!(calls.load(Ordering::SeqCst), 5);
}

#[tokio::test(start_paused = true)]
async fn test_hung_attempt_counts_as_timeout() {
    let config = RetryConfig {
        max_attempts: 2,
        ..Default::default()
    };
    let policy = RetryPolicy::new(config);
    let calls = Arc::new(AtomicU32::new(0));

    let result: Result<(), SendError> = policy
        .execute_with_retry(
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(())
                }
            },
            "hung_send",
            None,
        )
        .await;

    let err = result.unwrap_err();
    assert_eq!(err.kind, SendErrorKind::Timeout);
    assert!(err.retriable);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn test_dispatch_errors_use_their_own_classification() {
    let policy = RetryPolicy::startup(RetryConfig::default());
    let calls = AtomicU32::new(0);

    let result: Result<(), DispatchError> = policy
        .execute_with_retry(
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(DispatchError::Storage("disk full".to_string())) }
            },
            "open_store",
            None,
        )
        .await;

    assert!(matches!(result, Err(DispatchError::Storage(_))));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}
