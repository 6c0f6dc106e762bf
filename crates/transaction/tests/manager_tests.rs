//! Transaction manager lifecycle tests against a scripted driver.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use request_engine_adapters::{IsolationLevel, Provider, Queryable};
use request_engine_errors::{DriverError, RequestError, TransactionError};
use request_engine_transaction::{TransactionManager, TransactionOptions, TxId};
use tests_common::TestDriver;

fn manager(driver: &TestDriver, max_concurrent: usize) -> TransactionManager {
    TransactionManager::new(Arc::new(driver.clone()), max_concurrent)
}

fn options(max_wait: Duration, timeout: Duration) -> TransactionOptions {
    TransactionOptions {
        isolation_level: None,
        max_wait,
        timeout,
    }
}

#[tokio::test]
async fn statements_run_on_the_transaction_connection() {
    let driver = TestDriver::new();
    driver.respond_with_rows("SELECT id FROM users", json!([{ "id": 1 }]));
    let manager = manager(&driver, 4);

    let id = manager
        .start(TransactionOptions::default())
        .await
        .unwrap();
    let handle = manager.get(id).await.unwrap();
    handle.query("SELECT id FROM users", vec![]).await.unwrap();
    handle.execute("UPDATE users SET x = 1", vec![]).await.unwrap();
    manager.commit(id).await.unwrap();

    let contexts: Vec<(String, String)> = driver
        .executed()
        .into_iter()
        .map(|s| (s.sql, s.context))
        .collect();
    similar_asserts::assert_eq!(
        contexts,
        vec![
            ("BEGIN".to_string(), "tx-1".to_string()),
            ("SELECT id FROM users".to_string(), "tx-1".to_string()),
            ("UPDATE users SET x = 1".to_string(), "tx-1".to_string()),
            ("COMMIT".to_string(), "tx-1".to_string()),
        ]
    );
    assert_eq!(driver.open_transaction_count(), 0);
}

#[tokio::test]
async fn isolation_level_is_applied_at_begin() {
    let driver = TestDriver::new();
    let manager = manager(&driver, 4);

    let id = manager
        .start(TransactionOptions {
            isolation_level: Some(IsolationLevel::RepeatableRead),
            ..TransactionOptions::default()
        })
        .await
        .unwrap();
    manager.rollback(id).await.unwrap();

    assert_eq!(
        driver.executed_sql(),
        vec!["BEGIN ISOLATION LEVEL REPEATABLE READ", "ROLLBACK"]
    );
}

#[tokio::test]
async fn unsupported_isolation_fails_before_any_connection() {
    let driver = TestDriver::new();
    let manager = manager(&driver, 4);

    let err = manager
        .start(TransactionOptions {
            isolation_level: Some(IsolationLevel::Snapshot),
            ..TransactionOptions::default()
        })
        .await
        .unwrap_err();

    assert!(matches!(err, RequestError::UnsupportedOperation(_)));
    assert!(driver.executed().is_empty());
    assert_eq!(manager.running_count().await, 0);

    // SQL Server does support snapshot isolation.
    let driver = TestDriver::new().with_provider(Provider::SqlServer);
    let manager = TransactionManager::new(Arc::new(driver.clone()), 4);
    let id = manager
        .start(TransactionOptions {
            isolation_level: Some(IsolationLevel::Snapshot),
            ..TransactionOptions::default()
        })
        .await
        .unwrap();
    manager.rollback(id).await.unwrap();
}

#[tokio::test]
async fn unknown_ids_are_not_found() {
    let driver = TestDriver::new();
    let manager = manager(&driver, 4);

    let err = manager.get(TxId::new()).await.unwrap_err();
    assert!(matches!(
        err,
        RequestError::Transaction(TransactionError::NotFound { .. })
    ));
}

#[tokio::test]
async fn closing_twice_reports_already_closed_with_final_status() {
    let driver = TestDriver::new();
    let manager = manager(&driver, 4);

    let id = manager
        .start(TransactionOptions::default())
        .await
        .unwrap();
    manager.commit(id).await.unwrap();

    let err = manager.commit(id).await.unwrap_err();
    assert!(matches!(
        err,
        RequestError::Transaction(TransactionError::AlreadyClosed { ref status }) if status == "committed"
    ));
    let err = manager.get(id).await.unwrap_err();
    assert!(matches!(
        err,
        RequestError::Transaction(TransactionError::AlreadyClosed { .. })
    ));
}

#[tokio::test(start_paused = true)]
async fn watchdog_rolls_back_expired_transactions() {
    let driver = TestDriver::new();
    let manager = manager(&driver, 4);

    let id = manager
        .start(options(Duration::from_millis(500), Duration::from_millis(100)))
        .await
        .unwrap();

    // Past the deadline the watchdog has fired.
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert!(driver.executed_sql().contains(&"ROLLBACK".to_string()));
    assert_eq!(driver.open_transaction_count(), 0);
    assert_eq!(manager.running_count().await, 0);

    // A late commit reports the timeout, not a missing transaction.
    let err = manager.commit(id).await.unwrap_err();
    assert!(matches!(
        err,
        RequestError::Transaction(TransactionError::AlreadyClosed { ref status }) if status == "timed_out"
    ));
}

#[tokio::test(start_paused = true)]
async fn a_commit_losing_to_the_watchdog_sees_the_timeout() {
    let driver = TestDriver::new();
    let manager = manager(&driver, 4);

    let id = manager
        .start(options(Duration::from_millis(500), Duration::from_millis(100)))
        .await
        .unwrap();

    // The commit arrives from another task just after expiry; it must see
    // the timed-out closure, never a missing transaction.
    let racer = manager.clone();
    let commit = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(150)).await;
        racer.commit(id).await
    });

    let err = commit.await.unwrap().unwrap_err();
    assert!(matches!(
        err,
        RequestError::Transaction(TransactionError::AlreadyClosed { ref status }) if status == "timed_out"
    ));
    assert!(driver.executed_sql().contains(&"ROLLBACK".to_string()));
}

#[tokio::test(start_paused = true)]
async fn a_clean_commit_disarms_the_watchdog() {
    let driver = TestDriver::new();
    let manager = manager(&driver, 4);

    let id = manager
        .start(options(Duration::from_millis(500), Duration::from_millis(100)))
        .await
        .unwrap();
    manager.commit(id).await.unwrap();

    tokio::time::sleep(Duration::from_millis(200)).await;

    let executed = driver.executed_sql();
    assert!(executed.contains(&"COMMIT".to_string()));
    assert!(!executed.contains(&"ROLLBACK".to_string()));
}

#[tokio::test(start_paused = true)]
async fn starts_beyond_the_limit_fail_busy_after_max_wait() {
    let driver = TestDriver::new();
    let manager = manager(&driver, 1);

    let first = manager
        .start(TransactionOptions::default())
        .await
        .unwrap();

    let err = manager
        .start(options(Duration::from_millis(50), Duration::from_secs(5)))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        RequestError::Transaction(TransactionError::Busy { max_wait_ms: 50 })
    ));

    // Closing the first start frees the slot.
    manager.commit(first).await.unwrap();
    let second = manager
        .start(options(Duration::from_millis(50), Duration::from_secs(5)))
        .await
        .unwrap();
    manager.rollback(second).await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn a_waiting_start_proceeds_once_a_slot_frees() {
    let driver = TestDriver::new();
    let manager = manager(&driver, 1);

    let first = manager
        .start(TransactionOptions::default())
        .await
        .unwrap();

    let closer = manager.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        closer.commit(first).await.unwrap();
    });

    let second = manager
        .start(options(Duration::from_millis(500), Duration::from_secs(5)))
        .await
        .unwrap();
    manager.rollback(second).await.unwrap();
    assert_eq!(driver.open_transaction_count(), 0);
}

#[tokio::test]
async fn a_failed_begin_releases_the_slot() {
    let driver = TestDriver::new();
    let manager = manager(&driver, 1);
    driver.fail_next_begin(DriverError::connection_closed("connection refused"));

    let err = manager
        .start(TransactionOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, RequestError::Unknown { .. }));
    assert_eq!(manager.running_count().await, 0);

    // The single slot is usable again.
    let id = manager
        .start(TransactionOptions::default())
        .await
        .unwrap();
    manager.rollback(id).await.unwrap();
}

#[tokio::test]
async fn cancel_all_rolls_back_everything_running() {
    let driver = TestDriver::new();
    let manager = manager(&driver, 4);

    let first = manager
        .start(TransactionOptions::default())
        .await
        .unwrap();
    let second = manager
        .start(TransactionOptions::default())
        .await
        .unwrap();

    manager.cancel_all().await;

    assert_eq!(driver.open_transaction_count(), 0);
    assert_eq!(manager.running_count().await, 0);
    for id in [first, second] {
        let err = manager.get(id).await.unwrap_err();
        assert!(matches!(
            err,
            RequestError::Transaction(TransactionError::AlreadyClosed { ref status }) if status == "rolled_back"
        ));
    }
}

#[tokio::test]
async fn a_released_handle_refuses_further_statements() {
    let driver = TestDriver::new();
    let manager = manager(&driver, 4);

    let id = manager
        .start(TransactionOptions::default())
        .await
        .unwrap();
    let handle = manager.get(id).await.unwrap();
    manager.commit(id).await.unwrap();

    let err = handle.query("SELECT 1", vec![]).await.unwrap_err();
    assert!(err.is_infrastructure());
}
