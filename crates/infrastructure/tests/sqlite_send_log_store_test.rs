use std::sync::Arc;

use chrono::{Duration, Utc};
use tempfile::TempDir;

use bulksend_core::config::DatabaseConfig;
use bulksend_core::errors::DispatchError;
use bulksend_core::models::{body_digest, SendLogRecord, SendStatus};
use bulksend_core::traits::SendLogStore;
use bulksend_infrastructure::DatabaseManager;

async fn file_database(dir: &TempDir) -> DatabaseManager {
    let path = dir.path().join("bulksend.db");
    let config = DatabaseConfig {
        url: format!("sqlite://{}", path.display()),
        max_connections: 4,
        ..Default::default()
    };
    let manager = DatabaseManager::new(&config).await.unwrap();
    manager.migrate().await.unwrap();
    manager
}

#[tokio::test]
async fn test_records_survive_reopen() {
    let dir = TempDir::new().unwrap();
    let now = Utc::now();

    let id = {
        let manager = file_database(&dir).await;
        let store = manager.send_log_store();
        let record = store
            .append(&SendLogRecord::pending("0700000001", body_digest("hello"), now))
            .await
            .unwrap();
        store.update_status(record.id, SendStatus::Sent).await.unwrap();
        manager.close().await;
        record.id
    };

    let manager = file_database(&dir).await;
    let store = manager.send_log_store();
    let record = store.get(id).await.unwrap().unwrap();
    assert_eq!(record.status, SendStatus::Sent);
    assert_eq!(record.phone, "0700000001");
    assert_eq!(record.body_hash, body_digest("hello"));
    manager.close().await;
}

#[tokio::test]
async fn test_concurrent_terminal_updates_only_one_wins() {
    let dir = TempDir::new().unwrap();
    let manager = file_database(&dir).await;
    let store = Arc::new(manager.send_log_store());

    let record = store
        .append(&SendLogRecord::pending(
            "0700000001",
            body_digest("hello"),
            Utc::now() - Duration::hours(3),
        ))
        .await
        .unwrap();

    // 控制器写入 FAILED 的同时对账服务写入 UNKNOWN
    let failed = {
        let store = store.clone();
        tokio::spawn(async move { store.update_status(record.id, SendStatus::Failed).await })
    };
    let unknown = {
        let store = store.clone();
        tokio::spawn(async move { store.update_status(record.id, SendStatus::Unknown).await })
    };
    let results = [failed.await.unwrap(), unknown.await.unwrap()];

    let succeeded = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(succeeded, 1);
    assert!(results
        .iter()
        .filter_map(|r| r.as_ref().err())
        .all(|e| matches!(e, DispatchError::InvalidStatusTransition { .. })));

    let status = store.get(record.id).await.unwrap().unwrap().status;
    assert!(status == SendStatus::Failed || status == SendStatus::Unknown);
    manager.close().await;
}

#[tokio::test]
async fn test_stale_query_pages_by_limit() {
    let dir = TempDir::new().unwrap();
    let manager = file_database(&dir).await;
    let store = manager.send_log_store();
    let now = Utc::now();

    for i in 0..5 {
        let record = store
            .append(&SendLogRecord::pending(
                format!("07000000{:02}", i),
                body_digest("hello"),
                now - Duration::hours(3) - Duration::minutes(i),
            ))
            .await
            .unwrap();
        store.update_status(record.id, SendStatus::Sent).await.unwrap();
    }

    let cutoff = now - Duration::hours(2);
    let first_page = store.query_stale(cutoff, 2).await.unwrap();
    assert_eq!(first_page.len(), 2);
    // 最旧的记录优先
    assert_eq!(first_page[0].phone, "0700000004");

    for record in &first_page {
        store.update_status(record.id, SendStatus::Unknown).await.unwrap();
    }
    let rest = store.query_stale(cutoff, 10).await.unwrap();
    assert_eq!(rest.len(), 3);
    assert!(rest.iter().all(|r| r.status == SendStatus::Sent));
    manager.close().await;
}
