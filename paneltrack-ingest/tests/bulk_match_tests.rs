//! Bulk Operation Executor and background match jobs

mod helpers;

use helpers::{hit, FakeCatalog, MemoryFileSystem, TestApp};
use paneltrack_common::events::OperationKind;
use paneltrack_common::Error;
use paneltrack_ingest::models::{
    BatchScope, BatchStatus, ImportBatch, ItemStatus, JobKey, JobProgress, JobStatus,
};
use paneltrack_ingest::services::{BulkAction, BulkResponse};
use std::path::PathBuf;
use std::time::Duration;
use uuid::Uuid;

const NAMES: [&str; 6] = ["Alpha", "Bravo", "Charlie", "Delta", "Echo", "Foxtrot"];

async fn comics_batch(app: &TestApp) -> ImportBatch {
    app.insert_batch(BatchScope::RootFolders {
        paths: vec![PathBuf::from("/comics")],
    })
    .await
}

async fn insert_titles(app: &TestApp, batch_id: Uuid, names: &[String]) -> Vec<Uuid> {
    let mut ids = Vec::new();
    for name in names {
        let source = format!("/comics/{} 001.cbz", name);
        ids.push(app.insert_item(batch_id, &source, name, Some("1"), None).await.id);
    }
    ids
}

fn catalog_for_names() -> FakeCatalog {
    FakeCatalog::new(
        NAMES
            .iter()
            .enumerate()
            .map(|(i, name)| hit(i as i64 + 1, name, None, Some("1")))
            .collect(),
    )
}

#[tokio::test]
async fn test_fifty_item_match_pauses_and_resumes_without_rework() {
    let app = TestApp::new(FakeCatalog::default(), MemoryFileSystem::new()).await;
    let batch = comics_batch(&app).await;
    let names: Vec<String> = (1..=50).map(|i| format!("Title {:02}", i)).collect();
    let ids = insert_titles(&app, batch.id, &names).await;

    let key = JobKey::new(batch.id, OperationKind::MatchExternal);
    app.catalog
        .pause_on_call(20, app.service.orchestrator().clone(), key);

    let response = app
        .service
        .bulk_update(batch.id, ids.clone(), BulkAction::MatchExternal)
        .await
        .unwrap();
    assert!(matches!(response, BulkResponse::Job(_)));

    let paused = app
        .wait_for(batch.id, OperationKind::MatchExternal, |r| r.status == JobStatus::Paused)
        .await;
    assert_eq!(paused.progress, JobProgress { current: 20, total: 50 });
    assert_eq!(app.catalog.calls(), 20);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(app.catalog.calls(), 20);

    // a second job on the same key is refused and leaves the paused one alone
    let err = app
        .service
        .start_bulk_match(batch.id, ids, OperationKind::MatchExternal)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Conflict(_)));
    let unchanged = app.service.batch_status(batch.id, OperationKind::MatchExternal).await.unwrap();
    assert_eq!(unchanged.status, JobStatus::Paused);
    assert_eq!(unchanged.progress, paused.progress);

    app.service.resume(batch.id, OperationKind::MatchExternal).await.unwrap();
    app.join(batch.id, OperationKind::MatchExternal).await;

    assert_eq!(app.catalog.calls(), 50);
    assert_eq!(app.catalog.max_calls_per_series(), 1);
    assert_eq!(app.catalog.calls_for("Title 01"), 1);
    assert_eq!(app.catalog.calls_for("Title 50"), 1);

    let done = app.service.batch_status(batch.id, OperationKind::MatchExternal).await.unwrap();
    assert_eq!(done.status, JobStatus::None);
    assert_eq!(app.batch(batch.id).await.status, BatchStatus::Ready);
}

#[tokio::test]
async fn test_bulk_match_isolates_failures_in_any_order() {
    let names: Vec<String> = NAMES.iter().map(|n| n.to_string()).collect();

    for reverse in [false, true] {
        let catalog = catalog_for_names()
            .failing_for("Bravo")
            .failing_for("Echo");
        let app = TestApp::new(catalog, MemoryFileSystem::new()).await;
        let batch = comics_batch(&app).await;
        let mut ids = insert_titles(&app, batch.id, &names).await;
        if reverse {
            ids.reverse();
        }

        let response = app
            .service
            .bulk_update(batch.id, ids, BulkAction::MatchExternal)
            .await
            .unwrap();
        let BulkResponse::Completed(outcome) = response else {
            panic!("six items stay under the async threshold");
        };
        assert_eq!((outcome.attempted, outcome.succeeded, outcome.failed), (6, 4, 2));

        for item in app.items(batch.id).await {
            let series = item.metadata.series_name.clone().unwrap();
            if series == "Bravo" || series == "Echo" {
                assert!(item.external_match.is_none());
                assert!(item.error.is_some(), "{} should carry its error", series);
            } else {
                assert!(item.external_match.is_some(), "{} should match", series);
                assert!(item.error.is_none());
            }
        }
        assert_eq!(app.batch(batch.id).await.counters.errors, 2);
    }
}

#[tokio::test]
async fn test_queue_for_import_requires_match() {
    let app = TestApp::new(catalog_for_names(), MemoryFileSystem::new()).await;
    let batch = comics_batch(&app).await;
    let names: Vec<String> = NAMES.iter().map(|n| n.to_string()).collect();
    let ids = insert_titles(&app, batch.id, &names).await;

    // match only the first four
    app.service
        .bulk_update(batch.id, ids[..4].to_vec(), BulkAction::MatchExternal)
        .await
        .unwrap();

    let response = app
        .service
        .bulk_update(batch.id, ids.clone(), BulkAction::QueueForImport)
        .await
        .unwrap();
    assert_eq!(
        response,
        BulkResponse::Completed(paneltrack_ingest::services::BulkOutcome {
            attempted: 6,
            succeeded: 4,
            failed: 2,
        })
    );

    for (i, id) in ids.iter().enumerate() {
        let expected = if i < 4 { ItemStatus::Queued } else { ItemStatus::Pending };
        assert_eq!(app.item(*id).await.status, expected);
    }
    assert_eq!(app.batch(batch.id).await.counters.approved, 4);
}

#[tokio::test]
async fn test_reset_match_clears_cache_and_requeues_search() {
    let app = TestApp::new(catalog_for_names(), MemoryFileSystem::new()).await;
    let batch = comics_batch(&app).await;
    let ids = insert_titles(&app, batch.id, &["Alpha".to_string()]).await;

    app.service
        .bulk_update(batch.id, ids.clone(), BulkAction::MatchExternal)
        .await
        .unwrap();
    app.service
        .bulk_update(batch.id, ids.clone(), BulkAction::MatchExternal)
        .await
        .unwrap();
    // second pass answered from the cached response
    assert_eq!(app.catalog.calls_for("Alpha"), 1);

    app.service
        .bulk_update(batch.id, ids.clone(), BulkAction::ResetMatch)
        .await
        .unwrap();
    let reset = app.item(ids[0]).await;
    assert!(reset.external_match.is_none());
    assert!(reset.search_cache.is_none());

    app.service
        .bulk_update(batch.id, ids, BulkAction::MatchExternal)
        .await
        .unwrap();
    assert_eq!(app.catalog.calls_for("Alpha"), 2);
}

#[tokio::test]
async fn test_persistent_throttling_fails_job() {
    let catalog = catalog_for_names()
        .throttled_for("Alpha")
        .throttled_for("Bravo")
        .throttled_for("Charlie")
        .throttled_for("Delta");
    let app = TestApp::new(catalog, MemoryFileSystem::new()).await;
    let batch = comics_batch(&app).await;
    let names: Vec<String> = NAMES.iter().map(|n| n.to_string()).collect();
    let ids = insert_titles(&app, batch.id, &names).await;

    app.service
        .start_bulk_match(batch.id, ids, OperationKind::MatchExternal)
        .await
        .unwrap();
    let failed = app
        .wait_for(batch.id, OperationKind::MatchExternal, |r| r.status == JobStatus::Failed)
        .await;

    assert_eq!(failed.progress.current, 3);
    assert!(failed.last_error.unwrap().contains("throttling"));
    assert_eq!(app.catalog.calls_for("Delta"), 0);
    assert_eq!(app.batch(batch.id).await.status, BatchStatus::Failed);
}

#[tokio::test]
async fn test_bulk_update_rejects_empty_and_processed_status() {
    let app = TestApp::new(FakeCatalog::default(), MemoryFileSystem::new()).await;
    let batch = comics_batch(&app).await;

    let err = app
        .service
        .bulk_update(batch.id, Vec::new(), BulkAction::Skip)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));

    let ids = insert_titles(&app, batch.id, &["Alpha".to_string()]).await;
    let err = app
        .service
        .bulk_update(
            batch.id,
            ids,
            BulkAction::SetStatus {
                status: ItemStatus::Processed,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));
}
