//! HTTP API integration tests
//!
//! Requests go through the full router with `tower::ServiceExt::oneshot`.

mod helpers;

use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use helpers::{hit, FakeCatalog, MemoryFileSystem, TestApp};
use http_body_util::BodyExt;
use paneltrack_common::events::OperationKind;
use paneltrack_ingest::models::{BatchScope, ItemStatus, JobKey, JobStatus};
use serde_json::{json, Value};
use std::path::PathBuf;
use tower::util::ServiceExt;

async fn send(app: &TestApp, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.router().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

async fn comics_batch(app: &TestApp) -> uuid::Uuid {
    app.insert_batch(BatchScope::RootFolders {
        paths: vec![PathBuf::from("/comics")],
    })
    .await
    .id
}

#[tokio::test]
async fn test_health_endpoint() {
    let app = TestApp::new(FakeCatalog::default(), MemoryFileSystem::new()).await;

    let (status, body) = send(&app, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["module"], "paneltrack-ingest");
    assert_eq!(body["external_catalog"], true);
    assert!(body["last_error"].is_null());
}

#[tokio::test]
async fn test_create_batch_runs_scan() {
    let fs = MemoryFileSystem::new();
    fs.add_dir("/comics");
    fs.add_comic("/comics/Saga 001 (2012).cbz");
    let app = TestApp::new(FakeCatalog::default(), fs).await;

    let (status, body) = send(
        &app,
        "POST",
        "/batches",
        Some(json!({"scope": {"type": "root_folders", "paths": ["/comics"]}})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["transfer_mode"], "link");
    let batch_id: uuid::Uuid = serde_json::from_value(body["id"].clone()).unwrap();

    app.join(batch_id, OperationKind::Scan).await;

    let (status, body) = send(&app, "GET", &format!("/batches/{}", batch_id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ready");
    assert_eq!(body["counters"]["scanned"], 1);

    let (status, body) = send(&app, "GET", "/batches", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["batches"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_create_batch_rejects_empty_roots() {
    let app = TestApp::new(FakeCatalog::default(), MemoryFileSystem::new()).await;

    let (status, body) = send(
        &app,
        "POST",
        "/batches",
        Some(json!({"scope": {"type": "root_folders", "paths": []}})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "BAD_REQUEST");
}

#[tokio::test]
async fn test_job_status_endpoints() {
    let app = TestApp::new(FakeCatalog::default(), MemoryFileSystem::new()).await;
    let batch_id = comics_batch(&app).await;

    let (status, body) = send(&app, "GET", &format!("/batches/{}/jobs/scan", batch_id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "none");
    assert_eq!(body["progress"]["total"], 0);

    let (status, _) = send(&app, "GET", &format!("/batches/{}/jobs/dance", batch_id), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let unknown = uuid::Uuid::new_v4();
    let (status, body) = send(&app, "GET", &format!("/batches/{}/jobs/scan", unknown), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "NOT_FOUND");

    // nothing to pause
    let (status, _) = send(
        &app,
        "POST",
        &format!("/batches/{}/jobs/match_external/pause", batch_id),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_process_endpoints() {
    let app = TestApp::new(FakeCatalog::default(), MemoryFileSystem::new()).await;
    let batch_id = comics_batch(&app).await;

    let (status, body) =
        send(&app, "GET", &format!("/batches/{}/process/preview", batch_id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total_files"], 0);

    let (status, body) = send(&app, "POST", &format!("/batches/{}/process", batch_id), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"]["message"].as_str().unwrap().contains("queued"));
}

#[tokio::test]
async fn test_scoring_settings_roundtrip() {
    let app = TestApp::new(FakeCatalog::default(), MemoryFileSystem::new()).await;

    let (status, body) = send(&app, "GET", "/settings/scoring", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["min_confidence"], 0.7);

    let (status, _) = send(
        &app,
        "PUT",
        "/settings/scoring",
        Some(json!({"min_confidence": 1.5})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        &app,
        "PUT",
        "/settings/scoring",
        Some(json!({"min_confidence": 0.8, "weight_publisher": 1.0})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (_, body) = send(&app, "GET", "/settings/scoring", None).await;
    assert_eq!(body["min_confidence"], 0.8);
    assert_eq!(body["weight_publisher"], 1.0);
    // unspecified fields fall back to defaults
    assert_eq!(body["max_issue_score"], 9.0);
}

#[tokio::test]
async fn test_item_list_filters_and_bulk_update() {
    let app = TestApp::new(
        FakeCatalog::new(vec![hit(1, "Saga", Some(2012), Some("1"))]),
        MemoryFileSystem::new(),
    )
    .await;
    let batch_id = comics_batch(&app).await;
    let saga = app
        .insert_item(batch_id, "/comics/Saga 001.cbz", "Saga", Some("1"), Some(2012))
        .await;
    let other = app
        .insert_item(batch_id, "/comics/Monstress 002.cbz", "Monstress", Some("2"), None)
        .await;

    let (status, body) = send(
        &app,
        "POST",
        &format!("/batches/{}/items/bulk", batch_id),
        Some(json!({"item_ids": [saga.id, other.id], "action": "match_external"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["attempted"], 2);

    let (status, body) = send(
        &app,
        "GET",
        &format!("/batches/{}/items?match=external", batch_id),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let items = body["items"].as_array().unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["id"], saga.id.to_string());
    assert_eq!(body["counts"]["total"], 2);

    let (_, body) = send(
        &app,
        "GET",
        &format!("/batches/{}/items?status=pending&q=monstress", batch_id),
        None,
    )
    .await;
    let items = body["items"].as_array().unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["id"], other.id.to_string());

    let (status, _) = send(
        &app,
        "GET",
        &format!("/batches/{}/items?status=archived", batch_id),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        &app,
        "POST",
        &format!("/batches/{}/items/bulk", batch_id),
        Some(json!({"item_ids": [saga.id], "action": "queue_for_import"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(app.item(saga.id).await.status, ItemStatus::Queued);
}

#[tokio::test]
async fn test_identify_and_manual_match() {
    let app = TestApp::new(
        FakeCatalog::new(vec![
            hit(1, "Saga", Some(2012), Some("1")),
            hit(2, "Saga Deluxe", Some(2014), None),
        ]),
        MemoryFileSystem::new(),
    )
    .await;
    let batch_id = comics_batch(&app).await;
    let saga = app
        .insert_item(batch_id, "/comics/Saga 001.cbz", "Saga", Some("1"), Some(2012))
        .await;

    let (status, body) = send(&app, "GET", &format!("/items/{}/identify", saga.id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["steps"].as_array().unwrap().len(), 4);
    assert_eq!(body["summary"]["external_match_found"], true);
    // diagnostic only
    assert!(app.item(saga.id).await.external_match.is_none());

    let (status, body) = send(
        &app,
        "POST",
        &format!("/items/{}/match", saga.id),
        Some(json!({"volume_id": 2})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["external_match"]["volume_id"], 2);
    assert_eq!(body["external_match"]["manual"], true);

    let (status, _) = send(
        &app,
        "POST",
        &format!("/items/{}/match", saga.id),
        Some(json!({"volume_id": 99})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(
        &app,
        "GET",
        &format!("/items/{}/identify", uuid::Uuid::new_v4()),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_delete_refused_while_job_active() {
    let app = TestApp::new(
        FakeCatalog::new(vec![hit(1, "Saga", None, Some("1"))]),
        MemoryFileSystem::new(),
    )
    .await;
    let batch_id = comics_batch(&app).await;
    let first = app
        .insert_item(batch_id, "/comics/Saga 001.cbz", "Saga", Some("1"), None)
        .await;
    let second = app
        .insert_item(batch_id, "/comics/Saga 002.cbz", "Saga", Some("2"), None)
        .await;

    let key = JobKey::new(batch_id, OperationKind::MatchExternal);
    app.catalog
        .pause_on_call(1, app.service.orchestrator().clone(), key);

    let (status, body) = send(
        &app,
        "POST",
        &format!("/batches/{}/match", batch_id),
        Some(json!({"item_ids": [first.id, second.id], "kind": "match_external"})),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["kind"], "match_external");

    app.wait_for(batch_id, OperationKind::MatchExternal, |r| r.status == JobStatus::Paused)
        .await;

    let (status, body) = send(&app, "DELETE", &format!("/batches/{}", batch_id), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "CONFLICT");

    let (status, _) = send(
        &app,
        "POST",
        &format!("/batches/{}/jobs/match_external/resume", batch_id),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    app.join(batch_id, OperationKind::MatchExternal).await;

    let (status, _) = send(&app, "DELETE", &format!("/batches/{}", batch_id), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = send(&app, "GET", &format!("/batches/{}", batch_id), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
