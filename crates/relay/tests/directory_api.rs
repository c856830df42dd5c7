use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    http::{Method, Request, StatusCode},
    response::Response,
    Router,
};
use diagram_sync_common::edit::TaggedEdit;
use diagram_sync_common::key::DocumentKey;
use diagram_sync_relay::{
    agent::EditAgent,
    auth::jwt::JwtAccessTokenService,
    build_router,
    group::GroupBus,
    store::DocumentStore,
    sync::{KeyPolicy, SyncController},
    AppState,
};
use serde_json::{json, Value};
use tower::ServiceExt;

struct TestApp {
    router: Router,
    controller: Arc<SyncController>,
}

fn test_app() -> TestApp {
    let controller = Arc::new(SyncController::new(
        DocumentStore::memory(),
        Arc::new(GroupBus::new()),
        KeyPolicy::Lazy,
    ));
    let jwt = Arc::new(
        JwtAccessTokenService::new("diagram_sync_test_secret_that_is_long_enough")
            .expect("test jwt service should initialize"),
    );
    let state = AppState {
        controller: Arc::clone(&controller),
        agent: Arc::new(EditAgent::Disabled),
        jwt,
        ws_base_url: Arc::from("ws://relay.test"),
    };
    TestApp { router: build_router(state, None), controller }
}

async fn send(app: &TestApp, method: Method, uri: &str, body: Option<Value>) -> Response {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .expect("json request should build"),
        None => builder.body(Body::empty()).expect("empty request should build"),
    };
    app.router.clone().oneshot(request).await.expect("request should return a response")
}

async fn body_json(response: Response) -> Value {
    let body = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("response body should be readable");
    serde_json::from_slice(&body).expect("response body should be valid json")
}

async fn create(app: &TestApp, name: &str) -> Value {
    let response = send(app, Method::POST, "/v1/diagrams", Some(json!({ "name": name }))).await;
    assert_eq!(response.status(), StatusCode::CREATED);
    body_json(response).await
}

#[tokio::test]
async fn create_returns_empty_diagram_with_ws_url() {
    let app = test_app();

    let created = create(&app, "  Zoo classes ").await;

    let id = created["id"].as_str().expect("id should be a string");
    assert_eq!(created["name"], "Zoo classes");
    assert_eq!(created["version"], 0);
    assert_eq!(created["snapshot"], json!({ "nodes": {}, "links": {} }));
    assert_eq!(created["wsUrl"], format!("ws://relay.test/ws/diagram/{id}/"));
}

#[tokio::test]
async fn create_rejects_blank_and_duplicate_names() {
    let app = test_app();
    create(&app, "Zoo").await;

    let blank = send(&app, Method::POST, "/v1/diagrams", Some(json!({ "name": "   " }))).await;
    assert_eq!(blank.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(blank).await["error"]["code"], "VALIDATION_FAILED");

    let duplicate = send(&app, Method::POST, "/v1/diagrams", Some(json!({ "name": "Zoo" }))).await;
    assert_eq!(duplicate.status(), StatusCode::CONFLICT);
    assert_eq!(body_json(duplicate).await["error"]["code"], "NAME_CONFLICT");
}

#[tokio::test]
async fn list_orders_by_most_recent_change() {
    let app = test_app();
    let first = create(&app, "first").await;
    create(&app, "second").await;

    let first_id = first["id"].as_str().expect("id should be a string");
    let rename = send(
        &app,
        Method::PATCH,
        &format!("/v1/diagrams/{first_id}"),
        Some(json!({ "name": "first renamed" })),
    )
    .await;
    assert_eq!(rename.status(), StatusCode::OK);

    let response = send(&app, Method::GET, "/v1/diagrams", None).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    let names: Vec<&str> = body["data"]
        .as_array()
        .expect("data should be an array")
        .iter()
        .filter_map(|diagram| diagram["name"].as_str())
        .collect();

    assert_eq!(names, vec!["first renamed", "second"]);
    assert!(body["data"][0]["wsUrl"].as_str().is_some());
}

#[tokio::test]
async fn update_ignores_snapshot_and_version_fields() {
    let app = test_app();
    let created = create(&app, "board").await;
    let id = created["id"].as_str().expect("id should be a string");

    let response = send(
        &app,
        Method::PUT,
        &format!("/v1/diagrams/{id}"),
        Some(json!({
            "name": "board v2",
            "version": 99,
            "snapshot": { "nodes": { "x": { "id": "x" } }, "links": {} }
        })),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    let updated = body_json(response).await;
    assert_eq!(updated["name"], "board v2");
    assert_eq!(updated["version"], 0);
    assert_eq!(updated["snapshot"]["nodes"], json!({}));

    let missing_name =
        send(&app, Method::PUT, &format!("/v1/diagrams/{id}"), Some(json!({}))).await;
    assert_eq!(missing_name.status(), StatusCode::BAD_REQUEST);

    let patch_without_name =
        send(&app, Method::PATCH, &format!("/v1/diagrams/{id}"), Some(json!({}))).await;
    assert_eq!(patch_without_name.status(), StatusCode::OK);
    assert_eq!(body_json(patch_without_name).await["name"], "board v2");
}

#[tokio::test]
async fn ops_log_pages_through_committed_edits() {
    let app = test_app();
    let key = DocumentKey::parse("paged").expect("key should parse");
    for version in 0..3 {
        let edit = TaggedEdit::parse(json!({ "type": "node.add", "id": format!("n{version}") }))
            .expect("edit should parse");
        app.controller
            .apply_edit(&key, version, edit, None)
            .await
            .expect("edit should commit");
    }
    let diagram = app
        .controller
        .store()
        .find_by_name("paged")
        .await
        .expect("lookup should succeed")
        .expect("diagram should exist");

    let first_page = body_json(
        send(&app, Method::GET, &format!("/v1/diagrams/{}/ops?limit=2", diagram.id), None).await,
    )
    .await;
    let seqs: Vec<i64> = first_page["data"]
        .as_array()
        .expect("data should be an array")
        .iter()
        .filter_map(|entry| entry["seq"].as_i64())
        .collect();
    assert_eq!(seqs, vec![1, 2]);
    assert_eq!(first_page["next_after"], 2);
    assert_eq!(first_page["data"][0]["op_type"], "node.add");

    let second_page = body_json(
        send(&app, Method::GET, &format!("/v1/diagrams/{}/ops?after=2&limit=2", diagram.id), None)
            .await,
    )
    .await;
    assert_eq!(second_page["data"][0]["seq"], 3);
    assert_eq!(second_page["next_after"], Value::Null);
}

#[tokio::test]
async fn delete_removes_diagram_and_log() {
    let app = test_app();
    let created = create(&app, "doomed").await;
    let id = created["id"].as_str().expect("id should be a string");

    let deleted = send(&app, Method::DELETE, &format!("/v1/diagrams/{id}"), None).await;
    assert_eq!(deleted.status(), StatusCode::NO_CONTENT);

    let get = send(&app, Method::GET, &format!("/v1/diagrams/{id}"), None).await;
    assert_eq!(get.status(), StatusCode::NOT_FOUND);

    let ops = send(&app, Method::GET, &format!("/v1/diagrams/{id}/ops"), None).await;
    assert_eq!(ops.status(), StatusCode::NOT_FOUND);

    let again = send(&app, Method::DELETE, &format!("/v1/diagrams/{id}"), None).await;
    assert_eq!(again.status(), StatusCode::NOT_FOUND);
}
