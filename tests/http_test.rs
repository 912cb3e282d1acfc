//! HTTP surface driven through `tower::ServiceExt::oneshot`.

mod common;

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode};
use common::{Event, MockFactory, orchestrator, users};
use serde_json::{Value as JsonValue, json};
use sql_gateway::auth::ApiKeys;
use sql_gateway::config::AppMode;
use sql_gateway::error::DbError;
use sql_gateway::models::Dialect;
use sql_gateway::transport::{AppState, router};
use std::sync::Arc;
use tower::ServiceExt;

const KEY: &str = "test-key";

fn app_with_keys(factory: &MockFactory, keys: Vec<String>) -> Router {
    let state = Arc::new(AppState::new(orchestrator(factory), AppMode::Dev));
    router(state, Arc::new(ApiKeys::new(keys)))
}

fn app(factory: &MockFactory) -> Router {
    app_with_keys(factory, vec![KEY.to_string()])
}

fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header("X-API-KEY", KEY)
        .body(Body::empty())
        .unwrap()
}

fn post(uri: &str, body: JsonValue) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("X-API-KEY", KEY)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn send(app: Router, request: Request<Body>) -> (StatusCode, JsonValue) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(JsonValue::Null);
    (status, body)
}

#[tokio::test]
async fn test_health_is_public() {
    let factory = MockFactory::new();
    let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
    let (status, body) = send(app(&factory), request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"status": "ok", "mode": "DEV"}));
}

#[tokio::test]
async fn test_missing_or_wrong_key_is_401() {
    let factory = MockFactory::new();
    let request = Request::builder()
        .uri("/mysql/sample")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(app(&factory), request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], "unauthorized");

    let request = Request::builder()
        .uri("/mysql/sample")
        .header("X-API-KEY", "wrong")
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(app(&factory), request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(factory.events().is_empty());
}

#[tokio::test]
async fn test_no_keys_configured_is_500() {
    let factory = MockFactory::new();
    let (status, _) = send(app_with_keys(&factory, vec![]), get("/mysql/sample")).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn test_sample_uses_dialect_probe() {
    let factory = MockFactory::new();
    factory.push_rows(vec![json!({"one": 1})]);
    let (status, body) = send(app(&factory), get("/oracle/sample?server=erp")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"server": "erp", "data": [{"one": 1}]}));
    assert_eq!(factory.statements(), vec!["SELECT 1 AS one FROM dual"]);
}

#[tokio::test]
async fn test_mixed_sample_sums_probes() {
    let factory = MockFactory::new();
    factory
        .push_rows(vec![json!({"mysql_one": 1})])
        .push_rows(vec![json!({"pg_two": 2})]);
    let (status, body) = send(app(&factory), get("/mixed/sample?pg_server=analytics")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["mysql_server"], "default");
    assert_eq!(body["postgres_server"], "analytics");
    assert_eq!(body["sum"], 3);
    assert_eq!(factory.count(&Event::Create(Dialect::MySql)), 1);
    assert_eq!(factory.count(&Event::Create(Dialect::Postgres)), 1);
}

#[tokio::test]
async fn test_unknown_dbtype_is_400() {
    let factory = MockFactory::new();
    let (status, body) = send(
        app(&factory),
        post("/sqlite/select", json!({"table": "t", "filter": {"id": 1}})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "validation_error");
}

#[tokio::test]
async fn test_select_with_alias_tag() {
    let factory = MockFactory::new();
    factory.push_rows(users());
    let (status, body) = send(
        app(&factory),
        post(
            "/postgresql/select?server=reporting",
            json!({"table": "users", "filter": {"status": "active"}, "fields": "id, username"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["server"], "reporting");
    assert_eq!(body["data"].as_array().map(Vec::len), Some(2));
    assert_eq!(
        factory.statements(),
        vec!["SELECT id, username FROM users WHERE status = %s"]
    );
}

#[tokio::test]
async fn test_record_not_found_and_ambiguous() {
    let factory = MockFactory::new();
    factory.push_rows(vec![]).push_rows(users());
    let body = json!({"table": "users", "filter": {"id": 1}});

    let (status, error) = send(app(&factory), post("/mysql/record", body.clone())).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(error["error"]["code"], "not_found");

    let (status, error) = send(app(&factory), post("/mysql/record", body)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error["error"]["code"], "ambiguous_result");
    assert!(error["error"]["suggestion"].is_string());
}

#[tokio::test]
async fn test_mutations_report_rows_affected() {
    let factory = MockFactory::new();
    factory.set_affected(Ok(3));

    let (status, body) = send(
        app(&factory),
        post(
            "/mssql/update",
            json!({"table": "users", "data": {"active": false}, "filter": {"team": 4}}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"server": "default", "rows_affected": 3}));

    let (status, _) = send(
        app(&factory),
        post("/mssql/delete", json!({"table": "users", "filter": {}})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_query_with_pagination() {
    let factory = MockFactory::new();
    factory
        .push_rows(vec![json!({"total": "3"})])
        .push_rows(vec![json!({"id": 3})]);
    let (status, body) = send(
        app(&factory),
        post(
            "/mysql/query",
            json!({"sql": "SELECT id FROM t", "page": 2, "page_size": 2}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body["pagination"],
        json!({
            "page": 2,
            "page_size": 2,
            "record_count": 1,
            "total_records": 3,
            "total_pages": 2,
            "has_more": false
        })
    );
}

#[tokio::test]
async fn test_error_statuses_by_category() {
    let cases = [
        (DbError::connection("refused", "retry"), StatusCode::BAD_GATEWAY),
        (
            DbError::query("syntax error", Some("42601".to_string()), "fix it"),
            StatusCode::BAD_REQUEST,
        ),
        (DbError::configuration("no host"), StatusCode::INTERNAL_SERVER_ERROR),
    ];
    for (err, expected) in cases {
        let factory = MockFactory::new();
        factory.push_fetch_error(err);
        let (status, body) = send(
            app(&factory),
            post("/postgres/query", json!({"sql": "SELECT 1"})),
        )
        .await;
        assert_eq!(status, expected);
        assert!(body["error"]["message"].is_string());
        assert_eq!(factory.count(&Event::Close), 1);
    }
}

#[tokio::test]
async fn test_malformed_body_is_400() {
    let factory = MockFactory::new();
    let request = Request::builder()
        .method("POST")
        .uri("/mysql/insert")
        .header("X-API-KEY", KEY)
        .header("content-type", "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let (status, body) = send(app(&factory), request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "validation_error");
}
