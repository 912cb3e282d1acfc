//! HTTP routes.
//!
//! `/health` is public; every other route sits behind the API key middleware.
//! Path tags select the dialect, `?server=<name>` selects the profile.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router, middleware};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value as JsonValue, json};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::auth::{ApiKeys, api_key_middleware};
use crate::config::AppMode;
use crate::db::AdapterFactory;
use crate::error::{DbError, DbResult};
use crate::models::{
    DEFAULT_PROFILE_NAME, DeleteSpec, Dialect, InsertSpec, OperationDescriptor, RawQuerySpec,
    SelectSpec, UpdateSpec,
};
use crate::orchestrator::{Orchestrator, Outcome};

/// Shared, immutable request state.
pub struct AppState<F: AdapterFactory> {
    pub orchestrator: Orchestrator<F>,
    pub mode: AppMode,
}

impl<F: AdapterFactory> AppState<F> {
    pub fn new(orchestrator: Orchestrator<F>, mode: AppMode) -> Self {
        Self { orchestrator, mode }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ServerQuery {
    pub server: Option<String>,
}

impl ServerQuery {
    fn name(&self) -> Option<&str> {
        self.server.as_deref()
    }

    fn label(&self) -> &str {
        label(self.server.as_deref())
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct MixedQuery {
    pub mysql_server: Option<String>,
    pub pg_server: Option<String>,
}

type ApiResult = DbResult<Json<JsonValue>>;

/// Build the gateway router.
pub fn router<F: AdapterFactory>(state: Arc<AppState<F>>, keys: Arc<ApiKeys>) -> Router {
    let protected = Router::new()
        .route("/mixed/sample", get(mixed_sample::<F>))
        .route("/{dbtype}/sample", get(sample::<F>))
        .route("/{dbtype}/select", post(select::<F>))
        .route("/{dbtype}/record", post(record::<F>))
        .route("/{dbtype}/insert", post(insert::<F>))
        .route("/{dbtype}/update", post(update::<F>))
        .route("/{dbtype}/delete", post(delete::<F>))
        .route("/{dbtype}/query", post(query::<F>))
        .route_layer(middleware::from_fn_with_state(keys, api_key_middleware));

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health::<F>))
        .merge(protected)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health<F: AdapterFactory>(State(state): State<Arc<AppState<F>>>) -> Json<JsonValue> {
    Json(json!({ "status": "ok", "mode": state.mode.to_string() }))
}

async fn sample<F: AdapterFactory>(
    State(state): State<Arc<AppState<F>>>,
    Path(dbtype): Path<String>,
    Query(server): Query<ServerQuery>,
) -> ApiResult {
    let dialect: Dialect = dbtype.parse()?;
    let rows = state
        .orchestrator
        .run_sql(dialect, server.name(), dialect.probe_sql())
        .await?;
    Ok(Json(json!({ "server": server.label(), "data": rows })))
}

async fn mixed_sample<F: AdapterFactory>(
    State(state): State<Arc<AppState<F>>>,
    Query(query): Query<MixedQuery>,
) -> ApiResult {
    let mysql = state
        .orchestrator
        .run_sql(
            Dialect::MySql,
            query.mysql_server.as_deref(),
            "SELECT 1 AS mysql_one",
        )
        .await?;
    let postgres = state
        .orchestrator
        .run_sql(
            Dialect::Postgres,
            query.pg_server.as_deref(),
            "SELECT 2 AS pg_two",
        )
        .await?;

    let sum = match (
        mysql.first().and_then(|r| r.get("mysql_one")).and_then(JsonValue::as_i64),
        postgres.first().and_then(|r| r.get("pg_two")).and_then(JsonValue::as_i64),
    ) {
        (Some(m), Some(p)) => json!(m + p),
        _ => JsonValue::Null,
    };
    Ok(Json(json!({
        "mysql_server": label(query.mysql_server.as_deref()),
        "postgres_server": label(query.pg_server.as_deref()),
        "mysql": mysql,
        "postgres": postgres,
        "sum": sum,
    })))
}

async fn select<F: AdapterFactory>(
    State(state): State<Arc<AppState<F>>>,
    Path(dbtype): Path<String>,
    Query(server): Query<ServerQuery>,
    body: Result<Json<SelectSpec>, JsonRejection>,
) -> ApiResult {
    let dialect: Dialect = dbtype.parse()?;
    let spec = json_body(body)?;
    let outcome = state
        .orchestrator
        .execute(dialect, server.name(), OperationDescriptor::Select(spec))
        .await?;
    Ok(Json(respond(server.label(), outcome)))
}

async fn record<F: AdapterFactory>(
    State(state): State<Arc<AppState<F>>>,
    Path(dbtype): Path<String>,
    Query(server): Query<ServerQuery>,
    body: Result<Json<SelectSpec>, JsonRejection>,
) -> ApiResult {
    let dialect: Dialect = dbtype.parse()?;
    let spec = json_body(body)?;
    let row = state
        .orchestrator
        .fetch_record(dialect, server.name(), spec)
        .await?;
    Ok(Json(json!({ "server": server.label(), "data": row })))
}

async fn insert<F: AdapterFactory>(
    State(state): State<Arc<AppState<F>>>,
    Path(dbtype): Path<String>,
    Query(server): Query<ServerQuery>,
    body: Result<Json<InsertSpec>, JsonRejection>,
) -> ApiResult {
    let op = OperationDescriptor::Insert(json_body(body)?);
    run(&state, &dbtype, &server, op).await
}

async fn update<F: AdapterFactory>(
    State(state): State<Arc<AppState<F>>>,
    Path(dbtype): Path<String>,
    Query(server): Query<ServerQuery>,
    body: Result<Json<UpdateSpec>, JsonRejection>,
) -> ApiResult {
    let op = OperationDescriptor::Update(json_body(body)?);
    run(&state, &dbtype, &server, op).await
}

async fn delete<F: AdapterFactory>(
    State(state): State<Arc<AppState<F>>>,
    Path(dbtype): Path<String>,
    Query(server): Query<ServerQuery>,
    body: Result<Json<DeleteSpec>, JsonRejection>,
) -> ApiResult {
    let op = OperationDescriptor::Delete(json_body(body)?);
    run(&state, &dbtype, &server, op).await
}

async fn query<F: AdapterFactory>(
    State(state): State<Arc<AppState<F>>>,
    Path(dbtype): Path<String>,
    Query(server): Query<ServerQuery>,
    body: Result<Json<RawQuerySpec>, JsonRejection>,
) -> ApiResult {
    let op = OperationDescriptor::RawQuery(json_body(body)?);
    run(&state, &dbtype, &server, op).await
}

async fn run<F: AdapterFactory>(
    state: &AppState<F>,
    dbtype: &str,
    server: &ServerQuery,
    op: OperationDescriptor,
) -> ApiResult {
    let dialect: Dialect = dbtype.parse()?;
    let outcome = state.orchestrator.execute(dialect, server.name(), op).await?;
    Ok(Json(respond(server.label(), outcome)))
}

fn respond(server: &str, outcome: Outcome) -> JsonValue {
    match outcome {
        Outcome::Rows(rows) => json!({ "server": server, "data": rows }),
        Outcome::Page { rows, pagination } => {
            json!({ "server": server, "data": rows, "pagination": pagination })
        }
        Outcome::Affected(n) => json!({ "server": server, "rows_affected": n }),
    }
}

fn json_body<T: DeserializeOwned>(body: Result<Json<T>, JsonRejection>) -> DbResult<T> {
    body.map(|Json(value)| value)
        .map_err(|rejection| DbError::validation(rejection.body_text()))
}

fn label(server: Option<&str>) -> &str {
    server
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(DEFAULT_PROFILE_NAME)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PageInfo;

    #[test]
    fn test_label_defaults() {
        assert_eq!(label(None), "default");
        assert_eq!(label(Some(" ")), "default");
        assert_eq!(label(Some("reporting")), "reporting");
    }

    #[test]
    fn test_respond_shapes() {
        assert_eq!(
            respond("default", Outcome::Affected(1)),
            json!({ "server": "default", "rows_affected": 1 })
        );
        let page = respond(
            "a",
            Outcome::Page {
                rows: vec![],
                pagination: PageInfo {
                    page: 1,
                    page_size: 10,
                    record_count: 0,
                    total_records: 0,
                    total_pages: 0,
                    has_more: false,
                },
            },
        );
        assert_eq!(page["pagination"]["total_pages"], json!(0));
        assert_eq!(page["data"], json!([]));
    }
}
