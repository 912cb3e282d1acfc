//! Per-request sequencing: resolve, compile, execute, close.
//!
//! Each call owns one adapter from construction to close. Validation happens
//! before an adapter exists, so a malformed request never touches a driver.
//! Mutations run inside an explicit transaction that is rolled back on any
//! failure.

use tracing::{Instrument, debug, error, info_span, warn};
use uuid::Uuid;

use crate::db::{Adapter, AdapterFactory, DriverFactory, ProfileSet};
use crate::error::{DbError, DbResult};
use crate::models::{
    CompiledStatement, DEFAULT_PROFILE_NAME, Dialect, OperationDescriptor, PageInfo, ResultSet,
    Row, SelectSpec,
};
use crate::sql::{PageRequest, compile, paginate};

/// Result of one executed operation.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Rows(ResultSet),
    Page {
        rows: ResultSet,
        pagination: PageInfo,
    },
    Affected(u64),
}

enum Plan {
    Fetch,
    Page(PageRequest),
    Mutate,
}

pub struct Orchestrator<F: AdapterFactory = DriverFactory> {
    profiles: ProfileSet,
    factory: F,
}

impl<F: AdapterFactory> Orchestrator<F> {
    pub fn new(profiles: ProfileSet, factory: F) -> Self {
        Self { profiles, factory }
    }

    pub fn profiles(&self) -> &ProfileSet {
        &self.profiles
    }

    /// Compile and run one operation against the selected profile.
    pub async fn execute(
        &self,
        dialect: Dialect,
        server: Option<&str>,
        op: OperationDescriptor,
    ) -> DbResult<Outcome> {
        let span = request_span(dialect, server, op.kind());
        async move {
            debug!("Resolving");
            let profile = self.profiles.resolve(dialect, server);
            let stmt = compile(dialect, &op)?;
            let plan = match &op {
                OperationDescriptor::RawQuery(spec) if spec.is_paginated() => {
                    Plan::Page(PageRequest::from_options(spec.page, spec.page_size)?)
                }
                _ if op.is_mutation() => Plan::Mutate,
                _ => Plan::Fetch,
            };

            debug!(sql = %stmt.sql, params = stmt.params.len(), "Executing");
            let mut adapter = self.factory.create(dialect, profile)?;
            let result = match plan {
                Plan::Fetch => adapter.fetch_all(&stmt).await.map(Outcome::Rows),
                Plan::Page(request) => paginate(&mut adapter, &stmt, request)
                    .await
                    .map(|(rows, pagination)| Outcome::Page { rows, pagination }),
                Plan::Mutate => mutate(&mut adapter, &stmt).await.map(Outcome::Affected),
            };
            finish(&mut adapter, result).await
        }
        .instrument(span)
        .await
    }

    /// Fetch exactly one row matching the filter.
    pub async fn fetch_record(
        &self,
        dialect: Dialect,
        server: Option<&str>,
        spec: SelectSpec,
    ) -> DbResult<Row> {
        let table = spec.table.clone();
        let rows = match self
            .execute(dialect, server, OperationDescriptor::Select(spec))
            .await?
        {
            Outcome::Rows(rows) => rows,
            other => {
                return Err(DbError::internal(format!(
                    "Unexpected outcome for record fetch: {:?}",
                    other
                )));
            }
        };
        single_row(rows, &table)
    }

    /// Run fixed SQL text without parameters.
    pub async fn run_sql(
        &self,
        dialect: Dialect,
        server: Option<&str>,
        sql: &str,
    ) -> DbResult<ResultSet> {
        let span = request_span(dialect, server, "sql");
        async move {
            debug!("Resolving");
            let profile = self.profiles.resolve(dialect, server);
            let stmt = CompiledStatement::raw(sql);

            debug!(sql = %stmt.sql, "Executing");
            let mut adapter = self.factory.create(dialect, profile)?;
            let result = adapter.fetch_all(&stmt).await;
            finish(&mut adapter, result).await
        }
        .instrument(span)
        .await
    }
}

fn request_span(dialect: Dialect, server: Option<&str>, operation: &'static str) -> tracing::Span {
    info_span!(
        "request",
        request_id = %Uuid::new_v4(),
        dialect = %dialect,
        server = server.unwrap_or(DEFAULT_PROFILE_NAME),
        operation,
    )
}

async fn mutate<A: Adapter>(adapter: &mut A, stmt: &CompiledStatement) -> DbResult<u64> {
    let result = async {
        adapter.begin().await?;
        let affected = adapter.execute(stmt).await?;
        debug!(rows_affected = affected, "Committing");
        adapter.commit().await?;
        Ok(affected)
    }
    .await;

    if let Err(e) = &result {
        debug!(error = %e, "Rolling back");
        if let Err(rollback_err) = adapter.rollback().await {
            warn!(error = %rollback_err, "Rollback failed");
        }
    }
    result
}

/// Close the adapter and pass the result through.
async fn finish<A: Adapter, T>(adapter: &mut A, result: DbResult<T>) -> DbResult<T> {
    adapter.close().await;
    match &result {
        Ok(_) => debug!("Closed"),
        Err(e) => error!(code = e.code(), error = %e, "Request failed"),
    }
    result
}

fn single_row(mut rows: ResultSet, table: &str) -> DbResult<Row> {
    match rows.len() {
        0 => Err(DbError::not_found(format!(
            "No record in '{}' matches the filter",
            table
        ))),
        1 => Ok(rows.remove(0)),
        n => Err(DbError::ambiguous_result(n)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(id: i64) -> Row {
        json!({ "id": id }).as_object().unwrap().clone()
    }

    #[test]
    fn test_single_row() {
        assert_eq!(single_row(vec![row(1)], "t").unwrap(), row(1));
        assert!(matches!(
            single_row(vec![], "t"),
            Err(DbError::NotFound { .. })
        ));
        assert!(matches!(
            single_row(vec![row(1), row(2)], "t"),
            Err(DbError::AmbiguousResult { count: 2 })
        ));
    }
}
