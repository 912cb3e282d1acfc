//! Count-then-window pagination for arbitrary SELECT statements.

use serde_json::Value as JsonValue;
use tracing::debug;

use crate::db::Adapter;
use crate::error::{DbError, DbResult};
use crate::models::{
    CompiledStatement, DEFAULT_PAGE_SIZE, Dialect, MAX_PAGE_SIZE, PageInfo, ResultSet, Row,
};
use crate::sql::lexer::{top_level_order_by, trim_statement};

/// A validated page window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: u32,
    pub page_size: u32,
}

impl PageRequest {
    pub fn new(page: u32, page_size: u32) -> DbResult<Self> {
        if page < 1 {
            return Err(DbError::validation("page must be >= 1"));
        }
        if page_size < 1 || page_size > MAX_PAGE_SIZE {
            return Err(DbError::validation(format!(
                "page_size must be between 1 and {}",
                MAX_PAGE_SIZE
            )));
        }
        Ok(Self { page, page_size })
    }

    /// Fill in defaults for whichever of the two is missing.
    pub fn from_options(page: Option<u32>, page_size: Option<u32>) -> DbResult<Self> {
        Self::new(page.unwrap_or(1), page_size.unwrap_or(DEFAULT_PAGE_SIZE))
    }

    pub fn offset(&self) -> u64 {
        u64::from(self.page - 1) * u64::from(self.page_size)
    }
}

/// Wrap `sql` in a row count query, dropping a top-level ORDER BY.
pub fn count_query(sql: &str, dialect: Dialect) -> String {
    let sql = trim_statement(sql);
    let inner = match top_level_order_by(sql, dialect) {
        Some(pos) => sql[..pos].trim_end(),
        None => sql,
    };
    match dialect {
        // Oracle rejects AS before a table alias
        Dialect::Oracle => format!("SELECT COUNT(*) AS total FROM ({}) subquery", inner),
        _ => format!("SELECT COUNT(*) AS total FROM ({}) AS subquery", inner),
    }
}

/// Name the count column comes back under.
pub fn count_column(dialect: Dialect) -> &'static str {
    match dialect {
        Dialect::Oracle => "TOTAL",
        _ => "total",
    }
}

/// Append the dialect's window clause to `sql`.
pub fn window_query(sql: &str, dialect: Dialect, request: PageRequest) -> String {
    let sql = trim_statement(sql);
    let offset = request.offset();
    let size = request.page_size;
    match dialect {
        Dialect::MySql | Dialect::Postgres => {
            format!("{} LIMIT {} OFFSET {}", sql, size, offset)
        }
        Dialect::Oracle => format!(
            "{} OFFSET {} ROWS FETCH NEXT {} ROWS ONLY",
            sql, offset, size
        ),
        Dialect::Mssql => {
            let order = if top_level_order_by(sql, dialect).is_some() {
                ""
            } else {
                " ORDER BY (SELECT NULL)"
            };
            format!(
                "{}{} OFFSET {} ROWS FETCH NEXT {} ROWS ONLY",
                sql, order, offset, size
            )
        }
    }
}

pub fn page_info(request: PageRequest, record_count: u64, total_records: u64) -> PageInfo {
    let page_size = u64::from(request.page_size);
    PageInfo {
        page: request.page,
        page_size: request.page_size,
        record_count,
        total_records,
        total_pages: total_records.div_ceil(page_size),
        has_more: record_count == page_size,
    }
}

/// Read the row count out of the count query's single row.
pub fn read_total(row: &Row, dialect: Dialect) -> DbResult<u64> {
    let column = count_column(dialect);
    let value = row
        .get(column)
        .or_else(|| {
            row.iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(column))
                .map(|(_, v)| v)
        })
        .ok_or_else(|| DbError::internal("Count query returned no total column"))?;

    let total = match value {
        JsonValue::Number(n) => n.as_u64().or_else(|| {
            n.as_f64()
                .filter(|f| f.fract() == 0.0 && *f >= 0.0)
                .map(|f| f as u64)
        }),
        JsonValue::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    };
    total.ok_or_else(|| DbError::internal(format!("Unexpected count value: {}", value)))
}

/// Run the count query, then the windowed query, on one adapter.
pub async fn paginate<A: Adapter>(
    adapter: &mut A,
    stmt: &CompiledStatement,
    request: PageRequest,
) -> DbResult<(ResultSet, PageInfo)> {
    let dialect = adapter.dialect();

    let count_stmt = stmt.with_sql(count_query(&stmt.sql, dialect));
    let counted = adapter.fetch_all(&count_stmt).await?;
    let total = match counted.first() {
        Some(row) => read_total(row, dialect)?,
        None => 0,
    };

    let page_stmt = stmt.with_sql(window_query(&stmt.sql, dialect, request));
    let rows = adapter.fetch_all(&page_stmt).await?;
    let info = page_info(request, rows.len() as u64, total);

    debug!(
        page = info.page,
        page_size = info.page_size,
        record_count = info.record_count,
        total_records = info.total_records,
        "Paginated query complete"
    );
    Ok((rows, info))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_page_request_validation() {
        assert!(PageRequest::new(0, 10).is_err());
        assert!(PageRequest::new(1, 0).is_err());
        assert!(PageRequest::new(1, 301).is_err());
        assert!(PageRequest::new(1, 300).is_ok());

        let defaults = PageRequest::from_options(Some(3), None).unwrap();
        assert_eq!(defaults.page_size, 100);
        assert_eq!(defaults.offset(), 200);
        assert_eq!(PageRequest::from_options(None, Some(25)).unwrap().page, 1);
    }

    #[test]
    fn test_count_query_strips_order_by() {
        assert_eq!(
            count_query("SELECT * FROM users ORDER BY id DESC;", Dialect::Postgres),
            "SELECT COUNT(*) AS total FROM (SELECT * FROM users) AS subquery"
        );
        assert_eq!(
            count_query("SELECT * FROM users ORDER BY id", Dialect::Oracle),
            "SELECT COUNT(*) AS total FROM (SELECT * FROM users) subquery"
        );
    }

    #[test]
    fn test_count_query_keeps_nested_order_by() {
        let sql = "SELECT * FROM (SELECT id FROM t ORDER BY id) x";
        assert_eq!(
            count_query(sql, Dialect::MySql),
            format!("SELECT COUNT(*) AS total FROM ({}) AS subquery", sql)
        );
    }

    #[test]
    fn test_window_queries() {
        let request = PageRequest::new(2, 50).unwrap();
        assert_eq!(
            window_query("SELECT * FROM t", Dialect::MySql, request),
            "SELECT * FROM t LIMIT 50 OFFSET 50"
        );
        assert_eq!(
            window_query("SELECT * FROM t ORDER BY id;", Dialect::Oracle, request),
            "SELECT * FROM t ORDER BY id OFFSET 50 ROWS FETCH NEXT 50 ROWS ONLY"
        );
        assert_eq!(
            window_query("SELECT * FROM t", Dialect::Mssql, request),
            "SELECT * FROM t ORDER BY (SELECT NULL) OFFSET 50 ROWS FETCH NEXT 50 ROWS ONLY"
        );
        assert_eq!(
            window_query("SELECT * FROM t ORDER BY id", Dialect::Mssql, request),
            "SELECT * FROM t ORDER BY id OFFSET 50 ROWS FETCH NEXT 50 ROWS ONLY"
        );
    }

    #[test]
    fn test_page_info_across_pages() {
        let pages: Vec<PageInfo> = [(1, 100), (2, 100), (3, 50)]
            .into_iter()
            .map(|(page, count)| page_info(PageRequest::new(page, 100).unwrap(), count, 250))
            .collect();
        assert!(pages.iter().all(|p| p.total_pages == 3));
        let more: Vec<bool> = pages.iter().map(|p| p.has_more).collect();
        assert_eq!(more, vec![true, true, false]);
    }

    #[test]
    fn test_page_info_empty() {
        let info = page_info(PageRequest::new(1, 10).unwrap(), 0, 0);
        assert_eq!(info.total_pages, 0);
        assert!(!info.has_more);
    }

    #[test]
    fn test_read_total_variants() {
        let row = |v: JsonValue| json!({ "total": v }).as_object().unwrap().clone();
        assert_eq!(read_total(&row(json!(250)), Dialect::MySql).unwrap(), 250);
        assert_eq!(read_total(&row(json!("250")), Dialect::MySql).unwrap(), 250);
        assert_eq!(read_total(&row(json!(250.0)), Dialect::MySql).unwrap(), 250);
        assert!(read_total(&row(json!("x")), Dialect::MySql).is_err());

        let oracle = json!({ "TOTAL": 7 }).as_object().unwrap().clone();
        assert_eq!(read_total(&oracle, Dialect::Oracle).unwrap(), 7);
    }

    struct Scripted {
        dialect: Dialect,
        total: u64,
        seen: Vec<String>,
    }

    impl Adapter for Scripted {
        fn dialect(&self) -> Dialect {
            self.dialect
        }
        async fn connect(&mut self) -> DbResult<()> {
            Ok(())
        }
        async fn fetch_all(&mut self, stmt: &CompiledStatement) -> DbResult<ResultSet> {
            self.seen.push(stmt.sql.clone());
            if stmt.sql.starts_with("SELECT COUNT(*)") {
                return Ok(vec![json!({"total": self.total}).as_object().unwrap().clone()]);
            }
            Ok(vec![json!({"id": 1}).as_object().unwrap().clone(); 2])
        }
        async fn execute(&mut self, _stmt: &CompiledStatement) -> DbResult<u64> {
            Ok(0)
        }
        async fn begin(&mut self) -> DbResult<()> {
            Ok(())
        }
        async fn commit(&mut self) -> DbResult<()> {
            Ok(())
        }
        async fn rollback(&mut self) -> DbResult<()> {
            Ok(())
        }
        async fn close(&mut self) {}
    }

    #[tokio::test]
    async fn test_paginate_runs_count_then_window() {
        let mut adapter = Scripted {
            dialect: Dialect::Postgres,
            total: 5,
            seen: Vec::new(),
        };
        let stmt = CompiledStatement::raw("SELECT id FROM t ORDER BY id");
        let (rows, info) = paginate(&mut adapter, &stmt, PageRequest::new(3, 2).unwrap())
            .await
            .unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(info.total_pages, 3);
        assert_eq!(
            adapter.seen,
            vec![
                "SELECT COUNT(*) AS total FROM (SELECT id FROM t) AS subquery".to_string(),
                "SELECT id FROM t ORDER BY id LIMIT 2 OFFSET 4".to_string(),
            ]
        );
    }
}
