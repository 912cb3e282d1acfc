//! Statement builder behavior across dialects.

use serde_json::json;
use sql_gateway::error::DbError;
use sql_gateway::models::{
    DeleteSpec, Dialect, InsertSpec, OperationDescriptor, Params, QueryParam, RawParams,
    RawQuerySpec, SelectSpec, UpdateSpec,
};
use sql_gateway::sql::compile;

fn map(value: serde_json::Value) -> serde_json::Map<String, serde_json::Value> {
    value.as_object().cloned().unwrap()
}

fn select(filter: serde_json::Value) -> OperationDescriptor {
    OperationDescriptor::Select(SelectSpec {
        table: "users".to_string(),
        filter: map(filter),
        fields: None,
    })
}

#[test]
fn test_filter_order_and_placeholder_count() {
    let op = select(json!({"status": "active", "age": 30, "city": "Toronto"}));
    let stmt = compile(Dialect::Postgres, &op).unwrap();
    assert_eq!(
        stmt.sql,
        "SELECT * FROM users WHERE status = %s AND age = %s AND city = %s"
    );
    assert_eq!(stmt.sql.matches("%s").count(), stmt.params.len());
    assert_eq!(
        stmt.params,
        Params::Positional(vec![
            QueryParam::from("active"),
            QueryParam::Int(30),
            QueryParam::from("Toronto"),
        ])
    );
}

#[test]
fn test_oracle_numbers_placeholders_from_one() {
    let op = OperationDescriptor::Update(UpdateSpec {
        table: "hr.employees".to_string(),
        data: map(json!({"salary": 5000, "title": "Lead"})),
        filter: map(json!({"employee_id": 7})),
    });
    let stmt = compile(Dialect::Oracle, &op).unwrap();
    assert_eq!(
        stmt.sql,
        "UPDATE hr.employees SET salary = :1, title = :2 WHERE employee_id = :3"
    );
}

#[test]
fn test_postgres_insert() {
    let op = OperationDescriptor::Insert(InsertSpec {
        table: "users".to_string(),
        data: map(json!({"username": "john", "email": "j@x.com"})),
    });
    let stmt = compile(Dialect::Postgres, &op).unwrap();
    assert_eq!(stmt.sql, "INSERT INTO users (username, email) VALUES (%s, %s)");
    assert_eq!(
        stmt.params,
        Params::Positional(vec![QueryParam::from("john"), QueryParam::from("j@x.com")])
    );
}

#[test]
fn test_mssql_delete() {
    let op = OperationDescriptor::Delete(DeleteSpec {
        table: "dbo.sessions".to_string(),
        filter: map(json!({"expired": true})),
    });
    let stmt = compile(Dialect::Mssql, &op).unwrap();
    assert_eq!(stmt.sql, "DELETE FROM dbo.sessions WHERE expired = ?");
}

#[test]
fn test_empty_filters_rejected_repeatedly() {
    for dialect in Dialect::ALL {
        for _ in 0..2 {
            let update = OperationDescriptor::Update(UpdateSpec {
                table: "users".to_string(),
                data: map(json!({"name": "x"})),
                filter: map(json!({})),
            });
            let delete = OperationDescriptor::Delete(DeleteSpec {
                table: "users".to_string(),
                filter: map(json!({})),
            });
            let update_err = compile(dialect, &update).unwrap_err();
            let delete_err = compile(dialect, &delete).unwrap_err();
            assert!(matches!(update_err, DbError::Validation { .. }));
            assert!(matches!(delete_err, DbError::Validation { .. }));
            assert_eq!(update_err.to_string(), delete_err.to_string());
        }
    }
}

#[test]
fn test_identifier_injection_rejected() {
    let op = OperationDescriptor::Select(SelectSpec {
        table: "users; DROP TABLE users".to_string(),
        filter: map(json!({"id": 1})),
        fields: None,
    });
    assert!(matches!(
        compile(Dialect::MySql, &op),
        Err(DbError::Validation { .. })
    ));

    let op = select(json!({"id = 1 OR 1": 1}));
    assert!(matches!(
        compile(Dialect::MySql, &op),
        Err(DbError::Validation { .. })
    ));
}

#[test]
fn test_raw_named_rewrite_leaves_everything_else() {
    let sql = "SELECT id::text, ':id' AS lit FROM t WHERE id = :id AND tag = :other -- :id";
    let op = OperationDescriptor::RawQuery(
        RawQuerySpec::new(sql).with_params(RawParams::Named(map(json!({"id": 5})))),
    );
    let stmt = compile(Dialect::Postgres, &op).unwrap();
    assert_eq!(
        stmt.sql,
        "SELECT id::text, ':id' AS lit FROM t WHERE id = %(id)s AND tag = :other -- :id"
    );
}

#[test]
fn test_raw_sql_passes_through_for_oracle_and_mssql() {
    let sql = "SELECT * FROM t WHERE id = :id";
    let op = OperationDescriptor::RawQuery(
        RawQuerySpec::new(sql).with_params(RawParams::Named(map(json!({"id": 5})))),
    );
    assert_eq!(compile(Dialect::Oracle, &op).unwrap().sql, sql);
    assert_eq!(compile(Dialect::Mssql, &op).unwrap().sql, sql);
}
