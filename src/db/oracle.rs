//! Oracle adapter (`oracle` crate, ODPI-C).
//!
//! The native client is blocking: every call moves the connection onto the
//! blocking thread pool and hands it back afterwards. Oracle opens
//! transactions implicitly, so `begin` only makes sure a session exists.

use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, FixedOffset, NaiveDateTime};
use oracle::sql_type::{OracleType, ToSql};
use oracle::{Connection, SqlValue};
use serde_json::Value as JsonValue;
use tracing::{debug, warn};

use crate::db::adapter::{Adapter, connect_error, ensure_configured, with_connect_timeout};
use crate::db::types::{binary_value, datetime_value, float_value, timestamptz_value};
use crate::error::{DbError, DbResult};
use crate::models::{CompiledStatement, ConnectionProfile, Dialect, Params, QueryParam, ResultSet};
use crate::sql::placeholders::referenced_named;

/// Load the Oracle client library up front.
pub fn init_client(lib_dir: Option<&Path>) -> Result<(), oracle::Error> {
    let mut params = oracle::InitParams::new();
    if let Some(dir) = lib_dir {
        params.oracle_client_lib_dir(dir)?;
    }
    params.init()?;
    Ok(())
}

pub struct OracleAdapter {
    profile: ConnectionProfile,
    connect_timeout: Duration,
    conn: Option<Connection>,
}

/// Bind values in the shape the statement expects.
enum Binds {
    Positional(Vec<QueryParam>),
    Named(Vec<(String, QueryParam)>),
}

impl Binds {
    fn from_statement(stmt: &CompiledStatement) -> DbResult<Self> {
        match &stmt.params {
            Params::Positional(values) => Ok(Self::Positional(values.clone())),
            Params::Named(_) => Ok(Self::Named(referenced_named(stmt)?)),
        }
    }

    fn len(&self) -> usize {
        match self {
            Self::Positional(values) => values.len(),
            Self::Named(pairs) => pairs.len(),
        }
    }
}

impl OracleAdapter {
    pub fn new(profile: ConnectionProfile, connect_timeout: Duration) -> Self {
        Self {
            profile,
            connect_timeout,
            conn: None,
        }
    }

    /// Easy Connect string: the DSN verbatim, or `//host:port/service`.
    fn connect_string(&self) -> DbResult<String> {
        if let Some(dsn) = self.profile.dsn() {
            return Ok(dsn.to_string());
        }
        let host = self
            .profile
            .host()
            .ok_or_else(|| DbError::configuration("Oracle host is not set"))?;
        Ok(format!(
            "//{}:{}/{}",
            host,
            self.profile.port_or_default(Dialect::Oracle),
            self.profile.database().unwrap_or_default()
        ))
    }

    /// Run blocking work against the open connection.
    async fn with_connection<T, F>(&mut self, work: F) -> DbResult<T>
    where
        F: FnOnce(&Connection) -> DbResult<T> + Send + 'static,
        T: Send + 'static,
    {
        self.connect().await?;
        let conn = self
            .conn
            .take()
            .ok_or_else(|| DbError::internal("Oracle connection missing after connect"))?;
        let (conn, result) = tokio::task::spawn_blocking(move || {
            let result = work(&conn);
            (conn, result)
        })
        .await
        .map_err(|e| DbError::internal(format!("Oracle worker failed: {}", e)))?;
        self.conn = Some(conn);
        result
    }
}

impl Adapter for OracleAdapter {
    fn dialect(&self) -> Dialect {
        Dialect::Oracle
    }

    async fn connect(&mut self) -> DbResult<()> {
        if self.conn.is_some() {
            return Ok(());
        }
        ensure_configured(Dialect::Oracle, &self.profile)?;
        let connect_string = self.connect_string()?;
        let user = self.profile.user().unwrap_or_default().to_string();
        let password = self.profile.password().unwrap_or_default().to_string();

        debug!(endpoint = %self.profile.endpoint(Dialect::Oracle), "Connecting to Oracle");
        let conn = with_connect_timeout(Dialect::Oracle, self.connect_timeout, async move {
            tokio::task::spawn_blocking(move || Connection::connect(user, password, connect_string))
                .await
                .map_err(|e| DbError::internal(format!("Oracle worker failed: {}", e)))?
                .map_err(|e| connect_error(Dialect::Oracle, e))
        })
        .await?;
        self.conn = Some(conn);
        Ok(())
    }

    async fn fetch_all(&mut self, stmt: &CompiledStatement) -> DbResult<ResultSet> {
        let binds = Binds::from_statement(stmt)?;
        let sql = stmt.sql.clone();
        debug!(sql = %sql, params = binds.len(), "Executing Oracle query");
        self.with_connection(move |conn| query_rows(conn, &sql, &binds))
            .await
    }

    async fn execute(&mut self, stmt: &CompiledStatement) -> DbResult<u64> {
        let binds = Binds::from_statement(stmt)?;
        let sql = stmt.sql.clone();
        debug!(sql = %sql, params = binds.len(), "Executing Oracle statement");
        self.with_connection(move |conn| execute_statement(conn, &sql, &binds))
            .await
    }

    async fn begin(&mut self) -> DbResult<()> {
        self.connect().await
    }

    async fn commit(&mut self) -> DbResult<()> {
        if self.conn.is_none() {
            return Ok(());
        }
        self.with_connection(|conn| conn.commit().map_err(query_error))
            .await
    }

    async fn rollback(&mut self) -> DbResult<()> {
        if self.conn.is_none() {
            return Ok(());
        }
        self.with_connection(|conn| conn.rollback().map_err(query_error))
            .await
    }

    async fn close(&mut self) {
        let Some(conn) = self.conn.take() else {
            return;
        };
        match tokio::task::spawn_blocking(move || conn.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "Failed to close Oracle connection cleanly"),
            Err(e) => warn!(error = %e, "Oracle close task failed"),
        }
    }
}

fn to_sql(param: &QueryParam) -> Box<dyn ToSql> {
    match param {
        QueryParam::Null => Box::new(Option::<String>::None),
        // no SQL BOOLEAN before 23c
        QueryParam::Bool(v) => Box::new(i64::from(*v)),
        QueryParam::Int(v) => Box::new(*v),
        QueryParam::UInt(v) => Box::new(*v),
        QueryParam::Float(v) => Box::new(*v),
        QueryParam::String(v) => Box::new(v.clone()),
    }
}

fn query_rows(conn: &Connection, sql: &str, binds: &Binds) -> DbResult<ResultSet> {
    let rows = match binds {
        Binds::Positional(values) => {
            let owned: Vec<Box<dyn ToSql>> = values.iter().map(to_sql).collect();
            let refs: Vec<&dyn ToSql> = owned.iter().map(|v| v.as_ref()).collect();
            conn.query(sql, &refs)
        }
        Binds::Named(pairs) => {
            let owned: Vec<(&str, Box<dyn ToSql>)> = pairs
                .iter()
                .map(|(name, value)| (name.as_str(), to_sql(value)))
                .collect();
            let refs: Vec<(&str, &dyn ToSql)> =
                owned.iter().map(|(name, v)| (*name, v.as_ref())).collect();
            conn.query_named(sql, &refs)
        }
    }
    .map_err(query_error)?;

    let names: Vec<String> = rows
        .column_info()
        .iter()
        .map(|c| c.name().to_string())
        .collect();
    let mut result = Vec::new();
    for row in rows {
        let row = row.map_err(query_error)?;
        result.push(
            names
                .iter()
                .cloned()
                .zip(row.sql_values().iter().map(sql_value_to_json))
                .collect(),
        );
    }
    Ok(result)
}

fn execute_statement(conn: &Connection, sql: &str, binds: &Binds) -> DbResult<u64> {
    let stmt = match binds {
        Binds::Positional(values) => {
            let owned: Vec<Box<dyn ToSql>> = values.iter().map(to_sql).collect();
            let refs: Vec<&dyn ToSql> = owned.iter().map(|v| v.as_ref()).collect();
            conn.execute(sql, &refs)
        }
        Binds::Named(pairs) => {
            let owned: Vec<(&str, Box<dyn ToSql>)> = pairs
                .iter()
                .map(|(name, value)| (name.as_str(), to_sql(value)))
                .collect();
            let refs: Vec<(&str, &dyn ToSql)> =
                owned.iter().map(|(name, v)| (*name, v.as_ref())).collect();
            conn.execute_named(sql, &refs)
        }
    }
    .map_err(query_error)?;
    stmt.row_count().map_err(query_error)
}

fn sql_value_to_json(value: &SqlValue) -> JsonValue {
    if value.is_null().unwrap_or(true) {
        return JsonValue::Null;
    }
    let decoded = match value.oracle_type() {
        Ok(OracleType::Number(..)) | Ok(OracleType::Int64) | Ok(OracleType::UInt64) => {
            value.get::<String>().ok().map(|s| number_value(&s))
        }
        Ok(OracleType::BinaryFloat) | Ok(OracleType::BinaryDouble) | Ok(OracleType::Float(_)) => {
            value.get::<f64>().ok().map(float_value)
        }
        Ok(OracleType::Date) | Ok(OracleType::Timestamp(_)) => {
            value.get::<NaiveDateTime>().ok().map(datetime_value)
        }
        Ok(OracleType::TimestampTZ(_)) | Ok(OracleType::TimestampLTZ(_)) => value
            .get::<DateTime<FixedOffset>>()
            .ok()
            .map(timestamptz_value),
        Ok(OracleType::Raw(_)) | Ok(OracleType::LongRaw) | Ok(OracleType::BLOB) => {
            value.get::<Vec<u8>>().ok().map(|b| binary_value(&b))
        }
        _ => None,
    };
    decoded
        .or_else(|| value.get::<String>().ok().map(JsonValue::String))
        .unwrap_or(JsonValue::Null)
}

/// NUMBER text to an integer when exact, else a float.
fn number_value(text: &str) -> JsonValue {
    if let Ok(i) = text.parse::<i64>() {
        return JsonValue::from(i);
    }
    match text.parse::<f64>() {
        Ok(f) if f.is_finite() => float_value(f),
        _ => JsonValue::String(text.to_string()),
    }
}

fn query_error(err: oracle::Error) -> DbError {
    let message = err.to_string();
    let code = ora_code(&message);
    DbError::query(
        message,
        code,
        "Check the SQL syntax, bind names and referenced objects",
    )
}

/// `ORA-NNNNN` code embedded in an Oracle error message.
fn ora_code(message: &str) -> Option<String> {
    let start = message.find("ORA-")?;
    let code = message.get(start..start + 9)?;
    code[4..]
        .bytes()
        .all(|b| b.is_ascii_digit())
        .then(|| code.to_string())
}
