//! SQL Server adapter (tiberius).

use std::time::Duration;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use serde_json::Value as JsonValue;
use tiberius::numeric::Numeric;
use tiberius::{AuthMethod, Client, ColumnData, Config, FromSql, Query};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tracing::{debug, warn};

use crate::db::adapter::{Adapter, connect_error, ensure_configured, with_connect_timeout};
use crate::db::types::{
    binary_value, date_value, datetime_value, float_value, time_value, timestamptz_value,
};
use crate::error::{DbError, DbResult};
use crate::models::{CompiledStatement, ConnectionProfile, Dialect, QueryParam, ResultSet, Row};
use crate::sql::placeholders::translate_qmark;

type MssqlClient = Client<Compat<TcpStream>>;

pub struct MssqlAdapter {
    profile: ConnectionProfile,
    connect_timeout: Duration,
    client: Option<MssqlClient>,
}

impl MssqlAdapter {
    pub fn new(profile: ConnectionProfile, connect_timeout: Duration) -> Self {
        Self {
            profile,
            connect_timeout,
            client: None,
        }
    }

    fn config(&self) -> DbResult<Config> {
        if let Some(dsn) = self.profile.dsn() {
            return Config::from_ado_string(dsn).map_err(|e| {
                DbError::configuration(format!("Invalid SQL Server connection string: {}", e))
            });
        }

        let host = self
            .profile
            .host()
            .ok_or_else(|| DbError::configuration("SQL Server host is not set"))?;
        let mut config = Config::new();
        config.host(host);
        config.port(self.profile.port_or_default(Dialect::Mssql));
        if let Some(database) = self.profile.database() {
            config.database(database);
        }
        config.authentication(AuthMethod::sql_server(
            self.profile.user().unwrap_or_default(),
            self.profile.password().unwrap_or_default(),
        ));
        // server certificate is not verified
        config.trust_cert();
        Ok(config)
    }

    async fn client(&mut self) -> DbResult<&mut MssqlClient> {
        if self.client.is_none() {
            self.connect().await?;
        }
        self.client
            .as_mut()
            .ok_or_else(|| DbError::internal("SQL Server connection missing after connect"))
    }

    async fn simple(&mut self, sql: &str) -> DbResult<()> {
        let client = self.client().await?;
        client
            .simple_query(sql)
            .await
            .map_err(query_error)?
            .into_results()
            .await
            .map_err(query_error)?;
        Ok(())
    }
}

impl Adapter for MssqlAdapter {
    fn dialect(&self) -> Dialect {
        Dialect::Mssql
    }

    async fn connect(&mut self) -> DbResult<()> {
        if self.client.is_some() {
            return Ok(());
        }
        ensure_configured(Dialect::Mssql, &self.profile)?;
        let config = self.config()?;

        debug!(endpoint = %self.profile.endpoint(Dialect::Mssql), "Connecting to SQL Server");
        let client = with_connect_timeout(Dialect::Mssql, self.connect_timeout, async {
            let tcp = TcpStream::connect(config.get_addr())
                .await
                .map_err(|e| connect_error(Dialect::Mssql, e))?;
            tcp.set_nodelay(true)
                .map_err(|e| connect_error(Dialect::Mssql, e))?;
            Client::connect(config, tcp.compat_write())
                .await
                .map_err(|e| connect_error(Dialect::Mssql, e))
        })
        .await?;
        self.client = Some(client);
        Ok(())
    }

    async fn fetch_all(&mut self, stmt: &CompiledStatement) -> DbResult<ResultSet> {
        let native = translate_qmark(stmt)?;
        let client = self.client().await?;
        debug!(sql = %native.sql, params = native.values.len(), "Executing SQL Server query");

        let rows = if native.values.is_empty() {
            client
                .simple_query(native.sql.as_str())
                .await
                .map_err(query_error)?
                .into_first_result()
                .await
                .map_err(query_error)?
        } else {
            let mut query = Query::new(native.sql.as_str());
            for param in &native.values {
                bind_param(&mut query, param);
            }
            query
                .query(client)
                .await
                .map_err(query_error)?
                .into_first_result()
                .await
                .map_err(query_error)?
        };
        Ok(rows.into_iter().map(row_to_json).collect())
    }

    async fn execute(&mut self, stmt: &CompiledStatement) -> DbResult<u64> {
        let native = translate_qmark(stmt)?;
        let client = self.client().await?;
        debug!(sql = %native.sql, params = native.values.len(), "Executing SQL Server statement");

        let mut query = Query::new(native.sql.as_str());
        for param in &native.values {
            bind_param(&mut query, param);
        }
        let result = query.execute(client).await.map_err(query_error)?;
        Ok(result.rows_affected().iter().sum())
    }

    async fn begin(&mut self) -> DbResult<()> {
        self.simple("BEGIN TRANSACTION").await
    }

    async fn commit(&mut self) -> DbResult<()> {
        if self.client.is_none() {
            return Ok(());
        }
        self.simple("COMMIT").await
    }

    async fn rollback(&mut self) -> DbResult<()> {
        if self.client.is_none() {
            return Ok(());
        }
        self.simple("IF @@TRANCOUNT > 0 ROLLBACK").await
    }

    async fn close(&mut self) {
        if let Some(client) = self.client.take() {
            if let Err(e) = client.close().await {
                warn!(error = %e, "Failed to close SQL Server connection cleanly");
            }
        }
    }
}

fn bind_param<'a>(query: &mut Query<'a>, param: &'a QueryParam) {
    match param {
        QueryParam::Null => query.bind(Option::<&str>::None),
        QueryParam::Bool(v) => query.bind(*v),
        QueryParam::Int(v) => query.bind(*v),
        // no unsigned BIGINT in SQL Server
        QueryParam::UInt(v) => query.bind(Numeric::new_with_scale(i128::from(*v), 0)),
        QueryParam::Float(v) => query.bind(*v),
        QueryParam::String(v) => query.bind(v.as_str()),
    }
}

fn query_error(err: tiberius::error::Error) -> DbError {
    match &err {
        tiberius::error::Error::Server(token) => DbError::query(
            token.message(),
            Some(token.code().to_string()),
            "Check the SQL syntax, referenced objects and constraints",
        ),
        tiberius::error::Error::Io { .. } => DbError::connection(
            format!("SQL Server I/O error: {}", err),
            "Check network connectivity and database server status",
        ),
        _ => DbError::query(err.to_string(), None, "Check the SQL statement and parameters"),
    }
}

fn row_to_json(row: tiberius::Row) -> Row {
    let names: Vec<String> = row
        .columns()
        .iter()
        .map(|c| c.name().to_string())
        .collect();
    names
        .into_iter()
        .zip(row)
        .map(|(name, data)| (name, column_value(&data)))
        .collect()
}

fn column_value(data: &ColumnData<'static>) -> JsonValue {
    let value = match data {
        ColumnData::U8(v) => v.map(JsonValue::from),
        ColumnData::I16(v) => v.map(JsonValue::from),
        ColumnData::I32(v) => v.map(JsonValue::from),
        ColumnData::I64(v) => v.map(JsonValue::from),
        ColumnData::F32(v) => v.map(|f| float_value(f as f64)),
        ColumnData::F64(v) => v.map(float_value),
        ColumnData::Bit(v) => v.map(JsonValue::Bool),
        ColumnData::String(v) => v.as_ref().map(|s| JsonValue::String(s.to_string())),
        ColumnData::Guid(v) => v.as_ref().map(|g| JsonValue::String(g.to_string())),
        ColumnData::Binary(v) => v.as_ref().map(|b| binary_value(b)),
        ColumnData::Numeric(v) => v.as_ref().map(|n| JsonValue::String(n.to_string())),
        ColumnData::Xml(v) => v.as_ref().map(|x| JsonValue::String((**x).to_string())),
        ColumnData::DateTime(_) | ColumnData::SmallDateTime(_) | ColumnData::DateTime2(_) => {
            NaiveDateTime::from_sql(data)
                .ok()
                .flatten()
                .map(datetime_value)
        }
        ColumnData::Date(_) => NaiveDate::from_sql(data).ok().flatten().map(date_value),
        ColumnData::Time(_) => NaiveTime::from_sql(data).ok().flatten().map(time_value),
        ColumnData::DateTimeOffset(_) => DateTime::<FixedOffset>::from_sql(data)
            .ok()
            .flatten()
            .map(timestamptz_value),
    };
    value.unwrap_or(JsonValue::Null)
}
