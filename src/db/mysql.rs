//! MySQL / MariaDB adapter (sqlx).

use std::str::FromStr;
use std::time::Duration;

use sqlx::mysql::{MySqlArguments, MySqlConnectOptions, MySqlConnection};
use sqlx::{Connection, Executor, MySql};
use tracing::{debug, warn};

use crate::db::adapter::{Adapter, connect_error, ensure_configured, with_connect_timeout};
use crate::db::types::RowToJson;
use crate::error::{DbError, DbResult};
use crate::models::{CompiledStatement, ConnectionProfile, Dialect, QueryParam, ResultSet};
use crate::sql::placeholders::{NativeStatement, NativeStyle, translate_pyformat};

pub struct MySqlAdapter {
    profile: ConnectionProfile,
    connect_timeout: Duration,
    conn: Option<MySqlConnection>,
}

impl MySqlAdapter {
    pub fn new(profile: ConnectionProfile, connect_timeout: Duration) -> Self {
        Self {
            profile,
            connect_timeout,
            conn: None,
        }
    }

    fn connect_options(&self) -> DbResult<MySqlConnectOptions> {
        if let Some(dsn) = self.profile.dsn() {
            return MySqlConnectOptions::from_str(dsn)
                .map_err(|e| DbError::configuration(format!("Invalid MySQL DSN: {}", e)));
        }

        let host = self
            .profile
            .host()
            .ok_or_else(|| DbError::configuration("MySQL host is not set"))?;
        let mut options = MySqlConnectOptions::new()
            .host(host)
            .port(self.profile.port_or_default(Dialect::MySql));
        if let Some(user) = self.profile.user() {
            options = options.username(user);
        }
        if let Some(password) = self.profile.password() {
            options = options.password(password);
        }
        if let Some(database) = self.profile.database() {
            options = options.database(database);
        }
        Ok(options)
    }

    async fn connection(&mut self) -> DbResult<&mut MySqlConnection> {
        if self.conn.is_none() {
            self.connect().await?;
        }
        self.conn
            .as_mut()
            .ok_or_else(|| DbError::internal("MySQL connection missing after connect"))
    }

    fn native(stmt: &CompiledStatement) -> DbResult<NativeStatement> {
        translate_pyformat(stmt, Dialect::MySql, NativeStyle::Question)
    }
}

impl Adapter for MySqlAdapter {
    fn dialect(&self) -> Dialect {
        Dialect::MySql
    }

    async fn connect(&mut self) -> DbResult<()> {
        if self.conn.is_some() {
            return Ok(());
        }
        ensure_configured(Dialect::MySql, &self.profile)?;
        let options = self.connect_options()?;

        debug!(endpoint = %self.profile.endpoint(Dialect::MySql), "Connecting to MySQL");
        let conn = with_connect_timeout(Dialect::MySql, self.connect_timeout, async {
            MySqlConnection::connect_with(&options)
                .await
                .map_err(|e| connect_error(Dialect::MySql, e))
        })
        .await?;
        self.conn = Some(conn);
        Ok(())
    }

    async fn fetch_all(&mut self, stmt: &CompiledStatement) -> DbResult<ResultSet> {
        let native = Self::native(stmt)?;
        let conn = self.connection().await?;
        debug!(sql = %native.sql, params = native.values.len(), "Executing MySQL query");

        // Without parameters, run unprepared so statements that cannot be
        // prepared still work
        let rows = if native.values.is_empty() {
            conn.fetch_all(native.sql.as_str()).await?
        } else {
            let mut query = sqlx::query(&native.sql);
            for param in &native.values {
                query = bind_param(query, param);
            }
            query.fetch_all(&mut *conn).await?
        };
        Ok(rows.iter().map(RowToJson::to_json_map).collect())
    }

    async fn execute(&mut self, stmt: &CompiledStatement) -> DbResult<u64> {
        let native = Self::native(stmt)?;
        let conn = self.connection().await?;
        debug!(sql = %native.sql, params = native.values.len(), "Executing MySQL statement");

        let result = if native.values.is_empty() {
            conn.execute(native.sql.as_str()).await?
        } else {
            let mut query = sqlx::query(&native.sql);
            for param in &native.values {
                query = bind_param(query, param);
            }
            query.execute(&mut *conn).await?
        };
        Ok(result.rows_affected())
    }

    async fn begin(&mut self) -> DbResult<()> {
        let conn = self.connection().await?;
        conn.execute("START TRANSACTION").await?;
        Ok(())
    }

    async fn commit(&mut self) -> DbResult<()> {
        if let Some(conn) = self.conn.as_mut() {
            conn.execute("COMMIT").await?;
        }
        Ok(())
    }

    async fn rollback(&mut self) -> DbResult<()> {
        if let Some(conn) = self.conn.as_mut() {
            conn.execute("ROLLBACK").await?;
        }
        Ok(())
    }

    async fn close(&mut self) {
        if let Some(conn) = self.conn.take() {
            if let Err(e) = conn.close().await {
                warn!(error = %e, "Failed to close MySQL connection cleanly");
            }
        }
    }
}

fn bind_param<'q>(
    query: sqlx::query::Query<'q, MySql, MySqlArguments>,
    param: &'q QueryParam,
) -> sqlx::query::Query<'q, MySql, MySqlArguments> {
    match param {
        QueryParam::Null => query.bind(None::<String>),
        QueryParam::Bool(v) => query.bind(*v),
        QueryParam::Int(v) => query.bind(*v),
        QueryParam::UInt(v) => query.bind(*v),
        QueryParam::Float(v) => query.bind(*v),
        QueryParam::String(v) => query.bind(v.as_str()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_options_from_fields() {
        let profile = ConnectionProfile::new("db.local", Some(3307), "shop", "app", "pw");
        let adapter = MySqlAdapter::new(profile, Duration::from_secs(1));
        assert!(adapter.connect_options().is_ok());
    }

    #[test]
    fn test_connect_options_rejects_bad_dsn() {
        let adapter = MySqlAdapter::new(
            ConnectionProfile::from_dsn("not a url"),
            Duration::from_secs(1),
        );
        assert!(matches!(
            adapter.connect_options(),
            Err(DbError::Configuration { .. })
        ));
    }

    #[tokio::test]
    async fn test_invalid_placeholders_fail_before_connecting() {
        let mut adapter = MySqlAdapter::new(ConnectionProfile::default(), Duration::from_secs(1));
        let stmt = CompiledStatement::new(
            "SELECT %s, %s",
            crate::models::Params::Positional(vec![QueryParam::Int(1)]),
        );
        let err = adapter.fetch_all(&stmt).await.unwrap_err();
        assert!(matches!(err, DbError::Validation { .. }));
    }
}
