//! PostgreSQL adapter (sqlx).

use std::str::FromStr;
use std::time::Duration;

use sqlx::postgres::{PgArguments, PgConnectOptions, PgConnection, PgTypeInfo};
use sqlx::query::Query;
use sqlx::{Connection, Executor, Postgres, Statement};
use tracing::{debug, warn};

use crate::db::adapter::{Adapter, connect_error, ensure_configured, with_connect_timeout};
use crate::db::pg_bind::PgBind;
use crate::db::types::RowToJson;
use crate::error::{DbError, DbResult};
use crate::models::{CompiledStatement, ConnectionProfile, Dialect, ResultSet};
use crate::sql::placeholders::{NativeStatement, NativeStyle, translate_pyformat};

pub struct PostgresAdapter {
    profile: ConnectionProfile,
    connect_timeout: Duration,
    conn: Option<PgConnection>,
}

impl PostgresAdapter {
    pub fn new(profile: ConnectionProfile, connect_timeout: Duration) -> Self {
        Self {
            profile,
            connect_timeout,
            conn: None,
        }
    }

    fn connect_options(&self) -> DbResult<PgConnectOptions> {
        if let Some(dsn) = self.profile.dsn() {
            return PgConnectOptions::from_str(dsn)
                .map_err(|e| DbError::configuration(format!("Invalid PostgreSQL DSN: {}", e)));
        }

        let host = self
            .profile
            .host()
            .ok_or_else(|| DbError::configuration("PostgreSQL host is not set"))?;
        let mut options = PgConnectOptions::new()
            .host(host)
            .port(self.profile.port_or_default(Dialect::Postgres))
            .application_name("sql-gateway");
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

    async fn connection(&mut self) -> DbResult<&mut PgConnection> {
        if self.conn.is_none() {
            self.connect().await?;
        }
        self.conn
            .as_mut()
            .ok_or_else(|| DbError::internal("PostgreSQL connection missing after connect"))
    }

    fn native(stmt: &CompiledStatement) -> DbResult<NativeStatement> {
        translate_pyformat(stmt, Dialect::Postgres, NativeStyle::Dollar)
    }
}

impl Adapter for PostgresAdapter {
    fn dialect(&self) -> Dialect {
        Dialect::Postgres
    }

    async fn connect(&mut self) -> DbResult<()> {
        if self.conn.is_some() {
            return Ok(());
        }
        ensure_configured(Dialect::Postgres, &self.profile)?;
        let options = self.connect_options()?;

        debug!(endpoint = %self.profile.endpoint(Dialect::Postgres), "Connecting to PostgreSQL");
        let conn = with_connect_timeout(Dialect::Postgres, self.connect_timeout, async {
            PgConnection::connect_with(&options)
                .await
                .map_err(|e| connect_error(Dialect::Postgres, e))
        })
        .await?;
        self.conn = Some(conn);
        Ok(())
    }

    async fn fetch_all(&mut self, stmt: &CompiledStatement) -> DbResult<ResultSet> {
        let native = Self::native(stmt)?;
        let conn = self.connection().await?;
        debug!(sql = %native.sql, params = native.values.len(), "Executing PostgreSQL query");

        let rows = if native.values.is_empty() {
            conn.fetch_all(native.sql.as_str()).await?
        } else {
            let query = bound_query(conn, &native).await?;
            query.fetch_all(&mut *conn).await?
        };
        Ok(rows.iter().map(RowToJson::to_json_map).collect())
    }

    async fn execute(&mut self, stmt: &CompiledStatement) -> DbResult<u64> {
        let native = Self::native(stmt)?;
        let conn = self.connection().await?;
        debug!(sql = %native.sql, params = native.values.len(), "Executing PostgreSQL statement");

        let result = if native.values.is_empty() {
            conn.execute(native.sql.as_str()).await?
        } else {
            let query = bound_query(conn, &native).await?;
            query.execute(&mut *conn).await?
        };
        Ok(result.rows_affected())
    }

    async fn begin(&mut self) -> DbResult<()> {
        let conn = self.connection().await?;
        conn.execute("BEGIN").await?;
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
                warn!(error = %e, "Failed to close PostgreSQL connection cleanly");
            }
        }
    }
}

/// Prepare `native`, then bind each value as the type the server inferred
/// for its parameter.
async fn bound_query<'q>(
    conn: &mut PgConnection,
    native: &'q NativeStatement,
) -> DbResult<Query<'q, Postgres, PgArguments>> {
    let statement = (&mut *conn).prepare(native.sql.as_str()).await?;
    let types: Vec<PgTypeInfo> = statement
        .parameters()
        .and_then(|p| p.left())
        .map(<[PgTypeInfo]>::to_vec)
        .unwrap_or_default();

    let mut query = sqlx::query(&native.sql);
    for (idx, param) in native.values.iter().enumerate() {
        let value = match types.get(idx) {
            Some(ty) => PgBind::coerce(param, ty)?,
            None => PgBind::untyped(param),
        };
        query = value.bind(query);
    }
    Ok(query)
}
