//! Driver adapter abstraction.
//!
//! An [`Adapter`] owns at most one native connection for the lifetime of a
//! single request. It connects lazily, translates canonical placeholders to
//! the driver's markers and returns rows as ordered JSON maps.
//!
//! [`DriverAdapter`] is the closed set of production drivers; tests plug in
//! their own [`AdapterFactory`] with scripted adapters.

use std::future::Future;
use std::path::Path;
use std::time::Duration;

use crate::db::mysql::MySqlAdapter;
use crate::db::postgres::PostgresAdapter;
use crate::error::{DbError, DbResult};
use crate::impl_adapter_dispatch;
use crate::models::{CompiledStatement, ConnectionProfile, Dialect, ResultSet};

#[cfg(feature = "mssql")]
use crate::db::mssql::MssqlAdapter;
#[cfg(feature = "oracle")]
use crate::db::oracle::OracleAdapter;

/// Default connect timeout in seconds.
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Per-request access to one database.
pub trait Adapter: Send {
    fn dialect(&self) -> Dialect;

    /// Open the connection. A no-op when already connected.
    fn connect(&mut self) -> impl Future<Output = DbResult<()>> + Send;

    /// Run a row-returning statement.
    fn fetch_all(
        &mut self,
        stmt: &CompiledStatement,
    ) -> impl Future<Output = DbResult<ResultSet>> + Send;

    /// Run a statement and return the affected row count.
    fn execute(&mut self, stmt: &CompiledStatement) -> impl Future<Output = DbResult<u64>> + Send;

    fn begin(&mut self) -> impl Future<Output = DbResult<()>> + Send;

    /// No-op when never connected.
    fn commit(&mut self) -> impl Future<Output = DbResult<()>> + Send;

    /// No-op when never connected.
    fn rollback(&mut self) -> impl Future<Output = DbResult<()>> + Send;

    /// Release the connection. Safe to call more than once.
    fn close(&mut self) -> impl Future<Output = ()> + Send;
}

/// Builds adapters for resolved profiles.
pub trait AdapterFactory: Send + Sync + 'static {
    type Adapter: Adapter;

    fn create(&self, dialect: Dialect, profile: &ConnectionProfile) -> DbResult<Self::Adapter>;
}

/// Production drivers.
pub enum DriverAdapter {
    MySql(MySqlAdapter),
    Postgres(PostgresAdapter),
    #[cfg(feature = "mssql")]
    Mssql(MssqlAdapter),
    #[cfg(feature = "oracle")]
    Oracle(OracleAdapter),
}

impl Adapter for DriverAdapter {
    fn dialect(&self) -> Dialect {
        impl_adapter_dispatch!(self, a => a.dialect())
    }

    async fn connect(&mut self) -> DbResult<()> {
        impl_adapter_dispatch!(self, a => a.connect().await)
    }

    async fn fetch_all(&mut self, stmt: &CompiledStatement) -> DbResult<ResultSet> {
        impl_adapter_dispatch!(self, a => a.fetch_all(stmt).await)
    }

    async fn execute(&mut self, stmt: &CompiledStatement) -> DbResult<u64> {
        impl_adapter_dispatch!(self, a => a.execute(stmt).await)
    }

    async fn begin(&mut self) -> DbResult<()> {
        impl_adapter_dispatch!(self, a => a.begin().await)
    }

    async fn commit(&mut self) -> DbResult<()> {
        impl_adapter_dispatch!(self, a => a.commit().await)
    }

    async fn rollback(&mut self) -> DbResult<()> {
        impl_adapter_dispatch!(self, a => a.rollback().await)
    }

    async fn close(&mut self) {
        impl_adapter_dispatch!(self, a => a.close().await)
    }
}

/// Creates [`DriverAdapter`]s; drivers compiled out report `DriverUnavailable`.
#[derive(Debug, Clone, Copy)]
pub struct DriverFactory {
    connect_timeout: Duration,
}

impl DriverFactory {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl Default for DriverFactory {
    fn default() -> Self {
        Self::new(Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS))
    }
}

impl AdapterFactory for DriverFactory {
    type Adapter = DriverAdapter;

    fn create(&self, dialect: Dialect, profile: &ConnectionProfile) -> DbResult<DriverAdapter> {
        let profile = profile.clone();
        let timeout = self.connect_timeout;
        match dialect {
            Dialect::MySql => Ok(DriverAdapter::MySql(MySqlAdapter::new(profile, timeout))),
            Dialect::Postgres => Ok(DriverAdapter::Postgres(PostgresAdapter::new(
                profile, timeout,
            ))),
            #[cfg(feature = "mssql")]
            Dialect::Mssql => Ok(DriverAdapter::Mssql(MssqlAdapter::new(profile, timeout))),
            #[cfg(not(feature = "mssql"))]
            Dialect::Mssql => Err(DbError::driver_unavailable(
                dialect.display_name(),
                "the gateway was built without the `mssql` feature",
            )),
            #[cfg(feature = "oracle")]
            Dialect::Oracle => Ok(DriverAdapter::Oracle(OracleAdapter::new(profile, timeout))),
            #[cfg(not(feature = "oracle"))]
            Dialect::Oracle => Err(DbError::driver_unavailable(
                dialect.display_name(),
                "the gateway was built without the `oracle` feature",
            )),
        }
    }
}

/// How the Oracle client library was initialized at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OracleClientMode {
    /// Client library loaded up front, all server auth schemes available.
    Enhanced,
    /// Library resolved lazily on first connect; legacy password verifiers may fail.
    Reduced,
    /// Built without the `oracle` feature.
    Unavailable,
}

/// Initialize the Oracle client, falling back to reduced mode on failure.
pub fn init_oracle_client(lib_dir: Option<&Path>) -> OracleClientMode {
    #[cfg(feature = "oracle")]
    {
        match crate::db::oracle::init_client(lib_dir) {
            Ok(()) => {
                tracing::info!(lib_dir = ?lib_dir, "Oracle client initialized in enhanced mode");
                OracleClientMode::Enhanced
            }
            Err(e) => {
                tracing::warn!(
                    lib_dir = ?lib_dir,
                    error = %e,
                    "Oracle client initialization failed, continuing in reduced mode"
                );
                OracleClientMode::Reduced
            }
        }
    }
    #[cfg(not(feature = "oracle"))]
    {
        if lib_dir.is_some() {
            tracing::info!("ORACLE_CLIENT_LIB_DIR is set but the oracle feature is disabled");
        }
        tracing::debug!("Oracle support not compiled in");
        OracleClientMode::Unavailable
    }
}

/// Reject profiles without a host or DSN before touching the network.
pub(crate) fn ensure_configured(dialect: Dialect, profile: &ConnectionProfile) -> DbResult<()> {
    if profile.is_configured() {
        return Ok(());
    }
    Err(DbError::configuration(format!(
        "No {} connection configured. Set {} (or {prefix}_DSN) or define a named profile in {prefix}_CONFIGS",
        dialect.display_name(),
        host_env(dialect),
        prefix = env_prefix(dialect),
    )))
}

fn env_prefix(dialect: Dialect) -> &'static str {
    match dialect {
        Dialect::MySql => "MYSQL",
        Dialect::Postgres => "PG",
        Dialect::Mssql => "MSSQL",
        Dialect::Oracle => "ORACLE",
    }
}

fn host_env(dialect: Dialect) -> &'static str {
    match dialect {
        Dialect::MySql => "MYSQL_HOST",
        Dialect::Postgres => "PG_HOST",
        Dialect::Mssql => "MSSQL_SERVER",
        Dialect::Oracle => "ORACLE_HOST",
    }
}

/// Bound a connection attempt by the configured timeout.
pub(crate) async fn with_connect_timeout<T, F>(
    dialect: Dialect,
    timeout: Duration,
    attempt: F,
) -> DbResult<T>
where
    F: Future<Output = DbResult<T>>,
{
    match tokio::time::timeout(timeout, attempt).await {
        Ok(result) => result,
        Err(_) => Err(DbError::connection(
            format!(
                "{} connection timed out after {}s",
                dialect.display_name(),
                timeout.as_secs()
            ),
            "Check that the database host is reachable and the port is open",
        )),
    }
}

/// Classify an error raised while opening a connection.
pub(crate) fn connect_error(dialect: Dialect, err: impl std::fmt::Display) -> DbError {
    DbError::connection(
        format!("Failed to connect to {}: {}", dialect.display_name(), err),
        "Verify host, port, credentials and that the database server is running",
    )
}
