//! Configuration handling for the SQL gateway.
//!
//! Process settings come from CLI arguments with environment fallbacks.
//! Connection profiles are read from the per-dialect environment variables
//! into an immutable [`ProfileSet`].

use clap::{Parser, ValueEnum};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

use crate::db::{DEFAULT_CONNECT_TIMEOUT_SECS, ProfileSet};
use crate::models::{ConnectionProfile, DEFAULT_PROFILE_NAME, Dialect};

pub const DEFAULT_HTTP_HOST: &str = "0.0.0.0";
pub const DEFAULT_HTTP_PORT: u16 = 8082;

/// Deployment mode reported by the health endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum AppMode {
    #[default]
    Dev,
    Prod,
}

impl std::fmt::Display for AppMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Dev => write!(f, "DEV"),
            Self::Prod => write!(f, "PROD"),
        }
    }
}

/// Configuration for the SQL gateway.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "sql-gateway",
    about = "HTTP gateway for parameterized CRUD and ad-hoc SQL across MySQL, PostgreSQL, SQL Server and Oracle",
    version
)]
pub struct Config {
    /// HTTP host to bind to
    #[arg(long, default_value = DEFAULT_HTTP_HOST, env = "GATEWAY_HTTP_HOST")]
    pub http_host: String,

    /// HTTP port to bind to
    #[arg(long, default_value_t = DEFAULT_HTTP_PORT, env = "GATEWAY_HTTP_PORT")]
    pub http_port: u16,

    /// Deployment mode
    #[arg(
        long,
        value_enum,
        ignore_case = true,
        default_value = "dev",
        env = "APP_MODE"
    )]
    pub app_mode: AppMode,

    /// Accepted API keys: JSON array of strings, JSON array of
    /// `{"key": ...}` objects, or comma-separated values
    #[arg(long, value_name = "KEYS", env = "API_KEYS", hide_env_values = true)]
    pub api_keys: Option<String>,

    /// Single API key, used when API_KEYS yields nothing
    #[arg(long, value_name = "KEY", env = "API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "GATEWAY_LOG_LEVEL")]
    pub log_level: String,

    /// Enable JSON logging format
    #[arg(long, env = "GATEWAY_JSON_LOGS")]
    pub json_logs: bool,

    /// Connection timeout in seconds
    #[arg(
        long,
        default_value_t = DEFAULT_CONNECT_TIMEOUT_SECS,
        env = "GATEWAY_CONNECT_TIMEOUT"
    )]
    pub connect_timeout: u64,

    /// Oracle client library directory (enhanced client mode)
    #[arg(long, value_name = "DIR", env = "ORACLE_CLIENT_LIB_DIR")]
    pub oracle_client_lib_dir: Option<PathBuf>,
}

impl Config {
    /// Parse configuration from command line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Create a default configuration (useful for testing).
    pub fn default_config() -> Self {
        Self {
            http_host: DEFAULT_HTTP_HOST.to_string(),
            http_port: DEFAULT_HTTP_PORT,
            app_mode: AppMode::Dev,
            api_keys: None,
            api_key: None,
            log_level: "info".to_string(),
            json_logs: false,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT_SECS,
            oracle_client_lib_dir: None,
        }
    }

    /// Get the HTTP bind address.
    pub fn http_bind_addr(&self) -> String {
        format!("{}:{}", self.http_host, self.http_port)
    }

    /// Get the connection timeout as a Duration.
    pub fn connect_timeout_duration(&self) -> Duration {
        Duration::from_secs(self.connect_timeout)
    }

    /// Resolved list of accepted API keys.
    pub fn resolved_api_keys(&self) -> Vec<String> {
        parse_api_keys(self.api_keys.as_deref(), self.api_key.as_deref())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::default_config()
    }
}

/// Parse `API_KEYS`, falling back to the single `API_KEY`.
pub fn parse_api_keys(api_keys: Option<&str>, api_key: Option<&str>) -> Vec<String> {
    let mut keys = api_keys
        .map(str::trim)
        .filter(|raw| !raw.is_empty())
        .and_then(|raw| {
            let parsed = parse_key_list(raw);
            if parsed.is_none() {
                warn!(
                    "Invalid API_KEYS format; expected JSON array or comma-separated string. Falling back to API_KEY"
                );
            }
            parsed
        })
        .unwrap_or_default();

    if keys.is_empty() {
        if let Some(key) = api_key.map(str::trim).filter(|k| !k.is_empty()) {
            keys.push(key.to_string());
        }
    }
    keys
}

fn parse_key_list(raw: &str) -> Option<Vec<String>> {
    match serde_json::from_str::<JsonValue>(raw) {
        Ok(JsonValue::Array(items)) => {
            let objects = items.first().is_some_and(|first| first.get("key").is_some());
            let keys = items
                .iter()
                .filter_map(|item| {
                    if objects {
                        item.get("key").and_then(JsonValue::as_str)
                    } else {
                        item.as_str()
                    }
                })
                .filter(|k| !k.is_empty())
                .map(String::from)
                .collect();
            Some(keys)
        }
        Ok(_) => None,
        Err(_) if raw.contains(',') => Some(
            raw.split(',')
                .map(str::trim)
                .filter(|k| !k.is_empty())
                .map(String::from)
                .collect(),
        ),
        Err(_) => None,
    }
}

/// Environment variable names for one dialect's default profile.
struct ProfileEnv {
    host: &'static str,
    port: &'static str,
    database: &'static str,
    user: &'static str,
    password: &'static str,
    dsn: &'static str,
    named: &'static str,
}

fn profile_env(dialect: Dialect) -> ProfileEnv {
    match dialect {
        Dialect::MySql => ProfileEnv {
            host: "MYSQL_HOST",
            port: "MYSQL_PORT",
            database: "MYSQL_DB",
            user: "MYSQL_USER",
            password: "MYSQL_PASSWORD",
            dsn: "MYSQL_DSN",
            named: "MYSQL_CONFIGS",
        },
        Dialect::Postgres => ProfileEnv {
            host: "PG_HOST",
            port: "PG_PORT",
            database: "PG_DB",
            user: "PG_USER",
            password: "PG_PASSWORD",
            dsn: "PG_DSN",
            named: "PG_CONFIGS",
        },
        Dialect::Mssql => ProfileEnv {
            host: "MSSQL_SERVER",
            port: "MSSQL_PORT",
            database: "MSSQL_DB",
            user: "MSSQL_USER",
            password: "MSSQL_PASSWORD",
            dsn: "MSSQL_DSN",
            named: "MSSQL_CONFIGS",
        },
        Dialect::Oracle => ProfileEnv {
            host: "ORACLE_HOST",
            port: "ORACLE_PORT",
            database: "ORACLE_SERVICE_NAME",
            user: "ORACLE_USER",
            password: "ORACLE_PASSWORD",
            dsn: "ORACLE_DSN",
            named: "ORACLE_CONFIGS",
        },
    }
}

/// Load every dialect's profiles from the process environment.
pub fn load_profiles() -> ProfileSet {
    load_profiles_from(|name| std::env::var(name).ok())
}

/// Load profiles through an arbitrary variable lookup.
pub fn load_profiles_from<L>(lookup: L) -> ProfileSet
where
    L: Fn(&str) -> Option<String>,
{
    let mut profiles = ProfileSet::new();
    for dialect in Dialect::ALL {
        let env = profile_env(dialect);
        profiles = profiles.with_default(dialect, default_profile(dialect, &env, &lookup));

        for (name, profile) in named_profiles(&env, &lookup) {
            if name == DEFAULT_PROFILE_NAME {
                warn!(
                    variable = env.named,
                    "Ignoring named profile 'default'; the name is reserved"
                );
                continue;
            }
            profiles = profiles.with_named(dialect, name, profile);
        }
    }
    profiles
}

fn default_profile<L>(dialect: Dialect, env: &ProfileEnv, lookup: &L) -> ConnectionProfile
where
    L: Fn(&str) -> Option<String>,
{
    let port = lookup(env.port).and_then(|raw| match raw.trim().parse::<u16>() {
        Ok(port) => Some(port),
        Err(_) => {
            warn!(
                variable = env.port,
                value = %raw,
                default = dialect.default_port(),
                "Invalid port, using the default"
            );
            None
        }
    });
    ConnectionProfile {
        host: lookup(env.host),
        port,
        database: lookup(env.database),
        user: lookup(env.user),
        password: lookup(env.password),
        dsn: lookup(env.dsn),
    }
}

fn named_profiles<L>(env: &ProfileEnv, lookup: &L) -> BTreeMap<String, ConnectionProfile>
where
    L: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(env.named).filter(|raw| !raw.trim().is_empty()) else {
        return BTreeMap::new();
    };
    match serde_json::from_str(&raw) {
        Ok(profiles) => profiles,
        Err(e) => {
            warn!(variable = env.named, error = %e, "Invalid JSON in named profiles, ignoring");
            BTreeMap::new()
        }
    }
}
