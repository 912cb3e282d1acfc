//! SQL Gateway - Main entry point.

use clap::Parser;
use sql_gateway::auth::ApiKeys;
use sql_gateway::config::{Config, load_profiles};
use sql_gateway::db::{DriverFactory, init_oracle_client};
use sql_gateway::models::Dialect;
use sql_gateway::orchestrator::Orchestrator;
use sql_gateway::transport::{AppState, HttpTransport, router};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Initialize the tracing subscriber for logging.
fn init_tracing(config: &Config) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.json_logs {
        subscriber.with(fmt::layer().json()).init();
    } else {
        subscriber
            .with(fmt::layer().with_target(true).with_thread_ids(false))
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::parse();
    init_tracing(&config);

    info!(
        mode = %config.app_mode,
        "Starting SQL Gateway v{}",
        env!("CARGO_PKG_VERSION")
    );

    let keys = ApiKeys::new(config.resolved_api_keys());
    if keys.is_configured() {
        info!(count = keys.len(), "API keys loaded");
    } else {
        warn!("No API keys configured; protected routes will answer 500");
    }

    let oracle_mode = init_oracle_client(config.oracle_client_lib_dir.as_deref());
    info!(mode = ?oracle_mode, "Oracle client");

    let profiles = load_profiles();
    for dialect in Dialect::ALL {
        info!(
            dialect = %dialect,
            configured = profiles.resolve(dialect, None).is_configured(),
            profiles = ?profiles.names(dialect),
            "Connection profiles"
        );
    }

    let factory = DriverFactory::new(config.connect_timeout_duration());
    let state = Arc::new(AppState::new(
        Orchestrator::new(profiles, factory),
        config.app_mode,
    ));
    let app = router(state, Arc::new(keys));

    let transport = HttpTransport::new(app, &config.http_host, config.http_port);
    if let Err(e) = transport.run().await {
        error!(error = %e, "Server error");
        return Err(e.into());
    }

    info!("Server shutdown complete");
    Ok(())
}
