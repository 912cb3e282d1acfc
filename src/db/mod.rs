//! Database access layer.
//!
//! This module provides:
//! - The per-request [`Adapter`] contract and its production drivers
//! - Dispatch macros over the closed driver set
//! - Row decoding into JSON values
//! - Connection profile lookup

pub mod adapter;
#[macro_use]
pub mod macros;
#[cfg(feature = "mssql")]
pub mod mssql;
pub mod mysql;
#[cfg(feature = "oracle")]
pub mod oracle;
mod pg_bind;
pub mod postgres;
pub mod resolver;
pub mod types;

pub use adapter::{
    Adapter, AdapterFactory, DEFAULT_CONNECT_TIMEOUT_SECS, DriverAdapter, DriverFactory,
    OracleClientMode, init_oracle_client,
};
pub use resolver::ProfileSet;
