//! SQL Gateway Library
//!
//! One HTTP surface for parameterized CRUD and ad-hoc SQL against MySQL,
//! PostgreSQL, SQL Server and Oracle. Requests name a dialect and an
//! optional connection profile; the gateway compiles dialect SQL, runs it
//! on a per-request connection and returns rows as JSON.

pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod orchestrator;
pub mod sql;
pub mod transport;

pub use config::Config;
pub use error::{DbError, DbResult};
pub use orchestrator::{Orchestrator, Outcome};
