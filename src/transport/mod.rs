//! HTTP transport for the gateway.
//!
//! - `routes`: axum router, handlers and shared state
//! - `http`: listener with graceful shutdown

pub mod http;
pub mod routes;

pub use http::HttpTransport;
pub use routes::{AppState, router};
