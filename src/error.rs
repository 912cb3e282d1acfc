//! Error types for the SQL gateway.
//!
//! Every failure that leaves the core is one of these variants. Driver
//! errors are classified inside their adapters, so callers never see a raw
//! native error. Each variant maps to an HTTP status category.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum DbError {
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Connection failed: {message}")]
    Connection { message: String, suggestion: String },

    #[error("Invalid request: {message}")]
    Validation { message: String },

    #[error("Query failed: {message}")]
    Query {
        message: String,
        /// e.g., "42P01" for undefined table
        sql_state: Option<String>,
        suggestion: String,
    },

    #[error("Not found: {message}")]
    NotFound { message: String },

    #[error("Expected exactly one record, found {count}")]
    AmbiguousResult { count: usize },

    #[error("{dialect} driver not available: {reason}")]
    DriverUnavailable { dialect: String, reason: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Status category a failure is reported under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    BadRequest,
    NotFound,
    UpstreamFailure,
    Internal,
}

impl ErrorCategory {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest => StatusCode::BAD_REQUEST,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::UpstreamFailure => StatusCode::BAD_GATEWAY,
            Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl DbError {
    /// Create a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a connection error with a helpful suggestion.
    pub fn connection(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Create a query error with optional SQL state.
    pub fn query(
        message: impl Into<String>,
        sql_state: Option<String>,
        suggestion: impl Into<String>,
    ) -> Self {
        Self::Query {
            message: message.into(),
            sql_state,
            suggestion: suggestion.into(),
        }
    }

    /// Create a not found error.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    /// Create an error for a single-record fetch that matched several rows.
    pub fn ambiguous_result(count: usize) -> Self {
        Self::AmbiguousResult { count }
    }

    /// Create a driver unavailable error.
    pub fn driver_unavailable(dialect: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::DriverUnavailable {
            dialect: dialect.into(),
            reason: reason.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Get the suggestion for this error, if available.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::Connection { suggestion, .. } => Some(suggestion),
            Self::Query { suggestion, .. } => Some(suggestion),
            Self::AmbiguousResult { .. } => {
                Some("Narrow the filter so that it matches a single row")
            }
            _ => None,
        }
    }

    /// Machine-readable error code used in HTTP error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Configuration { .. } => "configuration_error",
            Self::Connection { .. } => "connection_error",
            Self::Validation { .. } => "validation_error",
            Self::Query { .. } => "query_error",
            Self::NotFound { .. } => "not_found",
            Self::AmbiguousResult { .. } => "ambiguous_result",
            Self::DriverUnavailable { .. } => "driver_unavailable",
            Self::Internal { .. } => "internal_error",
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Validation { .. } | Self::Query { .. } | Self::AmbiguousResult { .. } => {
                ErrorCategory::BadRequest
            }
            Self::NotFound { .. } => ErrorCategory::NotFound,
            Self::Connection { .. } => ErrorCategory::UpstreamFailure,
            Self::Configuration { .. }
            | Self::DriverUnavailable { .. }
            | Self::Internal { .. } => ErrorCategory::Internal,
        }
    }
}

/// Classify sqlx errors raised while a statement runs.
///
/// Connect-phase failures are mapped by the adapters themselves, since sqlx
/// reports auth failures as `Database` errors too.
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Configuration(msg) => DbError::configuration(msg.to_string()),
            sqlx::Error::Database(db_err) => {
                let code = db_err.code().map(|c| c.to_string());
                DbError::query(
                    db_err.message(),
                    code,
                    "Check the SQL syntax, referenced objects and constraints",
                )
            }
            sqlx::Error::RowNotFound => DbError::not_found("No rows returned"),
            sqlx::Error::Io(io_err) => DbError::connection(
                format!("I/O error: {}", io_err),
                "Check network connectivity and database server status",
            ),
            sqlx::Error::Tls(tls_err) => DbError::connection(
                format!("TLS error: {}", tls_err),
                "Verify TLS configuration and certificates",
            ),
            sqlx::Error::Protocol(msg) => DbError::connection(
                format!("Protocol error: {}", msg),
                "Check database server compatibility",
            ),
            sqlx::Error::TypeNotFound { type_name } => DbError::query(
                format!("Type not found: {}", type_name),
                None,
                "Check the parameter types",
            ),
            sqlx::Error::ColumnNotFound(col) => DbError::query(
                format!("Column not found: {}", col),
                None,
                "Check the selected columns",
            ),
            sqlx::Error::ColumnDecode { index, source } => {
                DbError::internal(format!("Failed to decode column {}: {}", index, source))
            }
            sqlx::Error::Decode(source) => DbError::internal(format!("Decode error: {}", source)),
            sqlx::Error::WorkerCrashed => DbError::internal("Database worker crashed"),
            _ => DbError::internal(format!("Unknown database error: {}", err)),
        }
    }
}

/// Result type alias for gateway operations.
pub type DbResult<T> = Result<T, DbError>;

#[derive(Serialize)]
struct ErrorResponse<'a> {
    error: ErrorDetail<'a>,
}

#[derive(Serialize)]
struct ErrorDetail<'a> {
    code: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    suggestion: Option<&'a str>,
}

impl IntoResponse for DbError {
    fn into_response(self) -> Response {
        let status = self.category().status_code();
        let message = match &self {
            DbError::Query {
                message,
                sql_state: Some(code),
                ..
            } => format!("{} (SQLSTATE: {})", message, code),
            other => other.to_string(),
        };
        let body = ErrorResponse {
            error: ErrorDetail {
                code: self.code(),
                message,
                suggestion: self.suggestion(),
            },
        };
        (status, Json(body)).into_response()
    }
}
