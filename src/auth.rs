//! API key authentication for the HTTP surface.

use axum::{
    Json,
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tracing::{error, warn};

/// Header carrying the caller's key.
pub const API_KEY_HEADER: &str = "x-api-key";

/// Accepted API keys.
#[derive(Debug, Clone, Default)]
pub struct ApiKeys {
    keys: Vec<String>,
}

impl ApiKeys {
    pub fn new(keys: Vec<String>) -> Self {
        let keys = keys
            .into_iter()
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
            .collect();
        Self { keys }
    }

    pub fn is_configured(&self) -> bool {
        !self.keys.is_empty()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Compare against every key without short-circuiting.
    pub fn verify(&self, provided: &str) -> bool {
        let mut found = false;
        for expected in &self.keys {
            if constant_time_eq(provided.as_bytes(), expected.as_bytes()) {
                found = true;
            }
        }
        found
    }
}

/// Rejects requests without a valid `X-API-KEY` header.
pub async fn api_key_middleware(
    State(keys): State<Arc<ApiKeys>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if !keys.is_configured() {
        error!("Request rejected: no API keys configured");
        return auth_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "configuration_error",
            "API key(s) not configured",
            "Set API_KEYS or API_KEY on the server",
        );
    }

    let provided = request
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok());
    match provided {
        Some(key) if keys.verify(key) => next.run(request).await,
        Some(key) => {
            warn!(key_prefix = %mask_key(key), "Authentication failed: invalid API key");
            unauthorized()
        }
        None => {
            warn!("Authentication failed: missing X-API-KEY header");
            unauthorized()
        }
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}

fn mask_key(key: &str) -> String {
    match key.get(..3) {
        Some(prefix) if key.len() > 3 => format!("{}***", prefix),
        _ => "***".to_string(),
    }
}

fn unauthorized() -> Response {
    auth_error(
        StatusCode::UNAUTHORIZED,
        "unauthorized",
        "Invalid or missing API key",
        "Send a configured key in the X-API-KEY header",
    )
}

fn auth_error(status: StatusCode, code: &str, message: &str, suggestion: &str) -> Response {
    let body = json!({
        "error": {
            "code": code,
            "message": message,
            "suggestion": suggestion,
        }
    });
    (status, Json(body)).into_response()
}
