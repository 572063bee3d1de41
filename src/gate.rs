//! Shared-password gate for uploads and listings.
//!
//! Accepts `Authorization: Bearer <password>` or HTTP Basic with any user
//! name. The core services never see the credential.

use axum::{
    extract::{Request, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use base64::{Engine as _, engine::general_purpose};
use std::sync::Arc;

use crate::errors::AppError;

const REALM: &str = r#"Basic realm="imgdrop""#;

#[derive(Clone)]
pub struct AccessGate {
    password: Arc<str>,
}

impl AccessGate {
    pub fn new(password: impl Into<String>) -> Self {
        Self {
            password: Arc::from(password.into()),
        }
    }

    /// Whether the request carries the shared password.
    pub fn admits(&self, headers: &HeaderMap) -> bool {
        let Some(value) = headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
        else {
            return false;
        };

        if let Some(token) = value.strip_prefix("Bearer ") {
            return constant_time_eq(token.trim().as_bytes(), self.password.as_bytes());
        }

        if let Some(encoded) = value.strip_prefix("Basic ") {
            let Ok(decoded) = general_purpose::STANDARD.decode(encoded.trim()) else {
                return false;
            };
            let Ok(decoded) = String::from_utf8(decoded) else {
                return false;
            };
            let Some((_, password)) = decoded.split_once(':') else {
                return false;
            };
            return constant_time_eq(password.as_bytes(), self.password.as_bytes());
        }

        false
    }
}

/// Middleware rejecting requests that do not carry the shared password.
pub async fn require_password(
    State(gate): State<AccessGate>,
    request: Request,
    next: Next,
) -> Response {
    if gate.admits(request.headers()) {
        return next.run(request).await;
    }

    tracing::debug!("rejected unauthenticated request to {}", request.uri().path());
    let mut response =
        AppError::new(StatusCode::UNAUTHORIZED, "Authentication required").into_response();
    response
        .headers_mut()
        .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static(REALM));
    response
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
