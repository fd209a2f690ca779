//! Health check endpoint for liveness probes.

use axum::http::StatusCode;

/// Health check handler. Returns 200 OK with "OK" when the server is up.
pub async fn health_handler() -> (StatusCode, &'static str) {
    (StatusCode::OK, "OK")
}
