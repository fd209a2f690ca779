//! Provider webhook endpoint handler.
//!
//! Validates the delivery signature, extracts a run trigger from the event
//! payload, and dispatches the run to the worker. Deliveries that carry no
//! actionable trigger (unsupported events, irrelevant PR actions, inactive
//! repositories) are acknowledged with 200 and otherwise ignored.

use axum::Json;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::AppState;
use crate::dispatch::DispatchError;
use crate::types::{Run, RunId};
use crate::webhooks::events::{PullRequestEvent, PushEvent, RunTrigger};
use crate::webhooks::signature::verify_provider_signature;

/// Header name for the event type.
const HEADER_EVENT: &str = "x-event-type";
/// Header name for the delivery signature.
const HEADER_SIGNATURE: &str = "x-hub-signature";

/// Errors that can occur when processing a webhook.
#[derive(Debug, Error)]
pub enum WebhookError {
    /// Missing required header.
    #[error("missing required header: {0}")]
    MissingHeader(&'static str),

    /// Invalid signature.
    #[error("invalid signature")]
    InvalidSignature,

    /// Invalid JSON body.
    #[error("invalid JSON body: {0}")]
    InvalidJson(#[from] serde_json::Error),

    /// The worker rejected the run or was unreachable.
    #[error("dispatch failed: {0}")]
    Dispatch(#[from] DispatchError),
}

impl IntoResponse for WebhookError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            WebhookError::MissingHeader(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            WebhookError::InvalidSignature => (StatusCode::FORBIDDEN, self.to_string()),
            WebhookError::InvalidJson(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            WebhookError::Dispatch(_) => (StatusCode::BAD_GATEWAY, self.to_string()),
        };

        (status, message).into_response()
    }
}

/// Webhook handler.
///
/// # Request
///
/// - Method: POST
/// - Required headers:
///   - `X-Event-Type`: Event type (`push` or `pull_request`)
///   - `X-Hub-Signature`: `sha1=<hex>` HMAC of the payload
/// - Body: JSON webhook payload
///
/// # Response
///
/// - 200 OK: Run queued, or delivery ignored
/// - 400 Bad Request: Missing header or invalid JSON
/// - 403 Forbidden: Invalid signature
/// - 502 Bad Gateway: Worker rejected the run or was unreachable
pub async fn webhook_handler(
    State(app_state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, WebhookError> {
    let event_type = get_header(&headers, HEADER_EVENT)?;
    let signature_header = get_header(&headers, HEADER_SIGNATURE)?;

    // Verify signature before any parsing.
    if !verify_provider_signature(&body, &signature_header, app_state.webhook_secret()) {
        warn!(event_type = %event_type, "invalid webhook signature");
        return Err(WebhookError::InvalidSignature);
    }

    let trigger = match extract_trigger(&event_type, &body)? {
        Some(trigger) => trigger,
        None => {
            debug!(event_type = %event_type, "webhook delivery carries no run trigger");
            return Ok(ignored("no action for this event"));
        }
    };

    let repo = app_state.registry().find_or_create_repo(&trigger.repo);
    if !repo.active {
        debug!(repo = %repo.id, "ignoring delivery for inactive repository");
        return Ok(ignored("repository inactive"));
    }

    // Drop redundant deliveries for a change that is already being tested.
    if let Some(existing) =
        app_state
            .registry()
            .find_active_run(&trigger.repo, &trigger.source, &trigger.sha)
    {
        debug!(repo = %repo.id, run_id = %existing.id, "run already in progress");
        return Ok((
            StatusCode::OK,
            Json(json!({"status": "already_running", "run_id": existing.id})),
        )
            .into_response());
    }

    let run = Run::new(
        RunId::generate(),
        trigger.repo.clone(),
        trigger.source,
        trigger.event,
        trigger.sha,
        trigger.link,
        trigger.actor,
    );
    let (run, _created) = app_state.registry().get_or_create_run(run);

    let callback_url = app_state.callback_url(&repo.id);
    let job_id = match app_state.dispatch().submit(&repo, &run, &callback_url).await {
        Ok(job_id) => job_id,
        Err(err) => {
            // The run record stays in place but is never marked dispatched.
            warn!(repo = %repo.id, run_id = %run.id, error = %err, "dispatch failed");
            return Err(err.into());
        }
    };
    app_state
        .registry()
        .record_dispatched(&repo.id, &run.id, &job_id);

    info!(repo = %repo.id, run_id = %run.id, job_id = %job_id, "run queued");
    Ok((
        StatusCode::OK,
        Json(json!({"status": "queued", "run_id": run.id, "job_id": job_id})),
    )
        .into_response())
}

fn extract_trigger(
    event_type: &str,
    body: &[u8],
) -> Result<Option<RunTrigger>, WebhookError> {
    match event_type {
        "push" => {
            let event: PushEvent = serde_json::from_slice(body)?;
            Ok(event.into_trigger())
        }
        "pull_request" => {
            let event: PullRequestEvent = serde_json::from_slice(body)?;
            Ok(event.into_trigger())
        }
        _ => Ok(None),
    }
}

fn ignored(reason: &'static str) -> Response {
    (
        StatusCode::OK,
        Json(json!({"status": "ignored", "reason": reason})),
    )
        .into_response()
}

/// Extracts a required header value as a string.
fn get_header(headers: &HeaderMap, name: &'static str) -> Result<String, WebhookError> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .ok_or(WebhookError::MissingHeader(name))
}
