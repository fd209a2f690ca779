//! Worker callback endpoint handler.
//!
//! The worker posts progress and result payloads here, signed with the
//! repository's callback secret. A terminal payload finishes the run,
//! computes the diff against the repository baseline, and posts the report
//! comment. Comment posting is best-effort: the run is already persisted by
//! then, and a notify failure never rolls it back.

use std::collections::BTreeMap;

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::AppState;
use crate::registry::{RegistryError, WorkerUpdate};
use crate::types::{RepoId, RunId, RunState, Sha};
use crate::webhooks::signature::verify_worker_signature;

/// Header carrying the HMAC of the request body.
const HEADER_SIGNATURE: &str = "hooktest-secure-x";
/// Header echoing back the run id from the dispatch body.
const HEADER_RUN_ID: &str = "hooktest-uuid";

#[derive(Debug, Error)]
pub enum CallbackError {
    #[error("missing required header: {0}")]
    MissingHeader(&'static str),

    #[error("invalid signature")]
    InvalidSignature,

    #[error("unknown repository: {0}")]
    UnknownRepository(RepoId),

    #[error("expected application/json")]
    UnsupportedMediaType,

    /// Serde names the offending field in its message, e.g.
    /// `missing field \`source\``.
    #[error("invalid payload: {0}")]
    InvalidPayload(#[from] serde_json::Error),

    #[error("coverage {0} outside [0, 100]")]
    CoverageOutOfRange(f64),

    #[error("unrecognized status: {0}")]
    UnknownStatus(String),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

impl IntoResponse for CallbackError {
    fn into_response(self) -> Response {
        let status = match &self {
            CallbackError::MissingHeader(_) => StatusCode::BAD_REQUEST,
            CallbackError::InvalidSignature => StatusCode::FORBIDDEN,
            CallbackError::UnknownRepository(_) => StatusCode::NOT_FOUND,
            CallbackError::UnsupportedMediaType => StatusCode::BAD_REQUEST,
            CallbackError::InvalidPayload(_) => StatusCode::BAD_REQUEST,
            CallbackError::CoverageOutOfRange(_) => StatusCode::BAD_REQUEST,
            CallbackError::UnknownStatus(_) => StatusCode::BAD_REQUEST,
            CallbackError::Registry(err) => match err {
                RegistryError::UnknownRepository(_) | RegistryError::UnknownRun(_) => {
                    StatusCode::NOT_FOUND
                }
                RegistryError::Forbidden { .. } => StatusCode::FORBIDDEN,
                RegistryError::AlreadyFinished(_) => StatusCode::CONFLICT,
            },
        };

        (status, self.to_string()).into_response()
    }
}

/// Worker result/progress payload.
///
/// The identity fields are always required; metric fields are optional so
/// the worker can stream partial progress.
#[derive(Debug, Deserialize)]
struct CallbackPayload {
    source: String,
    build_uri: String,
    build_id: String,
    commit_sha: String,
    event_type: String,
    #[serde(default)]
    texts_total: Option<i64>,
    #[serde(default)]
    texts_passing: Option<i64>,
    #[serde(default)]
    metadata_total: Option<i64>,
    #[serde(default)]
    metadata_passing: Option<i64>,
    #[serde(default)]
    coverage: Option<f64>,
    #[serde(default)]
    nodes_count: Option<i64>,
    #[serde(default)]
    units: Option<BTreeMap<String, bool>>,
    #[serde(default)]
    words_count: Option<BTreeMap<String, i64>>,
    #[serde(default)]
    status: Option<String>,
}

/// Worker callback handler.
///
/// # Request
///
/// - Method: POST
/// - Required headers:
///   - `HookTest-Secure-X`: bare hex HMAC of the payload, keyed by the
///     repository's callback secret
///   - `HookTest-UUID`: run id echoed from the dispatch body
/// - Body: JSON result/progress payload
///
/// # Response
///
/// - 200 OK with the run's resulting state
/// - 400 Bad Request: missing header/field, bad content type, coverage out
///   of range
/// - 403 Forbidden: invalid signature
/// - 404 Not Found: unknown repository or run
pub async fn callback_handler(
    State(app_state): State<AppState>,
    Path((owner, repo_name)): Path<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, CallbackError> {
    let repo_id = RepoId::new(owner, repo_name);
    let repo = app_state
        .registry()
        .get_repo(&repo_id)
        .ok_or_else(|| CallbackError::UnknownRepository(repo_id.clone()))?;

    let signature_header = get_header(&headers, HEADER_SIGNATURE)?;
    let run_id = RunId::new(get_header(&headers, HEADER_RUN_ID)?);

    if !verify_worker_signature(&body, &signature_header, repo.secret.as_bytes()) {
        warn!(repo = %repo_id, run_id = %run_id, "invalid callback signature");
        return Err(CallbackError::InvalidSignature);
    }

    if !is_json(&headers) {
        return Err(CallbackError::UnsupportedMediaType);
    }
    let payload: CallbackPayload = serde_json::from_slice(&body)?;

    if let Some(coverage) = payload.coverage {
        if !(0.0..=100.0).contains(&coverage) {
            return Err(CallbackError::CoverageOutOfRange(coverage));
        }
    }
    let status = payload
        .status
        .as_deref()
        .map(|raw| RunState::parse(raw).ok_or_else(|| CallbackError::UnknownStatus(raw.into())))
        .transpose()?;

    debug!(
        repo = %repo_id,
        run_id = %run_id,
        source = %payload.source,
        event_type = %payload.event_type,
        "worker callback received"
    );

    let update = WorkerUpdate {
        build_id: Some(payload.build_id),
        build_uri: Some(payload.build_uri),
        sha: Some(Sha::new(payload.commit_sha)),
        texts_total: payload.texts_total,
        texts_passing: payload.texts_passing,
        metadata_total: payload.metadata_total,
        metadata_passing: payload.metadata_passing,
        coverage: payload.coverage,
        nodes_count: payload.nodes_count,
        units: payload.units,
        words: payload.words_count,
        status,
    };
    let outcome = app_state
        .registry()
        .apply_worker_update(&repo_id, &run_id, update)?;

    if outcome.terminal {
        info!(repo = %repo_id, run_id = %run_id, state = ?outcome.run.state, "run finished");
    }

    // Persist-then-notify: the run is committed above, and a failed comment
    // post is logged but never surfaced as a callback error.
    if let Some(diff) = &outcome.diff {
        if !diff.is_empty() && outcome.run.comment_url.is_none() {
            match app_state.notifier().notify(&outcome.run, diff).await {
                Ok(comment_url) => {
                    app_state
                        .registry()
                        .set_comment_url(&repo_id, &run_id, &comment_url);
                }
                Err(err) => {
                    warn!(repo = %repo_id, run_id = %run_id, error = %err, "notify failed");
                }
            }
        }
    }

    Ok((
        StatusCode::OK,
        Json(json!({"status": outcome.run.state})),
    )
        .into_response())
}

fn is_json(headers: &HeaderMap) -> bool {
    headers
        .get(axum::http::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("application/json"))
}

fn get_header(headers: &HeaderMap, name: &'static str) -> Result<String, CallbackError> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .ok_or(CallbackError::MissingHeader(name))
}
