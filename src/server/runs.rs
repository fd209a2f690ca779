//! Run inspection and cancellation endpoints.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;
use tracing::info;

use super::AppState;
use crate::registry::RegistryError;
use crate::types::{RepoId, Run, RunId};

/// Header naming the user performing an authorization-sensitive request.
pub(super) const HEADER_ACTOR: &str = "x-actor";

#[derive(Debug, Error)]
pub enum RunsError {
    /// No `X-Actor` header on a request that needs one.
    #[error("missing actor header")]
    MissingActor,

    #[error("run not found: {0}")]
    NotFound(RunId),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

impl IntoResponse for RunsError {
    fn into_response(self) -> Response {
        let status = match &self {
            RunsError::MissingActor => StatusCode::UNAUTHORIZED,
            RunsError::NotFound(_) => StatusCode::NOT_FOUND,
            RunsError::Registry(err) => match err {
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

/// Run inspection handler.
///
/// Returns the current run record as JSON, for debugging and monitoring.
pub async fn run_handler(
    State(app_state): State<AppState>,
    Path((owner, repo, run_id)): Path<(String, String, String)>,
) -> Result<Json<Run>, RunsError> {
    let repo_id = RepoId::new(owner, repo);
    let run_id = RunId::new(run_id);
    let run = app_state
        .registry()
        .find_run(&repo_id, &run_id)
        .ok_or(RunsError::NotFound(run_id))?;
    Ok(Json(run))
}

/// Run cancellation handler.
///
/// Requires an `X-Actor` header naming a repository member. Marks the run
/// errored locally and best-effort signals the worker; the worker is not
/// guaranteed to stop.
///
/// # Response
///
/// - 200 OK: run cancelled
/// - 401 Unauthorized: no actor header
/// - 403 Forbidden: actor is not a member
/// - 404 Not Found: unknown repository or run
/// - 409 Conflict: run already finished
pub async fn cancel_handler(
    State(app_state): State<AppState>,
    Path((owner, repo, run_id)): Path<(String, String, String)>,
    headers: HeaderMap,
) -> Result<Response, RunsError> {
    let actor = headers
        .get(HEADER_ACTOR)
        .and_then(|v| v.to_str().ok())
        .ok_or(RunsError::MissingActor)?
        .to_string();

    let repo_id = RepoId::new(owner, repo);
    let run_id = RunId::new(run_id);
    let run = app_state.registry().cancel(&repo_id, &run_id, &actor)?;

    info!(repo = %repo_id, run_id = %run_id, actor = %actor, "run cancelled");
    app_state.dispatch().cancel(&run.id).await;

    Ok((StatusCode::OK, Json(json!({"status": run.state}))).into_response())
}
