//! Callback secret rotation endpoint.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use serde_json::{Value, json};
use tracing::info;

use super::AppState;
use super::runs::{HEADER_ACTOR, RunsError};
use crate::types::RepoId;

/// Secret rotation handler.
///
/// Requires an `X-Actor` header naming a repository member. Replaces the
/// repository's callback secret; worker callbacks signed with the previous
/// secret are rejected from that point on.
///
/// # Response
///
/// - 200 OK with `{"secret": "<new secret>"}`
/// - 401 Unauthorized: no actor header
/// - 403 Forbidden: actor is not a member
/// - 404 Not Found: unknown repository
pub async fn secret_handler(
    State(app_state): State<AppState>,
    Path((owner, repo)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<Json<Value>, RunsError> {
    let actor = headers
        .get(HEADER_ACTOR)
        .and_then(|v| v.to_str().ok())
        .ok_or(RunsError::MissingActor)?
        .to_string();

    let repo_id = RepoId::new(owner, repo);
    let secret = app_state.registry().regenerate_secret(&repo_id, &actor)?;

    info!(repo = %repo_id, actor = %actor, "callback secret rotated");
    Ok(Json(json!({"secret": secret})))
}
