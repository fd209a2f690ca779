//! Run records and the run state machine.
//!
//! A run is one execution attempt of the validation suite against a specific
//! commit/branch/PR. Its identity key is (repository, source, run id) and
//! creation is idempotent on that key.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::ids::{RepoId, RunId, Sha};

/// The kind of provider event that triggered a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Push,
    PullRequest,
}

/// Lifecycle state of a run.
///
/// ```text
/// queued -> downloading -> pending -> { success | failed | error }
/// ```
///
/// `error` is also reachable directly via explicit cancellation from any
/// non-terminal state. All of `success`, `failed`, `error` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Queued,
    Downloading,
    Pending,
    Success,
    Failed,
    Error,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Success | RunState::Failed | RunState::Error)
    }

    /// Returns true if the state machine permits moving from `self` to `next`.
    pub fn can_transition_to(&self, next: RunState) -> bool {
        use RunState::*;
        match (self, next) {
            // Cancellation from any non-terminal state.
            (s, Error) if !s.is_terminal() => true,
            (Queued, Downloading) => true,
            (Downloading, Pending) => true,
            // Workers may skip the download phase notification entirely.
            (Queued, Pending) => true,
            (Pending, Success) | (Pending, Failed) => true,
            // Terminal result may arrive without intermediate progress.
            (Queued, Success) | (Queued, Failed) => true,
            (Downloading, Success) | (Downloading, Failed) => true,
            _ => false,
        }
    }

    pub fn parse(s: &str) -> Option<RunState> {
        match s {
            "queued" => Some(RunState::Queued),
            "downloading" => Some(RunState::Downloading),
            "pending" => Some(RunState::Pending),
            "success" => Some(RunState::Success),
            "failed" => Some(RunState::Failed),
            "error" => Some(RunState::Error),
            _ => None,
        }
    }
}

/// Aggregate metrics reported by the worker for a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    pub texts_total: i64,
    pub texts_passing: i64,
    pub metadata_total: i64,
    pub metadata_passing: i64,
    /// Percentage in [0, 100].
    pub coverage: f64,
    pub nodes_count: i64,
}

/// One execution attempt of the validation suite.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub id: RunId,
    pub repo: RepoId,

    /// Branch name, or PR number rendered as a string.
    pub source: String,

    pub created_at: DateTime<Utc>,
    pub state: RunState,
    pub event: EventKind,

    pub sha: Sha,
    /// Link back to the triggering change (compare URL or PR URL).
    pub link: String,
    pub actor: String,
    pub avatar_url: String,

    /// Identifier/URI of the external build, filled in by the worker.
    pub build_id: Option<String>,
    pub build_uri: Option<String>,

    /// Job id returned by the worker on dispatch.
    pub job_id: Option<String>,

    /// URL of the outbound report comment, once posted. Also serves as the
    /// idempotency marker for notification.
    pub comment_url: Option<String>,

    pub metrics: Metrics,

    /// Per-document pass/fail map. Persisted only while this run is the
    /// repository's baseline snapshot.
    pub units: Option<BTreeMap<String, bool>>,

    /// Per-language word counts. Persisted for every run that supplies them.
    pub words: Option<BTreeMap<String, i64>>,
}

impl Run {
    pub fn new(
        id: RunId,
        repo: RepoId,
        source: impl Into<String>,
        event: EventKind,
        sha: Sha,
        link: impl Into<String>,
        actor: impl Into<String>,
    ) -> Self {
        let actor = actor.into();
        let avatar_url = format!("https://avatars.githubusercontent.com/{actor}");
        Run {
            id,
            repo,
            source: source.into(),
            created_at: Utc::now(),
            state: RunState::Queued,
            event,
            sha,
            link: link.into(),
            actor,
            avatar_url,
            build_id: None,
            build_uri: None,
            job_id: None,
            comment_url: None,
            metrics: Metrics::default(),
            units: None,
            words: None,
        }
    }
}
