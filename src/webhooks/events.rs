//! Typed webhook event payloads.
//!
//! Only the fields we actually consume are deserialized; providers send far
//! more. Unknown event types and irrelevant pull request actions are not
//! errors, they are simply ignored by the handler.

use serde::Deserialize;

use crate::types::{EventKind, RepoId, Sha};

/// Push event payload.
#[derive(Debug, Clone, Deserialize)]
pub struct PushEvent {
    /// Full ref, e.g. `refs/heads/master`.
    #[serde(rename = "ref")]
    pub git_ref: String,
    pub compare: String,
    pub head_commit: Option<HeadCommit>,
    pub repository: EventRepository,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HeadCommit {
    pub id: String,
    pub committer: Committer,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Committer {
    pub username: Option<String>,
    pub name: Option<String>,
}

impl Committer {
    /// The login if the provider resolved one, else the plain name.
    pub fn login(&self) -> &str {
        self.username
            .as_deref()
            .or(self.name.as_deref())
            .unwrap_or("unknown")
    }
}

/// Pull request event payload.
#[derive(Debug, Clone, Deserialize)]
pub struct PullRequestEvent {
    pub action: String,
    pub number: u64,
    pub pull_request: PullRequest,
    pub repository: EventRepository,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PullRequest {
    pub html_url: String,
    pub user: User,
    pub head: PullRequestHead,
}

#[derive(Debug, Clone, Deserialize)]
pub struct User {
    pub login: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PullRequestHead {
    pub sha: String,
}

/// Repository block common to all event payloads.
#[derive(Debug, Clone, Deserialize)]
pub struct EventRepository {
    pub name: String,
    pub owner: Owner,
}

/// Push events carry `owner.name`, pull request events `owner.login`.
#[derive(Debug, Clone, Deserialize)]
pub struct Owner {
    pub login: Option<String>,
    pub name: Option<String>,
}

impl EventRepository {
    pub fn repo_id(&self) -> Option<RepoId> {
        let owner = self.owner.login.as_deref().or(self.owner.name.as_deref())?;
        Some(RepoId::new(owner, &self.name))
    }
}

/// The normalized trigger extracted from a webhook delivery.
#[derive(Debug, Clone)]
pub struct RunTrigger {
    pub repo: RepoId,
    pub event: EventKind,
    /// Branch name for pushes, PR number rendered as a string for PRs.
    pub source: String,
    pub sha: Sha,
    /// Compare URL or PR URL.
    pub link: String,
    pub actor: String,
}

/// Pull request actions that start a run. Everything else (labeled, closed,
/// edited, ...) is ignored.
const TRIGGERING_PR_ACTIONS: &[&str] = &["opened", "reopened", "synchronize"];

impl PushEvent {
    /// Converts a push delivery into a run trigger.
    ///
    /// Returns `None` for deliveries we do not act on: branch deletions have
    /// no head commit, and the repository block can be malformed.
    pub fn into_trigger(self) -> Option<RunTrigger> {
        let repo = self.repository.repo_id()?;
        let head = self.head_commit?;
        let branch = self
            .git_ref
            .strip_prefix("refs/heads/")
            .unwrap_or(&self.git_ref)
            .to_string();
        Some(RunTrigger {
            repo,
            event: EventKind::Push,
            source: branch,
            sha: Sha::new(head.id),
            link: self.compare,
            actor: head.committer.login().to_string(),
        })
    }
}

impl PullRequestEvent {
    /// Converts a pull request delivery into a run trigger, or `None` when
    /// the action is not one that starts a run.
    pub fn into_trigger(self) -> Option<RunTrigger> {
        if !TRIGGERING_PR_ACTIONS.contains(&self.action.as_str()) {
            return None;
        }
        let repo = self.repository.repo_id()?;
        Some(RunTrigger {
            repo,
            event: EventKind::PullRequest,
            source: self.number.to_string(),
            sha: Sha::new(self.pull_request.head.sha),
            link: self.pull_request.html_url,
            actor: self.pull_request.user.login,
        })
    }
}
