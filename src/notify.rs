//! Outbound report comments to the source-control provider.
//!
//! Of the provider's two reporting surfaces (commit statuses and comments),
//! comments are used exclusively: they can carry the full per-facet report
//! table, while a status is limited to a one-line description.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::diff::RunDiff;
use crate::report::{self, ReportMode};
use crate::types::{EventKind, Run};

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("provider request failed: {0}")]
    Http(#[from] reqwest::Error),
}

#[derive(Serialize)]
struct CommentBody {
    body: String,
}

#[derive(Deserialize)]
struct CommentResponse {
    html_url: String,
}

/// Client for the provider's comment API.
#[derive(Debug, Clone)]
pub struct Notifier {
    http: reqwest::Client,
    api_base: String,
    token: Option<String>,
    /// Base URL of this service's own run detail pages, used for the
    /// permalink appended to every report.
    public_base: String,
}

impl Notifier {
    pub fn new(
        api_base: String,
        token: Option<String>,
        public_base: String,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Notifier {
            http,
            api_base,
            token,
            public_base,
        })
    }

    /// Posts the rendered diff as a comment on the triggering change and
    /// returns the comment's URL.
    ///
    /// Push runs get a commit comment keyed by the run's sha; pull request
    /// runs get an issue comment keyed by the PR number stored in
    /// `run.source`.
    pub async fn notify(&self, run: &Run, diff: &RunDiff) -> Result<String, NotifyError> {
        let body = self.comment_body(run, diff);
        let url = self.comment_endpoint(run);

        let mut request = self.http.post(&url).json(&CommentBody { body });
        if let Some(token) = &self.token {
            request = request.header(reqwest::header::AUTHORIZATION, format!("token {token}"));
        }
        let response: CommentResponse = request
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(response.html_url)
    }

    fn comment_endpoint(&self, run: &Run) -> String {
        let repo = &run.repo;
        match run.event {
            EventKind::Push => format!(
                "{}/repos/{}/{}/commits/{}/comments",
                self.api_base, repo.owner, repo.name, run.sha
            ),
            EventKind::PullRequest => format!(
                "{}/repos/{}/{}/issues/{}/comments",
                self.api_base, repo.owner, repo.name, run.source
            ),
        }
    }

    fn comment_body(&self, run: &Run, diff: &RunDiff) -> String {
        let report = report::render(diff, ReportMode::Markdown);
        let permalink = format!(
            "{}/repo/{}/{}/runs/{}",
            self.public_base, run.repo.owner, run.repo.name, run.id
        );
        format!("{report}\n[Full report]({permalink})")
    }
}
