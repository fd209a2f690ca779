//! Outbound client for the test-execution worker.
//!
//! Submission bodies are signed with the target repository's callback secret
//! using the worker signature scheme, so the worker can authenticate us the
//! same way we authenticate its callbacks.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::types::{Repository, Run, RunId};
use crate::webhooks::signature;

/// Header carrying the HMAC of the request body.
pub const SIGNATURE_HEADER: &str = "HookTest-Secure-X";

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("worker request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("failed to serialize dispatch body: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("worker rejected run {run_id}: status {status:?}")]
    Rejected { run_id: RunId, status: String },
}

#[derive(Serialize)]
struct SubmitBody<'a> {
    repository_full_name: String,
    callback_url: &'a str,
    verbose_flag: bool,
    run_id: &'a RunId,
    validation_scheme: &'a str,
    source: &'a str,
}

#[derive(Deserialize)]
struct SubmitResponse {
    status: String,
    job_id: Option<String>,
}

/// HTTP client for the worker endpoint.
#[derive(Debug, Clone)]
pub struct DispatchClient {
    http: reqwest::Client,
    endpoint: String,
}

impl DispatchClient {
    pub fn new(endpoint: String, timeout: Duration) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(DispatchClient { http, endpoint })
    }

    /// Submits a run to the worker.
    ///
    /// The worker acknowledges with `{status: "queued", job_id}`. Any other
    /// status is a rejection; the caller must leave the run unchanged.
    pub async fn submit(
        &self,
        repo: &Repository,
        run: &Run,
        callback_url: &str,
    ) -> Result<String, DispatchError> {
        let body = serde_json::to_vec(&SubmitBody {
            repository_full_name: repo.id.full_name(),
            callback_url,
            verbose_flag: repo.verbose,
            run_id: &run.id,
            validation_scheme: repo.scheme.as_str(),
            source: &run.source,
        })?;
        let sig = signature::format_worker_header(&signature::compute_signature(
            &body,
            repo.secret.as_bytes(),
        ));

        let response = self
            .http
            .put(&self.endpoint)
            .header(SIGNATURE_HEADER, sig)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await?
            .error_for_status()?;
        let ack: SubmitResponse = response.json().await?;

        if ack.status != "queued" {
            return Err(DispatchError::Rejected {
                run_id: run.id.clone(),
                status: ack.status,
            });
        }
        ack.job_id.ok_or(DispatchError::Rejected {
            run_id: run.id.clone(),
            status: "queued without job_id".to_string(),
        })
    }

    /// Asks the worker to stop a run. Fire-and-forget: the local registry is
    /// updated regardless, and the worker is not guaranteed to halt.
    pub async fn cancel(&self, run_id: &RunId) {
        let url = format!("{}/{}", self.endpoint, run_id);
        if let Err(err) = self.http.delete(&url).send().await {
            warn!(%run_id, error = %err, "worker cancel request failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{RepoId, Sha};
    use crate::types::{EventKind, Run};

    #[test]
    fn submit_body_wire_format() {
        let repo = Repository::new(RepoId::new("perseus", "latinLit"));
        let run = Run::new(
            RunId::new("run-1"),
            repo.id.clone(),
            "master",
            EventKind::Push,
            Sha::new("a".repeat(40)),
            "https://example.com/compare",
            "alice",
        );
        let body = SubmitBody {
            repository_full_name: repo.id.full_name(),
            callback_url: "https://hook.example/callback/perseus/latinLit",
            verbose_flag: repo.verbose,
            run_id: &run.id,
            validation_scheme: repo.scheme.as_str(),
            source: &run.source,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["repository_full_name"], "perseus/latinLit");
        assert_eq!(json["run_id"], "run-1");
        assert_eq!(json["validation_scheme"], "tei");
        assert_eq!(json["source"], "master");
        assert_eq!(json["verbose_flag"], false);
    }

    #[test]
    fn queued_ack_parses() {
        let ack: SubmitResponse =
            serde_json::from_str(r#"{"status": "queued", "job_id": "77"}"#).unwrap();
        assert_eq!(ack.status, "queued");
        assert_eq!(ack.job_id.as_deref(), Some("77"));
    }

    #[test]
    fn rejection_ack_parses_without_job_id() {
        let ack: SubmitResponse = serde_json::from_str(r#"{"status": "overloaded"}"#).unwrap();
        assert_eq!(ack.status, "overloaded");
        assert!(ack.job_id.is_none());
    }
}
