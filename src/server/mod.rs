//! HTTP server for the hook coordinator.
//!
//! This module implements the HTTP surface that:
//! - Accepts provider webhooks, validates signatures, and dispatches runs
//! - Accepts worker callbacks carrying run progress and results
//! - Exposes run inspection, cancellation, and secret rotation
//! - Provides health checks for liveness probes
//!
//! # Endpoints
//!
//! - `POST /webhook` - Provider webhook deliveries
//! - `POST /callback/{owner}/{repo}` - Worker progress/result callbacks
//! - `GET /api/v1/repos/{owner}/{repo}/runs/{run_id}` - Run state as JSON
//! - `DELETE /api/v1/repos/{owner}/{repo}/runs/{run_id}` - Cancel a run
//! - `POST /api/v1/repos/{owner}/{repo}/secret` - Rotate the callback secret
//! - `GET /health` - Returns 200 if server is running

use std::sync::Arc;

use crate::dispatch::DispatchClient;
use crate::notify::Notifier;
use crate::registry::RunRegistry;
use crate::types::RepoId;

pub mod callback;
pub mod health;
pub mod runs;
pub mod secret;
pub mod webhook;

pub use callback::callback_handler;
pub use health::health_handler;
pub use runs::{cancel_handler, run_handler};
pub use secret::secret_handler;
pub use webhook::webhook_handler;

/// Shared application state.
///
/// This is passed to all handlers via Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    registry: RunRegistry,

    /// Client for the test-execution worker.
    dispatch: DispatchClient,

    /// Client for the provider's comment API.
    notifier: Notifier,

    /// Static secret for provider webhook signature verification.
    webhook_secret: Vec<u8>,

    /// Public base URL of this service, used to build the callback URL
    /// handed to the worker.
    public_base: String,
}

impl AppState {
    pub fn new(
        registry: RunRegistry,
        dispatch: DispatchClient,
        notifier: Notifier,
        webhook_secret: impl Into<Vec<u8>>,
        public_base: impl Into<String>,
    ) -> Self {
        AppState {
            inner: Arc::new(AppStateInner {
                registry,
                dispatch,
                notifier,
                webhook_secret: webhook_secret.into(),
                public_base: public_base.into(),
            }),
        }
    }

    pub fn registry(&self) -> &RunRegistry {
        &self.inner.registry
    }

    pub fn dispatch(&self) -> &DispatchClient {
        &self.inner.dispatch
    }

    pub fn notifier(&self) -> &Notifier {
        &self.inner.notifier
    }

    pub fn webhook_secret(&self) -> &[u8] {
        &self.inner.webhook_secret
    }

    /// The callback URL the worker should post results to for this
    /// repository.
    pub fn callback_url(&self, repo: &RepoId) -> String {
        format!(
            "{}/callback/{}/{}",
            self.inner.public_base, repo.owner, repo.name
        )
    }
}

/// Builds the axum Router with all endpoints.
pub fn build_router(app_state: AppState) -> axum::Router {
    use axum::routing::{get, post};

    axum::Router::new()
        .route("/webhook", post(webhook_handler))
        .route("/callback/{owner}/{repo}", post(callback_handler))
        .route(
            "/api/v1/repos/{owner}/{repo}/runs/{run_id}",
            get(run_handler).delete(cancel_handler),
        )
        .route("/api/v1/repos/{owner}/{repo}/secret", post(secret_handler))
        .route("/health", get(health_handler))
        .with_state(app_state)
}
