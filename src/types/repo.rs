//! Repository records.
//!
//! A repository is created on first reference (usually the first webhook
//! delivery that mentions it) and carries the per-repository rotating secret
//! used to authenticate worker callbacks.

use rand::RngCore;
use serde::{Deserialize, Serialize};

use super::ids::RepoId;

/// Number of random bytes in a callback secret (256 bits, hex-encoded).
const SECRET_BYTES: usize = 32;

/// The validation scheme forwarded to the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ValidationScheme {
    #[default]
    Tei,
    Epidoc,
}

impl ValidationScheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationScheme::Tei => "tei",
            ValidationScheme::Epidoc => "epidoc",
        }
    }
}

/// A repository known to the service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Repository {
    pub id: RepoId,

    /// Inactive repositories still exist but have their webhook deliveries
    /// ignored.
    pub active: bool,

    /// The branch whose runs form the diff baseline.
    pub baseline_branch: String,

    /// Shared secret authenticating worker callbacks for this repository.
    /// Rotated via [`Repository::rotate_secret`]; callbacks signed with a
    /// previous secret are rejected from that point on.
    pub secret: String,

    /// Logins allowed to cancel runs and rotate the secret.
    pub members: Vec<String>,

    /// Forwarded to the worker in the dispatch body.
    pub scheme: ValidationScheme,

    /// Forwarded to the worker in the dispatch body.
    pub verbose: bool,
}

impl Repository {
    /// Creates a repository with a fresh secret and the default baseline
    /// branch (`master`).
    pub fn new(id: RepoId) -> Self {
        Repository {
            id,
            active: true,
            baseline_branch: "master".to_string(),
            secret: generate_secret(),
            members: Vec::new(),
            scheme: ValidationScheme::default(),
            verbose: false,
        }
    }

    /// Returns true if `actor` may perform authorization-sensitive operations
    /// (cancel, secret rotation) on this repository.
    pub fn is_member(&self, actor: &str) -> bool {
        self.members.iter().any(|m| m == actor)
    }

    /// Replaces the callback secret with a fresh one and returns it.
    pub fn rotate_secret(&mut self) -> String {
        self.secret = generate_secret();
        self.secret.clone()
    }
}

/// Generates a high-entropy hex token for callback signing.
fn generate_secret() -> String {
    let mut bytes = [0u8; SECRET_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}
