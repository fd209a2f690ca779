//! Inbound webhook handling: signature verification and event payloads.

pub mod events;
pub mod signature;

pub use events::{PullRequestEvent, PushEvent, RunTrigger};
pub use signature::{verify_provider_signature, verify_worker_signature};
