//! Hook coordinator - CI check coordination for document repositories.
//!
//! This library receives provider webhooks and worker callbacks, tracks run
//! lifecycles, diffs results against each repository's baseline, and reports
//! outcome changes back to the provider.

pub mod config;
pub mod diff;
pub mod dispatch;
pub mod notify;
pub mod registry;
pub mod report;
pub mod server;
pub mod types;
pub mod webhooks;
