//! Core domain types for the hook coordinator.
//!
//! This module contains all the fundamental types used throughout the
//! application, designed to encode invariants via the type system.

pub mod ids;
pub mod repo;
pub mod run;

// Re-export commonly used types at the module level
pub use ids::{RepoId, RunId, Sha};
pub use repo::{Repository, ValidationScheme};
pub use run::{EventKind, Metrics, Run, RunState};
