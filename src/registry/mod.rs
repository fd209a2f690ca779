//! In-memory registry of repositories and runs.
//!
//! The registry is the single writer for run state. All handlers go through
//! it; concurrent callbacks for the same run are serialized by the inner lock
//! and resolved last-write-wins on progress fields.

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use thiserror::Error;

use crate::diff::{diff_snapshots, RunDiff, Snapshot};
use crate::types::{Metrics, RepoId, Repository, Run, RunId, RunState, Sha};

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("unknown repository: {0}")]
    UnknownRepository(RepoId),
    #[error("unknown run: {0}")]
    UnknownRun(RunId),
    #[error("actor {actor} is not a member of {repo}")]
    Forbidden { actor: String, repo: RepoId },
    #[error("run {0} already finished")]
    AlreadyFinished(RunId),
}

/// Fields a worker callback may carry. All optional fields are merged
/// last-write-wins; `units` plus `coverage` marks the update as terminal.
#[derive(Debug, Clone, Default)]
pub struct WorkerUpdate {
    pub build_id: Option<String>,
    pub build_uri: Option<String>,
    pub sha: Option<Sha>,
    pub texts_total: Option<i64>,
    pub texts_passing: Option<i64>,
    pub metadata_total: Option<i64>,
    pub metadata_passing: Option<i64>,
    pub coverage: Option<f64>,
    pub nodes_count: Option<i64>,
    pub units: Option<BTreeMap<String, bool>>,
    pub words: Option<BTreeMap<String, i64>>,
    /// Explicit state reported by the worker; wins over the derived
    /// pass/fail outcome when present.
    pub status: Option<RunState>,
}

impl WorkerUpdate {
    /// A terminal update carries the full unit map and the final coverage.
    pub fn is_terminal(&self) -> bool {
        self.units.is_some() && self.coverage.is_some()
    }
}

/// Result of applying a worker update.
#[derive(Debug, Clone)]
pub struct ApplyOutcome {
    pub run: Run,
    /// `None` for non-terminal updates and for the first-ever run of a
    /// repository (nothing to compare against).
    pub diff: Option<RunDiff>,
    pub terminal: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct RunKey {
    repo: RepoId,
    source: String,
    id: RunId,
}

#[derive(Debug)]
struct StoredRun {
    run: Run,
    /// Monotonic insertion counter; orders baseline candidates.
    seq: u64,
}

#[derive(Default)]
struct Inner {
    repos: HashMap<RepoId, Repository>,
    runs: HashMap<RunKey, StoredRun>,
    next_seq: u64,
}

/// Registry of all repositories and runs known to the service.
#[derive(Default)]
pub struct RunRegistry {
    inner: RwLock<Inner>,
}

impl RunRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the repository, creating it with defaults on first reference.
    pub fn find_or_create_repo(&self, id: &RepoId) -> Repository {
        let mut inner = self.write();
        inner
            .repos
            .entry(id.clone())
            .or_insert_with(|| Repository::new(id.clone()))
            .clone()
    }

    pub fn get_repo(&self, id: &RepoId) -> Option<Repository> {
        self.read().repos.get(id).cloned()
    }

    /// Test/bootstrap hook for seeding a fully-formed repository record.
    pub fn upsert_repo(&self, repo: Repository) {
        self.write().repos.insert(repo.id.clone(), repo);
    }

    /// Rotates the repository's callback secret. Requires membership.
    pub fn regenerate_secret(&self, id: &RepoId, actor: &str) -> Result<String, RegistryError> {
        let mut inner = self.write();
        let repo = inner
            .repos
            .get_mut(id)
            .ok_or_else(|| RegistryError::UnknownRepository(id.clone()))?;
        if !repo.is_member(actor) {
            return Err(RegistryError::Forbidden {
                actor: actor.to_string(),
                repo: id.clone(),
            });
        }
        Ok(repo.rotate_secret())
    }

    /// Looks up a run by identity key, inserting `candidate` if absent.
    ///
    /// Returns the stored run and whether it was created by this call. A
    /// second call with the same (repository, source, run id) returns the
    /// existing record untouched.
    pub fn get_or_create_run(&self, candidate: Run) -> (Run, bool) {
        let key = RunKey {
            repo: candidate.repo.clone(),
            source: candidate.source.clone(),
            id: candidate.id.clone(),
        };
        let mut inner = self.write();
        if let Some(existing) = inner.runs.get(&key) {
            return (existing.run.clone(), false);
        }
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.runs.insert(
            key,
            StoredRun {
                run: candidate.clone(),
                seq,
            },
        );
        (candidate, true)
    }

    /// Records the worker's job id after a successful dispatch.
    pub fn record_dispatched(&self, repo: &RepoId, run_id: &RunId, job_id: &str) {
        let mut inner = self.write();
        if let Some(stored) = find_mut(&mut inner, repo, run_id) {
            stored.run.job_id = Some(job_id.to_string());
        }
    }

    /// Finds a dispatched, non-terminal run for the same change, used to
    /// drop duplicate webhook deliveries without re-dispatching.
    ///
    /// A run whose dispatch failed never recorded a job id and must not
    /// suppress a retry, so only runs the worker acknowledged count.
    pub fn find_active_run(&self, repo: &RepoId, source: &str, sha: &Sha) -> Option<Run> {
        let inner = self.read();
        inner
            .runs
            .values()
            .find(|s| {
                &s.run.repo == repo
                    && s.run.source == source
                    && &s.run.sha == sha
                    && s.run.job_id.is_some()
                    && !s.run.state.is_terminal()
            })
            .map(|s| s.run.clone())
    }

    pub fn find_run(&self, repo: &RepoId, run_id: &RunId) -> Option<Run> {
        let inner = self.read();
        inner
            .runs
            .values()
            .find(|s| &s.run.repo == repo && &s.run.id == run_id)
            .map(|s| s.run.clone())
    }

    /// Merges a worker callback into the run record.
    ///
    /// Progress fields are overwritten last-write-wins. A terminal update
    /// additionally computes the diff against the repository baseline before
    /// this run's own snapshot is persisted, then applies the baseline
    /// replace semantics: unit maps are retained only for baseline-branch
    /// runs and replace the previous baseline's, while word counts are kept
    /// for every run that supplies them.
    pub fn apply_worker_update(
        &self,
        repo_id: &RepoId,
        run_id: &RunId,
        update: WorkerUpdate,
    ) -> Result<ApplyOutcome, RegistryError> {
        let mut inner = self.write();
        let baseline_branch = inner
            .repos
            .get(repo_id)
            .ok_or_else(|| RegistryError::UnknownRepository(repo_id.clone()))?
            .baseline_branch
            .clone();

        let terminal = update.is_terminal();
        let diff = if terminal {
            baseline_snapshot(&inner, repo_id, &baseline_branch, run_id)
                .map(|baseline| {
                    let current = current_snapshot(&inner, repo_id, run_id, &update);
                    diff_snapshots(&current, &baseline)
                })
        } else {
            None
        };

        let stored = find_mut(&mut inner, repo_id, run_id)
            .ok_or_else(|| RegistryError::UnknownRun(run_id.clone()))?;
        let run = &mut stored.run;

        merge_progress(run, &update);

        let next_state = if let Some(status) = update.status {
            Some(status)
        } else if terminal {
            let all_passing = update
                .units
                .as_ref()
                .is_some_and(|units| units.values().all(|&p| p));
            Some(if all_passing {
                RunState::Success
            } else {
                RunState::Failed
            })
        } else {
            None
        };
        if let Some(next) = next_state {
            // Idempotent redelivery of the same terminal state is accepted;
            // other impossible transitions are dropped, keeping the stored
            // state authoritative.
            if run.state.can_transition_to(next) || run.state == next {
                run.state = next;
            }
        }

        if terminal && run.source == baseline_branch {
            run.units = update.units.clone();
            let id = run.id.clone();
            let result = ApplyOutcome {
                run: stored.run.clone(),
                diff,
                terminal,
            };
            // Only one live unit snapshot per repository.
            for other in inner.runs.values_mut() {
                if &other.run.repo == repo_id && other.run.id != id {
                    other.run.units = None;
                }
            }
            return Ok(result);
        }

        Ok(ApplyOutcome {
            run: stored.run.clone(),
            diff,
            terminal,
        })
    }

    /// Marks a run as cancelled. Requires membership; terminal runs cannot
    /// be cancelled.
    pub fn cancel(&self, repo_id: &RepoId, run_id: &RunId, actor: &str) -> Result<Run, RegistryError> {
        let mut inner = self.write();
        let repo = inner
            .repos
            .get(repo_id)
            .ok_or_else(|| RegistryError::UnknownRepository(repo_id.clone()))?;
        if !repo.is_member(actor) {
            return Err(RegistryError::Forbidden {
                actor: actor.to_string(),
                repo: repo_id.clone(),
            });
        }
        let stored = find_mut(&mut inner, repo_id, run_id)
            .ok_or_else(|| RegistryError::UnknownRun(run_id.clone()))?;
        if stored.run.state.is_terminal() {
            return Err(RegistryError::AlreadyFinished(run_id.clone()));
        }
        stored.run.state = RunState::Error;
        stored.run.metrics = Metrics::default();
        Ok(stored.run.clone())
    }

    /// Stores the URL of the posted report comment. Also the idempotency
    /// marker: a run with a comment URL is never commented on again.
    pub fn set_comment_url(&self, repo: &RepoId, run_id: &RunId, url: &str) {
        let mut inner = self.write();
        if let Some(stored) = find_mut(&mut inner, repo, run_id) {
            stored.run.comment_url = Some(url.to_string());
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Inner> {
        match self.inner.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Inner> {
        match self.inner.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// The snapshot of the most recently created baseline-branch run, if one
/// exists, excluding the run currently being evaluated.
fn baseline_snapshot(
    inner: &Inner,
    repo_id: &RepoId,
    baseline_branch: &str,
    exclude: &RunId,
) -> Option<Snapshot> {
    let baseline = inner
        .runs
        .values()
        .filter(|s| {
            &s.run.repo == repo_id
                && s.run.source == baseline_branch
                && &s.run.id != exclude
                && s.run.units.is_some()
        })
        .max_by_key(|s| s.seq)?;
    let empty = BTreeMap::new();
    let units = baseline.run.units.as_ref().unwrap_or(&empty);
    Some(Snapshot::new(
        &baseline.run.metrics,
        units,
        baseline.run.words.as_ref(),
    ))
}

fn find_mut<'a>(inner: &'a mut Inner, repo: &RepoId, run_id: &RunId) -> Option<&'a mut StoredRun> {
    inner
        .runs
        .values_mut()
        .find(|s| &s.run.repo == repo && &s.run.id == run_id)
}

fn merge_progress(run: &mut Run, update: &WorkerUpdate) {
    if let Some(v) = &update.build_id {
        run.build_id = Some(v.clone());
    }
    if let Some(v) = &update.build_uri {
        run.build_uri = Some(v.clone());
    }
    if let Some(v) = &update.sha {
        run.sha = v.clone();
    }
    if let Some(v) = update.texts_total {
        run.metrics.texts_total = v;
    }
    if let Some(v) = update.texts_passing {
        run.metrics.texts_passing = v;
    }
    if let Some(v) = update.metadata_total {
        run.metrics.metadata_total = v;
    }
    if let Some(v) = update.metadata_passing {
        run.metrics.metadata_passing = v;
    }
    if let Some(v) = update.coverage {
        run.metrics.coverage = v;
    }
    if let Some(v) = update.nodes_count {
        run.metrics.nodes_count = v;
    }
    // Word counts are kept for every run that supplies them, terminal or not.
    if let Some(v) = &update.words {
        run.words = Some(v.clone());
    }
}

/// The current run's comparable state, built from stored progress merged
/// with the incoming terminal payload. Computed before persistence so the
/// diff works even for runs whose unit rows are never kept.
fn current_snapshot(
    inner: &Inner,
    repo_id: &RepoId,
    run_id: &RunId,
    update: &WorkerUpdate,
) -> Snapshot {
    let stored = inner
        .runs
        .values()
        .find(|s| &s.run.repo == repo_id && &s.run.id == run_id)
        .map(|s| s.run.metrics.clone())
        .unwrap_or_default();
    let metrics = Metrics {
        texts_total: update.texts_total.unwrap_or(stored.texts_total),
        texts_passing: update.texts_passing.unwrap_or(stored.texts_passing),
        metadata_total: update.metadata_total.unwrap_or(stored.metadata_total),
        metadata_passing: update.metadata_passing.unwrap_or(stored.metadata_passing),
        coverage: update.coverage.unwrap_or(stored.coverage),
        nodes_count: update.nodes_count.unwrap_or(stored.nodes_count),
    };
    let empty = BTreeMap::new();
    let units = update.units.as_ref().unwrap_or(&empty);
    Snapshot::new(&metrics, units, update.words.as_ref())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EventKind;

    fn repo_id() -> RepoId {
        RepoId::new("perseus", "canonical-latinLit")
    }

    fn make_run(registry: &RunRegistry, source: &str) -> Run {
        registry.find_or_create_repo(&repo_id());
        let run = Run::new(
            RunId::generate(),
            repo_id(),
            source,
            EventKind::Push,
            Sha::new("a".repeat(40)),
            "https://example.com/compare",
            "alice",
        );
        let (run, created) = registry.get_or_create_run(run);
        assert!(created);
        run
    }

    fn terminal_update(
        texts_passing: i64,
        coverage: f64,
        nodes_count: i64,
        units: &[(&str, bool)],
        words: &[(&str, i64)],
    ) -> WorkerUpdate {
        WorkerUpdate {
            texts_total: Some(100),
            texts_passing: Some(texts_passing),
            coverage: Some(coverage),
            nodes_count: Some(nodes_count),
            units: Some(units.iter().map(|(k, v)| (k.to_string(), *v)).collect()),
            words: Some(words.iter().map(|(k, v)| (k.to_string(), *v)).collect()),
            ..WorkerUpdate::default()
        }
    }

    #[test]
    fn get_or_create_is_idempotent() {
        let registry = RunRegistry::new();
        let run = make_run(&registry, "master");

        let duplicate = Run::new(
            run.id.clone(),
            repo_id(),
            "master",
            EventKind::Push,
            Sha::new("b".repeat(40)),
            "https://example.com/other",
            "mallory",
        );
        let (existing, created) = registry.get_or_create_run(duplicate);
        assert!(!created);
        // The original record wins.
        assert_eq!(existing.actor, "alice");
        assert_eq!(existing.sha, run.sha);
    }

    #[test]
    fn first_run_has_no_diff() {
        let registry = RunRegistry::new();
        let run = make_run(&registry, "master");

        let outcome = registry
            .apply_worker_update(
                &repo_id(),
                &run.id,
                terminal_update(95, 95.0, 1000, &[("a", true)], &[("eng", 100)]),
            )
            .unwrap();
        assert!(outcome.terminal);
        assert!(outcome.diff.is_none());
        assert_eq!(outcome.run.state, RunState::Success);
    }

    #[test]
    fn partial_update_merges_without_diff() {
        let registry = RunRegistry::new();
        let run = make_run(&registry, "master");

        let outcome = registry
            .apply_worker_update(
                &repo_id(),
                &run.id,
                WorkerUpdate {
                    build_id: Some("build-7".to_string()),
                    texts_total: Some(100),
                    status: Some(RunState::Downloading),
                    ..WorkerUpdate::default()
                },
            )
            .unwrap();
        assert!(!outcome.terminal);
        assert!(outcome.diff.is_none());
        assert_eq!(outcome.run.state, RunState::Downloading);
        assert_eq!(outcome.run.build_id.as_deref(), Some("build-7"));
        assert_eq!(outcome.run.metrics.texts_total, 100);
    }

    #[test]
    fn partial_update_keeps_word_counts() {
        let registry = RunRegistry::new();
        let run = make_run(&registry, "42");

        let outcome = registry
            .apply_worker_update(
                &repo_id(),
                &run.id,
                WorkerUpdate {
                    words: Some([("eng".to_string(), 100)].into_iter().collect()),
                    ..WorkerUpdate::default()
                },
            )
            .unwrap();
        assert!(!outcome.terminal);
        assert_eq!(
            outcome.run.words.as_ref().and_then(|w| w.get("eng")),
            Some(&100)
        );

        let stored = registry.find_run(&repo_id(), &run.id).unwrap();
        assert!(stored.words.is_some());
    }

    #[test]
    fn undispatched_run_does_not_count_as_active() {
        let registry = RunRegistry::new();
        let run = make_run(&registry, "master");

        // Dispatch never succeeded, so a redelivery must be able to retry.
        assert!(registry
            .find_active_run(&repo_id(), "master", &run.sha)
            .is_none());

        registry.record_dispatched(&repo_id(), &run.id, "job-1");
        let active = registry
            .find_active_run(&repo_id(), "master", &run.sha)
            .unwrap();
        assert_eq!(active.id, run.id);
    }

    #[test]
    fn failing_units_derive_failed_state() {
        let registry = RunRegistry::new();
        let run = make_run(&registry, "master");

        let outcome = registry
            .apply_worker_update(
                &repo_id(),
                &run.id,
                terminal_update(90, 90.0, 1000, &[("a", true), ("b", false)], &[]),
            )
            .unwrap();
        assert_eq!(outcome.run.state, RunState::Failed);
    }

    #[test]
    fn explicit_status_wins_over_derived_outcome() {
        let registry = RunRegistry::new();
        let run = make_run(&registry, "master");

        let mut update = terminal_update(100, 100.0, 1000, &[("a", true)], &[]);
        update.status = Some(RunState::Failed);
        let outcome = registry
            .apply_worker_update(&repo_id(), &run.id, update)
            .unwrap();
        assert_eq!(outcome.run.state, RunState::Failed);
    }

    #[test]
    fn end_to_end_diff_against_baseline() {
        let registry = RunRegistry::new();

        let baseline = make_run(&registry, "master");
        registry
            .apply_worker_update(
                &repo_id(),
                &baseline.id,
                terminal_update(
                    95,
                    95.0,
                    1000,
                    &[("a", true), ("b", false)],
                    &[("eng", 100)],
                ),
            )
            .unwrap();

        let feature = make_run(&registry, "42");
        let outcome = registry
            .apply_worker_update(
                &repo_id(),
                &feature.id,
                terminal_update(
                    96,
                    95.5,
                    998,
                    &[("a", true), ("b", true), ("c", false)],
                    &[("eng", 105)],
                ),
            )
            .unwrap();

        let diff = outcome.diff.unwrap();
        assert_eq!(
            diff.global.changed,
            vec![
                ("coverage".to_string(), "+0.50".to_string()),
                ("nodes_count".to_string(), "-2".to_string()),
                ("texts_passing".to_string(), "+1".to_string()),
            ]
        );
        assert_eq!(diff.units.new, vec![("c".to_string(), "New".to_string())]);
        assert_eq!(
            diff.units.changed,
            vec![("b".to_string(), "Passing".to_string())]
        );
        assert_eq!(
            diff.words.unwrap().changed,
            vec![("eng".to_string(), "+5".to_string())]
        );

        // The feature run does not overwrite the stored baseline snapshot.
        let stored_baseline = registry.find_run(&repo_id(), &baseline.id).unwrap();
        assert!(stored_baseline.units.is_some());
        let stored_feature = registry.find_run(&repo_id(), &feature.id).unwrap();
        assert!(stored_feature.units.is_none());
        // Word counts are kept for every run that supplied them.
        assert!(stored_feature.words.is_some());
    }

    #[test]
    fn second_baseline_run_replaces_unit_snapshot() {
        let registry = RunRegistry::new();

        let first = make_run(&registry, "master");
        registry
            .apply_worker_update(
                &repo_id(),
                &first.id,
                terminal_update(95, 95.0, 1000, &[("a", true)], &[("eng", 100)]),
            )
            .unwrap();

        let second = make_run(&registry, "master");
        let outcome = registry
            .apply_worker_update(
                &repo_id(),
                &second.id,
                terminal_update(96, 96.0, 1001, &[("a", true), ("b", true)], &[("eng", 101)]),
            )
            .unwrap();

        // Diffed against the first baseline before replacing it.
        let diff = outcome.diff.unwrap();
        assert_eq!(diff.units.new, vec![("b".to_string(), "New".to_string())]);

        let stored_first = registry.find_run(&repo_id(), &first.id).unwrap();
        let stored_second = registry.find_run(&repo_id(), &second.id).unwrap();
        assert!(stored_first.units.is_none(), "old snapshot must be dropped");
        assert!(stored_second.units.is_some());
        // The replaced run keeps its word counts for historical lookup.
        assert!(stored_first.words.is_some());
    }

    #[test]
    fn terminal_redelivery_is_tolerated() {
        let registry = RunRegistry::new();
        let run = make_run(&registry, "master");
        let update = terminal_update(95, 95.0, 1000, &[("a", true)], &[("eng", 100)]);

        registry
            .apply_worker_update(&repo_id(), &run.id, update.clone())
            .unwrap();
        let outcome = registry
            .apply_worker_update(&repo_id(), &run.id, update)
            .unwrap();
        assert_eq!(outcome.run.state, RunState::Success);
        assert_eq!(
            outcome.run.units.as_ref().map(|u| u.len()),
            Some(1),
            "reprocessing must not grow the snapshot"
        );
    }

    #[test]
    fn cancel_requires_membership() {
        let registry = RunRegistry::new();
        let run = make_run(&registry, "master");

        let err = registry.cancel(&repo_id(), &run.id, "mallory").unwrap_err();
        assert!(matches!(err, RegistryError::Forbidden { .. }));

        let mut repo = registry.get_repo(&repo_id()).unwrap();
        repo.members.push("alice".to_string());
        registry.upsert_repo(repo);

        let cancelled = registry.cancel(&repo_id(), &run.id, "alice").unwrap();
        assert_eq!(cancelled.state, RunState::Error);
        assert_eq!(cancelled.metrics, Metrics::default());
    }

    #[test]
    fn cancel_after_terminal_state_is_rejected() {
        let registry = RunRegistry::new();
        let run = make_run(&registry, "master");
        let mut repo = registry.get_repo(&repo_id()).unwrap();
        repo.members.push("alice".to_string());
        registry.upsert_repo(repo);

        registry
            .apply_worker_update(
                &repo_id(),
                &run.id,
                terminal_update(95, 95.0, 1000, &[("a", true)], &[]),
            )
            .unwrap();
        let err = registry.cancel(&repo_id(), &run.id, "alice").unwrap_err();
        assert!(matches!(err, RegistryError::AlreadyFinished(_)));
    }

    #[test]
    fn regenerate_secret_requires_membership() {
        let registry = RunRegistry::new();
        let mut repo = Repository::new(repo_id());
        repo.members.push("alice".to_string());
        let old_secret = repo.secret.clone();
        registry.upsert_repo(repo);

        let err = registry.regenerate_secret(&repo_id(), "mallory").unwrap_err();
        assert!(matches!(err, RegistryError::Forbidden { .. }));

        let fresh = registry.regenerate_secret(&repo_id(), "alice").unwrap();
        assert_ne!(fresh, old_secret);
        assert_eq!(registry.get_repo(&repo_id()).unwrap().secret, fresh);
    }

    #[test]
    fn unknown_repo_and_run_errors() {
        let registry = RunRegistry::new();
        let err = registry
            .apply_worker_update(&repo_id(), &RunId::new("x"), WorkerUpdate::default())
            .unwrap_err();
        assert!(matches!(err, RegistryError::UnknownRepository(_)));

        registry.find_or_create_repo(&repo_id());
        let err = registry
            .apply_worker_update(&repo_id(), &RunId::new("x"), WorkerUpdate::default())
            .unwrap_err();
        assert!(matches!(err, RegistryError::UnknownRun(_)));
    }
}
