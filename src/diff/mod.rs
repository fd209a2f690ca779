//! Three-facet structural diff between a run and its repository baseline.
//!
//! A diff compares two [`Snapshot`]s facet by facet (global metrics, per-unit
//! pass/fail, per-language word counts) and classifies every key in the union
//! as new, deleted, or changed. Float deltas inside a relative tolerance are
//! suppressed so that numeric noise does not generate report rows.

use std::collections::BTreeMap;

use crate::types::Metrics;

/// Relative tolerance under which a float delta is considered noise.
pub const REL_TOL: f64 = 1e-4;

/// A single comparable value in the global metrics facet.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MetricValue {
    Bool(bool),
    Int(i64),
    Float(f64),
}

impl MetricValue {
    /// Formats the delta label for a changed entry, or `None` when the change
    /// is within tolerance and should be suppressed.
    fn change_label(&self, baseline: &MetricValue) -> Option<String> {
        match (self, baseline) {
            (MetricValue::Bool(cur), MetricValue::Bool(_)) => Some(pass_fail_label(*cur)),
            (MetricValue::Int(cur), MetricValue::Int(base)) => Some(format!("{:+}", cur - base)),
            (MetricValue::Float(cur), MetricValue::Float(base)) => {
                let delta = cur - base;
                if delta.abs() <= REL_TOL * cur.abs().max(base.abs()) {
                    None
                } else {
                    Some(format!("{delta:+.2}"))
                }
            }
            // A key changing type is a change by definition; show the new
            // value's formatting.
            (cur, _) => Some(cur.raw_label()),
        }
    }

    fn raw_label(&self) -> String {
        match self {
            MetricValue::Bool(b) => pass_fail_label(*b),
            MetricValue::Int(i) => format!("{i:+}"),
            MetricValue::Float(f) => format!("{f:+.2}"),
        }
    }
}

fn pass_fail_label(passing: bool) -> String {
    if passing { "Passing" } else { "Failing" }.to_string()
}

/// The comparable state of a run.
///
/// Built from the worker payload for the current run and from the stored
/// baseline run for the reference side. Absent facets are empty maps, never
/// errors.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub global: BTreeMap<String, MetricValue>,
    pub units: BTreeMap<String, bool>,
    pub words: Option<BTreeMap<String, i64>>,
}

impl Snapshot {
    pub fn new(
        metrics: &Metrics,
        units: &BTreeMap<String, bool>,
        words: Option<&BTreeMap<String, i64>>,
    ) -> Self {
        let mut global = BTreeMap::new();
        global.insert("coverage".to_string(), MetricValue::Float(metrics.coverage));
        global.insert(
            "metadata_passing".to_string(),
            MetricValue::Int(metrics.metadata_passing),
        );
        global.insert(
            "metadata_total".to_string(),
            MetricValue::Int(metrics.metadata_total),
        );
        global.insert(
            "nodes_count".to_string(),
            MetricValue::Int(metrics.nodes_count),
        );
        global.insert(
            "texts_passing".to_string(),
            MetricValue::Int(metrics.texts_passing),
        );
        global.insert(
            "texts_total".to_string(),
            MetricValue::Int(metrics.texts_total),
        );
        Snapshot {
            global,
            units: units.clone(),
            words: words.cloned(),
        }
    }
}

/// Classified entries for one facet. Each list is sorted ascending by key.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FacetDiff {
    /// Keys present only in the current snapshot, labelled `"New"`.
    pub new: Vec<(String, String)>,
    /// Keys present only in the baseline, labelled `"Deleted"`.
    pub deleted: Vec<(String, String)>,
    /// Keys present in both with differing values, labelled with the delta
    /// (signed number) or pass/fail status.
    pub changed: Vec<(String, String)>,
}

impl FacetDiff {
    pub fn is_empty(&self) -> bool {
        self.new.is_empty() && self.deleted.is_empty() && self.changed.is_empty()
    }
}

/// The full diff of a run against its baseline.
///
/// `words` is present only when the current payload supplied word counts.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunDiff {
    pub global: FacetDiff,
    pub units: FacetDiff,
    pub words: Option<FacetDiff>,
}

impl RunDiff {
    pub fn is_empty(&self) -> bool {
        self.global.is_empty()
            && self.units.is_empty()
            && self.words.as_ref().is_none_or(FacetDiff::is_empty)
    }
}

/// Diffs two snapshots facet by facet.
///
/// The caller is responsible for the no-baseline case (first-ever run): when
/// there is nothing to compare against, no diff exists at all, which is
/// distinct from an empty diff.
pub fn diff_snapshots(current: &Snapshot, baseline: &Snapshot) -> RunDiff {
    let global = diff_facet(&current.global, &baseline.global, MetricValue::change_label);
    let units = diff_facet(&current.units, &baseline.units, |cur, _| {
        Some(pass_fail_label(*cur))
    });
    let words = current.words.as_ref().map(|cur_words| {
        let empty = BTreeMap::new();
        let base_words = baseline.words.as_ref().unwrap_or(&empty);
        diff_facet(cur_words, base_words, |cur, base| {
            Some(format!("{:+}", cur - base))
        })
    });
    RunDiff {
        global,
        units,
        words,
    }
}

/// Classifies the union of keys of two maps.
///
/// `change_label` decides how a changed value is rendered; returning `None`
/// suppresses the entry (used for floats within tolerance). BTreeMap
/// iteration keeps every category sorted ascending by key.
fn diff_facet<V: PartialEq>(
    current: &BTreeMap<String, V>,
    baseline: &BTreeMap<String, V>,
    change_label: impl Fn(&V, &V) -> Option<String>,
) -> FacetDiff {
    let mut diff = FacetDiff::default();
    for (key, cur) in current {
        match baseline.get(key) {
            None => diff.new.push((key.clone(), "New".to_string())),
            Some(base) if cur != base => {
                if let Some(label) = change_label(cur, base) {
                    diff.changed.push((key.clone(), label));
                }
            }
            Some(_) => {}
        }
    }
    for key in baseline.keys() {
        if !current.contains_key(key) {
            diff.deleted.push((key.clone(), "Deleted".to_string()));
        }
    }
    diff
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metrics(
        texts_total: i64,
        texts_passing: i64,
        coverage: f64,
        nodes_count: i64,
    ) -> Metrics {
        Metrics {
            texts_total,
            texts_passing,
            metadata_total: 0,
            metadata_passing: 0,
            coverage,
            nodes_count,
        }
    }

    fn units(entries: &[(&str, bool)]) -> BTreeMap<String, bool> {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), *v))
            .collect()
    }

    fn words(entries: &[(&str, i64)]) -> BTreeMap<String, i64> {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), *v))
            .collect()
    }

    #[test]
    fn float_within_relative_tolerance_is_suppressed() {
        let cur = Snapshot::new(&metrics(100, 95, 95.00005, 1000), &units(&[]), None);
        let base = Snapshot::new(&metrics(100, 95, 95.000, 1000), &units(&[]), None);
        let diff = diff_snapshots(&cur, &base);
        assert!(
            diff.global.changed.iter().all(|(k, _)| k != "coverage"),
            "{:?}",
            diff.global.changed
        );
    }

    #[test]
    fn float_outside_tolerance_is_signed_two_decimals() {
        let cur = Snapshot::new(&metrics(100, 95, 95.5, 1000), &units(&[]), None);
        let base = Snapshot::new(&metrics(100, 95, 95.0, 1000), &units(&[]), None);
        let diff = diff_snapshots(&cur, &base);
        assert_eq!(
            diff.global.changed,
            vec![("coverage".to_string(), "+0.50".to_string())]
        );
    }

    #[test]
    fn negative_deltas_carry_their_sign() {
        let cur = Snapshot::new(&metrics(100, 51, 94.99, 956), &units(&[]), None);
        let base = Snapshot::new(&metrics(100, 95, 95.0, 1000), &units(&[]), None);
        let diff = diff_snapshots(&cur, &base);
        assert_eq!(
            diff.global.changed,
            vec![
                ("coverage".to_string(), "-0.01".to_string()),
                ("nodes_count".to_string(), "-44".to_string()),
                ("texts_passing".to_string(), "-44".to_string()),
            ]
        );
    }

    #[test]
    fn unit_set_classification() {
        let cur = Snapshot::new(
            &metrics(0, 0, 0.0, 0),
            &units(&[("a.xml", true), ("b.xml", true), ("c.xml", false)]),
            None,
        );
        let base = Snapshot::new(
            &metrics(0, 0, 0.0, 0),
            &units(&[("a.xml", true), ("b.xml", false)]),
            None,
        );
        let diff = diff_snapshots(&cur, &base);
        assert_eq!(
            diff.units.new,
            vec![("c.xml".to_string(), "New".to_string())]
        );
        assert_eq!(
            diff.units.changed,
            vec![("b.xml".to_string(), "Passing".to_string())]
        );
        assert!(diff.units.deleted.is_empty());
    }

    #[test]
    fn deleted_units_are_reported() {
        let cur = Snapshot::new(&metrics(0, 0, 0.0, 0), &units(&[("a.xml", true)]), None);
        let base = Snapshot::new(
            &metrics(0, 0, 0.0, 0),
            &units(&[("a.xml", true), ("gone.xml", false)]),
            None,
        );
        let diff = diff_snapshots(&cur, &base);
        assert_eq!(
            diff.units.deleted,
            vec![("gone.xml".to_string(), "Deleted".to_string())]
        );
    }

    #[test]
    fn words_facet_absent_when_not_supplied() {
        let cur = Snapshot::new(&metrics(0, 0, 0.0, 0), &units(&[]), None);
        let base = Snapshot::new(
            &metrics(0, 0, 0.0, 0),
            &units(&[]),
            Some(&words(&[("eng", 100)])),
        );
        let diff = diff_snapshots(&cur, &base);
        assert!(diff.words.is_none());
    }

    #[test]
    fn words_diff_against_missing_baseline_facet_is_all_new() {
        let cur = Snapshot::new(
            &metrics(0, 0, 0.0, 0),
            &units(&[]),
            Some(&words(&[("eng", 100), ("lat", 50)])),
        );
        let base = Snapshot::new(&metrics(0, 0, 0.0, 0), &units(&[]), None);
        let diff = diff_snapshots(&cur, &base);
        let words_diff = diff.words.unwrap();
        assert_eq!(
            words_diff.new,
            vec![
                ("eng".to_string(), "New".to_string()),
                ("lat".to_string(), "New".to_string()),
            ]
        );
    }

    #[test]
    fn identical_snapshots_yield_empty_diff() {
        let snap = Snapshot::new(
            &metrics(100, 95, 95.0, 1000),
            &units(&[("a", true)]),
            Some(&words(&[("eng", 100)])),
        );
        let diff = diff_snapshots(&snap, &snap.clone());
        assert!(diff.is_empty());
    }

    #[test]
    fn end_to_end_scenario() {
        let base = Snapshot::new(
            &metrics(100, 95, 95.0, 1000),
            &units(&[("a", true), ("b", false)]),
            Some(&words(&[("eng", 100)])),
        );
        let cur = Snapshot::new(
            &metrics(100, 96, 95.5, 998),
            &units(&[("a", true), ("b", true), ("c", false)]),
            Some(&words(&[("eng", 105)])),
        );
        let diff = diff_snapshots(&cur, &base);

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
        assert!(diff.units.deleted.is_empty());
        assert_eq!(
            diff.words.unwrap().changed,
            vec![("eng".to_string(), "+5".to_string())]
        );
    }
}
