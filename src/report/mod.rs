//! Deterministic rendering of a run diff into a report body.
//!
//! The rendered report is posted verbatim as a provider comment, so output
//! must be byte-stable for identical input: fixed facet order, sorted rows,
//! no timestamps.

use std::fmt::Write;

use crate::diff::{FacetDiff, RunDiff};

/// Output format of the rendered report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportMode {
    Markdown,
    Html,
}

/// Renders a diff as a sequence of per-facet tables.
///
/// Facets appear in a fixed order (global metrics, word counts if supplied,
/// units); empty facets are skipped entirely. Each table lists new and
/// deleted entries first (merged and sorted by key), then changed entries.
pub fn render(diff: &RunDiff, mode: ReportMode) -> String {
    let mut out = String::new();
    render_facet(&mut out, "Global metrics", &diff.global, mode);
    if let Some(words) = &diff.words {
        render_facet(&mut out, "Word counts", words, mode);
    }
    render_facet(&mut out, "Units", &diff.units, mode);
    out
}

fn render_facet(out: &mut String, title: &str, facet: &FacetDiff, mode: ReportMode) {
    if facet.is_empty() {
        return;
    }
    let mut membership: Vec<&(String, String)> =
        facet.new.iter().chain(facet.deleted.iter()).collect();
    membership.sort_by(|a, b| a.0.cmp(&b.0));
    let rows = membership.into_iter().chain(facet.changed.iter());

    // Writing to a String cannot fail.
    match mode {
        ReportMode::Markdown => {
            let _ = writeln!(out, "## {title}\n");
            let _ = writeln!(out, "| Changed item | Status |");
            let _ = writeln!(out, "| --- | --- |");
            for (key, label) in rows {
                let _ = writeln!(out, "| {key} | {label} |");
            }
            let _ = writeln!(out);
        }
        ReportMode::Html => {
            let _ = writeln!(out, "<h3>{title}</h3>");
            let _ = writeln!(out, "<table>");
            let _ = writeln!(out, "<tr><th>Changed item</th><th>Status</th></tr>");
            for (key, label) in rows {
                let _ = writeln!(out, "<tr><td>{key}</td><td>{label}</td></tr>");
            }
            let _ = writeln!(out, "</table>");
        }
    }
}
