//! CLI output formatting.
//!
//! Hook scripts print nothing on success, so everything here is for the
//! operator running `commitgen` by hand or reading a cron mail.
//!
//! # Output Format
//!
//! ## Classify
//!
//! ```text
//! Changes (3)
//!     D  /old/x.txt
//!     A  /new/
//!     _U /dir/
//! ```
//!
//! ## Drain
//!
//! ```text
//! Regenerated 3 artifacts
//!     /index.html
//!     /a.html
//!     /index.html (#2)
//! Failed
//!     /bad.html: Hook failed: broken template
//! ```
//!
//! ## Post-commit / Update-all
//!
//! ```text
//! Recovered queue
//!     Regenerated 1 artifact
//!         /stale.html
//! Changes (2)
//!     A  /a.txt
//!     A  /d/
//! Regenerated 1 artifact
//!     /index.html
//!
//! Applied 2 changes, regenerated 1 artifact, 0 failures
//! ```
//!
//! # Architecture
//!
//! Each report has a `format_*` function (returns `Vec<String>`) for
//! testability and a `print_*` wrapper that writes to stdout. Format
//! functions are pure: no I/O, no side effects.

use crate::change::{ChangeRecord, Status};
use crate::commit::CommitReport;
use crate::engine::DrainReport;

// ============================================================================
// Helpers
// ============================================================================

/// Return indentation string: 4 spaces per depth level.
fn indent(depth: usize) -> String {
    "    ".repeat(depth)
}

/// `1 artifact`, `2 artifacts`.
fn plural(n: usize, noun: &str) -> String {
    if n == 1 {
        format!("{n} {noun}")
    } else {
        format!("{n} {noun}s")
    }
}

/// Listing-style line for one change. An unchanged content column is
/// shown as `_` when only properties changed, like the repository does.
fn change_line(record: &ChangeRecord) -> String {
    let line = record.to_string();
    if record.content == Status::Unchanged && record.props != Status::Unchanged {
        format!("_{}", &line[1..])
    } else {
        line
    }
}

fn push_failures(lines: &mut Vec<String>, failures: &[(String, String)], depth: usize) {
    if failures.is_empty() {
        return;
    }
    lines.push(format!("{}Failed", indent(depth)));
    for (path, message) in failures {
        lines.push(format!("{}{path}: {message}", indent(depth + 1)));
    }
}

// ============================================================================
// Classify
// ============================================================================

/// Format classified change records.
pub fn format_changes(records: &[ChangeRecord]) -> Vec<String> {
    let mut lines = vec![format!("Changes ({})", records.len())];
    lines.extend(
        records
            .iter()
            .map(|r| format!("{}{}", indent(1), change_line(r))),
    );
    lines
}

/// Print classified change records to stdout.
pub fn print_changes(records: &[ChangeRecord]) {
    for line in format_changes(records) {
        println!("{}", line);
    }
}

// ============================================================================
// Drain
// ============================================================================

fn drain_lines(report: &DrainReport, depth: usize) -> Vec<String> {
    let mut lines = Vec::new();
    if report.processed.is_empty() {
        lines.push(format!("{}Queue empty", indent(depth)));
        return lines;
    }
    lines.push(format!(
        "{}Regenerated {}",
        indent(depth),
        plural(report.processed.len(), "artifact")
    ));
    for (path, count) in &report.processed {
        match count {
            1 => lines.push(format!("{}{path}", indent(depth + 1))),
            n => lines.push(format!("{}{path} (#{n})", indent(depth + 1))),
        }
    }
    push_failures(&mut lines, &report.failures, depth);
    lines
}

/// Format the result of draining the regeneration queue.
pub fn format_drain_report(report: &DrainReport) -> Vec<String> {
    drain_lines(report, 0)
}

/// Print a drain report to stdout.
pub fn print_drain_report(report: &DrainReport) {
    for line in format_drain_report(report) {
        println!("{}", line);
    }
}

// ============================================================================
// Post-commit / Update-all
// ============================================================================

/// Format a post-commit or update-all run.
pub fn format_commit_report(report: &CommitReport) -> Vec<String> {
    let mut lines = Vec::new();
    if let Some(recovered) = &report.recovered {
        lines.push("Recovered queue".to_string());
        lines.extend(drain_lines(recovered, 1));
    }
    lines.extend(format_changes(&report.changes));
    push_failures(&mut lines, &report.failures, 0);
    lines.extend(drain_lines(&report.drain, 0));

    let failures = report.failures.len() + report.drain.failures.len();
    lines.push(String::new());
    lines.push(format!(
        "Applied {}, regenerated {}, {}",
        plural(report.changes.len(), "change"),
        plural(report.drain.processed.len(), "artifact"),
        plural(failures, "failure")
    ));
    lines
}

/// Print a commit report to stdout.
pub fn print_commit_report(report: &CommitReport) {
    for line in format_commit_report(report) {
        println!("{}", line);
    }
}

// ============================================================================
// Tests
// ============================================================================
