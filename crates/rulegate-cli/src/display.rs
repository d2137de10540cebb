//! Human-readable cards for pipeline results.
//!
//! Each report prints a `=== title ===` header followed by labelled
//! sections; empty sections are skipped.

use rulegate_core::delta::{Classification, DeltaReport};
use rulegate_core::{IamAuditReport, Rule, Status, ValidationResult};
use rulegate_engine::{IngestSummary, SeedSummary, ValidationReport};
use serde_json::Value;

const MAX_VALUE_WIDTH: usize = 60;

// ── Public API ──

pub fn print_ingest(summary: &IngestSummary) {
    println!("=== ingest {} ===", summary.doc_id);
    println!();
    println!("Summary");
    row("framework", &summary.framework);
    row("chunks", &summary.chunks_total.to_string());
    row("chunks failed", &summary.chunks_failed.to_string());
    row("rules created", &summary.rules_created.to_string());
    row("rules yielded", &summary.rule_ids.len().to_string());
    if summary.cancelled {
        row("cancelled", "yes");
    }
    println!();

    if !summary.rule_ids.is_empty() {
        println!("Rule ids");
        for id in &summary.rule_ids {
            println!("  {id}");
        }
        println!();
    }
}

pub fn print_seed(summary: &SeedSummary) {
    println!("=== seed {} ===", summary.framework);
    row("inserted", &summary.inserted.to_string());
    row("updated", &summary.updated.to_string());
    row("unchanged", &summary.unchanged.to_string());
}

pub fn print_validation(report: &ValidationReport) {
    println!("=== {} / {} ===", report.framework, report.resource_id);
    println!(
        "{} rules ({}): {} passed, {} failed, {} errored",
        report.summary.total,
        report.retrieval,
        report.summary.passed,
        report.summary.failed,
        report.summary.errored
    );
    println!();

    print_results(report, "Failed", Status::Fail);
    print_results(report, "Errors", Status::Error);
    print_results(report, "Passed", Status::Pass);
}

pub fn print_delta(report: &DeltaReport) {
    println!("=== delta: {:.1}% unchanged ===", report.pass_pct);
    row("unchanged", &report.counts.unchanged.to_string());
    row("changed", &report.counts.changed.to_string());
    row("added", &report.counts.added.to_string());
    row("removed", &report.counts.removed.to_string());
    println!();

    let changes: Vec<_> = report.changes().collect();
    if changes.is_empty() {
        return;
    }
    println!("Changes");
    for f in changes {
        let marker = match f.classification {
            Classification::Changed => "~",
            Classification::Added => "+",
            Classification::Removed => "-",
            Classification::Unchanged => " ",
        };
        println!(
            "  {marker} {:<40} {} -> {}",
            f.path,
            show(f.before.as_ref()),
            show(f.after.as_ref())
        );
    }
    println!();
}

pub fn print_iam(report: &IamAuditReport) {
    println!("=== IAM audit ===");
    row("high", &report.high_risk.to_string());
    row("medium", &report.medium_risk.to_string());
    row("low", &report.low_risk.to_string());
    println!();

    if report.details.is_empty() {
        return;
    }
    println!("Findings");
    for finding in &report.details {
        println!("  [{:<6}] {}", finding.risk.as_str(), finding.issue);
    }
    println!();
}

pub fn print_rules(rules: &[Rule]) {
    if rules.is_empty() {
        println!("(no rules)");
        return;
    }
    for rule in rules {
        println!("{} [{}] {}", rule.control_id, rule.risk_priority.as_str(), rule.description);
        row("framework", &rule.framework);
        row("rule_id", &rule.rule_id);
        row("predicate", &rule.predicate_spec.to_string());
        if !rule.source_provenance.doc_id.is_empty() {
            let range = &rule.source_provenance.char_range;
            row(
                "source",
                &format!("{} [{}..{})", rule.source_provenance.doc_id, range.start, range.end),
            );
        }
        println!();
    }
}

// ── Helpers ──

fn print_results(report: &ValidationReport, header: &str, status: Status) {
    let results: Vec<&ValidationResult> =
        report.results.iter().filter(|r| r.status == status).collect();
    if results.is_empty() {
        return;
    }
    println!("{header}");
    for r in results {
        println!(
            "  {:<16} {:<7} {}",
            r.control_id,
            r.risk_priority.as_str(),
            r.reason.as_str()
        );
        if let Some(evidence) = &r.evidence {
            println!("  {:<16} evidence: {}", "", show(Some(evidence)));
        }
        if let Some(fix) = &r.remediation_suggestion {
            for line in fix.lines() {
                println!("  {:<16} | {line}", "");
            }
        }
    }
    println!();
}

fn row(label: &str, value: &str) {
    println!("  {label:<26} {value}");
}

fn show(v: Option<&Value>) -> String {
    let Some(v) = v else {
        return "(none)".into();
    };
    let s = v.to_string();
    if s.chars().count() > MAX_VALUE_WIDTH {
        let cut: String = s.chars().take(MAX_VALUE_WIDTH - 3).collect();
        format!("{cut}...")
    } else {
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn show_truncates_long_values() {
        assert_eq!(show(None), "(none)");
        assert_eq!(show(Some(&json!(true))), "true");
        let long = json!("x".repeat(200));
        let shown = show(Some(&long));
        assert_eq!(shown.chars().count(), MAX_VALUE_WIDTH);
        assert!(shown.ends_with("..."));
    }
}
