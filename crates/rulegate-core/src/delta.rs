//! Field-level delta scoring between two configuration snapshots.
//!
//! `compare` is a pure function: both snapshots are flattened into ordered
//! `path → value` maps, so the report never depends on key insertion order.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::value::{flatten, json_eq};

/// Score reported when neither snapshot has any fields.
///
/// Nothing changed and nothing is missing, so the pair counts as fully
/// compliant.
pub const EMPTY_PASS_PCT: f64 = 100.0;

/// How one path differs between `pre` and `post`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Classification {
    Unchanged,
    Changed,
    Added,
    Removed,
}

/// One entry of a delta report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDelta {
    pub path: String,
    pub before: Option<Value>,
    pub after: Option<Value>,
    pub classification: Classification,
}

/// Number of fields in each classification.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeltaCounts {
    pub unchanged: usize,
    pub changed: usize,
    pub added: usize,
    pub removed: usize,
}

impl DeltaCounts {
    pub fn total(&self) -> usize {
        self.unchanged + self.changed + self.added + self.removed
    }
}

/// Field-by-field comparison of two snapshots with a derived score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeltaReport {
    pub fields: Vec<FieldDelta>,
    /// Percentage of union fields left unchanged, rounded to one decimal.
    pub pass_pct: f64,
    pub counts: DeltaCounts,
}

impl DeltaReport {
    /// Entries that are not `unchanged`.
    pub fn changes(&self) -> impl Iterator<Item = &FieldDelta> {
        self.fields
            .iter()
            .filter(|f| f.classification != Classification::Unchanged)
    }
}

/// Compare a pre-remediation snapshot with a post-remediation one.
pub fn compare(pre: &Map<String, Value>, post: &Map<String, Value>) -> DeltaReport {
    let mut before = flatten(pre);
    let mut after = flatten(post);

    let mut paths: Vec<String> = before.keys().chain(after.keys()).cloned().collect();
    paths.sort();
    paths.dedup();

    let mut counts = DeltaCounts::default();
    let fields: Vec<FieldDelta> = paths
        .into_iter()
        .map(|path| {
            let b = before.remove(&path);
            let a = after.remove(&path);
            let classification = match (&b, &a) {
                (Some(x), Some(y)) if json_eq(x, y) => Classification::Unchanged,
                (Some(_), Some(_)) => Classification::Changed,
                (None, Some(_)) => Classification::Added,
                (Some(_), None) => Classification::Removed,
                (None, None) => unreachable!("path comes from one of the two snapshots"),
            };
            match classification {
                Classification::Unchanged => counts.unchanged += 1,
                Classification::Changed => counts.changed += 1,
                Classification::Added => counts.added += 1,
                Classification::Removed => counts.removed += 1,
            }
            FieldDelta {
                path,
                before: b,
                after: a,
                classification,
            }
        })
        .collect();

    DeltaReport {
        pass_pct: pass_pct(&counts),
        fields,
        counts,
    }
}

fn pass_pct(counts: &DeltaCounts) -> f64 {
    let total = counts.total();
    if total == 0 {
        return EMPTY_PASS_PCT;
    }
    let pct = 100.0 * counts.unchanged as f64 / total as f64;
    (pct * 10.0).round() / 10.0
}
