//! Delta analysis between a pre- and post-remediation snapshot.

use rulegate_core::event::PIPELINE_DELTA;
use rulegate_core::{DeltaReport, compare};
use serde_json::{Map, Value, json};
use tracing::info;

use crate::{Engine, EngineError};

fn as_mapping<'a>(name: &str, v: &'a Value) -> Result<&'a Map<String, Value>, EngineError> {
    v.as_object()
        .ok_or_else(|| EngineError::Input(format!("{name} snapshot must be a JSON object")))
}

fn compare_snapshots(pre: &Value, post: &Value) -> Result<DeltaReport, EngineError> {
    Ok(compare(as_mapping("pre", pre)?, as_mapping("post", post)?))
}

impl Engine {
    pub fn delta(&self, pre: &Value, post: &Value) -> Result<DeltaReport, EngineError> {
        let result = compare_snapshots(pre, post);
        if let Ok(report) = &result {
            info!(
                pass_pct = report.pass_pct,
                changed = report.counts.changed,
                added = report.counts.added,
                removed = report.counts.removed,
                "delta computed"
            );
        }
        self.finish(
            PIPELINE_DELTA,
            &result,
            |r| json!({"pass_pct": r.pass_pct, "counts": r.counts, "total": r.counts.total()}),
            json!({}),
        );
        result
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::testing::{engine_with, silent_llm};
    use rulegate_core::event::EventStatus;
    use rulegate_core::{Classification, PipelineConfig};
    use rulegate_store::MemoryStore;

    #[test]
    fn scores_remediation_progress() {
        let (engine, sink) = engine_with(Arc::new(MemoryStore::new()), silent_llm(), PipelineConfig::default());
        let report = engine
            .delta(&json!({"a": 1, "b": 2}), &json!({"a": 1, "b": 3, "c": 4}))
            .unwrap();

        assert_eq!(report.pass_pct, 33.3);
        let classes: Vec<Classification> = report.fields.iter().map(|f| f.classification).collect();
        assert_eq!(
            classes,
            vec![Classification::Unchanged, Classification::Changed, Classification::Added]
        );

        let events = sink.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].pipeline, PIPELINE_DELTA);
        assert_eq!(events[0].summary["pass_pct"], 33.3);
        assert_eq!(events[0].summary["counts"]["added"], 1);
    }

    #[test]
    fn non_object_snapshot_is_rejected() {
        let (engine, sink) = engine_with(Arc::new(MemoryStore::new()), silent_llm(), PipelineConfig::default());
        let err = engine.delta(&json!({}), &json!([1, 2])).unwrap_err();
        assert!(matches!(err, EngineError::Input(ref m) if m.contains("post")));
        assert_eq!(sink.events()[0].status, EventStatus::Error);
    }
}
