//! IAM least-privilege audit.

use rulegate_core::event::PIPELINE_IAM_AUDIT;
use rulegate_core::{IamAuditReport, audit_iam};
use serde_json::{Value, json};
use tracing::info;

use crate::{Engine, EngineError};

impl Engine {
    pub fn iam_audit(&self, iam: &Value) -> Result<IamAuditReport, EngineError> {
        let result = if iam.is_object() {
            Ok(audit_iam(iam))
        } else {
            Err(EngineError::Input("IAM export must be a JSON object".into()))
        };
        if let Ok(report) = &result {
            info!(
                high = report.high_risk,
                medium = report.medium_risk,
                low = report.low_risk,
                "IAM audit finished"
            );
        }
        self.finish(
            PIPELINE_IAM_AUDIT,
            &result,
            |r| {
                json!({
                    "high_risk": r.high_risk,
                    "medium_risk": r.medium_risk,
                    "low_risk": r.low_risk,
                    "findings": r.details.len(),
                })
            },
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
    use rulegate_core::PipelineConfig;
    use rulegate_store::MemoryStore;

    #[test]
    fn audit_emits_risk_counts() {
        let (engine, sink) = engine_with(Arc::new(MemoryStore::new()), silent_llm(), PipelineConfig::default());
        let iam = json!({
            "users": [
                {"username": "root", "mfa_enabled": false, "privileges": "admin", "permissions": ["*"]},
                {"username": "dev", "mfa_enabled": true, "permissions": ["s3:GetObject"]}
            ],
            "groups": [{"name": "ops", "policy": "full_access", "permissions": []}]
        });
        let report = engine.iam_audit(&iam).unwrap();
        assert_eq!(report.high_risk, 1);
        assert_eq!(report.medium_risk, 3);
        assert_eq!(report.low_risk, 0);

        let events = sink.events();
        assert_eq!(events[0].pipeline, PIPELINE_IAM_AUDIT);
        assert_eq!(events[0].summary["high_risk"], 1);
        assert_eq!(events[0].summary["findings"], 4);
    }

    #[test]
    fn non_object_is_rejected() {
        let (engine, _) = engine_with(Arc::new(MemoryStore::new()), silent_llm(), PipelineConfig::default());
        assert!(matches!(engine.iam_audit(&json!("users")), Err(EngineError::Input(_))));
    }
}
