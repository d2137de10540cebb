//! Framework validation: retrieve a framework's rules for one configuration
//! and evaluate each predicate.

use std::collections::BTreeMap;

use rulegate_core::event::PIPELINE_VALIDATION;
use rulegate_core::validation::resource_id;
use rulegate_core::value::describe;
use rulegate_core::{Status, ValidationResult, evaluate_rule};
use rulegate_store::{Retrieval, Retrieved, retrieve};
use serde::Serialize;
use serde_json::{Value, json};
use tracing::{info, warn};

use crate::{Engine, EngineError};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationSummary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub errored: usize,
    /// Failures keyed by risk priority (`High`, `Medium`, `Low`).
    pub failed_by_priority: BTreeMap<String, usize>,
}

impl ValidationSummary {
    fn from_results(results: &[ValidationResult]) -> Self {
        let mut summary = Self {
            total: results.len(),
            ..Self::default()
        };
        for r in results {
            match r.status {
                Status::Pass => summary.passed += 1,
                Status::Fail => {
                    summary.failed += 1;
                    *summary
                        .failed_by_priority
                        .entry(r.risk_priority.as_str().to_string())
                        .or_default() += 1;
                }
                Status::Error => summary.errored += 1,
            }
        }
        summary
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationReport {
    pub framework: String,
    pub resource_id: String,
    /// `ranked` or `fallback`.
    pub retrieval: &'static str,
    /// In retrieval rank order, or `rule_id` order after a fallback.
    pub results: Vec<ValidationResult>,
    pub summary: ValidationSummary,
}

impl Engine {
    /// Validate one resource configuration against `framework`.
    ///
    /// `resource` overrides the id otherwise taken from the configuration's
    /// identity fields.
    pub async fn validate(
        &self,
        framework: &str,
        config: &Value,
        resource: Option<&str>,
    ) -> Result<ValidationReport, EngineError> {
        let result = self.run_validate(framework, config, resource).await;
        self.finish(
            PIPELINE_VALIDATION,
            &result,
            |r| {
                json!({
                    "framework": r.framework,
                    "resource_id": r.resource_id,
                    "retrieval": r.retrieval,
                    "total": r.summary.total,
                    "passed": r.summary.passed,
                    "failed": r.summary.failed,
                    "errored": r.summary.errored,
                    "failed_by_priority": r.summary.failed_by_priority,
                })
            },
            json!({"framework": framework}),
        );
        result
    }

    async fn run_validate(
        &self,
        framework: &str,
        config: &Value,
        resource: Option<&str>,
    ) -> Result<ValidationReport, EngineError> {
        let resource_id = match resource {
            Some(id) => id.to_string(),
            None => resource_id(config, &self.config.identity_fields),
        };

        let retrieved = match self.embedder.embed(&describe(config)).await {
            Ok(query) => {
                retrieve(
                    self.store.as_ref(),
                    framework,
                    &query,
                    self.config.top_n,
                    self.config.search_timeout(),
                )
                .await?
            }
            Err(e) => {
                warn!(framework, error = %e, "could not embed configuration, listing framework rules");
                Retrieved {
                    mode: Retrieval::Fallback,
                    rules: self.store.list(framework).await?,
                }
            }
        };

        let results: Vec<ValidationResult> = retrieved
            .rules
            .iter()
            .map(|rule| evaluate_rule(rule, config, &resource_id))
            .collect();
        let summary = ValidationSummary::from_results(&results);

        info!(
            framework,
            resource_id = %resource_id,
            retrieval = retrieved.mode.as_str(),
            total = summary.total,
            failed = summary.failed,
            "validation finished"
        );
        Ok(ValidationReport {
            framework: framework.to_string(),
            resource_id,
            retrieval: retrieved.mode.as_str(),
            results,
            summary,
        })
    }
}
