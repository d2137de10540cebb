//! Evaluating a rule against one resource and rendering its remediation.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::predicate::{Reason, Status};
use crate::rule::{RiskPriority, Rule};
use crate::value::resolve_path;

/// Fields consulted, in order, to identify a resource.
pub const DEFAULT_IDENTITY_FIELDS: &[&str] = &["resource_id", "id", "arn", "name"];

/// Resource id used when no identity field is present.
pub const UNKNOWN_RESOURCE: &str = "unknown";

/// Outcome of evaluating exactly one rule against exactly one resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub rule_id: String,
    pub control_id: String,
    pub resource_id: String,
    pub status: Status,
    pub reason: Reason,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evidence: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remediation_suggestion: Option<String>,
    pub risk_priority: RiskPriority,
}

/// Evaluate `rule` against `config`, containing predicate errors.
///
/// A malformed predicate becomes `status=error, reason=invalid_predicate`
/// rather than an error, so one bad rule never hides the others.
pub fn evaluate_rule(rule: &Rule, config: &Value, resource_id: &str) -> ValidationResult {
    let (status, reason, evidence) = match rule.predicate_spec.evaluate(config) {
        Ok(e) => (e.status, e.reason, e.evidence),
        Err(e) => {
            debug!(rule_id = %rule.rule_id, error = %e, "malformed predicate");
            (Status::Error, Reason::InvalidPredicate, None)
        }
    };

    let remediation_suggestion = (status == Status::Fail)
        .then(|| render_remediation(&rule.remediation_template, config, resource_id));

    ValidationResult {
        rule_id: rule.rule_id.clone(),
        control_id: rule.control_id.clone(),
        resource_id: resource_id.to_string(),
        status,
        reason,
        evidence,
        remediation_suggestion,
        risk_priority: rule.risk_priority,
    }
}

/// Pick the resource id from the first scalar identity field.
pub fn resource_id(config: &Value, identity_fields: &[String]) -> String {
    identity_fields
        .iter()
        .find_map(|field| match resolve_path(config, field) {
            Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
            Some(Value::Number(n)) => Some(n.to_string()),
            _ => None,
        })
        .unwrap_or_else(|| UNKNOWN_RESOURCE.to_string())
}

/// Substitute `{{resource_id}}` and `{{dot.path}}` placeholders.
///
/// Paths must resolve to scalars in `config`; anything else is left verbatim.
pub fn render_remediation(template: &str, config: &Value, resource_id: &str) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            out.push_str(&rest[start..]);
            return out;
        };
        let key = after[..end].trim();
        let replacement = if key == "resource_id" {
            Some(resource_id.to_string())
        } else {
            match resolve_path(config, key) {
                Some(Value::String(s)) => Some(s.clone()),
                Some(v @ (Value::Number(_) | Value::Bool(_))) => Some(v.to_string()),
                _ => None,
            }
        };
        match replacement {
            Some(r) => out.push_str(&r),
            None => out.push_str(&rest[start..start + 2 + end + 2]),
        }
        rest = &after[end + 2..];
    }
    out.push_str(rest);
    out
}
