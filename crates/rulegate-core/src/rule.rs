//! Canonical compliance rules and their content-addressed identity.
//!
//! A rule's id is the SHA-256 of its normalised control text and the canonical
//! rendering of its predicate. The id never depends on where in a document
//! the control was found, so re-extracting the same control from another
//! chunk or another document lands on the same record.

use std::ops::Range;

use ring::digest::{SHA256, digest};
use serde::{Deserialize, Serialize};

use crate::RuleError;
use crate::predicate::{PredicateSpec, parse_predicate};

/// Remediation urgency of a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RiskPriority {
    #[serde(alias = "high", alias = "HIGH")]
    High,
    #[serde(alias = "medium", alias = "MEDIUM")]
    Medium,
    #[serde(alias = "low", alias = "LOW")]
    Low,
}

impl RiskPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::High => "High",
            Self::Medium => "Medium",
            Self::Low => "Low",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "high" => Some(Self::High),
            "medium" => Some(Self::Medium),
            "low" => Some(Self::Low),
            _ => None,
        }
    }
}

/// Where in which document a rule was extracted from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceProvenance {
    pub doc_id: String,
    pub char_range: Range<usize>,
}

/// Raw extractor output for one control, before validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleCandidate {
    pub control_text: String,
    pub predicate_text: String,
    pub remediation_text: String,
    #[serde(rename = "confidence")]
    pub raw_confidence: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub control_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub risk_priority: Option<RiskPriority>,
}

/// A canonical, deduplicated compliance control.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub rule_id: String,
    pub framework: String,
    pub control_id: String,
    pub description: String,
    pub predicate_spec: PredicateSpec,
    pub remediation_template: String,
    pub risk_priority: RiskPriority,
    pub source_provenance: SourceProvenance,
    #[serde(default)]
    pub embedding: Vec<f32>,
}

impl Rule {
    /// Build a rule; the id is derived from `description` and `predicate`.
    pub fn new(
        framework: &str,
        description: &str,
        predicate: PredicateSpec,
        remediation: &str,
    ) -> Result<Self, RuleError> {
        let description = description.trim();
        let remediation = remediation.trim();
        if description.is_empty() {
            return Err(RuleError::EmptyDescription);
        }
        if remediation.is_empty() {
            return Err(RuleError::EmptyRemediation);
        }
        predicate.check()?;

        let rule_id = rule_id(description, &predicate);
        Ok(Self {
            control_id: default_control_id(framework, &rule_id),
            rule_id,
            framework: framework.to_string(),
            description: description.to_string(),
            predicate_spec: predicate,
            remediation_template: remediation.to_string(),
            risk_priority: RiskPriority::Medium,
            source_provenance: SourceProvenance::default(),
            embedding: Vec::new(),
        })
    }

    /// Validate an extractor candidate and turn it into a rule.
    pub fn from_candidate(
        framework: &str,
        candidate: &RuleCandidate,
        provenance: SourceProvenance,
    ) -> Result<Self, RuleError> {
        let predicate = parse_predicate(&candidate.predicate_text)?;
        let mut rule = Self::new(
            framework,
            &candidate.control_text,
            predicate,
            &candidate.remediation_text,
        )?
        .with_provenance(provenance);
        if let Some(id) = candidate.control_id.as_deref().map(str::trim)
            && !id.is_empty()
        {
            rule.control_id = id.to_string();
        }
        if let Some(priority) = candidate.risk_priority {
            rule.risk_priority = priority;
        }
        Ok(rule)
    }

    pub fn with_control_id(mut self, control_id: impl Into<String>) -> Self {
        self.control_id = control_id.into();
        self
    }

    pub fn with_priority(mut self, priority: RiskPriority) -> Self {
        self.risk_priority = priority;
        self
    }

    pub fn with_provenance(mut self, provenance: SourceProvenance) -> Self {
        self.source_provenance = provenance;
        self
    }

    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = embedding;
        self
    }
}

/// Lowercase and collapse all whitespace runs to a single space.
pub fn normalize_text(s: &str) -> String {
    s.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Stable content hash of a control and its predicate.
pub fn rule_id(control_text: &str, predicate: &PredicateSpec) -> String {
    let material = format!(
        "{}\n{}",
        normalize_text(control_text),
        normalize_text(&predicate.to_string())
    );
    hex::encode(digest(&SHA256, material.as_bytes()))
}

/// Short content digest used as a document id when the caller supplies none.
pub fn content_digest(bytes: &[u8]) -> String {
    let mut id = hex::encode(digest(&SHA256, bytes));
    id.truncate(16);
    id
}

fn default_control_id(framework: &str, rule_id: &str) -> String {
    format!("{}-{}", framework.trim().to_uppercase(), &rule_id[..8])
}
