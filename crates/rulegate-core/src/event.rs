//! Pipeline status events published to the external event bus.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const PIPELINE_INGESTION: &str = "rule-ingestion";
pub const PIPELINE_VALIDATION: &str = "framework-validator";
pub const PIPELINE_DELTA: &str = "delta-analysis";
pub const PIPELINE_IAM_AUDIT: &str = "iam-audit";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    Running,
    Success,
    Error,
}

/// One status/result summary for a pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineEvent {
    pub pipeline: String,
    pub status: EventStatus,
    pub summary: Value,
    /// RFC 3339 / ISO 8601, UTC.
    pub timestamp: DateTime<Utc>,
}

impl PipelineEvent {
    pub fn new(pipeline: &str, status: EventStatus, summary: Value) -> Self {
        Self {
            pipeline: pipeline.to_string(),
            status,
            summary,
            timestamp: Utc::now(),
        }
    }
}
