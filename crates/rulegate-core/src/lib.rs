pub mod baseline;
pub mod chunk;
pub mod config;
pub mod delta;
mod error;
pub mod event;
pub mod iam;
pub mod predicate;
pub mod rule;
pub mod schema;
pub mod validation;
pub mod value;

pub use chunk::{RawDocument, TextChunk, chunk_text, decode_document};
pub use config::{ConfigError, PipelineConfig};
pub use delta::{Classification, DeltaReport, FieldDelta, compare};
pub use error::{ParseError, PredicateError, RuleError};
pub use event::{EventStatus, PipelineEvent};
pub use iam::{IamAuditReport, audit_iam};
pub use predicate::{PredicateSpec, Reason, Status, parse_predicate};
pub use rule::{RiskPriority, Rule, RuleCandidate, SourceProvenance};
pub use validation::{ValidationResult, evaluate_rule};
