use rulegate_core::{ParseError, RuleError};
use rulegate_store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid document: {0}")]
    Parse(#[from] ParseError),

    /// Fatal to the whole operation; never retried.
    #[error("rule store: {0}")]
    Store(#[from] StoreError),

    #[error("invalid rule: {0}")]
    Rule(#[from] RuleError),

    #[error("invalid input: {0}")]
    Input(String),
}
