use thiserror::Error;

/// The input document could not be turned into text chunks.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("document is empty")]
    Empty,

    #[error("document is not valid UTF-8 text: {0}")]
    NotText(String),

    #[error("invalid chunk window: max_len={max_len}, overlap={overlap}")]
    InvalidWindow { max_len: usize, overlap: usize },
}

/// A predicate could not be parsed or is malformed.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PredicateError {
    #[error("predicate path is empty or has an empty segment: {0:?}")]
    EmptyPath(String),

    #[error("invalid pattern {pattern:?}: {message}")]
    InvalidPattern { pattern: String, message: String },

    #[error("threshold value must be finite")]
    NonFiniteThreshold,

    #[error("unrecognised predicate: {0}")]
    Syntax(String),
}

/// A rule could not be constructed from its parts.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RuleError {
    #[error("rule description is empty")]
    EmptyDescription,

    #[error("rule remediation template is empty")]
    EmptyRemediation,

    #[error(transparent)]
    Predicate(#[from] PredicateError),
}
