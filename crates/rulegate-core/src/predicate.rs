//! The closed predicate language evaluated against configuration trees.
//!
//! Predicates have two interchangeable encodings:
//!
//! - JSON, tagged by `kind`, persisted with every rule:
//!   `{"kind": "field-threshold", "path": "tls.min_version", "operator": ">=", "value": 1.2}`
//! - A compact text form emitted by the extractor:
//!   `field-threshold(tls.min_version, >=, 1.2)`
//!
//! [`PredicateSpec`]'s `Display` renders the canonical text form; rule ids
//! hash that rendering, so equivalent spellings of a predicate collide.

use std::fmt;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::PredicateError;
use crate::value::{json_eq, kind_name, resolve_path};

/// Whether a `field-present` predicate requires the field to exist or not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Polarity {
    Present,
    Absent,
}

/// Comparison operator for `field-threshold`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ThresholdOp {
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Ge,
}

impl ThresholdOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "<" => Some(Self::Lt),
            "<=" => Some(Self::Le),
            ">" => Some(Self::Gt),
            ">=" => Some(Self::Ge),
            _ => None,
        }
    }

    fn holds(&self, actual: f64, limit: f64) -> bool {
        match self {
            Self::Lt => actual < limit,
            Self::Le => actual <= limit,
            Self::Gt => actual > limit,
            Self::Ge => actual >= limit,
        }
    }
}

/// A machine-checkable condition on one configuration path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum PredicateSpec {
    FieldEquals {
        path: String,
        expected: Value,
    },
    FieldPresent {
        path: String,
        polarity: Polarity,
    },
    FieldMatches {
        path: String,
        pattern: String,
    },
    FieldThreshold {
        path: String,
        operator: ThresholdOp,
        value: f64,
    },
}

/// Result status of evaluating one rule against one resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Pass,
    Fail,
    Error,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pass => "pass",
            Self::Fail => "fail",
            Self::Error => "error",
        }
    }
}

/// Machine-readable reason attached to every evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reason {
    Satisfied,
    MissingField,
    UnexpectedField,
    ValueMismatch,
    PatternMismatch,
    ThresholdNotMet,
    TypeMismatch,
    InvalidPredicate,
}

impl Reason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Satisfied => "satisfied",
            Self::MissingField => "missing_field",
            Self::UnexpectedField => "unexpected_field",
            Self::ValueMismatch => "value_mismatch",
            Self::PatternMismatch => "pattern_mismatch",
            Self::ThresholdNotMet => "threshold_not_met",
            Self::TypeMismatch => "type_mismatch",
            Self::InvalidPredicate => "invalid_predicate",
        }
    }
}

/// Outcome of a single predicate evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub status: Status,
    pub reason: Reason,
    /// The resolved value, when one was found.
    pub evidence: Option<Value>,
}

impl Evaluation {
    fn pass(evidence: Option<Value>) -> Self {
        Self {
            status: Status::Pass,
            reason: Reason::Satisfied,
            evidence,
        }
    }

    fn fail(reason: Reason, evidence: Option<Value>) -> Self {
        Self {
            status: Status::Fail,
            reason,
            evidence,
        }
    }

    fn type_mismatch(evidence: &Value) -> Self {
        Self {
            status: Status::Error,
            reason: Reason::TypeMismatch,
            evidence: Some(evidence.clone()),
        }
    }
}

impl PredicateSpec {
    /// The configuration path this predicate inspects.
    pub fn path(&self) -> &str {
        match self {
            Self::FieldEquals { path, .. }
            | Self::FieldPresent { path, .. }
            | Self::FieldMatches { path, .. }
            | Self::FieldThreshold { path, .. } => path,
        }
    }

    /// Check that the predicate is well formed.
    pub fn check(&self) -> Result<(), PredicateError> {
        let path = self.path();
        if path.is_empty() || path.split('.').any(str::is_empty) {
            return Err(PredicateError::EmptyPath(path.to_string()));
        }
        match self {
            Self::FieldMatches { pattern, .. } => {
                compile(pattern)?;
            }
            Self::FieldThreshold { value, .. } if !value.is_finite() => {
                return Err(PredicateError::NonFiniteThreshold);
            }
            _ => {}
        }
        Ok(())
    }

    /// Evaluate against a configuration tree.
    ///
    /// A missing path fails every predicate except `field-present` with
    /// [`Polarity::Absent`]. Malformed predicates are returned as errors so
    /// the caller can contain them per rule.
    pub fn evaluate(&self, config: &Value) -> Result<Evaluation, PredicateError> {
        self.check()?;
        let resolved = resolve_path(config, self.path());

        let outcome = match (self, resolved) {
            (Self::FieldPresent { polarity, .. }, found) => match (polarity, found) {
                (Polarity::Present, Some(v)) => Evaluation::pass(Some(v.clone())),
                (Polarity::Present, None) => Evaluation::fail(Reason::MissingField, None),
                (Polarity::Absent, None) => Evaluation::pass(None),
                (Polarity::Absent, Some(v)) => {
                    Evaluation::fail(Reason::UnexpectedField, Some(v.clone()))
                }
            },
            (_, None) => Evaluation::fail(Reason::MissingField, None),
            (Self::FieldEquals { expected, .. }, Some(actual)) => {
                if json_eq(actual, expected) {
                    Evaluation::pass(Some(actual.clone()))
                } else if !actual.is_null()
                    && !expected.is_null()
                    && kind_name(actual) != kind_name(expected)
                {
                    Evaluation::type_mismatch(actual)
                } else {
                    Evaluation::fail(Reason::ValueMismatch, Some(actual.clone()))
                }
            }
            (Self::FieldMatches { pattern, .. }, Some(actual)) => match actual {
                Value::String(s) => {
                    if compile(pattern)?.is_match(s) {
                        Evaluation::pass(Some(actual.clone()))
                    } else {
                        Evaluation::fail(Reason::PatternMismatch, Some(actual.clone()))
                    }
                }
                other => Evaluation::type_mismatch(other),
            },
            (Self::FieldThreshold { operator, value, .. }, Some(actual)) => {
                match actual.as_f64() {
                    Some(n) if operator.holds(n, *value) => Evaluation::pass(Some(actual.clone())),
                    Some(_) => Evaluation::fail(Reason::ThresholdNotMet, Some(actual.clone())),
                    None => Evaluation::type_mismatch(actual),
                }
            }
        };
        Ok(outcome)
    }
}

fn compile(pattern: &str) -> Result<Regex, PredicateError> {
    Regex::new(pattern).map_err(|e| PredicateError::InvalidPattern {
        pattern: pattern.to_string(),
        message: e.to_string(),
    })
}

impl fmt::Display for PredicateSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FieldEquals { path, expected } => write!(f, "field-equals({path}, {expected})"),
            Self::FieldPresent {
                path,
                polarity: Polarity::Present,
            } => write!(f, "field-present({path})"),
            Self::FieldPresent {
                path,
                polarity: Polarity::Absent,
            } => write!(f, "field-absent({path})"),
            Self::FieldMatches { path, pattern } => {
                write!(f, "field-matches({path}, {})", Value::String(pattern.clone()))
            }
            Self::FieldThreshold {
                path,
                operator,
                value,
            } => write!(f, "field-threshold({path}, {}, {value})", operator.as_str()),
        }
    }
}

/// Parse a predicate from its text form or its JSON form.
pub fn parse_predicate(text: &str) -> Result<PredicateSpec, PredicateError> {
    let text = text.trim();
    let spec = if text.starts_with('{') {
        serde_json::from_str(text).map_err(|e| PredicateError::Syntax(e.to_string()))?
    } else {
        parse_call(text)?
    };
    spec.check()?;
    Ok(spec)
}

fn parse_call(text: &str) -> Result<PredicateSpec, PredicateError> {
    let syntax = || PredicateError::Syntax(text.to_string());

    let open = text.find('(').ok_or_else(syntax)?;
    let args = text[open + 1..].strip_suffix(')').ok_or_else(syntax)?;
    let name = text[..open].trim().to_ascii_lowercase();

    let (path, rest) = match args.split_once(',') {
        Some((p, r)) => (p.trim().to_string(), Some(r.trim())),
        None => (args.trim().to_string(), None),
    };

    let spec = match (name.as_str(), rest) {
        ("field-present", None) => PredicateSpec::FieldPresent {
            path,
            polarity: Polarity::Present,
        },
        ("field-absent", None) => PredicateSpec::FieldPresent {
            path,
            polarity: Polarity::Absent,
        },
        ("field-equals", Some(raw)) if !raw.is_empty() => PredicateSpec::FieldEquals {
            path,
            // Bare words are accepted as strings: field-equals(sku, Standard).
            expected: serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.into())),
        },
        ("field-matches", Some(raw)) if !raw.is_empty() => PredicateSpec::FieldMatches {
            path,
            pattern: match serde_json::from_str::<String>(raw) {
                Ok(s) => s,
                Err(_) => raw.to_string(),
            },
        },
        ("field-threshold", Some(raw)) => {
            let (op, value) = raw.split_once(',').ok_or_else(syntax)?;
            PredicateSpec::FieldThreshold {
                path,
                operator: ThresholdOp::parse(op.trim()).ok_or_else(syntax)?,
                value: value.trim().parse().map_err(|_| syntax())?,
            }
        }
        _ => return Err(syntax()),
    };
    Ok(spec)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn equals(path: &str, expected: Value) -> PredicateSpec {
        PredicateSpec::FieldEquals {
            path: path.into(),
            expected,
        }
    }

    #[test]
    fn equals_mismatch_fails_with_evidence() {
        let p = equals("encryption.enabled", json!(true));
        let e = p.evaluate(&json!({"encryption": {"enabled": false}})).unwrap();
        assert_eq!(e.status, Status::Fail);
        assert_eq!(e.reason, Reason::ValueMismatch);
        assert_eq!(e.evidence, Some(json!(false)));
    }

    #[test]
    fn equals_missing_path_is_missing_field() {
        let p = equals("encryption.enabled", json!(true));
        let e = p.evaluate(&json!({"storage": {}})).unwrap();
        assert_eq!(e.status, Status::Fail);
        assert_eq!(e.reason, Reason::MissingField);
        assert_eq!(e.evidence, None);
    }

    #[test]
    fn equals_match_passes() {
        let p = equals("tls.version", json!(1.2));
        let e = p.evaluate(&json!({"tls": {"version": 1.2}})).unwrap();
        assert_eq!(e.status, Status::Pass);
    }

    #[test]
    fn equals_kind_mismatch_is_error() {
        let p = equals("encryption.enabled", json!(true));
        let e = p.evaluate(&json!({"encryption": {"enabled": "true"}})).unwrap();
        assert_eq!(e.status, Status::Error);
        assert_eq!(e.reason, Reason::TypeMismatch);
    }

    #[test]
    fn present_polarity_is_explicit() {
        let present = parse_predicate("field-present(logging.enabled)").unwrap();
        let absent = parse_predicate("field-absent(public_access)").unwrap();
        let cfg = json!({"name": "bucket"});

        let e = present.evaluate(&cfg).unwrap();
        assert_eq!((e.status, e.reason), (Status::Fail, Reason::MissingField));

        let e = absent.evaluate(&cfg).unwrap();
        assert_eq!(e.status, Status::Pass);

        let e = absent.evaluate(&json!({"public_access": true})).unwrap();
        assert_eq!((e.status, e.reason), (Status::Fail, Reason::UnexpectedField));
        assert_eq!(e.evidence, Some(json!(true)));
    }

    #[test]
    fn present_json_form_requires_polarity() {
        let err = serde_json::from_value::<PredicateSpec>(
            json!({"kind": "field-present", "path": "a"}),
        );
        assert!(err.is_err());
    }

    #[test]
    fn threshold_on_string_is_type_mismatch() {
        let p = parse_predicate("field-threshold(retention.days, >=, 7)").unwrap();
        let e = p.evaluate(&json!({"retention": {"days": "seven"}})).unwrap();
        assert_eq!((e.status, e.reason), (Status::Error, Reason::TypeMismatch));

        let e = p.evaluate(&json!({"retention": {"days": 3}})).unwrap();
        assert_eq!((e.status, e.reason), (Status::Fail, Reason::ThresholdNotMet));

        let e = p.evaluate(&json!({"retention": {"days": 7}})).unwrap();
        assert_eq!(e.status, Status::Pass);
    }

    #[test]
    fn matches_uses_regex() {
        let p = parse_predicate(r#"field-matches(tls.cipher, "^TLS_AES_")"#).unwrap();
        let e = p.evaluate(&json!({"tls": {"cipher": "TLS_AES_256_GCM"}})).unwrap();
        assert_eq!(e.status, Status::Pass);
        let e = p.evaluate(&json!({"tls": {"cipher": "RC4"}})).unwrap();
        assert_eq!(e.reason, Reason::PatternMismatch);
        let e = p.evaluate(&json!({"tls": {"cipher": 4}})).unwrap();
        assert_eq!(e.reason, Reason::TypeMismatch);
    }

    #[test]
    fn malformed_predicates_are_errors() {
        let bad_pattern = PredicateSpec::FieldMatches {
            path: "a".into(),
            pattern: "(".into(),
        };
        assert!(matches!(
            bad_pattern.evaluate(&json!({"a": "x"})),
            Err(PredicateError::InvalidPattern { .. })
        ));

        let bad_path = equals("a..b", json!(1));
        assert!(matches!(
            bad_path.evaluate(&json!({})),
            Err(PredicateError::EmptyPath(_))
        ));

        let bad_value = PredicateSpec::FieldThreshold {
            path: "a".into(),
            operator: ThresholdOp::Lt,
            value: f64::NAN,
        };
        assert_eq!(bad_value.check(), Err(PredicateError::NonFiniteThreshold));
    }

    #[test]
    fn text_and_json_forms_agree() {
        let cases = [
            (
                "field-equals(encryption.enabled, true)",
                json!({"kind": "field-equals", "path": "encryption.enabled", "expected": true}),
            ),
            (
                "field-absent(public_access)",
                json!({"kind": "field-present", "path": "public_access", "polarity": "absent"}),
            ),
            (
                r#"field-matches(region, "^eu-")"#,
                json!({"kind": "field-matches", "path": "region", "pattern": "^eu-"}),
            ),
            (
                "field-threshold(password.min_length, >=, 14)",
                json!({"kind": "field-threshold", "path": "password.min_length", "operator": ">=", "value": 14.0}),
            ),
        ];
        for (text, json) in cases {
            let from_text = parse_predicate(text).unwrap();
            let from_json: PredicateSpec = serde_json::from_value(json.clone()).unwrap();
            assert_eq!(from_text, from_json, "{text}");
            assert_eq!(serde_json::to_value(&from_text).unwrap(), json);
            assert_eq!(from_text.to_string(), text);
        }
    }

    #[test]
    fn equals_accepts_bare_words_and_json_arrays() {
        let p = parse_predicate("field-equals(sku, Standard)").unwrap();
        assert_eq!(p, equals("sku", json!("Standard")));

        let p = parse_predicate(r#"field-equals(bypass, ["AzureServices", "Logging"])"#).unwrap();
        assert_eq!(p, equals("bypass", json!(["AzureServices", "Logging"])));
    }

    #[test]
    fn unknown_forms_are_syntax_errors() {
        for text in [
            "field-exists(a)",
            "field-equals(a)",
            "field-threshold(a, ~, 3)",
            "field-threshold(a, >, many)",
            "encryption must be enabled",
        ] {
            assert!(
                matches!(parse_predicate(text), Err(PredicateError::Syntax(_))),
                "{text}"
            );
        }
    }
}
