//! Rule extraction: turn one text chunk into validated, embedded rules.
//!
//! Each attempt asks the language service for JSON candidates, validates them
//! against the candidate schema and the predicate grammar, and builds rules.
//! A failed attempt is retried with a stricter prompt quoting the error, up
//! to `max_retries` times.

use std::sync::Arc;
use std::time::Duration;

use rulegate_core::{PipelineConfig, Rule, RuleCandidate, SourceProvenance, TextChunk};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::embedder::{EmbedError, TextEmbedder};
use crate::llm::{LanguageService, LlmError};

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("language service failed: {0}")]
    Language(#[from] LlmError),
    #[error("language service timed out after {0:?}")]
    Timeout(Duration),
    #[error("response failed schema validation: {0}")]
    Schema(String),
    #[error(transparent)]
    Embed(#[from] EmbedError),
}

impl ExtractError {
    /// Short tag for event summaries.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Language(_) | Self::Timeout(_) => "extraction",
            Self::Schema(_) => "schema",
            Self::Embed(_) => "embedding",
        }
    }
}

// ── Prompt templates ──

const SYSTEM_PROMPT: &str = "\
You are a compliance analyst. You convert regulatory and security-framework text \
into machine-checkable rules over a resource's JSON configuration.

Respond ONLY with a JSON object. No markdown fences, no explanation, just raw JSON:
{
  \"rules\": [
    {
      \"control_text\": \"the control statement, quoted or closely paraphrased from the source\",
      \"predicate_text\": \"one predicate in the grammar below\",
      \"remediation_text\": \"how to fix a non-compliant resource; may use {{resource_id}} and {{dot.path}} placeholders\",
      \"confidence\": 0.0 to 1.0,
      \"control_id\": \"the framework's own control number (e.g. '3.1')\" or null,
      \"risk_priority\": \"High\" | \"Medium\" | \"Low\"
    }
  ]
}

Predicate grammar (paths are dot-separated configuration keys, numeric segments index arrays):
  field-equals(<path>, <json value>)
  field-present(<path>)
  field-absent(<path>)
  field-matches(<path>, \"<regex>\")
  field-threshold(<path>, <op>, <number>)   where op is one of < <= > >=

Only emit rules whose requirement can be checked against configuration. \
If the text contains no checkable control, respond with {\"rules\": []}.";

fn build_user_prompt(framework: &str, chunk: &TextChunk) -> String {
    format!(
        "Framework: {framework}\n\
         Document: {doc}\n\
         Chunk: {index}\n\
         \n\
         Source text:\n\
         {text}",
        doc = chunk.doc_id,
        index = chunk.index,
        text = chunk.text,
    )
}

fn build_retry_prompt(framework: &str, chunk: &TextChunk, error: &ExtractError) -> String {
    format!(
        "Your previous answer was rejected: {error}\n\
         \n\
         Answer again. Output a single JSON object with a \"rules\" array and nothing else. \
         Every rule needs non-empty control_text, predicate_text and remediation_text, \
         a numeric confidence between 0 and 1, and a predicate_text that follows the grammar exactly.\n\
         \n\
         {prompt}",
        prompt = build_user_prompt(framework, chunk),
    )
}

// ── Response parsing ──

/// Strip a surrounding markdown code fence, if any.
fn strip_fences(raw: &str) -> &str {
    let s = raw.trim();
    let Some(rest) = s.strip_prefix("```") else {
        return s;
    };
    // Drop the info string (```json) up to the first newline.
    let body = rest.split_once('\n').map_or("", |(_, b)| b);
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

/// Parse and schema-check a raw completion into candidates.
pub fn parse_candidates(raw: &str) -> Result<Vec<RuleCandidate>, String> {
    let value: Value =
        serde_json::from_str(strip_fences(raw)).map_err(|e| format!("not valid JSON: {e}"))?;

    let items = match value {
        Value::Array(items) => items,
        Value::Object(mut obj) => match obj.remove("rules") {
            Some(Value::Array(items)) => items,
            Some(other) => return Err(format!("\"rules\" must be an array, got {other}")),
            None if obj.contains_key("control_text") => vec![Value::Object(obj)],
            None => return Err("expected an array or an object with a \"rules\" array".into()),
        },
        other => return Err(format!("expected an array or object, got {other}")),
    };

    items
        .into_iter()
        .enumerate()
        .map(|(i, item)| {
            let c: RuleCandidate =
                serde_json::from_value(item).map_err(|e| format!("rule {i}: {e}"))?;
            for (field, text) in [
                ("control_text", &c.control_text),
                ("predicate_text", &c.predicate_text),
                ("remediation_text", &c.remediation_text),
            ] {
                if text.trim().is_empty() {
                    return Err(format!("rule {i}: {field} is empty"));
                }
            }
            if !(0.0..=1.0).contains(&c.raw_confidence) {
                return Err(format!(
                    "rule {i}: confidence {} outside [0, 1]",
                    c.raw_confidence
                ));
            }
            Ok(c)
        })
        .collect()
}

// ── Extractor ──

pub struct Extractor {
    llm: Arc<dyn LanguageService>,
    embedder: Arc<dyn TextEmbedder>,
    max_retries: u32,
    timeout: Duration,
    min_confidence: f32,
}

impl Extractor {
    pub fn new(
        llm: Arc<dyn LanguageService>,
        embedder: Arc<dyn TextEmbedder>,
        config: &PipelineConfig,
    ) -> Self {
        Self {
            llm,
            embedder,
            max_retries: config.max_retries,
            timeout: config.llm_timeout(),
            min_confidence: config.min_confidence,
        }
    }

    /// Extract the rules stated in one chunk.
    ///
    /// Returns the last attempt's error once retries are exhausted.
    pub async fn extract(&self, framework: &str, chunk: &TextChunk) -> Result<Vec<Rule>, ExtractError> {
        let mut prompt = build_user_prompt(framework, chunk);
        let mut attempt = 0;
        let rules = loop {
            match self.attempt(framework, chunk, &prompt).await {
                Ok(rules) => break rules,
                Err(e) if attempt < self.max_retries => {
                    attempt += 1;
                    debug!(
                        doc_id = %chunk.doc_id,
                        chunk = chunk.index,
                        attempt,
                        error = %e,
                        "retrying extraction"
                    );
                    prompt = build_retry_prompt(framework, chunk, &e);
                }
                Err(e) => return Err(e),
            }
        };

        let mut embedded = Vec::with_capacity(rules.len());
        for rule in rules {
            let vector = self.embedder.embed(&rule.description).await?;
            embedded.push(rule.with_embedding(vector));
        }
        Ok(embedded)
    }

    async fn attempt(
        &self,
        framework: &str,
        chunk: &TextChunk,
        prompt: &str,
    ) -> Result<Vec<Rule>, ExtractError> {
        let raw = tokio::time::timeout(self.timeout, self.llm.generate(SYSTEM_PROMPT, prompt))
            .await
            .map_err(|_| ExtractError::Timeout(self.timeout))??;

        let candidates = parse_candidates(&raw).map_err(ExtractError::Schema)?;
        let provenance = SourceProvenance {
            doc_id: chunk.doc_id.clone(),
            char_range: chunk.char_range.clone(),
        };

        let mut rules = Vec::with_capacity(candidates.len());
        for (i, candidate) in candidates.iter().enumerate() {
            if candidate.raw_confidence < self.min_confidence {
                debug!(
                    chunk = chunk.index,
                    confidence = candidate.raw_confidence,
                    "dropping low-confidence candidate"
                );
                continue;
            }
            let rule = Rule::from_candidate(framework, candidate, provenance.clone())
                .map_err(|e| ExtractError::Schema(format!("rule {i}: {e}")))?;
            rules.push(rule);
        }
        Ok(rules)
    }
}
