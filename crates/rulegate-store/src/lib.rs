//! Rule Store: persistence and semantic retrieval of compliance rules.
//!
//! Rules are keyed by their content-derived `rule_id`, so an upsert of an
//! already-known rule is idempotent. Retrieval is framework-scoped and
//! degrades to an exact framework listing when similarity search is down.

mod error;
pub mod memory;

#[cfg(feature = "lancedb")]
mod lance;

pub use error::StoreError;
#[cfg(feature = "lancedb")]
pub use lance::LanceRuleStore;
pub use memory::MemoryStore;

use std::time::Duration;

use async_trait::async_trait;
use rulegate_core::Rule;
use tracing::{debug, warn};

/// What an upsert did to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
    Unchanged,
}

/// A rule with its similarity to a query, higher is closer.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredRule {
    pub rule: Rule,
    pub score: f32,
}

#[async_trait]
pub trait RuleStore: Send + Sync {
    /// Insert or replace the rule with the same `rule_id`.
    async fn upsert(&self, rule: Rule) -> Result<UpsertOutcome, StoreError>;

    async fn get(&self, rule_id: &str) -> Result<Option<Rule>, StoreError>;

    /// Every rule tagged with `framework`, ordered by `rule_id`.
    async fn list(&self, framework: &str) -> Result<Vec<Rule>, StoreError>;

    /// The `limit` rules of `framework` closest to `query`.
    ///
    /// Ordered by descending score, ties broken by ascending `rule_id`.
    async fn search(
        &self,
        framework: &str,
        query: &[f32],
        limit: usize,
    ) -> Result<Vec<ScoredRule>, StoreError>;

    /// Remove every rule of `framework`; returns how many were removed.
    async fn purge(&self, framework: &str) -> Result<usize, StoreError>;

    /// Distinct framework tags, sorted.
    async fn frameworks(&self) -> Result<Vec<String>, StoreError>;

    async fn count(&self) -> Result<usize, StoreError>;
}

/// How a rule set was retrieved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Retrieval {
    Ranked,
    Fallback,
}

impl Retrieval {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ranked => "ranked",
            Self::Fallback => "fallback",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Retrieved {
    pub mode: Retrieval,
    pub rules: Vec<Rule>,
}

/// Fetch the candidate rules for one validation.
///
/// Similarity search gets `timeout`; if it times out or reports the index
/// unavailable, every rule of the framework is listed instead. Any other
/// store failure is returned as-is.
pub async fn retrieve(
    store: &dyn RuleStore,
    framework: &str,
    query: &[f32],
    limit: usize,
    timeout: Duration,
) -> Result<Retrieved, StoreError> {
    let reason = match tokio::time::timeout(timeout, store.search(framework, query, limit)).await {
        Ok(Ok(scored)) => {
            debug!(framework, hits = scored.len(), "ranked retrieval");
            return Ok(Retrieved {
                mode: Retrieval::Ranked,
                rules: scored.into_iter().map(|s| s.rule).collect(),
            });
        }
        Ok(Err(StoreError::IndexUnavailable(msg))) => msg,
        Ok(Err(e)) => return Err(e),
        Err(_) => format!("search exceeded {}ms", timeout.as_millis()),
    };

    warn!(framework, %reason, "similarity search unavailable, listing framework rules");
    let rules = store.list(framework).await?;
    Ok(Retrieved {
        mode: Retrieval::Fallback,
        rules,
    })
}

/// Cosine similarity; 0.0 when either vector is empty, zero, or the lengths differ.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    dot / (na * nb)
}
