//! In-process rule store with an optional JSON snapshot on disk.
//!
//! Every mutation is written through to the snapshot while the write lock is
//! held. A mutation whose snapshot write fails is rolled back, so memory and
//! disk never disagree.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use rulegate_core::Rule;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::{RuleStore, ScoredRule, StoreError, UpsertOutcome, cosine_similarity};

#[derive(Debug, Default)]
pub struct MemoryStore {
    rules: RwLock<BTreeMap<String, Rule>>,
    snapshot: Option<PathBuf>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a store backed by a JSON snapshot, loading it if it exists.
    pub async fn open_persistent(path: &Path) -> Result<Self, StoreError> {
        let mut rules = BTreeMap::new();
        match tokio::fs::read(path).await {
            Ok(bytes) => {
                let stored: Vec<Rule> = serde_json::from_slice(&bytes)?;
                for rule in stored {
                    rules.insert(rule.rule_id.clone(), rule);
                }
                info!(path = %path.display(), rules = rules.len(), "loaded rule snapshot");
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no rule snapshot yet");
            }
            Err(e) => return Err(StoreError::Unavailable(format!("{}: {e}", path.display()))),
        }
        Ok(Self {
            rules: RwLock::new(rules),
            snapshot: Some(path.to_path_buf()),
        })
    }

    async fn persist(&self, rules: &BTreeMap<String, Rule>) -> Result<(), StoreError> {
        let Some(path) = &self.snapshot else {
            return Ok(());
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let body = serde_json::to_vec_pretty(&rules.values().collect::<Vec<_>>())?;
        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, body).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }
}

#[async_trait]
impl RuleStore for MemoryStore {
    async fn upsert(&self, rule: Rule) -> Result<UpsertOutcome, StoreError> {
        let mut rules = self.rules.write().await;
        let outcome = match rules.get(&rule.rule_id) {
            None => UpsertOutcome::Inserted,
            Some(existing) if *existing == rule => return Ok(UpsertOutcome::Unchanged),
            Some(_) => UpsertOutcome::Updated,
        };
        let rule_id = rule.rule_id.clone();
        let previous = rules.insert(rule_id.clone(), rule);
        if let Err(e) = self.persist(&rules).await {
            match previous {
                Some(old) => rules.insert(rule_id, old),
                None => rules.remove(&rule_id),
            };
            return Err(e);
        }
        Ok(outcome)
    }

    async fn get(&self, rule_id: &str) -> Result<Option<Rule>, StoreError> {
        Ok(self.rules.read().await.get(rule_id).cloned())
    }

    async fn list(&self, framework: &str) -> Result<Vec<Rule>, StoreError> {
        let rules = self.rules.read().await;
        Ok(rules
            .values()
            .filter(|r| r.framework == framework)
            .cloned()
            .collect())
    }

    async fn search(
        &self,
        framework: &str,
        query: &[f32],
        limit: usize,
    ) -> Result<Vec<ScoredRule>, StoreError> {
        let rules = self.rules.read().await;
        // BTreeMap iteration is already rule_id order; the stable sort keeps it for ties.
        let mut scored: Vec<ScoredRule> = rules
            .values()
            .filter(|r| r.framework == framework)
            .map(|r| ScoredRule {
                score: cosine_similarity(query, &r.embedding),
                rule: r.clone(),
            })
            .collect();
        scored.sort_by(|a, b| b.score.total_cmp(&a.score));
        scored.truncate(limit);
        Ok(scored)
    }

    async fn purge(&self, framework: &str) -> Result<usize, StoreError> {
        let mut rules = self.rules.write().await;
        let kept: BTreeMap<String, Rule> = rules
            .iter()
            .filter(|(_, r)| r.framework != framework)
            .map(|(id, r)| (id.clone(), r.clone()))
            .collect();
        let removed = rules.len() - kept.len();
        if removed > 0 {
            self.persist(&kept).await?;
            *rules = kept;
        }
        info!(framework, removed, "purged rules");
        Ok(removed)
    }

    async fn frameworks(&self) -> Result<Vec<String>, StoreError> {
        let rules = self.rules.read().await;
        let tags: BTreeSet<&str> = rules.values().map(|r| r.framework.as_str()).collect();
        Ok(tags.into_iter().map(str::to_string).collect())
    }

    async fn count(&self) -> Result<usize, StoreError> {
        Ok(self.rules.read().await.len())
    }
}
