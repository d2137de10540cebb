//! LanceDB rule store.
//!
//! One table, `rules`, with a fixed-size embedding column. Similarity search
//! uses cosine distance with a prefilter on the framework tag.

use std::path::Path;
use std::sync::Arc;

use arrow::array::{
    Array, FixedSizeListArray, FixedSizeListBuilder, Float32Array, Float32Builder,
    RecordBatchIterator, StringArray, UInt64Array,
};
use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use futures::TryStreamExt;
use lancedb::DistanceType;
use lancedb::query::{ExecutableQuery, QueryBase, Select};
use rulegate_core::schema::rules::{TABLE, rules_schema};
use rulegate_core::{RiskPriority, Rule, SourceProvenance};
use tracing::{debug, info};

use crate::{RuleStore, ScoredRule, StoreError, UpsertOutcome};

pub struct LanceRuleStore {
    table: lancedb::Table,
    dim: i32,
}

impl LanceRuleStore {
    /// Connect to a LanceDB database and open (or create) the rules table.
    pub async fn open(path: &Path, dim: usize) -> Result<Self, StoreError> {
        let uri = path
            .to_str()
            .ok_or_else(|| StoreError::Other("non-UTF8 database path".into()))?;
        let dim = i32::try_from(dim)
            .map_err(|_| StoreError::Other(format!("embedding dimension {dim} too large")))?;
        let db = lancedb::connect(uri)
            .execute()
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        let existing = db.table_names().execute().await?;
        let table = if existing.iter().any(|n| n == TABLE) {
            db.open_table(TABLE).execute().await?
        } else {
            info!(path = uri, dim, "creating rules table");
            db.create_empty_table(TABLE, Arc::new(rules_schema(dim)))
                .execute()
                .await?
        };
        Ok(Self { table, dim })
    }

    async fn query_rules(&self, filter: &str, limit: usize) -> Result<Vec<Rule>, StoreError> {
        let batches: Vec<RecordBatch> = self
            .table
            .query()
            .only_if(filter)
            .limit(limit.max(1))
            .execute()
            .await?
            .try_collect()
            .await?;
        let mut rules = Vec::new();
        for batch in &batches {
            rules.extend(batch_to_rules(batch)?);
        }
        Ok(rules)
    }
}

#[async_trait]
impl RuleStore for LanceRuleStore {
    async fn upsert(&self, rule: Rule) -> Result<UpsertOutcome, StoreError> {
        let outcome = match self.get(&rule.rule_id).await? {
            None => UpsertOutcome::Inserted,
            Some(existing) if existing == rule => return Ok(UpsertOutcome::Unchanged),
            Some(_) => UpsertOutcome::Updated,
        };

        let batch = rules_to_batch(std::slice::from_ref(&rule), self.dim)?;
        let schema = batch.schema();
        let reader = RecordBatchIterator::new(vec![Ok(batch)], schema);

        let mut merge = self.table.merge_insert(&["rule_id"]);
        merge.when_matched_update_all(None).when_not_matched_insert_all();
        merge.execute(Box::new(reader)).await?;

        debug!(rule_id = %rule.rule_id, ?outcome, "upserted rule");
        Ok(outcome)
    }

    async fn get(&self, rule_id: &str) -> Result<Option<Rule>, StoreError> {
        let mut rules = self
            .query_rules(&format!("rule_id = {}", quote(rule_id)), 1)
            .await?;
        Ok(rules.pop())
    }

    async fn list(&self, framework: &str) -> Result<Vec<Rule>, StoreError> {
        let filter = format!("framework = {}", quote(framework));
        let n = self.table.count_rows(Some(filter.clone())).await?;
        if n == 0 {
            return Ok(Vec::new());
        }
        let mut rules = self.query_rules(&filter, n).await?;
        rules.sort_by(|a, b| a.rule_id.cmp(&b.rule_id));
        Ok(rules)
    }

    async fn search(
        &self,
        framework: &str,
        query: &[f32],
        limit: usize,
    ) -> Result<Vec<ScoredRule>, StoreError> {
        let index_err = |e: lancedb::Error| StoreError::IndexUnavailable(e.to_string());
        let batches: Vec<RecordBatch> = self
            .table
            .vector_search(query)
            .map_err(index_err)?
            .distance_type(DistanceType::Cosine)
            .only_if(format!("framework = {}", quote(framework)))
            .limit(limit.max(1))
            .execute()
            .await
            .map_err(index_err)?
            .try_collect()
            .await
            .map_err(index_err)?;

        let mut scored = Vec::new();
        for batch in &batches {
            let distances = batch
                .column_by_name("_distance")
                .and_then(|c| c.as_any().downcast_ref::<Float32Array>())
                .ok_or_else(|| StoreError::IndexUnavailable("missing _distance column".into()))?;
            for (i, rule) in batch_to_rules(batch)?.into_iter().enumerate() {
                scored.push(ScoredRule {
                    score: 1.0 - distances.value(i),
                    rule,
                });
            }
        }
        scored.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.rule.rule_id.cmp(&b.rule.rule_id))
        });
        scored.truncate(limit);
        Ok(scored)
    }

    async fn purge(&self, framework: &str) -> Result<usize, StoreError> {
        let filter = format!("framework = {}", quote(framework));
        let n = self.table.count_rows(Some(filter.clone())).await?;
        if n > 0 {
            self.table.delete(&filter).await?;
        }
        info!(framework, removed = n, "purged rules");
        Ok(n)
    }

    async fn frameworks(&self) -> Result<Vec<String>, StoreError> {
        let n = self.table.count_rows(None).await?;
        if n == 0 {
            return Ok(Vec::new());
        }
        let batches: Vec<RecordBatch> = self
            .table
            .query()
            .select(Select::columns(&["framework"]))
            .limit(n)
            .execute()
            .await?
            .try_collect()
            .await?;
        let mut tags = Vec::new();
        for batch in &batches {
            let col = string_col(batch, "framework")?;
            tags.extend((0..col.len()).map(|i| col.value(i).to_string()));
        }
        tags.sort();
        tags.dedup();
        Ok(tags)
    }

    async fn count(&self) -> Result<usize, StoreError> {
        Ok(self.table.count_rows(None).await?)
    }
}

fn quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

fn rules_to_batch(rules: &[Rule], dim: i32) -> Result<RecordBatch, StoreError> {
    let strs = |f: fn(&Rule) -> &str| StringArray::from(rules.iter().map(f).collect::<Vec<_>>());

    let predicates = rules
        .iter()
        .map(|r| serde_json::to_string(&r.predicate_spec))
        .collect::<Result<Vec<_>, _>>()?;

    let mut embeddings = FixedSizeListBuilder::new(Float32Builder::new(), dim);
    for rule in rules {
        if rule.embedding.is_empty() {
            for _ in 0..dim {
                embeddings.values().append_value(0.0);
            }
            embeddings.append(false);
        } else if rule.embedding.len() == dim as usize {
            embeddings.values().append_slice(&rule.embedding);
            embeddings.append(true);
        } else {
            return Err(StoreError::Other(format!(
                "rule {} has a {}-dim embedding, table expects {dim}",
                rule.rule_id,
                rule.embedding.len()
            )));
        }
    }

    let range = |f: fn(&Rule) -> usize| {
        UInt64Array::from(rules.iter().map(|r| f(r) as u64).collect::<Vec<_>>())
    };

    let batch = RecordBatch::try_new(
        Arc::new(rules_schema(dim)),
        vec![
            Arc::new(strs(|r| r.rule_id.as_str())),
            Arc::new(strs(|r| r.framework.as_str())),
            Arc::new(strs(|r| r.control_id.as_str())),
            Arc::new(strs(|r| r.description.as_str())),
            Arc::new(StringArray::from(predicates)),
            Arc::new(strs(|r| r.remediation_template.as_str())),
            Arc::new(strs(|r| r.risk_priority.as_str())),
            Arc::new(strs(|r| r.source_provenance.doc_id.as_str())),
            Arc::new(range(|r| r.source_provenance.char_range.start)),
            Arc::new(range(|r| r.source_provenance.char_range.end)),
            Arc::new(embeddings.finish()),
        ],
    )?;
    Ok(batch)
}

fn string_col<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a StringArray, StoreError> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<StringArray>())
        .ok_or_else(|| StoreError::Other(format!("column {name} missing or not utf8")))
}

fn u64_col<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a UInt64Array, StoreError> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<UInt64Array>())
        .ok_or_else(|| StoreError::Other(format!("column {name} missing or not uint64")))
}

fn batch_to_rules(batch: &RecordBatch) -> Result<Vec<Rule>, StoreError> {
    let rule_id = string_col(batch, "rule_id")?;
    let framework = string_col(batch, "framework")?;
    let control_id = string_col(batch, "control_id")?;
    let description = string_col(batch, "description")?;
    let predicate = string_col(batch, "predicate_spec")?;
    let remediation = string_col(batch, "remediation_template")?;
    let priority = string_col(batch, "risk_priority")?;
    let doc_id = string_col(batch, "source_doc_id")?;
    let start = u64_col(batch, "source_start")?;
    let end = u64_col(batch, "source_end")?;
    let embedding = batch
        .column_by_name("embedding")
        .and_then(|c| c.as_any().downcast_ref::<FixedSizeListArray>())
        .ok_or_else(|| StoreError::Other("column embedding missing".into()))?;

    let mut rules = Vec::with_capacity(batch.num_rows());
    for i in 0..batch.num_rows() {
        let risk_priority = RiskPriority::parse(priority.value(i)).ok_or_else(|| {
            StoreError::Other(format!("unknown risk priority {:?}", priority.value(i)))
        })?;
        let vector = if embedding.is_null(i) {
            Vec::new()
        } else {
            let values = embedding.value(i);
            values
                .as_any()
                .downcast_ref::<Float32Array>()
                .map(|a| a.values().to_vec())
                .unwrap_or_default()
        };
        rules.push(Rule {
            rule_id: rule_id.value(i).to_string(),
            framework: framework.value(i).to_string(),
            control_id: control_id.value(i).to_string(),
            description: description.value(i).to_string(),
            predicate_spec: serde_json::from_str(predicate.value(i))?,
            remediation_template: remediation.value(i).to_string(),
            risk_priority,
            source_provenance: SourceProvenance {
                doc_id: doc_id.value(i).to_string(),
                char_range: start.value(i) as usize..end.value(i) as usize,
            },
            embedding: vector,
        });
    }
    Ok(rules)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rulegate_core::predicate::{Polarity, PredicateSpec};
    use tempfile::TempDir;

    fn rule(framework: &str, description: &str, embedding: Vec<f32>) -> Rule {
        let predicate = PredicateSpec::FieldPresent {
            path: "logging.enabled".into(),
            polarity: Polarity::Present,
        };
        Rule::new(framework, description, predicate, "Turn on logging for {{resource_id}}")
            .unwrap()
            .with_embedding(embedding)
    }

    #[tokio::test]
    async fn open_creates_empty_rules_table() {
        let tmp = TempDir::new().unwrap();
        let store = LanceRuleStore::open(&tmp.path().join("db"), 3).await.unwrap();
        assert_eq!(store.count().await.unwrap(), 0);
        assert!(store.frameworks().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn upsert_round_trips_and_dedups() {
        let tmp = TempDir::new().unwrap();
        let store = LanceRuleStore::open(&tmp.path().join("db"), 3).await.unwrap();
        let r = rule("CIS", "Log everything", vec![0.1, 0.2, 0.3]);

        assert_eq!(store.upsert(r.clone()).await.unwrap(), UpsertOutcome::Inserted);
        assert_eq!(store.upsert(r.clone()).await.unwrap(), UpsertOutcome::Unchanged);
        assert_eq!(store.count().await.unwrap(), 1);
        assert_eq!(store.get(&r.rule_id).await.unwrap(), Some(r));
    }

    #[tokio::test]
    async fn search_filters_by_framework() {
        let tmp = TempDir::new().unwrap();
        let store = LanceRuleStore::open(&tmp.path().join("db"), 2).await.unwrap();
        store.upsert(rule("CIS", "Near", vec![1.0, 0.0])).await.unwrap();
        store.upsert(rule("CIS", "Far", vec![0.0, 1.0])).await.unwrap();
        store.upsert(rule("NIST", "Other", vec![1.0, 0.0])).await.unwrap();

        let hits = store.search("CIS", &[1.0, 0.0], 5).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].rule.description, "Near");
        assert!(hits.iter().all(|h| h.rule.framework == "CIS"));
    }

    #[tokio::test]
    async fn purge_and_list() {
        let tmp = TempDir::new().unwrap();
        let store = LanceRuleStore::open(&tmp.path().join("db"), 2).await.unwrap();
        store.upsert(rule("CIS", "a", vec![])).await.unwrap();
        store.upsert(rule("NIST", "b", vec![])).await.unwrap();

        assert_eq!(store.frameworks().await.unwrap(), vec!["CIS", "NIST"]);
        assert_eq!(store.purge("CIS").await.unwrap(), 1);
        assert!(store.list("CIS").await.unwrap().is_empty());
        assert_eq!(store.list("NIST").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn wrong_dimension_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let store = LanceRuleStore::open(&tmp.path().join("db"), 4).await.unwrap();
        let result = store.upsert(rule("CIS", "short", vec![1.0])).await;
        assert!(matches!(result, Err(StoreError::Other(_))));
    }
}
