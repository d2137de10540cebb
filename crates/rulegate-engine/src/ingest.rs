//! Document ingestion: chunk, extract on a bounded worker pool, dedup, upsert.
//!
//! Each chunk is extracted on its own spawned task, at most `workers` at a
//! time. Results come back to the ingesting task in completion order and are
//! written through one sequential upsert path, so workers never touch the
//! store.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use rulegate_ai::Extractor;
use rulegate_core::baseline::baseline_rules;
use rulegate_core::event::PIPELINE_INGESTION;
use rulegate_core::{RawDocument, chunk_text};
use rulegate_store::UpsertOutcome;
use serde::Serialize;
use serde_json::json;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::{Engine, EngineError};

/// Cooperative cancellation for an ingestion run.
///
/// Once set, no new extraction requests start; extractions already in flight
/// finish and their rules are stored.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestSummary {
    pub doc_id: String,
    pub framework: String,
    /// Rules this run added to the store.
    pub rules_created: usize,
    pub chunks_failed: usize,
    pub chunks_total: usize,
    /// Every distinct rule the document yielded, new or already stored, sorted.
    pub rule_ids: Vec<String>,
    pub cancelled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SeedSummary {
    pub framework: String,
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
}

impl Engine {
    /// Ingest one document.
    ///
    /// Per-chunk extraction failures are counted, not raised. A bad document
    /// or an unreachable store fails the whole run.
    pub async fn ingest(
        &self,
        doc: &RawDocument,
        cancel: &CancelFlag,
    ) -> Result<IngestSummary, EngineError> {
        let result = self.run_ingest(doc, cancel).await;
        self.finish(
            PIPELINE_INGESTION,
            &result,
            |s| {
                json!({
                    "doc_id": s.doc_id,
                    "framework": s.framework,
                    "rules_created": s.rules_created,
                    "chunks_failed": s.chunks_failed,
                    "chunks_total": s.chunks_total,
                    "rule_ids": s.rule_ids,
                    "cancelled": s.cancelled,
                    "model": self.llm.model(),
                })
            },
            json!({"doc_id": doc.doc_id, "framework": doc.framework}),
        );
        result
    }

    async fn run_ingest(
        &self,
        doc: &RawDocument,
        cancel: &CancelFlag,
    ) -> Result<IngestSummary, EngineError> {
        let text = doc.decode()?;
        let chunks = chunk_text(
            &doc.doc_id,
            &text,
            self.config.chunk_max_len,
            self.config.chunk_overlap,
        )?;
        info!(
            doc_id = %doc.doc_id,
            framework = %doc.framework,
            chunks = chunks.len(),
            workers = self.config.workers,
            "ingesting document"
        );

        let extractor = Arc::new(Extractor::new(
            self.llm.clone(),
            self.embedder.clone(),
            &self.config,
        ));
        let permits = Arc::new(Semaphore::new(self.config.workers.max(1)));
        let mut workers = JoinSet::new();

        for chunk in &chunks {
            if cancel.is_cancelled() {
                break;
            }
            let extractor = extractor.clone();
            let permits = permits.clone();
            let cancel = cancel.clone();
            let framework = doc.framework.clone();
            let chunk = chunk.clone();
            workers.spawn(async move {
                let Ok(_permit) = permits.acquire_owned().await else {
                    return (chunk.index, None);
                };
                // Cancelled while queued: never send the request.
                if cancel.is_cancelled() {
                    return (chunk.index, None);
                }
                (chunk.index, Some(extractor.extract(&framework, &chunk).await))
            });
        }

        let mut attempted = 0;
        let mut chunks_failed = 0;
        let mut rules_created = 0;
        let mut rule_ids = BTreeSet::new();

        while let Some(joined) = workers.join_next().await {
            let (index, outcome) = match joined {
                Ok((_, None)) => continue,
                Ok((index, Some(outcome))) => (index, outcome),
                Err(e) => {
                    attempted += 1;
                    chunks_failed += 1;
                    warn!(doc_id = %doc.doc_id, error = %e, "extraction worker died");
                    continue;
                }
            };
            attempted += 1;
            let rules = match outcome {
                Ok(rules) => rules,
                Err(e) => {
                    chunks_failed += 1;
                    warn!(
                        doc_id = %doc.doc_id,
                        chunk = index,
                        kind = e.kind(),
                        error = %e,
                        "chunk extraction failed"
                    );
                    continue;
                }
            };
            for rule in rules {
                if !rule_ids.insert(rule.rule_id.clone()) {
                    continue;
                }
                if self.store.get(&rule.rule_id).await?.is_some() {
                    debug!(rule_id = %rule.rule_id, "rule already stored");
                    continue;
                }
                self.store.upsert(rule).await?;
                rules_created += 1;
            }
        }

        let summary = IngestSummary {
            doc_id: doc.doc_id.clone(),
            framework: doc.framework.clone(),
            rules_created,
            chunks_failed,
            chunks_total: chunks.len(),
            rule_ids: rule_ids.into_iter().collect(),
            cancelled: attempted < chunks.len(),
        };
        info!(
            doc_id = %summary.doc_id,
            rules_created,
            chunks_failed,
            cancelled = summary.cancelled,
            "ingestion finished"
        );
        Ok(summary)
    }

    /// Embed and store the built-in baseline rule pack under `framework`.
    pub async fn seed_baseline(&self, framework: &str) -> Result<SeedSummary, EngineError> {
        let mut summary = SeedSummary {
            framework: framework.to_string(),
            inserted: 0,
            updated: 0,
            unchanged: 0,
        };
        for rule in baseline_rules(framework)? {
            let rule = match self.embedder.embed(&rule.description).await {
                Ok(v) => rule.with_embedding(v),
                Err(e) => {
                    warn!(control_id = %rule.control_id, error = %e, "storing baseline rule without embedding");
                    rule
                }
            };
            match self.store.upsert(rule).await? {
                UpsertOutcome::Inserted => summary.inserted += 1,
                UpsertOutcome::Updated => summary.updated += 1,
                UpsertOutcome::Unchanged => summary.unchanged += 1,
            }
        }
        info!(framework, inserted = summary.inserted, "seeded baseline rules");
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Mutex;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use crate::testing::{DownStore, FnLlm, engine_with, silent_llm};
    use async_trait::async_trait;
    use rulegate_ai::{LanguageService, LlmError};
    use rulegate_core::PipelineConfig;
    use rulegate_core::event::EventStatus;
    use rulegate_store::{MemoryStore, RuleStore};

    /// The chunk index quoted in an extraction prompt.
    fn chunk_index(prompt: &str) -> usize {
        prompt
            .split("Chunk: ")
            .nth(1)
            .and_then(|rest| rest.split_whitespace().next())
            .and_then(|n| n.parse().ok())
            .unwrap()
    }

    fn rule_reply(control: &str) -> String {
        json!({"rules": [{
            "control_text": control,
            "predicate_text": "field-present(logging)",
            "remediation_text": "Enable logging on {{resource_id}}",
            "confidence": 0.9
        }]})
        .to_string()
    }

    /// Ten-character windows, no overlap: 100 chars make 10 chunks.
    fn ten_chunk_config() -> PipelineConfig {
        PipelineConfig {
            chunk_max_len: 10,
            chunk_overlap: 0,
            ..PipelineConfig::default()
        }
    }

    fn ten_chunk_doc() -> RawDocument {
        RawDocument::new("CIS", "abcdefghij".repeat(10).into_bytes())
    }

    #[tokio::test]
    async fn failing_chunk_does_not_abort_the_batch() {
        let llm = FnLlm::new(|prompt: &str| match chunk_index(prompt) {
            4 => Err(LlmError::Server {
                status: 500,
                body: "boom".into(),
            }),
            i => Ok(rule_reply(&format!("Control number {i}"))),
        });
        let store = Arc::new(MemoryStore::new());
        let (engine, sink) = engine_with(store.clone(), llm.clone(), ten_chunk_config());

        let summary = engine.ingest(&ten_chunk_doc(), &CancelFlag::new()).await.unwrap();

        assert_eq!(summary.chunks_total, 10);
        assert_eq!(summary.chunks_failed, 1);
        assert_eq!(summary.rules_created, 9);
        assert_eq!(summary.rule_ids.len(), 9);
        assert!(!summary.cancelled);
        assert_eq!(store.count().await.unwrap(), 9);
        // Nine successes plus the failing chunk's first attempt and two retries.
        assert_eq!(llm.calls(), 12);

        let events = sink.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].pipeline, PIPELINE_INGESTION);
        assert_eq!(events[0].status, EventStatus::Success);
        assert_eq!(events[0].summary["chunks_failed"], 1);
    }

    #[tokio::test]
    async fn rule_ids_are_sorted_and_distinct() {
        // Every chunk yields the same control.
        let llm = FnLlm::new(|_: &str| Ok(rule_reply("Log all access")));
        let (engine, _) = engine_with(Arc::new(MemoryStore::new()), llm, ten_chunk_config());

        let summary = engine.ingest(&ten_chunk_doc(), &CancelFlag::new()).await.unwrap();
        assert_eq!(summary.rules_created, 1);
        assert_eq!(summary.rule_ids.len(), 1);
    }

    #[tokio::test]
    async fn same_control_across_documents_is_stored_once() {
        let llm = FnLlm::new(|_: &str| Ok(rule_reply("Encrypt   data at REST")));
        let store = Arc::new(MemoryStore::new());
        let (engine, _) = engine_with(store.clone(), llm, PipelineConfig::default());

        let a = RawDocument::new("CIS", b"Section 1: encrypt data at rest.".to_vec());
        let b = RawDocument::new("CIS", b"Annex B repeats: encrypt data at rest.".to_vec());
        let first = engine.ingest(&a, &CancelFlag::new()).await.unwrap();
        let second = engine.ingest(&b, &CancelFlag::new()).await.unwrap();

        assert_ne!(first.doc_id, second.doc_id);
        assert_eq!(first.rules_created, 1);
        assert_eq!(second.rules_created, 0);
        assert_eq!(first.rule_ids, second.rule_ids);
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn cancelled_before_start_sends_no_requests() {
        let llm = FnLlm::new(|_: &str| Ok(rule_reply("never")));
        let (engine, sink) = engine_with(Arc::new(MemoryStore::new()), llm.clone(), ten_chunk_config());

        let cancel = CancelFlag::new();
        cancel.cancel();
        let summary = engine.ingest(&ten_chunk_doc(), &cancel).await.unwrap();

        assert_eq!(llm.calls(), 0);
        assert!(summary.cancelled);
        assert_eq!(summary.rules_created, 0);
        assert_eq!(summary.chunks_total, 10);
        assert_eq!(sink.events()[0].summary["cancelled"], true);
    }

    #[tokio::test]
    async fn cancel_mid_run_keeps_in_flight_results() {
        let cancel = CancelFlag::new();
        let trigger = cancel.clone();
        let llm = FnLlm::new(move |prompt: &str| {
            trigger.cancel();
            Ok(rule_reply(&format!("Control number {}", chunk_index(prompt))))
        });
        let store = Arc::new(MemoryStore::new());
        let config = PipelineConfig {
            workers: 1,
            ..ten_chunk_config()
        };
        let (engine, _) = engine_with(store.clone(), llm.clone(), config);

        let summary = engine.ingest(&ten_chunk_doc(), &cancel).await.unwrap();

        assert_eq!(llm.calls(), 1);
        assert!(summary.cancelled);
        assert_eq!(summary.rules_created, 1);
        assert_eq!(store.count().await.unwrap(), 1);
    }

    /// Slow language service recording overlap and the task each call runs on.
    #[derive(Default)]
    struct Recording {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        tasks: Mutex<HashSet<String>>,
    }

    #[async_trait]
    impl LanguageService for Recording {
        async fn generate(&self, _system: &str, prompt: &str) -> Result<String, LlmError> {
            let task = tokio::task::try_id().map(|id| id.to_string());
            self.tasks.lock().unwrap().insert(task.unwrap_or_else(|| "none".into()));
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(rule_reply(&format!("Control number {}", chunk_index(prompt))))
        }

        fn model(&self) -> &str {
            "recording"
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn chunks_are_extracted_on_parallel_workers() {
        let llm = Arc::new(Recording::default());
        let store = Arc::new(MemoryStore::new());
        let config = PipelineConfig {
            workers: 3,
            ..ten_chunk_config()
        };
        let (engine, _) = engine_with(store.clone(), llm.clone(), config);

        let summary = engine.ingest(&ten_chunk_doc(), &CancelFlag::new()).await.unwrap();
        assert_eq!(summary.rules_created, 10);
        assert_eq!(store.count().await.unwrap(), 10);

        let tasks = llm.tasks.lock().unwrap().clone();
        assert_eq!(tasks.len(), 10, "one spawned task per chunk: {tasks:?}");
        assert!(!tasks.contains("none"));
        let peak = llm.peak.load(Ordering::SeqCst);
        assert!(peak > 1 && peak <= 3, "peak concurrency {peak}");
    }

    #[tokio::test]
    async fn store_outage_fails_the_run() {
        let llm = FnLlm::new(|_: &str| Ok(rule_reply("Rotate keys yearly")));
        let (engine, sink) = engine_with(Arc::new(DownStore), llm, PipelineConfig::default());

        let doc = RawDocument::new("CIS", b"Keys must be rotated every year.".to_vec());
        let err = engine.ingest(&doc, &CancelFlag::new()).await.unwrap_err();
        assert!(matches!(err, EngineError::Store(_)));

        let events = sink.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].status, EventStatus::Error);
        assert_eq!(events[0].summary["doc_id"], doc.doc_id);
    }

    #[tokio::test]
    async fn empty_document_is_rejected() {
        let (engine, sink) = engine_with(Arc::new(MemoryStore::new()), silent_llm(), PipelineConfig::default());
        let doc = RawDocument::new("CIS", b"   \n".to_vec());
        assert!(matches!(
            engine.ingest(&doc, &CancelFlag::new()).await,
            Err(EngineError::Parse(_))
        ));
        assert_eq!(sink.events()[0].status, EventStatus::Error);
    }

    #[tokio::test]
    async fn seeding_twice_is_idempotent() {
        let store = Arc::new(MemoryStore::new());
        let (engine, _) = engine_with(store.clone(), silent_llm(), PipelineConfig::default());

        let first = engine.seed_baseline("azure-storage").await.unwrap();
        assert_eq!(first.inserted, 5);
        let second = engine.seed_baseline("azure-storage").await.unwrap();
        assert_eq!(second.unchanged, 5);
        assert_eq!(store.count().await.unwrap(), 5);
        assert!(store.list("azure-storage").await.unwrap().iter().all(|r| r.embedding.len() == 64));
    }
}
