//! Pipeline operations over explicit collaborator handles.
//!
//! An [`Engine`] owns nothing global: the rule store, language service,
//! embedder and event sink are passed in, so tests swap any of them for
//! scripted fakes. Every public operation emits exactly one terminal event.

pub mod audit;
pub mod delta;
mod error;
pub mod ingest;
pub mod validate;

use std::sync::Arc;

use rulegate_ai::{LanguageService, TextEmbedder};
use rulegate_core::event::EventStatus;
use rulegate_core::{PipelineConfig, PipelineEvent};
use rulegate_events::EventSink;
use rulegate_store::RuleStore;
use serde_json::{Value, json};

pub use error::EngineError;
pub use ingest::{CancelFlag, IngestSummary, SeedSummary};
pub use validate::{ValidationReport, ValidationSummary};

pub struct Engine {
    store: Arc<dyn RuleStore>,
    llm: Arc<dyn LanguageService>,
    embedder: Arc<dyn TextEmbedder>,
    events: Arc<dyn EventSink>,
    config: PipelineConfig,
}

impl Engine {
    pub fn new(
        store: Arc<dyn RuleStore>,
        llm: Arc<dyn LanguageService>,
        embedder: Arc<dyn TextEmbedder>,
        events: Arc<dyn EventSink>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            store,
            llm,
            embedder,
            events,
            config,
        }
    }

    pub fn store(&self) -> &Arc<dyn RuleStore> {
        &self.store
    }

    /// Emit the terminal event for one run of `pipeline`.
    fn finish<T>(
        &self,
        pipeline: &str,
        result: &Result<T, EngineError>,
        summarize: impl FnOnce(&T) -> Value,
        context: Value,
    ) {
        let event = match result {
            Ok(value) => PipelineEvent::new(pipeline, EventStatus::Success, summarize(value)),
            Err(e) => {
                let mut summary = context;
                if let Value::Object(map) = &mut summary {
                    map.insert("error".into(), json!(e.to_string()));
                }
                PipelineEvent::new(pipeline, EventStatus::Error, summary)
            }
        };
        self.events.emit(event);
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Fakes shared by the operation tests.

    use std::sync::Mutex;

    use async_trait::async_trait;
    use rulegate_ai::{HashingEmbedder, LlmError};
    use rulegate_core::Rule;
    use rulegate_events::MemorySink;
    use rulegate_store::{MemoryStore, ScoredRule, StoreError, UpsertOutcome};

    use super::*;

    /// Answers every prompt with `reply(prompt)` and counts calls.
    pub struct FnLlm<F> {
        reply: F,
        pub calls: Mutex<usize>,
    }

    impl<F> FnLlm<F>
    where
        F: Fn(&str) -> Result<String, LlmError> + Send + Sync,
    {
        pub fn new(reply: F) -> Arc<Self> {
            Arc::new(Self {
                reply,
                calls: Mutex::new(0),
            })
        }

        pub fn calls(&self) -> usize {
            *self.calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl<F> LanguageService for FnLlm<F>
    where
        F: Fn(&str) -> Result<String, LlmError> + Send + Sync,
    {
        async fn generate(&self, _system: &str, prompt: &str) -> Result<String, LlmError> {
            *self.calls.lock().unwrap() += 1;
            (self.reply)(prompt)
        }

        fn model(&self) -> &str {
            "fake"
        }
    }

    /// A store whose every operation reports it unreachable.
    pub struct DownStore;

    #[async_trait]
    impl RuleStore for DownStore {
        async fn upsert(&self, _rule: Rule) -> Result<UpsertOutcome, StoreError> {
            Err(StoreError::Unavailable("connection refused".into()))
        }
        async fn get(&self, _rule_id: &str) -> Result<Option<Rule>, StoreError> {
            Err(StoreError::Unavailable("connection refused".into()))
        }
        async fn list(&self, _framework: &str) -> Result<Vec<Rule>, StoreError> {
            Err(StoreError::Unavailable("connection refused".into()))
        }
        async fn search(
            &self,
            _framework: &str,
            _query: &[f32],
            _limit: usize,
        ) -> Result<Vec<ScoredRule>, StoreError> {
            Err(StoreError::Unavailable("connection refused".into()))
        }
        async fn purge(&self, _framework: &str) -> Result<usize, StoreError> {
            Err(StoreError::Unavailable("connection refused".into()))
        }
        async fn frameworks(&self) -> Result<Vec<String>, StoreError> {
            Err(StoreError::Unavailable("connection refused".into()))
        }
        async fn count(&self) -> Result<usize, StoreError> {
            Err(StoreError::Unavailable("connection refused".into()))
        }
    }

    /// A store whose similarity index is offline but listing works.
    pub struct NoIndexStore(pub MemoryStore);

    #[async_trait]
    impl RuleStore for NoIndexStore {
        async fn upsert(&self, rule: Rule) -> Result<UpsertOutcome, StoreError> {
            self.0.upsert(rule).await
        }
        async fn get(&self, rule_id: &str) -> Result<Option<Rule>, StoreError> {
            self.0.get(rule_id).await
        }
        async fn list(&self, framework: &str) -> Result<Vec<Rule>, StoreError> {
            self.0.list(framework).await
        }
        async fn search(
            &self,
            _framework: &str,
            _query: &[f32],
            _limit: usize,
        ) -> Result<Vec<ScoredRule>, StoreError> {
            Err(StoreError::IndexUnavailable("collection not loaded".into()))
        }
        async fn purge(&self, framework: &str) -> Result<usize, StoreError> {
            self.0.purge(framework).await
        }
        async fn frameworks(&self) -> Result<Vec<String>, StoreError> {
            self.0.frameworks().await
        }
        async fn count(&self) -> Result<usize, StoreError> {
            self.0.count().await
        }
    }

    pub fn engine_with(
        store: Arc<dyn RuleStore>,
        llm: Arc<dyn LanguageService>,
        config: PipelineConfig,
    ) -> (Engine, Arc<MemorySink>) {
        let sink = Arc::new(MemorySink::new());
        let engine = Engine::new(
            store,
            llm,
            Arc::new(HashingEmbedder::new(64)),
            sink.clone(),
            config,
        );
        (engine, sink)
    }

    /// An LLM that is never expected to be called.
    pub fn silent_llm() -> Arc<dyn LanguageService> {
        FnLlm::new(|_: &str| Ok("[]".to_string()))
    }
}
