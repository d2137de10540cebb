use std::sync::{Arc, Mutex};

use rulegate_core::PipelineEvent;
use rulegate_core::event::EventStatus;
use tracing::{info, warn};

pub trait EventSink: Send + Sync {
    fn emit(&self, event: PipelineEvent);
}

/// Writes each event to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: PipelineEvent) {
        let summary = event.summary.to_string();
        match event.status {
            EventStatus::Error => warn!(
                pipeline = %event.pipeline,
                timestamp = %event.timestamp.to_rfc3339(),
                %summary,
                "pipeline event"
            ),
            _ => info!(
                pipeline = %event.pipeline,
                status = ?event.status,
                timestamp = %event.timestamp.to_rfc3339(),
                %summary,
                "pipeline event"
            ),
        }
    }
}

/// Keeps every event in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<PipelineEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<PipelineEvent> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl EventSink for MemorySink {
    fn emit(&self, event: PipelineEvent) {
        match self.events.lock() {
            Ok(mut events) => events.push(event),
            Err(poisoned) => poisoned.into_inner().push(event),
        }
    }
}

/// Delivers every event to each inner sink in order.
#[derive(Default, Clone)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl EventSink for FanoutSink {
    fn emit(&self, event: PipelineEvent) {
        if let Some((last, rest)) = self.sinks.split_last() {
            for sink in rest {
                sink.emit(event.clone());
            }
            last.emit(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rulegate_core::event::PIPELINE_DELTA;
    use serde_json::json;

    #[test]
    fn memory_sink_records_in_order() {
        let sink = MemorySink::new();
        sink.emit(PipelineEvent::new(PIPELINE_DELTA, EventStatus::Success, json!({"n": 1})));
        sink.emit(PipelineEvent::new(PIPELINE_DELTA, EventStatus::Error, json!({"n": 2})));
        let events = sink.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].summary["n"], 1);
        assert_eq!(events[1].status, EventStatus::Error);
    }

    #[test]
    fn fanout_reaches_every_sink() {
        let a = Arc::new(MemorySink::new());
        let b = Arc::new(MemorySink::new());
        let fanout = FanoutSink::new()
            .with(a.clone())
            .with(Arc::new(TracingSink))
            .with(b.clone());
        fanout.emit(PipelineEvent::new(PIPELINE_DELTA, EventStatus::Success, json!({})));
        assert_eq!(a.events().len(), 1);
        assert_eq!(b.events().len(), 1);
    }

    #[test]
    fn empty_fanout_is_a_noop() {
        FanoutSink::new().emit(PipelineEvent::new(PIPELINE_DELTA, EventStatus::Success, json!({})));
    }
}
