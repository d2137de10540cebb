//! Event publishing: one status/result summary per pipeline run.
//!
//! Sinks are fire-and-forget. A sink never reports failure to the pipeline
//! that emitted the event; it logs instead.

pub mod sink;
#[cfg(feature = "http")]
pub mod http;

pub use sink::{EventSink, FanoutSink, MemorySink, TracingSink};
#[cfg(feature = "http")]
pub use http::{HttpPublisher, PublishError};
