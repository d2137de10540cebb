//! Webhook publisher: POSTs each pipeline event as JSON to `{base_url}/events`.

use std::sync::Mutex;

use rulegate_core::PipelineEvent;
use thiserror::Error;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::EventSink;

#[derive(Error, Debug)]
pub enum PublishError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("server returned {status}: {body}")]
    Server { status: u16, body: String },
}

/// HTTP event publisher.
///
/// `emit` spawns the POST on the current tokio runtime and returns at once;
/// `drain` waits for everything still in flight.
pub struct HttpPublisher {
    client: reqwest::Client,
    base_url: String,
    pending: Mutex<JoinSet<()>>,
}

impl HttpPublisher {
    /// `base_url` should be like `http://localhost:8080` (no trailing slash).
    pub fn new(base_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            pending: Mutex::new(JoinSet::new()),
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/events", self.base_url)
    }

    /// Deliver one event and wait for the server's answer.
    pub async fn publish(&self, event: &PipelineEvent) -> Result<(), PublishError> {
        post(&self.client, &self.endpoint(), event).await
    }

    /// Wait for every spawned delivery to finish.
    pub async fn drain(&self) {
        let mut set = match self.pending.lock() {
            Ok(mut guard) => std::mem::take(&mut *guard),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        };
        while set.join_next().await.is_some() {}
    }

    /// Spawn a delivery, first dropping deliveries that already finished.
    fn track<F>(&self, task: F, handle: &tokio::runtime::Handle)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut set = match self.pending.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        while set.try_join_next().is_some() {}
        set.spawn_on(task, handle);
    }
}

async fn post(client: &reqwest::Client, url: &str, event: &PipelineEvent) -> Result<(), PublishError> {
    let resp = client.post(url).json(event).send().await?;
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(PublishError::Server {
            status: status.as_u16(),
            body,
        });
    }
    debug!(url, pipeline = %event.pipeline, "event published");
    Ok(())
}

impl EventSink for HttpPublisher {
    fn emit(&self, event: PipelineEvent) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!(pipeline = %event.pipeline, "no async runtime, event dropped");
            return;
        };
        let client = self.client.clone();
        let url = self.endpoint();
        self.track(
            async move {
                if let Err(e) = post(&client, &url, &event).await {
                    warn!(url = %url, pipeline = %event.pipeline, error = %e, "event publish failed");
                }
            },
            &handle,
        );
    }
}
