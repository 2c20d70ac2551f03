//! Turning a window of anomalies into operator-facing text.
//!
//! The aggregator only sees the [`Summarizer`] trait. [`completion`] talks to
//! an OpenAI-compatible completion endpoint (llama.cpp, vLLM, OpenAI);
//! [`template`] renders a deterministic digest without any network.

pub mod completion;
pub mod prompt;
pub mod template;

use std::sync::Arc;

use thiserror::Error;

use crate::config::{SummarizerBackend, SummarizerConfig};
use crate::detect::AnomalyEvent;

pub use self::completion::CompletionSummarizer;
pub use self::template::TemplateSummarizer;

#[derive(Debug, Error)]
pub enum SummarizeError {
    #[error("summarizer request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("summarizer returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("summarizer returned no text")]
    EmptyResponse,
    #[error("failed to encode anomalies: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Fallible, possibly slow text generation over a batch of events.
#[async_trait::async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, events: &[AnomalyEvent]) -> Result<String, SummarizeError>;
}

/// Build the summarizer selected in `config`.
pub fn from_config(config: &SummarizerConfig) -> Result<Arc<dyn Summarizer>, SummarizeError> {
    Ok(match config.backend {
        SummarizerBackend::Completion => Arc::new(CompletionSummarizer::new(config.clone())?),
        SummarizerBackend::Template => Arc::new(TemplateSummarizer),
    })
}
