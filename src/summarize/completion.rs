use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{prompt, SummarizeError, Summarizer};
use crate::config::SummarizerConfig;
use crate::detect::AnomalyEvent;

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    prompt: String,
    temperature: f64,
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    #[serde(default)]
    text: String,
}

/// Summarizer backed by an OpenAI-compatible `/completions` endpoint.
pub struct CompletionSummarizer {
    client: Client,
    config: SummarizerConfig,
}

impl CompletionSummarizer {
    pub fn new(config: SummarizerConfig) -> Result<Self, SummarizeError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self { client, config })
    }

    fn endpoint(&self) -> String {
        format!("{}/completions", self.config.base_url.trim_end_matches('/'))
    }
}

#[async_trait::async_trait]
impl Summarizer for CompletionSummarizer {
    async fn summarize(&self, events: &[AnomalyEvent]) -> Result<String, SummarizeError> {
        let request = CompletionRequest {
            model: &self.config.model,
            prompt: prompt::build(events)?,
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
        };

        info!(anomalies = events.len(), model = %self.config.model, "Generating summary");
        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SummarizeError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let body: CompletionResponse = response.json().await?;
        let text = body
            .choices
            .into_iter()
            .next()
            .map(|c| c.text.trim().to_string())
            .unwrap_or_default();
        if text.is_empty() {
            return Err(SummarizeError::EmptyResponse);
        }

        debug!(chars = text.len(), "Summary generated");
        Ok(text)
    }
}
