//! Windowed aggregation of anomaly events into summaries.
//!
//! A [`Window`] collects events for a fixed interval. When it closes, a
//! non-empty window is handed to the [`Summarizer`] and the resulting
//! [`Summary`] is appended to the summary log; an empty one is dropped.

pub mod aggregator;

pub use self::aggregator::WindowAggregator;

use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::detect::AnomalyEvent;
use crate::storage::AppendLog;
use crate::summarize::Summarizer;

/// Summary text recorded when the summarizer fails.
pub const FAILED_SUMMARY_TEXT: &str = "Summary generation failed";

/// Events buffered over one interval.
#[derive(Debug, Clone)]
pub struct Window {
    events: Vec<AnomalyEvent>,
    opened_at: DateTime<Utc>,
    duration: Duration,
}

impl Window {
    pub fn open(opened_at: DateTime<Utc>, duration: Duration) -> Self {
        Self {
            events: Vec::new(),
            opened_at,
            duration,
        }
    }

    pub fn push(&mut self, event: AnomalyEvent) {
        self.events.push(event);
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn events(&self) -> &[AnomalyEvent] {
        &self.events
    }

    pub fn opened_at(&self) -> DateTime<Utc> {
        self.opened_at
    }

    pub fn closes_at(&self) -> DateTime<Utc> {
        self.opened_at
            + chrono::Duration::from_std(self.duration).unwrap_or(chrono::Duration::zero())
    }

    /// Close this window and return it, leaving an empty window that opens
    /// exactly where this one closed.
    pub fn take(&mut self) -> Window {
        let next = Window::open(self.closes_at(), self.duration);
        std::mem::replace(self, next)
    }
}

/// Result of flushing one non-empty window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub id: Uuid,
    pub text: String,
    pub source_event_count: usize,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    /// True when `text` is the fallback because the summarizer failed.
    #[serde(default)]
    pub failed: bool,
}

/// Make the flush decision for a closed window.
///
/// Empty windows produce nothing. Otherwise the summarizer runs once; its
/// failure is recorded as [`FAILED_SUMMARY_TEXT`] and the events are not
/// retried. Only a summary log failure is returned as an error.
pub async fn flush(
    window: Window,
    summarizer: &dyn Summarizer,
    summary_log: &dyn AppendLog,
) -> Result<Option<Summary>> {
    if window.is_empty() {
        debug!(opened_at = %window.opened_at(), "No anomalies detected in the monitoring period");
        return Ok(None);
    }

    info!(anomalies = window.len(), "Processing anomalies in window");
    let (text, failed) = match summarizer.summarize(window.events()).await {
        Ok(text) => (text, false),
        Err(e) => {
            error!(error = %e, anomalies = window.len(), "Error generating summary");
            (FAILED_SUMMARY_TEXT.to_string(), true)
        }
    };

    let summary = Summary {
        id: Uuid::new_v4(),
        text,
        source_event_count: window.len(),
        window_start: window.opened_at(),
        window_end: window.closes_at(),
        created_at: Utc::now(),
        failed,
    };
    info!(summary = %summary.text, "System summary");

    let json = serde_json::to_string(&summary)?;
    summary_log
        .append(&json)
        .context("failed to append summary")?;
    Ok(Some(summary))
}
