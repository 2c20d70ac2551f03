//! The window aggregator runs as two tasks joined by an unbounded queue.
//!
//! The drain task never stops receiving from the `anomalies` channel, so a
//! slow summarizer cannot make the bus drop events for this subscriber. The
//! window task owns the current [`Window`], fills it from the queue and makes
//! the flush decision each time the window deadline passes. Events that
//! arrive while a summary is being generated wait in the queue and land in
//! the next window.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::{flush, Window};
use crate::bus::{BusError, Subscription};
use crate::detect::AnomalyEvent;
use crate::storage::AppendLog;
use crate::summarize::Summarizer;

pub struct WindowAggregator {
    interval: Duration,
    anomalies: Subscription,
    summarizer: Arc<dyn Summarizer>,
    summary_log: Arc<dyn AppendLog>,
}

impl WindowAggregator {
    /// `anomalies` should be subscribed before any producer starts so that
    /// no early events are missed.
    pub fn new(
        interval: Duration,
        anomalies: Subscription,
        summarizer: Arc<dyn Summarizer>,
        summary_log: Arc<dyn AppendLog>,
    ) -> Self {
        Self {
            interval,
            anomalies,
            summarizer,
            summary_log,
        }
    }

    /// Run both tasks until `cancel` fires. A partially filled window is not
    /// flushed on shutdown.
    pub async fn run(self, cancel: CancellationToken) -> Result<()> {
        info!(interval_secs = self.interval.as_secs_f64(), "Starting summary generator");

        let (tx, rx) = mpsc::unbounded_channel();
        let drain = tokio::spawn(drain(self.anomalies, tx, cancel.clone()));
        let windows = tokio::spawn(run_windows(
            rx,
            self.interval,
            self.summarizer,
            self.summary_log,
            cancel,
        ));

        let (drained, windowed) = tokio::join!(drain, windows);
        drained?;
        windowed?;
        info!("Summary generator stopped");
        Ok(())
    }
}

/// Move every decodable event from the bus into the queue.
async fn drain(
    mut anomalies: Subscription,
    queue: mpsc::UnboundedSender<AnomalyEvent>,
    cancel: CancellationToken,
) {
    loop {
        let message = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            message = anomalies.recv() => message,
        };

        match message {
            Ok(payload) => match AnomalyEvent::from_json(&payload) {
                Ok(event) => {
                    if queue.send(event).is_err() {
                        break;
                    }
                }
                Err(e) => error!(error = %e, "Failed to decode anomaly message"),
            },
            Err(BusError::Lagged(dropped)) => {
                warn!(dropped, "Anomaly subscription lagged, events lost");
            }
            Err(e) => {
                info!(error = %e, "Anomaly subscription ended");
                break;
            }
        }
    }
}

/// Fill windows from the queue and flush each one at its deadline.
async fn run_windows(
    mut queue: mpsc::UnboundedReceiver<AnomalyEvent>,
    interval: Duration,
    summarizer: Arc<dyn Summarizer>,
    summary_log: Arc<dyn AppendLog>,
    cancel: CancellationToken,
) {
    let mut window = Window::open(Utc::now(), interval);
    let mut deadline = Instant::now() + interval;

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep_until(deadline) => {
                // events queued while a previous flush ran belong to this window
                while let Ok(event) = queue.try_recv() {
                    window.push(event);
                }
                // the next window starts at this deadline, not after the flush
                let closed = window.take();
                deadline += interval;
                if let Err(e) = flush(closed, summarizer.as_ref(), summary_log.as_ref()).await {
                    error!(error = %e, "Failed to record summary");
                }
            }
            event = queue.recv() => match event {
                Some(event) => window.push(event),
                None => break,
            },
        }
    }

    if !window.is_empty() {
        info!(anomalies = window.len(), "Discarding partial window on shutdown");
    }
}
