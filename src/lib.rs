//! flowwatch -- streaming sensor anomaly detection with windowed summaries.
//!
//! Readings flow from the `readings` channel through the [`detect`] engine,
//! which publishes classified anomalies on the `anomalies` channel and
//! appends them to the anomaly log. The [`window`] aggregator buffers those
//! anomalies per interval and records a [`summarize`]d digest for every
//! non-empty window.

pub mod api;
pub mod bus;
pub mod config;
pub mod detect;
pub mod source;
pub mod storage;
pub mod summarize;
pub mod window;

use std::io::BufRead;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;

use crate::bus::{Bus, Publisher, ANOMALIES, READINGS};
use crate::config::{DetectionConfig, FlowwatchConfig};
use crate::detect::{AnomalyEvent, DetectionEngine, SensorReading};
use crate::source::SourceKind;
use crate::storage::{AppendLog, LogTable, MarkerStore, MemoryLog, SqliteLog, SqliteMarkers};
use crate::window::WindowAggregator;

/// Run the full pipeline (source, detection engine, window aggregator and
/// query API) until ctrl-c.
pub async fn serve(config: FlowwatchConfig, source: SourceKind) -> Result<()> {
    // 1. Storage
    let db_path = config.storage.db_path.to_string_lossy().to_string();
    tracing::info!(%db_path, "Initializing database");
    let pool = storage::open_pool(&db_path)?;
    let anomaly_log: Arc<dyn AppendLog> =
        Arc::new(SqliteLog::new(pool.clone(), LogTable::Anomalies));
    let summary_log: Arc<dyn AppendLog> =
        Arc::new(SqliteLog::new(pool.clone(), LogTable::Summaries));
    let markers: Arc<dyn MarkerStore> = Arc::new(SqliteMarkers::new(pool));

    // 2. Bus. Both consumers subscribe before any producer starts.
    let bus = Bus::new(config.bus.capacity);
    let readings = bus.subscribe(READINGS)?;
    let anomalies = bus.subscribe(ANOMALIES)?;
    let publisher: Arc<dyn Publisher> = Arc::new(bus.clone());

    // 3. Consumers
    let summarizer =
        summarize::from_config(&config.summarizer).context("failed to build summarizer")?;
    let engine = DetectionEngine::new(
        config.detection.clone(),
        publisher.clone(),
        anomaly_log.clone(),
    );
    let aggregator = WindowAggregator::new(
        config.window.interval(),
        anomalies,
        summarizer,
        summary_log.clone(),
    );

    let cancel = CancellationToken::new();
    let engine_task = tokio::spawn(engine.run(readings, cancel.clone()));
    let aggregator_task = tokio::spawn(aggregator.run(cancel.clone()));

    // 4. Source
    let source_task = match source {
        SourceKind::External => None,
        SourceKind::Simulator => {
            let sim =
                source::simulator::Simulator::new("wtf-pipe-1", std::time::Duration::from_secs(2));
            Some(tokio::spawn(sim.run(publisher.clone(), markers.clone(), cancel.clone())))
        }
        SourceKind::Lines(path) => {
            let publisher = publisher.clone();
            let markers = markers.clone();
            let cancel = cancel.clone();
            Some(tokio::spawn(async move {
                let result = if path == "-" {
                    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
                    source::lines::publish_lines(stdin, publisher, markers, cancel).await
                } else {
                    match tokio::fs::File::open(&path).await {
                        Ok(file) => {
                            let reader = tokio::io::BufReader::new(file);
                            source::lines::publish_lines(reader, publisher, markers, cancel).await
                        }
                        Err(e) => {
                            Err(anyhow::Error::new(e).context(format!("failed to open {path}")))
                        }
                    }
                };
                if let Err(e) = result {
                    tracing::error!(error = %e, "Input source failed");
                }
            }))
        }
    };

    // 5. Query API
    let api_task = if config.api.enabled {
        let addr: std::net::SocketAddr = config
            .api
            .bind
            .parse()
            .with_context(|| format!("invalid api.bind address: {}", config.api.bind))?;
        let app = api::router(api::state::AppState {
            anomaly_log,
            summary_log,
            markers,
        });
        let listener = tokio::net::TcpListener::bind(addr).await?;
        tracing::info!(%addr, "flowwatch query API listening");
        let shutdown = cancel.clone();
        Some(tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move { shutdown.cancelled().await })
                .await
        }))
    } else {
        None
    };

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown requested");
    cancel.cancel();

    engine_task.await?;
    aggregator_task.await??;
    if let Some(task) = source_task {
        task.await?;
    }
    if let Some(task) = api_task {
        task.await??;
    }
    Ok(())
}

/// Run the detectors over recorded JSON-lines readings without touching the
/// bus or any storage. Malformed lines are logged and skipped.
pub fn replay<R: BufRead>(config: &DetectionConfig, reader: R) -> Result<Vec<AnomalyEvent>> {
    let mut engine = DetectionEngine::new(
        config.clone(),
        Arc::new(Bus::new(1)),
        Arc::new(MemoryLog::new()),
    );

    let mut events = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line.context("failed to read replay input")?;
        if line.trim().is_empty() {
            continue;
        }
        match SensorReading::from_json(&line) {
            Ok(reading) => events.extend(engine.process_reading(&reading)),
            Err(e) => tracing::error!(line = idx + 1, error = %e, "Skipping malformed reading"),
        }
    }
    Ok(events)
}
