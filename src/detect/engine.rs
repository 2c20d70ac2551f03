use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::bus::{BusError, Publisher, Subscription, ANOMALIES};
use crate::config::{DetectionConfig, StatePartition};
use crate::detect::drift::{DriftDetector, DriftState};
use crate::detect::dropout::DropoutDetector;
use crate::detect::spike::SpikeDetector;
use crate::detect::{AnomalyEvent, DetectError, EngineError, Parameter, SensorReading};
use crate::storage::AppendLog;

/// Partition key used when all sensors share one set of state.
const GLOBAL_PARTITION: &str = "*";

/// Stateful detectors for one partition.
#[derive(Debug, Clone)]
struct PartitionState {
    drift: DriftDetector,
    dropout: DropoutDetector,
}

impl PartitionState {
    fn new(config: &DetectionConfig) -> Self {
        Self {
            drift: DriftDetector::new(config.drift.clone()),
            dropout: DropoutDetector::new(config.dropout_threshold_secs),
        }
    }
}

/// Single consumer of the reading stream.
///
/// Owns all detector state; nothing else touches it, so no locking is
/// needed. Events go to the `anomalies` channel and the anomaly log in the
/// order readings arrive.
pub struct DetectionEngine {
    config: DetectionConfig,
    spike: SpikeDetector,
    partitions: HashMap<String, PartitionState>,
    publisher: Arc<dyn Publisher>,
    anomaly_log: Arc<dyn AppendLog>,
}

impl DetectionEngine {
    pub fn new(
        config: DetectionConfig,
        publisher: Arc<dyn Publisher>,
        anomaly_log: Arc<dyn AppendLog>,
    ) -> Self {
        Self {
            spike: SpikeDetector::new(config.spike.clone()),
            config,
            partitions: HashMap::new(),
            publisher,
            anomaly_log,
        }
    }

    fn partition_key<'a>(&self, sensor_id: &'a str) -> &'a str {
        match self.config.partition {
            StatePartition::Global => GLOBAL_PARTITION,
            StatePartition::PerSensor => sensor_id,
        }
    }

    fn partition(&self, sensor_id: &str) -> Option<&PartitionState> {
        self.partitions.get(self.partition_key(sensor_id))
    }

    /// Drift state for `param` as seen by readings from `sensor_id`.
    pub fn drift_state(&self, sensor_id: &str, param: Parameter) -> DriftState {
        self.partition(sensor_id)
            .map(|p| p.drift.state(param))
            .unwrap_or_default()
    }

    /// Dropout timer as seen by readings from `sensor_id`.
    pub fn last_received(&self, sensor_id: &str) -> Option<DateTime<Utc>> {
        self.partition(sensor_id).and_then(|p| p.dropout.last_received())
    }

    /// Forget all drift episodes and dropout timers.
    pub fn reset(&mut self) {
        info!(partitions = self.partitions.len(), "Resetting detector state");
        self.partitions.clear();
    }

    /// Run spike, drift and dropout over one reading, in that order.
    pub fn process_reading(&mut self, reading: &SensorReading) -> Vec<AnomalyEvent> {
        let mut events = self.spike.detect(reading);

        let key = self.partition_key(&reading.sensor_id).to_string();
        let config = &self.config;
        let state = self
            .partitions
            .entry(key)
            .or_insert_with(|| PartitionState::new(config));

        events.extend(state.drift.detect(reading));
        events.extend(state.dropout.detect(reading));
        events
    }

    /// Decode one `readings` payload, detect, and publish and log every event.
    ///
    /// A malformed payload returns [`EngineError::Detect`] before any detector
    /// state is touched.
    pub fn handle_message(&mut self, payload: &str) -> Result<Vec<AnomalyEvent>, EngineError> {
        let reading = SensorReading::from_json(payload)?;
        let events = self.process_reading(&reading);

        for event in &events {
            let json = event.to_json().map_err(DetectError::from)?;
            info!(
                kind = %event.kind,
                sensor_id = %event.sensor_id,
                parameter = ?event.parameter,
                "Detected anomaly: {}", json
            );
            self.publisher
                .publish(ANOMALIES, json.clone())
                .map_err(EngineError::Publish)?;
            self.anomaly_log
                .append(&json)
                .map_err(EngineError::Append)?;
        }

        Ok(events)
    }

    /// Consume `readings` until cancelled or the channel closes.
    ///
    /// Every message is handled in isolation; no error stops the loop.
    pub async fn run(mut self, mut readings: Subscription, cancel: CancellationToken) {
        info!(channel = readings.channel(), "Starting anomaly detector");

        loop {
            let message = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                message = readings.recv() => message,
            };

            match message {
                Ok(payload) => match self.handle_message(&payload) {
                    Ok(_) => {}
                    Err(EngineError::Detect(e)) => {
                        error!(error = %e, "Error processing message, skipping reading");
                    }
                    Err(e) => {
                        error!(error = %e, "Failed to deliver anomaly");
                    }
                },
                Err(BusError::Lagged(dropped)) => {
                    warn!(dropped, "Reading subscription lagged, readings lost");
                }
                Err(e) => {
                    info!(error = %e, "Reading subscription ended");
                    break;
                }
            }
        }

        info!("Anomaly detector stopped");
    }
}
