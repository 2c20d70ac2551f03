//! Synthetic water-pipe sensor.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, SubsecRound, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::touch_freshness;
use crate::bus::{Publisher, READINGS};
use crate::detect::SensorReading;
use crate::storage::MarkerStore;

/// Chance that any single value is pushed outside its normal range.
pub const ANOMALY_CHANCE: f64 = 0.05;

pub struct Simulator {
    sensor_id: String,
    interval: Duration,
    rng: StdRng,
}

impl Simulator {
    pub fn new(sensor_id: impl Into<String>, interval: Duration) -> Self {
        Self {
            sensor_id: sensor_id.into(),
            interval,
            rng: StdRng::from_entropy(),
        }
    }

    /// Deterministic simulator for tests.
    pub fn seeded(sensor_id: impl Into<String>, interval: Duration, seed: u64) -> Self {
        Self {
            sensor_id: sensor_id.into(),
            interval,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Uniform in `[min, max]` rounded to one decimal, or with
    /// [`ANOMALY_CHANCE`] a value 5 to 10 units outside the range.
    fn value(&mut self, min: f64, max: f64) -> f64 {
        let raw = if self.rng.gen::<f64>() < ANOMALY_CHANCE {
            let offset = self.rng.gen_range(5.0..10.0);
            if self.rng.gen::<bool>() {
                min - offset
            } else {
                max + offset
            }
        } else {
            self.rng.gen_range(min..=max)
        };
        (raw * 10.0).round() / 10.0
    }

    pub fn reading(&mut self, now: DateTime<Utc>) -> SensorReading {
        SensorReading {
            timestamp: now.trunc_subsecs(0),
            sensor_id: self.sensor_id.clone(),
            temperature: self.value(10.0, 35.0),
            pressure: self.value(1.0, 3.0),
            flow: self.value(20.0, 100.0),
        }
    }

    /// Publish a reading every `interval` until cancelled.
    pub async fn run(
        mut self,
        publisher: Arc<dyn Publisher>,
        markers: Arc<dyn MarkerStore>,
        cancel: CancellationToken,
    ) {
        info!(sensor_id = %self.sensor_id, "Starting data generator");
        let mut ticker = tokio::time::interval(self.interval);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let reading = self.reading(Utc::now());
            let payload = match serde_json::to_string(&reading) {
                Ok(p) => p,
                Err(e) => {
                    warn!(error = %e, "Failed to encode reading");
                    continue;
                }
            };
            debug!(%payload, "Generated sensor data");

            if let Err(e) = publisher.publish(READINGS, payload) {
                warn!(error = %e, "Failed to publish reading");
                continue;
            }
            if let Err(e) = touch_freshness(markers.as_ref()) {
                warn!(error = %e, "Failed to update freshness marker");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::Bus;
    use crate::storage::{MemoryMarkers, LAST_DATA_RECEIVED};

    #[test]
    fn test_values_stay_near_normal_ranges() {
        let mut sim = Simulator::seeded("wtf-pipe-1", Duration::from_secs(2), 7);
        for _ in 0..500 {
            let r = sim.reading(Utc::now());
            assert!((0.0..=45.0).contains(&r.temperature), "{}", r.temperature);
            assert!((-9.0..=13.0).contains(&r.pressure), "{}", r.pressure);
            assert!((10.0..=110.0).contains(&r.flow), "{}", r.flow);
            assert_eq!((r.flow * 10.0).round() / 10.0, r.flow);
        }
    }

    #[test]
    fn test_timestamps_are_whole_seconds() {
        let mut sim = Simulator::seeded("wtf-pipe-1", Duration::from_secs(2), 1);
        let r = sim.reading(Utc::now());
        assert_eq!(r.timestamp.timestamp_subsec_nanos(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_publishes_and_marks_freshness() {
        let bus = Bus::new(16);
        let mut readings = bus.subscribe(READINGS).unwrap();
        let markers = Arc::new(MemoryMarkers::new());
        let cancel = CancellationToken::new();

        let sim = Simulator::seeded("wtf-pipe-9", Duration::from_secs(2), 3);
        let handle = tokio::spawn(sim.run(Arc::new(bus.clone()), markers.clone(), cancel.clone()));

        let first = SensorReading::from_json(&readings.recv().await.unwrap()).unwrap();
        assert_eq!(first.sensor_id, "wtf-pipe-9");
        readings.recv().await.unwrap();

        cancel.cancel();
        handle.await.unwrap();
        assert!(markers.marker(LAST_DATA_RECEIVED).unwrap().is_some());
    }
}
