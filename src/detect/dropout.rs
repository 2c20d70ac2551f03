//! Gap detection between consecutive readings.
//!
//! When a gap is flagged the timer keeps its pre-gap value, so every later
//! reading is measured against that same instant and keeps reporting a
//! dropout until [`DropoutDetector::reset`] is called.

use chrono::{DateTime, Utc};

use super::{seconds_between, AnomalyEvent, SensorReading};

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DropoutTimer {
    pub last_received: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct DropoutDetector {
    threshold_secs: f64,
    timer: DropoutTimer,
}

impl DropoutDetector {
    pub fn new(threshold_secs: f64) -> Self {
        Self {
            threshold_secs,
            timer: DropoutTimer::default(),
        }
    }

    pub fn last_received(&self) -> Option<DateTime<Utc>> {
        self.timer.last_received
    }

    pub fn reset(&mut self) {
        self.timer = DropoutTimer::default();
    }

    pub fn detect(&mut self, reading: &SensorReading) -> Vec<AnomalyEvent> {
        let now = reading.timestamp;

        if let Some(last) = self.timer.last_received {
            let gap = seconds_between(last, now);
            if gap > self.threshold_secs {
                return vec![AnomalyEvent::dropout(reading, gap)];
            }
        }

        self.timer.last_received = Some(now);
        Vec::new()
    }
}
