//! Sustained out-of-range detection.
//!
//! A drift episode starts on the first out-of-range reading for a parameter
//! and ends on the first in-range one. Once the episode is longer than the
//! configured duration, every further out-of-range reading reports it again
//! with the grown duration.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use super::{seconds_between, AnomalyEvent, Parameter, SensorReading};
use crate::config::DriftThresholds;

/// Per-parameter drift episode.
///
/// `current_duration` is `now - start` while an episode is open and exactly
/// zero otherwise.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DriftState {
    pub start: Option<DateTime<Utc>>,
    pub current_duration: f64,
}

#[derive(Debug, Clone)]
pub struct DriftDetector {
    thresholds: DriftThresholds,
    states: HashMap<Parameter, DriftState>,
}

impl DriftDetector {
    pub fn new(thresholds: DriftThresholds) -> Self {
        let states = Parameter::ALL
            .into_iter()
            .map(|p| (p, DriftState::default()))
            .collect();
        Self { thresholds, states }
    }

    pub fn state(&self, param: Parameter) -> DriftState {
        self.states.get(&param).copied().unwrap_or_default()
    }

    pub fn reset(&mut self) {
        for state in self.states.values_mut() {
            *state = DriftState::default();
        }
    }

    pub fn detect(&mut self, reading: &SensorReading) -> Vec<AnomalyEvent> {
        let now = reading.timestamp;
        let mut events = Vec::new();

        for param in Parameter::ALL {
            let value = reading.value(param);
            let threshold = self.thresholds.get(param);
            let state = self.states.entry(param).or_default();

            if !threshold.range().violated_by(value) {
                *state = DriftState::default();
                continue;
            }

            let start = *state.start.get_or_insert(now);
            state.current_duration = seconds_between(start, now);

            if state.current_duration > threshold.duration_secs {
                events.push(AnomalyEvent::drift(reading, param, value, state.current_duration));
            }
        }

        events
    }
}
