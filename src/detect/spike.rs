//! Instantaneous out-of-range detection.

use super::{AnomalyEvent, Parameter, SensorReading};
use crate::config::SpikeThresholds;

/// Flags every parameter whose value falls outside its static range.
#[derive(Debug, Clone)]
pub struct SpikeDetector {
    thresholds: SpikeThresholds,
}

impl SpikeDetector {
    pub fn new(thresholds: SpikeThresholds) -> Self {
        Self { thresholds }
    }

    /// One event per violating parameter. Consecutive violating readings are
    /// not deduplicated.
    pub fn detect(&self, reading: &SensorReading) -> Vec<AnomalyEvent> {
        Parameter::ALL
            .into_iter()
            .filter_map(|param| {
                let value = reading.value(param);
                self.thresholds
                    .get(param)
                    .violated_by(value)
                    .then(|| AnomalyEvent::spike(reading, param, value))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::testutil::*;
    use crate::detect::AnomalyKind;

    fn detector() -> SpikeDetector {
        SpikeDetector::new(SpikeThresholds::default())
    }

    #[test]
    fn test_in_range_reading_is_quiet() {
        assert!(detector().detect(&normal(0)).is_empty());
    }

    #[test]
    fn test_low_flow_emits_one_spike_with_value() {
        let events = detector().detect(&with_flow(0, 5.0));
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, AnomalyKind::Spike);
        assert_eq!(events[0].parameter, Some(Parameter::Flow));
        assert_eq!(events[0].value, Some(5.0));
        assert_eq!(events[0].duration_seconds, None);
    }

    #[test]
    fn test_boundaries_are_inclusive() {
        let d = detector();
        assert!(d.detect(&with_flow(0, 10.0)).is_empty());
        assert!(d.detect(&with_flow(0, 120.0)).is_empty());
        assert_eq!(d.detect(&with_flow(0, 120.5)).len(), 1);
    }

    #[test]
    fn test_every_violating_parameter_reports() {
        let reading = SensorReading {
            temperature: 45.0,
            pressure: 0.1,
            flow: 200.0,
            ..normal(0)
        };
        let events = detector().detect(&reading);
        let params: Vec<_> = events.iter().filter_map(|e| e.parameter).collect();
        assert_eq!(params, Parameter::ALL.to_vec());
    }

    #[test]
    fn test_repeated_violations_are_not_deduplicated() {
        let d = detector();
        for secs in 0..3 {
            assert_eq!(d.detect(&with_flow(secs, 5.0)).len(), 1);
        }
    }
}
