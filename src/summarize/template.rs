//! Network-free summaries for offline runs and demos.

use std::collections::BTreeMap;

use super::{SummarizeError, Summarizer};
use crate::detect::{AnomalyEvent, AnomalyKind};

/// Renders a one-paragraph digest: time span, counts per kind and the
/// parameters and sensors involved.
#[derive(Debug, Default, Clone, Copy)]
pub struct TemplateSummarizer;

impl TemplateSummarizer {
    pub fn render(events: &[AnomalyEvent]) -> String {
        let (Some(first), Some(last)) = (
            events.iter().map(|e| e.timestamp).min(),
            events.iter().map(|e| e.timestamp).max(),
        ) else {
            return "No anomalies detected in the monitoring period.".to_string();
        };

        let mut by_kind: BTreeMap<String, (usize, Vec<String>)> = BTreeMap::new();
        let mut sensors: Vec<&str> = Vec::new();
        let mut longest_drift: f64 = 0.0;

        for event in events {
            let entry = by_kind.entry(event.kind.to_string()).or_default();
            entry.0 += 1;
            if let Some(param) = event.parameter {
                let name = param.to_string();
                if !entry.1.contains(&name) {
                    entry.1.push(name);
                }
            }
            if !sensors.contains(&event.sensor_id.as_str()) {
                sensors.push(&event.sensor_id);
            }
            if event.kind == AnomalyKind::Drift {
                longest_drift = longest_drift.max(event.duration_seconds.unwrap_or(0.0));
            }
        }

        let parts: Vec<String> = by_kind
            .iter()
            .map(|(kind, (count, params))| {
                if params.is_empty() {
                    format!("{count} {kind}")
                } else {
                    format!("{count} {kind} ({})", params.join(", "))
                }
            })
            .collect();

        let mut text = format!(
            "{} anomalies on {} between {} and {}: {}.",
            events.len(),
            sensors.join(", "),
            first.to_rfc3339(),
            last.to_rfc3339(),
            parts.join(", ")
        );
        if longest_drift > 0.0 {
            text.push_str(&format!(" Longest drift lasted {longest_drift:.1}s."));
        }
        text
    }
}

#[async_trait::async_trait]
impl Summarizer for TemplateSummarizer {
    async fn summarize(&self, events: &[AnomalyEvent]) -> Result<String, SummarizeError> {
        Ok(Self::render(events))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::testutil::*;
    use crate::detect::Parameter;

    #[test]
    fn test_render_counts_kinds_and_parameters() {
        let events = vec![
            AnomalyEvent::spike(&with_flow(0, 5.0), Parameter::Flow, 5.0),
            AnomalyEvent::spike(&with_flow(1, 5.0), Parameter::Flow, 5.0),
            AnomalyEvent::drift(&with_flow(17, 5.0), Parameter::Flow, 5.0, 17.0),
            AnomalyEvent::dropout(&normal(40), 23.0),
        ];
        let text = TemplateSummarizer::render(&events);

        assert!(text.starts_with("4 anomalies on wtf-pipe-1 between 2024-05-01T12:00:00+00:00"));
        assert!(text.contains("1 drift (flow)"));
        assert!(text.contains("1 dropout"));
        assert!(text.contains("2 spike (flow)"));
        assert!(text.ends_with("Longest drift lasted 17.0s."));
    }

    #[test]
    fn test_render_empty() {
        assert_eq!(
            TemplateSummarizer::render(&[]),
            "No anomalies detected in the monitoring period."
        );
    }
}
