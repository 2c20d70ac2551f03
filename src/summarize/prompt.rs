//! Prompt text for completion-style summarizers.

use crate::detect::AnomalyEvent;

const GUIDELINES: &[&str] = &[
    "Use natural, professional language",
    "Mention specific time ranges and durations",
    "Highlight critical values",
    "Group related anomalies",
    "Note sensor IDs",
    "Never mention JSON structure",
];

/// Render the instruction prompt for one window of events.
pub fn build(events: &[AnomalyEvent]) -> Result<String, serde_json::Error> {
    let formatted = serde_json::to_string_pretty(events)?;

    let mut prompt = String::from(
        "Generate a concise technical summary of water treatment facility anomalies \
         using this JSON data:\n",
    );
    prompt.push_str(&formatted);
    prompt.push_str("\n\nGuidelines:\n");
    for line in GUIDELINES {
        prompt.push_str("- ");
        prompt.push_str(line);
        prompt.push('\n');
    }
    prompt.push_str("\nSummary:\n");
    Ok(prompt)
}
