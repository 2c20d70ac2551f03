//! Producers for the `readings` channel.
//!
//! These sit outside detection: they publish raw payloads and keep the
//! `last_data_received` freshness marker current for the status endpoint.

pub mod lines;
pub mod simulator;

use anyhow::Result;
use chrono::Utc;

use crate::storage::{MarkerStore, LAST_DATA_RECEIVED};

/// Where `serve` gets its readings from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceKind {
    /// Readings arrive from some other publisher on the bus.
    External,
    /// Built-in synthetic sensor.
    Simulator,
    /// JSON lines from a file, or stdin for `-`.
    Lines(String),
}

pub(crate) fn touch_freshness(markers: &dyn MarkerStore) -> Result<()> {
    markers.set_marker(LAST_DATA_RECEIVED, &Utc::now().to_rfc3339())
}
