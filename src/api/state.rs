use std::sync::Arc;

use crate::storage::{AppendLog, MarkerStore};

#[derive(Clone)]
pub struct AppState {
    pub anomaly_log: Arc<dyn AppendLog>,
    pub summary_log: Arc<dyn AppendLog>,
    pub markers: Arc<dyn MarkerStore>,
}
