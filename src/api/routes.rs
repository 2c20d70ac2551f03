//! API route definitions.

use axum::extract::{Query, State};
use axum::{routing::get, Json, Router};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};

use super::state::AppState;
use super::ApiError;
use crate::detect::seconds_between;
use crate::storage::LAST_DATA_RECEIVED;

/// Default and maximum page sizes for list endpoints.
const DEFAULT_LIMIT: usize = 100;
const MAX_LIMIT: usize = 1000;

/// Seconds without a reading before the data stream counts as stale.
const STATUS_WINDOW_SECS: f64 = 60.0;

pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/anomalies", get(list_anomalies))
        .route("/summaries", get(list_summaries))
        .route("/status", get(status))
}

#[derive(Debug, Deserialize)]
pub struct ListParams {
    limit: Option<usize>,
}

impl ListParams {
    fn limit(&self) -> usize {
        self.limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT)
    }
}

/// Stored entries are JSON; anything that no longer parses is returned as a
/// plain string rather than failing the whole page.
fn decode(entries: Vec<String>) -> Vec<Value> {
    entries
        .into_iter()
        .map(|e| serde_json::from_str(&e).unwrap_or(Value::String(e)))
        .collect()
}

async fn health() -> Json<Value> {
    Json(json!({
        "data": {
            "status": "ok",
            "version": env!("CARGO_PKG_VERSION")
        },
        "meta": {
            "timestamp": Utc::now().to_rfc3339(),
            "version": env!("CARGO_PKG_VERSION")
        }
    }))
}

async fn list_anomalies(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Json<Value>, ApiError> {
    let entries = state.anomaly_log.recent(params.limit())?;
    let total = state.anomaly_log.len()?;
    Ok(Json(json!({ "data": decode(entries), "meta": { "total": total } })))
}

async fn list_summaries(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Json<Value>, ApiError> {
    let total = state.summary_log.len()?;
    if total == 0 {
        return Ok(Json(json!({
            "data": [],
            "meta": { "total": 0, "message": "No summaries available" }
        })));
    }
    let entries = state.summary_log.recent(params.limit())?;
    Ok(Json(json!({ "data": decode(entries), "meta": { "total": total } })))
}

async fn status(State(state): State<AppState>) -> Json<Value> {
    let storage = match state.anomaly_log.len() {
        Ok(_) => json!({ "connected": true, "message": "Storage connected" }),
        Err(e) => {
            return Json(json!({
                "data": {
                    "storage": { "connected": false, "message": format!("Storage error: {e}") },
                    "data_stream": { "healthy": false, "last_received": null, "message": "" }
                }
            }));
        }
    };

    let data_stream = match state.markers.marker(LAST_DATA_RECEIVED) {
        Ok(Some(raw)) => match DateTime::parse_from_rfc3339(&raw) {
            Ok(ts) => {
                let elapsed = seconds_between(ts.with_timezone(&Utc), Utc::now());
                let healthy = elapsed < STATUS_WINDOW_SECS;
                let message = if healthy {
                    "Data flowing normally".to_string()
                } else {
                    format!("No data received for {elapsed:.1} seconds")
                };
                json!({ "healthy": healthy, "last_received": raw, "message": message })
            }
            Err(e) => json!({
                "healthy": false,
                "last_received": raw,
                "message": format!("Unreadable freshness marker: {e}")
            }),
        },
        Ok(None) => json!({
            "healthy": false,
            "last_received": null,
            "message": "No data received yet"
        }),
        Err(e) => json!({
            "healthy": false,
            "last_received": null,
            "message": format!("Storage error: {e}")
        }),
    };

    Json(json!({ "data": { "storage": storage, "data_stream": data_stream } }))
}
