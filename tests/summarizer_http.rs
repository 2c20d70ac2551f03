//! Completion summarizer against a local stand-in for the LLM server.

use std::sync::{Arc, Mutex};

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use chrono::{TimeZone, Utc};
use serde_json::{json, Value};

use flowwatch::config::SummarizerConfig;
use flowwatch::detect::{AnomalyEvent, Parameter, SensorReading};
use flowwatch::summarize::{CompletionSummarizer, SummarizeError, Summarizer};

#[derive(Clone, Default)]
struct Captured {
    body: Arc<Mutex<Option<Value>>>,
    auth: Arc<Mutex<Option<String>>>,
}

async fn spawn_server(status: StatusCode, reply: Value) -> (String, Captured) {
    let captured = Captured::default();
    let app = Router::new()
        .route(
            "/v1/completions",
            post(
                move |State(c): State<Captured>, headers: HeaderMap, Json(body): Json<Value>| {
                    let reply = reply.clone();
                    async move {
                        *c.body.lock().unwrap() = Some(body);
                        *c.auth.lock().unwrap() = headers
                            .get("authorization")
                            .and_then(|v| v.to_str().ok())
                            .map(str::to_string);
                        (status, Json(reply))
                    }
                },
            ),
        )
        .with_state(captured.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}/v1"), captured)
}

fn events() -> Vec<AnomalyEvent> {
    let reading = SensorReading {
        timestamp: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 16).unwrap(),
        sensor_id: "wtf-pipe-1".into(),
        temperature: 22.0,
        pressure: 2.0,
        flow: 5.0,
    };
    vec![
        AnomalyEvent::spike(&reading, Parameter::Flow, 5.0),
        AnomalyEvent::drift(&reading, Parameter::Flow, 5.0, 16.0),
    ]
}

fn config(base_url: String) -> SummarizerConfig {
    SummarizerConfig {
        base_url,
        api_key: "secret".into(),
        ..SummarizerConfig::default()
    }
}

#[tokio::test]
async fn test_completion_success() {
    let (base_url, captured) = spawn_server(
        StatusCode::OK,
        json!({ "choices": [{ "text": "  Flow dropped below range and stayed there.\n" }] }),
    )
    .await;

    let summarizer = CompletionSummarizer::new(config(base_url)).unwrap();
    let text = summarizer.summarize(&events()).await.unwrap();
    assert_eq!(text, "Flow dropped below range and stayed there.");

    let body = captured.body.lock().unwrap().clone().unwrap();
    assert_eq!(body["model"], SummarizerConfig::default().model);
    assert_eq!(body["max_tokens"], 512);
    assert!(body["prompt"].as_str().unwrap().contains("Flow spike detected"));
    assert_eq!(
        captured.auth.lock().unwrap().as_deref(),
        Some("Bearer secret")
    );
}

#[tokio::test]
async fn test_completion_error_status() {
    let (base_url, _) = spawn_server(
        StatusCode::INTERNAL_SERVER_ERROR,
        json!({ "error": "model not loaded" }),
    )
    .await;

    let summarizer = CompletionSummarizer::new(config(base_url)).unwrap();
    let err = summarizer.summarize(&events()).await.unwrap_err();
    match err {
        SummarizeError::Status { status, body } => {
            assert_eq!(status, 500);
            assert!(body.contains("model not loaded"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_completion_without_choices() {
    let (base_url, _) = spawn_server(StatusCode::OK, json!({ "choices": [] })).await;

    let summarizer = CompletionSummarizer::new(config(base_url)).unwrap();
    let err = summarizer.summarize(&events()).await.unwrap_err();
    assert!(matches!(err, SummarizeError::EmptyResponse));
}
