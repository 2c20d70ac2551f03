//! End-to-end pipeline over the in-process bus: readings in, anomaly log and
//! window summaries out.

use std::sync::Arc;
use std::time::Duration;

use flowwatch::bus::{Bus, Publisher, ANOMALIES, READINGS};
use flowwatch::config::DetectionConfig;
use flowwatch::detect::{AnomalyEvent, AnomalyKind, DetectionEngine};
use flowwatch::storage::{AppendLog, MemoryLog};
use flowwatch::summarize::TemplateSummarizer;
use flowwatch::window::{Summary, WindowAggregator};
use tokio_util::sync::CancellationToken;

fn reading(secs: u32, flow: f64) -> String {
    format!(
        r#"{{"timestamp":"2024-05-01T12:{:02}:{:02}Z","sensor_id":"wtf-pipe-1","temperature":22.0,"pressure":2.0,"flow":{flow}}}"#,
        secs / 60,
        secs % 60
    )
}

struct Pipeline {
    bus: Bus,
    anomaly_log: Arc<MemoryLog>,
    summary_log: Arc<MemoryLog>,
    cancel: CancellationToken,
    engine: tokio::task::JoinHandle<()>,
    aggregator: tokio::task::JoinHandle<anyhow::Result<()>>,
}

impl Pipeline {
    fn start(window: Duration) -> Self {
        let bus = Bus::new(256);
        let anomaly_log = Arc::new(MemoryLog::new());
        let summary_log = Arc::new(MemoryLog::new());
        let cancel = CancellationToken::new();

        let engine = DetectionEngine::new(
            DetectionConfig::default(),
            Arc::new(bus.clone()),
            anomaly_log.clone(),
        );
        let aggregator = WindowAggregator::new(
            window,
            bus.subscribe(ANOMALIES).unwrap(),
            Arc::new(TemplateSummarizer),
            summary_log.clone(),
        );

        let engine = tokio::spawn(engine.run(bus.subscribe(READINGS).unwrap(), cancel.clone()));
        let aggregator = tokio::spawn(aggregator.run(cancel.clone()));

        Self { bus, anomaly_log, summary_log, cancel, engine, aggregator }
    }

    async fn stop(self) {
        self.cancel.cancel();
        self.engine.await.unwrap();
        self.aggregator.await.unwrap().unwrap();
    }
}

#[tokio::test(start_paused = true)]
async fn test_readings_to_summary() {
    let p = Pipeline::start(Duration::from_secs(60));

    // spike at t=0, sustained low flow until t=20, recovery at t=21
    for secs in 0..=20 {
        p.bus.publish(READINGS, reading(secs, 5.0)).unwrap();
    }
    p.bus.publish(READINGS, reading(21, 50.0)).unwrap();
    p.bus.publish(READINGS, "{\"sensor_id\":\"broken\"}".to_string()).unwrap();

    tokio::time::sleep(Duration::from_secs(61)).await;

    let logged: Vec<AnomalyEvent> = p
        .anomaly_log
        .recent(usize::MAX)
        .unwrap()
        .iter()
        .map(|s| AnomalyEvent::from_json(s).unwrap())
        .collect();
    let spikes = logged.iter().filter(|e| e.kind == AnomalyKind::Spike).count();
    let drifts: Vec<f64> = logged
        .iter()
        .rev()
        .filter(|e| e.kind == AnomalyKind::Drift)
        .filter_map(|e| e.duration_seconds)
        .collect();
    assert_eq!(spikes, 21);
    assert_eq!(drifts, vec![16.0, 17.0, 18.0, 19.0, 20.0]);

    let summaries: Vec<Summary> = p
        .summary_log
        .recent(usize::MAX)
        .unwrap()
        .iter()
        .map(|s| serde_json::from_str(s).unwrap())
        .collect();
    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0].source_event_count, 26);
    assert!(summaries[0].text.contains("21 spike (flow)"));
    assert!(summaries[0].text.contains("5 drift (flow)"));

    p.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_dropout_latches_across_windows() {
    let p = Pipeline::start(Duration::from_secs(60));

    p.bus.publish(READINGS, reading(0, 50.0)).unwrap();
    p.bus.publish(READINGS, reading(30, 50.0)).unwrap();
    p.bus.publish(READINGS, reading(32, 50.0)).unwrap();
    p.bus.publish(READINGS, reading(34, 50.0)).unwrap();

    tokio::time::sleep(Duration::from_secs(61)).await;

    let durations: Vec<f64> = p
        .anomaly_log
        .recent(usize::MAX)
        .unwrap()
        .iter()
        .rev()
        .map(|s| AnomalyEvent::from_json(s).unwrap())
        .inspect(|e| assert_eq!(e.kind, AnomalyKind::Dropout))
        .filter_map(|e| e.duration_seconds)
        .collect();
    assert_eq!(durations, vec![30.0, 32.0, 34.0]);
    assert_eq!(p.summary_log.len().unwrap(), 1);

    p.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_quiet_stream_writes_no_summary() {
    let p = Pipeline::start(Duration::from_secs(10));
    for secs in 0..5 {
        p.bus.publish(READINGS, reading(secs * 2, 50.0)).unwrap();
    }

    tokio::time::sleep(Duration::from_secs(35)).await;
    assert!(p.anomaly_log.is_empty().unwrap());
    assert!(p.summary_log.is_empty().unwrap());
    assert_eq!(p.bus.subscriber_count(ANOMALIES), 1);

    p.stop().await;
}
