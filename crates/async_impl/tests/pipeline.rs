use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_impl::{server, spawn_pipeline};
use axum::body::Body;
use axum::http::{Request, StatusCode};
use common::source::SineSource;
use common::{ConfigError, RetentionWindow, SensorBatch, TelemetryConfig};
use tokio::sync::mpsc;
use tower::ServiceExt;
use viewer::{forward_batches, run_subscriber, RecordingTarget, SubscriberSession};

fn nominal_config() -> TelemetryConfig {
    TelemetryConfig {
        sensor_count: 3,
        sample_period_ms: 100,
        flush_period_ms: 500,
        ..TelemetryConfig::default()
    }
}

fn drain(rx: &mut mpsc::Receiver<Arc<SensorBatch>>) -> Vec<Arc<SensorBatch>> {
    let mut batches = Vec::new();
    while let Ok(batch) = rx.try_recv() {
        batches.push(batch);
    }
    batches
}

#[tokio::test(start_paused = true)]
async fn first_second_delivers_two_batches_of_about_five() {
    let pipeline = spawn_pipeline(&nominal_config(), Box::new(SineSource::default())).unwrap();
    let (_, mut rx) = pipeline.handle().connect();

    tokio::time::sleep(Duration::from_millis(1_050)).await;
    let batches = drain(&mut rx);

    assert_eq!(batches.len(), 2);
    for batch in &batches {
        assert!((4..=6).contains(&batch.len()), "batch of {}", batch.len());
        assert!(batch.snapshots().iter().all(|s| s.readings.len() == 3));
    }
    let total: usize = batches.iter().map(|b| b.len()).sum();
    assert!((9..=10).contains(&total));

    pipeline.shutdown().await;
}

#[tokio::test]
async fn invalid_config_is_rejected_before_spawning() {
    let zero_queue = TelemetryConfig {
        subscriber_queue_capacity: 0,
        ..nominal_config()
    };
    let zero_buffer = TelemetryConfig {
        buffer_capacity: Some(0),
        ..nominal_config()
    };
    let zero_sample = TelemetryConfig {
        sample_period_ms: 0,
        ..nominal_config()
    };
    let zero_flush = TelemetryConfig {
        flush_period_ms: 0,
        ..nominal_config()
    };

    for config in [zero_queue, zero_buffer, zero_sample, zero_flush] {
        let result = spawn_pipeline(&config, Box::new(SineSource::default()));
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }
}

#[tokio::test(start_paused = true)]
async fn delivered_batches_concatenate_to_generated_sequence() {
    let pipeline = spawn_pipeline(&nominal_config(), Box::new(SineSource::default())).unwrap();
    let (_, mut rx) = pipeline.handle().connect();

    tokio::time::sleep(Duration::from_millis(3_270)).await;
    let handle = pipeline.shutdown().await;

    let mut timestamps = Vec::new();
    while let Some(batch) = rx.recv().await {
        timestamps.extend(batch.snapshots().iter().map(|s| s.timestamp));
    }

    let generated = handle.diagnostics().snapshots_generated as usize;
    assert_eq!(timestamps.len(), generated);
    assert!(timestamps.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(handle.pending_snapshots(), 0);
}

#[tokio::test(start_paused = true)]
async fn empty_flush_sends_nothing() {
    let config = TelemetryConfig {
        sample_period_ms: 10_000,
        flush_period_ms: 500,
        ..nominal_config()
    };
    let pipeline = spawn_pipeline(&config, Box::new(SineSource::default())).unwrap();
    let (_, mut rx) = pipeline.handle().connect();

    tokio::time::sleep(Duration::from_millis(2_100)).await;
    assert!(drain(&mut rx).is_empty());

    let diagnostics = pipeline.handle().diagnostics();
    assert_eq!(diagnostics.batches_flushed, 0);
    assert!(diagnostics.empty_flushes >= 4);
    pipeline.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn stalled_subscriber_is_dropped_without_affecting_others() {
    let config = TelemetryConfig {
        subscriber_queue_capacity: 1,
        ..nominal_config()
    };
    let pipeline = spawn_pipeline(&config, Box::new(SineSource::default())).unwrap();
    let handle = pipeline.handle();
    let (_, mut stalled) = handle.connect();
    let (_, mut healthy) = handle.connect();

    // read between flush ticks: 750, 1250, 1750 ms
    tokio::time::sleep(Duration::from_millis(250)).await;
    let mut received = 0;
    for _ in 0..3 {
        tokio::time::sleep(Duration::from_millis(500)).await;
        received += drain(&mut healthy).len();
    }

    assert_eq!(received, 3);
    assert_eq!(handle.subscriber_count(), 1);
    assert_eq!(handle.diagnostics().delivery_failures, 1);

    assert_eq!(drain(&mut stalled).len(), 1);
    assert!(stalled.recv().await.is_none());
    pipeline.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn viewer_history_stays_bounded_after_one_second() {
    let pipeline = spawn_pipeline(&nominal_config(), Box::new(SineSource::default())).unwrap();
    let (_, batches) = pipeline.handle().connect();

    let target = Arc::new(Mutex::new(RecordingTarget::default()));
    let session = SubscriberSession::new(
        common::sensor_ids(3),
        RetentionWindow::OneMinute,
        Arc::clone(&target),
    );
    let (events_tx, events_rx) = mpsc::channel(16);
    tokio::spawn(forward_batches(batches, events_tx));
    let driver = tokio::spawn(run_subscriber(events_rx, session, None));

    tokio::time::sleep(Duration::from_millis(1_050)).await;
    {
        let target = target.lock().unwrap();
        for sensor in common::sensor_ids(3) {
            let points = target.canvas.points(&sensor).unwrap();
            assert!(!points.is_empty() && points.len() <= 10, "{sensor}: {}", points.len());
        }
    }

    pipeline.shutdown().await;
    let session = driver.await.unwrap();
    assert!(!session.is_connected());
    assert!(session.consumer().histories().is_empty());
}

#[tokio::test]
async fn health_endpoint_reports_subscribers() {
    let pipeline = spawn_pipeline(&nominal_config(), Box::new(SineSource::default())).unwrap();
    let handle = pipeline.handle();
    let _conn = handle.connect();

    let app = server::router(handle, &["*".to_string()]).unwrap();
    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["status"], "ok");
    assert_eq!(json["subscribers"], 1);

    pipeline.shutdown().await;
}
