use std::time::Duration;

use async_impl::{server, spawn_pipeline, PipelineHandle};
use common::source::SineSource;
use common::TelemetryConfig;
use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

fn fast_config() -> TelemetryConfig {
    TelemetryConfig {
        sensor_count: 2,
        sample_period_ms: 10,
        flush_period_ms: 50,
        ..TelemetryConfig::default()
    }
}

async fn serve(handle: PipelineHandle) -> String {
    let app = server::router(handle, &["*".to_string()]).unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("ws://{addr}/ws")
}

async fn next_event(client: &mut Client) -> serde_json::Value {
    loop {
        let frame = timeout(Duration::from_secs(2), client.next())
            .await
            .expect("no frame within 2s")
            .expect("stream ended")
            .unwrap();
        if let Message::Text(text) = frame {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

async fn wait_for_subscribers(handle: &PipelineHandle, expected: usize) {
    timeout(Duration::from_secs(2), async {
        while handle.subscriber_count() != expected {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("subscriber count stuck at {}", handle.subscriber_count()));
}

#[tokio::test]
async fn batches_arrive_as_tagged_text_frames() {
    let pipeline = spawn_pipeline(&fast_config(), Box::new(SineSource::default())).unwrap();
    let handle = pipeline.handle();
    let (mut client, _) = connect_async(serve(handle.clone()).await).await.unwrap();

    let event = next_event(&mut client).await;
    assert_eq!(event["event"], "sensor-data-batch");
    let snapshots = event["data"].as_array().unwrap();
    assert!(!snapshots.is_empty());
    assert!(snapshots[0]["timestamp"].is_u64());
    assert!(snapshots[0]["sensors"]["sensor_0"].is_f64());
    assert_eq!(handle.subscriber_count(), 1);

    pipeline.shutdown().await;
}

#[tokio::test]
async fn subscribe_request_is_accepted_and_stream_continues() {
    let pipeline = spawn_pipeline(&fast_config(), Box::new(SineSource::default())).unwrap();
    let handle = pipeline.handle();
    let (mut client, _) = connect_async(serve(handle.clone()).await).await.unwrap();
    next_event(&mut client).await;

    let subscribe = serde_json::json!({
        "event": "subscribe",
        "data": { "sensorIds": ["sensor_1"], "startTime": 0 }
    });
    client.send(Message::Text(subscribe.to_string())).await.unwrap();
    client.send(Message::Text("not json".to_string())).await.unwrap();

    // still the full global batch, not filtered to the requested sensor
    for _ in 0..3 {
        let event = next_event(&mut client).await;
        assert_eq!(event["event"], "sensor-data-batch");
        let first = &event["data"][0]["sensors"];
        assert!(first.get("sensor_0").is_some());
    }
    assert_eq!(handle.subscriber_count(), 1);

    pipeline.shutdown().await;
}

#[tokio::test]
async fn closing_the_socket_disconnects_the_subscriber() {
    let pipeline = spawn_pipeline(&fast_config(), Box::new(SineSource::default())).unwrap();
    let handle = pipeline.handle();
    let url = serve(handle.clone()).await;

    let (mut first, _) = connect_async(url.as_str()).await.unwrap();
    let (mut second, _) = connect_async(url.as_str()).await.unwrap();
    next_event(&mut first).await;
    next_event(&mut second).await;
    assert_eq!(handle.subscriber_count(), 2);

    first.close(None).await.unwrap();
    wait_for_subscribers(&handle, 1).await;
    assert_eq!(next_event(&mut second).await["event"], "sensor-data-batch");

    drop(second);
    wait_for_subscribers(&handle, 0).await;

    pipeline.shutdown().await;
}
