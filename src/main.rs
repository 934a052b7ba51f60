mod menu;

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use common::config::load_config;
use common::source::source_from_config;
use common::{FlushRecord, SensorId, TelemetryConfig};
use viewer::{
    forward_batches, run_subscriber, RecordingTarget, RenderOp, SeriesCanvas, SubscriberEvent,
    SubscriberSession,
};

const DEFAULT_CONFIG: &str = "configs/telemetry.toml";
const DEMO_DURATION: Duration = Duration::from_secs(4);

fn main() -> Result<()> {
    let config_path = std::env::args().nth(1).unwrap_or_else(|| DEFAULT_CONFIG.to_string());
    let config = load_config(&config_path)
        .with_context(|| format!("failed to load {config_path}"))?;
    init_tracing(&config.log_level)?;

    println!("===========================================");
    println!("Welcome to Telemetry Stream");
    println!("===========================================");

    loop {
        menu::show_menu();

        let result = match menu::get_user_choice()? {
            Some(1) => run_server(&config),
            Some(2) => run_async_viewer_demo(&config),
            Some(3) => run_threaded_viewer_demo(&config),
            Some(4) => run_dashboard(&config_path),
            Some(5) => {
                println!("Goodbye!");
                break;
            }
            _ => {
                println!("Invalid choice. Please select 1-5.");
                continue;
            }
        };

        if let Err(err) = result {
            println!("Error: {err:#}");
        }
        menu::wait_for_enter();
    }

    Ok(())
}

fn init_tracing(default_level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .context("invalid log level")?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
    Ok(())
}

fn run_server(config: &TelemetryConfig) -> Result<()> {
    println!("\n=== Telemetry Server ===");
    println!(
        "{} sensors, sampling every {}ms, flushing every {}ms",
        config.sensor_count, config.sample_period_ms, config.flush_period_ms
    );
    println!("Press Ctrl+C to stop the server");

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        let pipeline = async_impl::spawn_pipeline(config, source_from_config(config))?;
        let app = async_impl::server::router(pipeline.handle(), &config.allowed_origins)?;

        tokio::select! {
            result = async_impl::server::serve(&config.listen_addr, app) => result?,
            _ = tokio::signal::ctrl_c() => info!("shutdown requested"),
        }

        let handle = pipeline.shutdown().await;
        display_flushes(&handle.recorder().get_results());
        Ok::<_, anyhow::Error>(())
    })
}

fn run_async_viewer_demo(config: &TelemetryConfig) -> Result<()> {
    println!("\n=== Console Viewer (async pipeline) ===");
    let sensors = config.sensor_ids();
    println!("Viewing {} for {}s", sensors.join(", "), DEMO_DURATION.as_secs());

    let rt = tokio::runtime::Runtime::new()?;
    let target = Arc::new(Mutex::new(RecordingTarget::default()));

    rt.block_on(async {
        let pipeline = async_impl::spawn_pipeline(config, source_from_config(config))?;
        let (_, batches) = pipeline.handle().connect();
        let (events, rx) = mpsc::channel(config.subscriber_queue_capacity);

        let session =
            SubscriberSession::new(sensors.clone(), config.default_retention, Arc::clone(&target));
        let forwarder = tokio::spawn(forward_batches(batches, events.clone()));
        let viewer = tokio::spawn(run_subscriber(rx, session, config.redraw_interval()));

        tokio::time::sleep(DEMO_DURATION / 2).await;
        let narrowed = narrowed_selection(&sensors);
        println!("Narrowing selection to {}", narrowed.join(", "));
        events.send(SubscriberEvent::SelectionChanged(narrowed)).await?;
        drop(events);
        tokio::time::sleep(DEMO_DURATION / 2).await;

        display_canvas(&target.lock().expect("render target lock poisoned").canvas);

        let handle = pipeline.shutdown().await;
        forwarder.await?;
        viewer.await?;
        display_flushes(&handle.recorder().get_results());
        Ok::<_, anyhow::Error>(())
    })?;

    display_ops(target.lock().expect("render target lock poisoned").ops());
    Ok(())
}

fn run_threaded_viewer_demo(config: &TelemetryConfig) -> Result<()> {
    println!("\n=== Console Viewer (threaded pipeline) ===");
    let sensors = config.sensor_ids();
    println!("Viewing {} for {}s", sensors.join(", "), DEMO_DURATION.as_secs());

    let pipeline = threaded_impl::start_pipeline(config, source_from_config(config))?;
    let (_, batches) = pipeline.handle().connect();
    let mut session =
        SubscriberSession::new(sensors.clone(), config.default_retention, RecordingTarget::default());
    session.apply(SubscriberEvent::Connected, common::epoch_millis());

    let started = Instant::now();
    let mut narrowed = false;
    while started.elapsed() < DEMO_DURATION {
        if !narrowed && started.elapsed() >= DEMO_DURATION / 2 {
            let selection = narrowed_selection(&sensors);
            println!("Narrowing selection to {}", selection.join(", "));
            session.apply(SubscriberEvent::SelectionChanged(selection), common::epoch_millis());
            narrowed = true;
        }
        if let Ok(batch) = batches.recv_timeout(Duration::from_millis(100)) {
            session.apply(SubscriberEvent::Batch(batch), common::epoch_millis());
        }
    }

    let handle = pipeline.shutdown();
    for batch in batches.iter() {
        session.apply(SubscriberEvent::Batch(batch), common::epoch_millis());
    }
    display_canvas(&session.target().canvas);
    session.apply(SubscriberEvent::Disconnected, common::epoch_millis());

    display_flushes(&handle.recorder().get_results());
    display_ops(session.target().ops());
    Ok(())
}

fn run_dashboard(config_path: &str) -> Result<()> {
    println!("\n=== Launching Live Dashboard ===");
    println!("Note: Close the GUI window to return to menu");

    // the dashboard owns its own event loop, so it runs as a separate process
    let status = std::process::Command::new("cargo")
        .args(["run", "--release", "--bin", "visualiser", "--", config_path])
        .status()
        .context("failed to launch dashboard; make sure the visualiser binary builds")?;

    if status.success() {
        println!("Dashboard closed successfully.");
    } else {
        println!("Dashboard exited with status: {status}");
    }
    Ok(())
}

fn narrowed_selection(sensors: &[SensorId]) -> Vec<SensorId> {
    let keep = sensors.len().saturating_sub(1).max(1);
    sensors.iter().take(keep).cloned().collect()
}

fn display_canvas(canvas: &SeriesCanvas) {
    println!("\n=== Rendered Series ===");
    for (sensor, points) in canvas.series() {
        match (points.first(), points.last()) {
            (Some(first), Some(last)) => println!(
                "- {sensor}: {} points, last {:.2} ({}ms span)",
                points.len(),
                last.value,
                last.timestamp - first.timestamp
            ),
            _ => println!("- {sensor}: empty"),
        }
    }
    println!("Redraws: {}", canvas.redraw_count());
}

fn display_ops(ops: &[RenderOp]) {
    let (mut added, mut updated, mut removed, mut redraws) = (0, 0, 0, 0);
    for op in ops {
        match op {
            RenderOp::Add { .. } => added += 1,
            RenderOp::Update { .. } => updated += 1,
            RenderOp::Remove { .. } => removed += 1,
            RenderOp::Redraw => redraws += 1,
        }
    }
    println!("\n=== Render Operations ===");
    println!("Add: {added}, Update: {updated}, Remove: {removed}, Redraw: {redraws}");
}

fn display_flushes(records: &[FlushRecord]) {
    if records.is_empty() {
        println!("No batches were flushed.");
        return;
    }

    let snapshots: usize = records.iter().map(|r| r.snapshot_count).sum();
    let dropped: usize = records.iter().map(|r| r.dropped).sum();
    let mean_ns = records.iter().map(|r| r.flush_ns).sum::<u64>() / records.len() as u64;

    println!("\n=== Flush Results ===");
    println!("Batches: {}", records.len());
    println!(
        "Snapshots: {} ({:.1} per batch)",
        snapshots,
        snapshots as f64 / records.len() as f64
    );
    println!("Subscribers dropped: {dropped}");
    println!("Mean flush time: {:.1}us", mean_ns as f64 / 1_000.0);
}
