use std::collections::BTreeMap;
use std::env;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use criterion::{black_box, Criterion};
use tracing::info;
use tracing_subscriber::EnvFilter;

use common::config::load_config;
use common::source::source_from_config;
use common::{
    BatchSink, Broadcaster, DeliveryError, DiagnosticsSnapshot, FlushRecord, FlushRecorder, PipelineDiagnostics,
    SensorBatch, SensorSnapshot, TelemetryConfig,
};
use viewer::{SeriesCanvas, SubscriberEvent, SubscriberSession};

#[derive(Debug, Default, Clone, Copy)]
struct SubscriberSummary {
    batches: usize,
    snapshots: usize,
    redraws: u64,
    rendered_points: usize,
}

struct RunOutcome {
    recorder: FlushRecorder,
    flushes: Vec<FlushRecord>,
    subscribers: Vec<SubscriberSummary>,
    diagnostics: DiagnosticsSnapshot,
}

fn new_session(config: &TelemetryConfig) -> SubscriberSession<SeriesCanvas> {
    let mut session =
        SubscriberSession::new(config.sensor_ids(), config.default_retention, SeriesCanvas::default());
    session.apply(SubscriberEvent::Connected, common::epoch_millis());
    session
}

fn consume(
    session: &mut SubscriberSession<SeriesCanvas>,
    summary: &mut SubscriberSummary,
    batch: Arc<SensorBatch>,
) {
    summary.batches += 1;
    summary.snapshots += batch.len();
    session.apply(SubscriberEvent::Batch(batch), common::epoch_millis());
    summary.redraws = session.target().redraw_count();
    summary.rendered_points = session.target().series().values().map(Vec::len).sum();
}

fn run_async(config: &TelemetryConfig) -> Result<RunOutcome> {
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        let pipeline = async_impl::spawn_pipeline(config, source_from_config(config))?;
        let mut tasks = Vec::with_capacity(config.benchmark.subscribers);
        for _ in 0..config.benchmark.subscribers {
            let (_, mut rx) = pipeline.handle().connect();
            let mut session = new_session(config);
            tasks.push(tokio::spawn(async move {
                let mut summary = SubscriberSummary::default();
                while let Some(batch) = rx.recv().await {
                    consume(&mut session, &mut summary, batch);
                }
                summary
            }));
        }

        tokio::time::sleep(Duration::from_secs(config.benchmark.duration_secs)).await;
        let handle = pipeline.shutdown().await;

        let mut subscribers = Vec::with_capacity(tasks.len());
        for task in tasks {
            subscribers.push(task.await?);
        }
        Ok::<_, anyhow::Error>(RunOutcome {
            recorder: handle.recorder().clone(),
            flushes: handle.recorder().get_results(),
            subscribers,
            diagnostics: handle.diagnostics(),
        })
    })
}

fn run_threaded(config: &TelemetryConfig) -> Result<RunOutcome> {
    let pipeline = threaded_impl::start_pipeline(config, source_from_config(config))?;
    let mut workers = Vec::with_capacity(config.benchmark.subscribers);
    for _ in 0..config.benchmark.subscribers {
        let (_, rx) = pipeline.handle().connect();
        let mut session = new_session(config);
        workers.push(std::thread::spawn(move || {
            let mut summary = SubscriberSummary::default();
            for batch in rx.iter() {
                consume(&mut session, &mut summary, batch);
            }
            summary
        }));
    }

    std::thread::sleep(Duration::from_secs(config.benchmark.duration_secs));
    let handle = pipeline.shutdown();

    let mut subscribers = Vec::with_capacity(workers.len());
    for worker in workers {
        match worker.join() {
            Ok(summary) => subscribers.push(summary),
            Err(_) => bail!("subscriber thread panicked"),
        }
    }
    Ok(RunOutcome {
        recorder: handle.recorder().clone(),
        flushes: handle.recorder().get_results(),
        subscribers,
        diagnostics: handle.diagnostics(),
    })
}

fn min_avg_max(values: &[f64]) -> (f64, f64, f64) {
    let min = values.iter().fold(f64::INFINITY, |a, &b| a.min(b));
    let max = values.iter().fold(f64::NEG_INFINITY, |a, &b| a.max(b));
    let avg = values.iter().sum::<f64>() / values.len() as f64;
    (min, avg, max)
}

fn analyze_run(outcome: &RunOutcome, config: &TelemetryConfig, name: &str) {
    println!("\n=== {name} Detailed Analysis ===");
    let flushes = &outcome.flushes;
    if flushes.is_empty() {
        println!("{name}: No flushes recorded");
        return;
    }

    let sizes: Vec<f64> = flushes.iter().map(|r| r.snapshot_count as f64).collect();
    let flush_times: Vec<f64> = flushes.iter().map(|r| r.flush_ns as f64 / 1000.0).collect();
    let (size_min, size_avg, size_max) = min_avg_max(&sizes);
    let (time_min, time_avg, time_max) = min_avg_max(&flush_times);
    let expected_size = config.flush_period_ms as f64 / config.sample_period_ms as f64;

    println!("Batches flushed: {}", flushes.len());
    println!(
        "Snapshots per batch: avg={size_avg:.2}, min={size_min}, max={size_max} (expected ~{expected_size:.1})"
    );
    println!("Flush time (μs): avg={time_avg:.2}, min={time_min:.2}, max={time_max:.2}");

    let intervals: Vec<f64> = flushes
        .windows(2)
        .map(|w| w[1].timestamp_ms.saturating_sub(w[0].timestamp_ms) as f64)
        .collect();
    if !intervals.is_empty() {
        let (min, avg, max) = min_avg_max(&intervals);
        println!(
            "Flush interval (ms): avg={avg:.1}, min={min}, max={max} (target {})",
            config.flush_period_ms
        );
    }

    let diag = &outcome.diagnostics;
    println!(
        "Generated: {}, source failures: {}, overflow drops: {}",
        diag.snapshots_generated, diag.source_failures, diag.overflow_drops
    );
    println!(
        "Deliveries: {}, failed deliveries: {}, empty flushes skipped: {}",
        diag.deliveries, diag.delivery_failures, diag.empty_flushes
    );

    println!("\nSubscriber Results:");
    for (index, sub) in outcome.subscribers.iter().enumerate() {
        let complete = sub.snapshots as u64 == diag.snapshots_generated;
        println!(
            "  #{}: {} batches, {} snapshots{}, {} redraws, {} points rendered at close",
            index + 1,
            sub.batches,
            sub.snapshots,
            if complete { "" } else { " (incomplete)" },
            sub.redraws,
            sub.rendered_points
        );
    }
}

struct NullSink;

impl BatchSink for NullSink {
    fn try_deliver(&mut self, batch: &Arc<SensorBatch>) -> Result<(), DeliveryError> {
        black_box(batch);
        Ok(())
    }
}

fn synthetic_batches(config: &TelemetryConfig, count: usize) -> Vec<Arc<SensorBatch>> {
    let per_batch = (config.flush_period_ms / config.sample_period_ms).max(1);
    let sensors = config.sensor_ids();
    let start = common::epoch_millis();
    let mut timestamp = start;

    (0..count)
        .filter_map(|_| {
            let snapshots = (0..per_batch)
                .map(|_| {
                    timestamp += config.sample_period_ms;
                    let readings: BTreeMap<_, _> = sensors
                        .iter()
                        .enumerate()
                        .map(|(i, id)| (id.clone(), (timestamp as f64 / 1000.0 + i as f64).sin()))
                        .collect();
                    SensorSnapshot::new(timestamp, readings)
                })
                .collect();
            SensorBatch::new(snapshots).map(Arc::new)
        })
        .collect()
}

fn benchmark_viewer(c: &mut Criterion, config: &TelemetryConfig) {
    let batches = synthetic_batches(config, 200);
    c.bench_function("viewer_ingest_reconcile", |b| {
        b.iter(|| {
            let mut session = new_session(config);
            for batch in &batches {
                session.apply(SubscriberEvent::Batch(Arc::clone(batch)), common::epoch_millis());
            }
            black_box(session.target().redraw_count());
        });
    });
}

fn benchmark_broadcast(c: &mut Criterion, config: &TelemetryConfig) {
    let batches = synthetic_batches(config, 1);
    let Some(batch) = batches.first() else { return };
    let snapshots = batch.snapshots().to_vec();
    let mut broadcaster = Broadcaster::new(Arc::new(PipelineDiagnostics::default()));
    for _ in 0..config.benchmark.subscribers {
        broadcaster.connect(NullSink);
    }

    c.bench_function("broadcast_fanout", |b| {
        b.iter(|| black_box(broadcaster.broadcast(snapshots.clone())));
    });
}

fn main() -> Result<()> {
    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        eprintln!("Usage: benchmark_runner <config_file> [threaded|async|both] [--criterion]");
        eprintln!("Example: benchmark_runner configs/telemetry.toml both");
        eprintln!("Example: benchmark_runner configs/telemetry.toml both --criterion");
        std::process::exit(1);
    }

    let config_path = &args[1];
    let mode = args.get(2).map(|s| s.as_str()).unwrap_or("both");
    let use_criterion = args.iter().any(|a| a == "--criterion");

    let config = load_config(config_path).with_context(|| format!("failed to load {config_path}"))?;

    // quiet by default so log output does not skew timings
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    println!("========================================");
    println!("Telemetry Pipeline Benchmark");
    println!("========================================");
    println!("Config: {config_path}");
    println!("Sensors: {}", config.sensor_count);
    println!("Sample period: {} ms", config.sample_period_ms);
    println!("Flush period: {} ms", config.flush_period_ms);
    println!("Duration: {} seconds", config.benchmark.duration_secs);
    println!("Subscribers: {}", config.benchmark.subscribers);
    println!("Mode: {mode}");
    println!("========================================\n");

    if use_criterion {
        let mut criterion = Criterion::default()
            .sample_size(20)
            .measurement_time(Duration::from_secs(10));

        benchmark_broadcast(&mut criterion, &config);
        benchmark_viewer(&mut criterion, &config);

        println!("\n========================================");
        println!("Criterion statistical analysis complete!");
        println!("Check the target/criterion directory for detailed HTML reports.");
        println!("========================================");
        return Ok(());
    }

    if mode == "threaded" || mode == "both" {
        println!("Running THREADED pipeline...");
        let start = Instant::now();
        let outcome = run_threaded(&config)?;
        println!("Threaded run completed in {:.2} seconds", start.elapsed().as_secs_f64());
        analyze_run(&outcome, &config, "THREADED");

        outcome
            .recorder
            .save_to_csv("threaded_flushes.csv")
            .context("failed to save threaded CSV")?;
        info!("threaded results saved");
        println!("Results saved to threaded_flushes.csv");
    }

    if mode == "async" || mode == "both" {
        println!("\nRunning ASYNC pipeline...");
        let start = Instant::now();
        let outcome = run_async(&config)?;
        println!("Async run completed in {:.2} seconds", start.elapsed().as_secs_f64());
        analyze_run(&outcome, &config, "ASYNC");

        outcome
            .recorder
            .save_to_csv("async_flushes.csv")
            .context("failed to save async CSV")?;
        println!("Results saved to async_flushes.csv");
    }

    println!("\n========================================");
    println!("Benchmark complete!");
    println!("========================================");
    Ok(())
}
