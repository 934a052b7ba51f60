use std::collections::BTreeMap;
use std::env;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use eframe::egui;
use egui_plot::{Legend, Line, Plot, PlotPoints};
use tokio::sync::{mpsc, oneshot};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use async_impl::PipelineHandle;
use common::config::load_config;
use common::source::source_from_config;
use common::{epoch_millis, RetentionWindow, SensorId, TelemetryConfig};
use viewer::{
    forward_batches, forward_controls, run_subscriber, SeriesCanvas, SubscriberEvent,
    SubscriberSession,
};

const SERIES_COLORS: [egui::Color32; 6] = [
    egui::Color32::from_rgb(52, 152, 219),
    egui::Color32::from_rgb(46, 204, 113),
    egui::Color32::from_rgb(231, 76, 60),
    egui::Color32::from_rgb(230, 126, 34),
    egui::Color32::from_rgb(155, 89, 182),
    egui::Color32::from_rgb(39, 174, 96),
];

/// Background pipeline plus the channels the UI uses to steer it.
struct LiveStream {
    controls: mpsc::UnboundedSender<SubscriberEvent>,
    stop: oneshot::Sender<()>,
    pipeline: Arc<Mutex<Option<PipelineHandle>>>,
    started: Instant,
}

struct DashboardApp {
    config: TelemetryConfig,
    canvas: Arc<Mutex<SeriesCanvas>>,
    selection: BTreeMap<SensorId, bool>,
    retention: RetentionWindow,
    stream: Option<LiveStream>,
}

impl DashboardApp {
    fn new(config: TelemetryConfig) -> Self {
        let selection = config.sensor_ids().into_iter().map(|id| (id, true)).collect();
        let retention = config.default_retention;
        Self {
            config,
            canvas: Arc::new(Mutex::new(SeriesCanvas::default())),
            selection,
            retention,
            stream: None,
        }
    }

    fn selected(&self) -> Vec<SensorId> {
        self.selection
            .iter()
            .filter(|(_, on)| **on)
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Fresh session drawing on a new canvas. A previous stream still
    /// shutting down keeps writing to its own canvas, never this one.
    fn prepare_session(&mut self) -> SubscriberSession<Arc<Mutex<SeriesCanvas>>> {
        self.canvas = Arc::new(Mutex::new(SeriesCanvas::default()));
        SubscriberSession::new(self.selected(), self.retention, Arc::clone(&self.canvas))
    }

    fn start_stream(&mut self) {
        let (events_tx, events_rx) = mpsc::channel(self.config.subscriber_queue_capacity);
        let (controls_tx, controls_rx) = mpsc::unbounded_channel();
        let (stop_tx, stop_rx) = oneshot::channel();
        let pipeline_slot = Arc::new(Mutex::new(None));

        let config = self.config.clone();
        let slot = Arc::clone(&pipeline_slot);
        let session = self.prepare_session();

        std::thread::spawn(move || {
            let rt = match tokio::runtime::Runtime::new() {
                Ok(rt) => rt,
                Err(err) => {
                    error!(%err, "failed to start runtime");
                    return;
                }
            };
            rt.block_on(async move {
                let pipeline = match async_impl::spawn_pipeline(&config, source_from_config(&config)) {
                    Ok(pipeline) => pipeline,
                    Err(err) => {
                        error!(%err, "failed to start pipeline");
                        return;
                    }
                };
                *slot.lock().expect("pipeline slot poisoned") = Some(pipeline.handle());

                let (_, batches) = pipeline.handle().connect();
                let relay = tokio::spawn(forward_controls(controls_rx, events_tx.clone()));
                let forwarder = tokio::spawn(forward_batches(batches, events_tx));
                let viewer = tokio::spawn(run_subscriber(events_rx, session, config.redraw_interval()));

                let _ = stop_rx.await;
                pipeline.shutdown().await;
                if relay.await.is_err() || forwarder.await.is_err() || viewer.await.is_err() {
                    warn!("viewer task ended abnormally");
                }
                *slot.lock().expect("pipeline slot poisoned") = None;
                info!("live stream stopped");
            });
        });

        self.stream = Some(LiveStream {
            controls: controls_tx,
            stop: stop_tx,
            pipeline: pipeline_slot,
            started: Instant::now(),
        });
    }

    fn stop_stream(&mut self) {
        if let Some(stream) = self.stream.take() {
            drop(stream.controls);
            let _ = stream.stop.send(());
        }
    }

    fn send(&self, event: SubscriberEvent) {
        if let Some(stream) = &self.stream {
            if stream.controls.send(event).is_err() {
                warn!("live stream has ended, control event not delivered");
            }
        }
    }

    fn controls(&mut self, ui: &mut egui::Ui) {
        ui.horizontal(|ui| {
            let running = self.stream.is_some();
            if ui
                .add_enabled(!running, egui::Button::new("▶ Start Stream"))
                .clicked()
            {
                self.start_stream();
            }
            if ui
                .add_enabled(running, egui::Button::new("⏹ Stop Stream"))
                .clicked()
            {
                self.stop_stream();
            }

            ui.separator();

            let status_text = if running {
                egui::RichText::new("🟢 Connected").color(egui::Color32::GREEN)
            } else {
                egui::RichText::new("🔴 Disconnected").color(egui::Color32::RED)
            };
            ui.label(status_text);

            if let Some(stream) = &self.stream {
                ui.label(format!("⏱ {}s", stream.started.elapsed().as_secs()));
            }
        });

        ui.add_space(6.0);

        ui.horizontal(|ui| {
            ui.label("Sensors:");
            let mut changed = false;
            for (sensor, on) in self.selection.iter_mut() {
                changed |= ui.checkbox(on, sensor.as_str()).changed();
            }
            if changed {
                self.send(SubscriberEvent::SelectionChanged(self.selected()));
            }

            ui.separator();

            let before = self.retention;
            egui::ComboBox::from_label("Retention")
                .selected_text(self.retention.label())
                .show_ui(ui, |ui| {
                    for window in RetentionWindow::ALL {
                        ui.selectable_value(&mut self.retention, window, window.label());
                    }
                });
            if self.retention != before {
                self.send(SubscriberEvent::RetentionChanged(self.retention));
            }
        });
    }

    fn statistics(&self, ui: &mut egui::Ui, canvas: &SeriesCanvas) {
        let diagnostics = self.stream.as_ref().and_then(|stream| {
            let slot = stream.pipeline.lock().ok()?;
            slot.as_ref()
                .map(|handle| (handle.diagnostics(), handle.subscriber_count()))
        });

        egui::Grid::new("stats_grid")
            .num_columns(2)
            .spacing([40.0, 4.0])
            .striped(true)
            .show(ui, |ui| {
                if let Some((diag, subscribers)) = diagnostics {
                    ui.label("Snapshots generated:");
                    ui.label(diag.snapshots_generated.to_string());
                    ui.end_row();

                    ui.label("Batches flushed:");
                    ui.label(diag.batches_flushed.to_string());
                    ui.end_row();

                    ui.label("Empty flushes skipped:");
                    ui.label(diag.empty_flushes.to_string());
                    ui.end_row();

                    ui.label("Subscribers:");
                    ui.label(subscribers.to_string());
                    ui.end_row();
                }

                ui.label("Redraws:");
                ui.label(canvas.redraw_count().to_string());
                ui.end_row();

                for (sensor, points) in canvas.series() {
                    ui.label(format!("{sensor}:"));
                    match points.last() {
                        Some(last) => ui.label(format!("{:.2} ({} points)", last.value, points.len())),
                        None => ui.label("no data"),
                    };
                    ui.end_row();
                }
            });
    }
}

impl eframe::App for DashboardApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        ctx.request_repaint_after(Duration::from_millis(100));

        // copy out so the viewer task is not blocked while we draw
        let canvas = self
            .canvas
            .lock()
            .map(|c| c.clone())
            .unwrap_or_default();

        egui::CentralPanel::default().show(ctx, |ui| {
            ui.heading("📈 Live Sensor Telemetry");
            ui.add_space(10.0);

            egui::Frame::group(ui.style())
                .inner_margin(10.0)
                .show(ui, |ui| self.controls(ui));

            ui.add_space(10.0);

            ui.horizontal_top(|ui| {
                egui::Frame::group(ui.style())
                    .inner_margin(10.0)
                    .show(ui, |ui| {
                        ui.set_min_width(300.0);
                        ui.strong("📊 Statistics");
                        ui.separator();
                        self.statistics(ui, &canvas);
                    });

                egui::Frame::group(ui.style())
                    .inner_margin(10.0)
                    .show(ui, |ui| {
                        ui.strong(format!("Last {} (x axis: seconds ago)", self.retention.label()));
                        let now = epoch_millis() as f64;
                        Plot::new("telemetry_plot")
                            .height(500.0)
                            .legend(Legend::default())
                            .show(ui, |plot_ui| {
                                for (index, (sensor, points)) in canvas.series().iter().enumerate() {
                                    let data: Vec<[f64; 2]> = points
                                        .iter()
                                        .map(|s| [(s.timestamp as f64 - now) / 1000.0, s.value])
                                        .collect();
                                    plot_ui.line(
                                        Line::new(PlotPoints::new(data))
                                            .name(sensor)
                                            .color(SERIES_COLORS[index % SERIES_COLORS.len()]),
                                    );
                                }
                            });
                    });
            });
        });
    }
}

impl Drop for DashboardApp {
    fn drop(&mut self) {
        self.stop_stream();
    }
}

fn main() -> anyhow::Result<()> {
    let config_path = env::args()
        .nth(1)
        .unwrap_or_else(|| "configs/telemetry.toml".to_string());
    let config = load_config(&config_path)?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.as_str()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([1400.0, 900.0])
            .with_title("Telemetry Dashboard"),
        ..Default::default()
    };

    eframe::run_native(
        "Telemetry Dashboard",
        options,
        Box::new(move |_cc| Box::new(DashboardApp::new(config))),
    )
    .map_err(|err| anyhow::anyhow!("dashboard failed: {err}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{SensorBatch, SensorSnapshot};

    fn batch_at(timestamp: u64) -> Arc<SensorBatch> {
        let readings = [("sensor_0", 1.0), ("sensor_1", 2.0)]
            .into_iter()
            .map(|(id, v)| (id.to_string(), v))
            .collect();
        Arc::new(SensorBatch::new(vec![SensorSnapshot::new(timestamp, readings)]).unwrap())
    }

    fn series_names(app: &DashboardApp) -> Vec<String> {
        app.canvas.lock().unwrap().series().keys().cloned().collect()
    }

    #[test]
    fn restart_clears_series_deselected_while_stopped() {
        let mut app = DashboardApp::new(TelemetryConfig {
            sensor_count: 2,
            ..TelemetryConfig::default()
        });

        let mut first = app.prepare_session();
        first.apply(SubscriberEvent::Connected, 1_000);
        first.apply(SubscriberEvent::Batch(batch_at(1_000)), 1_000);
        assert_eq!(series_names(&app), vec!["sensor_0", "sensor_1"]);

        app.selection.insert("sensor_1".to_string(), false);
        let mut second = app.prepare_session();
        assert!(series_names(&app).is_empty());

        second.apply(SubscriberEvent::Connected, 2_000);
        second.apply(SubscriberEvent::Batch(batch_at(2_000)), 2_000);
        first.apply(SubscriberEvent::Disconnected, 2_000);
        assert_eq!(series_names(&app), vec!["sensor_0"]);
    }

    #[test]
    fn every_control_event_reaches_the_stream() {
        let mut app = DashboardApp::new(TelemetryConfig::default());
        let (controls, mut rx) = mpsc::unbounded_channel();
        let (stop, _stop_rx) = oneshot::channel();
        app.stream = Some(LiveStream {
            controls,
            stop,
            pipeline: Arc::new(Mutex::new(None)),
            started: Instant::now(),
        });

        for _ in 0..200 {
            app.send(SubscriberEvent::RetentionChanged(RetentionWindow::OneHour));
        }
        let mut received = 0;
        while rx.try_recv().is_ok() {
            received += 1;
        }
        assert_eq!(received, 200);

        app.stop_stream();
        app.send(SubscriberEvent::RetentionChanged(RetentionWindow::OneDay));
        assert!(rx.try_recv().is_err());
    }
}
