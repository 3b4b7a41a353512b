// EVTC Exporter - Prometheus exporter for event counter windows
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! # EVTC Exporter
//!
//! Hosts an [`evtc::EventCounterCollector`] behind a CSV replay runtime and
//! publishes every emitted window as Prometheus metrics.
//!
//! ## Usage
//!
//! ```bash
//! # Collect every counter in the dataset, 10s windows
//! evtc-exporter --csv counters.csv --refresh-interval 10
//!
//! # Collect only the configured counters, replayed 5x faster
//! evtc-exporter --csv counters.csv --config evtc.json --speed 5.0
//! ```

mod diagnostics;
mod metrics;
mod replay;
mod transport;

use axum::{
    extract::State,
    http::StatusCode,
    response::{Html, IntoResponse},
    routing::get,
    Json, Router,
};
use clap::Parser;
use diagnostics::TracingDiagnosticSink;
use evtc::{
    CollectorConfig, CounterListener, EventCounterCollector, MetricRecord, SubscriptionState,
};
use metrics::encode_metrics;
use replay::{DatasetInfo, ReplayConfig, ReplayEngine, ReplayRuntime, ReplayState};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info, warn, Level};
use tracing_subscriber::EnvFilter;
use transport::{LatestRecords, PrometheusTransport};

/// EVTC Prometheus Exporter
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Port to listen on
    #[arg(short, long, default_value = "9100")]
    port: u16,

    /// Collector configuration (JSON); defaults to every counter in the dataset
    #[arg(long)]
    config: Option<String>,

    /// CSV file to replay (timestamp_ms,source,counter,value)
    #[arg(short, long)]
    csv: String,

    /// Replay speed multiplier (1.0 = real-time)
    #[arg(short, long, default_value = "1.0")]
    speed: f64,

    /// Loop the replay when it reaches the end
    #[arg(short, long, default_value = "true")]
    loop_replay: bool,

    /// Override the configured refresh interval, in seconds
    #[arg(short, long)]
    refresh_interval: Option<f64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

/// Application state shared across handlers.
struct AppState {
    collector: Arc<EventCounterCollector>,
    replay_state: Arc<ReplayState>,
    dataset_info: DatasetInfo,
    latest: LatestRecords,
    start_time: std::time::Instant,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = match args.log_level.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "info" => Level::INFO,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::INFO,
        };
        EnvFilter::from_default_env().add_directive(level.into())
    });

    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("EVTC Exporter v{} (evtc {})", env!("CARGO_PKG_VERSION"), evtc::VERSION);

    // Load the dataset first: it also supplies the default counter list
    let runtime = Arc::new(ReplayRuntime::new());
    let engine = ReplayEngine::from_csv(
        ReplayConfig {
            csv_path: args.csv.clone(),
            speed: args.speed,
            loop_replay: args.loop_replay,
            ..Default::default()
        },
        Arc::clone(&runtime),
    )?;
    let dataset_info = engine.dataset_info();
    info!(
        "Dataset loaded: {} sources, {} rows",
        dataset_info.source_count, dataset_info.row_count
    );

    let mut config = match &args.config {
        Some(path) => CollectorConfig::load(path)?,
        None => {
            info!("No configuration given, collecting every counter in the dataset");
            CollectorConfig {
                counters: engine.collection_requests(),
                ..Default::default()
            }
        }
    };
    if let Some(interval) = args.refresh_interval {
        config.refresh_interval_secs = interval;
    }

    // Build the collector
    let (transport, latest, publisher) = PrometheusTransport::spawn();
    let collector = Arc::new(EventCounterCollector::with_diagnostics(
        config,
        runtime,
        Arc::new(transport),
        Arc::new(TracingDiagnosticSink),
    ));
    collector.initialize();

    // Start replay in background
    let replay_state = engine.state();
    let engine = Arc::new(engine);
    let replay = {
        let engine = Arc::clone(&engine);
        let listener: Arc<dyn CounterListener> = collector.clone();
        tokio::spawn(async move {
            engine.run(listener).await;
        })
    };

    let state = Arc::new(AppState {
        collector: Arc::clone(&collector),
        replay_state,
        dataset_info,
        latest,
        start_time: std::time::Instant::now(),
    });

    // Build router
    let app = Router::new()
        .route("/", get(root_handler))
        .route("/metrics", get(metrics_handler))
        .route("/health", get(health_handler))
        .route("/ready", get(ready_handler))
        .route("/status", get(status_handler))
        .with_state(state);

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], args.port));
    info!("Starting server on http://{}", addr);
    info!("Metrics endpoint: http://{}/metrics", addr);

    let listener = TcpListener::bind(addr).await?;
    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!("Server error: {}", e);
    }

    // Teardown: stop feeding, then dispose so nothing is emitted afterwards
    engine.stop();
    replay.abort();
    collector.dispose();
    publisher.abort();
    if let Err(e) = publisher.await {
        if !e.is_cancelled() {
            warn!("Publishing task ended abnormally: {}", e);
        }
    }
    info!("Exporter stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested");
}

/// Root handler - shows a simple HTML page.
async fn root_handler() -> Html<&'static str> {
    Html(
        r#"<!DOCTYPE html>
<html>
<head>
    <title>EVTC Exporter</title>
    <style>
        body { font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif; max-width: 800px; margin: 50px auto; padding: 20px; }
        h1 { color: #2c3e50; }
        a { color: #3498db; text-decoration: none; }
        a:hover { text-decoration: underline; }
        .endpoints { background: #f8f9fa; padding: 20px; border-radius: 8px; margin: 20px 0; }
        .endpoint { margin: 10px 0; }
        code { background: #e9ecef; padding: 2px 6px; border-radius: 4px; }
    </style>
</head>
<body>
    <h1>EVTC Exporter</h1>
    <p>Prometheus exporter for EVTC (event counter collection) windows.</p>

    <div class="endpoints">
        <h2>Endpoints</h2>
        <div class="endpoint"><a href="/metrics">/metrics</a> - Prometheus metrics</div>
        <div class="endpoint"><a href="/health">/health</a> - Health check</div>
        <div class="endpoint"><a href="/ready">/ready</a> - Readiness check</div>
        <div class="endpoint"><a href="/status">/status</a> - Status information (JSON)</div>
    </div>

    <h2>Metrics</h2>
    <ul>
        <li><code>evtc_counter_value</code> - Window mean per source and counter</li>
        <li><code>evtc_counter_samples</code> - Samples in the last window</li>
        <li><code>evtc_windows_total</code> - Windows emitted</li>
        <li><code>evtc_diagnostic_events_total</code> - Collector diagnostics by event and level</li>
        <li><code>evtc_exporter_*</code> - Replay progress</li>
    </ul>
</body>
</html>"#,
    )
}

/// Metrics handler - returns Prometheus text format.
async fn metrics_handler() -> impl IntoResponse {
    let metrics = encode_metrics();
    (
        StatusCode::OK,
        [("Content-Type", "text/plain; charset=utf-8")],
        metrics,
    )
}

/// Health check handler.
async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

/// Readiness check handler.
async fn ready_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    if state.collector.is_initialized() {
        (StatusCode::OK, "Ready")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "Not ready")
    }
}

/// Status information response.
#[derive(Serialize)]
struct StatusResponse {
    version: String,
    uptime_secs: u64,
    collector: CollectorStatus,
    replay: ReplayStatus,
    windows: Vec<MetricRecord>,
}

/// Collector status information.
#[derive(Serialize)]
struct CollectorStatus {
    state: String,
    counters: usize,
    refresh_interval_secs: f64,
    sources: Vec<SourceStatus>,
}

#[derive(Serialize)]
struct SourceStatus {
    name: String,
    enabled: bool,
    refresh_interval_secs: f64,
}

/// Replay status information.
#[derive(Serialize)]
struct ReplayStatus {
    running: bool,
    position: usize,
    total_rows: usize,
    progress_percent: f64,
    withheld_samples: usize,
    source_count: usize,
    duration_ms: u64,
}

/// Status handler - returns JSON status information.
async fn status_handler(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    let replay_state = &state.replay_state;
    let position = replay_state.position.load(Ordering::SeqCst);
    let total = replay_state.total_rows.load(Ordering::SeqCst);
    let progress = if total > 0 {
        (position as f64 / total as f64) * 100.0
    } else {
        0.0
    };

    let collector = &state.collector;
    let sources = collector
        .subscriptions()
        .into_iter()
        .map(|s| SourceStatus {
            enabled: s.state == SubscriptionState::Enabled,
            name: s.source_name,
            refresh_interval_secs: s.refresh_interval_secs,
        })
        .collect();

    Json(StatusResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        collector: CollectorStatus {
            state: format!("{:?}", collector.state()),
            counters: collector.registry().len(),
            refresh_interval_secs: collector.config().effective_refresh_interval().as_secs_f64(),
            sources,
        },
        replay: ReplayStatus {
            running: replay_state.running.load(Ordering::SeqCst),
            position,
            total_rows: total,
            progress_percent: progress,
            withheld_samples: replay_state.withheld.load(Ordering::SeqCst),
            source_count: state.dataset_info.source_count,
            duration_ms: state.dataset_info.duration_ms,
        },
        windows: state.latest.read().await.values().cloned().collect(),
    })
}
