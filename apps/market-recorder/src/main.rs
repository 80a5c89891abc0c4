//! Market Recorder Binary
//!
//! Records pushed quote, trade, and depth events to SQLite.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin market-recorder
//! ```
//!
//! # Environment Variables
//!
//! ## Required
//! - `RECORDER_SYMBOLS`: comma-separated symbols, e.g. `700.HK,AAPL.US`
//! - `RECORDER_FEED_REPLAY_PATH`: NDJSON file of recorded push events
//!
//! ## Optional
//! - `RECORDER_FIRST_PUSH`: deliver the initial snapshot (default: true)
//! - `RECORDER_REPLAY_PACE_MS`: delay between replayed events (default: 0)
//! - `RECORDER_DB_PATH`: SQLite file (default: ./data/market.db)
//! - `RECORDER_DB_BUSY_TIMEOUT_SECS`: SQLite busy timeout (default: 10)
//! - `RECORDER_QUEUE_CAPACITY`: persistence queue bound (default: 10000)
//! - `RECORDER_POLL_INTERVAL_MS`: worker poll interval (default: 1000)
//! - `RECORDER_RECORDS_PER_CONNECTION`: records per connection (default: 1)
//! - `RECORDER_SENTINEL_TIMEOUT_MS`: shutdown hand-off bound (default: 5000)
//! - `RECORDER_SHUTDOWN_TIMEOUT_SECS`: drain bound (default: 30)
//! - `RECORDER_METRICS_PORT`: Prometheus port, 0 disables (default: 9090)
//! - `OTEL_ENABLED`: export traces over OTLP (default: false)
//! - `RUST_LOG`: log filter (default: `market_recorder=info`)

use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, anyhow};
use market_recorder::application::ports::FeedClient;
use market_recorder::infrastructure::telemetry;
use market_recorder::{
    PipelineController, PipelineError, RecorderConfig, ReplayFeed, SqliteConnectionFactory,
    init_metrics,
};
use tokio::signal;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    load_dotenv();

    let _telemetry_guard = telemetry::init().context("failed to initialize telemetry")?;

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting market recorder");

    let config = RecorderConfig::from_env().context("invalid configuration")?;
    log_config(&config);

    if config.server.metrics_port != 0 {
        let metrics_addr = SocketAddr::from(([0, 0, 0, 0], config.server.metrics_port));
        init_metrics(metrics_addr).context("failed to install metrics exporter")?;
        tracing::info!(addr = %metrics_addr, "Metrics exporter listening");
    }

    let factory =
        SqliteConnectionFactory::new(&config.storage.db_path, config.storage.busy_timeout);
    factory
        .ensure_schema()
        .context("failed to prepare database")?;

    let pipeline = PipelineController::new(config.pipeline, Arc::new(factory))
        .context("failed to create pipeline")?;
    pipeline.start().context("failed to start pipeline")?;

    let feed_result = run_feed(&config, &pipeline).await;
    if let Err(e) = &feed_result {
        tracing::error!(error = %e, "Feed failed");
    }

    let stats = pipeline.stats();
    let exit = match pipeline.stop().await {
        Ok(report) => {
            tracing::info!(
                persisted = report.persisted,
                rows = report.rows_written,
                failed = report.failed,
                abandoned = report.abandoned,
                dropped = stats.total_dropped(),
                "Market recorder stopped"
            );
            if feed_result.is_ok() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
        Err(e @ PipelineError::ShutdownTimeout(_)) => {
            tracing::error!(error = %e, "Shutdown deadline missed, queued records abandoned");
            ExitCode::FAILURE
        }
        Err(e) => {
            tracing::error!(error = %e, "Pipeline stopped with an error");
            ExitCode::FAILURE
        }
    };

    Ok(exit)
}

/// Wire the feed to the pipeline and run until the replay ends or a
/// shutdown signal arrives.
async fn run_feed(config: &RecorderConfig, pipeline: &PipelineController) -> anyhow::Result<()> {
    let feed = Arc::new(
        ReplayFeed::new(&config.feed.replay_path).with_pace(config.feed.replay_pace),
    );

    let handler = pipeline.ingest_handle().push_handler();
    for kind in &config.feed.kinds {
        feed.register_callback(*kind, Arc::clone(&handler));
    }
    feed.subscribe(
        &config.feed.symbols,
        &config.feed.kinds,
        config.feed.first_push,
    )
    .context("subscription rejected")?;

    let cancel = CancellationToken::new();
    let replay = Arc::clone(&feed)
        .start(cancel.clone())
        .context("failed to start feed replay")?;
    let mut replay_done = tokio::task::spawn_blocking(move || replay.join());

    tracing::info!("Market recorder ready");

    let joined = tokio::select! {
        signal = wait_for_signal() => {
            tracing::info!(signal, "Received shutdown signal");
            cancel.cancel();
            replay_done.await
        }
        joined = &mut replay_done => joined,
    };

    let summary = joined
        .context("failed to join feed replay")?
        .map_err(|_| anyhow!("feed replay thread panicked"))?;
    tracing::info!(
        dispatched = summary.dispatched,
        malformed = summary.malformed,
        "Feed finished"
    );
    Ok(())
}

/// Log the parsed configuration.
fn log_config(config: &RecorderConfig) {
    tracing::info!(
        symbols = ?config.feed.symbols,
        first_push = config.feed.first_push,
        replay_path = %config.feed.replay_path.display(),
        db_path = %config.storage.db_path.display(),
        metrics_port = config.server.metrics_port,
        "Configuration loaded"
    );
    tracing::debug!(
        queue_capacity = config.pipeline.queue_capacity,
        poll_interval_ms = config.pipeline.poll_interval.as_millis(),
        records_per_connection = config.pipeline.records_per_connection,
        sentinel_timeout_ms = config.pipeline.sentinel_timeout.as_millis(),
        shutdown_timeout_secs = config.pipeline.shutdown_timeout.as_secs(),
        "Pipeline settings"
    );
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        for dir in cwd.ancestors().skip(1) {
            let env_path = dir.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
        }
    }
}

/// Wait for SIGINT or SIGTERM and name the one received.
async fn wait_for_signal() -> &'static str {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => "SIGINT",
        () = terminate => "SIGTERM",
    }
}
