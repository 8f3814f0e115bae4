//! Quote Broadcaster Binary
//!
//! Starts the fetch scheduler and the HTTP surface.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin quote-broadcaster
//! ```
//!
//! # Environment Variables
//!
//! - `QUOTE_SYMBOLS`: comma separated symbols (default: AAPL,AMZN,GOOGL,MSFT,TSLA,GOOG,NVDA,BA,NFLX)
//! - `QUOTE_PROVIDER`: "yahoo" | "google" (default: yahoo)
//! - `QUOTE_ROUND_INTERVAL_SECS`: delay between rounds (default: 5)
//! - `QUOTE_FETCH_CONCURRENCY`: max in-flight upstream requests (default: 8)
//! - `QUOTE_FETCH_TIMEOUT_MS`: per-symbol timeout (default: 5000)
//! - `QUOTE_PUSH_INCLUDE_HISTORY`: include history in push payloads (default: false)
//! - `QUOTE_SUBSCRIBER_QUEUE_CAPACITY`: per-client queue length (default: 16)
//! - `QUOTE_SLOW_CONSUMER_POLICY`: "disconnect" | "drop" (default: disconnect)
//! - `QUOTE_REPLAY_LAST_ON_CONNECT`: send last snapshot on connect (default: true)
//! - `QUOTE_KEEPALIVE_INTERVAL_SECS`: push keep-alive period (default: 15)
//! - `QUOTE_SEND_TIMEOUT_SECS`: per-send bound (default: 5)
//! - `QUOTE_HTTP_PORT`: HTTP port (default: 8000)
//! - `QUOTE_STATIC_DIR`: index and assets directory (default: ./static)
//! - `OTEL_ENABLED`: Enable OpenTelemetry export (default: false)
//! - `RUST_LOG`: Log filter (default: quote_broadcaster=info)

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use quote_broadcaster::infrastructure::telemetry;
use quote_broadcaster::{
    AppState, BroadcastConfig, Broadcaster, ChangeDetector, PollingScheduler, PushTiming,
    QuoteFetcher, QuoteServer, ServiceConfig, build_provider, init_metrics, load_index,
};
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_dotenv();

    let _telemetry_guard = telemetry::init().context("failed to initialise telemetry")?;

    tracing::info!("Starting Quote Broadcaster");

    let _metrics_handle = init_metrics().context("failed to install Prometheus recorder")?;

    let config = ServiceConfig::from_env().context("invalid configuration")?;
    log_config(&config);

    // Fatal before anything is spawned.
    let index_html = load_index(&config.server.static_dir)?;

    let shutdown_token = CancellationToken::new();

    let provider = build_provider(&config.provider).context("failed to build quote provider")?;
    let fetcher = QuoteFetcher::new(
        provider,
        config.fetch.concurrency_limit,
        config.fetch.fetch_timeout,
    );
    let symbols: Arc<[_]> = config.symbols.clone().into();

    let broadcaster = Arc::new(Broadcaster::new(BroadcastConfig::from(
        config.broadcast.clone(),
    )));
    let detector = Arc::new(ChangeDetector::new());

    let scheduler = Arc::new(PollingScheduler::new(
        fetcher.clone(),
        Arc::clone(&symbols),
        detector,
        Arc::clone(&broadcaster),
        config.fetch.round_interval,
    ));

    let app_state = Arc::new(AppState::new(
        fetcher,
        symbols,
        Arc::clone(&broadcaster),
        scheduler.status(),
        PushTiming {
            keepalive_interval: config.broadcast.keepalive_interval,
            send_timeout: config.broadcast.send_timeout,
        },
        index_html,
        shutdown_token.clone(),
    ));
    let server = QuoteServer::new(
        config.server.http_port,
        config.server.static_dir.clone(),
        app_state,
        shutdown_token.clone(),
    );

    let scheduler_cancel = shutdown_token.clone();
    let scheduler_task = tokio::spawn({
        let scheduler = Arc::clone(&scheduler);
        async move { scheduler.run(scheduler_cancel).await }
    });

    let server_shutdown = shutdown_token.clone();
    tokio::spawn(async move {
        if let Err(e) = server.run().await {
            tracing::error!(error = %e, "HTTP server error");
            server_shutdown.cancel();
        }
    });

    tracing::info!("Quote broadcaster ready");

    await_shutdown(shutdown_token).await;

    if tokio::time::timeout(SHUTDOWN_TIMEOUT, scheduler_task)
        .await
        .is_err()
    {
        tracing::warn!(
            timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
            "Scheduler did not stop within shutdown timeout"
        );
    }

    tracing::info!("Quote broadcaster stopped");
    Ok(())
}

/// Load .env file from current or ancestor directories.
fn load_dotenv() {
    if dotenvy::dotenv().is_err() {
        load_dotenv_from_ancestors();
    }
}

/// Log the parsed configuration.
fn log_config(config: &ServiceConfig) {
    tracing::info!(
        provider = config.provider.kind.as_str(),
        symbols = config.symbols.len(),
        round_interval_secs = config.fetch.round_interval.as_secs(),
        concurrency_limit = config.fetch.concurrency_limit,
        http_port = config.server.http_port,
        "Configuration loaded"
    );
    tracing::debug!(
        static_dir = %config.server.static_dir.display(),
        slow_consumer_policy = config.broadcast.slow_consumer_policy.as_str(),
        queue_capacity = config.broadcast.queue_capacity,
        include_history = config.broadcast.include_history,
        "Push settings"
    );
}

/// Walk ancestor directories looking for a .env file.
fn load_dotenv_from_ancestors() {
    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT) or an internal cancel.
#[allow(clippy::expect_used)]
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
        () = shutdown_token.cancelled() => {
            tracing::warn!("Internal failure, initiating shutdown");
        }
    }

    shutdown_token.cancel();

    tracing::info!(
        timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
        "Graceful shutdown started"
    );
}
