use std::future::IntoFuture;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing_subscriber::EnvFilter;
use upupup_common::Config;
use upupup_server::{app, readiness, state::AppState};
use upupup_storage::{Options, Store};

/// HTTP surface: health, readiness, hooks, per-check metrics and ingest.
#[derive(Parser, Debug)]
#[command(name = "upupup-server", version)]
struct Args {
    /// Path to the configuration file.
    #[arg(long, default_value = "config.yml")]
    config: PathBuf,

    /// Override the configured listen address.
    #[arg(long)]
    listen: Option<String>,

    /// Graceful shutdown timeout.
    #[arg(long, default_value = "10s", value_parser = humantime::parse_duration)]
    shutdown_timeout: Duration,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("upupup=info".parse()?))
        .init();

    let args = Args::parse();
    let mut config = Config::load(&args.config)
        .with_context(|| format!("load config {}", args.config.display()))?;

    if let Some(listen) = args.listen {
        config.server.listen = listen;
    }
    if config.server.listen.is_empty() {
        config.server.listen = ":8080".to_string();
    }

    let db_path = match std::env::var("MONITOR_DB_PATH") {
        Ok(path) if !path.is_empty() => path,
        _ => config.storage.path.clone(),
    };
    let store = Arc::new(
        Store::open(
            &db_path,
            Options {
                check_state_retention: config.storage.check_state_retention,
                notification_log_retention: config.storage.notification_log_retention,
            },
        )
        .context("open storage")?,
    );

    let listen = normalise_listen(&config.server.listen);
    let state = AppState::new(config, store).context("initialise app state")?;
    readiness::initialise_scrape_config(&state);

    let router = app::build_router(state);
    let listener = tokio::net::TcpListener::bind(&listen)
        .await
        .with_context(|| format!("bind {listen}"))?;
    tracing::info!(addr = %listen, db = %db_path, "server listening");

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    });

    let mut drain_rx = shutdown_rx.clone();
    let mut graceful_rx = shutdown_rx;
    let server = axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        let _ = graceful_rx.changed().await;
    })
    .into_future();
    tokio::pin!(server);

    tokio::select! {
        result = &mut server => {
            result.context("serve http")?;
        }
        _ = drain_rx.changed() => {
            tracing::info!(timeout = ?args.shutdown_timeout, "shutdown signal received, draining connections");
            match tokio::time::timeout(args.shutdown_timeout, &mut server).await {
                Ok(result) => result.context("serve http")?,
                Err(_) => tracing::warn!("graceful shutdown timed out"),
            }
        }
    }

    tracing::info!("server stopped");
    Ok(())
}

/// Accepts Go-style `:8080` listen addresses.
fn normalise_listen(listen: &str) -> String {
    if let Some(port) = listen.strip_prefix(':') {
        format!("0.0.0.0:{port}")
    } else {
        listen.to_string()
    }
}

async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        let mut term = match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(term) => term,
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                let _ = signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = signal::ctrl_c() => {}
            _ = term.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = signal::ctrl_c().await;
    }
}
