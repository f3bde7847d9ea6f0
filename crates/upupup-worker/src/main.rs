mod hooks;
mod maintenance;
mod runner;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;
use upupup_common::{Config, TemplateEngine};
use upupup_storage::{Options, Store};

use crate::runner::Runner;

/// Periodic check worker: executes probes and drives notifications.
#[derive(Parser, Debug)]
#[command(name = "upupup-worker", version)]
struct Args {
    /// Path to the configuration file (defaults to $MONITOR_CONFIG, then config.yml).
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|e| anyhow::anyhow!("failed to install default CryptoProvider: {e:?}"))?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("upupup=info".parse()?))
        .init();

    let args = Args::parse();
    let config_path = args
        .config
        .or_else(|| std::env::var("MONITOR_CONFIG").ok().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("config.yml"));

    let config = Config::load(&config_path)
        .with_context(|| format!("load config {}", config_path.display()))?;
    let secrets = Arc::new(config.resolve_secrets().context("resolve secrets")?);
    let templates = Arc::new(TemplateEngine::new());

    let factory = upupup_notify::Factory {
        secrets: secrets.clone(),
        templates: templates.clone(),
    };
    let notifiers = Arc::new(
        upupup_notify::build(&factory, &config.notifiers).context("build notifiers")?,
    );

    let tz = config.timezone();
    if !config.service.timezone.trim().is_empty() && tz == chrono_tz::Tz::UTC
        && !config.service.timezone.trim().eq_ignore_ascii_case("UTC")
    {
        tracing::warn!(timezone = %config.service.timezone, "failed to load timezone, defaulting to UTC");
    }

    let db_path = db_path(&config);
    if db_path.is_empty() {
        anyhow::bail!("storage path is not configured; set storage.path or MONITOR_DB_PATH");
    }
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

    let runner = Arc::new(Runner::new(
        &config,
        secrets,
        notifiers,
        templates,
        store,
        tz,
    )?);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        tracing::info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    tracing::info!(
        config = %config_path.display(),
        db = %db_path,
        checks = config.checks.len(),
        "upupup-worker starting"
    );
    runner.run(shutdown_rx).await;
    tracing::info!("worker stopped");
    Ok(())
}

fn db_path(config: &Config) -> String {
    match std::env::var("MONITOR_DB_PATH") {
        Ok(path) if !path.is_empty() => path,
        _ => config.storage.path.clone(),
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
