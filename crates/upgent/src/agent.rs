//! Scrape-and-forward loop.

use std::io::Write;
use std::time::Instant;

use anyhow::{anyhow, Context, Result};
use flate2::write::GzEncoder;
use flate2::Compression;

use crate::config::AgentConfig;

pub struct Agent {
    config: AgentConfig,
    client: reqwest::Client,
}

impl Agent {
    pub fn new(config: AgentConfig) -> Result<Self> {
        let mut builder = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(config.user_agent.clone());
        if config.skip_tls_verify {
            builder = builder.danger_accept_invalid_certs(true);
        }
        let client = builder.build().context("build http client")?;
        Ok(Self { config, client })
    }

    /// Scrapes immediately, then on every interval tick until shutdown.
    pub async fn run(&self) -> Result<()> {
        tracing::info!(
            node_id = %self.config.node_id,
            interval = ?self.config.interval,
            scrape = %self.config.scrape_url,
            server = %self.config.server_base_url,
            "starting upgent"
        );

        let mut tick = tokio::time::interval(self.config.interval);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("shutting down");
                    return Ok(());
                }
                _ = tick.tick() => {
                    if let Err(e) = self.execute().await {
                        tracing::error!(error = %e, "scrape cycle failed");
                    }
                }
            }
        }
    }

    async fn execute(&self) -> Result<()> {
        let start = Instant::now();
        let payload = self.scrape().await?;
        self.forward(&payload).await?;
        tracing::info!(
            bytes = payload.len(),
            duration = ?start.elapsed(),
            "forwarded metrics"
        );
        Ok(())
    }

    async fn scrape(&self) -> Result<Vec<u8>> {
        let response = self
            .client
            .get(&self.config.scrape_url)
            .header("Accept", "text/plain; version=0.0.4")
            .send()
            .await
            .with_context(|| format!("scrape {}", self.config.scrape_url))?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!(
                "scrape {}: unexpected status {status}: {}",
                self.config.scrape_url,
                body.trim()
            ));
        }

        let data = response.bytes().await.context("read scrape response")?;
        if data.len() as u64 > self.config.max_metrics_bytes {
            return Err(anyhow!(
                "scrape payload exceeds {} bytes",
                self.config.max_metrics_bytes
            ));
        }
        Ok(data.to_vec())
    }

    async fn forward(&self, payload: &[u8]) -> Result<()> {
        let mut request = self
            .client
            .post(&self.config.ingest_url)
            .header("Content-Type", "text/plain; version=0.0.4");

        let body = if self.config.enable_gzip {
            let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(payload).context("gzip payload")?;
            request = request.header("Content-Encoding", "gzip");
            encoder.finish().context("finalize gzip payload")?
        } else {
            payload.to_vec()
        };

        let response = request
            .body(body)
            .send()
            .await
            .context("forward metrics")?;

        let status = response.status();
        if status != reqwest::StatusCode::ACCEPTED {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!(
                "ingest {}: unexpected status {status}: {}",
                self.config.ingest_url,
                body.trim()
            ));
        }
        Ok(())
    }
}
