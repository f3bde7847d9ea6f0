//! Agent configuration, read entirely from the environment.

use std::time::Duration;

use anyhow::{anyhow, bail, Result};

const DEFAULT_SCRAPE_URL: &str = "http://node-exporter:9100/metrics";
const DEFAULT_INTERVAL: Duration = Duration::from_secs(15);
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_MAX_METRICS_BYTES: u64 = 2 * 1024 * 1024;
const DEFAULT_USER_AGENT: &str = "upgent/0.1";

#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub node_id: String,
    pub scrape_url: String,
    pub server_base_url: String,
    pub interval: Duration,
    pub timeout: Duration,
    pub max_metrics_bytes: u64,
    pub enable_gzip: bool,
    pub skip_tls_verify: bool,
    pub user_agent: String,
    pub ingest_url: String,
    pub log_level: String,
}

impl AgentConfig {
    pub fn load_from_env() -> Result<Self> {
        let node_id = env_trimmed("UPGENT_NODE_ID");
        if node_id.is_empty() {
            bail!("UPGENT_NODE_ID is required");
        }
        let server_base_url = env_trimmed("UPGENT_SERVER_URL");
        if server_base_url.is_empty() {
            bail!("UPGENT_SERVER_URL is required");
        }
        reqwest::Url::parse(&server_base_url)
            .map_err(|e| anyhow!("invalid UPGENT_SERVER_URL: {e}"))?;

        let mut scrape_url = env_trimmed("UPGENT_SCRAPE_URL");
        if scrape_url.is_empty() {
            scrape_url = DEFAULT_SCRAPE_URL.to_string();
        }
        reqwest::Url::parse(&scrape_url).map_err(|e| anyhow!("invalid UPGENT_SCRAPE_URL: {e}"))?;

        let interval = parse_duration_env("UPGENT_INTERVAL", DEFAULT_INTERVAL)?;
        if interval.is_zero() {
            bail!("UPGENT_INTERVAL must be positive");
        }
        let timeout = parse_duration_env("UPGENT_TIMEOUT", DEFAULT_TIMEOUT)?;
        if timeout.is_zero() {
            bail!("UPGENT_TIMEOUT must be positive");
        }

        let max_metrics_bytes = parse_size_env("UPGENT_MAX_METRICS_BYTES", DEFAULT_MAX_METRICS_BYTES)?;
        if max_metrics_bytes == 0 {
            bail!("UPGENT_MAX_METRICS_BYTES must be positive");
        }

        let enable_gzip = parse_bool_env("UPGENT_ENABLE_GZIP", true)?;
        let skip_tls_verify = parse_bool_env("UPGENT_SKIP_TLS_VERIFY", false)?;

        let mut user_agent = env_trimmed("UPGENT_USER_AGENT");
        if user_agent.is_empty() {
            user_agent = DEFAULT_USER_AGENT.to_string();
        }
        let mut log_level = env_trimmed("UPGENT_LOG_LEVEL");
        if log_level.is_empty() {
            log_level = "info".to_string();
        }

        let ingest_url = build_ingest_url(&server_base_url, &node_id);
        Ok(Self {
            node_id,
            scrape_url,
            server_base_url,
            interval,
            timeout,
            max_metrics_bytes,
            enable_gzip,
            skip_tls_verify,
            user_agent,
            ingest_url,
            log_level,
        })
    }
}

fn env_trimmed(name: &str) -> String {
    std::env::var(name).unwrap_or_default().trim().to_string()
}

fn parse_duration_env(name: &str, default: Duration) -> Result<Duration> {
    let value = env_trimmed(name);
    if value.is_empty() {
        return Ok(default);
    }
    humantime::parse_duration(&value).map_err(|e| anyhow!("invalid {name}: {e}"))
}

fn parse_size_env(name: &str, default: u64) -> Result<u64> {
    let value = env_trimmed(name);
    if value.is_empty() {
        return Ok(default);
    }
    value.parse().map_err(|e| anyhow!("invalid {name}: {e}"))
}

fn parse_bool_env(name: &str, default: bool) -> Result<bool> {
    let value = env_trimmed(name);
    if value.is_empty() {
        return Ok(default);
    }
    match value.to_ascii_lowercase().as_str() {
        "1" | "t" | "true" | "y" | "yes" | "on" => Ok(true),
        "0" | "f" | "false" | "n" | "no" | "off" => Ok(false),
        other => bail!("invalid {name}: expected boolean, got {other:?}"),
    }
}

fn build_ingest_url(base: &str, node_id: &str) -> String {
    format!("{}/api/ingest/{}", base.trim_end_matches('/'), node_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ingest_url_joins_cleanly() {
        assert_eq!(
            build_ingest_url("https://monitor.example/", "node-1"),
            "https://monitor.example/api/ingest/node-1"
        );
        assert_eq!(
            build_ingest_url("https://monitor.example", "node-1"),
            "https://monitor.example/api/ingest/node-1"
        );
    }

    #[test]
    fn bool_parsing() {
        assert!(parse_bool_env("UPGENT_TEST_UNSET_BOOL", true).unwrap());
        std::env::set_var("UPGENT_TEST_BOOL", "off");
        assert!(!parse_bool_env("UPGENT_TEST_BOOL", true).unwrap());
        std::env::set_var("UPGENT_TEST_BOOL", "YES");
        assert!(parse_bool_env("UPGENT_TEST_BOOL", false).unwrap());
        std::env::set_var("UPGENT_TEST_BOOL", "maybe");
        assert!(parse_bool_env("UPGENT_TEST_BOOL", false).is_err());
        std::env::remove_var("UPGENT_TEST_BOOL");
    }

    #[test]
    fn duration_parsing() {
        std::env::set_var("UPGENT_TEST_DURATION", "45s");
        assert_eq!(
            parse_duration_env("UPGENT_TEST_DURATION", DEFAULT_INTERVAL).unwrap(),
            Duration::from_secs(45)
        );
        std::env::remove_var("UPGENT_TEST_DURATION");
        assert_eq!(
            parse_duration_env("UPGENT_TEST_DURATION", DEFAULT_INTERVAL).unwrap(),
            DEFAULT_INTERVAL
        );
    }
}
