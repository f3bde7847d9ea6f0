//! Shared server state.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use ipnet::IpNet;
use upupup_common::{CheckConfig, Config, HealthConfig, MetricsConfig, ServiceDefaults};
use upupup_storage::Store;

use crate::access::{parse_cidrs, Allowlist};
use crate::hooks::HookManager;

/// Last Prometheus scrape-config generation outcome; readiness reads it.
#[derive(Debug, Default, Clone)]
pub struct ScrapeConfigStatus {
    pub path: String,
    pub generated_at: Option<DateTime<Utc>>,
    pub targets: Vec<String>,
    pub error: Option<String>,
}

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<Store>,
    pub hooks: Arc<HookManager>,
    pub allowlist: Arc<Allowlist>,
    pub hook_allowlists: Arc<HashMap<String, Allowlist>>,
    pub checks: Arc<HashMap<String, CheckConfig>>,
    pub trusted_proxies: Arc<Vec<IpNet>>,
    pub defaults: ServiceDefaults,
    pub health: HealthConfig,
    pub metrics: MetricsConfig,
    pub scrape_config: Arc<RwLock<ScrapeConfigStatus>>,
}

impl AppState {
    pub fn new(config: Config, store: Arc<Store>) -> Result<Self> {
        let allowlist =
            Allowlist::new(&config.server.allowed_ips).context("build allowlist")?;
        let trusted_proxies =
            parse_cidrs(&config.server.trusted_proxies).context("parse trusted proxies")?;

        let mut hook_allowlists = HashMap::new();
        for hook in &config.hooks {
            if hook.allowed_ips.is_empty() {
                continue;
            }
            let allowlist = Allowlist::new(&hook.allowed_ips)
                .with_context(|| format!("hook {:?} allowlist", hook.id))?;
            hook_allowlists.insert(hook.id.clone(), allowlist);
        }

        let checks: HashMap<String, CheckConfig> = config
            .checks
            .iter()
            .map(|check| (check.id.clone(), check.clone()))
            .collect();

        let hooks = Arc::new(HookManager::new(store.clone(), &config.hooks));
        let defaults = config.service.defaults.clone();
        let health = config.server.health.clone().with_defaults();
        let metrics = config.server.prometheus.clone().with_defaults();

        Ok(Self {
            config: Arc::new(config),
            store,
            hooks,
            allowlist: Arc::new(allowlist),
            hook_allowlists: Arc::new(hook_allowlists),
            checks: Arc::new(checks),
            trusted_proxies: Arc::new(trusted_proxies),
            defaults,
            health,
            metrics,
            scrape_config: Arc::new(RwLock::new(ScrapeConfigStatus::default())),
        })
    }

    /// The observation window used by health and metrics rendering:
    /// `effective_interval * max_interval_multiplier`.
    pub fn recent_window(&self, check: &CheckConfig) -> std::time::Duration {
        let interval = check.effective_interval(&self.defaults);
        let window = interval * self.health.max_interval_multiplier;
        if window.is_zero() {
            interval
        } else {
            window
        }
    }
}
