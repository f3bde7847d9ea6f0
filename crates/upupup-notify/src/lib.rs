//! Notification transports behind a uniform dispatch contract.
//!
//! The loose per-type parameter maps from the configuration are decoded into
//! typed notifiers when the registry is built, not at dispatch time. Every
//! transport bounds its own I/O (10 seconds) and reports errors upward; the
//! escalation engine never retries.

pub mod error;

mod discord;
mod email;
mod slack;
mod telegram;
mod twilio;
mod vonage;
mod webhook;

#[cfg(test)]
mod tests;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use upupup_common::{NotifierConfig, TemplateEngine};

pub use error::{NotifyError, Result};

pub(crate) const TRANSPORT_TIMEOUT: Duration = Duration::from_secs(10);

/// A notification event emitted for one check result.
#[derive(Debug, Clone, Default)]
pub struct Event {
    pub check_id: String,
    pub check_name: String,
    pub check_target: String,
    /// `firing` or `resolved`.
    pub status: String,
    pub severity: String,
    pub summary: String,
    pub labels: HashMap<String, String>,
    pub run_id: String,
    pub first_failure_at: Option<DateTime<Utc>>,
    pub occurred_at: DateTime<Utc>,
}

/// A delivery mechanism.
#[async_trait]
pub trait Notifier: Send + Sync {
    fn id(&self) -> &str;
    async fn notify(&self, event: &Event) -> Result<()>;
}

/// Notifiers by id, constructed once from configuration.
#[derive(Default)]
pub struct Registry {
    items: HashMap<String, Arc<dyn Notifier>>,
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("items", &self.items.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Registry {
    pub fn get(&self, id: &str) -> Option<Arc<dyn Notifier>> {
        self.items.get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    fn add(&mut self, notifier: Arc<dyn Notifier>) -> Result<()> {
        let id = notifier.id().to_string();
        if self.items.insert(id.clone(), notifier).is_some() {
            return Err(NotifyError::Duplicate(id));
        }
        Ok(())
    }
}

/// Shared dependencies handed to notifier constructors.
pub struct Factory {
    pub secrets: Arc<HashMap<String, String>>,
    pub templates: Arc<TemplateEngine>,
}

impl Factory {
    /// Resolves a `*_ref` config value against the secret map. An empty ref
    /// yields an empty value, matching checks that treat the field as
    /// optional.
    pub(crate) fn secret(&self, reference: &str) -> Result<String> {
        if reference.is_empty() {
            return Ok(String::new());
        }
        self.secrets
            .get(reference)
            .cloned()
            .ok_or_else(|| NotifyError::MissingSecret(reference.to_string()))
    }
}

/// Builds the registry from configuration, decoding each parameter map into
/// its typed notifier.
pub fn build(factory: &Factory, configs: &[NotifierConfig]) -> Result<Registry> {
    let mut registry = Registry::default();
    for config in configs {
        let notifier = build_notifier(factory, config).map_err(|e| match e {
            NotifyError::InvalidConfig(msg) => {
                NotifyError::InvalidConfig(format!("notifier {:?}: {msg}", config.id))
            }
            other => other,
        })?;
        registry.add(notifier)?;
    }
    Ok(registry)
}

fn build_notifier(factory: &Factory, config: &NotifierConfig) -> Result<Arc<dyn Notifier>> {
    match config.kind.as_str() {
        "email" => Ok(Arc::new(email::EmailNotifier::new(
            &config.id,
            decode(&config.config)?,
            factory,
        )?)),
        "slack" => Ok(Arc::new(slack::SlackNotifier::new(
            &config.id,
            decode(&config.config)?,
            factory,
        )?)),
        "telegram" => Ok(Arc::new(telegram::TelegramNotifier::new(
            &config.id,
            decode(&config.config)?,
            factory,
        )?)),
        "discord" => Ok(Arc::new(discord::DiscordNotifier::new(
            &config.id,
            decode(&config.config)?,
            factory,
        )?)),
        "webhook" => Ok(Arc::new(webhook::WebhookNotifier::new(
            &config.id,
            decode(&config.config)?,
            factory,
        )?)),
        "sms" => build_sms(factory, config),
        "voice" => build_voice(factory, config),
        other => Err(NotifyError::UnsupportedType(other.to_string())),
    }
}

#[derive(Deserialize, Default)]
struct ProviderTag {
    #[serde(default)]
    provider: String,
}

fn build_sms(factory: &Factory, config: &NotifierConfig) -> Result<Arc<dyn Notifier>> {
    let tag: ProviderTag = decode(&config.config)?;
    match tag.provider.to_ascii_lowercase().as_str() {
        "twilio" | "" => Ok(Arc::new(twilio::TwilioSmsNotifier::new(
            &config.id,
            decode(&config.config)?,
            factory,
        )?)),
        "vonage" => Ok(Arc::new(vonage::VonageSmsNotifier::new(
            &config.id,
            decode(&config.config)?,
            factory,
        )?)),
        other => Err(NotifyError::InvalidConfig(format!(
            "unsupported sms provider {other:?}"
        ))),
    }
}

fn build_voice(factory: &Factory, config: &NotifierConfig) -> Result<Arc<dyn Notifier>> {
    let tag: ProviderTag = decode(&config.config)?;
    match tag.provider.to_ascii_lowercase().as_str() {
        "twilio" | "" => Ok(Arc::new(twilio::TwilioVoiceNotifier::new(
            &config.id,
            decode(&config.config)?,
            factory,
        )?)),
        "vonage" => Ok(Arc::new(vonage::VonageVoiceNotifier::new(
            &config.id,
            decode(&config.config)?,
            factory,
        )?)),
        other => Err(NotifyError::InvalidConfig(format!(
            "unsupported voice provider {other:?}"
        ))),
    }
}

fn decode<T: serde::de::DeserializeOwned>(value: &serde_yaml::Value) -> Result<T> {
    // an omitted config block decodes like an empty map
    let value = match value {
        serde_yaml::Value::Null => serde_yaml::Value::Mapping(serde_yaml::Mapping::new()),
        other => other.clone(),
    };
    serde_yaml::from_value(value).map_err(|e| NotifyError::InvalidConfig(e.to_string()))
}

pub(crate) fn http_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(TRANSPORT_TIMEOUT)
        .build()
        .map_err(NotifyError::Http)
}

pub(crate) fn check_status(service: &'static str, status: reqwest::StatusCode) -> Result<()> {
    if status.as_u16() >= 300 {
        return Err(NotifyError::Api {
            service,
            status: status.as_u16(),
        });
    }
    Ok(())
}
