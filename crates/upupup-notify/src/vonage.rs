use async_trait::async_trait;
use serde::Deserialize;

use crate::{check_status, http_client, Event, Factory, Notifier, NotifyError, Result};

#[derive(Debug, Clone, Deserialize, Default)]
pub struct VonageSmsConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub api_key_ref: String,
    #[serde(default)]
    pub api_secret: String,
    #[serde(default)]
    pub api_secret_ref: String,
    #[serde(default)]
    pub from: String,
    #[serde(default)]
    pub to: Vec<String>,
    #[serde(default)]
    pub message_prefix: String,
}

fn resolve_credential(
    direct: &str,
    reference: &str,
    field: &str,
    factory: &Factory,
) -> Result<String> {
    if !direct.is_empty() {
        return Ok(direct.to_string());
    }
    if !reference.is_empty() {
        let value = factory.secret(reference)?;
        if !value.is_empty() {
            return Ok(value);
        }
    }
    Err(NotifyError::InvalidConfig(format!(
        "{field} or {field}_ref required"
    )))
}

pub struct VonageSmsNotifier {
    id: String,
    config: VonageSmsConfig,
    api_key: String,
    api_secret: String,
    client: reqwest::Client,
}

impl VonageSmsNotifier {
    pub fn new(id: &str, config: VonageSmsConfig, factory: &Factory) -> Result<Self> {
        let api_key = resolve_credential(&config.api_key, &config.api_key_ref, "api_key", factory)?;
        let api_secret =
            resolve_credential(&config.api_secret, &config.api_secret_ref, "api_secret", factory)?;
        Ok(Self {
            id: id.to_string(),
            config,
            api_key,
            api_secret,
            client: http_client()?,
        })
    }

    async fn send_message(&self, to: &str, message: &str) -> Result<()> {
        let response = self
            .client
            .post("https://rest.nexmo.com/sms/json")
            .form(&[
                ("api_key", self.api_key.as_str()),
                ("api_secret", self.api_secret.as_str()),
                ("to", to),
                ("from", self.config.from.as_str()),
                ("text", message),
            ])
            .send()
            .await?;
        check_status("vonage sms", response.status())
    }
}

#[async_trait]
impl Notifier for VonageSmsNotifier {
    fn id(&self) -> &str {
        &self.id
    }

    async fn notify(&self, event: &Event) -> Result<()> {
        let mut body = format!(
            "{} - {} ({}) status={} severity={} run={}",
            event.check_name,
            event.summary,
            event.check_target,
            event.status,
            event.severity,
            event.run_id,
        );
        if !self.config.message_prefix.is_empty() {
            body = format!("{} {}", self.config.message_prefix, body);
        }
        for to in &self.config.to {
            self.send_message(to, &body).await?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct VonageVoiceConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub api_key_ref: String,
    #[serde(default)]
    pub api_secret: String,
    #[serde(default)]
    pub api_secret_ref: String,
    #[serde(default)]
    pub from: String,
    #[serde(default)]
    pub to: Vec<String>,
    #[serde(default)]
    pub voice_message: String,
}

pub struct VonageVoiceNotifier {
    id: String,
    config: VonageVoiceConfig,
    api_key: String,
    api_secret: String,
    client: reqwest::Client,
}

impl VonageVoiceNotifier {
    pub fn new(id: &str, config: VonageVoiceConfig, factory: &Factory) -> Result<Self> {
        let api_key = resolve_credential(&config.api_key, &config.api_key_ref, "api_key", factory)?;
        let api_secret =
            resolve_credential(&config.api_secret, &config.api_secret_ref, "api_secret", factory)?;
        Ok(Self {
            id: id.to_string(),
            config,
            api_key,
            api_secret,
            client: http_client()?,
        })
    }
}

#[async_trait]
impl Notifier for VonageVoiceNotifier {
    fn id(&self) -> &str {
        &self.id
    }

    async fn notify(&self, event: &Event) -> Result<()> {
        let text = if self.config.voice_message.is_empty() {
            format!(
                "{}. Status {}. Severity {}. {}.",
                event.check_name, event.status, event.severity, event.summary,
            )
        } else {
            format!("{} (Status {})", self.config.voice_message, event.status)
        };
        for to in &self.config.to {
            let response = self
                .client
                .post("https://rest.nexmo.com/tts/json")
                .form(&[
                    ("api_key", self.api_key.as_str()),
                    ("api_secret", self.api_secret.as_str()),
                    ("to", to.as_str()),
                    ("from", self.config.from.as_str()),
                    ("text", text.as_str()),
                ])
                .send()
                .await?;
            check_status("vonage voice", response.status())?;
        }
        Ok(())
    }
}
