use async_trait::async_trait;
use serde::Deserialize;

use crate::{check_status, http_client, Event, Factory, Notifier, Result};

#[derive(Debug, Clone, Deserialize, Default)]
pub struct TwilioSmsConfig {
    #[serde(default)]
    pub account_sid: String,
    #[serde(default)]
    pub auth_token_ref: String,
    #[serde(default)]
    pub from: String,
    #[serde(default)]
    pub to: Vec<String>,
}

pub struct TwilioSmsNotifier {
    id: String,
    config: TwilioSmsConfig,
    auth_token: String,
    client: reqwest::Client,
}

impl TwilioSmsNotifier {
    pub fn new(id: &str, config: TwilioSmsConfig, factory: &Factory) -> Result<Self> {
        let auth_token = factory.secret(&config.auth_token_ref)?;
        Ok(Self {
            id: id.to_string(),
            config,
            auth_token,
            client: http_client()?,
        })
    }

    async fn send_message(&self, to: &str, body: &str) -> Result<()> {
        let endpoint = format!(
            "https://api.twilio.com/2010-04-01/Accounts/{}/Messages.json",
            self.config.account_sid
        );
        let response = self
            .client
            .post(&endpoint)
            .basic_auth(&self.config.account_sid, Some(&self.auth_token))
            .form(&[
                ("From", self.config.from.as_str()),
                ("To", to),
                ("Body", body),
            ])
            .send()
            .await?;
        check_status("twilio sms", response.status())
    }
}

#[async_trait]
impl Notifier for TwilioSmsNotifier {
    fn id(&self) -> &str {
        &self.id
    }

    async fn notify(&self, event: &Event) -> Result<()> {
        let body = format!(
            "{} - {} ({}) status={} severity={} run={}",
            event.check_name,
            event.summary,
            event.check_target,
            event.status,
            event.severity,
            event.run_id,
        );
        for to in &self.config.to {
            self.send_message(to, &body).await?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct TwilioVoiceConfig {
    #[serde(default)]
    pub account_sid: String,
    #[serde(default)]
    pub auth_token_ref: String,
    #[serde(default)]
    pub from: String,
    #[serde(default)]
    pub to: Vec<String>,
    #[serde(default)]
    pub voice_message: String,
}

pub struct TwilioVoiceNotifier {
    id: String,
    config: TwilioVoiceConfig,
    auth_token: String,
    client: reqwest::Client,
}

impl TwilioVoiceNotifier {
    pub fn new(id: &str, config: TwilioVoiceConfig, factory: &Factory) -> Result<Self> {
        let auth_token = factory.secret(&config.auth_token_ref)?;
        Ok(Self {
            id: id.to_string(),
            config,
            auth_token,
            client: http_client()?,
        })
    }

    async fn start_call(&self, to: &str, message: &str) -> Result<()> {
        let endpoint = format!(
            "https://api.twilio.com/2010-04-01/Accounts/{}/Calls.json",
            self.config.account_sid
        );
        let twiml = format!("<Response><Say>{message}</Say></Response>");
        let response = self
            .client
            .post(&endpoint)
            .basic_auth(&self.config.account_sid, Some(&self.auth_token))
            .form(&[
                ("From", self.config.from.as_str()),
                ("To", to),
                ("Twiml", twiml.as_str()),
            ])
            .send()
            .await?;
        check_status("twilio voice", response.status())
    }
}

#[async_trait]
impl Notifier for TwilioVoiceNotifier {
    fn id(&self) -> &str {
        &self.id
    }

    async fn notify(&self, event: &Event) -> Result<()> {
        let body = if self.config.voice_message.is_empty() {
            format!(
                "{}. Status {}. Severity {}. {}.",
                event.check_name, event.status, event.severity, event.summary,
            )
        } else {
            format!("{} (Status {})", self.config.voice_message, event.status)
        };
        for to in &self.config.to {
            self.start_call(to, &body).await?;
        }
        Ok(())
    }
}
