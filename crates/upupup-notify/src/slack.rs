use async_trait::async_trait;
use serde::Deserialize;

use crate::{check_status, http_client, Event, Factory, Notifier, Result};

#[derive(Debug, Clone, Deserialize, Default)]
pub struct SlackConfig {
    #[serde(default)]
    pub webhook_url_ref: String,
    #[serde(default)]
    pub channel: String,
    #[serde(default)]
    pub username: String,
}

pub struct SlackNotifier {
    id: String,
    config: SlackConfig,
    url: String,
    client: reqwest::Client,
}

impl SlackNotifier {
    pub fn new(id: &str, config: SlackConfig, factory: &Factory) -> Result<Self> {
        let url = factory.secret(&config.webhook_url_ref)?;
        Ok(Self {
            id: id.to_string(),
            config,
            url,
            client: http_client()?,
        })
    }
}

#[async_trait]
impl Notifier for SlackNotifier {
    fn id(&self) -> &str {
        &self.id
    }

    async fn notify(&self, event: &Event) -> Result<()> {
        let mut payload = serde_json::json!({
            "text": format!(
                "*{}* {}\nStatus: {} | Severity: {} | Run: {}",
                event.check_name, event.summary, event.status, event.severity, event.run_id
            ),
        });
        if !self.config.channel.is_empty() {
            payload["channel"] = serde_json::json!(self.config.channel);
        }
        if !self.config.username.is_empty() {
            payload["username"] = serde_json::json!(self.config.username);
        }
        let response = self.client.post(&self.url).json(&payload).send().await?;
        check_status("slack webhook", response.status())
    }
}
