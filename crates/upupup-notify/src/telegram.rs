use async_trait::async_trait;
use serde::Deserialize;

use crate::{check_status, http_client, Event, Factory, Notifier, Result};

#[derive(Debug, Clone, Deserialize, Default)]
pub struct TelegramConfig {
    #[serde(default)]
    pub bot_token_ref: String,
    #[serde(default)]
    pub chat_id: String,
    #[serde(default)]
    pub parse_mode: String,
}

pub struct TelegramNotifier {
    id: String,
    config: TelegramConfig,
    token: String,
    client: reqwest::Client,
}

impl TelegramNotifier {
    pub fn new(id: &str, config: TelegramConfig, factory: &Factory) -> Result<Self> {
        let token = factory.secret(&config.bot_token_ref)?;
        Ok(Self {
            id: id.to_string(),
            config,
            token,
            client: http_client()?,
        })
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    fn id(&self) -> &str {
        &self.id
    }

    async fn notify(&self, event: &Event) -> Result<()> {
        let text = format!(
            "*{}* {}\nStatus: {}\nSeverity: {}\nRun: `{}`",
            event.check_name,
            event.summary,
            event.status.to_uppercase(),
            event.severity.to_uppercase(),
            event.run_id,
        );
        let parse_mode = if self.config.parse_mode.is_empty() {
            "Markdown"
        } else {
            &self.config.parse_mode
        };
        let payload = serde_json::json!({
            "chat_id": self.config.chat_id,
            "text": text,
            "parse_mode": parse_mode,
        });
        let url = format!("https://api.telegram.org/bot{}/sendMessage", self.token);
        let response = self.client.post(&url).json(&payload).send().await?;
        check_status("telegram", response.status())
    }
}
