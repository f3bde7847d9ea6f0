use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use serde::Deserialize;

use crate::{Event, Factory, Notifier, NotifyError, Result};

#[derive(Debug, Clone, Deserialize, Default)]
pub struct EmailConfig {
    #[serde(default)]
    pub smtp_host: String,
    #[serde(default)]
    pub smtp_port: u16,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password_ref: String,
    #[serde(default)]
    pub from: String,
    #[serde(default)]
    pub to: Vec<String>,
}

pub struct EmailNotifier {
    id: String,
    config: EmailConfig,
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

impl EmailNotifier {
    pub fn new(id: &str, config: EmailConfig, factory: &Factory) -> Result<Self> {
        let password = factory.secret(&config.password_ref)?;
        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::relay(&config.smtp_host)
            .map_err(|e| NotifyError::Smtp(e.to_string()))?;
        if config.smtp_port != 0 {
            builder = builder.port(config.smtp_port);
        }
        if !config.username.is_empty() {
            builder = builder.credentials(Credentials::new(config.username.clone(), password));
        }
        Ok(Self {
            id: id.to_string(),
            config,
            transport: builder.build(),
        })
    }
}

#[async_trait]
impl Notifier for EmailNotifier {
    fn id(&self) -> &str {
        &self.id
    }

    async fn notify(&self, event: &Event) -> Result<()> {
        let subject = format!("[{}] {}", event.status.to_uppercase(), event.check_name);
        let body = format!(
            "{subject}\n\nCheck: {} ({})\nStatus: {}\nSeverity: {}\nSummary: {}\nRunID: {}\n",
            event.check_name,
            event.check_target,
            event.status,
            event.severity,
            event.summary,
            event.run_id,
        );

        let from = self
            .config
            .from
            .parse()
            .map_err(|e| NotifyError::Smtp(format!("invalid from address: {e}")))?;
        let mut builder = Message::builder()
            .from(from)
            .subject(subject)
            .header(ContentType::TEXT_PLAIN);
        for to in &self.config.to {
            let to = to
                .parse()
                .map_err(|e| NotifyError::Smtp(format!("invalid to address {to:?}: {e}")))?;
            builder = builder.to(to);
        }
        let message = builder
            .body(body)
            .map_err(|e| NotifyError::Smtp(e.to_string()))?;

        self.transport
            .send(message)
            .await
            .map_err(|e| NotifyError::Smtp(e.to_string()))?;
        Ok(())
    }
}
