use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use upupup_common::{RenderScope, TemplateEngine};

use crate::{check_status, http_client, Event, Factory, Notifier, NotifyError, Result};

#[derive(Debug, Clone, Deserialize, Default)]
pub struct WebhookConfig {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub method: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub template: String,
}

pub struct WebhookNotifier {
    id: String,
    config: WebhookConfig,
    secrets: Arc<HashMap<String, String>>,
    templates: Arc<TemplateEngine>,
    client: reqwest::Client,
}

impl WebhookNotifier {
    pub fn new(id: &str, config: WebhookConfig, factory: &Factory) -> Result<Self> {
        Ok(Self {
            id: id.to_string(),
            config,
            secrets: factory.secrets.clone(),
            templates: factory.templates.clone(),
            client: http_client()?,
        })
    }

    fn render_scope(&self, event: &Event) -> RenderScope {
        let mut extra = HashMap::new();
        extra.insert("status".to_string(), serde_json::json!(event.status));
        extra.insert("severity".to_string(), serde_json::json!(event.severity));
        extra.insert("summary".to_string(), serde_json::json!(event.summary));
        extra.insert("run_id".to_string(), serde_json::json!(event.run_id));
        extra.insert(
            "occurred_at".to_string(),
            serde_json::json!(event.occurred_at.to_rfc3339()),
        );
        extra.insert(
            "first_failure_at".to_string(),
            match event.first_failure_at {
                Some(at) => serde_json::json!(at.to_rfc3339()),
                None => serde_json::Value::Null,
            },
        );
        extra.insert(
            "ui".to_string(),
            serde_json::json!({
                "check_url": format!("https://monitoring.local/checks/{}", event.check_id),
            }),
        );
        RenderScope {
            secrets: self.secrets.as_ref().clone(),
            vars: HashMap::new(),
            check: upupup_common::CheckScope {
                id: event.check_id.clone(),
                name: event.check_name.clone(),
                target: event.check_target.clone(),
            },
            labels: event.labels.clone(),
            extra,
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    fn id(&self) -> &str {
        &self.id
    }

    async fn notify(&self, event: &Event) -> Result<()> {
        let scope = self.render_scope(event);
        let payload = self
            .templates
            .render(&self.config.template, &scope)
            .map_err(|e| NotifyError::Template(e.to_string()))?;

        let method = if self.config.method.is_empty() {
            reqwest::Method::POST
        } else {
            reqwest::Method::from_bytes(self.config.method.as_bytes())
                .map_err(|_| NotifyError::InvalidConfig(format!(
                    "invalid webhook method {:?}",
                    self.config.method
                )))?
        };

        let mut request = self.client.request(method, self.config.url.as_str());
        let mut has_content_type = false;
        if !self.config.headers.is_empty() {
            let headers = self
                .templates
                .render_map(&self.config.headers, &scope)
                .map_err(|e| NotifyError::Template(e.to_string()))?;
            for (key, value) in headers {
                if key.eq_ignore_ascii_case("content-type") {
                    has_content_type = true;
                }
                request = request.header(key, value);
            }
        }
        if !has_content_type {
            let content_type = if payload.trim_start().starts_with('{') {
                "application/json"
            } else {
                "text/plain"
            };
            request = request.header("Content-Type", content_type);
        }

        let response = request.body(payload).send().await?;
        check_status("webhook", response.status())
    }
}
