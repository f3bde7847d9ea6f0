//! Template rendering for request bodies, URLs, headers and webhook payloads.
//!
//! Templates see four top-level maps: `secrets`, `vars` (pre-auth captures),
//! `check` (`id`/`name`/`target`) and `labels`. Rendering an empty template
//! yields an empty string.

use std::collections::HashMap;

use anyhow::{Context, Result};
use minijinja::Environment;
use serde::Serialize;

#[derive(Debug, Clone, Serialize, Default)]
pub struct RenderScope {
    pub secrets: HashMap<String, String>,
    pub vars: HashMap<String, String>,
    pub check: CheckScope,
    pub labels: HashMap<String, String>,
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct CheckScope {
    pub id: String,
    pub name: String,
    pub target: String,
}

pub struct TemplateEngine {
    env: Environment<'static>,
}

impl Default for TemplateEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl TemplateEngine {
    pub fn new() -> Self {
        let mut env = Environment::new();
        env.add_filter("to_json", |value: minijinja::Value| {
            serde_json::to_string(&value).unwrap_or_default()
        });
        Self { env }
    }

    pub fn render(&self, template: &str, scope: &RenderScope) -> Result<String> {
        if template.is_empty() {
            return Ok(String::new());
        }
        self.env
            .render_str(template, scope)
            .with_context(|| format!("render template {template:?}"))
    }

    /// Renders every value of a map, keeping keys untouched.
    pub fn render_map(
        &self,
        values: &HashMap<String, String>,
        scope: &RenderScope,
    ) -> Result<HashMap<String, String>> {
        let mut out = HashMap::with_capacity(values.len());
        for (key, value) in values {
            out.insert(key.clone(), self.render(value, scope)?);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scope() -> RenderScope {
        let mut scope = RenderScope::default();
        scope.secrets.insert("api_key".into(), "s3cr3t".into());
        scope.vars.insert("token".into(), "abc123".into());
        scope.check = CheckScope {
            id: "api-health".into(),
            name: "API health".into(),
            target: "https://example.com".into(),
        };
        scope.labels.insert("team".into(), "platform".into());
        scope
    }

    #[test]
    fn renders_secrets_vars_and_check_fields() {
        let engine = TemplateEngine::new();
        let out = engine
            .render(
                "Bearer {{ vars.token }} key={{ secrets.api_key }} for {{ check.id }}",
                &scope(),
            )
            .unwrap();
        assert_eq!(out, "Bearer abc123 key=s3cr3t for api-health");
    }

    #[test]
    fn empty_template_is_empty() {
        let engine = TemplateEngine::new();
        assert_eq!(engine.render("", &scope()).unwrap(), "");
    }

    #[test]
    fn missing_secret_renders_empty_not_panics() {
        let engine = TemplateEngine::new();
        let out = engine.render("x{{ secrets.nope }}y", &scope()).unwrap();
        assert_eq!(out, "xy");
    }

    #[test]
    fn render_map_applies_to_every_value() {
        let engine = TemplateEngine::new();
        let mut headers = HashMap::new();
        headers.insert("Authorization".to_string(), "Bearer {{ vars.token }}".to_string());
        headers.insert("Accept".to_string(), "application/json".to_string());
        let rendered = engine.render_map(&headers, &scope()).unwrap();
        assert_eq!(rendered["Authorization"], "Bearer abc123");
        assert_eq!(rendered["Accept"], "application/json");
    }

    #[test]
    fn to_json_filter_serializes_labels() {
        let engine = TemplateEngine::new();
        let out = engine.render("{{ labels | to_json }}", &scope()).unwrap();
        assert_eq!(out, r#"{"team":"platform"}"#);
    }
}
