use std::collections::HashMap;
use std::sync::Arc;

use upupup_common::{NotifierConfig, TemplateEngine};

use crate::{build, Factory, NotifyError};

fn factory(secrets: &[(&str, &str)]) -> Factory {
    let secrets: HashMap<String, String> = secrets
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    Factory {
        secrets: Arc::new(secrets),
        templates: Arc::new(TemplateEngine::new()),
    }
}

fn notifier(id: &str, kind: &str, config: &str) -> NotifierConfig {
    NotifierConfig {
        id: id.to_string(),
        kind: kind.to_string(),
        config: serde_yaml::from_str(config).unwrap(),
    }
}

#[test]
fn builds_every_supported_type() {
    let factory = factory(&[
        ("slack_hook", "https://hooks.slack.com/services/T/B/x"),
        ("discord_hook", "https://discord.com/api/webhooks/1/x"),
        ("tg_token", "123:abc"),
        ("smtp_pass", "hunter2"),
        ("twilio_token", "tok"),
    ]);
    let configs = vec![
        notifier("s", "slack", "webhook_url_ref: slack_hook\nchannel: '#ops'\n"),
        notifier("d", "discord", "webhook_url_ref: discord_hook\n"),
        notifier("t", "telegram", "bot_token_ref: tg_token\nchat_id: '42'\n"),
        notifier(
            "e",
            "email",
            "smtp_host: smtp.example.com\nsmtp_port: 587\nusername: mon\npassword_ref: smtp_pass\nfrom: mon@example.com\nto: [ops@example.com]\n",
        ),
        notifier("w", "webhook", "url: https://example.com/hook\ntemplate: '{{ summary }}'\n"),
        notifier(
            "sms",
            "sms",
            "provider: twilio\naccount_sid: AC123\nauth_token_ref: twilio_token\nfrom: '+1555000'\nto: ['+1555111']\n",
        ),
        notifier(
            "voice",
            "voice",
            "account_sid: AC123\nauth_token_ref: twilio_token\nfrom: '+1555000'\nto: ['+1555111']\n",
        ),
    ];
    let registry = build(&factory, &configs).unwrap();
    assert_eq!(registry.len(), 7);
    assert!(registry.get("s").is_some());
    assert!(registry.get("missing").is_none());
}

#[test]
fn vonage_provider_is_selected_by_tag() {
    let factory = factory(&[]);
    let configs = vec![notifier(
        "sms",
        "sms",
        "provider: vonage\napi_key: k\napi_secret: s\nfrom: upupup\nto: ['+41790000000']\n",
    )];
    let registry = build(&factory, &configs).unwrap();
    assert!(registry.get("sms").is_some());
}

#[test]
fn vonage_requires_credentials() {
    let factory = factory(&[]);
    let configs = vec![notifier(
        "sms",
        "sms",
        "provider: vonage\nfrom: upupup\nto: ['+41790000000']\n",
    )];
    let err = build(&factory, &configs).unwrap_err();
    assert!(matches!(err, NotifyError::InvalidConfig(_)));
}

#[test]
fn unknown_type_is_rejected() {
    let factory = factory(&[]);
    let configs = vec![notifier("x", "pager", "{}")];
    let err = build(&factory, &configs).unwrap_err();
    assert!(matches!(err, NotifyError::UnsupportedType(_)));
}

#[test]
fn unknown_sms_provider_is_rejected() {
    let factory = factory(&[]);
    let configs = vec![notifier("x", "sms", "provider: smoke-signals\n")];
    let err = build(&factory, &configs).unwrap_err();
    assert!(matches!(err, NotifyError::InvalidConfig(_)));
}

#[test]
fn duplicate_ids_are_rejected() {
    let factory = factory(&[("slack_hook", "https://hooks.slack.com/x")]);
    let configs = vec![
        notifier("same", "slack", "webhook_url_ref: slack_hook\n"),
        notifier("same", "slack", "webhook_url_ref: slack_hook\n"),
    ];
    let err = build(&factory, &configs).unwrap_err();
    assert!(matches!(err, NotifyError::Duplicate(_)));
}

#[test]
fn missing_secret_reference_fails_at_build_time() {
    let factory = factory(&[]);
    let configs = vec![notifier("s", "slack", "webhook_url_ref: nope\n")];
    let err = build(&factory, &configs).unwrap_err();
    assert!(matches!(err, NotifyError::MissingSecret(_)));
}
