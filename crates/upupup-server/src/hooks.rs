//! Hook invocation against persistent storage.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use upupup_common::HookConfig;
use upupup_storage::{HookExecution, Store};

const DEFAULT_MAX_DURATION: Duration = Duration::from_secs(24 * 3600);

#[derive(Debug, thiserror::Error)]
pub enum HookError {
    #[error("unknown hook {0:?}")]
    Unknown(String),

    #[error(transparent)]
    Storage(#[from] upupup_storage::StorageError),
}

/// Runtime overrides supplied with a hook request.
#[derive(Debug, Default)]
pub struct InvokeOptions {
    pub duration_override: Option<Duration>,
    pub until_first_success: Option<bool>,
    pub note: String,
    pub requested_by: String,
    pub requested_from_ip: String,
    pub additional_metadata: HashMap<String, String>,
}

pub struct HookManager {
    store: Arc<Store>,
    hooks_by_id: HashMap<String, HookConfig>,
}

impl HookManager {
    pub fn new(store: Arc<Store>, hooks: &[HookConfig]) -> Self {
        let hooks_by_id = hooks
            .iter()
            .map(|hook| (hook.id.clone(), hook.clone()))
            .collect();
        Self { store, hooks_by_id }
    }

    pub fn config(&self, hook_id: &str) -> Option<&HookConfig> {
        self.hooks_by_id.get(hook_id)
    }

    /// Persists one execution of the hook and returns the stored row. The
    /// insert is durably visible before the HTTP response goes out.
    pub fn invoke(&self, hook_id: &str, opts: InvokeOptions) -> Result<HookExecution, HookError> {
        let hook = self
            .hooks_by_id
            .get(hook_id)
            .ok_or_else(|| HookError::Unknown(hook_id.to_string()))?;
        let now = Utc::now();

        let duration = resolve_duration(hook, opts.duration_override);
        let active_until = (!duration.is_zero())
            .then(|| now + chrono::Duration::from_std(duration).unwrap_or_default());

        let mut until_first_success = hook.action.until_first_success;
        if let Some(requested) = opts.until_first_success {
            if hook.action.until_first_success && !requested {
                // Config requires the flag; the request cannot relax it.
            } else {
                until_first_success = requested;
            }
        }

        // Action parameters first, hook metadata without overriding, request
        // metadata with the highest precedence.
        let mut parameters = hook.action.parameters.clone();
        for (key, value) in &hook.metadata {
            parameters.entry(key.clone()).or_insert_with(|| value.clone());
        }
        for (key, value) in opts.additional_metadata {
            parameters.insert(key, value);
        }

        let mut exec = HookExecution {
            id: 0,
            hook_id: hook.id.clone(),
            kind: hook.action.kind.clone(),
            scope: hook.action.scope.clone(),
            target_ids: hook.action.target_ids.clone(),
            requested_by: opts.requested_by,
            requested_from_ip: opts.requested_from_ip,
            requested_at: now,
            active_until,
            until_first_success,
            parameters,
            note: opts.note,
            status: "active".to_string(),
        };
        exec.id = self.store.insert_hook_execution(&exec)?;
        Ok(exec)
    }

    /// Currently active executions, for health reporting.
    pub fn list_active(&self, now: DateTime<Utc>) -> Result<Vec<HookExecution>, HookError> {
        Ok(self.store.active_hook_executions(now)?)
    }
}

/// Config duration, overridden by the request, clamped to
/// `[0, max_duration]` where `max_duration` defaults to 24 hours.
fn resolve_duration(hook: &HookConfig, requested: Option<Duration>) -> Duration {
    let mut duration = hook
        .action
        .duration
        .map(|d| d.as_duration())
        .unwrap_or(Duration::ZERO);
    if let Some(requested) = requested {
        duration = requested;
    }
    let max_duration = hook
        .action
        .max_duration
        .map(|d| d.as_duration())
        .unwrap_or(DEFAULT_MAX_DURATION);
    if !max_duration.is_zero() && duration > max_duration {
        duration = max_duration;
    }
    duration
}

#[cfg(test)]
mod tests {
    use super::*;
    use upupup_common::Config;
    use upupup_storage::Options;

    const HOOK_CONFIG: &str = r#"
hooks:
  - id: pause-api
    description: Pause API alerts
    metadata:
      owner: platform-team
      env: prod
    action:
      kind: pause_notifications
      scope: check
      target_ids: [api-health]
      duration: 10m
      max_duration: 1h
      parameters:
        reason: maintenance
        env: action-env
  - id: pause-required
    action:
      kind: pause_notifications
      scope: global
      until_first_success: true
  - id: pause-unbounded-max
    action:
      kind: pause_notifications
      scope: global
"#;

    fn manager() -> (Arc<Store>, HookManager) {
        let config = Config::parse(HOOK_CONFIG).unwrap();
        let store = Arc::new(Store::open_in_memory(Options::default()).unwrap());
        let manager = HookManager::new(store.clone(), &config.hooks);
        (store, manager)
    }

    #[test]
    fn unknown_hook_is_rejected() {
        let (_store, manager) = manager();
        assert!(matches!(
            manager.invoke("nope", InvokeOptions::default()),
            Err(HookError::Unknown(_))
        ));
    }

    #[test]
    fn config_duration_applies_and_is_persisted() {
        let (store, manager) = manager();
        let exec = manager.invoke("pause-api", InvokeOptions::default()).unwrap();
        let until = exec.active_until.expect("bounded hook");
        let secs = (until - exec.requested_at).num_seconds();
        assert_eq!(secs, 600);

        let active = store.active_hook_executions(exec.requested_at).unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].hook_id, "pause-api");
    }

    #[test]
    fn override_duration_is_clamped_to_max() {
        let (_store, manager) = manager();
        let exec = manager
            .invoke(
                "pause-api",
                InvokeOptions {
                    duration_override: Some(Duration::from_secs(7200)),
                    ..InvokeOptions::default()
                },
            )
            .unwrap();
        let until = exec.active_until.expect("bounded hook");
        assert_eq!((until - exec.requested_at).num_seconds(), 3600);
    }

    #[test]
    fn zero_duration_leaves_hook_unbounded() {
        let (_store, manager) = manager();
        let exec = manager
            .invoke(
                "pause-required",
                InvokeOptions {
                    duration_override: Some(Duration::ZERO),
                    ..InvokeOptions::default()
                },
            )
            .unwrap();
        assert!(exec.active_until.is_none());
    }

    #[test]
    fn default_max_duration_is_24h() {
        let (_store, manager) = manager();
        let exec = manager
            .invoke(
                "pause-unbounded-max",
                InvokeOptions {
                    duration_override: Some(Duration::from_secs(48 * 3600)),
                    ..InvokeOptions::default()
                },
            )
            .unwrap();
        let until = exec.active_until.expect("bounded hook");
        assert_eq!((until - exec.requested_at).num_seconds(), 24 * 3600);
    }

    #[test]
    fn until_first_success_cannot_be_relaxed() {
        let (_store, manager) = manager();
        let exec = manager
            .invoke(
                "pause-required",
                InvokeOptions {
                    until_first_success: Some(false),
                    ..InvokeOptions::default()
                },
            )
            .unwrap();
        assert!(exec.until_first_success, "config requirement wins");

        let exec = manager
            .invoke(
                "pause-api",
                InvokeOptions {
                    until_first_success: Some(true),
                    ..InvokeOptions::default()
                },
            )
            .unwrap();
        assert!(exec.until_first_success, "requests may tighten the flag");
    }

    #[test]
    fn parameter_precedence() {
        let (_store, manager) = manager();
        let exec = manager
            .invoke(
                "pause-api",
                InvokeOptions {
                    additional_metadata: HashMap::from([(
                        "reason".to_string(),
                        "emergency".to_string(),
                    )]),
                    ..InvokeOptions::default()
                },
            )
            .unwrap();
        // request metadata beats action parameters; hook metadata never
        // overrides action parameters
        assert_eq!(exec.parameters.get("reason").map(String::as_str), Some("emergency"));
        assert_eq!(exec.parameters.get("env").map(String::as_str), Some("action-env"));
        assert_eq!(exec.parameters.get("owner").map(String::as_str), Some("platform-team"));
    }
}
