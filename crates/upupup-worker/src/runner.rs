//! Check scheduler and notification escalation engine.
//!
//! One task per check runs its own periodic loop; results feed a per-check
//! state machine that tracks the failure history, drives escalation stages
//! and honours operator pause hooks read through the cached store view.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use tokio::sync::watch;
use tokio::task::JoinSet;
use upupup_checks::{summarize, CheckResult, Environment};
use upupup_common::{CheckConfig, Config, NotificationPolicy, ServiceDefaults, TemplateEngine};
use upupup_notify::{Event, Registry};
use upupup_storage::{CheckRun, NotificationLog, Store};

use crate::hooks::HookCache;
use crate::maintenance::{parse_windows, MaintenanceWindow};

const DEFAULT_HISTORY_WINDOW: usize = 10;

pub struct Runner {
    checks: Vec<CheckConfig>,
    defaults: ServiceDefaults,
    policies: HashMap<String, NotificationPolicy>,
    notifiers: Arc<Registry>,
    env: Environment,
    store: Arc<Store>,
    tz: Tz,
    state: Mutex<HashMap<String, CheckState>>,
    hooks: HookCache,
    maintenance: Vec<MaintenanceWindow>,
}

#[derive(Default)]
struct CheckState {
    history: Vec<bool>,
    failing: bool,
    first_failure_at: DateTime<Utc>,
    stage_state: HashMap<usize, StageState>,
    initial_notified: bool,
}

#[derive(Debug, Default, Clone, Copy)]
struct StageState {
    sent: bool,
    last_sent: Option<DateTime<Utc>>,
}

impl Runner {
    pub fn new(
        config: &Config,
        secrets: Arc<HashMap<String, String>>,
        notifiers: Arc<Registry>,
        templates: Arc<TemplateEngine>,
        store: Arc<Store>,
        tz: Tz,
    ) -> anyhow::Result<Self> {
        let policies: HashMap<String, NotificationPolicy> = config
            .notification_policies
            .iter()
            .map(|policy| (policy.id.clone(), policy.clone()))
            .collect();
        let maintenance = parse_windows(
            &config.service.defaults.maintenance_windows,
            tz,
            config.service.defaults.interval.0,
        )?;
        let env = Environment {
            defaults: config.service.defaults.clone(),
            secrets,
            templates,
            store: Some(store.clone()),
        };
        Ok(Self {
            checks: config.checks.clone(),
            defaults: config.service.defaults.clone(),
            policies,
            notifiers,
            env,
            store: store.clone(),
            tz,
            state: Mutex::new(HashMap::new()),
            hooks: HookCache::new(store),
            maintenance,
        })
    }

    /// Launches one loop per check and waits for all of them to stop.
    pub async fn run(self: Arc<Self>, shutdown: watch::Receiver<bool>) {
        let mut tasks = JoinSet::new();
        for check in self.checks.clone() {
            let runner = Arc::clone(&self);
            let shutdown = shutdown.clone();
            tasks.spawn(async move { runner.run_check_loop(check, shutdown).await });
        }
        while tasks.join_next().await.is_some() {}
    }

    async fn run_check_loop(&self, check: CheckConfig, mut shutdown: watch::Receiver<bool>) {
        let interval = check.effective_interval(&self.defaults);
        let mut tick = tokio::time::interval(interval);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tracing::info!(check_id = %check.id, interval = ?interval, "starting check loop");

        loop {
            if *shutdown.borrow() {
                tracing::info!(check_id = %check.id, "stopping check loop");
                return;
            }
            tokio::select! {
                _ = shutdown.changed() => continue,
                _ = tick.tick() => {}
            }
            self.execute_check(&check, &mut shutdown).await;
        }
    }

    async fn execute_check(&self, check: &CheckConfig, shutdown: &mut watch::Receiver<bool>) {
        let local_now = Utc::now().with_timezone(&self.tz);
        if self.in_maintenance(local_now) {
            tracing::info!(check_id = %check.id, "skipping check due to maintenance window");
            return;
        }

        let retries = check.effective_retries(&self.defaults);
        let backoff = check.effective_backoff(&self.defaults);

        let mut attempt = 0u32;
        let result = loop {
            let outcome = tokio::select! {
                outcome = upupup_checks::execute(check, &self.env) => outcome,
                _ = shutdown.changed() => {
                    tracing::warn!(check_id = %check.id, "shutdown during check execution");
                    return;
                }
            };
            if outcome.success || attempt >= retries {
                break outcome;
            }
            tracing::warn!(
                check_id = %check.id,
                attempt = attempt + 1,
                error = %summarize(&outcome),
                "check attempt failed, retrying"
            );
            if !backoff.is_zero() {
                tokio::select! {
                    _ = tokio::time::sleep(backoff) => {}
                    _ = shutdown.changed() => {
                        tracing::warn!(check_id = %check.id, "shutdown during retry backoff");
                        return;
                    }
                }
            }
            attempt += 1;
        };

        self.log_run(check, &result);
        self.persist_run(check, &result);
        self.handle_result(check, &result, Utc::now());
    }

    fn in_maintenance(&self, now: DateTime<Tz>) -> bool {
        self.maintenance.iter().any(|window| window.contains(now))
    }

    /// Feeds one result into the outcome state machine.
    fn handle_result(&self, check: &CheckConfig, result: &CheckResult, now: DateTime<Utc>) {
        let mut states = self.state.lock().unwrap_or_else(|p| p.into_inner());
        let state = states.entry(check.id.clone()).or_default();

        state.history.push(!result.success);
        let max = window_size(check);
        if state.history.len() > max {
            let excess = state.history.len() - max;
            state.history.drain(..excess);
        }

        let prev_failing = state.failing;
        let now_failing = threshold_breached(check, &state.history);

        if now_failing {
            if !prev_failing {
                state.failing = true;
                state.first_failure_at = now;
                state.stage_state.clear();
                state.initial_notified = false;
                tracing::error!(
                    check_id = %check.id,
                    summary = %summarize(result),
                    "check entered failing state"
                );
            }
            self.send_initial_notifications(check, state, result, now);
            self.send_escalations(check, state, result, now);
        } else if prev_failing {
            state.failing = false;
            self.hooks.complete_pause_hooks_for(check, now);
            tracing::info!(check_id = %check.id, "check recovered");
            self.send_resolve_notifications(check, state, result, now);
        }
    }

    fn send_initial_notifications(
        &self,
        check: &CheckConfig,
        state: &mut CheckState,
        result: &CheckResult,
        now: DateTime<Utc>,
    ) {
        let Some(overrides) = check.notifications.overrides.as_ref() else {
            return;
        };
        if overrides.initial_notifiers.is_empty() || state.initial_notified {
            return;
        }
        let paused = self.hooks.applicable_pause_hooks(now, check);
        if !paused.is_empty() {
            tracing::info!(
                check_id = %check.id,
                hooks = ?hook_ids(&paused),
                "skipping initial notifications due to active pause hook"
            );
            return;
        }
        let event = self.build_event(check, state, result, "firing");
        self.dispatch(&overrides.initial_notifiers, &event);
        state.initial_notified = true;
    }

    fn send_escalations(
        &self,
        check: &CheckConfig,
        state: &mut CheckState,
        result: &CheckResult,
        now: DateTime<Utc>,
    ) {
        let Some(policy) = self.policies.get(&check.notifications.route) else {
            tracing::error!(route = %check.notifications.route, "missing notification policy");
            return;
        };
        let paused = self.hooks.applicable_pause_hooks(now, check);
        if !paused.is_empty() {
            tracing::info!(
                check_id = %check.id,
                hooks = ?hook_ids(&paused),
                "skipping escalation notifications due to active pause hook"
            );
            return;
        }

        let event = self.build_event(check, state, result, "firing");
        for (idx, stage) in policy.stages.iter().enumerate() {
            let elapsed = now.signed_duration_since(state.first_failure_at);
            let after = chrono::Duration::from_std(stage.after.0).unwrap_or_default();
            if elapsed < after {
                continue;
            }

            let stage_state = state.stage_state.entry(idx).or_default();
            let every = stage.every.map(|d| d.0).unwrap_or(Duration::ZERO);

            if !every.is_zero() {
                let due = match stage_state.last_sent {
                    None => true,
                    Some(last_sent) => {
                        now.signed_duration_since(last_sent)
                            >= chrono::Duration::from_std(every).unwrap_or_default()
                    }
                };
                if due {
                    self.dispatch(&stage.notifiers, &event);
                    stage_state.sent = true;
                    stage_state.last_sent = Some(now);
                }
            } else {
                if stage.every.is_some() && stage_state.last_sent.is_none() {
                    tracing::warn!(
                        route = %policy.id,
                        stage_index = idx,
                        "ignoring non-positive escalation frequency"
                    );
                }
                if stage_state.sent {
                    continue;
                }
                self.dispatch(&stage.notifiers, &event);
                stage_state.sent = true;
                stage_state.last_sent = Some(now);
            }
        }
    }

    fn send_resolve_notifications(
        &self,
        check: &CheckConfig,
        state: &CheckState,
        result: &CheckResult,
        now: DateTime<Utc>,
    ) {
        let Some(policy) = self.policies.get(&check.notifications.route) else {
            return;
        };
        let paused = self.hooks.applicable_pause_hooks(now, check);
        if !paused.is_empty() {
            tracing::info!(
                check_id = %check.id,
                hooks = ?hook_ids(&paused),
                "skipping resolve notifications due to active pause hook"
            );
            return;
        }
        let event = self.build_event(check, state, result, "resolved");
        self.dispatch(&policy.resolve_notifiers, &event);
    }

    fn build_event(
        &self,
        check: &CheckConfig,
        state: &CheckState,
        result: &CheckResult,
        status: &str,
    ) -> Event {
        let now = Utc::now();
        let first_failure_at = (state.first_failure_at.timestamp_millis() != 0)
            .then_some(state.first_failure_at);
        Event {
            check_id: check.id.clone(),
            check_name: check.name.clone(),
            check_target: check.target.clone(),
            status: status.to_string(),
            severity: "critical".to_string(),
            summary: summarize(result),
            labels: check.labels.clone(),
            run_id: format!("{}-{}", check.id, now.timestamp_nanos_opt().unwrap_or_default()),
            first_failure_at,
            occurred_at: now,
        }
    }

    /// Records the audit row synchronously, then fires the transport without
    /// waiting for it.
    fn dispatch(&self, ids: &[String], event: &Event) {
        for id in ids {
            let Some(notifier) = self.notifiers.get(id) else {
                tracing::error!(notifier_id = %id, "notifier not found");
                continue;
            };
            self.record_notification(id, event);
            let event = event.clone();
            tokio::spawn(async move {
                if let Err(e) = notifier.notify(&event).await {
                    tracing::error!(notifier_id = %notifier.id(), error = %e, "notifier error");
                }
            });
        }
    }

    fn record_notification(&self, notifier_id: &str, event: &Event) {
        let log = NotificationLog {
            notifier_id: notifier_id.to_string(),
            check_id: event.check_id.clone(),
            check_name: event.check_name.clone(),
            run_id: event.run_id.clone(),
            status: event.status.clone(),
            severity: event.severity.clone(),
            summary: event.summary.clone(),
            labels: event.labels.clone(),
            occurred_at: event.occurred_at,
        };
        if let Err(e) = self.store.record_notification(&log) {
            tracing::error!(
                notifier_id,
                check_id = %event.check_id,
                error = %e,
                "failed to record notification"
            );
        }
    }

    fn persist_run(&self, check: &CheckConfig, result: &CheckResult) {
        let latency = if result.latency.is_zero() {
            (result.completed_at - result.started_at)
                .to_std()
                .unwrap_or(Duration::ZERO)
        } else {
            result.latency
        };
        let run = CheckRun {
            check_id: check.id.clone(),
            check_name: check.name.clone(),
            success: result.success,
            summary: summarize(result),
            error: result.error.clone().unwrap_or_default(),
            latency,
            occurred_at: result.completed_at,
        };
        if let Err(e) = self.store.record_check_run(&run) {
            tracing::error!(check_id = %check.id, error = %e, "failed to record check state");
        }
    }

    fn log_run(&self, check: &CheckConfig, result: &CheckResult) {
        if !check.should_log_runs(&self.defaults) {
            return;
        }
        let failed_assertions = result
            .assertion_results
            .iter()
            .filter(|a| !a.passed)
            .count();
        tracing::info!(
            check_id = %check.id,
            success = result.success,
            latency = ?result.latency,
            error = result.error.as_deref().unwrap_or(""),
            failed_assertions,
            "check run"
        );
    }
}

fn window_size(check: &CheckConfig) -> usize {
    match check.thresholds.failure_ratio {
        Some(ratio) if ratio.window > 0 => ratio.window,
        _ => DEFAULT_HISTORY_WINDOW,
    }
}

/// Sliding-window failure-ratio threshold. Without a configured ratio the
/// latest outcome decides.
fn threshold_breached(check: &CheckConfig, history: &[bool]) -> bool {
    if history.is_empty() {
        return false;
    }
    match check.thresholds.failure_ratio {
        None => *history.last().unwrap_or(&false),
        Some(ratio) => {
            let mut window = ratio.window;
            if window == 0 || window > history.len() {
                window = history.len();
            }
            let failures = history[history.len() - window..]
                .iter()
                .filter(|failed| **failed)
                .count();
            failures >= ratio.fail_count
        }
    }
}

fn hook_ids(hooks: &[upupup_storage::HookExecution]) -> Vec<String> {
    hooks.iter().map(|hook| hook.hook_id.clone()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use upupup_storage::{HookExecution, Options};

    const TEST_CONFIG: &str = r#"
service:
  defaults:
    interval: 30s
    timeout: 2s
notifiers:
  - id: pager-a
    type: webhook
    config:
      url: http://127.0.0.1:9/pager-a
      template: "{{ summary }}"
  - id: pager-b
    type: webhook
    config:
      url: http://127.0.0.1:9/pager-b
      template: "{{ summary }}"
  - id: pager-initial
    type: webhook
    config:
      url: http://127.0.0.1:9/pager-initial
      template: "{{ summary }}"
notification_policies:
  - id: default
    stages:
      - after: 0s
        notifiers: [pager-a]
      - after: 5m
        notifiers: [pager-b]
    resolve_notifiers: [pager-a]
  - id: repeating
    stages:
      - after: 0s
        every: 1m
        notifiers: [pager-a]
checks:
  - id: api-health
    name: API health
    type: http
    target: http://127.0.0.1:9/health
    thresholds:
      failure_ratio:
        window: 3
        fail_count: 2
    notifications:
      route: default
      overrides:
        initial_notifiers: [pager-initial]
  - id: worker-queue
    name: Worker queue
    type: http
    target: http://127.0.0.1:9/queue
    notifications:
      route: repeating
"#;

    fn build_runner() -> (Arc<Store>, Runner) {
        let config = Config::parse(TEST_CONFIG).unwrap();
        let secrets = Arc::new(HashMap::new());
        let templates = Arc::new(TemplateEngine::new());
        let factory = upupup_notify::Factory {
            secrets: secrets.clone(),
            templates: templates.clone(),
        };
        let registry = Arc::new(upupup_notify::build(&factory, &config.notifiers).unwrap());
        let store = Arc::new(Store::open_in_memory(Options::default()).unwrap());
        let runner = Runner::new(
            &config,
            secrets,
            registry,
            templates,
            store.clone(),
            chrono_tz::Tz::UTC,
        )
        .unwrap();
        (store, runner)
    }

    fn check(runner: &Runner, id: &str) -> CheckConfig {
        runner.checks.iter().find(|c| c.id == id).unwrap().clone()
    }

    fn result(check: &CheckConfig, success: bool) -> CheckResult {
        CheckResult {
            check_id: check.id.clone(),
            check_name: check.name.clone(),
            started_at: Utc::now(),
            completed_at: Utc::now(),
            latency: Duration::from_millis(5),
            success,
            error: (!success).then(|| "connection refused".to_string()),
            assertion_results: Vec::new(),
            metadata: HashMap::new(),
        }
    }

    fn dispatched(store: &Store) -> Vec<(String, String)> {
        let mut rows: Vec<(String, String)> = store
            .recent_notification_logs(100)
            .unwrap()
            .into_iter()
            .map(|log| (log.notifier_id, log.status))
            .collect();
        rows.reverse(); // oldest first
        rows
    }

    #[test]
    fn threshold_uses_latest_outcome_without_ratio() {
        let (_store, runner) = build_runner();
        let c = check(&runner, "worker-queue");
        assert!(!threshold_breached(&c, &[]));
        assert!(threshold_breached(&c, &[true]));
        assert!(!threshold_breached(&c, &[true, false]));
    }

    #[test]
    fn threshold_counts_failures_in_window() {
        let (_store, runner) = build_runner();
        let c = check(&runner, "api-health"); // window 3, fail_count 2
        assert!(!threshold_breached(&c, &[true]));
        assert!(!threshold_breached(&c, &[true, false]));
        assert!(threshold_breached(&c, &[true, false, true]));
        assert!(threshold_breached(&c, &[false, true, false, true, true]));
        assert!(!threshold_breached(&c, &[true, true, false, false, false]));
    }

    #[test]
    fn history_is_bounded_by_window_size() {
        let (_store, runner) = build_runner();
        let c = check(&runner, "api-health");
        for _ in 0..20 {
            runner.handle_result(&c, &result(&c, true), Utc::now());
        }
        let states = runner.state.lock().unwrap();
        assert_eq!(states[&c.id].history.len(), 3);
    }

    #[tokio::test]
    async fn failing_threshold_dispatches_first_stage_and_initial() {
        let (store, runner) = build_runner();
        let c = check(&runner, "api-health");
        let now = Utc::now();

        runner.handle_result(&c, &result(&c, false), now);
        assert!(dispatched(&store).is_empty(), "one failure of three is healthy");

        runner.handle_result(&c, &result(&c, true), now);
        runner.handle_result(&c, &result(&c, false), now);

        let rows = dispatched(&store);
        assert_eq!(rows.len(), 2);
        assert!(rows.contains(&("pager-initial".to_string(), "firing".to_string())));
        assert!(rows.contains(&("pager-a".to_string(), "firing".to_string())));
    }

    #[tokio::test]
    async fn initial_notifiers_fire_once_per_episode() {
        let (store, runner) = build_runner();
        let c = check(&runner, "api-health");
        let now = Utc::now();

        runner.handle_result(&c, &result(&c, false), now);
        runner.handle_result(&c, &result(&c, false), now);
        runner.handle_result(&c, &result(&c, false), now);
        let initial_count = dispatched(&store)
            .iter()
            .filter(|(id, _)| id == "pager-initial")
            .count();
        assert_eq!(initial_count, 1);
    }

    #[tokio::test]
    async fn second_stage_waits_for_after_delay() {
        let (store, runner) = build_runner();
        let c = check(&runner, "api-health");
        let now = Utc::now();

        runner.handle_result(&c, &result(&c, false), now);
        runner.handle_result(&c, &result(&c, false), now);
        assert!(!dispatched(&store).iter().any(|(id, _)| id == "pager-b"));

        // next result arrives six minutes into the episode
        runner.handle_result(&c, &result(&c, false), now + ChronoDuration::minutes(6));
        let b_count = dispatched(&store).iter().filter(|(id, _)| id == "pager-b").count();
        assert_eq!(b_count, 1);

        // one-shot: later results do not re-dispatch stage two
        runner.handle_result(&c, &result(&c, false), now + ChronoDuration::minutes(7));
        let b_count = dispatched(&store).iter().filter(|(id, _)| id == "pager-b").count();
        assert_eq!(b_count, 1);
    }

    #[tokio::test]
    async fn repeating_stage_respects_every() {
        let (store, runner) = build_runner();
        let c = check(&runner, "worker-queue");
        let now = Utc::now();

        runner.handle_result(&c, &result(&c, false), now);
        assert_eq!(dispatched(&store).len(), 1);

        // thirty seconds later: not due yet
        runner.handle_result(&c, &result(&c, false), now + ChronoDuration::seconds(30));
        assert_eq!(dispatched(&store).len(), 1);

        // ninety seconds later: due again
        runner.handle_result(&c, &result(&c, false), now + ChronoDuration::seconds(90));
        assert_eq!(dispatched(&store).len(), 2);
    }

    #[tokio::test]
    async fn recovery_dispatches_resolve_and_resets_episode() {
        let (store, runner) = build_runner();
        let c = check(&runner, "worker-queue");
        let now = Utc::now();

        runner.handle_result(&c, &result(&c, false), now);
        runner.handle_result(&c, &result(&c, true), now + ChronoDuration::seconds(30));

        let rows = dispatched(&store);
        assert_eq!(rows.iter().filter(|(_, status)| status == "resolved").count(), 1);

        // a fresh failure starts a new episode and fires stage one again
        runner.handle_result(&c, &result(&c, false), now + ChronoDuration::seconds(60));
        let rows = dispatched(&store);
        assert_eq!(rows.iter().filter(|(_, status)| status == "firing").count(), 2);
    }

    #[tokio::test]
    async fn active_pause_hook_suppresses_dispatches() {
        let (store, runner) = build_runner();
        let c = check(&runner, "api-health");
        let now = Utc::now();

        store
            .insert_hook_execution(&HookExecution {
                hook_id: "pause-api".into(),
                kind: "pause_notifications".into(),
                scope: "check".into(),
                target_ids: vec!["api-health".into()],
                requested_at: now,
                active_until: Some(now + ChronoDuration::minutes(10)),
                status: "active".into(),
                ..HookExecution::default()
            })
            .unwrap();

        runner.handle_result(&c, &result(&c, false), now);
        runner.handle_result(&c, &result(&c, false), now);
        assert!(dispatched(&store).is_empty(), "pause hook must suppress dispatches");

        // lift the pause; the next failing tick dispatches
        let active = store.active_hook_executions(now).unwrap();
        store.complete_hook_execution(active[0].id).unwrap();
        runner.hooks.invalidate();

        runner.handle_result(&c, &result(&c, false), now + ChronoDuration::minutes(1));
        assert!(!dispatched(&store).is_empty());
    }

    #[tokio::test]
    async fn resume_hook_completes_matching_pause() {
        let (store, runner) = build_runner();
        let c = check(&runner, "api-health");
        let now = Utc::now();

        let pause_id = store
            .insert_hook_execution(&HookExecution {
                hook_id: "pause-api".into(),
                kind: "pause_notifications".into(),
                scope: "check".into(),
                target_ids: vec!["api-health".into()],
                requested_at: now,
                status: "active".into(),
                ..HookExecution::default()
            })
            .unwrap();
        let resume_id = store
            .insert_hook_execution(&HookExecution {
                hook_id: "resume-api".into(),
                kind: "resume_notifications".into(),
                scope: "check".into(),
                target_ids: vec!["api-health".into()],
                requested_at: now,
                status: "active".into(),
                ..HookExecution::default()
            })
            .unwrap();

        runner.handle_result(&c, &result(&c, false), now);
        runner.handle_result(&c, &result(&c, false), now);

        assert_eq!(store.hook_execution_status(pause_id).unwrap().as_deref(), Some("completed"));
        assert_eq!(store.hook_execution_status(resume_id).unwrap().as_deref(), Some("completed"));
        assert!(!dispatched(&store).is_empty(), "suppression lifts once the resume applies");
    }

    #[tokio::test]
    async fn until_first_success_pause_completes_on_recovery() {
        let (store, runner) = build_runner();
        let c = check(&runner, "worker-queue");
        let now = Utc::now();

        let pause_id = store
            .insert_hook_execution(&HookExecution {
                hook_id: "pause-queue".into(),
                kind: "pause_notifications".into(),
                scope: "check".into(),
                target_ids: vec!["worker-queue".into()],
                until_first_success: true,
                requested_at: now,
                status: "active".into(),
                ..HookExecution::default()
            })
            .unwrap();

        runner.handle_result(&c, &result(&c, false), now);
        assert!(dispatched(&store).is_empty());

        runner.handle_result(&c, &result(&c, true), now + ChronoDuration::seconds(30));
        assert_eq!(store.hook_execution_status(pause_id).unwrap().as_deref(), Some("completed"));
    }
}
