//! Worker-side view of operator hook executions.
//!
//! Active hooks are read through a 5-second TTL cache; resume hooks are
//! applied (completing overlapping pause hooks) when the cache materializes,
//! and every mutation invalidates the cache before the next observation.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use upupup_common::CheckConfig;
use upupup_storage::{HookExecution, Store};

const CACHE_TTL: Duration = Duration::from_secs(5);

const KIND_PAUSE: &str = "pause_notifications";
const KIND_RESUME: &str = "resume_notifications";

#[derive(Default)]
struct CacheState {
    entries: Vec<HookExecution>,
    expires: Option<Instant>,
}

pub struct HookCache {
    store: Arc<Store>,
    state: Mutex<CacheState>,
}

impl HookCache {
    pub fn new(store: Arc<Store>) -> Self {
        Self {
            store,
            state: Mutex::new(CacheState::default()),
        }
    }

    pub fn invalidate(&self) {
        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        state.entries.clear();
        state.expires = None;
    }

    fn fetch_active(&self, now: DateTime<Utc>) -> Vec<HookExecution> {
        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(expires) = state.expires {
            if Instant::now() < expires {
                return state.entries.clone();
            }
        }
        match self.store.active_hook_executions(now) {
            Ok(hooks) => {
                state.entries = hooks.clone();
                state.expires = Some(Instant::now() + CACHE_TTL);
                hooks
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to load active hooks");
                state.entries.clear();
                state.expires = Some(Instant::now() + CACHE_TTL);
                Vec::new()
            }
        }
    }

    /// Active pause hooks after resume hooks have been applied.
    pub fn active_pause_hooks(&self, now: DateTime<Utc>) -> Vec<HookExecution> {
        // One re-read after applying resumes is enough; the second pass sees
        // the post-resume state.
        for _ in 0..2 {
            let hooks = self.fetch_active(now);
            if hooks.is_empty() {
                return Vec::new();
            }
            let mut pause_hooks = Vec::new();
            let mut resume_hooks = Vec::new();
            for hook in hooks {
                match hook.kind.trim().to_ascii_lowercase().as_str() {
                    KIND_PAUSE => pause_hooks.push(hook),
                    KIND_RESUME => resume_hooks.push(hook),
                    _ => {}
                }
            }
            if self.apply_resume_hooks(&resume_hooks, &pause_hooks) {
                continue;
            }
            return pause_hooks;
        }
        self.fetch_active(now)
            .into_iter()
            .filter(|hook| hook.kind.trim().eq_ignore_ascii_case(KIND_PAUSE))
            .collect()
    }

    /// Pause hooks matching the given check.
    pub fn applicable_pause_hooks(
        &self,
        now: DateTime<Utc>,
        check: &CheckConfig,
    ) -> Vec<HookExecution> {
        self.active_pause_hooks(now)
            .into_iter()
            .filter(|hook| hook_matches_check(hook, check))
            .collect()
    }

    fn apply_resume_hooks(
        &self,
        resume_hooks: &[HookExecution],
        pause_hooks: &[HookExecution],
    ) -> bool {
        if resume_hooks.is_empty() {
            return false;
        }
        let mut completed_pause = std::collections::HashSet::new();
        let mut changed = false;

        for resume in resume_hooks {
            let mut matched = false;
            for pause in pause_hooks {
                if completed_pause.contains(&pause.id) || !hooks_overlap(resume, pause) {
                    continue;
                }
                matched = true;
                if let Err(e) = self.store.complete_hook_execution(pause.id) {
                    tracing::error!(
                        resume_hook_id = %resume.hook_id,
                        pause_hook_id = %pause.hook_id,
                        error = %e,
                        "failed to resume notifications"
                    );
                    continue;
                }
                completed_pause.insert(pause.id);
                changed = true;
                tracing::info!(
                    resume_hook_id = %resume.hook_id,
                    pause_hook_id = %pause.hook_id,
                    "resumed notifications via hook"
                );
            }
            match self.store.complete_hook_execution(resume.id) {
                Err(e) => {
                    tracing::error!(hook_id = %resume.hook_id, error = %e, "failed to mark resume hook completed");
                }
                Ok(()) => {
                    changed = true;
                    if !matched {
                        tracing::info!(hook_id = %resume.hook_id, "resume hook completed with no matching pause");
                    }
                }
            }
        }

        if changed {
            self.invalidate();
        }
        changed
    }

    /// Completes `until_first_success` check-scoped pause hooks after a
    /// recovery.
    pub fn complete_pause_hooks_for(&self, check: &CheckConfig, now: DateTime<Utc>) {
        let hooks = self.applicable_pause_hooks(now, check);
        if hooks.is_empty() {
            return;
        }
        let mut any_completed = false;
        for hook in hooks {
            if !hook.until_first_success {
                continue;
            }
            if !hook.scope.trim().eq_ignore_ascii_case("check") {
                continue;
            }
            if let Err(e) = self.store.complete_hook_execution(hook.id) {
                tracing::error!(hook_id = %hook.hook_id, error = %e, "failed to complete pause hook");
                continue;
            }
            any_completed = true;
            tracing::info!(
                hook_id = %hook.hook_id,
                check_id = %check.id,
                "completed pause hook after check recovery"
            );
        }
        if any_completed {
            self.invalidate();
        }
    }
}

/// Scope semantics: `global` matches any check, `check` matches on check id,
/// `route` matches on the check's notification route. `"*"` in the target
/// list matches any candidate; unknown scopes fall back to check-id matching.
pub fn hook_matches_check(hook: &HookExecution, check: &CheckConfig) -> bool {
    match hook.scope.trim().to_ascii_lowercase().as_str() {
        "global" => {
            hook.target_ids.is_empty()
                || target_matches(&hook.target_ids, "*")
                || target_matches(&hook.target_ids, &check.id)
        }
        "route" => target_matches(&hook.target_ids, &check.notifications.route),
        _ => target_matches(&hook.target_ids, &check.id),
    }
}

/// True when a resume hook reaches the pause hook: a wildcard on either
/// side, an empty global resume, a shared target, or overlapping scopes.
pub fn hooks_overlap(resume: &HookExecution, pause: &HookExecution) -> bool {
    if target_matches(&resume.target_ids, "*") || target_matches(&pause.target_ids, "*") {
        return true;
    }
    if resume.target_ids.is_empty() && resume.scope.trim().eq_ignore_ascii_case("global") {
        return true;
    }
    for target in &resume.target_ids {
        let id = target.trim();
        if !id.is_empty() && target_matches(&pause.target_ids, id) {
            return true;
        }
    }
    let resume_scope = resume.scope.trim().to_ascii_lowercase();
    let pause_scope = pause.scope.trim().to_ascii_lowercase();
    resume_scope == "global" || pause_scope == "global" || resume_scope == pause_scope
}

fn target_matches(targets: &[String], candidate: &str) -> bool {
    targets.iter().any(|target| {
        let target = target.trim();
        target == "*" || (!candidate.is_empty() && target == candidate)
    })
}
