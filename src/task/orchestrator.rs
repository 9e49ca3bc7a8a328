//! Task orchestration: the state machine that ramps viewer fleets up,
//! holds them inside the configured band, and survives pause, resume,
//! cancel and per-viewer failure.
//!
//! Each running task owns a cancellation token, a per-task lock that
//! serializes state transitions, and atomic viewer counters. Viewer
//! loops are independent tokio tasks; one viewer exhausting its retries
//! drops that viewer, never the task.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use chrono::Duration as ChronoDuration;
use dashmap::DashMap;
use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::errors::CoreError;
use crate::models::{Account, ProxyServer, TaskStatus, ViewTask};
use crate::session::SessionPool;
use crate::stats::TaskCounters;
use crate::storage::{self, Storage};
use crate::task::plan::{self, Clock};

/// Orchestrator tuning. Band percentages and ramp rates are
/// configuration, not contract.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrchestratorConfig {
    pub band_low: f64,
    pub band_high: f64,
    pub auth_ratio_min: f64,
    pub auth_ratio_max: f64,
    /// Largest fraction of `max_viewers` one adjustment pass may move.
    pub max_adjust_fraction: f64,
    /// Ramp tick period (one "minute" of ramp-up).
    pub ramp_tick_ms: u64,
    pub monitor_interval_ms: u64,
    pub viewer_retry_limit: u32,
    pub retry_backoff_ms: u64,
    pub ambient_min_delay_ms: u64,
    pub ambient_max_delay_ms: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            band_low: 0.70,
            band_high: 1.15,
            auth_ratio_min: 0.60,
            auth_ratio_max: 0.80,
            max_adjust_fraction: 0.10,
            ramp_tick_ms: 60_000,
            monitor_interval_ms: 60_000,
            viewer_retry_limit: 3,
            retry_backoff_ms: 2_000,
            ambient_min_delay_ms: 30_000,
            ambient_max_delay_ms: 90_000,
        }
    }
}

/// Submission request.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTask {
    pub channel_url: String,
    pub max_viewers: u32,
    pub ramp_up_minutes: u32,
    pub duration_secs: u64,
}

/// In-memory runtime for one live task.
struct TaskRuntime {
    cancel: CancellationToken,
    counters: Arc<TaskCounters>,
    /// One child token per viewer loop, so adjustment passes can stop
    /// individual viewers.
    viewer_tokens: parking_lot::Mutex<Vec<(Uuid, CancellationToken)>>,
    /// Serializes state transitions for this task.
    lock: tokio::sync::Mutex<()>,
}

impl TaskRuntime {
    fn new() -> Self {
        Self {
            cancel: CancellationToken::new(),
            counters: Arc::new(TaskCounters::new()),
            viewer_tokens: parking_lot::Mutex::new(Vec::new()),
            lock: tokio::sync::Mutex::new(()),
        }
    }
}

pub struct TaskOrchestrator {
    storage: Arc<dyn Storage>,
    pool: Arc<SessionPool>,
    liveness: Arc<dyn crate::session::LivenessProbe>,
    clock: Arc<dyn Clock>,
    config: OrchestratorConfig,
    runtimes: DashMap<Uuid, Arc<TaskRuntime>>,
}

impl TaskOrchestrator {
    pub fn new(
        storage: Arc<dyn Storage>,
        pool: Arc<SessionPool>,
        liveness: Arc<dyn crate::session::LivenessProbe>,
        clock: Arc<dyn Clock>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            storage,
            pool,
            liveness,
            clock,
            config,
            runtimes: DashMap::new(),
        }
    }

    /// Persist a new task as Pending with a randomized auth/guest split.
    pub async fn submit(&self, new: NewTask) -> Result<ViewTask, CoreError> {
        let ratio = {
            let mut rng = rand::thread_rng();
            rng.gen_range(self.config.auth_ratio_min..=self.config.auth_ratio_max)
        };
        let (auth, guest) = plan::split_viewers(new.max_viewers, ratio);
        let now = self.clock.now();

        let task = ViewTask {
            id: Uuid::new_v4(),
            channel_url: new.channel_url,
            max_viewers: new.max_viewers,
            current_viewers: 0,
            auth_viewers: auth,
            guest_viewers: guest,
            ramp_up_minutes: new.ramp_up_minutes,
            duration_secs: new.duration_secs,
            status: TaskStatus::Pending,
            start_time: None,
            end_time: None,
            completed_time: None,
            elapsed_secs: 0,
            last_updated: now,
            error_message: None,
        };

        self.storage.insert_task(task.clone()).await?;
        info!(
            "Task {} submitted: {} viewers ({} auth / {} guest) on {}",
            task.id, task.max_viewers, auth, guest, task.channel_name(),
        );
        Ok(task)
    }

    pub async fn list(&self, filter: Option<TaskStatus>) -> Result<Vec<ViewTask>, CoreError> {
        let mut tasks = self.storage.load_tasks().await?;
        if let Some(status) = filter {
            tasks.retain(|t| t.status == status);
        }
        Ok(tasks)
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<ViewTask>, CoreError> {
        self.storage.get_task(id).await
    }

    /// Active viewer count as the runtime sees it (0 when not running).
    pub fn active_viewers(&self, id: Uuid) -> i64 {
        self.runtimes
            .get(&id)
            .map(|rt| rt.counters.active())
            .unwrap_or(0)
    }

    /// Start a Pending task. The liveness precondition is retryable: an
    /// offline channel leaves the task Pending for the next scheduler
    /// pass. Starting a task in any other state is a no-op.
    pub async fn start(self: &Arc<Self>, id: Uuid) -> Result<(), CoreError> {
        let Some(task) = self.storage.get_task(id).await? else {
            return Err(CoreError::Storage(format!("unknown task {id}")));
        };
        if task.status != TaskStatus::Pending {
            return Ok(());
        }

        if !self.liveness.is_live(&task.channel_url).await? {
            debug!(
                "Channel {} not live, task {} stays pending",
                task.channel_name(),
                id
            );
            return Ok(());
        }

        let fresh = Arc::new(TaskRuntime::new());
        let runtime = self
            .runtimes
            .entry(id)
            .or_insert_with(|| fresh.clone())
            .clone();
        if !Arc::ptr_eq(&runtime, &fresh) {
            // Lost the race with a concurrent start
            return Ok(());
        }

        let _guard = runtime.lock.lock().await;
        let Some(mut task) = self.storage.get_task(id).await? else {
            self.runtimes.remove(&id);
            return Err(CoreError::Storage(format!("unknown task {id}")));
        };
        if task.status != TaskStatus::Pending {
            self.runtimes.remove(&id);
            return Ok(());
        }

        let now = self.clock.now();
        task.status = TaskStatus::Running;
        task.start_time = Some(now);
        task.end_time = Some(now + task.duration());
        task.current_viewers = 0;
        task.elapsed_secs = 0;
        task.error_message = None;
        task.last_updated = now;
        self.storage.update_task(&task).await?;

        info!(
            "Task {} started: ramping to {} viewers over {} min on {}",
            id, task.max_viewers, task.ramp_up_minutes, task.channel_name(),
        );

        let this = self.clone();
        let rt = runtime.clone();
        tokio::spawn(async move {
            this.run_task(task, rt, true).await;
        });
        Ok(())
    }

    /// Pause a Running task, banking its elapsed run time. No-op on any
    /// other state.
    pub async fn pause(&self, id: Uuid) -> Result<(), CoreError> {
        let runtime = self.runtimes.get(&id).map(|r| r.clone());
        let _guard = match &runtime {
            Some(rt) => Some(rt.lock.lock().await),
            None => None,
        };

        let Some(mut task) = self.storage.get_task(id).await? else {
            return Err(CoreError::Storage(format!("unknown task {id}")));
        };
        if task.status != TaskStatus::Running {
            return Ok(());
        }

        let now = self.clock.now();
        apply_pause(&mut task, now);
        self.storage.update_task(&task).await?;
        info!("Task {} paused ({}s elapsed)", id, task.elapsed_secs);
        Ok(())
    }

    /// Resume a Paused task, rebasing its start time so total run time
    /// is preserved. No-op on any other state.
    pub async fn resume(self: &Arc<Self>, id: Uuid) -> Result<(), CoreError> {
        if let Some(rt) = self.runtimes.get(&id).map(|r| r.clone()) {
            // Live runtime: the monitor loop picks the transition up.
            let _guard = rt.lock.lock().await;
            let Some(mut task) = self.storage.get_task(id).await? else {
                return Err(CoreError::Storage(format!("unknown task {id}")));
            };
            if task.status != TaskStatus::Paused {
                return Ok(());
            }
            apply_resume(&mut task, self.clock.now());
            self.storage.update_task(&task).await?;
            info!("Task {} resumed", id);
            return Ok(());
        }

        // Paused across a restart: no live runtime. The map entry
        // arbitrates concurrent resumes so exactly one spins up the
        // fresh monitor loop; its adjustment passes rebuild the fleet.
        let fresh = Arc::new(TaskRuntime::new());
        let runtime = self
            .runtimes
            .entry(id)
            .or_insert_with(|| fresh.clone())
            .clone();
        if !Arc::ptr_eq(&runtime, &fresh) {
            // Lost the race with a concurrent resume or start
            return Ok(());
        }

        let _guard = runtime.lock.lock().await;
        let Some(mut task) = self.storage.get_task(id).await? else {
            self.runtimes.remove(&id);
            return Err(CoreError::Storage(format!("unknown task {id}")));
        };
        if task.status != TaskStatus::Paused {
            self.runtimes.remove(&id);
            return Ok(());
        }

        apply_resume(&mut task, self.clock.now());
        self.storage.update_task(&task).await?;
        info!("Task {} resumed", id);

        let this = self.clone();
        let rt = runtime.clone();
        tokio::spawn(async move {
            this.run_task(task, rt, false).await;
        });
        Ok(())
    }

    /// Cancel a task. Idempotent: canceling a terminal task is a no-op.
    pub async fn cancel(&self, id: Uuid) -> Result<(), CoreError> {
        let runtime = self.runtimes.get(&id).map(|r| r.clone());
        let _guard = match &runtime {
            Some(rt) => Some(rt.lock.lock().await),
            None => None,
        };

        let Some(mut task) = self.storage.get_task(id).await? else {
            return Err(CoreError::Storage(format!("unknown task {id}")));
        };
        if task.status.is_terminal() {
            return Ok(());
        }

        task.status = TaskStatus::Canceled;
        task.current_viewers = 0;
        task.last_updated = self.clock.now();
        self.storage.update_task(&task).await?;

        if let Some(rt) = &runtime {
            rt.cancel.cancel();
        }
        self.runtimes.remove(&id);

        info!("Task {} canceled", id);
        Ok(())
    }

    /// Scheduler hook: force an expired Running task to Completed.
    pub async fn force_complete(&self, id: Uuid) -> Result<(), CoreError> {
        let runtime = self.runtimes.get(&id).map(|r| r.clone());
        if let Some(rt) = &runtime {
            let _guard = rt.lock.lock().await;
            self.complete_locked(id, rt).await?;
        } else if let Some(mut task) = self.storage.get_task(id).await? {
            if task.status == TaskStatus::Running {
                finish(&mut task, self.clock.now());
                self.storage.update_task(&task).await?;
            }
        }
        self.runtimes.remove(&id);
        Ok(())
    }

    /// Force-complete every Running task whose end time has passed.
    /// Covers tasks whose monitor loop died with the process.
    pub async fn sweep_expired(&self) -> Result<usize, CoreError> {
        let now = self.clock.now();
        let mut completed = 0usize;
        for task in self.list(Some(TaskStatus::Running)).await? {
            if task.is_expired(now) {
                self.force_complete(task.id).await?;
                completed += 1;
            }
        }
        Ok(completed)
    }

    /// Startup recovery: any Running task found in storage predates this
    /// process, so its sessions are gone. Reset to Pending for a clean
    /// restart.
    pub async fn rehydrate(&self) -> Result<usize, CoreError> {
        let tasks = self.storage.load_tasks().await?;
        let mut reset = 0usize;
        for mut task in tasks {
            if task.status == TaskStatus::Running {
                task.status = TaskStatus::Pending;
                task.start_time = None;
                task.end_time = None;
                task.current_viewers = 0;
                task.elapsed_secs = 0;
                task.last_updated = self.clock.now();
                self.storage.update_task(&task).await?;
                reset += 1;
            }
        }
        if reset > 0 {
            info!("Rehydrated {} stale running tasks back to pending", reset);
        }
        Ok(reset)
    }

    // ===== control loop =====

    async fn run_task(self: Arc<Self>, task: ViewTask, runtime: Arc<TaskRuntime>, ramp: bool) {
        let id = task.id;
        let result = self.drive(task, runtime.clone(), ramp).await;
        if let Err(e) = result {
            error!("Task {} failed: {}", id, e);
            runtime.cancel.cancel();
            if let Err(persist_err) = self.mark_failed(id, &runtime, &e).await {
                error!("Task {} failure could not be persisted: {}", id, persist_err);
            }
        }
        self.runtimes.remove(&id);
    }

    async fn drive(
        self: &Arc<Self>,
        task: ViewTask,
        runtime: Arc<TaskRuntime>,
        ramp: bool,
    ) -> Result<(), CoreError> {
        let proxies = storage::valid_proxies(self.storage.as_ref()).await?;
        if proxies.is_empty() {
            return Err(CoreError::TaskFatal("no valid proxies available".into()));
        }
        let accounts =
            storage::valid_accounts(self.storage.as_ref(), task.auth_viewers as usize).await?;
        let proxies = Arc::new(proxies);

        // Credentialed slots first, anonymous remainder after.
        let mut slots: VecDeque<Option<Account>> = accounts.into_iter().map(Some).collect();
        while slots.len() < task.max_viewers as usize {
            slots.push_back(None);
        }

        if ramp {
            self.ramp_phase(&task, &runtime, &mut slots, &proxies).await?;
        }
        self.monitor_phase(task.id, &runtime, &proxies).await
    }

    /// Grow the fleet from zero toward `max_viewers`, one batch of
    /// `ceil(max / ramp_minutes)` per tick. Each batch lands after a
    /// full tick has elapsed, the first one included, so the launch
    /// rate never exceeds one batch per tick. A paused task freezes
    /// the ramp; a canceled or terminal task ends it.
    async fn ramp_phase(
        self: &Arc<Self>,
        task: &ViewTask,
        runtime: &Arc<TaskRuntime>,
        slots: &mut VecDeque<Option<Account>>,
        proxies: &Arc<Vec<ProxyServer>>,
    ) -> Result<(), CoreError> {
        let per_tick = plan::viewers_per_minute(task.max_viewers, task.ramp_up_minutes);
        let tick = Duration::from_millis(self.config.ramp_tick_ms);
        let mut launched = 0u32;

        while launched < task.max_viewers {
            tokio::select! {
                _ = runtime.cancel.cancelled() => return Ok(()),
                _ = tokio::time::sleep(tick) => {}
            }

            let Some(current) = self.storage.get_task(task.id).await? else {
                return Ok(());
            };
            match current.status {
                TaskStatus::Running => {
                    let batch = per_tick.min(task.max_viewers - launched);
                    for _ in 0..batch {
                        let account = slots.pop_front().flatten();
                        self.spawn_viewer(task.id, &task.channel_url, runtime, account, proxies);
                        launched += 1;
                    }
                    self.persist_current(task.id, runtime).await?;
                    debug!(
                        "Task {} ramp: {}/{} viewers launched",
                        task.id, launched, task.max_viewers
                    );
                }
                TaskStatus::Paused => {}
                _ => return Ok(()),
            }
        }
        Ok(())
    }

    /// Steady-state loop: liveness re-check, expiry check and one
    /// adjustment pass per interval.
    async fn monitor_phase(
        self: &Arc<Self>,
        task_id: Uuid,
        runtime: &Arc<TaskRuntime>,
        proxies: &Arc<Vec<ProxyServer>>,
    ) -> Result<(), CoreError> {
        let interval = Duration::from_millis(self.config.monitor_interval_ms);

        loop {
            tokio::select! {
                _ = runtime.cancel.cancelled() => return Ok(()),
                _ = tokio::time::sleep(interval) => {}
            }

            let Some(task) = self.storage.get_task(task_id).await? else {
                return Ok(());
            };
            match task.status {
                TaskStatus::Running => {}
                TaskStatus::Paused => continue,
                _ => return Ok(()),
            }

            let now = self.clock.now();
            if task.is_expired(now) {
                let _guard = runtime.lock.lock().await;
                self.complete_locked(task_id, runtime).await?;
                return Ok(());
            }

            match self.liveness.is_live(&task.channel_url).await {
                Ok(true) => {}
                Ok(false) => {
                    let _guard = runtime.lock.lock().await;
                    let Some(mut fresh) = self.storage.get_task(task_id).await? else {
                        return Ok(());
                    };
                    if fresh.status == TaskStatus::Running {
                        info!(
                            "Channel {} went offline, pausing task {}",
                            fresh.channel_name(),
                            task_id
                        );
                        apply_pause(&mut fresh, now);
                        self.storage.update_task(&fresh).await?;
                    }
                    continue;
                }
                Err(e) => {
                    // Transient probe failure: keep the fleet as-is
                    warn!("Liveness check failed for task {}: {}", task_id, e);
                    continue;
                }
            }

            let current = runtime.counters.active();
            let delta = {
                let mut rng = rand::thread_rng();
                plan::adjustment_delta(
                    current,
                    task.max_viewers,
                    self.config.band_low,
                    self.config.band_high,
                    self.config.max_adjust_fraction,
                    &mut rng,
                )
            };
            if delta > 0 {
                debug!("Task {} adjustment: +{} viewers (at {})", task_id, delta, current);
                for _ in 0..delta {
                    self.spawn_viewer(task_id, &task.channel_url, runtime, None, proxies);
                }
            } else if delta < 0 {
                debug!("Task {} adjustment: {} viewers (at {})", task_id, delta, current);
                self.stop_viewers(runtime, (-delta) as usize);
            }

            self.persist_current(task_id, runtime).await?;
        }
    }

    async fn complete_locked(
        &self,
        task_id: Uuid,
        runtime: &Arc<TaskRuntime>,
    ) -> Result<(), CoreError> {
        let Some(mut task) = self.storage.get_task(task_id).await? else {
            return Ok(());
        };
        if task.status != TaskStatus::Running {
            return Ok(());
        }
        finish(&mut task, self.clock.now());
        self.storage.update_task(&task).await?;
        runtime.cancel.cancel();
        info!("Task {} completed", task_id);
        Ok(())
    }

    async fn mark_failed(
        &self,
        task_id: Uuid,
        runtime: &Arc<TaskRuntime>,
        err: &CoreError,
    ) -> Result<(), CoreError> {
        let _guard = runtime.lock.lock().await;
        let Some(mut task) = self.storage.get_task(task_id).await? else {
            return Ok(());
        };
        if task.status.can_transition(TaskStatus::Failed) {
            task.status = TaskStatus::Failed;
        }
        task.error_message = Some(err.to_string());
        task.current_viewers = 0;
        task.last_updated = self.clock.now();
        self.storage.update_task(&task).await
    }

    async fn persist_current(
        &self,
        task_id: Uuid,
        runtime: &Arc<TaskRuntime>,
    ) -> Result<(), CoreError> {
        let _guard = runtime.lock.lock().await;
        let Some(mut task) = self.storage.get_task(task_id).await? else {
            return Ok(());
        };
        if task.status == TaskStatus::Running {
            task.current_viewers = runtime.counters.active();
            task.last_updated = self.clock.now();
            self.storage.update_task(&task).await?;
        }
        Ok(())
    }

    // ===== viewer fleet =====

    fn spawn_viewer(
        self: &Arc<Self>,
        task_id: Uuid,
        channel_url: &str,
        runtime: &Arc<TaskRuntime>,
        account: Option<Account>,
        proxies: &Arc<Vec<ProxyServer>>,
    ) {
        let viewer_id = Uuid::new_v4();
        let child = runtime.cancel.child_token();
        runtime
            .viewer_tokens
            .lock()
            .push((viewer_id, child.clone()));
        runtime.counters.viewer_attached();

        let this = self.clone();
        let rt = runtime.clone();
        let channel = channel_url.to_string();
        let proxies = proxies.clone();
        tokio::spawn(async move {
            this.viewer_loop(task_id, &channel, account, &proxies, &child, &rt.counters)
                .await;
            rt.counters.viewer_detached();
            rt.viewer_tokens.lock().retain(|(id, _)| *id != viewer_id);
        });
    }

    fn stop_viewers(&self, runtime: &Arc<TaskRuntime>, count: usize) {
        let victims: Vec<CancellationToken> = {
            let mut tokens = runtime.viewer_tokens.lock();
            let len = tokens.len();
            let n = count.min(len);
            tokens.drain(len - n..).map(|(_, t)| t).collect()
        };
        for token in victims {
            token.cancel();
        }
    }

    /// One viewer's life: bounded retries with linear backoff around a
    /// single watch attempt. Exhausting the retries drops this viewer,
    /// nothing else.
    async fn viewer_loop(
        self: &Arc<Self>,
        task_id: Uuid,
        channel_url: &str,
        account: Option<Account>,
        proxies: &[ProxyServer],
        token: &CancellationToken,
        counters: &Arc<TaskCounters>,
    ) {
        let limit = self.config.viewer_retry_limit.max(1);
        for attempt in 1..=limit {
            if token.is_cancelled() {
                return;
            }
            if !self.await_running(task_id, token).await {
                return;
            }
            match self
                .watch_once(channel_url, account.as_ref(), proxies, token)
                .await
            {
                Ok(()) => return,
                Err(e) if e.is_retryable() && attempt < limit => {
                    counters.record_retry();
                    debug!(
                        "Task {} viewer attempt {}/{} failed: {}",
                        task_id, attempt, limit, e
                    );
                    let backoff = plan::linear_backoff(attempt, self.config.retry_backoff_ms);
                    tokio::select! {
                        _ = token.cancelled() => return,
                        _ = tokio::time::sleep(backoff) => {}
                    }
                }
                Err(e) => {
                    counters.record_drop();
                    warn!("Task {} dropping viewer after {} attempts: {}", task_id, attempt, e);
                    return;
                }
            }
        }
    }

    /// Park before an attempt while the task is paused, so a failing
    /// viewer never pulls fresh sessions into a frozen fleet. False
    /// means the viewer should wind down instead.
    async fn await_running(&self, task_id: Uuid, token: &CancellationToken) -> bool {
        loop {
            let status = match self.storage.get_task(task_id).await {
                Ok(Some(task)) => task.status,
                Ok(None) => return false,
                Err(e) => {
                    warn!("Task {} status check failed in a viewer: {}", task_id, e);
                    return false;
                }
            };
            match status {
                TaskStatus::Running => return true,
                TaskStatus::Paused => {
                    let nap = Duration::from_millis(self.config.monitor_interval_ms);
                    tokio::select! {
                        _ = token.cancelled() => return false,
                        _ = tokio::time::sleep(nap) => {}
                    }
                }
                _ => return false,
            }
        }
    }

    /// One watch attempt: acquire an affinitized session, authenticate
    /// when credentialed, navigate, then loop ambient activity until
    /// canceled. The pooled guard frees the slot on every exit path.
    async fn watch_once(
        &self,
        channel_url: &str,
        account: Option<&Account>,
        proxies: &[ProxyServer],
        token: &CancellationToken,
    ) -> Result<(), CoreError> {
        let proxy = self.pick_proxy(account, proxies).ok_or_else(|| {
            CoreError::SessionRuntime("no proxy with admission headroom".into())
        })?;

        let mut session = self.pool.acquire(Some(&proxy), token).await?;

        if let Some(account) = account {
            if !session.authenticate(account).await? {
                return Err(CoreError::AuthFailed(account.username.clone()));
            }
        }
        session.navigate(channel_url).await?;

        loop {
            let delay_ms = {
                let mut rng = rand::thread_rng();
                rng.gen_range(self.config.ambient_min_delay_ms..=self.config.ambient_max_delay_ms)
            };
            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(Duration::from_millis(delay_ms)) => {}
            }
            if token.is_cancelled() {
                break;
            }
            session.perform_ambient_activity().await?;
        }

        self.pool.release(session).await;
        Ok(())
    }

    /// Bound proxy when the account has one with headroom, otherwise
    /// the least-loaded valid proxy.
    fn pick_proxy(&self, account: Option<&Account>, proxies: &[ProxyServer]) -> Option<ProxyServer> {
        if let Some(bound_id) = account.and_then(|a| a.proxy_id) {
            if let Some(bound) = proxies.iter().find(|p| p.id == bound_id) {
                if self.pool.has_headroom(bound.id) {
                    return Some(bound.clone());
                }
            }
        }
        self.pool.least_loaded(proxies).cloned()
    }
}

fn apply_pause(task: &mut ViewTask, now: chrono::DateTime<chrono::Utc>) {
    if let Some(start) = task.start_time {
        let run = (now - start).num_seconds().max(0) as u64;
        task.elapsed_secs = task.elapsed_secs.saturating_add(run);
    }
    task.status = TaskStatus::Paused;
    task.last_updated = now;
}

/// Rebase the start time so banked elapsed run time is preserved.
fn apply_resume(task: &mut ViewTask, now: chrono::DateTime<chrono::Utc>) {
    task.start_time = Some(now - ChronoDuration::seconds(task.elapsed_secs as i64));
    task.end_time = task.start_time.map(|s| s + task.duration());
    task.status = TaskStatus::Running;
    task.last_updated = now;
}

fn finish(task: &mut ViewTask, now: chrono::DateTime<chrono::Utc>) {
    task.status = TaskStatus::Completed;
    task.completed_time = Some(now);
    task.current_viewers = 0;
    task.last_updated = now;
}
