//! Background scheduler: one ticking loop that starts Pending tasks and
//! force-completes expired Running ones.
//!
//! Each pass isolates per-task failures. One task that cannot start only
//! logs; the rest of the pass continues.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::models::TaskStatus;
use crate::task::TaskOrchestrator;

/// Handle for the background scheduler loop. Dropping it does not stop
/// the loop; call `stop`.
pub struct SchedulerLoop {
    cancel: CancellationToken,
}

impl SchedulerLoop {
    /// Spawn the loop. The first pass runs after one full interval.
    pub fn start(orchestrator: Arc<TaskOrchestrator>, interval_ms: u64) -> Self {
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        tokio::spawn(async move {
            let interval = Duration::from_millis(interval_ms);
            info!("Scheduler loop started ({}ms interval)", interval_ms);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
                Self::tick(&orchestrator).await;
            }
            info!("Scheduler loop stopped");
        });

        Self { cancel }
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }

    async fn tick(orchestrator: &Arc<TaskOrchestrator>) {
        match orchestrator.sweep_expired().await {
            Ok(n) if n > 0 => debug!("Scheduler completed {} expired tasks", n),
            Ok(_) => {}
            Err(e) => error!("Expiry sweep failed: {}", e),
        }

        let pending = match orchestrator.list(Some(TaskStatus::Pending)).await {
            Ok(pending) => pending,
            Err(e) => {
                error!("Could not list pending tasks: {}", e);
                return;
            }
        };
        for task in pending {
            if let Err(e) = orchestrator.start(task.id).await {
                error!("Failed to start task {}: {}", task.id, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::CoreError;
    use crate::models::ProxyServer;
    use crate::session::{LivenessProbe, SessionPool, SessionPoolConfig};
    use crate::storage::{MemoryStore, Storage};
    use crate::task::{Clock, NewTask, OrchestratorConfig};
    use crate::testutil::{ManualClock, MockFactory};
    use async_trait::async_trait;
    use chrono::{Duration as ChronoDuration, TimeZone, Utc};

    /// Probe that errors for one channel and reports the rest live.
    struct PartialProbe {
        broken: String,
    }

    #[async_trait]
    impl LivenessProbe for PartialProbe {
        async fn is_live(&self, channel_url: &str) -> Result<bool, CoreError> {
            if channel_url == self.broken {
                Err(CoreError::SessionRuntime("probe exploded".into()))
            } else {
                Ok(true)
            }
        }
    }

    struct Harness {
        orchestrator: Arc<TaskOrchestrator>,
        storage: Arc<MemoryStore>,
        clock: Arc<ManualClock>,
    }

    async fn harness(broken_channel: &str) -> Harness {
        let storage = Arc::new(MemoryStore::new());
        let pool = Arc::new(SessionPool::new(
            Arc::new(MockFactory::default()),
            SessionPoolConfig {
                max_sessions: 16,
                per_proxy_cap: 100,
                acquire_timeout_ms: 200,
                launch_timeout_ms: 1000,
                sweep_interval_ms: 60_000,
            },
        ));
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap(),
        ));
        let orchestrator = Arc::new(TaskOrchestrator::new(
            storage.clone(),
            pool,
            Arc::new(PartialProbe {
                broken: broken_channel.to_string(),
            }),
            clock.clone(),
            OrchestratorConfig {
                ramp_tick_ms: 10,
                monitor_interval_ms: 20,
                ambient_min_delay_ms: 5,
                ambient_max_delay_ms: 10,
                ..Default::default()
            },
        ));

        let mut proxy = ProxyServer::new("10.0.0.1", 1080);
        proxy.is_valid = true;
        storage.insert_proxy(proxy).await.unwrap();

        Harness {
            orchestrator,
            storage,
            clock,
        }
    }

    async fn wait_for_status(storage: &MemoryStore, id: uuid::Uuid, status: TaskStatus) {
        for _ in 0..200 {
            if let Some(task) = storage.get_task(id).await.unwrap() {
                if task.status == status {
                    return;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("timed out waiting for status {status:?}");
    }

    #[tokio::test]
    async fn one_failing_task_does_not_block_the_pass() {
        let h = harness("https://www.twitch.tv/broken").await;

        let bad = h
            .orchestrator
            .submit(NewTask {
                channel_url: "https://www.twitch.tv/broken".into(),
                max_viewers: 2,
                ramp_up_minutes: 1,
                duration_secs: 3600,
            })
            .await
            .unwrap();
        let good = h
            .orchestrator
            .submit(NewTask {
                channel_url: "https://www.twitch.tv/healthy".into(),
                max_viewers: 2,
                ramp_up_minutes: 1,
                duration_secs: 3600,
            })
            .await
            .unwrap();

        let scheduler = SchedulerLoop::start(h.orchestrator.clone(), 15);
        wait_for_status(&h.storage, good.id, TaskStatus::Running).await;

        // The broken one keeps erroring but never blocks its sibling
        let stored = h.storage.get_task(bad.id).await.unwrap().unwrap();
        assert_eq!(stored.status, TaskStatus::Pending);

        scheduler.stop();
        h.orchestrator.cancel(good.id).await.unwrap();
    }

    #[tokio::test]
    async fn expired_running_tasks_are_forced_to_completed() {
        let h = harness("unused").await;

        // A Running task from a previous life, already past its end time
        let mut task = h
            .orchestrator
            .submit(NewTask {
                channel_url: "https://www.twitch.tv/healthy".into(),
                max_viewers: 2,
                ramp_up_minutes: 1,
                duration_secs: 600,
            })
            .await
            .unwrap();
        let start = h.clock.now() - ChronoDuration::seconds(700);
        task.status = TaskStatus::Running;
        task.start_time = Some(start);
        task.end_time = Some(start + ChronoDuration::seconds(600));
        h.storage.update_task(&task).await.unwrap();

        let scheduler = SchedulerLoop::start(h.orchestrator.clone(), 15);
        wait_for_status(&h.storage, task.id, TaskStatus::Completed).await;

        let stored = h.storage.get_task(task.id).await.unwrap().unwrap();
        assert!(stored.completed_time.is_some());
        assert_eq!(stored.current_viewers, 0);

        scheduler.stop();
    }

    #[tokio::test]
    async fn stop_halts_the_loop() {
        let h = harness("unused").await;
        let scheduler = SchedulerLoop::start(h.orchestrator.clone(), 10);
        scheduler.stop();
        tokio::time::sleep(Duration::from_millis(30)).await;

        // A task submitted after stop is never picked up
        let task = h
            .orchestrator
            .submit(NewTask {
                channel_url: "https://www.twitch.tv/healthy".into(),
                max_viewers: 1,
                ramp_up_minutes: 1,
                duration_secs: 600,
            })
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(
            h.storage.get_task(task.id).await.unwrap().unwrap().status,
            TaskStatus::Pending
        );
    }
}
