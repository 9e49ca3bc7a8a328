//! viewswarm
//!
//! Orchestration core for large fleets of automated stream viewers:
//! a bounded session pool, staged proxy and account validation, and a
//! task state machine that ramps viewer counts up and holds them inside
//! a configured band for the task's duration.
//!
//! Browser automation, persistence and channel liveness are capability
//! traits ([`session::SessionFactory`], [`storage::Storage`],
//! [`session::LivenessProbe`]); concrete implementations are injected
//! by the embedding application.

pub mod errors;
pub mod models;
pub mod scheduler;
pub mod session;
pub mod stats;
pub mod storage;
pub mod task;
pub mod validator;

#[cfg(test)]
pub mod testutil;

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{error, info, warn};

use errors::CoreError;
use models::{Account, ProxyServer, TaskStatus, ValidationOutcome, ViewTask};
use scheduler::SchedulerLoop;
use session::{LivenessProbe, SessionFactory, SessionPool, SessionPoolConfig};
use storage::{ImportReport, Storage};
use task::{NewTask, OrchestratorConfig, SystemClock, TaskOrchestrator};
use validator::{AccountValidator, ProxyProbe, ProxyValidator, ProxyValidatorConfig};

/// Core configuration
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoreConfig {
    /// Session pool limits and timeouts
    #[serde(default)]
    pub pool: SessionPoolConfig,

    /// Proxy validation pipeline tuning
    #[serde(default)]
    pub proxy_validation: ProxyValidatorConfig,

    /// Task orchestration tuning
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,

    /// Scheduler pass interval
    #[serde(default = "default_scheduler_interval")]
    pub scheduler_interval_ms: u64,

    /// Target platform root, used for account validation
    #[serde(default = "default_target_url")]
    pub target_url: String,
}

fn default_scheduler_interval() -> u64 {
    60_000
}

fn default_target_url() -> String {
    "https://www.twitch.tv".to_string()
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            pool: SessionPoolConfig::default(),
            proxy_validation: ProxyValidatorConfig::default(),
            orchestrator: OrchestratorConfig::default(),
            scheduler_interval_ms: default_scheduler_interval(),
            target_url: default_target_url(),
        }
    }
}

/// Get log directory path (shared across modules)
pub fn log_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("viewswarm").join("logs"))
}

impl CoreConfig {
    /// Get config file path
    fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("viewswarm").join("config.json"))
    }

    /// Load config from file
    pub fn load() -> Self {
        if let Some(path) = Self::config_path() {
            if path.exists() {
                match std::fs::read_to_string(&path) {
                    Ok(content) => match serde_json::from_str(&content) {
                        Ok(config) => {
                            info!("Loaded config from {:?}", path);
                            return config;
                        }
                        Err(e) => {
                            warn!("Failed to parse config file: {}", e);
                        }
                    },
                    Err(e) => {
                        warn!("Failed to read config file: {}", e);
                    }
                }
            }
        }
        Self::default()
    }

    /// Save config to file
    pub fn save(&self) {
        if let Some(path) = Self::config_path() {
            if let Some(parent) = path.parent() {
                if let Err(e) = std::fs::create_dir_all(parent) {
                    error!("Failed to create config directory: {}", e);
                    return;
                }
            }

            match serde_json::to_string_pretty(self) {
                Ok(content) => {
                    if let Err(e) = std::fs::write(&path, content) {
                        error!("Failed to save config: {}", e);
                    } else {
                        info!("Config saved to {:?}", path);
                    }
                }
                Err(e) => {
                    error!("Failed to serialize config: {}", e);
                }
            }
        }
    }
}

/// Shared core state: the pool, the validators, the orchestrator and
/// the scheduler handle, wired to the injected capability ports.
pub struct CoreState {
    pub storage: Arc<dyn Storage>,
    pub pool: Arc<SessionPool>,
    pub proxy_validator: Arc<ProxyValidator>,
    pub account_validator: Arc<AccountValidator>,
    pub orchestrator: Arc<TaskOrchestrator>,
    pub config: Arc<RwLock<CoreConfig>>,
    scheduler: tokio::sync::Mutex<Option<SchedulerLoop>>,
}

impl CoreState {
    pub fn new(
        config: CoreConfig,
        storage: Arc<dyn Storage>,
        factory: Arc<dyn SessionFactory>,
        probe: Arc<dyn ProxyProbe>,
        liveness: Arc<dyn LivenessProbe>,
    ) -> Self {
        let clock = Arc::new(SystemClock);
        let pool = Arc::new(SessionPool::new(factory, config.pool.clone()));

        let proxy_validator = Arc::new(ProxyValidator::new(
            probe,
            storage.clone(),
            clock.clone(),
            config.proxy_validation.clone(),
        ));
        let account_validator = Arc::new(AccountValidator::new(
            pool.clone(),
            storage.clone(),
            clock.clone(),
            config.target_url.clone(),
        ));
        let orchestrator = Arc::new(TaskOrchestrator::new(
            storage.clone(),
            pool.clone(),
            liveness,
            clock,
            config.orchestrator.clone(),
        ));

        Self {
            storage,
            pool,
            proxy_validator,
            account_validator,
            orchestrator,
            config: Arc::new(RwLock::new(config)),
            scheduler: tokio::sync::Mutex::new(None),
        }
    }

    /// Reset stale state from a previous run and start the scheduler.
    pub async fn start(&self) -> Result<(), CoreError> {
        self.orchestrator.rehydrate().await?;

        let mut scheduler = self.scheduler.lock().await;
        if scheduler.is_none() {
            let interval = self.config.read().await.scheduler_interval_ms;
            *scheduler = Some(SchedulerLoop::start(self.orchestrator.clone(), interval));
        }
        Ok(())
    }

    /// Stop the scheduler and close every idle session. Running tasks
    /// keep their fleets until canceled.
    pub async fn shutdown(&self) {
        if let Some(scheduler) = self.scheduler.lock().await.take() {
            scheduler.stop();
        }
        self.pool.dispose_all().await;
        info!("Core shut down");
    }

    // ===== tasks =====

    pub async fn submit_task(&self, new: NewTask) -> Result<ViewTask, CoreError> {
        self.orchestrator.submit(new).await
    }

    pub async fn list_tasks(
        &self,
        filter: Option<TaskStatus>,
    ) -> Result<Vec<ViewTask>, CoreError> {
        self.orchestrator.list(filter).await
    }

    pub async fn start_task(&self, id: uuid::Uuid) -> Result<(), CoreError> {
        self.orchestrator.start(id).await
    }

    pub async fn pause_task(&self, id: uuid::Uuid) -> Result<(), CoreError> {
        self.orchestrator.pause(id).await
    }

    pub async fn resume_task(&self, id: uuid::Uuid) -> Result<(), CoreError> {
        self.orchestrator.resume(id).await
    }

    pub async fn cancel_task(&self, id: uuid::Uuid) -> Result<(), CoreError> {
        self.orchestrator.cancel(id).await
    }

    // ===== proxies and accounts =====

    pub async fn import_proxies(&self, text: &str) -> Result<ImportReport, CoreError> {
        storage::parse_proxies(self.storage.as_ref(), text).await
    }

    pub async fn import_accounts(&self, text: &str) -> Result<ImportReport, CoreError> {
        storage::parse_accounts(self.storage.as_ref(), text).await
    }

    pub async fn validate_all_proxies(&self) -> Result<Vec<ValidationOutcome>, CoreError> {
        self.proxy_validator.validate_all().await
    }

    pub async fn validate_all_accounts(&self) -> Result<usize, CoreError> {
        self.account_validator.validate_all().await
    }

    /// Stored proxies decorated with the pool's live admission counts.
    pub async fn list_proxies(&self) -> Result<Vec<ProxyServer>, CoreError> {
        let mut proxies = self.storage.load_proxies().await?;
        for proxy in &mut proxies {
            proxy.active_sessions = self.pool.proxy_active(proxy.id);
        }
        Ok(proxies)
    }

    pub async fn list_accounts(&self) -> Result<Vec<Account>, CoreError> {
        self.storage.load_accounts().await
    }

    /// Persist new configuration. The pool, validators and orchestrator
    /// snapshot their tuning when the `CoreState` is built, so changed
    /// pool, validation and orchestrator settings take effect in the
    /// next process. Only `scheduler_interval_ms` is read again, at the
    /// next `start` call.
    pub async fn configure(&self, config: CoreConfig) {
        config.save();
        *self.config.write().await = config;
        info!("Core configured");
    }
}

/// Initialize logging: console plus a daily-rolling file when a log
/// directory is available.
pub fn init_logging() -> Option<tracing_appender::non_blocking::WorkerGuard> {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive(tracing::Level::INFO.into());

    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(false);

    if let Some(log_dir) = log_dir() {
        let _ = std::fs::create_dir_all(&log_dir);
        let file_appender = tracing_appender::rolling::daily(&log_dir, "viewswarm.log");
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        let file_layer = tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_target(true)
            .with_thread_ids(true)
            .with_writer(non_blocking);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer)
            .with(file_layer)
            .init();

        Some(guard)
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer)
            .init();

        None
    }
}
