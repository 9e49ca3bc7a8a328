//! Domain entities: tasks, proxies, accounts and validation reports.

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

/// Lifecycle of a viewer task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TaskStatus {
    Pending,
    Running,
    Paused,
    Completed,
    Failed,
    Canceled,
}

impl TaskStatus {
    /// Completed, Failed and Canceled are terminal.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Canceled
        )
    }

    /// Legal state transitions. Cancel is reachable from every
    /// non-terminal state; everything else follows the run lifecycle.
    pub fn can_transition(self, to: TaskStatus) -> bool {
        use TaskStatus::*;
        match (self, to) {
            (Pending, Running) => true,
            (Running, Paused) => true,
            (Paused, Running) => true,
            (Running, Completed) | (Running, Failed) => true,
            (from, Canceled) => !from.is_terminal(),
            _ => false,
        }
    }
}

/// One unit of demand: sustain N concurrent viewers against a channel
/// for a duration.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewTask {
    pub id: Uuid,
    pub channel_url: String,
    /// Requested total concurrent viewers.
    pub max_viewers: u32,
    /// Viewers currently attached, kept inside the configured band
    /// while Running (except during ramp-up).
    pub current_viewers: i64,
    /// Authenticated share of `max_viewers`, picked at submit time.
    pub auth_viewers: u32,
    /// Anonymous remainder.
    pub guest_viewers: u32,
    /// Minutes to ramp from zero to `max_viewers`.
    pub ramp_up_minutes: u32,
    /// Total run duration in seconds.
    pub duration_secs: u64,
    pub status: TaskStatus,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub completed_time: Option<DateTime<Utc>>,
    /// Run time accumulated before the last pause, in seconds.
    pub elapsed_secs: u64,
    pub last_updated: DateTime<Utc>,
    pub error_message: Option<String>,
}

impl ViewTask {
    pub fn channel_name(&self) -> &str {
        self.channel_url.rsplit('/').next().unwrap_or(&self.channel_url)
    }

    pub fn duration(&self) -> Duration {
        Duration::seconds(self.duration_secs as i64)
    }

    /// Expired means a Running task whose end time has passed.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.status == TaskStatus::Running
            && self.end_time.map(|end| end <= now).unwrap_or(false)
    }
}

/// A network exit point viewers are routed through.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyServer {
    pub id: Uuid,
    pub address: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub is_valid: bool,
    pub last_checked: Option<DateTime<Utc>>,
    /// Admission counter; live value is owned by the session pool and
    /// filled in when the entity is read out through the core API.
    pub active_sessions: u32,
}

impl ProxyServer {
    pub fn new(address: impl Into<String>, port: u16) -> Self {
        Self {
            id: Uuid::new_v4(),
            address: address.into(),
            port,
            username: None,
            password: None,
            is_valid: false,
            last_checked: None,
            active_sessions: 0,
        }
    }

    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }

    pub fn has_credentials(&self) -> bool {
        self.username.as_deref().map(|u| !u.is_empty()).unwrap_or(false)
    }
}

/// A stored platform identity a viewer may authenticate as.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub id: Uuid,
    pub username: String,
    pub auth_token: String,
    pub is_valid: bool,
    pub last_checked: Option<DateTime<Utc>>,
    /// Bound proxy, referenced by id only; resolved through storage.
    pub proxy_id: Option<Uuid>,
    /// Serialized session cookies captured on the last successful login.
    pub cookies: Option<String>,
    pub cookies_expire_at: Option<DateTime<Utc>>,
}

impl Account {
    pub fn new(username: impl Into<String>, auth_token: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            username: username.into(),
            auth_token: auth_token.into(),
            is_valid: false,
            last_checked: None,
            proxy_id: None,
            cookies: None,
            cookies_expire_at: None,
        }
    }

    pub fn has_fresh_cookies(&self, now: DateTime<Utc>) -> bool {
        self.cookies.is_some()
            && self.cookies_expire_at.map(|e| e > now).unwrap_or(false)
    }
}

/// Which pipeline stage produced a validation failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ValidationStage {
    Reachability,
    Connectivity,
    TargetFetch,
    AuthEnforcement,
    Login,
}

/// Immutable validation report. Not persisted on its own; folded into
/// the target entity's `is_valid`/`last_checked`.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationOutcome {
    pub target_id: Uuid,
    pub is_valid: bool,
    pub stage: Option<ValidationStage>,
    pub error: Option<String>,
    pub latency_ms: u64,
    pub checked_at: DateTime<Utc>,
}

impl ValidationOutcome {
    pub fn valid(target_id: Uuid, latency_ms: u64, checked_at: DateTime<Utc>) -> Self {
        Self {
            target_id,
            is_valid: true,
            stage: None,
            error: None,
            latency_ms,
            checked_at,
        }
    }

    pub fn invalid(
        target_id: Uuid,
        stage: ValidationStage,
        error: impl Into<String>,
        latency_ms: u64,
        checked_at: DateTime<Utc>,
    ) -> Self {
        Self {
            target_id,
            is_valid: false,
            stage: Some(stage),
            error: Some(error.into()),
            latency_ms,
            checked_at,
        }
    }
}
