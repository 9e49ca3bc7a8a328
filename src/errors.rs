//! Core error types

use thiserror::Error;

/// Errors produced by the orchestration core.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Session pool exhausted: {0}")]
    AcquireTimeout(String),

    #[error("Failed to launch session: {0}")]
    SessionLaunch(String),

    #[error("Proxy unreachable: {0}")]
    ProxyUnreachable(String),

    #[error("Proxy protocol failure: {0}")]
    ProxyProtocolFailure(String),

    #[error("Target blocked through proxy: {0}")]
    ProxyTargetBlocked(String),

    #[error("Proxy accepts invalid credentials: {0}")]
    ProxyAuthNotEnforced(String),

    #[error("Authentication failed: {0}")]
    AuthFailed(String),

    #[error("Target offline: {0}")]
    TargetOffline(String),

    #[error("Session runtime failure: {0}")]
    SessionRuntime(String),

    #[error("Task failed: {0}")]
    TaskFatal(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CoreError {
    /// Whether a viewer loop should retry after this error.
    ///
    /// Pool timeouts and runtime failures are soft; launch failures and
    /// auth failures burn the attempt but are worth retrying with a
    /// different resource. Everything else is fatal for the viewer.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CoreError::AcquireTimeout(_)
                | CoreError::SessionLaunch(_)
                | CoreError::SessionRuntime(_)
                | CoreError::AuthFailed(_)
        )
    }
}

impl From<CoreError> for String {
    fn from(err: CoreError) -> String {
        err.to_string()
    }
}
