//! Capability traits for the external browser-automation collaborator.
//!
//! The core never drives a browser directly; it acquires opaque
//! `AutomationSession` handles from a factory and calls this narrow
//! surface. Concrete implementations live outside the crate.

use async_trait::async_trait;

use crate::errors::CoreError;
use crate::models::{Account, ProxyServer};
use crate::session::Fingerprint;

/// One browser-like session. The pool owns the handle's lifecycle,
/// not its internal state.
#[async_trait]
pub trait AutomationSession: Send {
    /// Present the credential and report whether an authenticated-state
    /// marker was observed.
    async fn authenticate(&mut self, account: &Account) -> Result<bool, CoreError>;

    async fn navigate(&mut self, url: &str) -> Result<(), CoreError>;

    /// One iteration of organic-looking activity on the current page.
    async fn perform_ambient_activity(&mut self) -> Result<(), CoreError>;

    /// Serialized cookies of the current session, if any.
    async fn cookies(&mut self) -> Result<Option<String>, CoreError>;

    /// Clear session-local state (cookies, storage) so the handle can be
    /// pooled for reuse.
    async fn reset(&mut self) -> Result<(), CoreError>;

    async fn close(&mut self) -> Result<(), CoreError>;
}

/// Constructs automation sessions, optionally routed through a proxy.
#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn create(
        &self,
        fingerprint: &Fingerprint,
        proxy: Option<&ProxyServer>,
    ) -> Result<Box<dyn AutomationSession>, CoreError>;
}

/// Answers whether the target channel is currently live.
#[async_trait]
pub trait LivenessProbe: Send + Sync {
    async fn is_live(&self, channel_url: &str) -> Result<bool, CoreError>;
}
