//! Shared test doubles for the capability traits.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;

use crate::errors::CoreError;
use crate::models::{Account, ProxyServer};
use crate::session::{AutomationSession, Fingerprint, LivenessProbe, SessionFactory};
use crate::task::Clock;

/// Behavior switches for mock sessions.
#[derive(Debug, Default, Clone)]
pub struct MockFlags {
    /// Fail the first N create calls.
    pub fail_create_first: u32,
    /// reset() always fails (forces discard instead of pooling).
    pub fail_reset: bool,
    /// authenticate() reports no authenticated-state marker.
    pub deny_auth: bool,
    /// perform_ambient_activity() always fails.
    pub fail_ambient: bool,
    /// Cookie payload returned after a successful login.
    pub cookies: Option<String>,
}

pub struct MockSession {
    flags: MockFlags,
    closed: Arc<AtomicU32>,
}

#[async_trait]
impl AutomationSession for MockSession {
    async fn authenticate(&mut self, _account: &Account) -> Result<bool, CoreError> {
        Ok(!self.flags.deny_auth)
    }

    async fn navigate(&mut self, _url: &str) -> Result<(), CoreError> {
        Ok(())
    }

    async fn perform_ambient_activity(&mut self) -> Result<(), CoreError> {
        if self.flags.fail_ambient {
            Err(CoreError::SessionRuntime("ambient activity failed".into()))
        } else {
            Ok(())
        }
    }

    async fn cookies(&mut self) -> Result<Option<String>, CoreError> {
        Ok(self.flags.cookies.clone())
    }

    async fn reset(&mut self) -> Result<(), CoreError> {
        if self.flags.fail_reset {
            Err(CoreError::SessionRuntime("reset failed".into()))
        } else {
            Ok(())
        }
    }

    async fn close(&mut self) -> Result<(), CoreError> {
        self.closed.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

/// Factory producing `MockSession`s, counting creations and closes.
#[derive(Default)]
pub struct MockFactory {
    flags: MockFlags,
    created: AtomicU32,
    failed: AtomicU32,
    closed: Arc<AtomicU32>,
}

impl MockFactory {
    pub fn with_flags(flags: MockFlags) -> Self {
        Self {
            flags,
            ..Default::default()
        }
    }

    pub fn created(&self) -> u32 {
        self.created.load(Ordering::Relaxed)
    }

    pub fn closed(&self) -> u32 {
        self.closed.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl SessionFactory for MockFactory {
    async fn create(
        &self,
        _fingerprint: &Fingerprint,
        _proxy: Option<&ProxyServer>,
    ) -> Result<Box<dyn AutomationSession>, CoreError> {
        if self.failed.load(Ordering::Relaxed) < self.flags.fail_create_first {
            self.failed.fetch_add(1, Ordering::Relaxed);
            return Err(CoreError::SessionLaunch("mock launch failure".into()));
        }
        self.created.fetch_add(1, Ordering::Relaxed);
        Ok(Box::new(MockSession {
            flags: self.flags.clone(),
            closed: self.closed.clone(),
        }))
    }
}

/// Liveness probe with a switchable answer.
pub struct MockLiveness {
    live: AtomicBool,
    calls: AtomicU32,
}

impl MockLiveness {
    pub fn new(live: bool) -> Self {
        Self {
            live: AtomicBool::new(live),
            calls: AtomicU32::new(0),
        }
    }

    pub fn set_live(&self, live: bool) {
        self.live.store(live, Ordering::Relaxed);
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl LivenessProbe for MockLiveness {
    async fn is_live(&self, _channel_url: &str) -> Result<bool, CoreError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        Ok(self.live.load(Ordering::Relaxed))
    }
}

/// Manually advanced clock.
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock();
        *now = *now + by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}
