//! Bounded session pool.
//!
//! A global counting semaphore caps concurrent sessions; released handles
//! are parked in an idle set keyed by proxy affinity for reuse. Every
//! acquisition is scoped: dropping a `PooledSession` without returning it
//! still frees the semaphore slot and the proxy admission counter.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::errors::CoreError;
use crate::models::{Account, ProxyServer};
use crate::session::{AutomationSession, Fingerprint, SessionFactory};

/// Pool tuning knobs.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionPoolConfig {
    /// Global cap on concurrently acquired sessions.
    pub max_sessions: usize,
    /// Concurrent sessions admitted per proxy.
    pub per_proxy_cap: u32,
    /// Hard timeout for waiting on the semaphore.
    pub acquire_timeout_ms: u64,
    /// Timeout for constructing a new session.
    pub launch_timeout_ms: u64,
    /// Idle sweep period.
    pub sweep_interval_ms: u64,
}

impl Default for SessionPoolConfig {
    fn default() -> Self {
        Self {
            max_sessions: 50,
            per_proxy_cap: 3,
            acquire_timeout_ms: 30_000,
            launch_timeout_ms: 45_000,
            sweep_interval_ms: 30 * 60 * 1000,
        }
    }
}

struct PoolInner {
    semaphore: Arc<Semaphore>,
    factory: Arc<dyn SessionFactory>,
    /// Idle sessions keyed by proxy affinity (None = direct connection).
    idle: parking_lot::Mutex<HashMap<Option<Uuid>, Vec<Box<dyn AutomationSession>>>>,
    /// Live admission counters, one entry per proxy. Entry-level locking
    /// keeps unrelated proxies from blocking each other.
    proxy_load: DashMap<Uuid, u32>,
    config: SessionPoolConfig,
}

impl PoolInner {
    fn relinquish_proxy(&self, id: Uuid) {
        if let Some(mut count) = self.proxy_load.get_mut(&id) {
            *count = count.saturating_sub(1);
        }
    }
}

/// Bounded pool of reusable automation sessions.
pub struct SessionPool {
    inner: Arc<PoolInner>,
    sweeper: CancellationToken,
}

impl SessionPool {
    pub fn new(factory: Arc<dyn SessionFactory>, config: SessionPoolConfig) -> Self {
        let inner = Arc::new(PoolInner {
            semaphore: Arc::new(Semaphore::new(config.max_sessions)),
            factory,
            idle: parking_lot::Mutex::new(HashMap::new()),
            proxy_load: DashMap::new(),
            config,
        });

        let sweeper = CancellationToken::new();
        Self::spawn_sweeper(inner.clone(), sweeper.clone());

        Self { inner, sweeper }
    }

    /// Acquire a session, preferring an idle one with the same proxy
    /// affinity. Blocks on the global semaphore up to the configured
    /// acquire timeout; the cancellation token aborts the wait early.
    pub async fn acquire(
        &self,
        proxy: Option<&ProxyServer>,
        token: &CancellationToken,
    ) -> Result<PooledSession, CoreError> {
        let affinity = proxy.map(|p| p.id);

        if let Some(p) = proxy {
            if !self.try_admit(p.id) {
                return Err(CoreError::SessionRuntime(format!(
                    "proxy {} at capacity ({})",
                    p.endpoint(),
                    self.inner.config.per_proxy_cap
                )));
            }
        }

        let permit = match self.wait_for_permit(token).await {
            Ok(permit) => permit,
            Err(e) => {
                if let Some(id) = affinity {
                    self.inner.relinquish_proxy(id);
                }
                return Err(e);
            }
        };

        // Reuse before constructing
        let reused = {
            let mut idle = self.inner.idle.lock();
            idle.get_mut(&affinity).and_then(Vec::pop)
        };

        let session = match reused {
            Some(session) => {
                debug!("Reusing idle session (affinity: {:?})", affinity);
                session
            }
            None => {
                let fingerprint = Fingerprint::random();
                let launch = tokio::time::timeout(
                    Duration::from_millis(self.inner.config.launch_timeout_ms),
                    self.inner.factory.create(&fingerprint, proxy),
                )
                .await;
                match launch {
                    Ok(Ok(session)) => session,
                    Ok(Err(e)) => {
                        if let Some(id) = affinity {
                            self.inner.relinquish_proxy(id);
                        }
                        return Err(CoreError::SessionLaunch(e.to_string()));
                    }
                    Err(_) => {
                        if let Some(id) = affinity {
                            self.inner.relinquish_proxy(id);
                        }
                        return Err(CoreError::SessionLaunch(format!(
                            "launch timed out after {}ms",
                            self.inner.config.launch_timeout_ms
                        )));
                    }
                }
            }
        };

        Ok(PooledSession {
            id: Uuid::new_v4(),
            session: Some(session),
            permit: Some(permit),
            affinity,
            inner: self.inner.clone(),
        })
    }

    /// Return a session to the pool. The handle is reset first; a failed
    /// reset discards it instead of pooling.
    pub async fn release(&self, mut pooled: PooledSession) {
        if let Some(mut session) = pooled.session.take() {
            match session.reset().await {
                Ok(()) => {
                    let mut idle = self.inner.idle.lock();
                    idle.entry(pooled.affinity).or_default().push(session);
                }
                Err(e) => {
                    warn!("Discarding session {}: reset failed: {}", pooled.id, e);
                    if let Err(e) = session.close().await {
                        warn!("Error closing discarded session: {}", e);
                    }
                }
            }
        }
        // Dropping the guard frees the permit and the proxy slot
    }

    /// Close every idle session and stop the sweeper. Active guards keep
    /// their handles until dropped.
    pub async fn dispose_all(&self) {
        self.sweeper.cancel();

        let victims: Vec<Box<dyn AutomationSession>> = {
            let mut idle = self.inner.idle.lock();
            idle.drain().flat_map(|(_, sessions)| sessions).collect()
        };

        let count = victims.len();
        for mut session in victims {
            if let Err(e) = session.close().await {
                warn!("Error closing pooled session: {}", e);
            }
        }
        self.inner.proxy_load.clear();

        info!("Session pool disposed ({} idle sessions closed)", count);
    }

    /// Current admission count for a proxy.
    pub fn proxy_active(&self, id: Uuid) -> u32 {
        self.inner.proxy_load.get(&id).map(|c| *c).unwrap_or(0)
    }

    /// Whether a proxy can still admit another session.
    pub fn has_headroom(&self, id: Uuid) -> bool {
        self.proxy_active(id) < self.inner.config.per_proxy_cap
    }

    /// Pick the proxy with the fewest active sessions that still has
    /// admission headroom.
    pub fn least_loaded<'a>(&self, proxies: &'a [ProxyServer]) -> Option<&'a ProxyServer> {
        proxies
            .iter()
            .filter(|p| self.proxy_active(p.id) < self.inner.config.per_proxy_cap)
            .min_by_key(|p| self.proxy_active(p.id))
    }

    pub fn idle_count(&self) -> usize {
        self.inner.idle.lock().values().map(Vec::len).sum()
    }

    pub fn available_permits(&self) -> usize {
        self.inner.semaphore.available_permits()
    }

    fn try_admit(&self, id: Uuid) -> bool {
        let mut count = self.inner.proxy_load.entry(id).or_insert(0);
        if *count >= self.inner.config.per_proxy_cap {
            return false;
        }
        *count += 1;
        true
    }

    async fn wait_for_permit(
        &self,
        token: &CancellationToken,
    ) -> Result<OwnedSemaphorePermit, CoreError> {
        let timeout = Duration::from_millis(self.inner.config.acquire_timeout_ms);
        tokio::select! {
            _ = token.cancelled() => {
                Err(CoreError::AcquireTimeout("canceled while waiting for a session slot".into()))
            }
            acquired = tokio::time::timeout(timeout, self.inner.semaphore.clone().acquire_owned()) => {
                match acquired {
                    Ok(Ok(permit)) => Ok(permit),
                    Ok(Err(_)) => Err(CoreError::SessionRuntime("session pool closed".into())),
                    Err(_) => Err(CoreError::AcquireTimeout(format!(
                        "no session slot within {}ms",
                        self.inner.config.acquire_timeout_ms
                    ))),
                }
            }
        }
    }

    fn spawn_sweeper(inner: Arc<PoolInner>, token: CancellationToken) {
        let interval = Duration::from_millis(inner.config.sweep_interval_ms);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }

                let keep = inner.config.max_sessions / 2;
                let victims: Vec<Box<dyn AutomationSession>> = {
                    let mut idle = inner.idle.lock();
                    let mut total: usize = idle.values().map(Vec::len).sum();
                    let mut victims = Vec::new();
                    'outer: while total > keep {
                        let key = match idle
                            .iter()
                            .filter(|(_, v)| !v.is_empty())
                            .max_by_key(|(_, v)| v.len())
                            .map(|(k, _)| *k)
                        {
                            Some(k) => k,
                            None => break 'outer,
                        };
                        if let Some(bucket) = idle.get_mut(&key) {
                            if let Some(session) = bucket.pop() {
                                victims.push(session);
                                total -= 1;
                            }
                        }
                    }
                    idle.retain(|_, v| !v.is_empty());
                    victims
                };

                if !victims.is_empty() {
                    debug!("Idle sweep closing {} sessions", victims.len());
                    for mut session in victims {
                        if let Err(e) = session.close().await {
                            warn!("Error closing swept session: {}", e);
                        }
                    }
                }
            }
        });
    }
}

impl Drop for SessionPool {
    fn drop(&mut self) {
        self.sweeper.cancel();
    }
}

/// Scoped session acquisition. Holding this guard holds one semaphore
/// slot and (for affinitized sessions) one proxy admission slot; both
/// are freed on drop, even on error paths.
pub struct PooledSession {
    pub id: Uuid,
    session: Option<Box<dyn AutomationSession>>,
    permit: Option<OwnedSemaphorePermit>,
    affinity: Option<Uuid>,
    inner: Arc<PoolInner>,
}

impl PooledSession {
    pub fn affinity(&self) -> Option<Uuid> {
        self.affinity
    }

    pub async fn authenticate(&mut self, account: &Account) -> Result<bool, CoreError> {
        self.session_mut()?.authenticate(account).await
    }

    pub async fn navigate(&mut self, url: &str) -> Result<(), CoreError> {
        self.session_mut()?.navigate(url).await
    }

    pub async fn perform_ambient_activity(&mut self) -> Result<(), CoreError> {
        self.session_mut()?.perform_ambient_activity().await
    }

    pub async fn cookies(&mut self) -> Result<Option<String>, CoreError> {
        self.session_mut()?.cookies().await
    }

    fn session_mut(&mut self) -> Result<&mut Box<dyn AutomationSession>, CoreError> {
        self.session
            .as_mut()
            .ok_or_else(|| CoreError::SessionRuntime("session already released".into()))
    }
}

impl Drop for PooledSession {
    fn drop(&mut self) {
        if let Some(id) = self.affinity {
            self.inner.relinquish_proxy(id);
        }
        if let Some(mut session) = self.session.take() {
            // Not returned through release(): close in the background
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                handle.spawn(async move {
                    let _ = session.close().await;
                });
            }
        }
        self.permit.take();
    }
}
