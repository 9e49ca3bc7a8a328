//! Account validation through the session pool.
//!
//! Presents the stored credential in a pooled automation session routed
//! through the account's bound proxy (or any valid one) and records the
//! result on the entity. Session artifacts from a successful login are
//! cached with a 24 hour expiry for reuse by viewer loops.

use std::sync::Arc;

use chrono::Duration;
use rand::seq::SliceRandom;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::errors::CoreError;
use crate::models::{Account, ProxyServer};
use crate::session::SessionPool;
use crate::storage::{self, Storage};
use crate::task::Clock;

const COOKIE_TTL_HOURS: i64 = 24;

pub struct AccountValidator {
    pool: Arc<SessionPool>,
    storage: Arc<dyn Storage>,
    clock: Arc<dyn Clock>,
    target_url: String,
}

impl AccountValidator {
    pub fn new(
        pool: Arc<SessionPool>,
        storage: Arc<dyn Storage>,
        clock: Arc<dyn Clock>,
        target_url: impl Into<String>,
    ) -> Self {
        Self {
            pool,
            storage,
            clock,
            target_url: target_url.into(),
        }
    }

    /// Authenticate one account and persist the verdict. Returns whether
    /// the account is usable. The pooled session is released on every
    /// path; a drive failure marks the account invalid rather than
    /// propagating.
    pub async fn validate(&self, account: &Account) -> Result<bool, CoreError> {
        let proxy = self.resolve_proxy(account).await?;

        let token = CancellationToken::new();
        let mut pooled = self.pool.acquire(proxy.as_ref(), &token).await?;

        let now = self.clock.now();
        let mut updated = account.clone();
        updated.last_checked = Some(now);

        let verdict = self.drive(&mut pooled, account).await;
        match verdict {
            Ok((true, cookies)) => {
                updated.is_valid = true;
                if cookies.is_some() {
                    updated.cookies = cookies;
                    updated.cookies_expire_at = Some(now + Duration::hours(COOKIE_TTL_HOURS));
                }
                self.pool.release(pooled).await;
            }
            Ok((false, _)) => {
                info!("Account {} rejected by target", updated.username);
                updated.is_valid = false;
                updated.cookies = None;
                updated.cookies_expire_at = None;
                self.pool.release(pooled).await;
            }
            Err(e) => {
                warn!("Account {} validation error: {}", updated.username, e);
                updated.is_valid = false;
                // Guard drop discards the session and frees the slot
                drop(pooled);
            }
        }

        self.storage.update_account(&updated).await?;
        Ok(updated.is_valid)
    }

    /// Validate every stored account. The pool bounds the effective
    /// concurrency, so accounts are walked sequentially.
    pub async fn validate_all(&self) -> Result<usize, CoreError> {
        let accounts = self.storage.load_accounts().await?;
        let total = accounts.len();
        let mut valid = 0usize;

        for account in &accounts {
            match self.validate(account).await {
                Ok(true) => valid += 1,
                Ok(false) => {}
                Err(e) => warn!("Skipping account {}: {}", account.username, e),
            }
        }

        info!("Account validation finished: {}/{} valid", valid, total);
        Ok(valid)
    }

    async fn drive(
        &self,
        pooled: &mut crate::session::PooledSession,
        account: &Account,
    ) -> Result<(bool, Option<String>), CoreError> {
        pooled.navigate(&self.target_url).await?;
        let authenticated = pooled.authenticate(account).await?;
        if !authenticated {
            return Ok((false, None));
        }
        let cookies = pooled.cookies().await?;
        Ok((true, cookies))
    }

    async fn resolve_proxy(&self, account: &Account) -> Result<Option<ProxyServer>, CoreError> {
        if let Some(proxy_id) = account.proxy_id {
            if let Some(proxy) = self.storage.get_proxy(proxy_id).await? {
                if proxy.is_valid {
                    return Ok(Some(proxy));
                }
            }
        }
        let valid = storage::valid_proxies(self.storage.as_ref()).await?;
        Ok(valid.choose(&mut rand::thread_rng()).cloned())
    }
}
