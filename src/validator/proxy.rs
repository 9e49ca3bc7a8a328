//! Staged proxy validation pipeline.
//!
//! Stages run in order and short-circuit on the first failure, each with
//! its own error category: TCP reachability, generic connectivity through
//! the proxy, target-platform reachability with a content signature, and
//! (for credentialed proxies) a check that invalid credentials are in
//! fact rejected.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use crate::errors::CoreError;
use crate::models::{ProxyServer, ValidationOutcome, ValidationStage};
use crate::storage::Storage;
use crate::task::Clock;

/// Status and body of a probe request.
#[derive(Debug, Clone)]
pub struct ProbeResponse {
    pub status: u16,
    pub body: String,
}

impl ProbeResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Network side of the pipeline, swappable for tests.
#[async_trait]
pub trait ProxyProbe: Send + Sync {
    /// Transport-level connect to the proxy endpoint itself.
    async fn tcp_connect(
        &self,
        address: &str,
        port: u16,
        timeout: Duration,
    ) -> Result<(), CoreError>;

    /// HTTP GET routed through the proxy with its stored credentials.
    async fn fetch(
        &self,
        proxy: &ProxyServer,
        url: &str,
        timeout: Duration,
    ) -> Result<ProbeResponse, CoreError>;

    /// HTTP GET routed through the proxy with deliberately wrong
    /// credentials.
    async fn fetch_with_bad_auth(
        &self,
        proxy: &ProxyServer,
        url: &str,
        timeout: Duration,
    ) -> Result<ProbeResponse, CoreError>;
}

/// Production probe backed by reqwest.
#[derive(Default)]
pub struct HttpProxyProbe;

impl HttpProxyProbe {
    fn client_for(
        proxy: &ProxyServer,
        timeout: Duration,
        auth: Option<(&str, &str)>,
    ) -> Result<reqwest::Client, CoreError> {
        let mut upstream = reqwest::Proxy::all(format!("http://{}", proxy.endpoint()))
            .map_err(|e| CoreError::ProxyProtocolFailure(e.to_string()))?;

        if let Some((user, pass)) = auth {
            upstream = upstream.basic_auth(user, pass);
        } else if proxy.has_credentials() {
            upstream = upstream.basic_auth(
                proxy.username.as_deref().unwrap_or_default(),
                proxy.password.as_deref().unwrap_or_default(),
            );
        }

        reqwest::Client::builder()
            .proxy(upstream)
            .timeout(timeout)
            .danger_accept_invalid_certs(true)
            .build()
            .map_err(|e| CoreError::ProxyProtocolFailure(e.to_string()))
    }

    async fn get(
        client: reqwest::Client,
        url: &str,
    ) -> Result<ProbeResponse, CoreError> {
        let response = client
            .get(url)
            .header("Accept", "text/html,application/xhtml+xml,*/*;q=0.8")
            .send()
            .await
            .map_err(|e| CoreError::ProxyProtocolFailure(e.to_string()))?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| CoreError::ProxyProtocolFailure(e.to_string()))?;

        Ok(ProbeResponse { status, body })
    }
}

#[async_trait]
impl ProxyProbe for HttpProxyProbe {
    async fn tcp_connect(
        &self,
        address: &str,
        port: u16,
        timeout: Duration,
    ) -> Result<(), CoreError> {
        match tokio::time::timeout(timeout, TcpStream::connect((address, port))).await {
            Ok(Ok(_stream)) => Ok(()),
            Ok(Err(e)) => Err(CoreError::ProxyUnreachable(e.to_string())),
            Err(_) => Err(CoreError::ProxyUnreachable(format!(
                "TCP connect timed out after {}ms",
                timeout.as_millis()
            ))),
        }
    }

    async fn fetch(
        &self,
        proxy: &ProxyServer,
        url: &str,
        timeout: Duration,
    ) -> Result<ProbeResponse, CoreError> {
        let client = Self::client_for(proxy, timeout, None)?;
        Self::get(client, url).await
    }

    async fn fetch_with_bad_auth(
        &self,
        proxy: &ProxyServer,
        url: &str,
        timeout: Duration,
    ) -> Result<ProbeResponse, CoreError> {
        let client = Self::client_for(proxy, timeout, Some(("invalid", "invalid")))?;
        Self::get(client, url).await
    }
}

/// Pipeline tuning.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyValidatorConfig {
    pub tcp_timeout_ms: u64,
    pub http_timeout_ms: u64,
    /// Neutral endpoint for the generic connectivity stage.
    pub neutral_url: String,
    /// Target platform root page.
    pub target_url: String,
    /// Token the target page body must contain.
    pub target_token: String,
    /// Minimum body size for the target page to count as real content.
    pub min_target_bytes: usize,
    pub batch_size: usize,
    pub batch_pause_ms: u64,
}

impl Default for ProxyValidatorConfig {
    fn default() -> Self {
        Self {
            tcp_timeout_ms: 5_000,
            http_timeout_ms: 15_000,
            neutral_url: "http://api.ipify.org".to_string(),
            target_url: "https://www.twitch.tv".to_string(),
            target_token: "twitch".to_string(),
            min_target_bytes: 512,
            batch_size: 10,
            batch_pause_ms: 1_000,
        }
    }
}

/// Staged proxy health validator.
pub struct ProxyValidator {
    probe: Arc<dyn ProxyProbe>,
    storage: Arc<dyn Storage>,
    clock: Arc<dyn Clock>,
    config: ProxyValidatorConfig,
}

impl ProxyValidator {
    pub fn new(
        probe: Arc<dyn ProxyProbe>,
        storage: Arc<dyn Storage>,
        clock: Arc<dyn Clock>,
        config: ProxyValidatorConfig,
    ) -> Self {
        Self {
            probe,
            storage,
            clock,
            config,
        }
    }

    /// Run the pipeline against one proxy. Never touches storage.
    pub async fn validate(&self, proxy: &ProxyServer) -> ValidationOutcome {
        let started = std::time::Instant::now();
        let elapsed = |s: &std::time::Instant| s.elapsed().as_millis() as u64;

        // Stage 1: transport reachability
        if let Err(e) = self
            .probe
            .tcp_connect(
                &proxy.address,
                proxy.port,
                Duration::from_millis(self.config.tcp_timeout_ms),
            )
            .await
        {
            return ValidationOutcome::invalid(
                proxy.id,
                ValidationStage::Reachability,
                e.to_string(),
                elapsed(&started),
                self.clock.now(),
            );
        }

        let http_timeout = Duration::from_millis(self.config.http_timeout_ms);

        // Stage 2: generic connectivity through the proxy
        match self.probe.fetch(proxy, &self.config.neutral_url, http_timeout).await {
            Ok(response) if response.is_success() => {}
            Ok(response) => {
                return ValidationOutcome::invalid(
                    proxy.id,
                    ValidationStage::Connectivity,
                    format!("HTTP {} from neutral endpoint", response.status),
                    elapsed(&started),
                    self.clock.now(),
                );
            }
            Err(e) => {
                return ValidationOutcome::invalid(
                    proxy.id,
                    ValidationStage::Connectivity,
                    e.to_string(),
                    elapsed(&started),
                    self.clock.now(),
                );
            }
        }

        // Stage 3: target platform through the proxy, with content signature
        match self.probe.fetch(proxy, &self.config.target_url, http_timeout).await {
            Ok(response) if response.is_success() => {
                let body = response.body.to_lowercase();
                if response.body.len() < self.config.min_target_bytes
                    || !body.contains(&self.config.target_token)
                {
                    return ValidationOutcome::invalid(
                        proxy.id,
                        ValidationStage::TargetFetch,
                        "target page missing content signature",
                        elapsed(&started),
                        self.clock.now(),
                    );
                }
            }
            Ok(response) => {
                return ValidationOutcome::invalid(
                    proxy.id,
                    ValidationStage::TargetFetch,
                    format!("HTTP {} from target", response.status),
                    elapsed(&started),
                    self.clock.now(),
                );
            }
            Err(e) => {
                return ValidationOutcome::invalid(
                    proxy.id,
                    ValidationStage::TargetFetch,
                    e.to_string(),
                    elapsed(&started),
                    self.clock.now(),
                );
            }
        }

        // Stage 4: credentialed proxies must reject invalid credentials
        if proxy.has_credentials() {
            match self
                .probe
                .fetch_with_bad_auth(proxy, &self.config.neutral_url, http_timeout)
                .await
            {
                Ok(response) if response.is_success() => {
                    return ValidationOutcome::invalid(
                        proxy.id,
                        ValidationStage::AuthEnforcement,
                        "proxy accepted invalid credentials",
                        elapsed(&started),
                        self.clock.now(),
                    );
                }
                // Rejection of any kind confirms enforcement
                Ok(_) | Err(_) => {}
            }
        }

        ValidationOutcome::valid(proxy.id, elapsed(&started), self.clock.now())
    }

    /// Validate every stored proxy in bounded concurrent batches with an
    /// inter-batch pause. Each proxy's validity is persisted as its own
    /// result lands, so partial progress survives an interrupted run.
    pub async fn validate_all(&self) -> Result<Vec<ValidationOutcome>, CoreError> {
        let proxies = self.storage.load_proxies().await?;
        let total = proxies.len();
        let mut outcomes = Vec::with_capacity(total);

        for (batch_index, batch) in proxies.chunks(self.config.batch_size.max(1)).enumerate() {
            if batch_index > 0 {
                tokio::time::sleep(Duration::from_millis(self.config.batch_pause_ms)).await;
            }

            let results = join_all(batch.iter().map(|proxy| async {
                let outcome = self.validate(proxy).await;

                let mut updated = proxy.clone();
                updated.is_valid = outcome.is_valid;
                updated.last_checked = Some(outcome.checked_at);
                if let Err(e) = self.storage.update_proxy(&updated).await {
                    warn!("Failed to persist result for {}: {}", proxy.endpoint(), e);
                }

                debug!(
                    "Proxy {} - {} - {}",
                    proxy.endpoint(),
                    if outcome.is_valid { "VALID" } else { "INVALID" },
                    outcome.error.as_deref().unwrap_or("OK"),
                );
                outcome
            }))
            .await;

            outcomes.extend(results);
        }

        let valid = outcomes.iter().filter(|o| o.is_valid).count();
        info!("Proxy validation finished: {}/{} valid", valid, total);
        Ok(outcomes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use crate::task::SystemClock;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    /// Probe double with per-stage switches and call counters.
    #[derive(Default)]
    struct ScriptedProbe {
        tcp_fails: AtomicBool,
        neutral_fails: AtomicBool,
        target_body: parking_lot::Mutex<String>,
        bad_auth_accepted: AtomicBool,
        http_calls: AtomicU32,
    }

    impl ScriptedProbe {
        fn healthy() -> Self {
            let probe = Self::default();
            *probe.target_body.lock() = format!("<html>{}twitch{}</html>", "x".repeat(600), "");
            probe
        }
    }

    #[async_trait]
    impl ProxyProbe for ScriptedProbe {
        async fn tcp_connect(
            &self,
            _address: &str,
            _port: u16,
            _timeout: Duration,
        ) -> Result<(), CoreError> {
            if self.tcp_fails.load(Ordering::Relaxed) {
                Err(CoreError::ProxyUnreachable("connection refused".into()))
            } else {
                Ok(())
            }
        }

        async fn fetch(
            &self,
            _proxy: &ProxyServer,
            url: &str,
            _timeout: Duration,
        ) -> Result<ProbeResponse, CoreError> {
            self.http_calls.fetch_add(1, Ordering::Relaxed);
            if url.contains("ipify") {
                if self.neutral_fails.load(Ordering::Relaxed) {
                    return Err(CoreError::ProxyProtocolFailure("tunnel refused".into()));
                }
                return Ok(ProbeResponse {
                    status: 200,
                    body: "1.2.3.4".into(),
                });
            }
            Ok(ProbeResponse {
                status: 200,
                body: self.target_body.lock().clone(),
            })
        }

        async fn fetch_with_bad_auth(
            &self,
            _proxy: &ProxyServer,
            _url: &str,
            _timeout: Duration,
        ) -> Result<ProbeResponse, CoreError> {
            self.http_calls.fetch_add(1, Ordering::Relaxed);
            if self.bad_auth_accepted.load(Ordering::Relaxed) {
                Ok(ProbeResponse {
                    status: 200,
                    body: "1.2.3.4".into(),
                })
            } else {
                Ok(ProbeResponse {
                    status: 407,
                    body: String::new(),
                })
            }
        }
    }

    fn validator(probe: Arc<ScriptedProbe>) -> (ProxyValidator, Arc<MemoryStore>) {
        let storage = Arc::new(MemoryStore::new());
        let validator = ProxyValidator::new(
            probe,
            storage.clone(),
            Arc::new(SystemClock),
            ProxyValidatorConfig {
                batch_pause_ms: 0,
                ..Default::default()
            },
        );
        (validator, storage)
    }

    #[tokio::test]
    async fn healthy_proxy_passes_all_stages() {
        let probe = Arc::new(ScriptedProbe::healthy());
        let (validator, _) = validator(probe);
        let proxy = ProxyServer::new("10.0.0.1", 1080);

        let outcome = validator.validate(&proxy).await;
        assert!(outcome.is_valid);
        assert!(outcome.stage.is_none());
    }

    #[tokio::test]
    async fn tcp_failure_short_circuits_without_http_probes() {
        let probe = Arc::new(ScriptedProbe::healthy());
        probe.tcp_fails.store(true, Ordering::Relaxed);
        let (validator, _) = validator(probe.clone());
        let proxy = ProxyServer::new("10.0.0.1", 1080);

        let outcome = validator.validate(&proxy).await;
        assert!(!outcome.is_valid);
        assert_eq!(outcome.stage, Some(ValidationStage::Reachability));
        assert_eq!(probe.http_calls.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn neutral_endpoint_failure_is_a_protocol_failure() {
        let probe = Arc::new(ScriptedProbe::healthy());
        probe.neutral_fails.store(true, Ordering::Relaxed);
        let (validator, _) = validator(probe);
        let proxy = ProxyServer::new("10.0.0.1", 1080);

        let outcome = validator.validate(&proxy).await;
        assert_eq!(outcome.stage, Some(ValidationStage::Connectivity));
    }

    #[tokio::test]
    async fn missing_content_signature_blocks_target_stage() {
        let probe = Arc::new(ScriptedProbe::healthy());
        *probe.target_body.lock() = "tiny".into();
        let (validator, _) = validator(probe);
        let proxy = ProxyServer::new("10.0.0.1", 1080);

        let outcome = validator.validate(&proxy).await;
        assert_eq!(outcome.stage, Some(ValidationStage::TargetFetch));
    }

    #[tokio::test]
    async fn credentialed_proxy_must_reject_bad_auth() {
        let probe = Arc::new(ScriptedProbe::healthy());
        probe.bad_auth_accepted.store(true, Ordering::Relaxed);
        let (validator, _) = validator(probe.clone());

        let mut proxy = ProxyServer::new("10.0.0.1", 1080);
        proxy.username = Some("user".into());
        proxy.password = Some("pass".into());

        let outcome = validator.validate(&proxy).await;
        assert_eq!(outcome.stage, Some(ValidationStage::AuthEnforcement));

        // Uncredentialed proxies skip the stage entirely
        let open = ProxyServer::new("10.0.0.2", 1080);
        let outcome = validator.validate(&open).await;
        assert!(outcome.is_valid);
    }

    #[tokio::test]
    async fn validate_all_persists_each_result() {
        let probe = Arc::new(ScriptedProbe::healthy());
        let (validator, storage) = validator(probe);

        for i in 0..12 {
            storage
                .insert_proxy(ProxyServer::new(format!("10.0.0.{i}"), 1080))
                .await
                .unwrap();
        }

        let outcomes = validator.validate_all().await.unwrap();
        assert_eq!(outcomes.len(), 12);

        for proxy in storage.load_proxies().await.unwrap() {
            assert!(proxy.is_valid);
            assert!(proxy.last_checked.is_some());
        }
    }
}
