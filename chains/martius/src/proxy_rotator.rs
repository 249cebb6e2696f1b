//! Proxy Rotator
//!
//! Owns two pools of proxies: `local` (from the proxy file) and `online`
//! (fetched from remote plain-text lists). Hands out probed, working entries
//! round-robin and keeps a single `failed` set across both pools.
//!
//! # Selection
//!
//! 1. Round-robin over entries of the requested pool that are not failed.
//! 2. Each candidate is probed (HTTP GET through the proxy) before it is
//!    returned; a failed probe marks it failed and moves on.
//! 3. When the local pool is exhausted, fall back to the online pool.
//! 4. When the online pool is exhausted, clear `failed`, re-fetch the remote
//!    lists and try once more.
//! 5. A single call never probes more than `min(max_probes, 2 * pool size)`
//!    entries per pool and never more than `max_probes` in total.
//!
//! `None` means no usable proxy: the caller proceeds direct.

use anyhow::{Context, Result};
use async_trait::async_trait;
use core_logic::{ProxyConfig, ProxyManager};
use futures::future::join_all;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PoolKind {
    Local,
    Online,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyStatus {
    Untested,
    Working,
    Failed,
}

/// Checks that a proxy can reach the outside world.
#[async_trait]
pub trait ProxyProbe: Send + Sync {
    async fn probe(&self, proxy: &ProxyConfig) -> bool;
}

/// A remote proxy list.
#[async_trait]
pub trait ProxySource: Send + Sync {
    fn name(&self) -> String;

    async fn fetch(&self) -> Result<Vec<ProxyConfig>>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RotatorStats {
    pub local: usize,
    pub online: usize,
    pub failed: usize,
    pub working: usize,
}

#[derive(Default)]
struct Pool {
    entries: Vec<ProxyConfig>,
    cursor: usize,
}

impl Pool {
    /// Next entry at or after the cursor that is not failed.
    fn next_candidate(&mut self, failed: &HashSet<String>) -> Option<ProxyConfig> {
        let len = self.entries.len();
        for offset in 0..len {
            let idx = (self.cursor + offset) % len;
            let entry = &self.entries[idx];
            if !failed.contains(&key(entry)) {
                self.cursor = (idx + 1) % len;
                return Some(entry.clone());
            }
        }
        None
    }
}

#[derive(Default)]
struct RotatorState {
    local: Pool,
    online: Pool,
    status: HashMap<String, ProxyStatus>,
    failed: HashSet<String>,
}

impl RotatorState {
    fn pool_len(&self, kind: PoolKind) -> usize {
        match kind {
            PoolKind::Local => self.local.entries.len(),
            PoolKind::Online => self.online.entries.len(),
        }
    }
}

fn key(proxy: &ProxyConfig) -> String {
    proxy.proxy_url()
}

pub struct ProxyRotator {
    state: Mutex<RotatorState>,
    sources: Vec<Arc<dyn ProxySource>>,
    probe: Arc<dyn ProxyProbe>,
    max_probes: usize,
    // Serializes clear + refetch so no caller sees a half-rebuilt pool
    refresh_lock: Mutex<()>,
}

impl ProxyRotator {
    pub const DEFAULT_MAX_PROBES: usize = 50;

    pub fn new(
        local: Vec<ProxyConfig>,
        sources: Vec<Arc<dyn ProxySource>>,
        probe: Arc<dyn ProxyProbe>,
    ) -> Self {
        let mut state = RotatorState::default();
        for proxy in &local {
            state.status.insert(key(proxy), ProxyStatus::Untested);
        }
        state.local.entries = local;

        Self {
            state: Mutex::new(state),
            sources,
            probe,
            max_probes: Self::DEFAULT_MAX_PROBES,
            refresh_lock: Mutex::new(()),
        }
    }

    /// Clamped to `1..=DEFAULT_MAX_PROBES`.
    pub fn with_max_probes(mut self, max_probes: usize) -> Self {
        self.max_probes = max_probes.clamp(1, Self::DEFAULT_MAX_PROBES);
        self
    }

    /// Returns a probed, working proxy, or `None` when nothing usable is left.
    pub async fn next(&self, pool: PoolKind) -> Option<ProxyConfig> {
        let mut kind = pool;
        let mut refetched = false;
        let mut probes = 0usize;

        loop {
            let pool_len = self.state.lock().await.pool_len(kind);
            let budget = (2 * pool_len).min(self.max_probes - probes);
            let mut pool_probes = 0usize;

            while pool_probes < budget {
                let candidate = {
                    let mut state = self.state.lock().await;
                    let RotatorState {
                        local,
                        online,
                        failed,
                        ..
                    } = &mut *state;
                    let pool = match kind {
                        PoolKind::Local => local,
                        PoolKind::Online => online,
                    };
                    pool.next_candidate(failed)
                };
                let Some(candidate) = candidate else {
                    break;
                };

                pool_probes += 1;
                probes += 1;

                if self.probe.probe(&candidate).await {
                    let mut state = self.state.lock().await;
                    state.status.insert(key(&candidate), ProxyStatus::Working);
                    debug!("Proxy {} passed probe", candidate.display_url());
                    return Some(candidate);
                }

                self.mark_failed(&candidate).await;
            }

            if probes >= self.max_probes {
                warn!(
                    "Proxy probe budget ({}) spent without a working proxy",
                    self.max_probes
                );
                return None;
            }

            match kind {
                PoolKind::Local => {
                    debug!("Local proxy pool exhausted, falling back to online pool");
                    kind = PoolKind::Online;
                    if self.state.lock().await.online.entries.is_empty() {
                        self.refresh_online().await;
                        refetched = true;
                    }
                }
                PoolKind::Online => {
                    if refetched {
                        return None;
                    }
                    self.clear_failed().await;
                    self.refresh_online().await;
                    refetched = true;
                    if self.state.lock().await.online.entries.is_empty() {
                        return None;
                    }
                }
            }
        }
    }

    /// Marks a proxy failed so rotation skips it until the next pool reset.
    pub async fn mark_failed(&self, proxy: &ProxyConfig) {
        let mut state = self.state.lock().await;
        state.failed.insert(key(proxy));
        state.status.insert(key(proxy), ProxyStatus::Failed);
        debug!("Proxy {} marked failed", proxy.display_url());
    }

    /// Re-fetches every remote list and swaps the online pool in one step.
    /// Individual source failures are logged and ignored.
    pub async fn refresh_online(&self) -> usize {
        let _guard = self.refresh_lock.lock().await;

        let results = join_all(self.sources.iter().map(|source| async move {
            (source.name(), source.fetch().await)
        }))
        .await;

        let mut fresh: Vec<ProxyConfig> = Vec::new();
        for (name, result) in results {
            match result {
                Ok(list) => {
                    debug!("Fetched {} proxies from {}", list.len(), name);
                    for proxy in list {
                        if !fresh.contains(&proxy) {
                            fresh.push(proxy);
                        }
                    }
                }
                Err(e) => warn!("Proxy source {} unavailable: {:#}", name, e),
            }
        }

        let count = fresh.len();
        let mut state = self.state.lock().await;
        for proxy in &fresh {
            state
                .status
                .entry(key(proxy))
                .or_insert(ProxyStatus::Untested);
        }
        state.online = Pool {
            entries: fresh,
            cursor: 0,
        };
        info!("Online proxy pool refreshed: {} entries", count);
        count
    }

    async fn clear_failed(&self) {
        let _guard = self.refresh_lock.lock().await;
        let mut state = self.state.lock().await;
        let cleared = state.failed.len();
        let RotatorState { failed, status, .. } = &mut *state;
        for k in failed.drain() {
            status.insert(k, ProxyStatus::Untested);
        }
        info!("Proxy pools exhausted, reset {} failed entries", cleared);
    }

    pub async fn status(&self, proxy: &ProxyConfig) -> Option<ProxyStatus> {
        self.state.lock().await.status.get(&key(proxy)).copied()
    }

    pub async fn stats(&self) -> RotatorStats {
        let state = self.state.lock().await;
        RotatorStats {
            local: state.local.entries.len(),
            online: state.online.entries.len(),
            failed: state.failed.len(),
            working: state
                .status
                .values()
                .filter(|s| **s == ProxyStatus::Working)
                .count(),
        }
    }
}

/// Probes a proxy with a GET to a known endpoint.
pub struct HttpProbe {
    test_url: String,
    timeout: Duration,
}

impl HttpProbe {
    pub fn new(test_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            test_url: test_url.into(),
            timeout,
        }
    }

    fn client_for(&self, proxy: &ProxyConfig) -> Result<reqwest::Client> {
        let reqwest_proxy =
            reqwest::Proxy::all(proxy.proxy_url()).context("Bad proxy config")?;
        reqwest::Client::builder()
            .proxy(reqwest_proxy)
            .timeout(self.timeout)
            .build()
            .context("Failed to build probe client")
    }
}

#[async_trait]
impl ProxyProbe for HttpProbe {
    async fn probe(&self, proxy: &ProxyConfig) -> bool {
        let client = match self.client_for(proxy) {
            Ok(c) => c,
            Err(e) => {
                warn!("Probe setup failed for {}: {:#}", proxy.display_url(), e);
                return false;
            }
        };
        match client.get(&self.test_url).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }
}

/// A remote plain-text proxy list, one entry per line.
pub struct HttpListSource {
    url: String,
    client: reqwest::Client,
}

impl HttpListSource {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self {
            url: url.into(),
            client,
        }
    }
}

#[async_trait]
impl ProxySource for HttpListSource {
    fn name(&self) -> String {
        self.url.clone()
    }

    async fn fetch(&self) -> Result<Vec<ProxyConfig>> {
        let body = self
            .client
            .get(&self.url)
            .send()
            .await
            .context("request failed")?
            .error_for_status()
            .context("bad status")?
            .text()
            .await
            .context("failed to read body")?;
        Ok(ProxyManager::parse_proxy_list(&body))
    }
}
