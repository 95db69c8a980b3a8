// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metrics::counter;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// 代理轮换策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RotationStrategy {
    #[default]
    RoundRobin,
    Random,
    /// 同一个键固定使用同一个代理，连续失败后才换
    DomainSticky,
}

/// 代理记录
#[derive(Debug, Clone, Serialize)]
pub struct ProxyRecord {
    pub address: String,
    pub strategy: RotationStrategy,
    pub consecutive_failures: u32,
    pub last_used: Option<DateTime<Utc>>,
    pub healthy: bool,
    pub total_successes: u64,
    pub total_failures: u64,
    #[serde(skip)]
    next_probe_at: Option<Instant>,
}

impl ProxyRecord {
    fn new(address: String, strategy: RotationStrategy) -> Self {
        Self {
            address,
            strategy,
            consecutive_failures: 0,
            last_used: None,
            healthy: true,
            total_successes: 0,
            total_failures: 0,
            next_probe_at: None,
        }
    }
}

/// `next` 的返回值：某个代理，或不使用代理
#[derive(Debug, Clone)]
pub enum ProxyChoice {
    Direct,
    Proxy(ProxyRecord),
}

impl ProxyChoice {
    pub fn address(&self) -> Option<&str> {
        match self {
            ProxyChoice::Direct => None,
            ProxyChoice::Proxy(record) => Some(&record.address),
        }
    }
}

/// 代理管理器配置
#[derive(Debug, Clone)]
pub struct ProxyManagerConfig {
    pub strategy: RotationStrategy,
    /// 连续失败多少次后标记为不健康
    pub failure_threshold: u32,
    /// 固定分配下，同一个键连续失败多少次后换代理
    pub sticky_failure_threshold: u32,
    /// 不健康代理的探测间隔
    pub probe_interval: Duration,
    /// 最多保留多少个键的固定分配，超出时淘汰最久未用的
    pub max_sticky_keys: usize,
}

impl Default for ProxyManagerConfig {
    fn default() -> Self {
        Self {
            strategy: RotationStrategy::RoundRobin,
            failure_threshold: 3,
            sticky_failure_threshold: 2,
            probe_interval: Duration::from_secs(300),
            max_sticky_keys: 10_000,
        }
    }
}

/// 代理池统计
#[derive(Debug, Clone, Serialize)]
pub struct ProxyPoolStats {
    pub total: usize,
    pub healthy: usize,
    pub unhealthy: usize,
    pub proxies: Vec<ProxyRecord>,
}

/// 代理健康探测
#[async_trait]
pub trait ProxyProbe: Send + Sync {
    /// 探测代理是否可用
    async fn probe(&self, address: &str) -> bool;
}

/// 通过代理请求测试URL的探测实现
pub struct HttpProxyProbe {
    test_url: String,
    timeout: Duration,
}

impl HttpProxyProbe {
    pub fn new(test_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            test_url: test_url.into(),
            timeout,
        }
    }
}

#[async_trait]
impl ProxyProbe for HttpProxyProbe {
    async fn probe(&self, address: &str) -> bool {
        let proxy = match reqwest::Proxy::all(address) {
            Ok(proxy) => proxy,
            Err(e) => {
                warn!(proxy = address, error = %e, "Invalid proxy address");
                return false;
            }
        };
        let client = match reqwest::Client::builder()
            .proxy(proxy)
            .timeout(self.timeout)
            .build()
        {
            Ok(client) => client,
            Err(e) => {
                warn!(proxy = address, error = %e, "Failed to build probe client");
                return false;
            }
        };
        match client.get(&self.test_url).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                debug!(proxy = address, error = %e, "Proxy probe failed");
                false
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct StickyAssignment {
    index: usize,
    failures: u32,
}

#[derive(Debug)]
struct PoolState {
    proxies: Vec<ProxyRecord>,
    cursor: usize,
    sticky: LruCache<String, StickyAssignment>,
}

impl PoolState {
    /// 从 `start` 开始寻找下一个健康代理
    fn healthy_from(&self, start: usize) -> Option<usize> {
        let len = self.proxies.len();
        (0..len)
            .map(|offset| (start + offset) % len)
            .find(|&idx| self.proxies[idx].healthy)
    }
}

fn stable_hash(key: &str) -> u64 {
    Sha256::digest(key.as_bytes())
        .iter()
        .take(8)
        .fold(0u64, |acc, b| (acc << 8) | *b as u64)
}

/// 代理地址的短指纹，用于指标标签和日志，避免暴露地址中的凭据
pub fn proxy_fingerprint(address: &str) -> String {
    hex::encode(&Sha256::digest(address.as_bytes())[..6])
}

/// 代理管理器
///
/// 在所有任务和工作器之间共享。代理池为空或全部不健康时返回 `ProxyChoice::Direct`，
/// 不会因为代理不可用而阻塞抓取。
#[derive(Clone)]
pub struct ProxyManager {
    config: Arc<ProxyManagerConfig>,
    state: Arc<Mutex<PoolState>>,
}

impl ProxyManager {
    pub fn new(addresses: Vec<String>, config: ProxyManagerConfig) -> Self {
        let proxies = addresses
            .into_iter()
            .map(|address| ProxyRecord::new(address, config.strategy))
            .collect();
        let max_sticky_keys = config.max_sticky_keys;
        Self {
            config: Arc::new(config),
            state: Arc::new(Mutex::new(PoolState {
                proxies,
                cursor: 0,
                sticky: LruCache::new(
                    NonZeroUsize::new(max_sticky_keys.max(1)).unwrap_or(NonZeroUsize::MIN),
                ),
            })),
        }
    }

    /// 不使用任何代理的管理器
    pub fn direct() -> Self {
        Self::new(Vec::new(), ProxyManagerConfig::default())
    }

    pub fn add_proxy(&self, address: impl Into<String>) {
        let mut state = self.state.lock();
        let address = address.into();
        if state.proxies.iter().all(|p| p.address != address) {
            state
                .proxies
                .push(ProxyRecord::new(address, self.config.strategy));
        }
    }

    pub fn remove_proxy(&self, address: &str) -> bool {
        let mut state = self.state.lock();
        let before = state.proxies.len();
        state.proxies.retain(|p| p.address != address);
        // 索引失效，清空固定分配
        state.sticky.clear();
        state.cursor = 0;
        state.proxies.len() != before
    }

    /// 为键选择下一个代理
    ///
    /// # 参数
    ///
    /// * `key` - 限流键（目标域名），用于固定分配策略
    ///
    /// # 返回值
    ///
    /// 选中的代理，或 `ProxyChoice::Direct`
    pub fn next(&self, key: &str) -> ProxyChoice {
        let mut state = self.state.lock();
        if state.proxies.is_empty() {
            return ProxyChoice::Direct;
        }

        let selected = match self.config.strategy {
            RotationStrategy::RoundRobin => {
                let start = state.cursor;
                let idx = state.healthy_from(start);
                if let Some(idx) = idx {
                    state.cursor = idx + 1;
                }
                idx
            }
            RotationStrategy::Random => {
                let healthy: Vec<usize> = (0..state.proxies.len())
                    .filter(|&i| state.proxies[i].healthy)
                    .collect();
                if healthy.is_empty() {
                    None
                } else {
                    Some(healthy[rand::random_range(0..healthy.len())])
                }
            }
            RotationStrategy::DomainSticky => self.sticky_pick(&mut state, key),
        };

        match selected {
            Some(idx) => {
                let record = &mut state.proxies[idx];
                record.last_used = Some(Utc::now());
                ProxyChoice::Proxy(record.clone())
            }
            None => {
                debug!(key = key, "No healthy proxy, falling back to direct connection");
                ProxyChoice::Direct
            }
        }
    }

    fn sticky_pick(&self, state: &mut PoolState, key: &str) -> Option<usize> {
        let len = state.proxies.len();
        let threshold = self.config.sticky_failure_threshold.max(1);

        let start = match state.sticky.get(key).copied() {
            Some(a) if a.index < len && state.proxies[a.index].healthy && a.failures < threshold => {
                return Some(a.index);
            }
            // 连续失败或代理不健康时，从下一个代理开始找
            Some(a) => a.index + 1,
            None => (stable_hash(key) % len as u64) as usize,
        };

        let idx = state.healthy_from(start % len)?;
        state.sticky.put(
            key.to_string(),
            StickyAssignment {
                index: idx,
                failures: 0,
            },
        );
        Some(idx)
    }

    /// 报告一次使用结果
    ///
    /// # 参数
    ///
    /// * `key` - 使用该代理的键
    /// * `choice` - `next` 返回的选择
    /// * `success` - 请求是否成功
    pub fn report_result(&self, key: &str, choice: &ProxyChoice, success: bool) {
        let result = if success { "success" } else { "failure" };
        let ProxyChoice::Proxy(record) = choice else {
            counter!("leadrs_proxy_results_total", "result" => result, "proxy" => "direct").increment(1);
            return;
        };
        counter!(
            "leadrs_proxy_results_total",
            "result" => result,
            "proxy" => proxy_fingerprint(&record.address)
        )
        .increment(1);

        let mut state = self.state.lock();
        let Some(idx) = state.proxies.iter().position(|p| p.address == record.address) else {
            return;
        };

        if let Some(assignment) = state.sticky.get_mut(key) {
            if assignment.index == idx {
                assignment.failures = if success { 0 } else { assignment.failures + 1 };
            }
        }

        let threshold = self.config.failure_threshold.max(1);
        let probe_at = Instant::now() + self.config.probe_interval;
        let proxy = &mut state.proxies[idx];
        if success {
            proxy.consecutive_failures = 0;
            proxy.total_successes += 1;
        } else {
            proxy.consecutive_failures += 1;
            proxy.total_failures += 1;
            if proxy.healthy && proxy.consecutive_failures >= threshold {
                proxy.healthy = false;
                proxy.next_probe_at = Some(probe_at);
                warn!(
                    proxy = %proxy_fingerprint(&proxy.address),
                    failures = proxy.consecutive_failures,
                    "Proxy marked unhealthy"
                );
            }
        }
    }

    /// 探测到期的不健康代理
    ///
    /// # 返回值
    ///
    /// 恢复健康的代理数量
    pub async fn run_health_checks(&self, probe: &dyn ProxyProbe) -> usize {
        let now = Instant::now();
        let due: Vec<String> = {
            let state = self.state.lock();
            state
                .proxies
                .iter()
                .filter(|p| !p.healthy && p.next_probe_at.is_some_and(|at| at <= now))
                .map(|p| p.address.clone())
                .collect()
        };

        let mut recovered = 0;
        for address in due {
            let ok = probe.probe(&address).await;
            let mut state = self.state.lock();
            let next_probe = Instant::now() + self.config.probe_interval;
            if let Some(proxy) = state.proxies.iter_mut().find(|p| p.address == address) {
                if ok {
                    proxy.healthy = true;
                    proxy.consecutive_failures = 0;
                    proxy.next_probe_at = None;
                    recovered += 1;
                    info!(proxy = %proxy_fingerprint(&address), "Proxy recovered");
                } else {
                    proxy.next_probe_at = Some(next_probe);
                }
            }
        }
        recovered
    }

    /// 启动后台健康检查任务，令牌取消时退出
    pub fn spawn_health_checks(
        &self,
        probe: Arc<dyn ProxyProbe>,
        interval: Duration,
        token: CancellationToken,
    ) -> JoinHandle<()> {
        let manager = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        debug!("Proxy health checks stopped");
                        break;
                    }
                    _ = tokio::time::sleep(interval) => {
                        manager.run_health_checks(probe.as_ref()).await;
                    }
                }
            }
        })
    }

    pub fn stats(&self) -> ProxyPoolStats {
        let state = self.state.lock();
        let healthy = state.proxies.iter().filter(|p| p.healthy).count();
        ProxyPoolStats {
            total: state.proxies.len(),
            healthy,
            unhealthy: state.proxies.len() - healthy,
            proxies: state.proxies.clone(),
        }
    }
}
