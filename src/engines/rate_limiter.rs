// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use dashmap::DashMap;
use metrics::histogram;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::utils::url_utils::rate_limit_key;

const WINDOW: Duration = Duration::from_secs(60);
const MIN_WAIT: Duration = Duration::from_millis(1);

/// 限流错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RateLimitError {
    /// 在截止时间内无法获得请求槽位
    #[error("Rate limit exceeded for {key}: no slot within {deadline:?}")]
    RateLimitExceeded { key: String, deadline: Duration },
}

/// 自适应限流配置
#[derive(Debug, Clone)]
pub struct AdaptiveConfig {
    pub enabled: bool,
    /// 最近结果窗口大小
    pub window: usize,
    /// 判断前所需的最少样本数
    pub min_samples: usize,
    /// 失败率阈值
    pub failure_rate_threshold: f64,
    /// 平均延迟阈值
    pub latency_threshold: Duration,
    /// 连续成功多少次后收窄
    pub success_window: u32,
    /// 放慢倍数上限
    pub max_slowdown: f64,
}

impl Default for AdaptiveConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            window: 20,
            min_samples: 5,
            failure_rate_threshold: 0.3,
            latency_threshold: Duration::from_secs(5),
            success_window: 10,
            max_slowdown: 8.0,
        }
    }
}

/// 限流器配置
#[derive(Debug, Clone)]
pub struct RateLimiterConfig {
    /// 每个键每分钟请求数
    pub requests_per_minute: u32,
    /// 令牌桶容量
    pub burst: u32,
    /// 所有键共享的每分钟请求数
    pub global_requests_per_minute: u32,
    /// 获取槽位的最长等待时间
    pub acquire_timeout: Duration,
    /// 连续失败退避的底数（秒）
    pub backoff_factor: f64,
    pub max_backoff: Duration,
    pub adaptive: AdaptiveConfig,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: 60,
            burst: 60,
            global_requests_per_minute: 600,
            acquire_timeout: Duration::from_secs(120),
            backoff_factor: 2.0,
            max_backoff: Duration::from_secs(300),
            adaptive: AdaptiveConfig::default(),
        }
    }
}

/// 令牌桶加一分钟滑动日志
#[derive(Debug)]
struct SlotWindow {
    tokens: f64,
    capacity: f64,
    last_refill: Instant,
    log: VecDeque<Instant>,
}

impl SlotWindow {
    fn new(capacity: u32, now: Instant) -> Self {
        let capacity = capacity.max(1) as f64;
        Self {
            tokens: capacity,
            capacity,
            last_refill: now,
            log: VecDeque::new(),
        }
    }

    fn refill(&mut self, now: Instant, per_minute: f64) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * per_minute / 60.0).min(self.capacity);
        self.last_refill = now;
    }

    fn prune(&mut self, now: Instant) {
        while let Some(front) = self.log.front() {
            if now.saturating_duration_since(*front) >= WINDOW {
                self.log.pop_front();
            } else {
                break;
            }
        }
    }

    /// 尝试获取一个槽位
    ///
    /// # 返回值
    ///
    /// * `None` - 已获取
    /// * `Some(Duration)` - 需要等待的时间
    fn poll(&mut self, now: Instant, per_minute: f64) -> Option<Duration> {
        self.refill(now, per_minute);
        self.prune(now);

        let mut wait = Duration::ZERO;
        if self.tokens < 1.0 {
            let secs = (1.0 - self.tokens) * 60.0 / per_minute;
            wait = wait.max(Duration::from_secs_f64(secs));
        }
        let cap = per_minute.floor().max(1.0) as usize;
        if self.log.len() >= cap {
            if let Some(oldest) = self.log.front() {
                wait = wait.max(WINDOW.saturating_sub(now.saturating_duration_since(*oldest)));
            }
        }

        if wait > Duration::ZERO {
            return Some(wait.max(MIN_WAIT));
        }
        self.tokens -= 1.0;
        self.log.push_back(now);
        None
    }

    /// 归还 `granted_at` 时获取的槽位
    fn refund(&mut self, granted_at: Instant) {
        self.tokens = (self.tokens + 1.0).min(self.capacity);
        if let Some(pos) = self.log.iter().rposition(|t| *t == granted_at) {
            self.log.remove(pos);
        }
    }
}

/// 每个键的限流状态
#[derive(Debug)]
struct RateLimitState {
    window: SlotWindow,
    slowdown: f64,
    outcomes: VecDeque<(bool, Duration)>,
    consecutive_failures: u32,
    consecutive_successes: u32,
    last_failure: Option<Instant>,
    total_granted: u64,
    total_wait: Duration,
}

impl RateLimitState {
    fn new(config: &RateLimiterConfig, now: Instant) -> Self {
        Self {
            window: SlotWindow::new(config.burst, now),
            slowdown: 1.0,
            outcomes: VecDeque::new(),
            consecutive_failures: 0,
            consecutive_successes: 0,
            last_failure: None,
            total_granted: 0,
            total_wait: Duration::ZERO,
        }
    }

    fn backoff_remaining(&self, now: Instant, config: &RateLimiterConfig) -> Duration {
        let Some(last_failure) = self.last_failure else {
            return Duration::ZERO;
        };
        if self.consecutive_failures == 0 {
            return Duration::ZERO;
        }
        let exponent = self.consecutive_failures.min(32) as i32;
        let secs = config.backoff_factor.powi(exponent);
        let backoff = if secs.is_nan() {
            config.max_backoff
        } else {
            Duration::from_secs_f64(secs.clamp(0.0, config.max_backoff.as_secs_f64()))
        };
        backoff.saturating_sub(now.saturating_duration_since(last_failure))
    }

    fn effective_rpm(&self, config: &RateLimiterConfig) -> f64 {
        (config.requests_per_minute.max(1) as f64) / self.slowdown
    }

    fn poll(&mut self, now: Instant, config: &RateLimiterConfig) -> Option<Duration> {
        let backoff = self.backoff_remaining(now, config);
        if backoff > Duration::ZERO {
            return Some(backoff);
        }
        let rpm = self.effective_rpm(config);
        let wait = self.window.poll(now, rpm);
        if wait.is_none() {
            self.total_granted += 1;
        }
        wait
    }

    fn refund(&mut self, granted_at: Instant) {
        self.window.refund(granted_at);
        self.total_granted = self.total_granted.saturating_sub(1);
    }

    fn widen_if_degraded(&mut self, adaptive: &AdaptiveConfig) -> bool {
        if self.outcomes.len() < adaptive.min_samples {
            return false;
        }
        let samples = self.outcomes.len() as f64;
        let failures = self.outcomes.iter().filter(|(ok, _)| !ok).count() as f64;
        let mean_latency = self
            .outcomes
            .iter()
            .map(|(_, latency)| latency.as_secs_f64())
            .sum::<f64>()
            / samples;

        if failures / samples > adaptive.failure_rate_threshold
            || mean_latency > adaptive.latency_threshold.as_secs_f64()
        {
            self.slowdown = (self.slowdown * 2.0).min(adaptive.max_slowdown);
            // 下一次放慢需要新的观测
            self.outcomes.clear();
            self.consecutive_successes = 0;
            return true;
        }
        false
    }
}

/// 已获取但全局桶尚未放行的键槽位
///
/// 未确认就被丢弃（全局等待超时或调用方取消）时归还给键桶
struct PendingSlot<'a> {
    state: &'a Mutex<RateLimitState>,
    granted_at: Instant,
    committed: bool,
}

impl Drop for PendingSlot<'_> {
    fn drop(&mut self) {
        if !self.committed {
            self.state.lock().refund(self.granted_at);
        }
    }
}

/// 限流统计
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RateLimitStats {
    pub key: String,
    pub tokens_available: f64,
    pub requests_last_minute: usize,
    pub effective_requests_per_minute: f64,
    pub slowdown_factor: f64,
    pub consecutive_failures: u32,
    pub backoff_remaining: Duration,
    pub total_granted: u64,
    pub total_wait: Duration,
}

/// 限流器
///
/// 每个键（通常是目标域名）一个令牌桶，叠加一分钟滑动窗口计数，
/// 另有一个所有键共享的全局桶，两者都放行才能发出请求。
/// 自适应模式下根据最近的失败率和延迟放慢或恢复补充速度。
#[derive(Clone)]
pub struct RateLimiter {
    config: Arc<RateLimiterConfig>,
    states: Arc<DashMap<String, Arc<Mutex<RateLimitState>>>>,
    global: Arc<Mutex<SlotWindow>>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(RateLimiterConfig::default())
    }
}

impl RateLimiter {
    pub fn new(config: RateLimiterConfig) -> Self {
        let global = SlotWindow::new(config.global_requests_per_minute, Instant::now());
        Self {
            config: Arc::new(config),
            states: Arc::new(DashMap::new()),
            global: Arc::new(Mutex::new(global)),
        }
    }

    /// 将URL转换为限流键
    pub fn key_for_url(url: &str) -> String {
        rate_limit_key(url)
    }

    fn state(&self, key: &str) -> Arc<Mutex<RateLimitState>> {
        self.states
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(RateLimitState::new(&self.config, Instant::now()))))
            .clone()
    }

    /// 获取一个请求槽位
    ///
    /// 依次等待键桶和全局桶。若所需等待会超过配置的截止时间，立即返回错误。
    /// 全局桶未放行前失败或被取消时，已占用的键槽位会被归还。
    ///
    /// # 参数
    ///
    /// * `key` - 限流键
    ///
    /// # 返回值
    ///
    /// * `Ok(Duration)` - 实际等待的时间
    /// * `Err(RateLimitError)` - 截止时间内无法获得槽位
    pub async fn acquire(&self, key: &str) -> Result<Duration, RateLimitError> {
        let started = Instant::now();
        let deadline = started + self.config.acquire_timeout;
        let state = self.state(key);

        let granted_at = loop {
            let now = Instant::now();
            let Some(wait) = state.lock().poll(now, &self.config) else {
                break now;
            };
            self.wait_or_fail(key, now, wait, deadline).await?;
        };
        let mut pending = PendingSlot {
            state: &state,
            granted_at,
            committed: false,
        };

        let global_rpm = self.config.global_requests_per_minute.max(1) as f64;
        loop {
            let now = Instant::now();
            let Some(wait) = self.global.lock().poll(now, global_rpm) else {
                break;
            };
            self.wait_or_fail(key, now, wait, deadline).await?;
        }
        pending.committed = true;
        drop(pending);

        let waited = started.elapsed();
        state.lock().total_wait += waited;
        histogram!("leadrs_rate_limit_wait_seconds").record(waited.as_secs_f64());
        if waited > Duration::ZERO {
            debug!(key = key, waited_ms = waited.as_millis() as u64, "Rate limit slot acquired after wait");
        }
        Ok(waited)
    }

    async fn wait_or_fail(
        &self,
        key: &str,
        now: Instant,
        wait: Duration,
        deadline: Instant,
    ) -> Result<(), RateLimitError> {
        if now + wait > deadline {
            warn!(key = key, wait_ms = wait.as_millis() as u64, "Rate limit deadline would be exceeded");
            return Err(RateLimitError::RateLimitExceeded {
                key: key.to_string(),
                deadline: self.config.acquire_timeout,
            });
        }
        tokio::time::sleep(wait).await;
        Ok(())
    }

    /// 记录一次请求结果
    ///
    /// # 参数
    ///
    /// * `key` - 限流键
    /// * `latency` - 请求耗时
    /// * `success` - 是否成功
    pub fn record_outcome(&self, key: &str, latency: Duration, success: bool) {
        let state = self.state(key);
        let mut state = state.lock();
        let adaptive = &self.config.adaptive;

        if success {
            state.consecutive_failures = 0;
            state.last_failure = None;
            state.consecutive_successes += 1;
        } else {
            state.consecutive_failures += 1;
            state.consecutive_successes = 0;
            state.last_failure = Some(Instant::now());
        }

        if !adaptive.enabled {
            return;
        }

        state.outcomes.push_back((success, latency));
        while state.outcomes.len() > adaptive.window.max(1) {
            state.outcomes.pop_front();
        }

        if state.widen_if_degraded(adaptive) {
            warn!(key = key, slowdown = state.slowdown, "Target degraded, slowing down");
        } else if success && state.slowdown > 1.0 && state.consecutive_successes >= adaptive.success_window {
            state.slowdown = (state.slowdown / 2.0).max(1.0);
            state.consecutive_successes = 0;
            debug!(key = key, slowdown = state.slowdown, "Target recovered, speeding up");
        }
    }

    /// 获取某个键的统计信息
    pub fn stats(&self, key: &str) -> Option<RateLimitStats> {
        let state = self.states.get(key)?.clone();
        let mut state = state.lock();
        let now = Instant::now();
        let rpm = state.effective_rpm(&self.config);
        state.window.refill(now, rpm);
        state.window.prune(now);
        Some(RateLimitStats {
            key: key.to_string(),
            tokens_available: state.window.tokens,
            requests_last_minute: state.window.log.len(),
            effective_requests_per_minute: rpm,
            slowdown_factor: state.slowdown,
            consecutive_failures: state.consecutive_failures,
            backoff_remaining: state.backoff_remaining(now, &self.config),
            total_granted: state.total_granted,
            total_wait: state.total_wait,
        })
    }

    /// 清除某个键的状态
    pub fn reset(&self, key: &str) {
        self.states.remove(key);
    }
}
