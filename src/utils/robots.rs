// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use anyhow::Result;
use async_trait::async_trait;
use lru::LruCache;
use parking_lot::Mutex;
use reqwest::Client;
use robotstxt::DefaultMatcher;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use url::Url;

use crate::utils::retry_policy::RetryPolicy;

/// Robots.txt检查器接口
#[async_trait]
pub trait RobotsCheckerTrait: Send + Sync {
    /// 检查URL是否被允许访问
    async fn is_allowed(&self, url_str: &str, user_agent: &str) -> Result<bool>;
    /// 获取爬取延迟
    async fn get_crawl_delay(&self, url_str: &str, user_agent: &str) -> Result<Option<Duration>>;
}

/// 缓存的Robots.txt内容
#[derive(Clone)]
struct CachedRobots {
    content: String,
    expires_at: Instant,
}

const CACHE_TTL: Duration = Duration::from_secs(3600);

/// Robots.txt检查器
///
/// 每个站点的 robots.txt 只拉取一次并缓存一小时；拉取失败按“全部允许”处理。
#[derive(Clone)]
pub struct RobotsChecker {
    /// HTTP客户端
    client: Client,

    /// 按 robots.txt 地址缓存
    cache: Arc<Mutex<LruCache<String, CachedRobots>>>,

    /// 重试策略
    retry_policy: RetryPolicy,

    /// 单次请求超时
    timeout: Duration,
}

#[async_trait]
impl RobotsCheckerTrait for RobotsChecker {
    async fn is_allowed(&self, url_str: &str, user_agent: &str) -> Result<bool> {
        let content = self.get_robots_content(url_str).await?;
        let url = Url::parse(url_str)?;
        let mut matcher = DefaultMatcher::default();
        Ok(matcher.one_agent_allowed_by_robots(&content, user_agent, url.as_str()))
    }

    async fn get_crawl_delay(&self, url_str: &str, user_agent: &str) -> Result<Option<Duration>> {
        let content = self.get_robots_content(url_str).await?;
        Ok(parse_crawl_delay(&content, user_agent))
    }
}

impl Default for RobotsChecker {
    fn default() -> Self {
        Self::new(Client::new(), 256)
    }
}

impl RobotsChecker {
    /// 创建新的Robots检查器实例
    ///
    /// # 参数
    ///
    /// * `client` - 共享的HTTP客户端
    /// * `capacity` - 缓存的站点数量上限
    pub fn new(client: Client, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            client,
            cache: Arc::new(Mutex::new(LruCache::new(capacity))),
            retry_policy: RetryPolicy::fast(),
            timeout: Duration::from_secs(5),
        }
    }

    /// 获取Robots.txt内容（带缓存）
    async fn get_robots_content(&self, url_str: &str) -> Result<String> {
        let url = Url::parse(url_str)?;
        let host = url
            .host_str()
            .ok_or_else(|| anyhow::anyhow!("Invalid URL: {}", url_str))?;
        let robots_url = match url.port() {
            Some(port) => format!("{}://{}:{}/robots.txt", url.scheme(), host, port),
            None => format!("{}://{}/robots.txt", url.scheme(), host),
        };

        {
            let mut cache = self.cache.lock();
            if let Some(cached) = cache.get(&robots_url) {
                if cached.expires_at > Instant::now() {
                    return Ok(cached.content.clone());
                }
            }
            cache.pop(&robots_url);
        }

        let content = self.fetch_with_retry(&robots_url).await;

        self.cache.lock().put(
            robots_url,
            CachedRobots {
                content: content.clone(),
                expires_at: Instant::now() + CACHE_TTL,
            },
        );

        Ok(content)
    }

    async fn fetch_with_retry(&self, robots_url: &str) -> String {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let response = self
                .client
                .get(robots_url)
                .timeout(self.timeout)
                .send()
                .await;

            let retryable = match response {
                Ok(resp) if resp.status().is_success() => {
                    return resp.text().await.unwrap_or_default();
                }
                Ok(resp) if resp.status().is_server_error() => {
                    tracing::debug!(url = robots_url, status = %resp.status(), "robots.txt server error");
                    true
                }
                // 404/403 等视为没有 robots.txt
                Ok(_) => return String::new(),
                Err(e) => {
                    tracing::debug!(url = robots_url, error = %e, "robots.txt request failed");
                    true
                }
            };

            if !retryable || !self.retry_policy.should_retry(attempt) {
                tracing::warn!(url = robots_url, "Failed to fetch robots.txt, allowing all");
                return String::new();
            }
            tokio::time::sleep(self.retry_policy.calculate_backoff(attempt)).await;
        }
    }
}

/// 解析Crawl-delay指令
fn parse_crawl_delay(content: &str, user_agent: &str) -> Option<Duration> {
    let mut current_agent_matched = false;
    let mut specific_agent_found = false;
    let mut delay: Option<f64> = None;

    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let key = key.trim().to_lowercase();
        let value = value.trim();

        if key == "user-agent" {
            if value == "*" {
                current_agent_matched = !specific_agent_found;
            } else if user_agent.to_lowercase().contains(&value.to_lowercase()) {
                current_agent_matched = true;
                specific_agent_found = true;
                delay = None;
            } else {
                current_agent_matched = false;
            }
        } else if key == "crawl-delay" && current_agent_matched {
            if let Ok(d) = value.parse::<f64>() {
                delay = Some(d);
            }
        }
    }

    delay.filter(|d| d.is_finite() && *d >= 0.0).map(Duration::from_secs_f64)
}
