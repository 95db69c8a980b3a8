// Copyright 2025 Kirky.X
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use config::builder::DefaultState;
use config::{Config, ConfigBuilder, ConfigError, Environment, File, FileFormat};
use serde::Deserialize;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

use crate::domain::services::cleaner::CleaningConfig;
use crate::domain::services::deduplicator::{DeduplicationConfig, MatchField};
use crate::domain::services::lead_scorer::{
    CategoryMaxima, LeadScorer, ScoringConfig, ScoringError, SignalPoints,
};
use crate::domain::services::pipeline::PipelineConfig;
use crate::engines::factory::SourceConfig;
use crate::engines::http_fetcher::FetcherConfig;
use crate::engines::proxy_manager::{ProxyManagerConfig, RotationStrategy};
use crate::engines::rate_limiter::{AdaptiveConfig, RateLimiterConfig};
use crate::engines::traits::ExtractorOptions;
use crate::utils::retry_policy::RetryPolicy;
use crate::workers::orchestrator::OrchestratorConfig;

/// 配置错误
#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Scoring configuration error: {0}")]
    Scoring(#[from] ScoringError),

    #[error("Invalid setting {key}: {reason}")]
    Invalid { key: String, reason: String },
}

fn invalid(key: &str, reason: impl Into<String>) -> SettingsError {
    SettingsError::Invalid {
        key: key.to_string(),
        reason: reason.into(),
    }
}

/// 应用程序配置设置
///
/// 包含抓取、限流、代理、编排、去重、评分、清洗和指标等所有配置项
#[derive(Debug, Deserialize)]
pub struct Settings {
    /// 抓取配置
    pub scraping: ScrapingSettings,
    /// 速率限制配置
    pub rate_limiting: RateLimitingSettings,
    /// 代理配置
    pub proxy: ProxySettings,
    /// 编排器配置
    pub orchestrator: OrchestratorSettings,
    /// 去重配置
    pub dedup: DedupSettings,
    /// 评分配置，未提供时使用内置分值
    #[serde(default)]
    pub scoring: ScoringSettings,
    /// 清洗配置
    pub cleaning: CleaningSettings,
    /// 指标导出配置
    pub metrics: MetricsSettings,
}

/// 抓取配置设置
#[derive(Debug, Deserialize)]
pub struct ScrapingSettings {
    pub user_agent: String,
    /// 单次请求超时时间（秒）
    pub request_timeout_secs: u64,
    /// 是否遵守 robots.txt
    pub respect_robots: bool,
    /// 每个目标最多抓取的页面数
    pub max_pages: u32,
    /// 搜索列表地址模板，`{query}` `{location}` `{page}` 会被替换
    pub search_url_template: String,
    /// 企业目录地址模板
    pub directory_url_template: String,
    /// 职业社交网络的基础地址
    pub network_base_url: String,
    /// 职业社交网络的会话Cookie
    pub network_session_cookie: Option<String>,
}

/// 速率限制配置设置
#[derive(Debug, Deserialize)]
pub struct RateLimitingSettings {
    /// 每个域名每分钟请求数
    pub requests_per_minute: u32,
    /// 令牌桶容量
    pub burst: u32,
    /// 全局每分钟请求数
    pub global_requests_per_minute: u32,
    /// 获取槽位的最长等待时间（秒）
    pub acquire_timeout_secs: u64,
    pub backoff_factor: f64,
    pub max_backoff_secs: u64,
    /// 是否根据失败率和延迟自适应调整
    pub adaptive: bool,
}

/// 代理配置设置
#[derive(Debug, Deserialize)]
pub struct ProxySettings {
    /// 代理地址列表，为空时直连
    #[serde(default)]
    pub addresses: Vec<String>,
    pub strategy: RotationStrategy,
    /// 连续失败多少次后标记为不健康
    pub failure_threshold: u32,
    pub sticky_failure_threshold: u32,
    /// 不健康代理的探测间隔（秒）
    pub probe_interval_secs: u64,
    /// 固定分配最多保留的键数
    pub max_sticky_keys: usize,
    /// 健康检查使用的地址
    pub health_check_url: String,
    /// 健康检查任务的运行间隔（秒）
    pub health_check_interval_secs: u64,
}

/// 编排器配置设置
#[derive(Debug, Deserialize)]
pub struct OrchestratorSettings {
    /// 每个任务的工作协程数
    pub workers: usize,
    /// 每个任务最多解析的目标数
    pub max_targets: usize,
    pub max_retries: u32,
    /// 初始退避时间（毫秒）
    pub initial_backoff_ms: u64,
    /// 最大退避时间（秒）
    pub max_backoff_secs: u64,
    pub estimated_secs_per_target: u64,
    /// 内存中保留的已结束任务数
    pub retained_jobs: usize,
}

/// 去重配置设置
#[derive(Debug, Deserialize)]
pub struct DedupSettings {
    /// 相似度阈值 (0.0-1.0)
    pub similarity_threshold: f64,
    /// 参与模糊匹配的公司字段：name、phone、location
    pub company_fields: Vec<String>,
}

/// 评分配置设置
#[derive(Debug, Default, Deserialize)]
pub struct ScoringSettings {
    pub maxima: Option<CategoryMaxima>,
    pub points: Option<SignalPoints>,
    pub high_value_industries: Option<Vec<String>>,
}

/// 清洗配置设置
#[derive(Debug, Deserialize)]
pub struct CleaningSettings {
    pub default_country_code: String,
    pub min_phone_digits: usize,
    pub max_phone_digits: usize,
    pub min_company_name_len: usize,
}

/// 指标导出配置设置
#[derive(Debug, Deserialize)]
pub struct MetricsSettings {
    pub enabled: bool,
    /// Prometheus 导出器监听地址
    pub listen_address: String,
}

impl Settings {
    /// 创建新的配置实例
    ///
    /// 依次叠加内置默认值、`config/default`、`config/{APP_ENVIRONMENT}` 和
    /// `LEADRS__SECTION__KEY` 形式的环境变量
    ///
    /// # Returns
    ///
    /// * `Ok(Settings)` - 成功加载的配置
    /// * `Err(SettingsError)` - 配置加载失败
    pub fn new() -> Result<Self, SettingsError> {
        let env = std::env::var("APP_ENVIRONMENT").unwrap_or_else(|_| "default".to_string());
        let builder = Self::defaults()?
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", env)).required(false))
            .add_source(
                Environment::with_prefix("LEADRS")
                    .prefix_separator("__")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("proxy.addresses")
                    .with_list_parse_key("dedup.company_fields")
                    .try_parsing(true),
            );

        Ok(builder.build()?.try_deserialize()?)
    }

    /// 从 TOML 文本加载配置，未出现的键使用默认值
    pub fn from_toml(contents: &str) -> Result<Self, SettingsError> {
        let builder = Self::defaults()?.add_source(File::from_str(contents, FileFormat::Toml));
        Ok(builder.build()?.try_deserialize()?)
    }

    fn defaults() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
        let fetcher = FetcherConfig::default();
        let sources = SourceConfig::default();
        let limiter = RateLimiterConfig::default();
        let proxy = ProxyManagerConfig::default();
        let orchestrator = OrchestratorConfig::default();
        let cleaning = CleaningConfig::default();

        Config::builder()
            // Scraping
            .set_default("scraping.user_agent", fetcher.user_agent)?
            .set_default("scraping.request_timeout_secs", fetcher.request_timeout.as_secs())?
            .set_default("scraping.respect_robots", sources.options.respect_robots)?
            .set_default("scraping.max_pages", sources.options.max_pages)?
            .set_default("scraping.search_url_template", sources.search_url_template)?
            .set_default("scraping.directory_url_template", sources.directory_url_template)?
            .set_default("scraping.network_base_url", sources.network_base_url)?
            // Rate limiting
            .set_default("rate_limiting.requests_per_minute", limiter.requests_per_minute)?
            .set_default("rate_limiting.burst", limiter.burst)?
            .set_default(
                "rate_limiting.global_requests_per_minute",
                limiter.global_requests_per_minute,
            )?
            .set_default("rate_limiting.acquire_timeout_secs", limiter.acquire_timeout.as_secs())?
            .set_default("rate_limiting.backoff_factor", limiter.backoff_factor)?
            .set_default("rate_limiting.max_backoff_secs", limiter.max_backoff.as_secs())?
            .set_default("rate_limiting.adaptive", limiter.adaptive.enabled)?
            // Proxy
            .set_default("proxy.addresses", Vec::<String>::new())?
            .set_default("proxy.strategy", "round_robin")?
            .set_default("proxy.failure_threshold", proxy.failure_threshold)?
            .set_default("proxy.sticky_failure_threshold", proxy.sticky_failure_threshold)?
            .set_default("proxy.probe_interval_secs", proxy.probe_interval.as_secs())?
            .set_default("proxy.max_sticky_keys", proxy.max_sticky_keys as u64)?
            .set_default("proxy.health_check_url", "https://www.gstatic.com/generate_204")?
            .set_default("proxy.health_check_interval_secs", 60)?
            // Orchestrator
            .set_default("orchestrator.workers", orchestrator.workers as u64)?
            .set_default("orchestrator.max_targets", orchestrator.max_targets as u64)?
            .set_default("orchestrator.max_retries", orchestrator.retry.max_retries)?
            .set_default(
                "orchestrator.initial_backoff_ms",
                orchestrator.retry.initial_backoff.as_millis() as u64,
            )?
            .set_default(
                "orchestrator.max_backoff_secs",
                orchestrator.retry.max_backoff.as_secs(),
            )?
            .set_default(
                "orchestrator.estimated_secs_per_target",
                orchestrator.estimated_secs_per_target,
            )?
            .set_default("orchestrator.retained_jobs", orchestrator.retained_jobs as u64)?
            // Dedup
            .set_default("dedup.similarity_threshold", 0.85)?
            .set_default("dedup.company_fields", vec!["name", "phone"])?
            // Cleaning
            .set_default("cleaning.default_country_code", cleaning.default_country_code)?
            .set_default("cleaning.min_phone_digits", cleaning.min_phone_digits as u64)?
            .set_default("cleaning.max_phone_digits", cleaning.max_phone_digits as u64)?
            .set_default("cleaning.min_company_name_len", cleaning.min_company_name_len as u64)?
            // Metrics
            .set_default("metrics.enabled", true)?
            .set_default("metrics.listen_address", "0.0.0.0:9000")
    }

    pub fn fetcher_config(&self) -> FetcherConfig {
        FetcherConfig {
            user_agent: self.scraping.user_agent.clone(),
            request_timeout: Duration::from_secs(self.scraping.request_timeout_secs.max(1)),
        }
    }

    pub fn source_config(&self) -> SourceConfig {
        SourceConfig {
            search_url_template: self.scraping.search_url_template.clone(),
            directory_url_template: self.scraping.directory_url_template.clone(),
            network_base_url: self.scraping.network_base_url.clone(),
            network_session_cookie: self
                .scraping
                .network_session_cookie
                .clone()
                .filter(|c| !c.trim().is_empty()),
            options: ExtractorOptions {
                respect_robots: self.scraping.respect_robots,
                max_pages: self.scraping.max_pages.max(1),
            },
        }
    }

    /// 构造限流配置
    ///
    /// # Returns
    ///
    /// * `Err(SettingsError)` - 退避底数不是有限值或小于 1
    pub fn rate_limiter_config(&self) -> Result<RateLimiterConfig, SettingsError> {
        let s = &self.rate_limiting;
        if !s.backoff_factor.is_finite() || s.backoff_factor < 1.0 {
            return Err(invalid(
                "rate_limiting.backoff_factor",
                format!("{} must be a finite number of at least 1.0", s.backoff_factor),
            ));
        }
        Ok(RateLimiterConfig {
            requests_per_minute: s.requests_per_minute,
            burst: s.burst,
            global_requests_per_minute: s.global_requests_per_minute,
            acquire_timeout: Duration::from_secs(s.acquire_timeout_secs),
            backoff_factor: s.backoff_factor,
            max_backoff: Duration::from_secs(s.max_backoff_secs),
            adaptive: AdaptiveConfig {
                enabled: s.adaptive,
                ..AdaptiveConfig::default()
            },
        })
    }

    pub fn proxy_manager_config(&self) -> ProxyManagerConfig {
        ProxyManagerConfig {
            strategy: self.proxy.strategy,
            failure_threshold: self.proxy.failure_threshold.max(1),
            sticky_failure_threshold: self.proxy.sticky_failure_threshold.max(1),
            probe_interval: Duration::from_secs(self.proxy.probe_interval_secs),
            max_sticky_keys: self.proxy.max_sticky_keys.max(1),
        }
    }

    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        let s = &self.orchestrator;
        OrchestratorConfig {
            workers: s.workers.max(1),
            max_targets: s.max_targets.max(1),
            retry: RetryPolicy {
                max_retries: s.max_retries,
                initial_backoff: Duration::from_millis(s.initial_backoff_ms),
                max_backoff: Duration::from_secs(s.max_backoff_secs),
                ..RetryPolicy::default()
            },
            estimated_secs_per_target: s.estimated_secs_per_target,
            retained_jobs: s.retained_jobs.max(1),
        }
    }

    /// 构造管道配置
    ///
    /// # Returns
    ///
    /// * `Err(SettingsError)` - 评分上限之和超过 100、阈值越界或字段名未知
    pub fn pipeline_config(&self) -> Result<PipelineConfig, SettingsError> {
        let threshold = self.dedup.similarity_threshold;
        if !(0.0..=1.0).contains(&threshold) {
            return Err(invalid(
                "dedup.similarity_threshold",
                format!("{} is outside 0.0-1.0", threshold),
            ));
        }
        let company_fields = self
            .dedup
            .company_fields
            .iter()
            .map(|field| match field.trim().to_lowercase().as_str() {
                "name" => Ok(MatchField::Name),
                "phone" => Ok(MatchField::Phone),
                "location" => Ok(MatchField::Location),
                other => Err(invalid(
                    "dedup.company_fields",
                    format!("unknown field {:?}", other),
                )),
            })
            .collect::<Result<Vec<_>, _>>()?;

        let defaults = ScoringConfig::default();
        let scoring = ScoringConfig {
            maxima: self.scoring.maxima.clone().unwrap_or(defaults.maxima),
            points: self.scoring.points.clone().unwrap_or(defaults.points),
            high_value_industries: self
                .scoring
                .high_value_industries
                .as_ref()
                .map(|list| list.iter().map(|s| s.to_lowercase()).collect())
                .unwrap_or(defaults.high_value_industries),
        };

        let c = &self.cleaning;
        if c.min_phone_digits > c.max_phone_digits {
            return Err(invalid(
                "cleaning.min_phone_digits",
                "must not exceed cleaning.max_phone_digits",
            ));
        }

        Ok(PipelineConfig {
            cleaning: CleaningConfig {
                default_country_code: c.default_country_code.clone(),
                min_phone_digits: c.min_phone_digits,
                max_phone_digits: c.max_phone_digits,
                min_company_name_len: c.min_company_name_len,
            },
            dedup: DeduplicationConfig {
                similarity_threshold: threshold,
                company_fields,
            },
            scorer: LeadScorer::new(scoring)?,
        })
    }

    /// 指标导出器监听地址，未启用时返回None
    pub fn metrics_address(&self) -> Result<Option<SocketAddr>, SettingsError> {
        if !self.metrics.enabled {
            return Ok(None);
        }
        self.metrics
            .listen_address
            .parse()
            .map(Some)
            .map_err(|e| invalid("metrics.listen_address", format!("{}", e)))
    }
}

#[cfg(test)]
#[path = "settings_test.rs"]
mod tests;
