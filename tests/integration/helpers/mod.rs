// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use leadrs::domain::models::event::ProgressEvent;
use leadrs::domain::models::job::{JobSubmission, JobType, SearchParameters};
use leadrs::domain::services::job_manager::JobManager;
use leadrs::domain::services::pipeline::PipelineConfig;
use leadrs::engines::factory::{ScraperFactory, SourceConfig};
use leadrs::engines::http_fetcher::{FetcherConfig, HttpFetcher};
use leadrs::engines::proxy_manager::ProxyManager;
use leadrs::engines::rate_limiter::{RateLimiter, RateLimiterConfig};
use leadrs::infrastructure::notifications::BroadcastPublisher;
use leadrs::infrastructure::repositories::MemoryLeadRepository;
use leadrs::utils::retry_policy::RetryPolicy;
use leadrs::workers::{Orchestrator, OrchestratorConfig};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::Receiver;

pub struct TestApp {
    pub orchestrator: Orchestrator,
    pub repository: MemoryLeadRepository,
    pub events: Receiver<ProgressEvent>,
}

/// 指向 mock 服务器的数据源配置
pub fn mock_sources(base: &str) -> SourceConfig {
    SourceConfig {
        search_url_template: format!("{}/search?q={{query}}&loc={{location}}&page={{page}}", base),
        directory_url_template: format!("{}/directory?q={{query}}&pg={{page}}", base),
        network_base_url: base.to_string(),
        ..SourceConfig::default()
    }
}

/// 创建测试应用，重试和限流退避都缩短到毫秒级
pub fn create_test_app(sources: SourceConfig) -> TestApp {
    let publisher = BroadcastPublisher::new(1024);
    let events = publisher.subscribe();
    let jobs = JobManager::new(Arc::new(publisher));

    let fetcher = Arc::new(HttpFetcher::new(FetcherConfig {
        request_timeout: Duration::from_secs(5),
        ..FetcherConfig::default()
    }));
    let factory = ScraperFactory::with_builtin(fetcher, &sources);
    let rate_limiter = RateLimiter::new(RateLimiterConfig {
        max_backoff: Duration::from_millis(10),
        ..RateLimiterConfig::default()
    });
    let repository = MemoryLeadRepository::new();

    let orchestrator = Orchestrator::new(
        jobs,
        factory,
        rate_limiter,
        ProxyManager::direct(),
        Arc::new(repository.clone()),
        PipelineConfig::default(),
        OrchestratorConfig {
            workers: 2,
            retry: RetryPolicy {
                max_retries: 2,
                initial_backoff: Duration::from_millis(10),
                max_backoff: Duration::from_millis(50),
                enable_jitter: false,
                ..RetryPolicy::default()
            },
            ..OrchestratorConfig::default()
        },
    );

    TestApp {
        orchestrator,
        repository,
        events,
    }
}

pub fn submission(job_type: JobType, params: &[(&str, Value)]) -> JobSubmission {
    JobSubmission {
        job_type,
        search_parameters: params
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect::<SearchParameters>(),
        max_results: 50,
        filters: SearchParameters::new(),
    }
}

pub fn drain(rx: &mut Receiver<ProgressEvent>) -> Vec<ProgressEvent> {
    let mut events = Vec::new();
    while let Ok(e) = rx.try_recv() {
        events.push(e);
    }
    events
}
