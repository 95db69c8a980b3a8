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

use anyhow::Context;
use leadrs::config::settings::Settings;
use leadrs::domain::models::event::ProgressEventType;
use leadrs::domain::models::job::JobSubmission;
use leadrs::domain::services::job_manager::JobManager;
use leadrs::engines::factory::ScraperFactory;
use leadrs::engines::http_fetcher::HttpFetcher;
use leadrs::engines::proxy_manager::{HttpProxyProbe, ProxyManager};
use leadrs::engines::rate_limiter::RateLimiter;
use leadrs::infrastructure::notifications::BroadcastPublisher;
use leadrs::infrastructure::repositories::MemoryLeadRepository;
use leadrs::workers::Orchestrator;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use leadrs::utils::telemetry;

/// 主函数
///
/// 读取任务提交文件（`-` 表示标准输入），执行一次抓取任务，
/// 结束后把任务快照和线索以 JSON 输出到标准输出
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Initialize logging
    telemetry::init_telemetry();
    info!("Starting leadrs...");

    // 2. Load configuration
    let settings = Settings::new().context("failed to load configuration")?;
    info!("Configuration loaded");

    if let Some(addr) = settings.metrics_address()? {
        leadrs::infrastructure::metrics::init_metrics(addr);
    }

    // 3. Read the job submission
    let path = std::env::args()
        .nth(1)
        .context("usage: leadrs <submission.json | ->")?;
    let raw = if path == "-" {
        let mut buf = String::new();
        tokio::io::AsyncReadExt::read_to_string(&mut tokio::io::stdin(), &mut buf).await?;
        buf
    } else {
        tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("failed to read {}", path))?
    };
    let submission: JobSubmission =
        serde_json::from_str(&raw).context("invalid job submission")?;

    // 4. Wire collaborators
    let publisher = BroadcastPublisher::new(1024);
    let mut events = publisher.subscribe();
    let jobs = JobManager::new(Arc::new(publisher));

    let fetcher = Arc::new(HttpFetcher::new(settings.fetcher_config()));
    let factory = ScraperFactory::with_builtin(fetcher, &settings.source_config());
    let rate_limiter = RateLimiter::new(settings.rate_limiter_config()?);
    let proxies = ProxyManager::new(
        settings.proxy.addresses.clone(),
        settings.proxy_manager_config(),
    );
    let repository = MemoryLeadRepository::new();

    let shutdown = CancellationToken::new();
    if !settings.proxy.addresses.is_empty() {
        let probe = Arc::new(HttpProxyProbe::new(
            settings.proxy.health_check_url.clone(),
            settings.fetcher_config().request_timeout,
        ));
        proxies.spawn_health_checks(
            probe,
            Duration::from_secs(settings.proxy.health_check_interval_secs.max(1)),
            shutdown.clone(),
        );
        info!(proxies = settings.proxy.addresses.len(), "Proxy health checks started");
    }

    let orchestrator = Orchestrator::new(
        jobs,
        factory,
        rate_limiter,
        proxies,
        Arc::new(repository.clone()),
        settings.pipeline_config()?,
        settings.orchestrator_config(),
    );

    // 5. Forward progress events to the log
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event.event_type {
                ProgressEventType::LeadDiscovered => {
                    info!(job_id = %event.job_id, lead = %event.payload, "Lead discovered")
                }
                _ => info!(
                    job_id = %event.job_id,
                    event = ?event.event_type,
                    progress = event.progress_percent,
                    step = %event.current_step,
                    results = event.results_count,
                    "Job progress"
                ),
            }
        }
    });

    // 6. Run the job
    let receipt = orchestrator.submit(submission)?;
    info!(
        job_id = %receipt.job_id,
        estimated_secs = receipt.estimated_duration_secs,
        "Job accepted"
    );

    let mut handle = orchestrator.spawn(receipt.job_id);
    let result = tokio::select! {
        result = &mut handle => result,
        _ = tokio::signal::ctrl_c() => {
            warn!(job_id = %receipt.job_id, "Interrupt received, cancelling job");
            if let Err(e) = orchestrator.cancel(receipt.job_id) {
                warn!(error = %e, "Cancel request rejected");
            }
            (&mut handle).await
        }
    };
    shutdown.cancel();

    let snapshot = result.context("job task panicked")??;
    let output = serde_json::json!({
        "job": snapshot,
        "leads": repository.leads_for(receipt.job_id),
    });
    println!("{}", serde_json::to_string_pretty(&output)?);

    Ok(())
}
