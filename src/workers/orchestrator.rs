// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use dashmap::DashSet;
use futures::future::join_all;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::domain::models::job::{
    ErrorCategory, JobError, JobSnapshot, JobStatus, JobSubmission, SubmissionReceipt,
    TargetOutcome,
};
use crate::domain::models::lead::{ProcessedLead, RawRecord};
use crate::domain::repositories::lead_repository::LeadRepository;
use crate::domain::services::job_manager::JobManager;
use crate::domain::services::pipeline::{LeadFilter, Pipeline, PipelineConfig, PipelineOutcome};
use crate::engines::factory::ScraperFactory;
use crate::engines::proxy_manager::{proxy_fingerprint, ProxyManager};
use crate::engines::rate_limiter::RateLimiter;
use crate::engines::traits::{ExtractError, Extractor, Target};
use crate::utils::errors::OrchestratorError;
use crate::utils::retry_policy::RetryPolicy;

/// 编排器配置
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// 每个任务的工作协程数
    pub workers: usize,
    /// 每个任务最多解析的目标数
    pub max_targets: usize,
    pub retry: RetryPolicy,
    /// 估算耗时时每个目标的平均秒数
    pub estimated_secs_per_target: u64,
    /// 快照持久化后内存中最多保留的已结束任务数
    pub retained_jobs: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            max_targets: 50,
            retry: RetryPolicy::default(),
            estimated_secs_per_target: 5,
            retained_jobs: 1000,
        }
    }
}

/// 单个目标的处理结果
enum TargetReport {
    Succeeded { records: u32 },
    Failed {
        message: String,
        category: ErrorCategory,
        /// 可重试错误在重试用尽后失败
        exhausted: bool,
    },
    /// 观察到取消，结果不计入任务
    Cancelled,
}

/// 一次任务执行中工作协程共享的状态
struct JobRun {
    job_id: Uuid,
    extractor: Arc<dyn Extractor>,
    pipeline: Mutex<Pipeline>,
    queue: Mutex<VecDeque<Target>>,
    token: CancellationToken,
    total: u32,
    discovered: AtomicU32,
    exhausted: AtomicU32,
}

impl JobRun {
    fn next_target(&self) -> Option<Target> {
        self.queue.lock().pop_front()
    }
}

/// 任务编排器
///
/// 将任务的搜索参数解析为目标列表，用固定大小的工作池逐个处理：
/// 限流 → 选择代理 → 抓取/抽取 → 数据管道。限流器和代理管理器在所有任务间共享，
/// 任务状态只通过 `JobManager` 修改。
#[derive(Clone)]
pub struct Orchestrator {
    jobs: JobManager,
    factory: Arc<ScraperFactory>,
    rate_limiter: RateLimiter,
    proxies: ProxyManager,
    repository: Arc<dyn LeadRepository>,
    pipeline: Arc<PipelineConfig>,
    config: Arc<OrchestratorConfig>,
    running: Arc<DashSet<Uuid>>,
}

impl Orchestrator {
    /// 创建编排器
    ///
    /// # 参数
    ///
    /// * `jobs` - 任务管理器
    /// * `factory` - 抽取器工厂
    /// * `rate_limiter` - 共享限流器
    /// * `proxies` - 共享代理管理器
    /// * `repository` - 持久化协作者
    /// * `pipeline` - 数据管道配置
    /// * `config` - 编排器配置
    pub fn new(
        jobs: JobManager,
        factory: ScraperFactory,
        rate_limiter: RateLimiter,
        proxies: ProxyManager,
        repository: Arc<dyn LeadRepository>,
        pipeline: PipelineConfig,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            jobs,
            factory: Arc::new(factory),
            rate_limiter,
            proxies,
            repository,
            pipeline: Arc::new(pipeline),
            config: Arc::new(config),
            running: Arc::new(DashSet::new()),
        }
    }

    pub fn jobs(&self) -> &JobManager {
        &self.jobs
    }

    /// 提交任务
    ///
    /// # 返回值
    ///
    /// * `Ok(SubmissionReceipt)` - 状态为 Pending 的回执和预计耗时
    /// * `Err(OrchestratorError)` - 任务类型不受支持或提交参数无效
    pub fn submit(&self, submission: JobSubmission) -> Result<SubmissionReceipt, OrchestratorError> {
        let extractor = self.factory.get(submission.job_type)?;
        let planned = extractor
            .plan_targets(&submission.search_parameters, self.config.max_targets)
            .map(|targets| targets.len())
            .unwrap_or(0);

        let job_id = self.jobs.create(submission)?;
        let estimated_duration_secs = self.estimate_duration(planned);
        info!(job_id = %job_id, planned, estimated_duration_secs, "Job submitted");

        Ok(SubmissionReceipt {
            job_id,
            status: JobStatus::Pending,
            estimated_duration_secs,
        })
    }

    fn estimate_duration(&self, targets: usize) -> u64 {
        let waves = targets.max(1).div_ceil(self.config.workers.max(1)) as u64;
        waves * self.config.estimated_secs_per_target.max(1)
    }

    /// 取消任务
    pub fn cancel(&self, job_id: Uuid) -> Result<JobSnapshot, OrchestratorError> {
        Ok(self.jobs.cancel(job_id)?)
    }

    /// 在后台执行任务
    pub fn spawn(&self, job_id: Uuid) -> JoinHandle<Result<JobSnapshot, OrchestratorError>> {
        let orchestrator = self.clone();
        tokio::spawn(async move { orchestrator.run(job_id).await })
    }

    /// 执行任务直到结束
    ///
    /// 目标级错误只记录在任务上；返回的错误仅表示任务本身无法执行。
    ///
    /// # 返回值
    ///
    /// * `Ok(JobSnapshot)` - 任务的最终快照（completed、failed 或 cancelled）
    /// * `Err(OrchestratorError)` - 任务不存在、不处于 Pending 或已在执行
    #[instrument(skip(self), fields(job_id = %job_id))]
    pub async fn run(&self, job_id: Uuid) -> Result<JobSnapshot, OrchestratorError> {
        if !self.running.insert(job_id) {
            return Err(OrchestratorError::AlreadyRunning(job_id));
        }
        let result = self.execute(job_id).await;
        self.running.remove(&job_id);
        result
    }

    async fn execute(&self, job_id: Uuid) -> Result<JobSnapshot, OrchestratorError> {
        let snapshot = self.jobs.get(job_id)?;
        if snapshot.status == JobStatus::Cancelled {
            info!("Job cancelled before start");
            self.persist_snapshot(&snapshot).await;
            return Ok(snapshot);
        }

        self.jobs.start(job_id)?;
        let token = self.jobs.cancellation_token(job_id)?;

        let extractor = match self.factory.get(snapshot.job_type) {
            Ok(extractor) => extractor,
            Err(e) => return self.abort(job_id, "job_type", &e.to_string()).await,
        };

        let targets = match extractor.plan_targets(&snapshot.search_parameters, self.config.max_targets) {
            Ok(targets) if !targets.is_empty() => targets,
            Ok(_) => {
                return self
                    .abort(job_id, "search_parameters", "no scrape targets resolved")
                    .await
            }
            Err(e) => return self.abort(job_id, "search_parameters", &e.to_string()).await,
        };
        let total = targets.len() as u32;
        self.jobs.set_total_targets(job_id, total)?;
        info!(targets = total, extractor = extractor.name(), "Targets resolved");

        let mut pipeline = self.pipeline.build(job_id);
        match self
            .repository
            .load_existing_for_dedup(&snapshot.dedup_scope())
            .await
        {
            Ok(existing) => pipeline.seed(existing),
            Err(e) => {
                warn!(error = %e, "Failed to load existing leads for deduplication");
                self.jobs.record_error(
                    job_id,
                    "repository",
                    &format!("failed to load existing leads: {}", e),
                    ErrorCategory::Transient,
                );
            }
        }

        let run = Arc::new(JobRun {
            job_id,
            extractor,
            pipeline: Mutex::new(pipeline),
            queue: Mutex::new(targets.into()),
            token,
            total,
            discovered: AtomicU32::new(0),
            exhausted: AtomicU32::new(0),
        });

        let workers = self.config.workers.max(1).min(total as usize);
        let handles: Vec<JoinHandle<()>> = (0..workers)
            .map(|worker| tokio::spawn(self.clone().worker_loop(run.clone(), worker)))
            .collect();

        let mut panicked = None;
        for result in join_all(handles).await {
            if let Err(e) = result {
                error!(error = %e, "Worker task terminated unexpectedly");
                panicked.get_or_insert_with(|| e.to_string());
            }
        }

        self.finalize(&run, panicked).await
    }

    async fn worker_loop(self, run: Arc<JobRun>, worker: usize) {
        debug!(job_id = %run.job_id, worker, "Worker started");
        loop {
            if run.token.is_cancelled() {
                debug!(job_id = %run.job_id, worker, "Cancellation observed, worker stopping");
                break;
            }
            let Some(target) = run.next_target() else {
                break;
            };

            let outcome = match self.process_target(&run, &target).await {
                TargetReport::Cancelled => break,
                TargetReport::Succeeded { records } => TargetOutcome::Succeeded { records },
                TargetReport::Failed {
                    message,
                    category,
                    exhausted,
                } => {
                    if exhausted {
                        run.exhausted.fetch_add(1, Ordering::SeqCst);
                        warn!(
                            job_id = %run.job_id,
                            target = %target.label,
                            %category,
                            "Target exhausted its retries"
                        );
                    }
                    TargetOutcome::Failed { message, category }
                }
            };

            match self.jobs.record_target_result(run.job_id, &target.label, outcome) {
                Ok(true) => {}
                Ok(false) => break,
                Err(e) => {
                    warn!(job_id = %run.job_id, error = %e, "Failed to record target result");
                    break;
                }
            }
        }
        debug!(job_id = %run.job_id, worker, "Worker finished");
    }

    /// 处理单个目标，包含重试
    #[instrument(skip(self, run, target), fields(job_id = %run.job_id, target = %target.label))]
    async fn process_target(&self, run: &JobRun, target: &Target) -> TargetReport {
        let retry = &self.config.retry;
        let mut attempt = 0u32;
        loop {
            let acquired = tokio::select! {
                biased;
                _ = run.token.cancelled() => return TargetReport::Cancelled,
                acquired = self.rate_limiter.acquire(&target.rate_key) => acquired,
            };

            let (message, category) = match acquired {
                Err(e) => {
                    warn!(error = %e, "Rate limit slot not granted");
                    (e.to_string(), ErrorCategory::Transient)
                }
                Ok(waited) => {
                    if !waited.is_zero() {
                        debug!(waited_ms = waited.as_millis() as u64, "Rate limit wait");
                    }
                    match self.attempt(run, target).await {
                        Ok(report) => return report,
                        Err(e) => (e.to_string(), e.category()),
                    }
                }
            };

            if !retry.should_retry_category(attempt, category) {
                let exhausted = matches!(category, ErrorCategory::Transient | ErrorCategory::Blocked);
                return TargetReport::Failed {
                    message,
                    category,
                    exhausted,
                };
            }

            attempt += 1;
            let backoff = retry.calculate_backoff(attempt);
            debug!(
                attempt,
                backoff_ms = backoff.as_millis() as u64,
                error = %message,
                "Retrying target after backoff"
            );
            if let Err(e) = self.jobs.begin_retry(run.job_id) {
                debug!(error = %e, "Retry state not entered");
            }
            let cancelled = self.backoff(&run.token, backoff).await;
            if let Err(e) = self.jobs.end_retry(run.job_id) {
                debug!(error = %e, "Retry state not left");
            }
            if cancelled {
                return TargetReport::Cancelled;
            }
        }
    }

    /// 退避等待，返回等待期间是否被取消
    async fn backoff(&self, token: &CancellationToken, duration: Duration) -> bool {
        tokio::select! {
            biased;
            _ = token.cancelled() => true,
            _ = sleep(duration) => false,
        }
    }

    /// 一次抓取尝试；进行中的抓取不会被取消打断
    async fn attempt(&self, run: &JobRun, target: &Target) -> Result<TargetReport, ExtractError> {
        let proxy = self.proxies.next(&target.rate_key);
        let started = Instant::now();
        let fetched = run.extractor.fetch(target, &proxy).await;
        let latency = started.elapsed();

        match fetched.and_then(|response| run.extractor.extract(&response)) {
            Ok(records) => {
                self.rate_limiter.record_outcome(&target.rate_key, latency, true);
                self.proxies.report_result(&target.rate_key, &proxy, true);
                if run.token.is_cancelled() {
                    debug!("Discarding results that arrived after cancellation");
                    return Ok(TargetReport::Cancelled);
                }
                let count = records.len() as u32;
                self.ingest(run, records);
                Ok(TargetReport::Succeeded { records: count })
            }
            Err(e) => {
                // 结构性错误说明站点正常响应，不计入限流和代理的失败
                let healthy = !e.is_retryable();
                self.rate_limiter.record_outcome(&target.rate_key, latency, healthy);
                self.proxies.report_result(&target.rate_key, &proxy, healthy);
                debug!(
                    error = %e,
                    proxy = %proxy.address().map(proxy_fingerprint).unwrap_or_else(|| "direct".to_string()),
                    "Target attempt failed"
                );
                Err(e)
            }
        }
    }

    /// 原始记录送入管道，推送新线索事件
    fn ingest(&self, run: &JobRun, records: Vec<RawRecord>) {
        let mut discovered: Vec<ProcessedLead> = Vec::new();
        let mut dropped = Vec::new();
        {
            let mut pipeline = run.pipeline.lock();
            for record in records {
                let source = record.source_url.clone();
                let outcome = pipeline.process(record);
                match &outcome {
                    PipelineOutcome::Dropped { reason } => dropped.push((source, reason.clone())),
                    _ => discovered.extend(pipeline.discovered_lead(&outcome)),
                }
            }
        }

        for (source, reason) in dropped {
            self.jobs
                .record_error(run.job_id, &source, &reason, ErrorCategory::Validation);
        }
        if discovered.is_empty() {
            return;
        }
        for lead in &discovered {
            if let Err(e) = self.jobs.publish_lead_discovered(run.job_id, lead) {
                debug!(error = %e, "Lead event not published");
            }
        }
        let count = discovered.len() as u32;
        let total = run.discovered.fetch_add(count, Ordering::SeqCst) + count;
        if let Err(e) = self.jobs.set_results_count(run.job_id, total) {
            debug!(error = %e, "Results count not updated");
        }
    }

    async fn finalize(
        &self,
        run: &JobRun,
        panicked: Option<String>,
    ) -> Result<JobSnapshot, OrchestratorError> {
        let job_id = run.job_id;
        let snapshot = self.jobs.get(job_id)?;
        let filter = LeadFilter::from_parameters(&snapshot.filters);
        let leads = run
            .pipeline
            .lock()
            .finish(&filter, snapshot.max_results as usize);
        let stats = run.pipeline.lock().stats();

        if run.token.is_cancelled() || snapshot.status.is_terminal() {
            // 取消前已处理的线索仍然保存
            self.save_leads(job_id, &leads).await;
            let snapshot = self.jobs.get(job_id)?;
            info!(leads = leads.len(), status = %snapshot.status, "Job drained after cancellation");
            self.persist_snapshot(&snapshot).await;
            return Ok(snapshot);
        }

        if let Some(message) = panicked {
            self.jobs
                .record_error(job_id, "worker", &message, ErrorCategory::Fatal);
            let snapshot = self.settle(job_id, self.jobs.fail(job_id, "worker task terminated unexpectedly"))?;
            self.persist_snapshot(&snapshot).await;
            return Err(OrchestratorError::WorkerPanicked(message));
        }

        let exhausted = run.exhausted.load(Ordering::SeqCst);
        if exhausted == run.total {
            let reason = format!("all {} targets exhausted their retries", run.total);
            return self.abort(job_id, "job", &reason).await;
        }

        if let Err(e) = self.jobs.set_results_count(job_id, leads.len() as u32) {
            debug!(error = %e, "Results count not updated");
        }
        self.save_leads(job_id, &leads).await;

        let counts = self.jobs.get(job_id)?.counts;
        let summary = format!(
            "{} leads from {}/{} targets ({} records processed, {} dropped, {} merged)",
            leads.len(),
            counts.succeeded,
            counts.total,
            stats.processed,
            stats.dropped,
            stats.companies_merged + stats.contacts_merged,
        );
        let snapshot = self.settle(job_id, self.jobs.complete(job_id, &summary))?;
        self.persist_snapshot(&snapshot).await;
        Ok(snapshot)
    }

    /// 记录致命错误并标记任务失败
    async fn abort(&self, job_id: Uuid, target: &str, reason: &str) -> Result<JobSnapshot, OrchestratorError> {
        error!(job_id = %job_id, source = target, reason, "Job aborted");
        self.jobs.record_error(job_id, target, reason, ErrorCategory::Fatal);
        let snapshot = self.settle(job_id, self.jobs.fail(job_id, reason))?;
        self.persist_snapshot(&snapshot).await;
        Ok(snapshot)
    }

    /// 终止转换与并发取消竞争时，以已取消的状态为准
    fn settle(
        &self,
        job_id: Uuid,
        result: Result<JobSnapshot, JobError>,
    ) -> Result<JobSnapshot, OrchestratorError> {
        match result {
            Ok(snapshot) => Ok(snapshot),
            Err(JobError::InvalidTransition { .. }) => Ok(self.jobs.get(job_id)?),
            Err(e) => Err(e.into()),
        }
    }

    async fn save_leads(&self, job_id: Uuid, leads: &[ProcessedLead]) {
        if leads.is_empty() {
            return;
        }
        if let Err(e) = self.repository.save_records(job_id, leads).await {
            warn!(job_id = %job_id, error = %e, "Failed to save leads");
            self.jobs.record_error(
                job_id,
                "repository",
                &format!("save_records failed: {}", e),
                ErrorCategory::Transient,
            );
        }
    }

    async fn persist_snapshot(&self, snapshot: &JobSnapshot) {
        match self.repository.update_job(snapshot).await {
            Ok(()) => {
                let evicted = self.jobs.evict_terminal(self.config.retained_jobs);
                if evicted > 0 {
                    debug!(evicted = evicted, "Evicted persisted jobs from memory");
                }
            }
            Err(e) => {
                warn!(job_id = %snapshot.id, error = %e, "Failed to persist job snapshot");
                self.jobs.record_error(
                    snapshot.id,
                    "repository",
                    &format!("update_job failed: {}", e),
                    ErrorCategory::Transient,
                );
            }
        }
    }
}

#[cfg(test)]
#[path = "orchestrator_test.rs"]
mod tests;
