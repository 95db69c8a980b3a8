// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use metrics::counter;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;
use validator::Validate;

use crate::domain::models::event::{ProgressEvent, ProgressEventType};
use crate::domain::models::job::{
    ErrorCategory, Job, JobError, JobSnapshot, JobStatus, JobSubmission, TargetOutcome,
};
use crate::domain::models::lead::ProcessedLead;
use crate::domain::services::notification_service::ProgressPublisher;

struct JobEntry {
    job: Job,
    token: CancellationToken,
}

/// 任务统计
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct JobStatistics {
    pub total_jobs: usize,
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub targets_processed: u64,
    pub leads_produced: u64,
    /// 已处理过目标的任务的平均成功率
    pub average_success_rate: f64,
}

/// 任务管理器
///
/// 任务状态的唯一写入者。每个任务一把锁，所有计数变更和事件发布都在锁内完成，
/// 因此并发工作协程的进度更新是串行化的，事件顺序与变更顺序一致。
#[derive(Clone)]
pub struct JobManager {
    jobs: Arc<DashMap<Uuid, Arc<Mutex<JobEntry>>>>,
    publisher: Arc<dyn ProgressPublisher>,
}

impl JobManager {
    /// 创建新的任务管理器
    ///
    /// # 参数
    ///
    /// * `publisher` - 进度事件发布通道
    pub fn new(publisher: Arc<dyn ProgressPublisher>) -> Self {
        Self {
            jobs: Arc::new(DashMap::new()),
            publisher,
        }
    }

    fn entry(&self, id: Uuid) -> Result<Arc<Mutex<JobEntry>>, JobError> {
        self.jobs
            .get(&id)
            .map(|e| e.value().clone())
            .ok_or(JobError::NotFound(id))
    }

    fn emit(&self, event: ProgressEvent) {
        if let Err(e) = self.publisher.publish(event) {
            debug!(error = %e, "Progress event not delivered");
        }
    }

    /// 创建任务
    ///
    /// # 返回值
    ///
    /// * `Ok(Uuid)` - 新任务ID，状态为 Pending
    /// * `Err(JobError)` - 提交参数校验失败
    pub fn create(&self, submission: JobSubmission) -> Result<Uuid, JobError> {
        submission
            .validate()
            .map_err(|e| JobError::InvalidSubmission(e.to_string()))?;

        let job = Job::new(submission);
        let id = job.id;
        info!(job_id = %id, job_type = %job.job_type, "Job created");
        self.jobs.insert(
            id,
            Arc::new(Mutex::new(JobEntry {
                job,
                token: CancellationToken::new(),
            })),
        );
        Ok(id)
    }

    /// 启动任务（Pending → Running）
    pub fn start(&self, id: Uuid) -> Result<(), JobError> {
        let entry = self.entry(id)?;
        let mut guard = entry.lock();
        guard.job.start()?;
        info!(job_id = %id, "Job started");
        self.emit(ProgressEvent::from_job(
            ProgressEventType::Progress,
            &guard.job,
            "started",
            serde_json::Value::Null,
        ));
        Ok(())
    }

    /// 设置解析出的目标总数
    pub fn set_total_targets(&self, id: Uuid, total: u32) -> Result<(), JobError> {
        let entry = self.entry(id)?;
        let mut guard = entry.lock();
        if guard.job.status.is_terminal() {
            return Ok(());
        }
        guard.job.set_total(total);
        Ok(())
    }

    /// 记录绝对进度
    ///
    /// 计数单调更新；任务已终止时不做任何修改。
    pub fn record_progress(
        &self,
        id: Uuid,
        processed: u32,
        succeeded: u32,
        failed: u32,
        current_target: Option<String>,
    ) -> Result<(), JobError> {
        let entry = self.entry(id)?;
        let mut guard = entry.lock();
        let step = current_target.clone().unwrap_or_else(|| "progress".to_string());
        if guard
            .job
            .apply_progress(processed, succeeded, failed, current_target)
        {
            self.emit(ProgressEvent::from_job(
                ProgressEventType::Progress,
                &guard.job,
                step,
                serde_json::Value::Null,
            ));
        }
        Ok(())
    }

    /// 记录单个目标的最终结果
    ///
    /// 工作协程使用的增量接口。失败结果同时追加错误记录。
    ///
    /// # 返回值
    ///
    /// 结果是否被接受；任务已终止时返回 `false`
    pub fn record_target_result(
        &self,
        id: Uuid,
        target: &str,
        outcome: TargetOutcome,
    ) -> Result<bool, JobError> {
        let entry = self.entry(id)?;
        let mut guard = entry.lock();
        if !guard.job.record_target(target, &outcome) {
            debug!(job_id = %id, target, "Target result ignored");
            return Ok(false);
        }

        let (label, payload) = match &outcome {
            TargetOutcome::Succeeded { records } => {
                ("succeeded", serde_json::json!({ "target": target, "records": records }))
            }
            TargetOutcome::Failed { message, category } => (
                "failed",
                serde_json::json!({ "target": target, "error": message, "category": category }),
            ),
        };
        counter!("leadrs_targets_total", "outcome" => label).increment(1);

        self.emit(ProgressEvent::from_job(
            ProgressEventType::Progress,
            &guard.job,
            target,
            payload,
        ));
        Ok(true)
    }

    /// 追加错误记录
    ///
    /// 永不失败：未知任务只记录日志。终止后的任务仍可追加（例如持久化失败）。
    pub fn record_error(&self, id: Uuid, target: &str, message: &str, category: ErrorCategory) {
        match self.entry(id) {
            Ok(entry) => {
                let mut guard = entry.lock();
                guard.job.push_error(target, message, category);
                debug!(job_id = %id, target, %category, message, "Job error recorded");
            }
            Err(_) => warn!(job_id = %id, target, message, "Error recorded for unknown job"),
        }
    }

    /// 有目标进入退避等待（Running → Retrying）
    pub fn begin_retry(&self, id: Uuid) -> Result<(), JobError> {
        let entry = self.entry(id)?;
        let mut guard = entry.lock();
        guard.job.begin_retry()
    }

    /// 有目标结束退避等待（Retrying → Running）
    pub fn end_retry(&self, id: Uuid) -> Result<(), JobError> {
        let entry = self.entry(id)?;
        let mut guard = entry.lock();
        guard.job.end_retry()
    }

    /// 设置线索数量
    pub fn set_results_count(&self, id: Uuid, count: u32) -> Result<(), JobError> {
        let entry = self.entry(id)?;
        let mut guard = entry.lock();
        if !guard.job.status.is_terminal() {
            guard.job.results_count = count;
        }
        Ok(())
    }

    /// 推送新线索事件
    pub fn publish_lead_discovered(&self, id: Uuid, lead: &ProcessedLead) -> Result<(), JobError> {
        let entry = self.entry(id)?;
        let guard = entry.lock();
        if guard.job.status.is_terminal() {
            return Ok(());
        }
        let payload = serde_json::json!({
            "company": lead.company.as_ref().map(|c| c.name.clone()),
            "contacts": lead.contacts.len(),
            "score": lead.score.total,
            "grade": lead.score.grade,
        });
        self.emit(ProgressEvent::from_job(
            ProgressEventType::LeadDiscovered,
            &guard.job,
            "lead_discovered",
            payload,
        ));
        Ok(())
    }

    fn finish<F>(&self, id: Uuid, transition: F) -> Result<JobSnapshot, JobError>
    where
        F: FnOnce(&mut Job) -> Result<(), JobError>,
    {
        let entry = self.entry(id)?;
        let mut guard = entry.lock();
        transition(&mut guard.job)?;

        let status = guard.job.status;
        counter!("leadrs_jobs_total", "status" => status.to_string()).increment(1);
        if status == JobStatus::Cancelled {
            guard.token.cancel();
        }

        if let Some(event_type) = ProgressEvent::terminal_type(status) {
            let payload = serde_json::json!({
                "summary": guard.job.summary,
                "reason": guard.job.failure_reason,
                "errors": guard.job.errors.len(),
            });
            self.emit(ProgressEvent::from_job(
                event_type,
                &guard.job,
                status.to_string(),
                payload,
            ));
        }
        info!(job_id = %id, %status, processed = guard.job.counts.processed, "Job finished");
        Ok(guard.job.snapshot())
    }

    /// 完成任务（Running → Completed）
    pub fn complete(&self, id: Uuid, summary: &str) -> Result<JobSnapshot, JobError> {
        self.finish(id, |job| job.complete(summary))
    }

    /// 标记任务失败（Running → Failed），要求已记录致命错误
    pub fn fail(&self, id: Uuid, reason: &str) -> Result<JobSnapshot, JobError> {
        self.finish(id, |job| job.fail(reason))
    }

    /// 取消任务（Pending|Running → Cancelled）并触发取消令牌
    pub fn cancel(&self, id: Uuid) -> Result<JobSnapshot, JobError> {
        self.finish(id, |job| job.cancel())
    }

    /// 获取任务快照
    pub fn get(&self, id: Uuid) -> Result<JobSnapshot, JobError> {
        let entry = self.entry(id)?;
        let guard = entry.lock();
        Ok(guard.job.snapshot())
    }

    /// 获取任务的取消令牌
    pub fn cancellation_token(&self, id: Uuid) -> Result<CancellationToken, JobError> {
        let entry = self.entry(id)?;
        let guard = entry.lock();
        Ok(guard.token.clone())
    }

    /// 列出任务，按创建时间排序
    pub fn list(&self, status: Option<JobStatus>) -> Vec<JobSnapshot> {
        let entries: Vec<_> = self.jobs.iter().map(|e| e.value().clone()).collect();
        let mut snapshots: Vec<JobSnapshot> = entries
            .iter()
            .map(|entry| entry.lock().job.snapshot())
            .filter(|s| status.map_or(true, |wanted| s.status == wanted))
            .collect();
        snapshots.sort_by_key(|s| s.created_at);
        snapshots
    }

    /// 移除较早结束的任务，只保留最近结束的 `keep` 个终态任务
    ///
    /// 未结束的任务不受影响。应在终态快照持久化之后调用。
    ///
    /// # 返回值
    ///
    /// 移除的任务数
    pub fn evict_terminal(&self, keep: usize) -> usize {
        let entries: Vec<(Uuid, Arc<Mutex<JobEntry>>)> = self
            .jobs
            .iter()
            .map(|e| (*e.key(), e.value().clone()))
            .collect();
        let mut terminal: Vec<(DateTime<Utc>, Uuid)> = entries
            .iter()
            .filter_map(|(id, entry)| {
                let guard = entry.lock();
                let job = &guard.job;
                job.status
                    .is_terminal()
                    .then(|| (job.ended_at.unwrap_or(job.created_at), *id))
            })
            .collect();
        if terminal.len() <= keep {
            return 0;
        }

        terminal.sort_by(|a, b| b.cmp(a));
        let evicted = terminal.split_off(keep);
        for (_, id) in &evicted {
            self.jobs.remove(id);
        }
        evicted.len()
    }

    /// 汇总统计
    pub fn statistics(&self) -> JobStatistics {
        let snapshots = self.list(None);
        let mut stats = JobStatistics {
            total_jobs: snapshots.len(),
            ..Default::default()
        };

        let mut rate_sum = 0.0;
        let mut rate_jobs = 0usize;
        for s in &snapshots {
            match s.status {
                JobStatus::Pending => stats.pending += 1,
                JobStatus::Running | JobStatus::Retrying => stats.running += 1,
                JobStatus::Completed => stats.completed += 1,
                JobStatus::Failed => stats.failed += 1,
                JobStatus::Cancelled => stats.cancelled += 1,
            }
            stats.targets_processed += s.counts.processed as u64;
            stats.leads_produced += s.results_count as u64;
            if s.counts.processed > 0 {
                rate_sum += s.performance.success_rate;
                rate_jobs += 1;
            }
        }
        if rate_jobs > 0 {
            stats.average_success_rate = rate_sum / rate_jobs as f64;
        }
        stats
    }
}
