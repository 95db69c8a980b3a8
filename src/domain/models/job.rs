// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;
use validator::Validate;

/// 搜索参数
///
/// 自由格式的键值条件，保持键的有序以便日志和估算稳定
pub type SearchParameters = BTreeMap<String, serde_json::Value>;

/// 任务实体
///
/// 表示一次用户发起的线索抓取请求，拥有自己的生命周期和结果集。
/// 只能通过 `JobManager` 的转换接口修改。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// 任务唯一标识符
    pub id: Uuid,
    /// 任务类型，决定使用哪个数据源提取器
    pub job_type: JobType,
    /// 任务状态
    pub status: JobStatus,
    /// 搜索条件
    pub search_parameters: SearchParameters,
    /// 结果过滤条件
    pub filters: SearchParameters,
    /// 最多返回的线索数量
    pub max_results: u32,
    /// 进度百分比，运行期间单调不减
    pub progress_percent: f64,
    /// 目标计数
    pub counts: JobCounts,
    /// 按发生顺序记录的错误
    pub errors: Vec<JobErrorRecord>,
    /// 当前正在处理的目标
    pub current_target: Option<String>,
    /// 已产出的线索数量
    pub results_count: u32,
    /// 完成摘要
    pub summary: Option<String>,
    /// 失败原因
    pub failure_reason: Option<String>,
    /// 创建时间
    pub created_at: DateTime<Utc>,
    /// 开始执行时间
    pub started_at: Option<DateTime<Utc>>,
    /// 结束时间
    pub ended_at: Option<DateTime<Utc>>,
    /// 处于退避等待中的目标数量
    #[serde(skip)]
    retrying_targets: u32,
}

/// 任务类型枚举
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    /// 结构化商业目录搜索
    SearchListing,
    /// 职业社交网络的公司/人员页面
    ProfessionalNetwork,
    /// 任意公司官网，按联系页启发式提取
    GenericWebsite,
    /// 行业目录
    Directory,
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            JobType::SearchListing => write!(f, "search_listing"),
            JobType::ProfessionalNetwork => write!(f, "professional_network"),
            JobType::GenericWebsite => write!(f, "generic_website"),
            JobType::Directory => write!(f, "directory"),
        }
    }
}

impl FromStr for JobType {
    type Err = JobError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "search_listing" => Ok(JobType::SearchListing),
            "professional_network" => Ok(JobType::ProfessionalNetwork),
            "generic_website" => Ok(JobType::GenericWebsite),
            "directory" => Ok(JobType::Directory),
            other => Err(JobError::InvalidSubmission(format!(
                "unknown job type: {}",
                other
            ))),
        }
    }
}

/// 任务状态枚举
///
/// 状态转换遵循以下流程：
/// Pending → Running ⇄ Retrying → Completed/Failed/Cancelled，
/// 以及 Pending → Cancelled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    #[default]
    Pending,
    Running,
    /// Running 的内部子状态：至少一个目标正在退避等待重试
    Retrying,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    /// 是否为终止状态
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// 是否处于运行中（含重试子状态）
    pub fn is_active(&self) -> bool {
        matches!(self, JobStatus::Running | JobStatus::Retrying)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "pending"),
            JobStatus::Running => write!(f, "running"),
            JobStatus::Retrying => write!(f, "retrying"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Failed => write!(f, "failed"),
            JobStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// 错误分类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// 超时、限流、代理故障，可退避重试
    Transient,
    /// 触发站点防护，轮换代理后重试
    Blocked,
    /// 解析失败或页面不存在，不重试
    Structural,
    /// 字段校验失败，仅影响单条记录
    Validation,
    /// 无法获取任何目标，立即终止任务
    Fatal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            ErrorCategory::Transient => "transient",
            ErrorCategory::Blocked => "blocked",
            ErrorCategory::Structural => "structural",
            ErrorCategory::Validation => "validation",
            ErrorCategory::Fatal => "fatal",
        };
        f.write_str(s)
    }
}

/// 错误记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobErrorRecord {
    pub target: String,
    pub message: String,
    pub category: ErrorCategory,
    pub timestamp: DateTime<Utc>,
}

/// 目标计数
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobCounts {
    pub total: u32,
    pub processed: u32,
    pub succeeded: u32,
    pub failed: u32,
}

/// 性能计数器
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceCounters {
    /// 每秒处理的目标数
    pub throughput_per_sec: f64,
    /// 成功率 (0.0-1.0)
    pub success_rate: f64,
}

/// 单个目标的处理结果
#[derive(Debug, Clone, PartialEq)]
pub enum TargetOutcome {
    /// 成功，附带产出的原始记录数
    Succeeded { records: u32 },
    /// 失败，附带最终错误
    Failed {
        message: String,
        category: ErrorCategory,
    },
}

/// 任务提交请求
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct JobSubmission {
    pub job_type: JobType,
    #[serde(default)]
    pub search_parameters: SearchParameters,
    #[validate(range(min = 1, max = 10000))]
    #[serde(default = "default_max_results")]
    pub max_results: u32,
    #[serde(default)]
    pub filters: SearchParameters,
}

fn default_max_results() -> u32 {
    100
}

/// 任务提交回执
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionReceipt {
    pub job_id: Uuid,
    pub status: JobStatus,
    /// 预计耗时（秒）
    pub estimated_duration_secs: u64,
}

/// 任务只读快照
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub id: Uuid,
    pub job_type: JobType,
    pub status: JobStatus,
    pub search_parameters: SearchParameters,
    pub filters: SearchParameters,
    pub max_results: u32,
    pub progress_percent: f64,
    pub counts: JobCounts,
    pub errors: Vec<JobErrorRecord>,
    pub current_target: Option<String>,
    pub results_count: u32,
    pub summary: Option<String>,
    pub failure_reason: Option<String>,
    pub performance: PerformanceCounters,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl JobSnapshot {
    /// 去重作用域键，与 `Job::dedup_scope` 一致
    pub fn dedup_scope(&self) -> String {
        dedup_scope(self.job_type, &self.search_parameters)
    }
}

/// 任务领域错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum JobError {
    /// 无效的状态转换
    #[error("Invalid state transition from {from} to {to}")]
    InvalidTransition { from: JobStatus, to: JobStatus },

    /// 任务不存在
    #[error("Job {0} not found")]
    NotFound(Uuid),

    /// 未记录致命错误时不允许标记失败
    #[error("Job {0} cannot fail without a recorded fatal error")]
    MissingFatalError(Uuid),

    /// 提交参数无效
    #[error("Invalid submission: {0}")]
    InvalidSubmission(String),
}

fn dedup_scope(job_type: JobType, params: &SearchParameters) -> String {
    match params.get("scope").and_then(|v| v.as_str()) {
        Some(scope) => scope.trim().to_lowercase(),
        None => job_type.to_string(),
    }
}

impl Job {
    /// 根据提交请求创建新的任务
    ///
    /// # 参数
    ///
    /// * `submission` - 任务提交请求
    ///
    /// # 返回值
    ///
    /// 返回状态为 Pending 的任务
    pub fn new(submission: JobSubmission) -> Self {
        Self {
            id: Uuid::new_v4(),
            job_type: submission.job_type,
            status: JobStatus::Pending,
            search_parameters: submission.search_parameters,
            filters: submission.filters,
            max_results: submission.max_results,
            progress_percent: 0.0,
            counts: JobCounts::default(),
            errors: Vec::new(),
            current_target: None,
            results_count: 0,
            summary: None,
            failure_reason: None,
            created_at: Utc::now(),
            started_at: None,
            ended_at: None,
            retrying_targets: 0,
        }
    }

    fn transition_error(&self, to: JobStatus) -> JobError {
        JobError::InvalidTransition {
            from: self.status,
            to,
        }
    }

    /// 启动任务
    ///
    /// 将任务状态从 Pending 变更为 Running
    pub fn start(&mut self) -> Result<(), JobError> {
        match self.status {
            JobStatus::Pending => {
                self.status = JobStatus::Running;
                self.started_at = Some(Utc::now());
                Ok(())
            }
            _ => Err(self.transition_error(JobStatus::Running)),
        }
    }

    /// 有目标进入退避等待
    pub fn begin_retry(&mut self) -> Result<(), JobError> {
        if !self.status.is_active() {
            return Err(self.transition_error(JobStatus::Retrying));
        }
        self.retrying_targets += 1;
        self.status = JobStatus::Retrying;
        Ok(())
    }

    /// 有目标结束退避等待
    pub fn end_retry(&mut self) -> Result<(), JobError> {
        if !self.status.is_active() {
            return Err(self.transition_error(JobStatus::Running));
        }
        self.retrying_targets = self.retrying_targets.saturating_sub(1);
        if self.retrying_targets == 0 {
            self.status = JobStatus::Running;
        }
        Ok(())
    }

    /// 完成任务
    pub fn complete(&mut self, summary: impl Into<String>) -> Result<(), JobError> {
        if !self.status.is_active() {
            return Err(self.transition_error(JobStatus::Completed));
        }
        self.status = JobStatus::Completed;
        self.summary = Some(summary.into());
        self.progress_percent = 100.0;
        self.current_target = None;
        self.retrying_targets = 0;
        self.ended_at = Some(Utc::now());
        Ok(())
    }

    /// 标记任务失败
    ///
    /// 只有在已记录至少一个致命错误时才允许
    pub fn fail(&mut self, reason: impl Into<String>) -> Result<(), JobError> {
        if !self.status.is_active() {
            return Err(self.transition_error(JobStatus::Failed));
        }
        if !self.has_fatal_error() {
            return Err(JobError::MissingFatalError(self.id));
        }
        self.status = JobStatus::Failed;
        self.failure_reason = Some(reason.into());
        self.current_target = None;
        self.retrying_targets = 0;
        self.ended_at = Some(Utc::now());
        Ok(())
    }

    /// 取消任务
    pub fn cancel(&mut self) -> Result<(), JobError> {
        if self.status.is_terminal() {
            return Err(self.transition_error(JobStatus::Cancelled));
        }
        self.status = JobStatus::Cancelled;
        self.current_target = None;
        self.retrying_targets = 0;
        self.ended_at = Some(Utc::now());
        Ok(())
    }

    /// 设置目标总数，不会低于已处理数
    pub fn set_total(&mut self, total: u32) {
        self.counts.total = total.max(self.counts.processed);
        self.refresh_progress();
    }

    /// 应用绝对进度计数
    ///
    /// 计数只增不减，并保证 `processed ≤ total`。终止状态下不做任何修改。
    ///
    /// # 返回值
    ///
    /// 计数是否发生变化
    pub fn apply_progress(
        &mut self,
        processed: u32,
        succeeded: u32,
        failed: u32,
        current_target: Option<String>,
    ) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        let before = self.counts;

        let processed = processed.min(self.counts.total);
        self.counts.processed = self.counts.processed.max(processed);
        self.counts.succeeded = self
            .counts
            .succeeded
            .max(succeeded)
            .min(self.counts.processed - self.counts.failed);
        self.counts.failed = self
            .counts
            .failed
            .max(failed)
            .min(self.counts.processed - self.counts.succeeded);
        if current_target.is_some() {
            self.current_target = current_target;
        }
        self.refresh_progress();
        before != self.counts
    }

    /// 记录单个目标结束
    pub fn record_target(&mut self, target: &str, outcome: &TargetOutcome) -> bool {
        if self.status.is_terminal() || self.counts.processed >= self.counts.total {
            return false;
        }
        self.counts.processed += 1;
        match outcome {
            TargetOutcome::Succeeded { .. } => self.counts.succeeded += 1,
            TargetOutcome::Failed { message, category } => {
                self.counts.failed += 1;
                self.push_error(target, message, *category);
            }
        }
        self.current_target = Some(target.to_string());
        self.refresh_progress();
        true
    }

    /// 追加错误记录，任何状态下都允许
    pub fn push_error(&mut self, target: &str, message: &str, category: ErrorCategory) {
        self.errors.push(JobErrorRecord {
            target: target.to_string(),
            message: message.to_string(),
            category,
            timestamp: Utc::now(),
        });
    }

    /// 是否已记录致命错误
    pub fn has_fatal_error(&self) -> bool {
        self.errors
            .iter()
            .any(|e| e.category == ErrorCategory::Fatal)
    }

    /// 去重作用域键
    ///
    /// 搜索参数中的 `scope` 优先，否则按任务类型划分
    pub fn dedup_scope(&self) -> String {
        dedup_scope(self.job_type, &self.search_parameters)
    }

    fn refresh_progress(&mut self) {
        if self.counts.total == 0 {
            return;
        }
        let computed =
            (self.counts.processed as f64 / self.counts.total as f64 * 100.0).clamp(0.0, 100.0);
        if computed > self.progress_percent {
            self.progress_percent = computed;
        }
    }

    /// 计算性能计数器
    pub fn performance(&self, now: DateTime<Utc>) -> PerformanceCounters {
        let success_rate = if self.counts.processed == 0 {
            0.0
        } else {
            self.counts.succeeded as f64 / self.counts.processed as f64
        };

        let throughput_per_sec = match self.started_at {
            Some(started) => {
                let end = self.ended_at.unwrap_or(now);
                let elapsed = (end - started).num_milliseconds() as f64 / 1000.0;
                if elapsed > 0.0 {
                    self.counts.processed as f64 / elapsed
                } else {
                    0.0
                }
            }
            None => 0.0,
        };

        PerformanceCounters {
            throughput_per_sec,
            success_rate,
        }
    }

    /// 生成只读快照
    pub fn snapshot(&self) -> JobSnapshot {
        JobSnapshot {
            id: self.id,
            job_type: self.job_type,
            status: self.status,
            search_parameters: self.search_parameters.clone(),
            filters: self.filters.clone(),
            max_results: self.max_results,
            progress_percent: self.progress_percent,
            counts: self.counts,
            errors: self.errors.clone(),
            current_target: self.current_target.clone(),
            results_count: self.results_count,
            summary: self.summary.clone(),
            failure_reason: self.failure_reason.clone(),
            performance: self.performance(Utc::now()),
            created_at: self.created_at,
            started_at: self.started_at,
            ended_at: self.ended_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn submission() -> JobSubmission {
        JobSubmission {
            job_type: JobType::GenericWebsite,
            search_parameters: SearchParameters::new(),
            max_results: 10,
            filters: SearchParameters::new(),
        }
    }

    #[test]
    fn test_job_lifecycle() {
        let mut job = Job::new(submission());
        assert_eq!(job.status, JobStatus::Pending);

        job.start().unwrap();
        assert_eq!(job.status, JobStatus::Running);
        assert!(job.started_at.is_some());

        job.complete("done").unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.progress_percent, 100.0);
        assert!(job.ended_at.is_some());
    }

    #[test]
    fn test_terminal_states_are_final() {
        let mut job = Job::new(submission());
        job.cancel().unwrap();
        assert_eq!(job.status, JobStatus::Cancelled);

        assert!(matches!(
            job.start(),
            Err(JobError::InvalidTransition { .. })
        ));
        assert!(job.complete("late").is_err());
        assert!(job.cancel().is_err());
        assert_eq!(job.status, JobStatus::Cancelled);
    }

    #[test]
    fn test_start_requires_pending() {
        let mut job = Job::new(submission());
        job.start().unwrap();
        assert_eq!(
            job.start(),
            Err(JobError::InvalidTransition {
                from: JobStatus::Running,
                to: JobStatus::Running
            })
        );
    }

    #[test]
    fn test_fail_requires_fatal_error() {
        let mut job = Job::new(submission());
        job.start().unwrap();
        job.push_error("t1", "timeout", ErrorCategory::Transient);
        assert!(matches!(job.fail("boom"), Err(JobError::MissingFatalError(_))));

        job.push_error("params", "no targets", ErrorCategory::Fatal);
        job.fail("boom").unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.failure_reason.as_deref(), Some("boom"));
    }

    #[test]
    fn test_retrying_substate() {
        let mut job = Job::new(submission());
        job.start().unwrap();

        job.begin_retry().unwrap();
        job.begin_retry().unwrap();
        assert_eq!(job.status, JobStatus::Retrying);

        job.end_retry().unwrap();
        assert_eq!(job.status, JobStatus::Retrying);
        job.end_retry().unwrap();
        assert_eq!(job.status, JobStatus::Running);

        job.begin_retry().unwrap();
        job.complete("ok").unwrap();
        assert_eq!(job.status, JobStatus::Completed);
    }

    #[test]
    fn test_progress_is_monotonic_and_bounded() {
        let mut job = Job::new(submission());
        job.start().unwrap();
        job.set_total(4);

        assert!(job.apply_progress(2, 2, 0, Some("a".into())));
        assert_eq!(job.progress_percent, 50.0);

        // 旧的、较小的计数不会使进度回退
        assert!(!job.apply_progress(1, 1, 0, None));
        assert_eq!(job.counts.processed, 2);
        assert_eq!(job.progress_percent, 50.0);

        // processed 不会超过 total
        job.apply_progress(10, 3, 7, None);
        assert_eq!(job.counts.processed, 4);
        assert!(job.counts.succeeded + job.counts.failed <= job.counts.processed);
        assert_eq!(job.progress_percent, 100.0);
    }

    #[test]
    fn test_progress_ignored_after_terminal() {
        let mut job = Job::new(submission());
        job.start().unwrap();
        job.set_total(2);
        job.cancel().unwrap();

        assert!(!job.apply_progress(1, 1, 0, None));
        assert!(!job.record_target(
            "late",
            &TargetOutcome::Succeeded { records: 1 }
        ));
        assert_eq!(job.counts.processed, 0);
    }

    #[test]
    fn test_record_target_appends_error_and_rates() {
        let mut job = Job::new(submission());
        job.start().unwrap();
        job.set_total(2);

        job.record_target("a", &TargetOutcome::Succeeded { records: 3 });
        job.record_target(
            "b",
            &TargetOutcome::Failed {
                message: "not found".into(),
                category: ErrorCategory::Structural,
            },
        );

        assert_eq!(job.counts.processed, 2);
        assert_eq!(job.errors.len(), 1);
        assert_eq!(job.errors[0].target, "b");
        let perf = job.performance(Utc::now());
        assert!((perf.success_rate - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_dedup_scope() {
        let mut job = Job::new(submission());
        assert_eq!(job.dedup_scope(), "generic_website");
        job.search_parameters
            .insert("scope".into(), serde_json::json!(" Team-A "));
        assert_eq!(job.dedup_scope(), "team-a");
    }

    #[test]
    fn test_submission_validation() {
        let mut s = submission();
        assert!(s.validate().is_ok());
        s.max_results = 0;
        assert!(s.validate().is_err());
    }
}
