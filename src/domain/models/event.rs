// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::job::{Job, JobStatus};

/// 进度事件类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressEventType {
    Progress,
    LeadDiscovered,
    Completed,
    Failed,
    Cancelled,
}

/// 进度事件
///
/// 每个目标完成和每次终止状态转换时推送给外部通知通道
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    #[serde(rename = "type")]
    pub event_type: ProgressEventType,
    pub job_id: Uuid,
    pub progress_percent: f64,
    pub current_step: String,
    pub results_count: u32,
    pub timestamp: DateTime<Utc>,
    pub payload: serde_json::Value,
}

impl ProgressEvent {
    /// 根据任务当前状态构造事件
    pub fn from_job(
        event_type: ProgressEventType,
        job: &Job,
        current_step: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            event_type,
            job_id: job.id,
            progress_percent: job.progress_percent,
            current_step: current_step.into(),
            results_count: job.results_count,
            timestamp: Utc::now(),
            payload,
        }
    }

    /// 终止状态对应的事件类型
    pub fn terminal_type(status: JobStatus) -> Option<ProgressEventType> {
        match status {
            JobStatus::Completed => Some(ProgressEventType::Completed),
            JobStatus::Failed => Some(ProgressEventType::Failed),
            JobStatus::Cancelled => Some(ProgressEventType::Cancelled),
            _ => None,
        }
    }
}
