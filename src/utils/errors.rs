// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use thiserror::Error;
use uuid::Uuid;

use crate::domain::models::job::JobError;

/// 仓库层错误类型
#[derive(Error, Debug, Clone)]
pub enum RepositoryError {
    #[error("存储错误: {0}")]
    StorageError(String),

    #[error("未找到数据")]
    NotFound,

    #[error("无效参数: {0}")]
    InvalidParameter(String),
}

/// 进度事件发布错误
#[derive(Error, Debug, Clone)]
pub enum PublishError {
    #[error("没有订阅者")]
    NoSubscribers,

    #[error("发布通道已关闭")]
    ChannelClosed,
}

/// 编排器错误类型
///
/// 仅用于调用方可感知的同步失败；目标级和记录级错误累积在任务上，不会由此返回。
#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("任务错误: {0}")]
    Job(#[from] JobError),

    #[error("不支持的任务类型: {0}")]
    UnsupportedJobType(String),

    #[error("任务 {0} 已在运行")]
    AlreadyRunning(Uuid),

    #[error("工作协程异常退出: {0}")]
    WorkerPanicked(String),
}
