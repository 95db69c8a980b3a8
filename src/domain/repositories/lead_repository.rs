// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::domain::models::job::JobSnapshot;
use crate::domain::models::lead::{ExistingEntity, ProcessedLead};
use crate::utils::errors::RepositoryError;
use async_trait::async_trait;
use uuid::Uuid;

/// 线索仓库特质
///
/// 外部持久化协作者的接口。三个操作都视为可能失败的 I/O，
/// 失败只记录为任务错误，不影响内存中的任务状态。
#[async_trait]
pub trait LeadRepository: Send + Sync {
    /// 保存任务产出的线索
    async fn save_records(&self, job_id: Uuid, leads: &[ProcessedLead])
        -> Result<(), RepositoryError>;

    /// 加载作用域内已存储的实体，供去重器匹配
    async fn load_existing_for_dedup(
        &self,
        scope_key: &str,
    ) -> Result<Vec<ExistingEntity>, RepositoryError>;

    /// 持久化任务快照
    async fn update_job(&self, snapshot: &JobSnapshot) -> Result<(), RepositoryError>;
}
