// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::domain::models::event::ProgressEvent;
use crate::utils::errors::PublishError;

/// 进度发布特质
///
/// 外部通知通道的接口。`JobManager` 在持有任务锁时调用，
/// 因此实现必须是非阻塞的同步调用，事件顺序与任务变更顺序一致。
pub trait ProgressPublisher: Send + Sync {
    /// 发布进度事件
    ///
    /// # 参数
    ///
    /// * `event` - 进度事件
    ///
    /// # 返回值
    ///
    /// * `Ok(())` - 发布成功
    /// * `Err(PublishError)` - 发布失败，调用方只记录日志
    fn publish(&self, event: ProgressEvent) -> Result<(), PublishError>;
}
