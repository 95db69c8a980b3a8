// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 基础设施层模块
///
/// 提供领域层协作者接口的具体实现：
/// - 指标（metrics）：Prometheus 导出器
/// - 通知（notifications）：基于广播通道的进度事件发布
/// - 仓库实现（repositories）：内存中的线索与任务存储
pub mod metrics;
pub mod notifications;
pub mod repositories;
