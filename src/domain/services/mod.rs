// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 领域服务模块
///
/// 该模块包含线索数据处理的核心业务逻辑。
///
/// 包含的服务：
/// - 清洗（cleaner）：字段规范化与校验
/// - 去重（deduplicator）：公司与联系人的模糊匹配与合并
/// - 增强（enrichment）：行业、规模、职级等本地推断
/// - 任务管理（job_manager）：任务生命周期、进度与事件发布
/// - 评分（lead_scorer）：四分类加权评分
/// - 通知（notification_service）：进度事件发布接口
/// - 管道（pipeline）：串联 清洗 → 去重 → 增强 → 评分
pub mod cleaner;
pub mod deduplicator;
pub mod enrichment;
pub mod job_manager;
pub mod lead_scorer;
pub mod notification_service;
pub mod pipeline;
