// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 领域模型模块
///
/// 该模块定义了系统的核心业务实体，包括：
/// - 任务（job）：一次线索抓取请求及其生命周期
/// - 线索（lead）：原始记录、公司、联系人与评分明细
/// - 事件（event）：推送给外部通知通道的进度事件
pub mod event;
pub mod job;
pub mod lead;
