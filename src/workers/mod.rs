// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 工作器模块
///
/// 提供任务编排和工作池：目标分发、重试、取消与结果汇总
pub mod orchestrator;

pub use orchestrator::{Orchestrator, OrchestratorConfig};
