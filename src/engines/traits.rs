// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

use crate::domain::models::job::{ErrorCategory, JobType, SearchParameters};
use crate::domain::models::lead::RawRecord;
use crate::engines::proxy_manager::ProxyChoice;

/// 抽取错误
///
/// 所有数据源的失败都归入这四类，编排器只根据类别决定是否重试
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExtractError {
    /// 触发了目标站点的防护
    #[error("Blocked: {0}")]
    Blocked(String),
    /// 超时、连接失败或服务端错误
    #[error("Timeout: {0}")]
    Timeout(String),
    /// 页面不存在或被 robots.txt 禁止
    #[error("Not found: {0}")]
    NotFound(String),
    /// 页面结构无法解析
    #[error("Parse error: {0}")]
    ParseError(String),
}

impl ExtractError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            ExtractError::Blocked(_) => ErrorCategory::Blocked,
            ExtractError::Timeout(_) => ErrorCategory::Transient,
            ExtractError::NotFound(_) | ExtractError::ParseError(_) => ErrorCategory::Structural,
        }
    }

    /// 判断错误是否可重试
    pub fn is_retryable(&self) -> bool {
        matches!(self, ExtractError::Blocked(_) | ExtractError::Timeout(_))
    }
}

/// 目标规划错误，说明搜索参数本身不可用
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PlanError {
    #[error("Missing search parameter: {0}")]
    MissingParameter(String),
    #[error("Invalid search parameter {name}: {reason}")]
    InvalidParameter { name: String, reason: String },
}

/// 抽取器选项
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExtractorOptions {
    /// 抓取前是否检查 robots.txt
    pub respect_robots: bool,
    /// 单个目标最多抓取的页面数
    pub max_pages: u32,
}

impl Default for ExtractorOptions {
    fn default() -> Self {
        Self {
            respect_robots: true,
            max_pages: 3,
        }
    }
}

/// 抓取目标
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Target {
    pub url: String,
    /// 用于日志和错误记录的标签
    pub label: String,
    /// 限流键
    pub rate_key: String,
    pub page: u32,
}

impl Target {
    pub fn new(url: impl Into<String>, label: impl Into<String>, page: u32) -> Self {
        let url = url.into();
        Self {
            rate_key: crate::utils::url_utils::rate_limit_key(&url),
            url,
            label: label.into(),
            page,
        }
    }
}

/// 抓取到的单个页面
#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub url: String,
    pub status: u16,
    pub body: String,
}

/// 一个目标的原始响应（可能包含多个页面）
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub target: Target,
    pub pages: Vec<FetchedPage>,
    pub elapsed: Duration,
}

/// 抽取器
///
/// 每种数据源一个实现，由 `ScraperFactory` 按任务类型选择
#[async_trait]
pub trait Extractor: Send + Sync {
    /// 抽取器名称
    fn name(&self) -> &'static str;

    /// 产出记录的来源类型
    fn source_type(&self) -> JobType;

    fn options(&self) -> ExtractorOptions;

    /// 将搜索参数解析为抓取目标
    ///
    /// # 参数
    ///
    /// * `params` - 任务搜索参数
    /// * `limit` - 目标数量上限
    fn plan_targets(&self, params: &SearchParameters, limit: usize) -> Result<Vec<Target>, PlanError>;

    /// 抓取目标页面
    async fn fetch(&self, target: &Target, proxy: &ProxyChoice) -> Result<RawResponse, ExtractError>;

    /// 从响应中抽取原始记录
    fn extract(&self, response: &RawResponse) -> Result<Vec<RawRecord>, ExtractError>;
}
