// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

use crate::domain::models::job::JobType;
use crate::engines::extractors::professional_network::DEFAULT_NETWORK_BASE;
use crate::engines::extractors::search_listing::{
    DEFAULT_DIRECTORY_TEMPLATE, DEFAULT_SEARCH_TEMPLATE,
};
use crate::engines::extractors::{
    GenericWebsiteExtractor, ProfessionalNetworkExtractor, SearchListingExtractor,
};
use crate::engines::http_fetcher::HttpFetcher;
use crate::engines::traits::{Extractor, ExtractorOptions};
use crate::utils::errors::OrchestratorError;

/// 内置数据源的地址配置
#[derive(Debug, Clone)]
pub struct SourceConfig {
    pub search_url_template: String,
    pub directory_url_template: String,
    pub network_base_url: String,
    /// 职业社交网络的会话Cookie
    pub network_session_cookie: Option<String>,
    pub options: ExtractorOptions,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            search_url_template: DEFAULT_SEARCH_TEMPLATE.to_string(),
            directory_url_template: DEFAULT_DIRECTORY_TEMPLATE.to_string(),
            network_base_url: DEFAULT_NETWORK_BASE.to_string(),
            network_session_cookie: None,
            options: ExtractorOptions::default(),
        }
    }
}

/// 抽取器工厂
///
/// 按任务类型查找抽取器。内置变体在构造时注册，调用方可以用 `register` 覆盖或扩展。
#[derive(Clone, Default)]
pub struct ScraperFactory {
    extractors: HashMap<JobType, Arc<dyn Extractor>>,
}

impl ScraperFactory {
    /// 创建空工厂
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册全部内置抽取器
    ///
    /// # 参数
    ///
    /// * `fetcher` - 共享的HTTP抓取器
    /// * `sources` - 各数据源的地址配置
    ///
    /// # 返回值
    ///
    /// 每种任务类型都有对应抽取器的工厂
    pub fn with_builtin(fetcher: Arc<HttpFetcher>, sources: &SourceConfig) -> Self {
        let mut factory = Self::new();
        factory.register(Arc::new(SearchListingExtractor::new(
            fetcher.clone(),
            sources.search_url_template.clone(),
            sources.options,
        )));
        factory.register(Arc::new(SearchListingExtractor::directory(
            fetcher.clone(),
            sources.directory_url_template.clone(),
            sources.options,
        )));
        factory.register(Arc::new(ProfessionalNetworkExtractor::new(
            fetcher.clone(),
            sources.network_base_url.clone(),
            sources.network_session_cookie.clone(),
            sources.options,
        )));
        factory.register(Arc::new(GenericWebsiteExtractor::new(fetcher, sources.options)));
        factory
    }

    /// 注册抽取器，已存在的同类型抽取器会被替换
    pub fn register(&mut self, extractor: Arc<dyn Extractor>) {
        let job_type = extractor.source_type();
        info!(job_type = %job_type, extractor = extractor.name(), "Extractor registered");
        self.extractors.insert(job_type, extractor);
    }

    /// 获取任务类型对应的抽取器
    pub fn get(&self, job_type: JobType) -> Result<Arc<dyn Extractor>, OrchestratorError> {
        self.extractors
            .get(&job_type)
            .cloned()
            .ok_or_else(|| OrchestratorError::UnsupportedJobType(job_type.to_string()))
    }

    /// 已注册的任务类型
    pub fn job_types(&self) -> Vec<JobType> {
        let mut types: Vec<JobType> = self.extractors.keys().copied().collect();
        types.sort_by_key(|t| t.to_string());
        types
    }
}
