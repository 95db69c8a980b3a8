// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use scraper::{Html, Selector};
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, instrument};
use url::Url;

use crate::domain::models::job::{JobType, SearchParameters};
use crate::domain::models::lead::{RawCompany, RawRecord};
use crate::engines::extractors::html::{
    element_text, first_attr, first_text, parse_base, selector, HIRING_RE,
};
use crate::engines::http_fetcher::HttpFetcher;
use crate::engines::proxy_manager::ProxyChoice;
use crate::engines::traits::{
    ExtractError, Extractor, ExtractorOptions, PlanError, RawResponse, Target,
};
use crate::utils::url_utils::resolve_url;

/// 默认的企业目录搜索地址模板
pub const DEFAULT_SEARCH_TEMPLATE: &str =
    "https://www.yellowpages.com/search?search_terms={query}&geo_location_terms={location}&page={page}";

/// 默认的行业目录地址模板
pub const DEFAULT_DIRECTORY_TEMPLATE: &str =
    "https://www.manta.com/search?search={query}&context={location}&pg={page}";

static CARD: Lazy<Selector> = Lazy::new(|| {
    selector(
        ".result, .listing, .business-card, .search-result, [itemtype*='LocalBusiness'], [itemtype*='Organization']",
    )
});
static NAME: Lazy<Selector> =
    Lazy::new(|| selector(".business-name, [itemprop='name'], h2, h3"));
static WEBSITE: Lazy<Selector> = Lazy::new(|| {
    selector("a.website, a.track-visit-website, a[itemprop='url'], a[data-type='website']")
});
static PHONE: Lazy<Selector> = Lazy::new(|| selector(".phone, [itemprop='telephone']"));
static ADDRESS: Lazy<Selector> = Lazy::new(|| {
    selector(".address, .adr, .street-address, .locality, [itemprop='address']")
});
static CATEGORY: Lazy<Selector> = Lazy::new(|| selector(".categories, .category"));
static DESCRIPTION: Lazy<Selector> = Lazy::new(|| selector(".snippet, .description, p"));
static EMPLOYEES: Lazy<Selector> = Lazy::new(|| selector(".employees, [itemprop='numberOfEmployees']"));
static EMAIL_LINK: Lazy<Selector> = Lazy::new(|| selector("a[href^='mailto:']"));

const BASE_CONFIDENCE: f64 = 0.6;

/// 企业目录列表抽取器
///
/// 根据查询词和地点生成分页的搜索结果地址，用CSS选择器解析每张企业卡片。
/// `directory` 任务类型使用同一个实现，只是地址模板不同。
pub struct SearchListingExtractor {
    fetcher: Arc<HttpFetcher>,
    source_type: JobType,
    url_template: String,
    options: ExtractorOptions,
}

impl SearchListingExtractor {
    pub fn new(fetcher: Arc<HttpFetcher>, url_template: impl Into<String>, options: ExtractorOptions) -> Self {
        Self {
            fetcher,
            source_type: JobType::SearchListing,
            url_template: url_template.into(),
            options,
        }
    }

    /// 行业目录变体
    pub fn directory(fetcher: Arc<HttpFetcher>, url_template: impl Into<String>, options: ExtractorOptions) -> Self {
        Self {
            source_type: JobType::Directory,
            ..Self::new(fetcher, url_template, options)
        }
    }

    fn render(template: &str, query: &str, location: &str, page: u32) -> String {
        template
            .replace("{query}", &urlencoding::encode(query))
            .replace("{location}", &urlencoding::encode(location))
            .replace("{page}", &page.to_string())
    }

    fn parse_card(
        &self,
        card: scraper::ElementRef<'_>,
        base: &Url,
        source_url: &str,
    ) -> Option<RawRecord> {
        let name = first_text(card, &NAME)?;

        let website = first_attr(card, &WEBSITE, "href")
            .and_then(|href| resolve_url(base, &href).ok())
            .map(|u| u.to_string());
        let email = first_attr(card, &EMAIL_LINK, "href")
            .map(|href| href.trim_start_matches("mailto:").to_string());
        let text = element_text(card);

        let company = RawCompany {
            name: Some(name),
            website,
            phone: first_text(card, &PHONE),
            location: first_text(card, &ADDRESS),
            industry: first_text(card, &CATEGORY),
            description: first_text(card, &DESCRIPTION),
            employee_count: first_text(card, &EMPLOYEES),
            email,
            hiring: HIRING_RE.is_match(&text).then_some(true),
            ..Default::default()
        };

        let mut confidence = BASE_CONFIDENCE;
        if company.website.is_some() {
            confidence += 0.1;
        }
        if company.phone.is_some() {
            confidence += 0.1;
        }
        Some(RawRecord::company(self.source_type, source_url, company, confidence))
    }
}

#[async_trait]
impl Extractor for SearchListingExtractor {
    fn name(&self) -> &'static str {
        match self.source_type {
            JobType::Directory => "directory",
            _ => "search_listing",
        }
    }

    fn source_type(&self) -> JobType {
        self.source_type
    }

    fn options(&self) -> ExtractorOptions {
        self.options
    }

    fn plan_targets(&self, params: &SearchParameters, limit: usize) -> Result<Vec<Target>, PlanError> {
        let query = ["query", "keywords", "industry"]
            .iter()
            .find_map(|k| params.get(*k).and_then(|v| v.as_str()))
            .map(str::trim)
            .filter(|q| !q.is_empty())
            .ok_or_else(|| PlanError::MissingParameter("query".to_string()))?;
        let location = params
            .get("location")
            .and_then(|v| v.as_str())
            .map(str::trim)
            .unwrap_or_default();
        let template = params
            .get("url_template")
            .and_then(|v| v.as_str())
            .unwrap_or(&self.url_template);

        // 请求的页数不能超过配置的 max_pages
        let max_pages = self.options.max_pages.max(1) as u64;
        let pages = match params.get("pages") {
            Some(v) => v.as_u64().filter(|p| *p > 0).ok_or_else(|| PlanError::InvalidParameter {
                name: "pages".to_string(),
                reason: "must be a positive integer".to_string(),
            })?,
            None => max_pages,
        };
        let pages = (pages.min(max_pages) as usize).min(limit);

        (1..=pages as u32)
            .map(|page| {
                let url = Self::render(template, query, location, page);
                Url::parse(&url).map_err(|e| PlanError::InvalidParameter {
                    name: "url_template".to_string(),
                    reason: e.to_string(),
                })?;
                Ok(Target::new(url, format!("{} page {}", query, page), page))
            })
            .collect()
    }

    #[instrument(skip(self, proxy), fields(extractor = self.name(), url = %target.url))]
    async fn fetch(&self, target: &Target, proxy: &ProxyChoice) -> Result<RawResponse, ExtractError> {
        let started = Instant::now();
        if self.options.respect_robots {
            self.fetcher.check_robots(&target.url).await?;
        }
        let page = self.fetcher.get(&target.url, proxy, None).await?;
        Ok(RawResponse {
            target: target.clone(),
            pages: vec![page],
            elapsed: started.elapsed(),
        })
    }

    fn extract(&self, response: &RawResponse) -> Result<Vec<RawRecord>, ExtractError> {
        let mut records = Vec::new();
        for page in &response.pages {
            let base = parse_base(&page.url)?;
            let document = Html::parse_document(&page.body);
            let cards: Vec<_> = document.select(&CARD).collect();
            if cards.is_empty() {
                return Err(ExtractError::ParseError(format!(
                    "no listing cards matched on {}",
                    page.url
                )));
            }
            records.extend(
                cards
                    .into_iter()
                    .filter_map(|card| self.parse_card(card, &base, &page.url)),
            );
        }
        debug!(target = %response.target.label, records = records.len(), "Listing cards extracted");
        Ok(records)
    }
}
