// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, instrument};
use url::Url;

use crate::domain::models::job::{JobType, SearchParameters};
use crate::domain::models::lead::{RawCompany, RawContact, RawRecord};
use crate::domain::services::cleaner::clean_url;
use crate::engines::extractors::html::{
    document_text, first_attr, first_text, links, meta_content, page_title, parse_base, selector,
    EMAIL_RE, HIRING_RE, PHONE_RE,
};
use crate::engines::http_fetcher::HttpFetcher;
use crate::engines::proxy_manager::ProxyChoice;
use crate::engines::traits::{
    ExtractError, Extractor, ExtractorOptions, FetchedPage, PlanError, RawResponse, Target,
};
use crate::utils::url_utils::{email_domain, normalize_domain, same_host};

static CONTACT_LINK_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(contact|about|team|our-team|meet-the-team|leadership|people|staff|management)")
        .expect("valid contact link regex")
});
static LINKEDIN_COMPANY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^https?://(?:[a-z]{2,3}\.)?linkedin\.com/company/").expect("valid linkedin regex")
});
static ASSET_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\.(png|jpe?g|gif|svg|webp|css|js)$").expect("valid asset regex")
});

/// 不代表具体个人的通用邮箱前缀
const GENERIC_MAILBOXES: &[&str] = &[
    "info", "contact", "hello", "sales", "support", "admin", "office", "team", "help", "enquiries",
    "inquiries", "noreply", "no-reply", "careers", "jobs", "press", "billing",
];

static MEMBER_CARD: Lazy<Selector> = Lazy::new(|| {
    selector(".team-member, .person, .staff-member, .member, [itemtype*='Person']")
});
static MEMBER_NAME: Lazy<Selector> = Lazy::new(|| selector("[itemprop='name'], .name, h3, h4"));
static MEMBER_TITLE: Lazy<Selector> =
    Lazy::new(|| selector("[itemprop='jobTitle'], .title, .role, .position"));
static MAILTO: Lazy<Selector> = Lazy::new(|| selector("a[href^='mailto:']"));
static TEL: Lazy<Selector> = Lazy::new(|| selector("a[href^='tel:']"));
static LINKEDIN_PERSON: Lazy<Selector> = Lazy::new(|| selector("a[href*='linkedin.com/in/']"));

const COMPANY_CONFIDENCE: f64 = 0.7;
const MEMBER_CONFIDENCE: f64 = 0.65;
const MAILBOX_CONFIDENCE: f64 = 0.5;

fn mailto_address(href: &str) -> String {
    let address = href.trim_start_matches("mailto:");
    address.split('?').next().unwrap_or(address).trim().to_string()
}

fn is_generic_mailbox(email: &str) -> bool {
    let local = email.split('@').next().unwrap_or_default().to_lowercase();
    GENERIC_MAILBOXES.contains(&local.as_str())
}

/// 页面中出现的联系方式
#[derive(Default)]
struct ContactSignals {
    emails: BTreeSet<String>,
    phones: Vec<String>,
    linkedin: Option<String>,
}

impl ContactSignals {
    fn collect(&mut self, document: &Html, base: &Url) {
        for a in document.select(&MAILTO) {
            if let Some(href) = a.value().attr("href") {
                self.emails.insert(mailto_address(href).to_lowercase());
            }
        }
        let text = document_text(document);
        for m in EMAIL_RE.find_iter(&text) {
            if !ASSET_RE.is_match(m.as_str()) {
                self.emails.insert(m.as_str().to_lowercase());
            }
        }
        for a in document.select(&TEL) {
            if let Some(href) = a.value().attr("href") {
                self.push_phone(href.trim_start_matches("tel:"));
            }
        }
        for m in PHONE_RE.find_iter(&text) {
            self.push_phone(m.as_str());
        }
        if self.linkedin.is_none() {
            self.linkedin = links(document, base)
                .into_iter()
                .map(|(url, _)| url.to_string())
                .find(|u| LINKEDIN_COMPANY_RE.is_match(u));
        }
    }

    fn push_phone(&mut self, raw: &str) {
        let raw = raw.trim().to_string();
        let digits: String = raw.chars().filter(char::is_ascii_digit).collect();
        let known = self
            .phones
            .iter()
            .any(|p| p.chars().filter(char::is_ascii_digit).collect::<String>().ends_with(&digits));
        if !raw.is_empty() && !known {
            self.phones.push(raw);
        }
    }
}

/// 公司官网抽取器
///
/// 抓取首页以及最多 `max_pages - 1` 个同站点的联系/关于/团队页，
/// 用正则和 `mailto:`/`tel:` 链接提取邮箱电话，团队卡片提取联系人。
pub struct GenericWebsiteExtractor {
    fetcher: Arc<HttpFetcher>,
    options: ExtractorOptions,
}

impl GenericWebsiteExtractor {
    pub fn new(fetcher: Arc<HttpFetcher>, options: ExtractorOptions) -> Self {
        Self { fetcher, options }
    }

    /// 首页中指向联系/关于/团队页的同站链接
    fn contact_links(&self, homepage: &FetchedPage) -> Vec<String> {
        let Ok(base) = Url::parse(&homepage.url) else {
            return Vec::new();
        };
        let document = Html::parse_document(&homepage.body);
        let mut seen = BTreeSet::new();
        links(&document, &base)
            .into_iter()
            .filter(|(url, text)| {
                matches!(url.scheme(), "http" | "https")
                    && same_host(url, &base)
                    && (CONTACT_LINK_RE.is_match(url.path()) || CONTACT_LINK_RE.is_match(text))
            })
            .map(|(mut url, _)| {
                url.set_fragment(None);
                url.to_string()
            })
            .filter(|u| u != base.as_str() && seen.insert(u.clone()))
            .take(self.options.max_pages.saturating_sub(1) as usize)
            .collect()
    }

    fn company_name(document: &Html, host: &str) -> String {
        meta_content(document, "og:site_name")
            .or_else(|| meta_content(document, "og:title"))
            .or_else(|| page_title(document))
            .unwrap_or_else(|| {
                let label = host.split('.').next().unwrap_or(host);
                let mut chars = label.chars();
                match chars.next() {
                    Some(first) => first.to_uppercase().chain(chars).collect(),
                    None => host.to_string(),
                }
            })
    }

    fn team_members(document: &Html, company: &str, domain: Option<&str>) -> Vec<RawContact> {
        document
            .select(&MEMBER_CARD)
            .filter_map(|card| {
                let name = first_text(card, &MEMBER_NAME);
                let email = first_attr(card, &MAILTO, "href").map(|h| mailto_address(&h));
                if name.is_none() && email.is_none() {
                    return None;
                }
                Some(RawContact {
                    name,
                    email,
                    phone: first_attr(card, &TEL, "href").map(|h| h.trim_start_matches("tel:").to_string()),
                    title: first_text(card, &MEMBER_TITLE),
                    linkedin_url: first_attr(card, &LINKEDIN_PERSON, "href"),
                    company_name: Some(company.to_string()),
                    company_domain: domain.map(str::to_string),
                })
            })
            .collect()
    }
}

#[async_trait]
impl Extractor for GenericWebsiteExtractor {
    fn name(&self) -> &'static str {
        "generic_website"
    }

    fn source_type(&self) -> JobType {
        JobType::GenericWebsite
    }

    fn options(&self) -> ExtractorOptions {
        self.options
    }

    fn plan_targets(&self, params: &SearchParameters, limit: usize) -> Result<Vec<Target>, PlanError> {
        let raw: Vec<String> = ["urls", "websites", "domains"]
            .iter()
            .find_map(|k| params.get(*k))
            .or_else(|| params.get("url"))
            .or_else(|| params.get("website"))
            .map(|v| match v {
                Value::Array(items) => items
                    .iter()
                    .filter_map(|i| i.as_str().map(str::to_string))
                    .collect(),
                Value::String(s) => s.split(',').map(str::to_string).collect(),
                _ => Vec::new(),
            })
            .ok_or_else(|| PlanError::MissingParameter("urls".to_string()))?;

        let mut seen = BTreeSet::new();
        let mut targets = Vec::new();
        for entry in raw.iter().map(|s| s.trim()).filter(|s| !s.is_empty()) {
            let url = clean_url(entry).ok_or_else(|| PlanError::InvalidParameter {
                name: "urls".to_string(),
                reason: format!("{:?} is not a website address", entry),
            })?;
            let label = normalize_domain(&url).unwrap_or_else(|| url.clone());
            if seen.insert(label.clone()) {
                targets.push(Target::new(url, label, 1));
            }
            if targets.len() >= limit {
                break;
            }
        }
        if targets.is_empty() {
            return Err(PlanError::MissingParameter("urls".to_string()));
        }
        Ok(targets)
    }

    #[instrument(skip(self, proxy), fields(extractor = "generic_website", url = %target.url))]
    async fn fetch(&self, target: &Target, proxy: &ProxyChoice) -> Result<RawResponse, ExtractError> {
        let started = Instant::now();
        if self.options.respect_robots {
            self.fetcher.check_robots(&target.url).await?;
        }
        let homepage = self.fetcher.get(&target.url, proxy, None).await?;
        let candidates = self.contact_links(&homepage);
        let mut pages = vec![homepage];

        for url in candidates {
            if self.options.respect_robots && self.fetcher.check_robots(&url).await.is_err() {
                debug!(url = %url, "Skipping page disallowed by robots.txt");
                continue;
            }
            match self.fetcher.get(&url, proxy, None).await {
                Ok(page) => pages.push(page),
                Err(e) => debug!(url = %url, error = %e, "Secondary page unavailable"),
            }
        }

        Ok(RawResponse {
            target: target.clone(),
            pages,
            elapsed: started.elapsed(),
        })
    }

    fn extract(&self, response: &RawResponse) -> Result<Vec<RawRecord>, ExtractError> {
        let Some(homepage) = response.pages.first() else {
            return Err(ExtractError::ParseError("empty response".to_string()));
        };
        let base = parse_base(&homepage.url)?;
        let host = base
            .host_str()
            .ok_or_else(|| ExtractError::ParseError(format!("no host in {}", homepage.url)))?;
        let domain = normalize_domain(host);

        let home_doc = Html::parse_document(&homepage.body);
        let name = Self::company_name(&home_doc, domain.as_deref().unwrap_or(host));
        let description = meta_content(&home_doc, "description")
            .or_else(|| meta_content(&home_doc, "og:description"));

        let mut signals = ContactSignals::default();
        let mut members = Vec::new();
        let mut hiring = false;
        for page in &response.pages {
            let page_base = parse_base(&page.url)?;
            let document = Html::parse_document(&page.body);
            signals.collect(&document, &page_base);
            hiring |= HIRING_RE.is_match(&document_text(&document));
            members.extend(Self::team_members(&document, &name, domain.as_deref()));
        }

        // 优先使用与站点同域的邮箱作为公司邮箱
        let on_domain = |e: &&String| email_domain(e).as_deref() == domain.as_deref();
        let company_email = signals
            .emails
            .iter()
            .filter(on_domain)
            .find(|e| is_generic_mailbox(e))
            .or_else(|| signals.emails.iter().find(on_domain))
            .or_else(|| signals.emails.iter().next())
            .cloned();

        let company = RawCompany {
            name: Some(name.clone()),
            website: Some(homepage.url.clone()),
            domain: domain.clone(),
            phone: signals.phones.first().cloned(),
            email: company_email.clone(),
            description,
            linkedin_url: signals.linkedin.clone(),
            hiring: hiring.then_some(true),
            ..Default::default()
        };

        let mut records = vec![RawRecord::company(
            JobType::GenericWebsite,
            homepage.url.as_str(),
            company,
            COMPANY_CONFIDENCE,
        )];

        let member_emails: BTreeSet<String> = members
            .iter()
            .filter_map(|m| m.email.as_ref().map(|e| e.to_lowercase()))
            .collect();
        records.extend(members.into_iter().map(|member| {
            RawRecord::contact(JobType::GenericWebsite, homepage.url.as_str(), member, MEMBER_CONFIDENCE)
        }));

        // 其余的个人邮箱作为仅有邮箱的联系人
        for email in signals.emails.iter().filter(|e| {
            !is_generic_mailbox(e) && !member_emails.contains(*e) && Some(*e) != company_email.as_ref()
        }) {
            records.push(RawRecord::contact(
                JobType::GenericWebsite,
                homepage.url.as_str(),
                RawContact {
                    email: Some(email.clone()),
                    company_name: Some(name.clone()),
                    company_domain: domain.clone(),
                    ..Default::default()
                },
                MAILBOX_CONFIDENCE,
            ));
        }

        debug!(
            target = %response.target.label,
            pages = response.pages.len(),
            records = records.len(),
            "Website extracted"
        );
        Ok(records)
    }
}
