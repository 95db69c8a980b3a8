// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};
use serde_json::Value;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, instrument, warn};
use url::Url;

use crate::domain::models::job::{JobType, SearchParameters};
use crate::domain::models::lead::{RawCompany, RawContact, RawRecord};
use crate::engines::extractors::html::{
    document_text, first_attr, first_text, meta_content, parse_base, selector, HIRING_RE,
};
use crate::engines::http_fetcher::HttpFetcher;
use crate::engines::proxy_manager::ProxyChoice;
use crate::engines::traits::{
    ExtractError, Extractor, ExtractorOptions, FetchedPage, PlanError, RawResponse, Target,
};
use crate::utils::url_utils::resolve_url;

pub const DEFAULT_NETWORK_BASE: &str = "https://www.linkedin.com";

static AUTHWALL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(authwall|sign in to see|join now to see|login-form|session_redirect)")
        .expect("valid authwall regex")
});
static SLUG_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_-]*$").expect("valid slug regex"));

static JSON_LD: Lazy<Selector> = Lazy::new(|| selector(r#"script[type="application/ld+json"]"#));
static PERSON_CARD: Lazy<Selector> = Lazy::new(|| {
    selector(".org-people-profile-card, .people-card, [data-person], [itemtype*='Person']")
});
static PERSON_NAME: Lazy<Selector> = Lazy::new(|| {
    selector(".org-people-profile-card__profile-title, .name, [itemprop='name'], h3")
});
static PERSON_TITLE: Lazy<Selector> =
    Lazy::new(|| selector(".subtitle, .title, .headline, [itemprop='jobTitle']"));
static PROFILE_LINK: Lazy<Selector> = Lazy::new(|| selector("a[href*='/in/']"));

const COMPANY_CONFIDENCE: f64 = 0.85;
const CONTACT_CONFIDENCE: f64 = 0.75;

/// 职业社交网络抽取器
///
/// 目标是公司主页（地址或短名）。公司信息来自 JSON-LD 和 OpenGraph，
/// `max_pages` 大于 1 时额外抓取员工页解析联系人。遇到登录墙视为被拦截。
pub struct ProfessionalNetworkExtractor {
    fetcher: Arc<HttpFetcher>,
    base_url: String,
    session_cookie: Option<String>,
    options: ExtractorOptions,
}

impl ProfessionalNetworkExtractor {
    pub fn new(
        fetcher: Arc<HttpFetcher>,
        base_url: impl Into<String>,
        session_cookie: Option<String>,
        options: ExtractorOptions,
    ) -> Self {
        Self {
            fetcher,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            session_cookie,
            options,
        }
    }

    fn company_url(&self, entry: &str) -> Result<String, PlanError> {
        let entry = entry.trim();
        if entry.starts_with("http://") || entry.starts_with("https://") {
            let url = Url::parse(entry).map_err(|e| PlanError::InvalidParameter {
                name: "companies".to_string(),
                reason: format!("{}: {}", entry, e),
            })?;
            let mut url = url.to_string();
            if !url.ends_with('/') {
                url.push('/');
            }
            return Ok(url);
        }
        if !SLUG_RE.is_match(entry) {
            return Err(PlanError::InvalidParameter {
                name: "companies".to_string(),
                reason: format!("{:?} is neither a URL nor a company slug", entry),
            });
        }
        Ok(format!("{}/company/{}/", self.base_url, entry))
    }

    fn check_authwall(page: &FetchedPage) -> Result<(), ExtractError> {
        if AUTHWALL_RE.is_match(&page.body) {
            return Err(ExtractError::Blocked(format!("login wall at {}", page.url)));
        }
        Ok(())
    }

    fn session_cookie(&self) -> Option<String> {
        self.session_cookie.as_deref().map(|c| {
            if c.contains('=') {
                c.to_string()
            } else {
                format!("li_at={}", c)
            }
        })
    }

    /// 从 JSON-LD 中找出组织信息
    fn organization(document: &Html) -> Option<Value> {
        document
            .select(&JSON_LD)
            .filter_map(|script| serde_json::from_str::<Value>(&script.inner_html()).ok())
            .flat_map(|value| match value {
                Value::Array(items) => items,
                Value::Object(ref map) if map.contains_key("@graph") => map
                    .get("@graph")
                    .and_then(|g| g.as_array())
                    .cloned()
                    .unwrap_or_default(),
                other => vec![other],
            })
            .find(|item| {
                matches!(
                    item.get("@type").and_then(|t| t.as_str()),
                    Some("Organization" | "Corporation" | "LocalBusiness")
                )
            })
    }

    fn parse_company(&self, page: &FetchedPage, document: &Html) -> Option<RawCompany> {
        let org = Self::organization(document);
        let field = |key: &str| {
            org.as_ref()
                .and_then(|o| o.get(key))
                .and_then(|v| v.as_str())
                .map(str::to_string)
        };

        let name = field("name")
            .or_else(|| meta_content(document, "og:title"))
            .map(|n| n.split(" | ").next().unwrap_or(&n).trim().to_string())
            .filter(|n| !n.is_empty())?;

        let address = org.as_ref().and_then(|o| o.get("address"));
        let location = address.and_then(|a| {
            let parts: Vec<&str> = ["addressLocality", "addressRegion", "addressCountry"]
                .iter()
                .filter_map(|k| a.get(*k).and_then(|v| v.as_str()))
                .collect();
            (!parts.is_empty()).then(|| parts.join(", "))
        });

        let employee_count = org.as_ref().and_then(|o| o.get("numberOfEmployees")).and_then(|n| {
            let v = n.get("value").unwrap_or(n);
            v.as_str()
                .map(str::to_string)
                .or_else(|| v.as_u64().map(|c| c.to_string()))
        });

        let website = field("sameAs")
            .filter(|u| !u.contains("linkedin.com"))
            .or_else(|| field("url").filter(|u| !u.contains("linkedin.com")));

        let text = document_text(document);
        Some(RawCompany {
            name: Some(name),
            website,
            industry: field("industry"),
            location,
            phone: field("telephone"),
            email: field("email"),
            description: field("description").or_else(|| meta_content(document, "og:description")),
            employee_count,
            linkedin_url: Some(page.url.clone()),
            hiring: HIRING_RE.is_match(&text).then_some(true),
            ..Default::default()
        })
    }

    fn parse_people(&self, page: &FetchedPage, document: &Html, company_name: Option<&str>) -> Vec<RawContact> {
        let Ok(base) = parse_base(&page.url) else {
            return Vec::new();
        };
        document
            .select(&PERSON_CARD)
            .filter_map(|card| {
                let name = first_text(card, &PERSON_NAME)?;
                let linkedin_url = first_attr(card, &PROFILE_LINK, "href")
                    .and_then(|href| resolve_url(&base, &href).ok())
                    .map(|u| u.to_string());
                Some(RawContact {
                    name: Some(name),
                    title: first_text(card, &PERSON_TITLE),
                    linkedin_url,
                    company_name: company_name.map(str::to_string),
                    ..Default::default()
                })
            })
            .collect()
    }
}

#[async_trait]
impl Extractor for ProfessionalNetworkExtractor {
    fn name(&self) -> &'static str {
        "professional_network"
    }

    fn source_type(&self) -> JobType {
        JobType::ProfessionalNetwork
    }

    fn options(&self) -> ExtractorOptions {
        self.options
    }

    fn plan_targets(&self, params: &SearchParameters, limit: usize) -> Result<Vec<Target>, PlanError> {
        let entries: Vec<String> = match params.get("companies").or_else(|| params.get("company_urls")) {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|v| v.as_str())
                .map(str::to_string)
                .collect(),
            Some(Value::String(s)) => s.split(',').map(str::to_string).collect(),
            Some(_) => {
                return Err(PlanError::InvalidParameter {
                    name: "companies".to_string(),
                    reason: "expected a list of company URLs or slugs".to_string(),
                })
            }
            None => match params.get("company").and_then(|v| v.as_str()) {
                Some(single) => vec![single.to_string()],
                None => return Err(PlanError::MissingParameter("companies".to_string())),
            },
        };

        let entries: Vec<&str> = entries.iter().map(|e| e.trim()).filter(|e| !e.is_empty()).collect();
        if entries.is_empty() {
            return Err(PlanError::MissingParameter("companies".to_string()));
        }

        entries
            .into_iter()
            .take(limit)
            .map(|entry| Ok(Target::new(self.company_url(entry)?, entry, 1)))
            .collect()
    }

    #[instrument(skip(self, proxy), fields(extractor = "professional_network", url = %target.url))]
    async fn fetch(&self, target: &Target, proxy: &ProxyChoice) -> Result<RawResponse, ExtractError> {
        let started = Instant::now();
        if self.options.respect_robots {
            self.fetcher.check_robots(&target.url).await?;
        }

        let cookie = self.session_cookie();
        let page = self.fetcher.get(&target.url, proxy, cookie.as_deref()).await?;
        Self::check_authwall(&page)?;
        let mut pages = vec![page];

        if self.options.max_pages > 1 {
            let people_url = format!("{}people/", target.url);
            match self.fetcher.get(&people_url, proxy, cookie.as_deref()).await {
                Ok(people) if Self::check_authwall(&people).is_ok() => pages.push(people),
                Ok(_) => warn!(url = %people_url, "People page behind login wall, skipping"),
                Err(e) => debug!(url = %people_url, error = %e, "People page unavailable"),
            }
        }

        Ok(RawResponse {
            target: target.clone(),
            pages,
            elapsed: started.elapsed(),
        })
    }

    fn extract(&self, response: &RawResponse) -> Result<Vec<RawRecord>, ExtractError> {
        let Some((first, rest)) = response.pages.split_first() else {
            return Err(ExtractError::ParseError("empty response".to_string()));
        };

        let document = Html::parse_document(&first.body);
        let company = self.parse_company(first, &document).ok_or_else(|| {
            ExtractError::ParseError(format!("no organization data found on {}", first.url))
        })?;
        let company_name = company.name.clone();

        let mut records = vec![RawRecord::company(
            JobType::ProfessionalNetwork,
            first.url.as_str(),
            company,
            COMPANY_CONFIDENCE,
        )];

        for page in std::iter::once(first).chain(rest) {
            let document = Html::parse_document(&page.body);
            records.extend(
                self.parse_people(page, &document, company_name.as_deref())
                    .into_iter()
                    .map(|contact| {
                        RawRecord::contact(
                            JobType::ProfessionalNetwork,
                            page.url.as_str(),
                            contact,
                            CONTACT_CONFIDENCE,
                        )
                    }),
            );
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::lead::RecordPayload;
    use serde_json::json;
    use std::time::Duration;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const COMPANY_PAGE: &str = r#"
        <html><head>
          <meta property="og:title" content="Acme Analytics | LinkedIn">
          <script type="application/ld+json">
          {"@context":"http://schema.org","@type":"Organization","name":"Acme Analytics",
           "sameAs":"https://acme-analytics.com","description":"Cloud data platform",
           "numberOfEmployees":{"@type":"QuantitativeValue","value":250},
           "address":{"addressLocality":"Austin","addressRegion":"TX"}}
          </script>
        </head><body><p>We're hiring engineers.</p></body></html>"#;

    const PEOPLE_PAGE: &str = r#"
        <html><body>
          <li class="org-people-profile-card">
            <a href="/in/jane-doe"><div class="org-people-profile-card__profile-title">Jane Doe</div></a>
            <div class="subtitle">VP of Engineering</div>
          </li>
          <li class="org-people-profile-card"><div class="subtitle">No name card</div></li>
        </body></html>"#;

    fn extractor(base: &str, max_pages: u32) -> ProfessionalNetworkExtractor {
        ProfessionalNetworkExtractor::new(
            Arc::new(HttpFetcher::default()),
            base,
            Some("secret".to_string()),
            ExtractorOptions {
                respect_robots: false,
                max_pages,
            },
        )
    }

    #[test]
    fn test_plan_targets_accepts_slugs_and_urls() {
        let params: SearchParameters = [(
            "companies".to_string(),
            json!(["acme-analytics", "https://www.linkedin.com/company/globex"]),
        )]
        .into_iter()
        .collect();
        let targets = extractor(DEFAULT_NETWORK_BASE, 1).plan_targets(&params, 10).unwrap();
        assert_eq!(targets[0].url, "https://www.linkedin.com/company/acme-analytics/");
        assert_eq!(targets[1].url, "https://www.linkedin.com/company/globex/");
        assert_eq!(targets[0].rate_key, "linkedin.com");
    }

    #[test]
    fn test_plan_targets_rejects_bad_input() {
        let ex = extractor(DEFAULT_NETWORK_BASE, 1);
        assert_eq!(
            ex.plan_targets(&SearchParameters::new(), 10).unwrap_err(),
            PlanError::MissingParameter("companies".to_string())
        );
        let params: SearchParameters = [("companies".to_string(), json!(["not a slug!"]))]
            .into_iter()
            .collect();
        assert!(matches!(
            ex.plan_targets(&params, 10),
            Err(PlanError::InvalidParameter { .. })
        ));
    }

    #[test]
    fn test_extract_company_and_people() {
        let response = RawResponse {
            target: Target::new("https://www.linkedin.com/company/acme/", "acme", 1),
            pages: vec![
                FetchedPage {
                    url: "https://www.linkedin.com/company/acme/".into(),
                    status: 200,
                    body: COMPANY_PAGE.into(),
                },
                FetchedPage {
                    url: "https://www.linkedin.com/company/acme/people/".into(),
                    status: 200,
                    body: PEOPLE_PAGE.into(),
                },
            ],
            elapsed: Duration::ZERO,
        };

        let records = extractor(DEFAULT_NETWORK_BASE, 2).extract(&response).unwrap();
        assert_eq!(records.len(), 2);

        let RecordPayload::Company(company) = &records[0].payload else {
            panic!("expected company first");
        };
        assert_eq!(company.name.as_deref(), Some("Acme Analytics"));
        assert_eq!(company.website.as_deref(), Some("https://acme-analytics.com"));
        assert_eq!(company.employee_count.as_deref(), Some("250"));
        assert_eq!(company.location.as_deref(), Some("Austin, TX"));
        assert_eq!(company.hiring, Some(true));

        let RecordPayload::Contact(contact) = &records[1].payload else {
            panic!("expected contact");
        };
        assert_eq!(contact.name.as_deref(), Some("Jane Doe"));
        assert_eq!(contact.title.as_deref(), Some("VP of Engineering"));
        assert_eq!(
            contact.linkedin_url.as_deref(),
            Some("https://www.linkedin.com/in/jane-doe")
        );
        assert_eq!(contact.company_name.as_deref(), Some("Acme Analytics"));
    }

    #[test]
    fn test_extract_falls_back_to_open_graph() {
        let response = RawResponse {
            target: Target::new("https://www.linkedin.com/company/acme/", "acme", 1),
            pages: vec![FetchedPage {
                url: "https://www.linkedin.com/company/acme/".into(),
                status: 200,
                body: r#"<html><head><meta property="og:title" content="Initech | LinkedIn"></head></html>"#.into(),
            }],
            elapsed: Duration::ZERO,
        };
        let records = extractor(DEFAULT_NETWORK_BASE, 1).extract(&response).unwrap();
        let RecordPayload::Company(company) = &records[0].payload else {
            panic!("expected company");
        };
        assert_eq!(company.name.as_deref(), Some("Initech"));
    }

    #[tokio::test]
    async fn test_fetch_sends_cookie_and_detects_login_wall() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/company/acme/"))
            .and(header("cookie", "li_at=secret"))
            .respond_with(ResponseTemplate::new(200).set_body_string(COMPANY_PAGE))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/company/acme/people/"))
            .respond_with(ResponseTemplate::new(200).set_body_string(PEOPLE_PAGE))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/company/walled/"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("<html><body class=\"authwall\">Join now to see</body></html>"),
            )
            .mount(&server)
            .await;

        let ex = extractor(&server.uri(), 2);
        let target = Target::new(format!("{}/company/acme/", server.uri()), "acme", 1);
        let response = ex.fetch(&target, &ProxyChoice::Direct).await.unwrap();
        assert_eq!(response.pages.len(), 2);

        let walled = Target::new(format!("{}/company/walled/", server.uri()), "walled", 1);
        let err = ex.fetch(&walled, &ProxyChoice::Direct).await.unwrap_err();
        assert!(matches!(err, ExtractError::Blocked(_)));
    }
}
