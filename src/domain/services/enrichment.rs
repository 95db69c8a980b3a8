// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::domain::models::lead::{
    Company, Contact, GrowthSignal, RevenueRange, Seniority, SizeBucket,
};
use crate::utils::url_utils::{email_domain, normalize_domain};

fn word_regex(words: &[&str]) -> Regex {
    let alternation = words
        .iter()
        .map(|w| regex::escape(w))
        .collect::<Vec<_>>()
        .join("|");
    Regex::new(&format!(r"(?i)\b(?:{})\b", alternation)).expect("valid keyword regex")
}

static INDUSTRY_KEYWORDS: Lazy<Vec<(&'static str, Regex)>> = Lazy::new(|| {
    let table: [(&'static str, &[&str]); 10] = [
        ("Technology", &["software", "tech", "ai", "machine learning", "saas", "cloud", "data"]),
        ("Healthcare", &["health", "medical", "pharma", "biotech", "hospital", "clinic"]),
        ("Finance", &["bank", "finance", "fintech", "investment", "insurance", "trading"]),
        ("E-commerce", &["ecommerce", "e-commerce", "retail", "shopping", "marketplace", "store"]),
        ("Education", &["education", "learning", "school", "university", "training"]),
        ("Marketing", &["marketing", "advertising", "agency", "digital marketing"]),
        ("Consulting", &["consulting", "advisory", "services", "strategy"]),
        ("Manufacturing", &["manufacturing", "production", "factory", "industrial"]),
        ("Real Estate", &["real estate", "property", "construction", "development"]),
        ("Media", &["media", "publishing", "news", "entertainment", "content"]),
    ];
    table
        .into_iter()
        .map(|(industry, words)| (industry, word_regex(words)))
        .collect()
});

static SIZE_HINTS: Lazy<Vec<(SizeBucket, Regex)>> = Lazy::new(|| {
    vec![
        (SizeBucket::Enterprise, word_regex(&["fortune 500", "multinational", "worldwide"])),
        (SizeBucket::Large, word_regex(&["enterprise", "global", "international"])),
        (SizeBucket::Medium, word_regex(&["growing", "expanding", "regional"])),
        (SizeBucket::Small, word_regex(&["small", "boutique", "local", "family"])),
        (SizeBucket::Startup, word_regex(&["startup", "start-up", "early stage", "seed"])),
    ]
});

static SENIORITY_PATTERNS: Lazy<Vec<(Seniority, Regex)>> = Lazy::new(|| {
    vec![
        (
            Seniority::CLevel,
            word_regex(&["ceo", "cto", "cfo", "coo", "cmo", "cpo", "chief", "president", "founder", "co-founder", "owner"]),
        ),
        (Seniority::Vp, word_regex(&["vp", "vice president", "evp", "svp"])),
        // "team lead" 必须先于 "lead" 判断
        (Seniority::Manager, word_regex(&["team lead"])),
        (Seniority::Director, word_regex(&["director", "head of", "lead"])),
        (Seniority::Manager, word_regex(&["manager", "supervisor"])),
        (Seniority::Senior, word_regex(&["senior", "sr", "principal"])),
        (Seniority::Junior, word_regex(&["junior", "jr", "associate", "assistant"])),
        (Seniority::Intern, word_regex(&["intern", "trainee"])),
    ]
});

static GROWTH_PATTERNS: Lazy<Vec<(GrowthSignal, Regex)>> = Lazy::new(|| {
    let table: [(GrowthSignal, &str); 6] = [
        (
            GrowthSignal::Hiring,
            r"hiring\s+\d+|\d+\s+new\s+hires?|expanding\s+(?:our\s+)?team|job\s+openings?|we'?re\s+hiring|now\s+hiring|join\s+our\s+team|career\s+opportunities|recruiting",
        ),
        (
            GrowthSignal::Funding,
            r"series\s+[a-f]\b|\$\d+(?:\.\d+)?\s*[mbk]?\s+(?:raised|round)|raised\s+\$\d+|investment\s+round|venture\s+capital|seed\s+(?:funding|round)|angel\s+investment|ipo\b|public\s+offering",
        ),
        (
            GrowthSignal::Expansion,
            r"new\s+offices?|expanding\s+(?:to|into)|international\s+expansion|new\s+locations?|opening\s+in|market\s+expansion",
        ),
        (
            GrowthSignal::ProductLaunch,
            r"new\s+product|product\s+launch|launch(?:ed|es)?\s+(?:a\s+|our\s+)?new|beta\s+launch|next[\s-]generation",
        ),
        (
            GrowthSignal::Partnership,
            r"partnership\s+with|strategic\s+alliance|joint\s+venture|partner(?:ed|s)?\s+with|technology\s+partner",
        ),
        (
            GrowthSignal::Acquisition,
            r"acquired\s+by|acquisition\s+of|acquires\b|merger\s+with|bought\s+by|strategic\s+acquisition",
        ),
    ];
    table
        .into_iter()
        .map(|(signal, pattern)| {
            let re = Regex::new(&format!(r"(?i)\b(?:{})", pattern)).expect("valid growth regex");
            (signal, re)
        })
        .collect()
});

/// 人均营收 (USD)，按行业子串匹配，未命中时使用默认值
const REVENUE_PER_EMPLOYEE: &[(&str, u64)] = &[
    ("technology", 200_000),
    ("finance", 300_000),
    ("healthcare", 150_000),
    ("consulting", 180_000),
    ("manufacturing", 120_000),
    ("e-commerce", 80_000),
    ("retail", 80_000),
    ("education", 60_000),
    ("nonprofit", 40_000),
];
const DEFAULT_REVENUE_PER_EMPLOYEE: u64 = 150_000;

static DECISION_MAKER_RE: Lazy<Regex> =
    Lazy::new(|| word_regex(&["owner", "founder", "partner", "head of", "decision maker"]));

static LINKEDIN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"https?://(?:[a-z]{2,3}\.)?linkedin\.com/(?:company|in)/[A-Za-z0-9_-]+/?")
        .expect("valid linkedin regex")
});

/// 根据名称和描述推断行业，命中关键词最多的行业胜出
pub fn infer_industry(text: &str) -> Option<&'static str> {
    let mut best: Option<(&'static str, usize)> = None;
    for (industry, re) in INDUSTRY_KEYWORDS.iter() {
        let hits = re.find_iter(text).count();
        if hits > 0 && best.map_or(true, |(_, b)| hits > b) {
            best = Some((industry, hits));
        }
    }
    best.map(|(industry, _)| industry)
}

/// 根据描述中的措辞估算规模
pub fn estimate_size(description: &str) -> Option<SizeBucket> {
    SIZE_HINTS
        .iter()
        .find(|(_, re)| re.is_match(description))
        .map(|(size, _)| *size)
}

/// 根据职位识别职级，按从高到低的顺序匹配
pub fn detect_seniority(title: &str) -> Option<Seniority> {
    SENIORITY_PATTERNS
        .iter()
        .find(|(_, re)| re.is_match(title))
        .map(|(level, _)| *level)
        .or(Some(Seniority::Individual))
}

/// 识别文本中的增长信号，结果有序且不重复
pub fn detect_growth_signals(text: &str) -> Vec<GrowthSignal> {
    GROWTH_PATTERNS
        .iter()
        .filter(|(_, re)| re.is_match(text))
        .map(|(signal, _)| *signal)
        .collect()
}

/// 估算营收区间
///
/// 有员工数时按行业人均营收估算，否则取规模分档的典型营收
pub fn estimate_revenue(
    employee_count: Option<u32>,
    industry: Option<&str>,
    size: Option<SizeBucket>,
) -> Option<RevenueRange> {
    if let Some(count) = employee_count.filter(|c| *c > 0) {
        let industry = industry.unwrap_or_default().to_lowercase();
        let per_employee = REVENUE_PER_EMPLOYEE
            .iter()
            .find(|(key, _)| industry.contains(key))
            .map_or(DEFAULT_REVENUE_PER_EMPLOYEE, |(_, v)| *v);
        return Some(RevenueRange::from_usd(u64::from(count) * per_employee));
    }
    let typical = match size? {
        SizeBucket::Startup => 250_000,
        SizeBucket::Small => 2_500_000,
        SizeBucket::Medium => 25_000_000,
        SizeBucket::Large => 250_000_000,
        SizeBucket::Enterprise => 1_000_000_000,
    };
    Some(RevenueRange::from_usd(typical))
}

/// 是否为决策者
pub fn is_decision_maker(title: &str, seniority: Option<Seniority>) -> bool {
    seniority.is_some_and(|s| s >= Seniority::Director) || DECISION_MAKER_RE.is_match(title)
}

fn completeness(parts: &[(bool, f64)]) -> f64 {
    parts.iter().filter(|(present, _)| *present).map(|(_, w)| w).sum()
}

/// 数据增强器
///
/// 确定性的本地推断，不访问网络：行业、规模、营收区间、增长信号、域名、
/// 职级、决策者与数据质量。
#[derive(Debug, Clone, Default)]
pub struct Enricher;

impl Enricher {
    pub fn new() -> Self {
        Self
    }

    /// 增强公司数据
    pub fn enrich_company(&self, company: &mut Company) {
        if company.domain.is_none() {
            company.domain = company.website.as_deref().and_then(normalize_domain);
        }

        let text = format!(
            "{} {}",
            company.name,
            company.description.as_deref().unwrap_or_default()
        );
        if company.industry.is_none() {
            company.industry = infer_industry(&text).map(str::to_string);
        }

        if let Some(count) = company.employee_count {
            company.size = Some(SizeBucket::from_employee_count(count));
        } else if company.size.is_none() {
            company.size = company.description.as_deref().and_then(estimate_size);
        }

        if company.employee_count.is_some() || company.revenue_range.is_none() {
            company.revenue_range = estimate_revenue(
                company.employee_count,
                company.industry.as_deref(),
                company.size,
            );
        }

        for signal in detect_growth_signals(&text) {
            if !company.growth_signals.contains(&signal) {
                company.growth_signals.push(signal);
            }
        }
        if company.hiring && !company.growth_signals.contains(&GrowthSignal::Hiring) {
            company.growth_signals.push(GrowthSignal::Hiring);
        }
        company.growth_signals.sort();
        company.hiring = company.growth_signals.contains(&GrowthSignal::Hiring);

        if company.linkedin_url.is_none() {
            company.linkedin_url = company
                .description
                .as_deref()
                .and_then(|d| LINKEDIN_RE.find(d))
                .map(|m| m.as_str().to_string());
        }

        if let (Some(email), Some(domain)) = (company.email.as_deref(), company.domain.as_deref()) {
            if email_domain(email).as_deref() == Some(domain) {
                company.is_verified = true;
            }
        }

        company.data_quality = self.company_quality(company);
    }

    /// 增强联系人数据
    ///
    /// # 参数
    ///
    /// * `contact` - 待增强的联系人
    /// * `company` - 已关联的公司（如有）
    pub fn enrich_contact(&self, contact: &mut Contact, company: Option<&Company>) {
        if let Some(title) = contact.title.as_deref() {
            contact.seniority = detect_seniority(title);
            contact.is_decision_maker |= is_decision_maker(title, contact.seniority);
        }

        if let Some(company) = company {
            if contact.company_domain.is_none() {
                contact.company_domain = company.domain.clone();
            }
            if contact.company_name.is_none() {
                contact.company_name = Some(company.name.clone());
            }
        }

        // 邮箱域名与公司域名一致视为已验证
        if let (Some(email), Some(domain)) = (contact.email.as_deref(), contact.company_domain.as_deref()) {
            if email_domain(email).as_deref() == Some(domain) {
                contact.is_verified = true;
            }
        }

        contact.data_quality = self.contact_quality(contact);
    }

    /// 公司数据质量：字段完整度 80% + 来源置信度 20%
    pub fn company_quality(&self, c: &Company) -> f64 {
        let complete = completeness(&[
            (true, 0.15),
            (c.domain.is_some(), 0.15),
            (c.website.is_some(), 0.10),
            (c.phone.is_some(), 0.15),
            (c.email.is_some(), 0.10),
            (c.industry.is_some(), 0.10),
            (c.location.is_some(), 0.10),
            (c.size.is_some(), 0.10),
            (c.description.is_some(), 0.05),
        ]);
        round3(0.8 * complete + 0.2 * c.provenance.confidence)
    }

    /// 联系人数据质量：字段完整度 80% + 来源置信度 20%
    pub fn contact_quality(&self, c: &Contact) -> f64 {
        let complete = completeness(&[
            (c.name.is_some(), 0.20),
            (c.email.is_some(), 0.30),
            (c.phone.is_some(), 0.20),
            (c.title.is_some(), 0.15),
            (c.linkedin_url.is_some(), 0.05),
            (c.company_id.is_some() || c.company_name.is_some(), 0.10),
        ]);
        round3(0.8 * complete + 0.2 * c.provenance.confidence)
    }
}

fn round3(v: f64) -> f64 {
    ((v * 1000.0).round() / 1000.0).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::lead::Provenance;
    use chrono::Utc;
    use uuid::Uuid;

    #[test]
    fn test_infer_industry() {
        assert_eq!(infer_industry("Acme Cloud Software"), Some("Technology"));
        assert_eq!(
            infer_industry("Family dental clinic and medical spa"),
            Some("Healthcare")
        );
        // 单词边界：chair 不会命中 ai
        assert_eq!(infer_industry("Chair makers"), None);
    }

    #[test]
    fn test_detect_seniority() {
        assert_eq!(detect_seniority("Chief Executive Officer"), Some(Seniority::CLevel));
        assert_eq!(detect_seniority("VP of Sales"), Some(Seniority::Vp));
        assert_eq!(detect_seniority("Head of Marketing"), Some(Seniority::Director));
        assert_eq!(detect_seniority("Engineering Team Lead"), Some(Seniority::Manager));
        assert_eq!(detect_seniority("Senior Engineer"), Some(Seniority::Senior));
        assert_eq!(detect_seniority("Accountant"), Some(Seniority::Individual));
    }

    #[test]
    fn test_enrich_company() {
        let enricher = Enricher::new();
        let mut company = Company::new(Uuid::nil(), "Acme Analytics", Provenance::new(0.9, Utc::now()));
        company.website = Some("https://www.acme.com/".into());
        company.email = Some("hello@acme.com".into());
        company.description = Some("A growing SaaS data platform. https://www.linkedin.com/company/acme".into());

        enricher.enrich_company(&mut company);

        assert_eq!(company.domain.as_deref(), Some("acme.com"));
        assert_eq!(company.industry.as_deref(), Some("Technology"));
        assert_eq!(company.size, Some(SizeBucket::Medium));
        assert_eq!(
            company.linkedin_url.as_deref(),
            Some("https://www.linkedin.com/company/acme")
        );
        assert!(company.is_verified);
        assert!(company.data_quality > 0.0 && company.data_quality <= 1.0);
    }

    #[test]
    fn test_employee_count_overrides_description_size() {
        let enricher = Enricher::new();
        let mut company = Company::new(Uuid::nil(), "Acme", Provenance::new(0.5, Utc::now()));
        company.employee_count = Some(5000);
        company.description = Some("small local shop".into());
        enricher.enrich_company(&mut company);
        assert_eq!(company.size, Some(SizeBucket::Enterprise));
    }

    #[test]
    fn test_detect_growth_signals() {
        let text = "Backed by venture capital, Acme raised $20M in a Series B and is opening in Berlin. We're hiring!";
        assert_eq!(
            detect_growth_signals(text),
            vec![GrowthSignal::Hiring, GrowthSignal::Funding, GrowthSignal::Expansion]
        );
        assert_eq!(
            detect_growth_signals("Globex was acquired by Initech after a partnership with Hooli"),
            vec![GrowthSignal::Partnership, GrowthSignal::Acquisition]
        );
        assert!(detect_growth_signals("Family bakery since 1952").is_empty());
    }

    #[test]
    fn test_estimate_revenue() {
        // 40 人 x 200k = 8M
        assert_eq!(
            estimate_revenue(Some(40), Some("Technology"), None),
            Some(RevenueRange::From1mTo10m)
        );
        // 未知行业按默认人均营收：400 x 150k = 60M
        assert_eq!(
            estimate_revenue(Some(400), Some("Plumbing"), Some(SizeBucket::Small)),
            Some(RevenueRange::From50mTo100m)
        );
        assert_eq!(
            estimate_revenue(None, None, Some(SizeBucket::Medium)),
            Some(RevenueRange::From10mTo50m)
        );
        assert_eq!(estimate_revenue(None, Some("Technology"), None), None);
    }

    #[test]
    fn test_enrich_company_estimates_revenue_and_growth() {
        let enricher = Enricher::new();
        let mut company = Company::new(Uuid::nil(), "Acme Software", Provenance::new(0.8, Utc::now()));
        company.employee_count = Some(120);
        company.description = Some("Acme closed a seed round and announced a new office in Austin.".into());

        enricher.enrich_company(&mut company);

        assert_eq!(company.industry.as_deref(), Some("Technology"));
        // 120 x 200k = 24M
        assert_eq!(company.revenue_range, Some(RevenueRange::From10mTo50m));
        assert_eq!(
            company.growth_signals,
            vec![GrowthSignal::Funding, GrowthSignal::Expansion]
        );
        assert!(!company.hiring);
    }

    #[test]
    fn test_scraped_hiring_flag_becomes_growth_signal() {
        let enricher = Enricher::new();
        let mut company = Company::new(Uuid::nil(), "Acme", Provenance::new(0.8, Utc::now()));
        company.hiring = true;
        enricher.enrich_company(&mut company);
        assert_eq!(company.growth_signals, vec![GrowthSignal::Hiring]);
        assert!(company.hiring);
    }

    #[test]
    fn test_enrich_contact_verifies_matching_domain() {
        let enricher = Enricher::new();
        let mut company = Company::new(Uuid::nil(), "Acme", Provenance::new(0.5, Utc::now()));
        company.domain = Some("acme.com".into());

        let mut contact = Contact::new(Uuid::nil(), Provenance::new(0.5, Utc::now()));
        contact.name = Some("Jane Doe".into());
        contact.email = Some("jane@acme.com".into());
        contact.title = Some("Director of Operations".into());

        enricher.enrich_contact(&mut contact, Some(&company));
        assert!(contact.is_verified);
        assert!(contact.is_decision_maker);
        assert_eq!(contact.seniority, Some(Seniority::Director));
        assert_eq!(contact.company_domain.as_deref(), Some("acme.com"));
    }
}
