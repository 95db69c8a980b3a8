// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use serde::Deserialize;
use thiserror::Error;

use crate::domain::models::lead::{
    Company, Contact, GrowthSignal, LeadGrade, RevenueRange, ScoreBreakdown, SizeBucket,
};

/// 评分配置错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ScoringError {
    #[error("category maxima sum to {0}, which exceeds 100")]
    MaximaExceedHundred(u32),
}

/// 各分类上限
#[derive(Debug, Clone, Deserialize)]
pub struct CategoryMaxima {
    pub contact_completeness: u32,
    pub business_indicators: u32,
    pub data_quality: u32,
    pub engagement_potential: u32,
}

impl Default for CategoryMaxima {
    fn default() -> Self {
        Self {
            contact_completeness: 25,
            business_indicators: 35,
            data_quality: 25,
            engagement_potential: 15,
        }
    }
}

impl CategoryMaxima {
    pub fn sum(&self) -> u32 {
        self.contact_completeness
            + self.business_indicators
            + self.data_quality
            + self.engagement_potential
    }
}

/// 子信号分值
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SignalPoints {
    pub email: u32,
    pub verified_email: u32,
    pub phone: u32,
    pub named_contact: u32,
    pub title: u32,
    pub decision_maker: u32,
    pub size_enterprise: u32,
    pub size_large: u32,
    pub size_medium: u32,
    pub size_small: u32,
    pub size_startup: u32,
    pub high_value_industry: u32,
    pub known_industry: u32,
    pub website: u32,
    pub hiring: u32,
    /// 营收 1 亿美元以上
    pub revenue_100m_plus: u32,
    /// 营收 1000 万至 1 亿美元
    pub revenue_10m_plus: u32,
    /// 营收 100 万至 1000 万美元
    pub revenue_1m_plus: u32,
    /// 招聘以外的增长信号（融资、扩张、新产品、合作、收购）
    pub growth: u32,
    /// 数据质量 (0.0-1.0) 乘以该值后四舍五入
    pub quality_scale: u32,
    pub domain_match: u32,
    pub multi_source: u32,
    pub social_presence: u32,
    pub reachable: u32,
    pub location: u32,
    pub description: u32,
}

impl Default for SignalPoints {
    fn default() -> Self {
        Self {
            email: 8,
            verified_email: 4,
            phone: 6,
            named_contact: 4,
            title: 3,
            decision_maker: 10,
            size_enterprise: 8,
            size_large: 7,
            size_medium: 6,
            size_small: 4,
            size_startup: 3,
            high_value_industry: 7,
            known_industry: 3,
            website: 5,
            hiring: 5,
            revenue_100m_plus: 6,
            revenue_10m_plus: 4,
            revenue_1m_plus: 2,
            growth: 4,
            quality_scale: 15,
            domain_match: 5,
            multi_source: 5,
            social_presence: 5,
            reachable: 4,
            location: 3,
            description: 3,
        }
    }
}

/// 评分配置
#[derive(Debug, Clone)]
pub struct ScoringConfig {
    pub maxima: CategoryMaxima,
    pub points: SignalPoints,
    /// 高价值行业关键词（小写，子串匹配）
    pub high_value_industries: Vec<String>,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            maxima: CategoryMaxima::default(),
            points: SignalPoints::default(),
            high_value_industries: [
                "technology",
                "software",
                "fintech",
                "finance",
                "healthcare",
                "biotechnology",
                "artificial intelligence",
                "cybersecurity",
                "saas",
                "e-commerce",
                "digital marketing",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

impl ScoringConfig {
    /// 校验分类上限之和不超过 100
    pub fn validate(&self) -> Result<(), ScoringError> {
        let sum = self.maxima.sum();
        if sum > 100 {
            return Err(ScoringError::MaximaExceedHundred(sum));
        }
        Ok(())
    }
}

/// 分类累加器，超过上限的部分被截断
struct Category<'a> {
    max: u32,
    points: u32,
    signals: &'a mut Vec<String>,
}

impl Category<'_> {
    fn add(&mut self, fired: bool, points: u32, signal: &str) {
        if fired && points > 0 {
            self.points += points;
            self.signals.push(signal.to_string());
        }
    }

    fn finish(self) -> u32 {
        self.points.min(self.max)
    }
}

/// 线索评分器
///
/// 四个分类的加权和，每个分类由离散的子信号分值累加并截断到上限。
/// 结果只依赖输入，不使用随机数或当前时间。
#[derive(Debug, Clone)]
pub struct LeadScorer {
    config: ScoringConfig,
}

impl LeadScorer {
    /// 创建评分器
    ///
    /// # 返回值
    ///
    /// * `Ok(LeadScorer)` - 评分器
    /// * `Err(ScoringError)` - 分类上限之和超过 100
    pub fn new(config: ScoringConfig) -> Result<Self, ScoringError> {
        config.validate()?;
        Ok(Self { config })
    }

    fn contact_points(&self, contact: &Contact) -> u32 {
        let p = &self.config.points;
        let mut total = 0;
        if contact.email.is_some() {
            total += p.email;
            if contact.is_verified {
                total += p.verified_email;
            }
        }
        if contact.phone.is_some() {
            total += p.phone;
        }
        if contact.name.is_some() {
            total += p.named_contact;
        }
        if contact.title.is_some() {
            total += p.title;
        }
        total
    }

    /// 联系人完整度最高的联系人，分值相同时取靠前的
    fn primary_contact<'c>(&self, contacts: &'c [Contact]) -> Option<&'c Contact> {
        contacts
            .iter()
            .enumerate()
            .max_by_key(|(idx, c)| (self.contact_points(c), std::cmp::Reverse(*idx)))
            .map(|(_, c)| c)
    }

    fn size_points(&self, size: Option<SizeBucket>) -> u32 {
        let p = &self.config.points;
        match size {
            Some(SizeBucket::Enterprise) => p.size_enterprise,
            Some(SizeBucket::Large) => p.size_large,
            Some(SizeBucket::Medium) => p.size_medium,
            Some(SizeBucket::Small) => p.size_small,
            Some(SizeBucket::Startup) => p.size_startup,
            None => 0,
        }
    }

    fn revenue_points(&self, revenue: Option<RevenueRange>) -> u32 {
        let p = &self.config.points;
        match revenue {
            Some(r) if r >= RevenueRange::From100mTo500m => p.revenue_100m_plus,
            Some(r) if r >= RevenueRange::From10mTo50m => p.revenue_10m_plus,
            Some(RevenueRange::From1mTo10m) => p.revenue_1m_plus,
            _ => 0,
        }
    }

    fn is_high_value(&self, industry: &str) -> bool {
        let industry = industry.to_lowercase();
        self.config
            .high_value_industries
            .iter()
            .any(|hv| industry.contains(hv.as_str()))
    }

    /// 为一条线索评分
    ///
    /// # 参数
    ///
    /// * `company` - 线索公司（可为空，表示未关联公司的联系人）
    /// * `contacts` - 线索联系人
    ///
    /// # 返回值
    ///
    /// 评分明细，四个分类之和等于总分
    pub fn score(&self, company: Option<&Company>, contacts: &[Contact]) -> ScoreBreakdown {
        let p = &self.config.points;
        let m = &self.config.maxima;
        let mut signals = Vec::new();
        let primary = self.primary_contact(contacts);

        let contact_completeness = {
            let mut cat = Category {
                max: m.contact_completeness,
                points: 0,
                signals: &mut signals,
            };
            match primary {
                Some(c) => {
                    cat.add(c.email.is_some(), p.email, "email");
                    cat.add(c.email.is_some() && c.is_verified, p.verified_email, "verified_email");
                    cat.add(c.phone.is_some(), p.phone, "phone");
                    cat.add(c.name.is_some(), p.named_contact, "named_contact");
                    cat.add(c.title.is_some(), p.title, "title");
                }
                None => {
                    // 没有联系人时用公司的通用联系方式
                    if let Some(co) = company {
                        cat.add(co.email.is_some(), p.email, "email");
                        cat.add(co.email.is_some() && co.is_verified, p.verified_email, "verified_email");
                        cat.add(co.phone.is_some(), p.phone, "phone");
                    }
                }
            }
            cat.finish()
        };

        let business_indicators = {
            let mut cat = Category {
                max: m.business_indicators,
                points: 0,
                signals: &mut signals,
            };
            cat.add(
                contacts.iter().any(|c| c.is_decision_maker),
                p.decision_maker,
                "decision_maker",
            );
            if let Some(co) = company {
                let size = self.size_points(co.size);
                cat.add(size > 0, size, "company_size");
                match co.industry.as_deref() {
                    Some(ind) if self.is_high_value(ind) => {
                        cat.add(true, p.high_value_industry, "high_value_industry")
                    }
                    Some(_) => cat.add(true, p.known_industry, "known_industry"),
                    None => {}
                }
                cat.add(co.website.is_some(), p.website, "website");
                cat.add(co.hiring, p.hiring, "hiring");
                let revenue = self.revenue_points(co.revenue_range);
                cat.add(revenue > 0, revenue, "revenue");
                cat.add(
                    co.growth_signals.iter().any(|s| *s != GrowthSignal::Hiring),
                    p.growth,
                    "growth_signals",
                );
            }
            cat.finish()
        };

        let data_quality = {
            let quality = match company {
                Some(co) => co.data_quality,
                None if !contacts.is_empty() => {
                    contacts.iter().map(|c| c.data_quality).sum::<f64>() / contacts.len() as f64
                }
                None => 0.0,
            };
            let quality_points = (quality.clamp(0.0, 1.0) * p.quality_scale as f64).round() as u32;

            let mut cat = Category {
                max: m.data_quality,
                points: 0,
                signals: &mut signals,
            };
            cat.add(quality_points > 0, quality_points, "data_quality");
            cat.add(
                company.is_some_and(|co| co.is_verified) || contacts.iter().any(|c| c.is_verified),
                p.domain_match,
                "domain_match",
            );
            cat.add(
                company.is_some_and(|co| co.provenance.source_count > 1)
                    || contacts.iter().any(|c| c.provenance.source_count > 1),
                p.multi_source,
                "multi_source",
            );
            cat.finish()
        };

        let engagement_potential = {
            let has_email = company.is_some_and(|co| co.email.is_some())
                || contacts.iter().any(|c| c.email.is_some());
            let has_phone = company.is_some_and(|co| co.phone.is_some())
                || contacts.iter().any(|c| c.phone.is_some());

            let mut cat = Category {
                max: m.engagement_potential,
                points: 0,
                signals: &mut signals,
            };
            cat.add(
                company.is_some_and(|co| co.linkedin_url.is_some())
                    || contacts.iter().any(|c| c.linkedin_url.is_some()),
                p.social_presence,
                "social_presence",
            );
            cat.add(has_email && has_phone, p.reachable, "reachable");
            cat.add(company.is_some_and(|co| co.location.is_some()), p.location, "location");
            cat.add(company.is_some_and(|co| co.description.is_some()), p.description, "description");
            cat.finish()
        };

        let total = contact_completeness + business_indicators + data_quality + engagement_potential;
        ScoreBreakdown {
            contact_completeness,
            business_indicators,
            data_quality,
            engagement_potential,
            total,
            grade: LeadGrade::from_total(total),
            signals,
        }
    }
}

impl Default for LeadScorer {
    fn default() -> Self {
        Self {
            config: ScoringConfig::default(),
        }
    }
}
