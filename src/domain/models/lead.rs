// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

use super::job::JobType;

/// 原始记录
///
/// 由提取器产出，仅被管道消费一次，处理后不保留。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawRecord {
    /// 数据源类型
    pub source_type: JobType,
    /// 来源页面
    pub source_url: String,
    /// 抓取到的字段
    pub payload: RecordPayload,
    /// 提取时间
    pub extracted_at: DateTime<Utc>,
    /// 提取置信度 (0.0-1.0)
    pub confidence: f64,
}

/// 原始负载
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RecordPayload {
    Company(RawCompany),
    Contact(RawContact),
}

/// 抓取到的公司字段，全部保持原样
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawCompany {
    pub name: Option<String>,
    pub website: Option<String>,
    pub domain: Option<String>,
    pub industry: Option<String>,
    pub location: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub description: Option<String>,
    pub employee_count: Option<String>,
    pub linkedin_url: Option<String>,
    pub hiring: Option<bool>,
}

/// 抓取到的联系人字段，全部保持原样
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawContact {
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub title: Option<String>,
    pub linkedin_url: Option<String>,
    pub company_name: Option<String>,
    pub company_domain: Option<String>,
}

impl RawRecord {
    /// 创建公司记录
    pub fn company(
        source_type: JobType,
        source_url: impl Into<String>,
        company: RawCompany,
        confidence: f64,
    ) -> Self {
        Self {
            source_type,
            source_url: source_url.into(),
            payload: RecordPayload::Company(company),
            extracted_at: Utc::now(),
            confidence: confidence.clamp(0.0, 1.0),
        }
    }

    /// 创建联系人记录
    pub fn contact(
        source_type: JobType,
        source_url: impl Into<String>,
        contact: RawContact,
        confidence: f64,
    ) -> Self {
        Self {
            source_type,
            source_url: source_url.into(),
            payload: RecordPayload::Contact(contact),
            extracted_at: Utc::now(),
            confidence: confidence.clamp(0.0, 1.0),
        }
    }
}

/// 单个字段的来源
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FieldSource {
    pub confidence: f64,
    pub scraped_at: DateTime<Utc>,
}

impl FieldSource {
    /// 冲突时 `other` 是否胜出：置信度更高，或置信度相同且更新
    pub fn yields_to(&self, other: &FieldSource) -> bool {
        other.confidence > self.confidence
            || (other.confidence == self.confidence && other.scraped_at >= self.scraped_at)
    }
}

/// 字段名 → 当前值的来源
///
/// 没有条目的字段沿用实体首条记录的来源
pub type FieldSources = BTreeMap<String, FieldSource>;

/// 来源信息
///
/// `confidence` 与 `scraped_at` 是所有来源中的最大值，
/// 字段冲突按 [`FieldSources`] 中的逐字段来源裁决
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Provenance {
    pub confidence: f64,
    pub scraped_at: DateTime<Utc>,
    /// 合并进该实体的记录数
    pub source_count: u32,
}

impl Provenance {
    pub fn new(confidence: f64, scraped_at: DateTime<Utc>) -> Self {
        Self {
            confidence,
            scraped_at,
            source_count: 1,
        }
    }

    /// 冲突时 `other` 是否胜出：置信度更高，或置信度相同且更新
    pub fn yields_to(&self, other: &Provenance) -> bool {
        self.source().yields_to(&other.source())
    }

    pub fn source(&self) -> FieldSource {
        FieldSource {
            confidence: self.confidence,
            scraped_at: self.scraped_at,
        }
    }

    /// 吸收另一条来源
    pub fn absorb(&mut self, other: &Provenance) {
        self.confidence = self.confidence.max(other.confidence);
        self.scraped_at = self.scraped_at.max(other.scraped_at);
        self.source_count += other.source_count;
    }
}

/// 公司规模分档
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SizeBucket {
    /// 1-10 人
    Startup,
    /// 11-50 人
    Small,
    /// 51-200 人
    Medium,
    /// 201-1000 人
    Large,
    /// 1000 人以上
    Enterprise,
}

impl SizeBucket {
    /// 根据员工数确定规模
    pub fn from_employee_count(count: u32) -> Self {
        match count {
            0..=10 => SizeBucket::Startup,
            11..=50 => SizeBucket::Small,
            51..=200 => SizeBucket::Medium,
            201..=1000 => SizeBucket::Large,
            _ => SizeBucket::Enterprise,
        }
    }
}

impl fmt::Display for SizeBucket {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            SizeBucket::Startup => "startup",
            SizeBucket::Small => "small",
            SizeBucket::Medium => "medium",
            SizeBucket::Large => "large",
            SizeBucket::Enterprise => "enterprise",
        };
        f.write_str(s)
    }
}

/// 估算营收区间 (USD)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RevenueRange {
    Under1m,
    From1mTo10m,
    From10mTo50m,
    From50mTo100m,
    From100mTo500m,
    From500mTo1b,
    Over1b,
}

impl RevenueRange {
    /// 按营收估算值归档
    pub fn from_usd(revenue: u64) -> Self {
        match revenue {
            0..=999_999 => RevenueRange::Under1m,
            1_000_000..=9_999_999 => RevenueRange::From1mTo10m,
            10_000_000..=49_999_999 => RevenueRange::From10mTo50m,
            50_000_000..=99_999_999 => RevenueRange::From50mTo100m,
            100_000_000..=499_999_999 => RevenueRange::From100mTo500m,
            500_000_000..=999_999_999 => RevenueRange::From500mTo1b,
            _ => RevenueRange::Over1b,
        }
    }
}

/// 增长信号
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrowthSignal {
    Hiring,
    Funding,
    Expansion,
    ProductLaunch,
    Partnership,
    Acquisition,
}

/// 职级
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Seniority {
    Intern,
    Junior,
    Individual,
    Senior,
    Manager,
    Director,
    Vp,
    CLevel,
}

/// 公司实体
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Company {
    pub id: Uuid,
    pub job_id: Uuid,
    pub name: String,
    pub domain: Option<String>,
    pub website: Option<String>,
    pub industry: Option<String>,
    pub size: Option<SizeBucket>,
    pub location: Option<String>,
    pub employee_count: Option<u32>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub description: Option<String>,
    pub linkedin_url: Option<String>,
    /// 近期招聘信号
    pub hiring: bool,
    #[serde(default)]
    pub revenue_range: Option<RevenueRange>,
    /// 描述中识别出的增长信号，有序且不重复
    #[serde(default)]
    pub growth_signals: Vec<GrowthSignal>,
    pub is_verified: bool,
    /// 数据质量 (0.0-1.0)
    pub data_quality: f64,
    pub provenance: Provenance,
    #[serde(default)]
    pub field_sources: FieldSources,
}

impl Company {
    /// 创建只含名称的公司实体
    pub fn new(job_id: Uuid, name: impl Into<String>, provenance: Provenance) -> Self {
        Self {
            id: Uuid::new_v4(),
            job_id,
            name: name.into(),
            domain: None,
            website: None,
            industry: None,
            size: None,
            location: None,
            employee_count: None,
            phone: None,
            email: None,
            description: None,
            linkedin_url: None,
            hiring: false,
            revenue_range: None,
            growth_signals: Vec::new(),
            is_verified: false,
            data_quality: 0.0,
            provenance,
            field_sources: FieldSources::new(),
        }
    }
}

/// 联系人实体
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contact {
    pub id: Uuid,
    pub job_id: Uuid,
    /// 所属公司
    pub company_id: Option<Uuid>,
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub title: Option<String>,
    pub seniority: Option<Seniority>,
    pub is_decision_maker: bool,
    pub linkedin_url: Option<String>,
    /// 抓取时页面给出的公司名称，用于关联
    pub company_name: Option<String>,
    /// 抓取时页面给出的公司域名，用于关联
    pub company_domain: Option<String>,
    pub is_verified: bool,
    /// 数据质量 (0.0-1.0)
    pub data_quality: f64,
    pub provenance: Provenance,
    #[serde(default)]
    pub field_sources: FieldSources,
}

impl Contact {
    /// 创建空联系人实体
    pub fn new(job_id: Uuid, provenance: Provenance) -> Self {
        Self {
            id: Uuid::new_v4(),
            job_id,
            company_id: None,
            name: None,
            email: None,
            phone: None,
            title: None,
            seniority: None,
            is_decision_maker: false,
            linkedin_url: None,
            company_name: None,
            company_domain: None,
            is_verified: false,
            data_quality: 0.0,
            provenance,
            field_sources: FieldSources::new(),
        }
    }
}

/// 线索等级
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LeadGrade {
    A,
    B,
    C,
    D,
    F,
}

impl LeadGrade {
    /// 根据 0-100 总分换算等级
    pub fn from_total(total: u32) -> Self {
        match total {
            80.. => LeadGrade::A,
            65..=79 => LeadGrade::B,
            50..=64 => LeadGrade::C,
            35..=49 => LeadGrade::D,
            _ => LeadGrade::F,
        }
    }
}

/// 评分明细
///
/// 四个分类分值之和恒等于 `total`，且 `total` 位于 [0,100]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub contact_completeness: u32,
    pub business_indicators: u32,
    pub data_quality: u32,
    pub engagement_potential: u32,
    pub total: u32,
    pub grade: LeadGrade,
    /// 命中的子信号
    pub signals: Vec<String>,
}

impl ScoreBreakdown {
    /// 四个分类分值之和
    pub fn component_sum(&self) -> u32 {
        self.contact_completeness
            + self.business_indicators
            + self.data_quality
            + self.engagement_potential
    }
}

/// 处理后的线索：一家公司及其联系人，或一个未关联公司的联系人
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessedLead {
    pub company: Option<Company>,
    pub contacts: Vec<Contact>,
    pub score: ScoreBreakdown,
}

/// 已存储的实体，用于跨批次去重
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExistingEntity {
    Company(Company),
    Contact(Contact),
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_size_bucket_boundaries() {
        assert_eq!(SizeBucket::from_employee_count(10), SizeBucket::Startup);
        assert_eq!(SizeBucket::from_employee_count(11), SizeBucket::Small);
        assert_eq!(SizeBucket::from_employee_count(200), SizeBucket::Medium);
        assert_eq!(SizeBucket::from_employee_count(1000), SizeBucket::Large);
        assert_eq!(SizeBucket::from_employee_count(1001), SizeBucket::Enterprise);
    }

    #[test]
    fn test_provenance_conflict_resolution() {
        let now = Utc::now();
        let low = Provenance::new(0.4, now);
        let high_old = Provenance::new(0.9, now - Duration::hours(1));
        let low_new = Provenance::new(0.4, now + Duration::seconds(1));

        assert!(low.yields_to(&high_old));
        assert!(!high_old.yields_to(&low));
        // 置信度相同，较新的胜出
        assert!(low.yields_to(&low_new));
        assert!(!low_new.yields_to(&low));
    }

    #[test]
    fn test_revenue_range_boundaries() {
        assert_eq!(RevenueRange::from_usd(999_999), RevenueRange::Under1m);
        assert_eq!(RevenueRange::from_usd(1_000_000), RevenueRange::From1mTo10m);
        assert_eq!(RevenueRange::from_usd(100_000_000), RevenueRange::From100mTo500m);
        assert_eq!(RevenueRange::from_usd(5_000_000_000), RevenueRange::Over1b);
    }

    #[test]
    fn test_grade_from_total() {
        assert_eq!(LeadGrade::from_total(100), LeadGrade::A);
        assert_eq!(LeadGrade::from_total(70), LeadGrade::B);
        assert_eq!(LeadGrade::from_total(50), LeadGrade::C);
        assert_eq!(LeadGrade::from_total(0), LeadGrade::F);
    }
}
