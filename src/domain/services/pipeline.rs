// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use serde::Serialize;
use std::collections::HashSet;
use tracing::debug;
use uuid::Uuid;

use crate::domain::models::job::SearchParameters;
use crate::domain::models::lead::{
    Company, Contact, ExistingEntity, ProcessedLead, RawRecord, ScoreBreakdown,
};
use crate::domain::services::cleaner::{CleanEntity, Cleaner, CleaningConfig};
use crate::domain::services::deduplicator::{DedupOutcome, DeduplicationConfig, Deduplicator};
use crate::domain::services::enrichment::Enricher;
use crate::domain::services::lead_scorer::LeadScorer;

/// 线索过滤条件
///
/// 从任务的 `filters` 参数解析，未识别的键被忽略
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LeadFilter {
    pub min_score: Option<u32>,
    pub industry: Option<String>,
    pub location: Option<String>,
    pub require_email: bool,
}

impl LeadFilter {
    pub fn from_parameters(params: &SearchParameters) -> Self {
        let text = |key: &str| {
            params
                .get(key)
                .and_then(|v| v.as_str())
                .map(|s| s.trim().to_lowercase())
                .filter(|s| !s.is_empty())
        };
        Self {
            min_score: params
                .get("min_score")
                .and_then(|v| v.as_u64())
                .map(|v| v.min(100) as u32),
            industry: text("industry"),
            location: text("location"),
            require_email: params
                .get("require_email")
                .and_then(|v| v.as_bool())
                .unwrap_or(false),
        }
    }

    pub fn matches(&self, lead: &ProcessedLead) -> bool {
        if self.min_score.is_some_and(|min| lead.score.total < min) {
            return false;
        }
        let company = lead.company.as_ref();
        let contains = |field: Option<&String>, needle: &str| {
            field.is_some_and(|v| v.to_lowercase().contains(needle))
        };
        if let Some(industry) = &self.industry {
            if !contains(company.and_then(|c| c.industry.as_ref()), industry) {
                return false;
            }
        }
        if let Some(location) = &self.location {
            if !contains(company.and_then(|c| c.location.as_ref()), location) {
                return false;
            }
        }
        if self.require_email {
            let has_email = company.is_some_and(|c| c.email.is_some())
                || lead.contacts.iter().any(|c| c.email.is_some());
            if !has_email {
                return false;
            }
        }
        true
    }
}

/// 单条记录的处理结果
#[derive(Debug, Clone)]
pub enum PipelineOutcome {
    /// 主字段无效，记录被丢弃
    Dropped { reason: String },
    Company {
        id: Uuid,
        merged: bool,
        score: ScoreBreakdown,
    },
    Contact {
        id: Uuid,
        merged: bool,
        score: ScoreBreakdown,
    },
}

impl PipelineOutcome {
    pub fn is_dropped(&self) -> bool {
        matches!(self, PipelineOutcome::Dropped { .. })
    }
}

/// 管道统计
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq)]
pub struct PipelineStats {
    pub processed: u64,
    pub dropped: u64,
    pub warnings: u64,
    pub companies_inserted: u64,
    pub companies_merged: u64,
    pub contacts_inserted: u64,
    pub contacts_merged: u64,
}

/// 管道各阶段的配置，每个任务据此构造独立的管道
#[derive(Debug, Clone, Default)]
pub struct PipelineConfig {
    pub cleaning: CleaningConfig,
    pub dedup: DeduplicationConfig,
    pub scorer: LeadScorer,
}

impl PipelineConfig {
    pub fn build(&self, job_id: Uuid) -> Pipeline {
        Pipeline::new(
            job_id,
            Cleaner::new(self.cleaning.clone()),
            Deduplicator::new(self.dedup.clone()),
            self.scorer.clone(),
        )
    }
}

/// 数据处理管道
///
/// 每条原始记录依次经过 清洗 → 去重 → 增强 → 评分，
/// 每个任务使用独立的管道实例。
pub struct Pipeline {
    job_id: Uuid,
    cleaner: Cleaner,
    deduplicator: Deduplicator,
    enricher: Enricher,
    scorer: LeadScorer,
    stats: PipelineStats,
    /// 预先加载且本任务尚未触及的实体，不作为本任务的线索返回
    seeded: HashSet<Uuid>,
}

impl Pipeline {
    pub fn new(job_id: Uuid, cleaner: Cleaner, deduplicator: Deduplicator, scorer: LeadScorer) -> Self {
        Self {
            job_id,
            cleaner,
            deduplicator,
            enricher: Enricher::new(),
            scorer,
            stats: PipelineStats::default(),
            seeded: HashSet::new(),
        }
    }

    pub fn with_defaults(job_id: Uuid) -> Self {
        Self::new(
            job_id,
            Cleaner::default(),
            Deduplicator::with_default_config(),
            LeadScorer::default(),
        )
    }

    /// 用已存储的实体预先填充去重器
    pub fn seed(&mut self, existing: Vec<ExistingEntity>) {
        debug!(job_id = %self.job_id, count = existing.len(), "Seeding deduplicator");
        self.seeded.extend(existing.iter().map(|entity| match entity {
            ExistingEntity::Company(c) => c.id,
            ExistingEntity::Contact(c) => c.id,
        }));
        self.deduplicator.seed(existing);
    }

    pub fn stats(&self) -> PipelineStats {
        self.stats
    }

    /// 处理一条原始记录
    ///
    /// # 参数
    ///
    /// * `record` - 原始记录，处理后即被消费
    ///
    /// # 返回值
    ///
    /// 丢弃原因，或受影响实体的ID与当前评分
    pub fn process(&mut self, record: RawRecord) -> PipelineOutcome {
        self.stats.processed += 1;
        let source_url = record.source_url.clone();

        let cleaned = match self.cleaner.clean(record, self.job_id) {
            Ok(cleaned) => cleaned,
            Err(e) => {
                self.stats.dropped += 1;
                metrics::counter!("leadrs_records_total", "outcome" => "dropped").increment(1);
                debug!(job_id = %self.job_id, source = %source_url, error = %e, "Record dropped");
                return PipelineOutcome::Dropped {
                    reason: e.to_string(),
                };
            }
        };

        if !cleaned.warnings.is_empty() {
            self.stats.warnings += cleaned.warnings.len() as u64;
            debug!(
                job_id = %self.job_id,
                source = %source_url,
                warnings = ?cleaned.warnings,
                "Record cleaned with warnings"
            );
        }

        match cleaned.entity {
            CleanEntity::Company(company) => self.process_company(company),
            CleanEntity::Contact(contact) => self.process_contact(contact),
        }
    }

    fn process_company(&mut self, company: Company) -> PipelineOutcome {
        let outcome = self.deduplicator.upsert_company(company);
        let merged = matches!(outcome, DedupOutcome::Merged(_));
        self.count_outcome("company", merged);

        let id = self.deduplicator.resolve_company_id(outcome.id());
        self.seeded.remove(&id);
        if let Some(company) = self.deduplicator.company_mut(id) {
            self.enricher.enrich_company(company);
        }
        let score = self.score_company(id);
        PipelineOutcome::Company { id, merged, score }
    }

    fn process_contact(&mut self, contact: Contact) -> PipelineOutcome {
        let outcome = self.deduplicator.upsert_contact(contact);
        let merged = matches!(outcome, DedupOutcome::Merged(_));
        self.count_outcome("contact", merged);

        let id = outcome.id();
        self.seeded.remove(&id);
        let company = self
            .linked_company_id(id)
            .and_then(|cid| self.deduplicator.company(cid).cloned());
        if let Some(contact) = self.deduplicator.contact_mut(id) {
            self.enricher.enrich_contact(contact, company.as_ref());
        }

        let contacts: Vec<Contact> = self
            .deduplicator
            .contacts()
            .iter()
            .filter(|c| c.id == id)
            .cloned()
            .collect();
        let score = self.scorer.score(company.as_ref(), &contacts);
        PipelineOutcome::Contact { id, merged, score }
    }

    fn count_outcome(&mut self, kind: &'static str, merged: bool) {
        let outcome = if merged { "merged" } else { "inserted" };
        match (kind, merged) {
            ("company", false) => self.stats.companies_inserted += 1,
            ("company", true) => self.stats.companies_merged += 1,
            (_, false) => self.stats.contacts_inserted += 1,
            (_, true) => self.stats.contacts_merged += 1,
        }
        metrics::counter!("leadrs_records_total", "outcome" => outcome, "kind" => kind).increment(1);
    }

    fn linked_company_id(&self, contact_id: Uuid) -> Option<Uuid> {
        self.deduplicator
            .contacts()
            .iter()
            .find(|c| c.id == contact_id)
            .and_then(|c| c.company_id)
    }

    fn score_company(&self, id: Uuid) -> ScoreBreakdown {
        let company = self.deduplicator.company(id);
        let contacts: Vec<Contact> = self
            .deduplicator
            .contacts()
            .iter()
            .filter(|c| c.company_id == Some(id))
            .cloned()
            .collect();
        self.scorer.score(company, &contacts)
    }

    /// 新发现的线索
    ///
    /// 只有新插入的公司，或尚未关联公司的新联系人才算新线索；合并结果返回None。
    pub fn discovered_lead(&self, outcome: &PipelineOutcome) -> Option<ProcessedLead> {
        match outcome {
            PipelineOutcome::Company {
                id,
                merged: false,
                score,
            } => {
                let company = self.deduplicator.company(*id)?.clone();
                let contacts = self
                    .deduplicator
                    .contacts()
                    .iter()
                    .filter(|c| c.company_id == Some(*id))
                    .cloned()
                    .collect();
                Some(ProcessedLead {
                    company: Some(company),
                    contacts,
                    score: score.clone(),
                })
            }
            PipelineOutcome::Contact {
                id,
                merged: false,
                score,
            } => {
                let contact = self.deduplicator.contacts().iter().find(|c| c.id == *id)?;
                if contact.company_id.is_some() {
                    return None;
                }
                Some(ProcessedLead {
                    company: None,
                    contacts: vec![contact.clone()],
                    score: score.clone(),
                })
            }
            _ => None,
        }
    }

    /// 汇总最终线索
    ///
    /// 重新关联联系人与公司后按公司分组，未关联公司的联系人各自成为一条线索。
    /// 结果按总分降序排列，经过过滤后截断到 `max_results`。
    pub fn finish(&mut self, filter: &LeadFilter, max_results: usize) -> Vec<ProcessedLead> {
        self.deduplicator.relink_contacts();

        // 关联后补全联系人的公司信息
        let companies = self.deduplicator.companies().to_vec();
        let contact_ids: Vec<(Uuid, Option<Uuid>)> = self
            .deduplicator
            .contacts()
            .iter()
            .map(|c| (c.id, c.company_id))
            .collect();
        for (contact_id, company_id) in contact_ids {
            let company = company_id.and_then(|cid| companies.iter().find(|c| c.id == cid));
            if let Some(contact) = self.deduplicator.contact_mut(contact_id) {
                self.enricher.enrich_contact(contact, company);
            }
        }

        let contacts = self.deduplicator.contacts();
        let mut leads: Vec<ProcessedLead> = companies
            .into_iter()
            .filter(|company| !self.seeded.contains(&company.id))
            .map(|company| {
                let linked: Vec<Contact> = contacts
                    .iter()
                    .filter(|c| c.company_id == Some(company.id))
                    .cloned()
                    .collect();
                let score = self.scorer.score(Some(&company), &linked);
                ProcessedLead {
                    company: Some(company),
                    contacts: linked,
                    score,
                }
            })
            .collect();

        let orphans = contacts
            .iter()
            .filter(|c| c.company_id.is_none() && !self.seeded.contains(&c.id));
        leads.extend(orphans.map(|contact| {
            let linked = vec![contact.clone()];
            let score = self.scorer.score(None, &linked);
            ProcessedLead {
                company: None,
                contacts: linked,
                score,
            }
        }));

        leads.sort_by(|a, b| b.score.total.cmp(&a.score.total));
        let before = leads.len();
        leads.retain(|lead| filter.matches(lead));
        leads.truncate(max_results);

        debug!(
            job_id = %self.job_id,
            candidates = before,
            returned = leads.len(),
            "Pipeline finished"
        );
        leads
    }
}
