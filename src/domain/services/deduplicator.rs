// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use deunicode::deunicode;
use std::collections::HashMap;
use strsim::normalized_levenshtein;
use uuid::Uuid;

use crate::domain::models::lead::{Company, Contact, ExistingEntity, FieldSource, FieldSources};
use crate::utils::url_utils::{email_domain, normalize_domain};

/// 参与模糊匹配的公司字段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchField {
    Name,
    Phone,
    Location,
}

/// 去重配置
#[derive(Debug, Clone)]
pub struct DeduplicationConfig {
    /// 相似度阈值 (0.0-1.0)
    pub similarity_threshold: f64,
    /// 没有域名可比时参与比较的公司字段，只计算两边都有值的字段
    pub company_fields: Vec<MatchField>,
}

impl Default for DeduplicationConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.85,
            company_fields: vec![MatchField::Name, MatchField::Phone],
        }
    }
}

/// 去重结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DedupOutcome {
    /// 新实体
    Inserted(Uuid),
    /// 合并进已有实体
    Merged(Uuid),
}

impl DedupOutcome {
    pub fn id(&self) -> Uuid {
        match self {
            DedupOutcome::Inserted(id) | DedupOutcome::Merged(id) => *id,
        }
    }
}

const LEGAL_SUFFIXES: &[&str] = &[
    "inc",
    "incorporated",
    "llc",
    "ltd",
    "limited",
    "corp",
    "corporation",
    "co",
    "company",
    "gmbh",
    "plc",
    "sa",
    "ag",
    "bv",
    "pty",
    "lp",
    "llp",
];

fn fold(s: &str) -> String {
    deunicode(s)
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// 规范化公司名称：去重音、小写、去标点并去掉法律后缀
pub fn normalize_company_name(name: &str) -> String {
    let folded = fold(name);
    let mut words: Vec<&str> = folded.split(' ').filter(|w| !w.is_empty()).collect();
    while words.len() > 1 && words.last().is_some_and(|w| LEGAL_SUFFIXES.contains(w)) {
        words.pop();
    }
    words.join(" ")
}

/// 规范化人名
pub fn normalize_person_name(name: &str) -> String {
    fold(name)
}

fn phone_digits(phone: &str) -> String {
    phone.chars().filter(|c| c.is_ascii_digit()).collect()
}

/// 逐字段合并
///
/// 每个字段按各自的来源裁决冲突，合并后记录保留值的来源
struct FieldMerge<'a> {
    sources: &'a mut FieldSources,
    current_default: FieldSource,
    incoming_sources: &'a FieldSources,
    incoming_default: FieldSource,
}

impl FieldMerge<'_> {
    fn field<T: PartialEq>(&mut self, field: &str, current: &mut Option<T>, incoming: Option<T>) {
        let current_src = self
            .sources
            .get(field)
            .copied()
            .unwrap_or(self.current_default);
        let incoming_src = self
            .incoming_sources
            .get(field)
            .copied()
            .unwrap_or(self.incoming_default);

        let kept = match (current.as_ref(), incoming) {
            (None, None) => return,
            (None, Some(v)) => {
                *current = Some(v);
                incoming_src
            }
            (Some(_), None) => current_src,
            (Some(existing), Some(v)) => {
                if current_src.yields_to(&incoming_src) {
                    if *existing != v {
                        *current = Some(v);
                    }
                    incoming_src
                } else {
                    current_src
                }
            }
        };
        self.sources.insert(field.to_string(), kept);
    }
}

/// 合并公司：保留最完整的数据，冲突字段取来源更可信的值
pub fn merge_company(target: &mut Company, incoming: Company) {
    let mut m = FieldMerge {
        sources: &mut target.field_sources,
        current_default: target.provenance.source(),
        incoming_sources: &incoming.field_sources,
        incoming_default: incoming.provenance.source(),
    };

    let mut name = Some(std::mem::take(&mut target.name));
    m.field("name", &mut name, Some(incoming.name));
    target.name = name.unwrap_or_default();
    m.field("domain", &mut target.domain, incoming.domain);
    m.field("website", &mut target.website, incoming.website);
    m.field("industry", &mut target.industry, incoming.industry);
    m.field("size", &mut target.size, incoming.size);
    m.field("location", &mut target.location, incoming.location);
    m.field("employee_count", &mut target.employee_count, incoming.employee_count);
    m.field("phone", &mut target.phone, incoming.phone);
    m.field("email", &mut target.email, incoming.email);
    m.field("description", &mut target.description, incoming.description);
    m.field("linkedin_url", &mut target.linkedin_url, incoming.linkedin_url);
    m.field("revenue_range", &mut target.revenue_range, incoming.revenue_range);
    for signal in incoming.growth_signals {
        if !target.growth_signals.contains(&signal) {
            target.growth_signals.push(signal);
        }
    }
    target.growth_signals.sort();
    target.hiring |= incoming.hiring;
    // 验证状态只升不降
    target.is_verified |= incoming.is_verified;
    target.data_quality = target.data_quality.max(incoming.data_quality);
    target.provenance.absorb(&incoming.provenance);
}

/// 合并联系人：保留最完整的数据，冲突字段取来源更可信的值
pub fn merge_contact(target: &mut Contact, incoming: Contact) {
    let mut m = FieldMerge {
        sources: &mut target.field_sources,
        current_default: target.provenance.source(),
        incoming_sources: &incoming.field_sources,
        incoming_default: incoming.provenance.source(),
    };

    m.field("company_id", &mut target.company_id, incoming.company_id);
    m.field("name", &mut target.name, incoming.name);
    m.field("email", &mut target.email, incoming.email);
    m.field("phone", &mut target.phone, incoming.phone);
    m.field("title", &mut target.title, incoming.title);
    m.field("seniority", &mut target.seniority, incoming.seniority);
    m.field("linkedin_url", &mut target.linkedin_url, incoming.linkedin_url);
    m.field("company_name", &mut target.company_name, incoming.company_name);
    m.field("company_domain", &mut target.company_domain, incoming.company_domain);
    target.is_decision_maker |= incoming.is_decision_maker;
    target.is_verified |= incoming.is_verified;
    target.data_quality = target.data_quality.max(incoming.data_quality);
    target.provenance.absorb(&incoming.provenance);
}

struct Employer {
    id: Option<Uuid>,
    domain: Option<String>,
    name: Option<String>,
}

/// 实体去重器
///
/// 维护当前任务已收集的公司与联系人（可用已存储实体预先填充），
/// 新实体与之模糊匹配后合并。每次合并后继续检查，直到没有可合并的实体为止，
/// 因此对合并结果再次去重不会产生任何变化。
pub struct Deduplicator {
    config: DeduplicationConfig,
    companies: Vec<Company>,
    contacts: Vec<Contact>,
    /// 被合并掉的公司ID → 保留的公司ID
    aliases: HashMap<Uuid, Uuid>,
}

impl Deduplicator {
    /// 创建新的去重器
    pub fn new(config: DeduplicationConfig) -> Self {
        Self {
            config,
            companies: Vec::new(),
            contacts: Vec::new(),
            aliases: HashMap::new(),
        }
    }

    /// 使用默认配置创建去重器
    pub fn with_default_config() -> Self {
        Self::new(DeduplicationConfig::default())
    }

    /// 用已存储的实体填充，之后的新记录会与它们匹配
    pub fn seed(&mut self, existing: Vec<ExistingEntity>) {
        let (companies, contacts): (Vec<_>, Vec<_>) = existing
            .into_iter()
            .partition(|e| matches!(e, ExistingEntity::Company(_)));
        for entity in companies.into_iter().chain(contacts) {
            match entity {
                ExistingEntity::Company(c) => {
                    self.upsert_company(c);
                }
                ExistingEntity::Contact(c) => {
                    self.upsert_contact(c);
                }
            }
        }
    }

    fn similar(&self, a: &str, b: &str) -> bool {
        !a.is_empty() && !b.is_empty() && normalized_levenshtein(a, b) >= self.config.similarity_threshold
    }

    /// 计算两家公司在配置字段上的平均相似度
    pub fn company_similarity(&self, a: &Company, b: &Company) -> f64 {
        let mut total = 0.0;
        let mut fields = 0usize;
        for field in &self.config.company_fields {
            let pair = match field {
                MatchField::Name => {
                    Some((normalize_company_name(&a.name), normalize_company_name(&b.name)))
                }
                MatchField::Phone => a
                    .phone
                    .as_deref()
                    .zip(b.phone.as_deref())
                    .map(|(x, y)| (phone_digits(x), phone_digits(y))),
                MatchField::Location => a
                    .location
                    .as_deref()
                    .zip(b.location.as_deref())
                    .map(|(x, y)| (fold(x), fold(y))),
            };
            if let Some((x, y)) = pair {
                if x.is_empty() || y.is_empty() {
                    continue;
                }
                total += normalized_levenshtein(&x, &y);
                fields += 1;
            }
        }
        if fields == 0 {
            0.0
        } else {
            total / fields as f64
        }
    }

    /// 判断两家公司是否为同一实体
    ///
    /// 两边都有域名时只比较规范化域名，否则按配置字段做模糊匹配
    pub fn companies_match(&self, a: &Company, b: &Company) -> bool {
        if a.id == b.id {
            return true;
        }
        let da = a.domain.as_deref().and_then(normalize_domain);
        let db = b.domain.as_deref().and_then(normalize_domain);
        if let (Some(x), Some(y)) = (da, db) {
            return x == y;
        }
        self.company_similarity(a, b) >= self.config.similarity_threshold
    }

    fn employer_of(&self, contact: &Contact) -> Employer {
        let id = contact.company_id.map(|id| self.resolve_company_id(id));
        let linked = id.and_then(|id| self.companies.iter().find(|c| c.id == id));
        Employer {
            id,
            domain: contact
                .company_domain
                .as_deref()
                .and_then(normalize_domain)
                .or_else(|| linked.and_then(|c| c.domain.clone())),
            name: contact
                .company_name
                .as_deref()
                .or(linked.map(|c| c.name.as_str()))
                .map(normalize_company_name),
        }
    }

    fn same_employer(&self, a: &Contact, b: &Contact) -> bool {
        let ea = self.employer_of(a);
        let eb = self.employer_of(b);
        if let (Some(x), Some(y)) = (ea.id, eb.id) {
            if x == y {
                return true;
            }
        }
        if let (Some(x), Some(y)) = (&ea.domain, &eb.domain) {
            return x == y;
        }
        match (&ea.name, &eb.name) {
            (Some(x), Some(y)) => self.similar(x, y),
            _ => false,
        }
    }

    /// 判断两个联系人是否为同一人
    ///
    /// 两边都有邮箱时只比较邮箱，否则要求姓名相似且属于同一公司
    pub fn contacts_match(&self, a: &Contact, b: &Contact) -> bool {
        if a.id == b.id {
            return true;
        }
        if let (Some(x), Some(y)) = (&a.email, &b.email) {
            return x.eq_ignore_ascii_case(y);
        }
        match (&a.name, &b.name) {
            (Some(x), Some(y)) => {
                self.similar(&normalize_person_name(x), &normalize_person_name(y))
                    && self.same_employer(a, b)
            }
            _ => false,
        }
    }

    /// 解析公司ID（跟随合并别名）
    pub fn resolve_company_id(&self, mut id: Uuid) -> Uuid {
        while let Some(next) = self.aliases.get(&id) {
            if *next == id {
                break;
            }
            id = *next;
        }
        id
    }

    /// 为联系人寻找所属公司
    pub fn find_company_for_contact(&self, contact: &Contact) -> Option<Uuid> {
        if let Some(id) = contact.company_id {
            return Some(self.resolve_company_id(id));
        }
        let domain = contact
            .company_domain
            .as_deref()
            .and_then(normalize_domain)
            .or_else(|| contact.email.as_deref().and_then(email_domain));
        if let Some(domain) = domain {
            if let Some(c) = self
                .companies
                .iter()
                .find(|c| c.domain.as_deref().and_then(normalize_domain).as_deref() == Some(domain.as_str()))
            {
                return Some(c.id);
            }
        }
        let name = normalize_company_name(contact.company_name.as_deref()?);
        self.companies
            .iter()
            .find(|c| self.similar(&normalize_company_name(&c.name), &name))
            .map(|c| c.id)
    }

    /// 插入或合并公司
    pub fn upsert_company(&mut self, incoming: Company) -> DedupOutcome {
        match self
            .companies
            .iter()
            .position(|c| self.companies_match(c, &incoming))
        {
            Some(idx) => {
                let target_id = self.companies[idx].id;
                if incoming.id != target_id {
                    self.aliases.insert(incoming.id, target_id);
                }
                merge_company(&mut self.companies[idx], incoming);
                let idx = self.settle_company(idx);
                DedupOutcome::Merged(self.companies[idx].id)
            }
            None => {
                let id = incoming.id;
                self.companies.push(incoming);
                DedupOutcome::Inserted(id)
            }
        }
    }

    /// 合并后的公司可能与其他公司匹配，继续合并直到稳定
    fn settle_company(&mut self, mut idx: usize) -> usize {
        loop {
            let found = (0..self.companies.len())
                .find(|&j| j != idx && self.companies_match(&self.companies[j], &self.companies[idx]));
            let Some(j) = found else {
                return idx;
            };
            let (keep, drop) = if j < idx { (j, idx) } else { (idx, j) };
            let removed = self.companies.remove(drop);
            self.aliases.insert(removed.id, self.companies[keep].id);
            merge_company(&mut self.companies[keep], removed);
            idx = keep;
        }
    }

    /// 插入或合并联系人，并尝试关联到已知公司
    pub fn upsert_contact(&mut self, mut incoming: Contact) -> DedupOutcome {
        incoming.company_id = self.find_company_for_contact(&incoming);

        match self
            .contacts
            .iter()
            .position(|c| self.contacts_match(c, &incoming))
        {
            Some(idx) => {
                merge_contact(&mut self.contacts[idx], incoming);
                let idx = self.settle_contact(idx);
                DedupOutcome::Merged(self.contacts[idx].id)
            }
            None => {
                let id = incoming.id;
                self.contacts.push(incoming);
                DedupOutcome::Inserted(id)
            }
        }
    }

    fn settle_contact(&mut self, mut idx: usize) -> usize {
        loop {
            let found = (0..self.contacts.len())
                .find(|&j| j != idx && self.contacts_match(&self.contacts[j], &self.contacts[idx]));
            let Some(j) = found else {
                return idx;
            };
            let (keep, drop) = if j < idx { (j, idx) } else { (idx, j) };
            let removed = self.contacts.remove(drop);
            merge_contact(&mut self.contacts[keep], removed);
            idx = keep;
        }
    }

    /// 重新关联联系人与公司
    ///
    /// 处理先于公司记录到达的联系人以及指向已合并公司的引用
    pub fn relink_contacts(&mut self) {
        let links: Vec<Option<Uuid>> = self
            .contacts
            .iter()
            .map(|c| self.find_company_for_contact(c))
            .collect();
        for (contact, link) in self.contacts.iter_mut().zip(links) {
            contact.company_id = link;
        }
        // 关联后可能出现新的同名联系人
        let mut idx = 0;
        while idx < self.contacts.len() {
            idx = self.settle_contact(idx) + 1;
        }
    }

    pub fn company(&self, id: Uuid) -> Option<&Company> {
        let id = self.resolve_company_id(id);
        self.companies.iter().find(|c| c.id == id)
    }

    pub fn company_mut(&mut self, id: Uuid) -> Option<&mut Company> {
        let id = self.resolve_company_id(id);
        self.companies.iter_mut().find(|c| c.id == id)
    }

    pub fn contact_mut(&mut self, id: Uuid) -> Option<&mut Contact> {
        self.contacts.iter_mut().find(|c| c.id == id)
    }

    pub fn companies(&self) -> &[Company] {
        &self.companies
    }

    pub fn contacts(&self) -> &[Contact] {
        &self.contacts
    }

    /// 对一批公司去重
    pub fn deduplicate_companies(config: DeduplicationConfig, companies: Vec<Company>) -> Vec<Company> {
        let mut dedup = Self::new(config);
        for company in companies {
            dedup.upsert_company(company);
        }
        dedup.companies
    }

    /// 对一批联系人去重
    pub fn deduplicate_contacts(config: DeduplicationConfig, contacts: Vec<Contact>) -> Vec<Contact> {
        let mut dedup = Self::new(config);
        for contact in contacts {
            dedup.upsert_contact(contact);
        }
        dedup.contacts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::lead::Provenance;
    use chrono::{Duration, Utc};

    fn company(name: &str, domain: Option<&str>, confidence: f64) -> Company {
        let mut c = Company::new(Uuid::nil(), name, Provenance::new(confidence, Utc::now()));
        c.domain = domain.map(str::to_string);
        c
    }

    fn contact(name: Option<&str>, email: Option<&str>, company_name: Option<&str>) -> Contact {
        let mut c = Contact::new(Uuid::nil(), Provenance::new(0.7, Utc::now()));
        c.name = name.map(str::to_string);
        c.email = email.map(str::to_string);
        c.company_name = company_name.map(str::to_string);
        c
    }

    #[test]
    fn test_normalize_company_name_strips_suffixes() {
        assert_eq!(normalize_company_name("Acme Corp."), "acme");
        assert_eq!(normalize_company_name("ACME, Inc"), "acme");
        assert_eq!(normalize_company_name("Café Münch GmbH"), "cafe munch");
        // 只有后缀时保留
        assert_eq!(normalize_company_name("Company"), "company");
    }

    #[test]
    fn test_domain_case_difference_is_same_company() {
        let dedup = Deduplicator::with_default_config();
        let a = company("Acme", Some("acme.com"), 0.5);
        let b = company("Acme Industries", Some("Acme.com"), 0.5);
        assert!(dedup.companies_match(&a, &b));
    }

    #[test]
    fn test_different_domains_are_different_companies() {
        let dedup = Deduplicator::with_default_config();
        let a = company("Acme", Some("acme.com"), 0.5);
        let b = company("Acme", Some("acme.io"), 0.5);
        assert!(!dedup.companies_match(&a, &b));
    }

    #[test]
    fn test_fuzzy_name_match_without_domain() {
        let dedup = Deduplicator::with_default_config();
        let a = company("Acme Corporation", None, 0.5);
        let b = company("ACME Corp", Some("acme.com"), 0.5);
        let c = company("Apex Logistics", None, 0.5);
        assert!(dedup.companies_match(&a, &b));
        assert!(!dedup.companies_match(&a, &c));
    }

    #[test]
    fn test_merge_prefers_higher_confidence_and_keeps_verified() {
        let mut existing = company("Acme", Some("acme.com"), 0.9);
        existing.phone = Some("+15550001111".into());
        existing.is_verified = true;

        let mut incoming = company("Acme Inc", Some("acme.com"), 0.4);
        incoming.phone = Some("+15559999999".into());
        incoming.location = Some("Austin, TX".into());
        incoming.provenance.scraped_at = Utc::now() + Duration::hours(1);

        merge_company(&mut existing, incoming);
        assert_eq!(existing.name, "Acme");
        assert_eq!(existing.phone.as_deref(), Some("+15550001111"));
        assert_eq!(existing.location.as_deref(), Some("Austin, TX"));
        assert!(existing.is_verified);
        assert_eq!(existing.provenance.source_count, 2);
    }

    fn located(confidence: f64, location: Option<&str>) -> Company {
        let mut c = company("Acme", Some("acme.com"), confidence);
        c.location = location.map(str::to_string);
        c
    }

    #[test]
    fn test_conflicting_field_resolved_by_its_own_source() {
        let mut dedup = Deduplicator::with_default_config();
        dedup.upsert_company(located(0.9, None));
        dedup.upsert_company(located(0.5, Some("Springfield")));
        dedup.upsert_company(located(0.7, Some("Shelbyville")));
        // 低于当前位置来源的记录不能覆盖
        dedup.upsert_company(located(0.6, Some("Ogdenville")));

        let merged = &dedup.companies()[0];
        assert_eq!(dedup.companies().len(), 1);
        assert_eq!(merged.location.as_deref(), Some("Shelbyville"));
        assert_eq!(merged.field_sources["location"].confidence, 0.7);
        assert_eq!(merged.provenance.confidence, 0.9);
        assert_eq!(merged.provenance.source_count, 4);
    }

    #[test]
    fn test_field_merge_is_order_independent() {
        let records = [
            located(0.9, None),
            located(0.5, Some("Springfield")),
            located(0.7, Some("Shelbyville")),
        ];
        for order in [[0, 1, 2], [2, 1, 0], [1, 0, 2], [1, 2, 0]] {
            let mut dedup = Deduplicator::with_default_config();
            for i in order {
                dedup.upsert_company(records[i].clone());
            }
            assert_eq!(
                dedup.companies()[0].location.as_deref(),
                Some("Shelbyville"),
                "order {:?}",
                order
            );
        }
    }

    #[test]
    fn test_contact_title_keeps_higher_confidence_source() {
        let mut first = contact(Some("Jane Doe"), Some("jane@acme.com"), None);
        first.provenance = Provenance::new(0.9, Utc::now());
        let mut second = first.clone();
        second.id = Uuid::new_v4();
        second.provenance = Provenance::new(0.4, Utc::now());
        second.title = Some("Intern".into());
        let mut third = first.clone();
        third.id = Uuid::new_v4();
        third.provenance = Provenance::new(0.8, Utc::now());
        third.title = Some("CTO".into());

        let mut dedup = Deduplicator::with_default_config();
        dedup.upsert_contact(first);
        dedup.upsert_contact(second);
        dedup.upsert_contact(third);

        assert_eq!(dedup.contacts().len(), 1);
        assert_eq!(dedup.contacts()[0].title.as_deref(), Some("CTO"));
    }

    #[test]
    fn test_contact_without_email_merges_with_emailed_duplicate() {
        let mut dedup = Deduplicator::with_default_config();
        let first = contact(Some("John Smith"), None, Some("Acme Corp"));
        let second = contact(Some("John Smith"), Some("j.smith@acme.com"), Some("Acme Corp"));

        let a = dedup.upsert_contact(first);
        let b = dedup.upsert_contact(second);

        assert!(matches!(b, DedupOutcome::Merged(_)));
        assert_eq!(a.id(), b.id());
        assert_eq!(dedup.contacts().len(), 1);
        let merged = &dedup.contacts()[0];
        assert_eq!(merged.name.as_deref(), Some("John Smith"));
        assert_eq!(merged.email.as_deref(), Some("j.smith@acme.com"));
    }

    #[test]
    fn test_same_name_at_different_companies_not_merged() {
        let mut dedup = Deduplicator::with_default_config();
        dedup.upsert_contact(contact(Some("John Smith"), None, Some("Acme Corp")));
        dedup.upsert_contact(contact(Some("John Smith"), None, Some("Globex")));
        assert_eq!(dedup.contacts().len(), 2);
    }

    #[test]
    fn test_different_emails_are_different_people() {
        let dedup = Deduplicator::with_default_config();
        let a = contact(Some("John Smith"), Some("john@acme.com"), Some("Acme"));
        let b = contact(Some("John Smith"), Some("jsmith@acme.com"), Some("Acme"));
        assert!(!dedup.contacts_match(&a, &b));
    }

    #[test]
    fn test_transitive_merge_collapses_bridged_entities() {
        let mut dedup = Deduplicator::with_default_config();
        // 两条记录名称不同，无法直接匹配
        dedup.upsert_company(company("Northwind Traders", None, 0.5));
        dedup.upsert_company(company("NW Trading Group", Some("northwind.com"), 0.5));
        assert_eq!(dedup.companies().len(), 2);

        // 第三条同时匹配二者，合并后三者归一
        let mut bridge = company("Northwind Traders", None, 0.9);
        bridge.domain = None;
        dedup.upsert_company(bridge);
        let mut bridge2 = company("Northwind Traders Inc", Some("northwind.com"), 0.9);
        bridge2.phone = None;
        dedup.upsert_company(bridge2);

        assert_eq!(dedup.companies().len(), 1);
        assert_eq!(dedup.companies()[0].domain.as_deref(), Some("northwind.com"));
    }

    #[test]
    fn test_deduplication_is_idempotent() {
        let config = DeduplicationConfig::default();
        let batch = vec![
            company("Acme Corp", Some("acme.com"), 0.6),
            company("ACME Corporation", None, 0.8),
            company("acme corp", Some("Acme.com"), 0.7),
            company("Globex", Some("globex.com"), 0.5),
            company("Globex Inc", None, 0.9),
            company("Initech", None, 0.5),
        ];

        let once = Deduplicator::deduplicate_companies(config.clone(), batch);
        let twice = Deduplicator::deduplicate_companies(config.clone(), once.clone());
        assert_eq!(once, twice);
        assert_eq!(once.len(), 3);

        let contacts = vec![
            contact(Some("John Smith"), None, Some("Acme Corp")),
            contact(Some("John Smith"), Some("j.smith@acme.com"), Some("Acme Corp")),
            contact(Some("Jane Doe"), Some("jane@acme.com"), Some("Acme Corp")),
            contact(None, Some("JANE@acme.com"), None),
        ];
        let once = Deduplicator::deduplicate_contacts(config.clone(), contacts);
        let twice = Deduplicator::deduplicate_contacts(config, once.clone());
        assert_eq!(once, twice);
        assert_eq!(once.len(), 2);
    }

    #[test]
    fn test_seeded_entities_keep_their_ids() {
        let mut dedup = Deduplicator::with_default_config();
        let stored = company("Acme", Some("acme.com"), 0.9);
        let stored_id = stored.id;
        dedup.seed(vec![ExistingEntity::Company(stored)]);

        let outcome = dedup.upsert_company(company("Acme Corp", Some("www.acme.com"), 0.5));
        assert_eq!(outcome, DedupOutcome::Merged(stored_id));
    }

    #[test]
    fn test_contact_links_to_company_by_email_domain() {
        let mut dedup = Deduplicator::with_default_config();
        let acme = company("Acme", Some("acme.com"), 0.9);
        let acme_id = acme.id;
        dedup.upsert_company(acme);

        dedup.upsert_contact(contact(Some("Jane Doe"), Some("jane@acme.com"), None));
        assert_eq!(dedup.contacts()[0].company_id, Some(acme_id));
    }
}
