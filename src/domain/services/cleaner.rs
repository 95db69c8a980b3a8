// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;
use url::Url;
use uuid::Uuid;
use validator::ValidateEmail;

use crate::domain::models::lead::{
    Company, Contact, Provenance, RawCompany, RawContact, RawRecord, RecordPayload,
};
use crate::utils::url_utils::normalize_domain;

static EMAIL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-z0-9][a-z0-9._%+-]*@[a-z0-9](?:[a-z0-9-]*[a-z0-9])?(?:\.[a-z0-9](?:[a-z0-9-]*[a-z0-9])?)*\.[a-z]{2,}$")
        .expect("valid email regex")
});

static WHITESPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid regex"));

static EXTENSION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\s*(?:ext\.?|x|#)\s*\d+\s*$").expect("valid regex"));

static EMPLOYEE_COUNT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d[\d,]*)\s*(?:[-–]\s*(\d[\d,]*))?\s*(\+)?").expect("valid regex"));

/// 清洗配置
#[derive(Debug, Clone)]
pub struct CleaningConfig {
    /// 10 位本地号码默认补充的国家码
    pub default_country_code: String,
    pub min_phone_digits: usize,
    pub max_phone_digits: usize,
    /// 公司名称最少字符数
    pub min_company_name_len: usize,
}

impl Default for CleaningConfig {
    fn default() -> Self {
        Self {
            default_country_code: "1".to_string(),
            min_phone_digits: 7,
            max_phone_digits: 15,
            min_company_name_len: 2,
        }
    }
}

/// 主字段校验失败，记录被丢弃
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("company name missing or invalid: {0:?}")]
    InvalidCompanyName(Option<String>),

    #[error("contact has neither a valid name nor a valid email")]
    UnidentifiableContact,
}

/// 清洗后的实体
#[derive(Debug, Clone, PartialEq)]
pub enum CleanEntity {
    Company(Company),
    Contact(Contact),
}

/// 清洗结果，附带次要字段的警告
#[derive(Debug, Clone, PartialEq)]
pub struct CleanedRecord {
    pub entity: CleanEntity,
    pub warnings: Vec<String>,
}

/// 规范化邮箱：正则 + 语法检查，返回小写形式
pub fn clean_email(raw: &str) -> Option<String> {
    let email = raw
        .trim()
        .trim_start_matches("mailto:")
        .split('?')
        .next()
        .unwrap_or_default()
        .to_lowercase();
    if email.len() > 254 || !EMAIL_RE.is_match(&email) || !email.validate_email() {
        return None;
    }
    let (_, domain) = email.rsplit_once('@')?;
    if domain.split('.').any(|label| label.is_empty() || label.len() > 63) {
        return None;
    }
    Some(email)
}

/// 规范化电话为 `+<国家码><号码>` 格式
///
/// 去除分机号和分隔符；`00` 前缀视为国际前缀；10 位本地号码补默认国家码。
/// 数字位数不在允许范围内时返回 None。
pub fn clean_phone(raw: &str, config: &CleaningConfig) -> Option<String> {
    let trimmed = raw.trim().trim_start_matches("tel:");
    let without_ext = EXTENSION_RE.replace(trimmed, "");
    let international = without_ext.trim_start().starts_with('+');

    let mut digits: String = without_ext.chars().filter(|c| c.is_ascii_digit()).collect();
    if !international {
        if let Some(rest) = digits.strip_prefix("00") {
            digits = rest.to_string();
        } else if digits.len() == 10 {
            digits = format!("{}{}", config.default_country_code, digits);
        }
    }

    if digits.len() < config.min_phone_digits || digits.len() > config.max_phone_digits {
        return None;
    }
    Some(format!("+{}", digits))
}

/// 规范化URL
///
/// 只接受 http/https 且带主机名；裸域名补全为 https。其余情况返回 None。
pub fn clean_url(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed.contains(char::is_whitespace) {
        return None;
    }
    let candidate = if trimmed.contains("://") {
        trimmed.to_string()
    } else if trimmed.contains('.') && !trimmed.starts_with('/') {
        format!("https://{}", trimmed)
    } else {
        return None;
    };

    let url = Url::parse(&candidate).ok()?;
    if !matches!(url.scheme(), "http" | "https") {
        return None;
    }
    let host = url.host_str()?;
    if host.is_empty() {
        return None;
    }
    Some(url.to_string())
}

fn collapse_whitespace(s: &str) -> String {
    WHITESPACE_RE.replace_all(s.trim(), " ").to_string()
}

fn title_case(s: &str) -> String {
    s.split(' ')
        .map(|word| {
            // 保留 LLC、IBM 之类的短缩写
            let is_acronym = word.len() <= 3
                && word.chars().all(|c| c.is_ascii_uppercase() || c == '.')
                && word.chars().any(|c| c.is_ascii_uppercase());
            if is_acronym {
                return word.to_string();
            }
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.flat_map(|c| c.to_lowercase())).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// 规范化公司名称：去空白、折叠空格、首字母大写；过短返回 None
pub fn clean_company_name(raw: &str, min_len: usize) -> Option<String> {
    let collapsed = collapse_whitespace(raw);
    if collapsed.chars().filter(|c| c.is_alphanumeric()).count() < min_len {
        return None;
    }
    Some(title_case(&collapsed))
}

/// 规范化人名
pub fn clean_person_name(raw: &str) -> Option<String> {
    let collapsed = collapse_whitespace(raw);
    let letters = collapsed.chars().filter(|c| c.is_alphabetic()).count();
    if letters < 2 || collapsed.contains('@') || collapsed.chars().any(|c| c.is_ascii_digit()) {
        return None;
    }
    Some(title_case(&collapsed))
}

/// 解析员工数，范围取上限，如 "51-200 employees" → 200
pub fn parse_employee_count(raw: &str) -> Option<u32> {
    let caps = EMPLOYEE_COUNT_RE.captures(raw)?;
    let pick = caps.get(2).or_else(|| caps.get(1))?;
    pick.as_str().replace(',', "").parse().ok()
}

fn clean_text(raw: Option<String>) -> Option<String> {
    raw.map(|s| collapse_whitespace(&s)).filter(|s| !s.is_empty())
}

/// 清洗器
///
/// 主字段（公司名称；联系人的姓名或邮箱）校验失败时丢弃记录，
/// 次要字段失败时置空并记录警告。
#[derive(Debug, Clone, Default)]
pub struct Cleaner {
    config: CleaningConfig,
}

impl Cleaner {
    pub fn new(config: CleaningConfig) -> Self {
        Self { config }
    }

    /// 清洗一条原始记录
    ///
    /// # 参数
    ///
    /// * `record` - 原始记录
    /// * `job_id` - 产出该记录的任务
    ///
    /// # 返回值
    ///
    /// * `Ok(CleanedRecord)` - 清洗后的实体
    /// * `Err(ValidationError)` - 主字段无效，记录应被丢弃
    pub fn clean(&self, record: RawRecord, job_id: Uuid) -> Result<CleanedRecord, ValidationError> {
        let provenance = Provenance::new(record.confidence, record.extracted_at);
        match record.payload {
            RecordPayload::Company(raw) => self.clean_company(raw, job_id, provenance),
            RecordPayload::Contact(raw) => self.clean_contact(raw, job_id, provenance),
        }
    }

    fn clean_company(
        &self,
        raw: RawCompany,
        job_id: Uuid,
        provenance: Provenance,
    ) -> Result<CleanedRecord, ValidationError> {
        let name = raw
            .name
            .as_deref()
            .and_then(|n| clean_company_name(n, self.config.min_company_name_len))
            .ok_or_else(|| ValidationError::InvalidCompanyName(raw.name.clone()))?;

        let mut warnings = Vec::new();
        let mut company = Company::new(job_id, name, provenance);

        company.website = self.secondary(raw.website, "website", clean_url, &mut warnings);
        company.linkedin_url =
            self.secondary(raw.linkedin_url, "linkedin_url", clean_url, &mut warnings);
        company.email = self.secondary(raw.email, "email", clean_email, &mut warnings);
        company.phone = self.secondary(
            raw.phone,
            "phone",
            |p| clean_phone(p, &self.config),
            &mut warnings,
        );
        company.domain = raw
            .domain
            .as_deref()
            .and_then(normalize_domain)
            .or_else(|| company.website.as_deref().and_then(normalize_domain));
        company.employee_count = self.secondary(
            raw.employee_count,
            "employee_count",
            parse_employee_count,
            &mut warnings,
        );
        company.industry = clean_text(raw.industry);
        company.location = clean_text(raw.location);
        company.description = clean_text(raw.description);
        company.hiring = raw.hiring.unwrap_or(false);

        Ok(CleanedRecord {
            entity: CleanEntity::Company(company),
            warnings,
        })
    }

    fn clean_contact(
        &self,
        raw: RawContact,
        job_id: Uuid,
        provenance: Provenance,
    ) -> Result<CleanedRecord, ValidationError> {
        let name = raw.name.as_deref().and_then(clean_person_name);
        let email = raw.email.as_deref().and_then(clean_email);
        if name.is_none() && email.is_none() {
            return Err(ValidationError::UnidentifiableContact);
        }

        let mut warnings = Vec::new();
        if raw.name.is_some() && name.is_none() {
            warnings.push("name: invalid value dropped".to_string());
        }
        if raw.email.is_some() && email.is_none() {
            warnings.push("email: invalid value dropped".to_string());
        }

        let mut contact = Contact::new(job_id, provenance);
        contact.name = name;
        contact.email = email;
        contact.phone = self.secondary(
            raw.phone,
            "phone",
            |p| clean_phone(p, &self.config),
            &mut warnings,
        );
        contact.linkedin_url =
            self.secondary(raw.linkedin_url, "linkedin_url", clean_url, &mut warnings);
        contact.title = clean_text(raw.title);
        contact.company_name = raw
            .company_name
            .as_deref()
            .and_then(|n| clean_company_name(n, self.config.min_company_name_len));
        contact.company_domain = raw.company_domain.as_deref().and_then(normalize_domain);

        Ok(CleanedRecord {
            entity: CleanEntity::Contact(contact),
            warnings,
        })
    }

    fn secondary<T, F>(
        &self,
        raw: Option<String>,
        field: &str,
        clean: F,
        warnings: &mut Vec<String>,
    ) -> Option<T>
    where
        F: Fn(&str) -> Option<T>,
    {
        let raw = raw?;
        if raw.trim().is_empty() {
            return None;
        }
        let cleaned = clean(&raw);
        if cleaned.is_none() {
            warnings.push(format!("{}: invalid value {:?} dropped", field, raw));
        }
        cleaned
    }
}
