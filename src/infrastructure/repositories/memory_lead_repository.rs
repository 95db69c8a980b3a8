// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use crate::domain::models::job::JobSnapshot;
use crate::domain::models::lead::{ExistingEntity, ProcessedLead};
use crate::domain::repositories::lead_repository::LeadRepository;
use crate::utils::errors::RepositoryError;

/// 内存线索仓库
///
/// 按任务保存线索和最新快照。去重作用域通过任务快照解析，
/// 因此只有已经调用过 `update_job` 的任务的线索才会被后续任务加载。
#[derive(Clone, Default)]
pub struct MemoryLeadRepository {
    leads: Arc<DashMap<Uuid, Vec<ProcessedLead>>>,
    jobs: Arc<DashMap<Uuid, JobSnapshot>>,
    fail_writes: Arc<AtomicBool>,
}

impl MemoryLeadRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// 让后续写操作全部失败，用于模拟存储故障
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// 任务已保存的线索
    pub fn leads_for(&self, job_id: Uuid) -> Vec<ProcessedLead> {
        self.leads
            .get(&job_id)
            .map(|l| l.value().clone())
            .unwrap_or_default()
    }

    /// 任务最近一次持久化的快照
    pub fn job(&self, job_id: Uuid) -> Option<JobSnapshot> {
        self.jobs.get(&job_id).map(|s| s.value().clone())
    }

    fn check_writable(&self) -> Result<(), RepositoryError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(RepositoryError::StorageError("storage unavailable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl LeadRepository for MemoryLeadRepository {
    async fn save_records(
        &self,
        job_id: Uuid,
        leads: &[ProcessedLead],
    ) -> Result<(), RepositoryError> {
        self.check_writable()?;
        self.leads.entry(job_id).or_default().extend_from_slice(leads);
        debug!(job_id = %job_id, count = leads.len(), "Leads saved");
        Ok(())
    }

    async fn load_existing_for_dedup(
        &self,
        scope_key: &str,
    ) -> Result<Vec<ExistingEntity>, RepositoryError> {
        let job_ids: Vec<Uuid> = self
            .jobs
            .iter()
            .filter(|s| s.value().dedup_scope() == scope_key)
            .map(|s| *s.key())
            .collect();

        let mut existing = Vec::new();
        for job_id in job_ids {
            let Some(leads) = self.leads.get(&job_id) else {
                continue;
            };
            for lead in leads.value() {
                if let Some(company) = &lead.company {
                    existing.push(ExistingEntity::Company(company.clone()));
                }
                existing.extend(lead.contacts.iter().cloned().map(ExistingEntity::Contact));
            }
        }
        Ok(existing)
    }

    async fn update_job(&self, snapshot: &JobSnapshot) -> Result<(), RepositoryError> {
        self.check_writable()?;
        self.jobs.insert(snapshot.id, snapshot.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::job::{JobSubmission, JobType, SearchParameters};
    use crate::domain::models::lead::{Company, Provenance};
    use crate::domain::services::job_manager::JobManager;
    use crate::domain::services::lead_scorer::LeadScorer;
    use crate::infrastructure::notifications::BroadcastPublisher;
    use chrono::Utc;
    use serde_json::json;

    fn snapshot(job_type: JobType, scope: Option<&str>) -> JobSnapshot {
        let manager = JobManager::new(Arc::new(BroadcastPublisher::new(4)));
        let mut params = SearchParameters::new();
        if let Some(scope) = scope {
            params.insert("scope".to_string(), json!(scope));
        }
        let id = manager
            .create(JobSubmission {
                job_type,
                search_parameters: params,
                max_results: 10,
                filters: SearchParameters::new(),
            })
            .unwrap();
        manager.get(id).unwrap()
    }

    fn lead(job_id: Uuid, name: &str) -> ProcessedLead {
        let company = Company::new(job_id, name, Provenance::new(0.8, Utc::now()));
        let score = LeadScorer::default().score(Some(&company), &[]);
        ProcessedLead {
            company: Some(company),
            contacts: Vec::new(),
            score,
        }
    }

    #[tokio::test]
    async fn test_existing_entities_are_scoped() {
        let repo = MemoryLeadRepository::new();
        let listing = snapshot(JobType::SearchListing, None);
        let texas = snapshot(JobType::GenericWebsite, Some("Texas"));

        repo.save_records(listing.id, &[lead(listing.id, "Acme")]).await.unwrap();
        repo.save_records(texas.id, &[lead(texas.id, "Globex")]).await.unwrap();

        // 快照未持久化前无法解析作用域
        assert!(repo.load_existing_for_dedup("search_listing").await.unwrap().is_empty());

        repo.update_job(&listing).await.unwrap();
        repo.update_job(&texas).await.unwrap();

        let existing = repo.load_existing_for_dedup("search_listing").await.unwrap();
        assert_eq!(existing.len(), 1);
        assert!(matches!(&existing[0], ExistingEntity::Company(c) if c.name == "Acme"));

        let existing = repo.load_existing_for_dedup("texas").await.unwrap();
        assert!(matches!(&existing[0], ExistingEntity::Company(c) if c.name == "Globex"));
    }

    #[tokio::test]
    async fn test_fail_writes() {
        let repo = MemoryLeadRepository::new();
        let job = snapshot(JobType::SearchListing, None);
        repo.set_fail_writes(true);
        assert!(repo.save_records(job.id, &[lead(job.id, "Acme")]).await.is_err());
        assert!(repo.update_job(&job).await.is_err());
        assert!(repo.leads_for(job.id).is_empty());

        repo.set_fail_writes(false);
        repo.update_job(&job).await.unwrap();
        assert_eq!(repo.job(job.id).unwrap().id, job.id);
    }
}
