// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use leadrs::domain::models::job::{JobType, SearchParameters};
use leadrs::domain::models::lead::{LeadGrade, RawCompany, RawContact, RawRecord};
use leadrs::domain::services::pipeline::{LeadFilter, Pipeline, PipelineOutcome};
use serde_json::json;
use uuid::Uuid;

fn listing(name: &str, website: &str, industry: &str) -> RawRecord {
    RawRecord::company(
        JobType::SearchListing,
        "https://listings.example/search?page=1",
        RawCompany {
            name: Some(name.into()),
            website: Some(website.into()),
            phone: Some("512-555-0100".into()),
            industry: Some(industry.into()),
            location: Some("Austin, TX".into()),
            employee_count: Some("250".into()),
            ..Default::default()
        },
        0.8,
    )
}

fn person(name: &str, email: &str, title: &str) -> RawRecord {
    RawRecord::contact(
        JobType::ProfessionalNetwork,
        "https://network.example/in/someone",
        RawContact {
            name: Some(name.into()),
            email: Some(email.into()),
            title: Some(title.into()),
            ..Default::default()
        },
        0.7,
    )
}

#[test]
fn test_mixed_sources_become_ranked_leads() {
    let mut pipeline = Pipeline::with_defaults(Uuid::new_v4());

    // 联系人先于公司到达，汇总时再关联
    pipeline.process(person("jane DOE", "Jane.Doe@Acme.com", "VP of Sales"));
    pipeline.process(listing("Acme Software Inc.", "acme.com", "Software"));
    pipeline.process(listing("ACME Software", "https://www.acme.com/", "Software"));
    pipeline.process(listing("Corner Bakery", "cornerbakery.example", "Food"));
    let dropped = pipeline.process(person("", "not-an-email", ""));
    assert!(dropped.is_dropped());

    let stats = pipeline.stats();
    assert_eq!(stats.processed, 5);
    assert_eq!(stats.dropped, 1);
    assert_eq!(stats.companies_merged, 1);

    let leads = pipeline.finish(&LeadFilter::default(), 10);
    assert_eq!(leads.len(), 2);

    let top = &leads[0];
    let company = top.company.as_ref().unwrap();
    assert_eq!(company.domain.as_deref(), Some("acme.com"));
    assert_eq!(top.contacts.len(), 1);
    assert_eq!(top.contacts[0].email.as_deref(), Some("jane.doe@acme.com"));
    assert!(top.contacts[0].is_decision_maker);
    assert!(top.score.total > leads[1].score.total);
    assert_eq!(top.score.component_sum(), top.score.total);
    assert_eq!(top.score.grade, LeadGrade::from_total(top.score.total));
}

#[test]
fn test_job_filters_limit_results() {
    let mut pipeline = Pipeline::with_defaults(Uuid::new_v4());
    pipeline.process(listing("Acme Software", "acme.com", "Software"));
    pipeline.process(listing("Corner Bakery", "cornerbakery.example", "Food"));
    pipeline.process(listing("Initech Software", "initech.example", "Software"));

    let filters: SearchParameters = [("industry".to_string(), json!("software"))]
        .into_iter()
        .collect();
    let leads = pipeline.finish(&LeadFilter::from_parameters(&filters), 1);
    assert_eq!(leads.len(), 1);
    assert!(leads[0]
        .company
        .as_ref()
        .and_then(|c| c.industry.as_deref())
        .is_some_and(|i| i.to_lowercase().contains("software")));
}

#[test]
fn test_outcomes_report_merges() {
    let mut pipeline = Pipeline::with_defaults(Uuid::new_v4());
    let first = pipeline.process(listing("Acme Software", "acme.com", "Software"));
    let second = pipeline.process(listing("Acme Software", "acme.com", "Software"));

    let (PipelineOutcome::Company { id: a, merged: false, .. }, PipelineOutcome::Company { id: b, merged: true, .. }) =
        (first, second)
    else {
        panic!("expected insert then merge");
    };
    assert_eq!(a, b);
}
