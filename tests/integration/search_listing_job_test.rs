// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use super::helpers::{create_test_app, drain, mock_sources, submission};
use leadrs::domain::models::event::ProgressEventType;
use leadrs::domain::models::job::{ErrorCategory, JobStatus, JobType};
use serde_json::json;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const PAGE_ONE: &str = r#"
    <html><body>
      <div class="result">
        <a class="business-name" href="/biz/acme"><span>Acme Coffee Roasters</span></a>
        <div class="categories">Coffee &amp; Tea</div>
        <div class="phone">(512) 555-0100</div>
        <div class="address">100 Main St, Austin, TX</div>
        <a class="track-visit-website" href="https://acmecoffee.com">Website</a>
      </div>
      <div class="result">
        <a class="business-name" href="/biz/globex"><span>Globex Supply</span></a>
        <div class="phone">(512) 555-0199</div>
        <a class="track-visit-website" href="https://globex.com">Website</a>
      </div>
    </body></html>"#;

const PAGE_TWO: &str = r#"
    <html><body>
      <div class="result">
        <a class="business-name" href="/biz/acme"><span>Acme Coffee Roasters</span></a>
        <div class="phone">(512) 555-0100</div>
        <a class="track-visit-website" href="https://www.acmecoffee.com/">Website</a>
        <p class="snippet">Now hiring baristas</p>
      </div>
      <div class="result">
        <a class="business-name" href="/biz/initech"><span>Initech Services</span></a>
        <a class="track-visit-website" href="https://initech.com">Website</a>
      </div>
    </body></html>"#;

async fn mount_robots(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(ResponseTemplate::new(200).set_body_string("User-agent: *\nAllow: /"))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_search_listing_job_end_to_end() {
    let server = MockServer::start().await;
    mount_robots(&server).await;
    Mock::given(method("GET"))
        .and(path("/search"))
        .and(query_param("page", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_string(PAGE_ONE))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/search"))
        .and(query_param("page", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_string(PAGE_TWO))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/search"))
        .and(query_param("page", "3"))
        .respond_with(ResponseTemplate::new(503))
        .expect(3)
        .mount(&server)
        .await;

    let mut app = create_test_app(mock_sources(&server.uri()));
    let receipt = app
        .orchestrator
        .submit(submission(
            JobType::SearchListing,
            &[("query", json!("coffee")), ("location", json!("Austin, TX")), ("pages", json!(3))],
        ))
        .unwrap();
    let snapshot = app.orchestrator.run(receipt.job_id).await.unwrap();

    assert_eq!(snapshot.status, JobStatus::Completed);
    assert_eq!(snapshot.counts.total, 3);
    assert_eq!(snapshot.counts.succeeded, 2);
    assert_eq!(snapshot.counts.failed, 1);
    assert_eq!(snapshot.results_count, 3);
    assert!(snapshot
        .errors
        .iter()
        .any(|e| e.target == "coffee page 3" && e.category == ErrorCategory::Transient));

    let leads = app.repository.leads_for(receipt.job_id);
    assert_eq!(leads.len(), 3);
    let acme = leads
        .iter()
        .filter_map(|l| l.company.as_ref())
        .find(|c| c.domain.as_deref() == Some("acmecoffee.com"))
        .expect("acme lead");
    assert_eq!(acme.provenance.source_count, 2);
    assert!(acme.hiring);
    // 线索按总分降序
    assert!(leads
        .windows(2)
        .all(|w| w[0].score.total >= w[1].score.total));

    let events = drain(&mut app.events);
    let discovered = events
        .iter()
        .filter(|e| e.event_type == ProgressEventType::LeadDiscovered)
        .count();
    assert_eq!(discovered, 3);
    assert_eq!(
        events.last().map(|e| e.event_type),
        Some(ProgressEventType::Completed)
    );

    server.verify().await;
}

#[tokio::test]
async fn test_directory_layout_change_completes_without_results() {
    let server = MockServer::start().await;
    mount_robots(&server).await;
    Mock::given(method("GET"))
        .and(path("/directory"))
        .respond_with(
            ResponseTemplate::new(200).set_body_string("<html><body><p>Redesigned!</p></body></html>"),
        )
        .mount(&server)
        .await;

    let app = create_test_app(mock_sources(&server.uri()));
    let receipt = app
        .orchestrator
        .submit(submission(
            JobType::Directory,
            &[("query", json!("dentists")), ("pages", json!(2))],
        ))
        .unwrap();
    let snapshot = app.orchestrator.run(receipt.job_id).await.unwrap();

    assert_eq!(snapshot.status, JobStatus::Completed);
    assert_eq!(snapshot.results_count, 0);
    assert_eq!(snapshot.counts.failed, 2);
    assert!(snapshot
        .errors
        .iter()
        .all(|e| e.category == ErrorCategory::Structural));
}

#[tokio::test]
async fn test_blocked_source_fails_job() {
    let server = MockServer::start().await;
    mount_robots(&server).await;
    Mock::given(method("GET"))
        .and(path("/search"))
        .respond_with(ResponseTemplate::new(429))
        .mount(&server)
        .await;

    let app = create_test_app(mock_sources(&server.uri()));
    let receipt = app
        .orchestrator
        .submit(submission(
            JobType::SearchListing,
            &[("query", json!("plumbers")), ("pages", json!(1))],
        ))
        .unwrap();
    let snapshot = app.orchestrator.run(receipt.job_id).await.unwrap();

    assert_eq!(snapshot.status, JobStatus::Failed);
    assert!(snapshot
        .errors
        .iter()
        .any(|e| e.category == ErrorCategory::Blocked));
    assert!(snapshot
        .errors
        .iter()
        .any(|e| e.category == ErrorCategory::Fatal));
    assert_eq!(
        app.repository.job(receipt.job_id).map(|j| j.status),
        Some(JobStatus::Failed)
    );
}
