// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use super::helpers::{create_test_app, mock_sources, submission};
use leadrs::domain::models::job::{ErrorCategory, JobStatus, JobType};
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const HOME: &str = r#"
    <html><head>
      <title>Home | Acme Widgets</title>
      <meta property="og:site_name" content="Acme Widgets">
      <meta name="description" content="Industrial widgets since 1990">
    </head><body>
      <a href="/team">Our Team</a>
      <a href="/contact">Contact</a>
    </body></html>"#;

const TEAM: &str = r#"
    <html><body>
      <div class="team-member">
        <h3>Jane Doe</h3><span class="title">Chief Executive Officer</span>
        <a href="mailto:jane.doe@acme.test">Email</a>
      </div>
      <div class="team-member"><h3>Bob Stone</h3><span class="role">Sales Lead</span></div>
    </body></html>"#;

const CONTACT: &str = r#"
    <html><body>
      <p>Call us at (512) 555-0100.</p>
      <a href="tel:+15125550100">Call</a>
    </body></html>"#;

async fn mount_site(server: &MockServer, robots: &str) {
    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(ResponseTemplate::new(200).set_body_string(robots))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200).set_body_string(HOME))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/team"))
        .respond_with(ResponseTemplate::new(200).set_body_string(TEAM))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/contact"))
        .respond_with(ResponseTemplate::new(200).set_body_string(CONTACT))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_company_website_job_collects_team() {
    let server = MockServer::start().await;
    mount_site(&server, "User-agent: *\nAllow: /").await;

    let app = create_test_app(mock_sources(&server.uri()));
    let receipt = app
        .orchestrator
        .submit(submission(
            JobType::GenericWebsite,
            &[("urls", json!([format!("{}/", server.uri())]))],
        ))
        .unwrap();
    let snapshot = app.orchestrator.run(receipt.job_id).await.unwrap();

    assert_eq!(snapshot.status, JobStatus::Completed);
    assert_eq!(snapshot.counts.succeeded, 1);

    let leads = app.repository.leads_for(receipt.job_id);
    let lead = leads
        .iter()
        .find(|l| l.company.as_ref().is_some_and(|c| c.name == "Acme Widgets"))
        .expect("company lead");
    let names: Vec<&str> = lead
        .contacts
        .iter()
        .filter_map(|c| c.name.as_deref())
        .collect();
    assert!(names.contains(&"Jane Doe"));
    assert!(names.contains(&"Bob Stone"));
    let ceo = lead
        .contacts
        .iter()
        .find(|c| c.name.as_deref() == Some("Jane Doe"))
        .unwrap();
    assert!(ceo.is_decision_maker);
    assert_eq!(lead.score.component_sum(), lead.score.total);
}

#[tokio::test]
async fn test_robots_disallowed_site_is_structural_failure() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(ResponseTemplate::new(200).set_body_string("User-agent: *\nDisallow: /"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200).set_body_string(HOME))
        .expect(0)
        .mount(&server)
        .await;

    let app = create_test_app(mock_sources(&server.uri()));
    let receipt = app
        .orchestrator
        .submit(submission(
            JobType::GenericWebsite,
            &[("url", json!(server.uri()))],
        ))
        .unwrap();
    let snapshot = app.orchestrator.run(receipt.job_id).await.unwrap();

    assert_eq!(snapshot.status, JobStatus::Completed);
    assert_eq!(snapshot.results_count, 0);
    assert_eq!(snapshot.errors.len(), 1);
    assert_eq!(snapshot.errors[0].category, ErrorCategory::Structural);

    server.verify().await;
}

#[tokio::test]
async fn test_missing_urls_fails_job() {
    let app = create_test_app(mock_sources("http://127.0.0.1:9"));
    let receipt = app
        .orchestrator
        .submit(submission(JobType::GenericWebsite, &[]))
        .unwrap();
    let snapshot = app.orchestrator.run(receipt.job_id).await.unwrap();

    assert_eq!(snapshot.status, JobStatus::Failed);
    assert!(snapshot
        .failure_reason
        .as_deref()
        .is_some_and(|r| r.contains("urls")));
}
