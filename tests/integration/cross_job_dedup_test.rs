// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use super::helpers::{create_test_app, mock_sources, submission};
use leadrs::domain::models::job::{JobStatus, JobType};
use serde_json::json;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn card(name: &str, website: &str) -> String {
    format!(
        r#"<div class="result"><h2>{}</h2><a class="track-visit-website" href="{}">Website</a></div>"#,
        name, website
    )
}

async fn mount_query(server: &MockServer, query: &str, cards: &[(&str, &str)]) {
    let body = format!(
        "<html><body>{}</body></html>",
        cards.iter().map(|(n, w)| card(n, w)).collect::<String>()
    );
    Mock::given(method("GET"))
        .and(path("/search"))
        .and(query_param("q", query))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_existing_leads_in_scope_are_merged_not_duplicated() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    mount_query(
        &server,
        "coffee",
        &[("Acme Coffee", "https://acmecoffee.com"), ("Globex Beans", "https://globexbeans.com")],
    )
    .await;
    mount_query(&server, "espresso", &[("Acme Coffee", "https://www.acmecoffee.com")]).await;

    let app = create_test_app(mock_sources(&server.uri()));
    let run = |query: &'static str, scope: &'static str| {
        let orchestrator = app.orchestrator.clone();
        async move {
            let receipt = orchestrator
                .submit(submission(
                    JobType::SearchListing,
                    &[("query", json!(query)), ("pages", json!(1)), ("scope", json!(scope))],
                ))
                .unwrap();
            let snapshot = orchestrator.run(receipt.job_id).await.unwrap();
            assert_eq!(snapshot.status, JobStatus::Completed);
            receipt.job_id
        }
    };

    let first = run("coffee", "austin").await;
    assert_eq!(app.repository.leads_for(first).len(), 2);

    // 同一作用域：与已有公司合并，只返回本任务触及的线索
    let second = run("espresso", "Austin").await;
    let leads = app.repository.leads_for(second);
    assert_eq!(leads.len(), 1);
    let company = leads[0].company.as_ref().unwrap();
    assert_eq!(company.domain.as_deref(), Some("acmecoffee.com"));
    assert_eq!(company.provenance.source_count, 2);

    // 不同作用域互不影响
    let third = run("espresso", "dallas").await;
    let leads = app.repository.leads_for(third);
    assert_eq!(leads.len(), 1);
    assert_eq!(
        leads[0].company.as_ref().map(|c| c.provenance.source_count),
        Some(1)
    );
}
