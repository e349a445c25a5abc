use harvest_client::{GuestDetailFetcher, GuestPageFetcher};
use harvest_core::models::SearchCriteria;
use harvest_core::orchestrator::{
    HarvestConfig, HarvestOrchestrator, HarvestPhase, StopReason, TracingHarvestReporter,
};
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path, path_regex, query_param};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

use crate::integration::common::{detail_page, direct_executor, search_page};

async fn mount_search(server: &MockServer, start: &str, body: String) {
    Mock::given(method("GET"))
        .and(path("/search"))
        .and(query_param("start", start))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(server)
        .await;
}

#[tokio::test]
async fn harvest_runs_end_to_end_against_mock_api() {
    let server = MockServer::start().await;
    mount_search(&server, "0", search_page(1..=10)).await;
    mount_search(&server, "10", search_page(11..=15)).await;
    // Every later offset is past the end of the results.
    Mock::given(method("GET"))
        .and(path("/search"))
        .respond_with(ResponseTemplate::new(200).set_body_string(""))
        .with_priority(10)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/detail/13"))
        .respond_with(ResponseTemplate::new(404))
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path_regex(r"^/detail/\d+$"))
        .respond_with(|request: &Request| {
            let id: u64 = request
                .url
                .path()
                .rsplit('/')
                .next()
                .and_then(|id| id.parse().ok())
                .unwrap_or_default();
            ResponseTemplate::new(200).set_body_string(detail_page(id))
        })
        .mount(&server)
        .await;

    let executor = direct_executor(2);
    let pages =
        GuestPageFetcher::with_base_url(executor.clone(), &format!("{}/search", server.uri()))
            .unwrap();
    let details = GuestDetailFetcher::with_base_url(executor, format!("{}/detail", server.uri()));
    let config = HarvestConfig::default()
        .with_target_count(25)
        .with_concurrency(2)
        .with_page_size(10);

    let orchestrator = HarvestOrchestrator::new(pages, details, config).unwrap();
    let outcome = orchestrator
        .run(
            SearchCriteria::new("rust", "Berlin"),
            CancellationToken::new(),
            &TracingHarvestReporter,
        )
        .await;

    let ids: Vec<&str> = outcome.records.iter().map(|r| r.job_id()).collect();
    let expected: Vec<String> = (1..=15).map(|id| id.to_string()).collect();
    assert_eq!(ids, expected.iter().map(String::as_str).collect::<Vec<_>>());

    assert_eq!(outcome.summary.stop_reason, Some(StopReason::ExhaustedResults));
    assert_eq!(outcome.summary.phase, HarvestPhase::Completed);
    assert_eq!(outcome.summary.degraded_records, 1);
    assert_eq!(outcome.summary.collected, 15);

    let degraded = outcome.records.iter().find(|r| r.job_id() == "13").unwrap();
    assert!(degraded.degraded);
    assert_eq!(degraded.summary.title, "Engineer 13");

    let enriched = outcome.records.iter().find(|r| r.job_id() == "1").unwrap();
    assert_eq!(enriched.applicants.as_deref(), Some("1 applicants"));
}

#[tokio::test]
async fn harvest_stops_at_target() {
    let server = MockServer::start().await;
    mount_search(&server, "0", search_page(1..=10)).await;
    mount_search(&server, "10", search_page(11..=20)).await;
    Mock::given(method("GET"))
        .and(path("/search"))
        .respond_with(ResponseTemplate::new(200).set_body_string(search_page(21..=30)))
        .with_priority(10)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path_regex(r"^/detail/\d+$"))
        .respond_with(ResponseTemplate::new(200).set_body_string(detail_page(0)))
        .mount(&server)
        .await;

    let executor = direct_executor(1);
    let pages =
        GuestPageFetcher::with_base_url(executor.clone(), &format!("{}/search", server.uri()))
            .unwrap();
    let details = GuestDetailFetcher::with_base_url(executor, format!("{}/detail", server.uri()));
    let config = HarvestConfig::default()
        .with_target_count(12)
        .with_concurrency(1);

    let outcome = HarvestOrchestrator::new(pages, details, config)
        .unwrap()
        .run(
            SearchCriteria::new("rust", "Berlin"),
            CancellationToken::new(),
            &TracingHarvestReporter,
        )
        .await;

    assert_eq!(outcome.records.len(), 12);
    assert_eq!(outcome.summary.stop_reason, Some(StopReason::TargetReached));
    assert!(outcome.is_complete());
}
