use std::sync::Arc;

use harvest_client::{GuestDetailFetcher, GuestPageFetcher, ReqwestTransport};
use harvest_core::delay::DelayPolicy;
use harvest_core::error::HarvestError;
use harvest_core::executor::{ExecutorConfig, RequestExecutor};
use harvest_core::models::{JobSummary, PageRequest, SearchCriteria};
use harvest_core::proxy::{ExhaustionPolicy, ProxyOutcome, ProxyPool, ProxyPoolConfig};
use harvest_core::traits::{DetailFetcher, PageFetcher};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::integration::common::{detail_page, direct_executor, search_page};

fn request(offset: usize) -> PageRequest {
    PageRequest {
        criteria: Arc::new(SearchCriteria::new("rust", "Berlin")),
        offset,
        page_size: 10,
    }
}

#[tokio::test]
async fn page_fetcher_sends_query_and_parses_cards() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/search"))
        .and(query_param("keywords", "rust"))
        .and(query_param("location", "Berlin"))
        .and(query_param("start", "10"))
        .respond_with(ResponseTemplate::new(200).set_body_string(search_page([7, 8, 9])))
        .expect(1)
        .mount(&server)
        .await;

    let fetcher =
        GuestPageFetcher::with_base_url(direct_executor(1), &format!("{}/search", server.uri()))
            .unwrap();
    let jobs = fetcher.fetch(&request(10)).await.unwrap();

    let ids: Vec<&str> = jobs.iter().map(|j| j.job_id.as_str()).collect();
    assert_eq!(ids, vec!["7", "8", "9"]);
    assert_eq!(jobs[0].company, "Acme");
    assert_eq!(
        jobs[0].apply_url.as_deref(),
        Some("https://www.linkedin.com/jobs/view/7")
    );
}

#[tokio::test]
async fn rate_limit_status_is_retried_then_reported_blocked() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/search"))
        .respond_with(ResponseTemplate::new(999))
        .expect(2)
        .mount(&server)
        .await;

    let executor = direct_executor(2);
    let fetcher =
        GuestPageFetcher::with_base_url(executor.clone(), &format!("{}/search", server.uri()))
            .unwrap();
    let err = fetcher.fetch(&request(0)).await.unwrap_err();

    assert!(matches!(err, HarvestError::FetchBlocked { status: 999 }));
    assert_eq!(executor.stats().attempts(), 2);
    assert_eq!(executor.stats().failures(), 1);
}

#[tokio::test]
async fn authwall_body_counts_as_blocked() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/search"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(r#"<a href="https://www.linkedin.com/authwall?trk=x">Sign in</a>"#),
        )
        .mount(&server)
        .await;

    let fetcher =
        GuestPageFetcher::with_base_url(direct_executor(1), &format!("{}/search", server.uri()))
            .unwrap();
    let err = fetcher.fetch(&request(0)).await.unwrap_err();
    assert!(matches!(err, HarvestError::FetchBlocked { status: 200 }));
}

#[tokio::test]
async fn not_found_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/detail/42"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let fetcher =
        GuestDetailFetcher::with_base_url(direct_executor(3), format!("{}/detail", server.uri()));
    let err = fetcher
        .fetch(&JobSummary::new("42", "Engineer", "Acme"))
        .await
        .unwrap_err();

    match err {
        HarvestError::DetailFetchFailed { job_id, reason } => {
            assert_eq!(job_id, "42");
            assert!(reason.contains("404"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn unsupported_page_size_is_rejected_before_any_request() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string(search_page([1])))
        .expect(0)
        .mount(&server)
        .await;

    let fetcher =
        GuestPageFetcher::with_base_url(direct_executor(1), &format!("{}/search", server.uri()))
            .unwrap();
    let mut oversized = request(0);
    oversized.page_size = 25;
    let err = fetcher.fetch(&oversized).await.unwrap_err();

    assert!(matches!(err, HarvestError::ConfigurationInvalid(ref msg) if msg.contains("25")));
    assert!(err.is_fatal());
}

#[tokio::test]
async fn exhausted_pool_is_not_wrapped_as_detail_failure() {
    let (pool, _) = ProxyPool::from_urls(
        ["socks5://127.0.0.1:1080"],
        ProxyPoolConfig::default()
            .with_failure_threshold(1)
            .with_exhaustion_policy(ExhaustionPolicy::Abort),
    );
    let dead = pool.select().unwrap();
    pool.report(&dead, ProxyOutcome::Timeout);
    let executor = RequestExecutor::new(
        ReqwestTransport::new(),
        Arc::new(pool),
        ExecutorConfig::default().with_delay(DelayPolicy::none()),
    )
    .unwrap();

    let fetcher = GuestDetailFetcher::with_base_url(Arc::new(executor), "http://127.0.0.1:9/detail");
    let err = fetcher
        .fetch(&JobSummary::new("42", "Engineer", "Acme"))
        .await
        .unwrap_err();

    assert!(matches!(err, HarvestError::ProxyExhausted), "got {err}");
    assert!(err.is_fatal());
}

#[tokio::test]
async fn detail_fetcher_enriches_summary() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/detail/42"))
        .respond_with(ResponseTemplate::new(200).set_body_string(detail_page(42)))
        .mount(&server)
        .await;

    let fetcher =
        GuestDetailFetcher::with_base_url(direct_executor(1), format!("{}/detail/", server.uri()));
    let record = fetcher
        .fetch(&JobSummary::new("42", "Engineer 42", "Acme"))
        .await
        .unwrap();

    assert_eq!(record.applicants.as_deref(), Some("42 applicants"));
    assert_eq!(record.description.as_deref(), Some("Role 42\nRemote friendly"));
    assert_eq!(record.summary.location.as_deref(), Some("Berlin, Berlin, Germany"));
    assert!(record.is_easy_apply);
    assert!(!record.degraded);
}
