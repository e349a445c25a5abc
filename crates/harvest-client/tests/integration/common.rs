use std::sync::Arc;
use std::time::Duration;

use harvest_client::ReqwestTransport;
use harvest_core::delay::DelayPolicy;
use harvest_core::executor::{ExecutorConfig, RequestExecutor};
use harvest_core::proxy::ProxyPool;

/// Executor without proxies or pacing, for talking to a local mock server.
pub fn direct_executor(max_attempts: u32) -> Arc<RequestExecutor<ReqwestTransport>> {
    let config = ExecutorConfig::default()
        .with_max_attempts(max_attempts)
        .with_timeout(Duration::from_secs(5))
        .with_delay(DelayPolicy::none());
    let executor = RequestExecutor::new(
        ReqwestTransport::new(),
        Arc::new(ProxyPool::direct()),
        config,
    )
    .expect("valid executor config");
    Arc::new(executor)
}

/// A search results fragment with one card per ID.
pub fn search_page(ids: impl IntoIterator<Item = u64>) -> String {
    ids.into_iter()
        .map(|id| {
            format!(
                r#"<li>
  <div class="base-card base-search-card" data-entity-urn="urn:li:jobPosting:{id}">
    <a class="base-card__full-link" href="https://www.linkedin.com/jobs/view/{id}?trk=guest">Job {id}</a>
    <h3 class="base-search-card__title">Engineer {id}</h3>
    <h4 class="base-search-card__subtitle"><a href="https://www.linkedin.com/company/acme">Acme</a></h4>
    <span class="job-search-card__location">Berlin, Germany</span>
    <time class="job-search-card__listdate" datetime="2026-10-01">2 weeks ago</time>
  </div>
</li>
"#
            )
        })
        .collect()
}

pub fn detail_page(id: u64) -> String {
    format!(
        r#"<html><body>
<section class="top-card-layout">
  <a class="topcard__link" href="https://www.linkedin.com/jobs/view/{id}">Engineer {id}</a>
  <span class="topcard__flavor topcard__flavor--bullet">Berlin, Berlin, Germany</span>
  <figcaption class="num-applicants__caption">{id} applicants</figcaption>
</section>
<div class="show-more-less-html__markup"><p>Role {id}</p><p>Remote friendly</p></div>
</body></html>"#
    )
}
