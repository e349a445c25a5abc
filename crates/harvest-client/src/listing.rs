use std::sync::Arc;

use harvest_core::error::HarvestError;
use harvest_core::executor::RequestExecutor;
use harvest_core::models::{JobSummary, PageRequest};
use harvest_core::orchestrator::DEFAULT_PAGE_SIZE;
use harvest_core::traits::{PageFetcher, Transport};
use scraper::{ElementRef, Html, Selector};
use url::Url;

use crate::html::{attr_of, selector, text_of};

/// Search results endpoint of the guest jobs API.
pub const SEARCH_URL: &str =
    "https://www.linkedin.com/jobs-guest/jobs/api/seeMoreJobPostings/search";

/// Fetches search result pages through a [`RequestExecutor`].
pub struct GuestPageFetcher<T: Transport> {
    executor: Arc<RequestExecutor<T>>,
    base_url: Url,
}

impl<T: Transport> Clone for GuestPageFetcher<T> {
    fn clone(&self) -> Self {
        Self {
            executor: Arc::clone(&self.executor),
            base_url: self.base_url.clone(),
        }
    }
}

impl<T: Transport> GuestPageFetcher<T> {
    pub fn new(executor: Arc<RequestExecutor<T>>) -> Result<Self, HarvestError> {
        Self::with_base_url(executor, SEARCH_URL)
    }

    pub fn with_base_url(executor: Arc<RequestExecutor<T>>, base_url: &str) -> Result<Self, HarvestError> {
        let base_url = Url::parse(base_url).map_err(|e| {
            HarvestError::ConfigurationInvalid(format!("invalid search URL '{base_url}': {e}"))
        })?;
        Ok(Self { executor, base_url })
    }

    pub fn search_url(&self, request: &PageRequest) -> Url {
        build_search_url(&self.base_url, request)
    }
}

impl<T: Transport> PageFetcher for GuestPageFetcher<T> {
    /// Fails with [`HarvestError::ConfigurationInvalid`] for any page size
    /// other than [`DEFAULT_PAGE_SIZE`]: the API pages by a fixed size, so
    /// other offsets would skip or repeat results.
    async fn fetch(&self, request: &PageRequest) -> Result<Vec<JobSummary>, HarvestError> {
        if request.page_size != DEFAULT_PAGE_SIZE {
            return Err(HarvestError::ConfigurationInvalid(format!(
                "guest search pages hold {DEFAULT_PAGE_SIZE} jobs, got page_size {}",
                request.page_size
            )));
        }
        let url = self.search_url(request);
        let body = self.executor.execute(url.as_str()).await?;
        let jobs = parse_job_cards(&body)?;
        tracing::debug!(offset = request.offset, jobs = jobs.len(), "Parsed search page");
        Ok(jobs)
    }
}

/// Search URL for one page: the criteria's query parameters at the
/// request's offset.
pub fn build_search_url(base: &Url, request: &PageRequest) -> Url {
    let mut url = base.clone();
    {
        let mut pairs = url.query_pairs_mut();
        pairs.clear();
        for (key, value) in request.criteria.query_params(request.offset) {
            pairs.append_pair(key, &value);
        }
    }
    url
}

struct CardSelectors {
    card: Selector,
    title: Selector,
    company: Selector,
    location: Selector,
    listed: Selector,
    link: Selector,
}

impl CardSelectors {
    fn new() -> Result<Self, HarvestError> {
        Ok(Self {
            card: selector("div.base-search-card")?,
            title: selector("h3.base-search-card__title")?,
            company: selector("h4.base-search-card__subtitle")?,
            location: selector("span.job-search-card__location")?,
            listed: selector("time")?,
            link: selector("a.base-card__full-link")?,
        })
    }
}

/// Extract job summaries from a search results fragment.
///
/// Cards without an entity URN, a title or a company are skipped. A page
/// without cards yields an empty list (end of results).
pub fn parse_job_cards(html: &str) -> Result<Vec<JobSummary>, HarvestError> {
    let selectors = CardSelectors::new()?;
    let document = Html::parse_fragment(html);

    Ok(document
        .select(&selectors.card)
        .filter_map(|card| parse_card(card, &selectors))
        .collect())
}

fn parse_card(card: ElementRef<'_>, selectors: &CardSelectors) -> Option<JobSummary> {
    let job_id = card
        .value()
        .attr("data-entity-urn")
        .and_then(|urn| urn.rsplit(':').next())
        .map(str::trim)
        .filter(|id| !id.is_empty())?;
    let title = text_of(card, &selectors.title)?;
    let company = text_of(card, &selectors.company)?;

    let mut summary = JobSummary::new(job_id, title, company);
    summary.location = text_of(card, &selectors.location);
    summary.posted_date = attr_of(card, &selectors.listed, "datetime");
    summary.apply_url = attr_of(card, &selectors.link, "href")
        .map(|href| href.split('?').next().unwrap_or_default().to_string());
    Some(summary)
}

#[cfg(test)]
mod tests {
    use harvest_core::models::SearchCriteria;
    use harvest_core::models::{ExperienceLevel, JobType};

    use super::*;

    const PAGE: &str = r#"
<li>
  <div class="base-card base-search-card job-search-card" data-entity-urn="urn:li:jobPosting:3912345678">
    <a class="base-card__full-link" href="https://www.linkedin.com/jobs/view/rust-engineer-3912345678?refId=abc&amp;trackingId=xyz">
      <span class="sr-only">Rust Engineer</span>
    </a>
    <div class="base-search-card__info">
      <h3 class="base-search-card__title">
            Rust Engineer
      </h3>
      <h4 class="base-search-card__subtitle">
        <a href="https://www.linkedin.com/company/acme">Acme Corp</a>
      </h4>
      <div class="base-search-card__metadata">
        <span class="job-search-card__location">Berlin, Germany</span>
        <time class="job-search-card__listdate" datetime="2026-10-01">2 weeks ago</time>
      </div>
    </div>
  </div>
</li>
<li>
  <div class="base-search-card" data-entity-urn="urn:li:jobPosting:3900000001">
    <h3 class="base-search-card__title">Backend Developer</h3>
    <h4 class="base-search-card__subtitle">Initech</h4>
  </div>
</li>
<li>
  <div class="base-search-card">
    <h3 class="base-search-card__title">No URN</h3>
    <h4 class="base-search-card__subtitle">Skipped Inc</h4>
  </div>
</li>
"#;

    #[test]
    fn test_parse_cards() {
        let jobs = parse_job_cards(PAGE).unwrap();
        assert_eq!(jobs.len(), 2);

        let first = &jobs[0];
        assert_eq!(first.job_id, "3912345678");
        assert_eq!(first.title, "Rust Engineer");
        assert_eq!(first.company, "Acme Corp");
        assert_eq!(first.location.as_deref(), Some("Berlin, Germany"));
        assert_eq!(first.posted_date.as_deref(), Some("2026-10-01"));
        assert_eq!(
            first.apply_url.as_deref(),
            Some("https://www.linkedin.com/jobs/view/rust-engineer-3912345678")
        );

        let second = &jobs[1];
        assert_eq!(second.job_id, "3900000001");
        assert!(second.location.is_none());
        assert!(second.apply_url.is_none());
    }

    #[test]
    fn test_empty_page() {
        assert!(parse_job_cards("").unwrap().is_empty());
        assert!(
            parse_job_cards("<html><body>nothing here</body></html>")
                .unwrap()
                .is_empty()
        );
    }

    #[test]
    fn test_build_search_url() {
        let criteria = SearchCriteria::new("rust developer", "Berlin, Germany")
            .with_experience_levels([ExperienceLevel::EntryLevel, ExperienceLevel::Associate])
            .with_job_types([JobType::FullTime]);
        let request = PageRequest {
            criteria: Arc::new(criteria),
            offset: 30,
            page_size: 10,
        };
        let url = build_search_url(&Url::parse(SEARCH_URL).unwrap(), &request);

        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert_eq!(url.path(), "/jobs-guest/jobs/api/seeMoreJobPostings/search");
        assert!(pairs.contains(&("keywords".into(), "rust developer".into())));
        assert!(pairs.contains(&("location".into(), "Berlin, Germany".into())));
        assert!(pairs.contains(&("start".into(), "30".into())));
        assert!(pairs.contains(&("f_E".into(), "2,3".into())));
        assert!(pairs.contains(&("f_JT".into(), "F".into())));
    }
}
