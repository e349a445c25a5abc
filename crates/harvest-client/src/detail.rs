use std::sync::Arc;

use harvest_core::error::HarvestError;
use harvest_core::executor::RequestExecutor;
use harvest_core::models::{JobRecord, JobSummary, Recruiter};
use harvest_core::traits::{DetailFetcher, Transport};
use scraper::node::Node;
use scraper::{ElementRef, Html, Selector};
use url::Url;

use crate::html::{attr_of, normalized_text, selector, text_of};

/// Detail endpoint of the guest jobs API; the job ID is appended.
pub const DETAIL_URL: &str = "https://www.linkedin.com/jobs-guest/jobs/api/jobPosting";

/// Fetches and parses job detail documents through a [`RequestExecutor`].
pub struct GuestDetailFetcher<T: Transport> {
    executor: Arc<RequestExecutor<T>>,
    base_url: String,
}

impl<T: Transport> Clone for GuestDetailFetcher<T> {
    fn clone(&self) -> Self {
        Self {
            executor: Arc::clone(&self.executor),
            base_url: self.base_url.clone(),
        }
    }
}

impl<T: Transport> GuestDetailFetcher<T> {
    pub fn new(executor: Arc<RequestExecutor<T>>) -> Self {
        Self::with_base_url(executor, DETAIL_URL)
    }

    pub fn with_base_url(executor: Arc<RequestExecutor<T>>, base_url: impl Into<String>) -> Self {
        Self {
            executor,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn detail_url(&self, job_id: &str) -> String {
        format!("{}/{}", self.base_url, job_id)
    }
}

impl<T: Transport> DetailFetcher for GuestDetailFetcher<T> {
    async fn fetch(&self, summary: &JobSummary) -> Result<JobRecord, HarvestError> {
        // Fatal errors concern the whole run, not this job.
        let failed = |e: HarvestError| {
            if e.is_fatal() {
                return e;
            }
            HarvestError::DetailFetchFailed {
                job_id: summary.job_id.clone(),
                reason: e.to_string(),
            }
        };

        let body = self
            .executor
            .execute(&self.detail_url(&summary.job_id))
            .await
            .map_err(failed)?;
        let record = parse_job_detail(summary, &body).map_err(failed)?;

        tracing::info!(
            job_id = %record.job_id(),
            company = %record.summary.company,
            title = %record.summary.title,
            "Parsed job detail"
        );
        Ok(record)
    }
}

struct DetailSelectors {
    top_card: Selector,
    location: Selector,
    posted: Selector,
    applicants: Selector,
    description: Selector,
    apply_code: Selector,
    topcard_link: Selector,
    salary: Selector,
    recruiter: Selector,
    recruiter_name: Selector,
    recruiter_title: Selector,
    recruiter_link: Selector,
}

impl DetailSelectors {
    fn new() -> Result<Self, HarvestError> {
        Ok(Self {
            top_card: selector("section.top-card-layout")?,
            location: selector("span.topcard__flavor--bullet")?,
            posted: selector("span.posted-time-ago__text")?,
            applicants: selector(
                "figcaption.num-applicants__caption, span.num-applicants__caption",
            )?,
            description: selector("div.show-more-less-html__markup")?,
            apply_code: selector("code#applyUrl")?,
            topcard_link: selector("a.topcard__link")?,
            salary: selector("div.salary.compensation__salary")?,
            recruiter: selector("div.message-the-recruiter")?,
            recruiter_name: selector("h3.base-main-card__title")?,
            recruiter_title: selector("h4.base-main-card__subtitle")?,
            recruiter_link: selector("a.base-card__full-link")?,
        })
    }
}

/// Enrich `summary` with the fields of a job detail document.
///
/// Fields missing from the document stay `None`. Fails only if the document
/// has neither a top card nor a description.
pub fn parse_job_detail(summary: &JobSummary, html: &str) -> Result<JobRecord, HarvestError> {
    let s = DetailSelectors::new()?;
    let document = Html::parse_document(html);
    let root = document.root_element();

    let top_card = root.select(&s.top_card).next();
    let description_el = root.select(&s.description).next();
    if top_card.is_none() && description_el.is_none() {
        return Err(HarvestError::Parse(
            "document has no job top card or description".into(),
        ));
    }

    let mut summary = summary.clone();
    if let Some(card) = top_card {
        if let Some(location) = text_of(card, &s.location) {
            summary.location = Some(location);
        }
        if summary.posted_date.is_none() {
            summary.posted_date = text_of(card, &s.posted);
        }
    }
    let applicants = top_card.and_then(|card| text_of(card, &s.applicants));
    let description = description_el.and_then(multiline_text);

    let external_apply = root
        .select(&s.apply_code)
        .next()
        .and_then(comment_text)
        .map(|raw| unwrap_redirect(&raw));
    let is_easy_apply = external_apply.is_none();
    let apply_url = external_apply
        .or_else(|| top_card.and_then(|card| attr_of(card, &s.topcard_link, "href")));
    if apply_url.is_some() {
        summary.apply_url = apply_url;
    }

    let salary_range = text_of(root, &s.salary);
    let recruiter = root.select(&s.recruiter).next().map(|section| Recruiter {
        name: text_of(section, &s.recruiter_name),
        title: text_of(section, &s.recruiter_title),
        profile_url: attr_of(section, &s.recruiter_link, "href"),
    });

    Ok(JobRecord {
        summary,
        applicants,
        salary_range,
        description,
        is_easy_apply,
        recruiter,
        degraded: false,
    })
}

/// Text of the element with one line per text node.
fn multiline_text(element: ElementRef<'_>) -> Option<String> {
    let lines: Vec<&str> = element
        .text()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect();
    if lines.is_empty() {
        return normalized_text(element);
    }
    Some(lines.join("\n"))
}

/// The apply URL is shipped inside an HTML comment, quoted.
fn comment_text(element: ElementRef<'_>) -> Option<String> {
    element
        .children()
        .find_map(|node| match node.value() {
            Node::Comment(comment) => Some(comment.trim().trim_matches('"').to_string()),
            Node::Text(text) => Some(text.trim().trim_matches('"').to_string()),
            _ => None,
        })
        .filter(|raw| !raw.is_empty())
}

/// Unwrap an external-apply redirect to its `url` parameter if present.
fn unwrap_redirect(raw: &str) -> String {
    Url::parse(raw)
        .ok()
        .and_then(|url| {
            url.query_pairs()
                .find(|(key, _)| key == "url")
                .map(|(_, value)| value.into_owned())
        })
        .unwrap_or_else(|| raw.to_string())
}
