//! Test utilities: scripted mock implementations of the fetch traits.
//!
//! All mocks use `Arc<Mutex<_>>` for interior mutability so that clones
//! handed to workers share the script and the recorded calls.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::HarvestError;
use crate::models::{JobRecord, JobSummary, PageRequest};
use crate::traits::{DetailFetcher, PageFetcher, RawResponse, Transport};

// ---------------------------------------------------------------------------
// MockTransport
// ---------------------------------------------------------------------------

type Script = HashMap<Option<String>, Vec<Result<RawResponse, HarvestError>>>;

/// Transport with a response queue per proxy (`None` = direct).
#[derive(Clone, Default)]
pub struct MockTransport {
    script: Arc<Mutex<Script>>,
    calls: Arc<Mutex<Vec<(String, Option<String>)>>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a response for requests made through `proxy`.
    pub fn respond(self, proxy: Option<&str>, response: Result<RawResponse, HarvestError>) -> Self {
        self.script
            .lock()
            .unwrap()
            .entry(proxy.map(str::to_string))
            .or_default()
            .push(response);
        self
    }

    /// Every `(url, proxy)` pair requested so far.
    pub fn calls(&self) -> Vec<(String, Option<String>)> {
        self.calls.lock().unwrap().clone()
    }
}

impl Transport for MockTransport {
    async fn get(
        &self,
        url: &str,
        proxy: Option<&str>,
        _timeout: Duration,
    ) -> Result<RawResponse, HarvestError> {
        self.calls
            .lock()
            .unwrap()
            .push((url.to_string(), proxy.map(str::to_string)));
        let mut script = self.script.lock().unwrap();
        match script.get_mut(&proxy.map(str::to_string)) {
            Some(queue) if !queue.is_empty() => queue.remove(0),
            _ => Err(HarvestError::FetchConnection("no scripted response".into())),
        }
    }
}

// ---------------------------------------------------------------------------
// MockPageFetcher
// ---------------------------------------------------------------------------

/// Summaries with IDs `ids`, titled after the ID.
pub fn summaries(ids: impl IntoIterator<Item = usize>) -> Vec<JobSummary> {
    ids.into_iter()
        .map(|id| JobSummary::new(id.to_string(), format!("Job {id}"), "Acme"))
        .collect()
}

/// Page fetcher scripted by offset. Unscripted offsets return an empty page
/// unless a fallback error is set.
#[derive(Clone, Default)]
pub struct MockPageFetcher {
    pages: Arc<Mutex<HashMap<usize, Vec<Result<Vec<JobSummary>, HarvestError>>>>>,
    fallback_error: Option<fn() -> HarvestError>,
    delay: Duration,
    offsets: Arc<Mutex<Vec<usize>>>,
}

impl MockPageFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn page(self, offset: usize, jobs: Vec<JobSummary>) -> Self {
        self.push(offset, Ok(jobs))
    }

    pub fn fail(self, offset: usize, error: HarvestError) -> Self {
        self.push(offset, Err(error))
    }

    fn push(self, offset: usize, result: Result<Vec<JobSummary>, HarvestError>) -> Self {
        self.pages.lock().unwrap().entry(offset).or_default().push(result);
        self
    }

    /// Error returned for every offset without a script.
    pub fn failing_with(mut self, error: fn() -> HarvestError) -> Self {
        self.fallback_error = Some(error);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Offsets requested so far, in call order.
    pub fn offsets(&self) -> Vec<usize> {
        self.offsets.lock().unwrap().clone()
    }
}

impl PageFetcher for MockPageFetcher {
    async fn fetch(&self, request: &PageRequest) -> Result<Vec<JobSummary>, HarvestError> {
        self.offsets.lock().unwrap().push(request.offset);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let scripted = {
            let mut pages = self.pages.lock().unwrap();
            pages
                .get_mut(&request.offset)
                .filter(|queue| !queue.is_empty())
                .map(|queue| queue.remove(0))
        };
        match (scripted, self.fallback_error) {
            (Some(result), _) => result,
            (None, Some(error)) => Err(error()),
            (None, None) => Ok(Vec::new()),
        }
    }
}

// ---------------------------------------------------------------------------
// MockDetailFetcher
// ---------------------------------------------------------------------------

/// Detail fetcher that enriches every summary except the configured IDs.
#[derive(Clone, Default)]
pub struct MockDetailFetcher {
    failing: Arc<HashSet<String>>,
    delay: Duration,
    fetched: Arc<Mutex<Vec<String>>>,
}

impl MockDetailFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_for<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.failing = Arc::new(ids.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// IDs passed to `fetch`, in call order.
    pub fn fetched(&self) -> Vec<String> {
        self.fetched.lock().unwrap().clone()
    }
}

impl DetailFetcher for MockDetailFetcher {
    async fn fetch(&self, summary: &JobSummary) -> Result<JobRecord, HarvestError> {
        self.fetched.lock().unwrap().push(summary.job_id.clone());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.failing.contains(&summary.job_id) {
            return Err(HarvestError::DetailFetchFailed {
                job_id: summary.job_id.clone(),
                reason: "scripted failure".into(),
            });
        }
        Ok(JobRecord {
            summary: summary.clone(),
            applicants: Some("Over 200 applicants".into()),
            salary_range: None,
            description: Some(format!("Details for {}", summary.title)),
            is_easy_apply: true,
            recruiter: None,
            degraded: false,
        })
    }
}
