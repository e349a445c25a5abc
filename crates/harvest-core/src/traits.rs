use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::HarvestError;
use crate::models::{JobRecord, JobSummary, PageRequest};

/// Raw HTTP response as seen by the executor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    pub status: u16,
    pub body: String,
}

impl RawResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn ok(body: impl Into<String>) -> Self {
        Self::new(200, body)
    }
}

/// Performs a single GET, optionally through a proxy.
///
/// Network-level failures are errors ([`HarvestError::FetchTimeout`],
/// [`HarvestError::FetchConnection`]); any HTTP status is a response.
pub trait Transport: Send + Sync + Clone + 'static {
    fn get(
        &self,
        url: &str,
        proxy: Option<&str>,
        timeout: Duration,
    ) -> impl Future<Output = Result<RawResponse, HarvestError>> + Send;
}

/// Fetches one page of search results.
///
/// An empty page is the end-of-results signal, not an error.
pub trait PageFetcher: Send + Sync + Clone + 'static {
    fn fetch(
        &self,
        request: &PageRequest,
    ) -> impl Future<Output = Result<Vec<JobSummary>, HarvestError>> + Send;
}

/// Enriches a job summary with its detail document.
pub trait DetailFetcher: Send + Sync + Clone + 'static {
    fn fetch(
        &self,
        summary: &JobSummary,
    ) -> impl Future<Output = Result<JobRecord, HarvestError>> + Send;
}

/// Where a published artifact ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedArtifact {
    pub path: PathBuf,
    /// Stable-named pointer to `path`.
    pub latest: PathBuf,
    pub records: usize,
}

/// Receives the final record sequence for serialization.
pub trait ResultSink: Send + Sync {
    /// Write a uniquely named artifact, then repoint "latest" at it.
    fn publish(&self, records: &[JobRecord], label: &str) -> Result<PublishedArtifact, HarvestError>;
}
