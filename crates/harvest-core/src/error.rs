use thiserror::Error;

use crate::proxy::ProxyOutcome;

/// Error types for the harvesting engine.
#[derive(Error, Debug)]
pub enum HarvestError {
    /// No usable proxy left and direct fallback is disabled.
    #[error("Proxy pool exhausted: no healthy proxy and direct fallback disabled")]
    ProxyExhausted,

    /// The remote answered with a rate-limit status or a block page.
    #[error("Request blocked by remote (HTTP {status})")]
    FetchBlocked { status: u16 },

    /// Request timed out.
    #[error("Request timed out after {0} seconds")]
    FetchTimeout(u64),

    /// Network/connection error (including proxy handshake failures).
    #[error("Connection error: {0}")]
    FetchConnection(String),

    /// Unexpected non-success HTTP status that is not a block.
    #[error("Unexpected HTTP status {0}")]
    HttpStatus(u16),

    /// Detail document for a single job could not be fetched or parsed.
    #[error("Detail fetch failed for job {job_id}: {reason}")]
    DetailFetchFailed { job_id: String, reason: String },

    /// A proxy line or URL could not be normalized.
    #[error("Malformed proxy entry: {0}")]
    MalformedProxyEntry(String),

    /// Settings rejected before any network activity.
    #[error("Invalid configuration: {0}")]
    ConfigurationInvalid(String),

    /// Response body did not have the expected shape.
    #[error("Parse error: {0}")]
    Parse(String),

    /// A remote proxy provider failed.
    #[error("Proxy source error: {0}")]
    ProxySource(String),

    /// Writing or publishing results failed.
    #[error("Sink error: {0}")]
    Sink(String),

    /// JSON serialization/deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Filesystem error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl HarvestError {
    /// Returns true if this error is transient and worth another attempt
    /// through a different proxy.
    pub fn is_retryable(&self) -> bool {
        match self {
            HarvestError::FetchBlocked { .. }
            | HarvestError::FetchTimeout(_)
            | HarvestError::FetchConnection(_) => true,
            HarvestError::HttpStatus(status) => *status >= 500,
            _ => false,
        }
    }

    /// The outcome to report against the proxy that produced this error.
    ///
    /// `None` means the proxy delivered a response and is not to blame.
    pub fn proxy_outcome(&self) -> Option<ProxyOutcome> {
        match self {
            HarvestError::FetchBlocked { .. } => Some(ProxyOutcome::BlockedResponse),
            HarvestError::FetchTimeout(_) => Some(ProxyOutcome::Timeout),
            HarvestError::FetchConnection(_) => Some(ProxyOutcome::ConnectionError),
            _ => None,
        }
    }

    /// Returns true if this error must abort the whole run.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            HarvestError::ProxyExhausted | HarvestError::ConfigurationInvalid(_)
        )
    }
}
