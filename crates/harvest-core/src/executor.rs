use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rand::SeedableRng;
use rand::rngs::StdRng;

use crate::delay::DelayPolicy;
use crate::error::HarvestError;
use crate::proxy::{ProxyOutcome, ProxyPool};
use crate::traits::{RawResponse, Transport};

/// Body fragments of known block/challenge pages.
pub const DEFAULT_BLOCK_SIGNATURES: &[&str] = &["authwall", "checkpoint/challenge"];

/// Statuses treated as rate limiting. 999 is the guest API's "go away".
pub const DEFAULT_BLOCK_STATUSES: &[u16] = &[429, 999];

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Total attempts per request, first try included.
    pub max_attempts: u32,
    /// Per-call timeout.
    pub timeout: Duration,
    pub delay: DelayPolicy,
    pub block_signatures: Vec<String>,
    pub block_statuses: Vec<u16>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            timeout: Duration::from_secs(10),
            delay: DelayPolicy::default(),
            block_signatures: DEFAULT_BLOCK_SIGNATURES.iter().map(|s| s.to_string()).collect(),
            block_statuses: DEFAULT_BLOCK_STATUSES.to_vec(),
        }
    }
}

impl ExecutorConfig {
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_delay(mut self, delay: DelayPolicy) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_block_signatures<I, S>(mut self, signatures: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.block_signatures = signatures.into_iter().map(Into::into).collect();
        self
    }

    pub fn validate(&self) -> Result<(), HarvestError> {
        if self.max_attempts == 0 {
            return Err(HarvestError::ConfigurationInvalid(
                "max_attempts must be at least 1".into(),
            ));
        }
        if self.timeout.is_zero() {
            return Err(HarvestError::ConfigurationInvalid(
                "request timeout must be greater than zero".into(),
            ));
        }
        self.delay.validate()
    }
}

/// Counters across all requests made by one executor.
#[derive(Debug, Default)]
pub struct ExecutorStats {
    pub attempts: AtomicU64,
    pub successes: AtomicU64,
    pub failures: AtomicU64,
    pub retries: AtomicU64,
}

impl ExecutorStats {
    pub fn successes(&self) -> u64 {
        self.successes.load(Ordering::Relaxed)
    }

    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    pub fn attempts(&self) -> u64 {
        self.attempts.load(Ordering::Relaxed)
    }

    pub fn retries(&self) -> u64 {
        self.retries.load(Ordering::Relaxed)
    }
}

/// Executes GET requests through the proxy pool with jitter, outcome
/// classification, and retry with exponential backoff.
///
/// Each attempt selects a fresh proxy, so repeated failures rotate away from
/// bad endpoints. The previous proxy's outcome is reported to the pool before
/// the next attempt.
#[derive(Clone)]
pub struct RequestExecutor<T: Transport> {
    transport: T,
    pool: Arc<ProxyPool>,
    config: ExecutorConfig,
    rng: Arc<Mutex<StdRng>>,
    stats: Arc<ExecutorStats>,
}

impl<T: Transport> RequestExecutor<T> {
    pub fn new(transport: T, pool: Arc<ProxyPool>, config: ExecutorConfig) -> Result<Self, HarvestError> {
        config.validate()?;
        Ok(Self {
            transport,
            pool,
            config,
            rng: Arc::new(Mutex::new(StdRng::from_os_rng())),
            stats: Arc::new(ExecutorStats::default()),
        })
    }

    /// Use a deterministic random source for jitter.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = Arc::new(Mutex::new(StdRng::seed_from_u64(seed)));
        self
    }

    pub fn pool(&self) -> &Arc<ProxyPool> {
        &self.pool
    }

    pub fn stats(&self) -> &ExecutorStats {
        &self.stats
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    fn next_jitter(&self) -> Duration {
        let mut rng = self.rng.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        self.config.delay.jitter(&mut *rng)
    }

    /// Classify a response: block statuses and block-page bodies are
    /// [`HarvestError::FetchBlocked`], other non-2xx are
    /// [`HarvestError::HttpStatus`].
    pub fn classify(&self, response: RawResponse) -> Result<String, HarvestError> {
        if self.config.block_statuses.contains(&response.status) {
            return Err(HarvestError::FetchBlocked {
                status: response.status,
            });
        }
        if !(200..300).contains(&response.status) {
            return Err(HarvestError::HttpStatus(response.status));
        }
        if self
            .config
            .block_signatures
            .iter()
            .any(|signature| !signature.is_empty() && response.body.contains(signature.as_str()))
        {
            return Err(HarvestError::FetchBlocked {
                status: response.status,
            });
        }
        Ok(response.body)
    }

    /// GET `url`, retrying retryable failures up to the attempt budget.
    ///
    /// Returns [`HarvestError::ProxyExhausted`] immediately if the pool has
    /// nothing left to offer; otherwise the last error once the budget is
    /// spent.
    pub async fn execute(&self, url: &str) -> Result<String, HarvestError> {
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            let selection = self.pool.select()?;

            let wait = self.next_jitter();
            if !wait.is_zero() {
                tokio::time::sleep(wait).await;
            }

            tracing::debug!(%url, via = %selection.describe(), attempt, "Sending request");
            self.stats.attempts.fetch_add(1, Ordering::Relaxed);

            let result = match self
                .transport
                .get(url, selection.proxy_url(), self.config.timeout)
                .await
            {
                Ok(response) => self.classify(response),
                Err(e) => Err(e),
            };

            let error = match result {
                Ok(body) => {
                    self.pool.report(&selection, ProxyOutcome::Success);
                    self.stats.successes.fetch_add(1, Ordering::Relaxed);
                    return Ok(body);
                }
                Err(e) => e,
            };

            // A plain HTTP error still means the proxy delivered a response.
            let outcome = error.proxy_outcome().unwrap_or(ProxyOutcome::Success);
            self.pool.report(&selection, outcome);

            if !error.is_retryable() || attempt >= max_attempts {
                self.stats.failures.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(%url, attempts = attempt, error = %error, "Request failed");
                return Err(error);
            }

            let pause = self.config.delay.backoff(attempt);
            tracing::debug!(
                %url,
                via = %selection.describe(),
                attempt,
                error = %error,
                backoff_ms = pause.as_millis() as u64,
                "Retrying request"
            );
            self.stats.retries.fetch_add(1, Ordering::Relaxed);
            if !pause.is_zero() {
                tokio::time::sleep(pause).await;
            }
            attempt += 1;
        }
    }
}
