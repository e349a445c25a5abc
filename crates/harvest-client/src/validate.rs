use std::time::Duration;

use futures::StreamExt;
use harvest_core::error::HarvestError;
use harvest_core::proxy::{HealthState, ProxyPool, redact_proxy_url};
use reqwest::Client;

/// Endpoint used to check that a proxy forwards HTTPS traffic.
pub const PROBE_URL: &str = "https://api.ipify.org";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationReport {
    pub healthy: usize,
    pub failed: usize,
}

/// Probes every pool entry once before a run.
#[derive(Debug, Clone)]
pub struct ProxyValidator {
    probe_url: String,
    timeout: Duration,
    concurrency: usize,
}

impl Default for ProxyValidator {
    fn default() -> Self {
        Self {
            probe_url: PROBE_URL.to_string(),
            timeout: Duration::from_secs(5),
            concurrency: 50,
        }
    }
}

impl ProxyValidator {
    pub fn with_probe_url(mut self, url: impl Into<String>) -> Self {
        self.probe_url = url.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Mark every entry Healthy or Failed depending on whether the probe
    /// succeeds through it.
    pub async fn validate(&self, pool: &ProxyPool) -> ValidationReport {
        let urls: Vec<String> = pool.snapshot().into_iter().map(|entry| entry.url).collect();
        tracing::info!(count = urls.len(), "Validating proxies");

        let results: Vec<(String, bool)> = futures::stream::iter(urls)
            .map(|url| async move {
                let ok = match self.probe(&url).await {
                    Ok(()) => true,
                    Err(e) => {
                        tracing::debug!(proxy = %redact_proxy_url(&url), error = %e, "Proxy invalid");
                        false
                    }
                };
                (url, ok)
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let mut report = ValidationReport::default();
        for (url, ok) in results {
            if ok {
                pool.mark(&url, HealthState::Healthy);
                report.healthy += 1;
            } else {
                pool.mark(&url, HealthState::Failed);
                report.failed += 1;
            }
        }

        tracing::info!(
            healthy = report.healthy,
            failed = report.failed,
            "Proxy validation complete"
        );
        report
    }

    async fn probe(&self, proxy_url: &str) -> Result<(), HarvestError> {
        let proxy = reqwest::Proxy::all(proxy_url)
            .map_err(|e| HarvestError::MalformedProxyEntry(e.to_string()))?;
        let client = Client::builder()
            .proxy(proxy)
            .timeout(self.timeout)
            .build()
            .map_err(|e| HarvestError::FetchConnection(e.to_string()))?;

        let response = client.get(&self.probe_url).send().await.map_err(|e| {
            if e.is_timeout() {
                HarvestError::FetchTimeout(self.timeout.as_secs())
            } else {
                HarvestError::FetchConnection(e.without_url().to_string())
            }
        })?;
        if !response.status().is_success() {
            return Err(HarvestError::HttpStatus(response.status().as_u16()));
        }
        Ok(())
    }
}
