//! Proxy pool with health tracking and round-robin rotation.
//!
//! Every candidate goes through admission: it must be a fully qualified
//! `scheme://[user:pass@]host:port` URL and its scheme must not be plain
//! `http`. Admitted entries are never removed from the pool; entries that
//! fail too often are marked [`HealthState::Failed`] and skipped by
//! [`ProxyPool::select`] until [`ProxyPool::revalidate`] is called.
//!
//! ```text
//! Untested --success--> Healthy
//!    |                     |
//!    +----N failures-------+--> Failed --revalidate--> Untested
//! ```

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::HarvestError;
use crate::proxy_source::{LoadReport, ProxyProvider, collect_candidates};

/// Health of a single proxy entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Untested,
    Healthy,
    Failed,
}

impl std::fmt::Display for HealthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthState::Untested => write!(f, "untested"),
            HealthState::Healthy => write!(f, "healthy"),
            HealthState::Failed => write!(f, "failed"),
        }
    }
}

/// Result of one request made through a proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyOutcome {
    Success,
    Timeout,
    ConnectionError,
    BlockedResponse,
}

/// What [`ProxyPool::select`] does when every entry has failed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExhaustionPolicy {
    /// Fail fast with [`HarvestError::ProxyExhausted`].
    Abort,
    /// Degrade to direct (no-proxy) connections.
    #[default]
    Direct,
}

#[derive(Debug, Clone)]
pub struct ProxyPoolConfig {
    /// Consecutive failures after which an entry leaves the rotation.
    pub failure_threshold: u32,
    pub on_exhausted: ExhaustionPolicy,
}

impl Default for ProxyPoolConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            on_exhausted: ExhaustionPolicy::Direct,
        }
    }
}

impl ProxyPoolConfig {
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    pub fn with_exhaustion_policy(mut self, policy: ExhaustionPolicy) -> Self {
        self.on_exhausted = policy;
        self
    }

    pub fn validate(&self) -> Result<(), HarvestError> {
        if self.failure_threshold == 0 {
            return Err(HarvestError::ConfigurationInvalid(
                "proxy failure_threshold must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// A normalized proxy endpoint and its usage state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProxyEntry {
    pub url: String,
    pub protocol: String,
    pub health: HealthState,
    pub consecutive_failures: u32,
    pub last_used: Option<DateTime<Utc>>,
}

impl ProxyEntry {
    fn new(url: String, protocol: String) -> Self {
        Self {
            url,
            protocol,
            health: HealthState::Untested,
            consecutive_failures: 0,
            last_used: None,
        }
    }

    /// The URL with credentials masked, safe for logs.
    pub fn redacted(&self) -> String {
        redact_proxy_url(&self.url)
    }
}

/// Proxy chosen for one request.
///
/// Holds the slot index and URL only; the entry itself stays owned by the pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    Proxy { slot: usize, url: String },
    Direct,
}

impl Selection {
    pub fn proxy_url(&self) -> Option<&str> {
        match self {
            Selection::Proxy { url, .. } => Some(url),
            Selection::Direct => None,
        }
    }

    /// Log-safe description of the selection.
    pub fn describe(&self) -> String {
        match self {
            Selection::Proxy { url, .. } => redact_proxy_url(url),
            Selection::Direct => "direct".to_string(),
        }
    }
}

/// Result of offering one candidate URL to the pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    Admitted,
    Duplicate,
    /// Plain `http://` proxies are never admitted.
    Insecure,
    Malformed(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AdmissionReport {
    pub admitted: usize,
    pub duplicates: usize,
    pub insecure: usize,
    pub malformed: usize,
    /// File lines whose scheme differed from the file's configured protocol.
    pub protocol_mismatch: usize,
}

impl AdmissionReport {
    /// Count lines a source dropped before offering them to the pool.
    pub fn absorb(&mut self, rejected: &LoadReport) {
        self.insecure += rejected.insecure;
        self.malformed += rejected.malformed;
        self.protocol_mismatch += rejected.protocol_mismatch;
    }

    pub fn record(&mut self, admission: &Admission) {
        match admission {
            Admission::Admitted => self.admitted += 1,
            Admission::Duplicate => self.duplicates += 1,
            Admission::Insecure => self.insecure += 1,
            Admission::Malformed(_) => self.malformed += 1,
        }
    }
}

#[derive(Debug, Default)]
struct PoolInner {
    entries: Vec<ProxyEntry>,
    by_url: HashMap<String, usize>,
    cursor: usize,
}

/// Internally synchronized proxy pool shared by all workers.
#[derive(Debug)]
pub struct ProxyPool {
    config: ProxyPoolConfig,
    inner: Mutex<PoolInner>,
}

impl ProxyPool {
    /// An empty pool. With no entries every selection is direct.
    pub fn new(config: ProxyPoolConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(PoolInner::default()),
        }
    }

    /// A pool that never uses a proxy.
    pub fn direct() -> Self {
        Self::new(ProxyPoolConfig::default())
    }

    pub fn from_urls<I, S>(urls: I, config: ProxyPoolConfig) -> (Self, AdmissionReport)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let pool = Self::new(config);
        let mut report = AdmissionReport::default();
        for url in urls {
            report.record(&pool.admit(url.as_ref()));
        }
        (pool, report)
    }

    /// Merge the output of all sources into one pool, deduplicated by
    /// normalized URL.
    pub async fn load<P: ProxyProvider>(
        sources: &[P],
        config: ProxyPoolConfig,
    ) -> (Self, AdmissionReport) {
        let candidates = collect_candidates(sources).await;
        let (pool, mut report) = Self::from_urls(candidates.urls, config);
        report.absorb(&candidates.rejected);
        tracing::info!(
            admitted = report.admitted,
            duplicates = report.duplicates,
            insecure = report.insecure,
            malformed = report.malformed,
            protocol_mismatch = report.protocol_mismatch,
            "Proxy pool loaded"
        );
        (pool, report)
    }

    fn lock_inner(&self) -> MutexGuard<'_, PoolInner> {
        self.inner.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("Recovered from poisoned proxy pool mutex");
            poisoned.into_inner()
        })
    }

    pub fn config(&self) -> &ProxyPoolConfig {
        &self.config
    }

    /// Offer a candidate URL to the pool.
    pub fn admit(&self, raw: &str) -> Admission {
        let normalized = match normalize_proxy_url(raw) {
            Ok(url) => url,
            Err(HarvestError::MalformedProxyEntry(reason)) => {
                tracing::debug!(%reason, "Rejected malformed proxy");
                return Admission::Malformed(reason);
            }
            Err(e) => return Admission::Malformed(e.to_string()),
        };

        let protocol = normalized
            .split_once("://")
            .map(|(scheme, _)| scheme.to_string())
            .unwrap_or_default();
        if protocol == "http" {
            tracing::debug!(proxy = %redact_proxy_url(&normalized), "Rejected insecure http proxy");
            return Admission::Insecure;
        }

        let mut inner = self.lock_inner();
        if inner.by_url.contains_key(&normalized) {
            return Admission::Duplicate;
        }
        let slot = inner.entries.len();
        inner.by_url.insert(normalized.clone(), slot);
        inner.entries.push(ProxyEntry::new(normalized, protocol));
        Admission::Admitted
    }

    /// Pick the next proxy in round-robin order, skipping failed entries.
    ///
    /// Never blocks beyond the short internal lock. When every entry has
    /// failed, either degrades to [`Selection::Direct`] or returns
    /// [`HarvestError::ProxyExhausted`] depending on the configured policy.
    pub fn select(&self) -> Result<Selection, HarvestError> {
        let mut inner = self.lock_inner();
        let len = inner.entries.len();
        if len == 0 {
            return Ok(Selection::Direct);
        }

        for step in 0..len {
            let slot = (inner.cursor + step) % len;
            if inner.entries[slot].health != HealthState::Failed {
                inner.cursor = (slot + 1) % len;
                let entry = &mut inner.entries[slot];
                entry.last_used = Some(Utc::now());
                return Ok(Selection::Proxy {
                    slot,
                    url: entry.url.clone(),
                });
            }
        }

        match self.config.on_exhausted {
            ExhaustionPolicy::Direct => {
                tracing::debug!("All proxies failed, falling back to direct connection");
                Ok(Selection::Direct)
            }
            ExhaustionPolicy::Abort => Err(HarvestError::ProxyExhausted),
        }
    }

    /// Record the outcome of a request made through `selection`.
    pub fn report(&self, selection: &Selection, outcome: ProxyOutcome) {
        let Selection::Proxy { slot, .. } = selection else {
            return;
        };
        let threshold = self.config.failure_threshold;
        let mut inner = self.lock_inner();
        let Some(entry) = inner.entries.get_mut(*slot) else {
            return;
        };

        match outcome {
            ProxyOutcome::Success => {
                entry.consecutive_failures = 0;
                entry.health = HealthState::Healthy;
            }
            failure => {
                entry.consecutive_failures += 1;
                if entry.consecutive_failures >= threshold && entry.health != HealthState::Failed {
                    entry.health = HealthState::Failed;
                    tracing::warn!(
                        proxy = %entry.redacted(),
                        failures = entry.consecutive_failures,
                        outcome = ?failure,
                        "Proxy removed from rotation"
                    );
                } else {
                    tracing::debug!(
                        proxy = %entry.redacted(),
                        failures = entry.consecutive_failures,
                        outcome = ?failure,
                        "Proxy failure recorded"
                    );
                }
            }
        }
    }

    /// Force the health of an entry (used by upfront validation).
    pub fn mark(&self, url: &str, health: HealthState) -> bool {
        let mut inner = self.lock_inner();
        let Some(&slot) = inner.by_url.get(url) else {
            return false;
        };
        let entry = &mut inner.entries[slot];
        entry.health = health;
        if health != HealthState::Failed {
            entry.consecutive_failures = 0;
        }
        true
    }

    /// Put every failed entry back into rotation as untested.
    ///
    /// Returns the number of entries re-admitted.
    pub fn revalidate(&self) -> usize {
        let mut inner = self.lock_inner();
        let mut count = 0;
        for entry in inner.entries.iter_mut().filter(|e| e.health == HealthState::Failed) {
            entry.health = HealthState::Untested;
            entry.consecutive_failures = 0;
            count += 1;
        }
        count
    }

    /// Diagnostic copy of every entry, failed ones included.
    pub fn snapshot(&self) -> Vec<ProxyEntry> {
        self.lock_inner().entries.clone()
    }

    pub fn entry(&self, url: &str) -> Option<ProxyEntry> {
        let inner = self.lock_inner();
        inner.by_url.get(url).map(|&slot| inner.entries[slot].clone())
    }

    pub fn len(&self) -> usize {
        self.lock_inner().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of entries still in rotation.
    pub fn active_count(&self) -> usize {
        self.lock_inner()
            .entries
            .iter()
            .filter(|e| e.health != HealthState::Failed)
            .count()
    }
}

/// Returns true if `line` starts with an explicit `scheme://`.
pub fn has_scheme(line: &str) -> bool {
    line.split_once("://").is_some_and(|(scheme, _)| {
        !scheme.is_empty() && scheme.chars().all(|c| c.is_ascii_alphanumeric())
    })
}

/// Normalize a proxy URL to `scheme://[user[:pass]@]host:port`.
///
/// Requires an explicit scheme, a host and a port (explicit or the scheme's
/// well-known default).
pub fn normalize_proxy_url(raw: &str) -> Result<String, HarvestError> {
    let trimmed = raw.trim();
    if !has_scheme(trimmed) {
        return Err(HarvestError::MalformedProxyEntry(format!(
            "'{}' has no scheme",
            redact_proxy_url(trimmed)
        )));
    }

    let url = Url::parse(trimmed).map_err(|e| {
        HarvestError::MalformedProxyEntry(format!("'{}': {e}", redact_proxy_url(trimmed)))
    })?;
    let host = url
        .host_str()
        .filter(|h| !h.is_empty())
        .ok_or_else(|| HarvestError::MalformedProxyEntry("proxy URL has no host".into()))?;
    let port = url.port_or_known_default().ok_or_else(|| {
        HarvestError::MalformedProxyEntry(format!("proxy URL for host {host} has no port"))
    })?;

    let userinfo = match (url.username(), url.password()) {
        ("", None) => String::new(),
        (user, Some(pass)) => format!("{user}:{pass}@"),
        (user, None) => format!("{user}@"),
    };

    Ok(format!("{}://{userinfo}{host}:{port}", url.scheme()))
}

/// Mask the userinfo part of a proxy URL.
pub fn redact_proxy_url(url: &str) -> String {
    match url.split_once("://") {
        Some((scheme, rest)) => match rest.rsplit_once('@') {
            Some((_, host)) => format!("{scheme}://***@{host}"),
            None => url.to_string(),
        },
        None => match url.rsplit_once('@') {
            Some((_, host)) => format!("***@{host}"),
            None => url.to_string(),
        },
    }
}
