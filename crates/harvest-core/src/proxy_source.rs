use std::future::Future;
use std::path::PathBuf;

use serde::Deserialize;

use crate::error::HarvestError;
use crate::proxy::has_scheme;

/// Produces candidate proxy URLs for the pool.
///
/// Implementations only gather candidates; normalization and the security
/// filter are applied by the pool on admission.
pub trait ProxyProvider: Send + Sync {
    fn name(&self) -> &str;

    fn fetch_proxies(&self) -> impl Future<Output = Result<ProxyCandidates, HarvestError>> + Send;
}

/// Candidate URLs from a source, with the lines it rejected before
/// admission.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProxyCandidates {
    pub urls: Vec<String>,
    pub rejected: LoadReport,
}

impl From<Vec<String>> for ProxyCandidates {
    fn from(urls: Vec<String>) -> Self {
        Self {
            urls,
            rejected: LoadReport::default(),
        }
    }
}

/// One local proxy list file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ProxyFileConfig {
    pub path: PathBuf,
    /// Scheme prefixed to bare `host:port` lines. When set, lines with a
    /// different explicit scheme are dropped.
    #[serde(default)]
    pub protocol: Option<String>,
}

impl ProxyFileConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            protocol: None,
        }
    }

    pub fn with_protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocol = Some(protocol.into());
        self
    }
}

/// Counters from parsing proxy list files.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
    pub accepted: usize,
    pub insecure: usize,
    pub protocol_mismatch: usize,
    pub malformed: usize,
}

impl LoadReport {
    fn merge(&mut self, other: &LoadReport) {
        self.accepted += other.accepted;
        self.insecure += other.insecure;
        self.protocol_mismatch += other.protocol_mismatch;
        self.malformed += other.malformed;
    }
}

/// Apply the proxy file rules to the contents of one file.
///
/// - blank lines and `#` comments are ignored
/// - `http://` lines are always dropped
/// - with a `protocol`, bare lines get it prefixed and lines with another
///   explicit scheme are dropped
/// - without a `protocol`, bare lines are malformed and skipped
pub fn parse_proxy_lines(content: &str, protocol: Option<&str>) -> (Vec<String>, LoadReport) {
    let protocol = protocol
        .map(|p| p.trim().trim_end_matches("://").to_lowercase())
        .filter(|p| !p.is_empty());
    let mut proxies = Vec::new();
    let mut report = LoadReport::default();

    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        if line.to_lowercase().starts_with("http://") {
            report.insecure += 1;
            continue;
        }

        if has_scheme(line) {
            if let Some(protocol) = &protocol {
                let scheme = line.split_once("://").map(|(s, _)| s.to_lowercase());
                if scheme.as_deref() != Some(protocol.as_str()) {
                    report.protocol_mismatch += 1;
                    continue;
                }
            }
            proxies.push(line.to_string());
        } else if let Some(protocol) = &protocol {
            proxies.push(format!("{protocol}://{line}"));
        } else {
            report.malformed += 1;
            continue;
        }
        report.accepted += 1;
    }

    (proxies, report)
}

/// Proxies listed in local files.
#[derive(Debug, Clone)]
pub struct LocalFileSource {
    files: Vec<ProxyFileConfig>,
}

impl LocalFileSource {
    pub fn new(files: Vec<ProxyFileConfig>) -> Self {
        Self { files }
    }

    /// Read every configured file. Missing or unreadable files are logged
    /// and skipped.
    pub async fn load(&self) -> (Vec<String>, LoadReport) {
        let mut proxies = Vec::new();
        let mut report = LoadReport::default();

        for file in &self.files {
            let content = match tokio::fs::read_to_string(&file.path).await {
                Ok(content) => content,
                Err(e) => {
                    tracing::warn!(path = %file.path.display(), error = %e, "Skipping unreadable proxy file");
                    continue;
                }
            };

            let (lines, file_report) = parse_proxy_lines(&content, file.protocol.as_deref());
            tracing::debug!(
                path = %file.path.display(),
                accepted = file_report.accepted,
                insecure = file_report.insecure,
                protocol_mismatch = file_report.protocol_mismatch,
                malformed = file_report.malformed,
                "Parsed proxy file"
            );
            if file_report.malformed > 0 {
                tracing::warn!(
                    path = %file.path.display(),
                    skipped = file_report.malformed,
                    "Skipped proxy lines without a scheme (no protocol configured)"
                );
            }
            proxies.extend(lines);
            report.merge(&file_report);
        }

        (proxies, report)
    }
}

impl ProxyProvider for LocalFileSource {
    fn name(&self) -> &str {
        "file"
    }

    async fn fetch_proxies(&self) -> Result<ProxyCandidates, HarvestError> {
        let (urls, rejected) = self.load().await;
        Ok(ProxyCandidates { urls, rejected })
    }
}

/// Fetch candidates from every source concurrently.
///
/// A failing source is logged and contributes nothing.
pub async fn collect_candidates<P: ProxyProvider>(sources: &[P]) -> ProxyCandidates {
    let results = futures::future::join_all(
        sources
            .iter()
            .map(|source| async move { (source.name(), source.fetch_proxies().await) }),
    )
    .await;

    let mut all = ProxyCandidates::default();
    for (name, result) in results {
        match result {
            Ok(found) => {
                tracing::info!(source = %name, count = found.urls.len(), "Fetched proxies");
                all.urls.extend(found.urls);
                all.rejected.merge(&found.rejected);
            }
            Err(e) => tracing::error!(source = %name, error = %e, "Proxy source failed"),
        }
    }
    all
}
