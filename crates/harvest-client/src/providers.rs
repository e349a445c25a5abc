use std::time::Duration;

use harvest_core::config::{ProviderConfig, ProxyConfigFile, WebshareConfig};
use harvest_core::error::HarvestError;
use harvest_core::proxy_source::{LocalFileSource, ProxyCandidates, ProxyProvider};
use reqwest::Client;
use reqwest::header::AUTHORIZATION;
use serde::Deserialize;
use url::Url;

/// Proxy list endpoint of the Webshare API.
pub const WEBSHARE_URL: &str = "https://proxy.webshare.io/api/v2/proxy/list/";

#[derive(Debug, Deserialize)]
struct WebsharePage {
    #[serde(default)]
    results: Vec<WebshareProxy>,
}

#[derive(Debug, Deserialize)]
struct WebshareProxy {
    username: String,
    password: String,
    proxy_address: String,
    port: u16,
}

impl WebshareProxy {
    fn to_url(&self) -> String {
        format!(
            "socks5://{}:{}@{}:{}",
            self.username, self.password, self.proxy_address, self.port
        )
    }
}

/// Proxies from a Webshare account, fetched page by page.
///
/// Paging stops at the first empty page, at `max_pages`, or at the first
/// failed request; whatever was fetched before that is kept.
#[derive(Clone)]
pub struct WebshareProvider {
    client: Client,
    config: WebshareConfig,
    base_url: String,
}

impl WebshareProvider {
    pub fn new(config: WebshareConfig) -> Result<Self, HarvestError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| HarvestError::ProxySource(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            config,
            base_url: WEBSHARE_URL.to_string(),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn page_url(&self, page: u32) -> Result<Url, HarvestError> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|e| HarvestError::ProxySource(format!("invalid Webshare URL: {e}")))?;
        url.query_pairs_mut()
            .append_pair("mode", "direct")
            .append_pair("page", &page.to_string())
            .append_pair("page_size", &self.config.page_size.to_string());
        Ok(url)
    }

    async fn fetch_page(&self, page: u32) -> Result<Vec<String>, HarvestError> {
        let url = self.page_url(page)?;
        let response = self
            .client
            .get(url)
            .header(AUTHORIZATION, format!("Token {}", self.config.api_key))
            .send()
            .await
            .map_err(|e| HarvestError::ProxySource(e.without_url().to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(HarvestError::ProxySource(format!(
                "Webshare returned HTTP {}",
                status.as_u16()
            )));
        }

        let page: WebsharePage = response
            .json()
            .await
            .map_err(|e| HarvestError::ProxySource(format!("invalid Webshare response: {e}")))?;
        Ok(page.results.iter().map(WebshareProxy::to_url).collect())
    }
}

impl ProxyProvider for WebshareProvider {
    fn name(&self) -> &str {
        "webshare"
    }

    async fn fetch_proxies(&self) -> Result<ProxyCandidates, HarvestError> {
        let mut proxies = Vec::new();
        for page in 1..=self.config.max_pages {
            match self.fetch_page(page).await {
                Ok(found) if found.is_empty() => {
                    tracing::info!(page, "No more Webshare proxies");
                    break;
                }
                Ok(found) => {
                    tracing::debug!(page, count = found.len(), "Fetched Webshare page");
                    proxies.extend(found);
                }
                Err(e) => {
                    tracing::error!(page, error = %e, "Webshare page failed");
                    break;
                }
            }
        }
        Ok(proxies.into())
    }
}

/// Closed set of proxy sources.
#[derive(Clone)]
pub enum ProxySource {
    Webshare(WebshareProvider),
    File(LocalFileSource),
}

impl ProxySource {
    /// Every source declared in a proxy configuration file.
    pub fn from_config(config: &ProxyConfigFile) -> Result<Vec<ProxySource>, HarvestError> {
        let mut sources = Vec::new();
        for provider in &config.proxy_providers {
            match provider {
                ProviderConfig::Webshare(cfg) => {
                    tracing::debug!(
                        page_size = cfg.page_size,
                        max_pages = cfg.max_pages,
                        "Configured Webshare provider"
                    );
                    sources.push(ProxySource::Webshare(WebshareProvider::new(cfg.clone())?));
                }
            }
        }
        if !config.proxies_files.is_empty() {
            sources.push(ProxySource::File(LocalFileSource::new(
                config.proxies_files.clone(),
            )));
        }
        Ok(sources)
    }
}

impl ProxyProvider for ProxySource {
    fn name(&self) -> &str {
        match self {
            ProxySource::Webshare(provider) => provider.name(),
            ProxySource::File(source) => source.name(),
        }
    }

    async fn fetch_proxies(&self) -> Result<ProxyCandidates, HarvestError> {
        match self {
            ProxySource::Webshare(provider) => provider.fetch_proxies().await,
            ProxySource::File(source) => source.fetch_proxies().await,
        }
    }
}
