use std::time::Duration;

use harvest_core::error::HarvestError;
use harvest_core::proxy::redact_proxy_url;
use harvest_core::traits::{RawResponse, Transport};
use moka::future::Cache;
use rand::seq::IndexedRandom;
use reqwest::Client;
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, USER_AGENT};

const DIRECT_KEY: &str = "direct";

/// Desktop browser User-Agents rotated per request.
const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:125.0) Gecko/20100101 Firefox/125.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 14.4; rv:125.0) Gecko/20100101 Firefox/125.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 14_4_1) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4.1 Safari/605.1.15",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36 Edg/124.0.0.0",
];

fn random_user_agent() -> &'static str {
    USER_AGENTS
        .choose(&mut rand::rng())
        .copied()
        .unwrap_or(USER_AGENTS[0])
}

/// HTTP transport using reqwest.
///
/// Keeps one client per proxy (plus one direct client) so connection pools
/// are reused across requests through the same endpoint. SOCKS and HTTPS
/// proxies are supported.
#[derive(Clone)]
pub struct ReqwestTransport {
    clients: Cache<String, Client>,
}

impl ReqwestTransport {
    pub fn new() -> Self {
        Self::with_capacity(1_024)
    }

    /// Bound the number of cached clients.
    pub fn with_capacity(max_clients: u64) -> Self {
        Self {
            clients: Cache::new(max_clients),
        }
    }

    async fn client_for(&self, proxy: Option<&str>) -> Result<Client, HarvestError> {
        let key = proxy.unwrap_or(DIRECT_KEY).to_string();
        let proxy = proxy.map(str::to_string);
        self.clients
            .try_get_with(key, async move { build_client(proxy.as_deref()) })
            .await
            .map_err(|e| HarvestError::FetchConnection(e.to_string()))
    }
}

impl Default for ReqwestTransport {
    fn default() -> Self {
        Self::new()
    }
}

fn build_client(proxy: Option<&str>) -> Result<Client, HarvestError> {
    let builder = Client::builder();
    let builder = match proxy {
        Some(url) => {
            let proxy = reqwest::Proxy::all(url).map_err(|e| {
                HarvestError::FetchConnection(format!(
                    "invalid proxy {}: {e}",
                    redact_proxy_url(url)
                ))
            })?;
            builder.proxy(proxy)
        }
        None => builder.no_proxy(),
    };
    builder
        .build()
        .map_err(|e| HarvestError::FetchConnection(format!("failed to build HTTP client: {e}")))
}

impl Transport for ReqwestTransport {
    async fn get(
        &self,
        url: &str,
        proxy: Option<&str>,
        timeout: Duration,
    ) -> Result<RawResponse, HarvestError> {
        let client = self.client_for(proxy).await?;
        let user_agent = random_user_agent();

        let map_error = |e: reqwest::Error| {
            if e.is_timeout() {
                HarvestError::FetchTimeout(timeout.as_secs())
            } else {
                HarvestError::FetchConnection(e.without_url().to_string())
            }
        };

        let response = client
            .get(url)
            .header(USER_AGENT, user_agent)
            .header(ACCEPT, "text/html,application/xhtml+xml")
            .header(ACCEPT_LANGUAGE, "en-US,en;q=0.9")
            .timeout(timeout)
            .send()
            .await
            .map_err(map_error)?;

        let status = response.status().as_u16();
        let body = response.text().await.map_err(map_error)?;
        Ok(RawResponse { status, body })
    }
}
