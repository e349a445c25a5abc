//! Proxy configuration file model.
//!
//! ```yaml
//! validate_proxies: true
//! proxy_providers:
//!   - name: webshare
//!     config:
//!       api_key: "..."
//!       page_size: 100
//!       max_pages: 5
//! proxies_files:
//!   - path: ./proxies.txt
//!     protocol: socks5
//! ```

use serde::Deserialize;

use crate::error::HarvestError;
use crate::proxy_source::ProxyFileConfig;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ProxyConfigFile {
    /// Probe every proxy once before the run and drop the dead ones.
    #[serde(default = "default_validate")]
    pub validate_proxies: bool,
    #[serde(default)]
    pub proxy_providers: Vec<ProviderConfig>,
    #[serde(default)]
    pub proxies_files: Vec<ProxyFileConfig>,
}

fn default_validate() -> bool {
    true
}

impl Default for ProxyConfigFile {
    fn default() -> Self {
        Self {
            validate_proxies: true,
            proxy_providers: Vec::new(),
            proxies_files: Vec::new(),
        }
    }
}

/// A remote proxy provider, tagged by `name`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "name", content = "config", rename_all = "lowercase")]
pub enum ProviderConfig {
    Webshare(WebshareConfig),
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct WebshareConfig {
    pub api_key: String,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,
}

fn default_page_size() -> u32 {
    100
}

fn default_max_pages() -> u32 {
    5
}

impl WebshareConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            page_size: default_page_size(),
            max_pages: default_max_pages(),
        }
    }
}

impl ProxyConfigFile {
    pub fn from_yaml(text: &str) -> Result<Self, HarvestError> {
        let config: ProxyConfigFile = serde_yaml::from_str(text)
            .map_err(|e| HarvestError::ConfigurationInvalid(format!("proxy config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), HarvestError> {
        for provider in &self.proxy_providers {
            match provider {
                ProviderConfig::Webshare(cfg) => {
                    if cfg.api_key.trim().is_empty() {
                        return Err(HarvestError::ConfigurationInvalid(
                            "webshare provider requires an api_key".into(),
                        ));
                    }
                    if cfg.page_size == 0 || cfg.max_pages == 0 {
                        return Err(HarvestError::ConfigurationInvalid(
                            "webshare page_size and max_pages must be at least 1".into(),
                        ));
                    }
                }
            }
        }
        Ok(())
    }

    pub fn has_sources(&self) -> bool {
        !self.proxy_providers.is_empty() || !self.proxies_files.is_empty()
    }
}
