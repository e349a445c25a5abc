use harvest_core::config::ProxyConfigFile;
use harvest_core::error::HarvestError;
use harvest_core::proxy::{AdmissionReport, ProxyPool, ProxyPoolConfig};

use crate::providers::ProxySource;
use crate::validate::{ProxyValidator, ValidationReport};

/// Load a proxy configuration from a URL, raw YAML text (anything with a
/// newline) or a file path, in that order of detection.
pub async fn load_proxy_config(source: &str) -> Result<ProxyConfigFile, HarvestError> {
    let lowered = source.trim_start().to_lowercase();
    let text = if lowered.starts_with("http://") || lowered.starts_with("https://") {
        fetch_config_text(source.trim()).await?
    } else if source.contains('\n') {
        source.to_string()
    } else {
        tokio::fs::read_to_string(source).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                HarvestError::ConfigurationInvalid(format!("config file not found: '{source}'"))
            } else {
                HarvestError::ConfigurationInvalid(format!("cannot read config '{source}': {e}"))
            }
        })?
    };
    ProxyConfigFile::from_yaml(&text)
}

async fn fetch_config_text(url: &str) -> Result<String, HarvestError> {
    let response = reqwest::get(url)
        .await
        .map_err(|e| HarvestError::ConfigurationInvalid(format!("failed to fetch config: {e}")))?;
    let status = response.status();
    if !status.is_success() {
        return Err(HarvestError::ConfigurationInvalid(format!(
            "failed to fetch config: HTTP {}",
            status.as_u16()
        )));
    }
    response
        .text()
        .await
        .map_err(|e| HarvestError::ConfigurationInvalid(format!("failed to read config: {e}")))
}

/// A loaded pool with what happened on the way.
#[derive(Debug)]
pub struct PoolSetup {
    pub pool: ProxyPool,
    pub admission: AdmissionReport,
    /// `None` when validation was disabled.
    pub validation: Option<ValidationReport>,
}

/// Build the proxy pool described by `config`: fetch every source, admit
/// the candidates and optionally probe them.
pub async fn build_proxy_pool(
    config: &ProxyConfigFile,
    pool_config: ProxyPoolConfig,
    validator: &ProxyValidator,
) -> Result<PoolSetup, HarvestError> {
    config.validate()?;
    pool_config.validate()?;
    let sources = ProxySource::from_config(config)?;
    if sources.is_empty() {
        tracing::warn!("No proxy providers or files configured; running without proxies");
    }

    let (pool, admission) = ProxyPool::load(&sources, pool_config).await;

    let validation = if config.validate_proxies && !pool.is_empty() {
        Some(validator.validate(&pool).await)
    } else {
        if !pool.is_empty() {
            tracing::warn!("Proxy validation is disabled, skipping validation");
        }
        None
    };

    Ok(PoolSetup {
        pool,
        admission,
        validation,
    })
}
