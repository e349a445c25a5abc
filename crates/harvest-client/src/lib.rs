pub mod detail;
mod html;
pub mod listing;
pub mod providers;
pub mod proxy_config;
pub mod transport;
pub mod validate;

pub use detail::{GuestDetailFetcher, parse_job_detail};
pub use listing::{GuestPageFetcher, parse_job_cards};
pub use providers::{ProxySource, WebshareProvider};
pub use proxy_config::{PoolSetup, build_proxy_pool, load_proxy_config};
pub use transport::ReqwestTransport;
pub use validate::{ProxyValidator, ValidationReport};
