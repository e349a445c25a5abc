pub mod config;
pub mod dedup;
pub mod delay;
pub mod error;
pub mod executor;
pub mod models;
pub mod orchestrator;
pub mod proxy;
pub mod proxy_source;
pub mod traits;

#[cfg(test)]
pub mod testutil;

pub use config::{ProviderConfig, ProxyConfigFile, WebshareConfig};
pub use dedup::Deduplicator;
pub use delay::DelayPolicy;
pub use error::HarvestError;
pub use executor::{ExecutorConfig, RequestExecutor};
pub use models::{
    DatePosted, ExperienceLevel, JobRecord, JobSummary, JobType, PageRequest, Recruiter,
    RemoteMode, SearchCriteria,
};
pub use orchestrator::{
    DetailFailurePolicy, HarvestConfig, HarvestEvent, HarvestOrchestrator, HarvestOutcome,
    HarvestPhase, HarvestReporter, RunSummary, StopReason, TracingHarvestReporter,
};
pub use proxy::{
    ExhaustionPolicy, HealthState, ProxyEntry, ProxyOutcome, ProxyPool, ProxyPoolConfig,
    Selection,
};
pub use proxy_source::{LoadReport, LocalFileSource, ProxyCandidates, ProxyFileConfig, ProxyProvider};
pub use traits::{DetailFetcher, PageFetcher, PublishedArtifact, RawResponse, ResultSink, Transport};
