use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use harvest_client::{
    GuestDetailFetcher, GuestPageFetcher, PoolSetup, ProxyValidator, ReqwestTransport,
    build_proxy_pool, load_proxy_config,
};
use harvest_core::delay::DelayPolicy;
use harvest_core::executor::{ExecutorConfig, RequestExecutor};
use harvest_core::models::{DatePosted, ExperienceLevel, JobType, RemoteMode, SearchCriteria};
use harvest_core::orchestrator::{
    DetailFailurePolicy, HarvestConfig, HarvestOrchestrator, TracingHarvestReporter,
};
use harvest_core::proxy::{ExhaustionPolicy, ProxyPool, ProxyPoolConfig};
use harvest_core::traits::ResultSink;
use harvest_store::{FileSink, OutputFormat};

#[derive(Parser)]
#[command(name = "harvest", version, about = "Proxy-aware job posting harvester")]
struct Cli {
    /// Log level for harvester crates (RUST_LOG still applies to everything else)
    #[arg(long, global = true, env = "HARVEST_LOG_LEVEL", default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Search job postings and save them to a file
    Search(SearchArgs),

    /// Load the proxy pool from a config and list its entries
    Proxies {
        /// Proxy config: file path, http(s) URL or raw YAML
        #[arg(long, env = "HARVEST_PROXY_CONFIG")]
        proxy_config: String,
    },
}

#[derive(Args)]
struct SearchArgs {
    /// Search keywords (e.g. "rust developer")
    keywords: String,

    /// Search location (e.g. "Berlin, Germany")
    location: String,

    /// "Any time", "Past month", "Past week" or "Past day"
    #[arg(long)]
    date_posted: Option<DatePosted>,

    /// One or more experience levels (e.g. "Entry level" "Associate")
    #[arg(long, num_args = 1..)]
    experience_level: Vec<ExperienceLevel>,

    /// One or more job types (e.g. "Full-time" "Contract")
    #[arg(long, num_args = 1..)]
    job_type: Vec<JobType>,

    /// One or more workplace types ("On-site", "Remote", "Hybrid")
    #[arg(long, num_args = 1..)]
    remote: Vec<RemoteMode>,

    /// Number of job records to collect
    #[arg(long, default_value_t = 25)]
    max_jobs: usize,

    /// Concurrent page workers
    #[arg(long, default_value_t = 2)]
    concurrency: usize,

    /// Concurrent detail fetches (defaults to --concurrency)
    #[arg(long)]
    detail_concurrency: Option<usize>,

    /// Random delay range in seconds before every request
    #[arg(long, num_args = 2, value_names = ["MIN", "MAX"], default_values_t = [3.0, 8.0])]
    delay: Vec<f64>,

    /// Attempts per request, first try included
    #[arg(long, default_value_t = 3)]
    retries: u32,

    /// Per-request timeout in seconds
    #[arg(long, default_value_t = 10)]
    timeout: u64,

    /// Stop paging after this many result pages
    #[arg(long, default_value_t = 100)]
    max_pages: usize,

    /// Abort the run after this many seconds
    #[arg(long)]
    max_runtime: Option<u64>,

    /// Proxy config: file path, http(s) URL or raw YAML
    #[arg(long, env = "HARVEST_PROXY_CONFIG")]
    proxy_config: Option<String>,

    /// Consecutive failures before a proxy leaves the rotation
    #[arg(long, default_value_t = 3)]
    proxy_failures: u32,

    /// Fail the run instead of going direct when every proxy has failed
    #[arg(long, default_value_t = false)]
    no_direct_fallback: bool,

    /// Drop jobs whose detail page cannot be fetched instead of keeping them
    #[arg(long, default_value_t = false)]
    drop_failed_details: bool,

    /// Output directory (defaults to ~/harvest)
    #[arg(long, env = "HARVEST_OUTPUT_PATH")]
    output_path: Option<PathBuf>,

    /// Write CSV instead of JSON
    #[arg(long, default_value_t = false)]
    to_csv: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive(format!("harvest={}", cli.log_level).parse()?),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Search(args) => cmd_search(args).await?,
        Commands::Proxies { proxy_config } => cmd_proxies(&proxy_config).await?,
    }

    Ok(())
}

async fn cmd_search(args: SearchArgs) -> Result<()> {
    let mut criteria = SearchCriteria::new(&args.keywords, &args.location)
        .with_experience_levels(args.experience_level.iter().copied())
        .with_job_types(args.job_type.iter().copied())
        .with_remote_modes(args.remote.iter().copied());
    if let Some(date_posted) = args.date_posted {
        criteria = criteria.with_date_posted(date_posted);
    }

    let policy = if args.no_direct_fallback {
        ExhaustionPolicy::Abort
    } else {
        ExhaustionPolicy::Direct
    };
    let pool_config = ProxyPoolConfig::default()
        .with_failure_threshold(args.proxy_failures)
        .with_exhaustion_policy(policy);
    let pool = match &args.proxy_config {
        Some(source) => load_pool(source, pool_config).await?.pool,
        None => {
            tracing::info!("No proxy config given, connecting directly");
            pool_config.validate()?;
            ProxyPool::new(pool_config)
        }
    };

    let executor_config = ExecutorConfig::default()
        .with_max_attempts(args.retries)
        .with_timeout(Duration::from_secs(args.timeout))
        .with_delay(delay_policy(&args.delay)?);
    let executor = Arc::new(
        RequestExecutor::new(ReqwestTransport::new(), Arc::new(pool), executor_config)
            .context("Invalid request settings")?,
    );

    let pages = GuestPageFetcher::new(Arc::clone(&executor))?;
    let details = GuestDetailFetcher::new(Arc::clone(&executor));

    let detail_policy = if args.drop_failed_details {
        DetailFailurePolicy::Drop
    } else {
        DetailFailurePolicy::Degrade
    };
    let config = HarvestConfig::default()
        .with_target_count(args.max_jobs)
        .with_concurrency(args.concurrency)
        .with_detail_concurrency(args.detail_concurrency.unwrap_or(args.concurrency))
        .with_max_pages(args.max_pages)
        .with_detail_failure_policy(detail_policy)
        .with_overall_timeout(args.max_runtime.map(Duration::from_secs));
    let orchestrator =
        HarvestOrchestrator::new(pages, details, config).context("Invalid harvest settings")?;

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, stopping and saving partial results");
            on_interrupt.cancel();
        }
    });

    let label = criteria.label();
    let outcome = orchestrator
        .run(criteria, cancel, &TracingHarvestReporter)
        .await;

    if !outcome.is_complete() {
        let reason = outcome
            .summary
            .stop_reason
            .map(|r| r.to_string())
            .unwrap_or_else(|| "page budget spent".to_string());
        tracing::warn!(
            %reason,
            collected = outcome.summary.collected,
            requested = outcome.summary.requested,
            "Run did not complete, saving partial results"
        );
    }

    let format = if args.to_csv {
        OutputFormat::Csv
    } else {
        OutputFormat::Json
    };
    let out_dir = args.output_path.unwrap_or_else(default_output_dir);
    let artifact = FileSink::new(&out_dir, format)
        .publish(&outcome.records, &label)
        .with_context(|| format!("Failed to save results to {}", out_dir.display()))?;

    let stats = executor.stats();
    tracing::info!(
        attempts = stats.attempts(),
        retries = stats.retries(),
        failures = stats.failures(),
        "Request totals"
    );

    println!("{}", serde_json::to_string_pretty(&outcome.summary)?);
    println!(
        "Saved {} jobs to {} (latest: {})",
        artifact.records,
        artifact.path.display(),
        artifact.latest.display()
    );

    Ok(())
}

async fn cmd_proxies(source: &str) -> Result<()> {
    let setup = load_pool(source, ProxyPoolConfig::default()).await?;

    let entries = setup.pool.snapshot();
    if entries.is_empty() {
        println!("No proxies loaded; requests would go direct.");
        return Ok(());
    }

    println!("Proxy pool ({} entries):\n", entries.len());
    for entry in &entries {
        println!(
            "  [{}] {} ({})",
            entry.health,
            entry.redacted(),
            entry.protocol
        );
    }

    let admission = &setup.admission;
    println!(
        "\nAdmitted: {}, duplicates: {}, insecure: {}, malformed: {}, protocol mismatch: {}",
        admission.admitted,
        admission.duplicates,
        admission.insecure,
        admission.malformed,
        admission.protocol_mismatch
    );
    match &setup.validation {
        Some(report) => println!(
            "Validation: {} healthy, {} failed",
            report.healthy, report.failed
        ),
        None => println!("Validation: skipped"),
    }

    Ok(())
}

async fn load_pool(source: &str, pool_config: ProxyPoolConfig) -> Result<PoolSetup> {
    let config = load_proxy_config(source)
        .await
        .context("Failed to load proxy config")?;
    let setup = build_proxy_pool(&config, pool_config, &ProxyValidator::default())
        .await
        .context("Failed to build proxy pool")?;
    tracing::info!(
        proxies = setup.pool.len(),
        active = setup.pool.active_count(),
        "Proxy pool ready"
    );
    Ok(setup)
}

fn delay_policy(bounds: &[f64]) -> Result<DelayPolicy> {
    let [min, max] = bounds else {
        anyhow::bail!("--delay takes exactly two values: MIN MAX");
    };
    let min = Duration::try_from_secs_f64(*min).context("Invalid minimum delay")?;
    let max = Duration::try_from_secs_f64(*max).context("Invalid maximum delay")?;
    let policy = DelayPolicy::new(min, max);
    policy.validate()?;
    Ok(policy)
}

fn default_output_dir() -> PathBuf {
    directories::UserDirs::new()
        .map(|dirs| dirs.home_dir().join("harvest"))
        .unwrap_or_else(|| PathBuf::from("harvest"))
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_search_defaults() {
        let cli = Cli::parse_from(["harvest", "search", "rust developer", "Berlin"]);
        let Commands::Search(args) = cli.command else {
            panic!("expected search");
        };
        assert_eq!(args.max_jobs, 25);
        assert_eq!(args.concurrency, 2);
        assert_eq!(args.delay, vec![3.0, 8.0]);
        assert!(!args.to_csv);
        assert!(args.experience_level.is_empty());
    }

    #[test]
    fn test_search_filters_parse_labels() {
        let cli = Cli::parse_from([
            "harvest",
            "search",
            "sre",
            "Remote",
            "--date-posted",
            "Past week",
            "--job-type",
            "Full-time",
            "Contract",
            "--delay",
            "0.5",
            "1.5",
        ]);
        let Commands::Search(args) = cli.command else {
            panic!("expected search");
        };
        assert_eq!(args.date_posted, Some(DatePosted::PastWeek));
        assert_eq!(args.job_type, vec![JobType::FullTime, JobType::Contract]);
        assert_eq!(args.delay, vec![0.5, 1.5]);
    }

    #[test]
    fn test_delay_policy_bounds() {
        let policy = delay_policy(&[1.0, 2.5]).unwrap();
        assert_eq!(policy.min_delay, Duration::from_secs(1));
        assert_eq!(policy.max_delay, Duration::from_millis(2_500));
        assert!(delay_policy(&[5.0, 1.0]).is_err());
        assert!(delay_policy(&[-1.0, 1.0]).is_err());
    }
}
