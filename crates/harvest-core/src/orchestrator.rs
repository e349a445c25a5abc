//! The harvest control loop.
//!
//! A bounded set of workers pulls page offsets from a shared cursor, filters
//! each page through the [`Deduplicator`] and enriches the new summaries with
//! detail fetches. Workers never touch the run state: everything they
//! produce goes through one channel to the aggregator, which owns the
//! collected records and decides when the run stops.
//!
//! Two cancellation levels exist. *Halt* stops the issue of new offsets and
//! lets in-flight units finish (end of results). *Abort* also abandons
//! in-flight units at their next suspension point (target reached, fatal
//! error, timeout, external stop).

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::{Notify, Semaphore, mpsc};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::dedup::Deduplicator;
use crate::error::HarvestError;
use crate::models::{JobRecord, JobSummary, PageRequest, SearchCriteria};
use crate::traits::{DetailFetcher, PageFetcher};

/// Page size of the guest search API.
pub const DEFAULT_PAGE_SIZE: usize = 10;

/// What to do with a summary whose detail fetch failed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetailFailurePolicy {
    /// Keep a summary-only record flagged as degraded.
    #[default]
    Degrade,
    Drop,
}

#[derive(Debug, Clone)]
pub struct HarvestConfig {
    pub target_count: usize,
    /// Concurrent page workers.
    pub concurrency: usize,
    /// Concurrent detail fetches across all workers.
    pub detail_concurrency: usize,
    pub page_size: usize,
    /// Upper bound on offsets issued in one run.
    pub max_pages: usize,
    /// Cumulative failed pages after which the run aborts.
    pub max_page_failures: usize,
    pub detail_failure_policy: DetailFailurePolicy,
    pub overall_timeout: Option<Duration>,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            target_count: 25,
            concurrency: 2,
            detail_concurrency: 2,
            page_size: DEFAULT_PAGE_SIZE,
            max_pages: 100,
            max_page_failures: 5,
            detail_failure_policy: DetailFailurePolicy::Degrade,
            overall_timeout: None,
        }
    }
}

impl HarvestConfig {
    pub fn with_target_count(mut self, target: usize) -> Self {
        self.target_count = target;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_detail_concurrency(mut self, concurrency: usize) -> Self {
        self.detail_concurrency = concurrency;
        self
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn with_max_pages(mut self, max_pages: usize) -> Self {
        self.max_pages = max_pages;
        self
    }

    pub fn with_max_page_failures(mut self, failures: usize) -> Self {
        self.max_page_failures = failures;
        self
    }

    pub fn with_detail_failure_policy(mut self, policy: DetailFailurePolicy) -> Self {
        self.detail_failure_policy = policy;
        self
    }

    pub fn with_overall_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.overall_timeout = timeout;
        self
    }

    pub fn validate(&self) -> Result<(), HarvestError> {
        let checks = [
            (self.target_count, "target_count"),
            (self.concurrency, "concurrency"),
            (self.detail_concurrency, "detail_concurrency"),
            (self.page_size, "page_size"),
            (self.max_pages, "max_pages"),
            (self.max_page_failures, "max_page_failures"),
        ];
        for (value, name) in checks {
            if value == 0 {
                return Err(HarvestError::ConfigurationInvalid(format!(
                    "{name} must be at least 1"
                )));
            }
        }
        if self.overall_timeout.is_some_and(|t| t.is_zero()) {
            return Err(HarvestError::ConfigurationInvalid(
                "overall timeout must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

/// Why a run stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    TargetReached,
    ExhaustedResults,
    FatalError,
    TimedOut,
    Cancelled,
}

impl StopReason {
    /// Reasons that abandon in-flight work.
    fn aborts(&self) -> bool {
        !matches!(self, StopReason::ExhaustedResults)
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StopReason::TargetReached => "target reached",
            StopReason::ExhaustedResults => "exhausted results",
            StopReason::FatalError => "fatal error",
            StopReason::TimedOut => "timed out",
            StopReason::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HarvestPhase {
    Idle,
    Running,
    Completed,
    Aborted,
}

impl HarvestPhase {
    fn from_stop(reason: Option<StopReason>) -> Self {
        match reason {
            None | Some(StopReason::TargetReached) | Some(StopReason::ExhaustedResults) => {
                HarvestPhase::Completed
            }
            Some(_) => HarvestPhase::Aborted,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub requested: usize,
    pub collected: usize,
    /// Records dropped because their detail fetch failed.
    pub skipped_detail_failures: usize,
    /// Records kept with summary fields only.
    pub degraded_records: usize,
    pub pages_fetched: usize,
    pub page_failures: usize,
    pub duplicates_skipped: usize,
    /// `None` when the page budget ran out before any stop condition.
    pub stop_reason: Option<StopReason>,
    pub phase: HarvestPhase,
    pub elapsed: Duration,
}

/// Records in discovery order plus the run summary. Returned for every run,
/// aborted ones included.
#[derive(Debug, Clone)]
pub struct HarvestOutcome {
    pub records: Vec<JobRecord>,
    pub summary: RunSummary,
}

impl HarvestOutcome {
    pub fn is_complete(&self) -> bool {
        self.summary.phase == HarvestPhase::Completed
    }
}

/// Events emitted by the orchestrator for monitoring/logging.
#[derive(Debug, Clone)]
pub enum HarvestEvent<'a> {
    Started {
        run_id: Uuid,
        criteria: &'a SearchCriteria,
        target: usize,
    },
    PageFetched {
        offset: usize,
        found: usize,
        admitted: usize,
        duplicates: usize,
        deferred: usize,
    },
    /// Deferred summaries of earlier pages taken up once capacity freed.
    BacklogResumed {
        admitted: usize,
        duplicates: usize,
        remaining: usize,
    },
    EndOfResults {
        offset: usize,
    },
    PageFailed {
        offset: usize,
        error: &'a HarvestError,
        failures: usize,
    },
    DetailFailed {
        job_id: &'a str,
        error: &'a HarvestError,
        kept_degraded: bool,
    },
    RecordCollected {
        job_id: &'a str,
        collected: usize,
        target: usize,
    },
    Stopping {
        reason: StopReason,
    },
    Finished {
        summary: &'a RunSummary,
    },
}

/// Trait for receiving harvest events (decoupled logging, progress display).
pub trait HarvestReporter: Send + Sync {
    fn report(&self, event: HarvestEvent<'_>) {
        let _ = event;
    }
}

/// Reporter that uses the `tracing` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingHarvestReporter;

impl HarvestReporter for TracingHarvestReporter {
    fn report(&self, event: HarvestEvent<'_>) {
        match event {
            HarvestEvent::Started {
                run_id,
                criteria,
                target,
            } => {
                tracing::info!(
                    %run_id,
                    keywords = %criteria.keywords,
                    location = %criteria.location,
                    target,
                    "Harvest started"
                );
            }
            HarvestEvent::PageFetched {
                offset,
                found,
                admitted,
                duplicates,
                deferred,
            } => {
                tracing::info!(offset, found, admitted, duplicates, deferred, "Page fetched");
            }
            HarvestEvent::BacklogResumed {
                admitted,
                duplicates,
                remaining,
            } => {
                tracing::debug!(admitted, duplicates, remaining, "Resumed deferred summaries");
            }
            HarvestEvent::EndOfResults { offset } => {
                tracing::info!(offset, "No more results");
            }
            HarvestEvent::PageFailed {
                offset,
                error,
                failures,
            } => {
                tracing::warn!(offset, %error, failures, "Page failed");
            }
            HarvestEvent::DetailFailed {
                job_id,
                error,
                kept_degraded,
            } => {
                tracing::warn!(%job_id, %error, kept_degraded, "Detail fetch failed");
            }
            HarvestEvent::RecordCollected {
                job_id,
                collected,
                target,
            } => {
                tracing::debug!(%job_id, collected, target, "Record collected");
            }
            HarvestEvent::Stopping { reason } => {
                tracing::info!(%reason, "Stopping harvest");
            }
            HarvestEvent::Finished { summary } => {
                tracing::info!(
                    run_id = %summary.run_id,
                    collected = summary.collected,
                    requested = summary.requested,
                    phase = ?summary.phase,
                    stop_reason = ?summary.stop_reason,
                    elapsed_ms = summary.elapsed.as_millis() as u64,
                    "Harvest finished"
                );
            }
        }
    }
}

/// Messages from workers to the aggregator.
enum WorkerMessage {
    PageFetched {
        offset: usize,
        found: usize,
        admitted: usize,
        duplicates: usize,
        deferred: usize,
    },
    BacklogResumed {
        admitted: usize,
        duplicates: usize,
        remaining: usize,
    },
    PageEmpty {
        offset: usize,
    },
    PageFailed {
        offset: usize,
        error: HarvestError,
    },
    Detail {
        offset: usize,
        position: usize,
        summary: JobSummary,
        result: Result<JobRecord, HarvestError>,
    },
}

/// Slots for records that are collected or still being enriched. Keeps
/// workers from fetching details the run will not need.
struct Capacity {
    target: usize,
    reserved: AtomicUsize,
    freed: Notify,
}

impl Capacity {
    fn new(target: usize) -> Self {
        Self {
            target,
            reserved: AtomicUsize::new(0),
            freed: Notify::new(),
        }
    }

    fn try_reserve(&self) -> bool {
        self.reserved
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n < self.target).then_some(n + 1)
            })
            .is_ok()
    }

    fn release(&self) {
        let released = self
            .reserved
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if released {
            self.freed.notify_waiters();
        }
    }

    fn is_full(&self) -> bool {
        self.reserved.load(Ordering::SeqCst) >= self.target
    }

    /// Wait until a slot is free. Returns false if `stop` fires first.
    async fn wait(&self, stop: &CancellationToken) -> bool {
        loop {
            let freed = self.freed.notified();
            tokio::pin!(freed);
            // Register before checking so a release in between is not lost.
            freed.as_mut().enable();
            if !self.is_full() {
                return true;
            }
            tokio::select! {
                () = stop.cancelled() => return false,
                () = &mut freed => {}
            }
        }
    }
}

/// A summary from a fetched page, with its place in discovery order.
struct Pending {
    offset: usize,
    position: usize,
    summary: JobSummary,
}

struct Worker<P, D> {
    pages: P,
    details: D,
    criteria: Arc<SearchCriteria>,
    page_size: usize,
    max_pages: usize,
    policy: DetailFailurePolicy,
    cursor: Arc<AtomicUsize>,
    dedup: Arc<Deduplicator>,
    capacity: Arc<Capacity>,
    detail_permits: Arc<Semaphore>,
    halt: CancellationToken,
    abort: CancellationToken,
    tx: mpsc::UnboundedSender<WorkerMessage>,
}

impl<P: PageFetcher, D: DetailFetcher> Worker<P, D> {
    async fn run(self) {
        // Summaries of fetched pages that found no free slot. They outlive a
        // halt since their page is already in hand; only an abort drops them.
        let mut backlog = VecDeque::new();
        loop {
            if !backlog.is_empty() {
                if !self.capacity.wait(&self.abort).await {
                    break;
                }
                let (fresh, duplicates) = self.admit(&mut backlog);
                let _ = self.tx.send(WorkerMessage::BacklogResumed {
                    admitted: fresh.len(),
                    duplicates,
                    remaining: backlog.len(),
                });
                self.enrich(fresh).await;
                continue;
            }

            if !self.capacity.wait(&self.halt).await || self.halt.is_cancelled() {
                break;
            }

            let page = self.cursor.fetch_add(1, Ordering::SeqCst);
            if page >= self.max_pages {
                break;
            }
            let request = PageRequest {
                criteria: Arc::clone(&self.criteria),
                offset: page * self.page_size,
                page_size: self.page_size,
            };

            let result = tokio::select! {
                biased;
                () = self.abort.cancelled() => break,
                result = self.pages.fetch(&request) => result,
            };

            match result {
                Ok(summaries) if summaries.is_empty() => {
                    let _ = self.tx.send(WorkerMessage::PageEmpty {
                        offset: request.offset,
                    });
                    break;
                }
                Ok(summaries) => {
                    let found = summaries.len();
                    backlog.extend(summaries.into_iter().enumerate().map(|(position, summary)| {
                        Pending {
                            offset: request.offset,
                            position,
                            summary,
                        }
                    }));
                    let (fresh, duplicates) = self.admit(&mut backlog);
                    let _ = self.tx.send(WorkerMessage::PageFetched {
                        offset: request.offset,
                        found,
                        admitted: fresh.len(),
                        duplicates,
                        deferred: backlog.len(),
                    });
                    self.enrich(fresh).await;
                }
                Err(error) => {
                    let _ = self.tx.send(WorkerMessage::PageFailed {
                        offset: request.offset,
                        error,
                    });
                }
            }
        }
    }

    /// Take summaries off the front of `backlog` while slots are free and
    /// keep the ones no other worker has claimed. Returns them with the
    /// number of duplicates dropped.
    fn admit(&self, backlog: &mut VecDeque<Pending>) -> (Vec<Pending>, usize) {
        let mut fresh = Vec::new();
        let mut duplicates = 0;

        while !backlog.is_empty() && self.capacity.try_reserve() {
            let Some(pending) = backlog.pop_front() else {
                self.capacity.release();
                break;
            };
            if self.dedup.admit(&pending.summary.job_id) {
                fresh.push(pending);
            } else {
                self.capacity.release();
                duplicates += 1;
            }
        }
        (fresh, duplicates)
    }

    async fn enrich(&self, fresh: Vec<Pending>) {
        let fetches = fresh.into_iter().map(|pending| async move {
            let permit = tokio::select! {
                biased;
                () = self.abort.cancelled() => return,
                permit = self.detail_permits.acquire() => permit,
            };
            let Ok(_permit) = permit else {
                return;
            };

            let result = tokio::select! {
                biased;
                () = self.abort.cancelled() => return,
                result = self.details.fetch(&pending.summary) => result,
            };
            if result.is_err() && self.policy == DetailFailurePolicy::Drop {
                self.capacity.release();
            }
            let _ = self.tx.send(WorkerMessage::Detail {
                offset: pending.offset,
                position: pending.position,
                summary: pending.summary,
                result,
            });
        });
        futures::future::join_all(fetches).await;
    }
}

/// Aggregator-owned run state.
struct HarvestState {
    target: usize,
    max_page_failures: usize,
    policy: DetailFailurePolicy,
    records: Vec<(usize, usize, JobRecord)>,
    stop_reason: Option<StopReason>,
    pages_fetched: usize,
    page_failures: usize,
    duplicates_skipped: usize,
    skipped_detail_failures: usize,
    degraded_records: usize,
}

impl HarvestState {
    /// Record a stop condition. End of results is soft and may be
    /// superseded by any other reason; the first hard reason wins.
    fn stop(&mut self, reason: StopReason) -> bool {
        match self.stop_reason {
            None => {}
            Some(StopReason::ExhaustedResults) if reason.aborts() => {}
            Some(_) => return false,
        }
        self.stop_reason = Some(reason);
        true
    }

    fn apply<R: HarvestReporter>(&mut self, message: WorkerMessage, reporter: &R) -> Option<StopReason> {
        match message {
            WorkerMessage::PageFetched {
                offset,
                found,
                admitted,
                duplicates,
                deferred,
            } => {
                self.pages_fetched += 1;
                self.duplicates_skipped += duplicates;
                reporter.report(HarvestEvent::PageFetched {
                    offset,
                    found,
                    admitted,
                    duplicates,
                    deferred,
                });
                None
            }
            WorkerMessage::BacklogResumed {
                admitted,
                duplicates,
                remaining,
            } => {
                self.duplicates_skipped += duplicates;
                reporter.report(HarvestEvent::BacklogResumed {
                    admitted,
                    duplicates,
                    remaining,
                });
                None
            }
            WorkerMessage::PageEmpty { offset } => {
                self.pages_fetched += 1;
                reporter.report(HarvestEvent::EndOfResults { offset });
                Some(StopReason::ExhaustedResults)
            }
            WorkerMessage::PageFailed { offset, error } => {
                self.page_failures += 1;
                reporter.report(HarvestEvent::PageFailed {
                    offset,
                    error: &error,
                    failures: self.page_failures,
                });
                (error.is_fatal() || self.page_failures >= self.max_page_failures)
                    .then_some(StopReason::FatalError)
            }
            WorkerMessage::Detail {
                offset,
                position,
                summary,
                result,
            } => {
                if self.records.len() >= self.target {
                    return None;
                }
                let record = match result {
                    Ok(record) => record,
                    Err(error) if error.is_fatal() => {
                        reporter.report(HarvestEvent::DetailFailed {
                            job_id: &summary.job_id,
                            error: &error,
                            kept_degraded: false,
                        });
                        return Some(StopReason::FatalError);
                    }
                    Err(error) => {
                        let kept_degraded = self.policy == DetailFailurePolicy::Degrade;
                        reporter.report(HarvestEvent::DetailFailed {
                            job_id: &summary.job_id,
                            error: &error,
                            kept_degraded,
                        });
                        if !kept_degraded {
                            self.skipped_detail_failures += 1;
                            return None;
                        }
                        self.degraded_records += 1;
                        JobRecord::degraded(summary)
                    }
                };

                reporter.report(HarvestEvent::RecordCollected {
                    job_id: record.job_id(),
                    collected: self.records.len() + 1,
                    target: self.target,
                });
                self.records.push((offset, position, record));
                (self.records.len() >= self.target).then_some(StopReason::TargetReached)
            }
        }
    }
}

/// Drives a harvest run: paging, dedup, enrichment and termination.
pub struct HarvestOrchestrator<P, D>
where
    P: PageFetcher,
    D: DetailFetcher,
{
    pages: P,
    details: D,
    config: HarvestConfig,
}

impl<P, D> HarvestOrchestrator<P, D>
where
    P: PageFetcher,
    D: DetailFetcher,
{
    /// Fails with [`HarvestError::ConfigurationInvalid`] before any network
    /// activity if the configuration is unusable.
    pub fn new(pages: P, details: D, config: HarvestConfig) -> Result<Self, HarvestError> {
        config.validate()?;
        Ok(Self {
            pages,
            details,
            config,
        })
    }

    pub fn config(&self) -> &HarvestConfig {
        &self.config
    }

    /// Run one harvest until a stop condition, the page budget or `cancel`.
    ///
    /// Never fails: partial results are returned with a non-Completed phase.
    pub async fn run<R: HarvestReporter>(
        &self,
        criteria: SearchCriteria,
        cancel: CancellationToken,
        reporter: &R,
    ) -> HarvestOutcome {
        let started = Instant::now();
        let run_id = Uuid::new_v4();
        let criteria = Arc::new(criteria);

        reporter.report(HarvestEvent::Started {
            run_id,
            criteria: &criteria,
            target: self.config.target_count,
        });

        let abort = CancellationToken::new();
        let halt = abort.child_token();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let cursor = Arc::new(AtomicUsize::new(0));
        let dedup = Arc::new(Deduplicator::new());
        let capacity = Arc::new(Capacity::new(self.config.target_count));
        let detail_permits = Arc::new(Semaphore::new(self.config.detail_concurrency));

        let mut workers = JoinSet::new();
        for _ in 0..self.config.concurrency.min(self.config.max_pages) {
            let worker = Worker {
                pages: self.pages.clone(),
                details: self.details.clone(),
                criteria: Arc::clone(&criteria),
                page_size: self.config.page_size,
                max_pages: self.config.max_pages,
                policy: self.config.detail_failure_policy,
                cursor: Arc::clone(&cursor),
                dedup: Arc::clone(&dedup),
                capacity: Arc::clone(&capacity),
                detail_permits: Arc::clone(&detail_permits),
                halt: halt.clone(),
                abort: abort.clone(),
                tx: tx.clone(),
            };
            workers.spawn(worker.run());
        }
        drop(tx);

        let mut state = HarvestState {
            target: self.config.target_count,
            max_page_failures: self.config.max_page_failures,
            policy: self.config.detail_failure_policy,
            records: Vec::new(),
            stop_reason: None,
            pages_fetched: 0,
            page_failures: 0,
            duplicates_skipped: 0,
            skipped_detail_failures: 0,
            degraded_records: 0,
        };

        let overall_timeout = self.config.overall_timeout;
        let deadline = async move {
            match overall_timeout {
                Some(timeout) => tokio::time::sleep(timeout).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::pin!(deadline);

        loop {
            let aborting = abort.is_cancelled();
            let reason = tokio::select! {
                message = rx.recv() => match message {
                    Some(message) => state.apply(message, reporter),
                    None => break,
                },
                () = &mut deadline, if !aborting => Some(StopReason::TimedOut),
                () = cancel.cancelled(), if !aborting => Some(StopReason::Cancelled),
            };

            if let Some(reason) = reason
                && state.stop(reason)
            {
                reporter.report(HarvestEvent::Stopping { reason });
                if reason.aborts() {
                    abort.cancel();
                } else {
                    halt.cancel();
                }
            }
        }

        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                tracing::error!(error = %e, "Harvest worker panicked");
            }
        }

        let mut records = state.records;
        records.sort_by_key(|(offset, position, _)| (*offset, *position));
        let mut records: Vec<JobRecord> = records.into_iter().map(|(_, _, record)| record).collect();
        records.truncate(self.config.target_count);

        let summary = RunSummary {
            run_id,
            requested: self.config.target_count,
            collected: records.len(),
            skipped_detail_failures: state.skipped_detail_failures,
            degraded_records: state.degraded_records,
            pages_fetched: state.pages_fetched,
            page_failures: state.page_failures,
            duplicates_skipped: state.duplicates_skipped,
            stop_reason: state.stop_reason,
            phase: HarvestPhase::from_stop(state.stop_reason),
            elapsed: started.elapsed(),
        };
        reporter.report(HarvestEvent::Finished { summary: &summary });

        HarvestOutcome { records, summary }
    }
}
