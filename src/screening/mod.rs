//! Screening job controller and the ranked fund dataset it maintains.
//!
//! A single background job fetches every fund in the selected universe,
//! derives risk metrics and then ranks each fund within its type cohort.
//! The job runs on its own task and is stopped cooperatively: the
//! cancellation token is checked before each fund is started, and results
//! already written stay in the dataset.

pub mod dataset;
pub mod metrics;
pub mod query;
pub mod ranking;

pub use dataset::{ScreeningDataset, ScreeningRecord, TypeCount};
pub use metrics::RiskMetrics;
pub use query::{QueryPage, ScreeningQuery, SortField, Strategy, strategies};
pub use ranking::RankPercentiles;

use crate::core::fund::market_offset;
use crate::core::{FundDataProvider, ServiceError, ServiceResult};
use crate::search::FundSearchIndex;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Idle,
    Running,
    Stopping,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobOutcome {
    Completed,
    Cancelled,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatus {
    pub state: JobState,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub progress_count: usize,
    pub total_count: usize,
    pub failed_count: usize,
    pub error: Option<String>,
    pub last_outcome: Option<JobOutcome>,
}

impl Default for JobStatus {
    fn default() -> Self {
        Self {
            state: JobState::Idle,
            started_at: None,
            finished_at: None,
            progress_count: 0,
            total_count: 0,
            failed_count: 0,
            error: None,
            last_outcome: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StartOptions {
    /// Explicit universe. When absent the search index supplies it.
    pub fund_codes: Option<Vec<String>>,
    /// Fund type filters applied to the search index universe
    pub fund_types: Option<Vec<String>>,
    pub limit: Option<usize>,
    /// Funds fetched in parallel; the configured default when absent
    pub concurrency: Option<usize>,
}

#[derive(Default)]
struct Job {
    status: JobStatus,
    cancel: Option<CancellationToken>,
}

struct Inner {
    provider: Arc<dyn FundDataProvider>,
    search: Arc<FundSearchIndex>,
    dataset: ScreeningDataset,
    job: Mutex<Job>,
    default_concurrency: usize,
}

#[derive(Clone)]
pub struct ScreeningController {
    inner: Arc<Inner>,
}

impl ScreeningController {
    pub fn new(
        provider: Arc<dyn FundDataProvider>,
        search: Arc<FundSearchIndex>,
        dataset: ScreeningDataset,
        default_concurrency: usize,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                provider,
                search,
                dataset,
                job: Mutex::new(Job::default()),
                default_concurrency: default_concurrency.max(1),
            }),
        }
    }

    pub async fn status(&self) -> JobStatus {
        self.inner.job.lock().await.status.clone()
    }

    /// Starts a refresh cycle in the background. Fails without touching the
    /// current job when one is already active.
    pub async fn start(&self, options: StartOptions) -> ServiceResult<JobStatus> {
        let mut job = self.inner.job.lock().await;
        if job.status.state != JobState::Idle {
            return Err(ServiceError::AlreadyRunning);
        }

        let token = CancellationToken::new();
        job.status = JobStatus {
            state: JobState::Running,
            started_at: Some(Utc::now()),
            last_outcome: job.status.last_outcome,
            ..JobStatus::default()
        };
        job.cancel = Some(token.clone());
        let status = job.status.clone();
        drop(job);

        info!("Screening job started");
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move { inner.run(options, token).await });
        Ok(status)
    }

    /// Requests cancellation of the running job.
    pub async fn stop(&self) -> ServiceResult<JobStatus> {
        let mut job = self.inner.job.lock().await;
        match job.status.state {
            JobState::Running => {
                job.status.state = JobState::Stopping;
                if let Some(token) = &job.cancel {
                    token.cancel();
                }
                info!("Screening job stop requested");
                Ok(job.status.clone())
            }
            JobState::Stopping => Ok(job.status.clone()),
            JobState::Idle => Err(ServiceError::NotRunning),
        }
    }

    /// Refreshes one fund right away, independent of any running job, and
    /// re-ranks its cohort.
    pub async fn update_single(&self, fund_code: &str) -> ServiceResult<ScreeningRecord> {
        let record = self.inner.fetch_record(fund_code).await?;
        let fund_type = record.fund_type.clone();
        self.inner.dataset.upsert(record);
        self.inner.dataset.rerank(Some(&fund_type));
        self.inner
            .dataset
            .persist()
            .await
            .map_err(ServiceError::storage)?;
        self.inner
            .dataset
            .get(fund_code)
            .ok_or_else(|| ServiceError::NotFound(format!("Fund {fund_code}")))
    }

    /// Recomputes every rank from stored returns without contacting upstream.
    pub async fn recalculate_rankings(&self) -> ServiceResult<usize> {
        let touched = self.inner.dataset.rerank(None);
        self.inner
            .dataset
            .persist()
            .await
            .map_err(ServiceError::storage)?;
        info!(
            "Recalculated rankings for {} of {} funds",
            touched,
            self.inner.dataset.record_count()
        );
        Ok(touched)
    }

    pub fn query(&self, query: &ScreeningQuery) -> QueryPage {
        query.apply(self.inner.dataset.snapshot())
    }

    pub fn fund(&self, fund_code: &str) -> ServiceResult<ScreeningRecord> {
        self.inner
            .dataset
            .get(fund_code)
            .ok_or_else(|| ServiceError::NotFound(format!("Screening record for {fund_code}")))
    }

    pub fn available_types(&self) -> Vec<TypeCount> {
        self.inner.dataset.type_counts()
    }

    pub fn strategies(&self) -> Vec<Strategy> {
        strategies()
    }
}

impl Inner {
    async fn fetch_record(&self, fund_code: &str) -> ServiceResult<ScreeningRecord> {
        let snapshot = self
            .provider
            .fetch_fund(fund_code)
            .await
            .map_err(ServiceError::upstream)?;
        let fund_type = self.search.lookup(fund_code).await.map(|f| f.fund_type);
        let now = Utc::now();
        let as_of = now.with_timezone(&market_offset()).date_naive();
        Ok(ScreeningRecord::from_snapshot(snapshot, fund_type, as_of, now))
    }

    async fn universe(&self, options: &StartOptions) -> ServiceResult<Vec<String>> {
        let mut codes = match &options.fund_codes {
            Some(codes) => {
                let mut seen = HashSet::new();
                codes
                    .iter()
                    .map(|c| c.trim().to_string())
                    .filter(|c| !c.is_empty() && seen.insert(c.clone()))
                    .collect()
            }
            None => {
                self.search.ensure_populated().await?;
                self.search
                    .entries(options.fund_types.as_deref())
                    .await
                    .into_iter()
                    .map(|f| f.code)
                    .collect::<Vec<_>>()
            }
        };
        if let Some(limit) = options.limit {
            codes.truncate(limit);
        }
        Ok(codes)
    }

    async fn record_progress(&self, succeeded: bool) {
        let mut job = self.job.lock().await;
        job.status.progress_count += 1;
        if !succeeded {
            job.status.failed_count += 1;
        }
    }

    async fn finish(&self, outcome: JobOutcome, error: Option<String>) {
        let mut job = self.job.lock().await;
        job.status.state = JobState::Idle;
        job.status.finished_at = Some(Utc::now());
        job.status.last_outcome = Some(outcome);
        job.status.error = error;
        job.cancel = None;
        info!(
            ?outcome,
            progress = job.status.progress_count,
            total = job.status.total_count,
            failed = job.status.failed_count,
            "Screening job finished"
        );
    }

    async fn run(self: Arc<Self>, options: StartOptions, token: CancellationToken) {
        let resolved = tokio::select! {
            _ = token.cancelled() => None,
            resolved = self.universe(&options) => Some(resolved),
        };
        let codes = match resolved {
            None => {
                info!("Screening job stopped while resolving its fund universe");
                self.finish(JobOutcome::Cancelled, None).await;
                return;
            }
            Some(Ok(codes)) => codes,
            Some(Err(e)) => {
                error!(error = %e, "Screening job could not resolve its fund universe");
                self.finish(JobOutcome::Failed, Some(e.to_string())).await;
                return;
            }
        };
        self.job.lock().await.status.total_count = codes.len();
        debug!("Screening {} funds", codes.len());

        let concurrency = options.concurrency.unwrap_or(self.default_concurrency).max(1);
        let mut results = futures::stream::iter(codes)
            .map(|code| {
                let inner = Arc::clone(&self);
                let token = token.clone();
                async move {
                    if token.is_cancelled() {
                        return None;
                    }
                    let result = inner.fetch_record(&code).await;
                    Some((code, result))
                }
            })
            .buffer_unordered(concurrency);

        while let Some(item) = results.next().await {
            let Some((code, result)) = item else {
                continue;
            };
            match result {
                Ok(record) => {
                    self.dataset.upsert(record);
                    self.record_progress(true).await;
                }
                Err(e) => {
                    warn!(fund_code = %code, error = %e, "Failed to screen fund");
                    self.record_progress(false).await;
                }
            }
        }
        drop(results);

        self.dataset.rerank(None);
        let persist_error = match self.dataset.persist().await {
            Ok(()) => None,
            Err(e) => {
                let message = format!("{e:#}");
                error!(error = %message, "Failed to persist screening records");
                Some(message)
            }
        };

        let outcome = if token.is_cancelled() {
            JobOutcome::Cancelled
        } else if persist_error.is_some() {
            JobOutcome::Failed
        } else {
            JobOutcome::Completed
        };
        self.finish(outcome, persist_error).await;
    }
}
