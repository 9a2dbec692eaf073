//! # Stage Runner
//!
//! Generic engine shared by every claim-based stage:
//!
//! 1. recovery sweep for the stage's in-progress status
//! 2. claim the oldest claimable row, or stop when there is none
//! 3. run the worker's collaborator call, raced against cancellation
//! 4. write the success outcome, or the failure status for the row
//! 5. pace, then go back to 2
//!
//! A failing job never stops the loop. Only store failures during the sweep
//! or a claim, and cancellation, end the stage early.

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::crawling::orchestrator::PipelineError;
use crate::crawling::pacing::PacingController;
use crate::crawling::state::StageStats;
use crate::domain::{CrawlStage, FetchStatus, ParseStatus};
use crate::infrastructure::{ClaimSpec, ClaimedJob, JobStore, ParsingError, RenderError, StatusKind, StatusUpdate};

/// Per-job failures; each one becomes a failure status on the claimed row
#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Job has no source URL")]
    MissingUrl,

    #[error("Job has no document reference")]
    MissingDocumentRef,

    #[error("Document {0} is missing on disk")]
    MissingDocument(String),

    #[error("Render failed: {0}")]
    Render(#[from] RenderError),

    #[error("Parse failed: {0}")]
    Parse(#[from] ParsingError),

    #[error("Extractor found nothing to record")]
    EmptyExtraction,

    #[error("Storage error: {0:#}")]
    Storage(anyhow::Error),
}

impl From<anyhow::Error> for WorkerError {
    fn from(error: anyhow::Error) -> Self {
        Self::Storage(error)
    }
}

/// One stage's behaviour plugged into the runner
#[async_trait]
pub trait Worker: Send + Sync {
    /// Result of the collaborator call, handed to `record_success`
    type Output: Send;

    fn stage(&self) -> CrawlStage;

    fn claim_spec(&self) -> ClaimSpec;

    /// The collaborator call for one job. May be abandoned at any await
    /// point when the run is cancelled, so it must not write job state.
    async fn process(&self, job: &ClaimedJob) -> Result<Self::Output, WorkerError>;

    /// Writes the success outcome. Runs to completion once started.
    async fn record_success(&self, job: &ClaimedJob, output: Self::Output) -> Result<(), WorkerError>;

    /// Terminal status for a failed job
    fn failure_status(&self, error: &WorkerError) -> StatusUpdate {
        match (self.claim_spec().kind, error) {
            (StatusKind::Fetch, WorkerError::MissingUrl) => StatusUpdate::Fetch(FetchStatus::FailedUnfetchable),
            (StatusKind::Fetch, _) => StatusUpdate::Fetch(FetchStatus::Failed),
            (StatusKind::Parse, _) => StatusUpdate::Parse(ParseStatus::ParsingFailed),
        }
    }
}

pub struct StageRunner {
    store: JobStore,
    cancel: CancellationToken,
    pacing: PacingController,
}

impl StageRunner {
    pub fn new(store: JobStore, cancel: CancellationToken, pacing: PacingController) -> Self {
        Self { store, cancel, pacing }
    }

    /// Runs `worker` until its stage has no claimable rows left
    pub async fn run<W: Worker>(&mut self, worker: &W) -> Result<StageStats, PipelineError> {
        let stage = worker.stage();
        let spec = worker.claim_spec();
        let mut stats = StageStats::default();

        stats.recovered = self
            .store
            .recover_stale(spec)
            .await
            .map_err(|error| PipelineError::Store { stage, error })?;
        if stats.recovered > 0 {
            warn!(count = stats.recovered, "Recovered jobs left in progress by a previous run");
        }

        loop {
            if self.cancel.is_cancelled() {
                return Err(PipelineError::Cancelled { stage });
            }

            let Some(job) = self
                .store
                .claim_one(spec)
                .await
                .map_err(|error| PipelineError::Store { stage, error })?
            else {
                break;
            };
            stats.claimed += 1;
            info!(job_id = job.id, url = job.url.as_deref().unwrap_or("<none>"), "Claimed job");

            let processed = tokio::select! {
                biased;
                () = self.cancel.cancelled() => None,
                result = worker.process(&job) => Some(result),
            };
            let Some(result) = processed else {
                self.release_after_cancel(spec, &job).await;
                return Err(PipelineError::Cancelled { stage });
            };

            let result = match result {
                Ok(output) => worker.record_success(&job, output).await,
                Err(e) => Err(e),
            };

            match result {
                Ok(()) => {
                    stats.succeeded += 1;
                    info!(job_id = job.id, "Job succeeded");
                    if !self.pacing.pause(&self.cancel).await {
                        return Err(PipelineError::Cancelled { stage });
                    }
                }
                Err(e) => self.record_failure(worker, &job, &e, &mut stats).await,
            }
        }

        info!(%stats, "Stage finished");
        Ok(stats)
    }

    async fn record_failure<W: Worker>(&self, worker: &W, job: &ClaimedJob, failure: &WorkerError, stats: &mut StageStats) {
        let status = worker.failure_status(failure);
        if status == StatusUpdate::Fetch(FetchStatus::FailedUnfetchable) {
            stats.unfetchable += 1;
        } else {
            stats.failed += 1;
        }

        warn!(
            job_id = job.id,
            url = job.url.as_deref().unwrap_or("<none>"),
            error = %failure,
            status = ?status,
            "Job failed"
        );

        if let Err(e) = self.store.update_status(worker.claim_spec().table, job.id, status).await {
            error!(
                job_id = job.id,
                error = %format!("{e:#}"),
                "Could not record failure; job stays in progress until the next recovery sweep"
            );
        }
    }

    async fn release_after_cancel(&self, spec: ClaimSpec, job: &ClaimedJob) {
        match self.store.release(spec, job.id).await {
            Ok(_) => info!(job_id = job.id, "Cancelled; job returned to pending"),
            Err(e) => error!(
                job_id = job.id,
                error = %format!("{e:#}"),
                "Cancelled; job could not be released and will be recovered on the next run"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::{DatabaseConnection, JobTable};
    use std::collections::HashSet;
    use std::sync::Mutex;

    /// Fails the listed ids, optionally cancels the run while processing one
    struct ScriptedWorker {
        store: JobStore,
        fail: HashSet<i64>,
        cancel_on: Option<(i64, CancellationToken)>,
        seen: Mutex<Vec<i64>>,
    }

    #[async_trait]
    impl Worker for ScriptedWorker {
        type Output = ();

        fn stage(&self) -> CrawlStage {
            CrawlStage::ListFetch
        }

        fn claim_spec(&self) -> ClaimSpec {
            ClaimSpec::fetch(JobTable::ListingPages)
        }

        async fn process(&self, job: &ClaimedJob) -> Result<(), WorkerError> {
            self.seen.lock().unwrap().push(job.id);
            if let Some((id, token)) = &self.cancel_on {
                if *id == job.id {
                    token.cancel();
                    std::future::pending::<()>().await;
                }
            }
            if self.fail.contains(&job.id) {
                return Err(WorkerError::Render(RenderError::NotReady {
                    url: job.url.clone().unwrap_or_default(),
                    selector: "li".to_string(),
                }));
            }
            Ok(())
        }

        async fn record_success(&self, job: &ClaimedJob, _output: ()) -> Result<(), WorkerError> {
            self.store
                .complete_fetch(JobTable::ListingPages, job.id, &format!("listing_{}.html", job.id), || Ok(()))
                .await?;
            Ok(())
        }
    }

    async fn store_with_listings(count: usize) -> anyhow::Result<JobStore> {
        let db = DatabaseConnection::in_memory().await?;
        let store = JobStore::new(db.pool().clone());
        for page in 1..=count {
            store.insert_listing_if_absent(&format!("https://shop.test/?page={page}")).await?;
        }
        Ok(store)
    }

    #[tokio::test]
    async fn test_failures_do_not_stop_the_stage() -> anyhow::Result<()> {
        let store = store_with_listings(3).await?;
        let worker = ScriptedWorker {
            store: store.clone(),
            fail: HashSet::from([2]),
            cancel_on: None,
            seen: Mutex::new(Vec::new()),
        };

        let mut runner = StageRunner::new(store.clone(), CancellationToken::new(), PacingController::disabled());
        let stats = runner.run(&worker).await?;

        assert_eq!(*worker.seen.lock().unwrap(), vec![1, 2, 3]);
        assert_eq!(stats.claimed, 3);
        assert_eq!(stats.succeeded, 2);
        assert_eq!(stats.failed, 1);

        let statuses: Vec<_> = store.listings().await?.into_iter().map(|l| l.fetch_status).collect();
        assert_eq!(statuses, vec![FetchStatus::Fetched, FetchStatus::Failed, FetchStatus::Fetched]);
        Ok(())
    }

    #[tokio::test]
    async fn test_cancellation_releases_claimed_job() -> anyhow::Result<()> {
        let store = store_with_listings(3).await?;
        let cancel = CancellationToken::new();
        let worker = ScriptedWorker {
            store: store.clone(),
            fail: HashSet::new(),
            cancel_on: Some((2, cancel.clone())),
            seen: Mutex::new(Vec::new()),
        };

        let mut runner = StageRunner::new(store.clone(), cancel, PacingController::disabled());
        let result = runner.run(&worker).await;

        assert!(matches!(result, Err(PipelineError::Cancelled { stage: CrawlStage::ListFetch })));
        let statuses: Vec<_> = store.listings().await?.into_iter().map(|l| l.fetch_status).collect();
        assert_eq!(statuses, vec![FetchStatus::Fetched, FetchStatus::Pending, FetchStatus::Pending]);
        Ok(())
    }

    #[tokio::test]
    async fn test_stale_jobs_are_recovered_before_claiming() -> anyhow::Result<()> {
        let store = store_with_listings(2).await?;
        let spec = ClaimSpec::fetch(JobTable::ListingPages);
        store.claim_one(spec).await?;

        let worker = ScriptedWorker {
            store: store.clone(),
            fail: HashSet::new(),
            cancel_on: None,
            seen: Mutex::new(Vec::new()),
        };
        let mut runner = StageRunner::new(store.clone(), CancellationToken::new(), PacingController::disabled());
        let stats = runner.run(&worker).await?;

        assert_eq!(stats.recovered, 1);
        assert_eq!(stats.succeeded, 2);
        assert_eq!(*worker.seen.lock().unwrap(), vec![1, 2]);
        Ok(())
    }
}
