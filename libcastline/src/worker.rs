//! Worker pool
//!
//! Claims due jobs from the queue and runs the publication handler on each,
//! with at most `concurrency` jobs in flight. Handler results are reported
//! back to the queue: successes and skips complete the job, an all-failed
//! attempt or a store error goes through the retry policy, and a job whose
//! post is gone is dead-lettered immediately.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::db::Database;
use crate::error::Result;
use crate::handler::{HandlerOutcome, PublicationHandler};
use crate::queue::{FailOutcome, Job, JobQueue, JobState};
use crate::service::events::{Event, EventBus};

/// How one job run ended, from the queue's point of view
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobDisposition {
    Published,
    Skipped,
    Retrying,
    DeadLettered,
    /// The queue could not be updated; the lease will expire and the job is redelivered
    Errored,
}

/// Counts of job dispositions over one run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct RunSummary {
    pub published: usize,
    pub skipped: usize,
    pub retrying: usize,
    pub dead_lettered: usize,
    pub errored: usize,
}

impl RunSummary {
    fn record(&mut self, disposition: JobDisposition) {
        match disposition {
            JobDisposition::Published => self.published += 1,
            JobDisposition::Skipped => self.skipped += 1,
            JobDisposition::Retrying => self.retrying += 1,
            JobDisposition::DeadLettered => self.dead_lettered += 1,
            JobDisposition::Errored => self.errored += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.published + self.skipped + self.retrying + self.dead_lettered + self.errored
    }
}

#[derive(Clone)]
pub struct Worker {
    db: Database,
    queue: JobQueue,
    handler: PublicationHandler,
    events: EventBus,
    concurrency: usize,
    poll_interval: Duration,
}

impl Worker {
    pub fn new(
        db: Database,
        queue: JobQueue,
        handler: PublicationHandler,
        events: EventBus,
        concurrency: usize,
        poll_interval: Duration,
    ) -> Self {
        Self {
            db,
            queue,
            handler,
            events,
            concurrency: concurrency.max(1),
            poll_interval,
        }
    }

    /// Run one claimed job to completion and report the result to the queue.
    pub async fn process(&self, job: Job) -> JobDisposition {
        match self.handler.handle(&job).await {
            Ok(HandlerOutcome::Published(_)) => self.complete(&job, JobDisposition::Published).await,
            Ok(HandlerOutcome::Skipped(_)) => self.complete(&job, JobDisposition::Skipped).await,
            Ok(HandlerOutcome::Failed(report)) => {
                self.fail(&job, &report.failure_summary()).await
            }
            Ok(HandlerOutcome::PostMissing) => self.bury(&job, "post not found").await,
            Err(e) => {
                error!(job_id = %job.id, post_id = %job.post_id, error = %e, "Publication handler error");
                self.fail(&job, &e.to_string()).await
            }
        }
    }

    async fn complete(&self, job: &Job, disposition: JobDisposition) -> JobDisposition {
        match self.queue.complete(&job.id).await {
            Ok(_) => disposition,
            Err(e) => {
                error!(job_id = %job.id, error = %e, "Failed to complete job");
                JobDisposition::Errored
            }
        }
    }

    async fn fail(&self, job: &Job, reason: &str) -> JobDisposition {
        match self.queue.fail(&job.id, reason).await {
            Ok(FailOutcome::Retrying {
                attempt,
                next_run_at_ms,
            }) => {
                info!(job_id = %job.id, post_id = %job.post_id, attempt, next_run_at_ms, "Job will retry");
                self.events.emit(Event::JobRetryScheduled {
                    job_id: job.id.clone(),
                    post_id: job.post_id.clone(),
                    attempt,
                    next_run_at_ms,
                });
                JobDisposition::Retrying
            }
            Ok(FailOutcome::Dead { attempts }) => {
                error!(job_id = %job.id, post_id = %job.post_id, attempts, reason, "Job dead-lettered after retries");
                self.dead_lettered(job, reason).await
            }
            Err(e) => {
                error!(job_id = %job.id, error = %e, "Failed to report job failure");
                JobDisposition::Errored
            }
        }
    }

    async fn bury(&self, job: &Job, reason: &str) -> JobDisposition {
        match self.queue.bury(&job.id, reason).await {
            Ok(_) => {
                error!(job_id = %job.id, post_id = %job.post_id, reason, "Job dead-lettered");
                self.dead_lettered(job, reason).await
            }
            Err(e) => {
                error!(job_id = %job.id, error = %e, "Failed to dead-letter job");
                JobDisposition::Errored
            }
        }
    }

    async fn dead_lettered(&self, job: &Job, reason: &str) -> JobDisposition {
        self.settle_dead(&job.id, &job.post_id, reason).await
    }

    /// Release the post's handle (publishing becomes failed) and announce the dead letter
    async fn settle_dead(&self, job_id: &str, post_id: &str, reason: &str) -> JobDisposition {
        if let Err(e) = self.db.release_job_handle(post_id, job_id).await {
            warn!(job_id, post_id, error = %e, "Failed to release job handle");
        }
        self.events.emit(Event::JobDeadLettered {
            job_id: job_id.to_string(),
            post_id: post_id.to_string(),
            reason: reason.to_string(),
        });
        JobDisposition::DeadLettered
    }

    /// Release expired leases, settle the jobs that died with them, and
    /// prune old completed jobs.
    async fn housekeeping(&self, summary: &mut RunSummary) -> Result<()> {
        for stalled in self.queue.recover_stalled().await? {
            if stalled.state != JobState::Dead {
                continue;
            }
            let reason = stalled.last_error.as_deref().unwrap_or("lease expired");
            error!(
                job_id = %stalled.job_id,
                post_id = %stalled.post_id,
                reason,
                "Stalled job dead-lettered after retries"
            );
            summary.record(self.settle_dead(&stalled.job_id, &stalled.post_id, reason).await);
        }

        if let Err(e) = self.queue.prune_completed().await {
            warn!(error = %e, "Pruning completed jobs failed");
        }
        Ok(())
    }

    /// Process every job that is due now, then return.
    pub async fn run_once(&self) -> Result<RunSummary> {
        self.run_loop(None).await
    }

    /// Keep processing until `shutdown` is set, then drain in-flight jobs.
    pub async fn run(&self, shutdown: Arc<AtomicBool>) -> Result<RunSummary> {
        self.run_loop(Some(shutdown)).await
    }

    async fn run_loop(&self, shutdown: Option<Arc<AtomicBool>>) -> Result<RunSummary> {
        let mut summary = RunSummary::default();
        let mut tasks = JoinSet::new();

        self.housekeeping(&mut summary).await?;

        loop {
            let stopping = shutdown
                .as_ref()
                .map(|flag| flag.load(Ordering::Relaxed))
                .unwrap_or(false);

            let mut queue_drained = false;
            while !stopping && tasks.len() < self.concurrency {
                match self.queue.claim_next().await {
                    Ok(Some(job)) => {
                        debug!(job_id = %job.id, post_id = %job.post_id, "Claimed job");
                        let worker = self.clone();
                        tasks.spawn(async move { worker.process(job).await });
                    }
                    Ok(None) => {
                        queue_drained = true;
                        break;
                    }
                    Err(e) => {
                        error!(error = %e, "Failed to claim job");
                        queue_drained = true;
                        break;
                    }
                }
            }

            if tasks.is_empty() {
                if stopping || shutdown.is_none() {
                    break;
                }
                self.idle(shutdown.as_deref()).await;
                if let Err(e) = self.housekeeping(&mut summary).await {
                    warn!(error = %e, "Stalled job recovery failed");
                }
                continue;
            }

            if queue_drained && !stopping {
                // Wake for either a finished job or the next poll
                tokio::select! {
                    joined = tasks.join_next() => {
                        if let Some(result) = joined {
                            record_join(&mut summary, result);
                        }
                    }
                    _ = tokio::time::sleep(self.poll_interval) => {}
                }
            } else if let Some(result) = tasks.join_next().await {
                record_join(&mut summary, result);
            }
        }

        if summary.total() > 0 {
            info!(
                published = summary.published,
                retrying = summary.retrying,
                dead_lettered = summary.dead_lettered,
                skipped = summary.skipped,
                "Worker run finished"
            );
        }
        Ok(summary)
    }

    /// Sleep one poll interval, waking early on shutdown
    async fn idle(&self, shutdown: Option<&AtomicBool>) {
        let step = Duration::from_millis(100)
            .min(self.poll_interval)
            .max(Duration::from_millis(1));
        let mut waited = Duration::ZERO;
        while waited < self.poll_interval {
            if shutdown.map(|flag| flag.load(Ordering::Relaxed)).unwrap_or(false) {
                return;
            }
            tokio::time::sleep(step).await;
            waited += step;
        }
    }
}

fn record_join(
    summary: &mut RunSummary,
    result: std::result::Result<JobDisposition, tokio::task::JoinError>,
) {
    match result {
        Ok(disposition) => summary.record(disposition),
        Err(e) => {
            error!(error = %e, "Job task panicked");
            summary.record(JobDisposition::Errored);
        }
    }
}
