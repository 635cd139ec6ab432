//! Periodic dispatch of unfinished jobs.
//!
//! Each run picks the oldest pending or processing jobs, takes a lease on
//! each and dispatches one batch. A job whose lease is still held by an
//! overlapping run is skipped. The lease lasts until the dispatch call
//! returns; batch leases keep concurrent workers apart after that.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, info_span, Instrument};

use crate::config::SchedulerConfig;
use crate::db::{job_repo, now_millis, Database};
use crate::error::JobError;

use super::{DispatchResult, JobDispatcher};

pub struct JobScheduler {
    db: Database,
    dispatcher: Arc<dyn JobDispatcher>,
    config: SchedulerConfig,
    trigger: broadcast::Sender<()>,
}

impl JobScheduler {
    pub fn new(db: Database, dispatcher: Arc<dyn JobDispatcher>, config: SchedulerConfig) -> Self {
        let (trigger, _) = broadcast::channel(16);
        Self {
            db,
            dispatcher,
            config,
            trigger,
        }
    }

    /// Asks the background loop for an extra run.
    pub fn trigger(&self) {
        if self.trigger.send(()).is_err() {
            debug!("Scheduler loop is not running; trigger ignored");
        }
    }

    /// Dispatches up to `jobs_per_run` unfinished jobs, oldest first.
    pub async fn run_once(&self) -> Result<Vec<DispatchResult>, JobError> {
        let jobs = job_repo::find_unfinished(&self.db, self.config.jobs_per_run)?;
        let span = info_span!("scheduler_run", candidates = jobs.len());
        async move {
            let lease = Duration::from_secs(self.config.lease_secs).as_millis() as i64;
            let mut results = Vec::with_capacity(jobs.len());
            for job in jobs {
                let now = now_millis();
                let lease_until = now + lease;
                if !job_repo::try_claim(&self.db, &job.id, now, lease_until)? {
                    debug!(job_id = %job.id, "Job is leased by another run, skipping");
                    continue;
                }

                let result = self.dispatcher.dispatch(&job.id).await;
                if !job_repo::release_claim(&self.db, &job.id, lease_until)? {
                    debug!(job_id = %job.id, "Lease expired during dispatch");
                }
                results.push(result);
            }
            if !results.is_empty() {
                info!(dispatched = results.len(), "Scheduler run finished");
            }
            Ok(results)
        }
        .instrument(span)
        .await
    }

    /// Runs on the configured interval and on every trigger until `shutdown`
    /// flips to true.
    pub fn spawn(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let mut triggers = self.trigger.subscribe();
        let period = Duration::from_secs(self.config.interval_secs.max(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            info!(interval_secs = period.as_secs(), "Job scheduler started");

            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    received = triggers.recv() => {
                        if let Err(broadcast::error::RecvError::Closed) = received {
                            break;
                        }
                    }
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            break;
                        }
                        continue;
                    }
                }
                if let Err(e) = self.run_once().await {
                    error!(error = %e, "Scheduler run failed");
                }
            }
            info!("Job scheduler stopped");
        })
    }
}

impl std::fmt::Debug for JobScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobScheduler")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
