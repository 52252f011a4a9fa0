//! Job monitors
//!
//! A monitor scans the store for queued records of one category, claims
//! them with a conditional status update and runs each claimed record on a
//! bounded pool of runners. The claim is the only way a runner gets started,
//! so a record is never executed by two runners at once.

mod publication;
mod reduction;

pub use publication::PublicationJobs;
pub use reduction::ReductionJobs;

use crate::error::EngineResult;
use crate::runner::{JobDetail, JobRunner};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

type Request<C> = <<C as JobCategory>::Runner as JobRunner>::Request;
type Detail<C> = JobDetail<Request<C>, <<C as JobCategory>::Runner as JobRunner>::Output>;

/// A runner outcome the store has not accepted yet
enum Unrecorded<C: JobCategory> {
    Finished(Uuid, Detail<C>),
    Abandoned(Uuid, String),
}

impl<C: JobCategory> Unrecorded<C> {
    fn key(&self) -> Uuid {
        match self {
            Unrecorded::Finished(key, _) | Unrecorded::Abandoned(key, _) => *key,
        }
    }
}

/// The record type a monitor drives and what to do with it
#[async_trait]
pub trait JobCategory: Send + Sync + 'static {
    type Runner: JobRunner;

    /// Name used in logs
    const NAME: &'static str;

    /// Queued records, oldest first
    async fn eligible(&self) -> EngineResult<Vec<Request<Self>>>;

    fn key(request: &Request<Self>) -> Uuid;

    /// Move a queued record to its in-progress status. `Ok(None)` means
    /// someone else got there first.
    async fn claim(&self, request: Request<Self>) -> EngineResult<Option<Request<Self>>>;

    fn runner(&self, claimed: Request<Self>) -> Self::Runner;

    /// Write a finished runner's result and forward it downstream
    async fn record(&self, detail: Detail<Self>) -> EngineResult<()>;

    /// A runner died without producing a result
    async fn abandon(&self, key: Uuid, reason: String) -> EngineResult<()>;
}

/// Polling loop with a hard cap on concurrent runners
pub struct JobMonitor<C: JobCategory> {
    category: Arc<C>,
    max_runners: usize,
    poll_interval: Duration,
    wake: Arc<Notify>,
}

impl<C: JobCategory> JobMonitor<C> {
    pub fn new(category: C, max_runners: usize, poll_interval: Duration) -> Self {
        Self {
            category: Arc::new(category),
            max_runners: max_runners.max(1),
            poll_interval,
            wake: Arc::new(Notify::new()),
        }
    }

    /// Share a wake-up handle with producers of new work
    pub fn with_wake(mut self, wake: Arc<Notify>) -> Self {
        self.wake = wake;
        self
    }

    pub fn wake_handle(&self) -> Arc<Notify> {
        self.wake.clone()
    }

    /// Spawn the monitor loop
    pub fn start(self, cancel: CancellationToken) -> MonitorHandle {
        let in_flight = Arc::new(Mutex::new(HashSet::new()));
        let wake = self.wake.clone();
        let task = {
            let in_flight = in_flight.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { self.run(cancel, in_flight).await })
        };

        MonitorHandle {
            name: C::NAME,
            task,
            in_flight,
            wake,
            cancel,
        }
    }

    async fn run(self, cancel: CancellationToken, in_flight: Arc<Mutex<HashSet<Uuid>>>) {
        tracing::info!(
            category = C::NAME,
            max_runners = self.max_runners,
            "Job monitor started"
        );
        let mut runners: JoinSet<(Uuid, Result<Detail<C>, JoinError>)> = JoinSet::new();
        // Outcomes whose write failed. Their keys stay in flight so the
        // records are not claimed again until the write lands.
        let mut pending: Vec<Unrecorded<C>> = Vec::new();

        loop {
            if cancel.is_cancelled() {
                break;
            }

            if !pending.is_empty() {
                self.retry_pending(&mut pending, &in_flight).await;
            }

            if runners.len() < self.max_runners {
                if let Err(e) = self.fill(&mut runners, &in_flight, &cancel).await {
                    tracing::warn!(category = C::NAME, error = %e, "Store scan failed, retrying next poll");
                }
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                Some(joined) = runners.join_next(), if !runners.is_empty() => {
                    if let Some(unrecorded) = self.reap(joined, &in_flight).await {
                        pending.push(unrecorded);
                    }
                }
                _ = self.wake.notified() => {}
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }

        // Runners share the token and stop on their own; their records keep
        // whatever status they reached.
        let draining = runners.len();
        while let Some(joined) = runners.join_next().await {
            if let Some(unrecorded) = self.reap(joined, &in_flight).await {
                pending.push(unrecorded);
            }
        }
        if !pending.is_empty() {
            self.retry_pending(&mut pending, &in_flight).await;
        }
        for unrecorded in &pending {
            tracing::error!(
                category = C::NAME,
                key = %unrecorded.key(),
                "Job result was never recorded; recovery will pick the record up at next start"
            );
        }
        tracing::info!(category = C::NAME, drained = draining, "Job monitor stopped");
    }

    async fn fill(
        &self,
        runners: &mut JoinSet<(Uuid, Result<Detail<C>, JoinError>)>,
        in_flight: &Mutex<HashSet<Uuid>>,
        cancel: &CancellationToken,
    ) -> EngineResult<()> {
        let candidates = self.category.eligible().await?;

        for candidate in candidates {
            if runners.len() >= self.max_runners || cancel.is_cancelled() {
                break;
            }
            let key = C::key(&candidate);
            if in_flight.lock().contains(&key) {
                continue;
            }

            let claimed = match self.category.claim(candidate).await {
                Ok(Some(claimed)) => claimed,
                Ok(None) => {
                    tracing::debug!(category = C::NAME, key = %key, "Record claimed elsewhere");
                    continue;
                }
                Err(e) => {
                    tracing::warn!(category = C::NAME, key = %key, error = %e, "Claim failed");
                    continue;
                }
            };

            in_flight.lock().insert(key);
            let runner = self.category.runner(claimed);
            let token = cancel.child_token();
            // The inner spawn keeps the key attached even if the runner panics.
            runners.spawn(async move { (key, tokio::spawn(runner.execute(token)).await) });
            tracing::debug!(category = C::NAME, key = %key, "Runner started");
        }

        Ok(())
    }

    /// Record a reaped runner. Returns the outcome when the write failed
    /// so it can be retried on a later poll.
    async fn reap(
        &self,
        joined: Result<(Uuid, Result<Detail<C>, JoinError>), JoinError>,
        in_flight: &Mutex<HashSet<Uuid>>,
    ) -> Option<Unrecorded<C>> {
        let (key, result) = match joined {
            Ok(pair) => pair,
            Err(e) => {
                tracing::error!(category = C::NAME, error = %e, "Runner supervisor failed");
                return None;
            }
        };

        let unrecorded = match result {
            Ok(detail) => Unrecorded::Finished(key, detail),
            Err(e) => {
                tracing::error!(category = C::NAME, key = %key, error = %e, "Runner panicked");
                Unrecorded::Abandoned(key, format!("Runner terminated unexpectedly: {}", e))
            }
        };
        self.try_record(unrecorded, in_flight).await
    }

    async fn retry_pending(&self, pending: &mut Vec<Unrecorded<C>>, in_flight: &Mutex<HashSet<Uuid>>) {
        for unrecorded in std::mem::take(pending) {
            if let Some(failed) = self.try_record(unrecorded, in_flight).await {
                pending.push(failed);
            }
        }
    }

    async fn try_record(
        &self,
        unrecorded: Unrecorded<C>,
        in_flight: &Mutex<HashSet<Uuid>>,
    ) -> Option<Unrecorded<C>> {
        let key = unrecorded.key();
        let recorded = match &unrecorded {
            Unrecorded::Finished(_, detail) => self.category.record(detail.clone()).await,
            Unrecorded::Abandoned(_, reason) => self.category.abandon(key, reason.clone()).await,
        };

        match recorded {
            Ok(()) => {}
            // The record moved on or vanished; retrying can never succeed.
            Err(e) if e.is_conflict() || e.is_not_found() => {
                tracing::warn!(category = C::NAME, key = %key, error = %e, "Record changed before its result was written");
            }
            Err(e) => {
                tracing::warn!(category = C::NAME, key = %key, error = %e, "Failed to record job result, retrying next poll");
                return Some(unrecorded);
            }
        }
        in_flight.lock().remove(&key);
        None
    }
}

/// Handle to a running monitor
#[derive(Debug)]
pub struct MonitorHandle {
    name: &'static str,
    task: JoinHandle<()>,
    in_flight: Arc<Mutex<HashSet<Uuid>>>,
    wake: Arc<Notify>,
    cancel: CancellationToken,
}

impl MonitorHandle {
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Records currently owned by a runner of this monitor
    pub fn in_flight(&self) -> usize {
        self.in_flight.lock().len()
    }

    /// Look for new work without waiting for the next poll
    pub fn wake(&self) {
        self.wake.notify_one();
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the loop and its runners to stop
    pub async fn join(self) -> Result<(), JoinError> {
        self.task.await
    }
}
