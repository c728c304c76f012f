//! Named periodic background tasks.
//!
//! Each task is registered under a unique name; enqueueing a name that is
//! still scheduled keeps the existing task. A run waits for network
//! connectivity first. Runs that ask to be retried are rescheduled with a
//! linearly growing delay, everything else waits for the next period.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::collector::{CollectionJob, JobOutcome};
use crate::config::ScheduleConfig;

pub const COLLECTION_TASK: &str = "flight-data-collector";

#[async_trait]
pub trait PeriodicJob: Send + Sync + 'static {
    async fn execute(&self, cancel: &CancellationToken) -> JobOutcome;
}

#[async_trait]
impl PeriodicJob for CollectionJob {
    async fn execute(&self, cancel: &CancellationToken) -> JobOutcome {
        self.run(cancel).await
    }
}

/// Precondition checked before every run.
#[async_trait]
pub trait Connectivity: Send + Sync + 'static {
    async fn is_available(&self) -> bool;
}

/// Considers the network available when `addr` accepts a TCP connection.
pub struct TcpProbe {
    addr: String,
    timeout: Duration,
}

impl TcpProbe {
    pub fn new(addr: impl Into<String>, timeout: Duration) -> Self {
        Self {
            addr: addr.into(),
            timeout,
        }
    }
}

#[async_trait]
impl Connectivity for TcpProbe {
    async fn is_available(&self) -> bool {
        match tokio::time::timeout(self.timeout, TcpStream::connect(&self.addr)).await {
            Ok(Ok(_)) => true,
            Ok(Err(e)) => {
                debug!("Connectivity probe to {} failed: {e}", self.addr);
                false
            }
            Err(_) => {
                debug!("Connectivity probe to {} timed out", self.addr);
                false
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct PeriodicPolicy {
    pub interval: Duration,
    /// Retry `n` waits `backoff * n`.
    pub backoff: Duration,
    pub max_retries: u32,
    /// How often to re-check connectivity while offline.
    pub network_recheck: Duration,
}

impl PeriodicPolicy {
    pub fn from_config(config: &ScheduleConfig) -> Self {
        Self {
            interval: Duration::from_secs(config.interval_hours * 60 * 60),
            backoff: Duration::from_secs(config.backoff_seconds),
            max_retries: config.max_retries,
            network_recheck: Duration::from_secs(60),
        }
    }

    /// Delay before the next run, or `None` when the task should end.
    /// `attempt` counts consecutive retries and is reset by any other outcome.
    pub fn next_delay(&self, outcome: &JobOutcome, attempt: &mut u32) -> Option<Duration> {
        match outcome {
            JobOutcome::Retry { .. } if *attempt < self.max_retries => {
                *attempt += 1;
                Some(self.backoff * *attempt)
            }
            JobOutcome::Cancelled => None,
            _ => {
                *attempt = 0;
                Some(self.interval)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueued {
    Scheduled,
    /// A task with this name is still scheduled and was left untouched.
    KeptExisting,
}

struct Entry {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

#[derive(Default)]
pub struct Scheduler {
    root: CancellationToken,
    tasks: Mutex<HashMap<String, Entry>>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue_unique_periodic(
        &self,
        name: &str,
        policy: PeriodicPolicy,
        job: Arc<dyn PeriodicJob>,
        connectivity: Arc<dyn Connectivity>,
    ) -> Enqueued {
        let mut tasks = match self.tasks.lock() {
            Ok(tasks) => tasks,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(existing) = tasks.get(name) {
            if !existing.handle.is_finished() {
                info!("Periodic task {name} already scheduled, keeping it");
                return Enqueued::KeptExisting;
            }
        }

        let cancel = self.root.child_token();
        let token = cancel.clone();
        let task_name = name.to_string();
        let handle = tokio::spawn(async move {
            run_periodic(task_name, policy, job, connectivity, token).await;
        });
        tasks.insert(name.to_string(), Entry { cancel, handle });
        info!("Periodic task {name} enqueued");
        Enqueued::Scheduled
    }

    pub fn is_scheduled(&self, name: &str) -> bool {
        self.tasks
            .lock()
            .map(|tasks| tasks.get(name).is_some_and(|e| !e.handle.is_finished()))
            .unwrap_or(false)
    }

    /// Cancels a task by name. Returns whether one was found.
    pub fn cancel(&self, name: &str) -> bool {
        let entry = match self.tasks.lock() {
            Ok(mut tasks) => tasks.remove(name),
            Err(poisoned) => poisoned.into_inner().remove(name),
        };
        match entry {
            Some(entry) => {
                entry.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancels every task and waits for them to exit.
    pub async fn shutdown(&self) {
        self.root.cancel();
        let entries: Vec<(String, Entry)> = match self.tasks.lock() {
            Ok(mut tasks) => tasks.drain().collect(),
            Err(poisoned) => poisoned.into_inner().drain().collect(),
        };
        for (name, entry) in entries {
            if let Err(e) = entry.handle.await {
                warn!("Periodic task {name} ended abnormally: {e}");
            }
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.root.cancel();
    }
}

async fn run_periodic(
    name: String,
    policy: PeriodicPolicy,
    job: Arc<dyn PeriodicJob>,
    connectivity: Arc<dyn Connectivity>,
    cancel: CancellationToken,
) {
    let mut attempt = 0;
    loop {
        while !connectivity.is_available().await {
            debug!("{name}: waiting for network");
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(policy.network_recheck) => {}
            }
        }

        let outcome = job.execute(&cancel).await;
        match &outcome {
            JobOutcome::Success(report) => info!("{name}: run succeeded: {report:?}"),
            JobOutcome::Retry { reason } => warn!("{name}: run will be retried: {reason}"),
            JobOutcome::Failure { reason } => warn!("{name}: run failed: {reason}"),
            JobOutcome::Cancelled => info!("{name}: run cancelled"),
        }

        let Some(delay) = policy.next_delay(&outcome, &mut attempt) else {
            return;
        };
        debug!("{name}: next run in {delay:?}");
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::CollectionReport;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const DAY: Duration = Duration::from_secs(24 * 60 * 60);

    fn policy() -> PeriodicPolicy {
        PeriodicPolicy {
            interval: DAY,
            backoff: Duration::from_secs(10),
            max_retries: 3,
            network_recheck: Duration::from_secs(60),
        }
    }

    struct CountingJob {
        runs: AtomicUsize,
        outcome: JobOutcome,
    }

    impl CountingJob {
        fn new(outcome: JobOutcome) -> Arc<Self> {
            Arc::new(Self {
                runs: AtomicUsize::new(0),
                outcome,
            })
        }

        fn runs(&self) -> usize {
            self.runs.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl PeriodicJob for CountingJob {
        async fn execute(&self, _cancel: &CancellationToken) -> JobOutcome {
            self.runs.fetch_add(1, Ordering::SeqCst);
            self.outcome.clone()
        }
    }

    /// Offline for the first `offline_checks` probes.
    struct FlakyNetwork {
        checks: AtomicUsize,
        offline_checks: usize,
    }

    #[async_trait]
    impl Connectivity for FlakyNetwork {
        async fn is_available(&self) -> bool {
            self.checks.fetch_add(1, Ordering::SeqCst) >= self.offline_checks
        }
    }

    fn online() -> Arc<FlakyNetwork> {
        Arc::new(FlakyNetwork {
            checks: AtomicUsize::new(0),
            offline_checks: 0,
        })
    }

    fn success() -> JobOutcome {
        JobOutcome::Success(CollectionReport::default())
    }

    #[test]
    fn retry_delay_grows_linearly_then_falls_back_to_period() {
        let policy = policy();
        let retry = JobOutcome::Retry {
            reason: "429".into(),
        };
        let mut attempt = 0;
        assert_eq!(policy.next_delay(&retry, &mut attempt), Some(Duration::from_secs(10)));
        assert_eq!(policy.next_delay(&retry, &mut attempt), Some(Duration::from_secs(20)));
        assert_eq!(policy.next_delay(&retry, &mut attempt), Some(Duration::from_secs(30)));
        assert_eq!(policy.next_delay(&retry, &mut attempt), Some(DAY));
        assert_eq!(attempt, 0);

        attempt = 2;
        assert_eq!(policy.next_delay(&success(), &mut attempt), Some(DAY));
        assert_eq!(attempt, 0);
        assert_eq!(policy.next_delay(&JobOutcome::Cancelled, &mut attempt), None);
    }

    #[test]
    fn failure_waits_for_next_period() {
        let mut attempt = 1;
        let failure = JobOutcome::Failure {
            reason: "no key".into(),
        };
        assert_eq!(policy().next_delay(&failure, &mut attempt), Some(DAY));
        assert_eq!(attempt, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn runs_immediately_then_once_per_period() {
        let scheduler = Scheduler::new();
        let job = CountingJob::new(success());
        scheduler.enqueue_unique_periodic(COLLECTION_TASK, policy(), job.clone(), online());

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(job.runs(), 1);
        tokio::time::sleep(DAY).await;
        assert_eq!(job.runs(), 2);

        scheduler.shutdown().await;
        assert!(!scheduler.is_scheduled(COLLECTION_TASK));
    }

    #[tokio::test(start_paused = true)]
    async fn keeps_existing_schedule() {
        let scheduler = Scheduler::new();
        let first = CountingJob::new(success());
        let second = CountingJob::new(success());

        assert_eq!(
            scheduler.enqueue_unique_periodic(COLLECTION_TASK, policy(), first.clone(), online()),
            Enqueued::Scheduled
        );
        assert_eq!(
            scheduler.enqueue_unique_periodic(COLLECTION_TASK, policy(), second.clone(), online()),
            Enqueued::KeptExisting
        );

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(first.runs(), 1);
        assert_eq!(second.runs(), 0);
        assert!(scheduler.is_scheduled(COLLECTION_TASK));

        assert!(scheduler.cancel(COLLECTION_TASK));
        assert!(!scheduler.cancel(COLLECTION_TASK));
        assert_eq!(
            scheduler.enqueue_unique_periodic(COLLECTION_TASK, policy(), second.clone(), online()),
            Enqueued::Scheduled
        );
        scheduler.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn waits_for_network_before_running() {
        let scheduler = Scheduler::new();
        let job = CountingJob::new(success());
        let network = Arc::new(FlakyNetwork {
            checks: AtomicUsize::new(0),
            offline_checks: 2,
        });
        scheduler.enqueue_unique_periodic(COLLECTION_TASK, policy(), job.clone(), network);

        tokio::time::sleep(Duration::from_secs(90)).await;
        assert_eq!(job.runs(), 0);
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(job.runs(), 1);

        scheduler.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn retries_with_backoff() {
        let scheduler = Scheduler::new();
        let job = CountingJob::new(JobOutcome::Retry {
            reason: "rate limited".into(),
        });
        scheduler.enqueue_unique_periodic(COLLECTION_TASK, policy(), job.clone(), online());

        // Runs at t=0, 10, 30, 60, then waits a full period.
        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(job.runs(), 4);
        tokio::time::sleep(Duration::from_secs(3600)).await;
        assert_eq!(job.runs(), 4);

        scheduler.shutdown().await;
    }
}
