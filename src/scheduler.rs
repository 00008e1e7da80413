//! Periodic job driver.
//!
//! Each job runs on its own interval. A job never overlaps with itself: if
//! the previous run still holds the job's guard when the next tick fires,
//! that tick is skipped.

use anyhow::Result;
use async_trait::async_trait;
use sentry::SentryFutureExt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, error, info, info_span, warn};

#[async_trait]
pub trait Job: Send + Sync {
    fn name(&self) -> &'static str;
    async fn run(&self) -> Result<()>;
}

struct Registration {
    job: Arc<dyn Job>,
    period: Duration,
    offset: Duration,
}

pub struct JobScheduler {
    jobs: Vec<Registration>,
    cancel: CancellationToken,
}

impl JobScheduler {
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            jobs: Vec::new(),
            cancel,
        }
    }

    /// First run fires immediately, then every `period`
    pub fn add(&mut self, job: Arc<dyn Job>, period: Duration) -> &mut Self {
        self.add_with_offset(job, period, Duration::ZERO)
    }

    /// First run fires after `offset`, then every `period`
    pub fn add_with_offset(
        &mut self,
        job: Arc<dyn Job>,
        period: Duration,
        offset: Duration,
    ) -> &mut Self {
        self.jobs.push(Registration {
            job,
            period,
            offset,
        });
        self
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Start every job loop; each handle completes after cancellation once
    /// its in-flight run, if any, has finished.
    pub fn spawn(self) -> Vec<JoinHandle<()>> {
        self.jobs
            .into_iter()
            .map(
                |Registration {
                     job,
                     period,
                     offset,
                 }| {
                    let cancel = self.cancel.clone();
                    tokio::spawn(drive(job, period, offset, cancel))
                },
            )
            .collect()
    }

    /// Run until the cancellation token fires
    pub async fn run(self) {
        for handle in self.spawn() {
            if let Err(e) = handle.await {
                error!("Scheduler loop panicked: {}", e);
            }
        }
    }
}

async fn drive(job: Arc<dyn Job>, period: Duration, offset: Duration, cancel: CancellationToken) {
    let guard = Arc::new(Mutex::new(()));
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + offset, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    info!(
        "Scheduling job {} every {:?} (first run in {:?})",
        job.name(),
        period,
        offset
    );

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                match guard.clone().try_lock_owned() {
                    Ok(permit) => {
                        let job = job.clone();
                        tokio::spawn(async move {
                            let _permit = permit;
                            run_once(job.as_ref()).await;
                        });
                    }
                    Err(_) => {
                        warn!("Job {} is still running, skipping this trigger", job.name());
                        metrics::counter!("scheduler.job_skipped", "job" => job.name()).increment(1);
                    }
                }
            }
        }
    }

    // Let an in-flight run finish before reporting the loop as stopped
    let _ = guard.lock().await;
    info!("Job {} stopped", job.name());
}

/// Execute a job once, logging and counting the outcome. Failures never
/// propagate to the next run.
pub async fn run_once(job: &dyn Job) -> bool {
    let name = job.name();
    let start = Instant::now();
    let hub = Arc::new(sentry::Hub::new_from_top(sentry::Hub::current()));
    hub.configure_scope(|scope| scope.set_tag("operation", name));

    let result = job
        .run()
        .instrument(info_span!("job", name))
        .bind_hub(hub)
        .await;

    metrics::histogram!("scheduler.job_duration_ms", "job" => name)
        .record(start.elapsed().as_millis() as f64);

    match result {
        Ok(()) => {
            metrics::counter!("scheduler.job_succeeded", "job" => name).increment(1);
            true
        }
        Err(e) => {
            error!("Job {} failed: {:#}", name, e);
            metrics::counter!("scheduler.job_failed", "job" => name).increment(1);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct SlowJob {
        runs: AtomicUsize,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        duration: Duration,
    }

    impl SlowJob {
        fn new(duration: Duration) -> Self {
            Self {
                runs: AtomicUsize::new(0),
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
                duration,
            }
        }
    }

    #[async_trait]
    impl Job for SlowJob {
        fn name(&self) -> &'static str {
            "slow"
        }

        async fn run(&self) -> Result<()> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            self.runs.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.duration).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct FailingJob {
        attempts: AtomicUsize,
    }

    #[async_trait]
    impl Job for FailingJob {
        fn name(&self) -> &'static str {
            "failing"
        }

        async fn run(&self) -> Result<()> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            anyhow::bail!("upstream unavailable")
        }
    }

    #[tokio::test]
    async fn test_overlapping_triggers_are_skipped() {
        let job = Arc::new(SlowJob::new(Duration::from_millis(35)));
        let cancel = CancellationToken::new();
        let mut scheduler = JobScheduler::new(cancel.clone());
        scheduler.add(job.clone(), Duration::from_millis(10));
        let handles = scheduler.spawn();

        tokio::time::sleep(Duration::from_millis(200)).await;
        cancel.cancel();
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(job.max_in_flight.load(Ordering::SeqCst), 1);
        let runs = job.runs.load(Ordering::SeqCst);
        assert!(runs >= 2, "expected repeated runs, got {runs}");
        assert!(runs < 20, "overlapping triggers were not skipped: {runs}");
        assert_eq!(job.in_flight.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_failure_does_not_stop_schedule() {
        let job = Arc::new(FailingJob {
            attempts: AtomicUsize::new(0),
        });
        let cancel = CancellationToken::new();
        let mut scheduler = JobScheduler::new(cancel.clone());
        scheduler.add(job.clone(), Duration::from_millis(10));
        let handles = scheduler.spawn();

        tokio::time::sleep(Duration::from_millis(80)).await;
        cancel.cancel();
        for handle in handles {
            handle.await.unwrap();
        }

        assert!(job.attempts.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn test_offset_delays_first_run() {
        let job = Arc::new(SlowJob::new(Duration::from_millis(1)));
        let cancel = CancellationToken::new();
        let mut scheduler = JobScheduler::new(cancel.clone());
        scheduler.add_with_offset(job.clone(), Duration::from_secs(60), Duration::from_millis(150));
        let handles = scheduler.spawn();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(job.runs.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(job.runs.load(Ordering::SeqCst), 1);

        cancel.cancel();
        for handle in handles {
            handle.await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_run_once_reports_outcome() {
        let ok = SlowJob::new(Duration::from_millis(1));
        assert!(run_once(&ok).await);

        let failing = FailingJob {
            attempts: AtomicUsize::new(0),
        };
        assert!(!run_once(&failing).await);
    }
}
