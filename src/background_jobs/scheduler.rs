use super::context::JobContext;
use super::job::{BackgroundJob, HookEvent, JobError, ShutdownBehavior};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Upper bound on how long the loop sleeps before re-checking schedules.
const MAX_SLEEP: Duration = Duration::from_secs(60);
/// Re-check interval while a due job is still running.
const BUSY_POLL: Duration = Duration::from_secs(1);
/// How long shutdown waits for each running job.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

struct RunningJob {
    handle: JoinHandle<Result<(), JobError>>,
    cancel_token: CancellationToken,
}

/// Runs registered jobs on startup hooks and fixed intervals. A job is
/// never started while a previous run of it is still in progress.
pub struct JobScheduler {
    jobs: HashMap<String, Arc<dyn BackgroundJob>>,

    /// Next due time of each interval-scheduled job.
    next_runs: HashMap<String, Instant>,

    /// Currently running jobs with their task handles and cancellation tokens.
    running: HashMap<String, RunningJob>,

    /// Token to signal scheduler shutdown.
    shutdown_token: CancellationToken,
}

impl JobScheduler {
    pub fn new(shutdown_token: CancellationToken) -> Self {
        Self {
            jobs: HashMap::new(),
            next_runs: HashMap::new(),
            running: HashMap::new(),
            shutdown_token,
        }
    }

    /// Register a job with the scheduler. Interval jobs first become due one
    /// interval after registration.
    pub fn register_job(&mut self, job: Arc<dyn BackgroundJob>) {
        let job_id = job.id().to_string();
        info!("Registering job: {} - {}", job_id, job.description());
        if let Some(interval) = job.schedule().interval() {
            self.next_runs
                .insert(job_id.clone(), Instant::now() + interval);
        }
        self.jobs.insert(job_id, job);
    }

    pub fn job_count(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_job_running(&self, job_id: &str) -> bool {
        self.running
            .get(job_id)
            .is_some_and(|running| !running.handle.is_finished())
    }

    /// Main scheduler loop. Returns once the shutdown token is cancelled and
    /// running jobs have been cancelled or waited for.
    pub async fn run(&mut self) {
        info!(
            "Starting job scheduler with {} registered jobs",
            self.job_count()
        );

        self.trigger_jobs_for_hook(HookEvent::OnStartup);

        loop {
            self.cleanup_completed_jobs().await;

            let sleep_duration = self.time_until_next_scheduled_job();
            debug!(
                "Scheduler sleeping for {:?} until next scheduled job",
                sleep_duration
            );

            tokio::select! {
                _ = tokio::time::sleep(sleep_duration) => {
                    self.run_due_jobs();
                }
                _ = self.shutdown_token.cancelled() => {
                    info!("Scheduler received shutdown signal");
                    self.shutdown().await;
                    break;
                }
            }
        }

        info!("Job scheduler stopped");
    }

    fn time_until_next_scheduled_job(&self) -> Duration {
        let now = Instant::now();
        self.next_runs
            .iter()
            .map(|(job_id, next_run)| {
                let wait = next_run.saturating_duration_since(now);
                if self.is_job_running(job_id) {
                    wait.max(BUSY_POLL)
                } else {
                    wait
                }
            })
            .fold(MAX_SLEEP, Duration::min)
    }

    fn run_due_jobs(&mut self) {
        let now = Instant::now();
        let due: Vec<String> = self
            .next_runs
            .iter()
            .filter(|(_, next_run)| **next_run <= now)
            .map(|(job_id, _)| job_id.clone())
            .collect();

        for job_id in due {
            self.spawn_job(&job_id, "schedule");
        }
    }

    fn trigger_jobs_for_hook(&mut self, event: HookEvent) {
        let to_trigger: Vec<String> = self
            .jobs
            .iter()
            .filter(|(_, job)| job.schedule().listens_to(event))
            .map(|(job_id, _)| job_id.clone())
            .collect();

        let trigger = format!("hook:{}", event);
        for job_id in to_trigger {
            self.spawn_job(&job_id, &trigger);
        }
    }

    fn spawn_job(&mut self, job_id: &str, triggered_by: &str) {
        let job = match self.jobs.get(job_id) {
            Some(job) => Arc::clone(job),
            None => {
                error!("Attempted to spawn unknown job: {}", job_id);
                return;
            }
        };

        if self.is_job_running(job_id) {
            debug!(
                "Skipping {} trigger for already running job: {}",
                triggered_by, job_id
            );
            return;
        }

        // Reschedule at start so a slow run does not cause a tight loop
        if let Some(interval) = job.schedule().interval() {
            self.next_runs
                .insert(job_id.to_string(), Instant::now() + interval);
        }

        info!("Starting job: {} (triggered_by: {})", job_id, triggered_by);

        let cancel_token = CancellationToken::new();
        let ctx = JobContext::new(cancel_token.clone());
        let handle = tokio::spawn(run_job_now(job, ctx));
        self.running.insert(
            job_id.to_string(),
            RunningJob {
                handle,
                cancel_token,
            },
        );
    }

    async fn cleanup_completed_jobs(&mut self) {
        let completed: Vec<String> = self
            .running
            .iter()
            .filter(|(_, running)| running.handle.is_finished())
            .map(|(job_id, _)| job_id.clone())
            .collect();

        for job_id in completed {
            if let Some(running) = self.running.remove(&job_id) {
                // Outcome was already logged by run_job_now
                let _ = running.handle.await;
            }
        }
    }

    fn shutdown_behavior(&self, job_id: &str) -> ShutdownBehavior {
        self.jobs
            .get(job_id)
            .map(|job| job.shutdown_behavior())
            .unwrap_or_default()
    }

    async fn shutdown(&mut self) {
        info!("Shutting down scheduler...");

        let running: Vec<(String, RunningJob)> = self.running.drain().collect();

        // Signal every cancellable job before waiting on any of them
        for (job_id, job) in &running {
            if self.shutdown_behavior(job_id) == ShutdownBehavior::Cancellable {
                debug!("Cancelling job: {}", job_id);
                job.cancel_token.cancel();
            }
        }

        for (job_id, job) in running {
            if self.shutdown_behavior(&job_id) == ShutdownBehavior::WaitForCompletion {
                info!("Waiting for job {} to complete...", job_id);
            }
            if tokio::time::timeout(SHUTDOWN_GRACE, job.handle).await.is_err() {
                warn!(
                    "Job {} still running after {:?}; exit waits for its worker thread to return",
                    job_id, SHUTDOWN_GRACE
                );
            }
        }

        info!("Scheduler shutdown complete");
    }
}

/// Execute one run of `job` on the blocking pool and log its outcome.
pub async fn run_job_now(job: Arc<dyn BackgroundJob>, ctx: JobContext) -> Result<(), JobError> {
    let job_id = job.id();
    let start_time = std::time::Instant::now();
    let result = tokio::task::spawn_blocking(move || job.execute(&ctx)).await;
    let elapsed = start_time.elapsed();

    match result {
        Ok(Ok(())) => {
            info!("Job {} completed successfully in {:?}", job_id, elapsed);
            Ok(())
        }
        Ok(Err(JobError::Cancelled)) => {
            info!("Job {} was cancelled after {:?}", job_id, elapsed);
            Err(JobError::Cancelled)
        }
        Ok(Err(e)) => {
            error!("Job {} failed after {:?}: {}", job_id, elapsed, e);
            Err(e)
        }
        Err(e) => {
            error!("Job {} panicked after {:?}: {}", job_id, elapsed, e);
            Err(JobError::ExecutionFailed(format!("Task panic: {}", e)))
        }
    }
}
