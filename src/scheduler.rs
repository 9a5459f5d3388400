//! Generic periodic scheduler: named jobs, each with its own cadence,
//! executor loop, live status record, and cooperative cancellation.
//!
//! Two cancellation signals exist per job. The scheduler-wide token
//! (derived from the caller's token at start) propagates into every
//! execution and is cancelled by `stop`. The per-job tick token only stops
//! the executor loop; remove/replace cancels it without interrupting an
//! execution already in flight.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{Mutex, RwLock};
use tokio::time::{interval_at, timeout, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info};

use crate::model::JobStatus;

/// Hard deadline for a single job execution.
pub const JOB_EXECUTION_TIMEOUT: Duration = Duration::from_secs(5 * 60);

type JobFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;
type JobTask = Arc<dyn Fn(CancellationToken) -> JobFuture + Send + Sync>;

struct Job {
    interval: Duration,
    task: JobTask,
    status: Arc<StdMutex<JobStatus>>,
    tick_cancel: CancellationToken,
}

struct RunState {
    running: bool,
    root: Option<CancellationToken>,
}

pub struct Scheduler {
    state: Mutex<RunState>,
    jobs: RwLock<HashMap<String, Job>>,
    tracker: TaskTracker,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(RunState {
                running: false,
                root: None,
            }),
            jobs: RwLock::new(HashMap::new()),
            tracker: TaskTracker::new(),
        }
    }

    /// Start ticking every registered job. Idempotent: a second call while
    /// running does nothing.
    pub async fn start(&self, parent: &CancellationToken) {
        let mut state = self.state.lock().await;
        if state.running {
            return;
        }
        let root = parent.child_token();
        state.root = Some(root.clone());
        state.running = true;

        let jobs = self.jobs.read().await;
        for (name, job) in jobs.iter() {
            self.spawn_executor(name, job, &root);
        }
        info!(jobs = jobs.len(), "scheduler started");
    }

    /// Cancel the start token and block until every executor task drains.
    /// Idempotent: a no-op when not running.
    pub async fn stop(&self) {
        let mut state = self.state.lock().await;
        if !state.running {
            return;
        }
        info!("stopping scheduler");
        if let Some(root) = state.root.take() {
            root.cancel();
        }
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
        state.running = false;
        info!("scheduler stopped");
    }

    pub async fn is_running(&self) -> bool {
        self.state.lock().await.running
    }

    /// Register a job, replacing any previous registration under the same
    /// name. The replaced job's ticker stops, but an execution already in
    /// flight runs to completion. When the scheduler is running the new job
    /// starts ticking immediately.
    pub async fn add_job<F, Fut>(&self, name: &str, interval: Duration, task: F)
    where
        F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let task: JobTask = Arc::new(move |ctx| -> JobFuture { Box::pin(task(ctx)) });

        let state = self.state.lock().await;
        let mut jobs = self.jobs.write().await;
        if let Some(previous) = jobs.remove(name) {
            previous.tick_cancel.cancel();
            info!(job = name, "replacing scheduled job");
        }

        let job = Job {
            interval,
            task,
            status: Arc::new(StdMutex::new(JobStatus::new(name, interval))),
            tick_cancel: CancellationToken::new(),
        };
        if state.running {
            if let Some(root) = &state.root {
                self.spawn_executor(name, &job, root);
            }
        }
        jobs.insert(name.to_string(), job);
        debug!(job = name, interval = ?interval, "job registered");
    }

    /// Drop a job: its ticker stops, a currently executing instance runs to
    /// completion.
    pub async fn remove_job(&self, name: &str) {
        let mut jobs = self.jobs.write().await;
        if let Some(job) = jobs.remove(name) {
            job.tick_cancel.cancel();
            info!(job = name, "job removed");
        }
    }

    /// Point-in-time copy of every job's status record.
    pub async fn job_status(&self) -> HashMap<String, JobStatus> {
        let jobs = self.jobs.read().await;
        jobs.iter()
            .map(|(name, job)| (name.clone(), lock_status(&job.status).clone()))
            .collect()
    }

    fn spawn_executor(&self, name: &str, job: &Job, root: &CancellationToken) {
        {
            let mut status = lock_status(&job.status);
            status.next_run = Some(Utc::now() + job.interval);
        }
        self.tracker.spawn(run_executor(
            name.to_string(),
            job.interval,
            Arc::clone(&job.task),
            Arc::clone(&job.status),
            job.tick_cancel.clone(),
            root.clone(),
        ));
    }
}

fn lock_status(status: &StdMutex<JobStatus>) -> MutexGuard<'_, JobStatus> {
    status.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

async fn run_executor(
    name: String,
    interval: Duration,
    task: JobTask,
    status: Arc<StdMutex<JobStatus>>,
    tick_cancel: CancellationToken,
    root: CancellationToken,
) {
    // First tick fires one interval after start; ticks missed while an
    // execution is in flight are skipped, keeping the loop strictly serial.
    let mut ticker = interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = tick_cancel.cancelled() => break,
            _ = root.cancelled() => break,
            _ = ticker.tick() => {
                execute_once(&name, interval, &task, &status, &root).await;
                if tick_cancel.is_cancelled() || root.is_cancelled() {
                    break;
                }
            }
        }
    }
    debug!(job = %name, "executor stopped");
}

async fn execute_once(
    name: &str,
    interval: Duration,
    task: &JobTask,
    status: &StdMutex<JobStatus>,
    root: &CancellationToken,
) {
    let started_at = Utc::now();
    {
        let mut st = lock_status(status);
        st.is_running = true;
        st.run_count += 1;
    }
    debug!(job = %name, "job execution started");

    let started = std::time::Instant::now();
    let exec_ctx = root.child_token();
    let result = match timeout(JOB_EXECUTION_TIMEOUT, (task)(exec_ctx.clone())).await {
        Ok(result) => result,
        Err(_) => {
            exec_ctx.cancel();
            Err(anyhow::anyhow!(
                "execution exceeded {}s deadline",
                JOB_EXECUTION_TIMEOUT.as_secs()
            ))
        }
    };
    let elapsed = started.elapsed();

    let mut st = lock_status(status);
    st.is_running = false;
    st.last_run = Some(started_at);
    st.next_run = Some(Utc::now() + interval);
    st.average_run_time = next_average(st.average_run_time, st.run_count, elapsed);
    match result {
        Ok(()) => {
            st.last_error = None;
            drop(st);
            debug!(job = %name, elapsed_ms = elapsed.as_millis() as u64, "job execution finished");
        }
        Err(err) => {
            st.error_count += 1;
            st.last_error = Some(err.to_string());
            drop(st);
            error!(job = %name, error = %err, "job execution failed");
        }
    }
}

/// Running average: seeded with the first duration, then halved-sum.
fn next_average(previous: Duration, run_count: i64, elapsed: Duration) -> Duration {
    if run_count <= 1 {
        elapsed
    } else {
        (previous + elapsed) / 2
    }
}
