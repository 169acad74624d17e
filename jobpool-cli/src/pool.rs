//! Pool Orchestrator
//!
//! Runs a batch of jobs across a fixed number of worker processes and
//! delivers their outcomes to the caller in submission order.
//!
//! Each lane is a rayon thread that owns one worker process. Lanes pull
//! `(index, job)` pairs from a shared queue, so jobs start in submission
//! order but may finish in any order; the [`OrderedDispatcher`] puts the
//! outcomes back in line. The submitting thread does nothing but watch for
//! completion and for removal of the run guard, which cancels the batch.

use crate::guard::{self, DEFAULT_GUARD_FILE, GuardError, RunGuard};
use crate::supervisor::{SupervisorError, WorkerHandle};
use chrono::{DateTime, Utc};
use jobpool_core::{FailureKind, JobArgs, JobDescriptor, JobFailure, JobOutcome, Value, find_job};
use jobpool_order::{ErrorCallback, OrderedDispatcher, SuccessCallback};
use rayon::ThreadPoolBuilder;
use serde::Serialize;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use thiserror::Error;

/// Default interval between completion / abort checks
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Errors that stop a batch before any job runs
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("a batch is already running ({} exists)", path.display())]
    AlreadyRunning { path: PathBuf },

    #[error("job {index} has no function bound")]
    MissingCallable { index: usize },

    #[error("job {index} names `{function}`, which is not a registered job function")]
    UnknownFunction { index: usize, function: String },

    #[error("run guard: {0}")]
    Guard(#[source] GuardError),

    #[error("failed to build lane pool: {0}")]
    PoolBuild(#[from] rayon::ThreadPoolBuildError),
}

impl From<GuardError> for PoolError {
    fn from(e: GuardError) -> Self {
        match e {
            GuardError::Exists { path } => PoolError::AlreadyRunning { path },
            other => PoolError::Guard(other),
        }
    }
}

/// Per-call switches for [`Pool::start_multi_processing`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOptions {
    /// Forget the records of earlier batches before starting
    pub reset_last_results: bool,
    /// Use the full-throttle worker count
    pub full_throttle: bool,
    /// Explicit worker count, capped at the full-throttle count
    pub processes_requested: Option<usize>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            reset_last_results: true,
            full_throttle: false,
            processes_requested: None,
        }
    }
}

/// The two worker-count ceilings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessCounts {
    /// Count used for ordinary runs
    pub safe: usize,
    /// Count used for full-throttle runs; also the cap on explicit requests
    pub full_throttle: usize,
}

impl ProcessCounts {
    /// Full throttle = logical cores, safe = half of that (at least 1)
    pub fn detect() -> Self {
        let full = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self::new(None, Some(full))
    }

    /// Counts from optional overrides, filling gaps from the machine
    pub fn new(safe: Option<usize>, full_throttle: Option<usize>) -> Self {
        let full_throttle = full_throttle
            .unwrap_or_else(|| {
                std::thread::available_parallelism()
                    .map(|n| n.get())
                    .unwrap_or(1)
            })
            .max(1);
        let safe = safe.unwrap_or(full_throttle / 2).clamp(1, full_throttle);
        Self {
            safe,
            full_throttle,
        }
    }

    /// Worker count for a batch of `jobs` jobs
    pub fn resolve(&self, options: &RunOptions, jobs: usize) -> usize {
        let count = if options.full_throttle {
            self.full_throttle
        } else if let Some(requested) = options.processes_requested {
            if requested > self.full_throttle {
                tracing::warn!(
                    requested,
                    max = self.full_throttle,
                    "requested worker count exceeds full throttle, clamping"
                );
            }
            requested.min(self.full_throttle)
        } else {
            self.safe
        };
        count.min(jobs).max(1)
    }
}

/// Final status of one job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Returned a value
    Succeeded,
    /// Returned an error, panicked or lost its worker
    Failed,
    /// Never finished because the batch was aborted
    Abandoned,
}

/// Bookkeeping for one job, kept across batches until reset
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobRecord {
    /// Batch sequence number within this pool
    pub batch: u64,
    /// Submission index within the batch
    pub index: usize,
    /// Registry id of the job function
    pub function: String,
    /// How the job ended
    pub status: JobStatus,
    /// Wall time from dispatch to outcome
    pub elapsed_ms: f64,
    /// Failure kind, for failed jobs
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureKind>,
}

/// How a batch ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    /// Every job produced an outcome
    Completed,
    /// The run guard was removed while jobs were outstanding
    Aborted,
}

/// Returned by every batch that got past validation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchSummary {
    /// Batch sequence number within this pool
    pub batch: u64,
    /// How the batch ended
    pub status: BatchStatus,
    /// Number of worker processes (lanes) used
    pub processes: usize,
    /// Number of jobs submitted
    pub submitted: usize,
    /// Jobs that returned a value
    pub succeeded: usize,
    /// Jobs that failed
    pub failed: usize,
    /// Jobs whose outcome never reached a callback
    pub undelivered: usize,
    /// When the batch started
    pub started_at: DateTime<Utc>,
    /// Wall time of the whole batch
    pub elapsed_ms: f64,
}

/// Success and error handlers for one batch.
///
/// Both are optional; a missing handler drops the outcomes it would have
/// received. Handlers are called one at a time, in submission order.
#[derive(Default)]
pub struct Callbacks {
    on_success: Option<SuccessCallback<Value>>,
    on_error: Option<ErrorCallback<JobFailure>>,
}

impl Callbacks {
    /// No handlers
    pub fn new() -> Self {
        Self::default()
    }

    /// Handler for `(index, value)` of successful jobs
    pub fn on_success(mut self, f: impl FnMut(usize, Value) + Send + 'static) -> Self {
        self.on_success = Some(Box::new(f));
        self
    }

    /// Handler for `(index, failure)` of failed jobs
    pub fn on_error(mut self, f: impl FnMut(usize, JobFailure) + Send + 'static) -> Self {
        self.on_error = Some(Box::new(f));
        self
    }
}

/// Builder for [`Pool`]
#[derive(Debug, Clone, Default)]
pub struct PoolBuilder {
    project_root: Option<PathBuf>,
    guard_file: Option<String>,
    worker_binary: Option<PathBuf>,
    poll_interval: Option<Duration>,
    safe_processes: Option<usize>,
    full_throttle_processes: Option<usize>,
}

impl PoolBuilder {
    /// Directory holding the run guard (default: current directory)
    pub fn project_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.project_root = Some(root.into());
        self
    }

    /// Guard file name relative to the project root
    pub fn guard_file(mut self, name: impl Into<String>) -> Self {
        self.guard_file = Some(name.into());
        self
    }

    /// Binary spawned for workers (default: the current executable)
    pub fn worker_binary(mut self, path: impl Into<PathBuf>) -> Self {
        self.worker_binary = Some(path.into());
        self
    }

    /// Interval between completion / abort checks
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = Some(interval);
        self
    }

    /// Worker count for ordinary runs
    pub fn safe_processes(mut self, n: usize) -> Self {
        self.safe_processes = Some(n);
        self
    }

    /// Worker count ceiling
    pub fn full_throttle_processes(mut self, n: usize) -> Self {
        self.full_throttle_processes = Some(n);
        self
    }

    /// Resolve defaults and build the pool
    pub fn build(self) -> std::io::Result<Pool> {
        let current_exe = std::env::current_exe();
        let worker_binary = match self.worker_binary {
            Some(path) => path,
            None => current_exe.as_ref().map_err(clone_io_error)?.clone(),
        };
        let worker_is_self = current_exe
            .map(|exe| same_file(&exe, &worker_binary))
            .unwrap_or(false);

        let project_root = match self.project_root {
            Some(root) => root,
            None => std::env::current_dir()?,
        };
        if !project_root.is_dir() {
            tracing::warn!(
                root = %project_root.display(),
                "project root is not a directory; batches will fail to create the run guard"
            );
        }

        let guard_file = self
            .guard_file
            .unwrap_or_else(|| DEFAULT_GUARD_FILE.to_string());

        Ok(Pool {
            guard_path: project_root.join(guard_file),
            project_root,
            worker_binary,
            worker_is_self,
            poll_interval: self.poll_interval.unwrap_or(DEFAULT_POLL_INTERVAL),
            counts: ProcessCounts::new(self.safe_processes, self.full_throttle_processes),
            dispatcher: OrderedDispatcher::new(),
            records: Mutex::new(Vec::new()),
            batches: AtomicU64::new(0),
            last_processes: AtomicUsize::new(0),
        })
    }
}

fn clone_io_error(e: &std::io::Error) -> std::io::Error {
    std::io::Error::new(e.kind(), e.to_string())
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

/// Process pool that runs batches of registered jobs
pub struct Pool {
    project_root: PathBuf,
    guard_path: PathBuf,
    worker_binary: PathBuf,
    worker_is_self: bool,
    poll_interval: Duration,
    counts: ProcessCounts,
    dispatcher: OrderedDispatcher<Value, JobFailure>,
    records: Mutex<Vec<JobRecord>>,
    batches: AtomicU64,
    last_processes: AtomicUsize,
}

impl Pool {
    /// Start configuring a pool
    pub fn builder() -> PoolBuilder {
        PoolBuilder::default()
    }

    /// Run `jobs` in parallel and deliver outcomes in submission order.
    ///
    /// Blocks until every job has an outcome or the run guard is removed.
    /// Job failures are delivered to the error handler and never returned
    /// as errors; `Err` means nothing was started.
    pub fn start_multi_processing(
        &self,
        jobs: Vec<JobDescriptor>,
        callbacks: Callbacks,
        options: RunOptions,
    ) -> Result<BatchSummary, PoolError> {
        let processes = self.counts.resolve(&options, jobs.len());
        let queue = self.validate(jobs)?;

        if self.guard_path.exists() {
            return Err(PoolError::AlreadyRunning {
                path: self.guard_path.clone(),
            });
        }

        self.dispatcher.reset();
        self.dispatcher
            .configure(callbacks.on_success, callbacks.on_error);
        if options.reset_last_results {
            self.reset_last_results();
        }

        let result = self.run_batch(queue, processes);
        self.dispatcher.clear_callbacks();
        result
    }

    /// Run one function over many argument sets.
    ///
    /// Job `i` gets `job_args[i]`; every job shares `high_priority`.
    pub fn start_uniform_multi_processing(
        &self,
        function: &str,
        job_args: Vec<JobArgs>,
        callbacks: Callbacks,
        high_priority: bool,
        options: RunOptions,
    ) -> Result<BatchSummary, PoolError> {
        let jobs = job_args
            .into_iter()
            .map(|args| {
                JobDescriptor::with_args(args)
                    .high_priority(high_priority)
                    .bind(function)
            })
            .collect();
        self.start_multi_processing(jobs, callbacks, options)
    }

    fn validate(&self, jobs: Vec<JobDescriptor>) -> Result<VecDeque<QueuedJob>, PoolError> {
        jobs.into_iter()
            .enumerate()
            .map(|(index, job)| {
                let Some(function) = job.function else {
                    return Err(PoolError::MissingCallable { index });
                };
                // Only this binary's registry is visible from here
                if self.worker_is_self && find_job(&function).is_none() {
                    return Err(PoolError::UnknownFunction { index, function });
                }
                Ok(QueuedJob {
                    index,
                    function,
                    args: job.args,
                    high_priority: job.high_priority,
                })
            })
            .collect()
    }

    fn run_batch(
        &self,
        queue: VecDeque<QueuedJob>,
        processes: usize,
    ) -> Result<BatchSummary, PoolError> {
        let guard = RunGuard::acquire(&self.guard_path)?;
        let lanes = ThreadPoolBuilder::new()
            .num_threads(processes)
            .thread_name(|i| format!("jobpool-lane-{i}"))
            .build()?;

        let batch_id = self.batches.fetch_add(1, Ordering::Relaxed) + 1;
        self.last_processes.store(processes, Ordering::Relaxed);
        let submitted = queue.len();
        let started_at = Utc::now();
        let start = Instant::now();

        tracing::info!(
            batch = batch_id,
            jobs = submitted,
            processes,
            guard = %self.guard_path.display(),
            "batch started"
        );

        let batch = Batch {
            id: batch_id,
            binary: &self.worker_binary,
            queue: Mutex::new(queue),
            abort: AtomicBool::new(false),
            finished: Mutex::new(0),
            progress: Condvar::new(),
            dispatcher: &self.dispatcher,
            records: &self.records,
        };

        let status = lanes.in_place_scope(|scope| {
            for lane in 0..processes {
                let batch = &batch;
                scope.spawn(move |_| batch.run_lane(lane));
            }
            batch.wait(submitted, &guard, self.poll_interval)
        });

        let abandoned = batch.abandon_queued();
        let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;

        match status {
            BatchStatus::Completed => guard.release()?,
            BatchStatus::Aborted => guard.disarm(),
        }

        let (succeeded, failed) = {
            let records = lock(&self.records);
            records
                .iter()
                .filter(|r| r.batch == batch_id)
                .fold((0, 0), |(ok, err), r| match r.status {
                    JobStatus::Succeeded => (ok + 1, err),
                    JobStatus::Failed => (ok, err + 1),
                    JobStatus::Abandoned => (ok, err),
                })
        };
        let summary = BatchSummary {
            batch: batch_id,
            status,
            processes,
            submitted,
            succeeded,
            failed,
            undelivered: submitted.saturating_sub(self.dispatcher.delivered()),
            started_at,
            elapsed_ms,
        };

        match status {
            BatchStatus::Completed => tracing::info!(
                batch = batch_id,
                succeeded,
                failed,
                elapsed_ms,
                "batch completed"
            ),
            BatchStatus::Aborted => tracing::warn!(
                batch = batch_id,
                succeeded,
                failed,
                abandoned,
                undelivered = summary.undelivered,
                "batch aborted"
            ),
        }

        Ok(summary)
    }

    /// Records of every job since the last reset, in completion order
    pub fn results(&self) -> Vec<JobRecord> {
        lock(&self.records).clone()
    }

    /// Forget the records of earlier batches
    pub fn reset_last_results(&self) {
        lock(&self.records).clear();
    }

    /// Worker count of the most recent batch (0 before the first)
    pub fn last_parallel_processes(&self) -> usize {
        self.last_processes.load(Ordering::Relaxed)
    }

    /// The configured worker-count ceilings
    pub fn process_counts(&self) -> ProcessCounts {
        self.counts
    }

    /// Directory the run guard lives in
    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    /// Full path of the run guard
    pub fn guard_path(&self) -> &Path {
        &self.guard_path
    }

    /// Binary spawned for workers
    pub fn worker_binary(&self) -> &Path {
        &self.worker_binary
    }

    /// Whether a batch holds the run guard in this project root
    pub fn is_running(&self) -> bool {
        self.guard_path.exists()
    }

    /// Cancel the running batch by removing the guard.
    ///
    /// Works from any thread or process. Returns whether a guard was
    /// present.
    pub fn abort(&self) -> Result<bool, GuardError> {
        let removed = guard::remove(&self.guard_path)?;
        if removed {
            tracing::info!(guard = %self.guard_path.display(), "abort requested");
        }
        Ok(removed)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// A validated job waiting for a lane
#[derive(Debug)]
struct QueuedJob {
    index: usize,
    function: String,
    args: JobArgs,
    high_priority: bool,
}

/// State shared by the lanes of one batch
struct Batch<'a> {
    id: u64,
    binary: &'a Path,
    queue: Mutex<VecDeque<QueuedJob>>,
    abort: AtomicBool,
    finished: Mutex<usize>,
    progress: Condvar,
    dispatcher: &'a OrderedDispatcher<Value, JobFailure>,
    records: &'a Mutex<Vec<JobRecord>>,
}

impl Batch<'_> {
    fn next_job(&self) -> Option<QueuedJob> {
        if self.abort.load(Ordering::Acquire) {
            return None;
        }
        lock(&self.queue).pop_front()
    }

    fn run_lane(&self, lane: usize) {
        let mut worker: Option<WorkerHandle> = None;

        while let Some(job) = self.next_job() {
            let start = Instant::now();

            if worker.is_none() {
                match WorkerHandle::spawn(self.binary) {
                    Ok(handle) => {
                        tracing::debug!(
                            lane,
                            pid = handle.pid(),
                            registered = handle.capabilities().registered_jobs,
                            "lane worker ready"
                        );
                        worker = Some(handle);
                    }
                    Err(e) => {
                        tracing::error!(lane, index = job.index, error = %e, "could not start worker");
                        let failure = JobFailure::new(FailureKind::WorkerCrashed, e.to_string());
                        self.complete(&job, JobOutcome::Failure(failure), start);
                        continue;
                    }
                }
            }
            let Some(handle) = worker.as_mut() else {
                continue;
            };

            tracing::debug!(lane, index = job.index, function = %job.function, "dispatching job");
            match handle.run_job(
                job.index,
                &job.function,
                &job.args,
                job.high_priority,
                &self.abort,
            ) {
                Ok(outcome) => self.complete(&job, outcome, start),
                Err(SupervisorError::Aborted) => {
                    let _ = handle.kill();
                    self.record(&job, JobStatus::Abandoned, None, start);
                    break;
                }
                Err(e) => {
                    tracing::error!(lane, index = job.index, error = %e, "worker lost during job");
                    let _ = handle.kill();
                    worker = None;
                    let failure = JobFailure::new(FailureKind::WorkerCrashed, e.to_string());
                    self.complete(&job, JobOutcome::Failure(failure), start);
                }
            }
        }

        if let Some(mut handle) = worker {
            if self.abort.load(Ordering::Acquire) {
                let _ = handle.kill();
            } else if let Err(e) = handle.shutdown() {
                tracing::debug!(lane, error = %e, "worker shutdown failed");
            }
        }
    }

    fn record(&self, job: &QueuedJob, status: JobStatus, failure: Option<FailureKind>, start: Instant) {
        lock(self.records).push(JobRecord {
            batch: self.id,
            index: job.index,
            function: job.function.clone(),
            status,
            elapsed_ms: start.elapsed().as_secs_f64() * 1000.0,
            failure,
        });
    }

    fn complete(&self, job: &QueuedJob, outcome: JobOutcome, start: Instant) {
        match &outcome {
            JobOutcome::Success(_) => self.record(job, JobStatus::Succeeded, None, start),
            JobOutcome::Failure(f) => self.record(job, JobStatus::Failed, Some(f.kind), start),
        }

        let released = self
            .dispatcher
            .on_completion(job.index, outcome.into_result());
        tracing::debug!(index = job.index, released, "job outcome received");

        *lock(&self.finished) += 1;
        self.progress.notify_all();
    }

    /// Block until all jobs finished or the guard disappears
    fn wait(&self, total: usize, guard: &RunGuard, poll_interval: Duration) -> BatchStatus {
        let mut finished = lock(&self.finished);
        loop {
            if *finished >= total {
                return BatchStatus::Completed;
            }
            if !guard.exists() {
                self.abort.store(true, Ordering::Release);
                return BatchStatus::Aborted;
            }
            finished = match self.progress.wait_timeout(finished, poll_interval) {
                Ok((next, _)) => next,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
    }

    /// Record every job still queued as abandoned; returns how many
    fn abandon_queued(&self) -> usize {
        let remaining: Vec<QueuedJob> = lock(&self.queue).drain(..).collect();
        let now = Instant::now();
        for job in &remaining {
            self.record(job, JobStatus::Abandoned, None, now);
        }
        remaining.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool_in(dir: &Path) -> Pool {
        Pool::builder()
            .project_root(dir)
            .worker_binary("/nonexistent/jobpool-worker")
            .poll_interval(Duration::from_millis(20))
            .safe_processes(2)
            .full_throttle_processes(4)
            .build()
            .unwrap()
    }

    #[test]
    fn test_process_count_resolution() {
        let counts = ProcessCounts::new(Some(2), Some(8));
        let default = RunOptions::default();
        assert_eq!(counts.resolve(&default, 100), 2);
        assert_eq!(counts.resolve(&default, 1), 1);

        let full = RunOptions {
            full_throttle: true,
            ..default
        };
        assert_eq!(counts.resolve(&full, 100), 8);

        let explicit = RunOptions {
            processes_requested: Some(5),
            ..default
        };
        assert_eq!(counts.resolve(&explicit, 100), 5);

        let too_many = RunOptions {
            processes_requested: Some(64),
            ..default
        };
        assert_eq!(counts.resolve(&too_many, 100), 8);

        let zero = RunOptions {
            processes_requested: Some(0),
            ..default
        };
        assert_eq!(counts.resolve(&zero, 100), 1);
        assert_eq!(counts.resolve(&default, 0), 1);
    }

    #[test]
    fn test_safe_count_defaults_to_half() {
        assert_eq!(ProcessCounts::new(None, Some(8)).safe, 4);
        assert_eq!(ProcessCounts::new(None, Some(1)).safe, 1);
        assert_eq!(ProcessCounts::new(Some(16), Some(4)).safe, 4);
        let detected = ProcessCounts::detect();
        assert!(detected.safe >= 1 && detected.safe <= detected.full_throttle);
    }

    #[test]
    fn test_missing_callable_rejected_before_guard() {
        let dir = tempfile::tempdir().unwrap();
        let pool = pool_in(dir.path());
        let jobs = vec![
            JobDescriptor::new("square").arg(1i64),
            JobDescriptor::with_args(JobArgs::new().arg(2i64)),
        ];

        let err = pool
            .start_multi_processing(jobs, Callbacks::new(), RunOptions::default())
            .unwrap_err();
        assert!(matches!(err, PoolError::MissingCallable { index: 1 }));
        assert!(!pool.guard_path().exists());
    }

    #[test]
    fn test_already_running() {
        let dir = tempfile::tempdir().unwrap();
        let pool = pool_in(dir.path());
        std::fs::write(pool.guard_path(), "").unwrap();
        assert!(pool.is_running());

        let err = pool
            .start_multi_processing(
                vec![JobDescriptor::new("square")],
                Callbacks::new(),
                RunOptions::default(),
            )
            .unwrap_err();
        assert!(matches!(err, PoolError::AlreadyRunning { .. }));
        // The other batch's guard is untouched
        assert!(pool.guard_path().exists());
    }

    #[test]
    fn test_spawn_failures_become_crashed_outcomes() {
        let dir = tempfile::tempdir().unwrap();
        let pool = pool_in(dir.path());
        let errors = std::sync::Arc::new(Mutex::new(Vec::new()));
        let sink = errors.clone();

        let summary = pool
            .start_uniform_multi_processing(
                "square",
                (0..3).map(|i| JobArgs::new().arg(i as i64)).collect(),
                Callbacks::new().on_error(move |index, failure: JobFailure| {
                    sink.lock().unwrap().push((index, failure.kind));
                }),
                false,
                RunOptions::default(),
            )
            .unwrap();

        assert_eq!(summary.status, BatchStatus::Completed);
        assert_eq!(summary.failed, 3);
        assert_eq!(summary.undelivered, 0);
        assert_eq!(
            *errors.lock().unwrap(),
            vec![
                (0, FailureKind::WorkerCrashed),
                (1, FailureKind::WorkerCrashed),
                (2, FailureKind::WorkerCrashed),
            ]
        );
        assert!(!pool.is_running());
        assert_eq!(pool.last_parallel_processes(), 2);
    }

    #[test]
    fn test_results_accumulate_until_reset() {
        let dir = tempfile::tempdir().unwrap();
        let pool = pool_in(dir.path());
        let jobs = || vec![JobDescriptor::new("square"), JobDescriptor::new("square")];

        pool.start_multi_processing(jobs(), Callbacks::new(), RunOptions::default())
            .unwrap();
        let keep = RunOptions {
            reset_last_results: false,
            ..RunOptions::default()
        };
        pool.start_multi_processing(jobs(), Callbacks::new(), keep)
            .unwrap();
        let records = pool.results();
        assert_eq!(records.len(), 4);
        assert!(records.iter().any(|r| r.batch == 1));
        assert!(records.iter().any(|r| r.batch == 2));

        pool.start_multi_processing(jobs(), Callbacks::new(), RunOptions::default())
            .unwrap();
        assert!(pool.results().iter().all(|r| r.batch == 3));
    }

    #[test]
    fn test_empty_batch_completes() {
        let dir = tempfile::tempdir().unwrap();
        let pool = pool_in(dir.path());
        let summary = pool
            .start_multi_processing(Vec::new(), Callbacks::new(), RunOptions::default())
            .unwrap();
        assert_eq!(summary.status, BatchStatus::Completed);
        assert_eq!(summary.submitted, 0);
        assert!(!pool.is_running());
    }

    #[test]
    fn test_abort_without_batch() {
        let dir = tempfile::tempdir().unwrap();
        let pool = pool_in(dir.path());
        assert!(!pool.abort().unwrap());
        std::fs::write(pool.guard_path(), "").unwrap();
        assert!(pool.abort().unwrap());
        assert!(!pool.is_running());
    }

    #[test]
    fn test_guard_error_maps_to_already_running() {
        let err: PoolError = GuardError::Exists {
            path: PathBuf::from("x"),
        }
        .into();
        assert!(matches!(err, PoolError::AlreadyRunning { .. }));
    }
}
