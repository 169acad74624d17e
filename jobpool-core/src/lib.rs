#![warn(missing_docs)]
//! jobpool Core - Job Registry and Worker Runtime
//!
//! This crate provides what runs inside a worker process:
//! - The job registry: functions registered with `#[job]` are collected with
//!   `inventory` and looked up by a stable string id, so the supervisor only
//!   ever sends an id across the process boundary
//! - [`JobDescriptor`], the caller-side description of one unit of work
//! - [`execute_job`], which turns errors and panics into `JobOutcome::Failure`
//! - OS scheduling priority elevation for high-priority jobs
//! - [`WorkerMain`], the worker side of the supervisor-worker protocol

mod job;
mod priority;
mod worker;

pub use job::{JobDescriptor, execute_job};
pub use priority::{HIGH_PRIORITY_NICE, elevate_priority};
pub use worker::{WorkerMain, shutdown_requested};

pub use jobpool_ipc::{FailureKind, JobArgs, JobFailure, JobOutcome, Value};

/// Signature of a registered job function
pub type JobFn = fn(&JobArgs) -> anyhow::Result<Value>;

/// Job function registered via `#[job]`
#[derive(Debug, Clone)]
pub struct JobDef {
    /// Stable identifier used on the wire
    pub id: &'static str,
    /// Rust function name
    pub name: &'static str,
    /// First line of the function's doc comment, if any
    pub description: &'static str,
    /// Function pointer to the job body
    pub runner_fn: JobFn,
    /// Source file path
    pub file: &'static str,
    /// Source line number
    pub line: u32,
    /// Module path
    pub module_path: &'static str,
}

inventory::collect!(JobDef);

/// Anchor to prevent LTO from stripping inventory entries
#[used]
#[doc(hidden)]
pub static REGISTRY_ANCHOR: fn() = || for _ in inventory::iter::<JobDef> {};

/// All job functions linked into this binary, sorted by id
pub fn registered_jobs() -> Vec<&'static JobDef> {
    let mut jobs: Vec<_> = inventory::iter::<JobDef>.into_iter().collect();
    jobs.sort_by_key(|j| j.id);
    jobs
}

/// Look up a registered job by id
pub fn find_job(id: &str) -> Option<&'static JobDef> {
    inventory::iter::<JobDef>.into_iter().find(|j| j.id == id)
}
