#![warn(missing_docs)]
//! # jobpool
//!
//! Ordered parallel job execution across worker processes.
//!
//! jobpool runs independent jobs concurrently in a pool of OS processes and
//! hands their outcomes back strictly in submission order:
//! - **Process Isolation**: a job that panics, errors or kills its worker
//!   only fails its own slot; the rest of the batch carries on
//! - **Ordered Delivery**: out-of-order completions are parked in a min-heap
//!   and released as soon as the next expected index arrives
//! - **Run Guard**: one batch per project root; deleting the guard file
//!   cancels the running batch
//! - **Priority Elevation**: high-priority jobs raise their worker's OS
//!   scheduling priority
//!
//! ## Quick Start
//!
//! ```ignore
//! use jobpool::prelude::*;
//!
//! #[job]
//! fn square(args: &JobArgs) -> anyhow::Result<i64> {
//!     let x = args.int(0)?;
//!     Ok(x * x)
//! }
//!
//! fn main() -> anyhow::Result<()> {
//!     jobpool::run()
//! }
//! ```
//!
//! ## Library Use
//!
//! ```ignore
//! let pool = Pool::builder().project_root(".").build()?;
//! let summary = pool.start_uniform_multi_processing(
//!     "square",
//!     (0..5).map(|i| JobArgs::new().arg(i as i64)).collect(),
//!     Callbacks::new().on_success(|index, value| println!("{index}: {value}")),
//!     false,
//!     RunOptions::default(),
//! )?;
//! ```

// Re-export core types
pub use jobpool_core::{
    FailureKind, JobArgs, JobDef, JobDescriptor, JobFailure, JobFn, JobOutcome, Value,
    execute_job, find_job, registered_jobs,
};

// Re-export macros
pub use jobpool_macros::job;

// Re-export ordering primitives
pub use jobpool_order::{HeapEntry, HeapError, MinHeap, OrderedDispatcher, SubmissionIndex};

// Re-export the orchestrator
pub use jobpool_cli::{
    BatchStatus, BatchSummary, Callbacks, JobRecord, JobStatus, Pool, PoolBuilder, PoolConfig,
    PoolError, ProcessCounts, RunOptions,
};

/// Argument helpers
pub use jobpool_ipc::{ArgError, KeywordArg};

/// Internal re-exports for macro use
#[doc(hidden)]
pub mod internal {
    pub use anyhow;
    pub use inventory;
}

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::{
        Callbacks, JobArgs, JobDescriptor, JobFailure, Pool, RunOptions, Value, job,
    };
}

/// Run the jobpool CLI harness.
///
/// Call this from your job binary's `main()`; it also serves the worker
/// processes the pool spawns from the same binary:
/// ```ignore
/// fn main() -> anyhow::Result<()> {
///     jobpool::run()
/// }
/// ```
pub use jobpool_cli::run;
