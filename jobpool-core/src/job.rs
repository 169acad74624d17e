//! Job Descriptors and Execution
//!
//! A [`JobDescriptor`] names a registered function and the arguments to call
//! it with. [`execute_job`] is what a worker runs for each request: every way
//! a job can go wrong ends up as a [`JobOutcome::Failure`] value.

use crate::find_job;
use jobpool_ipc::{FailureKind, JobArgs, JobFailure, JobOutcome, Value};
use std::backtrace::{Backtrace, BacktraceStatus};
use std::panic::{AssertUnwindSafe, catch_unwind};

/// One unit of work as submitted by the caller
#[derive(Debug, Clone, PartialEq, Default)]
pub struct JobDescriptor {
    /// Registry id of the function; `None` until bound
    pub function: Option<String>,
    /// Arguments for the call
    pub args: JobArgs,
    /// Ask the worker to raise its OS scheduling priority first
    pub high_priority: bool,
}

impl JobDescriptor {
    /// Descriptor for `function` with no arguments
    pub fn new(function: impl Into<String>) -> Self {
        Self {
            function: Some(function.into()),
            ..Self::default()
        }
    }

    /// Unbound descriptor carrying only arguments. Bind a function later with
    /// [`JobDescriptor::bind`] or run it through a uniform batch.
    pub fn with_args(args: JobArgs) -> Self {
        Self {
            function: None,
            args,
            high_priority: false,
        }
    }

    /// Replace the arguments
    pub fn args(mut self, args: JobArgs) -> Self {
        self.args = args;
        self
    }

    /// Append one positional argument
    pub fn arg(mut self, value: impl Into<Value>) -> Self {
        self.args = self.args.arg(value);
        self
    }

    /// Set a keyword argument
    pub fn kwarg(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.args = self.args.kwarg(name, value);
        self
    }

    /// Mark the job as high priority
    pub fn high_priority(mut self, high_priority: bool) -> Self {
        self.high_priority = high_priority;
        self
    }

    /// Copy of this descriptor bound to `function`
    pub fn bind(&self, function: impl Into<String>) -> Self {
        Self {
            function: Some(function.into()),
            ..self.clone()
        }
    }

    /// Registry id, if bound
    pub fn function(&self) -> Option<&str> {
        self.function.as_deref()
    }
}

/// Run the registered function `function` with `args`, capturing failures.
///
/// Unknown ids, returned errors and panics are all reported as
/// [`JobOutcome::Failure`]; this function never unwinds.
pub fn execute_job(function: &str, args: &JobArgs) -> JobOutcome {
    let Some(def) = find_job(function) else {
        return JobOutcome::Failure(JobFailure::new(
            FailureKind::UnknownFunction,
            format!("no job function registered as `{function}`"),
        ));
    };

    match catch_unwind(AssertUnwindSafe(|| (def.runner_fn)(args))) {
        Ok(Ok(value)) => JobOutcome::Success(value),
        Ok(Err(error)) => JobOutcome::Failure(JobFailure::new(
            FailureKind::Error,
            format!("{error:#}"),
        )),
        Err(panic) => {
            let message = if let Some(s) = panic.downcast_ref::<&str>() {
                s.to_string()
            } else if let Some(s) = panic.downcast_ref::<String>() {
                s.clone()
            } else {
                "Unknown panic".to_string()
            };

            let backtrace = Backtrace::capture();
            let backtrace = match backtrace.status() {
                BacktraceStatus::Captured => Some(backtrace.to_string()),
                _ => None,
            };

            JobOutcome::Failure(JobFailure {
                kind: FailureKind::Panic,
                message,
                backtrace,
            })
        }
    }
}
