//! IPC Message Types
//!
//! Everything the supervisor and a worker say to each other. All messages are
//! rkyv-archived and validated on receipt.

use crate::value::{JobArgs, Value};
use rkyv::{Archive, Deserialize as RkyvDeserialize, Serialize as RkyvSerialize};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Categories of job failure
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Archive,
    RkyvSerialize,
    RkyvDeserialize,
    Serialize,
    Deserialize,
)]
#[archive(check_bytes)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The job function panicked (caught inside the worker)
    Panic,
    /// The job function returned an error
    Error,
    /// No function with the requested id is registered in the worker
    UnknownFunction,
    /// The worker process died or could not be started
    WorkerCrashed,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FailureKind::Panic => "panic",
            FailureKind::Error => "error",
            FailureKind::UnknownFunction => "unknown function",
            FailureKind::WorkerCrashed => "worker crashed",
        };
        f.write_str(name)
    }
}

/// Description of a failed job, carried as data
#[derive(
    Debug, Clone, PartialEq, Archive, RkyvSerialize, RkyvDeserialize, Serialize, Deserialize,
)]
#[archive(check_bytes)]
pub struct JobFailure {
    /// Error category
    pub kind: FailureKind,
    /// Human-readable error message
    pub message: String,
    /// Backtrace, when the worker captured one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backtrace: Option<String>,
}

impl JobFailure {
    /// Failure without a backtrace
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            backtrace: None,
        }
    }
}

impl fmt::Display for JobFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for JobFailure {}

/// Result of executing one job
#[derive(Debug, Clone, PartialEq, Archive, RkyvSerialize, RkyvDeserialize)]
#[archive(check_bytes)]
pub enum JobOutcome {
    /// The job returned a value
    Success(Value),
    /// The job failed; the failure is data, not an unwind
    Failure(JobFailure),
}

impl JobOutcome {
    /// Whether this is a success
    pub fn is_success(&self) -> bool {
        matches!(self, JobOutcome::Success(_))
    }

    /// Convert into a `Result` for the dispatcher
    pub fn into_result(self) -> Result<Value, JobFailure> {
        match self {
            JobOutcome::Success(value) => Ok(value),
            JobOutcome::Failure(failure) => Err(failure),
        }
    }
}

impl From<Result<Value, JobFailure>> for JobOutcome {
    fn from(result: Result<Value, JobFailure>) -> Self {
        match result {
            Ok(value) => JobOutcome::Success(value),
            Err(failure) => JobOutcome::Failure(failure),
        }
    }
}

/// One job sent to a worker
#[derive(Debug, Clone, Archive, RkyvSerialize, RkyvDeserialize)]
#[archive(check_bytes)]
pub struct JobRequest {
    /// Submission index within the batch
    pub index: u64,
    /// Registry id of the function to run
    pub function: String,
    /// Arguments for the function
    pub args: JobArgs,
    /// Raise the worker's OS scheduling priority before running
    pub high_priority: bool,
}

/// Worker capabilities advertised during handshake
#[derive(Debug, Clone, Archive, RkyvSerialize, RkyvDeserialize)]
#[archive(check_bytes)]
pub struct WorkerCapabilities {
    /// Protocol version for compatibility
    pub protocol_version: u32,
    /// OS process id of the worker
    pub pid: u32,
    /// Number of job functions registered in the worker binary
    pub registered_jobs: u32,
}

impl WorkerCapabilities {
    /// Capabilities of the current process
    pub fn current(registered_jobs: u32) -> Self {
        Self {
            protocol_version: crate::PROTOCOL_VERSION,
            pid: std::process::id(),
            registered_jobs,
        }
    }
}

/// Messages sent from Worker to Supervisor
#[derive(Debug, Clone, Archive, RkyvSerialize, RkyvDeserialize)]
#[archive(check_bytes)]
pub enum WorkerMessage {
    /// Initial handshake with worker capabilities
    Hello(WorkerCapabilities),

    /// The job was picked up and is about to run
    Started {
        /// Submission index
        index: u64,
        /// Whether the priority elevation request succeeded
        elevated: bool,
    },

    /// The job finished, successfully or not
    Finished {
        /// Submission index
        index: u64,
        /// What happened
        outcome: JobOutcome,
    },
}

/// Commands sent from Supervisor to Worker
#[derive(Debug, Clone, Archive, RkyvSerialize, RkyvDeserialize)]
#[archive(check_bytes)]
pub enum SupervisorCommand {
    /// Run one job
    Run(JobRequest),

    /// Request graceful shutdown
    Shutdown,
}
