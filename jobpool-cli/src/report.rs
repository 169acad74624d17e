//! Batch Reports
//!
//! What a CLI run prints or writes: metadata, the batch summary and every
//! delivered outcome in submission order.

use crate::pool::{BatchStatus, BatchSummary};
use chrono::{DateTime, Utc};
use jobpool_core::{JobFailure, Value};
use serde::Serialize;
use std::path::Path;

/// Output format selection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// JSON with full schema
    Json,
    /// Human-readable terminal output
    Human,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(OutputFormat::Json),
            "human" | "text" => Ok(OutputFormat::Human),
            other => Err(format!("Unknown output format: {}", other)),
        }
    }
}

/// Complete report for one CLI batch
#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub meta: ReportMeta,
    pub summary: BatchSummary,
    pub outcomes: Vec<OutcomeEntry>,
}

/// Report metadata
#[derive(Debug, Clone, Serialize)]
pub struct ReportMeta {
    pub version: String,
    pub timestamp: DateTime<Utc>,
    pub project_root: String,
    pub worker_binary: String,
}

impl ReportMeta {
    /// Metadata for a run from `project_root` using `worker_binary`
    pub fn new(project_root: &Path, worker_binary: &Path) -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            timestamp: Utc::now(),
            project_root: project_root.display().to_string(),
            worker_binary: worker_binary.display().to_string(),
        }
    }
}

/// One delivered outcome
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutcomeEntry {
    /// Submission index
    pub index: usize,
    /// Registry id of the job function
    pub function: String,
    /// Value or failure
    #[serde(flatten)]
    pub result: EntryResult,
}

/// Serialized as `{"value": ...}` or `{"error": {...}}`
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryResult {
    /// Successful job
    Value(Value),
    /// Failed job
    Error(JobFailure),
}

/// Generate a prettified JSON report
pub fn generate_json_report(report: &Report) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(report)
}

/// Format a report for human-readable terminal display
pub fn format_human_output(report: &Report) -> String {
    let mut output = String::new();

    output.push('\n');
    output.push_str("jobpool results\n");
    output.push_str(&"=".repeat(60));
    output.push_str("\n\n");

    for entry in &report.outcomes {
        match &entry.result {
            EntryResult::Value(value) => {
                output.push_str(&format!("  ✓ [{}] {} = {}\n", entry.index, entry.function, value));
            }
            EntryResult::Error(failure) => {
                output.push_str(&format!("  ✗ [{}] {}: {}\n", entry.index, entry.function, failure));
            }
        }
    }

    let summary = &report.summary;
    output.push('\n');
    output.push_str(&"-".repeat(60));
    output.push('\n');
    let status = match summary.status {
        BatchStatus::Completed => "completed",
        BatchStatus::Aborted => "ABORTED",
    };
    output.push_str(&format!(
        "Batch {} {} in {:.1} ms on {} process(es)\n",
        summary.batch, status, summary.elapsed_ms, summary.processes
    ));
    output.push_str(&format!(
        "  {} submitted, {} succeeded, {} failed",
        summary.submitted, summary.succeeded, summary.failed
    ));
    if summary.undelivered > 0 {
        output.push_str(&format!(", {} undelivered", summary.undelivered));
    }
    output.push('\n');

    output
}
