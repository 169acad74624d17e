//! Batch Files
//!
//! A batch file lists jobs in submission order, in TOML or JSON:
//!
//! ```toml
//! [[jobs]]
//! function = "square"
//! args = [3]
//!
//! [[jobs]]
//! function = "sleep_ms"
//! args = [250]
//! kwargs = { label = "slow" }
//! high_priority = true
//! ```

use anyhow::Context;
use jobpool_core::{JobArgs, JobDescriptor, Value};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

/// Parsed batch file
#[derive(Debug, Clone, Deserialize)]
pub struct BatchFile {
    /// Jobs in submission order
    #[serde(default)]
    pub jobs: Vec<BatchEntry>,
}

/// One `[[jobs]]` entry
#[derive(Debug, Clone, Deserialize)]
pub struct BatchEntry {
    /// Registry id; missing entries fail validation at submit time
    #[serde(default)]
    pub function: Option<String>,
    /// Positional arguments
    #[serde(default)]
    pub args: Vec<Value>,
    /// Keyword arguments
    #[serde(default)]
    pub kwargs: BTreeMap<String, Value>,
    /// Raise the worker's priority for this job
    #[serde(default)]
    pub high_priority: bool,
}

impl BatchEntry {
    fn into_descriptor(self) -> JobDescriptor {
        let args = self
            .kwargs
            .into_iter()
            .fold(JobArgs::positional(self.args), |args, (name, value)| {
                args.kwarg(name, value)
            });
        JobDescriptor {
            function: self.function,
            args,
            high_priority: self.high_priority,
        }
    }
}

impl BatchFile {
    /// Load a batch file; `.json` files are parsed as JSON, everything else as TOML
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading batch file {}", path.display()))?;
        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        let parsed = if is_json {
            Self::from_json(&content)
        } else {
            Self::from_toml(&content)
        };
        parsed.with_context(|| format!("parsing batch file {}", path.display()))
    }

    /// Parse TOML text
    pub fn from_toml(content: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Parse JSON text
    pub fn from_json(content: &str) -> anyhow::Result<Self> {
        Ok(serde_json::from_str(content)?)
    }

    /// Convert the entries into job descriptors
    pub fn into_jobs(self) -> Vec<JobDescriptor> {
        self.jobs
            .into_iter()
            .map(BatchEntry::into_descriptor)
            .collect()
    }
}

/// Parse one command-line argument: JSON if it parses, otherwise a string
pub fn parse_cli_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::Str(raw.to_string()))
}
