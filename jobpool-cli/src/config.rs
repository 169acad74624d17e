//! Configuration loading from pool.toml
//!
//! Pool configuration can be specified in a `pool.toml` file. The file is
//! discovered by walking up from the current directory, and the directory it
//! lives in becomes the project root (where the run guard is created).

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Name of the configuration file looked up during discovery
pub const CONFIG_FILE: &str = "pool.toml";

/// jobpool configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PoolConfig {
    /// Pool sizing and guard configuration
    #[serde(default)]
    pub pool: PoolSection,
    /// Output configuration
    #[serde(default)]
    pub output: OutputConfig,
}

/// `[pool]` section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolSection {
    /// Worker count used when neither full throttle nor an explicit count is
    /// requested. Defaults to half the logical cores (at least 1).
    #[serde(default)]
    pub safe_processes: Option<usize>,
    /// Upper bound on worker count. Defaults to the logical core count.
    #[serde(default)]
    pub full_throttle_processes: Option<usize>,
    /// How often the submitting thread checks for completion or abort
    #[serde(default = "default_poll_interval")]
    pub poll_interval: String,
    /// Guard file name, relative to the project root
    #[serde(default = "default_guard_file")]
    pub guard_file: String,
}

impl Default for PoolSection {
    fn default() -> Self {
        Self {
            safe_processes: None,
            full_throttle_processes: None,
            poll_interval: default_poll_interval(),
            guard_file: default_guard_file(),
        }
    }
}

fn default_poll_interval() -> String {
    "500ms".to_string()
}
fn default_guard_file() -> String {
    crate::guard::DEFAULT_GUARD_FILE.to_string()
}

/// `[output]` section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Default output format: "human" or "json"
    #[serde(default = "default_format")]
    pub format: String,
    /// Directory for reports written with a relative `--output` path
    #[serde(default = "default_output_dir")]
    pub directory: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            format: default_format(),
            directory: default_output_dir(),
        }
    }
}

fn default_format() -> String {
    "human".to_string()
}
fn default_output_dir() -> String {
    "target/jobpool".to_string()
}

impl PoolConfig {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Walk up from `start` looking for `pool.toml`.
    ///
    /// Returns the parsed configuration and the directory containing it. A
    /// file that fails to parse is reported and skipped.
    pub fn discover_from(start: &Path) -> Option<(Self, PathBuf)> {
        let mut dir = start.to_path_buf();
        loop {
            let config_path = dir.join(CONFIG_FILE);
            if config_path.exists() {
                return match Self::load(&config_path) {
                    Ok(config) => Some((config, dir)),
                    Err(e) => {
                        tracing::warn!(
                            path = %config_path.display(),
                            error = %e,
                            "ignoring unreadable configuration"
                        );
                        None
                    }
                };
            }
            if !dir.pop() {
                break;
            }
        }
        None
    }

    /// Discover configuration from the current directory
    pub fn discover() -> Option<(Self, PathBuf)> {
        let dir = std::env::current_dir().ok()?;
        Self::discover_from(&dir)
    }

    /// Configured poll interval, falling back to 500ms on a bad value
    pub fn poll_interval(&self) -> Duration {
        Self::parse_duration(&self.pool.poll_interval).unwrap_or_else(|e| {
            tracing::warn!(value = %self.pool.poll_interval, error = %e, "bad poll_interval, using 500ms");
            Duration::from_millis(500)
        })
    }

    /// Generate a default configuration as TOML string
    pub fn default_toml() -> String {
        r#"# jobpool configuration

[pool]
# Worker count for ordinary runs (default: half the logical cores)
# safe_processes = 4
# Upper bound for full-throttle runs and explicit counts (default: all cores)
# full_throttle_processes = 8
# How often to check for completion or cancellation
poll_interval = "500ms"
# Guard file marking a running batch; delete it to cancel
guard_file = ".jobpool.guard"

[output]
# Default output format: human or json
format = "human"
# Directory for reports written with a relative --output path
directory = "target/jobpool"
"#
        .to_string()
    }

    /// Parse duration string (e.g., "3s", "500ms", "2m")
    pub fn parse_duration(s: &str) -> anyhow::Result<Duration> {
        let s = s.trim();
        if s.is_empty() {
            return Err(anyhow::anyhow!("Empty duration string"));
        }

        // Find where the number ends and unit begins
        let (num_part, unit_part) = s
            .char_indices()
            .find(|(_, c)| c.is_alphabetic())
            .map(|(i, _)| s.split_at(i))
            .unwrap_or((s, "s"));

        let value: f64 = num_part
            .trim()
            .parse()
            .map_err(|_| anyhow::anyhow!("Invalid duration number: {}", num_part))?;
        if !value.is_finite() || value < 0.0 {
            return Err(anyhow::anyhow!("Duration must be non-negative: {}", s));
        }

        let multiplier: u64 = match unit_part.to_lowercase().as_str() {
            "ns" => 1,
            "us" | "µs" => 1_000,
            "ms" => 1_000_000,
            "s" | "" => 1_000_000_000,
            "m" | "min" => 60_000_000_000,
            _ => return Err(anyhow::anyhow!("Unknown duration unit: {}", unit_part)),
        };

        Ok(Duration::from_nanos((value * multiplier as f64) as u64))
    }
}
