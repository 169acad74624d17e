//! jobpool demo binary
//!
//! Registers a handful of jobs and hands control to the jobpool CLI. The
//! pool re-executes this same binary for its worker processes.
//!
//! ```text
//! jobpool-demo list
//! jobpool-demo map square 1 2 3 4
//! jobpool-demo run batch.toml --format json
//! ```

mod jobs;

fn main() -> anyhow::Result<()> {
    jobpool::run()
}
