#![warn(missing_docs)]
//! jobpool IPC Protocol
//!
//! Wire protocol between the pool supervisor and its worker processes.
//! Uses rkyv with validation for binary serialization, framed with a 4-byte
//! length prefix. Job arguments, results and failures all travel as plain
//! data; nothing on the wire refers to live objects in either process.

mod framing;
mod messages;
mod value;

pub use framing::{FrameError, FrameReader, FrameWriter, MAX_FRAME_SIZE, read_frame, write_frame};
pub use messages::{
    FailureKind, JobFailure, JobOutcome, JobRequest, SupervisorCommand, WorkerCapabilities,
    WorkerMessage,
};
pub use value::{ArgError, JobArgs, KeywordArg, Value};

/// Protocol version for compatibility checking
pub const PROTOCOL_VERSION: u32 = 1;

/// Environment variable telling a worker which fds carry IPC (`"<read>,<write>"`)
pub const IPC_FD_ENV: &str = "JOBPOOL_IPC_FD";

/// Command-line flag that switches a binary into worker mode
pub const WORKER_FLAG: &str = "--jobpool-worker";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_version() {
        assert_eq!(PROTOCOL_VERSION, 1);
    }

    #[test]
    fn test_worker_flag_is_long_option() {
        assert!(WORKER_FLAG.starts_with("--"));
    }
}
