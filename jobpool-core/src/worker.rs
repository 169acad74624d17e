//! Worker Process Entry Point
//!
//! Handles the worker side of the supervisor-worker architecture: announce
//! capabilities, then run one job per `Run` command until told to stop.
//!
//! On Unix, uses the fds named in `JOBPOOL_IPC_FD` (3/4 by default) and
//! installs a SIGTERM handler for graceful shutdown. On non-Unix, falls back
//! to stdin/stdout and skips signal handling.

use crate::{elevate_priority, execute_job, registered_jobs};
use jobpool_ipc::{
    FrameReader, FrameWriter, IPC_FD_ENV, JobRequest, SupervisorCommand, WorkerCapabilities,
    WorkerMessage,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

#[cfg(unix)]
use std::os::unix::io::FromRawFd;

/// Global flag set by SIGTERM handler to request graceful shutdown.
static SHUTDOWN_REQUESTED: AtomicBool = AtomicBool::new(false);

/// Check if a graceful shutdown has been requested via SIGTERM.
pub fn shutdown_requested() -> bool {
    SHUTDOWN_REQUESTED.load(Ordering::Relaxed)
}

/// Install a SIGTERM handler that sets the `SHUTDOWN_REQUESTED` flag.
/// The handler is async-signal-safe (only sets an atomic).
#[cfg(unix)]
fn install_sigterm_handler() {
    unsafe {
        let mut sa: libc::sigaction = std::mem::zeroed();
        sa.sa_sigaction = sigterm_handler as *const () as usize;
        sa.sa_flags = libc::SA_RESTART;
        libc::sigemptyset(&mut sa.sa_mask);
        libc::sigaction(libc::SIGTERM, &sa, std::ptr::null_mut());
    }
}

#[cfg(unix)]
extern "C" fn sigterm_handler(_sig: libc::c_int) {
    SHUTDOWN_REQUESTED.store(true, Ordering::Relaxed);
}

#[cfg(not(unix))]
fn install_sigterm_handler() {}

/// IPC transport: either inherited fd pair or stdin/stdout fallback.
enum IpcTransport {
    #[cfg(unix)]
    Fds { read_fd: i32, write_fd: i32 },
    Stdio,
}

fn detect_transport() -> IpcTransport {
    #[cfg(unix)]
    if let Ok(val) = std::env::var(IPC_FD_ENV) {
        if let Some((r, w)) = val.split_once(',') {
            if let (Ok(read_fd), Ok(write_fd)) = (r.trim().parse(), w.trim().parse()) {
                return IpcTransport::Fds { read_fd, write_fd };
            }
        }
        tracing::warn!(
            value = %val,
            "invalid {IPC_FD_ENV} (expected <read_fd>,<write_fd>), falling back to stdio"
        );
    }
    IpcTransport::Stdio
}

/// Worker main loop
pub struct WorkerMain {
    reader: FrameReader<Box<dyn std::io::Read>>,
    writer: FrameWriter<Box<dyn std::io::Write>>,
    elevated: bool,
    elevation_failed: bool,
}

impl WorkerMain {
    /// Create a new worker, using the fds from `JOBPOOL_IPC_FD` if set,
    /// otherwise stdin/stdout.
    pub fn new() -> Self {
        match detect_transport() {
            #[cfg(unix)]
            IpcTransport::Fds { read_fd, write_fd } => {
                let read_file = unsafe { std::fs::File::from_raw_fd(read_fd) };
                let write_file = unsafe { std::fs::File::from_raw_fd(write_fd) };
                Self::with_transport(Box::new(read_file), Box::new(write_file))
            }
            IpcTransport::Stdio => {
                Self::with_transport(Box::new(std::io::stdin()), Box::new(std::io::stdout()))
            }
        }
    }

    /// Create a worker over an explicit transport
    pub fn with_transport(reader: Box<dyn std::io::Read>, writer: Box<dyn std::io::Write>) -> Self {
        Self {
            reader: FrameReader::new(reader),
            writer: FrameWriter::new(writer),
            elevated: false,
            elevation_failed: false,
        }
    }

    /// Run the worker main loop until `Shutdown`, SIGTERM or a closed pipe
    pub fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        install_sigterm_handler();

        let registered = registered_jobs().len() as u32;
        self.writer
            .write(&WorkerMessage::Hello(WorkerCapabilities::current(registered)))?;
        tracing::debug!(pid = std::process::id(), registered, "worker ready");

        loop {
            if shutdown_requested() {
                break;
            }

            let command: SupervisorCommand = match self.reader.read() {
                Ok(command) => command,
                // Supervisor went away; nothing left to report to.
                Err(jobpool_ipc::FrameError::EndOfStream) => break,
                Err(e) => return Err(e.into()),
            };

            match command {
                SupervisorCommand::Run(request) => self.run_job(request)?,
                SupervisorCommand::Shutdown => break,
            }
        }

        Ok(())
    }

    fn run_job(&mut self, request: JobRequest) -> Result<(), Box<dyn std::error::Error>> {
        let pid = std::process::id();

        if request.high_priority {
            self.ensure_elevated();
        }
        self.writer.write(&WorkerMessage::Started {
            index: request.index,
            elevated: self.elevated,
        })?;
        tracing::info!(
            pid,
            index = request.index,
            function = %request.function,
            high_priority = request.high_priority,
            "job started"
        );

        let start = Instant::now();
        let outcome = execute_job(&request.function, &request.args);
        let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;

        match &outcome {
            jobpool_ipc::JobOutcome::Success(_) => {
                tracing::info!(pid, index = request.index, elapsed_ms, "job completed")
            }
            jobpool_ipc::JobOutcome::Failure(failure) => tracing::warn!(
                pid,
                index = request.index,
                elapsed_ms,
                %failure,
                "job failed"
            ),
        }

        self.writer.write(&WorkerMessage::Finished {
            index: request.index,
            outcome,
        })?;
        Ok(())
    }

    fn ensure_elevated(&mut self) {
        if self.elevated || self.elevation_failed {
            return;
        }
        match elevate_priority() {
            Ok(()) => self.elevated = true,
            Err(e) => {
                self.elevation_failed = true;
                tracing::warn!(error = %e, "could not raise worker priority; running at normal priority");
            }
        }
    }
}

impl Default for WorkerMain {
    fn default() -> Self {
        Self::new()
    }
}
