//! Worker Processes
//!
//! A [`WorkerHandle`] is the supervisor's end of one worker process: the
//! child plus the two pipes it talks over. Each pool lane owns one handle
//! and drives one job at a time through it.
//!
//! ```text
//! supervisor                      worker (same binary, --jobpool-worker)
//!   commands  ── cmd pipe ──▶  fd 3
//!   messages  ◀── msg pipe ──  fd 4
//! ```

use jobpool_ipc::{
    FrameError, FrameReader, FrameWriter, IPC_FD_ENV, JobArgs, JobOutcome, JobRequest,
    PROTOCOL_VERSION, SupervisorCommand, WORKER_FLAG, WorkerCapabilities, WorkerMessage,
};
use std::fs::File;
use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::os::unix::process::CommandExt;
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use thiserror::Error;

/// How long a fresh worker gets to say hello
const HELLO_TIMEOUT: Duration = Duration::from_secs(10);

/// Granularity at which a lane notices the abort flag
pub(crate) const LANE_TICK: Duration = Duration::from_millis(100);

/// Time between SIGTERM and SIGKILL when a handle is dropped
const TERM_GRACE: Duration = Duration::from_millis(50);

/// Where the worker finds its pipes
const CHILD_CMD_FD: RawFd = 3;
const CHILD_MSG_FD: RawFd = 4;

/// Ways a worker can let its lane down
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("could not start worker: {0}")]
    Spawn(#[from] io::Error),

    #[error("worker IPC failed: {0}")]
    Ipc(#[from] FrameError),

    #[error("worker gone: {0}")]
    WorkerGone(String),

    #[error("worker did not say hello within {0:?}")]
    HandshakeTimeout(Duration),

    #[error("unexpected worker message: expected {expected}, got {got}")]
    Protocol { expected: String, got: String },

    #[error("batch aborted")]
    Aborted,
}

/// One pipe; both ends are close-on-exec until placed in a child
struct Pipe {
    read: OwnedFd,
    write: OwnedFd,
}

impl Pipe {
    /// Lanes spawn concurrently, so the flag must be set atomically with
    /// the pipe or a sibling's child could inherit these ends.
    #[cfg(any(target_os = "linux", target_os = "android", target_os = "freebsd"))]
    fn new() -> io::Result<Self> {
        let mut fds = [0 as RawFd; 2];
        if unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC) } != 0 {
            return Err(io::Error::last_os_error());
        }
        let (read, write) = unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) };
        Ok(Self { read, write })
    }

    // No pipe2 here; a concurrent spawn may still inherit the ends briefly
    #[cfg(not(any(target_os = "linux", target_os = "android", target_os = "freebsd")))]
    fn new() -> io::Result<Self> {
        let mut fds = [0 as RawFd; 2];
        if unsafe { libc::pipe(fds.as_mut_ptr()) } != 0 {
            return Err(io::Error::last_os_error());
        }
        // Owned right away so every early return below closes them
        let (read, write) = unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) };
        set_cloexec(read.as_raw_fd(), true)?;
        set_cloexec(write.as_raw_fd(), true)?;
        Ok(Self { read, write })
    }
}

fn set_cloexec(fd: RawFd, on: bool) -> io::Result<()> {
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFD) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    let flags = if on {
        flags | libc::FD_CLOEXEC
    } else {
        flags & !libc::FD_CLOEXEC
    };
    if unsafe { libc::fcntl(fd, libc::F_SETFD, flags) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Runs in the forked child before exec: put the pipe ends on fds 3 and 4.
///
/// Both ends are first moved above the target range so that neither `dup2`
/// can clobber the other. Only async-signal-safe calls are allowed here.
fn place_child_fds(cmd_read: RawFd, msg_write: RawFd) -> io::Result<()> {
    let moved = |fd: RawFd| {
        let high = unsafe { libc::fcntl(fd, libc::F_DUPFD_CLOEXEC, 10) };
        if high < 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(high)
        }
    };
    let (cmd_read, msg_write) = (moved(cmd_read)?, moved(msg_write)?);
    for (fd, target) in [(cmd_read, CHILD_CMD_FD), (msg_write, CHILD_MSG_FD)] {
        if unsafe { libc::dup2(fd, target) } < 0 {
            return Err(io::Error::last_os_error());
        }
        set_cloexec(target, false)?;
    }
    Ok(())
}

#[derive(Debug, PartialEq, Eq)]
enum Readiness {
    Readable,
    Idle,
    HungUp,
}

/// Wait up to `timeout` for `fd` to become readable
fn poll_readable(fd: RawFd, timeout: Duration) -> io::Result<Readiness> {
    let mut pfd = libc::pollfd {
        fd,
        events: libc::POLLIN,
        revents: 0,
    };
    let timeout_ms = timeout.as_millis().min(i32::MAX as u128) as libc::c_int;

    match unsafe { libc::poll(&mut pfd, 1, timeout_ms) } {
        n if n < 0 => {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                Ok(Readiness::Idle)
            } else {
                Err(err)
            }
        }
        0 => Ok(Readiness::Idle),
        // Data wins over hang-up: a worker may write its last frame and exit
        _ if pfd.revents & libc::POLLIN != 0 => Ok(Readiness::Readable),
        _ if pfd.revents & (libc::POLLHUP | libc::POLLERR | libc::POLLNVAL) != 0 => {
            Ok(Readiness::HungUp)
        }
        _ => Ok(Readiness::Idle),
    }
}

fn pipe_error(e: io::Error) -> SupervisorError {
    SupervisorError::WorkerGone(format!("pipe error: {e}"))
}

/// Wait for the worker's `Hello` and check its protocol version
fn handshake(
    child: &mut Child,
    messages: &mut FrameReader<File>,
    message_fd: RawFd,
) -> Result<WorkerCapabilities, SupervisorError> {
    let deadline = Instant::now() + HELLO_TIMEOUT;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(SupervisorError::HandshakeTimeout(HELLO_TIMEOUT));
        }
        match poll_readable(message_fd, remaining.min(LANE_TICK)).map_err(pipe_error)? {
            Readiness::Readable => break,
            Readiness::HungUp => {
                return Err(SupervisorError::WorkerGone(
                    "closed its pipe before the handshake".to_string(),
                ));
            }
            Readiness::Idle => {
                if let Ok(Some(status)) = child.try_wait() {
                    return Err(SupervisorError::WorkerGone(format!(
                        "exited before the handshake ({status})"
                    )));
                }
            }
        }
    }

    match messages.read::<WorkerMessage>()? {
        WorkerMessage::Hello(caps) if caps.protocol_version == PROTOCOL_VERSION => Ok(caps),
        WorkerMessage::Hello(caps) => Err(SupervisorError::Protocol {
            expected: format!("protocol version {PROTOCOL_VERSION}"),
            got: format!("protocol version {}", caps.protocol_version),
        }),
        other => Err(SupervisorError::Protocol {
            expected: "Hello".to_string(),
            got: format!("{other:?}"),
        }),
    }
}

/// Supervisor side of one worker process
pub struct WorkerHandle {
    child: Child,
    commands: FrameWriter<File>,
    messages: FrameReader<File>,
    message_fd: RawFd,
    capabilities: WorkerCapabilities,
}

impl WorkerHandle {
    /// Start `binary` in worker mode and complete the handshake
    pub fn spawn(binary: &Path) -> Result<Self, SupervisorError> {
        let cmd_pipe = Pipe::new()?;
        let msg_pipe = Pipe::new()?;
        let (child_cmd, child_msg) = (cmd_pipe.read.as_raw_fd(), msg_pipe.write.as_raw_fd());

        let mut command = Command::new(binary);
        command
            .arg(WORKER_FLAG)
            .env(IPC_FD_ENV, format!("{CHILD_CMD_FD},{CHILD_MSG_FD}"))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit());
        unsafe {
            command.pre_exec(move || place_child_fds(child_cmd, child_msg));
        }
        let mut child = command.spawn()?;

        // The child-side ends belong to the worker now
        drop(cmd_pipe.read);
        drop(msg_pipe.write);

        let message_fd = msg_pipe.read.as_raw_fd();
        let mut messages = FrameReader::new(File::from(msg_pipe.read));
        let commands = FrameWriter::new(File::from(cmd_pipe.write));

        let capabilities = match handshake(&mut child, &mut messages, message_fd) {
            Ok(caps) => caps,
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(e);
            }
        };

        tracing::debug!(
            pid = child.id(),
            registered = capabilities.registered_jobs,
            "worker spawned"
        );
        Ok(Self {
            child,
            commands,
            messages,
            message_fd,
            capabilities,
        })
    }

    /// What the worker announced in its handshake
    pub fn capabilities(&self) -> &WorkerCapabilities {
        &self.capabilities
    }

    /// OS process id of the worker
    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    /// Run one job and wait for its outcome.
    ///
    /// Returns [`SupervisorError::Aborted`] as soon as `abort` is observed;
    /// the caller kills the worker then.
    pub fn run_job(
        &mut self,
        index: usize,
        function: &str,
        args: &JobArgs,
        high_priority: bool,
        abort: &AtomicBool,
    ) -> Result<JobOutcome, SupervisorError> {
        let request = JobRequest {
            index: index as u64,
            function: function.to_string(),
            args: args.clone(),
            high_priority,
        };
        self.commands.write(&SupervisorCommand::Run(request))?;

        loop {
            if abort.load(Ordering::Acquire) {
                return Err(SupervisorError::Aborted);
            }

            if !self.messages.has_buffered_data() {
                match poll_readable(self.message_fd, LANE_TICK).map_err(pipe_error)? {
                    Readiness::Readable => {}
                    Readiness::Idle if self.is_alive() => continue,
                    Readiness::Idle | Readiness::HungUp => {
                        return Err(SupervisorError::WorkerGone(self.exit_description()));
                    }
                }
            }

            match self.messages.read::<WorkerMessage>() {
                Ok(WorkerMessage::Started { index: i, elevated }) => {
                    tracing::debug!(index = i, elevated, pid = self.pid(), "job running");
                }
                Ok(WorkerMessage::Finished { index: i, outcome }) if i == index as u64 => {
                    return Ok(outcome);
                }
                Ok(other) => {
                    return Err(SupervisorError::Protocol {
                        expected: format!("outcome of job {index}"),
                        got: format!("{other:?}"),
                    });
                }
                Err(FrameError::EndOfStream | FrameError::InvalidFrame(_)) => {
                    return Err(SupervisorError::WorkerGone(self.exit_description()));
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Why the worker went away, reaping it if it has exited
    fn exit_description(&mut self) -> String {
        // A dying child may take a moment to become waitable
        for _ in 0..10 {
            if let Ok(Some(status)) = self.child.try_wait() {
                return format!("worker {} exited ({status})", self.child.id());
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        format!("worker {} closed its pipe", self.child.id())
    }

    /// Ask the worker to exit and wait for it
    pub fn shutdown(mut self) -> Result<(), SupervisorError> {
        self.commands.write(&SupervisorCommand::Shutdown)?;
        self.child.wait()?;
        Ok(())
    }

    /// Whether the worker process is still running
    pub fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    /// SIGKILL the worker and reap it
    pub fn kill(&mut self) -> Result<(), SupervisorError> {
        self.child.kill()?;
        self.child.wait()?;
        Ok(())
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        if !self.is_alive() {
            return;
        }
        unsafe {
            libc::kill(self.child.id() as libc::pid_t, libc::SIGTERM);
        }
        std::thread::sleep(TERM_GRACE);
        if self.is_alive() {
            let _ = self.child.kill();
        }
        let _ = self.child.wait();
    }
}
