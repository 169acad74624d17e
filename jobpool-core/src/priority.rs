//! OS Scheduling Priority
//!
//! High-priority jobs ask their worker process to lower its nice value.
//! Unprivileged users usually cannot do that; callers treat failure as a
//! warning and run the job at normal priority.

/// Nice value requested for high-priority jobs
pub const HIGH_PRIORITY_NICE: i32 = -10;

/// Raise the scheduling priority of the current process.
///
/// The change lasts for the lifetime of the process.
#[cfg(unix)]
pub fn elevate_priority() -> Result<(), std::io::Error> {
    let ret = unsafe { libc::setpriority(libc::PRIO_PROCESS, 0, HIGH_PRIORITY_NICE) };
    if ret == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}

#[cfg(not(unix))]
pub fn elevate_priority() -> Result<(), std::io::Error> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "priority elevation is only implemented on unix",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_elevation_reports_permission_errors() {
        // Succeeds as root, fails with EACCES/EPERM otherwise; never panics.
        match elevate_priority() {
            Ok(()) => {}
            Err(e) => assert!(matches!(
                e.kind(),
                std::io::ErrorKind::PermissionDenied | std::io::ErrorKind::Unsupported
            )),
        }
    }
}
