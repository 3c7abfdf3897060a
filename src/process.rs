//! Liveness and termination of processes we only know by PID.

use tracing::debug;

/// Whether a process with this PID exists.
///
/// A process owned by another user still counts as alive.
pub fn is_alive(pid: u32) -> bool {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return false;
    };
    if pid <= 0 {
        return false;
    }
    // SAFETY: signal 0 performs only the existence and permission checks.
    let rc = unsafe { libc::kill(pid, 0) };
    if rc == 0 {
        return true;
    }
    std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

/// Send SIGTERM if the process still exists. Returns whether a signal was sent.
pub fn terminate(pid: u32) -> bool {
    if !is_alive(pid) {
        return false;
    }
    let Ok(raw) = libc::pid_t::try_from(pid) else {
        return false;
    };
    // SAFETY: plain kill(2) on a positive PID.
    let rc = unsafe { libc::kill(raw, libc::SIGTERM) };
    debug!(pid, sent = rc == 0, "sent SIGTERM");
    rc == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command;
    use std::time::{Duration, Instant};

    #[test]
    fn current_process_is_alive() {
        assert!(is_alive(std::process::id()));
    }

    #[test]
    fn zero_and_out_of_range_pids_are_not_alive() {
        assert!(!is_alive(0));
        assert!(!is_alive(u32::MAX));
    }

    #[test]
    fn sleeping_child_is_alive_until_terminated() {
        let mut child = Command::new("sleep").arg("10").spawn().unwrap();
        let pid = child.id();
        assert!(is_alive(pid));

        assert!(terminate(pid));
        child.wait().unwrap();

        let deadline = Instant::now() + Duration::from_secs(2);
        while is_alive(pid) && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(20));
        }
        assert!(!is_alive(pid));
        assert!(!terminate(pid));
    }
}
