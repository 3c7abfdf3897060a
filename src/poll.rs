//! Bounded-wait readiness check for the runner's own stdin and stdout.

use std::io::BufRead;
use std::os::fd::{AsRawFd, RawFd};
use std::time::Duration;

use tracing::debug;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Readiness {
    pub input: bool,
    pub output: bool,
}

/// Polls one readable and one writable descriptor.
///
/// Once the input side reports end of file it is dropped from the poll set:
/// a closed descriptor stays readable forever.
#[derive(Debug)]
pub struct StdioPoller {
    input_fd: RawFd,
    output_fd: RawFd,
    input_open: bool,
}

impl StdioPoller {
    pub fn new(input_fd: RawFd, output_fd: RawFd) -> Self {
        Self {
            input_fd,
            output_fd,
            input_open: true,
        }
    }

    /// Poller for the process's real stdin and stdout.
    pub fn stdio() -> Self {
        Self::new(
            std::io::stdin().as_raw_fd(),
            std::io::stdout().as_raw_fd(),
        )
    }

    pub fn input_open(&self) -> bool {
        self.input_open
    }

    pub fn close_input(&mut self) {
        if self.input_open {
            debug!(fd = self.input_fd, "input reached end of file, no longer polled");
        }
        self.input_open = false;
    }

    /// Wait up to `timeout` for either descriptor to become ready.
    pub fn wait(&self, timeout: Duration) -> std::io::Result<Readiness> {
        let input_events = if self.input_open { libc::POLLIN } else { 0 };
        let mut fds = [
            libc::pollfd {
                fd: if self.input_open { self.input_fd } else { -1 },
                events: input_events,
                revents: 0,
            },
            libc::pollfd {
                fd: self.output_fd,
                events: libc::POLLOUT,
                revents: 0,
            },
        ];
        let timeout_ms = libc::c_int::try_from(timeout.as_millis()).unwrap_or(libc::c_int::MAX);

        // SAFETY: `fds` is a valid array of two pollfd entries for the call's duration.
        let rc = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, timeout_ms) };
        if rc < 0 {
            let err = std::io::Error::last_os_error();
            if err.kind() == std::io::ErrorKind::Interrupted {
                return Ok(Readiness::default());
            }
            return Err(err);
        }

        let ready_in = libc::POLLIN | libc::POLLHUP | libc::POLLERR;
        Ok(Readiness {
            input: self.input_open && fds[0].revents & ready_in != 0,
            output: fds[1].revents & libc::POLLOUT != 0,
        })
    }
}

/// Read one line from `input`, returning `None` at end of file.
pub fn read_input_line<R: BufRead + ?Sized>(input: &mut R) -> std::io::Result<Option<String>> {
    let mut line = String::new();
    match input.read_line(&mut line)? {
        0 => Ok(None),
        _ => Ok(Some(line)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Write};
    use std::os::unix::net::UnixStream;

    #[test]
    fn reports_readable_and_writable_sides() {
        let (mut writer_end, reader_end) = UnixStream::pair().unwrap();
        let (out_a, _out_b) = UnixStream::pair().unwrap();

        let poller = StdioPoller::new(reader_end.as_raw_fd(), out_a.as_raw_fd());
        let ready = poller.wait(Duration::from_millis(10)).unwrap();
        assert!(!ready.input);
        assert!(ready.output);

        writer_end.write_all(b"hello\n").unwrap();
        let ready = poller.wait(Duration::from_millis(100)).unwrap();
        assert!(ready.input);
    }

    #[test]
    fn closed_input_is_not_polled() {
        let (writer_end, reader_end) = UnixStream::pair().unwrap();
        let (out_a, _out_b) = UnixStream::pair().unwrap();
        drop(writer_end);

        let mut poller = StdioPoller::new(reader_end.as_raw_fd(), out_a.as_raw_fd());
        assert!(poller.wait(Duration::from_millis(10)).unwrap().input);

        poller.close_input();
        assert!(!poller.input_open());
        assert!(!poller.wait(Duration::from_millis(10)).unwrap().input);
    }

    #[test]
    fn read_input_line_handles_eof() {
        let mut input = Cursor::new("first\nsecond");
        assert_eq!(read_input_line(&mut input).unwrap().as_deref(), Some("first\n"));
        assert_eq!(read_input_line(&mut input).unwrap().as_deref(), Some("second"));
        assert_eq!(read_input_line(&mut input).unwrap(), None);
    }
}
