//! Interactive shell session.
//!
//! Spawns one long-lived shell in a PTY and talks to it as a line-oriented
//! text stream:
//! - commands go in as raw lines
//! - output comes back one CRLF-terminated line at a time, with a read timeout
//! - structured values (subshell PID, exit code) are recovered by echoing a
//!   sentinel tag in front of a shell expression and scanning for it
//!
//! A background thread drains the PTY into a channel so reads can time out
//! without blocking on the descriptor.

pub mod profile;

pub use profile::{Probe, ShellProfile, ShellRegistry};

use std::fmt;
use std::io::{Read, Write};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use portable_pty::{Child, CommandBuilder, MasterPty, PtySize, native_pty_system};
use tracing::{debug, info, trace, warn};

use crate::errors::{RunnerError, RunnerResult};

/// Interrupt character, delivered to the foreground job by the terminal.
const ETX: u8 = 0x03;

/// Wide enough that long commands are echoed back without line wrapping.
const PTY_COLS: u16 = 512;

/// Echoed back by the shell once it is ready for the next command.
const RESYNC_MARKER: &str = "scriptrun_session_ready";

enum RawRead {
    Line(String),
    Eof(String),
    Timeout,
}

struct ShellProcess {
    child: Box<dyn Child + Send + Sync>,
    writer: Box<dyn Write + Send>,
    output: Receiver<Vec<u8>>,
    pending: Vec<u8>,
    eof: bool,
    _master: Box<dyn MasterPty + Send>,
}

impl ShellProcess {
    fn read_line(&mut self, timeout: Duration) -> RawRead {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(pos) = find_crlf(&self.pending) {
                let line: Vec<u8> = self.pending.drain(..pos + 2).collect();
                return RawRead::Line(String::from_utf8_lossy(&line).into_owned());
            }
            if self.eof {
                return RawRead::Eof(self.take_pending());
            }

            let now = Instant::now();
            if now >= deadline {
                return RawRead::Timeout;
            }
            match self.output.recv_timeout(deadline - now) {
                Ok(chunk) => self.pending.extend_from_slice(&chunk),
                Err(RecvTimeoutError::Timeout) => return RawRead::Timeout,
                Err(RecvTimeoutError::Disconnected) => self.eof = true,
            }
        }
    }

    /// Accumulate output until the stream ends or `timeout` elapses.
    /// Returns whether end of stream was reached.
    fn wait_for_eof(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while !self.eof {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            match self.output.recv_timeout(deadline - now) {
                Ok(chunk) => self.pending.extend_from_slice(&chunk),
                Err(RecvTimeoutError::Timeout) => return false,
                Err(RecvTimeoutError::Disconnected) => self.eof = true,
            }
        }
        true
    }

    fn pending_text(&self) -> String {
        String::from_utf8_lossy(&self.pending).into_owned()
    }

    fn take_pending(&mut self) -> String {
        let pending = std::mem::take(&mut self.pending);
        String::from_utf8_lossy(&pending).into_owned()
    }
}

fn find_crlf(bytes: &[u8]) -> Option<usize> {
    bytes.windows(2).position(|pair| pair == b"\r\n")
}

/// A shell flavor plus, once spawned, its live process.
pub struct Shell {
    profile: ShellProfile,
    timeout: Duration,
    process: Option<ShellProcess>,
    last_line: String,
}

impl fmt::Debug for Shell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Shell")
            .field("name", &self.profile.name)
            .field("path", &self.profile.path)
            .field("timeout", &self.timeout)
            .field("spawned", &self.process.is_some())
            .field("last_line", &self.last_line)
            .finish()
    }
}

impl Shell {
    /// Validate the shell binary. Nothing is spawned yet.
    pub fn new(profile: ShellProfile, timeout: Duration) -> RunnerResult<Self> {
        profile.check_executable()?;
        Ok(Self {
            profile,
            timeout,
            process: None,
            last_line: String::new(),
        })
    }

    pub fn profile(&self) -> &ShellProfile {
        &self.profile
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn is_spawned(&self) -> bool {
        self.process.is_some()
    }

    /// Most recent value returned by [`Shell::read_output_line`].
    pub fn last_line(&self) -> &str {
        &self.last_line
    }

    pub fn process_id(&self) -> Option<u32> {
        self.process.as_ref().and_then(|p| p.child.process_id())
    }

    /// Start the shell. Any previously spawned process is terminated first.
    pub fn spawn(&mut self) -> RunnerResult<()> {
        self.terminate();

        let pair = native_pty_system()
            .openpty(PtySize {
                rows: 24,
                cols: PTY_COLS,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| RunnerError::io("failed to open PTY", std::io::Error::other(e)))?;

        let mut cmd = CommandBuilder::new(&self.profile.path);
        for arg in &self.profile.args {
            cmd.arg(arg);
        }
        for (key, val) in &self.profile.env {
            cmd.env(key, val);
        }
        if let Ok(cwd) = std::env::current_dir() {
            cmd.cwd(cwd);
        }

        let child = pair.slave.spawn_command(cmd).map_err(|e| {
            RunnerError::io(
                format!("failed to spawn {}", self.profile.path.display()),
                std::io::Error::other(e),
            )
        })?;
        drop(pair.slave);

        let mut reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| RunnerError::io("failed to clone PTY reader", std::io::Error::other(e)))?;
        let writer = pair
            .master
            .take_writer()
            .map_err(|e| RunnerError::io("failed to take PTY writer", std::io::Error::other(e)))?;

        let (tx, rx) = mpsc::channel::<Vec<u8>>();
        thread::Builder::new()
            .name("shell-output".to_string())
            .spawn(move || {
                let mut buf = [0u8; 4096];
                loop {
                    match reader.read(&mut buf) {
                        Ok(0) => break,
                        Ok(n) => {
                            if tx.send(buf[..n].to_vec()).is_err() {
                                break;
                            }
                        }
                        Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                        Err(e) => {
                            debug!("shell output stream closed: {e}");
                            break;
                        }
                    }
                }
            })
            .map_err(|e| RunnerError::io("failed to start shell output reader", e))?;

        info!(
            shell = %self.profile.name,
            path = %self.profile.path.display(),
            pid = ?child.process_id(),
            timeout_ms = self.timeout.as_millis() as u64,
            "spawned shell session"
        );

        self.process = Some(ShellProcess {
            child,
            writer,
            output: rx,
            pending: Vec::new(),
            eof: false,
            _master: pair.master,
        });
        self.last_line.clear();
        Ok(())
    }

    /// Re-spawn with a different read timeout.
    pub fn spawn_with_timeout(&mut self, timeout: Duration) -> RunnerResult<()> {
        self.timeout = timeout;
        self.spawn()
    }

    /// Stop the shell process. Safe to call repeatedly.
    pub fn terminate(&mut self) {
        if let Some(mut process) = self.process.take() {
            let pid = process.child.process_id();
            if let Err(e) = process.child.kill() {
                debug!(?pid, "shell kill returned error (likely already exited): {e}");
            }
            match process.child.wait() {
                Ok(status) => debug!(?pid, success = status.success(), "shell terminated"),
                Err(e) => warn!(?pid, "failed to reap shell process: {e}"),
            }
        }
    }

    pub fn is_alive(&mut self) -> bool {
        match self.process.as_mut() {
            Some(process) => matches!(process.child.try_wait(), Ok(None)),
            None => false,
        }
    }

    fn process_mut(&mut self) -> RunnerResult<&mut ShellProcess> {
        let name = self.profile.name.clone();
        self.process
            .as_mut()
            .ok_or(RunnerError::SessionNotSpawned { shell: name })
    }

    /// Write `command` followed by a newline.
    pub fn send_command(&mut self, command: &str) -> RunnerResult<()> {
        debug!(command = %command, "sending command to shell");
        let process = self.process_mut()?;
        process
            .writer
            .write_all(format!("{command}\n").as_bytes())
            .and_then(|()| process.writer.flush())
            .map_err(|e| RunnerError::io("failed to write command to shell", e))
    }

    /// Interrupt whatever is running in the foreground of the session.
    pub fn send_interrupt(&mut self) -> RunnerResult<()> {
        let process = self.process_mut()?;
        process
            .writer
            .write_all(&[ETX])
            .and_then(|()| process.writer.flush())
            .map_err(|e| RunnerError::io("failed to send interrupt to shell", e))
    }

    /// Interrupt the foreground job and wait for the session to echo a
    /// marker, discarding everything printed before it.
    pub fn resync(&mut self, timeout: Duration) -> RunnerResult<()> {
        self.send_interrupt()?;
        self.send_command(&format!("echo {RESYNC_MARKER}"))?;

        let deadline = Instant::now() + timeout;
        let step = self.timeout;
        let ready = {
            let process = self.process_mut()?;
            loop {
                if Instant::now() >= deadline {
                    break false;
                }
                match process.read_line(step) {
                    RawRead::Line(line) if line.trim() == RESYNC_MARKER => break true,
                    RawRead::Line(line) => trace!(line = %line.escape_debug(), "discarded"),
                    RawRead::Eof(_) => break false,
                    RawRead::Timeout => {}
                }
            }
        };

        if !ready {
            return Err(RunnerError::SessionLost {
                shell: self.profile.name.clone(),
            });
        }
        debug!("shell session back at prompt");
        self.last_line.clear();
        Ok(())
    }

    /// Read one line of output.
    ///
    /// On timeout the partial, not yet terminated output is reported once as
    /// the new last line; while it stays the same (or one contains the other)
    /// an empty string is returned instead, meaning "nothing new".
    pub fn read_output_line(&mut self) -> RunnerResult<String> {
        let timeout = self.timeout;
        let process = self.process_mut()?;
        let line = match process.read_line(timeout) {
            RawRead::Line(line) | RawRead::Eof(line) => line,
            RawRead::Timeout => {
                let before = process.pending_text();
                if self.last_line == before
                    || before.contains(self.last_line.as_str())
                    || self.last_line.contains(before.as_str())
                {
                    String::new()
                } else {
                    before
                }
            }
        };
        trace!(line = %line.escape_debug(), "shell line");
        self.last_line = line;
        Ok(self.last_line.clone())
    }

    /// Read until end of stream or `timeout`, returning everything collected.
    pub fn read_output_all(&mut self, script_name: &str, timeout: Duration) -> RunnerResult<String> {
        let process = self.process_mut()?;
        let reached_eof = process.wait_for_eof(timeout);
        let output = process.take_pending();
        if !reached_eof && output.is_empty() {
            return Err(RunnerError::NoOutputProduced {
                script: script_name.to_string(),
            });
        }
        Ok(output)
    }

    /// Lines of output until the first empty read.
    pub fn lines(&mut self) -> Lines<'_> {
        Lines { shell: self }
    }

    pub fn subshell_command(&self, command: &str) -> String {
        self.profile.subshell_command(command)
    }

    pub fn pid_command(&self) -> String {
        self.profile.pid_command()
    }

    /// Scan output for the tagged subshell PID.
    pub fn find_subshell_pid(&mut self) -> RunnerResult<u32> {
        let probe = self.profile.pid.clone();
        for line in self.lines() {
            let line = line?;
            if !probe.matches(&line) {
                continue;
            }
            if let Some(pid) = probe.extract(&line).and_then(|v| u32::try_from(v).ok()) {
                debug!(pid, "found subshell pid");
                return Ok(pid);
            }
        }
        Err(RunnerError::PidNotFound {
            shell: self.profile.name.clone(),
        })
    }

    /// Scan output for the tagged exit code.
    pub fn find_subshell_exit_code(&mut self) -> RunnerResult<i32> {
        let probe = self.profile.exit_code.clone();
        for line in self.lines() {
            let line = line?;
            if !probe.matches(&line) {
                continue;
            }
            if let Some(code) = probe.extract(&line).and_then(|v| i32::try_from(v).ok()) {
                debug!(code, "found subshell exit code");
                return Ok(code);
            }
        }
        Err(RunnerError::ExitCodeNotFound {
            shell: self.profile.name.clone(),
        })
    }

    /// Ask the shell for the last exit code, resending the probe until a
    /// tagged value comes back.
    ///
    /// There is no retry limit: a shell that never answers keeps this loop
    /// spinning. Only a failed write to the session ends it early.
    pub fn get_subshell_exit_code(&mut self) -> RunnerResult<i32> {
        let command = self.profile.exit_code_command();
        loop {
            self.send_command(&command)?;
            match self.find_subshell_exit_code() {
                Ok(code) => return Ok(code),
                Err(RunnerError::ExitCodeNotFound { .. }) => {
                    trace!("exit code probe unanswered, resending");
                }
                Err(err) => return Err(err),
            }
        }
    }
}

impl Drop for Shell {
    fn drop(&mut self) {
        self.terminate();
    }
}

/// Iterator over output lines; ends at the first empty read.
pub struct Lines<'a> {
    shell: &'a mut Shell,
}

impl Iterator for Lines<'_> {
    type Item = RunnerResult<String>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.shell.read_output_line() {
            Ok(line) if line.is_empty() => None,
            Ok(line) => Some(Ok(line)),
            Err(err) => Some(Err(err)),
        }
    }
}
