//! Temporary file collecting a script's standard error.
//!
//! The shell itself writes into the file through a redirection appended to
//! the execution command; the runner polls it, taking the content and
//! truncating the file in one step.

use std::fs::OpenOptions;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use tracing::{debug, trace, warn};

use crate::errors::{RunnerError, RunnerResult};

pub const ERROR_BUFFER_FILE_NAME: &str = "errors_temp.log";

#[derive(Debug, Clone)]
pub struct ErrorBuffer {
    path: PathBuf,
}

impl ErrorBuffer {
    pub fn new(directory: &Path) -> Self {
        Self {
            path: directory.join(ERROR_BUFFER_FILE_NAME),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// True when the file exists and holds more than whitespace.
    pub fn exist(&self) -> bool {
        match std::fs::read_to_string(&self.path) {
            Ok(content) => !content.trim().is_empty(),
            Err(_) => false,
        }
    }

    /// Take everything written so far and empty the file.
    pub fn read(&self) -> RunnerResult<String> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&self.path)
            .map_err(|e| {
                RunnerError::io(format!("failed to open {}", self.path.display()), e)
            })?;

        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)
            .and_then(|_| file.seek(SeekFrom::Start(0)))
            .and_then(|_| file.set_len(0))
            .map_err(|e| {
                RunnerError::io(format!("failed to drain {}", self.path.display()), e)
            })?;

        trace!(bytes = bytes.len(), "drained error buffer");
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Shell fragment redirecting standard error into the buffer.
    ///
    /// Appending keeps the shell's writes at the end of the file after the
    /// runner truncates it.
    pub fn create_error_redirection(&self) -> String {
        format!(
            " 2>> {}",
            shell_words::quote(&self.path.to_string_lossy())
        )
    }

    /// Remove the file if present.
    pub fn delete(&self) -> RunnerResult<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                debug!(path = %self.path.display(), "removed error buffer");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(RunnerError::io(
                format!("failed to remove {}", self.path.display()),
                e,
            )),
        }
    }

    /// Guard that deletes the file when dropped.
    pub fn scope(&self) -> ErrorBufferScope<'_> {
        ErrorBufferScope { buffer: self }
    }
}

#[derive(Debug)]
pub struct ErrorBufferScope<'a> {
    buffer: &'a ErrorBuffer,
}

impl Drop for ErrorBufferScope<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.buffer.delete() {
            warn!("{e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command;

    #[test]
    fn path_is_fixed_name_in_directory() {
        let buffer = ErrorBuffer::new(Path::new("/tmp"));
        assert_eq!(buffer.path(), Path::new("/tmp/errors_temp.log"));
    }

    #[test]
    fn exist_is_false_for_missing_or_blank_file() {
        let tmp = tempfile::tempdir().unwrap();
        let buffer = ErrorBuffer::new(tmp.path());
        assert!(!buffer.exist());

        std::fs::write(buffer.path(), "  \n\t").unwrap();
        assert!(!buffer.exist());

        std::fs::write(buffer.path(), "boom\n").unwrap();
        assert!(buffer.exist());
    }

    #[test]
    fn read_takes_content_and_clears() {
        let tmp = tempfile::tempdir().unwrap();
        let buffer = ErrorBuffer::new(tmp.path());
        std::fs::write(buffer.path(), "ls: cannot access\n").unwrap();

        assert_eq!(buffer.read().unwrap(), "ls: cannot access\n");
        assert_eq!(buffer.read().unwrap(), "");
        assert!(!buffer.exist());
        assert!(buffer.path().exists());
    }

    #[test]
    fn shell_redirection_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let buffer = ErrorBuffer::new(tmp.path());
        let message = "something went wrong";

        let command = format!("echo -n '{message}' >&2{}", buffer.create_error_redirection());
        let status = Command::new("/bin/bash").arg("-c").arg(&command).status().unwrap();
        assert!(status.success());

        let first = buffer.read().unwrap();
        assert_eq!(first, message);
        assert_eq!(first.len(), message.len());
        assert_eq!(buffer.read().unwrap(), "");
        assert!(!buffer.exist());
    }

    #[test]
    fn writes_after_truncation_start_at_beginning() {
        let tmp = tempfile::tempdir().unwrap();
        let buffer = ErrorBuffer::new(tmp.path());
        let redirect = buffer.create_error_redirection();

        let command = format!(
            "echo first >&2; while [ -s {path} ]; do sleep 0.01; done; echo second >&2",
            path = shell_words::quote(&buffer.path().to_string_lossy())
        );
        let mut child = Command::new("/bin/bash")
            .arg("-c")
            .arg(format!("{{ {command}; }}{redirect}"))
            .spawn()
            .unwrap();

        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
        while !buffer.exist() && std::time::Instant::now() < deadline {
            std::thread::sleep(std::time::Duration::from_millis(10));
        }
        assert_eq!(buffer.read().unwrap(), "first\n");
        child.wait().unwrap();
        assert_eq!(buffer.read().unwrap(), "second\n");
    }

    #[test]
    fn redirection_quotes_path() {
        let buffer = ErrorBuffer::new(Path::new("/tmp/with space"));
        assert_eq!(
            buffer.create_error_redirection(),
            " 2>> '/tmp/with space/errors_temp.log'"
        );
    }

    #[test]
    fn delete_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let buffer = ErrorBuffer::new(tmp.path());
        std::fs::write(buffer.path(), "x").unwrap();

        buffer.delete().unwrap();
        assert!(!buffer.path().exists());
        buffer.delete().unwrap();
    }

    #[test]
    fn scope_deletes_on_drop() {
        let tmp = tempfile::tempdir().unwrap();
        let buffer = ErrorBuffer::new(tmp.path());
        {
            let _scope = buffer.scope();
            std::fs::write(buffer.path(), "x").unwrap();
        }
        assert!(!buffer.path().exists());

        // Nothing to delete is fine too.
        drop(buffer.scope());
    }
}
