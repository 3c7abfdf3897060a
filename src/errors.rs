//! Error taxonomy for the script runner.
//!
//! Setup errors are fatal and reported before anything runs. Some protocol
//! errors are scoped to a single script: the runner reports them and moves on
//! to the next script once the shared shell session is back at a prompt.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("shell {} not found", .0.display())]
    ShellNotFound(PathBuf),

    #[error("shell {} is not executable", .0.display())]
    ShellNotExecutable(PathBuf),

    #[error("script {} not found", .0.display())]
    ScriptNotFound(PathBuf),

    #[error("scripts shell \"{0}\" was not found")]
    UnknownShell(String),

    #[error("output input controller \"{0}\" was not found")]
    UnknownPresenter(String),

    #[error("there is no scripts shell available on this system")]
    NoShellAvailable,

    #[error("directory {} is not present inside file system", .0.display())]
    DirectoryMissing(PathBuf),

    #[error("{} is not a directory", .0.display())]
    NotADirectory(PathBuf),

    #[error("no shebang found in {script}")]
    MissingShebang { script: String },

    #[error("no pid found for {shell} subshell")]
    PidNotFound { shell: String },

    #[error("no exit code found for {shell} subshell")]
    ExitCodeNotFound { shell: String },

    #[error("there is no output produced by {script}")]
    NoOutputProduced { script: String },

    #[error("passed not spawned shell for {script} execution")]
    ShellNotSpawned { script: String },

    #[error("{shell} session did not return to a prompt")]
    SessionLost { shell: String },

    #[error("{shell} session is not spawned")]
    SessionNotSpawned { shell: String },

    #[error("shell session I/O failed: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl RunnerError {
    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Whether the error only aborts the current script.
    ///
    /// A missing shebang or script is caught before anything is sent. A
    /// missing PID is only returned after the executor has interrupted the
    /// subshell and resynchronised the session.
    pub fn is_script_scoped(&self) -> bool {
        matches!(
            self,
            Self::MissingShebang { .. } | Self::PidNotFound { .. } | Self::ScriptNotFound(_)
        )
    }
}

pub type RunnerResult<T> = std::result::Result<T, RunnerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn script_scoped_errors_are_classified() {
        assert!(
            RunnerError::MissingShebang {
                script: "a.sh".into()
            }
            .is_script_scoped()
        );
        assert!(
            RunnerError::PidNotFound {
                shell: "bash".into()
            }
            .is_script_scoped()
        );
        assert!(!RunnerError::NoShellAvailable.is_script_scoped());
        assert!(
            !RunnerError::SessionLost {
                shell: "bash".into()
            }
            .is_script_scoped()
        );
        assert!(
            !RunnerError::ShellNotSpawned {
                script: "a.sh".into()
            }
            .is_script_scoped()
        );
    }

    #[test]
    fn messages_name_the_offending_value() {
        let err = RunnerError::ShellNotExecutable(PathBuf::from("/bin"));
        assert_eq!(err.to_string(), "shell /bin is not executable");

        let err = RunnerError::UnknownPresenter("fancy".into());
        assert!(err.to_string().contains("\"fancy\""));
    }
}
