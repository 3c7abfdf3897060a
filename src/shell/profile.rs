//! Shell flavors and the registry used to select one by name.
//!
//! A flavor knows how to start its shell, how to open and close a subshell,
//! and which tag + expression pairs reveal a subshell's PID and exit code.
//! The tags must never appear in ordinary script output.

use std::path::{Path, PathBuf};

use crate::errors::{RunnerError, RunnerResult};

/// A tag echoed in front of a shell-evaluated expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Probe {
    pub tag: String,
    pub expr: String,
}

impl Probe {
    pub fn new(tag: impl Into<String>, expr: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            expr: expr.into(),
        }
    }

    /// Command that prints the tag immediately followed by the evaluated expression.
    pub fn command(&self) -> String {
        format!("echo {}{}", self.tag, self.expr)
    }

    /// The tag is present and the raw expression is not, so this is the
    /// evaluated value rather than the echoed command text.
    pub fn matches(&self, line: &str) -> bool {
        line.contains(&self.tag) && !line.contains(&self.expr)
    }

    /// Parse the integer following the tag, up to the next CRLF.
    pub fn extract(&self, line: &str) -> Option<i64> {
        let start = line.find(&self.tag)? + self.tag.len();
        let rest = &line[start..];
        let value = match rest.find("\r\n") {
            Some(end) => &rest[..end],
            None => rest,
        };
        value.trim().parse().ok()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellProfile {
    /// Token used on the command line, e.g. `bash`.
    pub name: String,
    pub path: PathBuf,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub subshell_start: String,
    pub subshell_end: String,
    pub pid: Probe,
    pub exit_code: Probe,
}

impl ShellProfile {
    /// Bash without user startup files and with a dumb terminal, which keeps
    /// bracketed-paste and colour escapes out of the stream.
    pub fn bash() -> Self {
        Self {
            name: "bash".to_string(),
            path: PathBuf::from("/bin/bash"),
            args: vec!["--noprofile".to_string(), "--norc".to_string()],
            env: vec![("TERM".to_string(), "dumb".to_string())],
            subshell_start: "(".to_string(),
            subshell_end: ")".to_string(),
            pid: Probe::new("bash_subshell_pid=", "$BASHPID"),
            exit_code: Probe::new("bash_subshell_exit_code=", "$?"),
        }
    }

    /// Wrap `command` in subshell delimiters.
    pub fn subshell_command(&self, command: &str) -> String {
        format!("{}{command}{}", self.subshell_start, self.subshell_end)
    }

    pub fn pid_command(&self) -> String {
        self.pid.command()
    }

    pub fn exit_code_command(&self) -> String {
        self.exit_code.command()
    }

    /// Fail fast when the shell binary is missing or not executable.
    pub fn check_executable(&self) -> RunnerResult<()> {
        if !self.path.exists() {
            return Err(RunnerError::ShellNotFound(self.path.clone()));
        }
        if !is_executable_file(&self.path) {
            return Err(RunnerError::ShellNotExecutable(self.path.clone()));
        }
        Ok(())
    }
}

fn is_executable_file(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;

    std::fs::metadata(path)
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

type ProfileFactory = Box<dyn Fn() -> ShellProfile>;

/// Ordered mapping from command-line token to shell flavor.
///
/// Built-ins are registered first; flavors from the config file follow in
/// name order. Registering a name twice replaces the earlier entry.
pub struct ShellRegistry {
    entries: Vec<(String, ProfileFactory)>,
}

impl ShellRegistry {
    pub fn empty() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    pub fn with_builtins() -> Self {
        let mut registry = Self::empty();
        registry.register("bash", ShellProfile::bash);
        registry
    }

    pub fn register<F>(&mut self, name: &str, factory: F)
    where
        F: Fn() -> ShellProfile + 'static,
    {
        self.entries.retain(|(existing, _)| existing != name);
        self.entries.push((name.to_string(), Box::new(factory)));
    }

    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|(name, _)| name.as_str()).collect()
    }

    pub fn get(&self, name: &str) -> Option<ShellProfile> {
        self.entries
            .iter()
            .find(|(existing, _)| existing == name)
            .map(|(_, factory)| factory())
    }

    /// Resolve an explicitly requested shell.
    ///
    /// A flavor whose binary is missing counts as not found; a flavor whose
    /// binary exists but cannot be executed is reported as such.
    pub fn resolve(&self, name: &str) -> RunnerResult<ShellProfile> {
        let profile = self
            .get(name)
            .ok_or_else(|| RunnerError::UnknownShell(name.to_string()))?;
        match profile.check_executable() {
            Ok(()) => Ok(profile),
            Err(RunnerError::ShellNotFound(_)) => Err(RunnerError::UnknownShell(name.to_string())),
            Err(err) => Err(err),
        }
    }

    /// First registered flavor that can actually be started here.
    pub fn find_available(&self) -> RunnerResult<ShellProfile> {
        self.entries
            .iter()
            .map(|(_, factory)| factory())
            .find(|profile| profile.check_executable().is_ok())
            .ok_or(RunnerError::NoShellAvailable)
    }
}

impl Default for ShellRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}
