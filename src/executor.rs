//! Runs one script inside the shared shell session.
//!
//! The script is started in a subshell that first reports its PID and then
//! `exec`s the interpreter, so the reported PID is the script's own. While
//! that PID is alive (or the shell still has unread output) the executor
//! multiplexes three streams: operator input into the shell, shell output to
//! the presenter, and the error buffer to the presenter.

use std::io::BufRead;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::error_buffer::ErrorBuffer;
use crate::errors::{RunnerError, RunnerResult};
use crate::log::{ExecutionLog, LogEvent};
use crate::poll::{StdioPoller, read_input_line};
use crate::presenter::{Flow, Presenter, RunContext};
use crate::process;
use crate::script::Script;
use crate::shell::Shell;

/// Knobs for the execution loop.
#[derive(Debug, Clone)]
pub struct LoopSettings {
    /// Upper bound on one readiness wait.
    pub poll_interval: Duration,
    /// Set by the Ctrl-C handler; consumed by the loop.
    pub interrupt: Option<Arc<AtomicBool>>,
    /// How long an interrupted session may take to show a prompt again.
    pub resync_timeout: Duration,
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            interrupt: None,
            resync_timeout: Duration::from_secs(5),
        }
    }
}

pub struct ScriptExecutor<'a> {
    script: &'a Script,
    shell: &'a mut Shell,
    presenter: &'a mut dyn Presenter,
    errors: &'a ErrorBuffer,
    log: Option<&'a ExecutionLog>,
    pid: Option<u32>,
    exit_code: Option<i32>,
    interrupts: u32,
}

impl<'a> ScriptExecutor<'a> {
    pub fn new(
        script: &'a Script,
        shell: &'a mut Shell,
        presenter: &'a mut dyn Presenter,
        errors: &'a ErrorBuffer,
    ) -> RunnerResult<Self> {
        if !shell.is_spawned() {
            return Err(RunnerError::ShellNotSpawned {
                script: script.name().to_string(),
            });
        }
        Ok(Self {
            script,
            shell,
            presenter,
            errors,
            log: None,
            pid: None,
            exit_code: None,
            interrupts: 0,
        })
    }

    pub fn with_log(mut self, log: Option<&'a ExecutionLog>) -> Self {
        self.log = log;
        self
    }

    pub fn script(&self) -> &Script {
        self.script
    }

    /// `(<pid probe> && exec <interpreter> <script><stderr redirect>)`
    pub fn execution_command(&self) -> RunnerResult<String> {
        let interpreter = self.script.find_shebang_path()?;
        self.command_for(&interpreter)
    }

    fn command_for(&self, interpreter: &str) -> RunnerResult<String> {
        let path = std::path::absolute(self.script.path()).map_err(|e| {
            RunnerError::io(
                format!("failed to resolve {}", self.script.path().display()),
                e,
            )
        })?;
        let body = format!(
            "{} && exec {interpreter} {}{}",
            self.shell.pid_command(),
            shell_words::quote(&path.to_string_lossy()),
            self.errors.create_error_redirection()
        );
        Ok(self.shell.subshell_command(&body))
    }

    /// PID reported by the script's subshell, read from the shell on first use.
    pub fn pid(&mut self) -> RunnerResult<u32> {
        if let Some(pid) = self.pid {
            return Ok(pid);
        }
        let pid = self.shell.find_subshell_pid()?;
        self.pid = Some(pid);
        Ok(pid)
    }

    /// Exit code of the last command run in the shell, queried on first use.
    pub fn exit_code(&mut self) -> RunnerResult<i32> {
        if let Some(code) = self.exit_code {
            return Ok(code);
        }
        let code = self.shell.get_subshell_exit_code()?;
        self.exit_code = Some(code);
        Ok(code)
    }

    /// Forward one line of shell output to the presenter.
    pub fn get_output(&mut self) -> Result<()> {
        let line = self.shell.read_output_line()?;
        if line.is_empty() {
            return Ok(());
        }
        self.presenter.write_stdout(self.script, &line)?;
        self.record(LogEvent::ScriptOutput {
            script: self.script.name().to_string(),
            text: line,
        });
        Ok(())
    }

    /// Drain the error buffer into the presenter.
    pub fn get_errors(&mut self) -> Result<()> {
        if !self.errors.exist() {
            return Ok(());
        }
        let text = self.errors.read()?;
        self.presenter.write_stderr(self.script, &text)?;
        self.record(LogEvent::ScriptErrorOutput {
            script: self.script.name().to_string(),
            text,
        });
        Ok(())
    }

    /// Read one line typed by the operator and send it to the shell.
    ///
    /// Returns `false` once `input` is exhausted.
    pub fn get_input(&mut self, input: &mut dyn BufRead) -> Result<bool> {
        let Some(line) = read_input_line(input).context("failed to read operator input")? else {
            return Ok(false);
        };
        let command = line.trim_end_matches(['\n', '\r']);
        self.shell.send_command(command)?;
        self.presenter.write_stdin(self.script, &line)?;
        self.record(LogEvent::UserInput {
            script: self.script.name().to_string(),
            length: command.len(),
        });
        Ok(true)
    }

    /// Run the script against the process's real stdin and stdout.
    pub fn execute_script(&mut self, run: &mut RunContext, settings: &LoopSettings) -> Result<Flow> {
        let mut poller = StdioPoller::stdio();
        let mut stdin = std::io::BufReader::new(std::io::stdin());
        self.execute_script_with(run, settings, &mut poller, &mut stdin)
    }

    /// Run the script, multiplexing `input` (watched by `poller`) with the
    /// shell output until the script is gone and the shell has gone quiet.
    pub fn execute_script_with(
        &mut self,
        run: &mut RunContext,
        settings: &LoopSettings,
        poller: &mut StdioPoller,
        input: &mut dyn BufRead,
    ) -> Result<Flow> {
        let interpreter = self.script.find_shebang_path()?;
        let command = self.command_for(&interpreter)?;
        self.record(LogEvent::ScriptStarted {
            script: self.script.name().to_string(),
            interpreter: interpreter.clone(),
        });
        info!(script = %self.script, %interpreter, "starting script");

        // A Ctrl-C pressed between scripts must not hit this one.
        if let Some(flag) = &settings.interrupt {
            flag.store(false, Ordering::SeqCst);
        }
        let errors = self.errors;
        let _cleanup = errors.scope();

        self.shell.send_command(&command)?;
        let pid = match self.pid() {
            Ok(pid) => pid,
            Err(err @ RunnerError::PidNotFound { .. }) => {
                warn!(script = %self.script, "no pid reported, interrupting subshell");
                self.shell.resync(settings.resync_timeout)?;
                return Err(err.into());
            }
            Err(err) => return Err(err.into()),
        };
        self.record(LogEvent::ScriptPid {
            script: self.script.name().to_string(),
            pid,
        });

        while process::is_alive(pid) || !self.shell.last_line().is_empty() {
            if let Some(flag) = &settings.interrupt {
                if flag.swap(false, Ordering::SeqCst) {
                    self.interrupt(pid)?;
                }
            }

            let ready = poller
                .wait(settings.poll_interval)
                .context("failed to poll stdin/stdout")?;
            if ready.input && !self.get_input(input)? {
                poller.close_input();
            }
            if ready.output {
                self.get_output()?;
            }
            self.get_errors()?;
        }

        let exit_code = self.exit_code()?;
        info!(script = %self.script, exit_code, "script finished");
        self.record(LogEvent::ScriptFinished {
            script: self.script.name().to_string(),
            exit_code,
        });

        self.presenter.show_status(run, self.script, exit_code)
    }

    /// First Ctrl-C goes to the script through the terminal; a repeat
    /// terminates the script's process.
    fn interrupt(&mut self, pid: u32) -> Result<()> {
        self.interrupts += 1;
        if self.interrupts == 1 {
            info!(script = %self.script, pid, "forwarding interrupt");
            self.shell.send_interrupt()?;
        } else if process::terminate(pid) {
            warn!(script = %self.script, pid, "script did not stop after interrupt, sent SIGTERM");
        }
        Ok(())
    }

    fn record(&self, event: LogEvent) {
        if let Some(log) = self.log {
            if let Err(e) = log.log(event) {
                debug!("execution log write failed: {e:#}");
            }
        }
    }
}
