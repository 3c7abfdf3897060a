//! Drives a whole run: every script of the collection, in order, through one
//! shell session.

use std::io::{BufRead, BufReader};
use std::time::Duration;

use anyhow::Result;
use tracing::{debug, info, warn};

use crate::error_buffer::ErrorBuffer;
use crate::errors::RunnerError;
use crate::executor::{LoopSettings, ScriptExecutor};
use crate::log::{ExecutionLog, LogEvent};
use crate::poll::StdioPoller;
use crate::presenter::style::notify_mistake;
use crate::presenter::{Flow, Presenter, RunContext};
use crate::script::Script;
use crate::shell::Shell;

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every script was attempted.
    Completed,
    /// The run stopped after the named script failed.
    Halted { script: String },
}

pub struct Runner<'a> {
    shell: &'a mut Shell,
    presenter: &'a mut dyn Presenter,
    errors: &'a ErrorBuffer,
    log: Option<&'a ExecutionLog>,
    settings: LoopSettings,
    shutdown_timeout: Duration,
    poller: StdioPoller,
    input: Box<dyn BufRead + 'a>,
}

impl<'a> Runner<'a> {
    pub fn new(
        shell: &'a mut Shell,
        presenter: &'a mut dyn Presenter,
        errors: &'a ErrorBuffer,
        settings: LoopSettings,
    ) -> Self {
        Self {
            shell,
            presenter,
            errors,
            log: None,
            settings,
            shutdown_timeout: Duration::from_secs(5),
            poller: StdioPoller::stdio(),
            input: Box::new(BufReader::new(std::io::stdin())),
        }
    }

    pub fn with_log(mut self, log: Option<&'a ExecutionLog>) -> Self {
        self.log = log;
        self
    }

    /// Read operator input from `input` instead of the process's stdin.
    pub fn with_input(mut self, poller: StdioPoller, input: Box<dyn BufRead + 'a>) -> Self {
        self.poller = poller;
        self.input = input;
        self
    }

    /// How long to wait for the shell to exit after the last script.
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Execute `scripts` in order, spawning the shell first if needed.
    ///
    /// Scripts that cannot be started (no shebang, no PID reported) are
    /// reported and skipped. Anything else that goes wrong ends the run.
    pub fn run(
        &mut self,
        scripts: impl IntoIterator<Item = Script>,
        run: &mut RunContext,
    ) -> Result<RunOutcome> {
        if !self.shell.is_spawned() {
            self.shell.spawn()?;
        }

        for script in scripts {
            match self.run_script(&script, run) {
                Ok(Flow::Continue) => {}
                Ok(Flow::Halt) => {
                    info!(script = %script, "run halted after failure");
                    self.record(LogEvent::RunHalted {
                        script: script.name().to_string(),
                        finished: run.statuses().len(),
                    });
                    return Ok(RunOutcome::Halted {
                        script: script.name().to_string(),
                    });
                }
                Err(err) => {
                    let Some(scoped) = err
                        .downcast_ref::<RunnerError>()
                        .filter(|e| e.is_script_scoped())
                    else {
                        return Err(err);
                    };
                    warn!(script = %script, "skipping script: {scoped}");
                    notify_mistake(
                        "Script ",
                        &format!("\"{script}\""),
                        &format!(" skipped: {scoped}!!!"),
                    );
                    self.record(LogEvent::ScriptAborted {
                        script: script.name().to_string(),
                        reason: scoped.to_string(),
                    });
                }
            }
        }

        self.record(LogEvent::RunCompleted {
            finished: run.statuses().len(),
            failed: run.failed(),
        });
        self.close_shell();
        Ok(RunOutcome::Completed)
    }

    fn run_script(&mut self, script: &Script, run: &mut RunContext) -> Result<Flow> {
        let mut executor =
            ScriptExecutor::new(script, &mut *self.shell, &mut *self.presenter, self.errors)?
                .with_log(self.log);
        executor.execute_script_with(run, &self.settings, &mut self.poller, &mut *self.input)
    }

    /// Ask the shell to exit and collect whatever it still prints.
    fn close_shell(&mut self) {
        if let Err(e) = self.shell.send_command("exit") {
            debug!("shell did not accept exit: {e}");
        }
        match self.shell.read_output_all("exit", self.shutdown_timeout) {
            Ok(rest) => debug!(bytes = rest.len(), "shell closed"),
            Err(e) => debug!("shell did not close cleanly: {e}"),
        }
        self.shell.terminate();
    }

    fn record(&self, event: LogEvent) {
        if let Some(log) = self.log {
            if let Err(e) = log.log(event) {
                debug!("execution log write failed: {e:#}");
            }
        }
    }
}
