//! Presentation layer for script streams and run status.
//!
//! The executor hands every stdin echo, stdout chunk and drained stderr
//! chunk to a [`Presenter`], which decides how it is surfaced: printed,
//! coloured, or also written to log files. After each script the presenter
//! records its status in the run-scoped [`RunContext`], renders the summary,
//! and on failure may ask the operator to stop the queue.

pub mod style;
pub mod terminal;

use std::io::{IsTerminal, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::warn;

use crate::config::FailurePolicy;
use crate::errors::RunnerError;
use crate::script::Script;

pub use terminal::{ColorTerminal, FileTerminal, PlainTerminal};

pub const DEFAULT_PRESENTER: &str = "terminalcolor";

/// Whether the runner should move on to the next script.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Halt,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptStatus {
    pub script_name: String,
    pub exit_code: i32,
}

impl ScriptStatus {
    pub fn succeeded(&self) -> bool {
        self.exit_code == 0
    }
}

/// Per-run record of finished scripts, in completion order.
#[derive(Debug, Clone)]
pub struct RunContext {
    statuses: Vec<ScriptStatus>,
    failure_policy: FailurePolicy,
}

impl RunContext {
    pub fn new(failure_policy: FailurePolicy) -> Self {
        Self {
            statuses: Vec::new(),
            failure_policy,
        }
    }

    pub fn record(&mut self, script_name: &str, exit_code: i32) {
        self.statuses.push(ScriptStatus {
            script_name: script_name.to_string(),
            exit_code,
        });
    }

    pub fn statuses(&self) -> &[ScriptStatus] {
        &self.statuses
    }

    pub fn failure_policy(&self) -> FailurePolicy {
        self.failure_policy
    }

    pub fn failed(&self) -> usize {
        self.statuses.iter().filter(|s| !s.succeeded()).count()
    }
}

pub trait Presenter {
    /// Registry token, e.g. `terminalcolor`.
    fn name(&self) -> &str;

    /// Sink for everything this presenter prints.
    fn out(&mut self) -> &mut dyn Write;

    /// A line the operator typed, already forwarded to the shell.
    ///
    /// The shell echoes input back through stdout, so by default nothing is
    /// printed here.
    fn write_stdin(&mut self, _script: &Script, _text: &str) -> Result<()> {
        Ok(())
    }

    fn write_stdout(&mut self, script: &Script, text: &str) -> Result<()>;

    fn write_stderr(&mut self, script: &Script, text: &str) -> Result<()>;

    fn show_success(&mut self, script_name: &str) -> Result<()> {
        print_text(self.out(), &style::format_success(script_name))
    }

    fn show_failure(&mut self, script_name: &str) -> Result<()> {
        print_text(self.out(), &style::format_failure(script_name))
    }

    fn show_progress(&mut self, run: &RunContext) -> Result<()> {
        print_summary(self, run)
    }

    /// Ask whether the remaining scripts should be skipped.
    ///
    /// Without an interactive terminal the answer is "no".
    fn ask_to_halt(&mut self, script_name: &str) -> Result<bool> {
        if !std::io::stdin().is_terminal() {
            warn!(script = %script_name, "stdin is not a terminal; continuing after failure");
            return Ok(false);
        }
        dialoguer::Confirm::new()
            .with_prompt("Would You like to stop scripts execution?")
            .default(false)
            .interact()
            .context("failed to read answer from terminal")
    }

    /// Record the finished script, render the summary, and decide whether
    /// the run continues.
    fn show_status(&mut self, run: &mut RunContext, script: &Script, exit_code: i32) -> Result<Flow> {
        run.record(script.name(), exit_code);
        self.show_progress(run)?;

        if exit_code == 0 {
            return Ok(Flow::Continue);
        }
        let halt = match run.failure_policy() {
            FailurePolicy::Ask => self.ask_to_halt(script.name())?,
            FailurePolicy::Continue => false,
            FailurePolicy::Stop => true,
        };
        Ok(if halt { Flow::Halt } else { Flow::Continue })
    }
}

/// Write `text` as-is and flush.
pub fn print_text(out: &mut dyn Write, text: &str) -> Result<()> {
    out.write_all(text.as_bytes())
        .and_then(|()| out.flush())
        .context("failed to write presenter output")
}

/// Cumulative summary of every script finished so far.
pub fn print_summary<P: Presenter + ?Sized>(presenter: &mut P, run: &RunContext) -> Result<()> {
    print_text(presenter.out(), "\n\nScripts Summary:\n")?;
    for status in run.statuses() {
        if status.succeeded() {
            presenter.show_success(&status.script_name)?;
        } else {
            presenter.show_failure(&status.script_name)?;
        }
    }
    print_text(presenter.out(), "\n\n")
}

/// Inputs shared by presenter factories.
#[derive(Debug, Clone)]
pub struct PresenterOptions {
    pub log_dir: PathBuf,
}

type PresenterFactory = fn(&PresenterOptions) -> Result<Box<dyn Presenter>>;

fn plain_terminal(_: &PresenterOptions) -> Result<Box<dyn Presenter>> {
    Ok(Box::new(PlainTerminal::new()))
}

fn color_terminal(_: &PresenterOptions) -> Result<Box<dyn Presenter>> {
    Ok(Box::new(ColorTerminal::new()))
}

fn file_terminal(options: &PresenterOptions) -> Result<Box<dyn Presenter>> {
    Ok(Box::new(FileTerminal::new(options.log_dir.clone())))
}

/// Token to presenter factory, looked up once at startup.
pub struct PresenterRegistry {
    entries: Vec<(&'static str, PresenterFactory)>,
}

impl PresenterRegistry {
    pub fn with_builtins() -> Self {
        Self {
            entries: vec![
                ("terminal", plain_terminal as PresenterFactory),
                ("terminalcolor", color_terminal),
                ("terminalfile", file_terminal),
            ],
        }
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.entries.iter().map(|(name, _)| *name).collect()
    }

    pub fn create(&self, name: &str, options: &PresenterOptions) -> Result<Box<dyn Presenter>> {
        let (_, factory) = self
            .entries
            .iter()
            .find(|(token, _)| *token == name)
            .ok_or_else(|| RunnerError::UnknownPresenter(name.to_string()))?;
        factory(options)
    }
}

impl Default for PresenterRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}


#[cfg(test)]
mod tests {
    use super::testing::RecordingPresenter;
    use super::*;

    fn script(dir: &std::path::Path, name: &str) -> Script {
        std::fs::write(dir.join(name), "#!/bin/bash\n").unwrap();
        Script::new(name, dir).unwrap()
    }

    #[test]
    fn show_status_records_and_renders_summary() {
        let tmp = tempfile::tempdir().unwrap();
        let ok = script(tmp.path(), "ok_1.sh");
        let bad = script(tmp.path(), "bad_2.sh");
        let mut presenter = RecordingPresenter::new();
        let mut run = RunContext::new(FailurePolicy::Continue);

        assert_eq!(presenter.show_status(&mut run, &ok, 0).unwrap(), Flow::Continue);
        assert_eq!(presenter.show_status(&mut run, &bad, 2).unwrap(), Flow::Continue);

        assert_eq!(
            run.statuses(),
            &[
                ScriptStatus {
                    script_name: "ok_1.sh".into(),
                    exit_code: 0
                },
                ScriptStatus {
                    script_name: "bad_2.sh".into(),
                    exit_code: 2
                },
            ]
        );
        assert_eq!(run.failed(), 1);

        let printed = presenter.printed();
        assert_eq!(printed.matches("Scripts Summary:").count(), 2);
        assert!(printed.contains("    Execution of ok_1.sh succeed\n"));
        assert!(printed.contains("    Execution of bad_2.sh failed\n"));
        assert!(presenter.halt_questions.is_empty());
    }

    #[test]
    fn ask_policy_prompts_only_on_failure() {
        let tmp = tempfile::tempdir().unwrap();
        let ok = script(tmp.path(), "ok_1.sh");
        let bad = script(tmp.path(), "bad_2.sh");
        let mut presenter = RecordingPresenter::new();
        presenter.halt_answer = true;
        let mut run = RunContext::new(FailurePolicy::Ask);

        assert_eq!(presenter.show_status(&mut run, &ok, 0).unwrap(), Flow::Continue);
        assert!(presenter.halt_questions.is_empty());

        assert_eq!(presenter.show_status(&mut run, &bad, 1).unwrap(), Flow::Halt);
        assert_eq!(presenter.halt_questions, vec!["bad_2.sh"]);
    }

    #[test]
    fn ask_policy_continues_when_operator_declines() {
        let tmp = tempfile::tempdir().unwrap();
        let bad = script(tmp.path(), "bad_2.sh");
        let mut presenter = RecordingPresenter::new();
        let mut run = RunContext::new(FailurePolicy::Ask);

        assert_eq!(presenter.show_status(&mut run, &bad, 1).unwrap(), Flow::Continue);
        assert_eq!(presenter.halt_questions.len(), 1);
    }

    #[test]
    fn stop_policy_halts_without_asking() {
        let tmp = tempfile::tempdir().unwrap();
        let bad = script(tmp.path(), "bad_2.sh");
        let mut presenter = RecordingPresenter::new();
        let mut run = RunContext::new(FailurePolicy::Stop);

        assert_eq!(presenter.show_status(&mut run, &bad, 127).unwrap(), Flow::Halt);
        assert!(presenter.halt_questions.is_empty());
    }

    #[test]
    fn registry_creates_builtins_by_token() {
        let registry = PresenterRegistry::with_builtins();
        let tmp = tempfile::tempdir().unwrap();
        let options = PresenterOptions {
            log_dir: tmp.path().join("logs"),
        };

        assert_eq!(registry.names(), vec!["terminal", "terminalcolor", "terminalfile"]);
        for name in registry.names() {
            let presenter = registry.create(name, &options).unwrap();
            assert_eq!(presenter.name(), name);
        }
    }

    #[test]
    fn registry_rejects_unknown_token() {
        let registry = PresenterRegistry::default();
        let options = PresenterOptions {
            log_dir: PathBuf::from("logs"),
        };
        let err = registry.create("fancy", &options).err().unwrap();
        assert!(matches!(
            err.downcast_ref::<RunnerError>(),
            Some(RunnerError::UnknownPresenter(name)) if name == "fancy"
        ));
    }
}
