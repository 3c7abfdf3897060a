//! Built-in terminal presenters.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Local;
use tracing::debug;

use super::style;
use super::{Presenter, RunContext, print_summary, print_text};
use crate::script::Script;

/// Prints script streams as they arrive, without styling.
pub struct PlainTerminal {
    out: Box<dyn Write + Send>,
}

impl PlainTerminal {
    pub fn new() -> Self {
        Self::with_writer(Box::new(std::io::stdout()))
    }

    pub fn with_writer(out: Box<dyn Write + Send>) -> Self {
        Self { out }
    }
}

impl Default for PlainTerminal {
    fn default() -> Self {
        Self::new()
    }
}

impl Presenter for PlainTerminal {
    fn name(&self) -> &str {
        "terminal"
    }

    fn out(&mut self) -> &mut dyn Write {
        &mut *self.out
    }

    fn write_stdout(&mut self, _script: &Script, text: &str) -> Result<()> {
        print_text(&mut *self.out, text)
    }

    fn write_stderr(&mut self, _script: &Script, text: &str) -> Result<()> {
        print_text(&mut *self.out, &style::format_error_output(text))
    }
}

/// Green stdout, red stderr, blue/red summary lines.
pub struct ColorTerminal {
    out: Box<dyn Write + Send>,
}

impl ColorTerminal {
    pub fn new() -> Self {
        Self::with_writer(Box::new(std::io::stdout()))
    }

    pub fn with_writer(out: Box<dyn Write + Send>) -> Self {
        Self { out }
    }
}

impl Default for ColorTerminal {
    fn default() -> Self {
        Self::new()
    }
}

impl Presenter for ColorTerminal {
    fn name(&self) -> &str {
        "terminalcolor"
    }

    fn out(&mut self) -> &mut dyn Write {
        &mut *self.out
    }

    fn write_stdout(&mut self, _script: &Script, text: &str) -> Result<()> {
        print_text(&mut *self.out, &style::color_info(text))
    }

    fn write_stderr(&mut self, _script: &Script, text: &str) -> Result<()> {
        print_text(
            &mut *self.out,
            &style::color_error(&style::format_error_output(text)),
        )
    }

    fn show_success(&mut self, script_name: &str) -> Result<()> {
        print_text(
            &mut *self.out,
            &style::color_success(&style::format_success(script_name)),
        )
    }

    fn show_failure(&mut self, script_name: &str) -> Result<()> {
        print_text(
            &mut *self.out,
            &style::color_error(&style::format_failure(script_name)),
        )
    }
}

/// Plain terminal output, mirrored into per-script log files.
///
/// Every script gets `<stem>_<started>.log` in the log directory, where
/// `started` is fixed when the presenter is built. The cumulative summary is
/// rewritten to `execution_summary_<started>.log` after each script.
pub struct FileTerminal {
    out: Box<dyn Write + Send>,
    log_dir: PathBuf,
    started: String,
}

impl FileTerminal {
    pub fn new(log_dir: PathBuf) -> Self {
        Self::with_writer(log_dir, Box::new(std::io::stdout()))
    }

    pub fn with_writer(log_dir: PathBuf, out: Box<dyn Write + Send>) -> Self {
        Self {
            out,
            log_dir,
            started: Local::now().format("%Y-%m-%dT%H:%M:%S%.6f").to_string(),
        }
    }

    /// Log file receiving everything `script` printed.
    pub fn script_log_path(&self, script: &Script) -> PathBuf {
        self.log_dir
            .join(format!("{}_{}.log", log_stem(script.name()), self.started))
    }

    pub fn summary_log_path(&self) -> PathBuf {
        self.log_dir
            .join(format!("execution_summary_{}.log", self.started))
    }

    fn append(&self, path: &Path, text: &str) -> Result<()> {
        std::fs::create_dir_all(&self.log_dir)
            .with_context(|| format!("failed to create {}", self.log_dir.display()))?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("failed to open {}", path.display()))?;
        file.write_all(text.as_bytes())
            .with_context(|| format!("failed to write {}", path.display()))
    }

    fn write_summary(&self, run: &RunContext) -> Result<()> {
        let mut summary = String::from("Scripts Summary:\n\n");
        for status in run.statuses() {
            if status.succeeded() {
                summary.push_str(&style::format_success(&status.script_name));
            } else {
                summary.push_str(&style::format_failure(&status.script_name));
            }
        }
        std::fs::create_dir_all(&self.log_dir)
            .with_context(|| format!("failed to create {}", self.log_dir.display()))?;
        let path = self.summary_log_path();
        std::fs::write(&path, summary)
            .with_context(|| format!("failed to write {}", path.display()))?;
        debug!(path = %path.display(), "summary log rewritten");
        Ok(())
    }
}

impl Presenter for FileTerminal {
    fn name(&self) -> &str {
        "terminalfile"
    }

    fn out(&mut self) -> &mut dyn Write {
        &mut *self.out
    }

    fn write_stdout(&mut self, script: &Script, text: &str) -> Result<()> {
        print_text(&mut *self.out, text)?;
        self.append(&self.script_log_path(script), text)
    }

    fn write_stderr(&mut self, script: &Script, text: &str) -> Result<()> {
        let text = style::format_error_output(text);
        print_text(&mut *self.out, &text)?;
        self.append(&self.script_log_path(script), &text)
    }

    fn show_progress(&mut self, run: &RunContext) -> Result<()> {
        print_summary(self, run)?;
        self.write_summary(run)
    }
}

/// Script name without its extension; leading-dot names are kept whole.
fn log_stem(name: &str) -> &str {
    match name.rfind('.') {
        Some(dot) if dot > 0 => &name[..dot],
        _ => name,
    }
}
