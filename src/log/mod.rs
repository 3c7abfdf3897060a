//! Structured execution log, one JSON object per line.
//!
//! Each run may write a `.jsonl` file recording the run's lifecycle: which
//! scripts started, the PID their subshell reported, what they printed,
//! what the operator typed, and how each one ended. Lines are
//! self-contained and timestamped, so the file can be grepped or streamed
//! while the run is still going.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result, anyhow};
use chrono::{Local, SecondsFormat, Utc};
use serde::Serialize;
use tracing::debug;

fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// A structured event in the execution log.
#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    /// RFC 3339, UTC.
    pub timestamp: String,
    #[serde(flatten)]
    pub event: LogEvent,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data")]
#[serde(rename_all = "snake_case")]
pub enum LogEvent {
    RunStarted {
        scripts_dir: String,
        shell: String,
        output: String,
        scripts: usize,
    },
    ScriptStarted {
        script: String,
        interpreter: String,
    },
    /// The subshell running the script reported its PID.
    ScriptPid { script: String, pid: u32 },
    /// A line typed by the operator was forwarded to the shell.
    UserInput { script: String, length: usize },
    ScriptOutput { script: String, text: String },
    ScriptErrorOutput { script: String, text: String },
    ScriptFinished { script: String, exit_code: i32 },
    /// The script could not be run at all; the run moved on.
    ScriptAborted { script: String, reason: String },
    /// The operator or the failure policy stopped the run after `script`.
    RunHalted { script: String, finished: usize },
    RunCompleted { finished: usize, failed: usize },
}

/// Writer for JSON lines execution logs.
pub struct ExecutionLog {
    writer: Mutex<BufWriter<File>>,
    path: PathBuf,
}

impl ExecutionLog {
    /// Create a new execution log, writing to the given path.
    ///
    /// Creates the file (and parent directories) if they don't exist.
    /// Appends to an existing file.
    pub fn new(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create log directory: {}", parent.display()))?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("failed to open log file: {}", path.display()))?;

        Ok(Self {
            writer: Mutex::new(BufWriter::new(file)),
            path: path.to_path_buf(),
        })
    }

    /// Fresh log for one run: `<dir>/run-<local time>.jsonl`.
    pub fn for_run(dir: &Path) -> Result<Self> {
        let stamp = Local::now().format("%Y%m%d-%H%M%S%.3f");
        Self::new(&dir.join(format!("run-{stamp}.jsonl")))
    }

    pub fn log(&self, event: LogEvent) -> Result<()> {
        let entry = LogEntry {
            timestamp: now_rfc3339(),
            event,
        };

        let json = serde_json::to_string(&entry).context("failed to serialize log entry")?;

        debug!(event = %json, "execution log");

        let mut writer = self
            .writer
            .lock()
            .map_err(|_| anyhow!("execution log writer poisoned"))?;
        writeln!(writer, "{json}").context("failed to write log entry")?;
        writer.flush().context("failed to flush log")?;

        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
