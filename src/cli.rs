use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};

use crate::config::{Defaults, FailurePolicy, ProjectConfig};
use crate::errors::{RunnerError, RunnerResult};
use crate::presenter::style::notify_mistake;
use crate::script::Script;
use crate::shell::{ShellProfile, ShellRegistry};

/// Exit status for setup mistakes (bad flags, missing shell or directories).
pub const MISTAKE_EXIT_CODE: i32 = 127;
/// Exit status when the operator stops the run after a failure.
pub const HALT_EXIT_CODE: i32 = 255;

#[derive(Parser, Debug)]
#[command(
    name = "scriptrun",
    about = "Run a directory of scripts, one at a time, inside a single interactive shell",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Execute every script in the scripts directory, in order
    Run(RunArgs),

    /// Show the execution order without running anything
    List {
        /// Directory with scripts
        #[arg(short = 'd', long = "scripts-dir", value_name = "SCRIPTS_DIRECTORY")]
        scripts_dir: Option<PathBuf>,
    },

    /// Show project configuration
    Config {
        /// Emit machine-readable JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Args, Debug, Default)]
pub struct RunArgs {
    /// Shell by which scripts will be executed
    #[arg(short = 's', long, value_name = "SHELL")]
    pub shell: Option<String>,

    /// Directory with scripts which will be executed
    #[arg(short = 'd', long = "scripts-dir", value_name = "SCRIPTS_DIRECTORY")]
    pub scripts_dir: Option<PathBuf>,

    /// Output controller: terminal, terminalfile or terminalcolor
    #[arg(short = 'o', long, value_name = "OUTPUT_CONTROLLER")]
    pub output: Option<String>,

    /// Directory holding the temporary errors buffer
    #[arg(short = 'e', long = "errors-dir", value_name = "ERRORS_BUFFER_DIRECTORY")]
    pub errors_dir: Option<PathBuf>,

    /// What to do after a script fails
    #[arg(long, value_enum, value_name = "POLICY")]
    pub on_failure: Option<FailurePolicy>,
}

/// Run settings after flags have been laid over the config file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunPlan {
    pub shell: Option<String>,
    pub scripts_dir: PathBuf,
    pub output: String,
    pub errors_dir: PathBuf,
    pub on_failure: FailurePolicy,
}

impl RunArgs {
    pub fn resolve(&self, defaults: &Defaults) -> RunPlan {
        RunPlan {
            shell: self.shell.clone().or_else(|| defaults.shell.clone()),
            scripts_dir: self
                .scripts_dir
                .clone()
                .unwrap_or_else(|| defaults.scripts_dir.clone()),
            output: self.output.clone().unwrap_or_else(|| defaults.output.clone()),
            errors_dir: self
                .errors_dir
                .clone()
                .unwrap_or_else(|| defaults.errors_dir.clone()),
            on_failure: self.on_failure.unwrap_or(defaults.on_failure),
        }
    }
}

/// A setup problem reported to the operator before anything runs.
///
/// Rendered as a lead-in, the highlighted offending value, and a tail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mistake {
    pub first: String,
    pub middle: String,
    pub last: String,
}

impl Mistake {
    fn new(first: &str, middle: impl Into<String>, last: &str) -> Self {
        Self {
            first: first.to_string(),
            middle: middle.into(),
            last: last.to_string(),
        }
    }

    /// Operator-facing wording for a setup error. `subject` names the
    /// directory (e.g. `"Script directory "`) for directory errors.
    pub fn from_error(err: &RunnerError, subject: &str) -> Option<Self> {
        let quoted = |p: &Path| format!("\"{}\"", p.display());
        let mistake = match err {
            RunnerError::UnknownPresenter(name) => Self::new(
                "Output input controller named ",
                format!("\"{name}\""),
                " was not found!!!",
            ),
            RunnerError::DirectoryMissing(path) => Self::new(
                subject,
                quoted(path),
                " is not present inside file system!!!",
            ),
            RunnerError::NotADirectory(path) => {
                Self::new(subject, quoted(path), " is not a directory!!!")
            }
            RunnerError::ShellNotExecutable(path) => {
                Self::new("Scripts shell ", quoted(path), " is not executable!!!")
            }
            RunnerError::ShellNotFound(path) => {
                Self::new("Scripts shell ", quoted(path), " was not found!!!")
            }
            RunnerError::UnknownShell(name) => {
                Self::new("Scripts shell ", format!("\"{name}\""), " was not found!!!")
            }
            RunnerError::NoShellAvailable => Self::new(
                "There is no ",
                "scripts shell",
                " available in Your system!!!",
            ),
            _ => return None,
        };
        Some(mistake)
    }

    pub fn notify(&self) {
        notify_mistake(&self.first, &self.middle, &self.last);
    }
}

impl fmt::Display for Mistake {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.first, self.middle, self.last)
    }
}

pub fn check_directory(path: &Path) -> RunnerResult<()> {
    if !path.exists() {
        return Err(RunnerError::DirectoryMissing(path.to_path_buf()));
    }
    if !path.is_dir() {
        return Err(RunnerError::NotADirectory(path.to_path_buf()));
    }
    Ok(())
}

/// The requested shell flavor, or the first one usable on this machine.
pub fn select_shell(registry: &ShellRegistry, requested: Option<&str>) -> RunnerResult<ShellProfile> {
    match requested {
        Some(name) => registry.resolve(name),
        None => registry.find_available(),
    }
}

/// One line per script: order key, name and interpreter.
pub fn render_plan(scripts: &[Script]) -> String {
    if scripts.is_empty() {
        return "(no scripts)\n".to_string();
    }
    let mut output = String::new();
    for script in scripts {
        let key = if script.is_numbered() {
            script.order_key().to_string()
        } else {
            "-".to_string()
        };
        let interpreter = match script.find_shebang_path() {
            Ok(path) => path,
            Err(RunnerError::MissingShebang { .. }) => "(missing shebang)".to_string(),
            Err(e) => format!("({e})"),
        };
        output.push_str(&format!("  {key:>4}  {:<32} {interpreter}\n", script.name()));
    }
    output
}

fn config_source_label(config_path: Option<&Path>) -> String {
    config_path
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "(defaults, no .scriptrun/config.toml found)".to_string())
}

fn push_kv(output: &mut String, key: &str, value: impl fmt::Display) {
    output.push_str(&format!("  {key:<22} {value}\n"));
}

fn policy_label(policy: FailurePolicy) -> &'static str {
    match policy {
        FailurePolicy::Ask => "ask",
        FailurePolicy::Continue => "continue",
        FailurePolicy::Stop => "stop",
    }
}

pub fn render_config_human(config: &ProjectConfig, config_path: Option<&Path>) -> String {
    let mut output = String::new();
    output.push_str("Defaults\n");
    push_kv(
        &mut output,
        "shell",
        config.defaults.shell.as_deref().unwrap_or("(first available)"),
    );
    push_kv(&mut output, "output", &config.defaults.output);
    push_kv(&mut output, "scripts_dir", config.defaults.scripts_dir.display());
    push_kv(&mut output, "errors_dir", config.defaults.errors_dir.display());
    push_kv(&mut output, "on_failure", policy_label(config.defaults.on_failure));
    output.push('\n');

    output.push_str("Session\n");
    push_kv(
        &mut output,
        "read_timeout",
        format!("{}ms", config.session.read_timeout_millis),
    );
    push_kv(
        &mut output,
        "poll_interval",
        format!("{}ms", config.session.poll_interval_millis),
    );
    push_kv(
        &mut output,
        "bulk_read_timeout",
        format!("{}s", config.session.bulk_read_timeout_secs),
    );
    output.push('\n');

    output.push_str("Log\n");
    push_kv(&mut output, "dir", config.log.dir.display());
    push_kv(&mut output, "execution_log", config.log.execution_log);
    output.push('\n');

    output.push_str("Shells\n");
    let registry = config.shell_registry();
    for name in registry.names() {
        if let Some(profile) = registry.get(name) {
            push_kv(&mut output, name, profile.path.display());
        }
    }
    output.push('\n');

    output.push_str("Source Path\n");
    push_kv(&mut output, "path", config_source_label(config_path));

    output
}

pub fn render_config_json(config: &ProjectConfig, config_path: Option<&Path>) -> Result<String> {
    let mut payload = serde_json::to_value(config).context("failed to serialize config")?;
    if let Some(map) = payload.as_object_mut() {
        map.insert(
            "source_path".to_string(),
            serde_json::Value::String(config_source_label(config_path)),
        );
    }
    serde_json::to_string_pretty(&payload).context("failed to serialize config to JSON")
}
