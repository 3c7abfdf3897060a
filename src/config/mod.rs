use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::presenter::DEFAULT_PRESENTER;
use crate::shell::{Probe, ShellProfile, ShellRegistry};

const CONFIG_FILENAME: &str = "config.toml";
const CONFIG_DIR: &str = ".scriptrun";

/// What happens after a script exits non-zero.
#[derive(
    Debug, Default, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, clap::ValueEnum,
)]
#[serde(rename_all = "kebab-case")]
pub enum FailurePolicy {
    /// Ask the operator whether to stop the remaining scripts.
    #[default]
    Ask,
    Continue,
    Stop,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Defaults {
    /// Shell flavor name; the first available flavor when unset.
    #[serde(default)]
    pub shell: Option<String>,
    #[serde(default = "default_output")]
    pub output: String,
    #[serde(default = "default_scripts_dir")]
    pub scripts_dir: PathBuf,
    #[serde(default = "default_errors_dir")]
    pub errors_dir: PathBuf,
    #[serde(default)]
    pub on_failure: FailurePolicy,
}

fn default_output() -> String {
    DEFAULT_PRESENTER.to_string()
}

fn default_scripts_dir() -> PathBuf {
    PathBuf::from("scripts")
}

fn default_errors_dir() -> PathBuf {
    PathBuf::from("/tmp")
}

fn default_read_timeout_millis() -> u64 {
    100
}

fn default_poll_interval_millis() -> u64 {
    1000
}

fn default_bulk_read_timeout_secs() -> u64 {
    5
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

fn default_execution_log() -> bool {
    true
}

fn default_subshell_start() -> String {
    "(".to_string()
}

fn default_subshell_end() -> String {
    ")".to_string()
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            shell: None,
            output: default_output(),
            scripts_dir: default_scripts_dir(),
            errors_dir: default_errors_dir(),
            on_failure: FailurePolicy::default(),
        }
    }
}

/// Timing of the shell session and the execution poll loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_read_timeout_millis")]
    pub read_timeout_millis: u64,
    #[serde(default = "default_poll_interval_millis")]
    pub poll_interval_millis: u64,
    #[serde(default = "default_bulk_read_timeout_secs")]
    pub bulk_read_timeout_secs: u64,
}

impl SessionConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_millis)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_millis)
    }

    pub fn bulk_read_timeout(&self) -> Duration {
        Duration::from_secs(self.bulk_read_timeout_secs)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            read_timeout_millis: default_read_timeout_millis(),
            poll_interval_millis: default_poll_interval_millis(),
            bulk_read_timeout_secs: default_bulk_read_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    #[serde(default = "default_log_dir")]
    pub dir: PathBuf,
    #[serde(default = "default_execution_log")]
    pub execution_log: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            dir: default_log_dir(),
            execution_log: default_execution_log(),
        }
    }
}

/// A shell flavor declared in the config file.
///
/// ```toml
/// [shells.zsh]
/// path = "/bin/zsh"
/// args = ["-f"]
/// pid_tag = "zsh_subshell_pid="
/// pid_expr = "$sysparams[pid]"
/// exit_code_tag = "zsh_subshell_exit_code="
/// exit_code_expr = "$?"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShellFlavorConfig {
    pub path: PathBuf,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default = "default_subshell_start")]
    pub subshell_start: String,
    #[serde(default = "default_subshell_end")]
    pub subshell_end: String,
    pub pid_tag: String,
    pub pid_expr: String,
    pub exit_code_tag: String,
    pub exit_code_expr: String,
}

impl ShellFlavorConfig {
    pub fn to_profile(&self, name: &str) -> ShellProfile {
        ShellProfile {
            name: name.to_string(),
            path: self.path.clone(),
            args: self.args.clone(),
            env: self
                .env
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            subshell_start: self.subshell_start.clone(),
            subshell_end: self.subshell_end.clone(),
            pid: Probe::new(&self.pid_tag, &self.pid_expr),
            exit_code: Probe::new(&self.exit_code_tag, &self.exit_code_expr),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProjectConfig {
    #[serde(default)]
    pub defaults: Defaults,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub shells: BTreeMap<String, ShellFlavorConfig>,
}

impl ProjectConfig {
    /// Search upward from `start` for a `.scriptrun/config.toml` file and load it.
    /// Returns the default config if no file is found.
    pub fn load(start: &Path) -> Result<(Self, Option<PathBuf>)> {
        if let Some(path) = Self::find_config_file(start) {
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            let config: ProjectConfig = toml::from_str(&contents)
                .with_context(|| format!("failed to parse {}", path.display()))?;
            Ok((config, Some(path)))
        } else {
            Ok((ProjectConfig::default(), None))
        }
    }

    fn find_config_file(start: &Path) -> Option<PathBuf> {
        let mut dir = start.to_path_buf();
        loop {
            let candidate = dir.join(CONFIG_DIR).join(CONFIG_FILENAME);
            if candidate.is_file() {
                return Some(candidate);
            }
            if !dir.pop() {
                return None;
            }
        }
    }

    /// Built-in shells followed by the ones declared under `[shells]`.
    pub fn shell_registry(&self) -> ShellRegistry {
        let mut registry = ShellRegistry::with_builtins();
        for (name, flavor) in &self.shells {
            let profile = flavor.to_profile(name);
            registry.register(name, move || profile.clone());
        }
        registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn default_config_values() {
        let config = ProjectConfig::default();
        assert!(config.defaults.shell.is_none());
        assert_eq!(config.defaults.output, "terminalcolor");
        assert_eq!(config.defaults.scripts_dir, PathBuf::from("scripts"));
        assert_eq!(config.defaults.errors_dir, PathBuf::from("/tmp"));
        assert_eq!(config.defaults.on_failure, FailurePolicy::Ask);
        assert_eq!(config.session.read_timeout(), Duration::from_millis(100));
        assert_eq!(config.session.poll_interval(), Duration::from_secs(1));
        assert_eq!(config.session.bulk_read_timeout(), Duration::from_secs(5));
        assert_eq!(config.log.dir, PathBuf::from("logs"));
        assert!(config.log.execution_log);
        assert!(config.shells.is_empty());
    }

    #[test]
    fn parse_full_config() {
        let toml = r#"
[defaults]
shell = "bash"
output = "terminalfile"
scripts_dir = "deploy"
errors_dir = "/var/tmp"
on_failure = "stop"

[session]
read_timeout_millis = 250
poll_interval_millis = 500
bulk_read_timeout_secs = 2

[log]
dir = "/var/log/scriptrun"
execution_log = false

[shells.zsh]
path = "/bin/zsh"
args = ["-f"]
env = { TERM = "dumb" }
pid_tag = "zsh_subshell_pid="
pid_expr = "$sysparams[pid]"
exit_code_tag = "zsh_subshell_exit_code="
exit_code_expr = "$?"
"#;
        let config: ProjectConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.defaults.shell.as_deref(), Some("bash"));
        assert_eq!(config.defaults.output, "terminalfile");
        assert_eq!(config.defaults.scripts_dir, PathBuf::from("deploy"));
        assert_eq!(config.defaults.errors_dir, PathBuf::from("/var/tmp"));
        assert_eq!(config.defaults.on_failure, FailurePolicy::Stop);
        assert_eq!(config.session.read_timeout_millis, 250);
        assert_eq!(config.session.poll_interval_millis, 500);
        assert_eq!(config.session.bulk_read_timeout_secs, 2);
        assert_eq!(config.log.dir, PathBuf::from("/var/log/scriptrun"));
        assert!(!config.log.execution_log);

        let zsh = config.shells["zsh"].to_profile("zsh");
        assert_eq!(zsh.path, PathBuf::from("/bin/zsh"));
        assert_eq!(zsh.args, vec!["-f"]);
        assert_eq!(zsh.env, vec![("TERM".to_string(), "dumb".to_string())]);
        assert_eq!(zsh.subshell_command("true"), "(true)");
        assert_eq!(zsh.pid_command(), "echo zsh_subshell_pid=$sysparams[pid]");
        assert_eq!(zsh.exit_code_command(), "echo zsh_subshell_exit_code=$?");
    }

    #[test]
    fn parse_partial_config() {
        let toml = r#"
[defaults]
on_failure = "continue"
"#;
        let config: ProjectConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.defaults.on_failure, FailurePolicy::Continue);
        assert_eq!(config.defaults.output, "terminalcolor");
        assert_eq!(config.session.poll_interval_millis, 1000);
        assert!(config.log.execution_log);
    }

    #[test]
    fn unknown_failure_policy_is_rejected() {
        let toml = r#"
[defaults]
on_failure = "retry"
"#;
        assert!(toml::from_str::<ProjectConfig>(toml).is_err());
    }

    #[test]
    fn shell_flavor_requires_probes() {
        let toml = r#"
[shells.sh]
path = "/bin/sh"
"#;
        assert!(toml::from_str::<ProjectConfig>(toml).is_err());
    }

    #[test]
    fn load_from_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let config_dir = tmp.path().join(".scriptrun");
        fs::create_dir_all(&config_dir).unwrap();
        fs::write(
            config_dir.join("config.toml"),
            r#"
[defaults]
output = "terminal"
scripts_dir = "jobs"
"#,
        )
        .unwrap();

        let (config, path) = ProjectConfig::load(tmp.path()).unwrap();
        assert_eq!(path, Some(config_dir.join("config.toml")));
        assert_eq!(config.defaults.output, "terminal");
        assert_eq!(config.defaults.scripts_dir, PathBuf::from("jobs"));
    }

    #[test]
    fn load_returns_default_when_no_file() {
        let tmp = tempfile::tempdir().unwrap();
        let (config, path) = ProjectConfig::load(tmp.path()).unwrap();
        assert!(path.is_none());
        assert_eq!(config.defaults.output, "terminalcolor");
    }

    #[test]
    fn load_reports_parse_errors_with_path() {
        let tmp = tempfile::tempdir().unwrap();
        let config_dir = tmp.path().join(".scriptrun");
        fs::create_dir_all(&config_dir).unwrap();
        fs::write(config_dir.join("config.toml"), "[defaults\n").unwrap();

        let err = ProjectConfig::load(tmp.path()).unwrap_err();
        assert!(format!("{err}").contains("failed to parse"));
    }

    #[test]
    fn load_walks_up_directories() {
        let tmp = tempfile::tempdir().unwrap();
        let config_dir = tmp.path().join(".scriptrun");
        fs::create_dir_all(&config_dir).unwrap();
        fs::write(
            config_dir.join("config.toml"),
            r#"
[defaults]
shell = "bash"
"#,
        )
        .unwrap();

        let nested = tmp.path().join("jobs").join("deep").join("nested");
        fs::create_dir_all(&nested).unwrap();

        let (config, path) = ProjectConfig::load(&nested).unwrap();
        assert!(path.is_some());
        assert_eq!(config.defaults.shell.as_deref(), Some("bash"));
    }

    #[test]
    fn registry_appends_configured_shells() {
        let toml = r#"
[shells.posix]
path = "/bin/sh"
pid_tag = "sh_subshell_pid="
pid_expr = "$$"
exit_code_tag = "sh_subshell_exit_code="
exit_code_expr = "$?"

[shells.bash]
path = "/usr/local/bin/bash"
pid_tag = "custom_pid="
pid_expr = "$BASHPID"
exit_code_tag = "custom_exit="
exit_code_expr = "$?"
"#;
        let config: ProjectConfig = toml::from_str(toml).unwrap();
        let registry = config.shell_registry();

        assert_eq!(registry.names(), vec!["bash", "posix"]);
        let bash = registry.get("bash").unwrap();
        assert_eq!(bash.path, PathBuf::from("/usr/local/bin/bash"));
        assert_eq!(bash.pid.tag, "custom_pid=");
        assert_eq!(registry.get("posix").unwrap().name, "posix");
    }
}
