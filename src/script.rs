//! Script identity: execution-order keys and interpreter discovery.

use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;

use crate::errors::{RunnerError, RunnerResult};

/// `#!` followed by an absolute-style path. The first path character must
/// not start a `. ` construct.
static SHEBANG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^#![/\\](?:[^.\s]|\.\S)").expect("valid shebang regex"));

/// Extract the execution-order key encoded in a script file name.
///
/// The key is the integer between the last `_` and the last `.`:
/// - `bash_output_4.sh` -> `4`
/// - `my_script_-1.sh` -> `-1`
/// - `my_script.sh`, `install.sh`, `notes` -> `0`
pub fn order_key(name: &str) -> i64 {
    let Some(underscore) = name.rfind('_') else {
        return 0;
    };
    let start = underscore + 1;
    let end = name.rfind('.').unwrap_or(name.len());
    if start >= end {
        return 0;
    }
    name[start..end].trim().parse().unwrap_or(0)
}

/// A script file inside the scripts directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Script {
    name: String,
    path: PathBuf,
}

impl Script {
    pub fn new(name: &str, dir: &Path) -> RunnerResult<Self> {
        let path = dir.join(name);
        if !path.exists() {
            return Err(RunnerError::ScriptNotFound(path));
        }
        Ok(Self {
            name: name.to_string(),
            path,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn order_key(&self) -> i64 {
        order_key(&self.name)
    }

    /// Whether the file name carries a non-zero order key.
    pub fn is_numbered(&self) -> bool {
        self.order_key() != 0
    }

    /// Read the script line by line and return the interpreter named by the
    /// first shebang line, e.g. `/bin/bash` or `/usr/bin/env python3`.
    pub fn find_shebang_path(&self) -> RunnerResult<String> {
        let file = File::open(&self.path).map_err(|e| {
            RunnerError::io(format!("failed to open {}", self.path.display()), e)
        })?;
        let mut reader = BufReader::new(file);
        let mut bytes = Vec::new();
        loop {
            bytes.clear();
            let read = reader.read_until(b'\n', &mut bytes).map_err(|e| {
                RunnerError::io(format!("failed to read {}", self.path.display()), e)
            })?;
            if read == 0 {
                break;
            }
            // Binary content never matches; it must not abort the scan.
            let line = String::from_utf8_lossy(&bytes);
            if is_shebang(&line) {
                return Ok(extract_shebang_path(&line));
            }
        }
        Err(RunnerError::MissingShebang {
            script: self.name.clone(),
        })
    }
}

impl fmt::Display for Script {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

fn is_shebang(line: &str) -> bool {
    SHEBANG_RE.is_match(line)
}

fn extract_shebang_path(line: &str) -> String {
    line.replace("#!", "")
        .trim_end_matches(['\n', '\r'])
        .to_string()
}
