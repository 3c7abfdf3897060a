//! Script discovery for a run.
//!
//! Lists the scripts directory (flat, non-recursive), skips hidden entries,
//! and orders scripts by the numeric key encoded in their file names. Every
//! traversal re-reads the directory, so scripts added between runs are picked
//! up without rebuilding the collection.

use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::debug;

use crate::script::Script;

#[derive(Debug, Clone)]
pub struct ScriptCollection {
    directory: PathBuf,
}

impl ScriptCollection {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    /// Scripts in execution order.
    ///
    /// Ordering rules:
    /// - keys are extracted once per script, then stable-sorted
    /// - unnumbered scripts share key `0`
    /// - ties keep directory enumeration order
    pub fn scripts(&self) -> Result<Vec<Script>> {
        let mut keyed = Vec::new();

        for entry in std::fs::read_dir(&self.directory).with_context(|| {
            format!(
                "failed to read scripts directory {}",
                self.directory.display()
            )
        })? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with('.') {
                continue;
            }

            let script = Script::new(&name, &self.directory)?;
            keyed.push((script.order_key(), script));
        }

        keyed.sort_by_key(|(key, _)| *key);
        debug!(
            directory = %self.directory.display(),
            count = keyed.len(),
            "discovered scripts"
        );

        Ok(keyed.into_iter().map(|(_, script)| script).collect())
    }

    /// Fresh iteration over the scripts in execution order.
    pub fn iter(&self) -> Result<std::vec::IntoIter<Script>> {
        Ok(self.scripts()?.into_iter())
    }
}
