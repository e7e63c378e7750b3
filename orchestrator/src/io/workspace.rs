//! Per-run workspace directories for inputs, outputs, and logs.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;

/// Directory layout for one run's on-disk workspace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunPaths {
    pub base: PathBuf,
    pub inputs: PathBuf,
    pub outputs: PathBuf,
    pub artifacts: PathBuf,
    pub logs: PathBuf,
}

/// Root under which every run gets an isolated workspace.
#[derive(Debug, Clone)]
pub struct RunWorkspace {
    root: PathBuf,
}

impl RunWorkspace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Create the run's directory tree and return its paths.
    pub fn init_run(&self, run_id: &str) -> Result<RunPaths> {
        let base = self.root.join("missions").join(run_id);
        let paths = RunPaths {
            inputs: base.join("inputs"),
            outputs: base.join("outputs"),
            artifacts: base.join("artifacts"),
            logs: base.join("logs"),
            base,
        };
        for dir in [
            &paths.base,
            &paths.inputs,
            &paths.outputs,
            &paths.artifacts,
            &paths.logs,
        ] {
            fs::create_dir_all(dir)
                .with_context(|| format!("create run directory {}", dir.display()))?;
        }
        Ok(paths)
    }
}

/// Write a serializable value as pretty JSON.
pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    let mut buf = serde_json::to_string_pretty(value).context("serialize json payload")?;
    buf.push('\n');
    fs::write(path, buf).with_context(|| format!("write {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_run_creates_the_layout() {
        let temp = tempfile::tempdir().expect("tempdir");
        let workspace = RunWorkspace::new(temp.path());
        let paths = workspace.init_run("run-1").expect("init");
        for dir in [&paths.inputs, &paths.outputs, &paths.artifacts, &paths.logs] {
            assert!(dir.is_dir(), "{}", dir.display());
        }
        assert!(paths.base.ends_with("missions/run-1"));
    }

    #[test]
    fn write_json_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("nested").join("out.json");
        write_json(&path, &serde_json::json!({"ok": true})).expect("write");
        let value: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).expect("read")).expect("parse");
        assert_eq!(value["ok"], true);
    }
}
