//! Test-only scripted fakes and fixtures for exercising the run loop.

use std::collections::{BTreeMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Result, anyhow};
use serde_json::{Value, json};

use crate::core::types::Mission;
use crate::io::artifact::write_artifact;
use crate::io::config::OrchestratorConfig;
use crate::io::executor::{ExecuteRequest, Executor, ExecutorOutcome};
use crate::io::ident::new_mission;
use crate::io::progress::ProgressSink;
use crate::io::router::CompletionBackend;
use crate::io::store::RunStore;

/// Fresh store in a temp directory.
pub fn temp_store() -> (tempfile::TempDir, RunStore) {
    let temp = tempfile::tempdir().expect("tempdir");
    let store = RunStore::new(temp.path().join("orchestrator.db"));
    store.init().expect("init store");
    (temp, store)
}

/// Mission with default permissions, budget, and step limit.
pub fn test_mission(objective: &str) -> Mission {
    new_mission(objective)
}

/// Dry-run config rooted under `root`, with near-zero backoff delays.
pub fn test_config(root: &Path) -> OrchestratorConfig {
    OrchestratorConfig {
        db_path: root.join("orchestrator.db"),
        artifact_root: root.join("artifacts"),
        dry_run: true,
        base_delay_ms: 1,
        max_delay_ms: 4,
        ..OrchestratorConfig::default()
    }
}

/// Completion backend with per-model scripted responses.
///
/// Pops the next queued response for the requested model; models without a
/// queued response echo the prompt deterministically.
#[derive(Default)]
pub struct ScriptedCompletionBackend {
    responses: Mutex<BTreeMap<String, VecDeque<String>>>,
}

impl ScriptedCompletionBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_response(&self, model: &str, text: &str) {
        self.responses
            .lock()
            .expect("lock")
            .entry(model.to_string())
            .or_default()
            .push_back(text.to_string());
    }
}

impl CompletionBackend for ScriptedCompletionBackend {
    fn complete(&self, model: &str, prompt: &str) -> Result<String> {
        let scripted = self
            .responses
            .lock()
            .expect("lock")
            .get_mut(model)
            .and_then(VecDeque::pop_front);
        match scripted {
            Some(text) => Ok(text),
            None => Ok(format!(
                "[scripted:{model}] {}",
                prompt.lines().next().unwrap_or_default()
            )),
        }
    }
}

/// One scripted executor invocation.
pub enum ScriptedExecution {
    Respond(Value),
    Fail(String),
}

/// Executor returning predetermined responses without touching the network.
///
/// Artifacts are written for real so checksum and persistence behavior stay
/// covered. An optional hook observes each request (used to flip run
/// controls mid-run).
pub struct ScriptedExecutor {
    artifact_dir: PathBuf,
    script: Mutex<VecDeque<ScriptedExecution>>,
    on_execute: Option<Box<dyn Fn(&ExecuteRequest) + Send + Sync>>,
}

impl ScriptedExecutor {
    pub fn new(artifact_dir: impl Into<PathBuf>) -> Self {
        Self {
            artifact_dir: artifact_dir.into(),
            script: Mutex::new(VecDeque::new()),
            on_execute: None,
        }
    }

    pub fn with_script(self, script: Vec<ScriptedExecution>) -> Self {
        *self.script.lock().expect("lock") = script.into();
        self
    }

    pub fn with_hook(mut self, hook: impl Fn(&ExecuteRequest) + Send + Sync + 'static) -> Self {
        self.on_execute = Some(Box::new(hook));
        self
    }
}

impl Executor for ScriptedExecutor {
    fn execute(&self, request: &ExecuteRequest) -> Result<ExecutorOutcome> {
        if let Some(hook) = &self.on_execute {
            hook(request);
        }
        let next = self.script.lock().expect("lock").pop_front();
        let response = match next {
            Some(ScriptedExecution::Respond(value)) => value,
            Some(ScriptedExecution::Fail(message)) => return Err(anyhow!(message)),
            None => json!({"status": "ok", "summary": "scripted execution"}),
        };
        let artifact = write_artifact(
            &self.artifact_dir,
            &request.run_id,
            &request.step_id,
            "browser_trace",
            &response,
        )?;
        Ok(ExecutorOutcome { response, artifact })
    }
}

/// Progress sink that records every emitted event.
#[derive(Default)]
pub struct CollectingProgress {
    events: Mutex<Vec<(String, Value)>>,
}

impl CollectingProgress {
    pub fn events(&self) -> Vec<(String, Value)> {
        self.events.lock().expect("lock").clone()
    }
}

impl ProgressSink for CollectingProgress {
    fn emit(&self, channel: &str, payload: &Value) {
        self.events
            .lock()
            .expect("lock")
            .push((channel.to_string(), payload.clone()));
    }
}
