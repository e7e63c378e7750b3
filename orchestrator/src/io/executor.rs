//! Runtime executor abstraction over remote automation backends.
//!
//! The [`Executor`] trait decouples the run loop from the concrete browser
//! and desktop task APIs. Tests use scripted executors that return
//! predetermined responses without touching the network. The `workspace` and
//! `tools` runtimes share this contract but ship no built-in implementation;
//! callers may register their own.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde_json::{Value, json};
use tracing::{debug, info, instrument};

use crate::core::types::Artifact;
use crate::io::artifact::write_artifact;
use crate::io::config::{BrowserConfig, DesktopConfig};

/// Parameters for one executor invocation.
#[derive(Debug, Clone)]
pub struct ExecuteRequest {
    pub run_id: String,
    pub step_id: String,
    /// Backend-facing action name (e.g. `operate` for the desktop daemon).
    pub action: String,
    pub payload: Value,
}

/// Raw backend response plus the persisted trace artifact.
#[derive(Debug, Clone)]
pub struct ExecutorOutcome {
    pub response: Value,
    pub artifact: Artifact,
}

/// Abstraction over runtime execution backends.
pub trait Executor: Send + Sync {
    /// Run one action against the backend and persist its trace artifact.
    fn execute(&self, request: &ExecuteRequest) -> Result<ExecutorOutcome>;
}

/// Whether a backend response signals success. Anything but `status: "ok"`
/// is treated as an executor error.
pub fn response_ok(response: &Value) -> bool {
    response.get("status").and_then(Value::as_str) == Some("ok")
}

/// Executor backed by a remote browser-automation task API.
pub struct BrowserExecutor {
    base_url: String,
    task_endpoint: String,
    api_key: String,
    engine: String,
    artifact_dir: PathBuf,
    dry_run: bool,
    client: reqwest::blocking::Client,
}

impl BrowserExecutor {
    pub fn new(config: &BrowserConfig, artifact_dir: PathBuf, dry_run: bool) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(180))
            .build()
            .context("build browser http client")?;
        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            task_endpoint: config.task_endpoint.clone(),
            api_key: config.api_key.clone(),
            engine: config.engine.clone(),
            artifact_dir,
            dry_run,
            client,
        })
    }

    /// Task payload with documented fields only: `prompt` plus compatible
    /// optional params, null and empty values dropped.
    fn normalize_payload(&self, payload: &Value) -> Value {
        let prompt = payload
            .get("prompt")
            .or_else(|| payload.get("goal"))
            .and_then(Value::as_str)
            .unwrap_or_default();
        let mut body = serde_json::Map::new();
        body.insert("prompt".to_string(), json!(prompt));
        if let Some(url) = payload.get("url").and_then(Value::as_str) {
            if !url.is_empty() {
                body.insert("url".to_string(), json!(url));
            }
        }
        if !self.engine.is_empty() {
            body.insert("engine".to_string(), json!(self.engine));
        }
        if let Some(metadata) = payload.get("metadata") {
            if !metadata.is_null() {
                body.insert("metadata".to_string(), metadata.clone());
            }
        }
        Value::Object(body)
    }
}

impl Executor for BrowserExecutor {
    #[instrument(skip_all, fields(step_id = %request.step_id, dry_run = self.dry_run))]
    fn execute(&self, request: &ExecuteRequest) -> Result<ExecutorOutcome> {
        let body = self.normalize_payload(&request.payload);
        let response = if self.dry_run {
            json!({
                "status": "ok",
                "run_id": format!("dry-{}", request.step_id),
                "task_id": format!("dry-task-{}", request.step_id),
                "summary": "Simulated browser run for demo/testing",
                "evidence": ["https://example.com"],
                "request": body,
            })
        } else {
            info!(endpoint = %self.task_endpoint, "submitting browser task");
            let mut call = self
                .client
                .post(format!("{}{}", self.base_url, self.task_endpoint))
                .json(&body);
            if !self.api_key.is_empty() {
                call = call.header("x-api-key", &self.api_key);
            }
            call.send()
                .context("call browser task api")?
                .error_for_status()
                .context("browser task api status")?
                .json()
                .context("parse browser task response")?
        };

        let artifact = write_artifact(
            &self.artifact_dir,
            &request.run_id,
            &request.step_id,
            "browser_trace",
            &response,
        )?;
        debug!(artifact = %artifact.path, "browser trace persisted");
        Ok(ExecutorOutcome { response, artifact })
    }
}

/// Executor backed by the desktop-automation daemon.
pub struct DesktopExecutor {
    base_url: String,
    artifact_dir: PathBuf,
    dry_run: bool,
    client: reqwest::blocking::Client,
}

impl DesktopExecutor {
    pub fn new(config: &DesktopConfig, artifact_dir: PathBuf, dry_run: bool) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .context("build desktop http client")?;
        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            artifact_dir,
            dry_run,
            client,
        })
    }
}

impl Executor for DesktopExecutor {
    #[instrument(skip_all, fields(step_id = %request.step_id, dry_run = self.dry_run))]
    fn execute(&self, request: &ExecuteRequest) -> Result<ExecutorOutcome> {
        let response = if self.dry_run {
            json!({
                "status": "ok",
                "runtime": "desktop",
                "action": request.action,
                "result": "simulated",
            })
        } else {
            info!(action = %request.action, "submitting desktop action");
            self.client
                .post(format!("{}/execute", self.base_url))
                .json(&json!({"action": request.action, "payload": request.payload}))
                .send()
                .context("call desktop daemon")?
                .error_for_status()
                .context("desktop daemon status")?
                .json()
                .context("parse desktop response")?
        };

        let artifact = write_artifact(
            &self.artifact_dir,
            &request.run_id,
            &request.step_id,
            "desktop_trace",
            &response,
        )?;
        debug!(artifact = %artifact.path, "desktop trace persisted");
        Ok(ExecutorOutcome { response, artifact })
    }
}

/// Surface a non-ok backend response as an executor error.
pub fn require_ok(response: &Value) -> Result<()> {
    if response_ok(response) {
        return Ok(());
    }
    let status = response
        .get("status")
        .and_then(Value::as_str)
        .unwrap_or("missing");
    Err(anyhow!("executor returned status {status:?}"))
}
