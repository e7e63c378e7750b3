//! Orchestrator configuration stored as a TOML file.
//!
//! This file is intended to be edited by humans and must remain stable and
//! automatable. Missing fields default to sensible local values. Dry-run is
//! an explicit field threaded through every collaborator's constructor so
//! behavior stays deterministic in tests.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::retry::RetryPolicy;

/// Top-level orchestrator configuration (TOML).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// SQLite database for missions, runs, steps, and queue jobs.
    pub db_path: PathBuf,

    /// Root directory for per-run workspaces and executor artifacts.
    pub artifact_root: PathBuf,

    /// When true, model and executor calls return deterministic simulated
    /// payloads instead of making network calls.
    pub dry_run: bool,

    /// Maximum retry attempts per run before escalation.
    pub max_attempts: u32,

    /// Base backoff delay in milliseconds (doubles per attempt).
    pub base_delay_ms: u64,

    /// Backoff delay ceiling in milliseconds.
    pub max_delay_ms: u64,

    pub model: ModelConfig,
    pub browser: BrowserConfig,
    pub desktop: DesktopConfig,
}

/// Model completion gateway (OpenAI-style chat completions).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ModelConfig {
    pub base_url: String,
    pub api_key: String,
}

/// Remote browser-automation task API.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BrowserConfig {
    pub base_url: String,
    pub task_endpoint: String,
    pub api_key: String,
    /// Engine hint forwarded in the task payload.
    pub engine: String,
}

/// Desktop-automation daemon.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DesktopConfig {
    pub base_url: String,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("orchestrator.db"),
            artifact_root: PathBuf::from("workspace_artifacts"),
            dry_run: false,
            max_attempts: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 8_000,
            model: ModelConfig::default(),
            browser: BrowserConfig::default(),
            desktop: DesktopConfig::default(),
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            base_url: "http://litellm:4000".to_string(),
            api_key: "dev".to_string(),
        }
    }
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            base_url: "http://skyvern:8000".to_string(),
            task_endpoint: "/api/v1/tasks".to_string(),
            api_key: String::new(),
            engine: "browser".to_string(),
        }
    }
}

impl Default for DesktopConfig {
    fn default() -> Self {
        Self {
            base_url: "http://desktop-daemon:8890".to_string(),
        }
    }
}

impl OrchestratorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(anyhow!("max_attempts must be > 0"));
        }
        if self.base_delay_ms == 0 {
            return Err(anyhow!("base_delay_ms must be > 0"));
        }
        if self.max_delay_ms < self.base_delay_ms {
            return Err(anyhow!("max_delay_ms must be >= base_delay_ms"));
        }
        if self.model.base_url.trim().is_empty() {
            return Err(anyhow!("model.base_url must be non-empty"));
        }
        if self.browser.base_url.trim().is_empty() {
            return Err(anyhow!("browser.base_url must be non-empty"));
        }
        if self.desktop.base_url.trim().is_empty() {
            return Err(anyhow!("desktop.base_url must be non-empty"));
        }
        Ok(())
    }

    /// Retry policy derived from the configured delays.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
        }
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `OrchestratorConfig::default()`.
pub fn load_config(path: &Path) -> Result<OrchestratorConfig> {
    if !path.exists() {
        let cfg = OrchestratorConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: OrchestratorConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}
