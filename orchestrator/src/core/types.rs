//! Shared data model for missions, runs, and their persisted records.
//!
//! These types define stable contracts between the orchestrator and its run
//! store. They are plain serde models; construction helpers that need a clock
//! or randomness live in [`crate::io::ident`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Lifecycle state of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunState {
    Created,
    Planned,
    Executing,
    Validating,
    Retrying,
    HumanReview,
    Completed,
    Failed,
}

impl RunState {
    pub fn as_str(self) -> &'static str {
        match self {
            RunState::Created => "CREATED",
            RunState::Planned => "PLANNED",
            RunState::Executing => "EXECUTING",
            RunState::Validating => "VALIDATING",
            RunState::Retrying => "RETRYING",
            RunState::HumanReview => "HUMAN_REVIEW",
            RunState::Completed => "COMPLETED",
            RunState::Failed => "FAILED",
        }
    }

    /// Terminal states have no outgoing transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, RunState::Completed | RunState::Failed)
    }
}

/// Classification of a failed executor or model call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    ToolError,
    NetworkError,
    RateLimited,
    ValidationError,
    PolicyBlocked,
    BudgetExceeded,
}

impl ErrorClass {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorClass::ToolError => "tool_error",
            ErrorClass::NetworkError => "network_error",
            ErrorClass::RateLimited => "rate_limited",
            ErrorClass::ValidationError => "validation_error",
            ErrorClass::PolicyBlocked => "policy_blocked",
            ErrorClass::BudgetExceeded => "budget_exceeded",
        }
    }
}

/// Lifecycle state of a persisted step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepState {
    Pending,
    Ok,
    Error,
}

/// A caller-submitted objective plus budget, permission, and runtime
/// constraints. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mission {
    pub id: String,
    pub objective: String,
    pub domain: String,
    pub permissions: Vec<String>,
    pub budget_usd: f64,
    pub max_steps: u32,
    /// Free-form caller metadata. A `runtime` key forces runtime selection,
    /// a `url` key seeds the browser task payload.
    pub metadata: BTreeMap<String, serde_json::Value>,
    pub created_at: String,
}

/// One execution attempt of a mission. Mutated only by the orchestrator via
/// validated transitions; persisted as a full snapshot on every change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    pub id: String,
    pub mission_id: String,
    pub state: RunState,
    pub attempt: u32,
    pub cost_usd: f64,
    pub created_at: String,
}

/// One executor or validator invocation within a run. Written once on
/// completion, never mutated after.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub id: String,
    pub run_id: String,
    pub role: String,
    pub action: String,
    pub input: serde_json::Value,
    pub output: serde_json::Value,
    pub state: StepState,
    pub duration_ms: u64,
    pub error: Option<ErrorClass>,
    pub created_at: String,
}

/// A persisted trace file produced by an executor call. Immutable once
/// written; `checksum` is a SHA-256 digest of the stored bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub id: String,
    pub run_id: String,
    pub step_id: String,
    pub kind: String,
    pub path: String,
    pub content_type: String,
    pub checksum: String,
    pub provenance: String,
    pub created_at: String,
}

/// Append-only observability event. Never read back by the orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryEvent {
    pub run_id: String,
    pub step_id: String,
    pub name: String,
    pub value: f64,
    pub tags: BTreeMap<String, String>,
    pub created_at: String,
}

/// Verdict parsed from a validator model's raw text output. Embedded in the
/// validator step's output, never persisted on its own.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ValidationResult {
    pub passed: bool,
    pub reason: String,
    pub next_action: String,
}
