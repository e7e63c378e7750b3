//! Identifier and timestamp helpers for persisted records.

use chrono::{SecondsFormat, Utc};
use rand::{Rng, distributions::Alphanumeric};

use crate::core::types::{Mission, Run, RunState};

/// Random 8-char lowercase id with a record-kind prefix, e.g. `run-k3f9x2ad`.
pub fn short_id(prefix: &str) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(8)
        .map(|c| (c as char).to_ascii_lowercase())
        .collect();
    format!("{prefix}-{suffix}")
}

/// Current UTC time as RFC 3339.
pub fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Build a mission with a fresh id and the default permission set, budget,
/// and step limit. Callers adjust fields before submission.
pub fn new_mission(objective: &str) -> Mission {
    Mission {
        id: short_id("mission"),
        objective: objective.to_string(),
        domain: "general".to_string(),
        permissions: [
            "web.browse",
            "workspace.read",
            "workspace.write",
            "desktop.control",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect(),
        budget_usd: 2.0,
        max_steps: 8,
        metadata: Default::default(),
        created_at: timestamp(),
    }
}

/// Build a fresh run for a mission, starting in `CREATED`.
pub fn new_run(mission_id: &str) -> Run {
    Run {
        id: short_id("run"),
        mission_id: mission_id.to_string(),
        state: RunState::Created,
        attempt: 0,
        cost_usd: 0.0,
        created_at: timestamp(),
    }
}
