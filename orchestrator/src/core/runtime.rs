//! Execution runtime selection for missions.

use serde::{Deserialize, Serialize};

use crate::core::types::Mission;

/// An execution surface a step can run against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Runtime {
    Browser,
    Desktop,
    Workspace,
    Tools,
}

impl Runtime {
    pub fn as_str(self) -> &'static str {
        match self {
            Runtime::Browser => "browser",
            Runtime::Desktop => "desktop",
            Runtime::Workspace => "workspace",
            Runtime::Tools => "tools",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "browser" => Some(Runtime::Browser),
            "desktop" => Some(Runtime::Desktop),
            "workspace" => Some(Runtime::Workspace),
            "tools" => Some(Runtime::Tools),
            _ => None,
        }
    }

    /// Permission a mission must hold before executing on this runtime.
    pub fn required_permission(self) -> &'static str {
        match self {
            Runtime::Desktop => "desktop.control",
            _ => "web.browse",
        }
    }
}

/// Objective keywords that route a mission to the desktop runtime.
const DESKTOP_HINTS: [&str; 6] = [
    "excel",
    "desktop",
    "local app",
    "clipboard",
    "file explorer",
    "terminal",
];

/// Pick the runtime for a mission.
///
/// An explicit `metadata.runtime` of `browser`, `desktop`, or `workspace`
/// wins. Otherwise the objective text is matched against the desktop hint
/// vocabulary, defaulting to the browser runtime.
pub fn select_runtime(mission: &Mission) -> Runtime {
    let forced = mission
        .metadata
        .get("runtime")
        .and_then(|value| value.as_str())
        .and_then(Runtime::parse);
    if let Some(runtime) = forced {
        if matches!(
            runtime,
            Runtime::Browser | Runtime::Desktop | Runtime::Workspace
        ) {
            return runtime;
        }
    }

    let objective = mission.objective.to_lowercase();
    if DESKTOP_HINTS.iter().any(|hint| objective.contains(hint)) {
        Runtime::Desktop
    } else {
        Runtime::Browser
    }
}
