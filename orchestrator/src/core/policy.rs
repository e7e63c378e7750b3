//! Domain policy table and permission checks. Both checks fail closed.

use std::collections::BTreeMap;

use thiserror::Error;

use crate::core::types::Mission;

/// A mission lacks permissions required for the selected runtime.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("policy violation: missing permissions: {missing:?}")]
pub struct PolicyViolation {
    pub missing: Vec<String>,
}

/// Per-domain execution policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DomainPolicy {
    pub requires_human_review: bool,
}

/// Immutable domain policy table, constructed at startup. Unknown domains
/// fall back to "no review required".
#[derive(Debug, Clone)]
pub struct PolicyTable {
    policies: BTreeMap<String, DomainPolicy>,
}

impl Default for PolicyTable {
    fn default() -> Self {
        let mut policies = BTreeMap::new();
        for domain in ["finance", "health"] {
            policies.insert(
                domain.to_string(),
                DomainPolicy {
                    requires_human_review: true,
                },
            );
        }
        policies.insert(
            "general".to_string(),
            DomainPolicy {
                requires_human_review: false,
            },
        );
        Self { policies }
    }
}

impl PolicyTable {
    pub fn new(policies: BTreeMap<String, DomainPolicy>) -> Self {
        Self { policies }
    }

    /// Whether the mission's domain must be escalated before any planning.
    pub fn requires_human_review(&self, mission: &Mission) -> bool {
        self.policies
            .get(&mission.domain)
            .is_some_and(|policy| policy.requires_human_review)
    }
}

/// Require every permission in `required` to be present on the mission.
pub fn check_permissions(mission: &Mission, required: &[&str]) -> Result<(), PolicyViolation> {
    let missing: Vec<String> = required
        .iter()
        .filter(|perm| !mission.permissions.iter().any(|have| have == *perm))
        .map(|perm| perm.to_string())
        .collect();
    if missing.is_empty() {
        return Ok(());
    }
    Err(PolicyViolation { missing })
}
