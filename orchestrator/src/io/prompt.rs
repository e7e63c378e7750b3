//! Prompt rendering for the planner and validator roles.

use anyhow::{Context, Result};
use minijinja::{Environment, context};

const PLANNER_TEMPLATE: &str = include_str!("prompts/planner.md");
const VALIDATOR_TEMPLATE: &str = include_str!("prompts/validator.md");

/// Inputs for the planning prompt.
#[derive(Debug, Clone)]
pub struct PlannerInputs<'a> {
    pub runtime: &'a str,
    pub objective: &'a str,
    /// Token summary of recent failures in this domain, empty when none.
    pub failure_summary: String,
    /// Memory snippets ranked against the objective.
    pub retrieved: Vec<String>,
}

/// Inputs for the validation prompt.
#[derive(Debug, Clone)]
pub struct ValidatorInputs<'a> {
    pub plan: &'a str,
    pub runtime: &'a str,
    /// Execution result JSON, truncated by the caller.
    pub execution: &'a str,
}

/// Template engine wrapper around minijinja.
pub struct PromptEngine {
    env: Environment<'static>,
}

impl PromptEngine {
    pub fn new() -> Self {
        let mut env = Environment::new();
        env.add_template("planner", PLANNER_TEMPLATE)
            .expect("planner template should be valid");
        env.add_template("validator", VALIDATOR_TEMPLATE)
            .expect("validator template should be valid");
        Self { env }
    }

    pub fn render_planner(&self, inputs: &PlannerInputs<'_>) -> Result<String> {
        let template = self.env.get_template("planner")?;
        let failure_summary = (!inputs.failure_summary.is_empty())
            .then_some(inputs.failure_summary.as_str());
        let retrieved = (!inputs.retrieved.is_empty()).then_some(&inputs.retrieved);
        template
            .render(context! {
                runtime => inputs.runtime,
                objective => inputs.objective,
                failure_summary => failure_summary,
                retrieved => retrieved,
            })
            .context("render planner prompt")
    }

    pub fn render_validator(&self, inputs: &ValidatorInputs<'_>) -> Result<String> {
        let template = self.env.get_template("validator")?;
        template
            .render(context! {
                plan => inputs.plan,
                runtime => inputs.runtime,
                execution => inputs.execution,
            })
            .context("render validator prompt")
    }
}

impl Default for PromptEngine {
    fn default() -> Self {
        Self::new()
    }
}
