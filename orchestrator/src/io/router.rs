//! Budget-enforced model completion with per-role fallback chains.
//!
//! One [`ModelRouter`] instance owns the spend accounting for exactly one
//! mission run. Routers must never be shared across concurrent runs.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::core::text::truncate_chars;

/// A completion would push spend past the budget cap. Raised before any
/// backend call is made; always fatal to the run.
#[derive(Debug, Clone, Copy, PartialEq, Error)]
#[error("model budget exceeded: spent {spent_usd:.4} + estimate {estimate_usd:.4} over cap {budget_usd:.4}")]
pub struct BudgetExceeded {
    pub spent_usd: f64,
    pub estimate_usd: f64,
    pub budget_usd: f64,
}

/// Every candidate model in a role's fallback chain failed.
#[derive(Debug, Error)]
#[error("all model fallbacks failed for role={role}: {last_error:#}")]
pub struct AllFallbacksFailed {
    pub role: String,
    pub last_error: anyhow::Error,
}

/// Abstraction over the completion backend, one call per candidate model.
pub trait CompletionBackend: Send + Sync {
    fn complete(&self, model: &str, prompt: &str) -> Result<String>;
}

/// OpenAI-style chat-completions backend.
pub struct HttpCompletionBackend {
    base_url: String,
    api_key: String,
    client: reqwest::blocking::Client,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: String,
}

impl HttpCompletionBackend {
    pub fn new(base_url: &str, api_key: &str) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .context("build completion http client")?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            client,
        })
    }
}

impl CompletionBackend for HttpCompletionBackend {
    #[instrument(skip_all, fields(model = %model))]
    fn complete(&self, model: &str, prompt: &str) -> Result<String> {
        let body = json!({
            "model": model,
            "messages": [{"role": "user", "content": prompt}],
            "temperature": 0.2,
        });
        let response: ChatCompletionResponse = self
            .client
            .post(format!("{}/v1/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .context("call completion api")?
            .error_for_status()
            .context("completion api status")?
            .json()
            .context("parse completion response")?;
        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("completion response has no choices"))?;
        Ok(choice.message.content)
    }
}

/// Dry-run backend returning deterministic simulated completions.
pub struct SimulatedCompletionBackend;

impl CompletionBackend for SimulatedCompletionBackend {
    fn complete(&self, model: &str, prompt: &str) -> Result<String> {
        if model == "local_reflector" {
            return Ok(
                r#"{"passed": true, "reason": "dry-run validated", "next_action": "none"}"#
                    .to_string(),
            );
        }
        Ok(format!("[dry-run:{model}] {}", truncate_chars(prompt, 180)))
    }
}

/// Budget-checked completion router with per-role fallback chains.
pub struct ModelRouter {
    backend: Arc<dyn CompletionBackend>,
    budget_usd: f64,
    spent_usd: f64,
    fallbacks: BTreeMap<String, Vec<String>>,
}

fn default_fallbacks() -> BTreeMap<String, Vec<String>> {
    let chains = [
        ("planner", vec!["planner", "manager", "local_reflector"]),
        ("validator", vec!["local_reflector", "planner"]),
        ("manager", vec!["manager", "planner"]),
        ("vision_executor", vec!["vision_executor", "planner"]),
    ];
    chains
        .into_iter()
        .map(|(role, models)| {
            (
                role.to_string(),
                models.into_iter().map(|m| m.to_string()).collect(),
            )
        })
        .collect()
}

impl ModelRouter {
    pub fn new(backend: Arc<dyn CompletionBackend>, budget_usd: f64) -> Self {
        Self {
            backend,
            budget_usd,
            spent_usd: 0.0,
            fallbacks: default_fallbacks(),
        }
    }

    /// Cumulative estimated spend so far. Monotonically non-decreasing.
    pub fn spent_usd(&self) -> f64 {
        self.spent_usd
    }

    /// Placeholder linear estimate: a floor plus prompt length. Deliberately
    /// approximate; the shape (monotonic, strictly positive) is the contract.
    fn estimate_cost(prompt: &str) -> f64 {
        (prompt.len() as f64 / 10_000.0).max(0.0002)
    }

    /// Complete `prompt` for `role`, walking the role's fallback chain.
    ///
    /// Fails with [`BudgetExceeded`] before any backend call if the estimate
    /// would push spend past the cap, and with [`AllFallbacksFailed`] when
    /// every candidate errors.
    pub fn complete(&mut self, role: &str, prompt: &str) -> Result<String> {
        let estimate = Self::estimate_cost(prompt);
        if self.spent_usd + estimate > self.budget_usd {
            return Err(BudgetExceeded {
                spent_usd: self.spent_usd,
                estimate_usd: estimate,
                budget_usd: self.budget_usd,
            }
            .into());
        }

        let chain = self
            .fallbacks
            .get(role)
            .cloned()
            .unwrap_or_else(|| vec![role.to_string()]);
        let mut last_error = None;
        for model in &chain {
            match self.backend.complete(model, prompt) {
                Ok(text) => {
                    self.spent_usd += estimate;
                    debug!(role, model = %model, spent_usd = self.spent_usd, "completion succeeded");
                    return Ok(text);
                }
                Err(err) => {
                    warn!(role, model = %model, error = %format!("{err:#}"), "fallback candidate failed");
                    last_error = Some(err);
                }
            }
        }
        let last_error =
            last_error.unwrap_or_else(|| anyhow!("no fallback models configured for role {role}"));
        Err(AllFallbacksFailed {
            role: role.to_string(),
            last_error,
        }
        .into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Backend that records calls and fails for configured models.
    struct ScriptedModels {
        calls: Mutex<Vec<String>>,
        failing: Vec<String>,
    }

    impl ScriptedModels {
        fn new(failing: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                calls: Mutex::new(Vec::new()),
                failing: failing.iter().map(|m| m.to_string()).collect(),
            })
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().expect("lock").clone()
        }
    }

    impl CompletionBackend for ScriptedModels {
        fn complete(&self, model: &str, _prompt: &str) -> Result<String> {
            self.calls.lock().expect("lock").push(model.to_string());
            if self.failing.iter().any(|m| m == model) {
                return Err(anyhow!("model {model} unavailable"));
            }
            Ok(format!("answer from {model}"))
        }
    }

    #[test]
    fn budget_check_blocks_before_any_backend_call() {
        let count = Arc::new(AtomicUsize::new(0));
        struct Counting(Arc<AtomicUsize>);
        impl CompletionBackend for Counting {
            fn complete(&self, _model: &str, _prompt: &str) -> Result<String> {
                self.0.fetch_add(1, Ordering::SeqCst);
                Ok("never".to_string())
            }
        }

        let mut router = ModelRouter::new(Arc::new(Counting(Arc::clone(&count))), 0.0001);
        let err = router.complete("planner", "a prompt").unwrap_err();
        assert!(err.downcast_ref::<BudgetExceeded>().is_some());
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert_eq!(router.spent_usd(), 0.0);
    }

    #[test]
    fn fallback_chain_is_walked_in_order() {
        let backend = ScriptedModels::new(&["planner", "manager"]);
        let mut router = ModelRouter::new(Arc::clone(&backend) as Arc<dyn CompletionBackend>, 10.0);
        let text = router.complete("planner", "plan this").expect("complete");
        assert_eq!(text, "answer from local_reflector");
        assert_eq!(backend.calls(), vec!["planner", "manager", "local_reflector"]);
    }

    #[test]
    fn unknown_role_tries_itself() {
        let backend = ScriptedModels::new(&[]);
        let mut router = ModelRouter::new(Arc::clone(&backend) as Arc<dyn CompletionBackend>, 10.0);
        let text = router.complete("summarizer", "summarize").expect("complete");
        assert_eq!(text, "answer from summarizer");
        assert_eq!(backend.calls(), vec!["summarizer"]);
    }

    #[test]
    fn exhausted_chain_reports_last_cause() {
        let backend = ScriptedModels::new(&["planner", "manager", "local_reflector"]);
        let mut router = ModelRouter::new(Arc::clone(&backend) as Arc<dyn CompletionBackend>, 10.0);
        let err = router.complete("planner", "plan this").unwrap_err();
        let failed = err
            .downcast_ref::<AllFallbacksFailed>()
            .expect("typed error");
        assert_eq!(failed.role, "planner");
        assert!(failed.last_error.to_string().contains("local_reflector"));
        assert_eq!(router.spent_usd(), 0.0);
    }

    #[test]
    fn spend_accumulates_monotonically() {
        let backend = ScriptedModels::new(&[]);
        let mut router = ModelRouter::new(Arc::clone(&backend) as Arc<dyn CompletionBackend>, 10.0);
        router.complete("planner", "one").expect("first");
        let after_first = router.spent_usd();
        assert!(after_first >= 0.0002);
        router.complete("validator", "two").expect("second");
        assert!(router.spent_usd() > after_first);
    }

    #[test]
    fn estimate_has_a_floor_and_grows_with_length() {
        assert_eq!(ModelRouter::estimate_cost(""), 0.0002);
        let short = ModelRouter::estimate_cost("short");
        let long = ModelRouter::estimate_cost(&"x".repeat(100_000));
        assert!(long > short);
        assert_eq!(long, 10.0);
    }

    #[test]
    fn simulated_backend_is_deterministic() {
        let backend = SimulatedCompletionBackend;
        let verdict = backend.complete("local_reflector", "whatever").expect("ok");
        assert!(verdict.contains("\"passed\": true"));
        let echo = backend.complete("planner", "Objective: test").expect("ok");
        assert!(echo.starts_with("[dry-run:planner]"));
    }
}
