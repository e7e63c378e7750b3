//! End-to-end dry-run coverage for the mission loop.
//!
//! These tests wire the orchestrator with simulated or scripted backends so
//! no network calls are made, then assert on the terminal outcome and on
//! what was persisted in the run store.

use std::sync::Arc;

use serde_json::{Value, json};

use orchestrator::core::policy::PolicyViolation;
use orchestrator::core::runtime::Runtime;
use orchestrator::core::types::{RunState, StepState};
use orchestrator::io::progress::ProgressSink;
use orchestrator::io::store::{RunControl, RunStore};
use orchestrator::run::Orchestrator;
use orchestrator::test_support::{
    CollectingProgress, ScriptedCompletionBackend, ScriptedExecution, ScriptedExecutor,
    test_config, test_mission,
};

const FAILED_VALIDATION: &str =
    r#"{"passed": false, "reason": "totals still missing", "next_action": "retry"}"#;

#[test]
fn dry_run_reaches_terminal_state_and_persists_steps() {
    let temp = tempfile::tempdir().expect("tempdir");
    let config = test_config(temp.path());
    let progress = Arc::new(CollectingProgress::default());

    let orchestrator = Orchestrator::new(&config)
        .expect("build orchestrator")
        .with_progress(Box::new(Arc::clone(&progress)));

    let mut mission = test_mission("Research test objective");
    mission.max_steps = 2;
    let outcome = orchestrator.run_mission(&mission).expect("run mission");

    assert!(matches!(
        outcome.state,
        RunState::Completed | RunState::HumanReview | RunState::Failed
    ));

    let steps = orchestrator
        .store()
        .steps_for_run(&outcome.run_id)
        .expect("read steps");
    assert!(steps.iter().any(|s| s.role.ends_with("_executor")));
    assert!(steps.iter().any(|s| s.role == "validator"));

    let events = progress.events();
    assert_eq!(events.first().expect("first event").1["state"], "CREATED");
}

#[test]
fn dry_run_completes_with_validation_payload() {
    let temp = tempfile::tempdir().expect("tempdir");
    let config = test_config(temp.path());
    let orchestrator = Orchestrator::new(&config).expect("build orchestrator");

    let mission = test_mission("Research test objective");
    let outcome = orchestrator.run_mission(&mission).expect("run mission");

    // The simulated validator always passes on the first iteration.
    assert_eq!(outcome.state, RunState::Completed);
    assert_eq!(outcome.step, Some(1));
    assert_eq!(outcome.runtime, Some(Runtime::Browser));
    assert!(outcome.validation.expect("validation").passed);
    let artifact = outcome.artifact.expect("artifact path");
    assert!(std::path::Path::new(&artifact).exists());
}

#[test]
fn excel_objective_routes_to_desktop_runtime() {
    let temp = tempfile::tempdir().expect("tempdir");
    let config = test_config(temp.path());
    let orchestrator = Orchestrator::new(&config).expect("build orchestrator");

    let mission = test_mission("Open Excel and update spreadsheet totals");
    let outcome = orchestrator.run_mission(&mission).expect("run mission");

    assert_eq!(outcome.runtime, Some(Runtime::Desktop));
    let steps = orchestrator
        .store()
        .steps_for_run(&outcome.run_id)
        .expect("read steps");
    assert!(steps.iter().any(|s| s.role == "desktop_executor"));
}

/// Pauses the run as soon as a retry is announced.
struct PauseOnRetry {
    store: RunStore,
}

impl ProgressSink for PauseOnRetry {
    fn emit(&self, _channel: &str, payload: &Value) {
        if payload["state"] == "RETRYING" {
            let run_id = payload["run_id"].as_str().expect("run id");
            self.store
                .set_run_control(run_id, RunControl::Paused)
                .expect("pause run");
        }
    }
}

#[test]
fn pause_is_honored_at_the_next_iteration_boundary() {
    let temp = tempfile::tempdir().expect("tempdir");
    let config = test_config(temp.path());

    let backend = ScriptedCompletionBackend::new();
    backend.push_response("local_reflector", FAILED_VALIDATION);

    let orchestrator = Orchestrator::new(&config)
        .expect("build orchestrator")
        .with_completion_backend(Arc::new(backend))
        .with_progress(Box::new(PauseOnRetry {
            store: RunStore::new(&config.db_path),
        }));

    let mission = test_mission("Research test objective");
    let outcome = orchestrator.run_mission(&mission).expect("run mission");

    assert_eq!(outcome.state, RunState::HumanReview);
    assert_eq!(outcome.reason.as_deref(), Some("paused by operator"));

    // The pause took effect before the second iteration: exactly one
    // executor step was recorded.
    let steps = orchestrator
        .store()
        .steps_for_run(&outcome.run_id)
        .expect("read steps");
    let executor_steps = steps.iter().filter(|s| s.role.ends_with("_executor")).count();
    assert_eq!(executor_steps, 1);
}

#[test]
fn review_domain_escalates_before_any_planning() {
    let temp = tempfile::tempdir().expect("tempdir");
    let config = test_config(temp.path());
    let orchestrator = Orchestrator::new(&config).expect("build orchestrator");

    let mut mission = test_mission("Rebalance the retirement portfolio");
    mission.domain = "finance".to_string();
    let outcome = orchestrator.run_mission(&mission).expect("run mission");

    assert_eq!(outcome.state, RunState::HumanReview);
    assert_eq!(
        outcome.reason.as_deref(),
        Some("domain requires human review")
    );

    let steps = orchestrator
        .store()
        .steps_for_run(&outcome.run_id)
        .expect("read steps");
    assert!(steps.is_empty());

    let run = orchestrator
        .store()
        .run_payload(&outcome.run_id)
        .expect("read run")
        .expect("run present");
    assert_eq!(run["cost_usd"], 0.0);
    assert_eq!(run["state"], "HUMAN_REVIEW");
}

#[test]
fn exhausted_validation_attempts_escalate_to_human_review() {
    let temp = tempfile::tempdir().expect("tempdir");
    let config = test_config(temp.path());

    let backend = ScriptedCompletionBackend::new();
    for _ in 0..3 {
        backend.push_response("local_reflector", FAILED_VALIDATION);
    }

    let orchestrator = Orchestrator::new(&config)
        .expect("build orchestrator")
        .with_completion_backend(Arc::new(backend));

    let mission = test_mission("Research test objective");
    let outcome = orchestrator.run_mission(&mission).expect("run mission");

    assert_eq!(outcome.state, RunState::HumanReview);
    assert_eq!(outcome.reason.as_deref(), Some("totals still missing"));

    let steps = orchestrator
        .store()
        .steps_for_run(&outcome.run_id)
        .expect("read steps");
    let executor_steps = steps.iter().filter(|s| s.role.ends_with("_executor")).count();
    assert_eq!(executor_steps, 3);
}

#[test]
fn exhausted_executor_failures_end_in_failed() {
    let temp = tempfile::tempdir().expect("tempdir");
    let config = test_config(temp.path());

    let executor = ScriptedExecutor::new(temp.path().join("scripted")).with_script(vec![
        ScriptedExecution::Fail("browser backend exploded".to_string()),
        ScriptedExecution::Fail("browser backend exploded".to_string()),
        ScriptedExecution::Fail("browser backend exploded".to_string()),
    ]);

    let orchestrator = Orchestrator::new(&config)
        .expect("build orchestrator")
        .with_executor(Runtime::Browser, Box::new(executor));

    let mission = test_mission("Research test objective");
    let outcome = orchestrator.run_mission(&mission).expect("run mission");

    assert_eq!(outcome.state, RunState::Failed);
    assert_eq!(outcome.error.as_deref(), Some("tool_error"));

    let steps = orchestrator
        .store()
        .steps_for_run(&outcome.run_id)
        .expect("read steps");
    assert_eq!(steps.len(), 3);
    assert!(steps.iter().all(|s| s.state == StepState::Error));
    assert!(!steps.iter().any(|s| s.role == "validator"));
}

#[test]
fn budget_exhaustion_fails_the_run_immediately() {
    let temp = tempfile::tempdir().expect("tempdir");
    let config = test_config(temp.path());

    // A huge execution payload makes the validator prompt estimate overrun
    // the remaining budget, while the short planner prompt fits.
    let executor = ScriptedExecutor::new(temp.path().join("scripted")).with_script(vec![
        ScriptedExecution::Respond(json!({
            "status": "ok",
            "summary": "x".repeat(3000),
        })),
    ]);

    let mut mission = test_mission("Research");
    mission.budget_usd = 0.1;

    let orchestrator = Orchestrator::new(&config)
        .expect("build orchestrator")
        .with_executor(Runtime::Browser, Box::new(executor));

    let outcome = orchestrator.run_mission(&mission).expect("run mission");

    assert_eq!(outcome.state, RunState::Failed);
    assert_eq!(outcome.error.as_deref(), Some("budget_exceeded"));

    // Budget exhaustion short-circuits: one attempt, no retries.
    let steps = orchestrator
        .store()
        .steps_for_run(&outcome.run_id)
        .expect("read steps");
    let errored = steps.iter().filter(|s| s.state == StepState::Error).count();
    assert_eq!(errored, 1);
}

#[test]
fn validator_outage_is_retried_from_a_legal_state() {
    use std::sync::Mutex;

    use anyhow::anyhow;
    use orchestrator::io::router::CompletionBackend;

    /// Fails every validation call until the second iteration.
    struct FlakyValidator {
        validation_calls: Mutex<u32>,
    }

    impl CompletionBackend for FlakyValidator {
        fn complete(&self, model: &str, prompt: &str) -> anyhow::Result<String> {
            if prompt.starts_with("Return strict JSON only") {
                let mut calls = self.validation_calls.lock().expect("lock");
                *calls += 1;
                // Both fallback candidates fail on the first validation.
                if *calls <= 2 {
                    return Err(anyhow!("connection reset by peer"));
                }
                return Ok(
                    r#"{"passed": true, "reason": "verified", "next_action": "none"}"#.to_string(),
                );
            }
            Ok(format!("plan from {model}"))
        }
    }

    let temp = tempfile::tempdir().expect("tempdir");
    let config = test_config(temp.path());
    let orchestrator = Orchestrator::new(&config)
        .expect("build orchestrator")
        .with_completion_backend(Arc::new(FlakyValidator {
            validation_calls: Mutex::new(0),
        }));

    let mission = test_mission("Research test objective");
    let outcome = orchestrator.run_mission(&mission).expect("run mission");

    assert_eq!(outcome.state, RunState::Completed);
    assert_eq!(outcome.step, Some(2));

    // The first executor step was re-persisted as a classified error; the
    // second iteration ran from a clean EXECUTING state.
    let steps = orchestrator
        .store()
        .steps_for_run(&outcome.run_id)
        .expect("read steps");
    let first = steps
        .iter()
        .find(|s| s.id == "step-1-executor")
        .expect("first executor step");
    assert_eq!(first.state, StepState::Error);
    assert!(steps.iter().any(|s| s.id == "step-2-validator"));
}

#[test]
fn missing_permission_surfaces_before_any_execution() {
    let temp = tempfile::tempdir().expect("tempdir");
    let config = test_config(temp.path());
    let orchestrator = Orchestrator::new(&config).expect("build orchestrator");

    let mut mission = test_mission("Research test objective");
    mission.permissions = vec!["workspace.read".to_string()];
    let err = orchestrator.run_mission(&mission).unwrap_err();

    let violation = err.downcast_ref::<PolicyViolation>().expect("typed error");
    assert_eq!(violation.missing, vec!["web.browse".to_string()]);
}

#[test]
fn completed_outcome_is_streamed_as_progress() {
    let temp = tempfile::tempdir().expect("tempdir");
    let config = test_config(temp.path());
    let progress = Arc::new(CollectingProgress::default());

    let orchestrator = Orchestrator::new(&config)
        .expect("build orchestrator")
        .with_progress(Box::new(Arc::clone(&progress)));

    let mission = test_mission("Research test objective");
    let outcome = orchestrator.run_mission(&mission).expect("run mission");
    assert_eq!(outcome.state, RunState::Completed);

    let events = progress.events();
    let last = events.last().expect("events emitted");
    assert_eq!(last.1["state"], "COMPLETED");
    assert_eq!(last.1["run_id"], Value::String(outcome.run_id));
}
