//! Mission orchestration: the plan, execute, validate, retry loop.
//!
//! [`Orchestrator::run_mission`] drives one mission run to a terminal state.
//! Every state change goes through the validated transition table, every
//! model call through the budget-checked router, and every executor call
//! through the [`Executor`] seam so tests can script the whole loop.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{info, instrument, warn};

use crate::core::memory::{episodic_summary, semantic_rank};
use crate::core::policy::{PolicyTable, check_permissions};
use crate::core::retry::{RetryPolicy, classify_failure};
use crate::core::runtime::{Runtime, select_runtime};
use crate::core::state_machine::{InvalidTransition, transition};
use crate::core::text::truncate_chars;
use crate::core::types::{
    ErrorClass, Mission, Run, RunState, Step, StepState, TelemetryEvent, ValidationResult,
};
use crate::core::validation::parse_validation;
use crate::io::config::OrchestratorConfig;
use crate::io::executor::{
    BrowserExecutor, DesktopExecutor, ExecuteRequest, Executor, require_ok,
};
use crate::io::ident::{new_run, timestamp};
use crate::io::progress::{LogProgress, ProgressSink};
use crate::io::prompt::{PlannerInputs, PromptEngine, ValidatorInputs};
use crate::io::router::{
    CompletionBackend, HttpCompletionBackend, ModelRouter, SimulatedCompletionBackend,
};
use crate::io::store::{EmptyQueue, RunControl, RunStore};
use crate::io::workspace::{RunWorkspace, write_json};

/// Final result of a mission run. Always carries the terminal state; the
/// remaining fields depend on which branch ended the run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunOutcome {
    pub run_id: String,
    pub state: RunState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub runtime: Option<Runtime>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub executor_run_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validation: Option<ValidationResult>,
}

impl RunOutcome {
    fn for_run(run: &Run) -> Self {
        Self {
            run_id: run.id.clone(),
            state: run.state,
            reason: None,
            error: None,
            step: None,
            runtime: None,
            executor_run_id: None,
            artifact: None,
            validation: None,
        }
    }
}

/// Result of one loop iteration's fallible region.
enum IterationVerdict {
    Completed(Box<RunOutcome>),
    ValidationFailed { reason: String },
}

/// Drives missions to completion against pluggable runtimes.
pub struct Orchestrator {
    store: RunStore,
    workspace: RunWorkspace,
    prompts: PromptEngine,
    policies: PolicyTable,
    retry: RetryPolicy,
    backend: Arc<dyn CompletionBackend>,
    executors: BTreeMap<Runtime, Box<dyn Executor>>,
    progress: Box<dyn ProgressSink>,
}

impl Orchestrator {
    /// Wire the default collaborators from config: HTTP backends, or
    /// simulated ones when `dry_run` is set.
    pub fn new(config: &OrchestratorConfig) -> Result<Self> {
        let store = RunStore::new(&config.db_path);
        store.init()?;

        let backend: Arc<dyn CompletionBackend> = if config.dry_run {
            Arc::new(SimulatedCompletionBackend)
        } else {
            Arc::new(HttpCompletionBackend::new(
                &config.model.base_url,
                &config.model.api_key,
            )?)
        };

        let mut executors: BTreeMap<Runtime, Box<dyn Executor>> = BTreeMap::new();
        executors.insert(
            Runtime::Browser,
            Box::new(BrowserExecutor::new(
                &config.browser,
                config.artifact_root.join("browser"),
                config.dry_run,
            )?),
        );
        executors.insert(
            Runtime::Desktop,
            Box::new(DesktopExecutor::new(
                &config.desktop,
                config.artifact_root.join("desktop"),
                config.dry_run,
            )?),
        );

        Ok(Self {
            store,
            workspace: RunWorkspace::new(&config.artifact_root),
            prompts: PromptEngine::new(),
            policies: PolicyTable::default(),
            retry: config.retry_policy(),
            backend,
            executors,
            progress: Box::new(LogProgress),
        })
    }

    pub fn store(&self) -> &RunStore {
        &self.store
    }

    pub fn with_completion_backend(mut self, backend: Arc<dyn CompletionBackend>) -> Self {
        self.backend = backend;
        self
    }

    /// Register (or replace) the executor for a runtime. Used by callers
    /// that bring their own `workspace`/`tools` backends, and by tests.
    pub fn with_executor(mut self, runtime: Runtime, executor: Box<dyn Executor>) -> Self {
        self.executors.insert(runtime, executor);
        self
    }

    pub fn with_progress(mut self, progress: Box<dyn ProgressSink>) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_policies(mut self, policies: PolicyTable) -> Self {
        self.policies = policies;
        self
    }

    /// Run a mission to a terminal state.
    ///
    /// Persists the mission and a fresh run, enqueues and exclusively claims
    /// the run's job, and executes the loop. The job is acknowledged on
    /// every exit path. Policy violations and queue sequencing bugs surface
    /// as errors; everything raised inside the loop becomes a terminal
    /// [`RunOutcome`].
    #[instrument(skip_all, fields(mission_id = %mission.id))]
    pub fn run_mission(&self, mission: &Mission) -> Result<RunOutcome> {
        let mut run = new_run(&mission.id);
        self.store.save_mission(mission)?;
        self.store.save_run(&run)?;
        self.store.set_run_control(&run.id, RunControl::Active)?;
        self.store
            .enqueue(&run.id, &serde_json::to_value(mission)?)?;
        self.progress.emit(
            "progress",
            &json!({"run_id": run.id, "state": run.state.as_str()}),
        );

        let job = self.store.claim_next()?.ok_or(EmptyQueue)?;
        let result = self.execute_run(&mut run, mission);
        let ack = self.store.ack(job.id);
        let outcome = result?;
        ack?;
        Ok(outcome)
    }

    #[instrument(skip_all, fields(run_id = %run.id))]
    fn execute_run(&self, run: &mut Run, mission: &Mission) -> Result<RunOutcome> {
        let paths = self.workspace.init_run(&run.id)?;
        write_json(&paths.inputs.join("mission.json"), mission)?;

        if self.policies.requires_human_review(mission) {
            run.state = RunState::HumanReview;
            self.store.save_run(run)?;
            info!(domain = %mission.domain, "domain requires human review");
            let mut outcome = RunOutcome::for_run(run);
            outcome.reason = Some("domain requires human review".to_string());
            return Ok(outcome);
        }

        let runtime = select_runtime(mission);
        check_permissions(mission, &[runtime.required_permission()])?;

        run.state = transition(run.state, RunState::Planned)?;
        self.store.save_run(run)?;

        let episodic = self.store.recent_episodic(&mission.domain, 20)?;
        let semantic = self.store.recent_semantic(&mission.domain, 50)?;
        let retrieved = semantic_rank(&mission.objective, &semantic, 3);

        let mut router = ModelRouter::new(Arc::clone(&self.backend), mission.budget_usd);
        let plan_prompt = self.prompts.render_planner(&PlannerInputs {
            runtime: runtime.as_str(),
            objective: &mission.objective,
            failure_summary: episodic_summary(&episodic, 5),
            retrieved,
        })?;
        let plan = router.complete("planner", &plan_prompt)?;
        self.store.push_episodic(
            &mission.domain,
            &format!("plan:{}", truncate_chars(&plan, 300)),
        )?;

        run.state = transition(run.state, RunState::Executing)?;
        run.cost_usd = router.spent_usd();
        self.store.save_run(run)?;

        for i in 1..=mission.max_steps {
            if self.store.run_control(&run.id)? == RunControl::Paused {
                run.state = RunState::HumanReview;
                self.store.save_run(run)?;
                info!(iteration = i, "run paused by operator");
                let mut outcome = RunOutcome::for_run(run);
                outcome.reason = Some("paused by operator".to_string());
                return Ok(outcome);
            }

            run.attempt = i;
            let mut exec_step = Step {
                id: format!("step-{i}-executor"),
                run_id: run.id.clone(),
                role: format!("{}_executor", runtime.as_str()),
                action: format!("{}.execute", runtime.as_str()),
                input: json!({
                    "objective": mission.objective,
                    "iteration": i,
                    "runtime": runtime.as_str(),
                }),
                output: Value::Null,
                state: StepState::Pending,
                duration_ms: 0,
                error: None,
                created_at: timestamp(),
            };
            let start = Instant::now();

            let attempt = (|| -> Result<IterationVerdict> {
                let executor = self.executors.get(&runtime).ok_or_else(|| {
                    anyhow!("no executor registered for runtime {}", runtime.as_str())
                })?;
                let payload = match runtime {
                    Runtime::Desktop => json!({
                        "prompt": mission.objective,
                        "iteration": i,
                    }),
                    _ => json!({
                        "prompt": mission.objective,
                        "url": mission.metadata.get("url").cloned().unwrap_or(Value::Null),
                        "metadata": {
                            "run_id": run.id,
                            "iteration": i,
                            "runtime": runtime.as_str(),
                        },
                    }),
                };
                let action = match runtime {
                    Runtime::Desktop => "operate".to_string(),
                    other => format!("{}.execute", other.as_str()),
                };
                let executed = executor.execute(&ExecuteRequest {
                    run_id: run.id.clone(),
                    step_id: exec_step.id.clone(),
                    action,
                    payload,
                })?;
                require_ok(&executed.response)?;

                exec_step.output = executed.response.clone();
                exec_step.state = StepState::Ok;
                exec_step.duration_ms = start.elapsed().as_millis() as u64;
                self.store.save_step(&exec_step)?;
                self.store.save_artifact(&executed.artifact)?;
                write_json(
                    &paths.artifacts.join(format!("{}.json", exec_step.id)),
                    &executed.response,
                )?;
                self.record_metric(
                    run,
                    &exec_step.id,
                    &format!("{}_call_ms", runtime.as_str()),
                    exec_step.duration_ms as f64,
                    &[
                        ("iteration", i.to_string()),
                        ("run_state", run.state.as_str().to_string()),
                        ("runtime", runtime.as_str().to_string()),
                    ],
                )?;

                run.state = transition(run.state, RunState::Validating)?;
                self.store.save_run(run)?;

                let execution_json = serde_json::to_string(&executed.response)?;
                let validate_prompt = self.prompts.render_validator(&ValidatorInputs {
                    plan: &plan,
                    runtime: runtime.as_str(),
                    execution: truncate_chars(&execution_json, 1800),
                })?;
                let vstart = Instant::now();
                let raw = router.complete("validator", &validate_prompt)?;
                let parsed = parse_validation(&raw);

                let val_step = Step {
                    id: format!("step-{i}-validator"),
                    run_id: run.id.clone(),
                    role: "validator".to_string(),
                    action: "validate.execution".to_string(),
                    input: json!({
                        "plan": plan,
                        "execution_result": executed.response,
                        "runtime": runtime.as_str(),
                    }),
                    output: json!({"raw": raw, "parsed": parsed}),
                    state: StepState::Ok,
                    duration_ms: vstart.elapsed().as_millis() as u64,
                    error: None,
                    created_at: timestamp(),
                };
                self.store.save_step(&val_step)?;
                write_json(
                    &paths.logs.join(format!("{}.json", val_step.id)),
                    &val_step.output,
                )?;
                self.record_metric(
                    run,
                    &val_step.id,
                    "validation_ms",
                    val_step.duration_ms as f64,
                    &[
                        ("passed", parsed.passed.to_string()),
                        ("iteration", i.to_string()),
                        ("runtime", runtime.as_str().to_string()),
                    ],
                )?;
                self.store.push_semantic(
                    &mission.domain,
                    truncate_chars(&execution_json, 500),
                    &format!("{}-result", runtime.as_str()),
                )?;

                if parsed.passed {
                    run.state = transition(run.state, RunState::Completed)?;
                    run.cost_usd = router.spent_usd();
                    self.store.save_run(run)?;
                    let mut outcome = RunOutcome::for_run(run);
                    outcome.step = Some(i);
                    outcome.runtime = Some(runtime);
                    outcome.executor_run_id = executed
                        .response
                        .get("run_id")
                        .or_else(|| executed.response.get("task_id"))
                        .and_then(Value::as_str)
                        .map(String::from);
                    outcome.artifact = Some(executed.artifact.path.clone());
                    outcome.validation = Some(parsed);
                    write_json(&paths.outputs.join("result.json"), &outcome)?;
                    self.progress.emit(
                        "progress",
                        &json!({
                            "run_id": run.id,
                            "state": run.state.as_str(),
                            "step": i,
                            "runtime": runtime.as_str(),
                        }),
                    );
                    return Ok(IterationVerdict::Completed(Box::new(outcome)));
                }
                Ok(IterationVerdict::ValidationFailed {
                    reason: parsed.reason,
                })
            })();

            match attempt {
                Ok(IterationVerdict::Completed(outcome)) => return Ok(*outcome),
                Ok(IterationVerdict::ValidationFailed { reason }) => {
                    run.state = transition(run.state, RunState::Retrying)?;
                    self.store.save_run(run)?;
                    self.store
                        .push_episodic(&mission.domain, &format!("failure:{reason}"))?;
                    self.progress.emit(
                        "progress",
                        &json!({
                            "run_id": run.id,
                            "state": run.state.as_str(),
                            "reason": reason,
                        }),
                    );

                    if i >= self.retry.max_attempts {
                        run.state = transition(run.state, RunState::HumanReview)?;
                        self.store.save_run(run)?;
                        let mut outcome = RunOutcome::for_run(run);
                        outcome.reason = Some(reason);
                        return Ok(outcome);
                    }

                    run.state = transition(run.state, RunState::Executing)?;
                    self.store.save_run(run)?;
                    thread::sleep(self.retry.delay_for(i));
                }
                Err(err) => {
                    // A rejected transition is a programming error, never a
                    // retryable runtime failure.
                    if err.downcast_ref::<InvalidTransition>().is_some() {
                        return Err(err);
                    }
                    let class = classify_failure(&err);
                    warn!(
                        iteration = i,
                        class = class.as_str(),
                        error = %format!("{err:#}"),
                        "iteration failed"
                    );
                    exec_step.error = Some(class);
                    exec_step.state = StepState::Error;
                    exec_step.duration_ms = start.elapsed().as_millis() as u64;
                    self.store.save_step(&exec_step)?;
                    self.record_metric(
                        run,
                        &exec_step.id,
                        "step_error",
                        1.0,
                        &[
                            ("type", class.as_str().to_string()),
                            ("runtime", runtime.as_str().to_string()),
                        ],
                    )?;

                    if class == ErrorClass::BudgetExceeded || i >= self.retry.max_attempts {
                        run.state = RunState::Failed;
                        run.cost_usd = router.spent_usd();
                        self.store.save_run(run)?;
                        let mut outcome = RunOutcome::for_run(run);
                        outcome.error = Some(class.as_str().to_string());
                        return Ok(outcome);
                    }
                    // A validator-phase failure leaves the run in VALIDATING;
                    // walk it back to EXECUTING so the next iteration starts
                    // from a legal state.
                    if run.state == RunState::Validating {
                        run.state = transition(run.state, RunState::Retrying)?;
                        run.state = transition(run.state, RunState::Executing)?;
                        self.store.save_run(run)?;
                    }
                    thread::sleep(self.retry.delay_for(i));
                }
            }
        }

        run.state = RunState::Failed;
        run.cost_usd = router.spent_usd();
        self.store.save_run(run)?;
        let mut outcome = RunOutcome::for_run(run);
        outcome.error = Some("max steps exceeded".to_string());
        Ok(outcome)
    }

    fn record_metric(
        &self,
        run: &Run,
        step_id: &str,
        name: &str,
        value: f64,
        tags: &[(&str, String)],
    ) -> Result<()> {
        let event = TelemetryEvent {
            run_id: run.id.clone(),
            step_id: step_id.to_string(),
            name: name.to_string(),
            value,
            tags: tags
                .iter()
                .map(|(key, value)| (key.to_string(), value.clone()))
                .collect(),
            created_at: timestamp(),
        };
        self.store
            .record_telemetry(&event)
            .with_context(|| format!("record metric {name}"))
    }
}

/// Read-side status surface shared by the CLI and the HTTP front end.
pub fn run_status(store: &RunStore, run_id: &str) -> Result<Option<Value>> {
    let Some(payload) = store.run_payload(run_id)? else {
        return Ok(None);
    };
    let control = store.run_control(run_id)?;
    Ok(Some(json!({"run": payload, "control": control.as_str()})))
}

/// Build a run store from the configured path, creating the schema.
pub fn open_store(db_path: &Path) -> Result<RunStore> {
    let store = RunStore::new(db_path);
    store.init()?;
    Ok(store)
}
