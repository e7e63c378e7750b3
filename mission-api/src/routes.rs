//! HTTP route handlers for mission submission and run control.

use std::collections::BTreeMap;

use axum::Router;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::{get, post};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::warn;

use orchestrator::core::types::Mission;
use orchestrator::io::ident::new_mission;
use orchestrator::io::store::RunControl;
use orchestrator::run::{Orchestrator, open_store, run_status};

use crate::AppState;

/// Build the API router.
pub fn api_router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/missions", post(create_mission))
        .route("/runs/{run_id}", get(get_run))
        .route("/runs/{run_id}/pause", post(pause_run))
        .route("/runs/{run_id}/resume", post(resume_run))
}

async fn health() -> &'static str {
    "ok"
}

/// Mission submission body. Every field is optional; defaults match the CLI.
#[derive(Deserialize)]
struct MissionRequest {
    objective: Option<String>,
    domain: Option<String>,
    permissions: Option<Vec<String>>,
    budget_usd: Option<f64>,
    max_steps: Option<u32>,
    metadata: Option<BTreeMap<String, Value>>,
}

impl MissionRequest {
    fn into_mission(self) -> Mission {
        let objective = self
            .objective
            .unwrap_or_else(|| "Run default mission".to_string());
        let mut mission = new_mission(&objective);
        if let Some(domain) = self.domain {
            mission.domain = domain;
        }
        if let Some(permissions) = self.permissions {
            mission.permissions = permissions;
        }
        if let Some(budget) = self.budget_usd {
            mission.budget_usd = budget;
        }
        if let Some(steps) = self.max_steps {
            mission.max_steps = steps;
        }
        if let Some(metadata) = self.metadata {
            mission.metadata = metadata;
        }
        mission
    }
}

/// POST /missions - run a mission to a terminal state and return its outcome.
async fn create_mission(
    State(state): State<AppState>,
    Json(request): Json<MissionRequest>,
) -> Result<Json<Value>, StatusCode> {
    let config = state.config.clone();
    let mission = request.into_mission();
    let mission_id = mission.id.clone();

    let result = tokio::task::spawn_blocking(move || {
        let orchestrator = Orchestrator::new(&config)?;
        orchestrator.run_mission(&mission)
    })
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
    .map_err(|err| {
        warn!(mission_id = %mission_id, error = %format!("{err:#}"), "mission failed");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    Ok(Json(json!({"mission_id": mission_id, "result": result})))
}

/// GET /runs/{run_id} - persisted run snapshot plus control state.
async fn get_run(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> Result<Json<Value>, StatusCode> {
    let status = tokio::task::spawn_blocking(move || {
        let store = open_store(&state.config.db_path)?;
        run_status(&store, &run_id)
    })
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    status.map(Json).ok_or(StatusCode::NOT_FOUND)
}

/// POST /runs/{run_id}/pause - honored at the next iteration boundary.
async fn pause_run(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> Result<Json<Value>, StatusCode> {
    set_control(state, run_id, RunControl::Paused).await
}

/// POST /runs/{run_id}/resume
async fn resume_run(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> Result<Json<Value>, StatusCode> {
    set_control(state, run_id, RunControl::Active).await
}

async fn set_control(
    state: AppState,
    run_id: String,
    control: RunControl,
) -> Result<Json<Value>, StatusCode> {
    let response_id = run_id.clone();
    tokio::task::spawn_blocking(move || {
        let store = open_store(&state.config.db_path)?;
        store.set_run_control(&run_id, control)
    })
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok(Json(
        json!({"run_id": response_id, "status": control.as_str()}),
    ))
}
