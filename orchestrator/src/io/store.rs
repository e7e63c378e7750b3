//! Durable run store over SQLite.
//!
//! Holds missions, runs, steps, artifacts, telemetry, the job queue, run
//! controls, and the two memory logs. Every method opens its own connection
//! so the store can be shared freely across threads; SQLite serializes the
//! writes. Writes are durable before the call returns.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::core::types::{Artifact, Mission, Run, Step, TelemetryEvent};
use crate::io::ident::timestamp;

/// Claimed a job from an empty queue. Indicates a sequencing bug: a run's
/// job is always enqueued before it is claimed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("queue is empty")]
pub struct EmptyQueue;

/// Operator-facing control value for a run. Missing records read as active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunControl {
    Active,
    Paused,
}

impl RunControl {
    pub fn as_str(self) -> &'static str {
        match self {
            RunControl::Active => "active",
            RunControl::Paused => "paused",
        }
    }
}

/// A queue job claimed for exclusive processing.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueJob {
    pub id: i64,
    pub run_id: String,
    pub payload: serde_json::Value,
}

/// SQLite-backed store for all orchestrator state.
#[derive(Debug, Clone)]
pub struct RunStore {
    db_path: PathBuf,
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS missions (
  id TEXT PRIMARY KEY,
  payload TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS runs (
  id TEXT PRIMARY KEY,
  mission_id TEXT NOT NULL,
  state TEXT NOT NULL,
  payload TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS steps (
  id TEXT NOT NULL,
  run_id TEXT NOT NULL,
  role TEXT NOT NULL,
  action TEXT NOT NULL,
  payload TEXT NOT NULL,
  PRIMARY KEY (run_id, id)
);
CREATE TABLE IF NOT EXISTS artifacts (
  id TEXT NOT NULL,
  run_id TEXT NOT NULL,
  step_id TEXT NOT NULL,
  payload TEXT NOT NULL,
  PRIMARY KEY (run_id, id)
);
CREATE TABLE IF NOT EXISTS telemetry (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  run_id TEXT NOT NULL,
  step_id TEXT NOT NULL,
  name TEXT NOT NULL,
  value REAL NOT NULL,
  tags TEXT NOT NULL,
  created_at TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS queue_jobs (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  run_id TEXT NOT NULL,
  payload TEXT NOT NULL,
  state TEXT NOT NULL DEFAULT 'queued'
);
CREATE TABLE IF NOT EXISTS run_controls (
  run_id TEXT PRIMARY KEY,
  status TEXT NOT NULL,
  updated_at TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS episodic_memory (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  namespace TEXT NOT NULL,
  content TEXT NOT NULL,
  created_at TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS semantic_memory (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  namespace TEXT NOT NULL,
  content TEXT NOT NULL,
  embedding_hint TEXT NOT NULL,
  created_at TEXT NOT NULL
);
";

impl RunStore {
    pub fn new(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
        }
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// Create the schema if missing.
    pub fn init(&self) -> Result<()> {
        if let Some(parent) = self.db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("create db directory {}", parent.display()))?;
            }
        }
        let conn = self.open()?;
        conn.execute_batch(SCHEMA)
            .context("initialize run store schema")?;
        debug!(db = %self.db_path.display(), "run store initialized");
        Ok(())
    }

    fn open(&self) -> Result<Connection> {
        let conn = Connection::open(&self.db_path)
            .with_context(|| format!("open sqlite db {}", self.db_path.display()))?;
        conn.busy_timeout(Duration::from_secs(5))
            .context("set busy timeout")?;
        conn.query_row("PRAGMA journal_mode = WAL", [], |_row| Ok(()))
            .context("enable WAL")?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .context("enable foreign keys")?;
        Ok(conn)
    }

    pub fn save_mission(&self, mission: &Mission) -> Result<()> {
        let conn = self.open()?;
        conn.execute(
            "INSERT OR REPLACE INTO missions (id, payload) VALUES (?1, ?2)",
            params![mission.id, serde_json::to_string(mission)?],
        )
        .with_context(|| format!("save mission {}", mission.id))?;
        Ok(())
    }

    pub fn save_run(&self, run: &Run) -> Result<()> {
        let conn = self.open()?;
        conn.execute(
            "INSERT OR REPLACE INTO runs (id, mission_id, state, payload) VALUES (?1, ?2, ?3, ?4)",
            params![
                run.id,
                run.mission_id,
                run.state.as_str(),
                serde_json::to_string(run)?
            ],
        )
        .with_context(|| format!("save run {}", run.id))?;
        Ok(())
    }

    /// The persisted run snapshot, as stored JSON.
    pub fn run_payload(&self, run_id: &str) -> Result<Option<serde_json::Value>> {
        let conn = self.open()?;
        let payload: Option<String> = conn
            .query_row(
                "SELECT payload FROM runs WHERE id = ?1",
                params![run_id],
                |row| row.get(0),
            )
            .optional()
            .with_context(|| format!("read run {run_id}"))?;
        payload
            .map(|text| serde_json::from_str(&text).context("parse run payload"))
            .transpose()
    }

    pub fn save_step(&self, step: &Step) -> Result<()> {
        let conn = self.open()?;
        conn.execute(
            "INSERT OR REPLACE INTO steps (id, run_id, role, action, payload)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                step.id,
                step.run_id,
                step.role,
                step.action,
                serde_json::to_string(step)?
            ],
        )
        .with_context(|| format!("save step {}", step.id))?;
        Ok(())
    }

    /// Steps persisted for a run, in insertion order.
    pub fn steps_for_run(&self, run_id: &str) -> Result<Vec<Step>> {
        let conn = self.open()?;
        let mut stmt = conn
            .prepare("SELECT payload FROM steps WHERE run_id = ?1 ORDER BY rowid")
            .context("prepare step query")?;
        let rows = stmt
            .query_map(params![run_id], |row| row.get::<_, String>(0))
            .with_context(|| format!("read steps for {run_id}"))?;
        let mut steps = Vec::new();
        for row in rows {
            let payload = row.context("read step row")?;
            steps.push(serde_json::from_str(&payload).context("parse step payload")?);
        }
        Ok(steps)
    }

    pub fn save_artifact(&self, artifact: &Artifact) -> Result<()> {
        let conn = self.open()?;
        conn.execute(
            "INSERT OR REPLACE INTO artifacts (id, run_id, step_id, payload)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                artifact.id,
                artifact.run_id,
                artifact.step_id,
                serde_json::to_string(artifact)?
            ],
        )
        .with_context(|| format!("save artifact {}", artifact.id))?;
        Ok(())
    }

    pub fn record_telemetry(&self, event: &TelemetryEvent) -> Result<()> {
        let conn = self.open()?;
        conn.execute(
            "INSERT INTO telemetry (run_id, step_id, name, value, tags, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                event.run_id,
                event.step_id,
                event.name,
                event.value,
                serde_json::to_string(&event.tags)?,
                event.created_at
            ],
        )
        .with_context(|| format!("record telemetry {}", event.name))?;
        Ok(())
    }

    pub fn enqueue(&self, run_id: &str, payload: &serde_json::Value) -> Result<()> {
        let conn = self.open()?;
        conn.execute(
            "INSERT INTO queue_jobs (run_id, payload, state) VALUES (?1, ?2, 'queued')",
            params![run_id, serde_json::to_string(payload)?],
        )
        .with_context(|| format!("enqueue job for {run_id}"))?;
        Ok(())
    }

    /// Claim the oldest queued job, marking it `processing`.
    ///
    /// The claim is a single conditional update, so two concurrent claimers
    /// can never take the same job.
    pub fn claim_next(&self) -> Result<Option<QueueJob>> {
        let conn = self.open()?;
        let row = conn
            .query_row(
                "UPDATE queue_jobs SET state = 'processing'
                 WHERE id = (SELECT id FROM queue_jobs WHERE state = 'queued' ORDER BY id LIMIT 1)
                 RETURNING id, run_id, payload",
                [],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                },
            )
            .optional()
            .context("claim queue job")?;
        let Some((id, run_id, payload)) = row else {
            return Ok(None);
        };
        debug!(job_id = id, run_id = %run_id, "claimed queue job");
        Ok(Some(QueueJob {
            id,
            run_id,
            payload: serde_json::from_str(&payload).context("parse queue payload")?,
        }))
    }

    /// Mark a claimed job done.
    pub fn ack(&self, job_id: i64) -> Result<()> {
        let conn = self.open()?;
        conn.execute(
            "UPDATE queue_jobs SET state = 'done' WHERE id = ?1",
            params![job_id],
        )
        .with_context(|| format!("ack queue job {job_id}"))?;
        Ok(())
    }

    pub fn set_run_control(&self, run_id: &str, control: RunControl) -> Result<()> {
        let conn = self.open()?;
        conn.execute(
            "INSERT INTO run_controls (run_id, status, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(run_id) DO UPDATE SET status = excluded.status,
                                               updated_at = excluded.updated_at",
            params![run_id, control.as_str(), timestamp()],
        )
        .with_context(|| format!("set run control for {run_id}"))?;
        Ok(())
    }

    pub fn run_control(&self, run_id: &str) -> Result<RunControl> {
        let conn = self.open()?;
        let status: Option<String> = conn
            .query_row(
                "SELECT status FROM run_controls WHERE run_id = ?1",
                params![run_id],
                |row| row.get(0),
            )
            .optional()
            .with_context(|| format!("read run control for {run_id}"))?;
        Ok(match status.as_deref() {
            Some("paused") => RunControl::Paused,
            _ => RunControl::Active,
        })
    }

    pub fn push_episodic(&self, namespace: &str, content: &str) -> Result<()> {
        let conn = self.open()?;
        conn.execute(
            "INSERT INTO episodic_memory (namespace, content, created_at) VALUES (?1, ?2, ?3)",
            params![namespace, content, timestamp()],
        )
        .with_context(|| format!("push episodic memory for {namespace}"))?;
        Ok(())
    }

    pub fn push_semantic(&self, namespace: &str, content: &str, hint: &str) -> Result<()> {
        let conn = self.open()?;
        conn.execute(
            "INSERT INTO semantic_memory (namespace, content, embedding_hint, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![namespace, content, hint, timestamp()],
        )
        .with_context(|| format!("push semantic memory for {namespace}"))?;
        Ok(())
    }

    pub fn recent_episodic(&self, namespace: &str, limit: u32) -> Result<Vec<String>> {
        self.recent_memory("episodic_memory", namespace, limit)
    }

    pub fn recent_semantic(&self, namespace: &str, limit: u32) -> Result<Vec<String>> {
        self.recent_memory("semantic_memory", namespace, limit)
    }

    fn recent_memory(&self, table: &str, namespace: &str, limit: u32) -> Result<Vec<String>> {
        let conn = self.open()?;
        let sql =
            format!("SELECT content FROM {table} WHERE namespace = ?1 ORDER BY id DESC LIMIT ?2");
        let mut stmt = conn.prepare(&sql).context("prepare memory query")?;
        let rows = stmt
            .query_map(params![namespace, limit], |row| row.get::<_, String>(0))
            .with_context(|| format!("read {table} for {namespace}"))?;
        let mut entries = Vec::new();
        for row in rows {
            entries.push(row.context("read memory row")?);
        }
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::ident::{new_mission, new_run};
    use crate::test_support::temp_store;

    #[test]
    fn queue_round_trips() {
        let (_temp, store) = temp_store();
        store
            .enqueue("run-1", &serde_json::json!({"x": 1}))
            .expect("enqueue");

        let job = store.claim_next().expect("claim").expect("job present");
        assert_eq!(job.run_id, "run-1");
        assert_eq!(job.payload["x"], 1);

        store.ack(job.id).expect("ack");
        assert!(store.claim_next().expect("claim again").is_none());
    }

    #[test]
    fn concurrent_claims_yield_exactly_one_winner() {
        let (_temp, store) = temp_store();
        store
            .enqueue("run-1", &serde_json::json!({}))
            .expect("enqueue");

        let a = store.clone();
        let b = store.clone();
        let ta = std::thread::spawn(move || a.claim_next().expect("claim a"));
        let tb = std::thread::spawn(move || b.claim_next().expect("claim b"));
        let results = [ta.join().expect("join a"), tb.join().expect("join b")];

        let winners = results.iter().filter(|r| r.is_some()).count();
        assert_eq!(winners, 1);
    }

    #[test]
    fn run_control_defaults_to_active() {
        let (_temp, store) = temp_store();
        assert_eq!(store.run_control("run-1").expect("read"), RunControl::Active);

        store
            .set_run_control("run-1", RunControl::Paused)
            .expect("pause");
        assert_eq!(store.run_control("run-1").expect("read"), RunControl::Paused);

        store
            .set_run_control("run-1", RunControl::Active)
            .expect("resume");
        assert_eq!(store.run_control("run-1").expect("read"), RunControl::Active);
    }

    #[test]
    fn run_snapshot_round_trips() {
        let (_temp, store) = temp_store();
        let mission = new_mission("objective");
        let run = new_run(&mission.id);
        store.save_mission(&mission).expect("save mission");
        store.save_run(&run).expect("save run");

        let payload = store.run_payload(&run.id).expect("read").expect("present");
        assert_eq!(payload["id"], run.id);
        assert_eq!(payload["state"], "CREATED");
        assert!(store.run_payload("missing").expect("read").is_none());
    }

    #[test]
    fn memory_reads_newest_first_with_limit() {
        let (_temp, store) = temp_store();
        for i in 1..=4 {
            store
                .push_episodic("general", &format!("event {i}"))
                .expect("push");
        }
        let recent = store.recent_episodic("general", 2).expect("read");
        assert_eq!(recent, vec!["event 4".to_string(), "event 3".to_string()]);
        assert!(store.recent_episodic("other", 10).expect("read").is_empty());
    }

    #[test]
    fn semantic_memory_is_namespaced() {
        let (_temp, store) = temp_store();
        store
            .push_semantic("general", "result a", "browser-result")
            .expect("push");
        store
            .push_semantic("finance", "result b", "browser-result")
            .expect("push");
        assert_eq!(
            store.recent_semantic("general", 10).expect("read"),
            vec!["result a".to_string()]
        );
    }
}
