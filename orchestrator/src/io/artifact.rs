//! Artifact persistence with content checksums.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};

use crate::core::types::Artifact;
use crate::io::ident::timestamp;

/// Write an executor response as a pretty-printed JSON artifact and return
/// its record. The checksum is SHA-256 over the exact bytes written, so it
/// stays verifiable against the stored file.
pub fn write_artifact(
    dir: &Path,
    run_id: &str,
    step_id: &str,
    kind: &str,
    response: &serde_json::Value,
) -> Result<Artifact> {
    fs::create_dir_all(dir).with_context(|| format!("create artifact dir {}", dir.display()))?;
    let path = dir.join(format!("{run_id}_{step_id}_{kind}.json"));

    let mut body = serde_json::to_string_pretty(response).context("serialize artifact")?;
    body.push('\n');
    fs::write(&path, &body).with_context(|| format!("write artifact {}", path.display()))?;

    let checksum = hex::encode(Sha256::digest(body.as_bytes()));
    Ok(Artifact {
        id: format!("artifact-{step_id}"),
        run_id: run_id.to_string(),
        step_id: step_id.to_string(),
        kind: kind.to_string(),
        path: path.display().to_string(),
        content_type: "application/json".to_string(),
        checksum,
        provenance: "generated".to_string(),
        created_at: timestamp(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checksum_matches_stored_bytes() {
        let temp = tempfile::tempdir().expect("tempdir");
        let response = serde_json::json!({"status": "ok", "summary": "done"});

        let artifact = write_artifact(temp.path(), "run-1", "step-1-executor", "browser_trace", &response)
            .expect("write");

        let bytes = fs::read(&artifact.path).expect("read back");
        assert_eq!(artifact.checksum, hex::encode(Sha256::digest(&bytes)));
        assert_eq!(artifact.content_type, "application/json");
        assert_eq!(artifact.kind, "browser_trace");

        let stored: serde_json::Value =
            serde_json::from_slice(&bytes).expect("stored artifact is json");
        assert_eq!(stored, response);
    }

    #[test]
    fn artifact_id_is_derived_from_step() {
        let temp = tempfile::tempdir().expect("tempdir");
        let artifact = write_artifact(
            temp.path(),
            "run-9",
            "step-2-executor",
            "desktop_trace",
            &serde_json::json!({"status": "ok"}),
        )
        .expect("write");
        assert_eq!(artifact.id, "artifact-step-2-executor");
        assert_eq!(artifact.run_id, "run-9");
    }
}
