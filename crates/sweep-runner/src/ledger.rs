use anyhow::Result;
use chrono::Utc;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use sweep_core::Plan;

use crate::layout::ensure_dir;

pub const PLAN_MANIFEST: &str = "plan.json";
pub const RUN_LOG: &str = "run_log.jsonl";

pub fn atomic_write_bytes(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        ensure_dir(parent)?;
    }
    let ts = Utc::now().timestamp_micros();
    let pid = std::process::id();
    let name = path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("tmpfile");
    let tmp = path.with_file_name(format!(".{}.tmp.{}.{}", name, pid, ts));
    let mut file = fs::File::create(&tmp)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    fs::rename(&tmp, path)?;
    Ok(())
}

pub fn atomic_write_json_pretty(path: &Path, value: &Value) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(value)?;
    atomic_write_bytes(path, &bytes)
}

/// serde_json keeps object keys sorted, so compact output is canonical.
pub fn canonical_json_digest(value: &Value) -> String {
    let bytes = serde_json::to_vec(value).unwrap_or_default();
    format!("sha256:{}", hex::encode(Sha256::digest(&bytes)))
}

pub fn plan_jobs_json(plan: &Plan) -> Value {
    Value::Array(
        plan.runs
            .iter()
            .enumerate()
            .map(|(index, run)| {
                json!({
                    "index": index,
                    "name": run.display_name(),
                    "args": run.vector.to_args(),
                    "coords": run.coords,
                })
            })
            .collect(),
    )
}

pub fn write_plan_manifest(
    exp_dir: &Path,
    experiment: &str,
    executable: &Path,
    plan: &Plan,
    start_at: usize,
) -> Result<PathBuf> {
    let jobs = plan_jobs_json(plan);
    let dims: Vec<Value> = plan
        .dims
        .iter()
        .map(|d| json!({ "slots": d.slots, "cov": d.cov, "len": d.len }))
        .collect();
    let manifest = json!({
        "schema_version": "plan_manifest_v1",
        "experiment": experiment,
        "executable": executable.display().to_string(),
        "created_at": Utc::now().to_rfc3339(),
        "start_at": start_at,
        "dims": dims,
        "digest": canonical_json_digest(&jobs),
        "jobs": jobs,
    });
    let path = exp_dir.join(PLAN_MANIFEST);
    atomic_write_json_pretty(&path, &manifest)?;
    Ok(path)
}

/// Appends one event line to an experiment's run log.
pub fn append_event(log_path: &Path, event: &str, job: &str, fields: Value) -> Result<()> {
    let mut line = json!({
        "event": event,
        "job": job,
        "at": Utc::now().to_rfc3339(),
    });
    if let (Some(obj), Value::Object(extra)) = (line.as_object_mut(), fields) {
        obj.extend(extra);
    }
    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)?;
    writeln!(file, "{}", serde_json::to_string(&line)?)?;
    Ok(())
}

pub fn read_events(log_path: &Path) -> Result<Vec<Value>> {
    let raw = fs::read_to_string(log_path)?;
    raw.lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| Ok(serde_json::from_str(l)?))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use sweep_core::{expand, ParameterVector, Scalar, ScalarType, Schema, SlotDef, VaryingSlot};

    fn plan() -> Plan {
        let schema = Schema::new(vec![
            SlotDef::new("name", ScalarType::Str, "e"),
            SlotDef::new("a", ScalarType::Int, 1),
        ])
        .expect("schema");
        let base = ParameterVector::from_defaults(Arc::new(schema), "e");
        let mut slots = BTreeMap::new();
        slots.insert(
            "a".to_string(),
            VaryingSlot::list(vec![Scalar::Int(1), Scalar::Int(2)], 0),
        );
        expand(&base, &slots).expect("expand")
    }

    #[test]
    fn plan_manifest_records_jobs_and_stable_digest() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = write_plan_manifest(dir.path(), "e", Path::new("/bin/exe"), &plan(), 0)
            .expect("manifest");
        let written: Value =
            serde_json::from_slice(&fs::read(&path).expect("read")).expect("json");
        assert_eq!(written["experiment"], "e");
        assert_eq!(written["jobs"][1]["name"], "eb");
        assert_eq!(written["jobs"][1]["args"], json!(["eb", "2"]));
        assert_eq!(written["digest"], canonical_json_digest(&plan_jobs_json(&plan())));
    }

    #[test]
    fn events_append_in_order() {
        let dir = tempfile::tempdir().expect("tempdir");
        let log = dir.path().join(RUN_LOG);
        append_event(&log, "started", "ea", json!({ "pid": 42 })).expect("first");
        append_event(&log, "finished", "ea", json!({ "exit_code": 0 })).expect("second");
        let events = read_events(&log).expect("read");
        assert_eq!(events.len(), 2);
        assert_eq!(events[0]["event"], "started");
        assert_eq!(events[0]["pid"], 42);
        assert_eq!(events[1]["exit_code"], 0);
    }
}
