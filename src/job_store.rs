//! Cross-process job persistence: the Job Bus (`job_bus.rs`) is an
//! in-memory registry owned by whichever process ran `orchestrator::run`
//! (§9 design note -- one Orchestrator + Bus pair per entrypoint). The
//! `jobs`/`logs`/`stop` CLI commands run as separate invocations, so the
//! `run` command also mirrors every job snapshot and event to disk here,
//! under `.helix/jobs/<job_id>/`, using the same write-temp + fsync +
//! rename idiom as the Status Store.
//!
//! `job.json` holds the latest [`Job`] snapshot; `events.jsonl` is an
//! append-only log of every [`PhaseEvent`] seen, one JSON object per line,
//! for `logs --follow` to tail. A `cancel` sentinel file requests
//! cooperative cancellation, checked by the orchestrator loop at phase
//! boundaries.

use std::io::Write;
use std::path::{Path, PathBuf};

use crate::model::{Job, PhaseEvent};

const JOBS_DIR: &str = ".helix/jobs";
const SNAPSHOT_FILE: &str = "job.json";
const EVENTS_FILE: &str = "events.jsonl";
const CANCEL_FILE: &str = "cancel";

fn jobs_root(project_dir: &Path) -> PathBuf {
    project_dir.join(JOBS_DIR)
}

fn job_dir(project_dir: &Path, job_id: &str) -> PathBuf {
    jobs_root(project_dir).join(job_id)
}

/// Atomically write the latest snapshot for a job.
pub fn save_snapshot(project_dir: &Path, job: &Job) -> std::io::Result<()> {
    let dir = job_dir(project_dir, &job.job_id);
    std::fs::create_dir_all(&dir)?;
    let tmp_path = dir.join(format!(".{SNAPSHOT_FILE}.tmp-{}", uuid::Uuid::new_v4()));
    let json = serde_json::to_string_pretty(job)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))?;
    {
        let mut file = std::fs::File::create(&tmp_path)?;
        file.write_all(json.as_bytes())?;
        file.sync_all()?;
    }
    std::fs::rename(&tmp_path, dir.join(SNAPSHOT_FILE))?;
    if let Ok(dir_handle) = std::fs::File::open(&dir) {
        let _ = dir_handle.sync_all();
    }
    Ok(())
}

pub fn load_snapshot(project_dir: &Path, job_id: &str) -> std::io::Result<Option<Job>> {
    let path = job_dir(project_dir, job_id).join(SNAPSHOT_FILE);
    match std::fs::read_to_string(&path) {
        Ok(raw) => {
            let job = serde_json::from_str(&raw)
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))?;
            Ok(Some(job))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

/// List known jobs, most recently created first, truncated to `limit`.
pub fn list_jobs(project_dir: &Path, limit: usize) -> std::io::Result<Vec<Job>> {
    let root = jobs_root(project_dir);
    let mut jobs = Vec::new();
    let entries = match std::fs::read_dir(&root) {
        Ok(e) => e,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };
    for entry in entries.flatten() {
        let job_id = entry.file_name().to_string_lossy().to_string();
        if let Some(job) = load_snapshot(project_dir, &job_id)? {
            jobs.push(job);
        }
    }
    jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    jobs.truncate(limit);
    Ok(jobs)
}

/// Append one event to `events.jsonl`.
pub fn append_event(project_dir: &Path, job_id: &str, event: &PhaseEvent) -> std::io::Result<()> {
    let dir = job_dir(project_dir, job_id);
    std::fs::create_dir_all(&dir)?;
    let line = serde_json::to_string(event)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))?;
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(dir.join(EVENTS_FILE))?;
    writeln!(file, "{line}")?;
    Ok(())
}

/// Read every event logged so far for a job, in emission order.
pub fn read_events(project_dir: &Path, job_id: &str) -> std::io::Result<Vec<PhaseEvent>> {
    let path = job_dir(project_dir, job_id).join(EVENTS_FILE);
    let raw = match std::fs::read_to_string(&path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };
    let mut events = Vec::new();
    for line in raw.lines() {
        if line.trim().is_empty() {
            continue;
        }
        if let Ok(event) = serde_json::from_str(line) {
            events.push(event);
        }
    }
    Ok(events)
}

/// Request cancellation of a job from a separate process (the `stop`
/// command). The running `run` process polls [`is_cancel_requested`]
/// between phases and feeds it into the in-memory Job Bus.
pub fn request_cancel(project_dir: &Path, job_id: &str) -> std::io::Result<()> {
    let dir = job_dir(project_dir, job_id);
    std::fs::create_dir_all(&dir)?;
    std::fs::write(dir.join(CANCEL_FILE), b"")
}

pub fn is_cancel_requested(project_dir: &Path, job_id: &str) -> bool {
    job_dir(project_dir, job_id).join(CANCEL_FILE).exists()
}
