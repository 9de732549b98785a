//! Status Store (C2): durable, atomically-written per-project state.
//!
//! A single YAML file in the project directory (`status.yaml`, §6). Writes
//! go to a sibling temp file, fsync, then rename into place — the Status
//! Store's own design note (§9: "write-temp-in-same-dir + fsync + rename").
//! This replaces the teacher's append-only pipe-delimited log
//! (`orchestrator/state.rs`) with the atomic single-file contract spec §4.2
//! requires; the entry/phase-record concepts survive, the storage format
//! does not.

use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;

use crate::model::{ProjectStatus, Status};

const STATUS_FILE_NAME: &str = "status.yaml";

pub struct StatusStore {
    path: PathBuf,
}

impl StatusStore {
    pub fn new(project_dir: &Path) -> Self {
        Self {
            path: project_dir.join(STATUS_FILE_NAME),
        }
    }

    /// Load existing status, or create a fresh `pending` one for `project_id`.
    pub fn load_or_create(&self, project_id: &str) -> std::io::Result<ProjectStatus> {
        match self.load()? {
            Some(status) => Ok(status),
            None => Ok(ProjectStatus::new(project_id)),
        }
    }

    /// Read the status file. Missing file is treated as "pending" (`None`),
    /// not an error — resume must tolerate a project that has never run.
    pub fn load(&self) -> std::io::Result<Option<ProjectStatus>> {
        match std::fs::read_to_string(&self.path) {
            Ok(raw) => {
                let status = serde_yaml::from_str(&raw).map_err(|e| {
                    std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string())
                })?;
                Ok(Some(status))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Atomically persist `status`: write-temp-in-same-dir, fsync, rename.
    pub fn save(&self, status: &ProjectStatus) -> std::io::Result<()> {
        let dir = self
            .path
            .parent()
            .unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(dir)?;
        let tmp_path = dir.join(format!(
            ".{}.tmp-{}",
            STATUS_FILE_NAME,
            uuid::Uuid::new_v4()
        ));
        let yaml = serde_yaml::to_string(status)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))?;

        {
            let mut file = std::fs::File::create(&tmp_path)?;
            file.write_all(yaml.as_bytes())?;
            file.sync_all()?;
        }
        std::fs::rename(&tmp_path, &self.path)?;

        // Best-effort directory fsync for platforms without directory-entry
        // durability guarantees from rename alone (§9 design note).
        if let Ok(dir_handle) = std::fs::File::open(dir) {
            let _ = dir_handle.sync_all();
        }
        Ok(())
    }

    pub fn delete(&self) -> std::io::Result<bool> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub fn is_complete(&self, status: &ProjectStatus, phase_id: &str) -> bool {
        status
            .phases
            .get(phase_id)
            .is_some_and(|p| p.status == Status::Completed)
    }

    pub fn is_failed(&self, status: &ProjectStatus, phase_id: &str) -> bool {
        status
            .phases
            .get(phase_id)
            .is_some_and(|p| p.status == Status::Failed)
    }

    pub fn mark_started(&self, status: &mut ProjectStatus, phase_id: &str) {
        let entry = status
            .phases
            .entry(phase_id.to_string())
            .or_insert_with(|| crate::model::PhaseStatus::pending(phase_id));
        entry.status = Status::Running;
        entry.started_at = Some(Utc::now());
    }

    pub fn mark_completed(&self, status: &mut ProjectStatus, phase_id: &str) {
        let was_completed = self.is_complete(status, phase_id);
        let entry = status
            .phases
            .entry(phase_id.to_string())
            .or_insert_with(|| crate::model::PhaseStatus::pending(phase_id));
        entry.status = Status::Completed;
        entry.completed_at = Some(Utc::now());
        entry.error = None;
        if !was_completed {
            status.completed_phases += 1;
        }
    }

    pub fn mark_failed(&self, status: &mut ProjectStatus, phase_id: &str, error: &str) {
        let entry = status
            .phases
            .entry(phase_id.to_string())
            .or_insert_with(|| crate::model::PhaseStatus::pending(phase_id));
        entry.status = Status::Failed;
        entry.completed_at = Some(Utc::now());
        entry.error = Some(error.to_string());
    }

    pub fn increment_retries(&self, status: &mut ProjectStatus, phase_id: &str) -> u32 {
        let entry = status
            .phases
            .entry(phase_id.to_string())
            .or_insert_with(|| crate::model::PhaseStatus::pending(phase_id));
        entry.retries += 1;
        entry.status = Status::Running;
        entry.retries
    }
}
