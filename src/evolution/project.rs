//! Evolution project: the specialised layout the Deployer/Validator/
//! Integrator operate on (§3 `EvolutionProject`/`BaselineRecord`).

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvolutionStatus {
    Pending,
    Developing,
    Ready,
    Deployed,
    Validating,
    Integrated,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvolutionProjectState {
    pub name: String,
    pub status: EvolutionStatus,
    #[serde(default)]
    pub last_tag: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

/// An evolution project on disk: `spec.yaml`, `phases.yaml`, `status.json`,
/// `new/` (files to create), `modified/` (files to overwrite).
pub struct EvolutionProject {
    pub dir: PathBuf,
    pub state: EvolutionProjectState,
}

impl EvolutionProject {
    const STATUS_FILE: &'static str = "status.json";

    pub fn load(dir: &Path, name: &str) -> std::io::Result<Self> {
        let status_path = dir.join(Self::STATUS_FILE);
        let state = match std::fs::read_to_string(&status_path) {
            Ok(raw) => serde_json::from_str(&raw)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => EvolutionProjectState {
                name: name.to_string(),
                status: EvolutionStatus::Pending,
                last_tag: None,
                error: None,
            },
            Err(e) => return Err(e),
        };
        Ok(Self {
            dir: dir.to_path_buf(),
            state,
        })
    }

    pub fn save(&self) -> std::io::Result<()> {
        std::fs::write(
            self.dir.join(Self::STATUS_FILE),
            serde_json::to_string_pretty(&self.state)?,
        )
    }

    pub fn new_dir(&self) -> PathBuf {
        self.dir.join("new")
    }

    pub fn modified_dir(&self) -> PathBuf {
        self.dir.join("modified")
    }

    pub fn set_status(&mut self, status: EvolutionStatus) -> std::io::Result<()> {
        self.state.status = status;
        self.save()
    }

    pub fn name(&self) -> &str {
        &self.state.name
    }
}

/// A snapshot of test health at a known commit, used by the Validator to
/// distinguish pre-existing failures from regressions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BaselineRecord {
    pub timestamp: Option<DateTime<Utc>>,
    pub commit_sha: Option<String>,
    pub total_tests: u32,
    pub passed_tests: u32,
    pub failed_tests: BTreeSet<String>,
}

impl BaselineRecord {
    pub fn load(path: &Path) -> std::io::Result<Option<Self>> {
        match std::fs::read_to_string(path) {
            Ok(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// Parses `.permanent_skips`: plain-text lines of `path::nodeid[: reason]`,
/// blank lines and `#`-comments ignored.
pub fn load_permanent_skips(path: &Path) -> std::io::Result<BTreeSet<String>> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeSet::new()),
        Err(e) => return Err(e),
    };
    Ok(raw
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(|l| l.split(':').next().unwrap_or(l).trim().to_string())
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn load_defaults_to_pending_when_status_file_absent() {
        let dir = tempdir().unwrap();
        let project = EvolutionProject::load(dir.path(), "my-evo").unwrap();
        assert_eq!(project.state.status, EvolutionStatus::Pending);
        assert_eq!(project.name(), "my-evo");
    }

    #[test]
    fn set_status_persists_across_reload() {
        let dir = tempdir().unwrap();
        let mut project = EvolutionProject::load(dir.path(), "my-evo").unwrap();
        project.set_status(EvolutionStatus::Deployed).unwrap();

        let reloaded = EvolutionProject::load(dir.path(), "my-evo").unwrap();
        assert_eq!(reloaded.state.status, EvolutionStatus::Deployed);
    }

    #[test]
    fn permanent_skips_ignores_comments_and_blank_lines() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(".permanent_skips");
        std::fs::write(
            &path,
            "# comment\n\ntests/test_x.py::test_flaky: known flaky\ntests/test_y.py::test_slow\n",
        )
        .unwrap();
        let skips = load_permanent_skips(&path).unwrap();
        assert_eq!(skips.len(), 2);
        assert!(skips.contains("tests/test_x.py::test_flaky"));
    }
}
