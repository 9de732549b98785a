//! Deployer (C12): syncs a twin working tree to the production baseline,
//! copies an evolution project's produced files into it, and restarts +
//! health-checks the twin.
//!
//! Grounded in `evolution/deployer.py`'s `pre_deploy_sync`/`deploy`/
//! `restart_test_system`/`rollback`/`full_deploy`, reproduced with `git2`
//! (via [`crate::vcs::Vcs`]) instead of shelled `git`, and `reqwest` instead
//! of `aiohttp` for the health poll.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use fs2::FileExt;
use walkdir::WalkDir;

use crate::errors::ExternalToolError;
use crate::evolution::project::EvolutionProject;
use crate::vcs::Vcs;

const RESTART_SETTLE: Duration = Duration::from_secs(3);
const HEALTH_TIMEOUT: Duration = Duration::from_secs(5);
const LOCK_FILE_NAME: &str = ".helix-tree.lock";

/// Hold an exclusive advisory lock on `<tree_root>/.helix-tree.lock` for the
/// lifetime of the returned guard, serializing deploy/integrate operations
/// against the same twin or production tree (§5: "a lightweight file-lock
/// in the tree root").
pub(crate) struct TreeLock(File);

impl TreeLock {
    pub(crate) fn acquire(tree_root: &Path) -> Result<Self> {
        std::fs::create_dir_all(tree_root)?;
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .open(tree_root.join(LOCK_FILE_NAME))
            .with_context(|| format!("opening lock file under {}", tree_root.display()))?;
        file.lock_exclusive()
            .with_context(|| format!("locking tree {}", tree_root.display()))?;
        Ok(Self(file))
    }
}

impl Drop for TreeLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.0);
    }
}

#[derive(Debug, Clone)]
pub struct DeployResult {
    pub success: bool,
    pub message: String,
    pub files_copied: usize,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub error: Option<String>,
}

pub struct Deployer {
    pub twin_root: PathBuf,
    pub remote: String,
    pub baseline_branch: String,
    pub control_script: PathBuf,
    pub health_url: String,
}

impl Deployer {
    pub fn new(
        twin_root: PathBuf,
        remote: impl Into<String>,
        baseline_branch: impl Into<String>,
        control_script: PathBuf,
        health_port: u16,
        health_path: &str,
    ) -> Self {
        Self {
            twin_root,
            remote: remote.into(),
            baseline_branch: baseline_branch.into(),
            control_script,
            health_url: format!("http://localhost:{health_port}{health_path}"),
        }
    }

    /// `git fetch` + hard-reset the twin to the production baseline branch.
    pub fn pre_deploy_sync(&self) -> Result<()> {
        if !self.twin_root.exists() {
            anyhow::bail!("twin working tree {} does not exist", self.twin_root.display());
        }
        let vcs = Vcs::open(&self.twin_root)?;
        vcs.fetch_and_hard_reset(&self.remote, &self.baseline_branch)
            .context("pre_deploy_sync: fetch + hard reset failed")
    }

    /// Copy every relative path under `project`'s `new/` and `modified/`
    /// into the identical relative path under the twin root. Fails fast on
    /// the first I/O error; marks the project deployed on success.
    pub fn deploy(&self, project: &mut EvolutionProject) -> Result<usize> {
        let copied = copy_tree(&project.new_dir(), &self.twin_root)?
            + copy_tree(&project.modified_dir(), &self.twin_root)?;
        project.set_status(crate::evolution::project::EvolutionStatus::Deployed)?;
        Ok(copied)
    }

    /// Invoke the twin's control script with `restart`, wait for it to
    /// settle, then poll `/health`.
    pub async fn restart_test_system(&self) -> Result<()> {
        run_control_script(&self.control_script, "restart")?;
        tokio::time::sleep(RESTART_SETTLE).await;
        self.check_health().await
    }

    pub async fn check_health(&self) -> Result<()> {
        let client = reqwest::Client::builder().timeout(HEALTH_TIMEOUT).build()?;
        let resp = client
            .get(&self.health_url)
            .send()
            .await
            .map_err(|_| ExternalToolError::HealthCheckFailed {
                url: self.health_url.clone(),
            })?;
        if !resp.status().is_success() {
            anyhow::bail!(ExternalToolError::HealthCheckFailed {
                url: self.health_url.clone(),
            });
        }
        Ok(())
    }

    /// Hard-reset the twin to its current baseline ref, restart, health-check.
    pub async fn rollback(&self) -> Result<()> {
        let vcs = Vcs::open(&self.twin_root)?;
        vcs.fetch_and_hard_reset(&self.remote, &self.baseline_branch)
            .context("rollback: hard reset failed")?;
        self.restart_test_system().await
    }

    /// sync -> deploy -> restart -> health. Any failure triggers rollback
    /// and returns the failure as the result's error/message.
    pub async fn full_deploy(&self, project: &mut EvolutionProject) -> DeployResult {
        let started_at = Utc::now();

        let _lock = match TreeLock::acquire(&self.twin_root) {
            Ok(lock) => lock,
            Err(e) => return self.failed(started_at, "acquiring twin tree lock failed", 0, e).await,
        };

        if let Err(e) = self.pre_deploy_sync() {
            return self.failed(started_at, "pre_deploy_sync failed", 0, e).await;
        }

        let copied = match self.deploy(project) {
            Ok(n) => n,
            Err(e) => return self.failed(started_at, "deploy failed", 0, e).await,
        };

        if let Err(e) = self.restart_test_system().await {
            return self.failed(started_at, "restart/health failed", copied, e).await;
        }

        DeployResult {
            success: true,
            message: "deployed".to_string(),
            files_copied: copied,
            started_at,
            completed_at: Utc::now(),
            error: None,
        }
    }

    async fn failed(
        &self,
        started_at: DateTime<Utc>,
        message: &str,
        files_copied: usize,
        error: anyhow::Error,
    ) -> DeployResult {
        // Best-effort: a failed rollback should not mask the original error.
        let _ = self.rollback().await;
        DeployResult {
            success: false,
            message: message.to_string(),
            files_copied,
            started_at,
            completed_at: Utc::now(),
            error: Some(error.to_string()),
        }
    }
}

/// Invoke `script arg` and require a zero exit code.
pub(crate) fn run_control_script(script: &Path, action: &str) -> Result<()> {
    let output = Command::new(script)
        .arg(action)
        .output()
        .map_err(|e| ExternalToolError::ControlScript {
            path: script.to_path_buf(),
            action: action.to_string(),
            message: e.to_string(),
        })?;
    if !output.status.success() {
        anyhow::bail!(ExternalToolError::ControlScript {
            path: script.to_path_buf(),
            action: action.to_string(),
            message: String::from_utf8_lossy(&output.stderr).to_string(),
        });
    }
    Ok(())
}

/// Recursively copy `src_dir`'s contents into `dest_root`, preserving
/// relative paths and creating parent directories as needed. Missing
/// `src_dir` (e.g. a project with no `modified/`) is a silent no-op.
pub(crate) fn copy_tree(src_dir: &Path, dest_root: &Path) -> Result<usize> {
    if !src_dir.exists() {
        return Ok(0);
    }
    let mut copied = 0;
    for entry in WalkDir::new(src_dir) {
        let entry = entry?;
        let rel = entry.path().strip_prefix(src_dir).unwrap();
        if rel.as_os_str().is_empty() {
            continue;
        }
        let dest_path = dest_root.join(rel);
        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&dest_path)?;
        } else {
            if let Some(parent) = dest_path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::copy(entry.path(), &dest_path)?;
            copied += 1;
        }
    }
    Ok(copied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn copy_tree_preserves_relative_paths() {
        let src = tempdir().unwrap();
        std::fs::create_dir_all(src.path().join("a/b")).unwrap();
        std::fs::write(src.path().join("a/b/file.txt"), "x").unwrap();

        let dest = tempdir().unwrap();
        let copied = copy_tree(src.path(), dest.path()).unwrap();

        assert_eq!(copied, 1);
        assert_eq!(
            std::fs::read_to_string(dest.path().join("a/b/file.txt")).unwrap(),
            "x"
        );
    }

    #[test]
    fn copy_tree_missing_source_is_no_op() {
        let dest = tempdir().unwrap();
        let copied = copy_tree(Path::new("/no/such/dir"), dest.path()).unwrap();
        assert_eq!(copied, 0);
    }
}
