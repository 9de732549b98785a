//! Integrator (C14): snapshots production behind a VCS tag, copies
//! validated artifacts into the production tree, commits, restarts, and
//! rolls back on failure.
//!
//! Grounded in `evolution/integrator.py`'s `pre_integration_backup`/
//! `integrate`/`post_integration_restart`/`rollback`/`full_integration`.

use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};

use crate::evolution::deployer::{copy_tree, run_control_script, TreeLock};
use crate::evolution::project::EvolutionProject;
use crate::vcs::Vcs;

const RESTART_SETTLE: std::time::Duration = std::time::Duration::from_secs(3);
const DEFAULT_TAG_PREFIX: &str = "pre-integrate";

#[derive(Debug, Clone)]
pub struct IntegrationResult {
    pub success: bool,
    pub message: String,
    pub backup_tag: Option<String>,
    pub files_integrated: usize,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub error: Option<String>,
}

pub struct Integrator {
    pub production_root: PathBuf,
    pub control_script: PathBuf,
    pub health_url: String,
    backup_tag: Option<String>,
}

impl Integrator {
    pub fn new(production_root: PathBuf, control_script: PathBuf, health_port: u16, health_path: &str) -> Self {
        Self {
            production_root,
            control_script,
            health_url: format!("http://localhost:{health_port}{health_path}"),
            backup_tag: None,
        }
    }

    /// Stash any uncommitted changes (unconditionally, per the original's
    /// call-before-check ordering -- [`Vcs::stash_push`] is itself a no-op on
    /// a clean tree), then tag HEAD `"<prefix>-<timestamp>"` and record it.
    pub fn pre_integration_backup(&mut self, tag_prefix: &str, timestamp: DateTime<Utc>) -> Result<String> {
        let mut vcs = Vcs::open(&self.production_root)?;
        let tag_name = format!("{tag_prefix}-{}", timestamp.format("%Y%m%d%H%M%S"));
        vcs.stash_push(&format!("Auto-stash before {tag_name}"))
            .context("pre_integration_backup: stash failed")?;
        vcs.tag_annotated(&tag_name, &format!("Auto-tag before {tag_name}"))
            .context("pre_integration_backup: tag failed")?;
        self.backup_tag = Some(tag_name.clone());
        Ok(tag_name)
    }

    /// Copy `new/`+`modified/` into the production tree, then `git add -A`
    /// and commit. Marks the project integrated on success.
    pub fn integrate(&self, project: &mut EvolutionProject) -> Result<usize> {
        let copied = copy_tree(&project.new_dir(), &self.production_root)?
            + copy_tree(&project.modified_dir(), &self.production_root)?;
        let vcs = Vcs::open(&self.production_root)?;
        vcs.add_all_and_commit(&format!("Integration: {}", project.name()))
            .context("integrate: commit failed")?;
        project.set_status(crate::evolution::project::EvolutionStatus::Integrated)?;
        Ok(copied)
    }

    pub async fn post_integration_restart(&self) -> Result<()> {
        run_control_script(&self.control_script, "restart")?;
        tokio::time::sleep(RESTART_SETTLE).await;
        self.check_health().await
    }

    pub async fn check_health(&self) -> Result<()> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(5))
            .build()?;
        let resp = client.get(&self.health_url).send().await.map_err(|_| {
            crate::errors::ExternalToolError::HealthCheckFailed {
                url: self.health_url.clone(),
            }
        })?;
        if !resp.status().is_success() {
            anyhow::bail!(crate::errors::ExternalToolError::HealthCheckFailed {
                url: self.health_url.clone(),
            });
        }
        Ok(())
    }

    /// Reset production hard to the recorded backup tag (or, if none was
    /// recorded in this process, the most recent `<prefix>-*` tag by
    /// creation order), then restart and health-check. Always safe to call.
    pub async fn rollback(&self, tag_prefix: &str) -> Result<()> {
        let vcs = Vcs::open(&self.production_root)?;
        let tag = match &self.backup_tag {
            Some(tag) => tag.clone(),
            None => {
                let mut tags = vcs.list_tags(&format!("{tag_prefix}-*"))?;
                tags.sort();
                tags.pop()
                    .context("rollback: no backup tag recorded and none found on disk")?
            }
        };
        reset_hard_to_tag(&self.production_root, &tag)?;
        run_control_script(&self.control_script, "restart")?;
        tokio::time::sleep(RESTART_SETTLE).await;
        self.check_health().await
    }

    /// backup -> integrate -> restart, rollback on any failure, final
    /// health-check.
    pub async fn full_integration(
        &mut self,
        project: &mut EvolutionProject,
        timestamp: DateTime<Utc>,
    ) -> IntegrationResult {
        let started_at = Utc::now();

        let _lock = match TreeLock::acquire(&self.production_root) {
            Ok(lock) => lock,
            Err(e) => {
                return self
                    .failed(started_at, "acquiring production tree lock failed", None, 0, e)
                    .await
            }
        };

        let tag = match self.pre_integration_backup(DEFAULT_TAG_PREFIX, timestamp) {
            Ok(tag) => tag,
            Err(e) => return self.failed(started_at, "pre_integration_backup failed", None, 0, e).await,
        };

        let copied = match self.integrate(project) {
            Ok(n) => n,
            Err(e) => {
                return self
                    .failed(started_at, "integrate failed", Some(tag), 0, e)
                    .await
            }
        };

        if let Err(e) = self.post_integration_restart().await {
            return self
                .failed(started_at, "restart/health failed", Some(tag), copied, e)
                .await;
        }

        IntegrationResult {
            success: true,
            message: "integrated".to_string(),
            backup_tag: Some(tag),
            files_integrated: copied,
            started_at,
            completed_at: Utc::now(),
            error: None,
        }
    }

    async fn failed(
        &self,
        started_at: DateTime<Utc>,
        message: &str,
        backup_tag: Option<String>,
        files_integrated: usize,
        error: anyhow::Error,
    ) -> IntegrationResult {
        let _ = self.rollback(DEFAULT_TAG_PREFIX).await;
        IntegrationResult {
            success: false,
            message: message.to_string(),
            backup_tag,
            files_integrated,
            started_at,
            completed_at: Utc::now(),
            error: Some(error.to_string()),
        }
    }
}

fn reset_hard_to_tag(root: &PathBuf, tag: &str) -> Result<()> {
    let repo = git2::Repository::open(root)?;
    let obj = repo
        .revparse_single(tag)
        .with_context(|| format!("tag {tag} not found"))?;
    let commit = obj.peel_to_commit()?;
    repo.reset(commit.as_object(), git2::ResetType::Hard, None)
        .context("reset --hard to backup tag failed")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use git2::Repository;
    use tempfile::tempdir;

    fn init_repo(dir: &std::path::Path) {
        let repo = Repository::init(dir).unwrap();
        let mut config = repo.config().unwrap();
        config.set_str("user.name", "test").unwrap();
        config.set_str("user.email", "test@test.com").unwrap();
        std::fs::write(dir.join("a.txt"), "v1").unwrap();
        let vcs = Vcs::open(dir).unwrap();
        vcs.add_all_and_commit("init").unwrap();
    }

    #[test]
    fn pre_integration_backup_tags_head_and_records_it() {
        let dir = tempdir().unwrap();
        init_repo(dir.path());
        let mut integrator = Integrator::new(
            dir.path().to_path_buf(),
            PathBuf::from("/bin/true"),
            9001,
            "/health",
        );
        let ts = DateTime::parse_from_rfc3339("2026-07-28T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let tag = integrator.pre_integration_backup("pre-integrate", ts).unwrap();
        assert!(tag.starts_with("pre-integrate-"));
        assert_eq!(integrator.backup_tag, Some(tag));
    }

    #[test]
    fn rollback_without_recorded_tag_finds_latest_by_prefix() {
        let dir = tempdir().unwrap();
        init_repo(dir.path());
        let vcs = Vcs::open(dir.path()).unwrap();
        vcs.tag_annotated("pre-integrate-20260101000000", "older").unwrap();

        std::fs::write(dir.path().join("a.txt"), "v2").unwrap();
        vcs.add_all_and_commit("second").unwrap();
        vcs.tag_annotated("pre-integrate-20260201000000", "newer").unwrap();

        std::fs::write(dir.path().join("a.txt"), "v3-dirty").unwrap();

        reset_hard_to_tag(&dir.path().to_path_buf(), "pre-integrate-20260101000000").unwrap();
        assert_eq!(std::fs::read_to_string(dir.path().join("a.txt")).unwrap(), "v1");
    }
}
