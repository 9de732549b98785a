//! VCS operations (used by C12 Deployer and C14 Integrator): fetch,
//! hard-reset to a remote ref, stash, tag, and commit-all.
//!
//! Grounded in the teacher's git2 usage (`tracker/git.rs` open/signature/
//! commit idiom); the operation set matches the VCS contract (§6: fetch,
//! reset --hard, stash push, tag -a, add -A + commit, rev-parse) used by
//! the Deployer's `pre_deploy_sync` and the Integrator's backup/integrate
//! steps, implemented with git2 instead of shelling out since the teacher
//! already depends on git2 for exactly this kind of repository surgery.

use std::path::Path;

use anyhow::{Context, Result};
use git2::{FetchOptions, Repository, ResetType, Signature};

pub struct Vcs {
    repo: Repository,
}

impl Vcs {
    pub fn open(dir: &Path) -> Result<Self> {
        let repo = Repository::open(dir).context("failed to open git repository")?;
        Ok(Self { repo })
    }

    fn signature(&self) -> Result<Signature<'static>> {
        self.repo
            .signature()
            .or_else(|_| Signature::now("helix", "helix@localhost"))
            .map_err(Into::into)
    }

    /// `git fetch <remote>` then `git reset --hard <remote>/<branch>`
    /// (deployer's `pre_deploy_sync`).
    pub fn fetch_and_hard_reset(&self, remote: &str, branch: &str) -> Result<()> {
        let mut remote_handle = self.repo.find_remote(remote)?;
        let mut fetch_opts = FetchOptions::new();
        remote_handle.fetch(&[branch], Some(&mut fetch_opts), None)?;

        let ref_name = format!("refs/remotes/{remote}/{branch}");
        let target = self
            .repo
            .find_reference(&ref_name)
            .with_context(|| format!("remote ref {ref_name} not found after fetch"))?
            .peel_to_commit()?;
        self.repo
            .reset(target.as_object(), ResetType::Hard, None)
            .context("git reset --hard failed")?;
        Ok(())
    }

    /// Whether the working tree has any uncommitted changes.
    pub fn is_dirty(&self) -> Result<bool> {
        let statuses = self.repo.statuses(None)?;
        Ok(!statuses.is_empty())
    }

    /// `git stash push -m <message>`. The integrator calls this
    /// unconditionally before tagging, independent of `is_dirty`.
    pub fn stash_push(&mut self, message: &str) -> Result<Option<String>> {
        if !self.is_dirty()? {
            return Ok(None);
        }
        let sig = self.signature()?;
        let oid = self
            .repo
            .stash_save(&sig, message, Some(git2::StashFlags::INCLUDE_UNTRACKED))
            .context("git stash push failed")?;
        Ok(Some(oid.to_string()))
    }

    /// Create an annotated tag on HEAD.
    pub fn tag_annotated(&self, name: &str, message: &str) -> Result<String> {
        let sig = self.signature()?;
        let head = self.repo.head()?.peel_to_commit()?;
        let oid = self
            .repo
            .tag(name, head.as_object(), &sig, message, false)
            .context("git tag failed")?;
        Ok(oid.to_string())
    }

    pub fn list_tags(&self, pattern: &str) -> Result<Vec<String>> {
        let names = self.repo.tag_names(Some(pattern))?;
        Ok(names.iter().flatten().map(str::to_string).collect())
    }

    /// `git add -A` followed by `git commit -m <message>`.
    pub fn add_all_and_commit(&self, message: &str) -> Result<String> {
        let mut index = self.repo.index()?;
        index.add_all(["*"].iter(), git2::IndexAddOption::DEFAULT, None)?;
        index.write()?;
        let tree_id = index.write_tree()?;
        let tree = self.repo.find_tree(tree_id)?;
        let sig = self.signature()?;

        let parent = self.repo.head().ok().and_then(|h| h.peel_to_commit().ok());
        let commit_id = match parent {
            Some(parent) => self
                .repo
                .commit(Some("HEAD"), &sig, &sig, message, &tree, &[&parent])?,
            None => self
                .repo
                .commit(Some("HEAD"), &sig, &sig, message, &tree, &[])?,
        };
        Ok(commit_id.to_string())
    }

    pub fn head_sha(&self) -> Option<String> {
        self.repo
            .head()
            .ok()
            .and_then(|h| h.peel_to_commit().ok())
            .map(|c| c.id().to_string())
    }
}
