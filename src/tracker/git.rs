use std::path::{Path, PathBuf};
use std::process::Stdio;

use git2::build::CheckoutBuilder;
use git2::{BranchType, Repository, Signature, Status, StatusOptions};

use crate::errors::GitError;

/// How `ensure_branch` obtained the feature branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BranchOrigin {
    /// Created from the base commit.
    Created,
    /// A local branch already existed.
    Local,
    /// Materialised from the remote-tracking ref.
    Remote,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchRef {
    pub name: String,
    pub origin: BranchOrigin,
    pub head: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitRef {
    pub sha: String,
}

/// Local branch, commit and push operations for one repository.
pub struct BranchManager {
    repo: Repository,
    workdir: PathBuf,
    remote: String,
}

impl BranchManager {
    pub fn open(project_dir: &Path, remote: &str) -> Result<Self, GitError> {
        let repo = Repository::open(project_dir).map_err(|source| GitError::Open {
            path: project_dir.to_path_buf(),
            source,
        })?;
        let workdir = repo
            .workdir()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| project_dir.to_path_buf());
        Ok(Self {
            repo,
            workdir,
            remote: remote.to_string(),
        })
    }

    pub fn remote_name(&self) -> &str {
        &self.remote
    }

    /// URL of the configured remote, if any.
    pub fn remote_url(&self) -> Option<String> {
        self.repo
            .find_remote(&self.remote)
            .ok()
            .and_then(|r| r.url().map(str::to_string))
    }

    pub fn current_branch(&self) -> Option<String> {
        let head = self.repo.head().ok()?;
        if head.is_branch() {
            head.shorthand().map(str::to_string)
        } else {
            None
        }
    }

    /// Whether `<remote>/<name>` exists as a remote-tracking ref.
    pub fn is_pushed(&self, name: &str) -> bool {
        self.repo
            .find_reference(&format!("refs/remotes/{}/{}", self.remote, name))
            .is_ok()
    }

    /// Paths with uncommitted changes, skipping anything under `ignored`.
    pub fn dirty_paths(
        &self,
        allow_untracked: bool,
        ignored: &[PathBuf],
    ) -> Result<Vec<String>, GitError> {
        let mut opts = StatusOptions::new();
        opts.include_untracked(true)
            .recurse_untracked_dirs(true)
            .include_ignored(false);
        let statuses = self
            .repo
            .statuses(Some(&mut opts))
            .map_err(GitError::op("status"))?;

        let mut dirty = Vec::new();
        for entry in statuses.iter() {
            let Some(path) = entry.path() else {
                continue;
            };
            if ignored.iter().any(|dir| Path::new(path).starts_with(dir)) {
                continue;
            }
            if allow_untracked && entry.status() == Status::WT_NEW {
                continue;
            }
            dirty.push(path.to_string());
        }
        Ok(dirty)
    }

    /// Check out `name`, creating it from `base` when neither a local nor a
    /// remote branch exists. Never creates a second branch for the same name.
    pub fn ensure_branch(&self, base: &str, name: &str) -> Result<BranchRef, GitError> {
        let refname = format!("refs/heads/{name}");

        let origin = if self.repo.find_branch(name, BranchType::Local).is_ok() {
            BranchOrigin::Local
        } else if let Ok(remote_ref) = self
            .repo
            .find_reference(&format!("refs/remotes/{}/{}", self.remote, name))
        {
            let commit = remote_ref
                .peel_to_commit()
                .map_err(GitError::op("peel remote branch"))?;
            let mut branch = self
                .repo
                .branch(name, &commit, false)
                .map_err(GitError::op("create branch"))?;
            branch
                .set_upstream(Some(&format!("{}/{}", self.remote, name)))
                .map_err(GitError::op("set upstream"))?;
            BranchOrigin::Remote
        } else {
            let base_commit = self.resolve_base(base)?;
            self.repo
                .branch(name, &base_commit, false)
                .map_err(GitError::op("create branch"))?;
            BranchOrigin::Created
        };

        if self.current_branch().as_deref() != Some(name) {
            let target = self
                .repo
                .revparse_single(&refname)
                .map_err(GitError::op("resolve branch"))?;
            self.repo
                .checkout_tree(&target, Some(CheckoutBuilder::new().safe()))
                .map_err(GitError::op("checkout"))?;
            self.repo
                .set_head(&refname)
                .map_err(GitError::op("set head"))?;
        }

        let head = self.head_sha().unwrap_or_default();
        tracing::info!(branch = name, ?origin, %head, "branch ready");
        Ok(BranchRef {
            name: name.to_string(),
            origin,
            head,
        })
    }

    /// Local base branch, then the remote-tracking base, then HEAD.
    fn resolve_base(&self, base: &str) -> Result<git2::Commit<'_>, GitError> {
        if let Ok(branch) = self.repo.find_branch(base, BranchType::Local)
            && let Ok(commit) = branch.get().peel_to_commit()
        {
            return Ok(commit);
        }
        if let Ok(reference) = self
            .repo
            .find_reference(&format!("refs/remotes/{}/{}", self.remote, base))
            && let Ok(commit) = reference.peel_to_commit()
        {
            return Ok(commit);
        }
        tracing::warn!(base, "base branch not found, branching from HEAD");
        self.repo
            .head()
            .and_then(|h| h.peel_to_commit())
            .map_err(|_| GitError::BaseNotFound(base.to_string()))
    }

    /// Stage `paths` (relative to the workdir) and commit when the tree changed.
    pub fn commit_if_dirty(
        &self,
        message: &str,
        paths: &[PathBuf],
    ) -> Result<Option<CommitRef>, GitError> {
        let mut index = self.repo.index().map_err(GitError::op("index"))?;
        for path in paths {
            if self.workdir.join(path).is_file() {
                index.add_path(path).map_err(GitError::op("stage"))?;
            }
        }
        index.write().map_err(GitError::op("write index"))?;
        let tree_id = index.write_tree().map_err(GitError::op("write tree"))?;

        let parent = self.repo.head().ok().and_then(|h| h.peel_to_commit().ok());
        if let Some(parent) = &parent
            && parent.tree_id() == tree_id
        {
            tracing::debug!("nothing to commit");
            return Ok(None);
        }

        let tree = self
            .repo
            .find_tree(tree_id)
            .map_err(GitError::op("find tree"))?;
        let sig = self
            .repo
            .signature()
            .or_else(|_| Signature::now("autopilot", "autopilot@localhost"))
            .map_err(GitError::op("signature"))?;
        let parents: Vec<&git2::Commit<'_>> = parent.iter().collect();
        let oid = self
            .repo
            .commit(Some("HEAD"), &sig, &sig, message, &tree, &parents)
            .map_err(GitError::op("commit"))?;

        tracing::info!(sha = %oid, "committed autopilot artifacts");
        Ok(Some(CommitRef {
            sha: oid.to_string(),
        }))
    }

    /// Refresh `<remote>/<name>` from the remote. `Ok(false)` when the remote
    /// has no such branch.
    pub async fn fetch(&self, name: &str) -> Result<bool, GitError> {
        let refspec = format!("+refs/heads/{name}:refs/remotes/{}/{name}", self.remote);
        let output = tokio::process::Command::new("git")
            .args(["fetch", "--quiet", "--no-tags", &self.remote, &refspec])
            .current_dir(&self.workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .env("GIT_TERMINAL_PROMPT", "0")
            .kill_on_drop(true)
            .output()
            .await
            .map_err(GitError::Spawn)?;

        if output.status.success() {
            tracing::debug!(remote = %self.remote, branch = name, "fetched");
            return Ok(true);
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        if stderr.contains("couldn't find remote ref") {
            return Ok(false);
        }
        Err(GitError::Fetch(stderr.trim().to_string()))
    }

    /// `git push -u <remote> <name>`, shelling out so credential helpers apply.
    pub async fn push(&self, name: &str) -> Result<(), GitError> {
        let output = tokio::process::Command::new("git")
            .args(["push", "-u", &self.remote, name])
            .current_dir(&self.workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(GitError::Spawn)?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(GitError::Push(stderr.trim().to_string()));
        }
        tracing::info!(remote = %self.remote, branch = name, "pushed");
        Ok(())
    }

    pub fn head_sha(&self) -> Option<String> {
        self.repo
            .head()
            .ok()
            .and_then(|head| head.peel_to_commit().ok())
            .map(|c| c.id().to_string())
    }
}
