//! Per-job checkouts of the repository under test.

use async_trait::async_trait;
use driftgate_core::checkout::{CheckoutProvider, JobCheckout};
use driftgate_core::{Error, ResourceId, Result};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Gives each job its own detached git worktree of `HEAD`, so jobs that
/// regenerate files cannot observe each other's writes.
pub struct GitWorktreeCheckout {
    repo: PathBuf,
    work_dir: PathBuf,
}

impl GitWorktreeCheckout {
    pub fn new(repo: impl Into<PathBuf>) -> Self {
        Self {
            repo: repo.into(),
            work_dir: std::env::temp_dir().join("driftgate-worktrees"),
        }
    }

    /// Directory under which worktrees are created.
    pub fn with_work_dir(mut self, work_dir: impl Into<PathBuf>) -> Self {
        self.work_dir = work_dir.into();
        self
    }

    async fn git(&self, args: &[&str]) -> Result<()> {
        let output = Command::new("git")
            .arg("-C")
            .arg(&self.repo)
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| Error::Checkout(format!("failed to run git: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::Checkout(format!(
                "git {} failed: {}",
                args.first().copied().unwrap_or_default(),
                stderr.trim()
            )));
        }
        Ok(())
    }
}

fn path_arg(path: &Path) -> Result<&str> {
    path.to_str()
        .ok_or_else(|| Error::Checkout(format!("non UTF-8 path {}", path.display())))
}

#[async_trait]
impl CheckoutProvider for GitWorktreeCheckout {
    fn name(&self) -> &'static str {
        "worktree"
    }

    async fn prepare(&self, job: &str) -> Result<JobCheckout> {
        tokio::fs::create_dir_all(&self.work_dir).await?;
        let root = self
            .work_dir
            .join(format!("{}-{}", job, ResourceId::new().short()));

        info!(job = %job, path = %root.display(), "Creating worktree");
        self.git(&["worktree", "add", "--detach", path_arg(&root)?, "HEAD"])
            .await?;

        Ok(JobCheckout {
            job: job.to_string(),
            root,
            ephemeral: true,
        })
    }

    async fn release(&self, checkout: JobCheckout) -> Result<()> {
        debug!(job = %checkout.job, path = %checkout.root.display(), "Removing worktree");
        if let Err(e) = self
            .git(&["worktree", "remove", "--force", path_arg(&checkout.root)?])
            .await
        {
            warn!(job = %checkout.job, error = %e, "Worktree removal failed, pruning");
            if checkout.root.exists() {
                tokio::fs::remove_dir_all(&checkout.root).await?;
            }
            self.git(&["worktree", "prune"]).await?;
        }
        Ok(())
    }
}

/// Runs every job directly in the given directory. Jobs share one tree, so
/// the orchestrator must run them one at a time, and anything a job writes
/// stays in the directory.
pub struct InPlaceCheckout {
    root: PathBuf,
}

impl InPlaceCheckout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl CheckoutProvider for InPlaceCheckout {
    fn name(&self) -> &'static str {
        "in-place"
    }

    async fn prepare(&self, job: &str) -> Result<JobCheckout> {
        if !self.root.is_dir() {
            return Err(Error::Checkout(format!(
                "{} is not a directory",
                self.root.display()
            )));
        }
        Ok(JobCheckout {
            job: job.to_string(),
            root: self.root.clone(),
            ephemeral: false,
        })
    }

    async fn release(&self, _checkout: JobCheckout) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn git(dir: &Path, args: &[&str]) {
        let status = std::process::Command::new("git")
            .arg("-C")
            .arg(dir)
            .args(args)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .unwrap();
        assert!(status.success(), "git {:?} failed", args);
    }

    fn init_repo(dir: &Path) {
        git(dir, &["init", "-q"]);
        std::fs::write(dir.join("Cargo.toml"), "[workspace]\n").unwrap();
        git(dir, &["add", "."]);
        git(
            dir,
            &[
                "-c",
                "user.name=ci",
                "-c",
                "user.email=ci@localhost",
                "commit",
                "-q",
                "-m",
                "init",
            ],
        );
    }

    #[tokio::test]
    async fn test_worktree_per_job() {
        let repo = tempfile::tempdir().unwrap();
        let work = tempfile::tempdir().unwrap();
        init_repo(repo.path());

        let provider = GitWorktreeCheckout::new(repo.path()).with_work_dir(work.path());
        let build = provider.prepare("build").await.unwrap();
        let wasm = provider.prepare("build-wasm").await.unwrap();

        assert_ne!(build.root, wasm.root);
        assert!(build.ephemeral);
        assert!(build.root.join("Cargo.toml").is_file());

        // Writes in one worktree are invisible in the other
        std::fs::write(build.root.join("generated.rs"), "// new").unwrap();
        assert!(!wasm.root.join("generated.rs").exists());

        let root = build.root.clone();
        provider.release(build).await.unwrap();
        provider.release(wasm).await.unwrap();
        assert!(!root.exists());
    }

    #[tokio::test]
    async fn test_worktree_outside_repository() {
        let dir = tempfile::tempdir().unwrap();
        let provider = GitWorktreeCheckout::new(dir.path()).with_work_dir(dir.path().join("wt"));
        let err = provider.prepare("build").await.unwrap_err();
        assert!(matches!(err, Error::Checkout(_)));
    }

    #[tokio::test]
    async fn test_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let provider = InPlaceCheckout::new(dir.path());
        let checkout = provider.prepare("build").await.unwrap();
        assert_eq!(checkout.root, dir.path());
        assert!(!checkout.ephemeral);
        provider.release(checkout).await.unwrap();
        assert!(dir.path().exists());
    }

    #[tokio::test]
    async fn test_in_place_missing_directory() {
        let provider = InPlaceCheckout::new("/nonexistent/driftgate");
        assert!(matches!(
            provider.prepare("build").await,
            Err(Error::Checkout(_))
        ));
    }
}
