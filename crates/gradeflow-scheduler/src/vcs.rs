//! Version-control seam — syncing the watch tree and publishing reports.
//!
//! The control loop and worker pool only see the `Vcs` trait; the
//! daemon wires in `SvnClient`. Tests substitute a recording fake.

use std::future::Future;
use std::path::Path;
use std::process::Output;

use anyhow::{Context, bail};
use tracing::debug;

/// Operations the scheduler needs from the backing version control.
///
/// Implementations are shared behind `Arc<tokio::sync::Mutex<_>>`; the
/// mutex serializes working-copy mutations so a sync never races a
/// publish.
pub trait Vcs: Send + Sync + 'static {
    /// Pull remote changes into the working copy.
    fn sync(&self, path: &Path) -> impl Future<Output = anyhow::Result<()>> + Send;

    /// Schedule a new file for addition and commit it.
    fn publish(
        &self,
        path: &Path,
        message: &str,
    ) -> impl Future<Output = anyhow::Result<()>> + Send;
}

/// Subversion via the `svn` command-line client.
#[derive(Debug, Clone, Default)]
pub struct SvnClient;

impl SvnClient {
    pub fn new() -> Self {
        Self
    }

    async fn run(&self, args: &[&str]) -> anyhow::Result<Output> {
        let output = tokio::process::Command::new("svn")
            .args(args)
            .arg("--non-interactive")
            .output()
            .await
            .with_context(|| format!("failed to spawn svn {}", args.join(" ")))?;
        debug!(args = ?args, status = ?output.status.code(), "svn finished");
        Ok(output)
    }
}

impl Vcs for SvnClient {
    async fn sync(&self, path: &Path) -> anyhow::Result<()> {
        let path = path.display().to_string();
        let output = self.run(&["update", &path]).await?;
        if !output.status.success() {
            bail!(
                "svn update {path} failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(())
    }

    async fn publish(&self, path: &Path, message: &str) -> anyhow::Result<()> {
        let path = path.display().to_string();

        // Add fails harmlessly when the artifact path is already
        // versioned from a previous overwrite.
        let add = self.run(&["add", &path]).await?;
        if !add.status.success() {
            debug!(%path, stderr = %String::from_utf8_lossy(&add.stderr).trim(),
                "svn add did not succeed, likely already versioned");
        }

        let commit = self.run(&["commit", "-m", message, &path]).await?;
        if !commit.status.success() {
            bail!(
                "svn commit {path} failed: {}",
                String::from_utf8_lossy(&commit.stderr).trim()
            );
        }
        Ok(())
    }
}

/// `Vcs` that does nothing, for watch trees that are plain directories.
#[derive(Debug, Clone, Default)]
pub struct NoVcs;

impl Vcs for NoVcs {
    async fn sync(&self, path: &Path) -> anyhow::Result<()> {
        debug!(?path, "no VCS configured, sync skipped");
        Ok(())
    }

    async fn publish(&self, _path: &Path, _message: &str) -> anyhow::Result<()> {
        Ok(())
    }
}
