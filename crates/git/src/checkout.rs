//! Working-tree materialization, serialized per mirror.

use std::{io::ErrorKind, path::Path, time::Duration};

use anyhow::{Context, Result};

use crate::Git;

/// Check out `sha1` into `work_dir` against the bare mirror. Checkouts
/// against the same mirror are serialized by an exclusive advisory lock on
/// `<mirror>/golem.lock`: two jobs sharing a mirror must not touch its index
/// concurrently.
pub async fn checkout(mirror: &Path, work_dir: &Path, sha1: &str) -> Result<()> {
    std::fs::create_dir_all(work_dir)?;
    let lock_path = mirror.join("golem.lock");
    let lock_file = std::fs::OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(&lock_path)
        .with_context(|| format!("Failed to open {}", lock_path.display()))?;
    let mut lock = fd_lock::RwLock::new(lock_file);
    let _guard = loop {
        match lock.try_write() {
            Ok(guard) => break guard,
            Err(e) if e.kind() == ErrorKind::WouldBlock => {
                tracing::debug!(mirror = %mirror.display(), "Mirror busy, waiting for lock");
                tokio::time::sleep(Duration::from_millis(250)).await;
            }
            Err(e) => return Err(e).context("Failed to lock mirror"),
        }
    };

    let git = Git::new(work_dir)
        .env("GIT_DIR", mirror.as_os_str())
        .env("GIT_WORK_TREE", work_dir.as_os_str());
    git.run(&["clean", "-dxf"]).await?;
    git.run(&["reset", "--hard"]).await?;
    git.run(&["checkout", sha1]).await?;
    if work_dir.join(".gitmodules").exists() {
        git.run(&["submodule", "update", "--init", "--recursive"]).await?;
    }
    Ok(())
}
