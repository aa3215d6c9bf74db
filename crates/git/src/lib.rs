//! Git plumbing: command execution, mirror maintenance, reflog files,
//! ref enumeration and locked checkouts.

pub mod checkout;
pub mod mirror;
pub mod reflog;
pub mod refs;

use std::{
    ffi::OsString,
    path::{Path, PathBuf},
    process::Output,
    time::Duration,
};

use anyhow::{Context, Result, bail};

/// A git invocation context: working directory plus extra environment
/// (`GIT_DIR`/`GIT_WORK_TREE` for detached work trees).
#[derive(Debug, Clone)]
pub struct Git {
    cwd: PathBuf,
    env: Vec<(OsString, OsString)>,
}

impl Git {
    pub fn new(cwd: impl Into<PathBuf>) -> Self { Self { cwd: cwd.into(), env: Vec::new() } }

    pub fn env(mut self, key: impl Into<OsString>, value: impl Into<OsString>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub async fn output(&self, args: &[&str]) -> Result<Output> {
        let mut command = tokio::process::Command::new("git");
        command.args(args).current_dir(&self.cwd);
        for (key, value) in &self.env {
            command.env(key, value);
        }
        command
            .output()
            .await
            .with_context(|| format!("Failed to run git {}", args.join(" ")))
    }

    /// Run git and return its stdout. Index-lock contention (another process
    /// briefly holding `.git/index.lock`) is retried in-process with a small
    /// random backoff; any other failure is an error.
    pub async fn run(&self, args: &[&str]) -> Result<String> {
        let mut attempts = 0;
        loop {
            let output = self.output(args).await?;
            if output.status.success() {
                return Ok(String::from_utf8_lossy(&output.stdout).into_owned());
            }
            let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
            attempts += 1;
            if attempts < 3 && stderr.contains("index.lock") {
                let backoff = Duration::from_secs_f64(rand::random::<f64>());
                tracing::debug!("git index locked, retrying in {backoff:?}");
                tokio::time::sleep(backoff).await;
                continue;
            }
            bail!("git {} failed: {}", args.join(" "), stderr.trim());
        }
    }
}

/// Run git inside a bare mirror.
pub async fn mirror_git(mirror: &Path, args: &[&str]) -> Result<String> {
    Git::new(mirror).run(args).await
}
