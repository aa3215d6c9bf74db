//! One queued job: paths, hooks, and the sync/checkout/publish phases.

use std::path::PathBuf;

use anyhow::{Context, Result};
use golem_core::{
    config::{Config, RsyncConfig},
    layout::{RepoLayout, ref_key},
    message::{JobMessage, Reason},
};
use golem_queue::JobQueue;
use time::OffsetDateTime;

use crate::hooks::{self, HookContext, HookSet};

pub struct Job {
    pub message: JobMessage,
    pub repo: String,
    pub refname: String,
    pub sha1: String,
    pub action: String,
    pub mirror: PathBuf,
    pub work_dir: PathBuf,
    pub artefact_dir: PathBuf,
    pub start_time: i64,
    hooks: HookSet,
    context: HookContext,
}

impl Job {
    /// Set up the job's on-disk state: fresh working and artefact
    /// directories (stale ones from an earlier attempt at the same key are
    /// removed) and the execution log.
    pub fn prepare(config: &Config, message: JobMessage, ensure_mirror: bool) -> Result<Self> {
        let repo = message.repo.clone().context("job without repo")?;
        let refname = message.refname.clone().context("job without ref")?;
        let sha1 = message.sha1.clone().context("job without sha1")?;
        let action = message.action.clone().context("job without action")?;

        let layout = RepoLayout::new(&config.repo_dir, &repo);
        let mirror = layout.mirror_path();
        let work_dir = layout.work_dir(&action, &refname, &sha1);
        let artefact_dir = layout.artefact_dir(&action, &refname, &sha1);

        if ensure_mirror && !mirror.exists() {
            std::fs::create_dir_all(&mirror)?;
        }
        if work_dir.exists() {
            std::fs::remove_dir_all(&work_dir)?;
        }
        std::fs::create_dir_all(&work_dir)?;
        if artefact_dir.exists() {
            std::fs::remove_dir_all(&artefact_dir)?;
        }
        std::fs::create_dir_all(&artefact_dir)?;

        let hooks = hooks::parse(&message.extra);
        let context = HookContext {
            work_dir: work_dir.clone(),
            sha1: sha1.clone(),
            log_path: artefact_dir.join("log"),
            env: vec![
                ("GIT_DIR".to_owned(), mirror.display().to_string()),
                ("GIT_WORK_TREE".to_owned(), work_dir.display().to_string()),
            ],
        };
        Ok(Self {
            message,
            repo,
            refname,
            sha1,
            action,
            mirror,
            work_dir,
            artefact_dir,
            start_time: OffsetDateTime::now_utc().unix_timestamp(),
            hooks,
            context,
        })
    }

    pub async fn run_hook(&self, which: &str) -> Result<()> {
        if let Some(commands) = self.hooks.get(which) {
            tracing::info!(action = self.action, hook = which, "Running hook");
            self.context.run_commands(commands).await?;
        }
        Ok(())
    }

    /// Run an ad-hoc command list (the action's configured script) in the
    /// working tree.
    pub async fn run_commands(&self, commands: &[Vec<String>]) -> Result<()> {
        self.context.run_commands(commands).await
    }

    /// Pull the mirror down from the shared rsync root.
    pub async fn sync(&self, rsync: &RsyncConfig) -> Result<()> {
        let root = rsync.root.as_deref().context("worker sync requires an rsync root")?;
        let remote = format!("{root}/{repo}/{repo}.git/", repo = self.repo);
        let mut extra = Vec::new();
        if let Some(hardlink) = &rsync.hardlink {
            let mut reference = hardlink.join(&self.repo).join(&self.repo).join(".git");
            if !reference.exists() {
                reference = hardlink.join(&self.repo).join(format!("{}.git", self.repo));
            }
            extra.push(format!("--link-dest={}/", reference.display()));
        }
        if let Some(password_file) = &rsync.password_file {
            extra.push(format!("--password-file={}", password_file.display()));
        }
        golem_sync::rsync(&remote, &self.mirror.display().to_string(), &extra).await?;
        Ok(())
    }

    pub async fn checkout(&self) -> Result<()> {
        golem_git::checkout::checkout(&self.mirror, &self.work_dir, &self.sha1).await
    }

    /// Move glob-matched outputs into the artefact directory, transfer it
    /// to the publish root, and emit the action-done event.
    pub async fn publish(
        &self,
        queue: &JobQueue,
        config: &Config,
        result: &str,
        host: &str,
    ) -> Result<()> {
        for pattern in self.publish_globs() {
            let full = self.work_dir.join(&pattern);
            for path in glob::glob(&full.display().to_string())?.flatten() {
                let name = path.file_name().context("glob matched a nameless path")?;
                tracing::info!(artefact = %name.to_string_lossy(), "Adding artefact");
                std::fs::rename(&path, self.artefact_dir.join(name))?;
            }
        }

        if let Some(root) = config.rsync.root.as_deref() {
            let key = ref_key(&self.refname, &self.sha1);
            let remote = format!(
                "{root}/{repo}/artefacts/{action}/{key}/",
                repo = self.repo,
                action = self.action,
                key = key.display(),
            );
            let mut extra = Vec::new();
            if let Some(password_file) = &config.rsync.password_file {
                extra.push(format!("--password-file={}", password_file.display()));
            }
            let local = format!("{}/", self.artefact_dir.display());
            golem_sync::rsync(&local, &remote, &extra).await?;
        }

        let end_time = OffsetDateTime::now_utc().unix_timestamp();
        let mut done = JobMessage::new(Reason::ActionDone, &self.repo);
        done.refname = Some(self.refname.clone());
        done.prev_sha1 = self.message.prev_sha1.clone();
        done.sha1 = Some(self.sha1.clone());
        done.action = Some(self.action.clone());
        done.result = Some(result.to_owned());
        done.start_time = Some(self.start_time);
        done.end_time = Some(end_time);
        done.duration = Some((end_time - self.start_time) as f64);
        done.host = Some(host.to_owned());
        queue
            .put(&config.queue.master_queue, &serde_json::to_vec(&done)?, 600)
            .await?;
        Ok(())
    }

    fn publish_globs(&self) -> Vec<String> {
        match self.message.extra.get("publish") {
            Some(serde_json::Value::String(s)) => vec![s.clone()],
            Some(serde_json::Value::Array(items)) => items
                .iter()
                .filter_map(serde_json::Value::as_str)
                .map(str::to_owned)
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Delete the working tree; called only after a successful run. Failed
    /// trees stay on disk for inspection until rescheduled.
    pub fn cleanup(&self) -> Result<()> {
        if self.work_dir.exists() {
            std::fs::remove_dir_all(&self.work_dir)?;
        }
        Ok(())
    }
}
