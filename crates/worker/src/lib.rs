//! Worker processes: reserve a job, run it through the lifecycle
//! (sync, checkout, handler, publish), and report back.
//!
//! The lifecycle is linear with no backward transitions. Handler failure
//! is classified, never fatal to the worker: a "retry later" signal marks
//! the run `retry`, anything else `fail`, and both leave the working tree
//! in place for inspection.

pub mod hooks;
pub mod job;

use anyhow::{Context, Result};
use async_trait::async_trait;
use golem_core::{
    config::{Config, WorkerKindConfig},
    message::{JobMessage, Reason},
};
use golem_queue::JobQueue;
use thiserror::Error;
use time::OffsetDateTime;

use crate::job::Job;

/// How a handler run ended. `RetryLater` is the transient signal; any
/// other error is fatal for this (commit, action) until rescheduled.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("retry later: {0}")]
    RetryLater(String),
    #[error(transparent)]
    Fatal(#[from] anyhow::Error),
}

/// The opaque build step a worker runs inside the checked-out tree.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn run(&self, job: &mut Job) -> Result<(), HandlerError>;
}

/// Exit code conventionally signalling "try again later" (EX_TEMPFAIL).
const EXIT_TEMPFAIL: &str = "exit status: 75";

/// Runs the command lists from the action's `script` configuration key.
pub struct ScriptHandler;

#[async_trait]
impl JobHandler for ScriptHandler {
    async fn run(&self, job: &mut Job) -> Result<(), HandlerError> {
        let commands = match job.message.extra.get("script") {
            Some(value) => hooks::command_lists(value),
            None => return Err(HandlerError::Fatal(anyhow::anyhow!("action has no script"))),
        };
        job.run_commands(&commands).await.map_err(|e| {
            if e.to_string().contains(EXIT_TEMPFAIL) {
                HandlerError::RetryLater(e.to_string())
            } else {
                HandlerError::Fatal(e)
            }
        })
    }
}

/// Logs notification events; actual delivery is a downstream consumer's
/// job.
pub struct NotifyHandler;

#[async_trait]
impl JobHandler for NotifyHandler {
    async fn run(&self, job: &mut Job) -> Result<(), HandlerError> {
        tracing::info!(
            repo = job.repo,
            action = job.action,
            result = job.message.result.as_deref().unwrap_or("unknown"),
            "Notification"
        );
        Ok(())
    }
}

pub struct Worker {
    config: Config,
    kind: WorkerKindConfig,
    queue: JobQueue,
    handler: Box<dyn JobHandler>,
    host: String,
}

impl Worker {
    pub fn new(
        config: Config,
        kind_name: &str,
        mut queue: JobQueue,
        handler: Box<dyn JobHandler>,
    ) -> Result<Self> {
        let kind = config
            .workers
            .get(kind_name)
            .with_context(|| format!("no worker kind {kind_name} configured"))?
            .clone();
        for watched in &kind.queues {
            queue.watch(watched);
        }
        let host = hostname::get()
            .map(|h| h.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "unknown".to_owned());
        Ok(Self { config, kind, queue, handler, host })
    }

    pub async fn run(&mut self) -> Result<()> {
        loop {
            let reserved = self.queue.reserve_with_retry().await?;
            let message: JobMessage = match serde_json::from_slice(&reserved.payload) {
                Ok(message) => message,
                Err(e) => {
                    tracing::warn!("Burying job with invalid payload: {e}");
                    self.queue.bury(&reserved).await?;
                    continue;
                }
            };
            if message.why == Reason::Quit {
                tracing::info!("Exiting");
                self.queue.delete(&reserved).await?;
                return Ok(());
            }
            match self.process(message).await {
                Ok(()) => self.queue.delete(&reserved).await?,
                Err(e) => {
                    tracing::error!("Job failed outside the handler: {e:?}");
                    self.queue.bury(&reserved).await?;
                }
            }
        }
    }

    /// One pass through the lifecycle. An error here (hook, sync or
    /// checkout failure) aborts before any result is reported and buries
    /// the job; handler errors are classified and reported normally.
    pub async fn process(&self, message: JobMessage) -> Result<()> {
        let mut job = Job::prepare(&self.config, message, self.kind.sync)?;
        tracing::info!(
            repo = job.repo,
            action = job.action,
            refname = job.refname,
            sha1 = job.sha1,
            "Processing job"
        );

        if self.kind.sync {
            job.run_hook("pre-sync").await?;
            job.sync(&self.config.rsync).await?;
            job.run_hook("post-sync").await?;
        }
        if self.kind.checkout && self.kind.sync {
            job.run_hook("pre-checkout").await?;
            job.checkout().await?;
            job.run_hook("post-checkout").await?;
        }

        self.emit_started(&job).await?;
        let result = match self.handler.run(&mut job).await {
            Ok(()) => "success",
            Err(HandlerError::RetryLater(reason)) => {
                tracing::warn!(action = job.action, "Retry later: {reason}");
                "retry"
            }
            Err(HandlerError::Fatal(e)) => {
                tracing::error!(action = job.action, "Handler failed: {e:?}");
                "fail"
            }
        };

        job.run_hook("pre-publish").await?;
        job.publish(&self.queue, &self.config, result, &self.host).await?;
        job.run_hook("post-publish").await?;
        if result == "success" {
            job.cleanup()?;
        }
        Ok(())
    }

    async fn emit_started(&self, job: &Job) -> Result<()> {
        let mut started = JobMessage::new(Reason::ActionStarted, &job.repo);
        started.refname = Some(job.refname.clone());
        started.prev_sha1 = job.message.prev_sha1.clone();
        started.sha1 = Some(job.sha1.clone());
        started.action = Some(job.action.clone());
        started.start_time = Some(OffsetDateTime::now_utc().unix_timestamp());
        started.host = Some(self.host.clone());
        self.queue
            .put(&self.config.queue.master_queue, &serde_json::to_vec(&started)?, 600)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use golem_core::config::Config;

    use super::*;

    fn config(dir: &std::path::Path) -> Config {
        serde_yaml::from_str(&format!(
            "db:\n  url: \"sqlite::memory:\"\nqueue:\n  url: \"sqlite::memory:\"\n\
             repo_dir: {}\nchem_dir: {}\n\
             workers:\n  script:\n    queues: [golem-build]\n    sync: false\n    checkout: false\n",
            dir.join("repos").display(),
            dir.join("chems").display(),
        ))
        .unwrap()
    }

    fn job_message(extra_json: &str) -> JobMessage {
        let mut message: JobMessage = serde_json::from_str(extra_json).unwrap();
        message.why = Reason::PostReceive;
        message.repo = Some("proj".to_owned());
        message.refname = Some("refs/heads/master".to_owned());
        message.prev_sha1 = Some("a".repeat(40));
        message.sha1 = Some("b".repeat(40));
        message.action = Some("build".to_owned());
        message
    }

    async fn worker(dir: &std::path::Path) -> Worker {
        let queue = JobQueue::in_memory().await.unwrap();
        Worker::new(config(dir), "script", queue, Box::new(ScriptHandler)).unwrap()
    }

    async fn master_message(worker: &mut Worker, why: Reason) -> JobMessage {
        worker.queue.watch("golem-updates");
        loop {
            let job = worker.queue.try_reserve().await.unwrap().expect("no master message");
            worker.queue.delete(&job).await.unwrap();
            let message: JobMessage = serde_json::from_slice(&job.payload).unwrap();
            if message.why == why {
                return message;
            }
        }
    }

    #[tokio::test]
    async fn script_success_publishes_artefacts_and_reports() {
        let dir = tempfile::tempdir().unwrap();
        let mut worker = worker(dir.path()).await;
        let message = job_message(
            r#"{"why": "post-receive",
                "script": [["sh", "-c", "echo output > out.txt"]],
                "publish": ["out.txt"]}"#,
        );
        worker.process(message).await.unwrap();

        let started = master_message(&mut worker, Reason::ActionStarted).await;
        assert_eq!(started.action.as_deref(), Some("build"));
        let done = master_message(&mut worker, Reason::ActionDone).await;
        assert_eq!(done.result.as_deref(), Some("success"));
        assert_eq!(done.host, started.host);
        assert!(done.duration.is_some());

        let artefact = dir
            .path()
            .join("repos/proj/artefacts/build/refs/heads")
            .join(format!("master@{}", "b".repeat(40)))
            .join("out.txt");
        assert_eq!(std::fs::read_to_string(artefact).unwrap().trim(), "output");
        // Successful runs clean their working tree.
        assert!(!dir
            .path()
            .join("repos/proj/work/build/refs/heads")
            .join(format!("master@{}", "b".repeat(40)))
            .exists());
    }

    #[tokio::test]
    async fn tempfail_exit_is_a_retry() {
        let dir = tempfile::tempdir().unwrap();
        let mut worker = worker(dir.path()).await;
        let message = job_message(r#"{"why": "post-receive", "script": [["sh", "-c", "exit 75"]]}"#);
        worker.process(message).await.unwrap();

        let done = master_message(&mut worker, Reason::ActionDone).await;
        assert_eq!(done.result.as_deref(), Some("retry"));
        // The failed tree is kept for inspection.
        assert!(dir
            .path()
            .join("repos/proj/work/build/refs/heads")
            .join(format!("master@{}", "b".repeat(40)))
            .exists());
    }

    #[tokio::test]
    async fn other_failures_are_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let mut worker = worker(dir.path()).await;
        let message = job_message(r#"{"why": "post-receive", "script": [["false"]]}"#);
        worker.process(message).await.unwrap();
        let done = master_message(&mut worker, Reason::ActionDone).await;
        assert_eq!(done.result.as_deref(), Some("fail"));
    }
}
