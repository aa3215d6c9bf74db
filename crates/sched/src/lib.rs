//! The orchestrator: a single-threaded event loop reserving jobs from the
//! master queue and turning them into state-store transitions and
//! dispatched worker jobs.
//!
//! Events are processed strictly one at a time, so every store transition
//! is race-free beyond the per-row guards in `golem_db`. A failed event is
//! buried for inspection and the loop moves on; nothing here takes the
//! orchestrator down short of losing the store itself.

pub mod artefacts;
pub mod plan;
pub mod repos;

use std::collections::{BTreeMap, BTreeSet};

use anyhow::{Context, Result, bail};
use golem_core::{
    config::Config,
    layout::{RepoLayout, reflog_path},
    message::{JobMessage, Reason},
    models::{ActionStatus, CommitStatus},
    repo::{ActionConfig, RepositoryConfig},
};
use golem_db::Database;
use golem_git::{refs, refs::TagInfo, reflog};
use golem_github::GitHub;
use golem_queue::JobQueue;
use time::OffsetDateTime;

use crate::repos::RepoSet;

/// Ref events discovered for one post-receive cycle.
#[derive(Debug, Default)]
pub struct DiscoveredEvents {
    /// Per branch ref, (old, new) push pairs oldest first.
    pub branches: BTreeMap<String, Vec<(Option<String>, String)>>,
    pub tags: Vec<TagInfo>,
}

pub struct Scheduler {
    config: Config,
    db: Database,
    queue: JobQueue,
    repos: RepoSet,
    github: Option<GitHub>,
    http: reqwest::Client,
}

impl Scheduler {
    pub async fn new(config: Config, db: Database, mut queue: JobQueue) -> Result<Self> {
        queue.watch(&config.queue.master_queue);
        let repos = RepoSet::load(&config.chem_dir)?;
        let github = match &config.github {
            Some(github) => Some(GitHub::new(Some(&github.token))?),
            None => None,
        };
        Ok(Self { config, db, queue, repos, github, http: reqwest::Client::new() })
    }

    /// Reserve and process events until a quit message arrives.
    pub async fn run(&mut self) -> Result<()> {
        loop {
            tracing::info!("Waiting for update");
            let job = self.queue.reserve_with_retry().await?;
            let message: JobMessage = match serde_json::from_slice(&job.payload) {
                Ok(message) => message,
                Err(e) => {
                    tracing::warn!("Burying job with invalid payload: {e}");
                    self.queue.bury(&job).await?;
                    continue;
                }
            };
            if message.why == Reason::Quit {
                tracing::info!("Exiting");
                self.queue.delete(&job).await?;
                return Ok(());
            }
            match self.handle(&message).await {
                Ok(()) => self.queue.delete(&job).await?,
                Err(e) => {
                    tracing::error!("Failed to process {:?} event: {e:?}", message.why);
                    self.queue.bury(&job).await?;
                }
            }
        }
    }

    pub async fn handle(&mut self, message: &JobMessage) -> Result<()> {
        match message.why {
            Reason::Quit => Ok(()),
            Reason::Reload => self.repos.reload(),
            Reason::PostReceive => self.post_receive(message).await,
            Reason::ActionStarted => self.action_started(message).await,
            Reason::ActionDone => self.action_done(message).await,
            Reason::Reschedule => self.reschedule(message).await,
        }
    }

    /// The repository a message refers to. A missing field is a malformed
    /// payload; an unknown repository is merely ignored.
    fn repo_config(&mut self, message: &JobMessage) -> Result<Option<RepositoryConfig>> {
        let name = message.repo.as_deref().context("message without repo")?;
        let config = self.repos.get(name).cloned();
        if config.is_none() {
            tracing::warn!("Ignoring update for unknown repository {name}");
        }
        Ok(config)
    }

    fn layout(&self, repo: &RepositoryConfig) -> RepoLayout {
        RepoLayout::new(&self.config.repo_dir, &repo.name)
    }

    async fn post_receive(&mut self, message: &JobMessage) -> Result<()> {
        let Some(repo) = self.repo_config(message)? else { return Ok(()) };
        let layout = self.layout(&repo);
        if let Err(e) =
            golem_sync::update_repository(&repo, &layout, self.github.as_ref(), &self.http).await
        {
            // Not fatal to the loop; the next update retries the sync.
            tracing::error!(repo = repo.name, "Sync failed: {e}");
            return Ok(());
        }
        let events = self.discover(&layout, message).await?;
        self.apply(&repo, &layout, &events).await
    }

    /// Turn one post-receive message into concrete ref events. With an
    /// explicit ref the message carries the pair itself; otherwise every
    /// branch's update log and every tag is considered.
    async fn discover(
        &self,
        layout: &RepoLayout,
        message: &JobMessage,
    ) -> Result<DiscoveredEvents> {
        let mut events = DiscoveredEvents::default();
        if let Some(refname) = message.refname.as_deref() {
            let sha1 = message.sha1.clone().context("post-receive with ref but no sha1")?;
            if refname.starts_with("refs/heads/") {
                events
                    .branches
                    .insert(refname.to_owned(), vec![(message.prev_sha1.clone(), sha1)]);
            } else if refname.starts_with("refs/tags/") {
                events.tags.push(TagInfo {
                    refname: refname.to_owned(),
                    sha1,
                    timestamp: OffsetDateTime::now_utc().unix_timestamp(),
                });
            }
            return Ok(events);
        }

        let mirror = layout.mirror_path();
        for (refname, _) in refs::branch_heads(&mirror).await? {
            let log = reflog::read_log(&reflog_path(&mirror, &refname))?;
            let pairs = log
                .iter()
                .map(|entry| (Some(entry.old_sha1.clone()), entry.new_sha1.clone()))
                .collect();
            events.branches.insert(refname, pairs);
        }
        events.tags = refs::tags(&mirror).await?;
        Ok(events)
    }

    /// Match discovered events against every action and schedule whatever
    /// becomes eligible.
    async fn apply(
        &self,
        repo: &RepositoryConfig,
        layout: &RepoLayout,
        events: &DiscoveredEvents,
    ) -> Result<()> {
        for action in repo.actions.values() {
            for (refname, pairs) in &events.branches {
                if !plan::ref_matches(action, refname) {
                    continue;
                }
                for (prev, sha1) in plan::backlog_window(pairs, action.backlog) {
                    self.consider(repo, layout, action, refname, prev.as_deref(), sha1).await?;
                }
            }
            for tag in plan::matching_tags(action, &events.tags) {
                self.consider(repo, layout, action, &tag.refname, None, &tag.sha1).await?;
            }
        }
        Ok(())
    }

    /// Schedule one (action, ref, commit) candidate if it is eligible. The
    /// `new -> scheduled` store guard makes this safe to call any number of
    /// times for the same candidate: at most one job is ever enqueued.
    async fn consider(
        &self,
        repo: &RepositoryConfig,
        layout: &RepoLayout,
        action: &ActionConfig,
        refname: &str,
        prev_sha1: Option<&str>,
        sha1: &str,
    ) -> Result<()> {
        let repo_id = self.db.ensure_repository(&repo.name).await?;
        let commit = self.db.ensure_commit(repo_id, refname, sha1, prev_sha1).await?;
        let run = self.db.ensure_action_run(commit.id, &action.name).await?;
        for requirement in &action.requires {
            let satisfied = self
                .db
                .find_action_run(commit.id, requirement)
                .await?
                .is_some_and(|run| run.status == ActionStatus::Success);
            if !satisfied {
                // Re-checked when the requirement's action-done arrives.
                return Ok(());
            }
        }
        if !self.db.try_schedule(run.id).await? {
            return Ok(());
        }
        self.db.mark_commit_in_progress(commit.id).await?;
        std::fs::create_dir_all(layout.artefact_dir(&action.name, refname, sha1))?;

        let mut job = JobMessage::new(Reason::PostReceive, &repo.name);
        job.refname = Some(refname.to_owned());
        job.prev_sha1 = prev_sha1.map(str::to_owned);
        job.sha1 = Some(sha1.to_owned());
        job.action = Some(action.name.clone());
        job.extra = action.payload();
        tracing::info!(repo = repo.name, action = action.name, refname, sha1, "Scheduling");
        self.queue.put(&action.queue, &serde_json::to_vec(&job)?, u64::from(action.ttr)).await?;
        Ok(())
    }

    async fn action_started(&mut self, message: &JobMessage) -> Result<()> {
        let Some(repo) = self.repo_config(message)? else { return Ok(()) };
        let (refname, sha1, action) = event_key(message)?;
        let repo_id = self.db.ensure_repository(&repo.name).await?;
        let commit =
            self.db.ensure_commit(repo_id, refname, sha1, message.prev_sha1.as_deref()).await?;
        self.db.ensure_action_run(commit.id, action).await?;
        self.db
            .record_action_started(commit.id, action, message.start_time, message.host.as_deref())
            .await
    }

    async fn action_done(&mut self, message: &JobMessage) -> Result<()> {
        let Some(repo) = self.repo_config(message)? else { return Ok(()) };
        let layout = self.layout(&repo);
        let (refname, sha1, action) = event_key(message)?;
        let status = match message.result.as_deref() {
            Some("success") => ActionStatus::Success,
            Some("retry") => ActionStatus::Retry,
            Some("fail") => ActionStatus::Fail,
            other => bail!("action-done with unusable result {other:?}"),
        };

        let repo_id = self.db.ensure_repository(&repo.name).await?;
        let commit =
            self.db.ensure_commit(repo_id, refname, sha1, message.prev_sha1.as_deref()).await?;
        let run = self.db.ensure_action_run(commit.id, action).await?;
        self.db
            .record_action_done(
                commit.id,
                action,
                status,
                message.start_time,
                message.end_time,
                message.duration,
                message.host.as_deref(),
            )
            .await?;
        for (filename, hash) in artefacts::walk(&layout.artefact_dir(action, refname, sha1))? {
            self.db.upsert_artefact(run.id, &filename, &hash).await?;
        }

        match status {
            ActionStatus::Fail => self.db.set_commit_status(commit.id, CommitStatus::Fail).await?,
            ActionStatus::Success => {
                if !self.db.has_unfinished_actions(commit.id).await? {
                    self.db.set_commit_status(commit.id, CommitStatus::Success).await?;
                }
            }
            _ => {}
        }

        for notifier in repo.notifiers.values().filter(|n| n.handles(action)) {
            let mut note = message.clone();
            for (key, value) in &notifier.extra {
                note.extra.insert(key.clone(), value.clone());
            }
            tracing::info!(notifier = notifier.name, action, "Dispatching notification");
            self.queue.put(&notifier.queue, &serde_json::to_vec(&note)?, 600).await?;
        }

        if status == ActionStatus::Success {
            // Actions gated on this one may have become eligible.
            for dependent in repo.actions.values() {
                if dependent.requires.iter().any(|r| r == action)
                    && plan::ref_matches(dependent, refname)
                {
                    self.consider(
                        &repo,
                        &layout,
                        dependent,
                        refname,
                        message.prev_sha1.as_deref(),
                        sha1,
                    )
                    .await?;
                }
            }
        }
        Ok(())
    }

    /// Reset an action (or everything sitting in `retry`) and its
    /// transitive dependents for one commit, then re-run the scheduling
    /// pass over them.
    async fn reschedule(&mut self, message: &JobMessage) -> Result<()> {
        let Some(repo) = self.repo_config(message)? else { return Ok(()) };
        let layout = self.layout(&repo);
        let refname = message.refname.as_deref().context("reschedule without ref")?;
        let repo_id = self.db.ensure_repository(&repo.name).await?;
        let commit = match message.sha1.as_deref() {
            Some(sha1) => self.db.find_commit(repo_id, refname, sha1).await?,
            None => self.db.latest_commit_for_ref(repo_id, refname).await?,
        };
        let Some(commit) = commit else {
            tracing::warn!(repo = repo.name, refname, "Nothing to reschedule");
            return Ok(());
        };

        let roots: Vec<String> = match message.action.clone() {
            Some(action) => {
                if !repo.actions.contains_key(&action) {
                    bail!("reschedule for unknown action {action}");
                }
                vec![action]
            }
            None => self.db.runs_with_status(commit.id, ActionStatus::Retry).await?,
        };
        let mut targets: BTreeSet<String> = roots.iter().cloned().collect();
        for root in &roots {
            targets.extend(plan::dependents(&repo.actions, root));
        }

        for name in &targets {
            tracing::info!(repo = repo.name, action = name, sha1 = commit.sha1, "Resetting");
            self.db.reset_action_run(commit.id, name).await?;
            let dir = layout.artefact_dir(name, refname, &commit.sha1);
            if dir.exists() {
                std::fs::remove_dir_all(&dir)?;
            }
        }
        if commit.status == CommitStatus::Fail {
            self.db.set_commit_status(commit.id, CommitStatus::New).await?;
        }
        for name in &targets {
            if let Some(action) = repo.actions.get(name) {
                self.consider(
                    &repo,
                    &layout,
                    action,
                    refname,
                    commit.prev_sha1.as_deref(),
                    &commit.sha1,
                )
                .await?;
            }
        }
        Ok(())
    }
}

fn event_key(message: &JobMessage) -> Result<(&str, &str, &str)> {
    Ok((
        message.refname.as_deref().context("message without ref")?,
        message.sha1.as_deref().context("message without sha1")?,
        message.action.as_deref().context("message without action")?,
    ))
}

#[cfg(test)]
mod tests {
    use golem_core::models::CommitStatus;

    use super::*;

    const OLD: &str = "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
    const NEW: &str = "bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";
    const MASTER: &str = "refs/heads/master";

    async fn scheduler(chem: &str) -> (Scheduler, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let chem_dir = dir.path().join("chems");
        std::fs::create_dir_all(&chem_dir).unwrap();
        std::fs::write(chem_dir.join("proj.chem"), chem).unwrap();
        let repo_dir = dir.path().join("repos");
        std::fs::create_dir_all(&repo_dir).unwrap();
        let config: Config = serde_yaml::from_str(&format!(
            "db:\n  url: \"sqlite::memory:\"\nqueue:\n  url: \"sqlite::memory:\"\n\
             repo_dir: {}\nchem_dir: {}\n",
            repo_dir.display(),
            chem_dir.display(),
        ))
        .unwrap();
        let db = Database::in_memory().await.unwrap();
        let queue = JobQueue::in_memory().await.unwrap();
        let sched = Scheduler::new(config, db, queue).await.unwrap();
        (sched, dir)
    }

    fn branch_events(pairs: &[(&str, &str)]) -> DiscoveredEvents {
        let mut events = DiscoveredEvents::default();
        events.branches.insert(
            MASTER.to_owned(),
            pairs.iter().map(|(old, new)| (Some((*old).to_owned()), (*new).to_owned())).collect(),
        );
        events
    }

    fn done(action: &str, result: &str) -> JobMessage {
        let mut message = JobMessage::new(Reason::ActionDone, "proj");
        message.refname = Some(MASTER.to_owned());
        message.prev_sha1 = Some(OLD.to_owned());
        message.sha1 = Some(NEW.to_owned());
        message.action = Some(action.to_owned());
        message.result = Some(result.to_owned());
        message
    }

    /// Drain the next job destined for `queue`; jobs on other watched
    /// queues are discarded along the way.
    async fn reserve_job(sched: &mut Scheduler, queue: &str) -> Option<JobMessage> {
        sched.queue.watch(queue);
        loop {
            let job = sched.queue.try_reserve().await.unwrap()?;
            sched.queue.delete(&job).await.unwrap();
            if job.queue == queue {
                return Some(serde_json::from_slice(&job.payload).unwrap());
            }
        }
    }

    const SIMPLE: &str = "[repo]\nname = proj\nupstream = /srv/git/proj.git\n\
                          [action:build]\nqueue = golem-build\nbranches = master\n";

    #[tokio::test]
    async fn post_receive_schedules_exactly_once() {
        let (mut sched, _dir) = scheduler(SIMPLE).await;
        let repo = sched.repos.get("proj").cloned().unwrap();
        let layout = sched.layout(&repo);
        let events = branch_events(&[(OLD, NEW)]);

        sched.apply(&repo, &layout, &events).await.unwrap();
        // Redelivered event: the schedule guard has already fired.
        sched.apply(&repo, &layout, &events).await.unwrap();

        let job = reserve_job(&mut sched, "golem-build").await.unwrap();
        assert_eq!(job.action.as_deref(), Some("build"));
        assert_eq!(job.refname.as_deref(), Some(MASTER));
        assert_eq!(job.prev_sha1.as_deref(), Some(OLD));
        assert_eq!(job.sha1.as_deref(), Some(NEW));
        assert!(reserve_job(&mut sched, "golem-build").await.is_none());

        let repo_id = sched.db.ensure_repository("proj").await.unwrap();
        let commit = sched.db.find_commit(repo_id, MASTER, NEW).await.unwrap().unwrap();
        assert_eq!(commit.status, CommitStatus::InProgress);
        let run = sched.db.find_action_run(commit.id, "build").await.unwrap().unwrap();
        assert_eq!(run.status, ActionStatus::Scheduled);
        assert!(layout.artefact_dir("build", MASTER, NEW).is_dir());
    }

    #[tokio::test]
    async fn backlog_caps_the_scheduled_window() {
        let chem = "[repo]\nname = proj\nupstream = /srv/git/proj.git\n\
                    [action:build]\nqueue = golem-build\nbranches = master\nbacklog = 1\n";
        let (mut sched, _dir) = scheduler(chem).await;
        let repo = sched.repos.get("proj").cloned().unwrap();
        let layout = sched.layout(&repo);
        let shas: Vec<String> = "cdefg".chars().map(|c| c.to_string().repeat(40)).collect();
        let pairs: Vec<(&str, &str)> =
            shas.windows(2).map(|w| (w[0].as_str(), w[1].as_str())).collect();

        sched.apply(&repo, &layout, &branch_events(&pairs)).await.unwrap();

        // backlog 1: only the last two pairs become jobs.
        let first = reserve_job(&mut sched, "golem-build").await.unwrap();
        let second = reserve_job(&mut sched, "golem-build").await.unwrap();
        assert_eq!(first.sha1.as_deref(), Some(shas[3].as_str()));
        assert_eq!(second.sha1.as_deref(), Some(shas[4].as_str()));
        assert!(reserve_job(&mut sched, "golem-build").await.is_none());
    }

    const CHAIN: &str = "[repo]\nname = proj\nupstream = /srv/git/proj.git\n\
                         [action:build]\nqueue = golem-build\nbranches = master\n\
                         [action:package]\nqueue = golem-package\nrequires = build\n";

    #[tokio::test]
    async fn requires_gates_until_the_dependency_succeeds() {
        let (mut sched, _dir) = scheduler(CHAIN).await;
        let repo = sched.repos.get("proj").cloned().unwrap();
        let layout = sched.layout(&repo);

        sched.apply(&repo, &layout, &branch_events(&[(OLD, NEW)])).await.unwrap();
        assert!(reserve_job(&mut sched, "golem-build").await.is_some());
        assert!(reserve_job(&mut sched, "golem-package").await.is_none());

        sched.handle(&done("build", "success")).await.unwrap();
        let job = reserve_job(&mut sched, "golem-package").await.unwrap();
        assert_eq!(job.action.as_deref(), Some("package"));
    }

    #[tokio::test]
    async fn failed_action_fails_the_commit() {
        let (mut sched, _dir) = scheduler(SIMPLE).await;
        let repo = sched.repos.get("proj").cloned().unwrap();
        let layout = sched.layout(&repo);
        sched.apply(&repo, &layout, &branch_events(&[(OLD, NEW)])).await.unwrap();

        sched.handle(&done("build", "fail")).await.unwrap();
        let repo_id = sched.db.ensure_repository("proj").await.unwrap();
        let commit = sched.db.find_commit(repo_id, MASTER, NEW).await.unwrap().unwrap();
        assert_eq!(commit.status, CommitStatus::Fail);
    }

    #[tokio::test]
    async fn commit_succeeds_once_every_action_does() {
        let (mut sched, _dir) = scheduler(CHAIN).await;
        let repo = sched.repos.get("proj").cloned().unwrap();
        let layout = sched.layout(&repo);
        sched.apply(&repo, &layout, &branch_events(&[(OLD, NEW)])).await.unwrap();

        sched.handle(&done("build", "success")).await.unwrap();
        let repo_id = sched.db.ensure_repository("proj").await.unwrap();
        let commit = sched.db.find_commit(repo_id, MASTER, NEW).await.unwrap().unwrap();
        assert_eq!(commit.status, CommitStatus::InProgress);

        sched.handle(&done("package", "success")).await.unwrap();
        let commit = sched.db.find_commit(repo_id, MASTER, NEW).await.unwrap().unwrap();
        assert_eq!(commit.status, CommitStatus::Success);
    }

    #[tokio::test]
    async fn action_done_records_artefacts() {
        let (mut sched, _dir) = scheduler(SIMPLE).await;
        let repo = sched.repos.get("proj").cloned().unwrap();
        let layout = sched.layout(&repo);
        sched.apply(&repo, &layout, &branch_events(&[(OLD, NEW)])).await.unwrap();

        let dir = layout.artefact_dir("build", MASTER, NEW);
        std::fs::write(dir.join("out.tar.gz"), "payload").unwrap();
        std::fs::write(dir.join("log"), "noise").unwrap();
        sched.handle(&done("build", "success")).await.unwrap();

        let repo_id = sched.db.ensure_repository("proj").await.unwrap();
        let commit = sched.db.find_commit(repo_id, MASTER, NEW).await.unwrap().unwrap();
        let run = sched.db.find_action_run(commit.id, "build").await.unwrap().unwrap();
        let artefacts = sched.db.artefacts_for_action(run.id).await.unwrap();
        assert_eq!(artefacts.len(), 1);
        assert_eq!(artefacts[0].filename, "out.tar.gz");
    }

    #[tokio::test]
    async fn tag_events_schedule_matching_actions_only() {
        let chem = "[repo]\nname = proj\nupstream = /srv/git/proj.git\n\
                    [action:release]\nqueue = golem-release\ntags = ^release-.*\n";
        let (mut sched, _dir) = scheduler(chem).await;
        let repo = sched.repos.get("proj").cloned().unwrap();
        let layout = sched.layout(&repo);
        let mut events = DiscoveredEvents::default();
        events.tags = vec![
            TagInfo { refname: "refs/tags/release-1.0".to_owned(), sha1: NEW.to_owned(), timestamp: 100 },
            TagInfo { refname: "refs/tags/beta-1.0".to_owned(), sha1: OLD.to_owned(), timestamp: 200 },
        ];

        sched.apply(&repo, &layout, &events).await.unwrap();
        let job = reserve_job(&mut sched, "golem-release").await.unwrap();
        assert_eq!(job.refname.as_deref(), Some("refs/tags/release-1.0"));
        assert!(reserve_job(&mut sched, "golem-release").await.is_none());
    }

    #[tokio::test]
    async fn reschedule_resets_retries_and_their_dependents() {
        let chem = "[repo]\nname = proj\nupstream = /srv/git/proj.git\n\
                    [action:build]\nqueue = golem-build\nbranches = master\n\
                    [action:package]\nqueue = golem-package\nrequires = build\n\
                    [action:upload]\nqueue = golem-upload\nrequires = package\n";
        let (mut sched, _dir) = scheduler(chem).await;
        let repo = sched.repos.get("proj").cloned().unwrap();
        let layout = sched.layout(&repo);
        sched.apply(&repo, &layout, &branch_events(&[(OLD, NEW)])).await.unwrap();
        sched.handle(&done("build", "success")).await.unwrap();
        sched.handle(&done("package", "retry")).await.unwrap();

        let repo_id = sched.db.ensure_repository("proj").await.unwrap();
        let commit = sched.db.find_commit(repo_id, MASTER, NEW).await.unwrap().unwrap();
        let stale = layout.artefact_dir("package", MASTER, NEW);
        std::fs::write(stale.join("half-finished"), "junk").unwrap();

        let mut message = JobMessage::new(Reason::Reschedule, "proj");
        message.refname = Some(MASTER.to_owned());
        sched.handle(&message).await.unwrap();

        // build is untouched, package was reset and immediately rescheduled,
        // upload is reset but still gated on package.
        let build = sched.db.find_action_run(commit.id, "build").await.unwrap().unwrap();
        assert_eq!(build.status, ActionStatus::Success);
        let package = sched.db.find_action_run(commit.id, "package").await.unwrap().unwrap();
        assert_eq!(package.status, ActionStatus::Scheduled);
        let upload = sched.db.find_action_run(commit.id, "upload").await.unwrap().unwrap();
        assert_eq!(upload.status, ActionStatus::New);
        assert!(!stale.join("half-finished").exists());
        assert!(reserve_job(&mut sched, "golem-package").await.is_some());
        assert!(reserve_job(&mut sched, "golem-upload").await.is_none());
    }

    #[tokio::test]
    async fn notifier_dispatch_follows_process_patterns() {
        let chem = "[repo]\nname = proj\nupstream = /srv/git/proj.git\n\
                    [action:build]\nqueue = golem-build\nbranches = master\n\
                    [notify:mail]\nqueue = golem-notify\nprocess = action:build\n\
                    [notify:irc]\nqueue = golem-irc\nprocess = action:docs\n";
        let (mut sched, _dir) = scheduler(chem).await;
        let repo = sched.repos.get("proj").cloned().unwrap();
        let layout = sched.layout(&repo);
        sched.apply(&repo, &layout, &branch_events(&[(OLD, NEW)])).await.unwrap();

        sched.handle(&done("build", "success")).await.unwrap();
        let note = reserve_job(&mut sched, "golem-notify").await.unwrap();
        assert_eq!(note.action.as_deref(), Some("build"));
        assert_eq!(note.result.as_deref(), Some("success"));
        assert!(reserve_job(&mut sched, "golem-irc").await.is_none());
    }
}
