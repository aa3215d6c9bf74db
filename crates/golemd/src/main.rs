use std::path::Path;

use anyhow::Result;
use argp::FromArgs;
use golem_core::{
    config::Config,
    message::{JobMessage, Reason},
};
use golem_db::Database;
use golem_queue::JobQueue;
use golem_sched::Scheduler;
use golem_worker::{NotifyHandler, ScriptHandler, Worker};
use tracing_subscriber::{
    EnvFilter, Layer, filter::LevelFilter, layer::SubscriberExt, util::SubscriberInitExt,
};

#[derive(FromArgs, Debug)]
/// Golem: continuous integration for git repositories.
struct TopLevel {
    /// configuration file (default: config.yml)
    #[argp(option, short = 'c', default = "String::from(\"config.yml\")")]
    config: String,
    #[argp(subcommand)]
    command: Command,
}

#[derive(FromArgs, Debug)]
#[argp(subcommand)]
enum Command {
    Daemon(DaemonArgs),
    Worker(WorkerArgs),
    Notifier(NotifierArgs),
    PostReceive(PostReceiveArgs),
    Reschedule(RescheduleArgs),
    Reload(ReloadArgs),
    Quit(QuitArgs),
}

#[derive(FromArgs, Debug)]
/// Run the orchestrator event loop.
#[argp(subcommand, name = "daemon")]
struct DaemonArgs {}

#[derive(FromArgs, Debug)]
/// Run a worker of the named kind.
#[argp(subcommand, name = "worker")]
struct WorkerArgs {
    /// worker kind, as configured under `workers`
    #[argp(positional)]
    kind: String,
}

#[derive(FromArgs, Debug)]
/// Run a notification worker.
#[argp(subcommand, name = "notifier")]
struct NotifierArgs {
    /// worker kind, as configured under `workers`
    #[argp(positional, default = "String::from(\"notifier\")")]
    kind: String,
}

#[derive(FromArgs, Debug)]
/// Announce a push, as a post-receive hook would.
#[argp(subcommand, name = "post-receive")]
struct PostReceiveArgs {
    /// repository name
    #[argp(positional)]
    repo: String,
    /// updated ref; without it every branch and tag is examined
    #[argp(option, arg_name = "ref")]
    refname: Option<String>,
    /// previous sha1 of the ref
    #[argp(option)]
    old: Option<String>,
    /// new sha1 of the ref
    #[argp(option)]
    new: Option<String>,
}

#[derive(FromArgs, Debug)]
/// Reset actions for a commit and schedule them again.
#[argp(subcommand, name = "reschedule")]
struct RescheduleArgs {
    /// repository name
    #[argp(positional)]
    repo: String,
    /// the ref the commit was seen on
    #[argp(option, arg_name = "ref")]
    refname: String,
    /// commit to reschedule; default is the ref's most recent
    #[argp(option)]
    sha1: Option<String>,
    /// action to reset; default is everything in retry status
    #[argp(option)]
    action: Option<String>,
}

#[derive(FromArgs, Debug)]
/// Make the orchestrator re-read its repository configuration.
#[argp(subcommand, name = "reload")]
struct ReloadArgs {}

#[derive(FromArgs, Debug)]
/// Stop the orchestrator (or a worker queue) cleanly.
#[argp(subcommand, name = "quit")]
struct QuitArgs {
    /// queue to send the quit message to; default is the master queue
    #[argp(option)]
    queue: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let env_filter = EnvFilter::builder()
        // Default to info level
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_filter(env_filter))
        .init();

    let args: TopLevel = argp::parse_args_or_exit(argp::DEFAULT);
    let config = Config::load(Path::new(&args.config))?;
    let queue = JobQueue::connect(&config.queue.url).await?;

    match args.command {
        Command::Daemon(_) => {
            let db = Database::new(&config.db).await?;
            let mut scheduler = Scheduler::new(config, db, queue).await?;
            scheduler.run().await
        }
        Command::Worker(args) => {
            let mut worker = Worker::new(config, &args.kind, queue, Box::new(ScriptHandler))?;
            worker.run().await
        }
        Command::Notifier(args) => {
            let mut worker = Worker::new(config, &args.kind, queue, Box::new(NotifyHandler))?;
            worker.run().await
        }
        Command::PostReceive(args) => {
            let mut message = JobMessage::new(Reason::PostReceive, &args.repo);
            message.refname = args.refname;
            message.prev_sha1 = args.old;
            message.sha1 = args.new;
            submit(&queue, &config, message).await
        }
        Command::Reschedule(args) => {
            let mut message = JobMessage::new(Reason::Reschedule, &args.repo);
            message.refname = Some(args.refname);
            message.sha1 = args.sha1;
            message.action = args.action;
            submit(&queue, &config, message).await
        }
        Command::Reload(_) => submit(&queue, &config, JobMessage::control(Reason::Reload)).await,
        Command::Quit(args) => {
            let message = JobMessage::control(Reason::Quit);
            let target = args.queue.unwrap_or_else(|| config.queue.master_queue.clone());
            queue.put(&target, &serde_json::to_vec(&message)?, golem_queue::DEFAULT_TTR).await?;
            Ok(())
        }
    }
}

async fn submit(queue: &JobQueue, config: &Config, message: JobMessage) -> Result<()> {
    queue
        .put(&config.queue.master_queue, &serde_json::to_vec(&message)?, golem_queue::DEFAULT_TTR)
        .await?;
    tracing::info!("Submitted {:?} message", message.why);
    Ok(())
}
