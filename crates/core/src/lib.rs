pub mod config;
pub mod layout;
pub mod matcher;
pub mod message;
pub mod models;
pub mod repo;

use thiserror::Error;

/// Fatal configuration problem. A repository with a broken chem file is
/// excluded from scheduling until the file is fixed.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("repository {repo}: don't know how to fetch reflogs for upstream {upstream}")]
    UnknownUpstream { repo: String, upstream: String },
    #[error("action {0}: no queue specified")]
    MissingQueue(String),
    #[error("action {action}: requires unknown action {requirement}")]
    UnknownRequirement { action: String, requirement: String },
    #[error("dependency cycle involving action {0}")]
    DependencyCycle(String),
    #[error("section [{section}]: inherits unknown section {base}")]
    UnknownInherit { section: String, base: String },
    #[error("{file}:{line}: {message}")]
    Parse { file: String, line: usize, message: String },
    #[error("missing [repo] section or name")]
    MissingRepo,
    #[error("invalid pattern {pattern}: {message}")]
    BadPattern { pattern: String, message: String },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
