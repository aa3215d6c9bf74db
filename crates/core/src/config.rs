use std::{collections::BTreeMap, fs::File, io::BufReader, path::PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

/// Daemon-level settings, loaded from `config.yml`. Per-repository
/// configuration lives in chem files under `chem_dir` (see [`crate::repo`]).
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub db: DbConfig,
    pub queue: QueueConfig,
    /// Root directory holding mirrors, working trees and artefacts.
    pub repo_dir: PathBuf,
    /// Directory of per-repository chem files.
    pub chem_dir: PathBuf,
    #[serde(default)]
    pub github: Option<GitHubConfig>,
    #[serde(default)]
    pub rsync: RsyncConfig,
    #[serde(default)]
    pub workers: BTreeMap<String, WorkerKindConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DbConfig {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueueConfig {
    pub url: String,
    /// The queue the orchestrator reserves from.
    #[serde(default = "default_master_queue")]
    pub master_queue: String,
}

fn default_master_queue() -> String { "golem-updates".to_owned() }

#[derive(Debug, Clone, Deserialize)]
pub struct GitHubConfig {
    pub token: String,
}

/// Shared transfer settings for worker sync and artefact publication.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RsyncConfig {
    /// Shared root all workers sync mirrors from and publish artefacts to.
    pub root: Option<String>,
    /// Reference copy to hard-link against (`--link-dest`).
    pub hardlink: Option<PathBuf>,
    pub password_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WorkerKindConfig {
    /// Queues this worker kind reserves from.
    pub queues: Vec<String>,
    #[serde(default = "default_true")]
    pub sync: bool,
    #[serde(default = "default_true")]
    pub checkout: bool,
}

fn default_true() -> bool { true }

impl Config {
    pub fn load(path: &std::path::Path) -> Result<Self> {
        let file = BufReader::new(
            File::open(path).with_context(|| format!("Failed to open {}", path.display()))?,
        );
        serde_yaml::from_reader(file)
            .with_context(|| format!("Failed to parse {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_parses() {
        let config: Config = serde_yaml::from_str(
            r#"
db:
  url: sqlite://golem.db
queue:
  url: sqlite://queue.db
repo_dir: /srv/golem/repos
chem_dir: /etc/golem/chems
workers:
  external:
    queues: [golem-build]
    checkout: false
"#,
        )
        .unwrap();
        assert_eq!(config.queue.master_queue, "golem-updates");
        let worker = &config.workers["external"];
        assert!(worker.sync);
        assert!(!worker.checkout);
    }
}
