//! The chem-file registry: one configuration per repository, reloaded when
//! a file's modification time advances.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    time::SystemTime,
};

use anyhow::Result;
use golem_core::repo::RepositoryConfig;

struct LoadedRepo {
    config: RepositoryConfig,
    path: PathBuf,
    mtime: SystemTime,
}

pub struct RepoSet {
    chem_dir: PathBuf,
    repos: BTreeMap<String, LoadedRepo>,
}

impl RepoSet {
    /// Load every chem file under `chem_dir`. A broken file excludes that
    /// repository until it is fixed; the rest load normally.
    pub fn load(chem_dir: &Path) -> Result<Self> {
        let mut set = Self { chem_dir: chem_dir.to_owned(), repos: BTreeMap::new() };
        set.reload()?;
        Ok(set)
    }

    pub fn reload(&mut self) -> Result<()> {
        tracing::info!(dir = %self.chem_dir.display(), "Loading repositories");
        self.repos.clear();
        for entry in std::fs::read_dir(&self.chem_dir)? {
            let path = entry?.path();
            if !path.is_file() {
                continue;
            }
            if let Some(repo) = load_file(&path) {
                self.repos.insert(repo.config.name.clone(), repo);
            }
        }
        Ok(())
    }

    /// Look up a repository, re-reading its chem file first if it changed
    /// on disk. Reload replaces the in-memory object only; persisted rows
    /// are untouched.
    pub fn get(&mut self, name: &str) -> Option<&RepositoryConfig> {
        let stale = self.repos.get(name).is_some_and(|repo| {
            std::fs::metadata(&repo.path)
                .and_then(|m| m.modified())
                .is_ok_and(|mtime| mtime > repo.mtime)
        });
        if stale {
            let path = self.repos[name].path.clone();
            tracing::info!(repo = name, "Configuration changed, reloading");
            match load_file(&path) {
                Some(repo) => {
                    self.repos.insert(repo.config.name.clone(), repo);
                }
                None => {
                    self.repos.remove(name);
                }
            }
        }
        self.repos.get(name).map(|repo| &repo.config)
    }

    pub fn names(&self) -> Vec<String> {
        self.repos.keys().cloned().collect()
    }
}

fn load_file(path: &Path) -> Option<LoadedRepo> {
    let mtime = std::fs::metadata(path).and_then(|m| m.modified()).ok()?;
    match RepositoryConfig::load(path) {
        Ok(config) => Some(LoadedRepo { config, path: path.to_owned(), mtime }),
        Err(e) => {
            tracing::error!(file = %path.display(), "Skipping broken configuration: {e}");
            None
        }
    }
}
