//! Bare mirror creation and fetching.

use std::{collections::BTreeMap, path::Path};

use anyhow::{Context, Result};

use crate::{Git, mirror_git};

/// Clone or update the bare mirror at `mirror` from `upstream`, then bring
/// any extra remotes into line and fetch them.
///
/// Reflogs in the mirror are written by the synchronizer from upstream
/// history, so git's own ref-update logging is disabled at clone time.
pub async fn update_mirror(
    mirror: &Path,
    upstream: &str,
    remotes: &BTreeMap<String, String>,
) -> Result<()> {
    if !mirror.exists() {
        let parent = mirror.parent().context("mirror path has no parent")?;
        std::fs::create_dir_all(parent)?;
        let name = mirror
            .file_name()
            .and_then(|n| n.to_str())
            .context("mirror path has no file name")?;
        tracing::info!(upstream, "Cloning mirror");
        Git::new(parent).run(&["clone", "--mirror", upstream, name]).await?;
        mirror_git(mirror, &["config", "core.logallrefupdates", "false"]).await?;
    } else {
        let current = mirror_git(mirror, &["config", "remote.origin.url"]).await?;
        if current.trim() != upstream {
            tracing::warn!(upstream, "Updating origin url");
            mirror_git(mirror, &["config", "remote.origin.url", upstream]).await?;
        }
        tracing::info!(upstream, "Fetching origin");
        mirror_git(mirror, &["fetch", "origin"]).await?;
    }

    if !remotes.is_empty() {
        let known = mirror_git(mirror, &["remote"]).await?;
        let known: Vec<&str> = known.split_whitespace().collect();
        for (remote, url) in remotes {
            if !known.contains(&remote.as_str()) {
                mirror_git(mirror, &["remote", "add", remote, url]).await?;
            } else {
                let current =
                    mirror_git(mirror, &["config", &format!("remote.{remote}.url")]).await?;
                if current.trim() != url {
                    tracing::warn!(remote, url, "Updating remote url");
                    mirror_git(mirror, &["config", &format!("remote.{remote}.url"), url]).await?;
                }
            }
            tracing::info!(remote, "Fetching remote");
            mirror_git(mirror, &["fetch", remote]).await?;
        }
    }
    Ok(())
}
