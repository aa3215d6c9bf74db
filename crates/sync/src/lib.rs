//! Reflog synchronization: bring a mirror's ref-update history in line
//! with upstream reality.
//!
//! `file` and `ssh` upstreams expose their own `logs/` directory and are
//! transferred verbatim. `http` upstreams serve per-branch log files.
//! Hosted upstreams have no authoritative log at all; an approximation is
//! reconstructed from the service's bounded event feed.
//!
//! Any failure here aborts the repository's sync cycle; the orchestrator
//! logs it and carries on with other repositories, retrying next cycle.

use golem_core::{
    layout::{RepoLayout, reflog_path},
    repo::{ReflogSource, RepositoryConfig},
};
use golem_git::{mirror::update_mirror, reflog, refs};
use golem_github::GitHub;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("fetching reflog for {refname}: HTTP {status}")]
    HttpStatus { refname: String, status: u16 },
    // Field deliberately not named `source`: thiserror reserves that name
    // for the error-source chain.
    #[error("rsync {src} -> {dest} failed: {detail}")]
    Transfer { src: String, dest: String, detail: String },
    #[error("no GitHub client configured for {0}")]
    NoGitHub(String),
    #[error("cannot derive owner/repo from upstream {0}")]
    BadGitHubUpstream(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Update the mirror from upstream and synchronize its reflogs.
pub async fn update_repository(
    config: &RepositoryConfig,
    layout: &RepoLayout,
    github: Option<&GitHub>,
    http: &reqwest::Client,
) -> Result<(), SyncError> {
    tracing::info!(repo = config.name, "Processing update");
    let mirror = layout.mirror_path();
    update_mirror(&mirror, &config.upstream, &config.remotes).await?;

    match &config.source {
        ReflogSource::File { upstream_path } => {
            let source = format!("{}/logs/", upstream_path.trim_end_matches('/'));
            rsync(&source, &mirror.join("logs").display().to_string(), &[]).await?;
        }
        ReflogSource::Ssh => {
            let source = format!("{}/logs/", config.upstream.trim_end_matches('/'));
            rsync(&source, &mirror.join("logs").display().to_string(), &[]).await?;
        }
        ReflogSource::Http { url } => {
            for (refname, _) in refs::branch_heads(&mirror).await? {
                let Some(branch) = refname.strip_prefix("refs/heads/") else { continue };
                let response = http
                    .get(format!("{url}/logs/refs/heads/{branch}"))
                    .send()
                    .await
                    .map_err(anyhow::Error::from)?;
                if response.status().as_u16() != 200 {
                    return Err(SyncError::HttpStatus {
                        refname,
                        status: response.status().as_u16(),
                    });
                }
                let body = response.text().await.map_err(anyhow::Error::from)?;
                let path = reflog_path(&mirror, &refname);
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent).map_err(anyhow::Error::from)?;
                }
                std::fs::write(&path, body).map_err(anyhow::Error::from)?;
            }
        }
        ReflogSource::Github => {
            let github =
                github.ok_or_else(|| SyncError::NoGitHub(config.name.clone()))?;
            let (owner, repo) = golem_github::owner_repo(&config.upstream)
                .ok_or_else(|| SyncError::BadGitHubUpstream(config.upstream.clone()))?;
            let events = github.push_events(&owner, &repo).await?;
            let logs = golem_github::reconstruct_reflogs(&events, |refname| {
                reflog::read_log(&reflog_path(&mirror, refname))
            })?;
            for (refname, entries) in &logs {
                reflog::write_log(&reflog_path(&mirror, refname), entries)?;
            }
        }
    }
    Ok(())
}

/// Archive-mode rsync, as used for log transfer, mirror sync and artefact
/// publication.
pub async fn rsync(source: &str, dest: &str, extra: &[String]) -> Result<(), SyncError> {
    tracing::info!(source, dest, "Syncing");
    let output = tokio::process::Command::new("rsync")
        .arg("-a")
        .args(extra)
        .arg(source)
        .arg(dest)
        .output()
        .await
        .map_err(anyhow::Error::from)?;
    if !output.status.success() {
        return Err(SyncError::Transfer {
            src: source.to_owned(),
            dest: dest.to_owned(),
            detail: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transfer_failure_names_both_endpoints() {
        let err = SyncError::Transfer {
            src: "host:/srv/git/proj.git/logs/".to_owned(),
            dest: "/srv/golem/proj/proj.git/logs".to_owned(),
            detail: "connection refused".to_owned(),
        };
        assert_eq!(
            err.to_string(),
            "rsync host:/srv/git/proj.git/logs/ -> /srv/golem/proj/proj.git/logs failed: \
             connection refused"
        );
    }
}
