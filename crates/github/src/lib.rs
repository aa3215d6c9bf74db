//! GitHub event access and reflog reconstruction.
//!
//! GitHub keeps no authoritative reflog, so history is approximated from
//! the repository's event feed: recent push events become reflog entries,
//! merged with whatever was reconstructed on a previous pass. The feed is
//! bounded, so events older than its retention window are lost unless a
//! previous pass already captured them.

use std::{
    collections::{BTreeMap, HashSet},
    time::Duration,
};

use anyhow::{Context, Result};
use golem_git::reflog::ReflogEntry;
use octocrab::Octocrab;
use serde::Deserialize;
use time::{OffsetDateTime, format_description::well_known::Rfc3339};

/// Placeholder for the old sha1 of push events predating GitHub recording a
/// `before` field.
pub const BOGUS_SHA1: &str = "1111111111111111111111111111111111111111";

/// How many events to pull from the feed per sync, at most.
const EVENT_LIMIT: usize = 300;

/// A push event from the feed, newest first in API order.
#[derive(Debug, Clone)]
pub struct PushEvent {
    /// Full ref name, `refs/heads/...`.
    pub refname: String,
    pub before: Option<String>,
    pub head: String,
    /// Actor login plus display name, if the profile has one.
    pub actor: String,
    pub actor_name: Option<String>,
    pub timestamp: i64,
}

#[derive(Debug, Deserialize)]
struct RawEvent {
    #[serde(rename = "type")]
    kind: String,
    actor: RawActor,
    payload: RawPayload,
    created_at: String,
}

#[derive(Debug, Deserialize)]
struct RawActor {
    login: String,
}

#[derive(Debug, Default, Deserialize)]
struct RawPayload {
    #[serde(rename = "ref")]
    refname: Option<String>,
    before: Option<String>,
    head: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawUser {
    name: Option<String>,
}

#[derive(Clone)]
pub struct GitHub {
    client: Octocrab,
    // Display names rarely change; cache lookups across sync cycles.
    user_names: moka::future::Cache<String, Option<String>>,
}

impl GitHub {
    pub fn new(token: Option<&str>) -> Result<Self> {
        let client = match token {
            Some(token) => Octocrab::builder().personal_token(token.to_owned()).build(),
            None => Octocrab::builder().build(),
        }
        .context("Failed to build GitHub client")?;
        let user_names = moka::future::Cache::builder()
            .max_capacity(1000)
            .time_to_live(Duration::from_secs(60 * 60))
            .build();
        Ok(Self { client, user_names })
    }

    /// Recent push events for a repository, newest first.
    pub async fn push_events(&self, owner: &str, repo: &str) -> Result<Vec<PushEvent>> {
        let mut events = Vec::new();
        let mut fetched = 0;
        for page in 1.. {
            let route = format!("/repos/{owner}/{repo}/events?per_page=100&page={page}");
            let raw: Vec<RawEvent> = self
                .client
                .get(&route, None::<&()>)
                .await
                .with_context(|| format!("Failed to fetch events for {owner}/{repo}"))?;
            let page_len = raw.len();
            fetched += page_len;
            for event in raw {
                if event.kind != "PushEvent" {
                    continue;
                }
                let (Some(refname), Some(head)) = (event.payload.refname, event.payload.head)
                else {
                    continue;
                };
                let timestamp = OffsetDateTime::parse(&event.created_at, &Rfc3339)
                    .with_context(|| format!("Bad event timestamp {:?}", event.created_at))?
                    .unix_timestamp();
                let actor_name = self.user_name(&event.actor.login).await;
                events.push(PushEvent {
                    refname,
                    before: event.payload.before,
                    head,
                    actor: event.actor.login,
                    actor_name,
                    timestamp,
                });
            }
            if feed_exhausted(fetched, page_len) {
                break;
            }
        }
        Ok(events)
    }

    async fn user_name(&self, login: &str) -> Option<String> {
        self.user_names
            .get_with(login.to_owned(), async {
                let raw: Result<RawUser, _> =
                    self.client.get(&format!("/users/{login}"), None::<&()>).await;
                match raw {
                    Ok(user) => user.name,
                    Err(e) => {
                        tracing::warn!(login, "User lookup failed: {e}");
                        None
                    }
                }
            })
            .await
    }
}

/// Whether pagination should stop. The feed serves at most about 300
/// events across 10 pages and errors past that cap, so the count includes
/// every event fetched, not just the pushes kept.
fn feed_exhausted(fetched: usize, page_len: usize) -> bool {
    page_len < 100 || fetched >= EVENT_LIMIT
}

/// Split `owner/repo` out of an upstream URL. Handles both URL forms
/// (`https://github.com/owner/repo`) and the scp-like form
/// (`git@github.com:owner/repo.git`).
pub fn owner_repo(upstream: &str) -> Option<(String, String)> {
    let rest = match upstream.find("github.com") {
        Some(idx) => upstream[idx + "github.com".len()..]
            .trim_start_matches(|c| c == ':' || c == '/'),
        None => upstream,
    };
    let mut parts = rest.trim_end_matches('/').rsplit('/');
    let repo = parts.next()?.trim_end_matches(".git");
    let owner = parts.next()?;
    if owner.is_empty() || repo.is_empty() || owner.contains(':') {
        return None;
    }
    Some((owner.to_owned(), repo.to_owned()))
}

impl PushEvent {
    pub fn to_reflog_entry(&self) -> ReflogEntry {
        ReflogEntry {
            old_sha1: self.before.clone().unwrap_or_else(|| BOGUS_SHA1.to_owned()),
            new_sha1: self.head.clone(),
            ident: format!(
                "{} <{}@github>",
                self.actor_name.as_deref().unwrap_or(&self.actor),
                self.actor
            ),
            timestamp: self.timestamp,
            tz: "+0000".to_owned(),
            message: "push".to_owned(),
        }
    }
}

/// Rebuild per-ref reflogs from fetched events plus any previously
/// reconstructed history.
///
/// Old entries are replayed only when their resulting sha1 is absent from
/// the freshly fetched head set, so superseded entries are not re-added.
/// Each ref's list comes out sorted by timestamp ascending.
pub fn reconstruct_reflogs(
    events: &[PushEvent],
    mut existing: impl FnMut(&str) -> Result<Vec<ReflogEntry>>,
) -> Result<BTreeMap<String, Vec<ReflogEntry>>> {
    let heads: HashSet<&str> = events.iter().map(|e| e.head.as_str()).collect();
    let mut logs: BTreeMap<String, Vec<ReflogEntry>> = BTreeMap::new();
    // API order is newest first.
    for event in events.iter().rev() {
        logs.entry(event.refname.clone()).or_default().push(event.to_reflog_entry());
    }
    for (refname, entries) in &mut logs {
        for old in existing(refname)? {
            if !heads.contains(old.new_sha1.as_str()) {
                entries.push(old);
            }
        }
        entries.sort_by_key(|e| e.timestamp);
    }
    Ok(logs)
}
