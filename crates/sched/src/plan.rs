//! Pure scheduling decisions: which refs an action cares about and how
//! much of a ref's history it looks at.

use std::collections::{BTreeMap, BTreeSet};

use golem_core::repo::ActionConfig;
use golem_git::refs::TagInfo;

/// Split a full ref name into its short name, tagging whether it is a
/// branch. Anything outside `refs/heads` and `refs/tags` is not schedulable.
pub fn short_name(refname: &str) -> Option<(&str, bool)> {
    if let Some(name) = refname.strip_prefix("refs/heads/") {
        Some((name, true))
    } else {
        refname.strip_prefix("refs/tags/").map(|name| (name, false))
    }
}

/// Whether an action wants events on this ref at all.
pub fn ref_matches(action: &ActionConfig, refname: &str) -> bool {
    match short_name(refname) {
        Some((name, true)) => action.branches.iter().any(|m| m.matches(name)),
        Some((name, false)) => action.tags.iter().any(|m| m.matches(name)),
        None => false,
    }
}

/// The tags an action will handle for one event: matcher intersection,
/// ordered by creation time, capped at the trailing `backlog + 1`.
pub fn matching_tags(action: &ActionConfig, tags: &[TagInfo]) -> Vec<TagInfo> {
    let mut mine: Vec<TagInfo> = tags
        .iter()
        .filter(|tag| ref_matches(action, &tag.refname))
        .cloned()
        .collect();
    mine.sort_by_key(|tag| tag.timestamp);
    let window = backlog_window(&mine, action.backlog);
    window.to_vec()
}

/// The trailing `backlog + 1` elements of a ref's event list. Fewer than
/// that is fine; the whole list is used.
pub fn backlog_window<T>(events: &[T], backlog: u32) -> &[T] {
    let keep = backlog as usize + 1;
    if events.len() > keep { &events[events.len() - keep..] } else { events }
}

/// Every action that transitively depends on `root`, not including `root`
/// itself.
pub fn dependents(actions: &BTreeMap<String, ActionConfig>, root: &str) -> BTreeSet<String> {
    let mut found = BTreeSet::new();
    let mut frontier = vec![root.to_owned()];
    while let Some(current) = frontier.pop() {
        for (name, action) in actions {
            if action.requires.iter().any(|r| r == &current) && found.insert(name.clone()) {
                frontier.push(name.clone());
            }
        }
    }
    found
}

#[cfg(test)]
mod tests {
    use golem_core::repo::RepositoryConfig;

    use super::*;

    fn repo(chem: &str) -> RepositoryConfig {
        RepositoryConfig::from_str(chem, "test.chem").unwrap()
    }

    fn tag(name: &str, timestamp: i64) -> TagInfo {
        TagInfo {
            refname: format!("refs/tags/{name}"),
            sha1: "2222222222222222222222222222222222222222".to_owned(),
            timestamp,
        }
    }

    #[test]
    fn backlog_window_keeps_the_trailing_events() {
        let events: Vec<u32> = (0..10).collect();
        assert_eq!(backlog_window(&events, 2), &[7, 8, 9]);
        assert_eq!(backlog_window(&events[..2], 2), &[0, 1]);
    }

    #[test]
    fn literal_and_regex_ref_matching() {
        let repo = repo(
            "[repo]\nname = test\nupstream = /srv/git/test.git\n\
             [action:release]\nqueue = q\ntags = ^release-.*\nbranches = master\n",
        );
        let action = &repo.actions["release"];
        assert!(ref_matches(action, "refs/heads/master"));
        assert!(!ref_matches(action, "refs/heads/master-next"));
        assert!(ref_matches(action, "refs/tags/release-1.0"));
        assert!(!ref_matches(action, "refs/tags/beta-1.0"));
        // Only branches and tags are schedulable.
        assert!(!ref_matches(action, "refs/notes/commits"));
    }

    #[test]
    fn matching_tags_sorts_and_caps() {
        let repo = repo(
            "[repo]\nname = test\nupstream = /srv/git/test.git\n\
             [action:release]\nqueue = q\ntags = ^release-.*\nbacklog = 1\n",
        );
        let action = &repo.actions["release"];
        let tags = vec![
            tag("release-3.0", 300),
            tag("release-1.0", 100),
            tag("beta-1.0", 150),
            tag("release-2.0", 200),
        ];
        let mine = matching_tags(action, &tags);
        let names: Vec<&str> = mine.iter().map(|t| t.refname.as_str()).collect();
        // backlog 1 keeps the last two, in creation order.
        assert_eq!(names, ["refs/tags/release-2.0", "refs/tags/release-3.0"]);
    }

    #[test]
    fn dependents_are_transitive() {
        let repo = repo(
            "[repo]\nname = test\nupstream = /srv/git/test.git\n\
             [action:build]\nqueue = q\n\
             [action:package]\nqueue = q\nrequires = build\n\
             [action:upload]\nqueue = q\nrequires = package\n\
             [action:docs]\nqueue = q\n",
        );
        let deps = dependents(&repo.actions, "build");
        assert_eq!(deps.into_iter().collect::<Vec<_>>(), ["package", "upload"]);
        assert!(dependents(&repo.actions, "docs").is_empty());
    }
}
