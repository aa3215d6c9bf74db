//! Per-repository configuration: the chem file format, action/notifier
//! definitions, and dependency attribute propagation.
//!
//! Chem files are INI-style: a `[repo]` section, one `[action:<name>]`
//! section per action and one `[notify:<name>]` section per notifier.
//! Values are shell-lexed; a value spanning several lines becomes a list
//! of token lists (used for hook command lists).

use std::{
    collections::{BTreeMap, BTreeSet},
    fs,
    path::Path,
};

use serde_json::{Map, Value};

use crate::{ConfigError, matcher::RefMatcher};

/// Where a repository's ref-update history comes from.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum ReflogSource {
    /// Upstream on the local filesystem; its `logs/` directory is copied.
    File { upstream_path: String },
    /// scp-like `host:path` upstream; `logs/` transferred over ssh.
    Ssh,
    /// History fetched per-branch from `<url>/logs/refs/heads/<branch>`.
    Http { url: String },
    /// No authoritative log; reconstructed from the service's event feed.
    Github,
}

#[derive(Debug, Clone)]
pub struct RepositoryConfig {
    pub name: String,
    pub upstream: String,
    pub source: ReflogSource,
    /// Extra named remotes fetched into the mirror.
    pub remotes: BTreeMap<String, String>,
    pub actions: BTreeMap<String, ActionConfig>,
    pub notifiers: BTreeMap<String, NotifierConfig>,
}

#[derive(Debug, Clone)]
pub struct ActionConfig {
    pub name: String,
    pub queue: String,
    /// Queue time-to-run in seconds.
    pub ttr: u32,
    /// Max number of trailing commits per ref considered per event.
    pub backlog: u32,
    pub branches: Vec<RefMatcher>,
    pub tags: Vec<RefMatcher>,
    /// Names of actions that must succeed for a commit first.
    pub requires: Vec<String>,
    /// Globs of work-tree files moved into the artefact directory.
    pub publish: Vec<String>,
    /// Everything else from the section, merged verbatim into job payloads.
    pub extra: Map<String, Value>,
}

impl ActionConfig {
    /// The configuration payload merged into dispatched jobs.
    pub fn payload(&self) -> Map<String, Value> {
        let mut map = self.extra.clone();
        if !self.publish.is_empty() {
            map.insert(
                "publish".to_owned(),
                Value::Array(self.publish.iter().cloned().map(Value::String).collect()),
            );
        }
        map
    }
}

#[derive(Debug, Clone)]
pub struct NotifierConfig {
    pub name: String,
    pub queue: String,
    /// Glob patterns matched against `action:<name>` of finished actions.
    pub process: Vec<glob::Pattern>,
    pub extra: Map<String, Value>,
}

impl NotifierConfig {
    pub fn handles(&self, action: &str) -> bool {
        let key = format!("action:{action}");
        self.process.iter().any(|p| p.matches(&key))
    }
}

/// A shell-lexed configuration value.
#[derive(Debug, Clone, PartialEq)]
enum ConfigValue {
    Scalar(String),
    List(Vec<String>),
    /// One token list per line, for multi-line values (hook commands).
    Lines(Vec<Vec<String>>),
}

impl ConfigValue {
    fn lex(raw: &str, file: &str, line: usize) -> Result<Self, ConfigError> {
        let bad = |msg: &str| ConfigError::Parse {
            file: file.to_owned(),
            line,
            message: msg.to_owned(),
        };
        if raw.contains('\n') {
            let mut lines = Vec::new();
            for part in raw.lines() {
                if part.trim().is_empty() {
                    continue;
                }
                lines.push(shlex::split(part).ok_or_else(|| bad("unbalanced quotes"))?);
            }
            return Ok(Self::Lines(lines));
        }
        let mut tokens = shlex::split(raw).ok_or_else(|| bad("unbalanced quotes"))?;
        match tokens.len() {
            0 => Ok(Self::Scalar(String::new())),
            1 => Ok(Self::Scalar(tokens.remove(0))),
            _ => Ok(Self::List(tokens)),
        }
    }

    fn as_list(&self) -> Vec<String> {
        match self {
            Self::Scalar(s) if s.is_empty() => vec![],
            Self::Scalar(s) => vec![s.clone()],
            Self::List(items) => items.clone(),
            Self::Lines(lines) => lines.iter().flatten().cloned().collect(),
        }
    }

    fn as_str(&self) -> String {
        match self {
            Self::Scalar(s) => s.clone(),
            Self::List(items) => items.join(" "),
            Self::Lines(lines) => {
                lines.iter().map(|l| l.join(" ")).collect::<Vec<_>>().join("\n")
            }
        }
    }

    fn to_json(&self) -> Value {
        match self {
            Self::Scalar(s) => Value::String(s.clone()),
            Self::List(items) => {
                Value::Array(items.iter().cloned().map(Value::String).collect())
            }
            Self::Lines(lines) => Value::Array(
                lines
                    .iter()
                    .map(|l| Value::Array(l.iter().cloned().map(Value::String).collect()))
                    .collect(),
            ),
        }
    }
}

/// One parsed `[section]` with entries in file order (later keys override).
/// Each entry keeps the line its key appeared on, for error reporting.
#[derive(Debug, Clone, Default)]
struct RawSection {
    entries: Vec<(String, String, usize)>,
}

impl RawSection {
    fn get(&self, key: &str) -> Option<&str> {
        self.entries.iter().rev().find(|(k, _, _)| k == key).map(|(_, v, _)| v.as_str())
    }
}

fn parse_ini(text: &str, file: &str) -> Result<Vec<(String, RawSection)>, ConfigError> {
    let mut sections: Vec<(String, RawSection)> = Vec::new();
    let mut current: Option<usize> = None;
    for (idx, raw_line) in text.lines().enumerate() {
        let lineno = idx + 1;
        let bad = |msg: &str| ConfigError::Parse {
            file: file.to_owned(),
            line: lineno,
            message: msg.to_owned(),
        };
        if raw_line.trim().is_empty() {
            continue;
        }
        let Some(first) = raw_line.chars().next() else {
            continue;
        };
        if first == '#' || first == ';' {
            continue;
        }
        if first.is_whitespace() {
            // Continuation of the previous value.
            let section = current
                .and_then(|i| sections.get_mut(i))
                .ok_or_else(|| bad("continuation line outside a section"))?;
            let (_, value, _) = section
                .1
                .entries
                .last_mut()
                .ok_or_else(|| bad("continuation line without a key"))?;
            value.push('\n');
            value.push_str(raw_line.trim());
            continue;
        }
        let line = raw_line.trim_end();
        if line.starts_with('[') {
            let name = line
                .strip_prefix('[')
                .and_then(|l| l.strip_suffix(']'))
                .ok_or_else(|| bad("malformed section header"))?;
            sections.push((name.to_owned(), RawSection::default()));
            current = Some(sections.len() - 1);
            continue;
        }
        let (key, value) = line
            .split_once('=')
            .or_else(|| line.split_once(':'))
            .ok_or_else(|| bad("expected `key = value`"))?;
        let section = current
            .and_then(|i| sections.get_mut(i))
            .ok_or_else(|| bad("key outside a section"))?;
        section.1.entries.push((key.trim().to_owned(), value.trim().to_owned(), lineno));
    }
    Ok(sections)
}

/// Apply `inherit = <base>` by prepending the base section's entries.
/// Explicit composition: base fields first, then the section's own.
fn resolve_inherit(
    name: &str,
    section: &RawSection,
    namespace: &BTreeMap<String, RawSection>,
    seen: &mut BTreeSet<String>,
) -> Result<RawSection, ConfigError> {
    let Some(base_name) = section.get("inherit") else {
        return Ok(section.clone());
    };
    if !seen.insert(base_name.to_owned()) {
        return Err(ConfigError::UnknownInherit {
            section: name.to_owned(),
            base: base_name.to_owned(),
        });
    }
    let base = namespace.get(base_name).ok_or_else(|| ConfigError::UnknownInherit {
        section: name.to_owned(),
        base: base_name.to_owned(),
    })?;
    let base = resolve_inherit(base_name, base, namespace, seen)?;
    let mut merged = RawSection::default();
    merged.entries.extend(base.entries.iter().cloned());
    merged
        .entries
        .extend(section.entries.iter().filter(|(k, _, _)| k != "inherit").cloned());
    Ok(merged)
}

fn classify_upstream(
    name: &str,
    upstream: &str,
    reflog_url: Option<&str>,
) -> Result<ReflogSource, ConfigError> {
    // Hosted-service upstreams win regardless of transport.
    if is_github_upstream(upstream) {
        return Ok(ReflogSource::Github);
    }
    if upstream.starts_with("http://") || upstream.starts_with("https://") {
        return Ok(ReflogSource::Http {
            url: reflog_url.unwrap_or(upstream).to_owned(),
        });
    }
    if let Some(path) = upstream.strip_prefix("file://") {
        return Ok(ReflogSource::File { upstream_path: path.to_owned() });
    }
    if upstream.starts_with("git://") {
        // No reflog over the git protocol; a gitweb/reflog_url mirror can
        // serve the history instead.
        if let Some(url) = reflog_url {
            return Ok(ReflogSource::Http { url: url.to_owned() });
        }
        return Err(ConfigError::UnknownUpstream {
            repo: name.to_owned(),
            upstream: upstream.to_owned(),
        });
    }
    if upstream.contains(':') {
        return Ok(ReflogSource::Ssh);
    }
    if !upstream.is_empty() {
        return Ok(ReflogSource::File { upstream_path: upstream.to_owned() });
    }
    Err(ConfigError::UnknownUpstream {
        repo: name.to_owned(),
        upstream: upstream.to_owned(),
    })
}

fn is_github_upstream(upstream: &str) -> bool {
    let rest = if let Some((scheme, rest)) = upstream.split_once("://") {
        if !scheme.chars().all(|c| c.is_ascii_lowercase()) {
            return false;
        }
        rest
    } else if let Some(rest) = upstream.strip_prefix("git@") {
        rest
    } else {
        return false;
    };
    rest.starts_with("github.com")
}

fn insert_dotted(map: &mut Map<String, Value>, key: &str, value: Value) {
    if let Some((head, rest)) = key.split_once('.') {
        let nested = map
            .entry(head.to_owned())
            .or_insert_with(|| Value::Object(Map::new()));
        if let Value::Object(nested) = nested {
            insert_dotted(nested, rest, value);
            return;
        }
        // A scalar was already present under this key; replace it.
        let mut fresh = Map::new();
        insert_dotted(&mut fresh, rest, value);
        map.insert(head.to_owned(), Value::Object(fresh));
    } else {
        map.insert(key.to_owned(), value);
    }
}

impl ActionConfig {
    fn from_section(
        name: &str,
        section: &RawSection,
        file: &str,
    ) -> Result<Self, ConfigError> {
        let mut action = Self {
            name: name.to_owned(),
            queue: String::new(),
            ttr: 120,
            backlog: 10,
            branches: Vec::new(),
            tags: Vec::new(),
            requires: Vec::new(),
            publish: Vec::new(),
            extra: Map::new(),
        };
        for (key, raw, line) in &section.entries {
            let value = ConfigValue::lex(raw, file, *line)?;
            match key.as_str() {
                "queue" => action.queue = value.as_str(),
                "ttr" => {
                    action.ttr = value.as_str().parse().map_err(|_| ConfigError::Parse {
                        file: file.to_owned(),
                        line: *line,
                        message: format!("action {name}: invalid ttr {raw:?}"),
                    })?
                }
                "backlog" => {
                    action.backlog =
                        value.as_str().parse().map_err(|_| ConfigError::Parse {
                            file: file.to_owned(),
                            line: *line,
                            message: format!("action {name}: invalid backlog {raw:?}"),
                        })?
                }
                "branches" => {
                    action.branches = value
                        .as_list()
                        .iter()
                        .map(|b| RefMatcher::parse(b))
                        .collect::<Result<_, _>>()?
                }
                "tags" => {
                    action.tags = value
                        .as_list()
                        .iter()
                        .map(|t| RefMatcher::parse(t))
                        .collect::<Result<_, _>>()?
                }
                "requires" => {
                    action.requires = value
                        .as_list()
                        .iter()
                        .map(|r| r.strip_prefix("action:").unwrap_or(r).to_owned())
                        .collect()
                }
                "publish" => action.publish = value.as_list(),
                "when" => {}
                _ => insert_dotted(&mut action.extra, key, value.to_json()),
            }
        }
        if action.queue.is_empty() {
            return Err(ConfigError::MissingQueue(name.to_owned()));
        }
        Ok(action)
    }
}

impl NotifierConfig {
    fn from_section(
        name: &str,
        section: &RawSection,
        file: &str,
    ) -> Result<Self, ConfigError> {
        let mut notifier = Self {
            name: name.to_owned(),
            queue: String::new(),
            process: Vec::new(),
            extra: Map::new(),
        };
        for (key, raw, line) in &section.entries {
            let value = ConfigValue::lex(raw, file, *line)?;
            match key.as_str() {
                "queue" => notifier.queue = value.as_str(),
                "process" => {
                    notifier.process = value
                        .as_list()
                        .iter()
                        .map(|p| {
                            glob::Pattern::new(p).map_err(|e| ConfigError::BadPattern {
                                pattern: p.clone(),
                                message: e.to_string(),
                            })
                        })
                        .collect::<Result<_, _>>()?
                }
                _ => insert_dotted(&mut notifier.extra, key, value.to_json()),
            }
        }
        if notifier.queue.is_empty() {
            return Err(ConfigError::MissingQueue(format!("notify:{name}")));
        }
        Ok(notifier)
    }
}

impl RepositoryConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)?;
        Self::from_str(&text, &path.display().to_string())
    }

    pub fn from_str(text: &str, file: &str) -> Result<Self, ConfigError> {
        let sections = parse_ini(text, file)?;

        let mut repo_section = None;
        let mut action_sections = BTreeMap::new();
        let mut notify_sections = BTreeMap::new();
        for (name, section) in sections {
            if name == "repo" {
                repo_section = Some(section);
            } else if let Some(action) = name.strip_prefix("action:") {
                action_sections.insert(action.to_owned(), section);
            } else if let Some(notifier) = name.strip_prefix("notify:") {
                notify_sections.insert(notifier.to_owned(), section);
            } else {
                tracing::warn!(file, section = name, "Ignoring unknown section");
            }
        }
        let repo_section = repo_section.ok_or(ConfigError::MissingRepo)?;
        let name = repo_section
            .get("name")
            .map(str::to_owned)
            .ok_or(ConfigError::MissingRepo)?;
        let upstream = repo_section.get("upstream").unwrap_or_default().to_owned();
        let reflog_url = repo_section.get("reflog_url").or_else(|| repo_section.get("gitweb"));
        let source = classify_upstream(&name, &upstream, reflog_url)?;

        let mut remotes = BTreeMap::new();
        for (key, value, _) in &repo_section.entries {
            if let Some(remote) = key.strip_prefix("remote.") {
                remotes.insert(remote.to_owned(), value.clone());
            }
        }

        let mut actions = BTreeMap::new();
        for (action_name, section) in &action_sections {
            let resolved = resolve_inherit(
                action_name,
                section,
                &action_sections,
                &mut BTreeSet::from([action_name.clone()]),
            )?;
            actions
                .insert(action_name.clone(), ActionConfig::from_section(action_name, &resolved, file)?);
        }
        let mut notifiers = BTreeMap::new();
        for (notifier_name, section) in &notify_sections {
            let resolved = resolve_inherit(
                notifier_name,
                section,
                &notify_sections,
                &mut BTreeSet::from([notifier_name.clone()]),
            )?;
            notifiers.insert(
                notifier_name.clone(),
                NotifierConfig::from_section(notifier_name, &resolved, file)?,
            );
        }

        validate_requirements(&actions)?;
        propagate_dependencies(&mut actions);

        Ok(Self { name, upstream, source, remotes, actions, notifiers })
    }
}

fn validate_requirements(
    actions: &BTreeMap<String, ActionConfig>,
) -> Result<(), ConfigError> {
    for action in actions.values() {
        for req in &action.requires {
            if !actions.contains_key(req) {
                return Err(ConfigError::UnknownRequirement {
                    action: action.name.clone(),
                    requirement: req.clone(),
                });
            }
        }
    }
    // The fixpoint pass only terminates on an acyclic graph; reject cycles
    // up front instead of spinning.
    let mut done = BTreeSet::new();
    for start in actions.keys() {
        if done.contains(start) {
            continue;
        }
        let mut path = Vec::new();
        visit(start, actions, &mut path, &mut done)?;
    }
    return Ok(());

    fn visit(
        name: &str,
        actions: &BTreeMap<String, ActionConfig>,
        path: &mut Vec<String>,
        done: &mut BTreeSet<String>,
    ) -> Result<(), ConfigError> {
        if path.iter().any(|p| p == name) {
            return Err(ConfigError::DependencyCycle(name.to_owned()));
        }
        if done.contains(name) {
            return Ok(());
        }
        path.push(name.to_owned());
        for req in &actions[name].requires {
            visit(req, actions, path, done)?;
        }
        path.pop();
        done.insert(name.to_owned());
        Ok(())
    }
}

/// Iterate to a fixpoint: an action's backlog is the minimum over its
/// dependencies, and its branch/tag sets are intersected with each
/// dependency's sets (an unrestricted dependency imposes nothing).
fn propagate_dependencies(actions: &mut BTreeMap<String, ActionConfig>) {
    let mut changed = true;
    while changed {
        changed = false;
        let names: Vec<String> = actions.keys().cloned().collect();
        for name in &names {
            let requires = actions[name].requires.clone();
            for req in &requires {
                let (req_backlog, req_branches, req_tags) = {
                    let dep = &actions[req];
                    (dep.backlog, dep.branches.clone(), dep.tags.clone())
                };
                let Some(action) = actions.get_mut(name) else {
                    continue;
                };
                if req_backlog < action.backlog {
                    action.backlog = req_backlog;
                    changed = true;
                }
                changed |= intersect(&mut action.branches, &req_branches);
                changed |= intersect(&mut action.tags, &req_tags);
            }
        }
    }
}

fn intersect(mine: &mut Vec<RefMatcher>, deps: &[RefMatcher]) -> bool {
    if deps.is_empty() {
        return false;
    }
    if mine.is_empty() {
        *mine = deps.to_vec();
        return true;
    }
    let before = mine.len();
    mine.retain(|m| deps.contains(m));
    mine.len() != before
}
