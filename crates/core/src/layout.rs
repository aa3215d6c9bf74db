use std::path::{Path, PathBuf};

/// On-disk layout for one repository under a shared root:
///
/// ```text
/// <root>/<name>/<name>.git                          bare mirror
/// <root>/<name>/artefacts/<action>/<ref>@<sha1>/    published outputs
/// <root>/<name>/work/<action>/<ref>@<sha1>/         working trees
/// ```
///
/// Refs contain slashes, so the `<ref>@<sha1>` key nests directories.
#[derive(Debug, Clone)]
pub struct RepoLayout {
    root: PathBuf,
    name: String,
}

impl RepoLayout {
    pub fn new(root: impl Into<PathBuf>, name: &str) -> Self {
        Self { root: root.into(), name: name.to_owned() }
    }

    pub fn name(&self) -> &str { &self.name }

    pub fn repo_dir(&self) -> PathBuf { self.root.join(&self.name) }

    pub fn mirror_path(&self) -> PathBuf {
        self.repo_dir().join(format!("{}.git", self.name))
    }

    pub fn artefact_root(&self) -> PathBuf { self.repo_dir().join("artefacts") }

    pub fn action_artefact_root(&self, action: &str) -> PathBuf {
        self.artefact_root().join(action)
    }

    pub fn artefact_dir(&self, action: &str, refname: &str, sha1: &str) -> PathBuf {
        self.action_artefact_root(action).join(ref_key(refname, sha1))
    }

    pub fn work_dir(&self, action: &str, refname: &str, sha1: &str) -> PathBuf {
        self.repo_dir().join("work").join(action).join(ref_key(refname, sha1))
    }
}

/// The `<ref>@<sha1>` key identifying one attempt directory.
pub fn ref_key(refname: &str, sha1: &str) -> PathBuf {
    let mut path = PathBuf::new();
    let mut parts = refname.split('/').peekable();
    while let Some(part) = parts.next() {
        if parts.peek().is_none() {
            path.push(format!("{part}@{sha1}"));
        } else {
            path.push(part);
        }
    }
    path
}

/// Where a ref's update log lives inside a mirror (`logs/<ref>`).
pub fn reflog_path(mirror: &Path, refname: &str) -> PathBuf {
    let mut path = mirror.join("logs");
    for part in refname.split('/') {
        path.push(part);
    }
    path
}
