//! Artefact directory walks: everything an action left behind, hashed.

use std::path::Path;

use anyhow::Result;
use sha1::{Digest, Sha1};

/// Relative filenames and content hashes of everything under `dir`,
/// excluding the execution log. A missing directory yields nothing.
pub fn walk(dir: &Path) -> Result<Vec<(String, String)>> {
    let mut found = Vec::new();
    if dir.is_dir() {
        walk_into(dir, dir, &mut found)?;
    }
    found.sort();
    Ok(found)
}

fn walk_into(root: &Path, dir: &Path, found: &mut Vec<(String, String)>) -> Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            walk_into(root, &path, found)?;
            continue;
        }
        let relative = path.strip_prefix(root)?.to_string_lossy().into_owned();
        if relative == "log" {
            continue;
        }
        let mut hasher = Sha1::new();
        hasher.update(std::fs::read(&path)?);
        found.push((relative, hex::encode(hasher.finalize())));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn walk_excludes_the_log_and_hashes_the_rest() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("log"), "noise").unwrap();
        std::fs::write(dir.path().join("out.tar.gz"), "payload").unwrap();
        std::fs::create_dir(dir.path().join("docs")).unwrap();
        std::fs::write(dir.path().join("docs/index.html"), "<html>").unwrap();

        let found = walk(dir.path()).unwrap();
        let names: Vec<&str> = found.iter().map(|(name, _)| name.as_str()).collect();
        assert_eq!(names, ["docs/index.html", "out.tar.gz"]);
        // sha1("payload")
        assert_eq!(found[1].1, "f07e5a815613c5abeddc4b682247a4c42d8a95df");
    }

    #[test]
    fn missing_directory_is_empty() {
        assert!(walk(Path::new("/nonexistent/golem-test")).unwrap().is_empty());
    }
}
