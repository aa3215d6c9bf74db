//! Branch and tag enumeration over a bare mirror.

use std::path::Path;

use anyhow::Result;

use crate::mirror_git;

/// A tag with the commit it ultimately points at (annotated tags are peeled)
/// and its creation time.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct TagInfo {
    /// Full ref name, `refs/tags/...`.
    pub refname: String,
    pub sha1: String,
    pub timestamp: i64,
}

/// Every branch head as (full refname, sha1).
pub async fn branch_heads(mirror: &Path) -> Result<Vec<(String, String)>> {
    let out = mirror_git(
        mirror,
        &["for-each-ref", "--format", "%(refname)%09%(objectname)", "refs/heads"],
    )
    .await?;
    Ok(out
        .lines()
        .filter_map(|line| {
            let (refname, sha1) = line.split_once('\t')?;
            Some((refname.to_owned(), sha1.to_owned()))
        })
        .collect())
}

/// Every tag, lightweight or annotated. Tags whose creation time git cannot
/// render are malformed and skipped.
pub async fn tags(mirror: &Path) -> Result<Vec<TagInfo>> {
    let out = mirror_git(
        mirror,
        &[
            "for-each-ref",
            "--format",
            "%(refname)%09%(objectname)%09%(*objectname)%09%(creatordate:unix)",
            "refs/tags",
        ],
    )
    .await?;
    let mut tags = Vec::new();
    for line in out.lines() {
        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() != 4 {
            continue;
        }
        let Ok(timestamp) = fields[3].parse::<i64>() else {
            tracing::warn!(tag = fields[0], "Skipping tag with unparsable creation time");
            continue;
        };
        // The peeled field is empty for lightweight tags.
        let sha1 = if fields[2].is_empty() { fields[1] } else { fields[2] };
        tags.push(TagInfo {
            refname: fields[0].to_owned(),
            sha1: sha1.to_owned(),
            timestamp,
        });
    }
    Ok(tags)
}
