//! Reading and writing ref-update log files.
//!
//! Two line shapes occur in practice: git's native
//! `old new ident <mail> ts tz\tmessage` and the space-separated form the
//! hosted-source reconstruction writes, where the message is the last
//! token. Both parse to the same entry.

use std::path::Path;

use anyhow::{Context, Result, bail};

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ReflogEntry {
    pub old_sha1: String,
    pub new_sha1: String,
    /// Committer identity, `Name <mail>`.
    pub ident: String,
    pub timestamp: i64,
    pub tz: String,
    pub message: String,
}

impl ReflogEntry {
    pub fn parse(line: &str) -> Result<Self> {
        let line = line.trim_end();
        let (meta, message) = match line.split_once('\t') {
            Some((meta, message)) => (meta, message.trim()),
            None => {
                let idx = line
                    .rfind(char::is_whitespace)
                    .with_context(|| format!("malformed reflog line: {line:?}"))?;
                (&line[..idx], line[idx..].trim_start())
            }
        };
        let tokens: Vec<&str> = meta.split_whitespace().collect();
        if tokens.len() < 4 {
            bail!("malformed reflog line: {line:?}");
        }
        let tz = tokens[tokens.len() - 1];
        let timestamp: i64 = tokens[tokens.len() - 2]
            .parse()
            .with_context(|| format!("malformed reflog timestamp in: {line:?}"))?;
        Ok(Self {
            old_sha1: tokens[0].to_owned(),
            new_sha1: tokens[1].to_owned(),
            ident: tokens[2..tokens.len() - 2].join(" "),
            timestamp,
            tz: tz.to_owned(),
            message: message.to_owned(),
        })
    }

    pub fn to_line(&self) -> String {
        format!(
            "{} {} {} {} {}\t{}",
            self.old_sha1, self.new_sha1, self.ident, self.timestamp, self.tz, self.message
        )
    }
}

pub fn parse_log(text: &str) -> Result<Vec<ReflogEntry>> {
    text.lines().filter(|l| !l.trim().is_empty()).map(ReflogEntry::parse).collect()
}

/// Read a ref's log file; a missing file is an empty history.
pub fn read_log(path: &Path) -> Result<Vec<ReflogEntry>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    parse_log(&text)
}

pub fn write_log(path: &Path, entries: &[ReflogEntry]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut text = entries.iter().map(ReflogEntry::to_line).collect::<Vec<_>>().join("\n");
    text.push('\n');
    std::fs::write(path, text).with_context(|| format!("Failed to write {}", path.display()))
}

/// The (old, new) push pairs of a log, oldest first.
pub fn pairs(entries: &[ReflogEntry]) -> Vec<(String, String)> {
    entries.iter().map(|e| (e.old_sha1.clone(), e.new_sha1.clone())).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const OLD: &str = "1111111111111111111111111111111111111111";
    const NEW: &str = "2222222222222222222222222222222222222222";

    #[test]
    fn parses_native_git_lines() {
        let entry = ReflogEntry::parse(&format!(
            "{OLD} {NEW} Jan Gazda <jan@example.com> 1400000000 +0200\tpush: fast-forward"
        ))
        .unwrap();
        assert_eq!(entry.old_sha1, OLD);
        assert_eq!(entry.new_sha1, NEW);
        assert_eq!(entry.ident, "Jan Gazda <jan@example.com>");
        assert_eq!(entry.timestamp, 1400000000);
        assert_eq!(entry.tz, "+0200");
        assert_eq!(entry.message, "push: fast-forward");
    }

    #[test]
    fn parses_space_separated_lines() {
        let entry = ReflogEntry::parse(&format!(
            "{OLD} {NEW} Jan Gazda <jan@github> 1400000000 +0000 push"
        ))
        .unwrap();
        assert_eq!(entry.ident, "Jan Gazda <jan@github>");
        assert_eq!(entry.message, "push");
    }

    #[test]
    fn round_trips_through_to_line() {
        let entry = ReflogEntry {
            old_sha1: OLD.to_owned(),
            new_sha1: NEW.to_owned(),
            ident: "A U Thor <thor@example.com>".to_owned(),
            timestamp: 1500000000,
            tz: "+0000".to_owned(),
            message: "push".to_owned(),
        };
        assert_eq!(ReflogEntry::parse(&entry.to_line()).unwrap(), entry);
    }

    #[test]
    fn garbage_is_an_error() {
        assert!(ReflogEntry::parse("not a reflog line").is_err());
        assert!(ReflogEntry::parse(&format!("{OLD} {NEW} nobody notatime +0000\tpush")).is_err());
    }
}
