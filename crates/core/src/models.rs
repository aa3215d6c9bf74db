use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

/// Progress of a commit through its full action set.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CommitStatus {
    New,
    InProgress,
    Success,
    Fail,
}

impl CommitStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::InProgress => "in-progress",
            Self::Success => "success",
            Self::Fail => "fail",
        }
    }
}

impl FromStr for CommitStatus {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "new" => Ok(Self::New),
            "in-progress" => Ok(Self::InProgress),
            "success" => Ok(Self::Success),
            "fail" => Ok(Self::Fail),
            _ => Err(()),
        }
    }
}

impl fmt::Display for CommitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

/// Status of one action run for one commit.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionStatus {
    New,
    Scheduled,
    Started,
    Success,
    Fail,
    Retry,
}

impl ActionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Scheduled => "scheduled",
            Self::Started => "started",
            Self::Success => "success",
            Self::Fail => "fail",
            Self::Retry => "retry",
        }
    }
}

impl FromStr for ActionStatus {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "new" => Ok(Self::New),
            "scheduled" => Ok(Self::Scheduled),
            "started" => Ok(Self::Started),
            "success" => Ok(Self::Success),
            "fail" => Ok(Self::Fail),
            "retry" => Ok(Self::Retry),
            _ => Err(()),
        }
    }
}

impl fmt::Display for ActionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

/// A row in the `commit` relation. Append-only per repository.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct CommitRecord {
    pub id: i64,
    pub repository_id: i64,
    pub sha1: String,
    pub prev_sha1: Option<String>,
    pub refname: String,
    pub submit_time: i64,
    pub status: CommitStatus,
}

/// A row in the `action` relation, keyed on (commit, action name).
#[derive(Debug, Clone, PartialEq)]
pub struct ActionRunRecord {
    pub id: i64,
    pub name: String,
    pub commit_id: i64,
    pub status: ActionStatus,
    pub start_time: Option<i64>,
    pub end_time: Option<i64>,
    pub duration: Option<f64>,
    pub host: Option<String>,
}

/// A row in the `artefact` relation: one output file of an action run,
/// recorded with its content hash.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ArtefactRecord {
    pub id: i64,
    pub filename: String,
    pub action_id: i64,
    pub sha1: String,
}
