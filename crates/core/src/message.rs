use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Why a job message was sent.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Reason {
    PostReceive,
    ActionStarted,
    ActionDone,
    Reschedule,
    Reload,
    #[serde(alias = "exit")]
    Quit,
}

/// The queue payload. A textual key/value map: the typed fields below plus
/// the action's merged configuration (hooks, publish globs, arbitrary
/// extras), carried in `extra`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobMessage {
    pub why: Reason,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo: Option<String>,
    #[serde(rename = "ref", default, skip_serializing_if = "Option::is_none")]
    pub refname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prev_sha1: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha1: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl JobMessage {
    pub fn new(why: Reason, repo: &str) -> Self {
        Self {
            why,
            repo: Some(repo.to_owned()),
            refname: None,
            prev_sha1: None,
            sha1: None,
            action: None,
            result: None,
            start_time: None,
            end_time: None,
            duration: None,
            host: None,
            extra: Map::new(),
        }
    }

    pub fn control(why: Reason) -> Self {
        Self {
            why,
            repo: None,
            refname: None,
            prev_sha1: None,
            sha1: None,
            action: None,
            result: None,
            start_time: None,
            end_time: None,
            duration: None,
            host: None,
            extra: Map::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reason_uses_kebab_case_on_the_wire() {
        let msg = JobMessage::new(Reason::PostReceive, "test");
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["why"], "post-receive");
        assert_eq!(json["repo"], "test");
    }

    #[test]
    fn exit_is_an_alias_for_quit() {
        let msg: JobMessage = serde_json::from_str(r#"{"why": "exit"}"#).unwrap();
        assert_eq!(msg.why, Reason::Quit);
    }

    #[test]
    fn unknown_keys_land_in_extra() {
        let msg: JobMessage = serde_json::from_str(
            r#"{"why": "post-receive", "repo": "r", "ref": "refs/heads/master", "script": ["make"]}"#,
        )
        .unwrap();
        assert_eq!(msg.refname.as_deref(), Some("refs/heads/master"));
        assert_eq!(msg.extra["script"][0], "make");
    }
}
