//! Hook command execution: external command lists from the action
//! configuration, run in the working tree.
//!
//! A command list may contain `|` tokens splitting it into a pipeline
//! (stage output buffered into the next stage's stdin) and may end with
//! `> file`, redirecting the final stdout into a file under the working
//! tree. `$commit` in any argument is replaced with the job's sha1.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    process::Stdio,
    time::Duration,
};

use anyhow::{Context, Result, bail};
use serde_json::{Map, Value};
use tokio::io::AsyncWriteExt;

pub type HookSet = BTreeMap<String, Vec<Vec<String>>>;

/// Pull hook definitions out of a job's merged configuration payload
/// (the `hook.<name>` chem keys).
pub fn parse(extra: &Map<String, Value>) -> HookSet {
    let mut hooks = HookSet::new();
    let Some(Value::Object(map)) = extra.get("hook") else { return hooks };
    for (name, value) in map {
        hooks.insert(name.clone(), command_lists(value));
    }
    hooks
}

/// Normalize a configuration value into a list of token lists. A single
/// line is one command; a multi-line value is one command per line.
pub fn command_lists(value: &Value) -> Vec<Vec<String>> {
    match value {
        Value::String(s) => vec![vec![s.clone()]],
        Value::Array(items) if items.iter().all(Value::is_string) => {
            vec![items.iter().filter_map(Value::as_str).map(str::to_owned).collect()]
        }
        Value::Array(lines) => lines.iter().flat_map(command_lists).collect(),
        _ => Vec::new(),
    }
}

/// Execution context shared by every hook of one job.
pub struct HookContext {
    pub work_dir: PathBuf,
    pub sha1: String,
    pub log_path: PathBuf,
    /// Extra environment, `GIT_DIR`/`GIT_WORK_TREE`.
    pub env: Vec<(String, String)>,
}

impl HookContext {
    /// Run one list of commands; the first failure aborts the job phase.
    pub async fn run_commands(&self, commands: &[Vec<String>]) -> Result<()> {
        for command in commands {
            self.run_command(command).await?;
        }
        Ok(())
    }

    async fn run_command(&self, command: &[String]) -> Result<()> {
        let mut stages: Vec<Vec<String>> =
            command.split(|token| token == "|").map(<[String]>::to_vec).collect();
        let last = stages.len() - 1;
        let mut redirect = None;
        if let Some(stage) = stages.get_mut(last) {
            if stage.len() >= 3 && stage[stage.len() - 2] == ">" {
                redirect = stage.pop();
                stage.pop();
            }
        }

        let mut piped: Option<Vec<u8>> = None;
        for (index, stage) in stages.iter().enumerate() {
            let output = self.run_stage(stage, piped.take()).await?;
            if index == last {
                match &redirect {
                    Some(file) => std::fs::write(self.work_dir.join(file), &output)?,
                    None => self.log(&output)?,
                }
            } else {
                piped = Some(output);
            }
        }
        Ok(())
    }

    /// Run one pipeline stage and return its stdout. Git index-lock
    /// contention is transient and retried with a random backoff.
    async fn run_stage(&self, stage: &[String], stdin: Option<Vec<u8>>) -> Result<Vec<u8>> {
        let (program, args) = stage.split_first().context("empty hook command")?;
        let args: Vec<String> =
            args.iter().map(|arg| arg.replace("$commit", &self.sha1)).collect();
        let mut attempts = 0;
        loop {
            let mut command = tokio::process::Command::new(program);
            command
                .args(&args)
                .current_dir(&self.work_dir)
                .stdin(if stdin.is_some() { Stdio::piped() } else { Stdio::null() })
                .stdout(Stdio::piped())
                .stderr(Stdio::piped());
            for (key, value) in &self.env {
                command.env(key, value);
            }
            let mut child = command
                .spawn()
                .with_context(|| format!("Failed to run hook command {program}"))?;
            if let Some(bytes) = &stdin {
                let mut pipe = child.stdin.take().context("no stdin pipe")?;
                pipe.write_all(bytes).await?;
                drop(pipe);
            }
            let output = child.wait_with_output().await?;
            self.log(&output.stderr)?;
            if output.status.success() {
                return Ok(output.stdout);
            }
            let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
            attempts += 1;
            if attempts < 3 && program.ends_with("git") && stderr.contains("index.lock") {
                tokio::time::sleep(Duration::from_secs_f64(rand::random::<f64>())).await;
                continue;
            }
            bail!("{program} {} failed ({}): {}", args.join(" "), output.status, stderr.trim());
        }
    }

    fn log(&self, bytes: &[u8]) -> Result<()> {
        if bytes.is_empty() {
            return Ok(());
        }
        use std::io::Write;
        let mut file =
            std::fs::OpenOptions::new().create(true).append(true).open(&self.log_path)?;
        file.write_all(bytes)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context(dir: &Path) -> HookContext {
        HookContext {
            work_dir: dir.to_owned(),
            sha1: "bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb".to_owned(),
            log_path: dir.join("log"),
            env: Vec::new(),
        }
    }

    #[test]
    fn hook_values_normalize_to_command_lists() {
        let extra: Map<String, Value> = serde_json::from_str(
            r#"{"hook": {
                "pre-sync": ["touch", "marker"],
                "post-checkout": [["make", "clean"], ["make", "all"]]
            }}"#,
        )
        .unwrap();
        let hooks = parse(&extra);
        assert_eq!(hooks["pre-sync"], vec![vec!["touch".to_owned(), "marker".to_owned()]]);
        assert_eq!(hooks["post-checkout"].len(), 2);
        assert_eq!(hooks["post-checkout"][1], ["make", "all"]);
    }

    #[tokio::test]
    async fn commit_substitution_and_redirection() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path());
        ctx.run_commands(&[vec![
            "echo".to_owned(),
            "$commit".to_owned(),
            ">".to_owned(),
            "commit.txt".to_owned(),
        ]])
        .await
        .unwrap();
        let written = std::fs::read_to_string(dir.path().join("commit.txt")).unwrap();
        assert_eq!(written.trim(), ctx.sha1);
    }

    #[tokio::test]
    async fn pipelines_feed_stage_output_forward() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path());
        ctx.run_commands(&[vec![
            "printf".to_owned(),
            "b\\na\\n".to_owned(),
            "|".to_owned(),
            "sort".to_owned(),
            ">".to_owned(),
            "sorted.txt".to_owned(),
        ]])
        .await
        .unwrap();
        let written = std::fs::read_to_string(dir.path().join("sorted.txt")).unwrap();
        assert_eq!(written, "a\nb\n");
    }

    #[tokio::test]
    async fn failing_commands_propagate() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path());
        assert!(ctx.run_commands(&[vec!["false".to_owned()]]).await.is_err());
    }
}
