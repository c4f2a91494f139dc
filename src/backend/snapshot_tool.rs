use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::error::BackendError;
use super::BackupOutcome;
use crate::retention::RetentionPolicy;

const TOOL: &str = "restic";

/// Shells out to a deduplicating snapshot CLI (`restic`) against a
/// repository URL, with credentials supplied via environment.
pub struct SnapshotToolBackend {
    repository: String,
    env: HashMap<String, String>,
    timeout: Duration,
}

impl SnapshotToolBackend {
    pub fn new(repository: String, env: HashMap<String, String>, timeout: Duration) -> Self {
        Self {
            repository,
            env,
            timeout,
        }
    }

    fn base_command(&self, args: &[&str]) -> Command {
        let mut cmd = Command::new(TOOL);
        cmd.arg("-r").arg(&self.repository);
        cmd.args(args);
        cmd.envs(&self.env);
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd
    }

    async fn run(
        &self,
        args: &[&str],
        cancel: CancellationToken,
    ) -> Result<std::process::Output, BackendError> {
        let mut cmd = self.base_command(args);

        let child = cmd.spawn().map_err(|source| BackendError::Spawn {
            tool: TOOL.to_string(),
            source,
        })?;

        let wait = child.wait_with_output();

        tokio::select! {
            result = wait => result.map_err(|source| BackendError::Spawn {
                tool: TOOL.to_string(),
                source,
            }),
            _ = cancel.cancelled() => Err(BackendError::Cancelled),
            _ = tokio::time::sleep(self.timeout) => Err(BackendError::Timeout(self.timeout)),
        }
    }

    /// Best-effort pre-flight; errors are logged but never fatal.
    pub async fn unlock(&self) -> Result<(), BackendError> {
        match self.run(&["unlock"], CancellationToken::new()).await {
            Ok(output) if output.status.success() => Ok(()),
            Ok(output) => {
                debug!(
                    stderr = %String::from_utf8_lossy(&output.stderr),
                    "restic unlock reported a non-zero exit, ignoring"
                );
                Ok(())
            }
            Err(err) => {
                debug!(error = %err, "restic unlock failed, ignoring");
                Ok(())
            }
        }
    }

    pub async fn backup(
        &self,
        staging_root: &Path,
        tags: &[String],
        cancel: CancellationToken,
    ) -> Result<BackupOutcome, BackendError> {
        self.unlock().await.ok();

        let mut args: Vec<String> = vec!["backup".to_string(), staging_root.display().to_string()];
        for tag in tags {
            args.push("--tag".to_string());
            args.push(tag.clone());
        }
        args.push("--json".to_string());

        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        let output = self.run(&arg_refs, cancel).await?;

        if !output.status.success() {
            return Err(BackendError::NonZeroExit {
                tool: TOOL.to_string(),
                code: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            });
        }

        Ok(parse_backup_summary(&output.stdout))
    }

    pub async fn apply_retention(
        &self,
        policy: RetentionPolicy,
        tags: &[String],
        cancel: CancellationToken,
    ) -> Result<(), BackendError> {
        let mut args: Vec<String> = vec![
            "forget".to_string(),
            "--prune".to_string(),
            "--keep-daily".to_string(),
            policy.keep_daily.to_string(),
            "--keep-weekly".to_string(),
            policy.keep_weekly.to_string(),
            "--keep-monthly".to_string(),
            policy.keep_monthly.to_string(),
        ];
        for tag in tags {
            args.push("--tag".to_string());
            args.push(tag.clone());
        }

        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        let output = self.run(&arg_refs, cancel).await?;

        if !output.status.success() {
            warn!(
                stderr = %String::from_utf8_lossy(&output.stderr),
                "restic forget --prune failed; backup remains successful"
            );
        }

        Ok(())
    }
}

/// `restic backup --json` emits one JSON object per line; the terminal
/// summary line carries the aggregate stats we care about.
fn parse_backup_summary(stdout: &[u8]) -> BackupOutcome {
    let text = String::from_utf8_lossy(stdout);

    for line in text.lines().rev() {
        let Ok(value) = serde_json::from_str::<serde_json::Value>(line) else {
            continue;
        };
        if value.get("message_type").and_then(|v| v.as_str()) == Some("summary") {
            return BackupOutcome {
                snapshot_id: value
                    .get("snapshot_id")
                    .and_then(|v| v.as_str())
                    .map(String::from),
                bytes_added: value
                    .get("data_added")
                    .and_then(|v| v.as_u64())
                    .unwrap_or(0),
                files_new: value.get("files_new").and_then(|v| v.as_u64()).unwrap_or(0),
            };
        }
    }

    BackupOutcome {
        snapshot_id: None,
        bytes_added: 0,
        files_new: 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_summary_line_from_jsonl_stream() {
        let stream = b"{\"message_type\":\"status\"}\n{\"message_type\":\"summary\",\"snapshot_id\":\"abc123\",\"data_added\":4096,\"files_new\":2}\n";
        let outcome = parse_backup_summary(stream);
        assert_eq!(outcome.snapshot_id.as_deref(), Some("abc123"));
        assert_eq!(outcome.bytes_added, 4096);
        assert_eq!(outcome.files_new, 2);
    }

    #[test]
    fn missing_summary_line_yields_zeroed_outcome() {
        let outcome = parse_backup_summary(b"not json\n");
        assert!(outcome.snapshot_id.is_none());
        assert_eq!(outcome.bytes_added, 0);
    }
}
