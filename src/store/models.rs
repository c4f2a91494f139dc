use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Schema version for the persisted store file, for future migrations.
pub const STORE_SCHEMA_VERSION: u32 = 1;

/// Durable, per-instance job-status record. Upsert-by-instance: dashboards
/// read "latest"; `logs` is the append-only history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStatus {
    pub global_id: u64,
    pub instance_local_id: u64,
    pub instance_id: String,
    pub is_active: bool,
    pub state: JobState,
    pub last_started_at: Option<DateTime<Utc>>,
    pub last_completed_at: Option<DateTime<Utc>>,
    pub last_targets_successful: u32,
    pub last_targets_total: u32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobStatus {
    pub fn new(instance_id: String, global_id: u64, local_id: u64, now: DateTime<Utc>) -> Self {
        Self {
            global_id,
            instance_local_id: local_id,
            instance_id,
            is_active: false,
            state: JobState::Scheduled,
            last_started_at: None,
            last_completed_at: None,
            last_targets_successful: 0,
            last_targets_total: 0,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Scheduled,
    InProgress,
    Success,
    PartialSuccess,
    Failed,
    Aborted,
}

impl JobState {
    /// Derives the terminal state from target outcome counts, per the
    /// invariant that `partial_success` holds iff `0 < successful < total`.
    pub fn from_counts(successful: u32, total: u32) -> Self {
        match (successful, total) {
            (0, 0) => JobState::Failed,
            (s, t) if s == t => JobState::Success,
            (0, _) => JobState::Failed,
            (s, t) if s < t => JobState::PartialSuccess,
            _ => JobState::Failed,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// Durable, append-only log entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: u64,
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
    pub instance_id: Option<String>,
    pub target_id: Option<String>,
    pub job_global_id: Option<u64>,
    pub job_local_id: Option<u64>,
}

/// The full persisted document: one embedded file holding both families plus
/// the monotonic per-instance counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreDocument {
    pub version: u32,
    pub job_status: Vec<JobStatus>,
    pub logs: Vec<LogEntry>,
    pub instance_counters: std::collections::HashMap<String, u64>,
    pub next_global_id: u64,
    pub next_log_id: u64,
}

impl StoreDocument {
    pub fn new() -> Self {
        Self {
            version: STORE_SCHEMA_VERSION,
            job_status: Vec::new(),
            logs: Vec::new(),
            instance_counters: std::collections::HashMap::new(),
            next_global_id: 1,
            next_log_id: 1,
        }
    }

    pub fn get_status(&self, instance_id: &str) -> Option<&JobStatus> {
        self.job_status.iter().find(|j| j.instance_id == instance_id)
    }

    pub fn get_status_mut(&mut self, instance_id: &str) -> Option<&mut JobStatus> {
        self.job_status
            .iter_mut()
            .find(|j| j.instance_id == instance_id)
    }

    pub fn upsert_status(&mut self, status: JobStatus) {
        if let Some(existing) = self.get_status_mut(&status.instance_id) {
            *existing = status;
        } else {
            self.job_status.push(status);
        }
    }
}

impl Default for StoreDocument {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_state_matches_invariant_three() {
        assert_eq!(JobState::from_counts(0, 0), JobState::Failed);
        assert_eq!(JobState::from_counts(0, 3), JobState::Failed);
        assert_eq!(JobState::from_counts(2, 3), JobState::PartialSuccess);
        assert_eq!(JobState::from_counts(3, 3), JobState::Success);
    }
}
