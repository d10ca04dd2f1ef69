use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Error)]
#[error("unknown run status `{0}`")]
pub struct UnknownRunStatus(String);

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        }
    }
}

impl TryFrom<String> for RunStatus {
    type Error = UnknownRunStatus;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "running" => Ok(RunStatus::Running),
            "completed" => Ok(RunStatus::Completed),
            "failed" => Ok(RunStatus::Failed),
            _ => Err(UnknownRunStatus(value)),
        }
    }
}

/// One attempt to execute a named job inside a run-key bucket.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct JobRun {
    pub id: Uuid,
    pub job_name: String,
    pub run_key: String,
    #[sqlx(try_from = "String")]
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

impl JobRun {
    /// A running row whose start is at least `stale_after` old is presumed abandoned.
    pub fn is_stale(&self, now: DateTime<Utc>, stale_after: Duration) -> bool {
        now.signed_duration_since(self.started_at) >= stale_after
    }
}
