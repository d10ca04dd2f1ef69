//! Advisory run lock backed by the `cron_job_runs` table.
//!
//! A run is a lease on `(job_name, run_key)`. The unique index turns two triggers inside the
//! same bucket into a deterministic collision, and a `running` row older than the staleness
//! threshold counts as an expired lease that a later invocation may take over.

use crate::error::{StoreError, truncate_message};
use crate::schema::{JobRun, RunStatus};
use crate::storage::{InsertRun, RunLedger};
use chrono::{DateTime, Duration, Timelike, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use uuid::Uuid;

const MAX_ERROR_LEN: usize = 500;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    pub run_id: Uuid,
    pub job_name: String,
    pub run_key: String,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BusyReason {
    AlreadyRunning,
    AlreadyCompleted,
}

impl BusyReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            BusyReason::AlreadyRunning => "already_running",
            BusyReason::AlreadyCompleted => "already_completed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Acquisition {
    Acquired(Lease),
    Busy(BusyReason),
}

#[derive(Debug, Clone)]
pub enum RunOutcome {
    Completed,
    Failed(String),
}

/// Formats the start of the `bucket_minutes` slot containing `now`, in local time.
pub fn run_key(now: DateTime<Utc>, tz: Tz, bucket_minutes: u32) -> String {
    let bucket = bucket_minutes.clamp(1, 60);
    let local = now.with_timezone(&tz);
    let minute = (local.minute() / bucket) * bucket;
    format!("{}:{minute:02}", local.format("%Y-%m-%dT%H"))
}

fn lease_for(run: &JobRun, started_at: DateTime<Utc>) -> Lease {
    Lease {
        run_id: run.id,
        job_name: run.job_name.clone(),
        run_key: run.run_key.clone(),
        started_at,
    }
}

fn busy_reason(run: &JobRun, now: DateTime<Utc>, stale_after: Duration) -> Option<BusyReason> {
    match run.status {
        RunStatus::Completed => Some(BusyReason::AlreadyCompleted),
        RunStatus::Running if !run.is_stale(now, stale_after) => Some(BusyReason::AlreadyRunning),
        _ => None,
    }
}

pub async fn acquire_run(
    ledger: &dyn RunLedger,
    job_name: &str,
    run_key: &str,
    now: DateTime<Utc>,
    stale_after: Duration,
) -> Result<Acquisition, StoreError> {
    if let Some(active) = ledger.latest_running(job_name).await? {
        if !active.is_stale(now, stale_after) {
            tracing::info!(
                job_name,
                run_key,
                active_run_key = %active.run_key,
                "run ledger: job already running"
            );
            return Ok(Acquisition::Busy(BusyReason::AlreadyRunning));
        }

        let message = format!(
            "stale run reclaimed after {} minutes",
            now.signed_duration_since(active.started_at).num_minutes()
        );
        match ledger.fail_running(active.id, &message, now).await {
            Ok(_) => tracing::warn!(
                job_name,
                stale_run_id = %active.id,
                stale_run_key = %active.run_key,
                "run ledger: marked stale run failed"
            ),
            Err(err) => tracing::warn!(
                job_name,
                stale_run_id = %active.id,
                error = %err,
                "run ledger: could not mark stale run failed, continuing"
            ),
        }
    }

    match ledger.insert_running(job_name, run_key, now).await? {
        InsertRun::Inserted(run) => Ok(Acquisition::Acquired(lease_for(&run, now))),
        InsertRun::Conflict => recover_existing(ledger, job_name, run_key, now, stale_after).await,
    }
}

/// Another row already owns this run key: decide whether it can be taken over.
async fn recover_existing(
    ledger: &dyn RunLedger,
    job_name: &str,
    run_key: &str,
    now: DateTime<Utc>,
    stale_after: Duration,
) -> Result<Acquisition, StoreError> {
    let Some(existing) = ledger.find_run(job_name, run_key).await? else {
        // deleted between the insert and the read; one more insert settles it
        return Ok(match ledger.insert_running(job_name, run_key, now).await? {
            InsertRun::Inserted(run) => Acquisition::Acquired(lease_for(&run, now)),
            InsertRun::Conflict => Acquisition::Busy(BusyReason::AlreadyRunning),
        });
    };

    if let Some(reason) = busy_reason(&existing, now, stale_after) {
        return Ok(Acquisition::Busy(reason));
    }

    if ledger
        .restart_run(existing.id, existing.status, existing.started_at, now)
        .await?
        > 0
    {
        tracing::info!(
            job_name,
            run_key,
            previous_status = existing.status.as_str(),
            "run ledger: reclaimed existing run"
        );
        return Ok(Acquisition::Acquired(lease_for(&existing, now)));
    }

    // lost the conditional update to a concurrent invocation
    let Some(current) = ledger.find_run(job_name, run_key).await? else {
        return Ok(Acquisition::Busy(BusyReason::AlreadyRunning));
    };
    if let Some(reason) = busy_reason(&current, now, stale_after) {
        tracing::info!(
            job_name,
            run_key,
            reason = reason.as_str(),
            "run ledger: lost reclaim race"
        );
        return Ok(Acquisition::Busy(reason));
    }

    // the winner already gave the row back; one last conditional attempt against what we saw
    if ledger
        .restart_run(current.id, current.status, current.started_at, now)
        .await?
        > 0
    {
        return Ok(Acquisition::Acquired(lease_for(&current, now)));
    }
    Ok(Acquisition::Busy(BusyReason::AlreadyRunning))
}

/// Records how an acquired run ended. Skipped runs never get here.
pub async fn resolve_run(
    ledger: &dyn RunLedger,
    lease: &Lease,
    outcome: &RunOutcome,
    finished_at: DateTime<Utc>,
) -> Result<(), StoreError> {
    let (status, error) = match outcome {
        RunOutcome::Completed => (RunStatus::Completed, None),
        RunOutcome::Failed(message) => (
            RunStatus::Failed,
            Some(truncate_message(message, MAX_ERROR_LEN)),
        ),
    };
    ledger
        .resolve_run(lease.run_id, status, error.as_deref(), finished_at)
        .await
}
