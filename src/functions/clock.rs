use crate::functions::engagement::{AppState, execute_job};
use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use std::str::FromStr;
use tokio::sync::watch;

// the `cron` crate requires 6-field (second-granularity) expressions,
// so we prepend "0" to standard 5-field minute-granularity inputs
fn normalize_schedule(schedule: &str) -> String {
    let fields: Vec<&str> = schedule.split_whitespace().collect();
    let normalized = fields.join(" ");
    if fields.len() == 5 {
        format!("0 {normalized}")
    } else {
        normalized
    }
}

pub fn parse_schedule(schedule: &str) -> Result<cron::Schedule> {
    let normalized = normalize_schedule(schedule);
    cron::Schedule::from_str(&normalized)
        .with_context(|| format!("invalid cron expression `{normalized}`"))
}

pub fn compute_next_run_at(
    schedule: &cron::Schedule,
    timezone: Tz,
    from: DateTime<Utc>,
) -> Result<DateTime<Utc>> {
    let from_local = from.with_timezone(&timezone);
    let next_local = schedule
        .after(&from_local)
        .next()
        .ok_or_else(|| anyhow!("cron has no future occurrences"))?;
    Ok(next_local.with_timezone(&Utc))
}

/// Runs the engagement job on `schedule` until `shutdown` flips.
pub async fn clock(
    state: AppState,
    schedule: String,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let parsed = parse_schedule(&schedule)?;
    let timezone = state.config.timezone;
    tracing::info!(schedule = %schedule, timezone = %timezone, "clock: started");

    loop {
        let next = compute_next_run_at(&parsed, timezone, Utc::now())?;
        let wait = (next - Utc::now()).to_std().unwrap_or_default();
        tracing::debug!(next_run_at = %next, "clock: sleeping");

        tokio::select! {
            _ = shutdown.changed() => break,
            _ = tokio::time::sleep(wait) => {
                let response = execute_job(&state, "clock").await;
                match (&response.skipped, &response.aborted, &response.error) {
                    (_, _, Some(error)) => {
                        tracing::error!(error = %error, "clock: engagement run failed")
                    }
                    (_, Some(true), _) => {
                        tracing::warn!(
                            reason = ?response.abort_reason,
                            "clock: engagement run aborted"
                        )
                    }
                    (Some(true), _, _) => {
                        tracing::info!(reason = ?response.reason, "clock: engagement run skipped")
                    }
                    _ => {
                        tracing::info!(
                            run_key = ?response.run_key,
                            "clock: engagement run finished"
                        )
                    }
                }
            }
        }
    }

    tracing::info!("clock: stopped");
    Ok(())
}
