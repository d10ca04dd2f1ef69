use crate::config::{ENGAGEMENT_JOB_NAME, EngageConfig};
use crate::error::EngageError;
use crate::functions::dispatcher::FatalSignal;
use crate::functions::run_ledger::{Acquisition, RunOutcome, acquire_run, resolve_run, run_key};
use crate::functions::send_guard::{GuardReport, evaluate_guard};
use crate::functions::templates::MessageContext;
use crate::functions::{completion, marketing, reminders, reviews};
use crate::services::SmsGateway;
use crate::storage::{EngagementStore, RunLedger};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<EngageConfig>,
    pub ledger: Arc<dyn RunLedger>,
    pub store: Arc<dyn EngagementStore>,
    pub gateway: Arc<dyn SmsGateway>,
}

/// Everything a stage needs for one pass.
pub struct StageContext<'a> {
    pub store: &'a dyn EngagementStore,
    pub gateway: &'a dyn SmsGateway,
    pub messages: MessageContext,
    pub now: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendStats {
    pub sent: u32,
    pub skipped: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionStats {
    pub completed: u32,
    pub analytics_failures: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketingStats {
    pub sent: u32,
    pub skipped: u32,
    pub events_considered: u32,
    pub capped: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngagementReport {
    pub reminders: SendStats,
    pub reviews: SendStats,
    pub completion: CompletionStats,
    pub table_reviews: SendStats,
    pub table_completion: CompletionStats,
    pub marketing: MarketingStats,
}

#[derive(Debug)]
pub enum EngagementOutcome {
    GuardBlocked(GuardReport),
    Finished {
        guard: GuardReport,
        report: EngagementReport,
    },
    Aborted {
        guard: GuardReport,
        report: EngagementReport,
        signal: Box<FatalSignal>,
    },
}

fn log_stage_failure(stage: &'static str, err: &EngageError) {
    if !matches!(err, EngageError::Fatal(_)) {
        tracing::error!(stage, error = %err, "engagement: stage failed");
    }
}

async fn run_stages(
    ctx: &StageContext<'_>,
    report: &mut EngagementReport,
) -> Result<(), EngageError> {
    reminders::send_event_reminders(ctx, &mut report.reminders)
        .await
        .inspect_err(|e| log_stage_failure("reminders", e))?;
    reviews::send_event_reviews(ctx, &mut report.reviews)
        .await
        .inspect_err(|e| log_stage_failure("event_reviews", e))?;
    reviews::send_table_reviews(ctx, &mut report.table_reviews)
        .await
        .inspect_err(|e| log_stage_failure("table_reviews", e))?;
    marketing::send_interest_marketing(ctx, &mut report.marketing)
        .await
        .inspect_err(|e| log_stage_failure("marketing", e))?;
    completion::sweep_event_completions(ctx, &mut report.completion)
        .await
        .inspect_err(|e| log_stage_failure("completion", e))?;
    completion::sweep_table_completions(ctx, &mut report.table_completion)
        .await
        .inspect_err(|e| log_stage_failure("table_completion", e))?;
    Ok(())
}

/// One pass of the guest-engagement job, without the run lock.
pub async fn run_engagement(
    store: &dyn EngagementStore,
    gateway: &dyn SmsGateway,
    config: &EngageConfig,
    now: DateTime<Utc>,
) -> Result<EngagementOutcome, EngageError> {
    let guard = evaluate_guard(store, &config.guard, now).await;
    if guard.blocked {
        return Ok(EngagementOutcome::GuardBlocked(guard));
    }

    let ctx = StageContext {
        store,
        gateway,
        messages: MessageContext {
            timezone: config.timezone,
            app_base_url: config.app_base_url.clone(),
            contact_phone: config.contact_phone.clone(),
        },
        now,
    };

    let mut report = EngagementReport::default();
    match run_stages(&ctx, &mut report).await {
        Ok(()) => Ok(EngagementOutcome::Finished { guard, report }),
        Err(EngageError::Fatal(signal)) => Ok(EngagementOutcome::Aborted {
            guard,
            report,
            signal,
        }),
        Err(err) => Err(err),
    }
}

/// JSON body returned to whoever triggered the run.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skipped: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aborted: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub abort_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub abort_stage: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub abort_context: Option<FatalSignal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(flatten)]
    pub report: Option<EngagementReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub guard: Option<GuardReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processed_at: Option<DateTime<Utc>>,
}

impl RunResponse {
    fn failure(error: String) -> Self {
        Self {
            success: false,
            error: Some(error),
            ..Default::default()
        }
    }
}

/// Takes the run lock, runs the job under the deadline and records the outcome.
pub async fn execute_job(state: &AppState, trigger: &str) -> RunResponse {
    let config = state.config.as_ref();
    let now = Utc::now();
    let key = run_key(now, config.timezone, config.run_bucket_minutes);

    let acquisition = match acquire_run(
        state.ledger.as_ref(),
        ENGAGEMENT_JOB_NAME,
        &key,
        now,
        config.stale_after,
    )
    .await
    {
        Ok(acquisition) => acquisition,
        Err(err) => {
            tracing::error!(
                trigger,
                run_key = %key,
                error = %err,
                "engagement: could not acquire run"
            );
            return RunResponse::failure(format!("failed to acquire run lock: {err}"));
        }
    };

    let lease = match acquisition {
        Acquisition::Acquired(lease) => lease,
        Acquisition::Busy(reason) => {
            tracing::info!(
                trigger,
                run_key = %key,
                reason = reason.as_str(),
                "engagement: skipping run"
            );
            return RunResponse {
                success: true,
                skipped: Some(true),
                reason: Some(reason.as_str().to_string()),
                run_key: Some(key),
                ..Default::default()
            };
        }
    };

    tracing::info!(trigger, run_key = %key, run_id = %lease.run_id, "engagement: run started");

    let result = tokio::time::timeout(
        config.max_duration(),
        run_engagement(state.store.as_ref(), state.gateway.as_ref(), config, now),
    )
    .await
    .unwrap_or(Err(EngageError::DeadlineExceeded(config.max_duration_secs)));

    let processed_at = Utc::now();
    let (outcome, response) = match result {
        Ok(EngagementOutcome::GuardBlocked(guard)) => (
            RunOutcome::Completed,
            RunResponse {
                success: true,
                skipped: Some(true),
                reason: Some("send_guard_blocked".to_string()),
                run_key: Some(key.clone()),
                guard: Some(guard),
                processed_at: Some(processed_at),
                ..Default::default()
            },
        ),
        Ok(EngagementOutcome::Finished { guard, report }) => {
            tracing::info!(
                run_key = %key,
                reminders_sent = report.reminders.sent,
                reviews_sent = report.reviews.sent,
                table_reviews_sent = report.table_reviews.sent,
                marketing_sent = report.marketing.sent,
                completed = report.completion.completed + report.table_completion.completed,
                "engagement: run finished"
            );
            (
                RunOutcome::Completed,
                RunResponse {
                    success: true,
                    report: Some(report),
                    run_key: Some(key.clone()),
                    guard: Some(guard),
                    processed_at: Some(processed_at),
                    ..Default::default()
                },
            )
        }
        Ok(EngagementOutcome::Aborted {
            guard,
            report,
            signal,
        }) => {
            tracing::error!(
                run_key = %key,
                stage = %signal.stage,
                code = %signal.code,
                customer_id = %signal.customer_id,
                booking_id = ?signal.booking_id,
                event_id = ?signal.event_id,
                template_key = %signal.template_key,
                notify = config.notify_email.as_deref().unwrap_or("unset"),
                "engagement: run aborted on fatal safety signal"
            );
            (
                RunOutcome::Failed(format!(
                    "fatal_safety_signal:{}: {}",
                    signal.code, signal.message
                )),
                RunResponse {
                    success: true,
                    aborted: Some(true),
                    abort_reason: Some(signal.code.clone()),
                    abort_stage: Some(signal.stage.as_str().to_string()),
                    abort_context: Some(*signal),
                    report: Some(report),
                    run_key: Some(key.clone()),
                    guard: Some(guard),
                    processed_at: Some(processed_at),
                    ..Default::default()
                },
            )
        }
        Err(err) => {
            tracing::error!(run_key = %key, error = %err, "engagement: run failed");
            (
                RunOutcome::Failed(err.to_string()),
                RunResponse::failure(err.to_string()),
            )
        }
    };

    if let Err(err) = resolve_run(state.ledger.as_ref(), &lease, &outcome, processed_at).await {
        tracing::error!(run_id = %lease.run_id, error = %err, "engagement: failed to resolve run");
    }

    response
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::functions::dispatcher::testing::RecordingGateway;
    use crate::schema::{
        BookingStatus, Customer, EventBooking, EventStart, EventStatus, EventSummary, SmsStatus,
    };
    use crate::storage::memory::MemoryStore;
    use uuid::Uuid;

    pub fn customer(mobile: &str) -> Customer {
        Customer {
            id: Uuid::new_v4(),
            first_name: Some("Alex".to_string()),
            mobile_number: Some(mobile.to_string()),
            sms_status: SmsStatus::Active,
        }
    }

    pub fn event_booking(customer: Customer, start: DateTime<Utc>) -> EventBooking {
        EventBooking {
            id: Uuid::new_v4(),
            customer,
            event: EventSummary {
                id: Uuid::new_v4(),
                name: "Quiz Night".to_string(),
                status: EventStatus::Scheduled,
                start: Some(EventStart::At(start)),
            },
            status: BookingStatus::Confirmed,
            is_reminder_only: false,
            review_sms_sent_at: None,
            review_window_closes_at: None,
        }
    }

    pub fn context<'a>(
        store: &'a MemoryStore,
        gateway: &'a RecordingGateway,
        now: DateTime<Utc>,
    ) -> StageContext<'a> {
        StageContext {
            store,
            gateway,
            messages: MessageContext {
                timezone: chrono_tz::Europe::London,
                app_base_url: "https://venue.example".to_string(),
                contact_phone: None,
            },
            now,
        }
    }

    pub fn app_state(store: Arc<MemoryStore>, gateway: Arc<RecordingGateway>) -> AppState {
        let config = EngageConfig {
            cron_secret: Some("s3cret".to_string()),
            ..EngageConfig::default()
        };
        AppState {
            config: Arc::new(config),
            ledger: store.clone(),
            store,
            gateway,
        }
    }
}
