//! In-memory store used by the unit tests.

use super::{EngagementStore, InsertRun, RunLedger};
use crate::error::StoreError;
use crate::functions::eligibility::resolve_event_start;
use crate::schema::{
    AnalyticsEvent, AudienceScope, BookingKind, BookingStatus, CompletedBooking, Customer,
    EventBooking, InterestTier, JobRun, ManualInterestRecipient, MarketingEvent, NewMessage,
    RunStatus, TableBooking, TemplateKey,
};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct StoredMessage {
    pub id: Uuid,
    pub message: NewMessage,
    pub created_at: DateTime<Utc>,
}

/// A past booking or waitlist entry, denormalised with its event's audience fields.
#[derive(Debug, Clone)]
pub struct Attendance {
    pub customer: Customer,
    pub event_id: Uuid,
    pub category_id: Option<Uuid>,
    pub event_type: Option<String>,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InjectedFailure {
    SchemaMissing,
    Unavailable,
}

impl InjectedFailure {
    fn to_error(self, what: &str) -> StoreError {
        match self {
            InjectedFailure::SchemaMissing => {
                StoreError::SchemaMissing(format!("relation for {what} does not exist"))
            }
            InjectedFailure::Unavailable => StoreError::Unavailable(format!("{what} unavailable")),
        }
    }
}

type RunHook = Box<dyn FnMut(&mut Vec<JobRun>) + Send>;

#[derive(Default)]
pub struct MemoryState {
    pub runs: Vec<JobRun>,
    pub event_bookings: Vec<EventBooking>,
    pub table_bookings: Vec<TableBooking>,
    pub events: Vec<MarketingEvent>,
    pub attendance: Vec<Attendance>,
    pub manual_interest: Vec<ManualInterestRecipient>,
    pub messages: Vec<StoredMessage>,
    pub analytics: Vec<AnalyticsEvent>,
    pub table_completed_at: Vec<(Uuid, DateTime<Utc>)>,
    pub event_completed_at: Vec<(Uuid, DateTime<Utc>)>,
    pub count_failure: Option<InjectedFailure>,
    pub candidates_failure: Option<InjectedFailure>,
    pub record_message_failure: Option<InjectedFailure>,
    pub analytics_failure: Option<InjectedFailure>,
    /// Runs against the ledger rows right before a conditional restart, standing in for a
    /// concurrent invocation that wins the race.
    pub before_restart: Option<RunHook>,
}

pub struct MemoryStore {
    timezone: Tz,
    state: Mutex<MemoryState>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(chrono_tz::Europe::London)
    }
}

impl MemoryStore {
    pub fn new(timezone: Tz) -> Self {
        Self {
            timezone,
            state: Mutex::new(MemoryState::default()),
        }
    }

    pub fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap()
    }

    pub fn push_message(&self, template_key: TemplateKey, created_at: DateTime<Utc>) {
        self.state().messages.push(StoredMessage {
            id: Uuid::new_v4(),
            message: NewMessage {
                customer_id: Uuid::new_v4(),
                booking_id: None,
                table_booking_id: None,
                event_id: None,
                template_key,
                to_number: "+447700900000".to_string(),
                body: "seeded".to_string(),
                provider_message_id: None,
                scheduled_for: None,
            },
            created_at,
        });
    }

    pub fn messages_with(&self, template_key: TemplateKey) -> Vec<StoredMessage> {
        self.state()
            .messages
            .iter()
            .filter(|m| m.message.template_key == template_key)
            .cloned()
            .collect()
    }

    fn start_of(&self, start: Option<crate::schema::EventStart>) -> Option<DateTime<Utc>> {
        start.and_then(|s| resolve_event_start(&s, self.timezone))
    }
}

#[async_trait::async_trait]
impl RunLedger for MemoryStore {
    async fn latest_running(&self, job_name: &str) -> Result<Option<JobRun>, StoreError> {
        Ok(self
            .state()
            .runs
            .iter()
            .filter(|r| r.job_name == job_name && r.status == RunStatus::Running)
            .max_by_key(|r| r.started_at)
            .cloned())
    }

    async fn find_run(&self, job_name: &str, run_key: &str) -> Result<Option<JobRun>, StoreError> {
        Ok(self
            .state()
            .runs
            .iter()
            .find(|r| r.job_name == job_name && r.run_key == run_key)
            .cloned())
    }

    async fn insert_running(
        &self,
        job_name: &str,
        run_key: &str,
        started_at: DateTime<Utc>,
    ) -> Result<InsertRun, StoreError> {
        let mut state = self.state();
        if state
            .runs
            .iter()
            .any(|r| r.job_name == job_name && r.run_key == run_key)
        {
            return Ok(InsertRun::Conflict);
        }
        let run = JobRun {
            id: Uuid::new_v4(),
            job_name: job_name.to_string(),
            run_key: run_key.to_string(),
            status: RunStatus::Running,
            started_at,
            finished_at: None,
            error_message: None,
        };
        state.runs.push(run.clone());
        Ok(InsertRun::Inserted(run))
    }

    async fn restart_run(
        &self,
        run_id: Uuid,
        expected: RunStatus,
        expected_started_at: DateTime<Utc>,
        started_at: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let mut state = self.state();
        if let Some(mut hook) = state.before_restart.take() {
            hook(&mut state.runs);
        }
        match state.runs.iter_mut().find(|r| {
            r.id == run_id && r.status == expected && r.started_at == expected_started_at
        }) {
            Some(run) => {
                run.status = RunStatus::Running;
                run.started_at = started_at;
                run.finished_at = None;
                run.error_message = None;
                Ok(1)
            }
            None => Ok(0),
        }
    }

    async fn fail_running(
        &self,
        run_id: Uuid,
        message: &str,
        finished_at: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let mut state = self.state();
        match state
            .runs
            .iter_mut()
            .find(|r| r.id == run_id && r.status == RunStatus::Running)
        {
            Some(run) => {
                run.status = RunStatus::Failed;
                run.error_message = Some(message.to_string());
                run.finished_at = Some(finished_at);
                Ok(1)
            }
            None => Ok(0),
        }
    }

    async fn resolve_run(
        &self,
        run_id: Uuid,
        status: RunStatus,
        error_message: Option<&str>,
        finished_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut state = self.state();
        if let Some(run) = state.runs.iter_mut().find(|r| r.id == run_id) {
            run.status = status;
            run.error_message = error_message.map(str::to_string);
            run.finished_at = Some(finished_at);
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl EngagementStore for MemoryStore {
    async fn count_recent_messages(
        &self,
        template_keys: &[&str],
        since: DateTime<Utc>,
    ) -> Result<i64, StoreError> {
        let state = self.state();
        if let Some(failure) = state.count_failure {
            return Err(failure.to_error("messages"));
        }
        Ok(state
            .messages
            .iter()
            .filter(|m| {
                m.created_at >= since && template_keys.contains(&m.message.template_key.as_str())
            })
            .count() as i64)
    }

    async fn reminder_candidates(
        &self,
        from: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<EventBooking>, StoreError> {
        let state = self.state();
        if let Some(failure) = state.candidates_failure {
            return Err(failure.to_error("bookings"));
        }
        Ok(state
            .event_bookings
            .iter()
            .filter(|b| b.status == BookingStatus::Confirmed)
            .filter(|b| {
                self.start_of(b.event.start)
                    .is_some_and(|s| s >= from && s <= until)
            })
            .cloned()
            .collect())
    }

    async fn sent_booking_templates(
        &self,
        booking_ids: &[Uuid],
        template_keys: &[&str],
    ) -> Result<HashSet<(Uuid, String)>, StoreError> {
        Ok(self
            .state()
            .messages
            .iter()
            .filter(|m| template_keys.contains(&m.message.template_key.as_str()))
            .filter_map(|m| {
                let id = m.message.booking_id.or(m.message.table_booking_id)?;
                booking_ids
                    .contains(&id)
                    .then(|| (id, m.message.template_key.as_str().to_string()))
            })
            .collect())
    }

    async fn real_booking_pairs(
        &self,
        event_ids: &[Uuid],
    ) -> Result<HashSet<(Uuid, Uuid)>, StoreError> {
        Ok(self
            .state()
            .event_bookings
            .iter()
            .filter(|b| event_ids.contains(&b.event.id))
            .filter(|b| !b.is_reminder_only && b.status != BookingStatus::Cancelled)
            .map(|b| (b.customer.id, b.event.id))
            .collect())
    }

    async fn event_review_candidates(
        &self,
        from: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<EventBooking>, StoreError> {
        Ok(self
            .state()
            .event_bookings
            .iter()
            .filter(|b| {
                b.status == BookingStatus::Confirmed
                    && b.review_sms_sent_at.is_none()
                    && !b.is_reminder_only
            })
            .filter(|b| {
                self.start_of(b.event.start)
                    .is_some_and(|s| s >= from && s <= until)
            })
            .cloned()
            .collect())
    }

    async fn table_review_candidates(
        &self,
        from: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<TableBooking>, StoreError> {
        Ok(self
            .state()
            .table_bookings
            .iter()
            .filter(|b| b.status == BookingStatus::Confirmed && b.review_sms_sent_at.is_none())
            .filter(|b| self.start_of(b.start).is_some_and(|s| s >= from && s <= until))
            .cloned()
            .collect())
    }

    async fn mark_event_review_sent(
        &self,
        booking_id: Uuid,
        sent_at: DateTime<Utc>,
        window_closes_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut state = self.state();
        match state.event_bookings.iter_mut().find(|b| {
            b.id == booking_id
                && b.status == BookingStatus::Confirmed
                && b.review_sms_sent_at.is_none()
        }) {
            Some(booking) => {
                booking.review_sms_sent_at = Some(sent_at);
                booking.review_window_closes_at = Some(window_closes_at);
                booking.status = BookingStatus::VisitedWaitingForReview;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn mark_table_review_sent(
        &self,
        booking_id: Uuid,
        sent_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut state = self.state();
        match state.table_bookings.iter_mut().find(|b| {
            b.id == booking_id
                && b.status == BookingStatus::Confirmed
                && b.review_sms_sent_at.is_none()
        }) {
            Some(booking) => {
                booking.review_sms_sent_at = Some(sent_at);
                booking.status = BookingStatus::VisitedWaitingForReview;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn marketing_events(
        &self,
        from: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<MarketingEvent>, StoreError> {
        Ok(self
            .state()
            .events
            .iter()
            .filter(|e| e.status.accepts_messaging())
            .filter(|e| self.start_of(e.start).is_some_and(|s| s > from && s <= until))
            .cloned()
            .collect())
    }

    async fn audience_customers(
        &self,
        scope: &AudienceScope,
        exclude_event_id: Uuid,
        started_before: DateTime<Utc>,
    ) -> Result<Vec<Customer>, StoreError> {
        let mut seen = HashSet::new();
        Ok(self
            .state()
            .attendance
            .iter()
            .filter(|a| a.event_id != exclude_event_id && a.started_at <= started_before)
            .filter(|a| match scope {
                AudienceScope::Category(id) => a.category_id == Some(*id),
                AudienceScope::EventType(kind) => a.event_type.as_deref() == Some(kind.as_str()),
            })
            .filter(|a| seen.insert(a.customer.id))
            .map(|a| a.customer.clone())
            .collect())
    }

    async fn manual_interest_recipients(
        &self,
        event_id: Uuid,
    ) -> Result<Vec<ManualInterestRecipient>, StoreError> {
        Ok(self
            .state()
            .manual_interest
            .iter()
            .filter(|r| r.event_id == event_id)
            .cloned()
            .collect())
    }

    async fn mark_manual_interest_sent(
        &self,
        recipient_id: Uuid,
        tier: InterestTier,
        sent_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut state = self.state();
        match state
            .manual_interest
            .iter_mut()
            .find(|r| r.id == recipient_id && r.sent_at(tier).is_none())
        {
            Some(recipient) => {
                recipient.mark_sent(tier, sent_at);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn customers_sent_template(
        &self,
        event_id: Uuid,
        template_key: TemplateKey,
    ) -> Result<HashSet<Uuid>, StoreError> {
        Ok(self
            .state()
            .messages
            .iter()
            .filter(|m| {
                m.message.event_id == Some(event_id) && m.message.template_key == template_key
            })
            .map(|m| m.message.customer_id)
            .collect())
    }

    async fn record_message(&self, message: &NewMessage) -> Result<Uuid, StoreError> {
        let mut state = self.state();
        if let Some(failure) = state.record_message_failure {
            return Err(failure.to_error("messages"));
        }
        let id = Uuid::new_v4();
        state.messages.push(StoredMessage {
            id,
            message: message.clone(),
            created_at: Utc::now(),
        });
        Ok(id)
    }

    async fn complete_event_bookings(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<CompletedBooking>, StoreError> {
        let mut state = self.state();
        let mut completed = Vec::new();
        for booking in state.event_bookings.iter_mut() {
            if completed.len() as i64 >= limit {
                break;
            }
            let closed = booking.review_window_closes_at.is_some_and(|at| at <= now);
            if booking.status.awaiting_review() && closed {
                booking.status = BookingStatus::Completed;
                completed.push(CompletedBooking {
                    kind: BookingKind::Event,
                    booking_id: booking.id,
                    customer_id: booking.customer.id,
                    event_id: Some(booking.event.id),
                });
            }
        }
        state
            .event_completed_at
            .extend(completed.iter().map(|c| (c.booking_id, now)));
        Ok(completed)
    }

    async fn complete_table_bookings(
        &self,
        sent_before: DateTime<Utc>,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<CompletedBooking>, StoreError> {
        let mut state = self.state();
        let mut completed = Vec::new();
        for booking in state.table_bookings.iter_mut() {
            if completed.len() as i64 >= limit {
                break;
            }
            let elapsed = booking.review_sms_sent_at.is_some_and(|at| at <= sent_before);
            if booking.status.awaiting_review() && elapsed {
                booking.status = BookingStatus::Completed;
                completed.push(CompletedBooking {
                    kind: BookingKind::Table,
                    booking_id: booking.id,
                    customer_id: booking.customer.id,
                    event_id: None,
                });
            }
        }
        state
            .table_completed_at
            .extend(completed.iter().map(|c| (c.booking_id, now)));
        Ok(completed)
    }

    async fn record_analytics_event(&self, event: &AnalyticsEvent) -> Result<(), StoreError> {
        let mut state = self.state();
        if let Some(failure) = state.analytics_failure {
            return Err(failure.to_error("analytics_events"));
        }
        state.analytics.push(event.clone());
        Ok(())
    }
}
