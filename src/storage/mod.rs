//! Storage seams for the engagement job.
//!
//! Every mutation here is a single-row (or single-statement) conditional update, so two
//! overlapping runs can never double-transition the same row.

use crate::error::StoreError;
use crate::schema::{
    AnalyticsEvent, AudienceScope, CompletedBooking, Customer, EventBooking, InterestTier, JobRun,
    ManualInterestRecipient, MarketingEvent, NewMessage, RunStatus, TableBooking, TemplateKey,
};
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::collections::HashSet;
use uuid::Uuid;

#[cfg(test)]
pub mod memory;
pub mod postgres;

pub use postgres::PgStore;

/// Applies `migrations/` to `pool`.
pub async fn setup_database(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}

#[derive(Debug, Clone)]
pub enum InsertRun {
    Inserted(JobRun),
    /// A row for this exact `(job_name, run_key)` already exists.
    Conflict,
}

#[async_trait::async_trait]
pub trait RunLedger: Send + Sync {
    /// Most recently started `running` row for a job, across all run keys.
    async fn latest_running(&self, job_name: &str) -> Result<Option<JobRun>, StoreError>;

    async fn find_run(&self, job_name: &str, run_key: &str) -> Result<Option<JobRun>, StoreError>;

    async fn insert_running(
        &self,
        job_name: &str,
        run_key: &str,
        started_at: DateTime<Utc>,
    ) -> Result<InsertRun, StoreError>;

    /// Moves a row back to `running` only if it is still in `expected`. Returns rows affected.
    async fn restart_run(
        &self,
        run_id: Uuid,
        expected: RunStatus,
        expected_started_at: DateTime<Utc>,
        started_at: DateTime<Utc>,
    ) -> Result<u64, StoreError>;

    /// Marks a row `failed` only if it is still `running`. Returns rows affected.
    async fn fail_running(
        &self,
        run_id: Uuid,
        message: &str,
        finished_at: DateTime<Utc>,
    ) -> Result<u64, StoreError>;

    async fn resolve_run(
        &self,
        run_id: Uuid,
        status: RunStatus,
        error_message: Option<&str>,
        finished_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;
}

#[async_trait::async_trait]
pub trait EngagementStore: Send + Sync {
    async fn count_recent_messages(
        &self,
        template_keys: &[&str],
        since: DateTime<Utc>,
    ) -> Result<i64, StoreError>;

    /// Confirmed event bookings whose event starts inside `[from, until]`.
    async fn reminder_candidates(
        &self,
        from: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<EventBooking>, StoreError>;

    /// `(booking_id, template_key)` pairs already present in the message log.
    async fn sent_booking_templates(
        &self,
        booking_ids: &[Uuid],
        template_keys: &[&str],
    ) -> Result<HashSet<(Uuid, String)>, StoreError>;

    /// `(customer_id, event_id)` pairs backed by a real, non-cancelled booking.
    async fn real_booking_pairs(
        &self,
        event_ids: &[Uuid],
    ) -> Result<HashSet<(Uuid, Uuid)>, StoreError>;

    /// Confirmed event bookings with no review SMS whose event started inside `[from, until]`.
    async fn event_review_candidates(
        &self,
        from: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<EventBooking>, StoreError>;

    async fn table_review_candidates(
        &self,
        from: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<TableBooking>, StoreError>;

    async fn mark_event_review_sent(
        &self,
        booking_id: Uuid,
        sent_at: DateTime<Utc>,
        window_closes_at: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    async fn mark_table_review_sent(
        &self,
        booking_id: Uuid,
        sent_at: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Non-cancelled events starting inside `(from, until]`.
    async fn marketing_events(
        &self,
        from: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<MarketingEvent>, StoreError>;

    /// Customers with a live booking or waitlist entry for another event in the same audience
    /// that started before `started_before`.
    async fn audience_customers(
        &self,
        scope: &AudienceScope,
        exclude_event_id: Uuid,
        started_before: DateTime<Utc>,
    ) -> Result<Vec<Customer>, StoreError>;

    async fn manual_interest_recipients(
        &self,
        event_id: Uuid,
    ) -> Result<Vec<ManualInterestRecipient>, StoreError>;

    /// Stamps one tier on a manual opt-in only if it has never been stamped.
    async fn mark_manual_interest_sent(
        &self,
        recipient_id: Uuid,
        tier: InterestTier,
        sent_at: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    async fn customers_sent_template(
        &self,
        event_id: Uuid,
        template_key: TemplateKey,
    ) -> Result<HashSet<Uuid>, StoreError>;

    async fn record_message(&self, message: &NewMessage) -> Result<Uuid, StoreError>;

    async fn complete_event_bookings(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<CompletedBooking>, StoreError>;

    /// Completes table bookings whose review SMS went out at or before `sent_before`.
    async fn complete_table_bookings(
        &self,
        sent_before: DateTime<Utc>,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<CompletedBooking>, StoreError>;

    async fn record_analytics_event(&self, event: &AnalyticsEvent) -> Result<(), StoreError>;
}
