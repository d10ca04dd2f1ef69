use super::{EngagementStore, InsertRun, RunLedger};
use crate::error::StoreError;
use crate::schema::{
    AnalyticsEvent, AudienceScope, BookingKind, CompletedBooking, Customer, CustomerRow,
    EventBooking, EventBookingRow, InterestTier, JobRun, ManualInterestRecipient,
    ManualInterestRow, MarketingEvent, MarketingEventRow, NewMessage, RunStatus, TableBooking,
    TableBookingRow, TemplateKey,
};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use sqlx::PgPool;
use std::collections::HashSet;
use uuid::Uuid;

const EVENT_BOOKING_SELECT: &str = r#"
    SELECT b.id, b.status, b.is_reminder_only, b.review_sms_sent_at, b.review_window_closes_at,
           c.id AS customer_id, c.first_name, c.mobile_number, c.sms_status,
           e.id AS event_id, e.name AS event_name, e.event_status,
           e.date AS event_date, e.time AS event_time, e.start_datetime
    FROM bookings b
    JOIN customers c ON c.id = b.customer_id
    JOIN events e ON e.id = b.event_id
"#;

const EVENT_START_EXPR: &str = "COALESCE(e.start_datetime, (e.date + e.time) AT TIME ZONE $3)";

const AWAITING_REVIEW: &str = "('visited_waiting_for_review', 'review_clicked')";

fn owned_keys(keys: &[&str]) -> Vec<String> {
    keys.iter().map(|k| k.to_string()).collect()
}

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
    timezone: Tz,
}

impl PgStore {
    pub fn new(pool: PgPool, timezone: Tz) -> Self {
        Self { pool, timezone }
    }

    async fn event_bookings_where(
        &self,
        predicate: &str,
        from: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<EventBooking>, StoreError> {
        let sql = format!(
            "{EVENT_BOOKING_SELECT} WHERE {predicate} AND {EVENT_START_EXPR} BETWEEN $1 AND $2 \
             ORDER BY {EVENT_START_EXPR}, b.id"
        );
        let rows = sqlx::query_as::<_, EventBookingRow>(&sql)
            .bind(from)
            .bind(until)
            .bind(self.timezone.name())
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(EventBooking::from).collect())
    }
}

#[async_trait::async_trait]
impl RunLedger for PgStore {
    async fn latest_running(&self, job_name: &str) -> Result<Option<JobRun>, StoreError> {
        let run = sqlx::query_as::<_, JobRun>(
            r#"
            SELECT id, job_name, run_key, status, started_at, finished_at, error_message
            FROM cron_job_runs
            WHERE job_name = $1 AND status = 'running'
            ORDER BY started_at DESC
            LIMIT 1
            "#,
        )
        .bind(job_name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(run)
    }

    async fn find_run(&self, job_name: &str, run_key: &str) -> Result<Option<JobRun>, StoreError> {
        let run = sqlx::query_as::<_, JobRun>(
            r#"
            SELECT id, job_name, run_key, status, started_at, finished_at, error_message
            FROM cron_job_runs
            WHERE job_name = $1 AND run_key = $2
            "#,
        )
        .bind(job_name)
        .bind(run_key)
        .fetch_optional(&self.pool)
        .await?;
        Ok(run)
    }

    async fn insert_running(
        &self,
        job_name: &str,
        run_key: &str,
        started_at: DateTime<Utc>,
    ) -> Result<InsertRun, StoreError> {
        let inserted = sqlx::query_as::<_, JobRun>(
            r#"
            INSERT INTO cron_job_runs (job_name, run_key, status, started_at)
            VALUES ($1, $2, 'running', $3)
            ON CONFLICT (job_name, run_key) DO NOTHING
            RETURNING id, job_name, run_key, status, started_at, finished_at, error_message
            "#,
        )
        .bind(job_name)
        .bind(run_key)
        .bind(started_at)
        .fetch_optional(&self.pool)
        .await?;
        Ok(match inserted {
            Some(run) => InsertRun::Inserted(run),
            None => InsertRun::Conflict,
        })
    }

    async fn restart_run(
        &self,
        run_id: Uuid,
        expected: RunStatus,
        expected_started_at: DateTime<Utc>,
        started_at: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE cron_job_runs
            SET status = 'running', started_at = $4, finished_at = NULL, error_message = NULL
            WHERE id = $1 AND status = $2 AND started_at = $3
            "#,
        )
        .bind(run_id)
        .bind(expected.as_str())
        .bind(expected_started_at)
        .bind(started_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn fail_running(
        &self,
        run_id: Uuid,
        message: &str,
        finished_at: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE cron_job_runs
            SET status = 'failed', finished_at = $3, error_message = $2
            WHERE id = $1 AND status = 'running'
            "#,
        )
        .bind(run_id)
        .bind(message)
        .bind(finished_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn resolve_run(
        &self,
        run_id: Uuid,
        status: RunStatus,
        error_message: Option<&str>,
        finished_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE cron_job_runs
            SET status = $2, finished_at = $3, error_message = $4
            WHERE id = $1
            "#,
        )
        .bind(run_id)
        .bind(status.as_str())
        .bind(finished_at)
        .bind(error_message)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl EngagementStore for PgStore {
    async fn count_recent_messages(
        &self,
        template_keys: &[&str],
        since: DateTime<Utc>,
    ) -> Result<i64, StoreError> {
        let count = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*)::bigint
            FROM messages
            WHERE direction = 'outbound'
              AND template_key = ANY($1)
              AND created_at >= $2
            "#,
        )
        .bind(owned_keys(template_keys))
        .bind(since)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    async fn reminder_candidates(
        &self,
        from: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<EventBooking>, StoreError> {
        self.event_bookings_where("b.status = 'confirmed'", from, until)
            .await
    }

    async fn sent_booking_templates(
        &self,
        booking_ids: &[Uuid],
        template_keys: &[&str],
    ) -> Result<HashSet<(Uuid, String)>, StoreError> {
        if booking_ids.is_empty() {
            return Ok(HashSet::new());
        }
        let rows = sqlx::query_as::<_, (Uuid, String)>(
            r#"
            SELECT COALESCE(booking_id, table_booking_id) AS booking_id, template_key
            FROM messages
            WHERE (booking_id = ANY($1) OR table_booking_id = ANY($1))
              AND template_key = ANY($2)
            "#,
        )
        .bind(booking_ids)
        .bind(owned_keys(template_keys))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().collect())
    }

    async fn real_booking_pairs(
        &self,
        event_ids: &[Uuid],
    ) -> Result<HashSet<(Uuid, Uuid)>, StoreError> {
        if event_ids.is_empty() {
            return Ok(HashSet::new());
        }
        let rows = sqlx::query_as::<_, (Uuid, Uuid)>(
            r#"
            SELECT DISTINCT customer_id, event_id
            FROM bookings
            WHERE event_id = ANY($1)
              AND COALESCE(is_reminder_only, false) = false
              AND status NOT IN ('cancelled', 'expired')
            "#,
        )
        .bind(event_ids)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().collect())
    }

    async fn event_review_candidates(
        &self,
        from: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<EventBooking>, StoreError> {
        self.event_bookings_where(
            "b.status = 'confirmed' AND b.review_sms_sent_at IS NULL \
             AND COALESCE(b.is_reminder_only, false) = false",
            from,
            until,
        )
        .await
    }

    async fn table_review_candidates(
        &self,
        from: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<TableBooking>, StoreError> {
        let rows = sqlx::query_as::<_, TableBookingRow>(
            r#"
            SELECT tb.id, tb.status, tb.booking_date, tb.booking_time, tb.start_datetime,
                   tb.review_sms_sent_at,
                   c.id AS customer_id, c.first_name, c.mobile_number, c.sms_status
            FROM table_bookings tb
            JOIN customers c ON c.id = tb.customer_id
            WHERE tb.status = 'confirmed'
              AND tb.review_sms_sent_at IS NULL
              AND COALESCE(tb.start_datetime, (tb.booking_date + tb.booking_time) AT TIME ZONE $3)
                  BETWEEN $1 AND $2
            ORDER BY tb.booking_date, tb.booking_time, tb.id
            "#,
        )
        .bind(from)
        .bind(until)
        .bind(self.timezone.name())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(TableBooking::from).collect())
    }

    async fn mark_event_review_sent(
        &self,
        booking_id: Uuid,
        sent_at: DateTime<Utc>,
        window_closes_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE bookings
            SET review_sms_sent_at = $2,
                review_window_closes_at = $3,
                status = 'visited_waiting_for_review'
            WHERE id = $1 AND status = 'confirmed' AND review_sms_sent_at IS NULL
            "#,
        )
        .bind(booking_id)
        .bind(sent_at)
        .bind(window_closes_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn mark_table_review_sent(
        &self,
        booking_id: Uuid,
        sent_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE table_bookings
            SET review_sms_sent_at = $2, status = 'visited_waiting_for_review'
            WHERE id = $1 AND status = 'confirmed' AND review_sms_sent_at IS NULL
            "#,
        )
        .bind(booking_id)
        .bind(sent_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn marketing_events(
        &self,
        from: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<MarketingEvent>, StoreError> {
        let rows = sqlx::query_as::<_, MarketingEventRow>(
            r#"
            SELECT e.id, e.name, e.event_status, e.date, e.time, e.start_datetime,
                   e.category_id, e.event_type
            FROM events e
            WHERE COALESCE(e.event_status, 'scheduled') NOT IN ('cancelled', 'draft')
              AND COALESCE(e.start_datetime, (e.date + e.time) AT TIME ZONE $3) > $1
              AND COALESCE(e.start_datetime, (e.date + e.time) AT TIME ZONE $3) <= $2
            ORDER BY e.date, e.time, e.id
            "#,
        )
        .bind(from)
        .bind(until)
        .bind(self.timezone.name())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(MarketingEvent::from).collect())
    }

    async fn audience_customers(
        &self,
        scope: &AudienceScope,
        exclude_event_id: Uuid,
        started_before: DateTime<Utc>,
    ) -> Result<Vec<Customer>, StoreError> {
        let column = match scope {
            AudienceScope::Category(_) => "category_id",
            AudienceScope::EventType(_) => "event_type",
        };
        let sql = format!(
            r#"
            SELECT c.id, c.first_name, c.mobile_number, c.sms_status
            FROM customers c
            WHERE c.id IN (
                SELECT b.customer_id
                FROM bookings b
                JOIN events e ON e.id = b.event_id
                WHERE e.{column} = $1 AND e.id <> $2
                  AND {EVENT_START_EXPR} <= $4
                  AND COALESCE(b.is_reminder_only, false) = false
                  AND b.status NOT IN ('cancelled', 'expired')
                UNION
                SELECT w.customer_id
                FROM waitlist_entries w
                JOIN events e ON e.id = w.event_id
                WHERE e.{column} = $1 AND e.id <> $2
                  AND {EVENT_START_EXPR} <= $4
            )
            ORDER BY c.id
            "#
        );
        let query = sqlx::query_as::<_, CustomerRow>(&sql);
        let query = match scope {
            AudienceScope::Category(id) => query.bind(*id),
            AudienceScope::EventType(kind) => query.bind(kind.clone()),
        };
        let rows = query
            .bind(exclude_event_id)
            .bind(self.timezone.name())
            .bind(started_before)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(Customer::from).collect())
    }

    async fn manual_interest_recipients(
        &self,
        event_id: Uuid,
    ) -> Result<Vec<ManualInterestRecipient>, StoreError> {
        let rows = sqlx::query_as::<_, ManualInterestRow>(
            r#"
            SELECT r.id, r.event_id, r.reminder_14d_sent_at, r.reminder_7d_sent_at,
                   r.reminder_1d_sent_at,
                   c.id AS customer_id, c.first_name, c.mobile_number, c.sms_status
            FROM event_interest_manual_recipients r
            JOIN customers c ON c.id = r.customer_id
            WHERE r.event_id = $1
            ORDER BY r.created_at, r.id
            "#,
        )
        .bind(event_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(ManualInterestRecipient::from).collect())
    }

    async fn mark_manual_interest_sent(
        &self,
        recipient_id: Uuid,
        tier: InterestTier,
        sent_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let column = tier.sent_column();
        let sql = format!(
            "UPDATE event_interest_manual_recipients SET {column} = $2 \
             WHERE id = $1 AND {column} IS NULL"
        );
        let result = sqlx::query(&sql)
            .bind(recipient_id)
            .bind(sent_at)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn customers_sent_template(
        &self,
        event_id: Uuid,
        template_key: TemplateKey,
    ) -> Result<HashSet<Uuid>, StoreError> {
        let rows = sqlx::query_scalar::<_, Uuid>(
            r#"
            SELECT DISTINCT customer_id
            FROM messages
            WHERE event_id = $1 AND template_key = $2 AND customer_id IS NOT NULL
            "#,
        )
        .bind(event_id)
        .bind(template_key.as_str())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().collect())
    }

    async fn record_message(&self, message: &NewMessage) -> Result<Uuid, StoreError> {
        let id = sqlx::query_scalar::<_, Uuid>(
            r#"
            INSERT INTO messages (customer_id, booking_id, table_booking_id, event_id, direction,
                                  template_key, to_number, body, provider_message_id, scheduled_for)
            VALUES ($1, $2, $3, $4, 'outbound', $5, $6, $7, $8, $9)
            RETURNING id
            "#,
        )
        .bind(message.customer_id)
        .bind(message.booking_id)
        .bind(message.table_booking_id)
        .bind(message.event_id)
        .bind(message.template_key.as_str())
        .bind(&message.to_number)
        .bind(&message.body)
        .bind(&message.provider_message_id)
        .bind(message.scheduled_for)
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    async fn complete_event_bookings(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<CompletedBooking>, StoreError> {
        let sql = format!(
            r#"
            UPDATE bookings
            SET status = 'completed', completed_at = $1
            WHERE id IN (
                SELECT id FROM bookings
                WHERE status IN {AWAITING_REVIEW}
                  AND review_window_closes_at IS NOT NULL
                  AND review_window_closes_at <= $1
                ORDER BY review_window_closes_at
                LIMIT $2
                FOR UPDATE SKIP LOCKED
            )
            AND status IN {AWAITING_REVIEW}
            RETURNING id, customer_id, event_id
            "#
        );
        let rows = sqlx::query_as::<_, (Uuid, Uuid, Uuid)>(&sql)
            .bind(now)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .into_iter()
            .map(|(booking_id, customer_id, event_id)| CompletedBooking {
                kind: BookingKind::Event,
                booking_id,
                customer_id,
                event_id: Some(event_id),
            })
            .collect())
    }

    async fn complete_table_bookings(
        &self,
        sent_before: DateTime<Utc>,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<CompletedBooking>, StoreError> {
        let sql = format!(
            r#"
            UPDATE table_bookings
            SET status = 'completed', completed_at = $2
            WHERE id IN (
                SELECT id FROM table_bookings
                WHERE status IN {AWAITING_REVIEW}
                  AND review_sms_sent_at IS NOT NULL
                  AND review_sms_sent_at <= $1
                ORDER BY review_sms_sent_at
                LIMIT $3
                FOR UPDATE SKIP LOCKED
            )
            AND status IN {AWAITING_REVIEW}
            RETURNING id, customer_id
            "#
        );
        let rows = sqlx::query_as::<_, (Uuid, Uuid)>(&sql)
            .bind(sent_before)
            .bind(now)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .into_iter()
            .map(|(booking_id, customer_id)| CompletedBooking {
                kind: BookingKind::Table,
                booking_id,
                customer_id,
                event_id: None,
            })
            .collect())
    }

    async fn record_analytics_event(&self, event: &AnalyticsEvent) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO analytics_events (customer_id, event_type, booking_id, event_data)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(event.customer_id)
        .bind(&event.event_type)
        .bind(event.booking_id)
        .bind(&event.payload)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
