use crate::schema::customer::{Customer, SmsStatus};
use crate::schema::event::{EventStart, EventStatus, EventSummary};
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    Confirmed,
    VisitedWaitingForReview,
    ReviewClicked,
    Completed,
    Cancelled,
    Other,
}

impl BookingStatus {
    pub fn parse(raw: &str) -> Self {
        match raw.trim() {
            "confirmed" => BookingStatus::Confirmed,
            "visited_waiting_for_review" => BookingStatus::VisitedWaitingForReview,
            "review_clicked" => BookingStatus::ReviewClicked,
            "completed" => BookingStatus::Completed,
            "cancelled" => BookingStatus::Cancelled,
            _ => BookingStatus::Other,
        }
    }

    pub fn awaiting_review(&self) -> bool {
        matches!(
            self,
            BookingStatus::VisitedWaitingForReview | BookingStatus::ReviewClicked
        )
    }
}

/// A confirmed event booking joined with its customer and event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventBooking {
    pub id: Uuid,
    pub customer: Customer,
    pub event: EventSummary,
    pub status: BookingStatus,
    /// Tracks interest-reminder cadence only; not a real reservation.
    pub is_reminder_only: bool,
    pub review_sms_sent_at: Option<DateTime<Utc>>,
    pub review_window_closes_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableBooking {
    pub id: Uuid,
    pub customer: Customer,
    pub status: BookingStatus,
    pub start: Option<EventStart>,
    pub review_sms_sent_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingKind {
    Event,
    Table,
}

/// A booking the completion sweep just moved to `completed`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedBooking {
    pub kind: BookingKind,
    pub booking_id: Uuid,
    pub customer_id: Uuid,
    pub event_id: Option<Uuid>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct EventBookingRow {
    pub id: Uuid,
    pub status: String,
    pub is_reminder_only: Option<bool>,
    pub review_sms_sent_at: Option<DateTime<Utc>>,
    pub review_window_closes_at: Option<DateTime<Utc>>,
    pub customer_id: Uuid,
    pub first_name: Option<String>,
    pub mobile_number: Option<String>,
    pub sms_status: Option<String>,
    pub event_id: Uuid,
    pub event_name: String,
    pub event_status: Option<String>,
    pub event_date: Option<NaiveDate>,
    pub event_time: Option<NaiveTime>,
    pub start_datetime: Option<DateTime<Utc>>,
}

impl From<EventBookingRow> for EventBooking {
    fn from(row: EventBookingRow) -> Self {
        EventBooking {
            id: row.id,
            customer: Customer {
                id: row.customer_id,
                first_name: row.first_name,
                mobile_number: row.mobile_number,
                sms_status: SmsStatus::parse(row.sms_status.as_deref()),
            },
            event: EventSummary {
                id: row.event_id,
                name: row.event_name,
                status: EventStatus::parse(row.event_status.as_deref()),
                start: EventStart::from_columns(
                    row.start_datetime,
                    row.event_date,
                    row.event_time,
                ),
            },
            status: BookingStatus::parse(&row.status),
            is_reminder_only: row.is_reminder_only.unwrap_or(false),
            review_sms_sent_at: row.review_sms_sent_at,
            review_window_closes_at: row.review_window_closes_at,
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct TableBookingRow {
    pub id: Uuid,
    pub status: String,
    pub booking_date: Option<NaiveDate>,
    pub booking_time: Option<NaiveTime>,
    pub start_datetime: Option<DateTime<Utc>>,
    pub review_sms_sent_at: Option<DateTime<Utc>>,
    pub customer_id: Uuid,
    pub first_name: Option<String>,
    pub mobile_number: Option<String>,
    pub sms_status: Option<String>,
}

impl From<TableBookingRow> for TableBooking {
    fn from(row: TableBookingRow) -> Self {
        TableBooking {
            id: row.id,
            customer: Customer {
                id: row.customer_id,
                first_name: row.first_name,
                mobile_number: row.mobile_number,
                sms_status: SmsStatus::parse(row.sms_status.as_deref()),
            },
            status: BookingStatus::parse(&row.status),
            start: EventStart::from_columns(row.start_datetime, row.booking_date, row.booking_time),
            review_sms_sent_at: row.review_sms_sent_at,
        }
    }
}
