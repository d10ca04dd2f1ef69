use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    Scheduled,
    Cancelled,
    Draft,
    Postponed,
    SoldOut,
    Other,
}

impl EventStatus {
    pub fn parse(raw: Option<&str>) -> Self {
        match raw.map(str::trim) {
            None | Some("") | Some("scheduled") => EventStatus::Scheduled,
            Some("cancelled") => EventStatus::Cancelled,
            Some("draft") => EventStatus::Draft,
            Some("postponed") => EventStatus::Postponed,
            Some("sold_out") => EventStatus::SoldOut,
            Some(_) => EventStatus::Other,
        }
    }

    /// Cancelled and draft events never receive guest messaging.
    pub fn accepts_messaging(&self) -> bool {
        !matches!(self, EventStatus::Cancelled | EventStatus::Draft)
    }

    /// Only scheduled events are still taking bookings.
    pub fn is_open(&self) -> bool {
        matches!(self, EventStatus::Scheduled)
    }
}

/// Where an event's start time comes from.
///
/// Newer rows carry a direct timestamp; older ones only have a local date and time that must be
/// interpreted in the venue's timezone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventStart {
    At(DateTime<Utc>),
    Local { date: NaiveDate, time: NaiveTime },
}

impl EventStart {
    pub fn from_columns(
        start_datetime: Option<DateTime<Utc>>,
        date: Option<NaiveDate>,
        time: Option<NaiveTime>,
    ) -> Option<Self> {
        match (start_datetime, date, time) {
            (Some(at), _, _) => Some(EventStart::At(at)),
            (None, Some(date), Some(time)) => Some(EventStart::Local { date, time }),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventSummary {
    pub id: Uuid,
    pub name: String,
    pub status: EventStatus,
    pub start: Option<EventStart>,
}

/// An upcoming event considered for interest marketing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketingEvent {
    pub id: Uuid,
    pub name: String,
    pub status: EventStatus,
    pub start: Option<EventStart>,
    pub category_id: Option<Uuid>,
    pub event_type: Option<String>,
}

/// Who counts as "the same audience" as a target event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AudienceScope {
    Category(Uuid),
    EventType(String),
}

impl MarketingEvent {
    /// Category is preferred; event type is the fallback.
    pub fn audience_scope(&self) -> Option<AudienceScope> {
        if let Some(category_id) = self.category_id {
            return Some(AudienceScope::Category(category_id));
        }
        self.event_type
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(|t| AudienceScope::EventType(t.to_string()))
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct MarketingEventRow {
    pub id: Uuid,
    pub name: String,
    pub event_status: Option<String>,
    pub date: Option<NaiveDate>,
    pub time: Option<NaiveTime>,
    pub start_datetime: Option<DateTime<Utc>>,
    pub category_id: Option<Uuid>,
    pub event_type: Option<String>,
}

impl From<MarketingEventRow> for MarketingEvent {
    fn from(row: MarketingEventRow) -> Self {
        MarketingEvent {
            id: row.id,
            name: row.name,
            status: EventStatus::parse(row.event_status.as_deref()),
            start: EventStart::from_columns(row.start_datetime, row.date, row.time),
            category_id: row.category_id,
            event_type: row.event_type,
        }
    }
}
