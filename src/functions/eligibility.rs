//! Pure "is it due?" decisions. Nothing here touches the database or the clock.

use crate::schema::{
    Customer, EventBooking, EventStart, EventSummary, InterestTier, SmsStatus, TemplateKey,
};
use chrono::{DateTime, Duration, LocalResult, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use std::collections::HashSet;
use uuid::Uuid;

pub const REMINDER_LOOKBACK_DAYS: i64 = 14;
pub const REMINDER_LOOKAHEAD_DAYS: i64 = 8;
pub const EVENT_REVIEW_LOOKBACK_DAYS: i64 = 14;
pub const TABLE_REVIEW_LOOKBACK_DAYS: i64 = 7;
pub const TABLE_REVIEW_DELAY_HOURS: i64 = 4;
pub const REVIEW_WINDOW_DAYS: i64 = 7;
pub const EVENT_REVIEW_LOCAL_HOUR: u32 = 9;
pub const MARKETING_HORIZON_DAYS: i64 = 14;

/// Resolves a local wall-clock time, taking the earlier instant when the clocks go back and
/// skipping forward an hour when they go forward.
fn localize(tz: Tz, naive: chrono::NaiveDateTime) -> Option<DateTime<Utc>> {
    match tz.from_local_datetime(&naive) {
        LocalResult::Single(at) => Some(at.with_timezone(&Utc)),
        LocalResult::Ambiguous(earliest, _) => Some(earliest.with_timezone(&Utc)),
        LocalResult::None => match tz.from_local_datetime(&(naive + Duration::hours(1))) {
            LocalResult::Single(at) | LocalResult::Ambiguous(at, _) => Some(at.with_timezone(&Utc)),
            LocalResult::None => None,
        },
    }
}

pub fn resolve_event_start(start: &EventStart, tz: Tz) -> Option<DateTime<Utc>> {
    match start {
        EventStart::At(at) => Some(*at),
        EventStart::Local { date, time } => localize(tz, date.and_time(*time)),
    }
}

/// Which pre-event reminder is due right now, if any. The 1-day reminder always wins.
pub fn resolve_reminder_template(start: DateTime<Utc>, now: DateTime<Utc>) -> Option<TemplateKey> {
    if now >= start {
        return None;
    }
    if now >= start - Duration::days(1) {
        Some(TemplateKey::EventReminder1d)
    } else if now >= start - Duration::days(7) {
        Some(TemplateKey::EventReminder7d)
    } else {
        None
    }
}

/// 09:00 local time on the morning after the event.
pub fn event_review_due_at(start: DateTime<Utc>, tz: Tz) -> Option<DateTime<Utc>> {
    let next_day = start.with_timezone(&tz).date_naive().succ_opt()?;
    let nine = NaiveTime::from_hms_opt(EVENT_REVIEW_LOCAL_HOUR, 0, 0)?;
    localize(tz, next_day.and_time(nine))
}

pub fn table_review_due_at(start: DateTime<Utc>) -> DateTime<Utc> {
    start + Duration::hours(TABLE_REVIEW_DELAY_HOURS)
}

pub fn event_review_eligible(start: DateTime<Utc>, now: DateTime<Utc>, tz: Tz) -> bool {
    if start >= now || start < now - Duration::days(EVENT_REVIEW_LOOKBACK_DAYS) {
        return false;
    }
    event_review_due_at(start, tz).is_some_and(|due| now >= due)
}

pub fn table_review_eligible(start: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    if start >= now || start < now - Duration::days(TABLE_REVIEW_LOOKBACK_DAYS) {
        return false;
    }
    now >= table_review_due_at(start)
}

/// The most specific marketing tier whose threshold has been crossed.
pub fn resolve_interest_tier(start: DateTime<Utc>, now: DateTime<Utc>) -> Option<InterestTier> {
    if now >= start {
        return None;
    }
    [
        InterestTier::OneDay,
        InterestTier::SevenDays,
        InterestTier::FourteenDays,
    ]
    .into_iter()
    .find(|tier| now >= start - Duration::days(tier.days_before()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    NoMobile,
    SmsOptedOut,
    EventNotMessageable,
    NoStartTime,
    StartPassed,
    DuplicateReminderOnly,
}

/// Why a customer cannot be texted at all.
pub fn customer_skip_reason(customer: &Customer) -> Option<SkipReason> {
    if !customer.has_mobile() {
        return Some(SkipReason::NoMobile);
    }
    if customer.sms_status != SmsStatus::Active {
        return Some(SkipReason::SmsOptedOut);
    }
    None
}

/// Hard exclusions for a pre-event reminder, checked before any template is resolved.
///
/// `real_bookings` holds `(customer_id, event_id)` pairs backed by a real reservation.
pub fn reminder_skip_reason(
    booking: &EventBooking,
    start: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    real_bookings: &HashSet<(Uuid, Uuid)>,
) -> Option<SkipReason> {
    if let Some(reason) = customer_skip_reason(&booking.customer) {
        return Some(reason);
    }
    if !event_accepts_messaging(&booking.event) {
        return Some(SkipReason::EventNotMessageable);
    }
    let Some(start) = start else {
        return Some(SkipReason::NoStartTime);
    };
    if start <= now {
        return Some(SkipReason::StartPassed);
    }
    if booking.is_reminder_only && real_bookings.contains(&(booking.customer.id, booking.event.id))
    {
        return Some(SkipReason::DuplicateReminderOnly);
    }
    None
}

fn event_accepts_messaging(event: &EventSummary) -> bool {
    event.status.accepts_messaging()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{BookingStatus, EventStatus};
    use chrono::{NaiveDate, NaiveTime};

    const LONDON: Tz = chrono_tz::Europe::London;

    fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    fn booking(reminder_only: bool, status: EventStatus) -> EventBooking {
        EventBooking {
            id: Uuid::new_v4(),
            customer: Customer {
                id: Uuid::new_v4(),
                first_name: Some("Sam".to_string()),
                mobile_number: Some("+447700900321".to_string()),
                sms_status: SmsStatus::Active,
            },
            event: EventSummary {
                id: Uuid::new_v4(),
                name: "Comedy Night".to_string(),
                status,
                start: None,
            },
            status: BookingStatus::Confirmed,
            is_reminder_only: reminder_only,
            review_sms_sent_at: None,
            review_window_closes_at: None,
        }
    }

    #[test]
    fn local_start_is_interpreted_in_venue_timezone() {
        let summer = EventStart::Local {
            date: NaiveDate::from_ymd_opt(2025, 7, 1).unwrap(),
            time: NaiveTime::from_hms_opt(19, 0, 0).unwrap(),
        };
        assert_eq!(
            resolve_event_start(&summer, LONDON),
            Some(at("2025-07-01T18:00:00Z"))
        );
        let winter = EventStart::Local {
            date: NaiveDate::from_ymd_opt(2025, 3, 10).unwrap(),
            time: NaiveTime::from_hms_opt(19, 0, 0).unwrap(),
        };
        assert_eq!(
            resolve_event_start(&winter, LONDON),
            Some(at("2025-03-10T19:00:00Z"))
        );
    }

    #[test]
    fn local_start_inside_spring_forward_gap_moves_later() {
        let gap = EventStart::Local {
            date: NaiveDate::from_ymd_opt(2025, 3, 30).unwrap(),
            time: NaiveTime::from_hms_opt(1, 30, 0).unwrap(),
        };
        assert_eq!(
            resolve_event_start(&gap, LONDON),
            Some(at("2025-03-30T01:30:00Z"))
        );
    }

    #[test]
    fn twenty_three_hours_out_resolves_one_day_template() {
        let now = at("2025-03-09T20:00:00Z");
        let start = now + Duration::hours(23);
        assert_eq!(
            resolve_reminder_template(start, now),
            Some(TemplateKey::EventReminder1d)
        );
    }

    #[test]
    fn six_days_out_is_seven_day_and_eight_days_is_nothing() {
        let now = at("2025-03-01T12:00:00Z");
        assert_eq!(
            resolve_reminder_template(now + Duration::days(6), now),
            Some(TemplateKey::EventReminder7d)
        );
        assert_eq!(resolve_reminder_template(now + Duration::days(8), now), None);
    }

    #[test]
    fn worked_london_example() {
        let start = resolve_event_start(
            &EventStart::Local {
                date: NaiveDate::from_ymd_opt(2025, 3, 10).unwrap(),
                time: NaiveTime::from_hms_opt(19, 0, 0).unwrap(),
            },
            LONDON,
        )
        .unwrap();
        assert_eq!(
            resolve_reminder_template(start, at("2025-03-09T19:01:00Z")),
            Some(TemplateKey::EventReminder1d)
        );
        assert_eq!(
            resolve_reminder_template(start, at("2025-03-03T19:01:00Z")),
            Some(TemplateKey::EventReminder7d)
        );
        assert_eq!(
            resolve_reminder_template(start, at("2025-02-20T12:00:00Z")),
            None
        );
    }

    #[test]
    fn no_reminder_once_event_started() {
        let now = at("2025-03-10T19:00:00Z");
        assert_eq!(resolve_reminder_template(now, now), None);
    }

    #[test]
    fn event_review_waits_for_nine_am_next_morning() {
        let start = at("2025-03-10T19:00:00Z");
        assert_eq!(
            event_review_due_at(start, LONDON),
            Some(at("2025-03-11T09:00:00Z"))
        );
        assert!(!event_review_eligible(start, at("2025-03-11T08:59:00Z"), LONDON));
        assert!(event_review_eligible(start, at("2025-03-11T09:00:00Z"), LONDON));
        assert!(!event_review_eligible(start, at("2025-03-25T09:00:00Z"), LONDON));
    }

    #[test]
    fn event_review_nine_am_follows_british_summer_time() {
        let start = at("2025-07-01T18:00:00Z");
        assert_eq!(
            event_review_due_at(start, LONDON),
            Some(at("2025-07-02T08:00:00Z"))
        );
    }

    #[test]
    fn table_review_needs_four_hours() {
        let now = at("2025-03-10T22:00:00Z");
        assert!(!table_review_eligible(now - Duration::hours(3), now));
        assert!(table_review_eligible(
            now - Duration::hours(4) - Duration::minutes(1),
            now
        ));
        assert!(!table_review_eligible(now - Duration::days(8), now));
    }

    #[test]
    fn interest_tier_picks_most_specific_threshold() {
        let now = at("2025-03-01T12:00:00Z");
        assert_eq!(
            resolve_interest_tier(now + Duration::days(13), now),
            Some(InterestTier::FourteenDays)
        );
        assert_eq!(
            resolve_interest_tier(now + Duration::days(5), now),
            Some(InterestTier::SevenDays)
        );
        assert_eq!(
            resolve_interest_tier(now + Duration::hours(20), now),
            Some(InterestTier::OneDay)
        );
        assert_eq!(resolve_interest_tier(now + Duration::days(15), now), None);
        assert_eq!(resolve_interest_tier(now - Duration::hours(1), now), None);
    }

    #[test]
    fn reminder_only_booking_yields_to_real_booking() {
        let now = at("2025-03-01T12:00:00Z");
        let start = Some(now + Duration::days(2));
        let reminder_only = booking(true, EventStatus::Scheduled);
        let mut real = HashSet::new();
        assert_eq!(reminder_skip_reason(&reminder_only, start, now, &real), None);

        real.insert((reminder_only.customer.id, reminder_only.event.id));
        assert_eq!(
            reminder_skip_reason(&reminder_only, start, now, &real),
            Some(SkipReason::DuplicateReminderOnly)
        );

        let genuine = booking(false, EventStatus::Scheduled);
        real.insert((genuine.customer.id, genuine.event.id));
        assert_eq!(reminder_skip_reason(&genuine, start, now, &real), None);
    }

    #[test]
    fn cancelled_events_and_opted_out_customers_are_skipped() {
        let now = at("2025-03-01T12:00:00Z");
        let start = Some(now + Duration::days(2));
        let none = HashSet::new();

        let cancelled = booking(false, EventStatus::Cancelled);
        assert_eq!(
            reminder_skip_reason(&cancelled, start, now, &none),
            Some(SkipReason::EventNotMessageable)
        );

        let mut opted_out = booking(false, EventStatus::Scheduled);
        opted_out.customer.sms_status = SmsStatus::OptedOut;
        assert_eq!(
            reminder_skip_reason(&opted_out, start, now, &none),
            Some(SkipReason::SmsOptedOut)
        );

        let mut no_mobile = booking(false, EventStatus::Scheduled);
        no_mobile.customer.mobile_number = None;
        assert_eq!(
            reminder_skip_reason(&no_mobile, start, now, &none),
            Some(SkipReason::NoMobile)
        );

        let past = booking(false, EventStatus::Scheduled);
        assert_eq!(
            reminder_skip_reason(&past, Some(now - Duration::hours(1)), now, &none),
            Some(SkipReason::StartPassed)
        );
    }
}
