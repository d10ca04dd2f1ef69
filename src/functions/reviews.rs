use crate::error::EngageError;
use crate::functions::dispatcher::{OutboundSms, SendResult, Stage, send_sms_safe};
use crate::functions::eligibility::{
    EVENT_REVIEW_LOOKBACK_DAYS, REVIEW_WINDOW_DAYS, TABLE_REVIEW_LOOKBACK_DAYS,
    customer_skip_reason, event_review_eligible, resolve_event_start, table_review_eligible,
};
use crate::functions::engagement::{SendStats, StageContext};
use crate::functions::templates;
use crate::schema::{EventBooking, TableBooking, TemplateKey};
use chrono::Duration;
use uuid::Uuid;

/// Bookings handled per stage per run.
pub const REVIEW_BATCH_LIMIT: usize = 50;

/// Post-visit review requests for event bookings, sent the morning after.
pub async fn send_event_reviews(
    ctx: &StageContext<'_>,
    stats: &mut SendStats,
) -> Result<(), EngageError> {
    let tz = ctx.messages.timezone;
    let from = ctx.now - Duration::days(EVENT_REVIEW_LOOKBACK_DAYS);
    let candidates = ctx.store.event_review_candidates(from, ctx.now).await?;

    let mut due: Vec<&EventBooking> = Vec::new();
    for booking in &candidates {
        let Some(start) = booking.event.start.and_then(|s| resolve_event_start(&s, tz)) else {
            continue;
        };
        if !event_review_eligible(start, ctx.now, tz) {
            continue;
        }
        if !booking.event.status.accepts_messaging()
            || customer_skip_reason(&booking.customer).is_some()
        {
            stats.skipped += 1;
            continue;
        }
        due.push(booking);
        if due.len() >= REVIEW_BATCH_LIMIT {
            break;
        }
    }
    if due.is_empty() {
        return Ok(());
    }

    let ids: Vec<Uuid> = due.iter().map(|b| b.id).collect();
    let key = TemplateKey::EventReviewFollowup;
    let already_sent = ctx
        .store
        .sent_booking_templates(&ids, &[key.as_str()])
        .await?;
    let window_closes_at = ctx.now + Duration::days(REVIEW_WINDOW_DAYS);

    for booking in due {
        if already_sent.contains(&(booking.id, key.as_str().to_string())) {
            // Sent on an earlier run that died before marking the booking.
            tracing::info!(booking_id = %booking.id, "reviews: repairing unmarked event review");
            ctx.store
                .mark_event_review_sent(booking.id, ctx.now, window_closes_at)
                .await?;
            continue;
        }

        let body = templates::event_review_request(
            &ctx.messages,
            &booking.customer,
            &booking.event.name,
            booking.id,
        );
        let Some(sms) = OutboundSms::for_customer(Stage::EventReviews, &booking.customer, key, body)
        else {
            stats.skipped += 1;
            continue;
        };
        let sms = sms.booking(booking.id).event(booking.event.id);

        match send_sms_safe(ctx.gateway, ctx.store, &sms).await? {
            SendResult::Sent { .. } => {
                stats.sent += 1;
                let marked = ctx
                    .store
                    .mark_event_review_sent(booking.id, ctx.now, window_closes_at)
                    .await?;
                if !marked {
                    tracing::warn!(
                        booking_id = %booking.id,
                        "reviews: event booking changed before it could be marked"
                    );
                }
            }
            SendResult::Skipped { .. } => stats.skipped += 1,
        }
    }

    tracing::info!(sent = stats.sent, skipped = stats.skipped, "reviews: event stage done");
    Ok(())
}

/// Review requests for table bookings, a few hours after the booking time.
pub async fn send_table_reviews(
    ctx: &StageContext<'_>,
    stats: &mut SendStats,
) -> Result<(), EngageError> {
    let tz = ctx.messages.timezone;
    let from = ctx.now - Duration::days(TABLE_REVIEW_LOOKBACK_DAYS);
    let candidates = ctx.store.table_review_candidates(from, ctx.now).await?;

    let mut due: Vec<&TableBooking> = Vec::new();
    for booking in &candidates {
        let Some(start) = booking.start.and_then(|s| resolve_event_start(&s, tz)) else {
            continue;
        };
        if !table_review_eligible(start, ctx.now) {
            continue;
        }
        if customer_skip_reason(&booking.customer).is_some() {
            stats.skipped += 1;
            continue;
        }
        due.push(booking);
        if due.len() >= REVIEW_BATCH_LIMIT {
            break;
        }
    }
    if due.is_empty() {
        return Ok(());
    }

    let ids: Vec<Uuid> = due.iter().map(|b| b.id).collect();
    let key = TemplateKey::TableReviewFollowup;
    let already_sent = ctx
        .store
        .sent_booking_templates(&ids, &[key.as_str()])
        .await?;

    for booking in due {
        if already_sent.contains(&(booking.id, key.as_str().to_string())) {
            tracing::info!(booking_id = %booking.id, "reviews: repairing unmarked table review");
            ctx.store.mark_table_review_sent(booking.id, ctx.now).await?;
            continue;
        }

        let body = templates::table_review_request(&ctx.messages, &booking.customer, booking.id);
        let Some(sms) = OutboundSms::for_customer(Stage::TableReviews, &booking.customer, key, body)
        else {
            stats.skipped += 1;
            continue;
        };
        let sms = sms.table_booking(booking.id);

        match send_sms_safe(ctx.gateway, ctx.store, &sms).await? {
            SendResult::Sent { .. } => {
                stats.sent += 1;
                if !ctx.store.mark_table_review_sent(booking.id, ctx.now).await? {
                    tracing::warn!(
                        booking_id = %booking.id,
                        "reviews: table booking changed before it could be marked"
                    );
                }
            }
            SendResult::Skipped { .. } => stats.skipped += 1,
        }
    }

    tracing::info!(sent = stats.sent, skipped = stats.skipped, "reviews: table stage done");
    Ok(())
}
