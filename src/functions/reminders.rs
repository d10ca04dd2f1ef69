use crate::error::EngageError;
use crate::functions::dispatcher::{OutboundSms, SendResult, Stage, send_sms_safe};
use crate::functions::eligibility::{
    REMINDER_LOOKAHEAD_DAYS, REMINDER_LOOKBACK_DAYS, SkipReason, reminder_skip_reason,
    resolve_event_start, resolve_reminder_template,
};
use crate::functions::engagement::{SendStats, StageContext};
use crate::functions::templates;
use crate::schema::TemplateKey;
use chrono::Duration;
use std::collections::HashSet;
use uuid::Uuid;

/// 7-day and 1-day reminders for confirmed event bookings.
pub async fn send_event_reminders(
    ctx: &StageContext<'_>,
    stats: &mut SendStats,
) -> Result<(), EngageError> {
    let from = ctx.now - Duration::days(REMINDER_LOOKBACK_DAYS);
    let until = ctx.now + Duration::days(REMINDER_LOOKAHEAD_DAYS);
    let bookings = ctx.store.reminder_candidates(from, until).await?;
    if bookings.is_empty() {
        return Ok(());
    }

    let booking_ids: Vec<Uuid> = bookings.iter().map(|b| b.id).collect();
    let event_ids: Vec<Uuid> = bookings
        .iter()
        .map(|b| b.event.id)
        .collect::<HashSet<_>>()
        .into_iter()
        .collect();
    let keys = [
        TemplateKey::EventReminder7d.as_str(),
        TemplateKey::EventReminder1d.as_str(),
    ];
    let mut already_sent = ctx.store.sent_booking_templates(&booking_ids, &keys).await?;
    let real_bookings = ctx.store.real_booking_pairs(&event_ids).await?;

    for booking in &bookings {
        let start = booking
            .event
            .start
            .and_then(|s| resolve_event_start(&s, ctx.messages.timezone));

        if let Some(reason) = reminder_skip_reason(booking, start, ctx.now, &real_bookings) {
            // Past events are inside the scan window but never count as skips.
            if reason != SkipReason::StartPassed {
                tracing::debug!(
                    booking_id = %booking.id,
                    reason = ?reason,
                    "reminders: skipping booking"
                );
                stats.skipped += 1;
            }
            continue;
        }
        let Some(start) = start else { continue };
        let Some(key) = resolve_reminder_template(start, ctx.now) else {
            continue;
        };
        if already_sent.contains(&(booking.id, key.as_str().to_string())) {
            continue;
        }

        let body = templates::event_reminder(
            &ctx.messages,
            key,
            &booking.customer,
            &booking.event.name,
            start,
        );
        let Some(sms) = OutboundSms::for_customer(Stage::Reminders, &booking.customer, key, body)
        else {
            stats.skipped += 1;
            continue;
        };
        let sms = sms.booking(booking.id).event(booking.event.id);

        match send_sms_safe(ctx.gateway, ctx.store, &sms).await? {
            SendResult::Sent { .. } => {
                already_sent.insert((booking.id, key.as_str().to_string()));
                stats.sent += 1;
            }
            SendResult::Skipped { .. } => stats.skipped += 1,
        }
    }

    tracing::info!(sent = stats.sent, skipped = stats.skipped, "reminders: stage done");
    Ok(())
}
