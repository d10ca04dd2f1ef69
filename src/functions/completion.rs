use crate::error::EngageError;
use crate::functions::eligibility::REVIEW_WINDOW_DAYS;
use crate::functions::engagement::{CompletionStats, StageContext};
use crate::schema::{AnalyticsEvent, CompletedBooking};
use chrono::Duration;

const COMPLETION_BATCH_SIZE: i64 = 100;

fn completion_event(booking: &CompletedBooking) -> AnalyticsEvent {
    AnalyticsEvent {
        customer_id: booking.customer_id,
        event_type: "booking_completed".to_string(),
        booking_id: Some(booking.booking_id),
        payload: serde_json::json!({
            "booking_type": booking.kind,
            "booking_id": booking.booking_id,
            "event_id": booking.event_id,
        }),
    }
}

async fn record_completions(
    ctx: &StageContext<'_>,
    batch: &[CompletedBooking],
    stats: &mut CompletionStats,
) {
    for booking in batch {
        stats.completed += 1;
        if let Err(err) = ctx.store.record_analytics_event(&completion_event(booking)).await {
            stats.analytics_failures += 1;
            tracing::warn!(
                booking_id = %booking.booking_id,
                kind = ?booking.kind,
                error = %err,
                "completion: failed to record analytics"
            );
        }
    }
}

/// Closes event bookings whose review window has ended.
pub async fn sweep_event_completions(
    ctx: &StageContext<'_>,
    stats: &mut CompletionStats,
) -> Result<(), EngageError> {
    loop {
        let batch = ctx
            .store
            .complete_event_bookings(ctx.now, COMPLETION_BATCH_SIZE)
            .await?;
        record_completions(ctx, &batch, stats).await;
        if (batch.len() as i64) < COMPLETION_BATCH_SIZE {
            break;
        }
    }
    if stats.completed > 0 {
        tracing::info!(completed = stats.completed, "completion: event bookings completed");
    }
    Ok(())
}

/// Closes table bookings whose review request went out a full window ago.
pub async fn sweep_table_completions(
    ctx: &StageContext<'_>,
    stats: &mut CompletionStats,
) -> Result<(), EngageError> {
    let sent_before = ctx.now - Duration::days(REVIEW_WINDOW_DAYS);
    loop {
        let batch = ctx
            .store
            .complete_table_bookings(sent_before, ctx.now, COMPLETION_BATCH_SIZE)
            .await?;
        record_completions(ctx, &batch, stats).await;
        if (batch.len() as i64) < COMPLETION_BATCH_SIZE {
            break;
        }
    }
    if stats.completed > 0 {
        tracing::info!(completed = stats.completed, "completion: table bookings completed");
    }
    Ok(())
}
