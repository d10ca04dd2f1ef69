//! Interest marketing: nudges for upcoming events aimed at people who showed interest in them
//! or in events like them.
//!
//! Manual opt-ins get one message per tier (14, 7 and 1 days out) tracked on their own row.
//! Everyone else in the audience gets at most one nudge per event, logged under the 14-day key.

use crate::error::EngageError;
use crate::functions::dispatcher::{OutboundSms, Stage, send_sms_safe};
use crate::functions::eligibility::{
    MARKETING_HORIZON_DAYS, customer_skip_reason, resolve_event_start, resolve_interest_tier,
};
use crate::functions::engagement::{MarketingStats, StageContext};
use crate::functions::templates;
use crate::schema::{Customer, InterestTier, MarketingEvent, TemplateKey};
use chrono::{DateTime, Duration, Utc};
use std::collections::HashSet;
use uuid::Uuid;

/// Marketing messages sent per run across all events.
pub const MARKETING_SEND_LIMIT: u32 = 50;

/// Audience members get a single nudge per event; this is the key it is logged under.
const AUDIENCE_TEMPLATE: TemplateKey = TemplateKey::InterestReminder14d;

struct DueEvent {
    event: MarketingEvent,
    start: DateTime<Utc>,
    tier: InterestTier,
}

fn at_limit(stats: &mut MarketingStats) -> bool {
    if stats.sent >= MARKETING_SEND_LIMIT {
        stats.capped = true;
    }
    stats.capped
}

async fn nudge(
    ctx: &StageContext<'_>,
    due: &DueEvent,
    customer: &Customer,
    key: TemplateKey,
) -> Result<bool, EngageError> {
    let body = templates::interest_nudge(
        &ctx.messages,
        due.tier,
        customer,
        due.event.id,
        &due.event.name,
        due.start,
    );
    let Some(sms) = OutboundSms::for_customer(Stage::Marketing, customer, key, body) else {
        return Ok(false);
    };
    let sms = sms.event(due.event.id);
    Ok(send_sms_safe(ctx.gateway, ctx.store, &sms).await?.is_sent())
}

pub async fn send_interest_marketing(
    ctx: &StageContext<'_>,
    stats: &mut MarketingStats,
) -> Result<(), EngageError> {
    let until = ctx.now + Duration::days(MARKETING_HORIZON_DAYS);
    let events = ctx.store.marketing_events(ctx.now, until).await?;

    let due: Vec<DueEvent> = events
        .into_iter()
        .filter(|event| event.status.is_open())
        .filter_map(|event| {
            let start = event
                .start
                .and_then(|s| resolve_event_start(&s, ctx.messages.timezone))?;
            let tier = resolve_interest_tier(start, ctx.now)?;
            Some(DueEvent { event, start, tier })
        })
        .collect();
    if due.is_empty() {
        return Ok(());
    }

    let event_ids: Vec<Uuid> = due.iter().map(|d| d.event.id).collect();
    let booked = ctx.store.real_booking_pairs(&event_ids).await?;

    for item in &due {
        if at_limit(stats) {
            break;
        }
        stats.events_considered += 1;
        let event_id = item.event.id;
        let mut contacted: HashSet<Uuid> = HashSet::new();

        for recipient in ctx.store.manual_interest_recipients(event_id).await? {
            let customer_id = recipient.customer.id;
            if !contacted.insert(customer_id)
                || booked.contains(&(customer_id, event_id))
                || recipient.sent_at(item.tier).is_some()
            {
                continue;
            }
            if customer_skip_reason(&recipient.customer).is_some() {
                stats.skipped += 1;
                continue;
            }
            if at_limit(stats) {
                break;
            }

            if nudge(ctx, item, &recipient.customer, item.tier.template_key()).await? {
                stats.sent += 1;
                if !ctx
                    .store
                    .mark_manual_interest_sent(recipient.id, item.tier, ctx.now)
                    .await?
                {
                    tracing::warn!(
                        recipient_id = %recipient.id,
                        tier = ?item.tier,
                        "marketing: manual recipient already marked"
                    );
                }
            } else {
                stats.skipped += 1;
            }
        }

        let Some(scope) = item.event.audience_scope() else {
            continue;
        };
        let already_nudged = ctx
            .store
            .customers_sent_template(event_id, AUDIENCE_TEMPLATE)
            .await?;

        for customer in ctx
            .store
            .audience_customers(&scope, event_id, ctx.now)
            .await? {
            if !contacted.insert(customer.id)
                || booked.contains(&(customer.id, event_id))
                || already_nudged.contains(&customer.id)
            {
                continue;
            }
            if customer_skip_reason(&customer).is_some() {
                stats.skipped += 1;
                continue;
            }
            if at_limit(stats) {
                break;
            }

            if nudge(ctx, item, &customer, AUDIENCE_TEMPLATE).await? {
                stats.sent += 1;
            } else {
                stats.skipped += 1;
            }
        }
    }

    tracing::info!(
        sent = stats.sent,
        skipped = stats.skipped,
        events = stats.events_considered,
        capped = stats.capped,
        "marketing: stage done"
    );
    Ok(())
}
