use crate::schema::{Customer, InterestTier, TemplateKey};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use uuid::Uuid;

/// Links and sign-off details shared by every message body.
#[derive(Debug, Clone)]
pub struct MessageContext {
    pub timezone: Tz,
    pub app_base_url: String,
    pub contact_phone: Option<String>,
}

impl MessageContext {
    fn when(&self, start: DateTime<Utc>) -> String {
        start
            .with_timezone(&self.timezone)
            .format("%A %-d %B at %-I:%M%P")
            .to_string()
    }

    fn time_only(&self, start: DateTime<Utc>) -> String {
        start
            .with_timezone(&self.timezone)
            .format("%-I:%M%P")
            .to_string()
    }

    fn contact_line(&self) -> String {
        match &self.contact_phone {
            Some(phone) => format!(" Questions? Call us on {phone}."),
            None => String::new(),
        }
    }

    pub fn review_link(&self, booking_id: Uuid) -> String {
        format!("{}/review/{booking_id}", self.app_base_url)
    }

    pub fn event_link(&self, event_id: Uuid) -> String {
        format!("{}/events/{event_id}", self.app_base_url)
    }
}

pub fn event_reminder(
    ctx: &MessageContext,
    key: TemplateKey,
    customer: &Customer,
    event_name: &str,
    start: DateTime<Utc>,
) -> String {
    let name = customer.greeting_name();
    let body = match key {
        TemplateKey::EventReminder1d => format!(
            "Hi {name}, see you tomorrow for {event_name}! Doors at {}.",
            ctx.time_only(start)
        ),
        _ => format!(
            "Hi {name}, just a reminder that {event_name} is on {}. We're looking forward to seeing you.",
            ctx.when(start)
        ),
    };
    format!("{body}{}", ctx.contact_line())
}

pub fn event_review_request(
    ctx: &MessageContext,
    customer: &Customer,
    event_name: &str,
    booking_id: Uuid,
) -> String {
    format!(
        "Hi {}, thanks for coming to {event_name}! We'd love a quick review: {}",
        customer.greeting_name(),
        ctx.review_link(booking_id)
    )
}

pub fn table_review_request(ctx: &MessageContext, customer: &Customer, booking_id: Uuid) -> String {
    format!(
        "Hi {}, thanks for dining with us today. How did we do? {}",
        customer.greeting_name(),
        ctx.review_link(booking_id)
    )
}

pub fn interest_nudge(
    ctx: &MessageContext,
    tier: InterestTier,
    customer: &Customer,
    event_id: Uuid,
    event_name: &str,
    start: DateTime<Utc>,
) -> String {
    let name = customer.greeting_name();
    let link = ctx.event_link(event_id);
    match tier {
        InterestTier::OneDay => format!(
            "Hi {name}, {event_name} is tomorrow at {}. Last chance to grab a spot: {link}",
            ctx.time_only(start)
        ),
        InterestTier::SevenDays => format!(
            "Hi {name}, {event_name} is one week away ({}). Book here: {link}",
            ctx.when(start)
        ),
        InterestTier::FourteenDays => format!(
            "Hi {name}, we thought you'd like {event_name} on {}. Book here: {link}",
            ctx.when(start)
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::SmsStatus;

    fn ctx() -> MessageContext {
        MessageContext {
            timezone: chrono_tz::Europe::London,
            app_base_url: "https://venue.example".to_string(),
            contact_phone: Some("01234 567890".to_string()),
        }
    }

    fn customer(first_name: Option<&str>) -> Customer {
        Customer {
            id: Uuid::new_v4(),
            first_name: first_name.map(str::to_string),
            mobile_number: Some("+447700900000".to_string()),
            sms_status: SmsStatus::Active,
        }
    }

    #[test]
    fn reminder_renders_local_time_and_contact() {
        let start = DateTime::parse_from_rfc3339("2025-07-01T18:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let body = event_reminder(
            &ctx(),
            TemplateKey::EventReminder1d,
            &customer(Some("Jo")),
            "Quiz Night",
            start,
        );
        assert!(body.starts_with("Hi Jo, see you tomorrow for Quiz Night!"));
        assert!(body.contains("7:00pm"));
        assert!(body.ends_with("Call us on 01234 567890."));
    }

    #[test]
    fn blank_first_name_falls_back_to_generic_greeting() {
        let booking_id = Uuid::new_v4();
        let body = table_review_request(&ctx(), &customer(Some(" ")), booking_id);
        assert!(body.starts_with("Hi there,"));
        assert!(body.ends_with(&format!("https://venue.example/review/{booking_id}")));
    }
}
