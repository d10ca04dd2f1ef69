use crate::schema::customer::{Customer, SmsStatus};
use crate::schema::message::TemplateKey;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The three marketing cadence points before an event starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterestTier {
    FourteenDays,
    SevenDays,
    OneDay,
}

impl InterestTier {
    pub fn days_before(&self) -> i64 {
        match self {
            InterestTier::FourteenDays => 14,
            InterestTier::SevenDays => 7,
            InterestTier::OneDay => 1,
        }
    }

    pub fn template_key(&self) -> TemplateKey {
        match self {
            InterestTier::FourteenDays => TemplateKey::InterestReminder14d,
            InterestTier::SevenDays => TemplateKey::InterestReminder7d,
            InterestTier::OneDay => TemplateKey::InterestReminder1d,
        }
    }

    /// Column on `event_interest_manual_recipients` that records this tier.
    pub fn sent_column(&self) -> &'static str {
        match self {
            InterestTier::FourteenDays => "reminder_14d_sent_at",
            InterestTier::SevenDays => "reminder_7d_sent_at",
            InterestTier::OneDay => "reminder_1d_sent_at",
        }
    }
}

/// A customer who explicitly asked to hear about one event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManualInterestRecipient {
    pub id: Uuid,
    pub event_id: Uuid,
    pub customer: Customer,
    pub reminder_14d_sent_at: Option<DateTime<Utc>>,
    pub reminder_7d_sent_at: Option<DateTime<Utc>>,
    pub reminder_1d_sent_at: Option<DateTime<Utc>>,
}

impl ManualInterestRecipient {
    pub fn sent_at(&self, tier: InterestTier) -> Option<DateTime<Utc>> {
        match tier {
            InterestTier::FourteenDays => self.reminder_14d_sent_at,
            InterestTier::SevenDays => self.reminder_7d_sent_at,
            InterestTier::OneDay => self.reminder_1d_sent_at,
        }
    }

    pub fn mark_sent(&mut self, tier: InterestTier, at: DateTime<Utc>) {
        let slot = match tier {
            InterestTier::FourteenDays => &mut self.reminder_14d_sent_at,
            InterestTier::SevenDays => &mut self.reminder_7d_sent_at,
            InterestTier::OneDay => &mut self.reminder_1d_sent_at,
        };
        slot.get_or_insert(at);
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ManualInterestRow {
    pub id: Uuid,
    pub event_id: Uuid,
    pub reminder_14d_sent_at: Option<DateTime<Utc>>,
    pub reminder_7d_sent_at: Option<DateTime<Utc>>,
    pub reminder_1d_sent_at: Option<DateTime<Utc>>,
    pub customer_id: Uuid,
    pub first_name: Option<String>,
    pub mobile_number: Option<String>,
    pub sms_status: Option<String>,
}

impl From<ManualInterestRow> for ManualInterestRecipient {
    fn from(row: ManualInterestRow) -> Self {
        ManualInterestRecipient {
            id: row.id,
            event_id: row.event_id,
            customer: Customer {
                id: row.customer_id,
                first_name: row.first_name,
                mobile_number: row.mobile_number,
                sms_status: SmsStatus::parse(row.sms_status.as_deref()),
            },
            reminder_14d_sent_at: row.reminder_14d_sent_at,
            reminder_7d_sent_at: row.reminder_7d_sent_at,
            reminder_1d_sent_at: row.reminder_1d_sent_at,
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CustomerRow {
    pub id: Uuid,
    pub first_name: Option<String>,
    pub mobile_number: Option<String>,
    pub sms_status: Option<String>,
}

impl From<CustomerRow> for Customer {
    fn from(row: CustomerRow) -> Self {
        Customer {
            id: row.id,
            first_name: row.first_name,
            mobile_number: row.mobile_number,
            sms_status: SmsStatus::parse(row.sms_status.as_deref()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn marking_a_tier_never_overwrites_the_first_send() {
        let first = Utc::now();
        let mut recipient = ManualInterestRecipient {
            id: Uuid::new_v4(),
            event_id: Uuid::new_v4(),
            customer: Customer {
                id: Uuid::new_v4(),
                first_name: None,
                mobile_number: None,
                sms_status: SmsStatus::Active,
            },
            reminder_14d_sent_at: None,
            reminder_7d_sent_at: None,
            reminder_1d_sent_at: None,
        };
        recipient.mark_sent(InterestTier::SevenDays, first);
        recipient.mark_sent(InterestTier::SevenDays, first + chrono::Duration::hours(1));
        assert_eq!(recipient.sent_at(InterestTier::SevenDays), Some(first));
        assert_eq!(recipient.sent_at(InterestTier::OneDay), None);
    }
}
