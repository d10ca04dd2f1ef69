use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Template tags this job stamps on outbound messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TemplateKey {
    #[serde(rename = "event_reminder_7d")]
    EventReminder7d,
    #[serde(rename = "event_reminder_1d")]
    EventReminder1d,
    #[serde(rename = "event_review_followup")]
    EventReviewFollowup,
    #[serde(rename = "table_review_followup")]
    TableReviewFollowup,
    #[serde(rename = "event_interest_reminder_14d")]
    InterestReminder14d,
    #[serde(rename = "event_interest_reminder_7d")]
    InterestReminder7d,
    #[serde(rename = "event_interest_reminder_1d")]
    InterestReminder1d,
}

impl TemplateKey {
    /// Every template the engagement job sends, i.e. what the send guard counts.
    pub const ENGAGEMENT: [TemplateKey; 7] = [
        TemplateKey::EventReminder7d,
        TemplateKey::EventReminder1d,
        TemplateKey::EventReviewFollowup,
        TemplateKey::TableReviewFollowup,
        TemplateKey::InterestReminder14d,
        TemplateKey::InterestReminder7d,
        TemplateKey::InterestReminder1d,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TemplateKey::EventReminder7d => "event_reminder_7d",
            TemplateKey::EventReminder1d => "event_reminder_1d",
            TemplateKey::EventReviewFollowup => "event_review_followup",
            TemplateKey::TableReviewFollowup => "table_review_followup",
            TemplateKey::InterestReminder14d => "event_interest_reminder_14d",
            TemplateKey::InterestReminder7d => "event_interest_reminder_7d",
            TemplateKey::InterestReminder1d => "event_interest_reminder_1d",
        }
    }

    pub fn engagement_keys() -> Vec<&'static str> {
        Self::ENGAGEMENT.iter().map(TemplateKey::as_str).collect()
    }
}

impl std::fmt::Display for TemplateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An outbound SMS about to be appended to the message log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewMessage {
    pub customer_id: Uuid,
    pub booking_id: Option<Uuid>,
    pub table_booking_id: Option<Uuid>,
    pub event_id: Option<Uuid>,
    pub template_key: TemplateKey,
    pub to_number: String,
    pub body: String,
    pub provider_message_id: Option<String>,
    pub scheduled_for: Option<DateTime<Utc>>,
}
