use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SmsStatus {
    Active,
    OptedOut,
    Deactivated,
}

impl SmsStatus {
    /// Null means the customer never changed their preference.
    pub fn parse(raw: Option<&str>) -> Self {
        match raw.map(str::trim) {
            None | Some("") | Some("active") => SmsStatus::Active,
            Some("opted_out") | Some("sms_opt_out") => SmsStatus::OptedOut,
            Some(_) => SmsStatus::Deactivated,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Customer {
    pub id: Uuid,
    pub first_name: Option<String>,
    pub mobile_number: Option<String>,
    pub sms_status: SmsStatus,
}

impl Customer {
    pub fn has_mobile(&self) -> bool {
        self.mobile_number
            .as_deref()
            .is_some_and(|m| !m.trim().is_empty())
    }

    /// The number to text, if the customer can receive engagement SMS at all.
    pub fn sms_target(&self) -> Option<&str> {
        if self.sms_status != SmsStatus::Active {
            return None;
        }
        self.mobile_number
            .as_deref()
            .map(str::trim)
            .filter(|m| !m.is_empty())
    }

    pub fn greeting_name(&self) -> &str {
        self.first_name
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .unwrap_or("there")
    }
}
