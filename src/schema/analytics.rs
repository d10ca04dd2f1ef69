use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Best-effort customer telemetry row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyticsEvent {
    pub customer_id: Uuid,
    pub event_type: String,
    pub booking_id: Option<Uuid>,
    pub payload: serde_json::Value,
}
