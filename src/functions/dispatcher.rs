use crate::schema::{Customer, NewMessage, TemplateKey};
use crate::services::{GatewayReceipt, SendFailureKind, SmsGateway, SmsRequest};
use crate::storage::EngagementStore;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Reminders,
    EventReviews,
    TableReviews,
    Marketing,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Reminders => "reminders",
            Stage::EventReviews => "event_reviews",
            Stage::TableReviews => "table_reviews",
            Stage::Marketing => "marketing",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One message the job wants to send, with everything needed to log it afterwards.
#[derive(Debug, Clone)]
pub struct OutboundSms {
    pub stage: Stage,
    pub customer_id: Uuid,
    pub to: String,
    pub body: String,
    pub template_key: TemplateKey,
    pub booking_id: Option<Uuid>,
    pub table_booking_id: Option<Uuid>,
    pub event_id: Option<Uuid>,
}

impl OutboundSms {
    /// `None` when the customer has no usable number or has opted out.
    pub fn for_customer(
        stage: Stage,
        customer: &Customer,
        template_key: TemplateKey,
        body: String,
    ) -> Option<Self> {
        let to = customer.sms_target()?.to_string();
        Some(Self {
            stage,
            customer_id: customer.id,
            to,
            body,
            template_key,
            booking_id: None,
            table_booking_id: None,
            event_id: None,
        })
    }

    pub fn booking(mut self, booking_id: Uuid) -> Self {
        self.booking_id = Some(booking_id);
        self
    }

    pub fn table_booking(mut self, booking_id: Uuid) -> Self {
        self.table_booking_id = Some(booking_id);
        self
    }

    pub fn event(mut self, event_id: Uuid) -> Self {
        self.event_id = Some(event_id);
        self
    }

    fn metadata(&self) -> serde_json::Value {
        serde_json::json!({
            "template_key": self.template_key.as_str(),
            "stage": self.stage.as_str(),
            "booking_id": self.booking_id,
            "table_booking_id": self.table_booking_id,
            "event_id": self.event_id,
        })
    }

    fn to_message(&self, receipt: &GatewayReceipt) -> NewMessage {
        NewMessage {
            customer_id: self.customer_id,
            booking_id: self.booking_id,
            table_booking_id: self.table_booking_id,
            event_id: self.event_id,
            template_key: self.template_key,
            to_number: self.to.clone(),
            body: self.body.clone(),
            provider_message_id: receipt.provider_message_id.clone(),
            scheduled_for: receipt.scheduled_for,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendResult {
    Sent {
        message_id: Uuid,
        scheduled_for: Option<DateTime<Utc>>,
    },
    /// This recipient failed; the batch carries on.
    Skipped { kind: SendFailureKind, error: String },
}

impl SendResult {
    pub fn is_sent(&self) -> bool {
        matches!(self, SendResult::Sent { .. })
    }
}

/// The messaging pipeline can no longer be trusted; the whole run stops.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FatalSignal {
    pub stage: Stage,
    pub kind: SendFailureKind,
    pub code: String,
    pub message: String,
    pub customer_id: Uuid,
    pub booking_id: Option<Uuid>,
    pub table_booking_id: Option<Uuid>,
    pub event_id: Option<Uuid>,
    pub template_key: TemplateKey,
}

impl FatalSignal {
    fn new(sms: &OutboundSms, kind: SendFailureKind, message: String) -> Self {
        Self {
            stage: sms.stage,
            kind,
            code: kind.as_code().to_string(),
            message,
            customer_id: sms.customer_id,
            booking_id: sms.booking_id,
            table_booking_id: sms.table_booking_id,
            event_id: sms.event_id,
            template_key: sms.template_key,
        }
    }
}

/// Sends one SMS and appends it to the message log.
///
/// Per-recipient failures come back as [`SendResult::Skipped`]; only fatal safety signals are
/// returned as errors.
pub async fn send_sms_safe(
    gateway: &dyn SmsGateway,
    store: &dyn EngagementStore,
    sms: &OutboundSms,
) -> Result<SendResult, FatalSignal> {
    let request = SmsRequest {
        to: sms.to.clone(),
        body: sms.body.clone(),
        customer_id: Some(sms.customer_id),
        metadata: sms.metadata(),
    };

    let receipt = match gateway.send(&request).await {
        Ok(receipt) => receipt,
        Err(failure) if failure.kind.is_fatal() => {
            tracing::error!(
                stage = %sms.stage,
                customer_id = %sms.customer_id,
                booking_id = ?sms.booking_id,
                event_id = ?sms.event_id,
                template_key = %sms.template_key,
                code = failure.kind.as_code(),
                error = %failure.message,
                "dispatcher: fatal safety signal from gateway"
            );
            return Err(FatalSignal::new(sms, failure.kind, failure.message));
        }
        Err(failure) => {
            tracing::warn!(
                stage = %sms.stage,
                customer_id = %sms.customer_id,
                template_key = %sms.template_key,
                code = failure.kind.as_code(),
                error = %failure.message,
                "dispatcher: send failed, skipping recipient"
            );
            return Ok(SendResult::Skipped {
                kind: failure.kind,
                error: failure.message,
            });
        }
    };

    match store.record_message(&sms.to_message(&receipt)).await {
        Ok(message_id) => {
            tracing::info!(
                stage = %sms.stage,
                customer_id = %sms.customer_id,
                message_id = %message_id,
                template_key = %sms.template_key,
                "dispatcher: message sent"
            );
            Ok(SendResult::Sent {
                message_id,
                scheduled_for: receipt.scheduled_for,
            })
        }
        Err(err) => {
            tracing::error!(
                stage = %sms.stage,
                customer_id = %sms.customer_id,
                template_key = %sms.template_key,
                error = %err,
                "dispatcher: sent but failed to log outbound message"
            );
            Err(FatalSignal::new(
                sms,
                SendFailureKind::LoggingFailed,
                err.to_string(),
            ))
        }
    }
}
