use crate::config::SmsConfig;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

const REQUEST_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(15);

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SmsRequest {
    pub to: String,
    pub body: String,
    pub customer_id: Option<Uuid>,
    pub metadata: serde_json::Value,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GatewayReceipt {
    pub provider_message_id: Option<String>,
    pub scheduled_for: Option<DateTime<Utc>>,
}

/// Why a send did not go out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SendFailureKind {
    InvalidNumber,
    OptedOut,
    ProviderRejected,
    RateLimited,
    Transport,
    LoggingFailed,
    SafetyUnavailable,
    IdempotencyConflict,
    Unknown,
}

impl SendFailureKind {
    pub fn from_code(code: Option<&str>) -> Self {
        match code.map(str::trim).unwrap_or_default() {
            "invalid_number" | "invalid_phone" => SendFailureKind::InvalidNumber,
            "opted_out" | "customer_opted_out" => SendFailureKind::OptedOut,
            "provider_rejected" | "provider_error" => SendFailureKind::ProviderRejected,
            "rate_limited" => SendFailureKind::RateLimited,
            "logging_failed" | "sms_log_failed" => SendFailureKind::LoggingFailed,
            "safety_unavailable" | "safety_check_unavailable" => {
                SendFailureKind::SafetyUnavailable
            }
            "idempotency_conflict" => SendFailureKind::IdempotencyConflict,
            _ => SendFailureKind::Unknown,
        }
    }

    pub fn as_code(&self) -> &'static str {
        match self {
            SendFailureKind::InvalidNumber => "invalid_number",
            SendFailureKind::OptedOut => "opted_out",
            SendFailureKind::ProviderRejected => "provider_rejected",
            SendFailureKind::RateLimited => "rate_limited",
            SendFailureKind::Transport => "transport",
            SendFailureKind::LoggingFailed => "logging_failed",
            SendFailureKind::SafetyUnavailable => "safety_unavailable",
            SendFailureKind::IdempotencyConflict => "idempotency_conflict",
            SendFailureKind::Unknown => "unknown",
        }
    }

    /// Signals that the send/record pipeline itself cannot be trusted, so the whole run stops.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SendFailureKind::LoggingFailed
                | SendFailureKind::SafetyUnavailable
                | SendFailureKind::IdempotencyConflict
        )
    }
}

impl std::fmt::Display for SendFailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_code())
    }
}

#[derive(Debug, Clone, Error)]
#[error("{kind}: {message}")]
pub struct GatewayFailure {
    pub kind: SendFailureKind,
    pub message: String,
}

impl GatewayFailure {
    pub fn new(kind: SendFailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

#[async_trait::async_trait]
pub trait SmsGateway: Send + Sync {
    async fn send(&self, request: &SmsRequest) -> Result<GatewayReceipt, GatewayFailure>;
}

/// What the messaging endpoint answers with.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireResult {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    sid: Option<String>,
    #[serde(default)]
    scheduled_for: Option<DateTime<Utc>>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    log_failure: bool,
}

fn interpret_wire_result(result: WireResult) -> Result<GatewayReceipt, GatewayFailure> {
    // a send that went out but could not be logged breaks idempotence for later runs
    if result.log_failure {
        return Err(GatewayFailure::new(
            SendFailureKind::LoggingFailed,
            result
                .error
                .unwrap_or_else(|| "message sent but outbound log failed".to_string()),
        ));
    }
    if !result.success {
        return Err(GatewayFailure::new(
            SendFailureKind::from_code(result.code.as_deref()),
            result.error.unwrap_or_else(|| "send rejected".to_string()),
        ));
    }
    Ok(GatewayReceipt {
        provider_message_id: result.sid,
        scheduled_for: result.scheduled_for,
    })
}

pub struct HttpSmsGateway {
    client: reqwest::Client,
    endpoint: String,
    token: Option<String>,
}

impl HttpSmsGateway {
    pub fn new(endpoint: String, token: Option<String>) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            endpoint,
            token,
        })
    }
}

#[async_trait::async_trait]
impl SmsGateway for HttpSmsGateway {
    async fn send(&self, request: &SmsRequest) -> Result<GatewayReceipt, GatewayFailure> {
        let mut builder = self.client.post(&self.endpoint).json(request);
        if let Some(token) = &self.token {
            builder = builder.bearer_auth(token);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| GatewayFailure::new(SendFailureKind::Transport, e.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| GatewayFailure::new(SendFailureKind::Transport, e.to_string()))?;

        match serde_json::from_str::<WireResult>(&text) {
            Ok(result) => interpret_wire_result(result),
            Err(_) if status.is_success() => Err(GatewayFailure::new(
                SendFailureKind::Unknown,
                format!("unreadable gateway response: {text}"),
            )),
            Err(_) => Err(GatewayFailure::new(
                SendFailureKind::Transport,
                format!("gateway returned {status}: {text}"),
            )),
        }
    }
}

/// Logs instead of sending; every message "succeeds".
pub struct DryRunGateway;

#[async_trait::async_trait]
impl SmsGateway for DryRunGateway {
    async fn send(&self, request: &SmsRequest) -> Result<GatewayReceipt, GatewayFailure> {
        tracing::info!(
            to = %request.to,
            customer_id = ?request.customer_id,
            body_len = request.body.len(),
            "sms dry run: not sending"
        );
        Ok(GatewayReceipt {
            provider_message_id: Some(format!("dry_{}", Uuid::new_v4().as_simple())),
            scheduled_for: None,
        })
    }
}

/// Picks the gateway for this process. Dry run must be asked for explicitly: a missing endpoint
/// without it is a startup error, since dry-run sends are logged and never retried.
pub fn gateway_from_config(config: &SmsConfig) -> anyhow::Result<Arc<dyn SmsGateway>> {
    if config.dry_run {
        tracing::warn!("sms gateway: dry run, messages will be logged but not sent");
        return Ok(Arc::new(DryRunGateway));
    }
    let Some(endpoint) = &config.endpoint else {
        anyhow::bail!("ENGAGE_SMS_ENDPOINT must be set unless ENGAGE_SMS_DRY_RUN is enabled");
    };
    tracing::info!(endpoint = %endpoint, "sms gateway: http");
    Ok(Arc::new(HttpSmsGateway::new(
        endpoint.clone(),
        config.token.clone(),
    )?))
}
