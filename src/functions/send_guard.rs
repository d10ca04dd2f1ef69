use crate::config::SendGuardConfig;
use crate::schema::TemplateKey;
use crate::storage::EngagementStore;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GuardReport {
    pub blocked: bool,
    pub recent_count: i64,
    pub window_minutes: i64,
    pub limit: i64,
    /// Set when the count could not be taken and the guard fell back to a policy decision.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub degraded: Option<String>,
}

/// Circuit breaker: block the whole run once recent engagement sends reach the limit.
pub async fn evaluate_guard(
    store: &dyn EngagementStore,
    config: &SendGuardConfig,
    now: DateTime<Utc>,
) -> GuardReport {
    let since = now - Duration::minutes(config.window_minutes);
    let keys = TemplateKey::engagement_keys();

    let mut report = GuardReport {
        blocked: false,
        recent_count: 0,
        window_minutes: config.window_minutes,
        limit: config.limit,
        degraded: None,
    };

    match store.count_recent_messages(&keys, since).await {
        Ok(count) => {
            report.recent_count = count;
            report.blocked = count >= config.limit;
            if report.blocked {
                tracing::warn!(
                    recent_count = count,
                    limit = config.limit,
                    window_minutes = config.window_minutes,
                    "send guard: blocking run"
                );
            }
        }
        Err(err) if err.is_schema_missing() && config.allow_schema_gaps => {
            tracing::warn!(
                error = %err,
                "send guard: messages schema missing, tolerating in non-production"
            );
            report.degraded = Some(err.to_string());
        }
        Err(err) => {
            tracing::error!(error = %err, "send guard: count failed, failing closed");
            report.blocked = true;
            report.degraded = Some(err.to_string());
        }
    }

    report
}
