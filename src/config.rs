use chrono::Duration;
use chrono_tz::Tz;
use std::str::FromStr;

pub const ENGAGEMENT_JOB_NAME: &str = "event-guest-engagement";

const DEFAULT_TIMEZONE: &str = "Europe/London";
const DEFAULT_APP_URL: &str = "http://localhost:3000";

fn env_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    env_string(key).and_then(|v| v.parse().ok())
}

fn env_flag(key: &str) -> Option<bool> {
    env_string(key).map(|v| v.eq_ignore_ascii_case("true") || v == "1")
}

#[derive(Debug, Clone)]
pub struct SendGuardConfig {
    pub window_minutes: i64,
    pub limit: i64,
    /// Treat a missing messages table/column as "not blocked" instead of failing closed.
    pub allow_schema_gaps: bool,
}

impl Default for SendGuardConfig {
    fn default() -> Self {
        Self {
            window_minutes: 60,
            limit: 120,
            allow_schema_gaps: false,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SmsConfig {
    pub endpoint: Option<String>,
    pub token: Option<String>,
    pub dry_run: bool,
}

#[derive(Debug, Clone)]
pub struct EngageConfig {
    pub database_url: Option<String>,
    pub bind_addr: String,
    pub cron_secret: Option<String>,
    pub timezone: Tz,
    pub run_bucket_minutes: u32,
    pub stale_after: Duration,
    pub max_duration_secs: u64,
    pub guard: SendGuardConfig,
    pub app_base_url: String,
    pub contact_phone: Option<String>,
    pub notify_email: Option<String>,
    pub sms: SmsConfig,
    pub schedule: Option<String>,
}

impl Default for EngageConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            bind_addr: "0.0.0.0:8080".to_string(),
            cron_secret: None,
            timezone: chrono_tz::Europe::London,
            run_bucket_minutes: 15,
            stale_after: Duration::minutes(20),
            max_duration_secs: 300,
            guard: SendGuardConfig::default(),
            app_base_url: DEFAULT_APP_URL.to_string(),
            contact_phone: None,
            notify_email: None,
            sms: SmsConfig::default(),
            schedule: None,
        }
    }
}

impl EngageConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = Self::default();

        let timezone_name =
            env_string("ENGAGE_TIMEZONE").unwrap_or_else(|| DEFAULT_TIMEZONE.into());
        let timezone: Tz = timezone_name
            .parse()
            .map_err(|_| anyhow::anyhow!("invalid ENGAGE_TIMEZONE: {timezone_name}"))?;

        let production = env_string("APP_ENV")
            .or_else(|| env_string("NODE_ENV"))
            .is_some_and(|v| v.eq_ignore_ascii_case("production"));

        let guard = SendGuardConfig {
            window_minutes: env_parse("ENGAGE_SEND_GUARD_WINDOW_MINUTES")
                .filter(|v: &i64| *v > 0)
                .unwrap_or(defaults.guard.window_minutes),
            limit: env_parse("ENGAGE_SEND_GUARD_LIMIT")
                .filter(|v: &i64| *v > 0)
                .unwrap_or(defaults.guard.limit),
            allow_schema_gaps: env_flag("ENGAGE_ALLOW_SCHEMA_GAPS").unwrap_or(!production),
        };

        Ok(Self {
            database_url: env_string("DATABASE_URL"),
            bind_addr: env_string("ENGAGE_BIND_ADDR").unwrap_or(defaults.bind_addr),
            cron_secret: env_string("CRON_SECRET"),
            timezone,
            run_bucket_minutes: env_parse("ENGAGE_RUN_BUCKET_MINUTES")
                .filter(|v: &u32| (1..=60).contains(v))
                .unwrap_or(defaults.run_bucket_minutes),
            stale_after: env_parse("ENGAGE_STALE_AFTER_MINUTES")
                .map(Duration::minutes)
                .unwrap_or(defaults.stale_after),
            max_duration_secs: env_parse("ENGAGE_MAX_DURATION_SECS")
                .unwrap_or(defaults.max_duration_secs),
            guard,
            app_base_url: env_string("NEXT_PUBLIC_APP_URL")
                .map(|u| u.trim_end_matches('/').to_string())
                .unwrap_or(defaults.app_base_url),
            contact_phone: env_string("NEXT_PUBLIC_CONTACT_PHONE_NUMBER")
                .or_else(|| env_string("TWILIO_PHONE_NUMBER")),
            notify_email: env_string("ENGAGE_NOTIFY_EMAIL"),
            sms: SmsConfig {
                endpoint: env_string("ENGAGE_SMS_ENDPOINT"),
                token: env_string("ENGAGE_SMS_TOKEN"),
                dry_run: env_flag("ENGAGE_SMS_DRY_RUN").unwrap_or(false),
            },
            schedule: env_string("ENGAGE_SCHEDULE"),
        })
    }

    pub fn max_duration(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.max_duration_secs)
    }
}
