use crate::functions::dispatcher::FatalSignal;
use thiserror::Error;

/// Postgres SQLSTATE for `undefined_table`.
const UNDEFINED_TABLE: &str = "42P01";
/// Postgres SQLSTATE for `undefined_column`.
const UNDEFINED_COLUMN: &str = "42703";

#[derive(Debug, Error)]
pub enum StoreError {
    /// The relation or column a query expects does not exist yet.
    #[error("schema missing: {0}")]
    SchemaMissing(String),
    #[error("database error: {0}")]
    Database(sqlx::Error),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    pub fn is_schema_missing(&self) -> bool {
        matches!(self, StoreError::SchemaMissing(_))
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        if matches!(err, sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed) {
            return StoreError::Unavailable(err.to_string());
        }
        let code = err
            .as_database_error()
            .and_then(|db| db.code())
            .map(|c| c.into_owned());
        match code.as_deref() {
            Some(UNDEFINED_TABLE) | Some(UNDEFINED_COLUMN) => StoreError::SchemaMissing(
                err.as_database_error()
                    .map(|db| db.message().to_string())
                    .unwrap_or_else(|| err.to_string()),
            ),
            _ => StoreError::Database(err),
        }
    }
}

#[derive(Debug, Error)]
pub enum EngageError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("fatal safety signal `{}` during {}", .0.code, .0.stage)]
    Fatal(Box<FatalSignal>),
    #[error("run exceeded the {0}s deadline")]
    DeadlineExceeded(u64),
}

impl From<FatalSignal> for EngageError {
    fn from(signal: FatalSignal) -> Self {
        EngageError::Fatal(Box::new(signal))
    }
}

/// Truncates an error message to at most `max` characters for storage.
pub fn truncate_message(message: &str, max: usize) -> String {
    if message.chars().count() <= max {
        return message.to_string();
    }
    message.chars().take(max).collect()
}
