use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Database error: {0}")]
    Database(#[from] database::DbError),

    #[error("Analytics error: {0}")]
    Analytics(#[from] analytics::AnalyticsError),

    #[error("Invalid ticker: {0}")]
    InvalidTicker(#[from] core_types::CoreError),

    #[error("History store error: {0}")]
    Store(String),

    #[error("Reading price history timed out after {0:?}")]
    ReadTimeout(Duration),

    #[error("Instrument '{0}' is already tracked.")]
    InstrumentExists(String),

    #[error("Instrument '{0}' is not tracked.")]
    InstrumentNotFound(String),

    #[error("Ticker '{0}' was not found or has no valid quote.")]
    UnknownTicker(String),

    #[error("Quote source error: {0}")]
    Quote(String),
}
