use thiserror::Error;

#[derive(Error, Debug)]
pub enum AnalyticsError {
    #[error("Invalid ranking parameter: {0}")]
    InvalidParameter(String),
}
