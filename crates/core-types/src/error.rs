use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum CoreError {
    #[error("Invalid input for {0}: {1}")]
    InvalidInput(String, String),

    #[error("Unknown ranking kind: {0}")]
    UnknownRankingKind(String),
}
