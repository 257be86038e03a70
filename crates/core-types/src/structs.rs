use crate::error::CoreError;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A tradable asset identified by its exchange ticker.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Instrument {
    pub ticker: String,
    pub name: Option<String>,
}

impl Instrument {
    pub fn new(ticker: impl Into<String>) -> Self {
        Self {
            ticker: ticker.into(),
            name: None,
        }
    }
}

/// A single daily OHLCV record for one instrument.
///
/// Every numeric field is nullable because upstream providers routinely leave
/// holes in their history. At most one point exists per (instrument, date).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    pub date: NaiveDate,
    pub open: Option<Decimal>,
    pub close: Option<Decimal>,
    pub high: Option<Decimal>,
    pub low: Option<Decimal>,
    pub volume: Option<Decimal>,
}

impl PricePoint {
    /// A point carrying only a closing price, which is all the rankings read.
    pub fn with_close(date: NaiveDate, close: Decimal) -> Self {
        Self {
            date,
            open: None,
            close: Some(close),
            high: None,
            low: None,
            volume: None,
        }
    }
}

/// The outcome of one ranking pass: the winning ticker and its score.
///
/// Both fields are `None` when no instrument qualified.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RankingResult {
    pub ticker: Option<String>,
    pub score: Option<f64>,
}

impl RankingResult {
    pub fn winner(ticker: impl Into<String>, score: f64) -> Self {
        Self {
            ticker: Some(ticker.into()),
            score: Some(score),
        }
    }

    pub fn none() -> Self {
        Self::default()
    }

    pub fn is_none(&self) -> bool {
        self.ticker.is_none()
    }
}

/// The latest intraday quote observed for an instrument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrentQuote {
    pub price: Option<Decimal>,
    pub change: Option<Decimal>,
    pub change_pct: Option<Decimal>,
    pub updated_at: DateTime<Utc>,
}

/// Trims and upper-cases a user supplied ticker, rejecting empty or
/// whitespace-containing input.
pub fn normalize_ticker(raw: &str) -> Result<String, CoreError> {
    let ticker = raw.trim().to_uppercase();
    if ticker.is_empty() {
        return Err(CoreError::InvalidInput(
            "ticker".to_string(),
            "must not be empty".to_string(),
        ));
    }
    if ticker.chars().any(char::is_whitespace) {
        return Err(CoreError::InvalidInput(
            "ticker".to_string(),
            format!("'{}' contains whitespace", raw.trim()),
        ));
    }
    Ok(ticker)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_ticker_trims_and_uppercases() {
        assert_eq!(normalize_ticker("  itub4.sa ").unwrap(), "ITUB4.SA");
    }

    #[test]
    fn normalize_ticker_rejects_blank_and_inner_spaces() {
        assert!(normalize_ticker("   ").is_err());
        assert!(normalize_ticker("BB AS3").is_err());
    }

    #[test]
    fn empty_ranking_result_has_no_winner() {
        let result = RankingResult::none();
        assert!(result.is_none());
        assert_eq!(result.score, None);
    }
}
