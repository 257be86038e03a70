use crate::error::EngineError;
use chrono::{DateTime, Datelike, NaiveDate, NaiveTime, Utc, Weekday};
use chrono_tz::Tz;
use configuration::MarketHours;
use std::fmt;

/// Whether the exchange is in its regular trading session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarketState {
    Open,
    Closed,
}

impl fmt::Display for MarketState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MarketState::Open => f.write_str("open"),
            MarketState::Closed => f.write_str("closed"),
        }
    }
}

/// Evaluates the trading session of a single exchange in its own timezone.
#[derive(Debug, Clone)]
pub struct MarketClock {
    tz: Tz,
    open: NaiveTime,
    close: NaiveTime,
    weekdays_only: bool,
}

impl MarketClock {
    pub fn from_settings(settings: &MarketHours) -> Result<Self, EngineError> {
        let tz: Tz = settings.timezone.parse().map_err(|e| {
            EngineError::Configuration(format!("invalid timezone '{}': {}", settings.timezone, e))
        })?;
        Ok(Self {
            tz,
            open: settings.open,
            close: settings.close,
            weekdays_only: settings.weekdays_only,
        })
    }

    /// Session state at `instant`. Both session bounds count as open.
    pub fn state_at(&self, instant: DateTime<Utc>) -> MarketState {
        let local = instant.with_timezone(&self.tz);

        if self.weekdays_only && matches!(local.weekday(), Weekday::Sat | Weekday::Sun) {
            return MarketState::Closed;
        }

        let time = local.time();
        if time >= self.open && time <= self.close {
            MarketState::Open
        } else {
            MarketState::Closed
        }
    }

    pub fn now(&self) -> MarketState {
        self.state_at(Utc::now())
    }

    /// The calendar date at `instant` on the exchange.
    pub fn date_at(&self, instant: DateTime<Utc>) -> NaiveDate {
        instant.with_timezone(&self.tz).date_naive()
    }

    /// The exchange's current calendar date, used as the rankings' reference day.
    pub fn today(&self) -> NaiveDate {
        self.date_at(Utc::now())
    }
}

/// Turns a sampled session level into open/close edges.
#[derive(Debug, Default)]
pub struct TransitionDetector {
    last: Option<MarketState>,
}

impl TransitionDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `state` and returns it if it differs from the previous sample.
    /// The first sample only establishes the level.
    pub fn observe(&mut self, state: MarketState) -> Option<MarketState> {
        match self.last.replace(state) {
            Some(previous) if previous != state => Some(state),
            _ => None,
        }
    }
}
