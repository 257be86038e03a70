use chrono::NaiveTime;
use serde::Deserialize;
use std::path::PathBuf;

/// The root configuration structure for the entire application.
///
/// Every section is optional in `config.toml`; missing sections fall back to
/// their `Default` implementation.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub rankings: RankingParams,
    #[serde(default)]
    pub refresh: RefreshSettings,
    #[serde(default)]
    pub market: MarketHours,
    #[serde(default)]
    pub quotes: QuotePolling,
    #[serde(default)]
    pub logging: LoggingSettings,
}

/// Contains the parameter sets for all three rankings.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct RankingParams {
    #[serde(default)]
    pub best_return: BestReturnParams,
    #[serde(default)]
    pub worst_smoothed_return: SmoothedReturnParams,
    #[serde(default)]
    pub trend: TrendParams,
}

/// Parameters for the best trailing return ranking.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct BestReturnParams {
    /// How far back from `today` a point may lie and still count.
    pub window_days: i64,
    /// Minimum number of qualifying closes.
    pub min_points: usize,
}

/// Parameters for the worst smoothed return ranking.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct SmoothedReturnParams {
    pub window_days: i64,
    pub min_points: usize,
    /// Width of the simple moving average applied to the closes.
    pub sma_window: usize,
}

/// Parameters for the linear trend ranking.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct TrendParams {
    pub window_days: i64,
    /// Minimum sample size for a meaningful fit.
    pub min_points: usize,
}

/// Controls how and when the ranking cache is recomputed.
#[derive(Debug, Clone, Deserialize)]
pub struct RefreshSettings {
    /// Upper bound on reading the whole universe from the history store.
    pub read_timeout_secs: u64,
    /// Optional periodic fallback refresh, on top of event-driven triggers.
    pub periodic_interval_secs: Option<u64>,
    /// How many per-instrument history reads may be in flight at once.
    pub history_fanout: usize,
    /// How often the tracked instrument set is re-read, so that additions and
    /// removals made by other processes trigger a refresh. `None` disables it.
    pub universe_poll_secs: Option<u64>,
}

/// Trading session of the exchange whose open/close transitions trigger a refresh.
#[derive(Debug, Clone, Deserialize)]
pub struct MarketHours {
    /// IANA timezone name, e.g. "America/New_York".
    pub timezone: String,
    pub open: NaiveTime,
    pub close: NaiveTime,
    pub weekdays_only: bool,
    /// How often the session state is sampled to detect transitions.
    pub poll_interval_secs: u64,
}

/// Settings for the background current-quote poller.
#[derive(Debug, Clone, Deserialize)]
pub struct QuotePolling {
    pub enabled: bool,
    pub interval_secs: u64,
}

/// Settings for the tracing subscriber.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingSettings {
    /// Default filter directive, overridden by `RUST_LOG` when set.
    pub level: String,
    /// When set, logs are also written to a daily rolling file in this directory.
    pub directory: Option<PathBuf>,
    pub file_prefix: String,
}

// --- Default Implementations ---
// The defaults reproduce the long-standing behaviour of the rankings, so an
// empty `config.toml` is a valid configuration.

impl Default for BestReturnParams {
    fn default() -> Self {
        Self {
            window_days: 365,
            min_points: 2,
        }
    }
}

impl Default for SmoothedReturnParams {
    fn default() -> Self {
        Self {
            window_days: 90,
            min_points: 2,
            sma_window: 3,
        }
    }
}

impl Default for TrendParams {
    fn default() -> Self {
        Self {
            window_days: 90,
            min_points: 10,
        }
    }
}

impl Default for RefreshSettings {
    fn default() -> Self {
        Self {
            read_timeout_secs: 30,
            periodic_interval_secs: Some(3600),
            history_fanout: 4,
            universe_poll_secs: Some(30),
        }
    }
}

impl Default for MarketHours {
    fn default() -> Self {
        Self {
            timezone: "America/New_York".to_string(),
            open: NaiveTime::from_hms_opt(9, 30, 0).unwrap_or_default(),
            close: NaiveTime::from_hms_opt(16, 0, 0).unwrap_or_default(),
            weekdays_only: true,
            poll_interval_secs: 60,
        }
    }
}

impl Default for QuotePolling {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_secs: 60,
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            directory: None,
            file_prefix: "marquee.log".to_string(),
        }
    }
}
