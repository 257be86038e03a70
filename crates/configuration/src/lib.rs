use crate::error::ConfigError;

// Declare the modules that make up this crate.
pub mod error;
pub mod logging;
pub mod settings;

// Re-export the core types to provide a clean public API.
pub use logging::init_tracing;
pub use settings::{
    BestReturnParams, Config, LoggingSettings, MarketHours, QuotePolling, RankingParams,
    RefreshSettings, SmoothedReturnParams, TrendParams,
};

/// Loads the application configuration from the `config.toml` file.
///
/// The file is optional: every section has defaults. Values can be overridden
/// with `MARQUEE__SECTION__KEY` environment variables
/// (e.g. `MARQUEE__REFRESH__READ_TIMEOUT_SECS=10`).
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from("config.toml")
}

/// Same as [`load_config`] but reads an explicit file path.
pub fn load_config_from(path: &str) -> Result<Config, ConfigError> {
    let builder = config::Config::builder()
        .add_source(config::File::with_name(path).required(false))
        .add_source(
            config::Environment::with_prefix("MARQUEE")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    let config = builder.try_deserialize::<Config>()?;
    validate(&config)?;
    Ok(config)
}

/// Rejects parameter combinations under which no ranking could ever be computed.
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    let rankings = &config.rankings;

    let windows = [
        ("rankings.best_return.window_days", rankings.best_return.window_days),
        (
            "rankings.worst_smoothed_return.window_days",
            rankings.worst_smoothed_return.window_days,
        ),
        ("rankings.trend.window_days", rankings.trend.window_days),
    ];
    for (name, days) in windows {
        if days <= 0 {
            return Err(ConfigError::ValidationError(format!(
                "{} must be positive, got {}",
                name, days
            )));
        }
    }

    if rankings.best_return.min_points < 2 {
        return Err(ConfigError::ValidationError(
            "rankings.best_return.min_points must be at least 2".to_string(),
        ));
    }
    if rankings.worst_smoothed_return.sma_window == 0 {
        return Err(ConfigError::ValidationError(
            "rankings.worst_smoothed_return.sma_window must be at least 1".to_string(),
        ));
    }
    if rankings.trend.min_points < 2 {
        return Err(ConfigError::ValidationError(
            "rankings.trend.min_points must be at least 2 to fit a line".to_string(),
        ));
    }

    if config.refresh.history_fanout == 0 {
        return Err(ConfigError::ValidationError(
            "refresh.history_fanout must be at least 1".to_string(),
        ));
    }
    if config.market.poll_interval_secs == 0 {
        return Err(ConfigError::ValidationError(
            "market.poll_interval_secs must be at least 1".to_string(),
        ));
    }
    if config.market.open >= config.market.close {
        return Err(ConfigError::ValidationError(format!(
            "market.open ({}) must be before market.close ({})",
            config.market.open, config.market.close
        )));
    }

    Ok(())
}
