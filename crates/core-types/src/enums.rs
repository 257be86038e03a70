use crate::error::CoreError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The three market-wide rankings derived from the stored price series.
///
/// The declaration order is also the display order used by consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RankingKind {
    /// Highest trailing-12-month close-to-close return.
    #[serde(rename = "best_12m_return")]
    Best12mReturn,
    /// Lowest trailing-3-month return measured on a smoothed close series.
    #[serde(rename = "worst_3m_smoothed_return")]
    Worst3mSmoothedReturn,
    /// Steepest fitted linear trend over the recent window.
    #[serde(rename = "strongest_1m_trend")]
    Strongest1mTrend,
}

impl RankingKind {
    pub const ALL: [RankingKind; 3] = [
        RankingKind::Best12mReturn,
        RankingKind::Worst3mSmoothedReturn,
        RankingKind::Strongest1mTrend,
    ];

    /// The stable key used for storage and serialization.
    pub fn as_str(&self) -> &'static str {
        match self {
            RankingKind::Best12mReturn => "best_12m_return",
            RankingKind::Worst3mSmoothedReturn => "worst_3m_smoothed_return",
            RankingKind::Strongest1mTrend => "strongest_1m_trend",
        }
    }

    /// A short human-readable label for tables and logs.
    pub fn label(&self) -> &'static str {
        match self {
            RankingKind::Best12mReturn => "Best 12m return",
            RankingKind::Worst3mSmoothedReturn => "Worst 3m smoothed return",
            RankingKind::Strongest1mTrend => "Strongest 1m trend",
        }
    }

    /// Whether the score is a fractional return (as opposed to a slope).
    pub fn is_return(&self) -> bool {
        !matches!(self, RankingKind::Strongest1mTrend)
    }
}

impl fmt::Display for RankingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RankingKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RankingKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| CoreError::UnknownRankingKind(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_keys_round_trip_through_from_str() {
        for kind in RankingKind::ALL {
            assert_eq!(kind.as_str().parse::<RankingKind>(), Ok(kind));
        }
        assert!("best_return".parse::<RankingKind>().is_err());
    }

    #[test]
    fn serde_uses_stable_storage_keys() {
        let json = serde_json::to_string(&RankingKind::Worst3mSmoothedReturn).unwrap();
        assert_eq!(json, "\"worst_3m_smoothed_return\"");
    }
}
