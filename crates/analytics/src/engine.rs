use crate::error::AnalyticsError;
use crate::indicators::{linear_regression, simple_moving_average};
use crate::ranking::{Direction, Evaluation, InstrumentOutcome, Universe};
use chrono::{Duration, NaiveDate};
use configuration::{BestReturnParams, RankingParams, SmoothedReturnParams, TrendParams};
use core_types::{PricePoint, RankingKind};
use rust_decimal::prelude::ToPrimitive;
use std::collections::BTreeMap;

/// A stateless calculator that turns per-instrument price histories into
/// market-wide rankings.
///
/// Every ranking is a pure function of the universe, `today` and the
/// parameters: no I/O, no clocks, no shared state. Instruments that cannot be
/// scored are excluded from the candidate pool rather than failing the pass.
#[derive(Debug, Clone, Default)]
pub struct RankingEngine {
    params: RankingParams,
}

impl RankingEngine {
    /// Creates an engine, rejecting parameters that can never produce a score.
    pub fn new(params: RankingParams) -> Result<Self, AnalyticsError> {
        if params.worst_smoothed_return.sma_window == 0 {
            return Err(AnalyticsError::InvalidParameter(
                "moving average window must be at least 1".to_string(),
            ));
        }
        if params.trend.min_points < 2 {
            return Err(AnalyticsError::InvalidParameter(
                "trend fit needs at least 2 points".to_string(),
            ));
        }
        Ok(Self { params })
    }

    pub fn params(&self) -> &RankingParams {
        &self.params
    }

    /// Runs all three rankings, in `RankingKind::ALL` order.
    pub fn evaluate_all(&self, universe: &Universe, today: NaiveDate) -> Vec<Evaluation> {
        RankingKind::ALL
            .into_iter()
            .map(|kind| self.evaluate(kind, universe, today))
            .collect()
    }

    /// Runs a single ranking.
    pub fn evaluate(&self, kind: RankingKind, universe: &Universe, today: NaiveDate) -> Evaluation {
        let evaluation = match kind {
            RankingKind::Best12mReturn => self.best_12m_return(universe, today),
            RankingKind::Worst3mSmoothedReturn => self.worst_3m_smoothed_return(universe, today),
            RankingKind::Strongest1mTrend => self.strongest_1m_trend(universe, today),
        };

        tracing::debug!(
            kind = %kind,
            scored = evaluation.scored_count(),
            skipped = evaluation.skipped_count(),
            winner = ?evaluation.result.ticker,
            "Ranking pass complete."
        );
        evaluation
    }

    /// The instrument with the greatest close-to-close return over the trailing year.
    pub fn best_12m_return(&self, universe: &Universe, today: NaiveDate) -> Evaluation {
        let params = &self.params.best_return;
        let outcomes = score_each(RankingKind::Best12mReturn, universe, |series| {
            trailing_return(series, today, params)
        });
        Evaluation::select(RankingKind::Best12mReturn, Direction::Highest, outcomes)
    }

    /// The instrument whose moving-average-smoothed close fell the most over the
    /// trailing quarter.
    pub fn worst_3m_smoothed_return(&self, universe: &Universe, today: NaiveDate) -> Evaluation {
        let params = &self.params.worst_smoothed_return;
        let outcomes = score_each(RankingKind::Worst3mSmoothedReturn, universe, |series| {
            smoothed_return(series, today, params)
        });
        Evaluation::select(RankingKind::Worst3mSmoothedReturn, Direction::Lowest, outcomes)
    }

    /// The instrument with the steepest fitted price-per-day trend.
    pub fn strongest_1m_trend(&self, universe: &Universe, today: NaiveDate) -> Evaluation {
        let params = &self.params.trend;
        let outcomes = score_each(RankingKind::Strongest1mTrend, universe, |series| {
            trend_slope(series, today, params)
        });
        Evaluation::select(RankingKind::Strongest1mTrend, Direction::Highest, outcomes)
    }
}

/// Applies `score` to every instrument independently, logging the ones that
/// drop out.
fn score_each<F>(kind: RankingKind, universe: &Universe, score: F) -> BTreeMap<String, InstrumentOutcome>
where
    F: Fn(&[PricePoint]) -> InstrumentOutcome,
{
    universe
        .iter()
        .map(|(ticker, series)| {
            let outcome = score(series.as_slice());
            match &outcome {
                InstrumentOutcome::InsufficientData { required, found } => {
                    tracing::debug!(%kind, %ticker, required, found, "Instrument skipped: insufficient data.");
                }
                InstrumentOutcome::DegenerateInput(reason) => {
                    tracing::debug!(%kind, %ticker, %reason, "Instrument skipped: degenerate input.");
                }
                InstrumentOutcome::Scored(_) => {}
            }
            (ticker.clone(), outcome)
        })
        .collect()
}

/// Start of the look-back window ending at `today`.
fn window_start(today: NaiveDate, window_days: i64) -> NaiveDate {
    today - Duration::days(window_days)
}

/// Points dated on or after `start` that carry a closing price, sorted by date.
///
/// Zero closes are kept: the denominator checks below decide what they mean.
fn qualifying_closes(series: &[PricePoint], start: NaiveDate) -> Vec<(NaiveDate, f64)> {
    let mut closes: Vec<(NaiveDate, f64)> = series
        .iter()
        .filter(|point| point.date >= start)
        .filter_map(|point| point.close.and_then(|c| c.to_f64()).map(|c| (point.date, c)))
        .collect();
    closes.sort_by_key(|(date, _)| *date);
    closes
}

fn finite_or_degenerate(score: f64) -> InstrumentOutcome {
    if score.is_finite() {
        InstrumentOutcome::Scored(score)
    } else {
        InstrumentOutcome::DegenerateInput("score is not finite".to_string())
    }
}

fn trailing_return(series: &[PricePoint], today: NaiveDate, params: &BestReturnParams) -> InstrumentOutcome {
    let closes = qualifying_closes(series, window_start(today, params.window_days));
    if closes.len() < params.min_points {
        return InstrumentOutcome::InsufficientData {
            required: params.min_points,
            found: closes.len(),
        };
    }

    let (Some(&(_, first)), Some(&(_, last))) = (closes.first(), closes.last()) else {
        return InstrumentOutcome::InsufficientData {
            required: params.min_points,
            found: 0,
        };
    };
    if first <= 0.0 {
        return InstrumentOutcome::DegenerateInput(format!("first close is {}", first));
    }

    finite_or_degenerate((last - first) / first)
}

fn smoothed_return(series: &[PricePoint], today: NaiveDate, params: &SmoothedReturnParams) -> InstrumentOutcome {
    let closes = qualifying_closes(series, window_start(today, params.window_days));
    if closes.len() < params.min_points {
        return InstrumentOutcome::InsufficientData {
            required: params.min_points,
            found: closes.len(),
        };
    }

    let prices: Vec<f64> = closes.iter().map(|(_, close)| *close).collect();
    let smoothed = match simple_moving_average(&prices, params.sma_window) {
        Ok(smoothed) => smoothed,
        Err(e) => return InstrumentOutcome::DegenerateInput(e.to_string()),
    };

    let (Some(&first), Some(&last)) = (smoothed.first(), smoothed.last()) else {
        // Fewer closes than the smoothing window: no average can be formed.
        return InstrumentOutcome::InsufficientData {
            required: params.sma_window,
            found: prices.len(),
        };
    };
    if first == 0.0 {
        return InstrumentOutcome::DegenerateInput("first smoothed close is zero".to_string());
    }

    finite_or_degenerate((last - first) / first)
}

fn trend_slope(series: &[PricePoint], today: NaiveDate, params: &TrendParams) -> InstrumentOutcome {
    let start = window_start(today, params.window_days);
    let closes = qualifying_closes(series, start);
    if closes.len() < params.min_points {
        return InstrumentOutcome::InsufficientData {
            required: params.min_points,
            found: closes.len(),
        };
    }

    let xs: Vec<f64> = closes
        .iter()
        .map(|(date, _)| (*date - start).num_days() as f64)
        .collect();
    let ys: Vec<f64> = closes.iter().map(|(_, close)| *close).collect();

    match linear_regression(&xs, &ys) {
        Some(fit) => finite_or_degenerate(fit.slope),
        None => InstrumentOutcome::DegenerateInput("dates have no spread to fit a trend".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_types::RankingResult;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 28).unwrap()
    }

    fn days_ago(n: i64) -> NaiveDate {
        today() - Duration::days(n)
    }

    fn series(points: &[(i64, Decimal)]) -> Vec<PricePoint> {
        points
            .iter()
            .map(|(ago, close)| PricePoint::with_close(days_ago(*ago), *close))
            .collect()
    }

    /// `count` consecutive daily closes ending yesterday, starting at `base` and
    /// moving by `step` per day.
    fn linear_series(count: i64, base: i64, step: i64) -> Vec<PricePoint> {
        (0..count)
            .map(|i| {
                let close = Decimal::from(base + step * i);
                PricePoint::with_close(days_ago(count - i), close)
            })
            .collect()
    }

    fn universe(entries: Vec<(&str, Vec<PricePoint>)>) -> Universe {
        entries
            .into_iter()
            .map(|(ticker, points)| (ticker.to_string(), points))
            .collect()
    }

    fn assert_close(actual: Option<f64>, expected: f64) {
        let actual = actual.expect("expected a score");
        assert!(
            (actual - expected).abs() < 1e-9,
            "expected {expected}, got {actual}"
        );
    }

    #[test]
    fn best_return_picks_growing_instrument_over_flat_one() {
        let universe = universe(vec![
            ("A", series(&[(365, dec!(100)), (200, dec!(110)), (1, dec!(121))])),
            ("B", series(&[(365, dec!(50)), (200, dec!(50)), (1, dec!(50))])),
        ]);

        let eval = RankingEngine::default().best_12m_return(&universe, today());

        assert_eq!(eval.result.ticker.as_deref(), Some("A"));
        assert_close(eval.result.score, 0.21);
        assert_eq!(eval.outcomes["B"], InstrumentOutcome::Scored(0.0));
    }

    #[test]
    fn best_return_sorts_unordered_history() {
        let universe = universe(vec![(
            "A",
            series(&[(1, dec!(121)), (365, dec!(100)), (200, dec!(110))]),
        )]);

        let eval = RankingEngine::default().best_12m_return(&universe, today());

        assert_close(eval.result.score, 0.21);
    }

    #[test]
    fn best_return_ignores_points_outside_window_and_null_closes() {
        let mut points = series(&[(400, dec!(1)), (300, dec!(200)), (10, dec!(100))]);
        points.push(PricePoint {
            date: days_ago(5),
            open: Some(dec!(1)),
            close: None,
            high: None,
            low: None,
            volume: None,
        });
        let universe = universe(vec![("A", points)]);

        let eval = RankingEngine::default().best_12m_return(&universe, today());

        assert_close(eval.result.score, -0.5);
    }

    #[test]
    fn best_return_requires_two_points_in_window() {
        let universe = universe(vec![("A", series(&[(500, dec!(10)), (3, dec!(20))]))]);

        let eval = RankingEngine::default().best_12m_return(&universe, today());

        assert!(eval.result.is_none());
        assert_eq!(
            eval.outcomes["A"],
            InstrumentOutcome::InsufficientData {
                required: 2,
                found: 1
            }
        );
    }

    #[test]
    fn best_return_excludes_zero_first_close_regardless_of_later_prices() {
        let universe = universe(vec![
            ("A", series(&[(300, dec!(0)), (200, dec!(50)), (1, dec!(1000))])),
            ("B", series(&[(300, dec!(10)), (1, dec!(9))])),
        ]);

        let eval = RankingEngine::default().best_12m_return(&universe, today());

        assert_eq!(eval.result.ticker.as_deref(), Some("B"));
        assert!(matches!(eval.outcomes["A"], InstrumentOutcome::DegenerateInput(_)));
    }

    #[test]
    fn best_return_is_idempotent() {
        let universe = universe(vec![
            ("A", linear_series(30, 100, 1)),
            ("B", linear_series(30, 100, -1)),
        ]);
        let engine = RankingEngine::default();

        let first = engine.best_12m_return(&universe, today());
        let second = engine.best_12m_return(&universe, today());

        assert_eq!(first, second);
        assert_eq!(
            first.result.score.map(f64::to_bits),
            second.result.score.map(f64::to_bits)
        );
    }

    #[test]
    fn worst_smoothed_return_picks_largest_decline() {
        let universe = universe(vec![
            ("DOWN", series(&[(40, dec!(100)), (30, dec!(90)), (20, dec!(80)), (10, dec!(70))])),
            ("UP", series(&[(40, dec!(100)), (30, dec!(110)), (20, dec!(120)), (10, dec!(130))])),
        ]);

        let eval = RankingEngine::default().worst_3m_smoothed_return(&universe, today());

        // Smoothed DOWN: [90, 80] -> -1/9.
        assert_eq!(eval.result.ticker.as_deref(), Some("DOWN"));
        assert_close(eval.result.score, (80.0 - 90.0) / 90.0);
    }

    #[test]
    fn worst_smoothed_return_excludes_series_shorter_than_window() {
        let universe = universe(vec![("A", series(&[(20, dec!(100)), (10, dec!(50))]))]);

        let eval = RankingEngine::default().worst_3m_smoothed_return(&universe, today());

        assert!(eval.result.is_none());
        assert_eq!(
            eval.outcomes["A"],
            InstrumentOutcome::InsufficientData {
                required: 3,
                found: 2
            }
        );
    }

    #[test]
    fn worst_smoothed_return_single_average_scores_zero() {
        let universe = universe(vec![(
            "A",
            series(&[(30, dec!(10)), (20, dec!(20)), (10, dec!(30))]),
        )]);

        let eval = RankingEngine::default().worst_3m_smoothed_return(&universe, today());

        assert_eq!(eval.result, RankingResult::winner("A", 0.0));
    }

    #[test]
    fn worst_smoothed_return_excludes_zero_first_average() {
        let universe = universe(vec![(
            "A",
            series(&[(30, dec!(0)), (20, dec!(0)), (10, dec!(0)), (5, dec!(3))]),
        )]);

        let eval = RankingEngine::default().worst_3m_smoothed_return(&universe, today());

        assert!(eval.result.is_none());
        assert!(matches!(eval.outcomes["A"], InstrumentOutcome::DegenerateInput(_)));
    }

    #[test]
    fn trend_slope_of_linear_series_is_exact() {
        let universe = universe(vec![
            ("RISING", linear_series(20, 100, 1)),
            ("FLAT", linear_series(20, 100, 0)),
            ("FALLING", linear_series(20, 100, -1)),
        ]);

        let eval = RankingEngine::default().strongest_1m_trend(&universe, today());

        assert_eq!(eval.result.ticker.as_deref(), Some("RISING"));
        assert_close(eval.result.score, 1.0);
        assert_close(eval.outcomes["FALLING"].score(), -1.0);
    }

    #[test]
    fn worst_smoothed_return_window_includes_its_first_day() {
        let universe = universe(vec![(
            "A",
            series(&[
                (91, dec!(1000)),
                (90, dec!(100)),
                (60, dec!(90)),
                (30, dec!(80)),
                (10, dec!(70)),
            ]),
        )]);

        let eval = RankingEngine::default().worst_3m_smoothed_return(&universe, today());

        // Day 90 counts, day 91 does not: smoothed [90, 80].
        assert_close(eval.result.score, (80.0 - 90.0) / 90.0);
    }

    #[test]
    fn trend_window_includes_its_first_day() {
        let recent: Vec<(i64, Decimal)> = (1..=9).map(|ago| (ago, dec!(50))).collect();
        let mut on_edge = recent.clone();
        on_edge.push((90, dec!(40)));
        let mut past_edge = recent;
        past_edge.push((91, dec!(40)));

        let universe = universe(vec![("EDGE", series(&on_edge)), ("PAST", series(&past_edge))]);

        let eval = RankingEngine::default().strongest_1m_trend(&universe, today());

        assert_eq!(eval.result.ticker.as_deref(), Some("EDGE"));
        assert_eq!(
            eval.outcomes["PAST"],
            InstrumentOutcome::InsufficientData {
                required: 10,
                found: 9
            }
        );
    }

    #[test]
    fn trend_requires_minimum_sample() {
        let universe = universe(vec![("A", linear_series(9, 100, 5))]);

        let eval = RankingEngine::default().strongest_1m_trend(&universe, today());

        assert!(eval.result.is_none());
        assert_eq!(
            eval.outcomes["A"],
            InstrumentOutcome::InsufficientData {
                required: 10,
                found: 9
            }
        );
    }

    #[test]
    fn empty_universe_has_no_winner_in_any_ranking() {
        let evaluations = RankingEngine::default().evaluate_all(&Universe::new(), today());

        assert_eq!(evaluations.len(), 3);
        for eval in evaluations {
            assert_eq!(eval.result, RankingResult::none());
        }
    }

    #[test]
    fn universe_below_all_thresholds_has_no_winner() {
        let universe = universe(vec![
            ("A", series(&[(1, dec!(10))])),
            ("B", Vec::new()),
        ]);

        let evaluations = RankingEngine::default().evaluate_all(&universe, today());

        assert!(evaluations.iter().all(|e| e.result.is_none()));
    }

    #[test]
    fn custom_parameters_are_honoured() {
        let mut params = RankingParams::default();
        params.trend.min_points = 3;
        params.trend.window_days = 10;
        let engine = RankingEngine::new(params).unwrap();
        let universe = universe(vec![("A", linear_series(5, 10, 2))]);

        let eval = engine.strongest_1m_trend(&universe, today());

        assert_close(eval.result.score, 2.0);
    }

    #[test]
    fn zero_smoothing_window_is_rejected() {
        let mut params = RankingParams::default();
        params.worst_smoothed_return.sma_window = 0;
        assert!(RankingEngine::new(params).is_err());
    }
}
