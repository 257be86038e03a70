use core_types::{PricePoint, RankingKind, RankingResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The full set of instruments and their (unordered) price histories.
///
/// A `BTreeMap` fixes the iteration order to lexicographic ticker order,
/// which is what makes tie-breaking deterministic.
pub type Universe = BTreeMap<String, Vec<PricePoint>>;

/// How a single instrument fared in one ranking pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum InstrumentOutcome {
    /// The instrument produced a valid score and competed for the ranking.
    Scored(f64),
    /// Too few qualifying points inside the window.
    InsufficientData { required: usize, found: usize },
    /// The series qualified but yielded a zero/invalid denominator or a
    /// non-finite score.
    DegenerateInput(String),
}

impl InstrumentOutcome {
    pub fn score(&self) -> Option<f64> {
        match self {
            InstrumentOutcome::Scored(score) => Some(*score),
            _ => None,
        }
    }
}

/// Which end of the score distribution wins a ranking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Highest,
    Lowest,
}

impl Direction {
    /// `true` when `candidate` strictly beats `incumbent`.
    fn beats(&self, candidate: f64, incumbent: f64) -> bool {
        match self {
            Direction::Highest => candidate > incumbent,
            Direction::Lowest => candidate < incumbent,
        }
    }
}

/// The result of one ranking pass over the universe, with per-instrument diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    pub kind: RankingKind,
    pub result: RankingResult,
    pub outcomes: BTreeMap<String, InstrumentOutcome>,
}

impl Evaluation {
    /// Picks the winner among the scored outcomes.
    ///
    /// Outcomes are visited in ticker order and a candidate only replaces the
    /// incumbent when strictly better, so exact ties go to the
    /// lexicographically smallest ticker.
    pub fn select(
        kind: RankingKind,
        direction: Direction,
        outcomes: BTreeMap<String, InstrumentOutcome>,
    ) -> Self {
        let mut best: Option<(&str, f64)> = None;
        for (ticker, outcome) in &outcomes {
            let Some(score) = outcome.score() else {
                continue;
            };
            match best {
                Some((_, incumbent)) if !direction.beats(score, incumbent) => {}
                _ => best = Some((ticker.as_str(), score)),
            }
        }

        let result = match best {
            Some((ticker, score)) => RankingResult::winner(ticker, score),
            None => RankingResult::none(),
        };

        Self {
            kind,
            result,
            outcomes,
        }
    }

    /// Number of instruments that competed with a valid score.
    pub fn scored_count(&self) -> usize {
        self.outcomes.values().filter(|o| o.score().is_some()).count()
    }

    /// Number of instruments excluded from this ranking.
    pub fn skipped_count(&self) -> usize {
        self.outcomes.len() - self.scored_count()
    }
}
