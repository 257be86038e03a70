use crate::error::EngineError;
use crate::store::{load_universe, HistoryStore};
use analytics::{Evaluation, RankingEngine};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use configuration::RefreshSettings;
use core_types::{RankingKind, RankingResult};
use database::{DbRepository, StoredRanking};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// The cached outcome of one ranking kind.
#[derive(Debug, Clone, PartialEq)]
pub struct RankingEntry {
    pub ticker: Option<String>,
    pub score: Option<f64>,
    /// `None` until the first successful refresh.
    pub computed_at: Option<DateTime<Utc>>,
}

impl RankingEntry {
    fn absent() -> Self {
        Self {
            ticker: None,
            score: None,
            computed_at: None,
        }
    }

    pub fn result(&self) -> RankingResult {
        RankingResult {
            ticker: self.ticker.clone(),
            score: self.score,
        }
    }
}

/// A complete, immutable set of rankings produced by a single computation.
///
/// Every snapshot holds exactly one entry per `RankingKind`.
#[derive(Debug, Clone, PartialEq)]
pub struct RankingSnapshot {
    pub computed_at: Option<DateTime<Utc>>,
    pub entries: BTreeMap<RankingKind, RankingEntry>,
}

impl RankingSnapshot {
    /// The snapshot served before anything was computed: every kind present,
    /// with no winner.
    pub fn empty() -> Self {
        Self {
            computed_at: None,
            entries: RankingKind::ALL
                .iter()
                .map(|kind| (*kind, RankingEntry::absent()))
                .collect(),
        }
    }

    pub fn from_evaluations(evaluations: &[Evaluation], computed_at: DateTime<Utc>) -> Self {
        let mut snapshot = Self::empty();
        snapshot.computed_at = Some(computed_at);
        for entry in snapshot.entries.values_mut() {
            entry.computed_at = Some(computed_at);
        }
        for evaluation in evaluations {
            snapshot.entries.insert(
                evaluation.kind,
                RankingEntry {
                    ticker: evaluation.result.ticker.clone(),
                    score: evaluation.result.score,
                    computed_at: Some(computed_at),
                },
            );
        }
        snapshot
    }

    /// Rebuilds a snapshot from persisted rows.
    ///
    /// Returns `None` unless every kind is present, so a partially written
    /// table is never served.
    pub fn from_stored(rows: &[StoredRanking]) -> Option<Self> {
        let entries: BTreeMap<RankingKind, RankingEntry> = rows
            .iter()
            .map(|row| {
                (
                    row.kind,
                    RankingEntry {
                        ticker: row.ticker.clone(),
                        score: row.score,
                        computed_at: Some(row.computed_at),
                    },
                )
            })
            .collect();

        if !RankingKind::ALL.iter().all(|kind| entries.contains_key(kind)) {
            return None;
        }

        let computed_at = rows.iter().map(|row| row.computed_at).max();
        Some(Self {
            computed_at,
            entries,
        })
    }

    pub fn to_stored(&self) -> Vec<StoredRanking> {
        let Some(computed_at) = self.computed_at else {
            return Vec::new();
        };
        self.entries
            .iter()
            .map(|(kind, entry)| StoredRanking {
                kind: *kind,
                ticker: entry.ticker.clone(),
                score: entry.score,
                computed_at: entry.computed_at.unwrap_or(computed_at),
            })
            .collect()
    }

    pub fn get(&self, kind: RankingKind) -> Option<&RankingEntry> {
        self.entries.get(&kind)
    }

    pub fn is_computed(&self) -> bool {
        self.computed_at.is_some()
    }
}

/// Receives every newly published snapshot, e.g. to persist it.
#[async_trait]
pub trait RankingSink: Send + Sync {
    async fn persist(&self, snapshot: &RankingSnapshot) -> Result<(), EngineError>;
}

#[async_trait]
impl RankingSink for DbRepository {
    async fn persist(&self, snapshot: &RankingSnapshot) -> Result<(), EngineError> {
        self.replace_rankings(&snapshot.to_stored()).await?;
        Ok(())
    }
}

/// Holds the latest rankings and recomputes them on demand.
///
/// Readers get an `Arc` to a complete snapshot; a refresh builds the new
/// snapshot aside and swaps the pointer, so readers never see a mix of two
/// computations.
pub struct RankingCache {
    engine: RankingEngine,
    current: RwLock<Arc<RankingSnapshot>>,
    /// Serializes compute + swap.
    refresh_lock: tokio::sync::Mutex<()>,
    read_timeout: Duration,
    fanout: usize,
    sink: Option<Arc<dyn RankingSink>>,
}

impl RankingCache {
    pub fn new(engine: RankingEngine, settings: &RefreshSettings) -> Self {
        Self {
            engine,
            current: RwLock::new(Arc::new(RankingSnapshot::empty())),
            refresh_lock: tokio::sync::Mutex::new(()),
            read_timeout: Duration::from_secs(settings.read_timeout_secs),
            fanout: settings.history_fanout,
            sink: None,
        }
    }

    /// Attaches a sink that receives every snapshot published by `refresh`.
    pub fn with_sink(mut self, sink: Arc<dyn RankingSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn get_all(&self) -> Arc<RankingSnapshot> {
        Arc::clone(&self.current.read())
    }

    pub fn get(&self, kind: RankingKind) -> Option<RankingEntry> {
        self.current.read().get(kind).cloned()
    }

    /// Publishes a previously persisted snapshot, typically at startup.
    pub fn seed(&self, snapshot: RankingSnapshot) {
        *self.current.write() = Arc::new(snapshot);
    }

    /// Recomputes all rankings from the store and publishes the result.
    ///
    /// On error the current snapshot is left untouched.
    pub async fn refresh(
        &self,
        store: &dyn HistoryStore,
        today: NaiveDate,
    ) -> Result<Arc<RankingSnapshot>, EngineError> {
        let _guard = self.refresh_lock.lock().await;

        let universe = tokio::time::timeout(self.read_timeout, load_universe(store, self.fanout))
            .await
            .map_err(|_| EngineError::ReadTimeout(self.read_timeout))??;

        let evaluations = self.engine.evaluate_all(&universe, today);
        let snapshot = Arc::new(RankingSnapshot::from_evaluations(&evaluations, Utc::now()));

        *self.current.write() = Arc::clone(&snapshot);

        for (kind, entry) in &snapshot.entries {
            tracing::info!(
                kind = %kind,
                ticker = ?entry.ticker,
                score = ?entry.score,
                "Ranking updated."
            );
        }

        if let Some(sink) = &self.sink {
            if let Err(e) = sink.persist(&snapshot).await {
                tracing::warn!(error = %e, "Failed to persist ranking snapshot.");
            }
        }

        Ok(snapshot)
    }
}
