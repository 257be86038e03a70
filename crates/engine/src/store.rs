use crate::error::EngineError;
use analytics::Universe;
use async_trait::async_trait;
use chrono::NaiveDate;
use core_types::{CurrentQuote, Instrument, PricePoint};
use database::DbRepository;
use futures::{StreamExt, TryStreamExt};
use parking_lot::RwLock;
use std::collections::BTreeMap;

/// The engine's view of the Price History Store.
///
/// This trait is the only contract between the core and persistence, allowing
/// the PostgreSQL repository to be swapped for an in-memory store in tests.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// All tracked instruments.
    async fn list_instruments(&self) -> Result<Vec<Instrument>, EngineError>;

    /// The full price history of `ticker`, in no particular order.
    /// Unknown tickers yield an empty history.
    async fn list_price_history(&self, ticker: &str) -> Result<Vec<PricePoint>, EngineError>;

    /// Starts tracking `ticker`. Returns `false` if it was already tracked.
    async fn add_instrument(&self, ticker: &str) -> Result<bool, EngineError>;

    /// Stops tracking `ticker`, dropping its history and quote.
    /// Returns `false` if it was not tracked.
    async fn remove_instrument(&self, ticker: &str) -> Result<bool, EngineError>;

    /// Records the latest quote of a tracked instrument.
    /// Returns `false` if the instrument is not tracked.
    async fn save_current_quote(&self, ticker: &str, quote: &CurrentQuote) -> Result<bool, EngineError>;
}

#[async_trait]
impl HistoryStore for DbRepository {
    async fn list_instruments(&self) -> Result<Vec<Instrument>, EngineError> {
        Ok(DbRepository::list_instruments(self).await?)
    }

    async fn list_price_history(&self, ticker: &str) -> Result<Vec<PricePoint>, EngineError> {
        Ok(self.get_price_history(ticker).await?)
    }

    async fn add_instrument(&self, ticker: &str) -> Result<bool, EngineError> {
        Ok(self.insert_instrument(ticker).await?)
    }

    async fn remove_instrument(&self, ticker: &str) -> Result<bool, EngineError> {
        Ok(self.delete_instrument(ticker).await?)
    }

    async fn save_current_quote(&self, ticker: &str, quote: &CurrentQuote) -> Result<bool, EngineError> {
        Ok(self.upsert_current_quote(ticker, quote).await?)
    }
}

/// Reads the whole universe: every instrument with its full history.
///
/// Histories are fetched concurrently, at most `fanout` at a time. Any single
/// read failure fails the whole load, so a refresh never ranks a partial
/// universe.
pub async fn load_universe(store: &dyn HistoryStore, fanout: usize) -> Result<Universe, EngineError> {
    let instruments = store.list_instruments().await?;

    futures::stream::iter(instruments)
        .map(|instrument| async move {
            let history = store.list_price_history(&instrument.ticker).await?;
            Ok::<_, EngineError>((instrument.ticker, history))
        })
        .buffered(fanout.max(1))
        .try_collect::<Universe>()
        .await
}

#[derive(Debug, Default)]
struct InstrumentRecord {
    history: BTreeMap<NaiveDate, PricePoint>,
    quote: Option<CurrentQuote>,
}

/// A process-local `HistoryStore`, used by tests and offline runs.
///
/// Enforces the same invariants as the database: one point per
/// (instrument, date), cascading removal.
#[derive(Debug, Default)]
pub struct InMemoryHistoryStore {
    instruments: RwLock<BTreeMap<String, InstrumentRecord>>,
}

impl InMemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds points for `ticker`, creating the instrument if needed.
    /// Points whose date already exists are ignored. Returns how many were added.
    pub fn insert_points(&self, ticker: &str, points: impl IntoIterator<Item = PricePoint>) -> usize {
        let mut instruments = self.instruments.write();
        let record = instruments.entry(ticker.to_string()).or_default();
        let mut added = 0;
        for point in points {
            if let std::collections::btree_map::Entry::Vacant(slot) = record.history.entry(point.date) {
                slot.insert(point);
                added += 1;
            }
        }
        added
    }

    pub fn current_quote(&self, ticker: &str) -> Option<CurrentQuote> {
        self.instruments
            .read()
            .get(ticker)
            .and_then(|record| record.quote.clone())
    }
}

#[async_trait]
impl HistoryStore for InMemoryHistoryStore {
    async fn list_instruments(&self) -> Result<Vec<Instrument>, EngineError> {
        Ok(self
            .instruments
            .read()
            .keys()
            .map(|ticker| Instrument::new(ticker.clone()))
            .collect())
    }

    async fn list_price_history(&self, ticker: &str) -> Result<Vec<PricePoint>, EngineError> {
        Ok(self
            .instruments
            .read()
            .get(ticker)
            .map(|record| record.history.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn add_instrument(&self, ticker: &str) -> Result<bool, EngineError> {
        let mut instruments = self.instruments.write();
        if instruments.contains_key(ticker) {
            return Ok(false);
        }
        instruments.insert(ticker.to_string(), InstrumentRecord::default());
        Ok(true)
    }

    async fn remove_instrument(&self, ticker: &str) -> Result<bool, EngineError> {
        Ok(self.instruments.write().remove(ticker).is_some())
    }

    async fn save_current_quote(&self, ticker: &str, quote: &CurrentQuote) -> Result<bool, EngineError> {
        match self.instruments.write().get_mut(ticker) {
            Some(record) => {
                record.quote = Some(quote.clone());
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
