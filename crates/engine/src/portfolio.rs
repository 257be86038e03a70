use crate::error::EngineError;
use crate::orchestrator::{RefreshHandle, RefreshTrigger};
use crate::quotes::QuoteSource;
use crate::store::HistoryStore;
use core_types::{normalize_ticker, Instrument};
use std::sync::Arc;

/// Adds and removes tracked instruments, keeping the rankings in step.
pub struct Portfolio {
    store: Arc<dyn HistoryStore>,
    refresh: Option<RefreshHandle>,
    validator: Option<Arc<dyn QuoteSource>>,
}

impl Portfolio {
    pub fn new(store: Arc<dyn HistoryStore>) -> Self {
        Self {
            store,
            refresh: None,
            validator: None,
        }
    }

    /// Schedules a refresh after every successful change.
    pub fn with_refresh(mut self, handle: RefreshHandle) -> Self {
        self.refresh = Some(handle);
        self
    }

    /// Rejects tickers for which `source` has no priced quote.
    pub fn with_validator(mut self, source: Arc<dyn QuoteSource>) -> Self {
        self.validator = Some(source);
        self
    }

    pub async fn list(&self) -> Result<Vec<Instrument>, EngineError> {
        self.store.list_instruments().await
    }

    /// Starts tracking `ticker` and returns its normalized form.
    pub async fn add_instrument(&self, ticker: &str) -> Result<String, EngineError> {
        let ticker = normalize_ticker(ticker)?;

        if let Some(source) = &self.validator {
            let quote = source.fetch_quote(&ticker).await.map_err(|e| {
                tracing::debug!(ticker = %ticker, error = %e, "Quote lookup failed.");
                EngineError::UnknownTicker(ticker.clone())
            })?;
            if quote.price.is_none() {
                return Err(EngineError::UnknownTicker(ticker));
            }
        }

        if !self.store.add_instrument(&ticker).await? {
            return Err(EngineError::InstrumentExists(ticker));
        }

        tracing::info!(ticker = %ticker, "Instrument added.");
        self.notify(RefreshTrigger::InstrumentAdded(ticker.clone()));
        Ok(ticker)
    }

    /// Stops tracking `ticker`, dropping its history and quote.
    pub async fn remove_instrument(&self, ticker: &str) -> Result<String, EngineError> {
        let ticker = normalize_ticker(ticker)?;

        if !self.store.remove_instrument(&ticker).await? {
            return Err(EngineError::InstrumentNotFound(ticker));
        }

        tracing::info!(ticker = %ticker, "Instrument removed.");
        self.notify(RefreshTrigger::InstrumentRemoved(ticker.clone()));
        Ok(ticker)
    }

    fn notify(&self, trigger: RefreshTrigger) {
        if let Some(handle) = &self.refresh {
            handle.request_refresh(trigger);
        }
    }
}
