use crate::error::EngineError;
use crate::store::HistoryStore;
use async_trait::async_trait;
use chrono::Utc;
use core_types::CurrentQuote;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Anything that can report the latest quote of a ticker.
#[async_trait]
pub trait QuoteSource: Send + Sync {
    async fn fetch_quote(&self, ticker: &str) -> Result<CurrentQuote, EngineError>;
}

/// Derives a quote from the two most recent stored closes.
///
/// Used when no live feed is configured: the "current" price is the last
/// close and the change is measured against the close before it.
pub struct HistoryQuoteSource {
    store: Arc<dyn HistoryStore>,
}

impl HistoryQuoteSource {
    pub fn new(store: Arc<dyn HistoryStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl QuoteSource for HistoryQuoteSource {
    async fn fetch_quote(&self, ticker: &str) -> Result<CurrentQuote, EngineError> {
        let mut closes: Vec<_> = self
            .store
            .list_price_history(ticker)
            .await?
            .into_iter()
            .filter_map(|p| p.close.map(|close| (p.date, close)))
            .collect();
        closes.sort_by_key(|(date, _)| *date);

        let last = closes.last().map(|(_, close)| *close);
        let previous = closes.iter().rev().nth(1).map(|(_, close)| *close);

        // Overflow yields a missing field rather than a panic.
        let change = last
            .zip(previous)
            .and_then(|(last, previous)| last.checked_sub(previous));
        let change_pct = change
            .zip(previous)
            .and_then(|(change, previous)| change.checked_div(previous))
            .and_then(|ratio| ratio.checked_mul(Decimal::ONE_HUNDRED))
            .map(|pct| pct.round_dp(4));

        Ok(CurrentQuote {
            price: last,
            change,
            change_pct,
            updated_at: Utc::now(),
        })
    }
}

/// Periodically copies the latest quote of every tracked instrument into the store.
pub struct QuotePoller {
    store: Arc<dyn HistoryStore>,
    source: Arc<dyn QuoteSource>,
    period: Duration,
}

impl QuotePoller {
    pub fn new(store: Arc<dyn HistoryStore>, source: Arc<dyn QuoteSource>, period: Duration) -> Self {
        Self {
            store,
            source,
            period,
        }
    }

    /// Updates every instrument once. A ticker whose fetch or save fails is
    /// logged and skipped. Returns how many quotes were stored.
    pub async fn poll_once(&self) -> Result<usize, EngineError> {
        let instruments = self.store.list_instruments().await?;
        let mut updated = 0;

        for instrument in &instruments {
            let ticker = instrument.ticker.as_str();
            let quote = match self.source.fetch_quote(ticker).await {
                Ok(quote) => quote,
                Err(e) => {
                    tracing::warn!(ticker, error = %e, "Failed to fetch quote, skipping.");
                    continue;
                }
            };
            match self.store.save_current_quote(ticker, &quote).await {
                Ok(true) => updated += 1,
                Ok(false) => tracing::debug!(ticker, "Instrument removed before its quote was saved."),
                Err(e) => tracing::warn!(ticker, error = %e, "Failed to save quote, skipping."),
            }
        }

        tracing::debug!(updated, total = instruments.len(), "Quote poll finished.");
        Ok(updated)
    }

    /// Polls every `period` until `cancel` fires.
    pub async fn run(self, cancel: CancellationToken) {
        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.poll_once().await {
                        tracing::error!(error = %e, "Quote poll failed.");
                    }
                }
            }
        }
        tracing::debug!("Quote poller stopped.");
    }
}
