//! # Engine Crate
//!
//! Binds the pure ranking engine to the outside world. It owns the
//! `RankingCache`, decides when to recompute it through the
//! `RefreshOrchestrator`, and exposes the `HistoryStore` / `QuoteSource`
//! seams that persistence and price feeds plug into.
//!
//! The cache is constructed once at startup and shared by `Arc` between the
//! orchestrator and the read path; there is no global state.

pub mod cache;
pub mod error;
pub mod market;
pub mod orchestrator;
pub mod portfolio;
pub mod quotes;
pub mod store;

pub use cache::{RankingCache, RankingEntry, RankingSink, RankingSnapshot};
pub use error::EngineError;
pub use market::{MarketClock, MarketState, TransitionDetector};
pub use orchestrator::{
    InstrumentSetTracker, RefreshHandle, RefreshOrchestrator, RefreshStats, RefreshTrigger,
};
pub use portfolio::Portfolio;
pub use quotes::{HistoryQuoteSource, QuotePoller, QuoteSource};
pub use store::{load_universe, HistoryStore, InMemoryHistoryStore};
