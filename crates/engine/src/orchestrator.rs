use crate::cache::{RankingCache, RankingSnapshot};
use crate::error::EngineError;
use crate::market::{MarketClock, MarketState, TransitionDetector};
use crate::store::HistoryStore;
use chrono::{DateTime, Utc};
use configuration::{MarketHours, RefreshSettings};
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

const TRIGGER_QUEUE_CAPACITY: usize = 64;

/// Why a refresh was requested.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshTrigger {
    Startup,
    MarketOpened,
    MarketClosed,
    InstrumentAdded(String),
    InstrumentRemoved(String),
    Periodic,
    Manual,
}

impl fmt::Display for RefreshTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RefreshTrigger::Startup => write!(f, "startup"),
            RefreshTrigger::MarketOpened => write!(f, "market opened"),
            RefreshTrigger::MarketClosed => write!(f, "market closed"),
            RefreshTrigger::InstrumentAdded(ticker) => write!(f, "instrument added ({})", ticker),
            RefreshTrigger::InstrumentRemoved(ticker) => write!(f, "instrument removed ({})", ticker),
            RefreshTrigger::Periodic => write!(f, "periodic"),
            RefreshTrigger::Manual => write!(f, "manual"),
        }
    }
}

/// Counters describing the refresh worker's history.
///
/// Every accepted trigger is counted exactly once: either it started a run
/// (`succeeded` or `failed`) or it was folded into another run (`coalesced`).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RefreshStats {
    pub succeeded: u64,
    pub failed: u64,
    pub coalesced: u64,
    pub last_success: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

/// Turns successive reads of the tracked instrument set into add/remove triggers.
#[derive(Debug, Default)]
pub struct InstrumentSetTracker {
    known: Option<BTreeSet<String>>,
}

impl InstrumentSetTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `current` and returns one trigger per ticker that appeared or
    /// disappeared since the previous call. The first call only records.
    pub fn observe(&mut self, current: BTreeSet<String>) -> Vec<RefreshTrigger> {
        let triggers = match &self.known {
            None => Vec::new(),
            Some(previous) => {
                let added = current
                    .difference(previous)
                    .map(|ticker| RefreshTrigger::InstrumentAdded(ticker.clone()));
                let removed = previous
                    .difference(&current)
                    .map(|ticker| RefreshTrigger::InstrumentRemoved(ticker.clone()));
                added.chain(removed).collect()
            }
        };
        self.known = Some(current);
        triggers
    }
}

/// A cheap, cloneable handle for requesting refreshes and reading rankings.
#[derive(Clone)]
pub struct RefreshHandle {
    tx: mpsc::Sender<RefreshTrigger>,
    cache: Arc<RankingCache>,
    stats: Arc<Mutex<RefreshStats>>,
}

impl RefreshHandle {
    /// Schedules a refresh and returns immediately.
    ///
    /// When the queue is full the trigger is dropped: the queued triggers
    /// already guarantee a run that starts after this call.
    pub fn request_refresh(&self, trigger: RefreshTrigger) {
        match self.tx.try_send(trigger) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(trigger)) => {
                tracing::debug!(%trigger, "Refresh queue full, trigger coalesced.");
                self.stats.lock().coalesced += 1;
            }
            Err(mpsc::error::TrySendError::Closed(trigger)) => {
                tracing::warn!(%trigger, "Refresh worker is stopped, trigger ignored.");
            }
        }
    }

    /// The latest complete snapshot. Never blocks on a running refresh.
    pub fn get_rankings(&self) -> Arc<RankingSnapshot> {
        self.cache.get_all()
    }

    pub fn stats(&self) -> RefreshStats {
        self.stats.lock().clone()
    }
}

/// Owns the background tasks that keep the ranking cache current.
pub struct RefreshOrchestrator {
    handle: RefreshHandle,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl RefreshOrchestrator {
    /// Spawns the refresh worker and the market watcher, plus the instrument
    /// set watcher and periodic fallback timer when configured, then schedules
    /// an initial refresh.
    pub fn start(
        cache: Arc<RankingCache>,
        store: Arc<dyn HistoryStore>,
        refresh: &RefreshSettings,
        market: &MarketHours,
    ) -> Result<Self, EngineError> {
        let clock = MarketClock::from_settings(market)?;
        let (tx, rx) = mpsc::channel(TRIGGER_QUEUE_CAPACITY);
        let stats = Arc::new(Mutex::new(RefreshStats::default()));
        let cancel = CancellationToken::new();

        let handle = RefreshHandle {
            tx,
            cache: Arc::clone(&cache),
            stats: Arc::clone(&stats),
        };

        let mut tasks = Vec::new();

        tasks.push(tokio::spawn(run_worker(
            rx,
            cache,
            Arc::clone(&store),
            clock.clone(),
            stats,
            cancel.clone(),
        )));

        let watcher_clock = clock;
        tasks.push(tokio::spawn(watch_market(
            move || watcher_clock.now(),
            handle.clone(),
            Duration::from_secs(market.poll_interval_secs.max(1)),
            cancel.clone(),
        )));

        if let Some(secs) = refresh.universe_poll_secs.filter(|secs| *secs > 0) {
            tasks.push(tokio::spawn(watch_universe(
                Arc::clone(&store),
                handle.clone(),
                Duration::from_secs(secs),
                cancel.clone(),
            )));
        }

        if let Some(secs) = refresh.periodic_interval_secs.filter(|secs| *secs > 0) {
            tasks.push(tokio::spawn(run_periodic(
                handle.clone(),
                Duration::from_secs(secs),
                cancel.clone(),
            )));
        }

        tracing::info!(
            market_timezone = %market.timezone,
            periodic_secs = ?refresh.periodic_interval_secs,
            universe_poll_secs = ?refresh.universe_poll_secs,
            "Refresh orchestrator started."
        );
        handle.request_refresh(RefreshTrigger::Startup);

        Ok(Self {
            handle,
            cancel,
            tasks,
        })
    }

    pub fn handle(&self) -> RefreshHandle {
        self.handle.clone()
    }

    pub fn request_refresh(&self, trigger: RefreshTrigger) {
        self.handle.request_refresh(trigger);
    }

    pub fn get_rankings(&self) -> Arc<RankingSnapshot> {
        self.handle.get_rankings()
    }

    pub fn stats(&self) -> RefreshStats {
        self.handle.stats()
    }

    /// Stops every background task and waits for them to finish.
    /// A refresh already in progress is allowed to complete.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        for task in self.tasks {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "Refresh task ended abnormally.");
            }
        }
        tracing::info!("Refresh orchestrator stopped.");
    }
}

async fn run_worker(
    mut rx: mpsc::Receiver<RefreshTrigger>,
    cache: Arc<RankingCache>,
    store: Arc<dyn HistoryStore>,
    clock: MarketClock,
    stats: Arc<Mutex<RefreshStats>>,
    cancel: CancellationToken,
) {
    loop {
        let trigger = tokio::select! {
            _ = cancel.cancelled() => break,
            received = rx.recv() => match received {
                Some(trigger) => trigger,
                None => break,
            },
        };

        // Everything queued so far is satisfied by the run about to start.
        let mut merged = 0;
        while let Ok(extra) = rx.try_recv() {
            tracing::debug!(trigger = %extra, "Coalescing refresh trigger.");
            merged += 1;
        }
        if merged > 0 {
            stats.lock().coalesced += merged;
        }

        tracing::info!(%trigger, merged, "Refreshing rankings.");
        match cache.refresh(store.as_ref(), clock.today()).await {
            Ok(snapshot) => {
                let mut stats = stats.lock();
                stats.succeeded += 1;
                stats.last_success = snapshot.computed_at;
            }
            Err(e) => {
                tracing::error!(%trigger, error = %e, "Ranking refresh failed; serving previous snapshot.");
                let mut stats = stats.lock();
                stats.failed += 1;
                stats.last_error = Some(e.to_string());
            }
        }
    }
    tracing::debug!("Refresh worker exiting.");
}

/// Samples the session state every `poll` and requests a refresh on each
/// open/close edge.
async fn watch_market<F>(mut sample: F, handle: RefreshHandle, poll: Duration, cancel: CancellationToken)
where
    F: FnMut() -> MarketState + Send,
{
    let mut detector = TransitionDetector::new();
    let mut ticker = interval(poll);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                if let Some(state) = detector.observe(sample()) {
                    tracing::info!(%state, "Market state changed.");
                    handle.request_refresh(match state {
                        MarketState::Open => RefreshTrigger::MarketOpened,
                        MarketState::Closed => RefreshTrigger::MarketClosed,
                    });
                }
            }
        }
    }
}

/// Re-reads the instrument set every `poll` and requests a refresh for each
/// ticker added or removed behind this process's back.
async fn watch_universe(
    store: Arc<dyn HistoryStore>,
    handle: RefreshHandle,
    poll: Duration,
    cancel: CancellationToken,
) {
    let mut tracker = InstrumentSetTracker::new();
    let mut ticker = interval(poll);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                match store.list_instruments().await {
                    Ok(instruments) => {
                        let current = instruments.into_iter().map(|i| i.ticker).collect();
                        for trigger in tracker.observe(current) {
                            tracing::info!(%trigger, "Instrument set changed.");
                            handle.request_refresh(trigger);
                        }
                    }
                    Err(e) => tracing::warn!(error = %e, "Could not read the instrument set."),
                }
            }
        }
    }
}

async fn run_periodic(handle: RefreshHandle, period: Duration, cancel: CancellationToken) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => handle.request_refresh(RefreshTrigger::Periodic),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryHistoryStore;
    use analytics::RankingEngine;
    use async_trait::async_trait;
    use chrono::Duration as ChronoDuration;
    use core_types::{CurrentQuote, Instrument, PricePoint, RankingKind};
    use rust_decimal::Decimal;
    use std::collections::VecDeque;

    fn settings() -> RefreshSettings {
        RefreshSettings {
            periodic_interval_secs: None,
            universe_poll_secs: None,
            ..RefreshSettings::default()
        }
    }

    fn cache() -> Arc<RankingCache> {
        Arc::new(RankingCache::new(RankingEngine::default(), &settings()))
    }

    fn trending_store() -> Arc<InMemoryHistoryStore> {
        let store = InMemoryHistoryStore::new();
        let today = Utc::now().date_naive();
        store.insert_points(
            "UP",
            (0..20).map(|i| {
                PricePoint::with_close(today - ChronoDuration::days(25 - i), Decimal::from(100 + i))
            }),
        );
        Arc::new(store)
    }

    struct FailingStore;

    #[async_trait]
    impl HistoryStore for FailingStore {
        async fn list_instruments(&self) -> Result<Vec<Instrument>, EngineError> {
            Err(EngineError::Store("disk unavailable".into()))
        }
        async fn list_price_history(&self, _: &str) -> Result<Vec<PricePoint>, EngineError> {
            Err(EngineError::Store("disk unavailable".into()))
        }
        async fn add_instrument(&self, _: &str) -> Result<bool, EngineError> {
            Ok(true)
        }
        async fn remove_instrument(&self, _: &str) -> Result<bool, EngineError> {
            Ok(true)
        }
        async fn save_current_quote(&self, _: &str, _: &CurrentQuote) -> Result<bool, EngineError> {
            Ok(true)
        }
    }

    async fn wait_for(handle: &RefreshHandle, done: impl Fn(&RefreshStats) -> bool) -> RefreshStats {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let stats = handle.stats();
                if done(&stats) {
                    return stats;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("refresh worker did not reach the expected state")
    }

    #[test]
    fn triggers_render_for_logs() {
        assert_eq!(
            RefreshTrigger::InstrumentAdded("PETR4".into()).to_string(),
            "instrument added (PETR4)"
        );
        assert_eq!(RefreshTrigger::MarketClosed.to_string(), "market closed");
    }

    #[tokio::test]
    async fn startup_populates_the_snapshot() {
        let orchestrator =
            RefreshOrchestrator::start(cache(), trending_store(), &settings(), &MarketHours::default())
                .unwrap();

        wait_for(&orchestrator.handle(), |s| s.succeeded >= 1).await;

        let snapshot = orchestrator.get_rankings();
        assert!(snapshot.is_computed());
        assert_eq!(
            snapshot.get(RankingKind::Strongest1mTrend).unwrap().ticker.as_deref(),
            Some("UP")
        );
        orchestrator.shutdown().await;
    }

    #[tokio::test]
    async fn failing_store_keeps_previous_snapshot() {
        let cache = cache();
        let seeded = RankingSnapshot::from_evaluations(&[], Utc::now());
        cache.seed(seeded.clone());

        let orchestrator =
            RefreshOrchestrator::start(cache, Arc::new(FailingStore), &settings(), &MarketHours::default())
                .unwrap();
        orchestrator.request_refresh(RefreshTrigger::Manual);

        let stats = wait_for(&orchestrator.handle(), |s| s.failed + s.coalesced >= 2).await;

        assert_eq!(stats.succeeded, 0);
        assert!(stats.last_error.unwrap().contains("disk unavailable"));
        assert_eq!(*orchestrator.get_rankings(), seeded);
        orchestrator.shutdown().await;
    }

    #[tokio::test]
    async fn every_trigger_is_served_or_coalesced() {
        let orchestrator =
            RefreshOrchestrator::start(cache(), trending_store(), &settings(), &MarketHours::default())
                .unwrap();
        for i in 0..10 {
            orchestrator.request_refresh(RefreshTrigger::InstrumentAdded(format!("T{}", i)));
        }

        let stats = wait_for(&orchestrator.handle(), |s| s.succeeded + s.coalesced == 11).await;

        assert!(stats.succeeded >= 1);
        assert_eq!(stats.failed, 0);
        orchestrator.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_stops_the_worker() {
        let orchestrator =
            RefreshOrchestrator::start(cache(), trending_store(), &settings(), &MarketHours::default())
                .unwrap();
        let handle = orchestrator.handle();
        wait_for(&handle, |s| s.succeeded >= 1).await;

        orchestrator.shutdown().await;
        handle.request_refresh(RefreshTrigger::Manual);
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(handle.stats().succeeded, 1);
    }

    #[tokio::test]
    async fn watcher_requests_refresh_only_on_edges() {
        let (tx, mut rx) = mpsc::channel(8);
        let handle = RefreshHandle {
            tx,
            cache: cache(),
            stats: Arc::new(Mutex::new(RefreshStats::default())),
        };
        let mut script: VecDeque<MarketState> = [
            MarketState::Open,
            MarketState::Open,
            MarketState::Closed,
            MarketState::Closed,
        ]
        .into();
        let cancel = CancellationToken::new();
        let watcher = tokio::spawn(watch_market(
            move || script.pop_front().unwrap_or(MarketState::Closed),
            handle,
            Duration::from_millis(5),
            cancel.clone(),
        ));

        let first = tokio::time::timeout(Duration::from_secs(2), rx.recv()).await.unwrap();
        assert_eq!(first, Some(RefreshTrigger::MarketClosed));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(rx.try_recv().is_err());

        cancel.cancel();
        watcher.await.unwrap();
    }

    fn tickers(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|name| name.to_string()).collect()
    }

    #[test]
    fn tracker_reports_additions_and_removals() {
        let mut tracker = InstrumentSetTracker::new();
        assert!(tracker.observe(tickers(&["A", "B"])).is_empty());
        assert!(tracker.observe(tickers(&["A", "B"])).is_empty());

        let triggers = tracker.observe(tickers(&["B", "C"]));

        assert_eq!(
            triggers,
            vec![
                RefreshTrigger::InstrumentAdded("C".into()),
                RefreshTrigger::InstrumentRemoved("A".into()),
            ]
        );
    }

    #[tokio::test]
    async fn universe_watcher_sees_changes_made_elsewhere() {
        let store = Arc::new(InMemoryHistoryStore::new());
        store.add_instrument("OLD").await.unwrap();
        let (tx, mut rx) = mpsc::channel(8);
        let handle = RefreshHandle {
            tx,
            cache: cache(),
            stats: Arc::new(Mutex::new(RefreshStats::default())),
        };
        let cancel = CancellationToken::new();
        let watcher = tokio::spawn(watch_universe(
            store.clone(),
            handle,
            Duration::from_millis(5),
            cancel.clone(),
        ));
        tokio::time::sleep(Duration::from_millis(50)).await;

        store.add_instrument("NEW").await.unwrap();
        store.remove_instrument("OLD").await.unwrap();

        let mut received = Vec::new();
        while received.len() < 2 {
            let trigger = tokio::time::timeout(Duration::from_secs(2), rx.recv()).await.unwrap();
            received.extend(trigger);
        }
        received.sort_by_key(|trigger| trigger.to_string());
        assert_eq!(
            received,
            vec![
                RefreshTrigger::InstrumentAdded("NEW".into()),
                RefreshTrigger::InstrumentRemoved("OLD".into()),
            ]
        );

        cancel.cancel();
        watcher.await.unwrap();
    }

    #[tokio::test]
    async fn instrument_added_by_another_process_reaches_the_rankings() {
        let store = trending_store();
        let settings = RefreshSettings {
            universe_poll_secs: Some(1),
            ..settings()
        };
        let orchestrator =
            RefreshOrchestrator::start(cache(), store.clone(), &settings, &MarketHours::default()).unwrap();
        let handle = orchestrator.handle();
        wait_for(&handle, |s| s.succeeded >= 1).await;

        // Steeper than UP, written straight to the store as `marquee add` would.
        let today = Utc::now().date_naive();
        store.insert_points(
            "STEEP",
            (0..20).map(|i| {
                PricePoint::with_close(today - ChronoDuration::days(25 - i), Decimal::from(100 + 5 * i))
            }),
        );

        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let snapshot = handle.get_rankings();
                let leader = snapshot.get(RankingKind::Strongest1mTrend).and_then(|e| e.ticker.clone());
                if leader.as_deref() == Some("STEEP") {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .expect("external addition never triggered a refresh");

        orchestrator.shutdown().await;
    }
}
