//! Per-day loop: fetch, densify, publish, then stream-decide-settle.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, Utc};
use futures_util::future::join_all;
use tracing::{debug, error, info, instrument, warn};

use super::summary::RunSummary;
use crate::bus::MessageBus;
use crate::config::Config;
use crate::densify::Densifier;
use crate::ledger::{LedgerError, PositionLedger};
use crate::market::{Observation, PriceSource};
use crate::persistence::TradeStore;
use crate::strategy::{MovingAverageStrategy, TradingStrategy};
use crate::stream::{StreamConsumer, StreamWindow};
use crate::utils::Profiler;

/// Where the orchestrator is within a trading day.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DayPhase {
    Idle,
    Fetching,
    Densifying,
    Publishing,
    Polling,
    Deciding,
    Settling,
    DayComplete,
}

impl fmt::Display for DayPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Fetching => "fetching",
            Self::Densifying => "densifying",
            Self::Publishing => "publishing",
            Self::Polling => "polling",
            Self::Deciding => "deciding",
            Self::Settling => "settling",
            Self::DayComplete => "day_complete",
        };
        f.write_str(name)
    }
}

/// Failures of a single trading day.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("price source unavailable for {day}: {error:#}")]
    SourceUnavailable { day: NaiveDate, error: anyhow::Error },

    #[error("densification aborted for {day}: {reason}")]
    DensifyAborted { day: NaiveDate, reason: String },

    #[error("bus unavailable for {day}: {error:#}")]
    BusUnavailable { day: NaiveDate, error: anyhow::Error },

    #[error("ledger invariant violated on {day}: {source}")]
    Ledger {
        day: NaiveDate,
        #[source]
        source: LedgerError,
    },
}

impl EngineError {
    /// Fatal errors halt the run; the rest skip the day.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Ledger { .. })
    }
}

/// Counters for one completed day.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DayStats {
    pub fetched: usize,
    pub samples: usize,
    pub polls: usize,
    pub trades: usize,
}

/// Drives the trading loop over the configured days.
pub struct Orchestrator<P, B, S> {
    source: P,
    bus: B,
    store: S,
    instruments: Vec<String>,
    trading_days: Vec<NaiveDate>,

    densifier: Densifier,
    strategy: Box<dyn TradingStrategy>,
    window: StreamWindow,
    consumer: StreamConsumer,
    ledger: PositionLedger,
    profiler: Option<Arc<Profiler>>,

    run_id: String,
    phase: DayPhase,
    last_prices: HashMap<String, f64>,
    fetch_dropped: usize,
    failed_segments: usize,
    failed_persists: usize,
}

impl<P, B, S> Orchestrator<P, B, S>
where
    P: PriceSource,
    B: MessageBus,
    S: TradeStore,
{
    pub fn new(config: &Config, source: P, bus: B, store: S) -> Self {
        Self {
            source,
            bus,
            store,
            instruments: config.market.instruments.clone(),
            trading_days: config.market.trading_days.clone(),
            densifier: Densifier::from_config(&config.densify),
            strategy: Box::new(MovingAverageStrategy::from_config(&config.trading)),
            window: StreamWindow::new(config.stream.lookback_ms),
            consumer: StreamConsumer::new(Duration::from_millis(config.stream.poll_timeout_ms)),
            ledger: PositionLedger::new(config.trading.initial_cash),
            profiler: None,
            run_id: format!("run-{}", Utc::now().format("%Y%m%dT%H%M%S%3f")),
            phase: DayPhase::Idle,
            last_prices: HashMap::new(),
            fetch_dropped: 0,
            failed_segments: 0,
            failed_persists: 0,
        }
    }

    /// Replace the default moving-average strategy.
    pub fn with_strategy(mut self, strategy: Box<dyn TradingStrategy>) -> Self {
        self.strategy = strategy;
        self
    }

    /// Time each phase into `profiler`.
    pub fn with_profiler(mut self, profiler: Arc<Profiler>) -> Self {
        self.profiler = Some(profiler);
        self
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn phase(&self) -> DayPhase {
        self.phase
    }

    pub fn ledger(&self) -> &PositionLedger {
        &self.ledger
    }

    pub fn window(&self) -> &StreamWindow {
        &self.window
    }

    /// Process every configured day in order.
    ///
    /// Unavailable collaborators skip the affected day; a ledger failure
    /// halts the run and is returned.
    pub async fn run(&mut self) -> Result<RunSummary, EngineError> {
        let started_at = Utc::now();
        let mut days_processed = 0;
        let mut skipped_days = Vec::new();

        info!(
            run_id = %self.run_id,
            days = self.trading_days.len(),
            instruments = self.instruments.len(),
            "🚀 Starting run"
        );

        for day in self.trading_days.clone() {
            let outcome = self.run_day(day).await;

            self.enter(day, DayPhase::DayComplete);
            self.window.reset();

            match outcome {
                Ok(stats) => {
                    days_processed += 1;
                    info!(
                        day = %day,
                        fetched = stats.fetched,
                        samples = stats.samples,
                        polls = stats.polls,
                        trades = stats.trades,
                        cash = %format!("{:.2}", self.ledger.cash()),
                        "✅ Day complete"
                    );
                }
                Err(e) if e.is_fatal() => {
                    error!(day = %day, "🛑 Halting run: {}", e);
                    self.phase = DayPhase::Idle;
                    return Err(e);
                }
                Err(e) => {
                    warn!(day = %day, "⏭️ Skipping day: {}", e);
                    skipped_days.push(day);
                }
            }
        }
        self.phase = DayPhase::Idle;

        let summary = RunSummary {
            run_id: self.run_id.clone(),
            started_at,
            finished_at: Utc::now(),
            days_processed,
            skipped_days,
            dropped_records: self.fetch_dropped + self.consumer.dropped(),
            failed_segments: self.failed_segments,
            failed_persists: self.failed_persists,
            initial_cash: self.ledger.initial_cash(),
            final_cash: self.ledger.cash(),
            realized_pnl: self.ledger.realized_pnl(),
            equity: self.ledger.equity(&self.last_prices),
            trade_counts: self.ledger.trade_counts().clone(),
        };

        if let Err(e) = self.store.record_run(&summary) {
            warn!("Failed to persist run summary: {:#}", e);
        }
        if let Some(profiler) = &self.profiler {
            info!("⏱️ Component timings:\n{}", profiler.report());
        }

        Ok(summary)
    }

    /// Run the full pipeline for one trading day.
    #[instrument(skip(self), fields(run_id = %self.run_id))]
    pub async fn run_day(&mut self, day: NaiveDate) -> Result<DayStats, EngineError> {
        let profiler = self.profiler.clone();
        let mut stats = DayStats::default();

        self.enter(day, DayPhase::Fetching);
        let observations = timed(profiler.as_deref(), "Fetching", self.fetch_day(day)).await?;
        stats.fetched = observations.len();

        self.enter(day, DayPhase::Densifying);
        let densifier = self.densifier.clone();
        let report = timed(
            profiler.as_deref(),
            "Densifying",
            tokio::task::spawn_blocking(move || densifier.densify(&observations)),
        )
        .await
        .map_err(|e| EngineError::DensifyAborted {
            day,
            reason: e.to_string(),
        })?;
        self.failed_segments += report.failed_segments();
        stats.samples = report.series.len();

        self.enter(day, DayPhase::Publishing);
        timed(profiler.as_deref(), "Publishing", self.bus.publish(&report.series))
            .await
            .map_err(|error| EngineError::BusUnavailable { day, error })?;

        timed(profiler.as_deref(), "Streaming", self.stream_day(day, &mut stats)).await?;
        Ok(stats)
    }

    async fn fetch_day(&mut self, day: NaiveDate) -> Result<Vec<Observation>, EngineError> {
        let fetches = self
            .instruments
            .iter()
            .map(|instrument| self.source.fetch(instrument, day));
        let outcomes = join_all(fetches).await;

        let mut observations = Vec::new();
        for (instrument, outcome) in self.instruments.iter().zip(outcomes) {
            let outcome = outcome.map_err(|error| EngineError::SourceUnavailable {
                day,
                error: error.context(format!("Fetching {}", instrument)),
            })?;
            if outcome.dropped > 0 {
                warn!(instrument = %instrument, dropped = outcome.dropped, "Dropped malformed rows");
            }
            self.fetch_dropped += outcome.dropped;
            observations.extend(outcome.observations);
        }

        debug!(day = %day, observations = observations.len(), "Fetched day");
        Ok(observations)
    }

    /// Poll, decide and settle until the bus runs dry.
    async fn stream_day(&mut self, day: NaiveDate, stats: &mut DayStats) -> Result<(), EngineError> {
        loop {
            self.enter(day, DayPhase::Polling);
            let batch = self
                .consumer
                .poll_into(&self.bus, &mut self.window)
                .await
                .map_err(|error| EngineError::BusUnavailable { day, error })?;
            stats.polls += 1;

            if self.window.is_exhausted() {
                return Ok(());
            }
            if batch.is_empty() {
                continue;
            }
            for obs in &batch {
                self.last_prices.insert(obs.instrument.clone(), obs.price);
            }

            self.enter(day, DayPhase::Deciding);
            let intents = self.strategy.decide(&self.window, self.ledger.cash());
            if intents.is_empty() {
                continue;
            }

            self.enter(day, DayPhase::Settling);
            self.ledger
                .apply(&intents)
                .map_err(|source| EngineError::Ledger { day, source })?;
            stats.trades += intents.len();

            for intent in &intents {
                info!(
                    instrument = %intent.instrument,
                    quantity = intent.quantity,
                    price = %format!("{:.4}", intent.price),
                    "📈 Trade"
                );
            }

            if let Err(e) = self.store.store(&self.run_id, &intents) {
                self.failed_persists += 1;
                warn!(trades = intents.len(), "Failed to persist trades: {:#}", e);
            }
        }
    }

    fn enter(&mut self, day: NaiveDate, phase: DayPhase) {
        self.phase = phase;
        debug!(day = %day, phase = %phase, "Phase transition");
    }
}

/// Await `fut`, charging its duration to `component` when profiling.
async fn timed<F: Future>(profiler: Option<&Profiler>, component: &str, fut: F) -> F::Output {
    match profiler {
        Some(p) => p.measure_async(component, fut).await,
        None => fut.await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{BusConfig, InMemoryBus, MockMessageBus};
    use crate::market::{
        day_start_ms, CannedPriceSource, CsvPriceSource, MockPriceSource, TradeIntent,
    };
    use crate::persistence::MockTradeStore;
    use std::sync::Mutex;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2023, 8, d).unwrap()
    }

    fn config(days: Vec<NaiveDate>) -> Config {
        let mut config = Config::default();
        config.market.instruments = vec!["AAPL".to_string()];
        config.market.trading_days = days;
        config.densify.jitter_min = 0.0;
        config.densify.jitter_max = 0.0;
        config.stream.max_poll_records = 500;
        config
    }

    fn bus() -> InMemoryBus {
        InMemoryBus::new(BusConfig {
            broker: "local".to_string(),
            topic: "PRICES".to_string(),
            max_poll_records: 500,
        })
    }

    fn quiet_store() -> MockTradeStore {
        let mut store = MockTradeStore::new();
        store.expect_store().returning(|_, trades| Ok(trades.len()));
        store.expect_record_run().returning(|_| Ok(()));
        store
    }

    async fn source_with(d: NaiveDate, observations: Vec<Observation>) -> CannedPriceSource {
        let source = CannedPriceSource::new();
        source.insert("AAPL", d, observations).await;
        source
    }

    #[tokio::test]
    async fn test_rising_pair_produces_no_trade() {
        let source = source_with(
            day(2),
            vec![
                Observation::new("AAPL", 0, 100.0),
                Observation::new("AAPL", 20, 102.0),
            ],
        )
        .await;
        let mut store = MockTradeStore::new();
        store.expect_store().times(0);
        store.expect_record_run().times(1).returning(|_| Ok(()));

        let mut orchestrator = Orchestrator::new(&config(vec![day(2)]), source, bus(), store);
        let summary = orchestrator.run().await.unwrap();

        assert_eq!(summary.days_processed, 1);
        assert_eq!(summary.total_trades(), 0);
        assert_eq!(summary.final_cash, 1_000_000.0);
        assert_eq!(summary.net_pnl(), 0.0);
        assert_eq!(orchestrator.phase(), DayPhase::Idle);
    }

    #[tokio::test]
    async fn test_falling_pair_buys_max_lot() {
        let source = source_with(
            day(2),
            vec![
                Observation::new("AAPL", 0, 100.0),
                Observation::new("AAPL", 100, 90.0),
            ],
        )
        .await;

        let mut store = MockTradeStore::new();
        store
            .expect_store()
            .times(1)
            .withf(|_, trades| trades.len() == 1 && trades[0].quantity == 1000)
            .returning(|_, trades| Ok(trades.len()));
        store.expect_record_run().returning(|_| Ok(()));

        let mut orchestrator = Orchestrator::new(&config(vec![day(2)]), source, bus(), store);
        let summary = orchestrator.run().await.unwrap();

        assert_eq!(summary.trade_counts.get("AAPL"), Some(&1));
        assert!((summary.final_cash - (1_000_000.0 - 91_000.0)).abs() < 1e-6);
        // Marked at the last streamed price, which is the fill price
        assert!(summary.net_pnl().abs() < 1e-6);
        assert_eq!(orchestrator.ledger().holding("AAPL").unwrap().quantity, 1000.0);
    }

    #[tokio::test]
    async fn test_unavailable_day_is_skipped() {
        let source = source_with(
            day(3),
            vec![
                Observation::new("AAPL", 0, 100.0),
                Observation::new("AAPL", 100, 90.0),
            ],
        )
        .await;
        source.fail_day(day(2)).await;

        let mut orchestrator =
            Orchestrator::new(&config(vec![day(2), day(3)]), source, bus(), quiet_store());
        let summary = orchestrator.run().await.unwrap();

        assert_eq!(summary.skipped_days, vec![day(2)]);
        assert_eq!(summary.days_processed, 1);
        assert_eq!(summary.total_trades(), 1);
        assert!(orchestrator.window().is_empty());
    }

    #[tokio::test]
    async fn test_fetch_drops_are_counted() {
        let mut source = MockPriceSource::new();
        source.expect_fetch().returning(|instrument, _| {
            Ok(crate::market::FetchOutcome::new(
                vec![Observation::new(instrument, 0, 10.0)],
                3,
            ))
        });

        let mut orchestrator = Orchestrator::new(&config(vec![day(2)]), source, bus(), quiet_store());
        let summary = orchestrator.run().await.unwrap();
        assert_eq!(summary.dropped_records, 3);
    }

    #[tokio::test]
    async fn test_csv_load_drops_reach_summary() {
        let start = day_start_ms(day(2));
        let csv = format!(
            "ticker,time,price\nAAPL,{},100.0\nAAPL,soon,101.0\nAAPL,{},abc\nAAPL,{},1.0\nAAPL,{},102.0\n",
            start,
            start + 10,
            i64::MAX,
            start + 20
        );
        let source = CsvPriceSource::from_csv_content(&csv);
        assert_eq!(source.dropped(), 3);

        let mut orchestrator = Orchestrator::new(&config(vec![day(2)]), source, bus(), quiet_store());
        let summary = orchestrator.run().await.unwrap();

        assert_eq!(summary.days_processed, 1);
        assert_eq!(summary.dropped_records, 3);
    }

    /// Records the cash and window prices seen by every decision.
    struct RecordingStrategy {
        inner: MovingAverageStrategy,
        seen: Arc<Mutex<Vec<(f64, Vec<f64>)>>>,
    }

    impl TradingStrategy for RecordingStrategy {
        fn decide(&self, window: &StreamWindow, cash: f64) -> Vec<TradeIntent> {
            let prices = window.iter().map(|o| o.price).collect();
            self.seen.lock().unwrap().push((cash, prices));
            self.inner.decide(window, cash)
        }
    }

    #[tokio::test]
    async fn test_ledger_carries_over_and_window_restarts() {
        let source = CannedPriceSource::new();
        source
            .insert(
                "AAPL",
                day(2),
                vec![
                    Observation::new("AAPL", 0, 100.0),
                    Observation::new("AAPL", 100, 90.0),
                ],
            )
            .await;
        // Flat at 95 only buys if the previous day's samples (mean 95.5) linger
        source
            .insert(
                "AAPL",
                day(3),
                vec![
                    Observation::new("AAPL", 0, 95.0),
                    Observation::new("AAPL", 20, 95.0),
                ],
            )
            .await;

        let mut store = MockTradeStore::new();
        store
            .expect_store()
            .times(1)
            .returning(|_, trades| Ok(trades.len()));
        store.expect_record_run().returning(|_| Ok(()));

        let config = config(vec![day(2), day(3)]);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let strategy = RecordingStrategy {
            inner: MovingAverageStrategy::from_config(&config.trading),
            seen: seen.clone(),
        };
        let mut orchestrator =
            Orchestrator::new(&config, source, bus(), store).with_strategy(Box::new(strategy));
        let summary = orchestrator.run().await.unwrap();

        assert_eq!(summary.days_processed, 2);
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);

        let (first_cash, first_prices) = &seen[0];
        assert_eq!(*first_cash, 1_000_000.0);
        assert_eq!(first_prices.len(), 10);

        let (second_cash, second_prices) = &seen[1];
        assert!((second_cash - (1_000_000.0 - 91_000.0)).abs() < 1e-6);
        assert_eq!(second_prices, &vec![95.0, 95.0]);

        assert_eq!(summary.trade_counts.get("AAPL"), Some(&1));
        assert_eq!(orchestrator.ledger().holding("AAPL").unwrap().quantity, 1000.0);
        assert!((summary.final_cash - *second_cash).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_bus_failure_skips_day() {
        let source = source_with(
            day(2),
            vec![
                Observation::new("AAPL", 0, 100.0),
                Observation::new("AAPL", 20, 102.0),
            ],
        )
        .await;
        let mut bus = MockMessageBus::new();
        bus.expect_publish().returning(|series| Ok(series.len()));
        bus.expect_poll()
            .returning(|_| Err(anyhow::anyhow!("broker unreachable")));

        let mut orchestrator = Orchestrator::new(&config(vec![day(2)]), source, bus, quiet_store());
        let summary = orchestrator.run().await.unwrap();
        assert_eq!(summary.skipped_days, vec![day(2)]);
        assert_eq!(summary.days_processed, 0);
    }

    struct PoisonedStrategy;

    impl TradingStrategy for PoisonedStrategy {
        fn decide(&self, _window: &StreamWindow, _cash: f64) -> Vec<TradeIntent> {
            vec![TradeIntent::buy("AAPL", 0, 1, f64::NAN)]
        }
    }

    #[tokio::test]
    async fn test_ledger_failure_halts_run() {
        let source = CannedPriceSource::new();
        for d in [day(2), day(3)] {
            source
                .insert(
                    "AAPL",
                    d,
                    vec![
                        Observation::new("AAPL", 0, 100.0),
                        Observation::new("AAPL", 20, 102.0),
                    ],
                )
                .await;
        }
        let mut store = MockTradeStore::new();
        store.expect_store().times(0);
        store.expect_record_run().times(0);

        let mut orchestrator =
            Orchestrator::new(&config(vec![day(2), day(3)]), source, bus(), store)
                .with_strategy(Box::new(PoisonedStrategy));
        let err = orchestrator.run().await.unwrap_err();

        assert!(err.is_fatal());
        assert!(matches!(err, EngineError::Ledger { day: d, .. } if d == day(2)));
    }

    #[tokio::test]
    async fn test_persist_failure_is_counted() {
        let source = source_with(
            day(2),
            vec![
                Observation::new("AAPL", 0, 100.0),
                Observation::new("AAPL", 100, 90.0),
            ],
        )
        .await;
        let mut store = MockTradeStore::new();
        store
            .expect_store()
            .returning(|_, _| Err(anyhow::anyhow!("disk full")));
        store.expect_record_run().returning(|_| Ok(()));

        let mut orchestrator = Orchestrator::new(&config(vec![day(2)]), source, bus(), store);
        let summary = orchestrator.run().await.unwrap();

        assert_eq!(summary.failed_persists, 1);
        assert_eq!(summary.total_trades(), 1);
    }

    #[tokio::test]
    async fn test_profiler_sees_every_phase() {
        let source = source_with(
            day(2),
            vec![
                Observation::new("AAPL", 0, 100.0),
                Observation::new("AAPL", 20, 102.0),
            ],
        )
        .await;
        let profiler = Arc::new(Profiler::new());

        let mut orchestrator =
            Orchestrator::new(&config(vec![day(2)]), source, bus(), quiet_store())
                .with_profiler(profiler.clone());
        orchestrator.run().await.unwrap();

        let timings = profiler.timings();
        for component in ["Fetching", "Densifying", "Publishing", "Streaming"] {
            assert_eq!(timings[component].calls, 1, "{}", component);
        }
    }
}
