use analysis_core::{
    Bar, ConfigError, Direction, MarketDataProvider, PositionStore, TechnicalSnapshot, TrendMetrics,
};
use rayon::prelude::*;
use risk_manager::{entry_price, exit_price, RiskManager};
use signal_engine::{EntryRejection, EntryScorer, EntrySignal, ExitEvaluation, ExitEvaluator};
use tracing::{debug, info, warn};
use validation::{PeakDetectionConfig, ValidationResult};

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::metrics::DecisionMetrics;
use crate::portfolio_guard::DailyTradeLimiter;
use crate::position_manager::{OpenPosition, PositionUpdate};
use crate::state_manager::{PositionHandle, PositionRegistry, SharedConfig};
use crate::types::{EntryBlock, EntryDecision, EntryOutcome, ExitCycleOutcome};

/// One ticker to score in a batch.
#[derive(Debug, Clone)]
pub struct EntryRequest {
    pub ticker: String,
    pub snapshot: TechnicalSnapshot,
    pub direction: Direction,
}

/// Entry scoring, exit evaluation, admission validation and risk sizing
/// behind one handle, plus the per-ticker position lifecycle.
#[derive(Debug)]
pub struct TradingEngine {
    config: EngineConfig,
    risk: RiskManager,
    scorer: EntryScorer,
    exit_evaluator: ExitEvaluator,
    validation: SharedConfig,
    registry: PositionRegistry,
    limiter: DailyTradeLimiter,
    metrics: DecisionMetrics,
}

impl TradingEngine {
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;

        info!("Starting trading decision engine");
        info!("  Max daily trades: {}", config.max_daily_trades);
        info!("  Standard position size: ${}", config.standard_position_size);
        info!(
            "  Enhanced validation below: ${}",
            config.enhanced_validation_max_price
        );

        Ok(Self {
            risk: RiskManager::new(config.risk.clone())?,
            scorer: EntryScorer::new(config.entry.clone())?,
            exit_evaluator: ExitEvaluator::new(config.exit.clone())?,
            validation: SharedConfig::new(config.peak_detection.clone())?,
            registry: PositionRegistry::new(),
            limiter: DailyTradeLimiter::new(config.max_daily_trades),
            metrics: DecisionMetrics::new(config.metrics_log_interval),
            config,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn risk_manager(&self) -> &RiskManager {
        &self.risk
    }

    pub fn registry(&self) -> &PositionRegistry {
        &self.registry
    }

    pub fn metrics(&self) -> &DecisionMetrics {
        &self.metrics
    }

    pub fn trade_limiter(&self) -> &DailyTradeLimiter {
        &self.limiter
    }

    pub fn evaluate_entry(
        &self,
        ticker: &str,
        snapshot: &TechnicalSnapshot,
        direction: Direction,
    ) -> std::result::Result<EntrySignal, EntryRejection> {
        self.metrics.record_entry_evaluation();
        let result = self.scorer.evaluate(ticker, snapshot, direction);
        match &result {
            Ok(signal) => self.metrics.record_signal(signal.is_golden),
            Err(rejection) => {
                debug!("{} {} entry rejected: {}", ticker, direction, rejection);
                self.metrics.record_rejection(rejection.kind());
            }
        }
        result
    }

    /// Score many tickers in parallel. Output order follows `batch`.
    pub fn evaluate_entries(
        &self,
        batch: &[EntryRequest],
    ) -> Vec<(String, std::result::Result<EntrySignal, EntryRejection>)> {
        batch
            .par_iter()
            .map(|req| {
                (
                    req.ticker.clone(),
                    self.evaluate_entry(&req.ticker, &req.snapshot, req.direction),
                )
            })
            .collect()
    }

    /// Stateless exit check of `position` against `snapshot`'s close.
    pub fn evaluate_exit(
        &self,
        ticker: &str,
        position: &OpenPosition,
        snapshot: &TechnicalSnapshot,
    ) -> ExitEvaluation {
        self.metrics.record_exit_evaluation();
        let evaluation =
            self.exit_evaluator
                .evaluate(position.direction, position.enter_price, snapshot);
        if let Some(anomaly) = &evaluation.anomaly {
            warn!("{} exit evaluated with bad input: {}", ticker, anomaly);
        }
        evaluation
    }

    pub fn validate_for_admission(
        &self,
        ticker: &str,
        bars: &[Bar],
        current_price: f64,
        momentum_score: f64,
        standard_size: f64,
    ) -> ValidationResult {
        self.validation
            .pipeline()
            .validate(ticker, bars, current_price, momentum_score, standard_size)
    }

    pub fn reload_validation_config(
        &self,
        config: PeakDetectionConfig,
    ) -> std::result::Result<(), ConfigError> {
        self.validation.reload(config)
    }

    pub fn stop_loss_percent(&self, entry_price: f64, atr: f64) -> f64 {
        self.risk.stop_loss_percent(entry_price, atr)
    }

    pub fn position_size_dollars(&self, entry_price: f64, atr: f64) -> f64 {
        self.risk.position_size_dollars(entry_price, atr)
    }

    /// Fetch data for `ticker` and run admission, scoring, the daily limit
    /// and (for low-priced longs) enhanced validation.
    pub async fn run_entry_cycle(
        &self,
        ticker: &str,
        direction: Direction,
        provider: &dyn MarketDataProvider,
    ) -> Result<EntryOutcome> {
        let outcome = self.entry_cycle(ticker, direction, provider).await;
        self.metrics.finish_cycle();
        outcome
    }

    async fn entry_cycle(
        &self,
        ticker: &str,
        direction: Direction,
        provider: &dyn MarketDataProvider,
    ) -> Result<EntryOutcome> {
        if self.registry.contains(ticker) {
            return Ok(self.skip(
                ticker,
                EntryBlock::AlreadyOpen {
                    ticker: ticker.to_string(),
                },
            ));
        }

        let snapshot = provider
            .get_technical_snapshot(ticker)
            .await?
            .ok_or_else(|| EngineError::MissingData {
                ticker: ticker.to_string(),
                what: "technical snapshot",
            })?;
        let quote = provider.get_quote(ticker).await?;
        let lookback = self.config.validation_bar_lookback;
        let bars = provider.get_recent_bars(ticker, lookback).await?;

        let price = entry_price(direction, &quote);
        let momentum = TrendMetrics::from_bars(&bars, lookback)
            .map(|m| m.momentum_score)
            .unwrap_or(0.0);

        if let Err(rejection) = self.risk.check_admission(price, momentum, &snapshot) {
            return Ok(self.skip(ticker, EntryBlock::Admission(rejection)));
        }

        let signal = match self.evaluate_entry(ticker, &snapshot, direction) {
            Ok(signal) => signal,
            Err(rejection) => {
                return Ok(EntryOutcome::Skip {
                    ticker: ticker.to_string(),
                    block: EntryBlock::Scoring(rejection),
                });
            }
        };

        if !self.limiter.allows(signal.is_golden) {
            return Ok(self.skip(
                ticker,
                EntryBlock::DailyLimit {
                    limit: self.limiter.max_daily_trades(),
                },
            ));
        }

        let stop = self.risk.assess_stop_loss(price, snapshot.atr);
        if let Some(anomaly) = &stop.anomaly {
            warn!("{} stop-loss fell back to default: {}", ticker, anomaly);
        }
        let mut position_size = self.risk.position_size_dollars(price, snapshot.atr);

        let validation = if direction == Direction::Long
            && price < self.config.enhanced_validation_max_price
        {
            let result = self.validate_for_admission(
                ticker,
                &bars,
                price,
                momentum * direction.sign(),
                self.config.standard_position_size,
            );
            if let Some(rejection) = &result.rejection {
                return Ok(self.skip(ticker, EntryBlock::Validation(rejection.clone())));
            }
            if let Some(size) = result.approved_size() {
                position_size = size;
            }
            Some(result)
        } else {
            None
        };

        let decision = EntryDecision {
            ticker: ticker.to_string(),
            direction,
            entry_price: price,
            atr: snapshot.atr,
            stop_loss_percent: stop.percent,
            stop_loss_price: price * (1.0 + stop.percent / 100.0 * direction.sign()),
            position_size,
            momentum_percent: momentum,
            validation,
            signal,
        };

        info!(
            "{} {} entry approved @ ${:.4}: score {:.3}{}, size ${:.2}, stop {:.2}%",
            direction,
            ticker,
            decision.entry_price,
            decision.signal.entry_score,
            if decision.is_golden() { " (golden)" } else { "" },
            decision.position_size,
            decision.stop_loss_percent
        );
        Ok(EntryOutcome::Enter(Box::new(decision)))
    }

    /// Start tracking a filled entry and persist it. The registry slot is
    /// claimed before the store is touched, so a duplicate fill never
    /// overwrites the stored record; a failed save releases the slot.
    pub async fn open_position(
        &self,
        decision: &EntryDecision,
        store: &dyn PositionStore<OpenPosition>,
    ) -> Result<PositionHandle> {
        let position = OpenPosition::open(
            decision.ticker.clone(),
            decision.direction,
            decision.entry_price,
            decision.atr,
            &self.risk,
        );
        let record = position.clone();
        let handle = self.registry.insert(position)?;

        if let Err(err) = store.save(&decision.ticker, &record).await {
            warn!("{} position not persisted, releasing: {}", decision.ticker, err);
            self.registry.remove_handle(&decision.ticker, &handle);
            return Err(err.into());
        }

        self.limiter.record_trade();
        Ok(handle)
    }

    /// One lifecycle step for `ticker`'s open position. Positions missing
    /// from the registry are reloaded from `store`. A close deletes the
    /// stored record and stops tracking the ticker.
    pub async fn run_exit_cycle(
        &self,
        ticker: &str,
        provider: &dyn MarketDataProvider,
        store: &dyn PositionStore<OpenPosition>,
    ) -> Result<ExitCycleOutcome> {
        let outcome = self.exit_cycle(ticker, provider, store).await;
        self.metrics.finish_cycle();
        outcome
    }

    async fn exit_cycle(
        &self,
        ticker: &str,
        provider: &dyn MarketDataProvider,
        store: &dyn PositionStore<OpenPosition>,
    ) -> Result<ExitCycleOutcome> {
        let handle = match self.registry.get(ticker) {
            Some(handle) => handle,
            None => match store.load(ticker).await? {
                Some(position) => self.registry.get_or_insert(position),
                None => return Ok(ExitCycleOutcome::NoPosition),
            },
        };

        let mut position = handle.lock().await;
        if position.is_closed() {
            // An earlier close whose teardown did not finish
            self.release_closed(ticker, &handle, store).await?;
            return Ok(ExitCycleOutcome::Updated(PositionUpdate::AlreadyClosed {
                reason: position.close_reason.clone().unwrap_or_default(),
            }));
        }

        self.metrics.record_exit_evaluation();
        let snapshot = provider
            .get_technical_snapshot(ticker)
            .await?
            .ok_or_else(|| EngineError::MissingData {
                ticker: ticker.to_string(),
                what: "technical snapshot",
            })?;
        let quote = provider.get_quote(ticker).await?;
        let price = exit_price(position.direction, &quote);

        let update = position.update(price, &snapshot, &self.risk, &self.exit_evaluator);

        match &update {
            PositionUpdate::Closed { reasons, .. } => {
                self.metrics.record_close(reasons.iter().map(|r| r.kind()));
                self.release_closed(ticker, &handle, store).await?;
            }
            _ => store.save(ticker, &position).await?,
        }

        Ok(ExitCycleOutcome::Updated(update))
    }

    /// Delete the stored record of a closed position, then stop tracking it.
    /// Skipped when the registry already holds a newer position for `ticker`.
    async fn release_closed(
        &self,
        ticker: &str,
        handle: &PositionHandle,
        store: &dyn PositionStore<OpenPosition>,
    ) -> Result<()> {
        if !self.registry.holds(ticker, handle) {
            return Ok(());
        }
        store.delete(ticker).await?;
        self.registry.remove_handle(ticker, handle);
        Ok(())
    }

    fn skip(&self, ticker: &str, block: EntryBlock) -> EntryOutcome {
        debug!("{} entry skipped: {}", ticker, block);
        self.metrics.record_rejection(block.kind());
        EntryOutcome::Skip {
            ticker: ticker.to_string(),
            block,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state_manager::InMemoryPositionStore;
    use analysis_core::{Macd, Quote};
    use anyhow::bail;
    use approx::assert_relative_eq;
    use async_trait::async_trait;
    use chrono::{Duration, TimeZone, Utc};
    use dashmap::DashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use validation::ValidationRejection;

    #[derive(Default)]
    struct MockProvider {
        snapshots: DashMap<String, TechnicalSnapshot>,
        bars: DashMap<String, Vec<Bar>>,
        quotes: DashMap<String, Quote>,
    }

    impl MockProvider {
        fn set(&self, ticker: &str, snapshot: TechnicalSnapshot, bars: Vec<Bar>, bid: f64, ask: f64) {
            self.snapshots.insert(ticker.to_string(), snapshot);
            self.bars.insert(ticker.to_string(), bars);
            self.quotes.insert(ticker.to_string(), Quote::new(bid, ask));
        }

        fn set_quote(&self, ticker: &str, bid: f64, ask: f64) {
            self.quotes.insert(ticker.to_string(), Quote::new(bid, ask));
        }
    }

    #[async_trait]
    impl MarketDataProvider for MockProvider {
        async fn get_technical_snapshot(
            &self,
            ticker: &str,
        ) -> anyhow::Result<Option<TechnicalSnapshot>> {
            Ok(self.snapshots.get(ticker).map(|s| s.clone()))
        }

        async fn get_recent_bars(&self, ticker: &str, lookback: usize) -> anyhow::Result<Vec<Bar>> {
            let bars = self.bars.get(ticker).map(|b| b.clone()).unwrap_or_default();
            let start = bars.len().saturating_sub(lookback);
            Ok(bars[start..].to_vec())
        }

        async fn get_quote(&self, ticker: &str) -> anyhow::Result<Quote> {
            match self.quotes.get(ticker) {
                Some(q) => Ok(q.clone()),
                None => bail!("quote feed unavailable for {ticker}"),
            }
        }
    }

    /// In-memory store whose next `save` or `delete` calls fail.
    #[derive(Default)]
    struct FlakyStore {
        inner: InMemoryPositionStore,
        failing_saves: AtomicUsize,
        failing_deletes: AtomicUsize,
    }

    fn take_failure(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    #[async_trait]
    impl PositionStore<OpenPosition> for FlakyStore {
        async fn load(&self, ticker: &str) -> anyhow::Result<Option<OpenPosition>> {
            self.inner.load(ticker).await
        }

        async fn save(&self, ticker: &str, position: &OpenPosition) -> anyhow::Result<()> {
            if take_failure(&self.failing_saves) {
                bail!("store outage on save");
            }
            self.inner.save(ticker, position).await
        }

        async fn delete(&self, ticker: &str) -> anyhow::Result<()> {
            if take_failure(&self.failing_deletes) {
                bail!("store outage on delete");
            }
            self.inner.delete(ticker).await
        }
    }

    /// A clean long setup, scaled so `k = 1.0` trades around $100.
    fn strong_long(k: f64) -> TechnicalSnapshot {
        let mut s = TechnicalSnapshot::neutral(100.2 * k);
        s.vwap = 100.0 * k;
        s.ema_fast = 100.15 * k;
        s.ema_slow = 99.0 * k;
        s.macd = Macd {
            macd: 0.6 * k,
            signal: 0.0,
            histogram: 0.6 * k,
        };
        s.rsi = 55.0;
        s.adx = 40.0;
        s.volume = 180.0;
        s.volume_sma = 100.0;
        s.atr = 1.5 * k;
        s
    }

    fn bars_from_closes(closes: &[f64], last_volume: f64) -> Vec<Bar> {
        let start = Utc.with_ymd_and_hms(2024, 3, 4, 14, 30, 0).unwrap();
        let n = closes.len();
        closes
            .iter()
            .enumerate()
            .map(|(i, &close)| Bar {
                timestamp: start + Duration::minutes(5 * i as i64),
                open: close,
                high: close + 0.02,
                low: close - 0.02,
                close,
                volume: if i + 1 == n { last_volume } else { 1_000.0 },
                vwap: None,
            })
            .collect()
    }

    /// Steady climb from 97.0 to 100.2.
    fn rising_bars() -> Vec<Bar> {
        let closes: Vec<f64> = (0..30).map(|i| 97.0 + i as f64 * (3.2 / 29.0)).collect();
        bars_from_closes(&closes, 1_000.0)
    }

    /// Climb from 9.00 to a 10.20 close, then three easing bars down to 10.02.
    fn pullback_bars() -> Vec<Bar> {
        let mut closes: Vec<f64> = (0..=25).map(|i| 9.0 + i as f64 * 0.048).collect();
        closes.extend([10.12, 10.06, 10.02]);
        bars_from_closes(&closes, 3_000.0)
    }

    fn engine() -> TradingEngine {
        TradingEngine::new(EngineConfig::default()).unwrap()
    }

    async fn approved_entry(engine: &TradingEngine, provider: &MockProvider) -> EntryDecision {
        provider.set("ACME", strong_long(1.0), rising_bars(), 100.18, 100.22);
        engine
            .run_entry_cycle("ACME", Direction::Long, provider)
            .await
            .unwrap()
            .decision()
            .expect("entry expected")
            .clone()
    }

    #[test]
    fn test_evaluate_entry_records_metrics() {
        let engine = engine();
        let signal = engine
            .evaluate_entry("ACME", &strong_long(1.0), Direction::Long)
            .unwrap();
        assert!(!signal.is_golden);
        assert_eq!(engine.metrics().signals_generated(), 1);

        let rejection = engine
            .evaluate_entry("ACME", &TechnicalSnapshot::neutral(50.0), Direction::Long)
            .unwrap_err();
        assert_eq!(engine.metrics().rejection_count(rejection.kind()), 1);
    }

    #[test]
    fn test_batch_scoring_preserves_order() {
        let engine = engine();
        let batch: Vec<EntryRequest> = (0..12)
            .map(|i| EntryRequest {
                ticker: format!("T{i}"),
                snapshot: if i % 3 == 0 {
                    TechnicalSnapshot::neutral(20.0)
                } else {
                    strong_long(1.0)
                },
                direction: Direction::Long,
            })
            .collect();

        let results = engine.evaluate_entries(&batch);
        assert_eq!(results.len(), 12);
        for (i, (ticker, result)) in results.iter().enumerate() {
            assert_eq!(ticker, &format!("T{i}"));
            assert_eq!(result.is_ok(), i % 3 != 0);
        }
        assert_eq!(engine.metrics().signals_generated(), 8);
    }

    #[test]
    fn test_risk_passthrough() {
        let engine = engine();
        assert_eq!(engine.stop_loss_percent(3.0, 0.15), -8.0);
        assert_eq!(engine.position_size_dollars(4.0, 0.04), 1500.0);
    }

    #[test]
    fn test_evaluate_exit_is_stateless() {
        let engine = engine();
        let position =
            OpenPosition::open("ACME", Direction::Long, 10.0, 0.2, engine.risk_manager());
        let mut snap = strong_long(0.097);
        snap.close_price = 9.70;

        let evaluation = engine.evaluate_exit("ACME", &position, &snap);
        assert!(evaluation.exit_decision);
        assert_relative_eq!(evaluation.profit_pct, -3.0, epsilon = 1e-9);
        assert!(evaluation.reason.starts_with("Stop loss triggered: -3.00%"));
        assert_eq!(position.peak_profit_percent, 0.0);
    }

    #[tokio::test]
    async fn test_entry_cycle_above_validation_price() {
        let engine = engine();
        let provider = MockProvider::default();
        provider.set("ACME", strong_long(1.0), rising_bars(), 100.18, 100.22);

        let outcome = engine
            .run_entry_cycle("ACME", Direction::Long, &provider)
            .await
            .unwrap();
        let decision = outcome.decision().expect("entry expected");

        assert_eq!(decision.entry_price, 100.22);
        assert!(decision.validation.is_none());
        assert_eq!(decision.stop_loss_percent, -4.0);
        assert_relative_eq!(decision.stop_loss_price, 100.22 * 0.96, epsilon = 1e-9);
        assert_eq!(decision.position_size, 2000.0);
        assert_relative_eq!(decision.momentum_percent, 3.2 / 97.0 * 100.0, epsilon = 1e-6);
    }

    #[tokio::test]
    async fn test_entry_cycle_runs_validation_for_low_price() {
        let engine = engine();
        let provider = MockProvider::default();
        provider.set("SOFI", strong_long(0.1), pullback_bars(), 10.01, 10.03);

        let outcome = engine
            .run_entry_cycle("SOFI", Direction::Long, &provider)
            .await
            .unwrap();
        let decision = outcome.decision().expect("entry expected");

        let validation = decision.validation.as_ref().unwrap();
        assert!(validation.passed);
        assert_eq!(Some(decision.position_size), validation.approved_size());
        assert!([500.0, 750.0, 1000.0].contains(&decision.position_size));
    }

    #[tokio::test]
    async fn test_entry_cycle_blocks_near_peak() {
        let engine = engine();
        let provider = MockProvider::default();
        provider.set("SOFI", strong_long(0.1), pullback_bars(), 10.19, 10.21);

        let outcome = engine
            .run_entry_cycle("SOFI", Direction::Long, &provider)
            .await
            .unwrap();

        assert!(matches!(
            outcome.block(),
            Some(EntryBlock::Validation(ValidationRejection::NearPeak { .. }))
        ));
        assert_eq!(engine.metrics().rejection_count("validation"), 1);
    }

    #[tokio::test]
    async fn test_daily_limit_blocks_regular_entries() {
        let engine = TradingEngine::new(EngineConfig {
            max_daily_trades: 0,
            ..Default::default()
        })
        .unwrap();
        let provider = MockProvider::default();
        provider.set("ACME", strong_long(1.0), rising_bars(), 100.18, 100.22);

        let outcome = engine
            .run_entry_cycle("ACME", Direction::Long, &provider)
            .await
            .unwrap();
        assert_eq!(
            outcome.block(),
            Some(&EntryBlock::DailyLimit { limit: 0 })
        );
    }

    #[tokio::test]
    async fn test_admission_filter_runs_first() {
        let engine = engine();
        let provider = MockProvider::default();
        let flat: Vec<f64> = vec![100.0; 30];
        provider.set("FLAT", strong_long(1.0), bars_from_closes(&flat, 1_000.0), 100.18, 100.22);

        let outcome = engine
            .run_entry_cycle("FLAT", Direction::Long, &provider)
            .await
            .unwrap();
        assert!(matches!(outcome.block(), Some(EntryBlock::Admission(_))));
        assert_eq!(engine.metrics().signals_generated(), 0);
    }

    #[tokio::test]
    async fn test_missing_data_and_collaborator_errors() {
        let engine = engine();
        let provider = MockProvider::default();

        let err = engine
            .run_entry_cycle("NONE", Direction::Long, &provider)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::MissingData { .. }));

        provider
            .snapshots
            .insert("NOQUOTE".to_string(), strong_long(1.0));
        let err = engine
            .run_entry_cycle("NOQUOTE", Direction::Long, &provider)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Collaborator(_)));
        assert!(err.to_string().contains("quote feed unavailable"));

        // failed cycles still count
        assert_eq!(engine.metrics().to_json()["cycles_run"], 2);
    }

    #[test]
    fn test_new_rejects_invalid_risk_parameters() {
        let mut config = EngineConfig::default();
        config.risk.min_stop_loss_percent = -10.0;
        assert!(matches!(
            TradingEngine::new(config),
            Err(EngineError::Config(ConfigError::Ordering(_)))
        ));
    }

    #[tokio::test]
    async fn test_duplicate_open_keeps_stored_record() {
        let engine = engine();
        let provider = MockProvider::default();
        let store = InMemoryPositionStore::new();
        let decision = approved_entry(&engine, &provider).await;
        engine.open_position(&decision, &store).await.unwrap();

        let mut second = decision.clone();
        second.entry_price = 120.0;
        let err = engine.open_position(&second, &store).await.unwrap_err();
        assert!(matches!(err, EngineError::PositionAlreadyOpen(ref t) if t == "ACME"));

        let stored = store.load("ACME").await.unwrap().unwrap();
        assert_eq!(stored.enter_price, decision.entry_price);
        let tracked = engine.registry().get("ACME").unwrap();
        assert_eq!(tracked.lock().await.enter_price, decision.entry_price);
        assert_eq!(engine.trade_limiter().trades_today(), 1);
    }

    #[tokio::test]
    async fn test_failed_save_releases_registry_slot() {
        let engine = engine();
        let provider = MockProvider::default();
        let store = FlakyStore::default();
        store.failing_saves.store(1, Ordering::SeqCst);
        let decision = approved_entry(&engine, &provider).await;

        let err = engine.open_position(&decision, &store).await.unwrap_err();
        assert!(matches!(err, EngineError::Collaborator(_)));
        assert!(!engine.registry().contains("ACME"));
        assert!(store.inner.is_empty());
        assert_eq!(engine.trade_limiter().trades_today(), 0);

        engine.open_position(&decision, &store).await.unwrap();
        assert!(engine.registry().contains("ACME"));
        assert_eq!(store.inner.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_delete_is_retried_next_cycle() {
        let engine = engine();
        let provider = MockProvider::default();
        let store = FlakyStore::default();
        let decision = approved_entry(&engine, &provider).await;
        engine.open_position(&decision, &store).await.unwrap();

        // -3% on the bid breaches the 2% stop
        let bid = decision.entry_price * 0.97;
        provider.set_quote("ACME", bid, bid + 0.04);
        store.failing_deletes.store(1, Ordering::SeqCst);

        let err = engine
            .run_exit_cycle("ACME", &provider, &store)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("store outage on delete"));
        assert!(engine.registry().contains("ACME"));
        assert_eq!(store.inner.len(), 1);

        let retry = engine.run_exit_cycle("ACME", &provider, &store).await.unwrap();
        assert!(matches!(
            retry,
            ExitCycleOutcome::Updated(PositionUpdate::AlreadyClosed { ref reason })
                if reason.starts_with("Stop loss triggered")
        ));
        assert!(store.inner.is_empty());
        assert!(!engine.registry().contains("ACME"));
        assert_eq!(engine.metrics().exit_count("stop_loss"), 1);

        let after = engine.run_exit_cycle("ACME", &provider, &store).await.unwrap();
        assert_eq!(after, ExitCycleOutcome::NoPosition);

        // a new position opened after the teardown is untouched by the old handle
        let handle = engine.open_position(&decision, &store).await.unwrap();
        assert!(engine.registry().holds("ACME", &handle));
    }

    #[tokio::test]
    async fn test_full_lifecycle_through_trailing_stop() {
        let engine = engine();
        let provider = MockProvider::default();
        let store = InMemoryPositionStore::new();
        provider.set("ACME", strong_long(1.0), rising_bars(), 100.18, 100.22);

        let outcome = engine
            .run_entry_cycle("ACME", Direction::Long, &provider)
            .await
            .unwrap();
        let decision = outcome.decision().unwrap().clone();
        engine.open_position(&decision, &store).await.unwrap();
        assert_eq!(engine.trade_limiter().trades_today(), 1);
        assert_eq!(store.len(), 1);

        // a second entry on the same ticker is refused
        let again = engine
            .run_entry_cycle("ACME", Direction::Long, &provider)
            .await
            .unwrap();
        assert!(matches!(again.block(), Some(EntryBlock::AlreadyOpen { .. })));

        // exits read the bid; climb to +2.8% then give back 2.4%, past the ~2.245% long trail
        let entry = decision.entry_price;
        let mut peak_seen = f64::MIN;
        for pct in [0.5, 1.2, 2.8] {
            let bid = entry * (1.0 + pct / 100.0);
            provider.set_quote("ACME", bid, bid + 0.04);
            let outcome = engine.run_exit_cycle("ACME", &provider, &store).await.unwrap();
            assert!(!outcome.is_exit(), "{outcome:?}");
            peak_seen = peak_seen.max(pct);
        }
        let handle = engine.registry().get("ACME").unwrap();
        assert_relative_eq!(handle.lock().await.peak_profit_percent, peak_seen, epsilon = 1e-9);
        assert_eq!(
            store.load("ACME").await.unwrap().unwrap().status,
            crate::position_manager::PositionStatus::TrailingActive
        );

        let bid = entry * 1.004;
        provider.set_quote("ACME", bid, bid + 0.04);
        let outcome = engine.run_exit_cycle("ACME", &provider, &store).await.unwrap();
        assert!(outcome.is_exit());
        assert!(store.is_empty());
        assert!(!engine.registry().contains("ACME"));
        assert_eq!(engine.metrics().exit_count("trailing_stop"), 1);

        // the held handle sees the terminal state
        assert!(handle.lock().await.is_closed());
        let after = engine.run_exit_cycle("ACME", &provider, &store).await.unwrap();
        assert_eq!(after, ExitCycleOutcome::NoPosition);
    }

    #[tokio::test]
    async fn test_exit_cycle_restores_from_store() {
        let engine = engine();
        let provider = MockProvider::default();
        let store = InMemoryPositionStore::new();

        let mut position =
            OpenPosition::open("AMD", Direction::Long, 100.0, 1.5, engine.risk_manager());
        position.peak_profit_percent = 1.4;
        position.status = crate::position_manager::PositionStatus::TrailingActive;
        store.save("AMD", &position).await.unwrap();

        provider.set("AMD", strong_long(1.0), rising_bars(), 100.8, 100.84);
        let outcome = engine.run_exit_cycle("AMD", &provider, &store).await.unwrap();

        match outcome {
            ExitCycleOutcome::Updated(PositionUpdate::Held {
                peak_profit_percent,
                ..
            }) => assert_relative_eq!(peak_profit_percent, 1.4),
            other => panic!("expected hold, got {other:?}"),
        }
        assert!(engine.registry().contains("AMD"));
    }

    #[tokio::test]
    async fn test_parallel_exit_cycles_on_one_ticker() {
        let engine = Arc::new(engine());
        let provider = Arc::new(MockProvider::default());
        let store = Arc::new(InMemoryPositionStore::new());

        let position =
            OpenPosition::open("NVDA", Direction::Long, 100.0, 1.5, engine.risk_manager());
        engine.registry().insert(position).unwrap();
        provider.set("NVDA", strong_long(1.0), rising_bars(), 100.5, 100.54);

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let (engine, provider, store) = (engine.clone(), provider.clone(), store.clone());
            tasks.push(tokio::spawn(async move {
                engine
                    .run_exit_cycle("NVDA", provider.as_ref(), store.as_ref())
                    .await
                    .unwrap()
            }));
        }
        for task in tasks {
            assert!(!task.await.unwrap().is_exit());
        }

        let handle = engine.registry().get("NVDA").unwrap();
        let position = handle.lock().await;
        assert_eq!(position.cycles, 8);
        assert_relative_eq!(position.peak_profit_percent, 0.5, epsilon = 1e-9);
    }

    #[test]
    fn test_reload_swaps_validation_config() {
        let engine = engine();
        let bars = pullback_bars();

        let before = engine.validate_for_admission("SOFI", &bars, 10.03, 11.0, 1000.0);
        assert!(before.passed);

        engine
            .reload_validation_config(PeakDetectionConfig {
                peak_proximity_threshold: 0.2,
                ..Default::default()
            })
            .unwrap();
        let after = engine.validate_for_admission("SOFI", &bars, 10.03, 11.0, 1000.0);
        assert!(matches!(
            after.rejection,
            Some(ValidationRejection::NearPeak { .. })
        ));
    }
}
