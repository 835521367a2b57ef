//! 空头决策引擎
//!
//! 外部输入（K线、成交、平仓结果、账户更新）通过 [`EngineHandle`] 投递到收件箱，
//! 每个周期开始时统一消费，然后交给 [`SignalCoordinator`] 生成信号

use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, Mutex};

use crate::core::config::{AssetConfig, EngineConfig};
use crate::core::error::{EngineError, ErrorSeverity, Result};
use crate::core::types::{Asset, AssetTable, Bar};
use crate::strategies::short_seller::cooldown::{AssetCooldown, CooldownManager};
use crate::strategies::short_seller::coordinator::{CycleReport, SignalCoordinator};
use crate::strategies::short_seller::events::{EngineEvent, EventSink};
use crate::strategies::short_seller::indicator::IndicatorState;
use crate::strategies::short_seller::monitoring::TradeStats;
use crate::strategies::short_seller::portfolio::{PortfolioSnapshot, PortfolioTracker, PortfolioUpdate};
use crate::strategies::short_seller::position_manager::{Fill, PositionStore, TradeOutcome};
use crate::strategies::short_seller::regime::RegimeState;

/// 单个资产的可变状态，由该资产的任务独占
#[derive(Debug)]
pub struct AssetState {
    pub asset: Asset,
    pub indicator: IndicatorState,
    pub regime: RegimeState,
    pub cooldown: AssetCooldown,
}

impl AssetState {
    pub fn new(asset: Asset, config: &EngineConfig) -> Self {
        Self {
            asset,
            indicator: IndicatorState::new(asset, &config.indicator),
            regime: RegimeState::default(),
            cooldown: AssetCooldown::default(),
        }
    }
}

pub type AssetSlot = Arc<Mutex<AssetState>>;

/// 入场单失败通知
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryFailure {
    pub asset: Asset,
    #[serde(default)]
    pub reason: String,
    pub timestamp: DateTime<Utc>,
}

/// 引擎输入
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum EngineInput {
    Bar(Bar),
    Fill(Fill),
    Outcome(TradeOutcome),
    EntryFailed(EntryFailure),
    Portfolio(PortfolioUpdate),
}

impl EngineInput {
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            EngineInput::Bar(bar) => bar.timestamp,
            EngineInput::Fill(fill) => fill.timestamp,
            EngineInput::Outcome(outcome) => outcome.closed_at,
            EngineInput::EntryFailed(failure) => failure.timestamp,
            EngineInput::Portfolio(update) => update.timestamp,
        }
    }
}

/// 引擎的共享上下文，只在屏障之后顺序修改
pub struct EngineContext {
    pub config: Arc<EngineConfig>,
    asset_configs: AssetTable<Option<AssetConfig>>,
    assets: AssetTable<Option<AssetSlot>>,
    pub store: PositionStore,
    pub portfolio: PortfolioTracker,
    pub cooldowns: CooldownManager,
}

impl EngineContext {
    pub fn new(config: Arc<EngineConfig>) -> Self {
        let asset_configs = config.asset_table();
        let assets = AssetTable::from_fn(|asset| {
            asset_configs[asset]
                .as_ref()
                .map(|_| Arc::new(Mutex::new(AssetState::new(asset, &config))))
        });

        Self {
            store: PositionStore::new(
                config.cycle.trade_history_capacity,
                config.risk.max_total_exposure,
            ),
            portfolio: PortfolioTracker::new(config.initial_balance),
            cooldowns: CooldownManager::new(&config.cooldown, &config.risk),
            asset_configs,
            assets,
            config,
        }
    }

    pub fn asset_config(&self, asset: Asset) -> Option<&AssetConfig> {
        self.asset_configs[asset].as_ref()
    }

    pub fn slot(&self, asset: Asset) -> Option<&AssetSlot> {
        self.assets[asset].as_ref()
    }

    /// 已启用资产的状态句柄
    pub fn slots(&self) -> impl Iterator<Item = (Asset, AssetSlot)> + '_ {
        self.assets
            .iter()
            .filter_map(|(asset, slot)| slot.as_ref().map(|s| (asset, Arc::clone(s))))
    }

    pub fn enabled_assets(&self) -> Vec<Asset> {
        self.slots().map(|(asset, _)| asset).collect()
    }

    pub fn trade_stats(&self) -> Vec<TradeStats> {
        self.enabled_assets()
            .into_iter()
            .map(|asset| TradeStats::from_trades(asset, self.store.closed_trades(asset)))
            .collect()
    }

    pub fn snapshot(&self, now: DateTime<Utc>) -> PortfolioSnapshot {
        self.portfolio.snapshot(self.store.snapshot_exposure(), now)
    }

    /// 应用非K线输入，返回产生的事件
    pub async fn apply_input(&mut self, input: EngineInput) -> Result<Vec<EngineEvent>> {
        match input {
            EngineInput::Bar(bar) => Err(EngineError::input(
                bar.asset,
                "K线只能在决策周期内处理",
            )),
            EngineInput::Fill(fill) => {
                let Some(asset_config) = self.asset_configs[fill.asset].as_ref() else {
                    return Err(EngineError::input(fill.asset, "资产未启用"));
                };
                let stop_loss_pct = self.config.stop_loss_pct(asset_config);
                let take_profit_pct = self.config.take_profit_pct(asset_config);
                self.store
                    .apply_entry(&fill, asset_config, stop_loss_pct, take_profit_pct)?;
                Ok(Vec::new())
            }
            EngineInput::Outcome(outcome) => {
                self.store.apply_exit(&outcome)?;
                self.portfolio.record_outcome(&outcome);

                let mut events = Vec::new();
                if let Some(slot) = self.assets[outcome.asset].as_ref() {
                    let mut state = slot.lock().await;
                    if let Some(window) = self.cooldowns.on_trade_closed(&mut state.cooldown, &outcome) {
                        events.push(EngineEvent::cooldown_started(&window));
                    }
                }
                Ok(events)
            }
            EngineInput::EntryFailed(failure) => {
                match self.store.clear_pending(failure.asset) {
                    Some(_) => warn!("{} ❌ 入场失败，已释放敞口: {}", failure.asset, failure.reason),
                    None => debug!("{} 入场失败通知但没有待成交入场", failure.asset),
                }
                Ok(Vec::new())
            }
            EngineInput::Portfolio(update) => {
                self.portfolio.apply_update(&update)?;
                Ok(Vec::new())
            }
        }
    }
}

/// 向引擎投递输入的句柄，可跨任务克隆
#[derive(Clone)]
pub struct EngineHandle {
    sender: mpsc::UnboundedSender<EngineInput>,
}

impl EngineHandle {
    pub fn send(&self, input: EngineInput) -> Result<()> {
        self.sender
            .send(input)
            .map_err(|_| EngineError::Other("引擎已停止".to_string()))
    }
}

/// 空头决策引擎
pub struct ShortSellerEngine {
    ctx: EngineContext,
    coordinator: SignalCoordinator,
    inbox: mpsc::UnboundedReceiver<EngineInput>,
    sinks: Vec<Arc<dyn EventSink>>,
}

impl ShortSellerEngine {
    pub fn new(config: EngineConfig) -> Result<(Self, EngineHandle)> {
        config.validate()?;
        let config = Arc::new(config);
        let (sender, inbox) = mpsc::unbounded_channel();

        info!(
            "🚀 初始化引擎 {}，资产: {:?}",
            config.name,
            config.enabled_assets()
        );

        let engine = Self {
            ctx: EngineContext::new(Arc::clone(&config)),
            coordinator: SignalCoordinator::new(config),
            inbox,
            sinks: Vec::new(),
        };
        Ok((engine, EngineHandle { sender }))
    }

    pub fn add_sink(&mut self, sink: Arc<dyn EventSink>) {
        info!("📮 添加事件接收端: {}", sink.name());
        self.sinks.push(sink);
    }

    pub fn context(&self) -> &EngineContext {
        &self.ctx
    }

    pub fn trade_stats(&self) -> Vec<TradeStats> {
        self.ctx.trade_stats()
    }

    /// 用历史K线预热指标，不产生信号，返回接受的K线数量
    pub async fn warm_up(&mut self, bars: &[Bar]) -> usize {
        let mut accepted = 0;
        for bar in bars {
            let Some(slot) = self.ctx.slot(bar.asset) else {
                continue;
            };
            let mut state = slot.lock().await;
            match state.indicator.update(bar) {
                Ok(_) => accepted += 1,
                Err(e) => warn!("{} 预热K线被丢弃: {}", bar.asset, e),
            }
        }
        info!("🔥 指标预热完成，使用 {}/{} 根K线", accepted, bars.len());
        accepted
    }

    /// 消费收件箱，K线追加到本周期
    async fn drain_inbox(&mut self, bars: &mut Vec<Bar>) -> Result<Vec<EngineEvent>> {
        let mut events = Vec::new();
        while let Ok(input) = self.inbox.try_recv() {
            let timestamp = input.timestamp();
            match input {
                EngineInput::Bar(bar) => bars.push(bar),
                other => match self.ctx.apply_input(other).await {
                    Ok(produced) => events.extend(produced),
                    Err(e) if e.is_fatal() => {
                        error!("❌ 状态不一致，停止引擎: {}", e);
                        return Err(e);
                    }
                    Err(e) => {
                        match e.severity() {
                            ErrorSeverity::Warning => warn!("⚠️ 输入被丢弃: {}", e),
                            _ => error!("❌ 输入处理失败: {}", e),
                        }
                        events.push(EngineEvent::input_rejected(&e, timestamp));
                    }
                },
            }
        }
        Ok(events)
    }

    async fn publish(&self, events: &[EngineEvent]) {
        for sink in &self.sinks {
            for event in events {
                if let Err(e) = sink.publish(event).await {
                    warn!("事件接收端 {} 发布失败: {}", sink.name(), e);
                }
            }
        }
    }

    /// 执行一个决策周期
    pub async fn run_cycle(&mut self, now: DateTime<Utc>, bars: Vec<Bar>) -> Result<CycleReport> {
        let mut bars = bars;
        let mut events = self.drain_inbox(&mut bars).await?;

        let mut report = self.coordinator.run_cycle(&mut self.ctx, now, bars).await?;
        events.append(&mut report.events);
        report.events = events;

        self.publish(&report.events).await;
        Ok(report)
    }

    /// 按配置的间隔定时运行，直到收到停止信号
    ///
    /// 周期之间到达的K线都归入下一个周期
    pub async fn run_scheduled(&mut self, mut shutdown: oneshot::Receiver<()>) -> Result<()> {
        let period = std::time::Duration::from_secs(self.ctx.config.cycle.interval_secs);
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        info!("⏰ 定时运行，周期 {}s", period.as_secs());

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let report = self.run_cycle(Utc::now(), Vec::new()).await?;
                    debug!("周期完成: {} 个可执行信号", report.actionable().count());
                }
                _ = &mut shutdown => {
                    info!("🛑 收到停止信号");
                    for stats in self.trade_stats() {
                        stats.log_summary();
                    }
                    return Ok(());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::{AssetConfig, IndicatorConfig};
    use crate::core::types::OrderSide;
    use crate::strategies::short_seller::cooldown::{CooldownReason, CooldownScope};
    use crate::strategies::short_seller::events::ChannelEventSink;
    use crate::strategies::short_seller::regime::RegimeValue;
    use crate::strategies::short_seller::signal::{ReasonCode, SignalAction};
    use chrono::{Duration, TimeZone};

    /// fast=3 slow=5 时最后一根同时下穿两条均线
    const BTC_CROSS: &[f64] = &[100.0, 103.0, 104.0, 98.0];
    /// 同样形态但波动更大
    const ETH_CROSS: &[f64] = &[100.0, 106.0, 108.0, 96.0];

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 8, 5, 12, 0, 0).unwrap()
    }

    fn test_config(assets: &[(Asset, f64)]) -> EngineConfig {
        EngineConfig {
            assets: assets
                .iter()
                .map(|(asset, alloc)| AssetConfig::new(*asset, *alloc, 10.0))
                .collect(),
            indicator: IndicatorConfig {
                fast_ema: 3,
                slow_ema: 5,
                ..IndicatorConfig::default()
            },
            ..EngineConfig::default()
        }
    }

    fn bar(asset: Asset, minutes: i64, close: f64) -> Bar {
        Bar {
            asset,
            timestamp: t0() + Duration::minutes(minutes),
            open: close,
            high: close,
            low: close,
            close,
            volume: 1.0,
        }
    }

    /// 逐周期推送收盘价，返回最后一个周期的报告
    async fn feed(
        engine: &mut ShortSellerEngine,
        series: &[(Asset, &[f64])],
        start_minute: i64,
    ) -> CycleReport {
        let len = series[0].1.len();
        let mut last = None;
        for i in 0..len {
            let minute = start_minute + 5 * i as i64;
            let bars = series
                .iter()
                .map(|(asset, closes)| bar(*asset, minute, closes[i]))
                .collect();
            last = Some(
                engine
                    .run_cycle(t0() + Duration::minutes(minute), bars)
                    .await
                    .unwrap(),
            );
        }
        last.unwrap()
    }

    fn fill(asset: Asset, price: f64, minutes: i64) -> EngineInput {
        EngineInput::Fill(Fill {
            asset,
            side: OrderSide::Sell,
            price,
            quantity: 1.0,
            timestamp: t0() + Duration::minutes(minutes),
        })
    }

    #[tokio::test]
    async fn cross_below_emas_produces_short_entry() {
        let (mut engine, _handle) = ShortSellerEngine::new(test_config(&[(Asset::BTC, 0.07)])).unwrap();

        let report = feed(&mut engine, &[(Asset::BTC, BTC_CROSS)], 0).await;
        let signal = report.signal(Asset::BTC).unwrap();
        assert_eq!(signal.action, SignalAction::EnterShort);
        assert_eq!(signal.price, Some(98.0));
        assert_eq!(signal.stop_loss, Some(99.47));
        assert_eq!(signal.take_profit, Some(92.12));
        assert!((signal.notional.unwrap() - 7_000.0).abs() < 1e-6);
        assert_eq!(report.metrics.pending_entries, 1);
        assert!(report.events.iter().any(|e| matches!(
            e,
            EngineEvent::RegimeChanged { to: RegimeValue::Active, .. }
        )));

        // 待成交期间（跨过一个完整周期）不会重复入场
        let report = engine
            .run_cycle(t0() + Duration::minutes(20), vec![bar(Asset::BTC, 20, 97.0)])
            .await
            .unwrap();
        assert_eq!(
            report.signal(Asset::BTC).unwrap().reason,
            ReasonCode::EntryPending
        );
    }

    #[tokio::test]
    async fn exposure_cap_prefers_more_volatile_asset() {
        let mut config = test_config(&[(Asset::BTC, 0.07), (Asset::ETH, 0.07)]);
        config.risk.max_total_exposure = 1.0;

        let series = [(Asset::BTC, BTC_CROSS), (Asset::ETH, ETH_CROSS)];

        for _ in 0..2 {
            let (mut engine, _handle) = ShortSellerEngine::new(config.clone()).unwrap();
            let report = feed(&mut engine, &series, 0).await;

            let eth = report.signal(Asset::ETH).unwrap();
            let btc = report.signal(Asset::BTC).unwrap();
            assert_eq!(eth.action, SignalAction::EnterShort);
            assert_eq!(btc.action, SignalAction::NoAction);
            assert_eq!(btc.reason.to_string(), "exposure limit");
            assert!(report.metrics.total_exposure_fraction <= 1.0 + 1e-9);
        }
    }

    #[tokio::test]
    async fn missing_bar_yields_input_error() {
        let (mut engine, _handle) =
            ShortSellerEngine::new(test_config(&[(Asset::BTC, 0.07), (Asset::SOL, 0.07)])).unwrap();

        let report = engine
            .run_cycle(t0(), vec![bar(Asset::BTC, 0, 100.0)])
            .await
            .unwrap();
        let sol = report.signal(Asset::SOL).unwrap();
        assert_eq!(sol.action, SignalAction::NoAction);
        assert_eq!(sol.reason.to_string(), "input error: missing bar");
        assert_eq!(report.signals.len(), 2);
    }

    #[tokio::test]
    async fn stale_bar_is_rejected_and_reported() {
        let (mut engine, _handle) = ShortSellerEngine::new(test_config(&[(Asset::BTC, 0.07)])).unwrap();
        engine
            .run_cycle(t0() + Duration::minutes(5), vec![bar(Asset::BTC, 5, 100.0)])
            .await
            .unwrap();

        let report = engine
            .run_cycle(t0() + Duration::minutes(10), vec![bar(Asset::BTC, 0, 101.0)])
            .await
            .unwrap();
        assert_eq!(report.signal(Asset::BTC).unwrap().action, SignalAction::NoAction);
        assert!(report
            .events
            .iter()
            .any(|e| matches!(e, EngineEvent::InputRejected { asset: Some(Asset::BTC), .. })));
    }

    #[tokio::test]
    async fn regime_reversal_exits_open_short() {
        let (mut engine, handle) = ShortSellerEngine::new(test_config(&[(Asset::BTC, 0.07)])).unwrap();
        feed(&mut engine, &[(Asset::BTC, BTC_CROSS)], 0).await;

        handle.send(fill(Asset::BTC, 98.0, 16)).unwrap();
        let report = engine
            .run_cycle(t0() + Duration::minutes(18), vec![bar(Asset::BTC, 18, 104.0)])
            .await
            .unwrap();

        let signal = report.signal(Asset::BTC).unwrap();
        assert_eq!(signal.action, SignalAction::Exit);
        assert_eq!(signal.reason, ReasonCode::RegimeExit);
        assert_eq!(report.metrics.active_positions, 1);
        assert_eq!(report.metrics.pending_entries, 0);

        // 平仓结果到达前不再重复发出平仓信号
        let report = engine
            .run_cycle(t0() + Duration::minutes(23), vec![bar(Asset::BTC, 23, 106.0)])
            .await
            .unwrap();
        let signal = report.signal(Asset::BTC).unwrap();
        assert_eq!(signal.action, SignalAction::NoAction);
        assert_eq!(signal.reason, ReasonCode::ExitPending);
    }

    #[tokio::test]
    async fn duplicate_fill_is_fatal() {
        let (mut engine, handle) = ShortSellerEngine::new(test_config(&[(Asset::BTC, 0.07)])).unwrap();
        handle.send(fill(Asset::BTC, 98.0, 0)).unwrap();
        handle.send(fill(Asset::BTC, 97.0, 1)).unwrap();

        let err = engine
            .run_cycle(t0() + Duration::minutes(5), vec![bar(Asset::BTC, 5, 98.0)])
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvariantViolation(_)));
    }

    #[tokio::test]
    async fn quick_exit_starts_asset_cooldown() {
        let (mut engine, handle) = ShortSellerEngine::new(test_config(&[(Asset::BTC, 0.07)])).unwrap();
        let (sink, mut rx) = ChannelEventSink::channel();
        engine.add_sink(Arc::new(sink));

        handle.send(fill(Asset::BTC, 98.0, 0)).unwrap();
        handle
            .send(EngineInput::Outcome(TradeOutcome {
                asset: Asset::BTC,
                entry_price: 98.0,
                exit_price: 99.47,
                quantity: 1.0,
                opened_at: t0(),
                closed_at: t0() + Duration::minutes(20),
                realized_pnl: -1.47,
                exit_reason: "stop loss".to_string(),
            }))
            .unwrap();

        let report = engine
            .run_cycle(t0() + Duration::minutes(25), vec![bar(Asset::BTC, 25, 98.0)])
            .await
            .unwrap();
        assert_eq!(report.metrics.active_positions, 0);

        let mut started = None;
        while let Ok(event) = rx.try_recv() {
            if let EngineEvent::CooldownStarted { scope, reason, expiry, .. } = event {
                started = Some((scope, reason, expiry));
            }
        }
        assert_eq!(
            started,
            Some((
                CooldownScope::Asset,
                CooldownReason::QuickExit,
                t0() + Duration::minutes(80)
            ))
        );
        assert_eq!(engine.trade_stats()[0].total_trades, 1);
    }

    #[tokio::test]
    async fn drawdown_breach_forces_portfolio_protection_exit() {
        let (mut engine, handle) = ShortSellerEngine::new(test_config(&[(Asset::BTC, 0.07)])).unwrap();
        handle.send(fill(Asset::BTC, 100.0, 0)).unwrap();
        handle
            .send(EngineInput::Portfolio(PortfolioUpdate {
                balance: 8_000.0,
                equity: 8_000.0,
                margin_used: 700.0,
                unrealized_pnl: 0.0,
                timestamp: t0() + Duration::minutes(1),
            }))
            .unwrap();

        let report = engine
            .run_cycle(t0() + Duration::minutes(5), Vec::new())
            .await
            .unwrap();

        let signal = report.signal(Asset::BTC).unwrap();
        assert_eq!(signal.action, SignalAction::Exit);
        assert_eq!(signal.reason, ReasonCode::PortfolioProtection);
        assert!(report.events.iter().any(|e| matches!(
            e,
            EngineEvent::CooldownStarted { scope: CooldownScope::Global, .. }
        )));
    }

    #[tokio::test]
    async fn entry_failure_releases_pending_exposure() {
        let (mut engine, handle) = ShortSellerEngine::new(test_config(&[(Asset::BTC, 0.07)])).unwrap();
        feed(&mut engine, &[(Asset::BTC, BTC_CROSS)], 0).await;
        assert!(engine.context().store.has_pending(Asset::BTC));

        handle
            .send(EngineInput::EntryFailed(EntryFailure {
                asset: Asset::BTC,
                reason: "rejected".to_string(),
                timestamp: t0() + Duration::minutes(16),
            }))
            .unwrap();
        let report = engine
            .run_cycle(t0() + Duration::minutes(18), vec![bar(Asset::BTC, 18, 97.0)])
            .await
            .unwrap();
        // 敞口已释放，但同一次穿越不会再触发入场
        assert!(!engine.context().store.has_pending(Asset::BTC));
        assert_eq!(report.metrics.pending_entries, 0);
        assert_eq!(report.metrics.total_exposure_fraction, 0.0);
        assert_eq!(
            report.signal(Asset::BTC).unwrap().reason,
            ReasonCode::CrossConsumed
        );
    }

    /// 周期 60s、入场单 120s 超时
    fn short_timeout_config(assets: &[(Asset, f64)]) -> EngineConfig {
        let mut config = test_config(assets);
        config.cycle.interval_secs = 60;
        config.cycle.pending_entry_timeout_secs = 120;
        config
    }

    #[tokio::test]
    async fn expired_entry_does_not_reenter_on_same_cross() {
        let (mut engine, handle) =
            ShortSellerEngine::new(short_timeout_config(&[(Asset::BTC, 0.07)])).unwrap();
        let report = feed(&mut engine, &[(Asset::BTC, BTC_CROSS)], 0).await;
        assert_eq!(report.signal(Asset::BTC).unwrap().action, SignalAction::EnterShort);

        let report = engine
            .run_cycle(t0() + Duration::minutes(18), vec![bar(Asset::BTC, 18, 97.0)])
            .await
            .unwrap();
        assert!(!engine.context().store.has_pending(Asset::BTC));
        assert_eq!(
            report.signal(Asset::BTC).unwrap().reason,
            ReasonCode::CrossConsumed
        );

        // 迟到的成交只建立一个持仓
        handle.send(fill(Asset::BTC, 98.0, 19)).unwrap();
        let report = engine
            .run_cycle(t0() + Duration::minutes(20), vec![bar(Asset::BTC, 20, 97.0)])
            .await
            .unwrap();
        assert_eq!(report.metrics.active_positions, 1);
        assert_eq!(
            report.signal(Asset::BTC).unwrap().reason,
            ReasonCode::HoldingPosition
        );
    }

    #[tokio::test]
    async fn late_fill_over_cap_is_closed_immediately() {
        let mut config = short_timeout_config(&[(Asset::BTC, 0.07), (Asset::ETH, 0.07)]);
        config.risk.max_total_exposure = 1.0;
        let (mut engine, handle) = ShortSellerEngine::new(config).unwrap();

        // BTC 在第15分钟入场，ETH 仍在上涨
        let eth_rising: &[f64] = &[100.0, 106.0, 108.0, 110.0];
        let series = [(Asset::BTC, BTC_CROSS), (Asset::ETH, eth_rising)];
        let report = feed(&mut engine, &series, 0).await;
        assert_eq!(report.signal(Asset::BTC).unwrap().action, SignalAction::EnterShort);
        assert_eq!(report.signal(Asset::ETH).unwrap().action, SignalAction::NoAction);

        // BTC 入场单超时释放敞口，ETH 下穿后占用
        let report = engine
            .run_cycle(
                t0() + Duration::minutes(18),
                vec![bar(Asset::BTC, 18, 97.0), bar(Asset::ETH, 18, 96.0)],
            )
            .await
            .unwrap();
        assert_eq!(report.signal(Asset::ETH).unwrap().action, SignalAction::EnterShort);
        assert_ne!(report.signal(Asset::BTC).unwrap().action, SignalAction::EnterShort);

        // 两笔成交都到达，BTC 没有预留敞口
        handle.send(fill(Asset::BTC, 98.0, 19)).unwrap();
        handle.send(fill(Asset::ETH, 96.0, 19)).unwrap();
        let report = engine
            .run_cycle(
                t0() + Duration::minutes(20),
                vec![bar(Asset::BTC, 20, 97.0), bar(Asset::ETH, 20, 95.0)],
            )
            .await
            .unwrap();
        let btc = report.signal(Asset::BTC).unwrap();
        assert_eq!(btc.action, SignalAction::Exit);
        assert_eq!(btc.reason.to_string(), "exposure limit");
        assert_eq!(report.signal(Asset::ETH).unwrap().action, SignalAction::NoAction);

        let report = engine
            .run_cycle(
                t0() + Duration::minutes(21),
                vec![bar(Asset::BTC, 21, 97.0), bar(Asset::ETH, 21, 95.0)],
            )
            .await
            .unwrap();
        assert_eq!(
            report.signal(Asset::BTC).unwrap().reason,
            ReasonCode::ExitPending
        );
    }

    #[test]
    fn inputs_deserialize_from_tagged_json() {
        let line = r#"{"type":"Bar","asset":"BTC","timestamp":"2025-08-05T12:00:00Z","open":1.0,"high":1.0,"low":1.0,"close":1.0,"volume":2.0}"#;
        let input: EngineInput = serde_json::from_str(line).unwrap();
        assert_eq!(input.timestamp(), t0());
        assert!(matches!(input, EngineInput::Bar(ref b) if b.asset == Asset::BTC));
    }
}
