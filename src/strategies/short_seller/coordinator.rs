//! 信号协调器
//!
//! 每个周期：各资产并行计算候选（每个资产独占自己的互斥锁），
//! 全部完成后再统一做紧急平仓、优先级排序和组合风控

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use log::{debug, error, info, warn};
use std::cmp::Ordering;
use std::sync::Arc;

use crate::core::config::{AssetConfig, EngineConfig};
use crate::core::error::{EngineError, Result};
use crate::core::types::{Asset, AssetTable, Bar};
use crate::strategies::short_seller::cooldown::CooldownWindow;
use crate::strategies::short_seller::engine::{AssetSlot, AssetState, EngineContext};
use crate::strategies::short_seller::events::EngineEvent;
use crate::strategies::short_seller::exit_rules::{evaluate_exit, ExitContext};
use crate::strategies::short_seller::indicator::CrossEvent;
use crate::strategies::short_seller::monitoring::RiskMetrics;
use crate::strategies::short_seller::portfolio::PortfolioSnapshot;
use crate::strategies::short_seller::position_manager::{protective_prices, PendingEntry, Position};
use crate::strategies::short_seller::regime::{RegimeDetector, RegimeInputs, RegimeState, RegimeValue};
use crate::strategies::short_seller::risk_control::{RiskValidator, RiskVerdict};
use crate::strategies::short_seller::signal::{ReasonCode, Signal, SignalAction};

/// 入场候选
#[derive(Debug, Clone, PartialEq)]
pub struct EntryCandidate {
    pub asset: Asset,
    pub price: f64,
    pub timestamp: DateTime<Utc>,
    /// 滚动实现波动率
    pub volatility: f64,
    /// 最近一次有效穿越的时间
    pub last_cross_at: DateTime<Utc>,
    pub active_since: Option<DateTime<Utc>>,
    pub exposure_fraction: f64,
    pub price_precision: u32,
    pub stop_loss_pct: f64,
    pub take_profit_pct: f64,
}

/// 每个资产每周期恰好一个候选
#[derive(Debug, Clone, PartialEq)]
pub enum Candidate {
    Enter(EntryCandidate),
    Exit {
        asset: Asset,
        price: Option<f64>,
        reason: ReasonCode,
    },
    Hold {
        asset: Asset,
        price: Option<f64>,
        reason: ReasonCode,
    },
}

impl Candidate {
    pub fn asset(&self) -> Asset {
        match self {
            Candidate::Enter(entry) => entry.asset,
            Candidate::Exit { asset, .. } | Candidate::Hold { asset, .. } => *asset,
        }
    }

    pub fn price(&self) -> Option<f64> {
        match self {
            Candidate::Enter(entry) => Some(entry.price),
            Candidate::Exit { price, .. } | Candidate::Hold { price, .. } => *price,
        }
    }

    pub fn hold(asset: Asset, price: Option<f64>, reason: ReasonCode) -> Self {
        Candidate::Hold {
            asset,
            price,
            reason,
        }
    }
}

/// 单个资产在本周期的只读视图
#[derive(Debug, Clone)]
pub struct AssetView<'a> {
    pub asset: Asset,
    pub config: &'a AssetConfig,
    pub now: DateTime<Utc>,
    pub price: f64,
    pub regime: &'a RegimeState,
    /// 本周期发生 ACTIVE → INACTIVE
    pub regime_deactivated: bool,
    pub daily_cross_count: usize,
    /// 有效期内最近的穿越
    pub recent_cross: Option<&'a CrossEvent>,
    /// 上一次入场用掉的穿越时间
    pub consumed_cross: Option<DateTime<Utc>>,
    pub volatility: f64,
    pub position: Option<&'a Position>,
    pub entry_pending: bool,
    /// 生效中的资产冷却
    pub asset_cooldown: Option<&'a CooldownWindow>,
    /// 生效中的全局冷却
    pub global_cooldown: Option<&'a CooldownWindow>,
}

/// 根据资产视图提出候选
pub fn propose(view: &AssetView<'_>, config: &EngineConfig) -> Candidate {
    let asset = view.asset;
    let price = Some(view.price);

    if let Some(position) = view.position {
        if position.exit_in_flight(view.now, config.cycle.pending_entry_timeout()) {
            return Candidate::hold(asset, price, ReasonCode::ExitPending);
        }
        let ctx = ExitContext {
            now: view.now,
            close: price,
            global_cooldown: view.global_cooldown.is_some(),
            regime_deactivated: view.regime_deactivated,
        };
        return match evaluate_exit(position, &ctx, config.exit.max_holding()) {
            Some(reason) => Candidate::Exit {
                asset,
                price,
                reason,
            },
            None => Candidate::hold(asset, price, ReasonCode::HoldingPosition),
        };
    }

    if view.entry_pending {
        return Candidate::hold(asset, price, ReasonCode::EntryPending);
    }
    if view.daily_cross_count >= config.regime.max_daily_crosses {
        return Candidate::hold(asset, price, ReasonCode::DailyCrossLimit);
    }
    if let Some(window) = view.global_cooldown {
        return Candidate::hold(asset, price, ReasonCode::GlobalCooldown(window.reason));
    }
    if let Some(window) = view.asset_cooldown {
        return Candidate::hold(asset, price, ReasonCode::AssetCooldown(window.reason));
    }
    if view.regime.value != RegimeValue::Active {
        return Candidate::hold(asset, price, ReasonCode::RegimeNotActive(view.regime.value));
    }
    let Some(cross) = view.recent_cross else {
        return Candidate::hold(asset, price, ReasonCode::NoRecentCross);
    };
    if view.consumed_cross.map_or(false, |used| cross.timestamp <= used) {
        return Candidate::hold(asset, price, ReasonCode::CrossConsumed);
    }

    Candidate::Enter(EntryCandidate {
        asset,
        price: view.price,
        timestamp: view.now,
        volatility: view.volatility,
        last_cross_at: cross.timestamp,
        active_since: view.regime.active_since,
        exposure_fraction: view.config.exposure_fraction(),
        price_precision: view.config.price_precision,
        stop_loss_pct: config.stop_loss_pct(view.config),
        take_profit_pct: config.take_profit_pct(view.config),
    })
}

/// 冷却过滤：冷却中的资产不允许入场
pub fn cooldown_filter(
    candidate: Candidate,
    asset_cooldown: Option<&CooldownWindow>,
    global_cooldown: Option<&CooldownWindow>,
) -> Candidate {
    match candidate {
        Candidate::Enter(entry) => {
            if let Some(window) = global_cooldown {
                Candidate::hold(
                    entry.asset,
                    Some(entry.price),
                    ReasonCode::GlobalCooldown(window.reason),
                )
            } else if let Some(window) = asset_cooldown {
                Candidate::hold(
                    entry.asset,
                    Some(entry.price),
                    ReasonCode::AssetCooldown(window.reason),
                )
            } else {
                Candidate::Enter(entry)
            }
        }
        other => other,
    }
}

/// 入场优先级：波动率高 > 穿越更近 > ACTIVE 更久 > 代码字母序
pub fn priority_cmp(a: &EntryCandidate, b: &EntryCandidate) -> Ordering {
    b.volatility
        .total_cmp(&a.volatility)
        .then_with(|| b.last_cross_at.cmp(&a.last_cross_at))
        .then_with(|| {
            a.active_since
                .is_none()
                .cmp(&b.active_since.is_none())
                .then_with(|| a.active_since.cmp(&b.active_since))
        })
        .then_with(|| a.asset.symbol().cmp(b.asset.symbol()))
}

/// 仲裁结果
#[derive(Debug, Clone)]
pub struct Arbitration {
    /// 按资产排序的最终信号
    pub signals: Vec<Signal>,
    /// 被接受的入场，需要登记为待成交
    pub entries: Vec<PendingEntry>,
    pub verdict: RiskVerdict,
}

/// 周期报告
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub timestamp: DateTime<Utc>,
    pub signals: Vec<Signal>,
    pub events: Vec<EngineEvent>,
    pub metrics: RiskMetrics,
}

impl CycleReport {
    pub fn signal(&self, asset: Asset) -> Option<&Signal> {
        self.signals.iter().find(|s| s.asset == asset)
    }

    pub fn actionable(&self) -> impl Iterator<Item = &Signal> {
        self.signals.iter().filter(|s| s.is_actionable())
    }
}

/// 单个资产任务的输入（拥有所有权，便于跨任务移动）
struct AssetTask {
    config: Arc<EngineConfig>,
    detector: Arc<RegimeDetector>,
    asset_config: AssetConfig,
    now: DateTime<Utc>,
    bars: Vec<Bar>,
    position: Option<Position>,
    entry_pending: bool,
    consumed_cross: Option<DateTime<Utc>>,
    global_cooldown: Option<CooldownWindow>,
}

struct AssetOutcome {
    candidate: Candidate,
    events: Vec<EngineEvent>,
}

/// 在资产自己的互斥区内更新指标、判定状态并提出候选
async fn process_asset(slot: AssetSlot, task: AssetTask) -> AssetOutcome {
    let mut guard = slot.lock().await;
    let AssetState {
        asset,
        indicator,
        regime,
        cooldown,
    } = &mut *guard;
    let asset = *asset;
    let now = task.now;
    let mut events = Vec::new();
    let mut last_error: Option<String> = None;
    let mut price = None;

    if let Some(window) = cooldown.take_expired(now) {
        info!("{} ✅ 冷却结束 ({})", asset, window.reason);
        events.push(EngineEvent::cooldown_ended(&window));
    }

    for bar in &task.bars {
        match indicator.update(bar) {
            Ok(_) => price = Some(bar.close),
            Err(e) => {
                warn!("{} ⚠️ K线被丢弃: {}", asset, e);
                events.push(EngineEvent::input_rejected(&e, now));
                last_error = Some(match e {
                    EngineError::InputError { reason, .. } => reason,
                    other => other.to_string(),
                });
            }
        }
    }

    let (Some(price), Some(fast_ema), Some(slow_ema)) =
        (price, indicator.fast_ema(), indicator.slow_ema())
    else {
        let reason = last_error.unwrap_or_else(|| "missing bar".to_string());
        return AssetOutcome {
            candidate: Candidate::hold(asset, None, ReasonCode::InputError(reason)),
            events,
        };
    };

    let global_cooldown = task.global_cooldown.as_ref().filter(|w| w.is_active(now));
    let asset_cooldown = cooldown.active_window(now);

    let inputs = RegimeInputs {
        price,
        fast_ema,
        slow_ema,
        daily_cross_count: indicator.daily_cross_count(),
        cooldown_active: asset_cooldown.is_some() || global_cooldown.is_some(),
    };
    let transition = task.detector.evaluate(asset, regime, &inputs, now);
    let regime_deactivated = transition
        .as_ref()
        .map(|t| t.is_deactivation())
        .unwrap_or(false);
    if let Some(transition) = transition {
        events.push(transition.into());
    }

    let view = AssetView {
        asset,
        config: &task.asset_config,
        now,
        price,
        regime: &*regime,
        regime_deactivated,
        daily_cross_count: indicator.daily_cross_count(),
        recent_cross: indicator.latest_cross_within(now, task.config.regime.cross_recency()),
        consumed_cross: task.consumed_cross,
        volatility: indicator.volatility(),
        position: task.position.as_ref(),
        entry_pending: task.entry_pending,
        asset_cooldown,
        global_cooldown,
    };

    let candidate = cooldown_filter(propose(&view, &task.config), asset_cooldown, global_cooldown);
    debug!("{} 候选: {:?}", asset, candidate);

    AssetOutcome { candidate, events }
}

/// 信号协调器
pub struct SignalCoordinator {
    config: Arc<EngineConfig>,
    detector: Arc<RegimeDetector>,
    validator: RiskValidator,
}

impl SignalCoordinator {
    pub fn new(config: Arc<EngineConfig>) -> Self {
        Self {
            detector: Arc::new(RegimeDetector::new(&config.regime)),
            validator: RiskValidator::new(&config.risk),
            config,
        }
    }

    /// 对入场候选排序并执行组合风控，出场候选直接通过
    pub fn arbitrate(
        &self,
        candidates: Vec<Candidate>,
        snapshot: &PortfolioSnapshot,
        open_exposure: f64,
        now: DateTime<Utc>,
    ) -> Arbitration {
        let mut signals = Vec::with_capacity(candidates.len());
        let mut entries_in = Vec::new();

        for candidate in candidates {
            match candidate {
                Candidate::Enter(entry) => entries_in.push(entry),
                Candidate::Exit {
                    asset,
                    price,
                    reason,
                } => signals.push(Signal::exit(asset, price, reason, now)),
                Candidate::Hold {
                    asset,
                    price,
                    reason,
                } => signals.push(Signal::no_action(asset, price, reason, now)),
            }
        }

        entries_in.sort_by(priority_cmp);
        let verdict = self.validator.validate(&entries_in, snapshot, open_exposure);

        let mut entries = Vec::new();
        for entry in entries_in {
            if !verdict.is_accepted(entry.asset) {
                let reason = verdict
                    .rejection(entry.asset)
                    .cloned()
                    .unwrap_or(ReasonCode::ExposureLimit);
                signals.push(Signal::no_action(entry.asset, Some(entry.price), reason, now));
                continue;
            }

            let (stop_loss, take_profit) = protective_prices(
                entry.price,
                entry.stop_loss_pct,
                entry.take_profit_pct,
                entry.price_precision,
            );
            let notional = snapshot.balance * entry.exposure_fraction;

            signals.push(Signal {
                asset: entry.asset,
                action: SignalAction::EnterShort,
                price: Some(entry.price),
                stop_loss: Some(stop_loss),
                take_profit: Some(take_profit),
                notional: Some(notional),
                reason: ReasonCode::EmaCross,
                timestamp: now,
            });
            entries.push(PendingEntry {
                asset: entry.asset,
                price: entry.price,
                stop_loss,
                take_profit,
                notional,
                exposure_fraction: entry.exposure_fraction,
                cross_at: entry.last_cross_at,
                created_at: now,
            });
        }

        signals.sort_by_key(|s| s.asset);
        Arbitration {
            signals,
            entries,
            verdict,
        }
    }

    /// 执行一个决策周期
    pub async fn run_cycle(
        &self,
        ctx: &mut EngineContext,
        now: DateTime<Utc>,
        bars: Vec<Bar>,
    ) -> Result<CycleReport> {
        let mut events = Vec::new();

        ctx.store
            .expire_pending(now, self.config.cycle.pending_entry_timeout());

        if ctx.portfolio.roll_day(now) {
            for stats in ctx.trade_stats() {
                stats.log_summary();
            }
        }

        // 资产级到期窗口在各自任务内取出，这里只处理全局窗口
        if let Some(window) = ctx.cooldowns.sweep_expired(now) {
            events.push(EngineEvent::cooldown_ended(&window));
        }

        let snapshot = ctx.portfolio.snapshot(ctx.store.snapshot_exposure(), now);
        if let Some(window) = ctx.cooldowns.on_portfolio_snapshot(&snapshot, now) {
            events.push(EngineEvent::cooldown_started(&window));
        }
        let global_cooldown = ctx.cooldowns.global_window(now).cloned();

        // 分发K线
        let mut per_asset: AssetTable<Vec<Bar>> = AssetTable::default();
        for bar in bars {
            if ctx.asset_config(bar.asset).is_some() {
                per_asset[bar.asset].push(bar);
            } else {
                warn!("{} 未启用，忽略K线", bar.asset);
            }
        }

        // 各资产并行处理，join_all 作为屏障
        let task_timeout = self.config.cycle.task_timeout();
        let slots: Vec<(Asset, AssetSlot)> = ctx.slots().collect();
        let mut assets = Vec::with_capacity(slots.len());
        let mut handles = Vec::with_capacity(slots.len());
        for (asset, slot) in slots {
            let Some(asset_config) = ctx.asset_config(asset).cloned() else {
                continue;
            };
            let task = AssetTask {
                config: Arc::clone(&self.config),
                detector: Arc::clone(&self.detector),
                asset_config,
                now,
                bars: std::mem::take(&mut per_asset[asset]),
                position: ctx.store.position(asset).cloned(),
                entry_pending: ctx.store.has_pending(asset),
                consumed_cross: ctx.store.consumed_cross(asset),
                global_cooldown: global_cooldown.clone(),
            };
            assets.push(asset);
            handles.push(tokio::spawn(async move {
                tokio::time::timeout(task_timeout, process_asset(slot, task)).await
            }));
        }

        let results = join_all(handles).await;

        let mut candidates = Vec::with_capacity(assets.len());
        for (asset, result) in assets.into_iter().zip(results) {
            let candidate = match result {
                Ok(Ok(outcome)) => {
                    events.extend(outcome.events);
                    outcome.candidate
                }
                Ok(Err(_)) => {
                    warn!("{} ⏱️ 资产任务超时 ({}ms)", asset, task_timeout.as_millis());
                    Candidate::hold(asset, None, ReasonCode::input_error("task timeout"))
                }
                Err(e) => {
                    warn!("{} ❌ 资产任务失败: {}", asset, e);
                    Candidate::hold(asset, None, ReasonCode::input_error("task failed"))
                }
            };
            candidates.push(candidate);
        }

        // 强制平仓：组合保护或敞口超限，缺少K线的资产同样适用。平仓信号在途时不重复发出
        let exit_timeout = self.config.cycle.pending_entry_timeout();
        for candidate in candidates.iter_mut() {
            let asset = candidate.asset();
            let Some(position) = ctx.store.position(asset) else {
                continue;
            };
            if position.exit_in_flight(now, exit_timeout) {
                continue;
            }
            let forced = if global_cooldown.is_some() {
                ReasonCode::PortfolioProtection
            } else if position.over_cap {
                ReasonCode::ExposureLimit
            } else {
                continue;
            };
            if matches!(&*candidate, Candidate::Exit { reason, .. } if *reason == forced) {
                continue;
            }
            warn!("{} 🚨 强制平仓 ({})", asset, forced);
            *candidate = Candidate::Exit {
                asset,
                price: candidate.price(),
                reason: forced,
            };
        }

        let open_exposure = ctx.store.snapshot_exposure();
        let arbitration = self.arbitrate(candidates, &snapshot, open_exposure, now);

        for entry in arbitration.entries {
            if let Err(e) = ctx.store.mark_pending(entry) {
                error!("❌ 登记待成交入场失败: {}", e);
                return Err(e);
            }
        }
        for signal in arbitration
            .signals
            .iter()
            .filter(|s| s.action == SignalAction::Exit)
        {
            ctx.store.mark_exit_requested(signal.asset, now);
        }

        for signal in arbitration.signals.iter().filter(|s| s.is_actionable()) {
            info!(
                "{} 🎯 {:?} @ {:?} ({})",
                signal.asset, signal.action, signal.price, signal.reason
            );
        }
        events.extend(arbitration.signals.iter().cloned().map(EngineEvent::Signal));

        let final_snapshot = ctx.portfolio.snapshot(ctx.store.snapshot_exposure(), now);
        let metrics = RiskMetrics::from_snapshot(
            &final_snapshot,
            ctx.store.open_count(),
            ctx.store.pending_count(),
        );
        events.push(EngineEvent::RiskMetrics(metrics.clone()));

        Ok(CycleReport {
            timestamp: now,
            signals: arbitration.signals,
            events,
            metrics,
        })
    }
}
