//! 仓位管理模块
//!
//! 持仓、待成交入场单和已平仓交易归档。只在每个周期的汇总阶段由协调器写入

use chrono::{DateTime, Duration, Utc};
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use crate::core::config::AssetConfig;
use crate::core::error::{EngineError, Result};
use crate::core::types::{Asset, AssetTable, OrderSide};
use crate::strategies::short_seller::risk_control::EXPOSURE_TOLERANCE;
use crate::utils::indicators::round_to_precision;

/// 空头持仓
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Position {
    pub asset: Asset,
    pub side: OrderSide,
    pub entry_price: f64,
    pub quantity: f64,
    pub opened_at: DateTime<Utc>,
    pub stop_loss: f64,
    pub take_profit: f64,
    /// 建仓时的 allocation × leverage
    pub exposure_fraction: f64,
    /// 没有预留敞口的迟到成交使总敞口超限，需要立即平仓
    pub over_cap: bool,
    /// 最近一次发出平仓信号的时间
    pub exit_requested_at: Option<DateTime<Utc>>,
}

impl Position {
    /// 检查是否触及止损
    pub fn is_stop_hit(&self, price: f64) -> bool {
        price >= self.stop_loss
    }

    /// 检查是否触及止盈
    pub fn is_take_profit_hit(&self, price: f64) -> bool {
        price <= self.take_profit
    }

    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now - self.opened_at
    }

    /// 获取持仓小时数
    pub fn holding_hours(&self, now: DateTime<Utc>) -> f64 {
        self.age(now).num_seconds() as f64 / 3600.0
    }

    /// 按当前价格计算的浮动盈亏
    pub fn unrealized_pnl(&self, price: f64) -> f64 {
        (self.entry_price - price) * self.quantity
    }

    /// 平仓信号已发出且尚未超时
    pub fn exit_in_flight(&self, now: DateTime<Utc>, timeout: Duration) -> bool {
        self.exit_requested_at
            .map(|at| now - at < timeout)
            .unwrap_or(false)
    }
}

/// 已发出、等待成交确认的入场信号
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PendingEntry {
    pub asset: Asset,
    pub price: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub notional: f64,
    pub exposure_fraction: f64,
    /// 触发这次入场的穿越时间
    pub cross_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// 成交回报
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fill {
    pub asset: Asset,
    pub side: OrderSide,
    pub price: f64,
    pub quantity: f64,
    pub timestamp: DateTime<Utc>,
}

/// 平仓结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeOutcome {
    pub asset: Asset,
    pub entry_price: f64,
    pub exit_price: f64,
    pub quantity: f64,
    pub opened_at: DateTime<Utc>,
    pub closed_at: DateTime<Utc>,
    pub realized_pnl: f64,
    pub exit_reason: String,
}

impl TradeOutcome {
    pub fn hold_duration(&self) -> Duration {
        self.closed_at - self.opened_at
    }

    pub fn holding_hours(&self) -> f64 {
        self.hold_duration().num_seconds() as f64 / 3600.0
    }

    /// 空头收益率 (entry − exit) / entry
    pub fn pnl_percent(&self) -> f64 {
        if self.entry_price > 0.0 {
            (self.entry_price - self.exit_price) / self.entry_price * 100.0
        } else {
            0.0
        }
    }

    pub fn is_win(&self) -> bool {
        self.realized_pnl > 0.0
    }

    fn validate(&self) -> std::result::Result<(), String> {
        let values = [self.entry_price, self.exit_price, self.quantity, self.realized_pnl];
        if values.iter().any(|v| !v.is_finite()) {
            return Err("平仓结果包含非有限数值".to_string());
        }
        if self.entry_price <= 0.0 || self.exit_price <= 0.0 || self.quantity <= 0.0 {
            return Err("平仓价格和数量必须为正".to_string());
        }
        if self.closed_at < self.opened_at {
            return Err(format!(
                "平仓时间 {} 早于开仓时间 {}",
                self.closed_at, self.opened_at
            ));
        }
        Ok(())
    }
}

/// 根据入场价计算止损止盈价，空头止损在上方、止盈在下方
pub fn protective_prices(
    entry_price: f64,
    stop_loss_pct: f64,
    take_profit_pct: f64,
    precision: u32,
) -> (f64, f64) {
    (
        round_to_precision(entry_price * (1.0 + stop_loss_pct), precision),
        round_to_precision(entry_price * (1.0 - take_profit_pct), precision),
    )
}

/// 仓位管理器
pub struct PositionStore {
    positions: AssetTable<Option<Position>>,
    pending: AssetTable<Option<PendingEntry>>,
    /// 每个资产最近一次入场用掉的穿越，同一次穿越只入场一次
    consumed_cross: AssetTable<Option<DateTime<Utc>>>,
    closed: AssetTable<VecDeque<TradeOutcome>>,
    history_capacity: usize,
    max_total_exposure: f64,
}

impl PositionStore {
    /// 创建新的仓位管理器
    pub fn new(history_capacity: usize, max_total_exposure: f64) -> Self {
        Self {
            positions: AssetTable::default(),
            pending: AssetTable::default(),
            consumed_cross: AssetTable::default(),
            closed: AssetTable::default(),
            history_capacity: history_capacity.max(1),
            max_total_exposure,
        }
    }

    /// 入场成交后建立持仓
    pub fn apply_entry(
        &mut self,
        fill: &Fill,
        config: &AssetConfig,
        stop_loss_pct: f64,
        take_profit_pct: f64,
    ) -> Result<&Position> {
        let asset = fill.asset;

        if fill.side != OrderSide::Sell {
            return Err(EngineError::input(asset, "入场成交方向必须为卖出"));
        }
        if !(fill.quantity > 0.0 && fill.quantity.is_finite())
            || !(fill.price > 0.0 && fill.price.is_finite())
        {
            let msg = format!(
                "{} 成交数量/价格非法: qty={} price={}",
                asset, fill.quantity, fill.price
            );
            error!("❌ {}", msg);
            return Err(EngineError::invariant(msg));
        }
        if let Some(existing) = self.positions.get(asset) {
            let msg = format!(
                "{} 已有持仓 (入场价 {})，又收到入场成交",
                asset, existing.entry_price
            );
            error!("❌ {}", msg);
            return Err(EngineError::invariant(msg));
        }

        let exposure_fraction = config.exposure_fraction();
        let reserved = self.pending[asset].take().is_some();
        let over_cap = !reserved
            && self.snapshot_exposure() + exposure_fraction
                > self.max_total_exposure + EXPOSURE_TOLERANCE;
        if over_cap {
            error!(
                "❌ {} 迟到成交使总敞口超过上限 {:.2}，下个周期立即平仓",
                asset, self.max_total_exposure
            );
        } else if !reserved {
            warn!("{} 收到成交但没有待成交入场单（可能已超时）", asset);
        }

        let (stop_loss, take_profit) = protective_prices(
            fill.price,
            stop_loss_pct,
            take_profit_pct,
            config.price_precision,
        );

        let position = Position {
            asset,
            side: OrderSide::Sell,
            entry_price: fill.price,
            quantity: fill.quantity,
            opened_at: fill.timestamp,
            stop_loss,
            take_profit,
            exposure_fraction,
            over_cap,
            exit_requested_at: None,
        };

        info!(
            "{} ✅ 空头建仓 价格 {} 数量 {} 止损 {} 止盈 {}",
            asset, position.entry_price, position.quantity, stop_loss, take_profit
        );

        Ok(&*self.positions[asset].insert(position))
    }

    /// 平仓结果到达后归档持仓
    pub fn apply_exit(&mut self, outcome: &TradeOutcome) -> Result<Position> {
        let asset = outcome.asset;
        outcome
            .validate()
            .map_err(|reason| EngineError::input(asset, reason))?;

        let position = self.positions[asset]
            .take()
            .ok_or_else(|| EngineError::input(asset, "没有持仓却收到平仓结果"))?;

        let archive = &mut self.closed[asset];
        if archive.len() >= self.history_capacity {
            archive.pop_front();
        }
        archive.push_back(outcome.clone());

        info!(
            "{} 📊 平仓 {} -> {} 盈亏 {:.2} ({:.2}%) 持仓 {:.2} 小时 原因: {}",
            asset,
            outcome.entry_price,
            outcome.exit_price,
            outcome.realized_pnl,
            outcome.pnl_percent(),
            outcome.holding_hours(),
            outcome.exit_reason
        );

        Ok(position)
    }

    /// 记录待成交入场单
    pub fn mark_pending(&mut self, entry: PendingEntry) -> Result<()> {
        let asset = entry.asset;
        if self.positions[asset].is_some() || self.pending[asset].is_some() {
            let msg = format!("{} 已有持仓或待成交入场单，不能重复入场", asset);
            error!("❌ {}", msg);
            return Err(EngineError::invariant(msg));
        }
        debug!("{} ⏳ 等待入场成交 价格 {}", asset, entry.price);
        let consumed = &mut self.consumed_cross[asset];
        *consumed = (*consumed).max(Some(entry.cross_at));
        self.pending[asset] = Some(entry);
        Ok(())
    }

    /// 记录已发出平仓信号，结果到达前不再重复发出
    pub fn mark_exit_requested(&mut self, asset: Asset, now: DateTime<Utc>) {
        if let Some(position) = self.positions[asset].as_mut() {
            position.exit_requested_at = Some(now);
        }
    }

    /// 入场失败时清除待成交单
    pub fn clear_pending(&mut self, asset: Asset) -> Option<PendingEntry> {
        self.pending[asset].take()
    }

    /// 清除超时的待成交单
    pub fn expire_pending(&mut self, now: DateTime<Utc>, timeout: Duration) -> Vec<PendingEntry> {
        let mut expired = Vec::new();
        for (asset, slot) in self.pending.iter_mut() {
            let is_stale = slot
                .as_ref()
                .map(|p| now - p.created_at >= timeout)
                .unwrap_or(false);
            if is_stale {
                if let Some(entry) = slot.take() {
                    warn!("{} ⌛ 入场单 {} 秒内未成交，已放弃", asset, timeout.num_seconds());
                    expired.push(entry);
                }
            }
        }
        expired
    }

    /// 持仓与待成交单的杠杆敞口合计（余额倍数）
    pub fn snapshot_exposure(&self) -> f64 {
        let open: f64 = self
            .positions
            .values()
            .flatten()
            .map(|p| p.exposure_fraction)
            .sum();
        let pending: f64 = self
            .pending
            .values()
            .flatten()
            .map(|p| p.exposure_fraction)
            .sum();
        open + pending
    }

    pub fn position(&self, asset: Asset) -> Option<&Position> {
        self.positions[asset].as_ref()
    }

    pub fn consumed_cross(&self, asset: Asset) -> Option<DateTime<Utc>> {
        self.consumed_cross[asset]
    }

    pub fn has_pending(&self, asset: Asset) -> bool {
        self.pending[asset].is_some()
    }

    pub fn open_positions(&self) -> impl Iterator<Item = &Position> {
        self.positions.values().flatten()
    }

    pub fn open_count(&self) -> usize {
        self.open_positions().count()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.values().flatten().count()
    }

    pub fn closed_trades(&self, asset: Asset) -> impl Iterator<Item = &TradeOutcome> {
        self.closed[asset].iter()
    }
}
