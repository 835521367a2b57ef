//! 策略监控模块

use chrono::{DateTime, Utc};
use log::info;
use serde::Serialize;

use crate::core::types::Asset;
use crate::strategies::short_seller::portfolio::PortfolioSnapshot;
use crate::strategies::short_seller::position_manager::TradeOutcome;

/// 单个资产的已平仓交易统计
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TradeStats {
    pub asset: Asset,
    pub total_trades: usize,
    pub winning_trades: usize,
    pub win_rate: f64,
    pub avg_holding_hours: f64,
    pub min_holding_hours: f64,
    pub max_holding_hours: f64,
    /// 平均收益率（百分比）
    pub avg_pnl_pct: f64,
    pub total_pnl: f64,
}

impl TradeStats {
    pub fn from_trades<'a>(asset: Asset, trades: impl IntoIterator<Item = &'a TradeOutcome>) -> Self {
        let trades: Vec<&TradeOutcome> = trades.into_iter().collect();
        let total = trades.len();

        if total == 0 {
            return Self {
                asset,
                total_trades: 0,
                winning_trades: 0,
                win_rate: 0.0,
                avg_holding_hours: 0.0,
                min_holding_hours: 0.0,
                max_holding_hours: 0.0,
                avg_pnl_pct: 0.0,
                total_pnl: 0.0,
            };
        }

        let hours: Vec<f64> = trades.iter().map(|t| t.holding_hours()).collect();
        let winning = trades.iter().filter(|t| t.is_win()).count();

        Self {
            asset,
            total_trades: total,
            winning_trades: winning,
            win_rate: winning as f64 / total as f64,
            avg_holding_hours: hours.iter().sum::<f64>() / total as f64,
            min_holding_hours: hours.iter().copied().fold(f64::INFINITY, f64::min),
            max_holding_hours: hours.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            avg_pnl_pct: trades.iter().map(|t| t.pnl_percent()).sum::<f64>() / total as f64,
            total_pnl: trades.iter().map(|t| t.realized_pnl).sum(),
        }
    }

    /// 打印统计摘要
    pub fn log_summary(&self) {
        if self.total_trades == 0 {
            info!("{} 📈 暂无已平仓交易", self.asset);
            return;
        }
        info!(
            "{} 📈 交易 {} 笔 胜率 {:.1}% 平均持仓 {:.2}h [{:.2}h, {:.2}h] 平均收益 {:.2}% 总盈亏 {:.2}",
            self.asset,
            self.total_trades,
            self.win_rate * 100.0,
            self.avg_holding_hours,
            self.min_holding_hours,
            self.max_holding_hours,
            self.avg_pnl_pct,
            self.total_pnl
        );
    }
}

/// 每周期输出的风险指标
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RiskMetrics {
    pub timestamp: DateTime<Utc>,
    pub balance: f64,
    pub total_exposure_fraction: f64,
    pub daily_pnl: f64,
    pub drawdown_fraction: f64,
    pub daily_loss_fraction: f64,
    pub active_positions: usize,
    pub pending_entries: usize,
}

impl RiskMetrics {
    pub fn from_snapshot(
        snapshot: &PortfolioSnapshot,
        active_positions: usize,
        pending_entries: usize,
    ) -> Self {
        Self {
            timestamp: snapshot.timestamp,
            balance: snapshot.balance,
            total_exposure_fraction: snapshot.total_exposure_fraction,
            daily_pnl: snapshot.daily_pnl,
            drawdown_fraction: snapshot.drawdown_fraction,
            daily_loss_fraction: snapshot.daily_loss_fraction,
            active_positions,
            pending_entries,
        }
    }
}
