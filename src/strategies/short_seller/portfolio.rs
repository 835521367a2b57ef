//! 组合跟踪：余额、权益高水位、回撤和当日盈亏

use chrono::{DateTime, NaiveDate, Utc};
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::core::error::{EngineError, Result};
use crate::strategies::short_seller::position_manager::TradeOutcome;

/// 账户快照更新
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioUpdate {
    pub balance: f64,
    pub equity: f64,
    pub margin_used: f64,
    pub unrealized_pnl: f64,
    pub timestamp: DateTime<Utc>,
}

/// 风控使用的组合快照
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PortfolioSnapshot {
    pub balance: f64,
    pub equity: f64,
    /// 由仓位管理器重新计算的杠杆敞口（余额倍数）
    pub total_exposure_fraction: f64,
    pub realized_daily_pnl: f64,
    pub daily_pnl: f64,
    pub drawdown_fraction: f64,
    pub daily_loss_fraction: f64,
    pub timestamp: DateTime<Utc>,
}

/// 组合跟踪器
#[derive(Debug, Clone)]
pub struct PortfolioTracker {
    balance: f64,
    equity: f64,
    peak_equity: f64,
    unrealized_pnl: f64,
    margin_used: f64,
    day: Option<NaiveDate>,
    day_start_equity: f64,
    realized_daily_pnl: f64,
    last_update: Option<DateTime<Utc>>,
}

impl PortfolioTracker {
    pub fn new(initial_balance: f64) -> Self {
        Self {
            balance: initial_balance,
            equity: initial_balance,
            peak_equity: initial_balance,
            unrealized_pnl: 0.0,
            margin_used: 0.0,
            day: None,
            day_start_equity: initial_balance,
            realized_daily_pnl: 0.0,
            last_update: None,
        }
    }

    /// 应用账户快照
    pub fn apply_update(&mut self, update: &PortfolioUpdate) -> Result<()> {
        let values = [
            update.balance,
            update.equity,
            update.margin_used,
            update.unrealized_pnl,
        ];
        if values.iter().any(|v| !v.is_finite()) {
            return Err(EngineError::InputError {
                asset: None,
                reason: "账户快照包含非有限数值".to_string(),
            });
        }
        if let Some(last) = self.last_update {
            if update.timestamp < last {
                return Err(EngineError::InputError {
                    asset: None,
                    reason: format!("账户快照时间回退: {} < {}", update.timestamp, last),
                });
            }
        }

        self.roll_day(update.timestamp);

        self.balance = update.balance;
        self.equity = update.equity;
        self.unrealized_pnl = update.unrealized_pnl;
        self.margin_used = update.margin_used;
        if self.equity > self.peak_equity {
            self.peak_equity = self.equity;
        }
        self.last_update = Some(update.timestamp);

        debug!(
            "💰 账户更新 余额 {:.2} 权益 {:.2} 高水位 {:.2}",
            self.balance, self.equity, self.peak_equity
        );
        Ok(())
    }

    /// 累计当日已实现盈亏
    pub fn record_outcome(&mut self, outcome: &TradeOutcome) {
        self.roll_day(outcome.closed_at);
        if self.day == Some(outcome.closed_at.date_naive()) {
            self.realized_daily_pnl += outcome.realized_pnl;
        }
    }

    /// 跨越UTC日界时以当前权益作为新一天的起点，返回是否发生了切换
    pub fn roll_day(&mut self, now: DateTime<Utc>) -> bool {
        let today = now.date_naive();
        match self.day {
            Some(day) if day >= today => false,
            previous => {
                if previous.is_some() {
                    info!(
                        "📅 日切 {} 已实现盈亏 {:.2}，新一日起始权益 {:.2}",
                        today, self.realized_daily_pnl, self.equity
                    );
                }
                self.day = Some(today);
                self.day_start_equity = self.equity;
                self.realized_daily_pnl = 0.0;
                previous.is_some()
            }
        }
    }

    pub fn drawdown_fraction(&self) -> f64 {
        if self.peak_equity > 0.0 {
            ((self.peak_equity - self.equity) / self.peak_equity).max(0.0)
        } else {
            0.0
        }
    }

    pub fn daily_pnl(&self) -> f64 {
        self.realized_daily_pnl + self.unrealized_pnl
    }

    pub fn daily_loss_fraction(&self) -> f64 {
        if self.day_start_equity > 0.0 {
            (-self.daily_pnl()).max(0.0) / self.day_start_equity
        } else {
            0.0
        }
    }

    pub fn snapshot(&self, exposure_fraction: f64, now: DateTime<Utc>) -> PortfolioSnapshot {
        PortfolioSnapshot {
            balance: self.balance,
            equity: self.equity,
            total_exposure_fraction: exposure_fraction,
            realized_daily_pnl: self.realized_daily_pnl,
            daily_pnl: self.daily_pnl(),
            drawdown_fraction: self.drawdown_fraction(),
            daily_loss_fraction: self.daily_loss_fraction(),
            timestamp: now,
        }
    }
}
