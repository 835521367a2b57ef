//! 冷却管理
//!
//! 资产级冷却状态放在各资产自己的互斥区内，全局冷却由管理器持有，
//! 资产并行处理阶段只读

use chrono::{DateTime, Duration, Utc};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;

use crate::core::config::{CooldownConfig, RiskConfig};
use crate::core::types::{utc_day_start, Asset};
use crate::strategies::short_seller::portfolio::PortfolioSnapshot;
use crate::strategies::short_seller::position_manager::TradeOutcome;

/// 冷却原因
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CooldownReason {
    QuickExit,
    LossStreak,
    HighFrequency,
    DailyLimit,
    PortfolioProtection,
}

impl fmt::Display for CooldownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            CooldownReason::QuickExit => "quick exit",
            CooldownReason::LossStreak => "loss streak",
            CooldownReason::HighFrequency => "high frequency",
            CooldownReason::DailyLimit => "daily limit",
            CooldownReason::PortfolioProtection => "portfolio protection",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CooldownScope {
    Asset,
    Global,
}

/// 冷却窗口，`now < expiry` 时生效
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CooldownWindow {
    pub scope: CooldownScope,
    pub asset: Option<Asset>,
    pub reason: CooldownReason,
    pub started_at: DateTime<Utc>,
    pub expiry: DateTime<Utc>,
}

impl CooldownWindow {
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        now < self.expiry
    }
}

/// 单个资产的冷却状态
#[derive(Debug, Clone, Default)]
pub struct AssetCooldown {
    window: Option<CooldownWindow>,
    loss_streak: usize,
    /// 最近交易的平仓时间，只保留统计需要的部分
    recent_closes: VecDeque<DateTime<Utc>>,
}

impl AssetCooldown {
    pub fn is_blocked(&self, now: DateTime<Utc>) -> bool {
        self.active_window(now).is_some()
    }

    pub fn active_window(&self, now: DateTime<Utc>) -> Option<&CooldownWindow> {
        self.window.as_ref().filter(|w| w.is_active(now))
    }

    pub fn loss_streak(&self) -> usize {
        self.loss_streak
    }

    /// 取出已到期的窗口，每个窗口只返回一次
    pub fn take_expired(&mut self, now: DateTime<Utc>) -> Option<CooldownWindow> {
        if self.window.as_ref().map(|w| !w.is_active(now)).unwrap_or(false) {
            self.window.take()
        } else {
            None
        }
    }

    /// 延长冷却，已有更长的窗口时保持不变
    fn extend(&mut self, candidate: CooldownWindow) -> Option<CooldownWindow> {
        match &self.window {
            Some(existing) if existing.expiry >= candidate.expiry => None,
            _ => {
                self.window = Some(candidate.clone());
                Some(candidate)
            }
        }
    }
}

/// 冷却管理器
pub struct CooldownManager {
    config: CooldownConfig,
    max_drawdown: f64,
    max_daily_loss: f64,
    global: Option<CooldownWindow>,
}

impl CooldownManager {
    pub fn new(config: &CooldownConfig, risk: &RiskConfig) -> Self {
        Self {
            config: config.clone(),
            max_drawdown: risk.max_drawdown,
            max_daily_loss: risk.max_daily_loss,
            global: None,
        }
    }

    /// 交易平仓后评估资产级冷却，返回新建或延长的窗口
    pub fn on_trade_closed(
        &self,
        state: &mut AssetCooldown,
        outcome: &TradeOutcome,
    ) -> Option<CooldownWindow> {
        let asset = outcome.asset;
        let closed_at = outcome.closed_at;

        if outcome.realized_pnl > 0.0 {
            state.loss_streak = 0;
        } else if outcome.realized_pnl < 0.0 {
            state.loss_streak += 1;
        }

        let hf_window = Duration::minutes(self.config.high_frequency_window_minutes);
        let keep_from = utc_day_start(closed_at).min(closed_at - hf_window);
        state.recent_closes.push_back(closed_at);
        state.recent_closes.retain(|ts| *ts >= keep_from);

        let trades_in_window = state
            .recent_closes
            .iter()
            .filter(|ts| **ts >= closed_at - hf_window && **ts <= closed_at)
            .count();
        let day_start = utc_day_start(closed_at);
        let trades_today = state
            .recent_closes
            .iter()
            .filter(|ts| **ts >= day_start && **ts <= closed_at)
            .count();

        let mut triggers = Vec::new();
        if outcome.hold_duration() < Duration::minutes(self.config.quick_exit_hold_minutes) {
            triggers.push((
                CooldownReason::QuickExit,
                self.config.quick_exit_cooldown_minutes,
            ));
        }
        if state.loss_streak >= self.config.loss_streak_threshold {
            triggers.push((
                CooldownReason::LossStreak,
                self.config.loss_streak_cooldown_minutes,
            ));
            state.loss_streak = 0;
        }
        if trades_in_window > self.config.high_frequency_max_trades {
            triggers.push((
                CooldownReason::HighFrequency,
                self.config.high_frequency_cooldown_minutes,
            ));
        }
        if trades_today >= self.config.daily_trade_limit {
            triggers.push((
                CooldownReason::DailyLimit,
                self.config.daily_limit_cooldown_minutes,
            ));
        }

        // 多个触发时取到期最晚的一个，相同时长保留先出现的原因
        let (reason, minutes) = triggers
            .into_iter()
            .reduce(|best, next| if next.1 > best.1 { next } else { best })?;

        let candidate = CooldownWindow {
            scope: CooldownScope::Asset,
            asset: Some(asset),
            reason,
            started_at: closed_at,
            expiry: closed_at + Duration::minutes(minutes),
        };

        let started = state.extend(candidate);
        if let Some(window) = &started {
            info!(
                "{} 🧊 进入冷却 原因: {} 至 {}",
                asset,
                window.reason,
                window.expiry.format("%Y-%m-%d %H:%M")
            );
        }
        started
    }

    /// 回撤或日亏损超限时启动全局冷却
    pub fn on_portfolio_snapshot(
        &mut self,
        snapshot: &PortfolioSnapshot,
        now: DateTime<Utc>,
    ) -> Option<CooldownWindow> {
        let breached = snapshot.drawdown_fraction > self.max_drawdown
            || snapshot.daily_loss_fraction > self.max_daily_loss;
        if !breached || self.is_globally_blocked(now) {
            return None;
        }

        let window = CooldownWindow {
            scope: CooldownScope::Global,
            asset: None,
            reason: CooldownReason::PortfolioProtection,
            started_at: now,
            expiry: now + Duration::minutes(self.config.global_cooldown_minutes),
        };
        warn!(
            "🚨 组合保护触发 回撤 {:.2}% 日亏损 {:.2}%，全部平仓并冷却至 {}",
            snapshot.drawdown_fraction * 100.0,
            snapshot.daily_loss_fraction * 100.0,
            window.expiry.format("%Y-%m-%d %H:%M")
        );
        self.global = Some(window.clone());
        Some(window)
    }

    pub fn is_blocked(&self, state: &AssetCooldown, now: DateTime<Utc>) -> bool {
        state.is_blocked(now) || self.is_globally_blocked(now)
    }

    pub fn is_globally_blocked(&self, now: DateTime<Utc>) -> bool {
        self.global_window(now).is_some()
    }

    pub fn global_window(&self, now: DateTime<Utc>) -> Option<&CooldownWindow> {
        self.global.as_ref().filter(|w| w.is_active(now))
    }

    /// 取出自上次清理以来到期的全局窗口
    ///
    /// 资产级窗口由各资产任务在自己的互斥区内通过 [`AssetCooldown::take_expired`] 取出
    pub fn sweep_expired(&mut self, now: DateTime<Utc>) -> Option<CooldownWindow> {
        if !self.global.as_ref().map(|w| !w.is_active(now)).unwrap_or(false) {
            return None;
        }
        let ended = self.global.take();
        if let Some(window) = &ended {
            info!("✅ 全局冷却结束 ({})", window.reason);
        }
        ended
    }
}
