//! 市场状态判定
//!
//! 每个资产一个 ACTIVE / INACTIVE / COOLDOWN 状态机，只有判定器可以改写状态

use chrono::{DateTime, Duration, Utc};
use log::info;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::core::config::RegimeConfig;
use crate::core::types::Asset;

/// 市场状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RegimeValue {
    Active,
    Inactive,
    Cooldown,
}

impl fmt::Display for RegimeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegimeValue::Active => f.write_str("ACTIVE"),
            RegimeValue::Inactive => f.write_str("INACTIVE"),
            RegimeValue::Cooldown => f.write_str("COOLDOWN"),
        }
    }
}

/// 单个资产的状态
#[derive(Debug, Clone, PartialEq)]
pub struct RegimeState {
    pub value: RegimeValue,
    /// 最近一次状态切换时间
    pub changed_at: Option<DateTime<Utc>>,
    /// 进入 ACTIVE 的时间，仅在 ACTIVE 时有值
    pub active_since: Option<DateTime<Utc>>,
}

impl Default for RegimeState {
    fn default() -> Self {
        Self {
            value: RegimeValue::Inactive,
            changed_at: None,
            active_since: None,
        }
    }
}

impl RegimeState {
    pub fn is_active(&self) -> bool {
        self.value == RegimeValue::Active
    }

    /// 处于 ACTIVE 的时长
    pub fn time_in_active(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.active_since.map(|since| now - since)
    }
}

/// 判定输入
#[derive(Debug, Clone, Copy)]
pub struct RegimeInputs {
    pub price: f64,
    pub fast_ema: f64,
    pub slow_ema: f64,
    pub daily_cross_count: usize,
    /// 资产冷却或全局冷却是否生效
    pub cooldown_active: bool,
}

/// 状态切换
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegimeTransition {
    pub asset: Asset,
    pub from: RegimeValue,
    pub to: RegimeValue,
    pub timestamp: DateTime<Utc>,
}

impl RegimeTransition {
    /// ACTIVE → INACTIVE，持仓时触发状态平仓
    pub fn is_deactivation(&self) -> bool {
        self.from == RegimeValue::Active && self.to == RegimeValue::Inactive
    }
}

/// 市场状态判定器
pub struct RegimeDetector {
    max_daily_crosses: usize,
}

impl RegimeDetector {
    pub fn new(config: &RegimeConfig) -> Self {
        Self {
            max_daily_crosses: config.max_daily_crosses,
        }
    }

    /// 按优先级判定：穿越过多 > 冷却 > 空头排列 > 其它
    pub fn classify(&self, inputs: &RegimeInputs) -> RegimeValue {
        if inputs.daily_cross_count >= self.max_daily_crosses {
            return RegimeValue::Inactive;
        }
        if inputs.cooldown_active {
            return RegimeValue::Cooldown;
        }
        if inputs.price < inputs.fast_ema
            && inputs.price < inputs.slow_ema
            && inputs.fast_ema < inputs.slow_ema
        {
            return RegimeValue::Active;
        }
        RegimeValue::Inactive
    }

    /// 评估并写入新状态，发生切换时返回切换记录
    pub fn evaluate(
        &self,
        asset: Asset,
        state: &mut RegimeState,
        inputs: &RegimeInputs,
        now: DateTime<Utc>,
    ) -> Option<RegimeTransition> {
        let next = self.classify(inputs);
        if next == state.value {
            return None;
        }

        let transition = RegimeTransition {
            asset,
            from: state.value,
            to: next,
            timestamp: now,
        };

        state.value = next;
        state.changed_at = Some(now);
        state.active_since = if next == RegimeValue::Active {
            Some(now)
        } else {
            None
        };

        info!(
            "{} 🔄 市场状态 {} -> {} (价格 {:.4}, 快线 {:.4}, 慢线 {:.4}, 当日穿越 {})",
            asset,
            transition.from,
            transition.to,
            inputs.price,
            inputs.fast_ema,
            inputs.slow_ema,
            inputs.daily_cross_count
        );

        Some(transition)
    }
}
