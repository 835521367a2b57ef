//! 信号与原因码

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;

use crate::core::types::Asset;
use crate::strategies::short_seller::cooldown::CooldownReason;
use crate::strategies::short_seller::regime::RegimeValue;

/// 信号动作
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignalAction {
    EnterShort,
    Exit,
    NoAction,
}

/// 信号原因码，序列化为可读字符串
#[derive(Debug, Clone, PartialEq)]
pub enum ReasonCode {
    /// 入场：近期下穿均线
    EmaCross,

    // 平仓原因
    PortfolioProtection,
    RegimeExit,
    StopLoss,
    TakeProfit,
    MaxHoldTime,

    // 风控拒绝
    ExposureLimit,
    DailyLossLimit,
    DrawdownLimit,
    InsufficientBalance,

    // 不满足入场条件
    AssetCooldown(CooldownReason),
    GlobalCooldown(CooldownReason),
    DailyCrossLimit,
    RegimeNotActive(RegimeValue),
    NoRecentCross,
    /// 最近的穿越已经用于一次入场
    CrossConsumed,
    EntryPending,
    HoldingPosition,
    /// 平仓信号已发出，等待结果
    ExitPending,

    InputError(String),
}

impl ReasonCode {
    pub fn input_error(reason: impl Into<String>) -> Self {
        ReasonCode::InputError(reason.into())
    }
}

impl fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReasonCode::EmaCross => f.write_str("ema cross"),
            ReasonCode::PortfolioProtection => f.write_str("portfolio protection"),
            ReasonCode::RegimeExit => f.write_str("regime exit"),
            ReasonCode::StopLoss => f.write_str("stop loss"),
            ReasonCode::TakeProfit => f.write_str("take profit"),
            ReasonCode::MaxHoldTime => f.write_str("max hold time"),
            ReasonCode::ExposureLimit => f.write_str("exposure limit"),
            ReasonCode::DailyLossLimit => f.write_str("daily loss limit"),
            ReasonCode::DrawdownLimit => f.write_str("drawdown limit"),
            ReasonCode::InsufficientBalance => f.write_str("insufficient balance"),
            ReasonCode::AssetCooldown(reason) => write!(f, "asset cooldown: {}", reason),
            ReasonCode::GlobalCooldown(reason) => write!(f, "global cooldown: {}", reason),
            ReasonCode::DailyCrossLimit => f.write_str("daily cross limit"),
            ReasonCode::RegimeNotActive(regime) => write!(f, "regime {}", regime),
            ReasonCode::NoRecentCross => f.write_str("no recent cross"),
            ReasonCode::CrossConsumed => f.write_str("cross already used"),
            ReasonCode::EntryPending => f.write_str("entry pending"),
            ReasonCode::HoldingPosition => f.write_str("holding position"),
            ReasonCode::ExitPending => f.write_str("exit pending"),
            ReasonCode::InputError(reason) => write!(f, "input error: {}", reason),
        }
    }
}

impl Serialize for ReasonCode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// 引擎输出的交易信号
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Signal {
    pub asset: Asset,
    pub action: SignalAction,
    /// 决策时的价格，缺少K线时为 None
    pub price: Option<f64>,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
    /// 杠杆后名义价值
    pub notional: Option<f64>,
    pub reason: ReasonCode,
    pub timestamp: DateTime<Utc>,
}

impl Signal {
    pub fn no_action(
        asset: Asset,
        price: Option<f64>,
        reason: ReasonCode,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            asset,
            action: SignalAction::NoAction,
            price,
            stop_loss: None,
            take_profit: None,
            notional: None,
            reason,
            timestamp,
        }
    }

    pub fn exit(asset: Asset, price: Option<f64>, reason: ReasonCode, timestamp: DateTime<Utc>) -> Self {
        Self {
            action: SignalAction::Exit,
            ..Self::no_action(asset, price, reason, timestamp)
        }
    }

    pub fn is_actionable(&self) -> bool {
        self.action != SignalAction::NoAction
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reason_codes_render_as_readable_strings() {
        assert_eq!(ReasonCode::ExposureLimit.to_string(), "exposure limit");
        assert_eq!(
            ReasonCode::AssetCooldown(CooldownReason::LossStreak).to_string(),
            "asset cooldown: loss streak"
        );
        assert_eq!(
            ReasonCode::input_error("missing bar").to_string(),
            "input error: missing bar"
        );
        assert_eq!(ReasonCode::CrossConsumed.to_string(), "cross already used");
    }

    #[test]
    fn signal_serializes_action_and_reason() {
        let ts = chrono::TimeZone::with_ymd_and_hms(&Utc, 2025, 8, 5, 12, 0, 0).unwrap();
        let signal = Signal::exit(Asset::ETH, Some(3500.0), ReasonCode::TakeProfit, ts);
        let json = serde_json::to_value(&signal).unwrap();
        assert_eq!(json["action"], "EXIT");
        assert_eq!(json["reason"], "take profit");
        assert_eq!(json["asset"], "ETH");
        assert!(signal.is_actionable());
    }
}
