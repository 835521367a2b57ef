//! 引擎事件与事件接收端

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::Serialize;
use tokio::sync::mpsc;

use crate::core::error::{EngineError, Result};
use crate::core::types::Asset;
use crate::strategies::short_seller::cooldown::{CooldownReason, CooldownScope, CooldownWindow};
use crate::strategies::short_seller::monitoring::RiskMetrics;
use crate::strategies::short_seller::regime::{RegimeTransition, RegimeValue};
use crate::strategies::short_seller::signal::{Signal, SignalAction};

/// 引擎对外发布的事件
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum EngineEvent {
    Signal(Signal),
    RegimeChanged {
        asset: Asset,
        from: RegimeValue,
        to: RegimeValue,
        timestamp: DateTime<Utc>,
    },
    CooldownStarted {
        scope: CooldownScope,
        asset: Option<Asset>,
        reason: CooldownReason,
        expiry: DateTime<Utc>,
    },
    CooldownEnded {
        scope: CooldownScope,
        asset: Option<Asset>,
        reason: CooldownReason,
        expiry: DateTime<Utc>,
    },
    RiskMetrics(RiskMetrics),
    /// 被丢弃的输入
    InputRejected {
        asset: Option<Asset>,
        reason: String,
        timestamp: DateTime<Utc>,
    },
}

impl EngineEvent {
    pub fn cooldown_started(window: &CooldownWindow) -> Self {
        EngineEvent::CooldownStarted {
            scope: window.scope,
            asset: window.asset,
            reason: window.reason,
            expiry: window.expiry,
        }
    }

    pub fn cooldown_ended(window: &CooldownWindow) -> Self {
        EngineEvent::CooldownEnded {
            scope: window.scope,
            asset: window.asset,
            reason: window.reason,
            expiry: window.expiry,
        }
    }

    pub fn input_rejected(error: &EngineError, timestamp: DateTime<Utc>) -> Self {
        let (asset, reason) = match error {
            EngineError::InputError { asset, reason } => (*asset, reason.clone()),
            other => (None, other.to_string()),
        };
        EngineEvent::InputRejected {
            asset,
            reason,
            timestamp,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            EngineEvent::Signal(_) => "Signal",
            EngineEvent::RegimeChanged { .. } => "RegimeChanged",
            EngineEvent::CooldownStarted { .. } => "CooldownStarted",
            EngineEvent::CooldownEnded { .. } => "CooldownEnded",
            EngineEvent::RiskMetrics(_) => "RiskMetrics",
            EngineEvent::InputRejected { .. } => "InputRejected",
        }
    }
}

impl From<RegimeTransition> for EngineEvent {
    fn from(t: RegimeTransition) -> Self {
        EngineEvent::RegimeChanged {
            asset: t.asset,
            from: t.from,
            to: t.to,
            timestamp: t.timestamp,
        }
    }
}

/// 事件接收端
#[async_trait]
pub trait EventSink: Send + Sync {
    fn name(&self) -> &str;

    async fn publish(&self, event: &EngineEvent) -> Result<()>;
}

/// 写入日志的接收端
pub struct LogEventSink;

#[async_trait]
impl EventSink for LogEventSink {
    fn name(&self) -> &str {
        "log"
    }

    async fn publish(&self, event: &EngineEvent) -> Result<()> {
        match event {
            EngineEvent::Signal(signal) if signal.action == SignalAction::NoAction => {
                debug!("{} ⏸️ 无动作: {}", signal.asset, signal.reason);
            }
            EngineEvent::Signal(signal) => {
                info!(
                    "{} 🎯 {:?} 价格 {:?} 止损 {:?} 止盈 {:?} 名义 {:?} 原因: {}",
                    signal.asset,
                    signal.action,
                    signal.price,
                    signal.stop_loss,
                    signal.take_profit,
                    signal.notional,
                    signal.reason
                );
            }
            EngineEvent::RiskMetrics(metrics) => {
                debug!(
                    "📊 敞口 {:.2}x 日盈亏 {:.2} 回撤 {:.2}% 持仓 {} 待成交 {}",
                    metrics.total_exposure_fraction,
                    metrics.daily_pnl,
                    metrics.drawdown_fraction * 100.0,
                    metrics.active_positions,
                    metrics.pending_entries
                );
            }
            EngineEvent::InputRejected { asset, reason, .. } => {
                warn!("⚠️ 输入被丢弃 {:?}: {}", asset, reason);
            }
            other => {
                info!("📣 {}: {}", other.name(), serde_json::to_string(other)?);
            }
        }
        Ok(())
    }
}

/// 转发到 tokio 通道的接收端
pub struct ChannelEventSink {
    sender: mpsc::UnboundedSender<EngineEvent>,
}

impl ChannelEventSink {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<EngineEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

#[async_trait]
impl EventSink for ChannelEventSink {
    fn name(&self) -> &str {
        "channel"
    }

    async fn publish(&self, event: &EngineEvent) -> Result<()> {
        self.sender
            .send(event.clone())
            .map_err(|_| EngineError::Other("事件通道已关闭".to_string()))
    }
}
