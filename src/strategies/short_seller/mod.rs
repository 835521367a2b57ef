//! 多资产空头策略
//!
//! 基于快慢均线的下穿信号，在 BTC/ETH/SOL 之间统一做优先级排序和组合风控。
//! 引擎只输出信号，下单和成交回报由外部执行层负责

pub mod cooldown;
pub mod coordinator;
pub mod engine;
pub mod events;
pub mod exit_rules;
pub mod indicator;
pub mod monitoring;
pub mod portfolio;
pub mod position_manager;
pub mod regime;
pub mod risk_control;
pub mod signal;

pub use coordinator::{Candidate, CycleReport, EntryCandidate, SignalCoordinator};
pub use engine::{EngineContext, EngineHandle, EngineInput, EntryFailure, ShortSellerEngine};
pub use events::{ChannelEventSink, EngineEvent, EventSink, LogEventSink};
pub use position_manager::{Fill, TradeOutcome};
pub use portfolio::PortfolioUpdate;
pub use signal::{ReasonCode, Signal, SignalAction};
