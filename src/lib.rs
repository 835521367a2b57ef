pub mod core;
pub mod strategies;
pub mod utils;

// 选择性导出，避免命名冲突
pub use crate::core::{config::*, error::*, types::*};
pub use strategies::short_seller::{
    CycleReport, EngineEvent, EngineHandle, EngineInput, ShortSellerEngine, Signal, SignalAction,
};
