// 核心模块 - 配置、错误和基础类型
pub mod config;
pub mod error;
pub mod types;

pub use self::config::*;
pub use self::error::*;
pub use self::types::{Asset, AssetTable, Bar, OrderSide};
