// 策略模块
pub mod short_seller;

pub use short_seller::{ShortSellerEngine, Signal, SignalAction};
