/// 统一的技术指标模块
/// 静态计算函数与流式（增量）指标
use std::collections::VecDeque;

/// 静态技术指标计算函数（无状态）
pub mod functions {
    /// 计算指数移动平均线 (EMA)，以第一个价格作为种子
    pub fn ema(prices: &[f64], period: usize) -> Option<f64> {
        if prices.is_empty() || period == 0 {
            return None;
        }

        let multiplier = 2.0 / (period as f64 + 1.0);
        let mut ema = prices[0];

        for price in prices.iter().skip(1) {
            ema = (price - ema) * multiplier + ema;
        }

        Some(ema)
    }

    /// 对数收益率序列
    pub fn log_returns(prices: &[f64]) -> Vec<f64> {
        prices
            .windows(2)
            .filter(|w| w[0] > 0.0 && w[1] > 0.0)
            .map(|w| (w[1] / w[0]).ln())
            .collect()
    }

    /// 样本标准差（n-1），少于两个样本时为 0
    pub fn sample_std_dev(values: &[f64]) -> f64 {
        if values.len() < 2 {
            return 0.0;
        }

        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);

        variance.sqrt()
    }
}

/// 流式技术指标（有状态，支持增量计算）
pub mod streaming {
    use super::*;

    /// 流式指数移动平均
    ///
    /// 第一笔数据直接作为初值，之后按 `new = prev + α(price − prev)` 递推，
    /// 同时保留上一期的值用于穿越判断
    #[derive(Debug, Clone)]
    pub struct EMA {
        multiplier: f64,
        value: Option<f64>,
        previous: Option<f64>,
    }

    impl EMA {
        pub fn new(period: usize) -> Self {
            Self {
                multiplier: 2.0 / (period as f64 + 1.0),
                value: None,
                previous: None,
            }
        }

        pub fn update(&mut self, price: f64) -> f64 {
            let next = match self.value {
                None => price,
                Some(prev) => (price - prev) * self.multiplier + prev,
            };
            self.previous = self.value;
            self.value = Some(next);
            next
        }

        pub fn current(&self) -> Option<f64> {
            self.value
        }

        pub fn previous(&self) -> Option<f64> {
            self.previous
        }
    }

    /// 滚动实现波动率：窗口内收盘价对数收益率的样本标准差
    #[derive(Debug, Clone)]
    pub struct RollingVolatility {
        window: usize,
        closes: VecDeque<f64>,
    }

    impl RollingVolatility {
        pub fn new(window: usize) -> Self {
            Self {
                window,
                closes: VecDeque::with_capacity(window),
            }
        }

        pub fn update(&mut self, close: f64) -> f64 {
            if self.closes.len() >= self.window {
                self.closes.pop_front();
            }
            self.closes.push_back(close);
            self.current()
        }

        pub fn current(&self) -> f64 {
            let closes: Vec<f64> = self.closes.iter().copied().collect();
            functions::sample_std_dev(&functions::log_returns(&closes))
        }
    }
}

pub use streaming::{RollingVolatility, EMA};

/// 按小数位四舍五入价格
pub fn round_to_precision(value: f64, precision: u32) -> f64 {
    let factor = 10f64.powi(precision as i32);
    (value * factor).round() / factor
}

#[cfg(test)]
mod tests {
    use super::functions::*;
    use super::*;

    #[test]
    fn test_ema_seeds_with_first_price() {
        let mut ema = EMA::new(3);
        assert_eq!(ema.update(100.0), 100.0);
        assert!(ema.previous().is_none());

        // α = 0.5
        assert!((ema.update(104.0) - 102.0).abs() < 1e-12);
        assert_eq!(ema.previous(), Some(100.0));
        assert_eq!(ema.current(), super::functions::ema(&[100.0, 104.0], 3));
    }

    #[test]
    fn test_streaming_matches_batch_ema() {
        let prices = [100.0, 101.5, 99.0, 98.2, 102.3, 97.7];
        let mut ema = EMA::new(5);
        for p in prices {
            ema.update(p);
        }
        let batch = super::functions::ema(&prices, 5).unwrap();
        assert!((ema.current().unwrap() - batch).abs() < 1e-9);
    }

    #[test]
    fn test_volatility_needs_two_returns() {
        let mut vol = RollingVolatility::new(12);
        assert_eq!(vol.update(100.0), 0.0);
        assert_eq!(vol.update(101.0), 0.0);
        assert!(vol.update(99.0) > 0.0);
    }

    #[test]
    fn test_volatility_window_is_bounded() {
        let mut vol = RollingVolatility::new(3);
        for p in [100.0, 150.0, 80.0, 100.0, 100.0, 100.0] {
            vol.update(p);
        }
        // 窗口只剩最后三根，价格不变，波动率为0
        assert_eq!(vol.current(), 0.0);
    }

    #[test]
    fn test_sample_std_dev() {
        let values = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        let expected = (32.0f64 / 7.0).sqrt();
        assert!((sample_std_dev(&values) - expected).abs() < 1e-12);
        assert_eq!(sample_std_dev(&[1.0]), 0.0);
    }

    #[test]
    fn test_round_to_precision() {
        assert_eq!(round_to_precision(98.0 * 1.015, 2), 99.47);
        assert_eq!(round_to_precision(98.0 * 0.94, 2), 92.12);
        assert_eq!(round_to_precision(0.123456, 4), 0.1235);
    }
}
