//! 指标引擎
//!
//! 每个资产维护快/慢两条EMA、价格下穿均线的事件日志、当日穿越计数和滚动波动率

use chrono::{DateTime, Duration, NaiveDate, Utc};
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use crate::core::config::IndicatorConfig;
use crate::core::error::{EngineError, Result};
use crate::core::types::{utc_day_start, Asset, Bar};
use crate::utils::indicators::{RollingVolatility, EMA};

/// 穿越类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CrossKind {
    PriceBelowFast,
    PriceBelowSlow,
}

/// 价格下穿均线事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrossEvent {
    pub asset: Asset,
    pub kind: CrossKind,
    /// 产生穿越的K线时间
    pub timestamp: DateTime<Utc>,
    pub price: f64,
    /// 被穿越的均线值
    pub reference: f64,
}

/// 单个资产的指标状态
#[derive(Debug, Clone)]
pub struct IndicatorState {
    asset: Asset,
    fast: EMA,
    slow: EMA,
    last_close: Option<f64>,
    last_timestamp: Option<DateTime<Utc>>,
    cross_log: VecDeque<CrossEvent>,
    capacity: usize,
    daily_cross_count: usize,
    count_date: Option<NaiveDate>,
    volatility: RollingVolatility,
}

impl IndicatorState {
    pub fn new(asset: Asset, config: &IndicatorConfig) -> Self {
        Self {
            asset,
            fast: EMA::new(config.fast_ema),
            slow: EMA::new(config.slow_ema),
            last_close: None,
            last_timestamp: None,
            cross_log: VecDeque::with_capacity(config.cross_log_capacity),
            capacity: config.cross_log_capacity.max(1),
            daily_cross_count: 0,
            count_date: None,
            volatility: RollingVolatility::new(config.volatility_window),
        }
    }

    /// 用一根已收盘K线更新指标，返回本根K线产生的穿越事件
    ///
    /// 非法K线返回输入错误，状态不变
    pub fn update(&mut self, bar: &Bar) -> Result<Vec<CrossEvent>> {
        self.check_bar(bar)?;

        let prev_close = self.last_close;
        let prev_fast = self.fast.current();
        let prev_slow = self.slow.current();

        let fast = self.fast.update(bar.close);
        let slow = self.slow.update(bar.close);
        self.volatility.update(bar.close);

        self.roll_day(bar.timestamp);

        let mut crosses = Vec::new();
        if let Some(prev_close) = prev_close {
            for (kind, prev_ema, new_ema) in [
                (CrossKind::PriceBelowFast, prev_fast, fast),
                (CrossKind::PriceBelowSlow, prev_slow, slow),
            ] {
                let Some(prev_ema) = prev_ema else { continue };
                if prev_close >= prev_ema && bar.close < new_ema {
                    crosses.push(CrossEvent {
                        asset: self.asset,
                        kind,
                        timestamp: bar.timestamp,
                        price: bar.close,
                        reference: new_ema,
                    });
                }
            }
        }

        for cross in &crosses {
            debug!(
                "{} 📉 {:?} 价格 {:.4} < 均线 {:.4}",
                self.asset, cross.kind, cross.price, cross.reference
            );
            if self.cross_log.len() >= self.capacity {
                self.cross_log.pop_front();
            }
            self.cross_log.push_back(cross.clone());
            self.daily_cross_count += 1;
        }

        self.last_close = Some(bar.close);
        self.last_timestamp = Some(bar.timestamp);

        Ok(crosses)
    }

    fn check_bar(&self, bar: &Bar) -> Result<()> {
        if bar.asset != self.asset {
            return Err(EngineError::input(
                self.asset,
                format!("K线资产 {} 与状态不符", bar.asset),
            ));
        }
        bar.validate().map_err(|reason| EngineError::input(self.asset, reason))?;
        if let Some(last) = self.last_timestamp {
            if bar.timestamp <= last {
                return Err(EngineError::input(
                    self.asset,
                    format!("时间戳不单调: {} <= {}", bar.timestamp, last),
                ));
            }
        }
        Ok(())
    }

    /// 跨越UTC日界时清零计数并清除前一日的穿越记录
    fn roll_day(&mut self, ts: DateTime<Utc>) {
        let day = ts.date_naive();
        if self.count_date == Some(day) {
            return;
        }
        if self.count_date.is_some() {
            debug!(
                "{} 日内穿越计数重置 (前一日 {} 次)",
                self.asset, self.daily_cross_count
            );
        }
        let boundary = utc_day_start(ts);
        self.cross_log.retain(|e| e.timestamp >= boundary);
        self.daily_cross_count = 0;
        self.count_date = Some(day);
    }

    pub fn asset(&self) -> Asset {
        self.asset
    }

    pub fn fast_ema(&self) -> Option<f64> {
        self.fast.current()
    }

    pub fn slow_ema(&self) -> Option<f64> {
        self.slow.current()
    }

    pub fn last_close(&self) -> Option<f64> {
        self.last_close
    }

    pub fn last_timestamp(&self) -> Option<DateTime<Utc>> {
        self.last_timestamp
    }

    pub fn daily_cross_count(&self) -> usize {
        self.daily_cross_count
    }

    pub fn volatility(&self) -> f64 {
        self.volatility.current()
    }

    pub fn cross_log(&self) -> impl Iterator<Item = &CrossEvent> {
        self.cross_log.iter()
    }

    /// 有效期内最近的一次穿越，`now - timestamp` 在 `[0, window]` 之内
    pub fn latest_cross_within(&self, now: DateTime<Utc>, window: Duration) -> Option<&CrossEvent> {
        self.cross_log.iter().rev().find(|e| {
            let age = now - e.timestamp;
            age >= Duration::zero() && age <= window
        })
    }
}
